//! Headless replay runner.
//!
//! Drives the simulation kernel from the command line against the
//! fixture dataset: generate a scripted skirmish replay, run a replay
//! file to its end, and print per-player summaries with APM from the
//! action events.

use std::process::ExitCode;
use std::sync::Arc;

use tss_sim::actions::{ActionData, PlayerAction};
use tss_sim::api::SimWorld;
use tss_sim::data::orders;
use tss_sim::fixed::Xy;
use tss_sim::fixtures;
use tss_sim::replay::{ReplayData, ReplaySlot};
use tss_sim::state::MAX_PLAYERS;
use tss_sim::{GameType, SimEvent};

/// Logical ticks per second of game time.
const TICKS_PER_SECOND: f64 = 1000.0 / 42.0;

fn main() -> ExitCode {
    env_logger::init();
    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(String::as_str) {
        Some("demo") => {
            let path = args.get(2).map(String::as_str).unwrap_or("demo.tssrep");
            demo(path)
        }
        Some("run") => match args.get(2) {
            Some(path) => run(path),
            None => usage(),
        },
        _ => usage(),
    }
}

fn usage() -> ExitCode {
    eprintln!("usage: tss-replay demo [out-file]");
    eprintln!("       tss-replay run <replay-file>");
    ExitCode::FAILURE
}

/// Build the scripted skirmish replay, write it, then run it.
fn demo(path: &str) -> ExitCode {
    let replay = scripted_replay();
    if let Err(err) = std::fs::write(path, replay.to_bytes()) {
        eprintln!("cannot write {path}: {err}");
        return ExitCode::FAILURE;
    }
    println!("wrote {path} ({} actions, {} frames)", replay.actions.len(), replay.end_frame);
    run(path)
}

fn run(path: &str) -> ExitCode {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) => {
            eprintln!("cannot read {path}: {err}");
            return ExitCode::FAILURE;
        }
    };
    let replay = match ReplayData::parse(&bytes) {
        Ok(replay) => replay,
        Err(err) => {
            eprintln!("cannot parse {path}: {err}");
            return ExitCode::FAILURE;
        }
    };
    log::debug!("loaded {} bytes from {path}", bytes.len());
    println!(
        "replay: {} frames (~{:.0} s), seed {:#x}",
        replay.end_frame,
        f64::from(replay.end_frame) / TICKS_PER_SECOND,
        replay.seed
    );

    let mut sim = skirmish_world(replay.seed);
    let events = match sim.run_replay(&replay) {
        Ok(events) => events,
        Err(err) => {
            eprintln!("simulation aborted at frame {}: {err}", sim.current_frame());
            return ExitCode::FAILURE;
        }
    };

    let mut kills = 0u32;
    for event in &events {
        if matches!(event, SimEvent::UnitKilled(_)) {
            kills += 1;
        }
    }
    let minutes = f64::from(sim.current_frame()) / TICKS_PER_SECOND / 60.0;
    println!("finished at frame {} with {kills} units lost", sim.current_frame());
    let state = sim.state();
    for (slot, player) in state.players.iter().enumerate() {
        if !player.initially_active {
            continue;
        }
        let apm = if minutes > 0.0 { f64::from(player.action_count) / minutes } else { 0.0 };
        println!(
            "  player {slot}: {:3} units, {:4} minerals, {:4.0} apm, outcome {}",
            state.player_units[slot].len(),
            player.minerals,
            apm,
            match player.victory_state {
                2 => "defeated",
                3 => "victory",
                _ => "undecided",
            }
        );
    }
    ExitCode::SUCCESS
}

/// The deterministic battlefield both `demo` and `run` share.
fn skirmish_world(seed: u32) -> SimWorld {
    let data = Arc::new(fixtures::game_data());
    let mut sim = SimWorld::new(data.clone(), 64, 64, seed, GameType::Melee);
    {
        let mut state = sim.state_mut();
        *state = fixtures::blank_state(64, 64, seed);
        for i in 0..6 {
            state
                .place_completed_unit(&data, fixtures::MARINE, 0, Xy::new(400 + i * 48, 640))
                .unwrap();
            state
                .place_completed_unit(&data, fixtures::MARINE, 1, Xy::new(1500 + i * 48, 640))
                .unwrap();
        }
        state
            .place_completed_unit(&data, fixtures::COMMAND_CENTER, 0, Xy::new(400, 320))
            .unwrap();
        state
            .place_completed_unit(&data, fixtures::COMMAND_CENTER, 1, Xy::new(1600, 320))
            .unwrap();
    }
    sim
}

fn scripted_replay() -> ReplayData {
    let mut slots = [ReplaySlot::default(); MAX_PLAYERS];
    slots[0] = ReplaySlot { controller: 6, race: 1, force: 0 };
    slots[1] = ReplaySlot { controller: 6, race: 2, force: 1 };

    // both squads get ids assigned in placement order: blue marines are
    // even indices 0..12 interleaved with red
    let blue: Vec<_> = (0..6).map(|i| tss_sim::UnitId::new(i * 2, 0)).collect();
    let red: Vec<_> = (0..6).map(|i| tss_sim::UnitId::new(i * 2 + 1, 0)).collect();

    ReplayData {
        end_frame: 1500,
        seed: 0x5353_5254,
        game_type: 0,
        slots,
        actions: vec![
            (1, PlayerAction { player: 0, data: ActionData::Select(blue) }),
            (1, PlayerAction { player: 1, data: ActionData::Select(red) }),
            (
                2,
                PlayerAction {
                    player: 0,
                    data: ActionData::Order {
                        pos: Xy::new(1500, 640),
                        target: None,
                        target_type: None,
                        order: orders::ATTACK_MOVE,
                        queued: false,
                    },
                },
            ),
            (
                30,
                PlayerAction {
                    player: 1,
                    data: ActionData::Order {
                        pos: Xy::new(400, 640),
                        target: None,
                        target_type: None,
                        order: orders::ATTACK_MOVE,
                        queued: false,
                    },
                },
            ),
        ],
    }
}
