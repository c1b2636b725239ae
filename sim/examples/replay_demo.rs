//! Scripted skirmish on the fixture dataset.
//!
//! Run with: cargo run --example replay_demo

use tss_sim::actions::{ActionData, PlayerAction};
use tss_sim::api::fixture_world;
use tss_sim::data::orders;
use tss_sim::fixed::Xy;
use tss_sim::fixtures;
use tss_sim::SimEvent;

fn main() {
    env_logger::init();
    println!("=== The Severed Sun - kernel demo ===\n");

    let mut sim = fixture_world(64, 64, 42);
    let data = sim.data();

    // two squads of marines facing off
    let mut blue = Vec::new();
    let mut red = Vec::new();
    {
        let mut state = sim.state_mut();
        for i in 0..4 {
            blue.push(
                state
                    .place_completed_unit(&data, fixtures::MARINE, 0, Xy::new(300, 300 + i * 48))
                    .unwrap(),
            );
            red.push(
                state
                    .place_completed_unit(&data, fixtures::MARINE, 1, Xy::new(1400, 300 + i * 48))
                    .unwrap(),
            );
        }
    }

    // blue attack-moves into red
    let open = vec![
        PlayerAction { player: 0, data: ActionData::Select(blue.clone()) },
        PlayerAction {
            player: 0,
            data: ActionData::Order {
                pos: Xy::new(1400, 370),
                target: None,
                target_type: None,
                order: orders::ATTACK_MOVE,
                queued: false,
            },
        },
    ];

    let mut kills = 0;
    let mut shots = 0;
    for tick in 0..1600u32 {
        let actions = if tick == 0 { open.clone() } else { Vec::new() };
        let events = sim.step(actions).expect("step failed");
        for event in events {
            match event {
                SimEvent::UnitKilled(id) => {
                    kills += 1;
                    println!("tick {:4}: unit {} down", sim.current_frame(), id.index());
                }
                SimEvent::PlaySound { .. } => shots += 1,
                _ => {}
            }
        }
        if sim.current_frame() % 200 == 0 {
            let state = sim.state();
            println!(
                "tick {:4}: {} blue, {} red alive",
                sim.current_frame(),
                state.player_units[0].len(),
                state.player_units[1].len()
            );
        }
    }

    println!("\n{kills} units died, {shots} sounds played");
    println!("final snapshot:\n{}", serde_json::to_string_pretty(&sim.snapshot().units).unwrap());
}
