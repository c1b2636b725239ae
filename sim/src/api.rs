//! Public API for the simulation kernel.
//!
//! `SimWorld` wraps the ECS world and the phase schedule behind the
//! surface an embedder needs: construct from a map or a blank arena,
//! feed actions, step one tick at a time, drain observer events, and
//! snapshot or restore the whole state.
//!
//! ## Determinism
//!
//! One `step()` call is one logical tick (~42 ms of game time) and an
//! indivisible transaction on world state. The schedule is chained and
//! runs on the single-threaded executor: the PRNG stream and the spatial
//! index mutation order are observable, so there is no intra-step
//! parallelism to reorder them. For a fixed seed, map and action stream,
//! two worlds produce bit-identical trajectories.

use crate::actions::{action_dispatch_system, ActionQueue, PlayerAction};
use crate::data::GameData;
use crate::errors::{SimFault, SimResult};
use crate::map::MapData;
use crate::replay::ReplayData;
use crate::state::{EventQueue, GameType, SimEvent, SimState, StaticData};
use crate::systems::*;
use crate::world::Snapshot;
use bevy_ecs::prelude::*;
use bevy_ecs::schedule::ExecutorKind;
use std::sync::Arc;

/// The main simulation world container.
pub struct SimWorld {
    world: World,
    schedule: Schedule,
}

impl SimWorld {
    /// A blank world on open ground.
    pub fn new(data: Arc<GameData>, width: usize, height: usize, seed: u32, game_type: GameType) -> Self {
        let mut world = World::new();
        world.insert_resource(SimState::new(width, height, seed, game_type));
        world.insert_resource(StaticData(data));
        world.insert_resource(ActionQueue::default());
        world.insert_resource(EventQueue::default());
        world.insert_resource(SimFault::default());

        // one chain, fixed order; see systems/mod.rs for the phase table
        let mut schedule = Schedule::default();
        schedule.set_executor_kind(ExecutorKind::SingleThreaded);
        schedule.add_systems(
            (
                frame_begin_system,
                action_dispatch_system,
                unit_update_system,
                bullet_update_system,
                damage_apply_system,
                vision_system,
                creep_system,
                economy_system,
                status_timers_system,
                victory_system,
            )
                .chain(),
        );

        SimWorld { world, schedule }
    }

    /// Build a world from a parsed map.
    pub fn from_map(
        data: Arc<GameData>,
        map: &MapData,
        seed: u32,
        game_type: GameType,
    ) -> SimResult<Self> {
        let mut sim = Self::new(data.clone(), map.width, map.height, seed, game_type);
        let mut events = EventQueue::default();
        sim.world
            .resource_mut::<SimState>()
            .load_map(&data, map, &mut events)?;
        Ok(sim)
    }

    /// Advance one tick with this tick's actions. Returns the observer
    /// events the tick produced.
    pub fn step(&mut self, actions: Vec<PlayerAction>) -> SimResult<Vec<SimEvent>> {
        self.world.resource_mut::<ActionQueue>().0 = actions;
        self.schedule.run(&mut self.world);
        if let Some(err) = self.world.resource_mut::<SimFault>().take() {
            return Err(err);
        }
        Ok(self.world.resource_mut::<EventQueue>().drain())
    }

    /// Run an entire replay from the current frame to its end.
    ///
    /// Actions recorded for frame `f` dispatch during the tick that
    /// advances the world to frame `f`; frame-0 records ride the first
    /// tick.
    pub fn run_replay(&mut self, replay: &ReplayData) -> SimResult<Vec<SimEvent>> {
        let mut all_events = Vec::new();
        while self.current_frame() < replay.end_frame {
            let next = self.current_frame() + 1;
            let mut frame_actions = if next == 1 { replay.actions_for_frame(0) } else { Vec::new() };
            frame_actions.extend(replay.actions_for_frame(next));
            all_events.extend(self.step(frame_actions)?);
        }
        Ok(all_events)
    }

    pub fn current_frame(&self) -> u32 {
        self.world.resource::<SimState>().frame
    }

    pub fn state(&self) -> &SimState {
        self.world.resource::<SimState>()
    }

    pub fn state_mut(&mut self) -> Mut<'_, SimState> {
        self.world.resource_mut::<SimState>()
    }

    pub fn data(&self) -> Arc<GameData> {
        self.world.resource::<StaticData>().0.clone()
    }

    /// Capture the full world.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::capture(self.world.resource::<SimState>())
    }

    /// Replace the world with a snapshot.
    pub fn restore(&mut self, snapshot: &Snapshot) -> SimResult<()> {
        snapshot.validate(&self.data())?;
        *self.world.resource_mut::<SimState>() = snapshot.state.clone();
        Ok(())
    }

    pub fn snapshot_json(&self) -> String {
        self.snapshot().to_json().unwrap_or_else(|_| "{}".to_string())
    }

    /// Structural invariants; tests call this after stepping.
    pub fn check_invariants(&self) -> SimResult<()> {
        self.world
            .resource::<SimState>()
            .check_invariants(&self.data())
    }
}

impl std::fmt::Debug for SimWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimWorld")
            .field("frame", &self.current_frame())
            .finish()
    }
}

/// Convenience constructor used by tests, benches and the demo.
pub fn fixture_world(width: usize, height: usize, seed: u32) -> SimWorld {
    let data = Arc::new(crate::fixtures::game_data());
    let mut sim = SimWorld::new(data, width, height, seed, GameType::Melee);
    {
        let mut state = sim.state_mut();
        let fresh = crate::fixtures::blank_state(width, height, seed);
        *state = fresh;
    }
    sim
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionData;
    use crate::data::orders;
    use crate::errors::SimError;
    use crate::fixed::Xy;
    use crate::fixtures;

    #[test]
    fn test_new_world_starts_at_frame_zero() {
        let sim = fixture_world(64, 64, 1);
        assert_eq!(sim.current_frame(), 0);
    }

    #[test]
    fn test_step_advances_frame() {
        let mut sim = fixture_world(64, 64, 1);
        sim.step(Vec::new()).unwrap();
        assert_eq!(sim.current_frame(), 1);
        sim.step(Vec::new()).unwrap();
        assert_eq!(sim.current_frame(), 2);
    }

    #[test]
    fn test_fault_surfaces_from_step() {
        let mut sim = fixture_world(64, 64, 1);
        let data = sim.data();
        {
            let mut state = sim.state_mut();
            let id = state
                .place_completed_unit(&data, fixtures::MARINE, 0, Xy::new(100, 100))
                .unwrap();
            // an order with no handler is an unsupported data value
            state.unit_mut(id.index()).order_type = crate::data::OrderTypeId(120);
        }
        let err = sim.step(Vec::new());
        assert!(matches!(err, Err(SimError::Unsupported(_))));
    }

    #[test]
    fn test_events_are_drained_per_step() {
        let mut sim = fixture_world(64, 64, 1);
        let events = sim
            .step(vec![PlayerAction { player: 0, data: ActionData::Stop { queued: false } }])
            .unwrap();
        assert!(events
            .iter()
            .any(|e| matches!(e, SimEvent::Action { player: 0, action_id: 26 })));
        // APM bookkeeping saw it too
        assert_eq!(sim.state().players[0].action_count, 1);
        let events = sim.step(Vec::new()).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_snapshot_restore_resumes_identically() {
        let mut sim = fixture_world(64, 64, 77);
        let data = sim.data();
        {
            let mut state = sim.state_mut();
            let id = state
                .place_completed_unit(&data, fixtures::MARINE, 0, Xy::new(100, 100))
                .unwrap();
            let index = id.index();
            state.set_unit_order(
                index,
                orders::MOVE,
                crate::components::OrderTarget { pos: Xy::new(500, 400), ..Default::default() },
            );
        }
        for _ in 0..20 {
            sim.step(Vec::new()).unwrap();
        }
        let snapshot = sim.snapshot();

        // continue the original
        for _ in 0..50 {
            sim.step(Vec::new()).unwrap();
        }
        let original = sim.snapshot_json();

        // restore a second world and replay the same ticks
        let mut other = fixture_world(64, 64, 77);
        other.restore(&snapshot).unwrap();
        for _ in 0..50 {
            other.step(Vec::new()).unwrap();
        }
        assert_eq!(other.snapshot_json(), original);
    }

    #[test]
    fn test_invariants_hold_through_a_busy_run() {
        let mut sim = fixture_world(64, 64, 21);
        let data = sim.data();
        {
            let mut state = sim.state_mut();
            for i in 0..8 {
                state
                    .place_completed_unit(&data, fixtures::MARINE, 0, Xy::new(100 + i * 40, 200))
                    .unwrap();
                state
                    .place_completed_unit(&data, fixtures::MARINE, 1, Xy::new(100 + i * 40, 600))
                    .unwrap();
            }
        }
        for tick in 0..120 {
            sim.step(Vec::new()).unwrap();
            if tick % 10 == 0 {
                sim.check_invariants().unwrap();
            }
        }
        sim.check_invariants().unwrap();
    }
}
