//! Defeat evaluation.
//!
//! A player is defeated when the configured game type's predicate holds:
//! melee drops a player with no buildings, use-map-settings drops one
//! with no units at all. Defeat is a latched state; the embedder reads
//! it off the player records.

use crate::components::Controller;
use crate::state::{SimState, StaticData};
use bevy_ecs::prelude::*;

/// `victory_state` values.
pub const VICTORY_UNDECIDED: i32 = 0;
pub const VICTORY_DEFEATED: i32 = 2;
pub const VICTORY_WON: i32 = 3;

pub fn victory_system(
    mut state: ResMut<SimState>,
    data: Res<StaticData>,
    fault: Res<crate::errors::SimFault>,
) {
    if fault.is_set() {
        return;
    }
    let data = data.0.clone();

    for player in 0..state.players.len() as u8 {
        let p = &state.players[player as usize];
        if !p.initially_active || p.victory_state != VICTORY_UNDECIDED {
            continue;
        }
        if !p.is_active() {
            // left the game
            state.players[player as usize].victory_state = VICTORY_DEFEATED;
            continue;
        }
        if state.is_defeated(&data, player) {
            log::info!("player {player} defeated at frame {}", state.frame);
            state.players[player as usize].victory_state = VICTORY_DEFEATED;
        }
    }

    // last player standing wins
    let standing: Vec<usize> = state
        .players
        .iter()
        .enumerate()
        .filter(|(_, p)| p.initially_active && p.victory_state == VICTORY_UNDECIDED)
        .map(|(i, _)| i)
        .collect();
    if standing.len() == 1 {
        let had_rivals = state
            .players
            .iter()
            .filter(|p| p.initially_active)
            .count()
            > 1;
        if had_rivals {
            state.players[standing[0]].victory_state = VICTORY_WON;
        }
    }
}

/// Mark a player as having left; their defeat latches next tick.
pub fn player_leaves(state: &mut SimState, player: u8) {
    state.players[player as usize].controller = Controller::UserLeft;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::fixed::Xy;
    use crate::state::EventQueue;
    use bevy_ecs::prelude::World;

    fn run_victory(world: &mut World) {
        let mut schedule = bevy_ecs::schedule::Schedule::default();
        schedule.add_systems(victory_system);
        schedule.run(world);
    }

    #[test]
    fn test_melee_defeat_when_last_building_falls() {
        let data = std::sync::Arc::new(fixtures::game_data());
        let mut world = World::new();
        let mut state = fixtures::blank_state(64, 64, 11);
        let cc = state
            .place_completed_unit(&data, fixtures::COMMAND_CENTER, 0, Xy::new(320, 320))
            .unwrap();
        state
            .place_completed_unit(&data, fixtures::COMMAND_CENTER, 1, Xy::new(640, 320))
            .unwrap();
        world.insert_resource(state);
        world.insert_resource(StaticData(data.clone()));
        world.insert_resource(crate::errors::SimFault::default());
        run_victory(&mut world);
        assert_eq!(world.resource::<SimState>().players[0].victory_state, VICTORY_UNDECIDED);

        {
            let mut state = world.resource_mut::<SimState>();
            let mut events = EventQueue::default();
            let index = state.get_unit(cc).unwrap();
            state.kill_unit(&data, &mut events, index);
            state.destroy_unit(&data, &mut events, index);
        }
        run_victory(&mut world);
        let state = world.resource::<SimState>();
        assert_eq!(state.players[0].victory_state, VICTORY_DEFEATED);
        assert_eq!(state.players[1].victory_state, VICTORY_WON);
    }
}
