//! Phase 5: apply the damage staged during the unit and bullet passes.
//!
//! Application order is queue order, which follows the deterministic
//! iteration of the earlier phases. Entries whose target or source died
//! earlier this tick have already been filtered by `kill_unit`.

use crate::state::{EventQueue, SimState, StaticData};
use bevy_ecs::prelude::*;

pub fn damage_apply_system(
    mut state: ResMut<SimState>,
    data: Res<StaticData>,
    mut events: ResMut<EventQueue>,
    fault: Res<crate::errors::SimFault>,
) {
    if fault.is_set() {
        return;
    }
    let data = data.0.clone();
    // applying a hit can kill, and a kill prunes the tail of the queue,
    // so drain one entry at a time
    loop {
        if state.damage_queue.is_empty() {
            break;
        }
        let next = state.damage_queue.remove(0);
        state.apply_damage(&data, &mut events, &next);
    }
}

#[cfg(test)]
mod tests {
    use crate::fixtures;
    use crate::state::{EventQueue, QueuedDamage};
    use crate::fixed::Xy;

    #[test]
    fn test_simultaneous_lethal_volleys_spare_the_first_shooter() {
        let data = fixtures::game_data();
        let mut state = fixtures::blank_state(64, 64, 2);
        let mut events = EventQueue::default();
        let a = state
            .place_completed_unit(&data, fixtures::MARINE, 0, Xy::new(100, 100))
            .unwrap();
        let b = state
            .place_completed_unit(&data, fixtures::MARINE, 1, Xy::new(200, 100))
            .unwrap();
        // both volleys are lethal and staged the same tick, a's first
        state.queue_damage(QueuedDamage { target: b, amount: 999, weapon: fixtures::RIFLE, source: Some(a), owner: 0 });
        state.queue_damage(QueuedDamage { target: a, amount: 999, weapon: fixtures::RIFLE, source: Some(b), owner: 1 });
        while !state.damage_queue.is_empty() {
            let next = state.damage_queue.remove(0);
            state.apply_damage(&data, &mut events, &next);
        }
        // b died; b's simultaneous volley died with it
        assert!(state.get_unit(b).is_none() || state.unit(b.index()).order_type == crate::data::orders::DIE);
        assert!(state.get_unit(a).is_some());
        assert_eq!(state.unit(a.index()).hp, data.units[fixtures::MARINE.index()].hit_points);
    }
}
