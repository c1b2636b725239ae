//! Passive per-unit timers and regeneration.
//!
//! Stasis, stim, ensnare, plague, lockdown, maelstrom, defensive matrix,
//! irradiate, blind and acid spores all decay here, together with zerg
//! hit-point regeneration, shield and energy recharge, the lifetime
//! expiry of temporary units and selection-sprite timers.

use crate::components::StatusFlags;
use crate::data::UnitTypeFlags;
use crate::errors::SimFault;
use crate::fixed::Fp8;
use crate::state::{EventQueue, SimState, StaticData};
use bevy_ecs::prelude::*;

/// Hit points regained per regeneration tick, raw Fp8.
const REGEN_HP: i32 = 4;
/// Shields regained per frame, raw Fp8.
const REGEN_SHIELD: i32 = 7;
/// Energy regained per frame, raw Fp8.
const REGEN_ENERGY: i32 = 8;

pub fn status_timers_system(
    mut state: ResMut<SimState>,
    data: Res<StaticData>,
    mut events: ResMut<EventQueue>,
    fault: Res<SimFault>,
) {
    if fault.is_set() {
        return;
    }
    let data = data.0.clone();

    let roster = state.units.live_indices();
    for index in roster {
        if state.units.get(index).is_none() {
            continue;
        }
        let utype = data.units[state.unit(index).unit_type.index()].clone();
        {
            let unit = state.unit_mut(index);
            unit.stim_timer = (unit.stim_timer - 1).max(0);
            unit.ensnare_timer = (unit.ensnare_timer - 1).max(0);
            unit.lockdown_timer = (unit.lockdown_timer - 1).max(0);
            unit.irradiate_timer = (unit.irradiate_timer - 1).max(0);
            unit.stasis_timer = (unit.stasis_timer - 1).max(0);
            unit.plague_timer = (unit.plague_timer - 1).max(0);
            unit.storm_timer = (unit.storm_timer - 1).max(0);
            unit.maelstrom_timer = (unit.maelstrom_timer - 1).max(0);
            if unit.irradiate_timer == 0 {
                unit.irradiated_by = None;
            }
            if unit.defensive_matrix_timer > 0 {
                unit.defensive_matrix_timer -= 1;
                if unit.defensive_matrix_timer == 0 {
                    unit.defensive_matrix_hp = Fp8::ZERO;
                }
            }
            // acid spores wear off one by one
            for slot in 0..unit.acid_spore_time.len() {
                if unit.acid_spore_time[slot] > 0 {
                    unit.acid_spore_time[slot] -= 1;
                    if unit.acid_spore_time[slot] == 0 && unit.acid_spore_count > 0 {
                        unit.acid_spore_count -= 1;
                    }
                }
            }

            // regeneration
            if unit.status_flags.contains(StatusFlags::COMPLETED) {
                if utype.flags.contains(UnitTypeFlags::REGENERATES_HP)
                    && unit.cycle_counter % 8 == 0
                    && unit.hp < utype.hit_points
                {
                    unit.hp = (unit.hp + Fp8::from_raw(REGEN_HP)).min(utype.hit_points);
                }
                if utype.has_shields {
                    let max = Fp8::integer(utype.shield_points);
                    if unit.shields < max {
                        unit.shields = (unit.shields + Fp8::from_raw(REGEN_SHIELD)).min(max);
                    }
                }
                if utype.flags.contains(UnitTypeFlags::HAS_ENERGY) {
                    let max = utype.max_energy();
                    if unit.energy < max {
                        unit.energy = (unit.energy + Fp8::from_raw(REGEN_ENERGY)).min(max);
                    }
                }
            }
        }

        // lifetime expiry (scanner dots, hallucinations on a clock)
        let expired = {
            let unit = state.unit_mut(index);
            if unit.remove_timer > 0 {
                unit.remove_timer -= 1;
                unit.remove_timer == 0
            } else {
                false
            }
        };
        if expired {
            state.unit_mut(index).status_flags |= StatusFlags::LIFETIME_EXPIRED;
            state.kill_unit(&data, &mut events, index);
        }
    }

    // selection sprite timers
    for (_, sprite) in state.sprites.iter_mut() {
        if sprite.selection_timer > 0 {
            sprite.selection_timer -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::fixed::Xy;
    use bevy_ecs::prelude::World;

    fn run_status(world: &mut World, ticks: usize) {
        let mut schedule = bevy_ecs::schedule::Schedule::default();
        schedule.add_systems(status_timers_system);
        for _ in 0..ticks {
            schedule.run(world);
        }
    }

    fn status_world() -> (World, std::sync::Arc<crate::data::GameData>) {
        let data = std::sync::Arc::new(fixtures::game_data());
        let mut world = World::new();
        world.insert_resource(fixtures::blank_state(32, 32, 8));
        world.insert_resource(StaticData(data.clone()));
        world.insert_resource(EventQueue::default());
        world.insert_resource(SimFault::default());
        (world, data)
    }

    #[test]
    fn test_shields_recharge_to_type_max() {
        let (mut world, data) = status_world();
        let index = {
            let mut state = world.resource_mut::<SimState>();
            let id = state
                .place_completed_unit(&data, fixtures::ZEALOT, 0, Xy::new(100, 100))
                .unwrap();
            let index = id.index();
            state.unit_mut(index).shields = Fp8::integer(10);
            index
        };
        run_status(&mut world, 40);
        let state = world.resource::<SimState>();
        let shields = state.unit(index).shields;
        assert_eq!(shields, Fp8::integer(10) + Fp8::from_raw(REGEN_SHIELD * 40));
        // and it saturates eventually
        drop(state);
        run_status(&mut world, 200_000 / 40);
        let state = world.resource::<SimState>();
        assert_eq!(state.unit(index).shields, Fp8::integer(60));
    }

    #[test]
    fn test_zerg_regeneration_uses_cycle_counter() {
        let (mut world, data) = status_world();
        let index = {
            let mut state = world.resource_mut::<SimState>();
            let id = state
                .place_completed_unit(&data, fixtures::DRONE, 0, Xy::new(100, 100))
                .unwrap();
            let index = id.index();
            state.unit_mut(index).hp = Fp8::integer(10);
            index
        };
        run_status(&mut world, 64);
        let state = world.resource::<SimState>();
        // the cycle counter is not advanced outside the unit pass, so
        // every one of the 64 frames lands on the regeneration tick
        assert_eq!(state.unit(index).hp, Fp8::integer(10) + Fp8::from_raw(REGEN_HP * 64));
    }

    #[test]
    fn test_stim_timer_decays() {
        let (mut world, data) = status_world();
        let index = {
            let mut state = world.resource_mut::<SimState>();
            let id = state
                .place_completed_unit(&data, fixtures::MARINE, 0, Xy::new(100, 100))
                .unwrap();
            let index = id.index();
            state.unit_mut(index).stim_timer = 10;
            index
        };
        run_status(&mut world, 10);
        assert_eq!(world.resource::<SimState>().unit(index).stim_timer, 0);
    }

    #[test]
    fn test_remove_timer_expires_unit() {
        let (mut world, data) = status_world();
        let id = {
            let mut state = world.resource_mut::<SimState>();
            let id = state
                .place_completed_unit(&data, fixtures::MARINE, 0, Xy::new(100, 100))
                .unwrap();
            state.unit_mut(id.index()).remove_timer = 3;
            id
        };
        run_status(&mut world, 3);
        let state = world.resource::<SimState>();
        let unit = state.unit(id.index());
        assert!(unit.status_flags.contains(StatusFlags::LIFETIME_EXPIRED));
        assert_eq!(unit.order_type, crate::data::orders::DIE);
    }
}
