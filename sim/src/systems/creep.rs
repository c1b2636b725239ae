//! Creep growth and recession.
//!
//! Creep radiates from completed zerg buildings at a bounded rate: each
//! provider seeds the tile under itself, then every spread interval one
//! border tile converts - always the candidate with the most creep
//! neighbors, which grows the blob inward-out the way the original does.
//! When a tile loses all providers in range it recedes on the slower
//! recede cadence.

use crate::data::{GameData, Race, UnitTypeFlags};
use crate::fixed::{xy_length, Xy};
use crate::state::{SimState, StaticData};
use crate::terrain::{TerrainGrid, TileFlags};
use bevy_ecs::prelude::*;

/// Frames between one provider's growth attempts.
const SPREAD_INTERVAL: i32 = 15;
/// Frames between recession steps.
const RECEDE_INTERVAL: i32 = 5;
/// Creep reach around a provider, in tiles.
const CREEP_RANGE: i32 = 5;

pub fn creep_system(
    mut state: ResMut<SimState>,
    data: Res<StaticData>,
    fault: Res<crate::errors::SimFault>,
) {
    if fault.is_set() {
        return;
    }
    let data = data.0.clone();
    state.advance_creep(&data);
}

impl SimState {
    fn creep_providers(&self, data: &GameData) -> Vec<Xy> {
        self.units
            .iter()
            .filter(|(_, u)| {
                let utype = &data.units[u.unit_type.index()];
                u.is_completed() && utype.race == Race::Zerg && utype.flags.contains(UnitTypeFlags::BUILDING)
            })
            .map(|(_, u)| TerrainGrid::pixel_to_tile(u.position()))
            .collect()
    }

    fn in_provider_range(providers: &[Xy], tile: Xy) -> bool {
        providers.iter().any(|p| xy_length(tile - *p) <= CREEP_RANGE)
    }

    fn has_creep(&self, tile: Xy) -> bool {
        self.terrain
            .tile(tile)
            .is_some_and(|t| t.flags.contains(TileFlags::HAS_CREEP))
    }

    fn creep_neighbor_count(&self, tile: Xy) -> u8 {
        let mut n = 0;
        for dy in -1..=1 {
            for dx in -1..=1 {
                if (dx, dy) != (0, 0) && self.has_creep(tile + Xy::new(dx, dy)) {
                    n += 1;
                }
            }
        }
        n
    }

    /// A tile can accept creep: in bounds, walkable, bare ground.
    fn creep_eligible(&self, tile: Xy) -> bool {
        self.terrain.tile(tile).is_some_and(|t| {
            t.flags.contains(TileFlags::WALKABLE) && !t.flags.contains(TileFlags::HAS_CREEP)
        })
    }

    /// Lay creep on a tile and refresh the border bookkeeping around it.
    pub fn set_creep(&mut self, providers: &[Xy], tile: Xy) {
        let Some(t) = self.terrain.tile_mut(tile) else {
            return;
        };
        t.flags.insert(TileFlags::HAS_CREEP);
        t.flags.remove(TileFlags::CREEP_RECEDING);
        self.creep.remove(tile);
        for dy in -1..=1 {
            for dx in -1..=1 {
                if (dx, dy) == (0, 0) {
                    continue;
                }
                let n = tile + Xy::new(dx, dy);
                if self.creep_eligible(n) && Self::in_provider_range(providers, n) {
                    let count = self.creep_neighbor_count(n);
                    if self.creep.find(n).is_some() {
                        self.creep.retarget(n, count);
                    } else {
                        self.creep.insert(n, count);
                    }
                }
            }
        }
    }

    fn clear_creep(&mut self, tile: Xy) {
        if let Some(t) = self.terrain.tile_mut(tile) {
            t.flags.remove(TileFlags::HAS_CREEP | TileFlags::CREEP_RECEDING);
        }
        // neighbors that were border candidates lost a neighbor
        for dy in -1..=1 {
            for dx in -1..=1 {
                if (dx, dy) == (0, 0) {
                    continue;
                }
                let n = tile + Xy::new(dx, dy);
                if self.creep.find(n).is_some() {
                    let count = self.creep_neighbor_count(n);
                    self.creep.retarget(n, count);
                }
            }
        }
    }

    /// One tick of creep life.
    pub fn advance_creep(&mut self, data: &GameData) {
        let providers = self.creep_providers(data);

        // seeds: a provider standing on bare ground creeps its own tile
        for provider in &providers {
            if self.creep_eligible(*provider) {
                self.set_creep(&providers, *provider);
            }
        }

        // growth on the spread cadence
        self.creep.recede_timer -= 1;
        if self.frame % SPREAD_INTERVAL as u32 == 0 && !providers.is_empty() {
            if let Some(entry) = self.creep.best_candidate() {
                let tile = self.creep.entries[entry as usize].tile;
                if self.creep_eligible(tile) && Self::in_provider_range(&providers, tile) {
                    self.set_creep(&providers, tile);
                } else {
                    self.creep.remove(tile);
                }
            }
        }

        // recession on the slower cadence: first orphaned tile, row-major
        if self.frame % RECEDE_INTERVAL as u32 == 0 {
            let mut orphan = None;
            'scan: for ty in 0..self.terrain.height as i32 {
                for tx in 0..self.terrain.width as i32 {
                    let tile = Xy::new(tx, ty);
                    if self.has_creep(tile) && !Self::in_provider_range(&providers, tile) {
                        orphan = Some(tile);
                        break 'scan;
                    }
                }
            }
            if let Some(tile) = orphan {
                if let Some(t) = self.terrain.tile_mut(tile) {
                    t.flags.insert(TileFlags::CREEP_RECEDING);
                }
                self.clear_creep(tile);
            }
        }
    }

    pub fn creep_tile_count(&self) -> usize {
        self.terrain
            .tiles
            .iter()
            .filter(|t| t.flags.contains(TileFlags::HAS_CREEP))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[test]
    fn test_creep_seeds_and_grows_outward() {
        let data = fixtures::game_data();
        let mut state = fixtures::blank_state(32, 32, 4);
        state.players[0].race = Race::Zerg;
        state
            .place_completed_unit(&data, fixtures::HATCHERY, 0, Xy::new(320, 320))
            .unwrap();
        // ~30 seconds of simulated time
        let mut counts = Vec::new();
        for _ in 0..720 {
            state.frame += 1;
            state.advance_creep(&data);
            counts.push(state.creep_tile_count());
        }
        assert!(counts[0] >= 1, "seed tile expected");
        let final_count = *counts.last().unwrap();
        assert!(final_count > 20, "creep should have spread, got {final_count}");
        // growth is monotone while the provider lives
        assert!(counts.windows(2).all(|w| w[1] >= w[0]));
    }

    #[test]
    fn test_creep_is_a_deterministic_function_of_tick_count() {
        let data = fixtures::game_data();
        let run = |seed| {
            let mut state = fixtures::blank_state(32, 32, seed);
            state.players[0].race = Race::Zerg;
            state
                .place_completed_unit(&data, fixtures::HATCHERY, 0, Xy::new(320, 320))
                .unwrap();
            for _ in 0..400 {
                state.frame += 1;
                state.advance_creep(&data);
            }
            let tiles: Vec<bool> = state
                .terrain
                .tiles
                .iter()
                .map(|t| t.flags.contains(TileFlags::HAS_CREEP))
                .collect();
            tiles
        };
        assert_eq!(run(1), run(99));
    }

    #[test]
    fn test_creep_recedes_when_provider_dies() {
        let data = fixtures::game_data();
        let mut state = fixtures::blank_state(32, 32, 4);
        let mut events = crate::state::EventQueue::default();
        state.players[0].race = Race::Zerg;
        let hatch = state
            .place_completed_unit(&data, fixtures::HATCHERY, 0, Xy::new(320, 320))
            .unwrap();
        for _ in 0..300 {
            state.frame += 1;
            state.advance_creep(&data);
        }
        let grown = state.creep_tile_count();
        assert!(grown > 5);
        let hatch_index = state.get_unit(hatch).unwrap();
        state.kill_unit(&data, &mut events, hatch_index);
        state.destroy_unit(&data, &mut events, hatch_index);
        for _ in 0..grown as u32 * RECEDE_INTERVAL as u32 + 50 {
            state.frame += 1;
            state.advance_creep(&data);
        }
        assert_eq!(state.creep_tile_count(), 0);
    }
}
