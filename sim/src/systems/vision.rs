//! Fog-of-war reveal.
//!
//! Visibility is recomputed on the update-tiles cadence: clear every
//! tile's `visible` mask, then walk each unit's precomputed sight disc.
//! The disc nodes are ordered center-out with predecessor links, so the
//! reveal is one forward sweep: a node is seen when one of its
//! predecessors is seen from ground the revealer can see over. Higher
//! ground blocks lower revealers; airborne units see over everything.

use crate::components::StatusFlags;
use crate::data::{GameData, UnitTypeFlags, NO_MASK_PREV};
use crate::fixed::Xy;
use crate::state::{SimState, StaticData};
use crate::terrain::TerrainGrid;
use bevy_ecs::prelude::*;

pub fn vision_system(
    mut state: ResMut<SimState>,
    data: Res<StaticData>,
    fault: Res<crate::errors::SimFault>,
) {
    if fault.is_set() {
        return;
    }
    if !state.update_tiles_this_frame() {
        return;
    }
    let data = data.0.clone();
    state.refresh_vision(&data);
}

impl SimState {
    /// Full recompute of the `visible` layer plus detection flags.
    pub fn refresh_vision(&mut self, data: &GameData) {
        for tile in &mut self.terrain.tiles {
            tile.visible = 0;
        }

        let revealers: Vec<(u8, Xy, i32, bool)> = self
            .units
            .iter()
            .filter(|(_, u)| u.owner < 8 && !u.status_flags.contains(StatusFlags::LOADED))
            .map(|(_, u)| {
                let sight = data.units[u.unit_type.index()].sight_range;
                (u.owner, u.position(), sight, u.is_in_air())
            })
            .collect();
        for (owner, pos, sight, airborne) in revealers {
            self.reveal_sight(data, owner, pos, sight, airborne);
        }

        self.refresh_detection(data);
    }

    /// Reveal one sight disc for a player (and its shared-vision allies).
    pub fn reveal_sight(&mut self, data: &GameData, owner: u8, pos: Xy, range: i32, airborne: bool) {
        let mask = self.players[owner as usize].shared_vision | (1u8 << owner.min(7));
        let center = TerrainGrid::pixel_to_tile(pos);
        // ground elevation the revealer can see over
        let see_level = if airborne { i32::MAX } else { self.terrain.elevation_at(pos) };

        let sight = data.sight(range);
        let mut seen = vec![false; sight.maskdat.len()];
        let mut over = vec![false; sight.maskdat.len()];
        for (i, node) in sight.maskdat.iter().enumerate() {
            let tile = center + Xy::new(node.x, node.y);
            let visible = if node.prev == NO_MASK_PREV {
                true
            } else {
                let pred_ok = |p: u32| p != NO_MASK_PREV && seen[p as usize] && over[p as usize];
                pred_ok(node.prev) || pred_ok(node.prev2)
            };
            seen[i] = visible;
            // can vision continue past this tile?
            let elevation = self
                .terrain
                .tile(tile)
                .map_or(0, |_| self.terrain.elevation_at(TerrainGrid::tile_center(tile)));
            over[i] = visible && elevation <= see_level;
            if visible {
                if let Some(t) = self.terrain.tile_mut(tile) {
                    t.visible |= mask;
                    t.explored |= mask;
                }
            }
        }
    }

    /// Instant reveal ignoring elevation (scanner sweeps).
    pub fn reveal_area(&mut self, data: &GameData, owner: u8, pos: Xy, range: i32) {
        self.reveal_sight(data, owner, pos, range, true);
    }

    /// Refresh `detected_flags` on every cloaked or burrowed unit: the bit
    /// for each player with a completed detector in sight range.
    fn refresh_detection(&mut self, data: &GameData) {
        let detectors: Vec<(u8, Xy, i32)> = self
            .units
            .iter()
            .filter(|(_, u)| {
                u.is_completed()
                    && data.units[u.unit_type.index()].flags.contains(UnitTypeFlags::DETECTOR)
            })
            .map(|(_, u)| {
                (u.owner, u.position(), data.units[u.unit_type.index()].sight_range)
            })
            .collect();
        let cloaked: Vec<u16> = self
            .units
            .iter()
            .filter(|(_, u)| {
                u.status_flags.intersects(StatusFlags::CLOAKED | StatusFlags::BURROWED)
            })
            .map(|(i, _)| i)
            .collect();
        for index in cloaked {
            let pos = self.unit(index).position();
            let mut flags = 1u32 << self.unit(index).owner;
            for (owner, dpos, sight) in &detectors {
                let reach = sight * crate::terrain::TILE_SIZE;
                if crate::fixed::xy_length(pos - *dpos) <= reach {
                    flags |= self.players[*owner as usize].shared_vision as u32;
                }
            }
            self.unit_mut(index).detected_flags = flags;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::terrain::TILE_SIZE;

    #[test]
    fn test_sight_seven_reveals_documented_mask() {
        let data = fixtures::game_data();
        let mut state = fixtures::blank_state(32, 32, 1);
        // observer-owner bit after a refresh at tile center (10, 10)
        let pos = TerrainGrid::tile_center(Xy::new(10, 10));
        state
            .place_completed_unit(&data, fixtures::OBSERVER, 0, pos)
            .unwrap();
        state.refresh_vision(&data);
        let sight = data.sight(7);
        for node in &sight.maskdat {
            let tile = Xy::new(10 + node.x, 10 + node.y);
            let t = state.terrain.tile(tile).unwrap();
            assert_ne!(t.visible & 1, 0, "tile {tile:?} should be revealed");
            assert_ne!(t.explored & 1, 0);
        }
        // a tile outside the disc stays dark
        let outside = state.terrain.tile(Xy::new(10, 2)).unwrap();
        assert_eq!(outside.visible & 1, 0);
    }

    #[test]
    fn test_explored_persists_after_visible_clears() {
        let data = fixtures::game_data();
        let mut state = fixtures::blank_state(32, 32, 1);
        let pos = TerrainGrid::tile_center(Xy::new(5, 5));
        let id = state
            .place_completed_unit(&data, fixtures::MARINE, 0, pos)
            .unwrap();
        state.refresh_vision(&data);
        assert_ne!(state.terrain.tile(Xy::new(5, 5)).unwrap().visible & 1, 0);
        // unit leaves; next refresh clears visible but not explored
        let index = state.get_unit(id).unwrap();
        state.set_unit_position(&data, index, Xy::new(28 * TILE_SIZE, 28 * TILE_SIZE));
        state.refresh_vision(&data);
        let t = state.terrain.tile(Xy::new(5, 5)).unwrap();
        assert_eq!(t.visible & 1, 0);
        assert_ne!(t.explored & 1, 0);
    }

    #[test]
    fn test_detector_flags_cloaked_enemy() {
        let data = fixtures::game_data();
        let mut state = fixtures::blank_state(32, 32, 1);
        let spy = state
            .place_completed_unit(&data, fixtures::OBSERVER, 1, Xy::new(300, 300))
            .unwrap();
        state.refresh_vision(&data);
        // no enemy detector: only the owner sees it
        assert_eq!(state.unit(spy.index()).detected_flags, 1 << 1);
        // an enemy observer doubles as a detector
        state
            .place_completed_unit(&data, fixtures::OBSERVER, 0, Xy::new(320, 300))
            .unwrap();
        state.refresh_vision(&data);
        assert_ne!(state.unit(spy.index()).detected_flags & 1, 0);
    }
}
