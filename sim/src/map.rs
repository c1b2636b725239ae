//! Chunked map loader.
//!
//! A map file is an interleaved sequence of 4-byte tags, a little-endian
//! 32-bit payload length, and the payload. Unknown chunks are skipped;
//! a missing required chunk is `InvalidInput`. The loader only extracts
//! what the kernel simulates: dimensions, tileset, the tile matrix,
//! player slots and the initial unit roster.

use crate::data::GameData;
use crate::errors::{SimError, SimResult};
use crate::fixed::Xy;
use crate::state::{EventQueue, SimState, MAX_PLAYERS};
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

pub const CHUNK_VER: [u8; 4] = *b"VER ";
pub const CHUNK_DIM: [u8; 4] = *b"DIM ";
pub const CHUNK_ERA: [u8; 4] = *b"ERA ";
pub const CHUNK_OWNR: [u8; 4] = *b"OWNR";
pub const CHUNK_SIDE: [u8; 4] = *b"SIDE";
pub const CHUNK_STR: [u8; 4] = *b"STR ";
pub const CHUNK_SPRP: [u8; 4] = *b"SPRP";
pub const CHUNK_FORC: [u8; 4] = *b"FORC";
pub const CHUNK_VCOD: [u8; 4] = *b"VCOD";
pub const CHUNK_MTXM: [u8; 4] = *b"MTXM";
pub const CHUNK_UNIT: [u8; 4] = *b"UNIT";
pub const CHUNK_THG2: [u8; 4] = *b"THG2";

const REQUIRED: [[u8; 4]; 12] = [
    CHUNK_VER, CHUNK_DIM, CHUNK_ERA, CHUNK_OWNR, CHUNK_SIDE, CHUNK_STR, CHUNK_SPRP, CHUNK_FORC,
    CHUNK_VCOD, CHUNK_MTXM, CHUNK_UNIT, CHUNK_THG2,
];

/// Owner-slot controller codes in the OWNR chunk.
pub const OWNR_INACTIVE: u8 = 0;
pub const OWNR_COMPUTER: u8 = 5;
pub const OWNR_HUMAN: u8 = 6;
pub const OWNR_NEUTRAL: u8 = 7;

/// Bytes per UNIT chunk record: x, y, type (u16 each), owner, flags (u8),
/// hp percent, resources (u16 each).
pub const UNIT_RECORD_SIZE: usize = 12;

/// One pre-placed unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapUnit {
    pub pos: Xy,
    pub unit_type: u16,
    pub owner: u8,
    pub flags: u8,
    pub hp_percent: u16,
    pub resources: u16,
}

/// The decoded map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MapData {
    pub version: u16,
    /// Width and height in tiles.
    pub width: usize,
    pub height: usize,
    pub tileset: u16,
    pub tile_ids: Vec<u16>,
    pub owners: [u8; MAX_PLAYERS],
    pub sides: [u8; MAX_PLAYERS],
    pub units: Vec<MapUnit>,
    pub scenario_name: String,
}

impl MapData {
    /// Parse a chunk stream.
    pub fn parse(bytes: &[u8]) -> SimResult<MapData> {
        let mut map = MapData::default();
        let mut seen: Vec<[u8; 4]> = Vec::new();
        let mut at = 0usize;
        while at < bytes.len() {
            if at + 8 > bytes.len() {
                return Err(SimError::InvalidInput("truncated chunk header".into()));
            }
            let tag: [u8; 4] = bytes[at..at + 4].try_into().expect("four bytes");
            let len = LittleEndian::read_u32(&bytes[at + 4..at + 8]) as usize;
            at += 8;
            let payload = bytes
                .get(at..at + len)
                .ok_or_else(|| SimError::InvalidInput(format!("truncated chunk {}", tag_name(tag))))?;
            at += len;
            seen.push(tag);
            map.read_chunk(tag, payload)?;
        }
        for required in REQUIRED {
            if !seen.contains(&required) {
                return Err(SimError::InvalidInput(format!(
                    "missing required chunk {}",
                    tag_name(required)
                )));
            }
        }
        if map.tile_ids.len() != map.width * map.height {
            return Err(SimError::InvalidInput(format!(
                "tile matrix holds {} entries for a {}x{} map",
                map.tile_ids.len(),
                map.width,
                map.height
            )));
        }
        Ok(map)
    }

    fn read_chunk(&mut self, tag: [u8; 4], payload: &[u8]) -> SimResult<()> {
        match tag {
            CHUNK_VER => {
                if payload.len() != 2 {
                    return Err(SimError::InvalidInput("VER chunk must be 2 bytes".into()));
                }
                self.version = LittleEndian::read_u16(payload);
            }
            CHUNK_DIM => {
                if payload.len() != 4 {
                    return Err(SimError::InvalidInput("DIM chunk must be 4 bytes".into()));
                }
                self.width = LittleEndian::read_u16(&payload[0..2]) as usize;
                self.height = LittleEndian::read_u16(&payload[2..4]) as usize;
                if self.width == 0 || self.height == 0 || self.width > 256 || self.height > 256 {
                    return Err(SimError::InvalidInput(format!(
                        "map dimensions out of range: {}x{}",
                        self.width, self.height
                    )));
                }
            }
            CHUNK_ERA => {
                if payload.len() != 2 {
                    return Err(SimError::InvalidInput("ERA chunk must be 2 bytes".into()));
                }
                self.tileset = LittleEndian::read_u16(payload);
            }
            CHUNK_OWNR => {
                if payload.len() < MAX_PLAYERS {
                    return Err(SimError::InvalidInput("OWNR chunk too short".into()));
                }
                self.owners.copy_from_slice(&payload[..MAX_PLAYERS]);
            }
            CHUNK_SIDE => {
                if payload.len() < MAX_PLAYERS {
                    return Err(SimError::InvalidInput("SIDE chunk too short".into()));
                }
                self.sides.copy_from_slice(&payload[..MAX_PLAYERS]);
            }
            CHUNK_MTXM => {
                if payload.len() % 2 != 0 {
                    return Err(SimError::InvalidInput("MTXM chunk length must be even".into()));
                }
                // later MTXM chunks overlay earlier ones from the start
                let ids: Vec<u16> = payload.chunks_exact(2).map(LittleEndian::read_u16).collect();
                if ids.len() >= self.tile_ids.len() {
                    self.tile_ids = ids;
                } else {
                    self.tile_ids[..ids.len()].copy_from_slice(&ids);
                }
            }
            CHUNK_UNIT => {
                if payload.len() % UNIT_RECORD_SIZE != 0 {
                    return Err(SimError::InvalidInput("UNIT chunk record misaligned".into()));
                }
                for record in payload.chunks_exact(UNIT_RECORD_SIZE) {
                    self.units.push(MapUnit {
                        pos: Xy::new(
                            i32::from(LittleEndian::read_u16(&record[0..2])),
                            i32::from(LittleEndian::read_u16(&record[2..4])),
                        ),
                        unit_type: LittleEndian::read_u16(&record[4..6]),
                        owner: record[6],
                        flags: record[7],
                        hp_percent: LittleEndian::read_u16(&record[8..10]),
                        resources: LittleEndian::read_u16(&record[10..12]),
                    });
                }
            }
            CHUNK_SPRP => {
                self.scenario_name = String::from_utf8_lossy(payload)
                    .trim_end_matches('\0')
                    .to_string();
            }
            // present-but-unmodeled chunks: validated for presence only
            CHUNK_STR | CHUNK_FORC | CHUNK_VCOD | CHUNK_THG2 => {}
            _ => {
                log::debug!("skipping unknown map chunk {}", tag_name(tag));
            }
        }
        Ok(())
    }

    /// Serialize back to the chunk stream.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut chunk = |tag: [u8; 4], payload: &[u8]| {
            out.extend_from_slice(&tag);
            out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            out.extend_from_slice(payload);
        };
        chunk(CHUNK_VER, &self.version.to_le_bytes());
        let mut dim = Vec::new();
        dim.extend_from_slice(&(self.width as u16).to_le_bytes());
        dim.extend_from_slice(&(self.height as u16).to_le_bytes());
        chunk(CHUNK_DIM, &dim);
        chunk(CHUNK_ERA, &self.tileset.to_le_bytes());
        chunk(CHUNK_OWNR, &self.owners);
        chunk(CHUNK_SIDE, &self.sides);
        chunk(CHUNK_STR, &[]);
        chunk(CHUNK_SPRP, self.scenario_name.as_bytes());
        chunk(CHUNK_FORC, &[]);
        chunk(CHUNK_VCOD, &[]);
        let mut mtxm = Vec::with_capacity(self.tile_ids.len() * 2);
        for id in &self.tile_ids {
            mtxm.extend_from_slice(&id.to_le_bytes());
        }
        chunk(CHUNK_MTXM, &mtxm);
        let mut units = Vec::with_capacity(self.units.len() * UNIT_RECORD_SIZE);
        for unit in &self.units {
            units.extend_from_slice(&(unit.pos.x as u16).to_le_bytes());
            units.extend_from_slice(&(unit.pos.y as u16).to_le_bytes());
            units.extend_from_slice(&unit.unit_type.to_le_bytes());
            units.push(unit.owner);
            units.push(unit.flags);
            units.extend_from_slice(&unit.hp_percent.to_le_bytes());
            units.extend_from_slice(&unit.resources.to_le_bytes());
        }
        chunk(CHUNK_UNIT, &units);
        chunk(CHUNK_THG2, &[]);
        out
    }
}

fn tag_name(tag: [u8; 4]) -> String {
    String::from_utf8_lossy(&tag).into_owned()
}

impl SimState {
    /// Apply a parsed map: terrain, players, then initial units.
    pub fn load_map(&mut self, data: &GameData, map: &MapData, events: &mut EventQueue) -> SimResult<()> {
        if map.width != self.terrain.width || map.height != self.terrain.height {
            return Err(SimError::LogicError(format!(
                "world is {}x{}, map is {}x{}",
                self.terrain.width, self.terrain.height, map.width, map.height
            )));
        }
        if !data.tileset.cv5.is_empty() {
            self.terrain.bake(&data.tileset, &map.tile_ids)?;
            self.regions = crate::terrain::Regions::build(&self.terrain);
        }
        for (slot, (&owner, &side)) in map.owners.iter().zip(map.sides.iter()).enumerate() {
            let player = &mut self.players[slot];
            player.controller = match owner {
                OWNR_COMPUTER => crate::components::Controller::Computer,
                OWNR_HUMAN => crate::components::Controller::Occupied,
                OWNR_NEUTRAL => crate::components::Controller::Neutral,
                _ => crate::components::Controller::Inactive,
            };
            player.race = crate::data::Race::from_u8(side.min(3))?;
            player.initially_active = player.is_active();
            player.upgrade_levels = vec![0; data.upgrades.len()];
            player.tech_researched = vec![false; data.techs.len()];
            player.shared_vision = 1 << (slot as u8).min(7);
        }
        for unit in &map.units {
            let id = self.place_completed_unit(
                data,
                crate::data::UnitTypeId(unit.unit_type),
                unit.owner,
                unit.pos,
            )?;
            if unit.resources > 0 {
                let index = id.index();
                self.unit_mut(index).building.resource.resource_count = i32::from(unit.resources);
            }
        }
        let _ = events;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    fn minimal_map() -> MapData {
        MapData {
            version: 59,
            width: 64,
            height: 64,
            tileset: 0,
            tile_ids: vec![0; 64 * 64],
            owners: {
                let mut o = [OWNR_INACTIVE; MAX_PLAYERS];
                o[0] = OWNR_HUMAN;
                o[1] = OWNR_HUMAN;
                o[11] = OWNR_NEUTRAL;
                o
            },
            sides: [1; MAX_PLAYERS],
            units: vec![MapUnit {
                pos: Xy::new(320, 320),
                unit_type: fixtures::COMMAND_CENTER.0,
                owner: 0,
                flags: 0,
                hp_percent: 100,
                resources: 0,
            }],
            scenario_name: "fixture arena".into(),
        }
    }

    #[test]
    fn test_map_round_trip() {
        let map = minimal_map();
        let bytes = map.to_bytes();
        let parsed = MapData::parse(&bytes).unwrap();
        assert_eq!(parsed.width, 64);
        assert_eq!(parsed.owners[0], OWNR_HUMAN);
        assert_eq!(parsed.units, map.units);
        assert_eq!(parsed.scenario_name, "fixture arena");
    }

    #[test]
    fn test_missing_required_chunk_is_rejected() {
        let map = minimal_map();
        let bytes = map.to_bytes();
        // strip the trailing THG2 chunk
        let cut = bytes.len() - 8;
        let err = MapData::parse(&bytes[..cut]);
        assert!(matches!(err, Err(SimError::InvalidInput(_))));
    }

    #[test]
    fn test_unknown_chunks_are_skipped() {
        let map = minimal_map();
        let mut bytes = map.to_bytes();
        bytes.extend_from_slice(b"XTRA");
        bytes.extend_from_slice(&4u32.to_le_bytes());
        bytes.extend_from_slice(&[1, 2, 3, 4]);
        assert!(MapData::parse(&bytes).is_ok());
    }

    #[test]
    fn test_load_map_places_units_and_players() {
        let data = fixtures::game_data();
        let mut state = crate::state::SimState::new(64, 64, 1, crate::state::GameType::Melee);
        let mut events = EventQueue::default();
        state.load_map(&data, &minimal_map(), &mut events).unwrap();
        assert!(state.players[0].is_active());
        assert!(!state.players[2].is_active());
        assert_eq!(state.player_units[0].len(), 1);
        state.check_invariants(&data).unwrap();
    }
}
