//! Snapshots.
//!
//! A snapshot is the entire `SimState` as a serde value - arenas walked in
//! index order with indices in place of pointers - plus a light per-unit
//! view for embedders that only want to look. Restoring swaps the full
//! state back in; `step()` on the restored world continues the exact
//! trajectory the original would have taken.

use crate::data::GameData;
use crate::errors::{SimError, SimResult};
use crate::state::{SimState, BULLET_CAPACITY, SPRITE_CAPACITY, UNIT_CAPACITY};
use serde::{Deserialize, Serialize};

/// One unit's readable state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitSnapshot {
    pub id: u16,
    pub owner: u8,
    pub unit_type: u16,
    pub x: i32,
    pub y: i32,
    pub hp: i32,
    pub shields: i32,
    pub energy: i32,
    pub order: u8,
    pub completed: bool,
}

/// The full world image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub frame: u32,
    pub state: SimState,
    pub units: Vec<UnitSnapshot>,
}

impl Snapshot {
    /// Capture a world.
    pub fn capture(state: &SimState) -> Snapshot {
        let units = state
            .units
            .iter()
            .map(|(index, unit)| UnitSnapshot {
                id: state.unit_id(index).0,
                owner: unit.owner,
                unit_type: unit.unit_type.0,
                x: unit.position().x,
                y: unit.position().y,
                hp: unit.hp.integer_part(),
                shields: unit.shields.integer_part(),
                energy: unit.energy.integer_part(),
                order: unit.order_type.0,
                completed: unit.is_completed(),
            })
            .collect();
        Snapshot { frame: state.frame, state: state.clone(), units }
    }

    /// Validate a snapshot against the engine's fixed capacities and the
    /// loaded data tables before it may replace a live world.
    pub fn validate(&self, data: &GameData) -> SimResult<()> {
        if self.state.units.capacity() != UNIT_CAPACITY
            || self.state.sprites.capacity() != SPRITE_CAPACITY
            || self.state.bullets.capacity() != BULLET_CAPACITY
        {
            return Err(SimError::InvalidInput(
                "snapshot arena capacities do not match this build".into(),
            ));
        }
        for (index, unit) in self.state.units.iter() {
            if unit.unit_type.index() >= data.units.len() {
                return Err(SimError::InvalidInput(format!(
                    "snapshot unit {index} has unit type {} outside the data tables",
                    unit.unit_type.0
                )));
            }
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> SimResult<Snapshot> {
        serde_json::from_str(json)
            .map_err(|e| SimError::InvalidInput(format!("snapshot parse failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::fixed::Xy;

    #[test]
    fn test_capture_lists_units() {
        let data = fixtures::game_data();
        let mut state = fixtures::blank_state(32, 32, 3);
        state
            .place_completed_unit(&data, fixtures::MARINE, 0, Xy::new(100, 100))
            .unwrap();
        let snapshot = Snapshot::capture(&state);
        assert_eq!(snapshot.units.len(), 1);
        assert_eq!(snapshot.units[0].hp, 40);
        assert!(snapshot.units[0].completed);
        snapshot.validate(&data).unwrap();
    }

    #[test]
    fn test_json_round_trip_preserves_state() {
        let data = fixtures::game_data();
        let mut state = fixtures::blank_state(32, 32, 3);
        state
            .place_completed_unit(&data, fixtures::MARINE, 0, Xy::new(100, 100))
            .unwrap();
        let snapshot = Snapshot::capture(&state);
        let json = snapshot.to_json().unwrap();
        let back = Snapshot::from_json(&json).unwrap();
        assert_eq!(back.to_json().unwrap(), json);
        assert_eq!(back.state.rng, state.rng);
        assert_eq!(back.state.units.len(), state.units.len());
    }

    #[test]
    fn test_validate_rejects_foreign_unit_types() {
        let data = fixtures::game_data();
        let mut state = fixtures::blank_state(32, 32, 3);
        state
            .place_completed_unit(&data, fixtures::MARINE, 0, Xy::new(100, 100))
            .unwrap();
        let mut snapshot = Snapshot::capture(&state);
        for (_, unit) in snapshot.state.units.iter_mut() {
            unit.unit_type = crate::data::UnitTypeId(999);
        }
        assert!(matches!(snapshot.validate(&data), Err(SimError::InvalidInput(_))));
    }
}
