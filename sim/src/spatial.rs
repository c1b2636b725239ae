//! The unit finder: a spatial index over live units' bounding boxes.
//!
//! For each axis the finder keeps a sorted list of `(coordinate, unit,
//! side)` entries, one pair per unit for that unit's box edges. Rectangular
//! queries scan the x list, so results come back in x-sorted order with a
//! stable unit-index tie-break - an ordering the combat and pathing code
//! observes, which makes it part of the determinism contract.

use crate::fixed::{Rect, Xy};
use serde::{Deserialize, Serialize};

/// One box edge on one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinderEntry {
    pub coord: i32,
    pub unit: u16,
    /// False for the `from` edge, true for the `to` edge.
    pub is_to: bool,
}

impl FinderEntry {
    fn key(&self) -> (i32, u16, bool) {
        (self.coord, self.unit, self.is_to)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnitFinder {
    x: Vec<FinderEntry>,
    y: Vec<FinderEntry>,
    /// Current box per unit index; `None` when the unit is not indexed.
    boxes: Vec<Option<Rect>>,
    /// Largest box extent ever inserted; bounds query expansion.
    max_extent: Xy,
}

impl UnitFinder {
    pub fn new(capacity: u16) -> Self {
        UnitFinder {
            x: Vec::new(),
            y: Vec::new(),
            boxes: vec![None; capacity as usize],
            max_extent: Xy::new(0, 0),
        }
    }

    pub fn len(&self) -> usize {
        self.x.len() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn contains(&self, unit: u16) -> bool {
        self.boxes.get(unit as usize).is_some_and(Option::is_some)
    }

    pub fn bounds_of(&self, unit: u16) -> Option<Rect> {
        self.boxes.get(unit as usize).copied().flatten()
    }

    fn insert_axis(list: &mut Vec<FinderEntry>, entry: FinderEntry) {
        let at = list.partition_point(|e| e.key() < entry.key());
        list.insert(at, entry);
    }

    fn remove_axis(list: &mut Vec<FinderEntry>, entry: FinderEntry) {
        if let Some(at) = list.iter().position(|e| *e == entry) {
            list.remove(at);
        }
    }

    /// Index a unit's bounding box. The unit must not already be present.
    pub fn insert(&mut self, unit: u16, bounds: Rect) {
        debug_assert!(!self.contains(unit), "unit {unit} double-inserted");
        Self::insert_axis(&mut self.x, FinderEntry { coord: bounds.from.x, unit, is_to: false });
        Self::insert_axis(&mut self.x, FinderEntry { coord: bounds.to.x, unit, is_to: true });
        Self::insert_axis(&mut self.y, FinderEntry { coord: bounds.from.y, unit, is_to: false });
        Self::insert_axis(&mut self.y, FinderEntry { coord: bounds.to.y, unit, is_to: true });
        self.boxes[unit as usize] = Some(bounds);
        self.max_extent.x = self.max_extent.x.max(bounds.width());
        self.max_extent.y = self.max_extent.y.max(bounds.height());
    }

    pub fn remove(&mut self, unit: u16) {
        let Some(bounds) = self.boxes[unit as usize].take() else {
            return;
        };
        Self::remove_axis(&mut self.x, FinderEntry { coord: bounds.from.x, unit, is_to: false });
        Self::remove_axis(&mut self.x, FinderEntry { coord: bounds.to.x, unit, is_to: true });
        Self::remove_axis(&mut self.y, FinderEntry { coord: bounds.from.y, unit, is_to: false });
        Self::remove_axis(&mut self.y, FinderEntry { coord: bounds.to.y, unit, is_to: true });
    }

    /// Re-link the moved edges of a unit already in the index.
    pub fn update(&mut self, unit: u16, bounds: Rect) {
        if self.contains(unit) {
            self.remove(unit);
        }
        self.insert(unit, bounds);
    }

    /// Units whose boxes intersect `area`, after expanding the search
    /// window by the maximum unit extent so boxes straddling the window
    /// edge are found. Results are x-sorted with unit-index tie-break.
    pub fn find(&self, area: Rect) -> Vec<u16> {
        self.scan(area, area.expand(self.max_extent))
    }

    /// Query variant for callers that already padded the rectangle.
    pub fn find_noexpand(&self, area: Rect) -> Vec<u16> {
        self.scan(area, area)
    }

    fn scan(&self, area: Rect, window: Rect) -> Vec<u16> {
        let start = self.x.partition_point(|e| e.coord < window.from.x);
        let mut out = Vec::new();
        for entry in &self.x[start..] {
            if entry.coord >= window.to.x {
                break;
            }
            if entry.is_to {
                continue;
            }
            if let Some(bounds) = self.boxes[entry.unit as usize] {
                if bounds.intersects(area) {
                    out.push(entry.unit);
                }
            }
        }
        out
    }

    /// Debug check: both axis lists are monotonic and hold exactly one
    /// edge pair per indexed unit.
    pub fn validate(&self) -> Result<(), String> {
        for list in [&self.x, &self.y] {
            for pair in list.windows(2) {
                if pair[0].key() > pair[1].key() {
                    return Err(format!("finder list out of order at {:?}", pair[1]));
                }
            }
        }
        let indexed = self.boxes.iter().filter(|b| b.is_some()).count();
        if self.x.len() != indexed * 2 || self.y.len() != indexed * 2 {
            return Err(format!(
                "finder edge count mismatch: {} boxes, {} x edges, {} y edges",
                indexed,
                self.x.len(),
                self.y.len()
            ));
        }
        Ok(())
    }
}
