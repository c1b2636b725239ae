//! Terrain: the tile grid, the mini-tile walkability cascade, the region
//! graph used by the path planner, and the creep bookkeeping structure.
//!
//! A tile is 32x32 pixels and resolves through a small cascade:
//! tile id -> group (cv5) -> mega-tile -> 16 mini-tile flag words, giving
//! walkability and elevation at 8x8-pixel granularity. The cascade is baked
//! flat at load time so per-pixel queries are two array lookups.

use crate::data::{Cv5Entry, MiniTileFlags, TilesetData};
use crate::errors::{SimError, SimResult};
use crate::fixed::{Rect, Xy};
use serde::{Deserialize, Serialize};

pub const TILE_SIZE: i32 = 32;
pub const MINI_TILE_SIZE: i32 = 8;

// ============================================================================
// TILES
// ============================================================================

bitflags::bitflags! {
    /// Per-tile flag word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct TileFlags: u16 {
        const WALKABLE           = 0x0001;
        const UNWALKABLE         = 0x0004;
        const PROVIDES_COVER     = 0x0010;
        const HAS_CREEP          = 0x0040;
        const UNBUILDABLE        = 0x0080;
        const VERY_HIGH          = 0x0100;
        const MIDDLE             = 0x0200;
        const HIGH               = 0x0400;
        const OCCUPIED           = 0x0800;
        const CREEP_RECEDING     = 0x1000;
        const PARTIALLY_WALKABLE = 0x2000;
        const TEMPORARY_CREEP    = 0x4000;
    }
}

/// One map tile: visibility bitmasks plus the flag word.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Tile {
    /// Bit per player: currently in sight.
    pub visible: u8,
    /// Bit per player: seen at least once.
    pub explored: u8,
    pub flags: TileFlags,
}

/// The map grid plus the baked mini-tile layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TerrainGrid {
    /// Width in tiles.
    pub width: usize,
    /// Height in tiles.
    pub height: usize,
    pub tiles: Vec<Tile>,
    /// The raw tile ids from the map, kept for snapshots and debugging.
    pub tile_ids: Vec<u16>,
    /// Mini-tile flags, `width*4 x height*4`, row-major.
    pub mini: Vec<MiniTileFlags>,
}

impl TerrainGrid {
    /// A blank grid starts as open walkable ground; `bake` overwrites it
    /// from map data.
    pub fn new(width: usize, height: usize) -> Self {
        TerrainGrid {
            width,
            height,
            tiles: vec![
                Tile { visible: 0, explored: 0, flags: TileFlags::WALKABLE };
                width * height
            ],
            tile_ids: vec![0; width * height],
            mini: vec![MiniTileFlags::WALKABLE; width * 4 * height * 4],
        }
    }

    /// Resolve the map's tile ids through the tileset cascade, baking
    /// per-tile and per-mini-tile flags.
    pub fn bake(&mut self, tileset: &TilesetData, tile_ids: &[u16]) -> SimResult<()> {
        if tile_ids.len() != self.width * self.height {
            return Err(SimError::InvalidInput(format!(
                "tile matrix size {} does not match {}x{}",
                tile_ids.len(),
                self.width,
                self.height
            )));
        }
        self.tile_ids.copy_from_slice(tile_ids);
        for ty in 0..self.height {
            for tx in 0..self.width {
                let id = tile_ids[ty * self.width + tx];
                let group_index = (id >> 4) as usize & 0x7ff;
                let subtile = (id & 0xf) as usize;
                let group: &Cv5Entry = tileset.cv5.get(group_index).ok_or_else(|| {
                    SimError::InvalidInput(format!("tile group out of range: {group_index}"))
                })?;
                let mega = group.mega_tile_index[subtile] as usize;
                let vf4 = tileset.vf4.get(mega).ok_or_else(|| {
                    SimError::InvalidInput(format!("mega tile out of range: {mega}"))
                })?;
                let mut walkable_count = 0;
                let mut middle = 0;
                let mut high = 0;
                let mut very_high = 0;
                for my in 0..4 {
                    for mx in 0..4 {
                        let flags = MiniTileFlags::from_bits_truncate(vf4.flags[my * 4 + mx]);
                        let gx = tx * 4 + mx;
                        let gy = ty * 4 + my;
                        self.mini[gy * self.width * 4 + gx] = flags;
                        if flags.contains(MiniTileFlags::WALKABLE) {
                            walkable_count += 1;
                        }
                        if flags.contains(MiniTileFlags::MIDDLE) {
                            middle += 1;
                        }
                        if flags.contains(MiniTileFlags::HIGH) {
                            high += 1;
                        }
                        if flags.contains(MiniTileFlags::VERY_HIGH) {
                            very_high += 1;
                        }
                    }
                }
                let mut flags = TileFlags::empty();
                if walkable_count == 16 {
                    flags |= TileFlags::WALKABLE;
                } else if walkable_count == 0 {
                    flags |= TileFlags::UNWALKABLE;
                } else {
                    flags |= TileFlags::WALKABLE | TileFlags::PARTIALLY_WALKABLE;
                }
                if middle >= 8 {
                    flags |= TileFlags::MIDDLE;
                }
                if high >= 8 {
                    flags |= TileFlags::HIGH;
                }
                if very_high >= 8 {
                    flags |= TileFlags::VERY_HIGH;
                }
                self.tiles[ty * self.width + tx].flags = flags;
            }
        }
        Ok(())
    }

    #[inline]
    pub fn in_bounds(&self, tile: Xy) -> bool {
        tile.x >= 0 && tile.y >= 0 && (tile.x as usize) < self.width && (tile.y as usize) < self.height
    }

    #[inline]
    pub fn tile(&self, tile: Xy) -> Option<&Tile> {
        if self.in_bounds(tile) {
            Some(&self.tiles[tile.y as usize * self.width + tile.x as usize])
        } else {
            None
        }
    }

    #[inline]
    pub fn tile_mut(&mut self, tile: Xy) -> Option<&mut Tile> {
        if self.in_bounds(tile) {
            Some(&mut self.tiles[tile.y as usize * self.width + tile.x as usize])
        } else {
            None
        }
    }

    /// Pixel bounds of the whole map.
    pub fn pixel_bounds(&self) -> Rect {
        Rect::new(
            Xy::new(0, 0),
            Xy::new(self.width as i32 * TILE_SIZE, self.height as i32 * TILE_SIZE),
        )
    }

    #[inline]
    pub fn pixel_to_tile(pos: Xy) -> Xy {
        Xy::new(pos.x.div_euclid(TILE_SIZE), pos.y.div_euclid(TILE_SIZE))
    }

    #[inline]
    pub fn tile_center(tile: Xy) -> Xy {
        Xy::new(tile.x * TILE_SIZE + TILE_SIZE / 2, tile.y * TILE_SIZE + TILE_SIZE / 2)
    }

    /// Mini-tile flags at a pixel position.
    pub fn mini_at(&self, pos: Xy) -> MiniTileFlags {
        let mx = pos.x.div_euclid(MINI_TILE_SIZE);
        let my = pos.y.div_euclid(MINI_TILE_SIZE);
        if mx < 0 || my < 0 || mx as usize >= self.width * 4 || my as usize >= self.height * 4 {
            return MiniTileFlags::empty();
        }
        self.mini[my as usize * self.width * 4 + mx as usize]
    }

    pub fn is_walkable(&self, pos: Xy) -> bool {
        self.mini_at(pos).contains(MiniTileFlags::WALKABLE)
    }

    /// Ground elevation at a pixel: 0 low, 1 middle, 2 high, 3 very high.
    pub fn elevation_at(&self, pos: Xy) -> i32 {
        let flags = self.mini_at(pos);
        if flags.contains(MiniTileFlags::VERY_HIGH) {
            3
        } else if flags.contains(MiniTileFlags::HIGH) {
            2
        } else if flags.contains(MiniTileFlags::MIDDLE) {
            1
        } else {
            0
        }
    }

    /// Set or clear the occupied flag across a footprint of tiles.
    pub fn set_occupied(&mut self, area: Rect, occupied: bool) {
        for ty in area.from.y..area.to.y {
            for tx in area.from.x..area.to.x {
                if let Some(tile) = self.tile_mut(Xy::new(tx, ty)) {
                    tile.flags.set(TileFlags::OCCUPIED, occupied);
                }
            }
        }
    }
}

// ============================================================================
// REGIONS
// ============================================================================

/// Region flag value marking unwalkable regions.
pub const REGION_UNWALKABLE: u16 = 0x1ffd;

/// A connected component of same-walkability tiles; vertex of the coarse
/// pathing graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Region {
    pub flags: u16,
    pub tile_center: Xy,
    pub tile_area: Rect,
    pub tile_count: usize,
    pub group_index: usize,
    pub walkable_neighbors: Vec<u16>,
    pub non_walkable_neighbors: Vec<u16>,
}

impl Region {
    pub fn walkable(&self) -> bool {
        self.flags != REGION_UNWALKABLE
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Regions {
    pub regions: Vec<Region>,
    /// Region index per tile.
    pub tile_region_index: Vec<u16>,
}

impl Regions {
    /// Partition the grid into 4-connected components of equal walkability.
    ///
    /// Scan order is row-major, so region numbering is deterministic for a
    /// given grid.
    pub fn build(grid: &TerrainGrid) -> Regions {
        let w = grid.width;
        let h = grid.height;
        let mut tile_region_index = vec![u16::MAX; w * h];
        let mut regions: Vec<Region> = Vec::new();

        let walkable = |x: usize, y: usize| {
            grid.tiles[y * w + x].flags.contains(TileFlags::WALKABLE)
        };

        for sy in 0..h {
            for sx in 0..w {
                if tile_region_index[sy * w + sx] != u16::MAX {
                    continue;
                }
                let region_index = regions.len() as u16;
                let target = walkable(sx, sy);
                let mut stack = vec![(sx, sy)];
                tile_region_index[sy * w + sx] = region_index;
                let mut count = 0usize;
                let mut sum = Xy::new(0, 0);
                let mut area = Rect::new(
                    Xy::new(sx as i32, sy as i32),
                    Xy::new(sx as i32 + 1, sy as i32 + 1),
                );
                while let Some((x, y)) = stack.pop() {
                    count += 1;
                    sum = sum + Xy::new(x as i32, y as i32);
                    area.from.x = area.from.x.min(x as i32);
                    area.from.y = area.from.y.min(y as i32);
                    area.to.x = area.to.x.max(x as i32 + 1);
                    area.to.y = area.to.y.max(y as i32 + 1);
                    let mut push = |nx: usize, ny: usize, stack: &mut Vec<(usize, usize)>| {
                        if walkable(nx, ny) == target && tile_region_index[ny * w + nx] == u16::MAX {
                            tile_region_index[ny * w + nx] = region_index;
                            stack.push((nx, ny));
                        }
                    };
                    if x > 0 {
                        push(x - 1, y, &mut stack);
                    }
                    if x + 1 < w {
                        push(x + 1, y, &mut stack);
                    }
                    if y > 0 {
                        push(x, y - 1, &mut stack);
                    }
                    if y + 1 < h {
                        push(x, y + 1, &mut stack);
                    }
                }
                regions.push(Region {
                    flags: if target { 0 } else { REGION_UNWALKABLE },
                    tile_center: Xy::new(sum.x / count as i32, sum.y / count as i32),
                    tile_area: area,
                    tile_count: count,
                    group_index: 0,
                    walkable_neighbors: Vec::new(),
                    non_walkable_neighbors: Vec::new(),
                });
            }
        }

        // Neighbor lists from tile adjacency, deduplicated, index-ordered.
        let mut neighbor_sets: Vec<std::collections::BTreeSet<u16>> =
            vec![std::collections::BTreeSet::new(); regions.len()];
        for y in 0..h {
            for x in 0..w {
                let a = tile_region_index[y * w + x];
                if x + 1 < w {
                    let b = tile_region_index[y * w + x + 1];
                    if a != b {
                        neighbor_sets[a as usize].insert(b);
                        neighbor_sets[b as usize].insert(a);
                    }
                }
                if y + 1 < h {
                    let b = tile_region_index[(y + 1) * w + x];
                    if a != b {
                        neighbor_sets[a as usize].insert(b);
                        neighbor_sets[b as usize].insert(a);
                    }
                }
            }
        }
        for (i, set) in neighbor_sets.into_iter().enumerate() {
            for n in set {
                if regions[n as usize].walkable() {
                    regions[i].walkable_neighbors.push(n);
                } else {
                    regions[i].non_walkable_neighbors.push(n);
                }
            }
        }

        Regions { regions, tile_region_index }
    }

    pub fn region_at_tile(&self, grid: &TerrainGrid, tile: Xy) -> Option<u16> {
        if grid.in_bounds(tile) {
            Some(self.tile_region_index[tile.y as usize * grid.width + tile.x as usize])
        } else {
            None
        }
    }

    pub fn region_at_pixel(&self, grid: &TerrainGrid, pos: Xy) -> Option<u16> {
        self.region_at_tile(grid, TerrainGrid::pixel_to_tile(pos))
    }
}

// ============================================================================
// CREEP
// ============================================================================

pub const CREEP_ENTRY_COUNT: usize = 1024;
pub const CREEP_HASH_BUCKETS: usize = 512;

/// A border tile tracked by the creep spreader.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CreepEntry {
    pub tile: Xy,
    /// Number of neighboring creep tiles, 0..=8.
    pub neighbors: u8,
    pub in_use: bool,
}

/// Time-amortized creep bookkeeping: a bounded pool of border tiles, a
/// position hash, and nine lists bucketed by neighboring-creep count so
/// growth can always pick the most-surrounded candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreepState {
    pub entries: Vec<CreepEntry>,
    /// Bucketed entry indices: `(y*7 + x) % CREEP_HASH_BUCKETS`.
    pub hash: Vec<Vec<u16>>,
    /// Entry indices by neighbor count.
    pub lists: Vec<Vec<u16>>,
    pub free: Vec<u16>,
    pub recede_timer: i32,
    pub check_dead_unit_timer: i32,
}

impl Default for CreepState {
    fn default() -> Self {
        CreepState {
            entries: vec![CreepEntry::default(); CREEP_ENTRY_COUNT],
            hash: vec![Vec::new(); CREEP_HASH_BUCKETS],
            lists: vec![Vec::new(); 9],
            // free list popped from the back, so low indices go first
            free: (0..CREEP_ENTRY_COUNT as u16).rev().collect(),
            recede_timer: 0,
            check_dead_unit_timer: 0,
        }
    }
}

impl CreepState {
    fn bucket(tile: Xy) -> usize {
        ((tile.y * 7 + tile.x).rem_euclid(CREEP_HASH_BUCKETS as i32)) as usize
    }

    pub fn find(&self, tile: Xy) -> Option<u16> {
        self.hash[Self::bucket(tile)]
            .iter()
            .copied()
            .find(|&i| self.entries[i as usize].tile == tile)
    }

    /// Track a border tile; no-op when the pool is exhausted (the spreader
    /// is time-amortized, it will pick the tile up on a later pass).
    pub fn insert(&mut self, tile: Xy, neighbors: u8) -> Option<u16> {
        debug_assert!(neighbors <= 8);
        if self.find(tile).is_some() {
            return None;
        }
        let index = self.free.pop()?;
        let e = &mut self.entries[index as usize];
        e.tile = tile;
        e.neighbors = neighbors;
        e.in_use = true;
        self.hash[Self::bucket(tile)].push(index);
        self.lists[neighbors as usize].push(index);
        Some(index)
    }

    pub fn remove(&mut self, tile: Xy) -> bool {
        let Some(index) = self.find(tile) else {
            return false;
        };
        let e = &mut self.entries[index as usize];
        let neighbors = e.neighbors;
        e.in_use = false;
        let bucket = Self::bucket(tile);
        self.hash[bucket].retain(|&i| i != index);
        self.lists[neighbors as usize].retain(|&i| i != index);
        self.free.push(index);
        true
    }

    /// Move an entry between neighbor-count lists.
    pub fn retarget(&mut self, tile: Xy, neighbors: u8) {
        debug_assert!(neighbors <= 8);
        if let Some(index) = self.find(tile) {
            let old = self.entries[index as usize].neighbors;
            if old != neighbors {
                self.lists[old as usize].retain(|&i| i != index);
                self.lists[neighbors as usize].push(index);
                self.entries[index as usize].neighbors = neighbors;
            }
        }
    }

    /// The most-surrounded candidate, ties broken by insertion order.
    pub fn best_candidate(&self) -> Option<u16> {
        (0..9).rev().find_map(|n| self.lists[n].first().copied())
    }

    pub fn live_count(&self) -> usize {
        CREEP_ENTRY_COUNT - self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Vf4Entry;

    fn flat_tileset() -> TilesetData {
        // group 0: all-walkable low ground; group 1: all-unwalkable
        let walk = Vf4Entry { flags: [MiniTileFlags::WALKABLE.bits(); 16] };
        let wall = Vf4Entry { flags: [0; 16] };
        TilesetData {
            cv5: vec![
                Cv5Entry { flags: 0, mega_tile_index: [0; 16] },
                Cv5Entry { flags: 0, mega_tile_index: [1; 16] },
            ],
            vf4: vec![walk, wall],
        }
    }

    fn grid_with_wall() -> TerrainGrid {
        // 8x8, a vertical unwalkable stripe at x = 4
        let mut ids = vec![0u16; 64];
        for y in 0..8 {
            ids[y * 8 + 4] = 1 << 4;
        }
        let mut grid = TerrainGrid::new(8, 8);
        grid.bake(&flat_tileset(), &ids).unwrap();
        grid
    }

    #[test]
    fn test_bake_resolves_cascade() {
        let grid = grid_with_wall();
        assert!(grid.tiles[0].flags.contains(TileFlags::WALKABLE));
        assert!(grid.tiles[4].flags.contains(TileFlags::UNWALKABLE));
        assert!(grid.is_walkable(Xy::new(10, 10)));
        assert!(!grid.is_walkable(Xy::new(4 * 32 + 5, 10)));
    }

    #[test]
    fn test_bake_rejects_bad_matrix() {
        let mut grid = TerrainGrid::new(4, 4);
        let err = grid.bake(&flat_tileset(), &[0u16; 7]);
        assert!(matches!(err, Err(SimError::InvalidInput(_))));
    }

    #[test]
    fn test_regions_split_by_wall() {
        let grid = grid_with_wall();
        let regions = Regions::build(&grid);
        let left = regions.region_at_tile(&grid, Xy::new(0, 0)).unwrap();
        let right = regions.region_at_tile(&grid, Xy::new(7, 0)).unwrap();
        let wall = regions.region_at_tile(&grid, Xy::new(4, 0)).unwrap();
        assert_ne!(left, right);
        assert!(regions.regions[left as usize].walkable());
        assert!(!regions.regions[wall as usize].walkable());
        // wall region bridges both sides
        assert!(regions.regions[wall as usize].walkable_neighbors.contains(&left));
        assert!(regions.regions[wall as usize].walkable_neighbors.contains(&right));
    }

    #[test]
    fn test_occupied_footprint() {
        let mut grid = grid_with_wall();
        grid.set_occupied(Rect::new(Xy::new(1, 1), Xy::new(3, 3)), true);
        assert!(grid.tile(Xy::new(2, 2)).unwrap().flags.contains(TileFlags::OCCUPIED));
        assert!(!grid.tile(Xy::new(3, 3)).unwrap().flags.contains(TileFlags::OCCUPIED));
        grid.set_occupied(Rect::new(Xy::new(1, 1), Xy::new(3, 3)), false);
        assert!(!grid.tile(Xy::new(2, 2)).unwrap().flags.contains(TileFlags::OCCUPIED));
    }

    #[test]
    fn test_creep_pool_insert_find_remove() {
        let mut creep = CreepState::default();
        let a = Xy::new(3, 4);
        assert!(creep.insert(a, 2).is_some());
        assert!(creep.insert(a, 2).is_none()); // duplicate
        assert_eq!(creep.live_count(), 1);
        creep.retarget(a, 5);
        assert_eq!(creep.best_candidate(), creep.find(a));
        assert!(creep.remove(a));
        assert!(!creep.remove(a));
        assert_eq!(creep.live_count(), 0);
    }

    #[test]
    fn test_creep_best_candidate_prefers_most_neighbors() {
        let mut creep = CreepState::default();
        creep.insert(Xy::new(0, 0), 1);
        creep.insert(Xy::new(1, 0), 7);
        creep.insert(Xy::new(2, 0), 4);
        let best = creep.best_candidate().unwrap();
        assert_eq!(creep.entries[best as usize].tile, Xy::new(1, 0));
    }
}
