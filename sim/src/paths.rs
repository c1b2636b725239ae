//! Path planning.
//!
//! Long-range planning runs on the region graph: an A* search from the
//! source region to the destination region yielding a region sequence.
//! Short-range planning produces pixel waypoints through a bounded tile
//! window, avoiding unwalkable and occupied tiles. Collision with other
//! units is not planned around here; the movement state machine slides
//! around moving blockers and re-plans when it gives up.
//!
//! Every tie in both searches breaks on the smaller index, so identical
//! inputs always yield identical routes.

use crate::fixed::{xy_length, Rect, Xy};
use crate::terrain::{Regions, TerrainGrid, TileFlags, TILE_SIZE};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Upper bound on planned region sequences; longer searches fail over to
/// a partial path toward the closest reached region.
pub const MAX_LONG_PATH: usize = 64;

/// Half-extent of the short-path tile window around the segment.
const SHORT_WINDOW_MARGIN: i32 = 6;

/// A* over the walkable region graph.
///
/// Returns the region sequence from `src` to `dst` inclusive, or the
/// sequence toward the closest approachable region when `dst` is
/// unreachable. Returns `None` when `src` itself is not walkable.
pub fn long_path(regions: &Regions, src: u16, dst: u16) -> Option<Vec<u16>> {
    if !regions.regions.get(src as usize)?.walkable() {
        return None;
    }
    if src == dst {
        return Some(vec![src]);
    }
    let dst_center = regions.regions.get(dst as usize)?.tile_center;
    let n = regions.regions.len();
    let mut best_cost: Vec<i32> = vec![i32::MAX; n];
    let mut came_from: Vec<u16> = vec![u16::MAX; n];
    let mut heap: BinaryHeap<Reverse<(i32, i32, u16)>> = BinaryHeap::new();

    let h = |r: u16| {
        let c = regions.regions[r as usize].tile_center;
        xy_length(c - dst_center)
    };

    best_cost[src as usize] = 0;
    heap.push(Reverse((h(src), 0, src)));
    let mut closest = src;
    let mut closest_h = h(src);

    while let Some(Reverse((_, cost, region))) = heap.pop() {
        if cost > best_cost[region as usize] {
            continue;
        }
        if region == dst {
            return Some(walk_back(&came_from, src, dst));
        }
        let hr = h(region);
        if hr < closest_h {
            closest_h = hr;
            closest = region;
        }
        let center = regions.regions[region as usize].tile_center;
        for &next in &regions.regions[region as usize].walkable_neighbors {
            let step = xy_length(regions.regions[next as usize].tile_center - center).max(1);
            let next_cost = cost + step;
            if next_cost < best_cost[next as usize] {
                best_cost[next as usize] = next_cost;
                came_from[next as usize] = region;
                heap.push(Reverse((next_cost + h(next), next_cost, next)));
            }
        }
    }

    // Unreachable: head for the closest region we saw.
    Some(walk_back(&came_from, src, closest))
}

fn walk_back(came_from: &[u16], src: u16, dst: u16) -> Vec<u16> {
    let mut path = vec![dst];
    let mut cur = dst;
    while cur != src {
        cur = came_from[cur as usize];
        if cur == u16::MAX {
            break;
        }
        path.push(cur);
    }
    path.reverse();
    path.truncate(MAX_LONG_PATH);
    path
}

fn tile_blocked(grid: &TerrainGrid, tile: Xy) -> bool {
    match grid.tile(tile) {
        Some(t) => {
            !t.flags.contains(TileFlags::WALKABLE) || t.flags.contains(TileFlags::OCCUPIED)
        }
        None => true,
    }
}

/// True when the straight segment between two pixel positions stays on
/// walkable, unoccupied ground. Samples every half mini-tile.
pub fn line_walkable(grid: &TerrainGrid, a: Xy, b: Xy) -> bool {
    let delta = b - a;
    let len = xy_length(delta);
    if len == 0 {
        return !tile_blocked(grid, TerrainGrid::pixel_to_tile(a));
    }
    let steps = (len / 4).max(1);
    for i in 0..=steps {
        let p = Xy::new(a.x + delta.x * i / steps, a.y + delta.y * i / steps);
        if !grid.is_walkable(p) || tile_blocked(grid, TerrainGrid::pixel_to_tile(p)) {
            return false;
        }
    }
    true
}

/// Short-range planner: pixel waypoints from `from` to `to`.
///
/// Runs a tile-level A* inside a window around the segment, then smooths
/// the tile chain into as few waypoints as line-of-sight allows. An empty
/// result means no route exists inside the window.
pub fn short_path(grid: &TerrainGrid, from: Xy, to: Xy) -> Vec<Xy> {
    if line_walkable(grid, from, to) {
        return vec![to];
    }

    let from_tile = TerrainGrid::pixel_to_tile(from);
    let to_tile = TerrainGrid::pixel_to_tile(to);
    let margin = Xy::new(SHORT_WINDOW_MARGIN, SHORT_WINDOW_MARGIN);
    let window = Rect::new(
        Xy::new(from_tile.x.min(to_tile.x), from_tile.y.min(to_tile.y)) - margin,
        Xy::new(from_tile.x.max(to_tile.x) + 1, from_tile.y.max(to_tile.y) + 1) + margin,
    );

    let w = window.width();
    let hgt = window.height();
    let idx = |t: Xy| ((t.y - window.from.y) * w + (t.x - window.from.x)) as usize;
    let mut best: Vec<i32> = vec![i32::MAX; (w * hgt) as usize];
    let mut came: Vec<Xy> = vec![Xy::new(i32::MIN, i32::MIN); (w * hgt) as usize];
    let mut heap: BinaryHeap<Reverse<(i32, i32, Xy)>> = BinaryHeap::new();

    if !window.contains(from_tile) || tile_blocked(grid, from_tile) {
        return Vec::new();
    }
    let h = |t: Xy| xy_length((to_tile - t) * TILE_SIZE);
    best[idx(from_tile)] = 0;
    heap.push(Reverse((h(from_tile), 0, from_tile)));
    let mut reached = false;

    while let Some(Reverse((_, cost, tile))) = heap.pop() {
        if cost > best[idx(tile)] {
            continue;
        }
        if tile == to_tile {
            reached = true;
            break;
        }
        for dy in -1..=1 {
            for dx in -1..=1 {
                if dx == 0 && dy == 0 {
                    continue;
                }
                let next = tile + Xy::new(dx, dy);
                if !window.contains(next) || tile_blocked(grid, next) {
                    continue;
                }
                // no diagonal corner cutting
                if dx != 0
                    && dy != 0
                    && (tile_blocked(grid, tile + Xy::new(dx, 0))
                        || tile_blocked(grid, tile + Xy::new(0, dy)))
                {
                    continue;
                }
                let step = if dx != 0 && dy != 0 { 45 } else { 32 };
                let next_cost = cost + step;
                if next_cost < best[idx(next)] {
                    best[idx(next)] = next_cost;
                    came[idx(next)] = tile;
                    heap.push(Reverse((next_cost + h(next), next_cost, next)));
                }
            }
        }
    }

    if !reached {
        return Vec::new();
    }

    // Tile chain back to the start, then smooth to pixel waypoints.
    let mut chain = vec![to];
    let mut cur = to_tile;
    while cur != from_tile {
        cur = came[idx(cur)];
        if cur.x == i32::MIN {
            return Vec::new();
        }
        chain.push(TerrainGrid::tile_center(cur));
    }
    chain.push(from);
    chain.reverse();

    let mut waypoints = Vec::new();
    let mut anchor = 0;
    while anchor + 1 < chain.len() {
        let mut far = anchor + 1;
        for probe in (anchor + 1..chain.len()).rev() {
            if line_walkable(grid, chain[anchor], chain[probe]) {
                far = probe;
                break;
            }
        }
        waypoints.push(chain[far]);
        anchor = far;
    }
    waypoints
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Cv5Entry, MiniTileFlags, TilesetData, Vf4Entry};

    fn tileset() -> TilesetData {
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

    /// 16x16 map with a wall at x=8, gap at y=12.
    fn gapped_grid() -> TerrainGrid {
        let mut ids = vec![0u16; 256];
        for y in 0..16 {
            if y != 12 {
                ids[y * 16 + 8] = 1 << 4;
            }
        }
        let mut grid = TerrainGrid::new(16, 16);
        grid.bake(&tileset(), &ids).unwrap();
        grid
    }

    #[test]
    fn test_long_path_crosses_gap() {
        let grid = gapped_grid();
        let regions = Regions::build(&grid);
        let src = regions.region_at_tile(&grid, Xy::new(1, 1)).unwrap();
        let dst = regions.region_at_tile(&grid, Xy::new(14, 1)).unwrap();
        // the gap keeps both sides in one region; degenerate but valid
        let path = long_path(&regions, src, dst).unwrap();
        assert_eq!(path.first(), Some(&src));
        assert_eq!(path.last(), Some(&dst));
    }

    #[test]
    fn test_long_path_unreachable_heads_closest() {
        // sealed wall: two walkable regions, no connection
        let mut ids = vec![0u16; 256];
        for y in 0..16 {
            ids[y * 16 + 8] = 1 << 4;
        }
        let mut grid = TerrainGrid::new(16, 16);
        grid.bake(&tileset(), &ids).unwrap();
        let regions = Regions::build(&grid);
        let src = regions.region_at_tile(&grid, Xy::new(1, 1)).unwrap();
        let dst = regions.region_at_tile(&grid, Xy::new(14, 1)).unwrap();
        assert_ne!(src, dst);
        let path = long_path(&regions, src, dst).unwrap();
        // cannot cross; path stays on the source side
        assert_eq!(path.first(), Some(&src));
        assert_ne!(path.last(), Some(&dst));
    }

    #[test]
    fn test_short_path_detours_through_gap() {
        let grid = gapped_grid();
        // wall row: must detour down through the gap at y = 12
        let from = Xy::new(40, 330);
        let to = Xy::new(460, 330);
        let path = short_path(&grid, from, to);
        assert!(path.len() > 1, "detour through the gap expected, got {path:?}");
        assert_eq!(*path.last().unwrap(), to);
    }

    #[test]
    fn test_short_path_direct_when_clear() {
        let grid = gapped_grid();
        let clear = short_path(&grid, Xy::new(40, 40), Xy::new(100, 40));
        assert_eq!(clear, vec![Xy::new(100, 40)]);
    }

    #[test]
    fn test_short_path_respects_occupied_tiles() {
        let mut grid = gapped_grid();
        // occupy the gap tile: route is now sealed inside the window
        grid.tile_mut(Xy::new(8, 12)).unwrap().flags |= TileFlags::OCCUPIED;
        let path = short_path(&grid, Xy::new(40, 390), Xy::new(460, 390));
        assert!(path.is_empty());
    }
}
