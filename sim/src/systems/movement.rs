//! The per-unit movement substrate.
//!
//! Each unit runs a small state machine every tick: at most one
//! time-consuming transition, with free transitions (initialization,
//! waypoint bookkeeping) allowed to cascade. Ground units plan over the
//! region graph, follow pixel waypoints, and slide around collision-enabled
//! blockers; flyers steer straight at their move target.

use crate::components::{MovementFlags, MovementState, Path, PathingFlags, StatusFlags, Target};
use crate::data::GameData;
use crate::errors::SimResult;
use crate::fixed::{velocity_from, xy_length, Direction, Fp8, Xy};
use crate::paths::{long_path, short_path};
use crate::state::SimState;
use crate::terrain::TerrainGrid;

/// Collisions tolerated while sliding before a re-plan.
const SLIDE_COLLISION_LIMIT: i32 = 8;
/// Re-plans tolerated before the move fails as unmovable.
const REPLAN_LIMIT: i32 = 3;
/// Frames a `MoveToLegal` unit may oscillate before giving up.
const MOVE_TO_LEGAL_FRAMES: i32 = 16;

impl SimState {
    /// Point the unit at a new move target, forcing a re-plan.
    pub fn set_move_target(&mut self, index: u16, target: Target) {
        let unit = self.unit_mut(index);
        if unit.flingy.move_target == target {
            return;
        }
        unit.flingy.move_target = target;
        unit.flingy.next_movement_waypoint = target.pos;
        unit.pathing_collision_counter = 0;
        unit.move_target_timer = 0;
        // flyers steer straight at the target; ground units re-plan
        if matches!(
            unit.movement_state,
            MovementState::AtRest
                | MovementState::StartPath
                | MovementState::FollowPath
                | MovementState::AtMoveTarget
                | MovementState::SlidePrep
                | MovementState::SlideFree
                | MovementState::RetryPath
                | MovementState::AnotherPath
                | MovementState::FailedPath
        ) {
            unit.movement_state = MovementState::NewMoveTarget;
        }
    }

    /// Stop in place: the current position becomes the move target.
    pub fn stop_unit(&mut self, index: u16) {
        let pos = self.unit(index).position();
        let unit = self.unit_mut(index);
        unit.flingy.move_target = Target { pos, unit: None };
        unit.flingy.next_movement_waypoint = pos;
        unit.flingy.current_speed = Fp8::ZERO;
        unit.flingy.movement_flags.remove(MovementFlags::MOVING | MovementFlags::ACCELERATING);
    }

    /// Ground a collidable unit may stand on: walkable mini-tiles on a
    /// tile not occupied by a building footprint.
    pub fn ground_passable(&self, pos: Xy) -> bool {
        if !self.terrain.is_walkable(pos) {
            return false;
        }
        self.terrain
            .tile(TerrainGrid::pixel_to_tile(pos))
            .is_some_and(|t| !t.flags.contains(crate::terrain::TileFlags::OCCUPIED))
    }

    /// True when the unit has arrived at its move target.
    pub fn at_move_target(&self, index: u16) -> bool {
        let unit = self.unit(index);
        unit.flingy.move_target.pos == unit.position()
    }

    /// One tick of the movement state machine.
    pub fn progress_unit_movement(&mut self, data: &GameData, index: u16) -> SimResult<()> {
        // free transitions cascade; each arm returns true to keep going
        for _ in 0..8 {
            let state = self.unit(index).movement_state;
            let again = match state {
                MovementState::Init => self.movement_init(data, index),
                MovementState::InitSeq => {
                    self.unit_mut(index).movement_state = MovementState::AtRest;
                    true
                }
                MovementState::Lump
                | MovementState::Bunker
                | MovementState::Hidden
                | MovementState::Dormant
                | MovementState::BldgTurret
                | MovementState::LumpWannabe => false,
                MovementState::Turret => {
                    self.movement_turret(data, index);
                    false
                }
                MovementState::Flyer => {
                    self.movement_flyer(data, index);
                    false
                }
                MovementState::AtRest => self.movement_at_rest(index),
                MovementState::NewMoveTarget => {
                    self.release_unit_path(index);
                    self.unit_mut(index).movement_state = MovementState::StartPath;
                    true
                }
                MovementState::StartPath => self.movement_start_path(data, index)?,
                MovementState::TurnAndStart | MovementState::FaceTarget => {
                    self.unit_mut(index).movement_state = MovementState::FollowPath;
                    true
                }
                MovementState::FollowPath => {
                    self.movement_follow_path(data, index);
                    false
                }
                MovementState::AnotherPath | MovementState::RetryPath => {
                    self.movement_retry_path(index)
                }
                MovementState::FailedPath => {
                    // unmovable: abandon the move where we stand
                    self.stop_unit(index);
                    self.unit_mut(index).movement_state = MovementState::AtMoveTarget;
                    true
                }
                MovementState::AtMoveTarget => {
                    self.release_unit_path(index);
                    let pos = self.unit(index).position();
                    let unit = self.unit_mut(index);
                    unit.flingy.move_target = Target { pos, unit: None };
                    unit.flingy.current_speed = Fp8::ZERO;
                    unit.flingy.movement_flags.remove(MovementFlags::MOVING);
                    unit.movement_state = MovementState::AtRest;
                    false
                }
                MovementState::FixCollision | MovementState::SlidePrep => {
                    self.movement_slide_prep(data, index);
                    false
                }
                MovementState::SlideFree => {
                    self.movement_slide_free(data, index);
                    false
                }
                MovementState::WaitFree | MovementState::GetFree => {
                    self.unit_mut(index).movement_state = MovementState::SlidePrep;
                    true
                }
                MovementState::CheckIllegal => self.movement_check_illegal(index),
                MovementState::MoveToLegal => {
                    self.movement_move_to_legal(data, index);
                    false
                }
                MovementState::UiOrderDelay | MovementState::ForcedMove => {
                    self.unit_mut(index).movement_state = MovementState::AtRest;
                    true
                }
            };
            if !again {
                break;
            }
        }
        Ok(())
    }

    fn movement_init(&mut self, data: &GameData, index: u16) -> bool {
        let unit = self.unit(index);
        let utype = &data.units[unit.unit_type.index()];
        let next = if unit.parent.is_some() && utype.flags.contains(crate::data::UnitTypeFlags::SUBUNIT) {
            MovementState::Turret
        } else if unit.is_hidden() {
            MovementState::Hidden
        } else if utype.is_building() {
            MovementState::Lump
        } else if unit.is_in_air() {
            MovementState::Flyer
        } else if unit.status_flags.contains(StatusFlags::CAN_MOVE) {
            MovementState::InitSeq
        } else {
            MovementState::Lump
        };
        self.unit_mut(index).movement_state = next;
        true
    }

    fn movement_at_rest(&mut self, index: u16) -> bool {
        if self.at_move_target(index) {
            return false;
        }
        if !self.unit(index).status_flags.contains(StatusFlags::CAN_MOVE) {
            return false;
        }
        // unwalkable footing first: escape before pathing
        let pos = self.unit(index).position();
        if self.unit(index).pathing_flags.contains(PathingFlags::COLLIDABLE)
            && !self.ground_passable(pos)
        {
            self.unit_mut(index).movement_state = MovementState::CheckIllegal;
            return true;
        }
        self.unit_mut(index).movement_state = MovementState::StartPath;
        true
    }

    fn movement_start_path(&mut self, data: &GameData, index: u16) -> SimResult<bool> {
        let from = self.unit(index).position();
        let to = self.unit(index).flingy.move_target.pos;
        let src_region = self.regions.region_at_pixel(&self.terrain, from);
        let dst_region = self.regions.region_at_pixel(&self.terrain, to);
        let regions = match (src_region, dst_region) {
            (Some(s), Some(d)) => long_path(&self.regions, s, d).unwrap_or_default(),
            _ => Vec::new(),
        };
        let waypoints = short_path(&self.terrain, from, to);
        if waypoints.is_empty() {
            self.unit_mut(index).movement_state = MovementState::RetryPath;
            return Ok(true);
        }
        let full = regions.len();
        let next = waypoints[0];
        let path = Path {
            creation_frame: self.frame,
            long_path: regions,
            full_long_path_size: full,
            short_path: waypoints,
            current_short_path_index: 0,
            source: from,
            destination: to,
            next,
            ..Path::default()
        };
        self.release_unit_path(index);
        match self.paths.allocate(path) {
            Ok(path_index) => {
                let unit = self.unit_mut(index);
                unit.path = Some(path_index);
                unit.flingy.next_movement_waypoint = next;
                unit.movement_state = MovementState::FollowPath;
                Ok(false)
            }
            Err(_) => {
                // path pool full: walk straight at the waypoint this tick
                log::debug!("path pool exhausted, unit {index} moves unplanned");
                self.unit_mut(index).flingy.next_movement_waypoint = next;
                self.unit_mut(index).movement_state = MovementState::FollowPath;
                Ok(false)
            }
        }
    }

    fn movement_retry_path(&mut self, index: u16) -> bool {
        let unit = self.unit_mut(index);
        unit.pathing_collision_counter += 1;
        if unit.pathing_collision_counter > REPLAN_LIMIT {
            unit.movement_state = MovementState::FailedPath;
        } else {
            unit.movement_state = MovementState::StartPath;
        }
        true
    }

    fn movement_follow_path(&mut self, data: &GameData, index: u16) {
        if self.at_move_target(index) {
            self.unit_mut(index).movement_state = MovementState::AtMoveTarget;
            return;
        }
        let waypoint = self.unit(index).flingy.next_movement_waypoint;
        let pos = self.unit(index).position();
        let step = self.advance_kinematics(data, index, waypoint);
        let new_pos = pos + step;

        // ground collision test against terrain and other collidable units
        if self.unit(index).pathing_flags.contains(PathingFlags::COLLIDABLE) {
            if !self.ground_passable(new_pos) {
                let unit = self.unit_mut(index);
                unit.flingy.exact_position = crate::fixed::XyFp8::from_xy(pos);
                unit.movement_state = MovementState::RetryPath;
                return;
            }
            if let Some(blocker) = self.ground_blocked(data, index, new_pos) {
                let speed = self.unit(index).flingy.current_speed;
                let path_index = self.unit(index).path;
                if let Some(path) = path_index.and_then(|p| self.paths.get_mut(p)) {
                    path.last_collision_unit = Some(blocker);
                    path.last_collision_speed = speed;
                }
                let unit = self.unit_mut(index);
                unit.flingy.exact_position = crate::fixed::XyFp8::from_xy(pos);
                unit.movement_state = MovementState::SlidePrep;
                return;
            }
        }

        self.set_unit_position(data, index, new_pos);
        self.after_position_change(data, index);

        // waypoint bookkeeping; snap the residual quantization error
        let arrived = xy_length(waypoint - new_pos) <= self.step_reach(index);
        if arrived {
            self.set_unit_position(data, index, waypoint);
            self.advance_waypoint(index, waypoint);
        }
    }

    fn advance_waypoint(&mut self, index: u16, reached: Xy) {
        let target = self.unit(index).flingy.move_target.pos;
        if reached == target {
            self.unit_mut(index).movement_state = MovementState::AtMoveTarget;
            return;
        }
        let Some(path_index) = self.unit(index).path else {
            self.unit_mut(index).flingy.next_movement_waypoint = target;
            return;
        };
        let next = {
            let path = self.paths.get_mut(path_index).expect("live path");
            path.current_short_path_index += 1;
            path.short_path.get(path.current_short_path_index).copied()
        };
        match next {
            Some(wp) => {
                let path = self.paths.get_mut(path_index).expect("live path");
                path.next = wp;
                self.unit_mut(index).flingy.next_movement_waypoint = wp;
            }
            None => self.unit_mut(index).movement_state = MovementState::AtMoveTarget,
        }
    }

    fn movement_slide_prep(&mut self, data: &GameData, index: u16) {
        let blocker = self
            .unit(index)
            .path
            .and_then(|p| self.paths.get(p))
            .and_then(|p| p.last_collision_unit)
            .and_then(|id| self.get_unit(id));
        let Some(blocker) = blocker else {
            self.unit_mut(index).movement_state = MovementState::FollowPath;
            return;
        };
        let already_chosen = self
            .unit(index)
            .path
            .and_then(|p| self.paths.get(p))
            .is_some_and(|p| p.slide_free_direction.is_some());
        if !already_chosen {
            // slide perpendicular to the blocker, on the side facing our goal
            let to_blocker =
                Direction::of(self.unit(blocker).position() - self.unit(index).position());
            let to_goal = Direction::of(
                self.unit(index).flingy.next_movement_waypoint - self.unit(index).position(),
            );
            let left = to_blocker - Direction::from_raw(64);
            let right = to_blocker + Direction::from_raw(64);
            let pick =
                if (to_goal - left).raw().unsigned_abs() <= (to_goal - right).raw().unsigned_abs() {
                    left
                } else {
                    right
                };
            if let Some(path_index) = self.unit(index).path {
                if let Some(path) = self.paths.get_mut(path_index) {
                    path.slide_free_direction = Some(pick);
                }
            }
        }
        self.unit_mut(index).movement_state = MovementState::SlideFree;
        let _ = data;
    }

    fn movement_slide_free(&mut self, data: &GameData, index: u16) {
        let pos = self.unit(index).position();
        let waypoint = self.unit(index).flingy.next_movement_waypoint;

        // resume the route as soon as the forward step is free again
        let forward = pos + self.step_toward(data, index, waypoint);
        if self.ground_passable(forward) && self.ground_blocked(data, index, forward).is_none() {
            if let Some(path_index) = self.unit(index).path {
                if let Some(path) = self.paths.get_mut(path_index) {
                    path.slide_free_direction = None;
                }
            }
            self.unit_mut(index).pathing_collision_counter = 0;
            self.unit_mut(index).movement_state = MovementState::FollowPath;
            return;
        }

        let dir = self
            .unit(index)
            .path
            .and_then(|p| self.paths.get(p))
            .and_then(|p| p.slide_free_direction)
            .unwrap_or(self.unit(index).flingy.heading);
        let speed = self.flingy_speed_cap(data, index).max(Fp8::integer(1));
        let step = velocity_from(dir, speed).to_xy();
        let new_pos = pos + step;

        let clear = self.ground_passable(new_pos)
            && self.ground_blocked(data, index, new_pos).is_none();
        if clear {
            self.set_unit_position(data, index, new_pos);
        } else {
            let unit = self.unit_mut(index);
            unit.pathing_collision_counter += 1;
            if unit.pathing_collision_counter > SLIDE_COLLISION_LIMIT {
                unit.movement_state = MovementState::RetryPath;
            }
        }
    }

    fn movement_check_illegal(&mut self, index: u16) -> bool {
        let pos = self.unit(index).position();
        if self.ground_passable(pos) {
            self.unit_mut(index).movement_state = MovementState::AtRest;
            return true;
        }
        self.unit_mut(index).move_target_timer = MOVE_TO_LEGAL_FRAMES;
        self.unit_mut(index).movement_state = MovementState::MoveToLegal;
        true
    }

    fn movement_move_to_legal(&mut self, data: &GameData, index: u16) {
        let pos = self.unit(index).position();
        if self.ground_passable(pos) {
            self.unit_mut(index).movement_state = MovementState::AtRest;
            return;
        }
        {
            let unit = self.unit_mut(index);
            unit.move_target_timer -= 1;
            if unit.move_target_timer <= 0 {
                // trapped: the order terminates where the unit stands
                unit.movement_state = MovementState::FailedPath;
                return;
            }
        }
        // spiral scan for the nearest walkable tile, row-major tie-break
        let tile = TerrainGrid::pixel_to_tile(pos);
        'scan: for radius in 1..=4i32 {
            for dy in -radius..=radius {
                for dx in -radius..=radius {
                    if dx.abs() != radius && dy.abs() != radius {
                        continue;
                    }
                    let probe = TerrainGrid::tile_center(tile + Xy::new(dx, dy));
                    if self.ground_passable(probe) {
                        let step = self.step_toward(data, index, probe);
                        let new_pos = pos + step;
                        self.set_unit_position(data, index, new_pos);
                        break 'scan;
                    }
                }
            }
        }
    }

    fn movement_flyer(&mut self, data: &GameData, index: u16) {
        if self.at_move_target(index) {
            return;
        }
        let target = self.unit(index).flingy.move_target.pos;
        let pos = self.unit(index).position();
        let step = self.advance_kinematics(data, index, target);
        let new_pos = pos + step;
        self.set_unit_position(data, index, new_pos);
        self.after_position_change(data, index);
        if xy_length(target - new_pos) <= self.step_reach(index) {
            self.set_unit_position(data, index, target);
            self.stop_unit(index);
        }
    }

    fn movement_turret(&mut self, data: &GameData, index: u16) {
        // turrets ride their parent; heading is their own
        if let Some(parent) = self.unit(index).parent.and_then(|p| self.get_unit(p)) {
            let pos = self.unit(parent).position();
            if pos != self.unit(index).position() {
                self.set_unit_position(data, index, pos);
            }
        }
    }

    // ========================================================================
    // KINEMATICS
    // ========================================================================

    /// Top speed after status modifiers: stim doubles, ensnare halves.
    pub fn flingy_speed_cap(&self, data: &GameData, index: u16) -> Fp8 {
        let unit = self.unit(index);
        let mut speed = unit.flingy.top_speed;
        if unit.status_flags.contains(StatusFlags::SPEED_UPGRADE) {
            speed = speed + speed / 2;
        }
        if unit.stim_timer > 0 {
            speed = speed * 2;
        }
        if unit.ensnare_timer > 0 {
            speed = speed / 2;
        }
        let _ = data;
        speed
    }

    /// Pixels the unit may close this tick and still count as arrived.
    fn step_reach(&self, index: u16) -> i32 {
        self.unit(index).flingy.current_speed.integer_part().max(1) + 1
    }

    /// Turn toward and accelerate at `waypoint`; returns this tick's pixel
    /// step. Updates heading, speed, velocity and the sprite facing.
    fn advance_kinematics(&mut self, data: &GameData, index: u16, waypoint: Xy) -> Xy {
        let pos = self.unit(index).position();
        let desired = Direction::of(waypoint - pos);
        let turn_rate = self.unit(index).flingy.turn_rate;
        let heading = self.unit(index).flingy.heading;
        let new_heading = if self.unit(index).status_flags.contains(StatusFlags::CAN_TURN) {
            heading.turn_towards(desired, turn_rate)
        } else {
            heading
        };

        let cap = self.flingy_speed_cap(data, index);
        let accel = self.unit(index).flingy.acceleration;
        let dist = xy_length(waypoint - pos);
        {
            let unit = self.unit_mut(index);
            unit.flingy.heading = new_heading;
            unit.flingy.desired_velocity_direction = desired;
            unit.flingy.next_velocity_direction = new_heading;
            unit.flingy.current_velocity_direction = new_heading;

            // brake inside the stop window, floored at half the cap so
            // the approach never crawls
            let halting = Fp8::integer(dist) <= unit.flingy.top_speed * 4;
            if halting && unit.flingy.current_speed > cap / 2 {
                unit.flingy.current_speed = (unit.flingy.current_speed - accel).max(cap / 2);
                unit.flingy.movement_flags |= MovementFlags::BRAKING;
            } else {
                unit.flingy.current_speed = (unit.flingy.current_speed + accel).min(cap);
                unit.flingy.movement_flags.remove(MovementFlags::BRAKING);
                unit.flingy.movement_flags |= MovementFlags::ACCELERATING;
            }
            unit.flingy.movement_flags |= MovementFlags::MOVING;
            unit.flingy.next_speed = unit.flingy.current_speed;
        }

        let speed = self.unit(index).flingy.current_speed;
        // never overshoot the waypoint
        let speed = speed.min(Fp8::integer(dist));
        let velocity = velocity_from(new_heading, speed);
        let exact = self.unit(index).flingy.exact_position + velocity;
        let step = exact.to_xy() - pos;
        {
            let unit = self.unit_mut(index);
            unit.flingy.velocity = velocity;
            unit.flingy.exact_position = exact;
        }
        step
    }

    /// One bounded step straight toward `target`, ignoring planning.
    fn step_toward(&mut self, data: &GameData, index: u16, target: Xy) -> Xy {
        let pos = self.unit(index).position();
        let dir = Direction::of(target - pos);
        let speed = self.flingy_speed_cap(data, index).max(Fp8::integer(1));
        velocity_from(dir, speed.min(Fp8::integer(xy_length(target - pos)))).to_xy()
    }

    /// Keep the sprite facing and subpixel bookkeeping coherent after the
    /// integrated position moved.
    fn after_position_change(&mut self, data: &GameData, index: u16) {
        let heading = self.unit(index).flingy.heading;
        let main = self.sprite_main_image(self.unit(index).sprite);
        if let Some(main) = main {
            self.set_image_heading(data, main, heading);
        }
        // the integer position may have been clamped by the map border
        let pos = self.unit(index).position();
        let exact = self.unit(index).flingy.exact_position.to_xy();
        if exact != pos {
            let unit = self.unit_mut(index);
            unit.flingy.exact_position = crate::fixed::XyFp8::from_xy(pos);
        }
    }

    fn release_unit_path(&mut self, index: u16) {
        if let Some(path) = self.unit_mut(index).path.take() {
            let _ = self.paths.release(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    fn moving_world() -> (SimState, std::sync::Arc<GameData>, u16) {
        let data = std::sync::Arc::new(fixtures::game_data());
        let mut state = fixtures::blank_state(64, 64, 7);
        let id = state
            .place_completed_unit(&data, fixtures::MARINE, 0, Xy::new(100, 100))
            .unwrap();
        (state, data, id.index())
    }

    fn run_movement(state: &mut SimState, data: &GameData, index: u16, ticks: usize) {
        for _ in 0..ticks {
            state.progress_unit_movement(data, index).unwrap();
        }
    }

    #[test]
    fn test_unit_walks_to_move_target() {
        let (mut state, data, index) = moving_world();
        state.progress_unit_movement(&data, index).unwrap(); // leave Init
        state.set_move_target(index, Target { pos: Xy::new(400, 100), unit: None });
        run_movement(&mut state, &data, index, 200);
        assert_eq!(state.unit(index).position(), Xy::new(400, 100));
        assert_eq!(state.unit(index).movement_state, MovementState::AtRest);
        assert!(state.at_move_target(index));
        // path recycled on arrival
        assert!(state.unit(index).path.is_none());
        assert_eq!(state.paths.len(), 0);
    }

    #[test]
    fn test_two_runs_take_identical_trajectories() {
        let (mut a, data, index_a) = moving_world();
        let (mut b, _, index_b) = moving_world();
        a.set_move_target(index_a, Target { pos: Xy::new(500, 420), unit: None });
        b.set_move_target(index_b, Target { pos: Xy::new(500, 420), unit: None });
        for _ in 0..150 {
            a.progress_unit_movement(&data, index_a).unwrap();
            b.progress_unit_movement(&data, index_b).unwrap();
            assert_eq!(a.unit(index_a).position(), b.unit(index_b).position());
            assert_eq!(a.unit(index_a).flingy.heading, b.unit(index_b).flingy.heading);
        }
    }

    #[test]
    fn test_collision_slides_around_blocker() {
        let (mut state, data, index) = moving_world();
        // park another marine directly on the route
        state
            .place_completed_unit(&data, fixtures::MARINE, 1, Xy::new(160, 100))
            .unwrap();
        state.progress_unit_movement(&data, index).unwrap();
        state.set_move_target(index, Target { pos: Xy::new(300, 100), unit: None });
        run_movement(&mut state, &data, index, 300);
        // the mover got past the blocker and reached the goal
        assert_eq!(state.unit(index).position(), Xy::new(300, 100));
    }

    #[test]
    fn test_flyer_ignores_ground_blockers() {
        let data = std::sync::Arc::new(fixtures::game_data());
        let mut state = fixtures::blank_state(64, 64, 7);
        let flyer = state
            .place_completed_unit(&data, fixtures::OBSERVER, 0, Xy::new(100, 100))
            .unwrap()
            .index();
        state
            .place_completed_unit(&data, fixtures::MARINE, 1, Xy::new(160, 100))
            .unwrap();
        state.progress_unit_movement(&data, flyer).unwrap();
        assert_eq!(state.unit(flyer).movement_state, MovementState::Flyer);
        state.set_move_target(flyer, Target { pos: Xy::new(300, 100), unit: None });
        run_movement(&mut state, &data, flyer, 200);
        assert_eq!(state.unit(flyer).position(), Xy::new(300, 100));
    }
}
