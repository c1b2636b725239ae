//! Entity records.
//!
//! Pure data containers for everything that lives in the arenas: units,
//! sprites, images, bullets, queued orders and paths, plus the per-player
//! record. All cross-references are arena indices or generation-tagged
//! ids; the structs carry no behavior beyond small accessors, and all of
//! them serialize as part of the world snapshot.

use crate::data::{FlingyId, ImageTypeId, OrderTypeId, SpriteTypeId, TechId, UnitTypeId, UpgradeId, WeaponId};
use crate::fixed::{Direction, Fp8, Xy, XyFp8};
use crate::iscript::IscriptState;
use serde::{Deserialize, Serialize};

// ============================================================================
// IDENTIFIERS
// ============================================================================

/// Generation-tagged unit identifier: 11 bits of index, 5 of generation.
///
/// Stale ids (the slot was released and possibly reused since) fail the
/// lookup instead of resolving to the new occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct UnitId(pub u16);

impl UnitId {
    pub fn new(index: u16, generation: u8) -> UnitId {
        UnitId((index & 0x7ff) | (u16::from(generation & 0x1f) << 11))
    }

    #[inline]
    pub fn index(self) -> u16 {
        self.0 & 0x7ff
    }

    #[inline]
    pub fn generation(self) -> u8 {
        (self.0 >> 11) as u8
    }
}

// ============================================================================
// FLAG WORDS
// ============================================================================

bitflags::bitflags! {
    /// Unit status word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct StatusFlags: u32 {
        const COMPLETED               = 0x0000_0001;
        const GROUNDED_BUILDING       = 0x0000_0002;
        const IN_AIR                  = 0x0000_0004;
        const BURROWED                = 0x0000_0010;
        const IN_BUNKER               = 0x0000_0020;
        const LOADED                  = 0x0000_0040;
        const REQUIRES_DETECTOR       = 0x0000_0100;
        const CLOAKED                 = 0x0000_0200;
        const DISABLED                = 0x0000_0400;
        const PASSIVELY_CLOAKED       = 0x0000_0800;
        const ORDER_NOT_INTERRUPTIBLE = 0x0000_1000;
        const ISCRIPT_NOBRK           = 0x0000_2000;
        const CANNOT_ATTACK           = 0x0000_8000;
        const CAN_TURN                = 0x0001_0000;
        const CAN_MOVE                = 0x0002_0000;
        const COLLISION               = 0x0004_0000;
        const IMMOVABLE               = 0x0008_0000;
        const GROUND_UNIT             = 0x0010_0000;
        const NO_COLLIDE              = 0x0020_0000;
        const GATHERING               = 0x0080_0000;
        const TURRET_WALKING          = 0x0100_0000;
        const INVINCIBLE              = 0x0400_0000;
        const READY_TO_ATTACK         = 0x0800_0000;
        const SPEED_UPGRADE           = 0x1000_0000;
        const COOLDOWN_UPGRADE        = 0x2000_0000;
        const HALLUCINATION           = 0x4000_0000;
        const LIFETIME_EXPIRED        = 0x8000_0000;
    }
}

bitflags::bitflags! {
    /// Per-tick kinematic flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct MovementFlags: u8 {
        const ACCELERATING    = 0x01;
        const BRAKING         = 0x02;
        const STARTING_ATTACK = 0x04;
        const MOVING          = 0x08;
        const TURNING         = 0x10;
        const HOVER           = 0x40;
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct PathingFlags: u8 {
        /// Unit participates in ground collision.
        const COLLIDABLE      = 0x01;
        /// A re-plan was requested.
        const REQUEST_PATH    = 0x02;
        /// Ignore collisions until free of overlap.
        const TEMP_NO_COLLIDE = 0x04;
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct SpriteFlags: u8 {
        const SELECTED      = 0x08;
        const TURRET        = 0x10;
        const HIDDEN        = 0x20;
        const BURROWED      = 0x40;
        const ISCRIPT_NOBRK = 0x80;
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct ImageFlags: u8 {
        const REDRAW              = 0x01;
        const FLIPPED             = 0x02;
        const Y_FROZEN            = 0x04;
        const HIDDEN              = 0x40;
        const USES_SPECIAL_OFFSET = 0x80;
    }
}

// ============================================================================
// MOVEMENT STATES
// ============================================================================

/// The per-unit movement state machine. At most one time-consuming
/// transition runs per tick; free transitions may cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MovementState {
    #[default]
    Init,
    InitSeq,
    Lump,
    LumpWannabe,
    Turret,
    BldgTurret,
    Bunker,
    Hidden,
    Flyer,
    AtRest,
    Dormant,
    AtMoveTarget,
    CheckIllegal,
    MoveToLegal,
    FailedPath,
    RetryPath,
    StartPath,
    UiOrderDelay,
    TurnAndStart,
    FaceTarget,
    NewMoveTarget,
    AnotherPath,
    FollowPath,
    FixCollision,
    WaitFree,
    GetFree,
    SlidePrep,
    SlideFree,
    ForcedMove,
}

// ============================================================================
// SHARED SUB-RECORDS
// ============================================================================

/// A position plus an optional unit, the universal targeting pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub pos: Xy,
    pub unit: Option<UnitId>,
}

/// Order target: position, unit, and the type filter used by build orders.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct OrderTarget {
    pub pos: Xy,
    pub unit: Option<UnitId>,
    pub unit_type: Option<UnitTypeId>,
}

/// The mobile-object core shared by units and bullets: position, heading
/// and the velocity integrator driven by the flingy parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Flingy {
    pub flingy_id: FlingyId,
    /// 0 = data-table control, 1 = partially mobile, 2 = iscript control.
    pub movement_type: u8,
    pub position: Xy,
    pub exact_position: XyFp8,
    pub heading: Direction,
    pub next_velocity_direction: Direction,
    pub current_velocity_direction: Direction,
    pub desired_velocity_direction: Direction,
    pub top_speed: Fp8,
    pub current_speed: Fp8,
    pub next_speed: Fp8,
    pub velocity: XyFp8,
    pub acceleration: Fp8,
    pub turn_rate: Fp8,
    pub move_target: Target,
    pub next_movement_waypoint: Xy,
    pub next_target_waypoint: Xy,
    pub movement_flags: MovementFlags,
}

// ============================================================================
// UNITS
// ============================================================================

/// Worker-role scratch state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerState {
    pub gather_target: Option<UnitId>,
    pub target_resource_pos: Xy,
    pub resources_carried: i32,
    pub carrying_minerals: bool,
    pub carrying_gas: bool,
    pub is_gathering: bool,
    pub repair_timer: i32,
}

/// Resource-container scratch state (mineral fields, geysers).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceState {
    pub resource_count: i32,
    pub is_being_gathered: bool,
}

/// Building-role scratch state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildingState {
    pub rally: Target,
    pub larva_timer: i32,
    pub creep_timer: i32,
    pub addon: Option<UnitId>,
    pub researching: Option<TechId>,
    pub upgrading: Option<UpgradeId>,
    pub upgrading_level: i32,
    pub upgrade_research_time: i32,
    pub resource: ResourceState,
}

/// A live unit. Flattened from the original thingy/flingy/unit cascade;
/// the flingy core is an embedded sub-record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Unit {
    pub owner: u8,
    pub unit_type: UnitTypeId,
    pub flingy: Flingy,
    pub sprite: u16,

    pub hp: Fp8,
    pub shields: Fp8,
    pub energy: Fp8,
    pub previous_hp: i32,

    pub order_type: OrderTypeId,
    pub order_state: i32,
    pub order_target: OrderTarget,
    pub order_unit_type: Option<UnitTypeId>,
    /// Head of the pooled order queue.
    pub order_queue_head: Option<u16>,
    pub order_queue_count: i32,
    pub main_order_timer: i32,
    pub order_process_timer: i32,
    /// Bits set by iscript `sigorder` / cleared by `orderdone`.
    pub order_signal: u8,

    pub secondary_order_type: Option<OrderTypeId>,
    pub secondary_order_state: i32,
    pub secondary_order_timer: i32,

    pub ground_weapon_cooldown: i32,
    pub air_weapon_cooldown: i32,
    pub spell_cooldown: i32,

    pub status_flags: StatusFlags,
    pub movement_state: MovementState,
    pub pathing_flags: PathingFlags,
    pub pathing_collision_counter: i32,
    pub move_target_timer: i32,
    pub path: Option<u16>,

    pub subunit: Option<UnitId>,
    /// Parent for subunits and fighters.
    pub parent: Option<UnitId>,
    pub fighters: Vec<UnitId>,
    pub loaded_units: [Option<UnitId>; 8],
    pub auto_target: Option<UnitId>,
    pub connected_unit: Option<UnitId>,
    pub spider_mine_count: i32,

    pub build_queue: Vec<UnitTypeId>,
    pub current_build_unit: Option<UnitId>,
    pub remaining_build_time: i32,
    pub hp_construction_rate: Fp8,

    pub worker: WorkerState,
    pub building: BuildingState,

    pub kill_count: i32,
    pub last_attacking_player: u8,
    pub cycle_counter: i32,

    pub remove_timer: i32,
    pub defensive_matrix_hp: Fp8,
    pub defensive_matrix_timer: i32,
    pub stim_timer: i32,
    pub ensnare_timer: i32,
    pub lockdown_timer: i32,
    pub irradiate_timer: i32,
    pub irradiated_by: Option<UnitId>,
    pub stasis_timer: i32,
    pub plague_timer: i32,
    pub storm_timer: i32,
    pub maelstrom_timer: i32,
    pub blinded_by: u8,
    pub parasite_flags: u8,
    pub acid_spore_count: i32,
    pub acid_spore_time: [i32; 9],
    pub detected_flags: u32,
}

impl Unit {
    #[inline]
    pub fn position(&self) -> Xy {
        self.flingy.position
    }

    pub fn is_completed(&self) -> bool {
        self.status_flags.contains(StatusFlags::COMPLETED)
    }

    pub fn is_in_air(&self) -> bool {
        self.status_flags.contains(StatusFlags::IN_AIR)
    }

    pub fn is_hidden(&self) -> bool {
        self.status_flags.intersects(
            StatusFlags::BURROWED | StatusFlags::LOADED | StatusFlags::IN_BUNKER,
        )
    }

    pub fn is_disabled(&self) -> bool {
        self.status_flags.contains(StatusFlags::DISABLED)
            || self.stasis_timer > 0
            || self.lockdown_timer > 0
            || self.maelstrom_timer > 0
    }

    pub fn is_hallucination(&self) -> bool {
        self.status_flags.contains(StatusFlags::HALLUCINATION)
    }
}

/// A queued order, linked through the order pool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_type: OrderTypeId,
    pub target: OrderTarget,
    pub next: Option<u16>,
}

// ============================================================================
// SPRITES AND IMAGES
// ============================================================================

/// A z-ordered sprite: a position plus a layered list of images.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Sprite {
    pub sprite_type: SpriteTypeId,
    pub owner: u8,
    pub position: Xy,
    pub elevation_level: i32,
    /// Per-player visibility bits.
    pub visibility_flags: u8,
    pub flags: SpriteFlags,
    pub selection_timer: i32,
    pub width: i32,
    pub height: i32,
    pub main_image: Option<u16>,
    /// Image indices ordered top overlay first, deepest underlay last.
    pub images: Vec<u16>,
}

/// One layered image running an iscript program.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Image {
    pub image_type: ImageTypeId,
    pub sprite: u16,
    pub offset: Xy,
    pub flags: ImageFlags,
    pub modifier: i32,
    pub frame_index_offset: u16,
    pub frame_index_base: u16,
    pub frame_index: u16,
    pub iscript: IscriptState,
}

// ============================================================================
// BULLETS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BulletState {
    #[default]
    Init,
    Move,
    Follow,
    Bounce,
    DamageOverTime,
    Dying,
    HitNearTarget,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Bullet {
    pub flingy: Flingy,
    pub sprite: u16,
    pub state: BulletState,
    pub weapon: WeaponId,
    pub owner: u8,
    pub source_unit: Option<UnitId>,
    pub target_unit: Option<UnitId>,
    pub target_pos: Xy,
    pub remaining_time: i32,
    pub remaining_bounces: i32,
    pub prev_bounce_unit: Option<UnitId>,
    pub hit_flags: u8,
}

// ============================================================================
// PATHS
// ============================================================================

/// A planned route: region sequence plus pixel waypoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Path {
    pub creation_frame: u32,
    pub state_flags: u32,
    /// Region indices from source to destination.
    pub long_path: Vec<u16>,
    pub full_long_path_size: usize,
    pub current_long_path_index: usize,
    /// Pixel waypoints within the current region window.
    pub short_path: Vec<Xy>,
    pub current_short_path_index: usize,
    pub source: Xy,
    pub destination: Xy,
    pub next: Xy,
    pub last_collision_unit: Option<UnitId>,
    pub last_collision_speed: Fp8,
    pub slide_free_direction: Option<Direction>,
}

// ============================================================================
// PLAYERS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Controller {
    #[default]
    Inactive,
    Computer,
    Occupied,
    RescuePassive,
    Neutral,
    Open,
    Closed,
    UserLeft,
    ComputerDefeated,
}

/// Supply ledger for one race, in half-supply units.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Supply {
    pub used: i32,
    pub provided: i32,
    pub max: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Player {
    pub controller: Controller,
    pub race: crate::data::Race,
    pub force: u8,
    pub color: u8,
    pub minerals: i32,
    pub gas: i32,
    /// Indexed by race: zerg, terran, protoss.
    pub supply: [Supply; 3],
    pub upgrade_levels: Vec<u8>,
    pub tech_researched: Vec<bool>,
    /// Bitmask of players this player shares vision with (self included).
    pub shared_vision: u8,
    pub victory_state: i32,
    pub initially_active: bool,
    /// Actions observed, for APM bookkeeping.
    pub action_count: u32,
    /// Fractional minerals accumulated by continuous mining.
    pub mining_remainder: Fp8,
}

impl Player {
    pub fn is_active(&self) -> bool {
        matches!(self.controller, Controller::Occupied | Controller::Computer)
    }
}

/// One player's current selection, capped at 12 units.
pub const MAX_SELECTION: usize = 12;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_id_packing() {
        let id = UnitId::new(1699, 17);
        assert_eq!(id.index(), 1699);
        assert_eq!(id.generation(), 17);
        // generation wraps into 5 bits
        let wrapped = UnitId::new(3, 33);
        assert_eq!(wrapped.generation(), 1);
    }

    #[test]
    fn test_hidden_covers_loaded_and_burrowed() {
        let mut u = Unit::default();
        assert!(!u.is_hidden());
        u.status_flags |= StatusFlags::BURROWED;
        assert!(u.is_hidden());
        u.status_flags = StatusFlags::IN_BUNKER;
        assert!(u.is_hidden());
    }

    #[test]
    fn test_disabled_includes_stasis() {
        let mut u = Unit::default();
        u.stasis_timer = 5;
        assert!(u.is_disabled());
    }
}
