//! Static data tables.
//!
//! Read-only descriptors for every unit, weapon, flingy, sprite, image,
//! order, upgrade and tech kind, loaded once at startup and shared by all
//! worlds through `Arc<GameData>`. The kernel never mutates these.
//!
//! The on-disk form is the packed little-endian column-major layout of the
//! original `.dat` files: each table is `columns × record_count` integers,
//! one column's values stored contiguously before the next column begins.
//! Integer columns cast into the rich types (`Fp8` speeds via `from_raw`,
//! direction turn rates, typed ids) on load.

use crate::errors::{SimError, SimResult};
use crate::fixed::Fp8;
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

// ============================================================================
// TYPED IDS
// ============================================================================

macro_rules! table_id {
    ($name:ident, $raw:ty) => {
        #[derive(
            Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(pub $raw);

        impl $name {
            #[inline]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

table_id!(UnitTypeId, u16);
table_id!(WeaponId, u8);
table_id!(FlingyId, u16);
table_id!(SpriteTypeId, u16);
table_id!(ImageTypeId, u16);
table_id!(OrderTypeId, u8);
table_id!(UpgradeId, u8);
table_id!(TechId, u8);
table_id!(SoundId, u16);
table_id!(IscriptId, u16);

/// The order ids the kernel knows by name. Numbering follows the original
/// order table; ids outside the implemented set still parse and resolve
/// through `OrderData`, they just have no special-cased handler.
pub mod orders {
    use super::OrderTypeId;

    pub const DIE: OrderTypeId = OrderTypeId(0);
    pub const STOP: OrderTypeId = OrderTypeId(1);
    pub const GUARD: OrderTypeId = OrderTypeId(2);
    pub const PLAYER_GUARD: OrderTypeId = OrderTypeId(3);
    pub const TURRET_GUARD: OrderTypeId = OrderTypeId(4);
    pub const BUNKER_GUARD: OrderTypeId = OrderTypeId(5);
    pub const MOVE: OrderTypeId = OrderTypeId(6);
    pub const ATTACK1: OrderTypeId = OrderTypeId(8);
    pub const ATTACK2: OrderTypeId = OrderTypeId(9);
    pub const ATTACK_UNIT: OrderTypeId = OrderTypeId(10);
    pub const ATTACK_FIXED_RANGE: OrderTypeId = OrderTypeId(11);
    pub const ATTACK_MOVE: OrderTypeId = OrderTypeId(14);
    pub const TOWER_GUARD: OrderTypeId = OrderTypeId(18);
    pub const TOWER_ATTACK: OrderTypeId = OrderTypeId(19);
    pub const TURRET_ATTACK: OrderTypeId = OrderTypeId(22);
    pub const NOTHING: OrderTypeId = OrderTypeId(23);
    pub const DRONE_START_BUILD: OrderTypeId = OrderTypeId(25);
    pub const CAST_INFESTATION: OrderTypeId = OrderTypeId(27);
    pub const PLACE_BUILDING: OrderTypeId = OrderTypeId(30);
    pub const CONSTRUCTING_BUILDING: OrderTypeId = OrderTypeId(33);
    pub const REPAIR: OrderTypeId = OrderTypeId(34);
    pub const PLACE_ADDON: OrderTypeId = OrderTypeId(36);
    pub const TRAIN: OrderTypeId = OrderTypeId(38);
    pub const RALLY_POINT_UNIT: OrderTypeId = OrderTypeId(39);
    pub const RALLY_POINT_TILE: OrderTypeId = OrderTypeId(40);
    pub const ZERG_BIRTH: OrderTypeId = OrderTypeId(41);
    pub const ZERG_UNIT_MORPH: OrderTypeId = OrderTypeId(42);
    pub const INCOMPLETE_BUILDING: OrderTypeId = OrderTypeId(44);
    pub const FOLLOW: OrderTypeId = OrderTypeId(49);
    pub const RESEARCH_TECH: OrderTypeId = OrderTypeId(75);
    pub const UPGRADE: OrderTypeId = OrderTypeId(76);
    pub const LARVA: OrderTypeId = OrderTypeId(77);
    pub const SPAWNING_LARVA: OrderTypeId = OrderTypeId(78);
    pub const MOVE_TO_GAS: OrderTypeId = OrderTypeId(81);
    pub const WAIT_FOR_GAS: OrderTypeId = OrderTypeId(82);
    pub const HARVEST_GAS: OrderTypeId = OrderTypeId(83);
    pub const RETURN_GAS: OrderTypeId = OrderTypeId(84);
    pub const MOVE_TO_MINERALS: OrderTypeId = OrderTypeId(85);
    pub const WAIT_FOR_MINERALS: OrderTypeId = OrderTypeId(86);
    pub const MINING_MINERALS: OrderTypeId = OrderTypeId(87);
    pub const RETURN_MINERALS: OrderTypeId = OrderTypeId(90);
    pub const ENTER_TRANSPORT: OrderTypeId = OrderTypeId(92);
    pub const PICKUP_TRANSPORT: OrderTypeId = OrderTypeId(94);
    pub const HOLD_POSITION: OrderTypeId = OrderTypeId(107);
    pub const UNLOAD: OrderTypeId = OrderTypeId(111);
    pub const BURROWING: OrderTypeId = OrderTypeId(116);
    pub const BURROWED: OrderTypeId = OrderTypeId(117);
    pub const UNBURROWING: OrderTypeId = OrderTypeId(118);
    pub const CAST_SCANNER_SWEEP: OrderTypeId = OrderTypeId(139);
    pub const SCANNER: OrderTypeId = OrderTypeId(140);
    pub const RESET_COLLISION: OrderTypeId = OrderTypeId(150);
    pub const PATROL: OrderTypeId = OrderTypeId(152);
    pub const COMPUTER_AI: OrderTypeId = OrderTypeId(156);
    pub const HEAL_MOVE: OrderTypeId = OrderTypeId(177);
    pub const MEDIC_HEAL_TO_IDLE: OrderTypeId = OrderTypeId(179);
}

// ============================================================================
// ENUMS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Race {
    Zerg,
    Terran,
    Protoss,
    #[default]
    None,
}

impl Race {
    pub fn from_u8(v: u8) -> SimResult<Race> {
        Ok(match v {
            0 => Race::Zerg,
            1 => Race::Terran,
            2 => Race::Protoss,
            3 => Race::None,
            _ => return Err(SimError::InvalidInput(format!("race out of range: {v}"))),
        })
    }
}

/// Target size class for the damage matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UnitSize {
    #[default]
    Independent,
    Small,
    Medium,
    Large,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DamageType {
    #[default]
    Independent,
    Explosive,
    Concussive,
    Normal,
    IgnoreArmor,
}

/// What a bullet does between launch and impact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WeaponBehavior {
    #[default]
    Fly,
    AppearOnTargetUnit,
    AppearOnTargetSite,
    AppearOnAttacker,
    PersistOnTargetSite,
    GotoMaxRange,
    Bounce,
    SuicideUnit,
    AttackTarget3x3Area,
}

impl WeaponBehavior {
    pub fn from_u8(v: u8) -> SimResult<Self> {
        Ok(match v {
            0 => Self::Fly,
            1 => Self::AppearOnTargetUnit,
            2 => Self::AppearOnTargetSite,
            3 => Self::AppearOnAttacker,
            4 => Self::PersistOnTargetSite,
            5 => Self::GotoMaxRange,
            6 => Self::Bounce,
            7 => Self::SuicideUnit,
            8 => Self::AttackTarget3x3Area,
            _ => return Err(SimError::InvalidInput(format!("weapon behavior out of range: {v}"))),
        })
    }
}

/// Splash pattern selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HitType {
    #[default]
    None,
    RadialSplash,
    EnemySplash,
    NormalHit,
}

// ============================================================================
// TABLE RECORDS
// ============================================================================

bitflags::bitflags! {
    /// Per-unit-type capability flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct UnitTypeFlags: u32 {
        const BUILDING           = 0x0000_0001;
        const ADDON              = 0x0000_0002;
        const FLYER              = 0x0000_0004;
        const WORKER             = 0x0000_0008;
        const SUBUNIT            = 0x0000_0010;
        const FLYING_BUILDING    = 0x0000_0020;
        const HERO               = 0x0000_0040;
        const REGENERATES_HP     = 0x0000_0080;
        const SPELLCASTER        = 0x0000_0100;
        const PERMANENT_CLOAK    = 0x0000_0200;
        const INVINCIBLE         = 0x0000_0400;
        const MECHANICAL         = 0x0000_0800;
        const ORGANIC            = 0x0000_1000;
        const RESOURCE_DEPOT     = 0x0000_2000;
        const RESOURCE_CONTAINER = 0x0000_4000;
        const DETECTOR           = 0x0000_8000;
        const PRODUCTION         = 0x0001_0000;
        const CAN_TURN           = 0x0002_0000;
        const CAN_MOVE           = 0x0004_0000;
        const HAS_ENERGY         = 0x0008_0000;
        const SINGLE_SELECT      = 0x0010_0000;
        const CAN_BURROW         = 0x0020_0000;
        const USES_LARVA         = 0x0040_0000;
        const TRANSPORT          = 0x0080_0000;
    }
}

/// One record of the unit table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnitTypeData {
    pub flingy: FlingyId,
    pub subunit: Option<UnitTypeId>,
    /// Bounding-box extents from the center: left, up, right, down.
    pub dimensions: [i32; 4],
    /// Placement footprint in pixels (buildings), width x height.
    pub placement: [i32; 2],
    pub hit_points: Fp8,
    pub shield_points: i32,
    pub has_shields: bool,
    pub armor: i32,
    pub armor_upgrade: Option<UpgradeId>,
    pub build_time: i32,
    pub mineral_cost: i32,
    pub gas_cost: i32,
    /// Supply in half units, the way the original stores zergling halves.
    pub supply_provided: i32,
    pub supply_required: i32,
    pub race: Race,
    pub sight_range: i32,
    pub ground_weapon: Option<WeaponId>,
    pub air_weapon: Option<WeaponId>,
    pub unit_size: UnitSize,
    pub elevation_level: i32,
    pub right_click_action: u8,
    /// Order taken when the unit goes idle.
    pub return_to_idle: OrderTypeId,
    /// Order issued to attack a unit target.
    pub attack_unit: OrderTypeId,
    /// Idle order for human-owned units.
    pub human_ai_idle: OrderTypeId,
    /// Idle order for computer-owned units.
    pub computer_ai_idle: OrderTypeId,
    pub flags: UnitTypeFlags,
}

impl UnitTypeData {
    pub fn is_building(&self) -> bool {
        self.flags.contains(UnitTypeFlags::BUILDING)
    }

    pub fn is_flyer(&self) -> bool {
        self.flags.contains(UnitTypeFlags::FLYER)
    }

    pub fn is_worker(&self) -> bool {
        self.flags.contains(UnitTypeFlags::WORKER)
    }

    pub fn max_energy(&self) -> Fp8 {
        if self.flags.contains(UnitTypeFlags::HERO) {
            Fp8::integer(250)
        } else {
            Fp8::integer(200)
        }
    }

    /// Half-open bounding box around `center` in pixels.
    pub fn bounds(&self, center: crate::fixed::Xy) -> crate::fixed::Rect {
        crate::fixed::Rect::new(
            crate::fixed::Xy::new(center.x - self.dimensions[0], center.y - self.dimensions[1]),
            crate::fixed::Xy::new(center.x + self.dimensions[2] + 1, center.y + self.dimensions[3] + 1),
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WeaponData {
    pub damage_amount: i32,
    pub damage_bonus: i32,
    /// Base cooldown in frames.
    pub cooldown: i32,
    pub damage_factor: i32,
    pub upgrade: Option<UpgradeId>,
    pub damage_type: DamageType,
    pub behavior: WeaponBehavior,
    pub hit_type: HitType,
    /// Splash radii: inner (100%), medium (50%), outer (25%).
    pub inner_splash: i32,
    pub medium_splash: i32,
    pub outer_splash: i32,
    pub min_range: i32,
    pub max_range: i32,
    pub flingy: FlingyId,
    /// Frames a spawned bullet lives before it is forced to impact.
    pub lifetime: i32,
    /// Launch spin applied to bouncing projectiles.
    pub launch_spin: i32,
    pub forward_offset: i32,
    pub upward_offset: i32,
    pub targets_air: bool,
    pub targets_ground: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlingyData {
    pub sprite: SpriteTypeId,
    pub top_speed: Fp8,
    pub acceleration: Fp8,
    pub halt_distance: Fp8,
    pub turn_rate: Fp8,
    /// 0 = flingy.dat control, 1 = partially mobile, 2 = iscript control.
    pub movement_type: u8,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpriteTypeData {
    pub image: ImageTypeId,
    pub visible: bool,
    pub selection_circle: u8,
    pub selection_circle_offset: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageTypeData {
    pub iscript: IscriptId,
    pub has_directional_frames: bool,
    pub clickable: bool,
    pub use_full_iscript: bool,
    pub always_visible: bool,
    pub draw_function: u8,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderData {
    /// Order uses its unit's weapon targeting rules.
    pub use_weapon_targeting: bool,
    pub interruptible: bool,
    pub can_be_queued: bool,
    /// Units keep executing this while disabled (e.g. Die).
    pub executes_while_disabled: bool,
    /// Animation played while the order runs.
    pub animation: u8,
    pub targeting_weapon: Option<WeaponId>,
    /// Order to run when the target becomes obscured, if any.
    pub obscured: Option<OrderTypeId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpgradeData {
    pub mineral_cost_base: i32,
    pub mineral_cost_factor: i32,
    pub gas_cost_base: i32,
    pub gas_cost_factor: i32,
    pub time_base: i32,
    pub time_factor: i32,
    pub max_level: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TechData {
    pub mineral_cost: i32,
    pub gas_cost: i32,
    pub research_time: i32,
    pub energy_cost: i32,
}

// ============================================================================
// TILESET
// ============================================================================

bitflags::bitflags! {
    /// Per-mini-tile flags from the vf4 cascade.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct MiniTileFlags: u16 {
        const WALKABLE  = 1;
        const MIDDLE    = 2;
        const HIGH      = 4;
        const VERY_HIGH = 8;
    }
}

/// Tile group: flags plus the 16 mega-tile indices of its subtiles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Cv5Entry {
    pub flags: u16,
    pub mega_tile_index: [u16; 16],
}

/// Mega-tile: 16 mini-tile flag words (4x4 grid of 8x8-pixel cells).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Vf4Entry {
    pub flags: [u16; 16],
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TilesetData {
    pub cv5: Vec<Cv5Entry>,
    pub vf4: Vec<Vf4Entry>,
}

// ============================================================================
// SIGHT MASKS
// ============================================================================

/// One tile of a sight disc, with links toward the center for blocking
/// propagation: a node is masked when its predecessors are masked.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaskNode {
    pub x: i32,
    pub y: i32,
    /// Index of the diagonal-step predecessor, or `u32::MAX` for the center.
    pub prev: u32,
    /// Index of the straight-step predecessor when it differs from `prev`.
    pub prev2: u32,
}

pub const NO_MASK_PREV: u32 = u32::MAX;

/// Precomputed reveal pattern for one sight range.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SightValues {
    pub max_width: i32,
    pub max_height: i32,
    pub min_mask_size: usize,
    pub ext_masked_count: usize,
    pub maskdat: Vec<MaskNode>,
}

impl SightValues {
    /// Build the disc for a sight range in tiles.
    ///
    /// Nodes are ordered by squared distance, then row-major; predecessors
    /// always precede their successors, which lets the reveal pass run in
    /// one forward sweep.
    pub fn for_range(range: i32) -> SightValues {
        let mut tiles: Vec<(i32, i32, i32)> = Vec::new();
        let limit = 4 * (range * range + range) + 1; // 4(dx²+dy²) ≤ (2r+1)²
        for dy in -range..=range {
            for dx in -range..=range {
                let d2 = dx * dx + dy * dy;
                if 4 * d2 <= limit {
                    tiles.push((d2, dy, dx));
                }
            }
        }
        tiles.sort();
        let index_of = |tiles: &[(i32, i32, i32)], x: i32, y: i32| -> u32 {
            tiles
                .iter()
                .position(|&(_, ty, tx)| tx == x && ty == y)
                .map_or(NO_MASK_PREV, |i| i as u32)
        };
        let mut maskdat = Vec::with_capacity(tiles.len());
        for &(_, y, x) in &tiles {
            let (prev, prev2) = if x == 0 && y == 0 {
                (NO_MASK_PREV, NO_MASK_PREV)
            } else {
                let diag = index_of(&tiles, x - x.signum(), y - y.signum());
                let straight = if x.abs() >= y.abs() {
                    index_of(&tiles, x - x.signum(), y)
                } else {
                    index_of(&tiles, x, y - y.signum())
                };
                if straight == diag {
                    (diag, NO_MASK_PREV)
                } else {
                    (diag, straight)
                }
            };
            maskdat.push(MaskNode { x, y, prev, prev2 });
        }
        let min_mask_size = maskdat.iter().filter(|n| n.x.abs() <= 1 && n.y.abs() <= 1).count();
        let ext_masked_count = maskdat.len() - min_mask_size;
        SightValues {
            max_width: range * 2 + 1,
            max_height: range * 2 + 1,
            min_mask_size,
            ext_masked_count,
            maskdat,
        }
    }
}

// ============================================================================
// GAME DATA
// ============================================================================

/// Damage percentage by (damage type, unit size).
///
/// Rows: independent, explosive, concussive, normal, ignore-armor.
/// Columns: independent, small, medium, large.
pub const DAMAGE_MATRIX: [[i32; 4]; 5] = [
    [0, 0, 0, 0],
    [100, 50, 75, 100],
    [100, 100, 50, 25],
    [100, 100, 100, 100],
    [100, 100, 100, 100],
];

pub fn damage_percent(damage_type: DamageType, size: UnitSize) -> i32 {
    DAMAGE_MATRIX[damage_type as usize][size as usize]
}

/// All static tables, loaded once and shared read-only between worlds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GameData {
    pub units: Vec<UnitTypeData>,
    pub weapons: Vec<WeaponData>,
    pub flingies: Vec<FlingyData>,
    pub sprites: Vec<SpriteTypeData>,
    pub images: Vec<ImageTypeData>,
    pub orders: Vec<OrderData>,
    pub upgrades: Vec<UpgradeData>,
    pub techs: Vec<TechData>,
    pub tileset: TilesetData,
    pub iscript: crate::iscript::IscriptData,
    /// Reveal patterns for sight ranges 1..=11, index 0 unused.
    pub sight_values: Vec<SightValues>,
    /// The unit type hatcheries spawn, when the dataset has one.
    pub larva_unit: Option<UnitTypeId>,
}

impl GameData {
    /// Precompute derived tables. Call once after the raw tables are set.
    pub fn finalize(mut self) -> Self {
        self.sight_values = (0..=11).map(SightValues::for_range).collect();
        self
    }

    pub fn unit(&self, id: UnitTypeId) -> SimResult<&UnitTypeData> {
        self.units
            .get(id.index())
            .ok_or_else(|| SimError::InvalidInput(format!("unit type out of range: {}", id.0)))
    }

    pub fn weapon(&self, id: WeaponId) -> SimResult<&WeaponData> {
        self.weapons
            .get(id.index())
            .ok_or_else(|| SimError::InvalidInput(format!("weapon out of range: {}", id.0)))
    }

    pub fn flingy(&self, id: FlingyId) -> SimResult<&FlingyData> {
        self.flingies
            .get(id.index())
            .ok_or_else(|| SimError::InvalidInput(format!("flingy out of range: {}", id.0)))
    }

    pub fn sprite(&self, id: SpriteTypeId) -> SimResult<&SpriteTypeData> {
        self.sprites
            .get(id.index())
            .ok_or_else(|| SimError::InvalidInput(format!("sprite type out of range: {}", id.0)))
    }

    pub fn image(&self, id: ImageTypeId) -> SimResult<&ImageTypeData> {
        self.images
            .get(id.index())
            .ok_or_else(|| SimError::InvalidInput(format!("image type out of range: {}", id.0)))
    }

    pub fn order(&self, id: OrderTypeId) -> SimResult<&OrderData> {
        self.orders
            .get(id.index())
            .ok_or_else(|| SimError::InvalidInput(format!("order out of range: {}", id.0)))
    }

    pub fn upgrade(&self, id: UpgradeId) -> SimResult<&UpgradeData> {
        self.upgrades
            .get(id.index())
            .ok_or_else(|| SimError::InvalidInput(format!("upgrade out of range: {}", id.0)))
    }

    pub fn sight(&self, range: i32) -> &SightValues {
        let clamped = range.clamp(1, 11) as usize;
        &self.sight_values[clamped]
    }
}

// ============================================================================
// PACKED COLUMN LOADER
// ============================================================================

/// Cursor over one packed column-major table.
pub struct DatReader<'a> {
    bytes: &'a [u8],
    records: usize,
    offset: usize,
    name: &'static str,
}

impl<'a> DatReader<'a> {
    pub fn new(name: &'static str, bytes: &'a [u8], records: usize) -> Self {
        DatReader { bytes, records, offset: 0, name }
    }

    fn take(&mut self, len: usize) -> SimResult<&'a [u8]> {
        let end = self.offset + len;
        let slice = self
            .bytes
            .get(self.offset..end)
            .ok_or_else(|| SimError::InvalidInput(format!("{}: truncated at offset {}", self.name, self.offset)))?;
        self.offset = end;
        Ok(slice)
    }

    /// One full u8 column.
    pub fn col_u8(&mut self) -> SimResult<Vec<u8>> {
        Ok(self.take(self.records)?.to_vec())
    }

    pub fn col_u16(&mut self) -> SimResult<Vec<u16>> {
        let raw = self.take(self.records * 2)?;
        Ok(raw.chunks_exact(2).map(LittleEndian::read_u16).collect())
    }

    pub fn col_i16(&mut self) -> SimResult<Vec<i16>> {
        let raw = self.take(self.records * 2)?;
        Ok(raw.chunks_exact(2).map(LittleEndian::read_i16).collect())
    }

    pub fn col_u32(&mut self) -> SimResult<Vec<u32>> {
        let raw = self.take(self.records * 4)?;
        Ok(raw.chunks_exact(4).map(LittleEndian::read_u32).collect())
    }

    /// Loader is done; trailing bytes mean a schema mismatch.
    pub fn finish(self) -> SimResult<()> {
        if self.offset != self.bytes.len() {
            return Err(SimError::InvalidInput(format!(
                "{}: {} trailing bytes",
                self.name,
                self.bytes.len() - self.offset
            )));
        }
        Ok(())
    }
}

/// Column-major writer, the loader's inverse.
#[derive(Default)]
pub struct DatWriter {
    bytes: Vec<u8>,
}

impl DatWriter {
    pub fn col_u8(&mut self, values: impl Iterator<Item = u8>) {
        self.bytes.extend(values);
    }

    pub fn col_u16(&mut self, values: impl Iterator<Item = u16>) {
        for v in values {
            self.bytes.extend_from_slice(&v.to_le_bytes());
        }
    }

    pub fn col_i16(&mut self, values: impl Iterator<Item = i16>) {
        for v in values {
            self.bytes.extend_from_slice(&v.to_le_bytes());
        }
    }

    pub fn col_u32(&mut self, values: impl Iterator<Item = u32>) {
        for v in values {
            self.bytes.extend_from_slice(&v.to_le_bytes());
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

fn opt_id<T>(raw: u16, none: u16, wrap: impl Fn(u16) -> T) -> Option<T> {
    if raw == none {
        None
    } else {
        Some(wrap(raw))
    }
}

/// Column order of the packed unit table.
///
/// flingy u16, subunit u16 (0xffff none), dim left/up/right/down i16,
/// placement w/h i16, hit_points u32 (raw Fp8), shields u16, has_shields u8,
/// armor u8, armor_upgrade u8 (0xff none), build_time u16, minerals u16,
/// gas u16, supply_provided u8, supply_required u8, race u8, sight u8,
/// ground_weapon u8 (0xff), air_weapon u8 (0xff), size u8, elevation u8,
/// right_click u8, return_to_idle u8, attack_unit u8, human_idle u8,
/// computer_idle u8, flags u32.
pub fn load_units_dat(bytes: &[u8], records: usize) -> SimResult<Vec<UnitTypeData>> {
    let mut r = DatReader::new("units.dat", bytes, records);
    let flingy = r.col_u16()?;
    let subunit = r.col_u16()?;
    let dim_l = r.col_i16()?;
    let dim_u = r.col_i16()?;
    let dim_r = r.col_i16()?;
    let dim_d = r.col_i16()?;
    let place_w = r.col_i16()?;
    let place_h = r.col_i16()?;
    let hp = r.col_u32()?;
    let shields = r.col_u16()?;
    let has_shields = r.col_u8()?;
    let armor = r.col_u8()?;
    let armor_upgrade = r.col_u8()?;
    let build_time = r.col_u16()?;
    let minerals = r.col_u16()?;
    let gas = r.col_u16()?;
    let supply_provided = r.col_u8()?;
    let supply_required = r.col_u8()?;
    let race = r.col_u8()?;
    let sight = r.col_u8()?;
    let ground_weapon = r.col_u8()?;
    let air_weapon = r.col_u8()?;
    let size = r.col_u8()?;
    let elevation = r.col_u8()?;
    let right_click = r.col_u8()?;
    let return_to_idle = r.col_u8()?;
    let attack_unit = r.col_u8()?;
    let human_idle = r.col_u8()?;
    let computer_idle = r.col_u8()?;
    let flags = r.col_u32()?;
    r.finish()?;

    (0..records)
        .map(|i| {
            Ok(UnitTypeData {
                flingy: FlingyId(flingy[i]),
                subunit: opt_id(subunit[i], 0xffff, UnitTypeId),
                dimensions: [dim_l[i] as i32, dim_u[i] as i32, dim_r[i] as i32, dim_d[i] as i32],
                placement: [place_w[i] as i32, place_h[i] as i32],
                hit_points: Fp8::from_raw(hp[i] as i32),
                shield_points: shields[i] as i32,
                has_shields: has_shields[i] != 0,
                armor: armor[i] as i32,
                armor_upgrade: opt_id(armor_upgrade[i] as u16, 0xff, |v| UpgradeId(v as u8)),
                build_time: build_time[i] as i32,
                mineral_cost: minerals[i] as i32,
                gas_cost: gas[i] as i32,
                supply_provided: supply_provided[i] as i32,
                supply_required: supply_required[i] as i32,
                race: Race::from_u8(race[i])?,
                sight_range: sight[i] as i32,
                ground_weapon: opt_id(ground_weapon[i] as u16, 0xff, |v| WeaponId(v as u8)),
                air_weapon: opt_id(air_weapon[i] as u16, 0xff, |v| WeaponId(v as u8)),
                unit_size: match size[i] {
                    0 => UnitSize::Independent,
                    1 => UnitSize::Small,
                    2 => UnitSize::Medium,
                    3 => UnitSize::Large,
                    v => return Err(SimError::InvalidInput(format!("unit size out of range: {v}"))),
                },
                elevation_level: elevation[i] as i32,
                right_click_action: right_click[i],
                return_to_idle: OrderTypeId(return_to_idle[i]),
                attack_unit: OrderTypeId(attack_unit[i]),
                human_ai_idle: OrderTypeId(human_idle[i]),
                computer_ai_idle: OrderTypeId(computer_idle[i]),
                flags: UnitTypeFlags::from_bits_truncate(flags[i]),
            })
        })
        .collect()
}

pub fn write_units_dat(units: &[UnitTypeData]) -> Vec<u8> {
    let mut w = DatWriter::default();
    w.col_u16(units.iter().map(|u| u.flingy.0));
    w.col_u16(units.iter().map(|u| u.subunit.map_or(0xffff, |s| s.0)));
    for axis in 0..4 {
        w.col_i16(units.iter().map(move |u| u.dimensions[axis] as i16));
    }
    for axis in 0..2 {
        w.col_i16(units.iter().map(move |u| u.placement[axis] as i16));
    }
    w.col_u32(units.iter().map(|u| u.hit_points.raw() as u32));
    w.col_u16(units.iter().map(|u| u.shield_points as u16));
    w.col_u8(units.iter().map(|u| u8::from(u.has_shields)));
    w.col_u8(units.iter().map(|u| u.armor as u8));
    w.col_u8(units.iter().map(|u| u.armor_upgrade.map_or(0xff, |v| v.0)));
    w.col_u16(units.iter().map(|u| u.build_time as u16));
    w.col_u16(units.iter().map(|u| u.mineral_cost as u16));
    w.col_u16(units.iter().map(|u| u.gas_cost as u16));
    w.col_u8(units.iter().map(|u| u.supply_provided as u8));
    w.col_u8(units.iter().map(|u| u.supply_required as u8));
    w.col_u8(units.iter().map(|u| u.race as u8));
    w.col_u8(units.iter().map(|u| u.sight_range as u8));
    w.col_u8(units.iter().map(|u| u.ground_weapon.map_or(0xff, |v| v.0)));
    w.col_u8(units.iter().map(|u| u.air_weapon.map_or(0xff, |v| v.0)));
    w.col_u8(units.iter().map(|u| u.unit_size as u8));
    w.col_u8(units.iter().map(|u| u.elevation_level as u8));
    w.col_u8(units.iter().map(|u| u.right_click_action));
    w.col_u8(units.iter().map(|u| u.return_to_idle.0));
    w.col_u8(units.iter().map(|u| u.attack_unit.0));
    w.col_u8(units.iter().map(|u| u.human_ai_idle.0));
    w.col_u8(units.iter().map(|u| u.computer_ai_idle.0));
    w.col_u32(units.iter().map(|u| u.flags.bits()));
    w.into_bytes()
}

/// Column order: damage u16, bonus u16, cooldown u8, factor u8, upgrade u8,
/// damage_type u8, behavior u8, hit_type u8, inner u16, medium u16,
/// outer u16, min_range u16, max_range u16, flingy u16, lifetime u16,
/// launch_spin u8, forward_offset u8, upward_offset u8, target_flags u8.
pub fn load_weapons_dat(bytes: &[u8], records: usize) -> SimResult<Vec<WeaponData>> {
    let mut r = DatReader::new("weapons.dat", bytes, records);
    let damage = r.col_u16()?;
    let bonus = r.col_u16()?;
    let cooldown = r.col_u8()?;
    let factor = r.col_u8()?;
    let upgrade = r.col_u8()?;
    let damage_type = r.col_u8()?;
    let behavior = r.col_u8()?;
    let hit_type = r.col_u8()?;
    let inner = r.col_u16()?;
    let medium = r.col_u16()?;
    let outer = r.col_u16()?;
    let min_range = r.col_u16()?;
    let max_range = r.col_u16()?;
    let flingy = r.col_u16()?;
    let lifetime = r.col_u16()?;
    let launch_spin = r.col_u8()?;
    let forward = r.col_u8()?;
    let upward = r.col_u8()?;
    let target_flags = r.col_u8()?;
    r.finish()?;

    (0..records)
        .map(|i| {
            Ok(WeaponData {
                damage_amount: damage[i] as i32,
                damage_bonus: bonus[i] as i32,
                cooldown: cooldown[i] as i32,
                damage_factor: factor[i] as i32,
                upgrade: opt_id(upgrade[i] as u16, 0xff, |v| UpgradeId(v as u8)),
                damage_type: match damage_type[i] {
                    0 => DamageType::Independent,
                    1 => DamageType::Explosive,
                    2 => DamageType::Concussive,
                    3 => DamageType::Normal,
                    4 => DamageType::IgnoreArmor,
                    v => return Err(SimError::InvalidInput(format!("damage type out of range: {v}"))),
                },
                behavior: WeaponBehavior::from_u8(behavior[i])?,
                hit_type: match hit_type[i] {
                    0 => HitType::None,
                    1 => HitType::RadialSplash,
                    2 => HitType::EnemySplash,
                    3 => HitType::NormalHit,
                    v => return Err(SimError::InvalidInput(format!("hit type out of range: {v}"))),
                },
                inner_splash: inner[i] as i32,
                medium_splash: medium[i] as i32,
                outer_splash: outer[i] as i32,
                min_range: min_range[i] as i32,
                max_range: max_range[i] as i32,
                flingy: FlingyId(flingy[i]),
                lifetime: lifetime[i] as i32,
                launch_spin: launch_spin[i] as i32,
                forward_offset: forward[i] as i32,
                upward_offset: upward[i] as i32,
                targets_air: target_flags[i] & 1 != 0,
                targets_ground: target_flags[i] & 2 != 0,
            })
        })
        .collect()
}

pub fn write_weapons_dat(weapons: &[WeaponData]) -> Vec<u8> {
    let mut w = DatWriter::default();
    w.col_u16(weapons.iter().map(|v| v.damage_amount as u16));
    w.col_u16(weapons.iter().map(|v| v.damage_bonus as u16));
    w.col_u8(weapons.iter().map(|v| v.cooldown as u8));
    w.col_u8(weapons.iter().map(|v| v.damage_factor as u8));
    w.col_u8(weapons.iter().map(|v| v.upgrade.map_or(0xff, |u| u.0)));
    w.col_u8(weapons.iter().map(|v| v.damage_type as u8));
    w.col_u8(weapons.iter().map(|v| v.behavior as u8));
    w.col_u8(weapons.iter().map(|v| v.hit_type as u8));
    w.col_u16(weapons.iter().map(|v| v.inner_splash as u16));
    w.col_u16(weapons.iter().map(|v| v.medium_splash as u16));
    w.col_u16(weapons.iter().map(|v| v.outer_splash as u16));
    w.col_u16(weapons.iter().map(|v| v.min_range as u16));
    w.col_u16(weapons.iter().map(|v| v.max_range as u16));
    w.col_u16(weapons.iter().map(|v| v.flingy.0));
    w.col_u16(weapons.iter().map(|v| v.lifetime as u16));
    w.col_u8(weapons.iter().map(|v| v.launch_spin as u8));
    w.col_u8(weapons.iter().map(|v| v.forward_offset as u8));
    w.col_u8(weapons.iter().map(|v| v.upward_offset as u8));
    w.col_u8(weapons.iter().map(|v| u8::from(v.targets_air) | (u8::from(v.targets_ground) << 1)));
    w.into_bytes()
}

/// Column order: sprite u16, top_speed u32 (raw Fp8), acceleration u16
/// (raw Fp8), halt_distance u32 (raw Fp8), turn_rate u8 (raw Fp8),
/// movement_type u8.
pub fn load_flingy_dat(bytes: &[u8], records: usize) -> SimResult<Vec<FlingyData>> {
    let mut r = DatReader::new("flingy.dat", bytes, records);
    let sprite = r.col_u16()?;
    let top_speed = r.col_u32()?;
    let acceleration = r.col_u16()?;
    let halt_distance = r.col_u32()?;
    let turn_rate = r.col_u8()?;
    let movement_type = r.col_u8()?;
    r.finish()?;

    Ok((0..records)
        .map(|i| FlingyData {
            sprite: SpriteTypeId(sprite[i]),
            top_speed: Fp8::from_raw(top_speed[i] as i32),
            acceleration: Fp8::from_raw(acceleration[i] as i32),
            halt_distance: Fp8::from_raw(halt_distance[i] as i32),
            turn_rate: Fp8::integer(turn_rate[i] as i32),
            movement_type: movement_type[i],
        })
        .collect())
}

pub fn write_flingy_dat(flingies: &[FlingyData]) -> Vec<u8> {
    let mut w = DatWriter::default();
    w.col_u16(flingies.iter().map(|v| v.sprite.0));
    w.col_u32(flingies.iter().map(|v| v.top_speed.raw() as u32));
    w.col_u16(flingies.iter().map(|v| v.acceleration.raw() as u16));
    w.col_u32(flingies.iter().map(|v| v.halt_distance.raw() as u32));
    w.col_u8(flingies.iter().map(|v| v.turn_rate.integer_part() as u8));
    w.col_u8(flingies.iter().map(|v| v.movement_type));
    w.into_bytes()
}

/// Column order: image u16, visible u8, selection_circle u8, offset u8.
pub fn load_sprites_dat(bytes: &[u8], records: usize) -> SimResult<Vec<SpriteTypeData>> {
    let mut r = DatReader::new("sprites.dat", bytes, records);
    let image = r.col_u16()?;
    let visible = r.col_u8()?;
    let circle = r.col_u8()?;
    let offset = r.col_u8()?;
    r.finish()?;
    Ok((0..records)
        .map(|i| SpriteTypeData {
            image: ImageTypeId(image[i]),
            visible: visible[i] != 0,
            selection_circle: circle[i],
            selection_circle_offset: offset[i] as i32,
        })
        .collect())
}

/// Column order: iscript u16, flags u8 (directional, clickable, full
/// iscript, always visible), draw_function u8.
pub fn load_images_dat(bytes: &[u8], records: usize) -> SimResult<Vec<ImageTypeData>> {
    let mut r = DatReader::new("images.dat", bytes, records);
    let iscript = r.col_u16()?;
    let flags = r.col_u8()?;
    let draw = r.col_u8()?;
    r.finish()?;
    Ok((0..records)
        .map(|i| ImageTypeData {
            iscript: IscriptId(iscript[i]),
            has_directional_frames: flags[i] & 1 != 0,
            clickable: flags[i] & 2 != 0,
            use_full_iscript: flags[i] & 4 != 0,
            always_visible: flags[i] & 8 != 0,
            draw_function: draw[i],
        })
        .collect())
}

/// Column order: flags u8 (weapon targeting, interruptible, queueable,
/// executes while disabled), animation u8, targeting weapon u8 (0xff),
/// obscured order u8 (0xff).
pub fn load_orders_dat(bytes: &[u8], records: usize) -> SimResult<Vec<OrderData>> {
    let mut r = DatReader::new("orders.dat", bytes, records);
    let flags = r.col_u8()?;
    let animation = r.col_u8()?;
    let weapon = r.col_u8()?;
    let obscured = r.col_u8()?;
    r.finish()?;
    Ok((0..records)
        .map(|i| OrderData {
            use_weapon_targeting: flags[i] & 1 != 0,
            interruptible: flags[i] & 2 != 0,
            can_be_queued: flags[i] & 4 != 0,
            executes_while_disabled: flags[i] & 8 != 0,
            animation: animation[i],
            targeting_weapon: opt_id(weapon[i] as u16, 0xff, |v| WeaponId(v as u8)),
            obscured: opt_id(obscured[i] as u16, 0xff, |v| OrderTypeId(v as u8)),
        })
        .collect())
}

/// Column order: mineral base/factor u16, gas base/factor u16,
/// time base/factor u16, max level u8.
pub fn load_upgrades_dat(bytes: &[u8], records: usize) -> SimResult<Vec<UpgradeData>> {
    let mut r = DatReader::new("upgrades.dat", bytes, records);
    let min_base = r.col_u16()?;
    let min_factor = r.col_u16()?;
    let gas_base = r.col_u16()?;
    let gas_factor = r.col_u16()?;
    let time_base = r.col_u16()?;
    let time_factor = r.col_u16()?;
    let max_level = r.col_u8()?;
    r.finish()?;
    Ok((0..records)
        .map(|i| UpgradeData {
            mineral_cost_base: min_base[i] as i32,
            mineral_cost_factor: min_factor[i] as i32,
            gas_cost_base: gas_base[i] as i32,
            gas_cost_factor: gas_factor[i] as i32,
            time_base: time_base[i] as i32,
            time_factor: time_factor[i] as i32,
            max_level: max_level[i] as i32,
        })
        .collect())
}

/// Column order: minerals u16, gas u16, research time u16, energy u16.
pub fn load_techs_dat(bytes: &[u8], records: usize) -> SimResult<Vec<TechData>> {
    let mut r = DatReader::new("techdata.dat", bytes, records);
    let minerals = r.col_u16()?;
    let gas = r.col_u16()?;
    let time = r.col_u16()?;
    let energy = r.col_u16()?;
    r.finish()?;
    Ok((0..records)
        .map(|i| TechData {
            mineral_cost: minerals[i] as i32,
            gas_cost: gas[i] as i32,
            research_time: time[i] as i32,
            energy_cost: energy[i] as i32,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_units_dat_round_trip() {
        let units = vec![
            UnitTypeData {
                flingy: FlingyId(3),
                subunit: Some(UnitTypeId(7)),
                dimensions: [8, 9, 8, 9],
                placement: [32, 32],
                hit_points: Fp8::integer(40),
                shield_points: 20,
                has_shields: true,
                armor: 1,
                armor_upgrade: Some(UpgradeId(2)),
                build_time: 360,
                mineral_cost: 50,
                gas_cost: 25,
                supply_provided: 0,
                supply_required: 2,
                race: Race::Terran,
                sight_range: 7,
                ground_weapon: Some(WeaponId(0)),
                air_weapon: None,
                unit_size: UnitSize::Small,
                elevation_level: 4,
                right_click_action: 1,
                return_to_idle: orders::PLAYER_GUARD,
                attack_unit: orders::ATTACK_UNIT,
                human_ai_idle: orders::PLAYER_GUARD,
                computer_ai_idle: orders::COMPUTER_AI,
                flags: UnitTypeFlags::ORGANIC | UnitTypeFlags::CAN_MOVE | UnitTypeFlags::CAN_TURN,
            },
            UnitTypeData::default(),
        ];
        let bytes = write_units_dat(&units);
        let loaded = load_units_dat(&bytes, units.len()).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].flingy, units[0].flingy);
        assert_eq!(loaded[0].subunit, units[0].subunit);
        assert_eq!(loaded[0].hit_points, units[0].hit_points);
        assert_eq!(loaded[0].flags, units[0].flags);
        assert_eq!(loaded[1].subunit, None);
    }

    #[test]
    fn test_truncated_table_is_invalid_input() {
        let units = vec![UnitTypeData::default(); 3];
        let mut bytes = write_units_dat(&units);
        bytes.truncate(bytes.len() - 1);
        assert!(matches!(load_units_dat(&bytes, 3), Err(SimError::InvalidInput(_))));
    }

    #[test]
    fn test_trailing_bytes_are_rejected() {
        let units = vec![UnitTypeData::default(); 2];
        let mut bytes = write_units_dat(&units);
        bytes.push(0);
        assert!(matches!(load_units_dat(&bytes, 2), Err(SimError::InvalidInput(_))));
    }

    #[test]
    fn test_weapons_dat_round_trip() {
        let weapons = vec![WeaponData {
            damage_amount: 6,
            damage_bonus: 1,
            cooldown: 15,
            damage_factor: 1,
            upgrade: Some(UpgradeId(0)),
            damage_type: DamageType::Normal,
            behavior: WeaponBehavior::AppearOnTargetUnit,
            hit_type: HitType::NormalHit,
            inner_splash: 0,
            medium_splash: 0,
            outer_splash: 0,
            min_range: 0,
            max_range: 128,
            flingy: FlingyId(1),
            lifetime: 60,
            launch_spin: 0,
            forward_offset: 16,
            upward_offset: 8,
            targets_air: true,
            targets_ground: true,
        }];
        let bytes = write_weapons_dat(&weapons);
        let loaded = load_weapons_dat(&bytes, 1).unwrap();
        assert_eq!(loaded[0].damage_type, DamageType::Normal);
        assert_eq!(loaded[0].max_range, 128);
        assert!(loaded[0].targets_air && loaded[0].targets_ground);
    }

    #[test]
    fn test_damage_matrix_values() {
        assert_eq!(damage_percent(DamageType::Explosive, UnitSize::Small), 50);
        assert_eq!(damage_percent(DamageType::Explosive, UnitSize::Large), 100);
        assert_eq!(damage_percent(DamageType::Concussive, UnitSize::Large), 25);
        assert_eq!(damage_percent(DamageType::Normal, UnitSize::Medium), 100);
    }

    #[test]
    fn test_sight_values_shape() {
        let sv = SightValues::for_range(2);
        assert_eq!(sv.max_width, 5);
        // center first, predecessors precede successors
        assert_eq!((sv.maskdat[0].x, sv.maskdat[0].y), (0, 0));
        assert_eq!(sv.maskdat[0].prev, NO_MASK_PREV);
        for (i, node) in sv.maskdat.iter().enumerate().skip(1) {
            assert!(node.prev != NO_MASK_PREV, "node {i} lost its predecessor");
            assert!((node.prev as usize) < i);
            if node.prev2 != NO_MASK_PREV {
                assert!((node.prev2 as usize) < i);
            }
        }
        assert_eq!(sv.min_mask_size + sv.ext_masked_count, sv.maskdat.len());
    }

    #[test]
    fn test_sight_range_seven_covers_documented_disc() {
        let sv = SightValues::for_range(7);
        // 4(dx²+dy²) ≤ (2·7+1)² tile membership
        assert!(sv.maskdat.iter().any(|n| n.x == 7 && n.y == 0));
        assert!(sv.maskdat.iter().all(|n| 4 * (n.x * n.x + n.y * n.y) <= 15 * 15));
    }

    #[test]
    fn test_game_data_serde_round_trip_is_identity() {
        let data = GameData {
            units: vec![UnitTypeData::default()],
            weapons: vec![WeaponData::default()],
            ..Default::default()
        }
        .finalize();
        let json = serde_json::to_string(&data).unwrap();
        let back: GameData = serde_json::from_str(&json).unwrap();
        assert_eq!(serde_json::to_string(&back).unwrap(), json);
    }
}
