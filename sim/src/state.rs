//! The world state.
//!
//! `SimState` is the single resource holding every mutable piece of the
//! simulation: arenas, terrain, the spatial index, players, the PRNG and
//! the frame counter. Snapshotting is serde on this one struct; restoring
//! it restores the world bit for bit. Static tables stay outside in
//! `Arc<GameData>` and are shared read-only between worlds.
//!
//! Lifecycle helpers (create / complete / kill / destroy unit, damage
//! application, order queue plumbing) live here; the per-tick phases in
//! `systems/` drive them.

use crate::components::{
    Bullet, Controller, Flingy, OrderRecord, OrderTarget, Path, Player, Sprite, StatusFlags,
    Supply, Target, Unit, UnitId, MAX_SELECTION,
};
use crate::data::{orders, GameData, Race, SoundId, UnitTypeFlags, UnitTypeId, WeaponId};
use crate::errors::{SimError, SimResult};
use crate::fixed::{Fp8, Rect, Xy, XyFp8};
use crate::pools::Pool;
use crate::rng::Lcg;
use crate::spatial::UnitFinder;
use crate::terrain::{CreepState, Regions, TerrainGrid, TileFlags, TILE_SIZE};
use bevy_ecs::prelude::Resource;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const MAX_PLAYERS: usize = 12;
pub const NEUTRAL_PLAYER: u8 = 11;

pub const UNIT_CAPACITY: u16 = 1700;
pub const SPRITE_CAPACITY: u16 = 2500;
pub const IMAGE_CAPACITY: u16 = 5000;
pub const BULLET_CAPACITY: u16 = 100;
pub const ORDER_CAPACITY: u16 = 2000;
pub const PATH_CAPACITY: u16 = 1024;

/// Frames between full vision refreshes.
pub const UPDATE_TILES_INTERVAL: u32 = 100;

/// Hard supply ceiling per race, in half units (200 supply).
pub const SUPPLY_CAP: i32 = 400;

/// The shared static tables, injected as a resource.
#[derive(Resource, Clone)]
pub struct StaticData(pub Arc<GameData>);

/// Defeat predicate selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GameType {
    /// Defeated when no buildings remain.
    #[default]
    Melee,
    /// Defeated when no units remain at all.
    UseMapSettings,
}

/// Observer events, drained by the embedder after each step.
///
/// Buffering instead of callbacks keeps `step()` free of reentrancy: a
/// hook can never call back into a mutating kernel API mid-tick.
#[derive(Resource, Debug, Default)]
pub struct EventQueue {
    pub events: Vec<SimEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    /// Lethal damage was applied; the death animation is about to play.
    UnitKilled(UnitId),
    /// The unit's arena slot is about to be released.
    UnitDestroyed(UnitId),
    /// One action was parsed for a player, for APM bookkeeping.
    Action { player: u8, action_id: u8 },
    PlaySound { sound: SoundId, position: Xy, source: Option<UnitId> },
}

impl EventQueue {
    pub fn push(&mut self, event: SimEvent) {
        self.events.push(event);
    }

    pub fn drain(&mut self) -> Vec<SimEvent> {
        std::mem::take(&mut self.events)
    }
}

/// Damage staged during bullet/iscript processing, applied in the damage
/// phase of the same tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedDamage {
    pub target: UnitId,
    /// Hit points before armor and size scaling.
    pub amount: i32,
    pub weapon: WeaponId,
    pub source: Option<UnitId>,
    pub owner: u8,
}

/// Everything mutable. One value, fully serializable.
#[derive(Resource, Debug, Clone, Serialize, Deserialize)]
pub struct SimState {
    pub frame: u32,
    pub rng: Lcg,
    pub game_type: GameType,

    pub terrain: TerrainGrid,
    pub regions: Regions,
    pub creep: CreepState,
    pub finder: UnitFinder,

    pub units: Pool<Unit>,
    pub sprites: Pool<Sprite>,
    pub images: Pool<Image>,
    pub bullets: Pool<Bullet>,
    pub orders: Pool<OrderRecord>,
    pub paths: Pool<Path>,

    pub players: Vec<Player>,
    /// Per player, unit ids in insertion order; the tick iterates these.
    pub player_units: Vec<Vec<UnitId>>,
    pub selections: Vec<Vec<UnitId>>,

    /// Sprite indices bucketed by tile row.
    pub sprites_by_row: Vec<Vec<u16>>,

    pub damage_queue: Vec<QueuedDamage>,
}

use crate::components::Image;

impl SimState {
    pub fn new(width: usize, height: usize, seed: u32, game_type: GameType) -> Self {
        let terrain = TerrainGrid::new(width, height);
        let regions = Regions::build(&terrain);
        SimState {
            frame: 0,
            rng: Lcg::new(seed),
            game_type,
            terrain,
            regions,
            creep: CreepState::default(),
            finder: UnitFinder::new(UNIT_CAPACITY),
            units: Pool::new("units", UNIT_CAPACITY),
            sprites: Pool::new("sprites", SPRITE_CAPACITY),
            images: Pool::new("images", IMAGE_CAPACITY),
            bullets: Pool::new("bullets", BULLET_CAPACITY),
            orders: Pool::new("orders", ORDER_CAPACITY),
            paths: Pool::new("paths", PATH_CAPACITY),
            players: {
                let mut players = vec![Player::default(); MAX_PLAYERS];
                for player in &mut players {
                    for ledger in &mut player.supply {
                        ledger.max = SUPPLY_CAP;
                    }
                }
                players
            },
            player_units: vec![Vec::new(); MAX_PLAYERS],
            selections: vec![Vec::new(); MAX_PLAYERS],
            sprites_by_row: vec![Vec::new(); height],
            damage_queue: Vec::new(),
        }
    }

    /// True on the ticks that refresh the vision layer.
    pub fn update_tiles_this_frame(&self) -> bool {
        self.frame % UPDATE_TILES_INTERVAL == 0
    }

    // ========================================================================
    // ID RESOLUTION
    // ========================================================================

    /// The current generation-tagged id of a live slot.
    pub fn unit_id(&self, index: u16) -> UnitId {
        UnitId::new(index, self.units.generation(index))
    }

    /// Resolve an id, failing on stale generation or dead slot.
    pub fn get_unit(&self, id: UnitId) -> Option<u16> {
        let index = id.index();
        if self.units.get(index).is_some() && self.units.generation(index) & 0x1f == id.generation()
        {
            Some(index)
        } else {
            None
        }
    }

    pub fn unit(&self, index: u16) -> &Unit {
        self.units.get(index).expect("live unit index")
    }

    pub fn unit_mut(&mut self, index: u16) -> &mut Unit {
        self.units.get_mut(index).expect("live unit index")
    }

    // ========================================================================
    // UNIT LIFECYCLE
    // ========================================================================

    /// Bounding box of a unit at a position, from its type dimensions.
    pub fn type_bounds(data: &GameData, unit_type: UnitTypeId, center: Xy) -> Rect {
        data.units[unit_type.index()].bounds(center)
    }

    /// Allocate and initialize an incomplete unit at `pos`.
    ///
    /// A failed allocation (units, sprites or images exhausted) leaves the
    /// world unchanged.
    pub fn create_unit(
        &mut self,
        data: &GameData,
        unit_type: UnitTypeId,
        owner: u8,
        pos: Xy,
    ) -> SimResult<UnitId> {
        let utype = data.unit(unit_type)?.clone();
        let flingy_data = data.flingy(utype.flingy)?.clone();

        let sprite_index = self.create_sprite(data, flingy_data.sprite, pos, owner)?;
        let unit = Unit {
            owner,
            unit_type,
            sprite: sprite_index,
            hp: Fp8::from_raw((utype.hit_points.raw() / 10).max(1)),
            flingy: Flingy {
                flingy_id: utype.flingy,
                movement_type: flingy_data.movement_type,
                position: pos,
                exact_position: XyFp8::from_xy(pos),
                top_speed: flingy_data.top_speed,
                acceleration: flingy_data.acceleration,
                turn_rate: flingy_data.turn_rate,
                next_movement_waypoint: pos,
                next_target_waypoint: pos,
                move_target: Target { pos, unit: None },
                ..Flingy::default()
            },
            order_type: orders::NOTHING,
            remaining_build_time: utype.build_time,
            ..Unit::default()
        };
        let index = match self.units.allocate(unit) {
            Ok(index) => index,
            Err(err) => {
                // roll the sprite back so the failed create is a no-op
                self.destroy_sprite(sprite_index);
                return Err(err);
            }
        };

        let mut status = StatusFlags::empty();
        if utype.is_building() {
            status |= StatusFlags::GROUNDED_BUILDING;
        }
        if utype.is_flyer() {
            status |= StatusFlags::IN_AIR;
        } else if !utype.is_building() {
            status |= StatusFlags::GROUND_UNIT | StatusFlags::COLLISION;
        }
        if utype.flags.contains(UnitTypeFlags::CAN_TURN) {
            status |= StatusFlags::CAN_TURN;
        }
        if utype.flags.contains(UnitTypeFlags::CAN_MOVE) {
            status |= StatusFlags::CAN_MOVE;
        }
        if utype.flags.contains(UnitTypeFlags::INVINCIBLE) {
            status |= StatusFlags::INVINCIBLE;
        }
        if utype.flags.contains(UnitTypeFlags::PERMANENT_CLOAK) {
            status |= StatusFlags::CLOAKED | StatusFlags::PASSIVELY_CLOAKED;
        }
        self.unit_mut(index).status_flags = status;
        self.unit_mut(index).pathing_flags = if status.contains(StatusFlags::GROUND_UNIT) {
            crate::components::PathingFlags::COLLIDABLE
        } else {
            crate::components::PathingFlags::empty()
        };

        if utype.flags.contains(UnitTypeFlags::RESOURCE_CONTAINER) {
            self.unit_mut(index).building.resource.resource_count = 1500;
        }

        let id = self.unit_id(index);
        self.player_units[owner as usize].push(id);
        self.finder.insert(index, utype.bounds(pos));

        if utype.is_building() {
            let footprint = self.building_footprint(&utype, pos);
            self.terrain.set_occupied(footprint, true);
        }

        // supply is held for the whole build, refunded on destruction
        let race = utype.race;
        if let Some(ledger) = self.supply_mut(owner, race) {
            ledger.used += utype.supply_required;
        }

        // subunits (turrets) ride along with the parent
        if let Some(sub_type) = utype.subunit {
            let sub_id = self.create_unit(data, sub_type, owner, pos)?;
            let sub_index = sub_id.index();
            self.unit_mut(sub_index).parent = Some(id);
            self.unit_mut(sub_index).status_flags |= StatusFlags::COMPLETED;
            self.unit_mut(index).subunit = Some(sub_id);
        }

        log::debug!("created unit {} type {} for player {owner}", index, unit_type.0);
        Ok(id)
    }

    /// Footprint of a building's placement box, in tiles.
    fn building_footprint(&self, utype: &crate::data::UnitTypeData, center: Xy) -> Rect {
        let w = utype.placement[0].max(TILE_SIZE);
        let h = utype.placement[1].max(TILE_SIZE);
        let from = Xy::new(center.x - w / 2, center.y - h / 2);
        Rect::new(
            TerrainGrid::pixel_to_tile(from),
            TerrainGrid::pixel_to_tile(Xy::new(from.x + w - 1, from.y + h - 1)) + Xy::new(1, 1),
        )
    }

    /// Transition incomplete -> completed: full capability, supply
    /// provided, energy primed, idle order applied.
    pub fn complete_unit(&mut self, data: &GameData, index: u16) -> SimResult<()> {
        let unit_type = self.unit(index).unit_type;
        let utype = data.unit(unit_type)?.clone();
        let owner = self.unit(index).owner;
        {
            let unit = self.unit_mut(index);
            unit.status_flags |= StatusFlags::COMPLETED;
            unit.hp = utype.hit_points;
            if utype.has_shields {
                unit.shields = Fp8::integer(utype.shield_points);
            }
            if utype.flags.contains(UnitTypeFlags::HAS_ENERGY) {
                unit.energy = Fp8::integer(50);
            }
        }
        let race = utype.race;
        if let Some(ledger) = self.supply_mut(owner, race) {
            ledger.provided += utype.supply_provided;
        }
        let idle = if self.players[owner as usize].controller == Controller::Computer {
            utype.computer_ai_idle
        } else {
            utype.human_ai_idle
        };
        self.set_unit_order(index, idle, OrderTarget::default());
        Ok(())
    }

    /// Spawn a unit that starts complete (map placement, births).
    pub fn place_completed_unit(
        &mut self,
        data: &GameData,
        unit_type: UnitTypeId,
        owner: u8,
        pos: Xy,
    ) -> SimResult<UnitId> {
        let id = self.create_unit(data, unit_type, owner, pos)?;
        self.complete_unit(data, id.index())?;
        Ok(id)
    }

    /// Lethal transition: emit the kill, start the death animation, drop
    /// the unit from play. The arena slot is released when the death
    /// animation signals completion (or immediately without one).
    pub fn kill_unit(&mut self, data: &GameData, events: &mut EventQueue, index: u16) {
        if self.unit(index).order_type == orders::DIE {
            return;
        }
        let id = self.unit_id(index);
        events.push(SimEvent::UnitKilled(id));
        // a volley staged this tick dies with its shooter; this is the
        // deterministic race tie-break between simultaneous lethal shots
        self.damage_queue.retain(|d| d.source != Some(id));
        // a gatherer's claim on its resource dies with it
        if self.unit(index).worker.is_gathering {
            if let Some(resource) = self.unit(index).worker.gather_target.and_then(|t| self.get_unit(t)) {
                self.unit_mut(resource).building.resource.is_being_gathered = false;
            }
        }
        self.finder.remove(index);
        self.clear_order_queue(index);
        {
            let unit = self.unit_mut(index);
            unit.order_type = orders::DIE;
            unit.order_state = 0;
            unit.status_flags.remove(StatusFlags::COLLISION | StatusFlags::READY_TO_ATTACK);
        }
        let sprite = self.unit(index).sprite;
        let has_death_anim = self
            .sprite_main_image(sprite)
            .and_then(|img| {
                let script = self.images.get(img)?.iscript.script;
                data.iscript.program(script).ok()?.entry(crate::iscript::Anim::Death)
            })
            .is_some();
        if has_death_anim {
            let _ = self.sprite_set_animation(data, sprite, crate::iscript::Anim::Death);
        } else {
            self.destroy_unit(data, events, index);
        }
    }

    /// Release everything the unit owns and free its slot.
    pub fn destroy_unit(&mut self, data: &GameData, events: &mut EventQueue, index: u16) {
        let id = self.unit_id(index);
        events.push(SimEvent::UnitDestroyed(id));

        let owner = self.unit(index).owner;
        let unit_type = self.unit(index).unit_type;
        let utype = data.units[unit_type.index()].clone();
        let pos = self.unit(index).position();

        if let Some(sub) = self.unit(index).subunit {
            if let Some(sub_index) = self.get_unit(sub) {
                self.destroy_unit(data, events, sub_index);
            }
        }

        self.finder.remove(index);
        self.clear_order_queue(index);
        if let Some(path) = self.unit_mut(index).path.take() {
            let _ = self.paths.release(path);
        }
        let sprite = self.unit(index).sprite;
        self.destroy_sprite(sprite);

        if utype.is_building() && self.unit(index).status_flags.contains(StatusFlags::GROUNDED_BUILDING) {
            let footprint = self.building_footprint(&utype, pos);
            self.terrain.set_occupied(footprint, false);
        }

        let completed = self.unit(index).is_completed();
        if let Some(ledger) = self.supply_mut(owner, utype.race) {
            ledger.used -= utype.supply_required;
            if completed {
                ledger.provided -= utype.supply_provided;
            }
        }

        self.player_units[owner as usize].retain(|u| *u != id);
        for selection in &mut self.selections {
            selection.retain(|u| *u != id);
        }

        let _ = self.units.release(index);
    }

    fn supply_mut(&mut self, owner: u8, race: Race) -> Option<&mut Supply> {
        let slot = match race {
            Race::Zerg => 0,
            Race::Terran => 1,
            Race::Protoss => 2,
            Race::None => return None,
        };
        Some(&mut self.players[owner as usize].supply[slot])
    }

    // ========================================================================
    // DAMAGE
    // ========================================================================

    /// Stage damage for the apply phase of this tick.
    pub fn queue_damage(&mut self, damage: QueuedDamage) {
        self.damage_queue.push(damage);
    }

    /// Apply one staged hit: matrix, then shields, then armored hull.
    pub fn apply_damage(
        &mut self,
        data: &GameData,
        events: &mut EventQueue,
        damage: &QueuedDamage,
    ) {
        let Some(index) = self.get_unit(damage.target) else {
            return; // died earlier this tick
        };
        if self.unit(index).status_flags.contains(StatusFlags::INVINCIBLE) {
            return;
        }
        // hallucinations never deal damage
        if let Some(src) = damage.source.and_then(|s| self.get_unit(s)) {
            if self.unit(src).is_hallucination() {
                return;
            }
        }
        let weapon = &data.weapons[damage.weapon.index()];
        let unit_type = self.unit(index).unit_type;
        let utype = &data.units[unit_type.index()];

        let percent = crate::data::damage_percent(weapon.damage_type, utype.unit_size);
        let armor_level = utype.armor_upgrade.map_or(0, |u| {
            let levels = &self.players[self.unit(index).owner as usize].upgrade_levels;
            i32::from(levels.get(u.index()).copied().unwrap_or(0))
        });
        let armor = utype.armor + armor_level;

        let mut dmg = Fp8::integer(damage.amount);
        if self.unit(index).is_hallucination() {
            dmg = dmg * 2;
        }

        // defensive matrix absorbs before anything else
        {
            let unit = self.unit_mut(index);
            if unit.defensive_matrix_hp > Fp8::ZERO {
                let absorbed = unit.defensive_matrix_hp.min(dmg);
                unit.defensive_matrix_hp = unit.defensive_matrix_hp - absorbed;
                dmg = dmg - absorbed;
                if dmg == Fp8::ZERO {
                    return;
                }
            }
        }

        dmg = Fp8::multiply_divide(dmg, Fp8::integer(percent), Fp8::integer(100));

        // shields take their share before armor applies
        {
            let unit = self.unit_mut(index);
            if utype.has_shields && unit.shields > Fp8::ZERO {
                let absorbed = unit.shields.min(dmg);
                unit.shields = unit.shields - absorbed;
                dmg = dmg - absorbed;
            }
        }
        if dmg > Fp8::ZERO {
            // armor reduction floors at 1/8 point
            let after_armor = (dmg - Fp8::integer(armor)).max(Fp8::from_raw(32));
            let unit = self.unit_mut(index);
            unit.hp = unit.hp - after_armor;
            unit.last_attacking_player = damage.owner;
        }
        if self.unit(index).hp <= Fp8::ZERO {
            self.unit_mut(index).hp = Fp8::ZERO;
            if let Some(src) = damage.source.and_then(|s| self.get_unit(s)) {
                self.unit_mut(src).kill_count += 1;
            }
            self.kill_unit(data, events, index);
        }
    }

    // ========================================================================
    // ORDER QUEUE
    // ========================================================================

    /// Replace the current order immediately, clearing the queue.
    pub fn set_unit_order(&mut self, index: u16, order: crate::data::OrderTypeId, target: OrderTarget) {
        self.clear_order_queue(index);
        let unit = self.unit_mut(index);
        unit.order_type = order;
        unit.order_state = 0;
        unit.order_target = target;
        unit.main_order_timer = 0;
        unit.order_signal = 0;
        unit.status_flags.remove(StatusFlags::ORDER_NOT_INTERRUPTIBLE);
    }

    /// Append to the order queue; falls back to an immediate order when the
    /// order pool has no room.
    pub fn enqueue_order(
        &mut self,
        index: u16,
        order: crate::data::OrderTypeId,
        target: OrderTarget,
    ) {
        let record = OrderRecord { order_type: order, target, next: None };
        let Ok(record_index) = self.orders.allocate(record) else {
            log::warn!("order pool exhausted, order {} applied immediately", order.0);
            self.set_unit_order(index, order, target);
            return;
        };
        let unit = self.unit_mut(index);
        unit.order_queue_count += 1;
        match unit.order_queue_head {
            None => unit.order_queue_head = Some(record_index),
            Some(head) => {
                let mut cur = head;
                loop {
                    let next = self.orders.get(cur).and_then(|r| r.next);
                    match next {
                        Some(n) => cur = n,
                        None => break,
                    }
                }
                if let Some(rec) = self.orders.get_mut(cur) {
                    rec.next = Some(record_index);
                }
            }
        }
    }

    /// Pop the next queued order into the current slot; idle order when
    /// the queue is empty.
    pub fn activate_next_order(&mut self, data: &GameData, index: u16) {
        let head = self.unit(index).order_queue_head;
        match head {
            Some(record_index) => {
                let record = self
                    .orders
                    .release(record_index)
                    .expect("order queue head must be live");
                let unit = self.unit_mut(index);
                unit.order_queue_head = record.next;
                unit.order_queue_count -= 1;
                unit.order_type = record.order_type;
                unit.order_state = 0;
                unit.order_target = record.target;
                unit.main_order_timer = 0;
                unit.order_signal = 0;
            }
            None => {
                let idle = data.units[self.unit(index).unit_type.index()].return_to_idle;
                let unit = self.unit_mut(index);
                unit.order_type = idle;
                unit.order_state = 0;
                unit.order_target = OrderTarget::default();
                unit.main_order_timer = 0;
            }
        }
    }

    pub fn clear_order_queue(&mut self, index: u16) {
        let mut cur = self.unit_mut(index).order_queue_head.take();
        self.unit_mut(index).order_queue_count = 0;
        while let Some(record_index) = cur {
            cur = self.orders.release(record_index).ok().and_then(|r| r.next);
        }
    }

    // ========================================================================
    // MOVEMENT SUPPORT
    // ========================================================================

    /// Move a unit's center, keeping sprite, subpixel position and the
    /// spatial index in sync.
    pub fn set_unit_position(&mut self, data: &GameData, index: u16, pos: Xy) {
        let pos = self.terrain.pixel_bounds().clamp(pos);
        let unit_type = self.unit(index).unit_type;
        {
            let unit = self.unit_mut(index);
            unit.flingy.position = pos;
            unit.flingy.exact_position = XyFp8::from_xy(pos);
        }
        let sprite = self.unit(index).sprite;
        self.set_sprite_position(sprite, pos);
        if self.finder.contains(index) {
            self.finder.update(index, Self::type_bounds(data, unit_type, pos));
        }
        if let Some(sub) = self.unit(index).subunit {
            if let Some(sub_index) = self.get_unit(sub) {
                self.set_unit_position(data, sub_index, pos);
            }
        }
    }

    /// Whether ground at `pos` blocks a collision-enabled ground unit,
    /// either by terrain or by another collidable unit.
    pub fn ground_blocked(&self, data: &GameData, index: u16, pos: Xy) -> Option<UnitId> {
        let unit_type = self.unit(index).unit_type;
        let bounds = Self::type_bounds(data, unit_type, pos);
        for other in self.finder.find(bounds) {
            if other == index {
                continue;
            }
            let other_unit = self.unit(other);
            if !other_unit.status_flags.contains(StatusFlags::COLLISION) {
                continue;
            }
            if other_unit.is_in_air() != self.unit(index).is_in_air() {
                continue;
            }
            let other_bounds = Self::type_bounds(data, other_unit.unit_type, other_unit.position());
            if other_bounds.intersects(bounds) {
                return Some(self.unit_id(other));
            }
        }
        None
    }

    // ========================================================================
    // VICTORY
    // ========================================================================

    /// A player's defeat predicate for the configured game type.
    pub fn is_defeated(&self, data: &GameData, player: u8) -> bool {
        let units = &self.player_units[player as usize];
        match self.game_type {
            GameType::Melee => !units.iter().any(|id| {
                self.get_unit(*id).is_some_and(|i| {
                    data.units[self.unit(i).unit_type.index()].is_building()
                })
            }),
            GameType::UseMapSettings => units.is_empty(),
        }
    }

    // ========================================================================
    // SELECTIONS
    // ========================================================================

    /// Add to a selection honoring the 12-unit cap; silently drops extras.
    pub fn select_add(&mut self, player: u8, id: UnitId) {
        let selection = &mut self.selections[player as usize];
        if selection.len() < MAX_SELECTION && !selection.contains(&id) {
            selection.push(id);
        }
    }

    // ========================================================================
    // INVARIANT CHECKS
    // ========================================================================

    /// Structural invariants checked by tests after each step.
    pub fn check_invariants(&self, data: &GameData) -> SimResult<()> {
        self.finder.validate().map_err(SimError::LogicError)?;
        for (index, unit) in self.units.iter() {
            if unit.order_type == orders::DIE {
                continue;
            }
            let sprite = self
                .sprites
                .get(unit.sprite)
                .ok_or_else(|| SimError::LogicError(format!("unit {index} lost its sprite")))?;
            if sprite.main_image.is_none() {
                return Err(SimError::LogicError(format!("unit {index} sprite has no main image")));
            }
            let row = (sprite.position.y / TILE_SIZE).clamp(0, self.terrain.height as i32 - 1);
            if !self.sprites_by_row[row as usize].contains(&unit.sprite) {
                return Err(SimError::LogicError(format!(
                    "unit {index} sprite missing from row bucket {row}"
                )));
            }
            let utype = &data.units[unit.unit_type.index()];
            if unit.hp > utype.hit_points {
                return Err(SimError::LogicError(format!("unit {index} hp above type maximum")));
            }
            if unit.shields > Fp8::integer(utype.shield_points) {
                return Err(SimError::LogicError(format!("unit {index} shields above type maximum")));
            }
            if unit.energy > utype.max_energy() {
                return Err(SimError::LogicError(format!("unit {index} energy above maximum")));
            }
            if utype.is_building() && unit.status_flags.contains(StatusFlags::GROUNDED_BUILDING) {
                let footprint = self.building_footprint(utype, unit.position());
                for ty in footprint.from.y..footprint.to.y {
                    for tx in footprint.from.x..footprint.to.x {
                        let tile = self
                            .terrain
                            .tile(Xy::new(tx, ty))
                            .ok_or_else(|| SimError::LogicError(format!("unit {index} footprint off-map")))?;
                        if !tile.flags.contains(TileFlags::OCCUPIED) {
                            return Err(SimError::LogicError(format!(
                                "building {index} tile ({tx}, {ty}) not flagged occupied"
                            )));
                        }
                    }
                }
            }
            let indexed = self.finder.contains(index);
            if indexed == unit.is_hidden() {
                return Err(SimError::LogicError(format!(
                    "unit {index} finder membership disagrees with hidden state"
                )));
            }
        }
        // supply ledgers match the live unit set
        for player in 0..MAX_PLAYERS as u8 {
            let mut used = [0i32; 3];
            for id in &self.player_units[player as usize] {
                if let Some(index) = self.get_unit(*id) {
                    let utype = &data.units[self.unit(index).unit_type.index()];
                    let slot = match utype.race {
                        Race::Zerg => 0,
                        Race::Terran => 1,
                        Race::Protoss => 2,
                        Race::None => continue,
                    };
                    used[slot] += utype.supply_required;
                }
            }
            for (slot, expect) in used.iter().enumerate() {
                let actual = self.players[player as usize].supply[slot].used;
                if actual != *expect {
                    return Err(SimError::LogicError(format!(
                        "player {player} supply slot {slot}: ledger {actual}, units say {expect}"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    fn world() -> (SimState, Arc<GameData>, EventQueue) {
        let data = Arc::new(fixtures::game_data());
        let state = fixtures::blank_state(64, 64, 42);
        (state, data, EventQueue::default())
    }

    #[test]
    fn test_create_and_complete_unit() {
        let (mut state, data, _events) = world();
        let id = state
            .create_unit(&data, fixtures::MARINE, 0, Xy::new(100, 100))
            .unwrap();
        let index = state.get_unit(id).unwrap();
        assert!(!state.unit(index).is_completed());
        state.complete_unit(&data, index).unwrap();
        assert!(state.unit(index).is_completed());
        assert_eq!(state.unit(index).hp, data.units[fixtures::MARINE.index()].hit_points);
        assert_eq!(state.players[0].supply[1].used, 2);
        state.check_invariants(&data).unwrap();
    }

    #[test]
    fn test_unit_pool_capacity_is_enforced() {
        let (mut state, data, _events) = world();
        // fill the pool
        for _ in 0..UNIT_CAPACITY {
            state
                .place_completed_unit(&data, fixtures::MARINE, 0, Xy::new(100, 100))
                .unwrap();
        }
        let frame_rng = state.rng;
        let err = state.create_unit(&data, fixtures::MARINE, 0, Xy::new(100, 100));
        assert_eq!(err.unwrap_err(), SimError::OutOfCapacity("units"));
        // failed create left the world unchanged
        assert_eq!(state.units.len(), UNIT_CAPACITY);
        assert_eq!(state.rng, frame_rng);
    }

    #[test]
    fn test_stale_unit_id_fails_lookup() {
        let (mut state, data, mut events) = world();
        let id = state
            .place_completed_unit(&data, fixtures::MARINE, 0, Xy::new(100, 100))
            .unwrap();
        let index = state.get_unit(id).unwrap();
        state.destroy_unit(&data, &mut events, index);
        assert!(state.get_unit(id).is_none());
        // slot reuse gets a fresh generation
        let id2 = state
            .place_completed_unit(&data, fixtures::MARINE, 0, Xy::new(100, 100))
            .unwrap();
        assert_eq!(id2.index(), id.index());
        assert_ne!(id2, id);
        assert!(state.get_unit(id2).is_some());
    }

    #[test]
    fn test_destroy_refunds_supply_and_clears_selection() {
        let (mut state, data, mut events) = world();
        let id = state
            .place_completed_unit(&data, fixtures::MARINE, 0, Xy::new(100, 100))
            .unwrap();
        state.select_add(0, id);
        let index = state.get_unit(id).unwrap();
        state.destroy_unit(&data, &mut events, index);
        assert_eq!(state.players[0].supply[1].used, 0);
        assert_eq!(state.players[0].supply[1].provided, 0);
        assert!(state.selections[0].is_empty());
        assert!(state.player_units[0].is_empty());
        assert!(events.events.contains(&SimEvent::UnitDestroyed(id)));
    }

    #[test]
    fn test_order_queue_roundtrip() {
        let (mut state, data, _events) = world();
        let id = state
            .place_completed_unit(&data, fixtures::MARINE, 0, Xy::new(100, 100))
            .unwrap();
        let index = state.get_unit(id).unwrap();
        state.set_unit_order(index, orders::MOVE, OrderTarget { pos: Xy::new(5, 5), ..Default::default() });
        state.enqueue_order(index, orders::STOP, OrderTarget::default());
        state.enqueue_order(index, orders::MOVE, OrderTarget { pos: Xy::new(9, 9), ..Default::default() });
        assert_eq!(state.unit(index).order_queue_count, 2);
        state.activate_next_order(&data, index);
        assert_eq!(state.unit(index).order_type, orders::STOP);
        state.activate_next_order(&data, index);
        assert_eq!(state.unit(index).order_type, orders::MOVE);
        assert_eq!(state.unit(index).order_target.pos, Xy::new(9, 9));
        // empty queue falls back to the type's idle order
        state.activate_next_order(&data, index);
        assert_eq!(
            state.unit(index).order_type,
            data.units[fixtures::MARINE.index()].return_to_idle
        );
    }

    #[test]
    fn test_damage_shields_before_hull() {
        let (mut state, data, mut events) = world();
        let id = state
            .place_completed_unit(&data, fixtures::ZEALOT, 1, Xy::new(200, 200))
            .unwrap();
        let index = state.get_unit(id).unwrap();
        let full_hp = state.unit(index).hp;
        let full_shields = state.unit(index).shields;
        state.apply_damage(
            &data,
            &mut events,
            &QueuedDamage {
                target: id,
                amount: 10,
                weapon: fixtures::RIFLE,
                source: None,
                owner: 0,
            },
        );
        assert_eq!(state.unit(index).hp, full_hp);
        assert_eq!(state.unit(index).shields, full_shields - Fp8::integer(10));
    }

    #[test]
    fn test_lethal_damage_kills_and_releases() {
        let (mut state, data, mut events) = world();
        let id = state
            .place_completed_unit(&data, fixtures::MARINE, 1, Xy::new(200, 200))
            .unwrap();
        state.apply_damage(
            &data,
            &mut events,
            &QueuedDamage { target: id, amount: 9999, weapon: fixtures::RIFLE, source: None, owner: 0 },
        );
        assert!(events.events.contains(&SimEvent::UnitKilled(id)));
        // death animation pending: unit still allocated, out of the finder
        let index = id.index();
        assert_eq!(state.unit(index).order_type, orders::DIE);
        assert!(!state.finder.contains(index));
    }
}
