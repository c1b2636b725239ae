//! The per-player command dispatcher.
//!
//! Actions arrive as packed `(player, opcode, payload)` records - from a
//! replay stream or an embedder - and are applied at the top of the tick,
//! in arrival order with a stable player-id sort for equal frames. The
//! dispatcher itself never mutates world state except through the order
//! layer helpers below.

use crate::components::{OrderTarget, StatusFlags, UnitId, MAX_SELECTION};
use crate::data::{orders, GameData, OrderTypeId, Race, UnitTypeFlags, UnitTypeId};
use crate::errors::{SimError, SimFault, SimResult};
use crate::fixed::{xy_length, Rect, Xy};
use crate::state::{EventQueue, SimEvent, SimState, StaticData};
use crate::terrain::TILE_SIZE;
use bevy_ecs::prelude::*;
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

pub const ACTION_SELECT: u8 = 9;
pub const ACTION_SHIFT_SELECT: u8 = 10;
pub const ACTION_DESELECT: u8 = 11;
pub const ACTION_BUILD: u8 = 12;
pub const ACTION_DEFAULT_ORDER: u8 = 20;
pub const ACTION_ORDER: u8 = 21;
pub const ACTION_STOP: u8 = 26;
pub const ACTION_TRAIN: u8 = 31;
pub const ACTION_LEAVE_GAME: u8 = 87;

/// A decoded player command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ActionData {
    Select(Vec<UnitId>),
    ShiftSelect(Vec<UnitId>),
    Deselect(Vec<UnitId>),
    Build { order: OrderTypeId, tile: Xy, unit_type: UnitTypeId },
    DefaultOrder { pos: Xy, target: Option<UnitId>, target_type: Option<UnitTypeId>, queued: bool },
    Order { pos: Xy, target: Option<UnitId>, target_type: Option<UnitTypeId>, order: OrderTypeId, queued: bool },
    Stop { queued: bool },
    Train(UnitTypeId),
    LeaveGame(u8),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerAction {
    pub player: u8,
    pub data: ActionData,
}

impl PlayerAction {
    pub fn opcode(&self) -> u8 {
        match self.data {
            ActionData::Select(_) => ACTION_SELECT,
            ActionData::ShiftSelect(_) => ACTION_SHIFT_SELECT,
            ActionData::Deselect(_) => ACTION_DESELECT,
            ActionData::Build { .. } => ACTION_BUILD,
            ActionData::DefaultOrder { .. } => ACTION_DEFAULT_ORDER,
            ActionData::Order { .. } => ACTION_ORDER,
            ActionData::Stop { .. } => ACTION_STOP,
            ActionData::Train(_) => ACTION_TRAIN,
            ActionData::LeaveGame(_) => ACTION_LEAVE_GAME,
        }
    }
}

/// Actions staged for the current tick.
#[derive(Resource, Debug, Default)]
pub struct ActionQueue(pub Vec<PlayerAction>);

// ============================================================================
// WIRE FORMAT
// ============================================================================

const NONE_U16: u16 = 0xffff;

fn opt_unit(raw: u16) -> Option<UnitId> {
    if raw == NONE_U16 {
        None
    } else {
        Some(UnitId(raw))
    }
}

fn opt_type(raw: u16) -> Option<UnitTypeId> {
    if raw == NONE_U16 {
        None
    } else {
        Some(UnitTypeId(raw))
    }
}

struct PayloadReader<'a> {
    bytes: &'a [u8],
    at: usize,
}

impl<'a> PayloadReader<'a> {
    fn u8(&mut self) -> SimResult<u8> {
        let v = self
            .bytes
            .get(self.at)
            .copied()
            .ok_or_else(|| SimError::InvalidInput("truncated action payload".into()))?;
        self.at += 1;
        Ok(v)
    }

    fn u16(&mut self) -> SimResult<u16> {
        let end = self.at + 2;
        let slice = self
            .bytes
            .get(self.at..end)
            .ok_or_else(|| SimError::InvalidInput("truncated action payload".into()))?;
        self.at = end;
        Ok(LittleEndian::read_u16(slice))
    }

    fn finish(self) -> SimResult<()> {
        if self.at != self.bytes.len() {
            return Err(SimError::InvalidInput(format!(
                "{} trailing bytes in action payload",
                self.bytes.len() - self.at
            )));
        }
        Ok(())
    }
}

/// Decode one packed action record.
pub fn parse_action(player: u8, opcode: u8, payload: &[u8]) -> SimResult<PlayerAction> {
    if player as usize >= crate::state::MAX_PLAYERS {
        return Err(SimError::InvalidInput(format!("player id out of range: {player}")));
    }
    let mut r = PayloadReader { bytes: payload, at: 0 };
    let data = match opcode {
        ACTION_SELECT | ACTION_SHIFT_SELECT | ACTION_DESELECT => {
            let count = r.u8()? as usize;
            let mut ids = Vec::with_capacity(count);
            for _ in 0..count {
                ids.push(UnitId(r.u16()?));
            }
            match opcode {
                ACTION_SELECT => ActionData::Select(ids),
                ACTION_SHIFT_SELECT => ActionData::ShiftSelect(ids),
                _ => ActionData::Deselect(ids),
            }
        }
        ACTION_BUILD => {
            let order = OrderTypeId(r.u8()?);
            let tile = Xy::new(i32::from(r.u16()?), i32::from(r.u16()?));
            let unit_type = UnitTypeId(r.u16()?);
            ActionData::Build { order, tile, unit_type }
        }
        ACTION_DEFAULT_ORDER => {
            let pos = Xy::new(i32::from(r.u16()?), i32::from(r.u16()?));
            let target = opt_unit(r.u16()?);
            let target_type = opt_type(r.u16()?);
            let queued = r.u8()? != 0;
            ActionData::DefaultOrder { pos, target, target_type, queued }
        }
        ACTION_ORDER => {
            let pos = Xy::new(i32::from(r.u16()?), i32::from(r.u16()?));
            let target = opt_unit(r.u16()?);
            let target_type = opt_type(r.u16()?);
            let order = OrderTypeId(r.u8()?);
            let queued = r.u8()? != 0;
            ActionData::Order { pos, target, target_type, order, queued }
        }
        ACTION_STOP => ActionData::Stop { queued: r.u8()? != 0 },
        ACTION_TRAIN => ActionData::Train(UnitTypeId(r.u16()?)),
        ACTION_LEAVE_GAME => ActionData::LeaveGame(r.u8()?),
        other => {
            return Err(SimError::InvalidInput(format!("unknown action opcode {other}")));
        }
    };
    r.finish()?;
    Ok(PlayerAction { player, data })
}

/// Encode an action back to its packed payload (the replay writer's half
/// of the round trip).
pub fn encode_action(action: &PlayerAction) -> Vec<u8> {
    let mut out = Vec::new();
    let put_u16 = |out: &mut Vec<u8>, v: u16| out.extend_from_slice(&v.to_le_bytes());
    match &action.data {
        ActionData::Select(ids) | ActionData::ShiftSelect(ids) | ActionData::Deselect(ids) => {
            out.push(ids.len() as u8);
            for id in ids {
                put_u16(&mut out, id.0);
            }
        }
        ActionData::Build { order, tile, unit_type } => {
            out.push(order.0);
            put_u16(&mut out, tile.x as u16);
            put_u16(&mut out, tile.y as u16);
            put_u16(&mut out, unit_type.0);
        }
        ActionData::DefaultOrder { pos, target, target_type, queued } => {
            put_u16(&mut out, pos.x as u16);
            put_u16(&mut out, pos.y as u16);
            put_u16(&mut out, target.map_or(NONE_U16, |t| t.0));
            put_u16(&mut out, target_type.map_or(NONE_U16, |t| t.0));
            out.push(u8::from(*queued));
        }
        ActionData::Order { pos, target, target_type, order, queued } => {
            put_u16(&mut out, pos.x as u16);
            put_u16(&mut out, pos.y as u16);
            put_u16(&mut out, target.map_or(NONE_U16, |t| t.0));
            put_u16(&mut out, target_type.map_or(NONE_U16, |t| t.0));
            out.push(order.0);
            out.push(u8::from(*queued));
        }
        ActionData::Stop { queued } => out.push(u8::from(*queued)),
        ActionData::Train(unit_type) => put_u16(&mut out, unit_type.0),
        ActionData::LeaveGame(reason) => out.push(*reason),
    }
    out
}

// ============================================================================
// DISPATCH
// ============================================================================

/// Phase 2: drain the staged actions into the order layer.
pub fn action_dispatch_system(
    mut state: ResMut<SimState>,
    data: Res<StaticData>,
    mut queue: ResMut<ActionQueue>,
    mut events: ResMut<EventQueue>,
    mut fault: ResMut<SimFault>,
) {
    if fault.is_set() {
        return;
    }
    let data = data.0.clone();
    let mut staged = std::mem::take(&mut queue.0);
    // equal-frame actions resolve in player order, arrival order within
    staged.sort_by_key(|a| a.player);
    for action in staged {
        if action.player as usize >= crate::state::MAX_PLAYERS {
            fault.record(SimError::InvalidInput(format!(
                "action for player {} out of range",
                action.player
            )));
            return;
        }
        events.push(SimEvent::Action { player: action.player, action_id: action.opcode() });
        state.players[action.player as usize].action_count += 1;
        if let Err(err) = state.apply_action(&data, &mut events, &action) {
            fault.record(err);
            return;
        }
    }
}

/// Orders a player may issue directly. The original rejects internal
/// bookkeeping orders arriving over the wire; so do we.
fn order_allowed_from_action(order: OrderTypeId) -> bool {
    !matches!(
        order,
        orders::DIE
            | orders::DRONE_START_BUILD
            | orders::PLACE_BUILDING
            | orders::CONSTRUCTING_BUILDING
            | orders::INCOMPLETE_BUILDING
            | orders::ZERG_BIRTH
            | orders::MOVE_TO_GAS
            | orders::WAIT_FOR_GAS
            | orders::HARVEST_GAS
            | orders::WAIT_FOR_MINERALS
            | orders::MINING_MINERALS
            | orders::SPAWNING_LARVA
    )
}

/// Formation bookkeeping for a multi-unit move.
#[derive(Debug, Default, Clone, Copy)]
struct GroupMove {
    original_target: Xy,
    target: Xy,
    offset: Xy,
    has_offset: bool,
    target_in_unit_bounds: bool,
}

impl SimState {
    pub fn apply_action(
        &mut self,
        data: &GameData,
        events: &mut EventQueue,
        action: &PlayerAction,
    ) -> SimResult<()> {
        let player = action.player;
        match &action.data {
            ActionData::Select(ids) => {
                self.selections[player as usize].clear();
                for id in ids {
                    self.try_select(data, player, *id);
                }
                Ok(())
            }
            ActionData::ShiftSelect(ids) => {
                for id in ids {
                    self.try_select(data, player, *id);
                }
                Ok(())
            }
            ActionData::Deselect(ids) => {
                self.selections[player as usize].retain(|u| !ids.contains(u));
                Ok(())
            }
            ActionData::Build { order, tile, unit_type } => {
                self.action_build(data, player, *order, *tile, *unit_type)
            }
            ActionData::DefaultOrder { pos, target, target_type, queued } => {
                self.action_default_order(data, player, *pos, *target, *target_type, *queued)
            }
            ActionData::Order { pos, target, target_type, order, queued } => {
                self.action_order(data, player, *order, *pos, *target, *target_type, *queued)
            }
            ActionData::Stop { queued } => {
                self.action_stop(data, player, *queued);
                Ok(())
            }
            ActionData::Train(unit_type) => self.action_train(data, player, *unit_type),
            ActionData::LeaveGame(reason) => {
                log::info!("player {player} left the game (reason {reason})");
                crate::systems::victory::player_leaves(self, player);
                self.selections[player as usize].clear();
                let _ = events;
                Ok(())
            }
        }
    }

    /// Selection rules: stale ids are dropped, the cap is 12, and only the
    /// first slot may hold a single-selectable type.
    fn try_select(&mut self, data: &GameData, player: u8, id: UnitId) {
        let Some(index) = self.get_unit(id) else {
            return;
        };
        let selection = &self.selections[player as usize];
        if selection.len() >= MAX_SELECTION || selection.contains(&id) {
            return;
        }
        let single = data.units[self.unit(index).unit_type.index()]
            .flags
            .contains(UnitTypeFlags::SINGLE_SELECT);
        if single && !selection.is_empty() {
            return;
        }
        if !selection.is_empty() {
            // a single-selectable first slot locks the selection
            let first = selection[0];
            if let Some(first_index) = self.get_unit(first) {
                if data.units[self.unit(first_index).unit_type.index()]
                    .flags
                    .contains(UnitTypeFlags::SINGLE_SELECT)
                {
                    return;
                }
            }
        }
        self.selections[player as usize].push(id);
    }

    fn selected_own_units(&self, player: u8) -> Vec<u16> {
        self.selections[player as usize]
            .iter()
            .filter_map(|id| self.get_unit(*id))
            .filter(|i| self.unit(*i).owner == player)
            .collect()
    }

    fn action_stop(&mut self, data: &GameData, player: u8, queued: bool) {
        for index in self.selected_own_units(player) {
            self.issue_order(data, index, orders::STOP, OrderTarget::default(), queued);
        }
    }

    fn action_train(&mut self, data: &GameData, player: u8, unit_type: UnitTypeId) -> SimResult<()> {
        data.unit(unit_type)?;
        let Some(&producer) = self
            .selected_own_units(player)
            .iter()
            .find(|i| {
                let u = self.unit(**i);
                u.is_completed()
                    && data.units[u.unit_type.index()].flags.contains(UnitTypeFlags::PRODUCTION)
            })
        else {
            return Ok(());
        };
        if self.unit(producer).build_queue.len() >= 5 {
            return Ok(());
        }
        if !self.charge_unit_cost(data, player, unit_type) {
            return Ok(());
        }
        let was_empty = self.unit(producer).build_queue.is_empty();
        self.unit_mut(producer).build_queue.push(unit_type);
        if was_empty {
            self.unit_mut(producer).remaining_build_time = data.unit(unit_type)?.build_time;
        }
        self.unit_mut(producer).secondary_order_type = Some(orders::TRAIN);
        Ok(())
    }

    fn action_build(
        &mut self,
        data: &GameData,
        player: u8,
        order: OrderTypeId,
        tile: Xy,
        unit_type: UnitTypeId,
    ) -> SimResult<()> {
        if order == orders::PLACE_ADDON {
            // the addon placement test is unrecovered; refuse rather than guess
            return Err(SimError::Unsupported("addon placement".into()));
        }
        let utype = data.unit(unit_type)?.clone();

        // zerg larva trains route through the build opcode as a morph
        if order == orders::ZERG_UNIT_MORPH {
            let Some(&larva) = self
                .selected_own_units(player)
                .iter()
                .find(|i| data.larva_unit == Some(self.unit(**i).unit_type))
            else {
                return Ok(());
            };
            if !self.charge_unit_cost(data, player, unit_type) {
                return Ok(());
            }
            self.unit_mut(larva).order_unit_type = Some(unit_type);
            self.set_unit_order(larva, orders::ZERG_UNIT_MORPH, OrderTarget::default());
            return Ok(());
        }

        let Some(&worker) = self
            .selected_own_units(player)
            .iter()
            .find(|i| data.units[self.unit(**i).unit_type.index()].is_worker())
        else {
            return Ok(());
        };
        if !self.charge_unit_cost(data, player, unit_type) {
            return Ok(());
        }
        let center = Xy::new(
            tile.x * TILE_SIZE + utype.placement[0].max(TILE_SIZE) / 2,
            tile.y * TILE_SIZE + utype.placement[1].max(TILE_SIZE) / 2,
        );
        self.set_unit_order(
            worker,
            orders::PLACE_BUILDING,
            OrderTarget { pos: center, unit: None, unit_type: Some(unit_type) },
        );
        Ok(())
    }

    fn action_order(
        &mut self,
        data: &GameData,
        player: u8,
        order: OrderTypeId,
        pos: Xy,
        target: Option<UnitId>,
        target_type: Option<UnitTypeId>,
        queued: bool,
    ) -> SimResult<()> {
        data.order(order)?;
        if !order_allowed_from_action(order) {
            return Ok(());
        }
        let selected = self.selected_own_units(player);
        let mut group: Option<GroupMove> = None;
        for index in selected {
            let effective = self.resolve_weapon_targeting(data, index, order, target);
            let mut order_target = OrderTarget { pos, unit: target, unit_type: target_type };
            // formation-preserving offsets for plain position moves
            if target.is_none() && is_group_move_order(effective) {
                let g = *group.get_or_insert_with(|| self.calc_group_move(player, pos));
                order_target.pos = self.group_move_pos(index, &g);
            }
            self.issue_order(data, index, effective, order_target, queued);
        }
        Ok(())
    }

    fn action_default_order(
        &mut self,
        data: &GameData,
        player: u8,
        pos: Xy,
        target: Option<UnitId>,
        target_type: Option<UnitTypeId>,
        queued: bool,
    ) -> SimResult<()> {
        let selected = self.selected_own_units(player);
        let mut group: Option<GroupMove> = None;
        for index in selected {
            let code = data.units[self.unit(index).unit_type.index()].right_click_action;
            let Some(order) = self.default_order_for(data, code, index, target, target_type)? else {
                continue;
            };
            let mut order_target = OrderTarget { pos, unit: target, unit_type: target_type };
            if target.is_none() && is_group_move_order(order) {
                let g = *group.get_or_insert_with(|| self.calc_group_move(player, pos));
                order_target.pos = self.group_move_pos(index, &g);
            }
            self.issue_order(data, index, order, order_target, queued);
        }
        Ok(())
    }

    /// The right-click decision table, keyed by the unit type's
    /// `right_click_action` code.
    fn default_order_for(
        &self,
        data: &GameData,
        code: u8,
        index: u16,
        target: Option<UnitId>,
        target_type: Option<UnitTypeId>,
    ) -> SimResult<Option<OrderTypeId>> {
        let unit = self.unit(index);
        let utype = &data.units[unit.unit_type.index()];
        let target_index = target.and_then(|t| self.get_unit(t));
        let target_is_enemy = target_index.is_some_and(|t| {
            let owner = self.unit(t).owner;
            owner != unit.owner && self.players[owner as usize].is_active()
        });
        match code {
            0 => Ok(None),
            1 => {
                if unit.status_flags.contains(StatusFlags::GROUNDED_BUILDING) {
                    return Ok(None);
                }
                match target_index {
                    Some(t) => {
                        if target_is_enemy {
                            Ok(Some(orders::ATTACK1))
                        } else if self.transport_can_load(data, t, index) {
                            Ok(Some(orders::ENTER_TRANSPORT))
                        } else if unit.status_flags.contains(StatusFlags::BURROWED) {
                            Ok(Some(orders::MOVE))
                        } else {
                            Ok(Some(orders::FOLLOW))
                        }
                    }
                    None => Ok(Some(orders::MOVE)),
                }
            }
            2 => {
                if unit.status_flags.contains(StatusFlags::GROUNDED_BUILDING) {
                    if utype.flags.contains(UnitTypeFlags::PRODUCTION) {
                        return Ok(Some(if target.is_some() {
                            orders::RALLY_POINT_UNIT
                        } else {
                            orders::RALLY_POINT_TILE
                        }));
                    }
                    return Ok(None);
                }
                match target_index {
                    Some(t) => {
                        if self.transport_can_load(data, index, t) {
                            Ok(Some(orders::PICKUP_TRANSPORT))
                        } else if self.transport_can_load(data, t, index) {
                            Ok(Some(orders::ENTER_TRANSPORT))
                        } else if self.unit(t).status_flags.contains(StatusFlags::BURROWED) {
                            Ok(Some(orders::MOVE))
                        } else if self.unit_can_infest(data, index, t) {
                            Ok(Some(orders::CAST_INFESTATION))
                        } else if utype.flags.contains(UnitTypeFlags::SPELLCASTER)
                            && utype.race == Race::Terran
                        {
                            Ok(Some(orders::HEAL_MOVE))
                        } else {
                            Ok(Some(orders::FOLLOW))
                        }
                    }
                    None => {
                        let _ = target_type;
                        Ok(Some(orders::MOVE))
                    }
                }
            }
            5 => {
                let Some(t) = target_index else {
                    return self.default_order_for(data, 1, index, target, target_type);
                };
                // gather beats everything else for workers
                if utype.is_worker() {
                    let ttype = &data.units[self.unit(t).unit_type.index()];
                    if ttype.flags.contains(UnitTypeFlags::RESOURCE_CONTAINER) {
                        return Ok(Some(if self.unit(t).owner == crate::state::NEUTRAL_PLAYER {
                            orders::MOVE_TO_MINERALS
                        } else {
                            orders::MOVE_TO_GAS
                        }));
                    }
                    // an own unfinished terran frame resumes construction
                    let tflags = self.unit(t).status_flags;
                    if tflags.contains(StatusFlags::GROUNDED_BUILDING)
                        && !tflags.contains(StatusFlags::COMPLETED)
                        && self.unit(t).owner == unit.owner
                        && ttype.race == Race::Terran
                    {
                        return Ok(Some(orders::CONSTRUCTING_BUILDING));
                    }
                    if !target_is_enemy
                        && ttype.race == Race::Terran
                        && ttype.flags.contains(UnitTypeFlags::MECHANICAL)
                        && self.unit(t).is_completed()
                        && self.unit(t).hp < ttype.hit_points
                    {
                        return Ok(Some(orders::REPAIR));
                    }
                }
                self.default_order_for(data, 1, index, target, target_type)
            }
            6 => Ok(None),
            other => Err(SimError::Unsupported(format!(
                "right_click_action code {other} is not recovered"
            ))),
        }
    }

    fn transport_can_load(&self, data: &GameData, transport: u16, rider: u16) -> bool {
        let ttype = &data.units[self.unit(transport).unit_type.index()];
        if !ttype.flags.contains(UnitTypeFlags::TRANSPORT) {
            return false;
        }
        if self.unit(transport).owner != self.unit(rider).owner {
            return false;
        }
        let rtype = &data.units[self.unit(rider).unit_type.index()];
        if rtype.is_building() || rtype.is_flyer() {
            return false;
        }
        self.unit(transport).loaded_units.iter().any(Option::is_none)
    }

    fn unit_can_infest(&self, data: &GameData, caster: u16, target: u16) -> bool {
        let ctype = &data.units[self.unit(caster).unit_type.index()];
        if !(ctype.flags.contains(UnitTypeFlags::SPELLCASTER) && ctype.race == Race::Zerg) {
            return false;
        }
        let t = self.unit(target);
        let ttype = &data.units[t.unit_type.index()];
        !t.status_flags.contains(StatusFlags::INVINCIBLE)
            && ttype.flags.contains(UnitTypeFlags::RESOURCE_DEPOT)
            && t.is_completed()
            && t.hp * 2 < ttype.hit_points
    }

    /// Map weapon-targeting order ids onto the unit's own attack orders.
    fn resolve_weapon_targeting(
        &self,
        data: &GameData,
        index: u16,
        order: OrderTypeId,
        target: Option<UnitId>,
    ) -> OrderTypeId {
        let uses_weapon = data
            .orders
            .get(order.index())
            .is_some_and(|o| o.use_weapon_targeting);
        if !uses_weapon {
            return order;
        }
        if target.is_some() {
            data.units[self.unit(index).unit_type.index()].attack_unit
        } else {
            orders::ATTACK_MOVE
        }
    }

    /// Queue or preempt, honoring the current order's interruptibility.
    pub fn issue_order(
        &mut self,
        data: &GameData,
        index: u16,
        order: OrderTypeId,
        target: OrderTarget,
        queued: bool,
    ) {
        let current = self.unit(index).order_type;
        let interruptible = data
            .orders
            .get(current.index())
            .map_or(true, |o| o.interruptible)
            && !self
                .unit(index)
                .status_flags
                .contains(StatusFlags::ORDER_NOT_INTERRUPTIBLE);
        if queued || !interruptible {
            self.enqueue_order(index, order, target);
        } else {
            self.set_unit_order(index, order, target);
        }
    }

    // ========================================================================
    // GROUP MOVE
    // ========================================================================

    fn calc_group_move(&self, player: u8, target_pos: Xy) -> GroupMove {
        let mut g = GroupMove { original_target: target_pos, target: target_pos, ..GroupMove::default() };
        let selected = self.selected_own_units(player);
        if selected.len() < 2 {
            return g;
        }
        let mut area = Rect::new(Xy::new(i32::MAX, i32::MAX), Xy::new(0, 0));
        let mut sum = Xy::new(0, 0);
        let mut any_collision = false;
        for &index in &selected {
            let pos = self.unit(index).position();
            area.from.x = area.from.x.min(pos.x);
            area.from.y = area.from.y.min(pos.y);
            area.to.x = area.to.x.max(pos.x);
            area.to.y = area.to.y.max(pos.y);
            sum = sum + pos;
            if self
                .unit(index)
                .pathing_flags
                .contains(crate::components::PathingFlags::COLLIDABLE)
            {
                any_collision = true;
            }
        }
        let center = sum / selected.len() as i32;
        let spread_limit = if any_collision { 192 } else { 256 };
        if area.contains(target_pos) {
            g.target_in_unit_bounds = true;
        } else if area.to.x - area.from.x <= spread_limit && area.to.y - area.from.y <= spread_limit {
            g.offset = target_pos - center;
            g.has_offset = true;
        }
        g
    }

    fn group_move_pos(&self, index: u16, g: &GroupMove) -> Xy {
        let unit_pos = self.unit(index).position();
        let mut pos = g.original_target;
        if g.target_in_unit_bounds {
            // snap to the target's row/column within a tolerance
            pos = unit_pos;
            if pos.x <= g.target.x - 32 || pos.x >= g.target.x + 32 {
                pos.x = g.target.x;
            }
            if pos.y <= g.target.y - 32 || pos.y >= g.target.y + 32 {
                pos.y = g.target.y;
            }
        } else if g.has_offset {
            pos = unit_pos + g.offset;
        }
        pos = self.terrain.pixel_bounds().clamp(pos);

        // flyers take the offset position as is
        if !self
            .unit(index)
            .pathing_flags
            .contains(crate::components::PathingFlags::COLLIDABLE)
        {
            return pos;
        }
        // ground units only keep an offset that shares the target's region
        let Some(target_region) = self.regions.region_at_pixel(&self.terrain, g.target) else {
            return pos;
        };
        let same_or_neighbor = |p: Xy| {
            self.regions.region_at_pixel(&self.terrain, p).is_some_and(|r| {
                r == target_region
                    || self.regions.regions[target_region as usize]
                        .walkable_neighbors
                        .contains(&r)
            })
        };
        if self.terrain.is_walkable(pos) && same_or_neighbor(pos) {
            return pos;
        }
        // walk the offset point toward the target until the regions match
        let total = xy_length(g.target - pos).max(1);
        let step = (total / 4).clamp(2, 16);
        let mut distance = step;
        while distance <= total {
            let probe = pos + (g.target - pos) * distance / total;
            if same_or_neighbor(probe) {
                return probe;
            }
            distance += step;
        }
        g.target
    }
}

fn is_group_move_order(order: OrderTypeId) -> bool {
    matches!(order, orders::MOVE | orders::ATTACK_MOVE | orders::PATROL | orders::HEAL_MOVE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use std::sync::Arc;

    fn world() -> (SimState, Arc<GameData>, EventQueue) {
        (
            fixtures::blank_state(64, 64, 13),
            Arc::new(fixtures::game_data()),
            EventQueue::default(),
        )
    }

    fn act(state: &mut SimState, data: &GameData, events: &mut EventQueue, player: u8, data_: ActionData) {
        state
            .apply_action(data, events, &PlayerAction { player, data: data_ })
            .unwrap();
    }

    #[test]
    fn test_action_payload_round_trip() {
        let actions = vec![
            PlayerAction { player: 0, data: ActionData::Select(vec![UnitId(3), UnitId(9)]) },
            PlayerAction {
                player: 1,
                data: ActionData::Order {
                    pos: Xy::new(320, 480),
                    target: Some(UnitId(7)),
                    target_type: None,
                    order: orders::ATTACK_UNIT,
                    queued: true,
                },
            },
            PlayerAction { player: 2, data: ActionData::Train(UnitTypeId(4)) },
            PlayerAction { player: 3, data: ActionData::Stop { queued: false } },
        ];
        for action in actions {
            let bytes = encode_action(&action);
            let back = parse_action(action.player, action.opcode(), &bytes).unwrap();
            assert_eq!(back, action);
        }
    }

    #[test]
    fn test_selection_caps_at_twelve() {
        let (mut state, data, mut events) = world();
        let mut ids = Vec::new();
        for i in 0..13 {
            ids.push(
                state
                    .place_completed_unit(&data, fixtures::MARINE, 0, Xy::new(100 + i * 20, 100))
                    .unwrap(),
            );
        }
        act(&mut state, &data, &mut events, 0, ActionData::Select(ids.clone()));
        assert_eq!(state.selections[0].len(), 12);
        // the 13th is silently dropped
        assert!(!state.selections[0].contains(&ids[12]));
    }

    #[test]
    fn test_buildings_are_single_select() {
        let (mut state, data, mut events) = world();
        let cc = state
            .place_completed_unit(&data, fixtures::COMMAND_CENTER, 0, Xy::new(320, 320))
            .unwrap();
        let marine = state
            .place_completed_unit(&data, fixtures::MARINE, 0, Xy::new(100, 100))
            .unwrap();
        act(&mut state, &data, &mut events, 0, ActionData::Select(vec![cc, marine]));
        assert_eq!(state.selections[0], vec![cc]);
        // and a building cannot be added to a multi-selection
        act(&mut state, &data, &mut events, 0, ActionData::Select(vec![marine]));
        act(&mut state, &data, &mut events, 0, ActionData::ShiftSelect(vec![cc]));
        assert_eq!(state.selections[0], vec![marine]);
    }

    #[test]
    fn test_stale_id_is_ignored() {
        let (mut state, data, mut events) = world();
        let marine = state
            .place_completed_unit(&data, fixtures::MARINE, 0, Xy::new(100, 100))
            .unwrap();
        let index = state.get_unit(marine).unwrap();
        state.kill_unit(&data, &mut events, index);
        state.destroy_unit(&data, &mut events, index);
        act(&mut state, &data, &mut events, 0, ActionData::Select(vec![marine]));
        assert!(state.selections[0].is_empty());
    }

    #[test]
    fn test_right_click_enemy_attacks_ally_follows() {
        let (mut state, data, mut events) = world();
        let marine = state
            .place_completed_unit(&data, fixtures::MARINE, 0, Xy::new(100, 100))
            .unwrap();
        let friend = state
            .place_completed_unit(&data, fixtures::MARINE, 0, Xy::new(300, 100))
            .unwrap();
        let enemy = state
            .place_completed_unit(&data, fixtures::MARINE, 1, Xy::new(500, 100))
            .unwrap();
        act(&mut state, &data, &mut events, 0, ActionData::Select(vec![marine]));
        act(
            &mut state,
            &data,
            &mut events,
            0,
            ActionData::DefaultOrder { pos: Xy::new(500, 100), target: Some(enemy), target_type: None, queued: false },
        );
        let index = state.get_unit(marine).unwrap();
        assert_eq!(state.unit(index).order_type, orders::ATTACK1);
        act(
            &mut state,
            &data,
            &mut events,
            0,
            ActionData::DefaultOrder { pos: Xy::new(300, 100), target: Some(friend), target_type: None, queued: false },
        );
        assert_eq!(state.unit(index).order_type, orders::FOLLOW);
    }

    #[test]
    fn test_worker_right_click_on_minerals_gathers() {
        let (mut state, data, mut events) = world();
        let scv = state
            .place_completed_unit(&data, fixtures::SCV, 0, Xy::new(100, 100))
            .unwrap();
        let patch = state
            .place_completed_unit(
                &data,
                fixtures::MINERAL_FIELD,
                crate::state::NEUTRAL_PLAYER,
                Xy::new(400, 100),
            )
            .unwrap();
        act(&mut state, &data, &mut events, 0, ActionData::Select(vec![scv]));
        act(
            &mut state,
            &data,
            &mut events,
            0,
            ActionData::DefaultOrder { pos: Xy::new(400, 100), target: Some(patch), target_type: None, queued: false },
        );
        let index = state.get_unit(scv).unwrap();
        assert_eq!(state.unit(index).order_type, orders::MOVE_TO_MINERALS);
    }

    #[test]
    fn test_rally_on_production_building() {
        let (mut state, data, mut events) = world();
        let cc = state
            .place_completed_unit(&data, fixtures::COMMAND_CENTER, 0, Xy::new(320, 320))
            .unwrap();
        act(&mut state, &data, &mut events, 0, ActionData::Select(vec![cc]));
        act(
            &mut state,
            &data,
            &mut events,
            0,
            ActionData::DefaultOrder { pos: Xy::new(600, 600), target: None, target_type: None, queued: false },
        );
        // the rally handler runs on the next unit tick
        let index = state.get_unit(cc).unwrap();
        assert_eq!(state.unit(index).order_type, orders::RALLY_POINT_TILE);
        state.step_unit(&data, &mut events, index).unwrap();
        assert_eq!(state.unit(index).building.rally.pos, Xy::new(600, 600));
    }

    #[test]
    fn test_group_move_preserves_formation() {
        let (mut state, data, mut events) = world();
        let a = state
            .place_completed_unit(&data, fixtures::MARINE, 0, Xy::new(100, 100))
            .unwrap();
        let b = state
            .place_completed_unit(&data, fixtures::MARINE, 0, Xy::new(160, 100))
            .unwrap();
        act(&mut state, &data, &mut events, 0, ActionData::Select(vec![a, b]));
        act(
            &mut state,
            &data,
            &mut events,
            0,
            ActionData::Order {
                pos: Xy::new(500, 500),
                target: None,
                target_type: None,
                order: orders::MOVE,
                queued: false,
            },
        );
        let ia = state.get_unit(a).unwrap();
        let ib = state.get_unit(b).unwrap();
        let ta = state.unit(ia).order_target.pos;
        let tb = state.unit(ib).order_target.pos;
        // the 60 px spacing survives the move
        assert_eq!(tb - ta, Xy::new(60, 0));
        // group center lands on the clicked point
        assert_eq!((ta + tb) / 2, Xy::new(500, 500));
    }

    #[test]
    fn test_train_charges_and_queues() {
        let (mut state, data, mut events) = world();
        let cc = state
            .place_completed_unit(&data, fixtures::COMMAND_CENTER, 0, Xy::new(320, 320))
            .unwrap();
        state.players[0].minerals = 120;
        act(&mut state, &data, &mut events, 0, ActionData::Select(vec![cc]));
        act(&mut state, &data, &mut events, 0, ActionData::Train(fixtures::SCV));
        act(&mut state, &data, &mut events, 0, ActionData::Train(fixtures::SCV));
        // third one is unaffordable
        act(&mut state, &data, &mut events, 0, ActionData::Train(fixtures::SCV));
        let index = state.get_unit(cc).unwrap();
        assert_eq!(state.unit(index).build_queue.len(), 2);
        assert_eq!(state.players[0].minerals, 20);
        assert_eq!(state.unit(index).secondary_order_type, Some(orders::TRAIN));
    }

    #[test]
    fn test_addon_build_is_unsupported() {
        let (mut state, data, mut events) = world();
        let err = state.apply_action(
            &data,
            &mut events,
            &PlayerAction {
                player: 0,
                data: ActionData::Build {
                    order: orders::PLACE_ADDON,
                    tile: Xy::new(10, 10),
                    unit_type: fixtures::COMMAND_CENTER,
                },
            },
        );
        assert!(matches!(err, Err(SimError::Unsupported(_))));
    }
}
