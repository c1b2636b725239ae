//! Weapon targeting and firing.
//!
//! The attack cycle: face the target within the turn rate, gate on range
//! and cooldown, then hand control to the attack animation, whose
//! `attack` / `useweapon` opcodes call back in here to spawn the bullet
//! and reset the cooldown.

use crate::components::{StatusFlags, UnitId};
use crate::data::{GameData, WeaponId};
use crate::errors::SimResult;
use crate::fixed::{xy_length, Direction, Rect, Xy};
use crate::iscript::Anim;
use crate::state::{EventQueue, QueuedDamage, SimState};

/// Extra pixels beyond weapon range at which idle units notice enemies.
const ACQUISITION_BONUS: i32 = 64;
/// Heading error, in direction units, accepted when opening fire.
const ATTACK_ANGLE: u8 = 16;

impl SimState {
    /// Edge-to-edge distance between two units' bounding boxes.
    pub fn units_distance(&self, data: &GameData, a: u16, b: u16) -> i32 {
        let box_a = Self::type_bounds(data, self.unit(a).unit_type, self.unit(a).position());
        let box_b = Self::type_bounds(data, self.unit(b).unit_type, self.unit(b).position());
        rect_distance(box_a, box_b)
    }

    /// The weapon this unit would use against `target`, if any.
    pub fn weapon_against(&self, data: &GameData, attacker: u16, target: u16) -> Option<WeaponId> {
        let utype = &data.units[self.unit(attacker).unit_type.index()];
        if self.unit(target).is_in_air() {
            utype.air_weapon
        } else {
            utype.ground_weapon
        }
    }

    /// Range gate for a weapon against a unit target.
    pub fn target_in_weapon_range(
        &self,
        data: &GameData,
        attacker: u16,
        target: u16,
        weapon: WeaponId,
    ) -> bool {
        let w = &data.weapons[weapon.index()];
        let d = self.units_distance(data, attacker, target);
        d <= w.max_range && d >= w.min_range
    }

    /// Can `attacker` legally shoot `target` at all (ignoring range)?
    pub fn can_attack_unit(&self, data: &GameData, attacker: u16, target: u16) -> bool {
        if attacker == target {
            return false;
        }
        let target_unit = self.unit(target);
        if target_unit.status_flags.contains(StatusFlags::INVINCIBLE) || target_unit.is_hidden() {
            return false;
        }
        // cloaked targets need detection by the attacker's owner
        if target_unit.status_flags.contains(StatusFlags::CLOAKED)
            && target_unit.detected_flags & (1 << self.unit(attacker).owner) == 0
        {
            return false;
        }
        self.weapon_against(data, attacker, target).is_some()
    }

    fn is_enemy(&self, a: u8, b: u8) -> bool {
        a != b && self.players[b as usize].is_active()
    }

    /// Nearest attackable enemy within acquisition range, deterministic
    /// by (distance, unit index).
    pub fn acquire_target(&self, data: &GameData, attacker: u16) -> Option<UnitId> {
        let utype = &data.units[self.unit(attacker).unit_type.index()];
        let range = [utype.ground_weapon, utype.air_weapon]
            .iter()
            .flatten()
            .map(|w| data.weapons[w.index()].max_range)
            .max()?
            + ACQUISITION_BONUS;
        let pos = self.unit(attacker).position();
        let area = Rect::around(pos, Xy::new(range, range));
        let mut best: Option<(i32, u16)> = None;
        for candidate in self.finder.find(area) {
            if !self.is_enemy(self.unit(attacker).owner, self.unit(candidate).owner) {
                continue;
            }
            if !self.can_attack_unit(data, attacker, candidate) {
                continue;
            }
            let d = self.units_distance(data, attacker, candidate);
            if d > range {
                continue;
            }
            if best.map_or(true, |(bd, bi)| (d, candidate) < (bd, bi)) {
                best = Some((d, candidate));
            }
        }
        best.map(|(_, index)| self.unit_id(index))
    }

    /// One tick of the attack cycle against the current order target.
    ///
    /// Returns `true` while the attack is still in progress, `false` once
    /// the target is gone.
    pub fn attack_cycle(
        &mut self,
        data: &GameData,
        events: &mut EventQueue,
        attacker: u16,
        chase: bool,
    ) -> SimResult<bool> {
        let Some(target) = self
            .unit(attacker)
            .order_target
            .unit
            .and_then(|t| self.get_unit(t))
        else {
            return Ok(false);
        };
        if !self.can_attack_unit(data, attacker, target) {
            return Ok(false);
        }
        let Some(weapon) = self.weapon_against(data, attacker, target) else {
            return Ok(false);
        };

        let target_pos = self.unit(target).position();
        {
            let unit = self.unit_mut(attacker);
            unit.order_target.pos = target_pos;
            unit.flingy.next_target_waypoint = target_pos;
        }

        // range gate: close in or back off
        let in_range = self.target_in_weapon_range(data, attacker, target, weapon);
        let can_move = self.unit(attacker).status_flags.contains(StatusFlags::CAN_MOVE);
        if !in_range {
            if chase && can_move {
                self.set_move_target(
                    attacker,
                    crate::components::Target { pos: target_pos, unit: Some(self.unit_id(target)) },
                );
            }
            return Ok(true);
        }
        if can_move {
            self.stop_unit(attacker);
        }

        // facing gate
        let desired = Direction::of(target_pos - self.unit(attacker).position());
        let heading = self.unit(attacker).flingy.heading;
        let off = (desired - heading).raw().unsigned_abs();
        if off > ATTACK_ANGLE && self.unit(attacker).status_flags.contains(StatusFlags::CAN_TURN) {
            let rate = self.unit(attacker).flingy.turn_rate;
            let turned = heading.turn_towards(desired, rate);
            self.unit_mut(attacker).flingy.heading = turned;
            let main = self.sprite_main_image(self.unit(attacker).sprite);
            if let Some(main) = main {
                self.set_image_heading(data, main, turned);
            }
            return Ok(true);
        }

        // cooldown gate
        let cooldown = if self.unit(target).is_in_air() {
            self.unit(attacker).air_weapon_cooldown
        } else {
            self.unit(attacker).ground_weapon_cooldown
        };
        if cooldown > 0 {
            return Ok(true);
        }

        // hand over to the attack animation; its `attack` opcode fires
        let anim = if self.unit(target).is_in_air() { Anim::AirAttkInit } else { Anim::GndAttkInit };
        let sprite = self.unit(attacker).sprite;
        self.unit_mut(attacker)
            .flingy
            .movement_flags
            .insert(crate::components::MovementFlags::STARTING_ATTACK);
        self.sprite_set_animation(data, sprite, anim)?;
        let _ = events;
        Ok(true)
    }

    /// Fired from the iscript `attack` / `attackwith` opcodes.
    pub fn iscript_attack(
        &mut self,
        data: &GameData,
        events: &mut EventQueue,
        attacker: u16,
        slot: Option<u8>,
    ) -> SimResult<()> {
        let utype = &data.units[self.unit(attacker).unit_type.index()];
        let weapon = match slot {
            Some(1) => utype.ground_weapon,
            Some(2) => utype.air_weapon,
            _ => {
                let air = self
                    .unit(attacker)
                    .order_target
                    .unit
                    .and_then(|t| self.get_unit(t))
                    .is_some_and(|t| self.unit(t).is_in_air());
                if air {
                    utype.air_weapon
                } else {
                    utype.ground_weapon
                }
            }
        };
        let Some(weapon) = weapon else {
            return Ok(());
        };
        self.fire_unit_weapon(data, events, attacker, weapon)
    }

    /// Spawn the projectile and reset the cooldown.
    pub fn fire_unit_weapon(
        &mut self,
        data: &GameData,
        events: &mut EventQueue,
        attacker: u16,
        weapon: WeaponId,
    ) -> SimResult<()> {
        let w = data.weapons[weapon.index()].clone();
        let target = self.unit(attacker).order_target;
        let heading = self.unit(attacker).flingy.heading;
        let pos = self.unit(attacker).position()
            + crate::fixed::velocity_from(heading, crate::fixed::Fp8::integer(w.forward_offset))
                .to_xy()
            + Xy::new(0, -w.upward_offset);

        self.create_bullet(data, events, weapon, attacker, target.unit, target.pos, pos, heading)?;

        // cooldown: stim halves, the cooldown upgrade halves again, and
        // the stream adds a +-1 frame jitter
        let target_air = target
            .unit
            .and_then(|t| self.get_unit(t))
            .is_some_and(|t| self.unit(t).is_in_air());
        let mut cooldown = w.cooldown;
        if self.unit(attacker).stim_timer > 0 {
            cooldown /= 2;
        }
        if self.unit(attacker).status_flags.contains(StatusFlags::COOLDOWN_UPGRADE) {
            cooldown /= 2;
        }
        cooldown = (cooldown + self.rng.rand(20, -1, 1)).max(1);
        let unit = self.unit_mut(attacker);
        if target_air {
            unit.air_weapon_cooldown = cooldown;
        } else {
            unit.ground_weapon_cooldown = cooldown;
        }
        unit.status_flags.remove(StatusFlags::READY_TO_ATTACK);
        Ok(())
    }

    /// Direct melee strike from the `attackmelee` opcode: no projectile,
    /// damage staged against the order target.
    pub fn melee_hit(&mut self, data: &GameData, attacker: u16) {
        let Some(target) = self.unit(attacker).order_target.unit else {
            return;
        };
        if self.get_unit(target).is_none() {
            return;
        }
        let utype = &data.units[self.unit(attacker).unit_type.index()];
        let Some(weapon) = utype.ground_weapon else {
            return;
        };
        let owner = self.unit(attacker).owner;
        let amount = self.weapon_damage_amount(data, weapon, owner);
        let source = Some(self.unit_id(attacker));
        self.queue_damage(QueuedDamage { target, amount, weapon, source, owner });
        let cooldown = (data.weapons[weapon.index()].cooldown + self.rng.rand(21, -1, 1)).max(1);
        self.unit_mut(attacker).ground_weapon_cooldown = cooldown;
    }

    /// Weapon damage with the owner's upgrade bonus applied.
    pub fn weapon_damage_amount(&self, data: &GameData, weapon: WeaponId, owner: u8) -> i32 {
        let w = &data.weapons[weapon.index()];
        let level = w.upgrade.map_or(0, |u| {
            i32::from(
                self.players[owner as usize]
                    .upgrade_levels
                    .get(u.index())
                    .copied()
                    .unwrap_or(0),
            )
        });
        (w.damage_amount + w.damage_bonus * level) * w.damage_factor.max(1)
    }

    /// `castspell` opcode hook: the active spell order resolves here.
    pub fn iscript_cast_spell(
        &mut self,
        data: &GameData,
        events: &mut EventQueue,
        caster: u16,
    ) -> SimResult<()> {
        // the implemented spell set resolves in the order handlers; the
        // opcode only marks the animation moment
        let _ = (data, events, caster);
        Ok(())
    }
}

fn rect_distance(a: Rect, b: Rect) -> i32 {
    let dx = (b.from.x - (a.to.x - 1)).max(a.from.x - (b.to.x - 1)).max(0);
    let dy = (b.from.y - (a.to.y - 1)).max(a.from.y - (b.to.y - 1)).max(0);
    xy_length(Xy::new(dx, dy))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use std::sync::Arc;

    fn arena() -> (SimState, Arc<GameData>, EventQueue) {
        (
            fixtures::blank_state(64, 64, 3),
            Arc::new(fixtures::game_data()),
            EventQueue::default(),
        )
    }

    #[test]
    fn test_rect_distance_edges() {
        let a = Rect::new(Xy::new(0, 0), Xy::new(10, 10));
        let b = Rect::new(Xy::new(13, 0), Xy::new(20, 10));
        assert_eq!(rect_distance(a, b), 4);
        let c = Rect::new(Xy::new(5, 5), Xy::new(30, 30));
        assert_eq!(rect_distance(a, c), 0);
    }

    #[test]
    fn test_acquire_prefers_nearest_then_lowest_index() {
        let (mut state, data, _ev) = arena();
        let attacker = state
            .place_completed_unit(&data, fixtures::MARINE, 0, Xy::new(200, 200))
            .unwrap()
            .index();
        let far = state
            .place_completed_unit(&data, fixtures::MARINE, 1, Xy::new(340, 200))
            .unwrap();
        let near = state
            .place_completed_unit(&data, fixtures::MARINE, 1, Xy::new(260, 200))
            .unwrap();
        let picked = state.acquire_target(&data, attacker).unwrap();
        assert_eq!(picked, near);
        // equal distance: lower index wins
        let (mut state, data, _ev) = arena();
        let attacker = state
            .place_completed_unit(&data, fixtures::MARINE, 0, Xy::new(200, 200))
            .unwrap()
            .index();
        let left = state
            .place_completed_unit(&data, fixtures::MARINE, 1, Xy::new(140, 200))
            .unwrap();
        let _right = state
            .place_completed_unit(&data, fixtures::MARINE, 1, Xy::new(260, 200))
            .unwrap();
        assert_eq!(state.acquire_target(&data, attacker).unwrap(), left);
        let _ = far;
    }

    #[test]
    fn test_neutral_units_are_not_acquired() {
        let (mut state, data, _ev) = arena();
        let attacker = state
            .place_completed_unit(&data, fixtures::MARINE, 0, Xy::new(200, 200))
            .unwrap()
            .index();
        state
            .place_completed_unit(&data, fixtures::MINERAL_FIELD, crate::state::NEUTRAL_PLAYER, Xy::new(260, 200))
            .unwrap();
        assert!(state.acquire_target(&data, attacker).is_none());
    }

    #[test]
    fn test_fire_sets_cooldown_and_spawns_bullet() {
        let (mut state, data, mut events) = arena();
        let attacker = state
            .place_completed_unit(&data, fixtures::MARINE, 0, Xy::new(200, 200))
            .unwrap()
            .index();
        let victim = state
            .place_completed_unit(&data, fixtures::MARINE, 1, Xy::new(260, 200))
            .unwrap();
        state.unit_mut(attacker).order_target.unit = Some(victim);
        state.unit_mut(attacker).order_target.pos = Xy::new(260, 200);
        state
            .fire_unit_weapon(&data, &mut events, attacker, fixtures::RIFLE)
            .unwrap();
        assert!(state.unit(attacker).ground_weapon_cooldown >= 14);
        assert_eq!(state.bullets.len(), 1);
    }

    #[test]
    fn test_upgrade_raises_damage() {
        let (mut state, data, _ev) = arena();
        let base = state.weapon_damage_amount(&data, fixtures::RIFLE, 0);
        state.players[0].upgrade_levels[0] = 3;
        assert_eq!(state.weapon_damage_amount(&data, fixtures::RIFLE, 0), base + 3);
    }
}
