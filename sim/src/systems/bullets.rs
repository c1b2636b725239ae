//! Projectile lifecycle.
//!
//! Bullets are tiny flingies with a state machine: spawn per the weapon's
//! behavior, fly or home, then stage damage and play out a dying
//! animation. A target that dies in flight flips the bullet to `Dying` at
//! the original impact point.

use crate::components::{Bullet, BulletState, Flingy, StatusFlags, UnitId};
use crate::data::{GameData, HitType, WeaponBehavior, WeaponId};
use crate::errors::SimResult;
use crate::fixed::{velocity_from, xy_length, Direction, Fp8, Rect, Xy, XyFp8};
use crate::iscript::Anim;
use crate::sprites::IscriptCtx;
use crate::state::{EventQueue, QueuedDamage, SimState, StaticData};
use bevy_ecs::prelude::*;

/// Bounce targets chain within this radius.
const BOUNCE_RADIUS: i32 = 96;

impl SimState {
    /// Spawn a bullet for a fired weapon.
    #[allow(clippy::too_many_arguments)]
    pub fn create_bullet(
        &mut self,
        data: &GameData,
        events: &mut EventQueue,
        weapon: WeaponId,
        attacker: u16,
        target_unit: Option<UnitId>,
        target_pos: Xy,
        pos: Xy,
        heading: Direction,
    ) -> SimResult<()> {
        let w = data.weapons[weapon.index()].clone();
        let flingy_data = data.flingy(w.flingy)?.clone();
        let owner = self.unit(attacker).owner;

        // behavior decides where the projectile begins
        let spawn_pos = match w.behavior {
            WeaponBehavior::AppearOnTargetUnit | WeaponBehavior::AppearOnTargetSite
            | WeaponBehavior::PersistOnTargetSite | WeaponBehavior::AttackTarget3x3Area => target_pos,
            WeaponBehavior::AppearOnAttacker | WeaponBehavior::SuicideUnit => {
                self.unit(attacker).position()
            }
            WeaponBehavior::Fly | WeaponBehavior::GotoMaxRange | WeaponBehavior::Bounce => pos,
        };

        let sprite = self.create_sprite(&*data, flingy_data.sprite, spawn_pos, owner)?;
        let bullet = Bullet {
            flingy: Flingy {
                flingy_id: w.flingy,
                movement_type: flingy_data.movement_type,
                position: spawn_pos,
                exact_position: XyFp8::from_xy(spawn_pos),
                heading,
                top_speed: flingy_data.top_speed,
                current_speed: flingy_data.top_speed,
                acceleration: flingy_data.acceleration,
                turn_rate: flingy_data.turn_rate,
                ..Flingy::default()
            },
            sprite,
            state: BulletState::Init,
            weapon,
            owner,
            source_unit: Some(self.unit_id(attacker)),
            target_unit,
            target_pos,
            remaining_time: if w.lifetime > 0 { w.lifetime } else { i32::MAX },
            remaining_bounces: if w.behavior == WeaponBehavior::Bounce { 2 } else { 0 },
            ..Bullet::default()
        };
        match self.bullets.allocate(bullet) {
            Ok(_) => Ok(()),
            Err(err) => {
                self.destroy_sprite(sprite);
                let _ = events;
                Err(err)
            }
        }
    }

    /// Stage this bullet's damage, with splash resolution by hit type.
    pub fn bullet_deal_damage(&mut self, data: &GameData, bullet: u16) {
        let Some(b) = self.bullets.get(bullet) else {
            return;
        };
        let weapon = b.weapon;
        let owner = b.owner;
        let source = b.source_unit;
        let impact = b.target_pos;
        let target = b.target_unit;
        let bounce_divisor = 3i32.pow((2 - b.remaining_bounces).max(0) as u32);
        let w = data.weapons[weapon.index()].clone();
        let base = self.weapon_damage_amount(data, weapon, owner) / bounce_divisor.max(1);

        match w.hit_type {
            HitType::RadialSplash | HitType::EnemySplash => {
                let radius = w.outer_splash.max(1);
                let area = Rect::around(impact, Xy::new(radius, radius));
                for victim in self.finder.find(area) {
                    if w.hit_type == HitType::EnemySplash && self.unit(victim).owner == owner {
                        continue; // allies spared by enemy-only splash
                    }
                    let vb = Self::type_bounds(data, self.unit(victim).unit_type, self.unit(victim).position());
                    let d = point_rect_distance(impact, vb);
                    let percent = if d <= w.inner_splash {
                        100
                    } else if d <= w.medium_splash {
                        50
                    } else if d <= w.outer_splash {
                        25
                    } else {
                        continue;
                    };
                    let amount = base * percent / 100;
                    if amount > 0 {
                        self.queue_damage(QueuedDamage {
                            target: self.unit_id(victim),
                            amount,
                            weapon,
                            source,
                            owner,
                        });
                    }
                }
            }
            HitType::None | HitType::NormalHit => {
                if let Some(target) = target {
                    if self.get_unit(target).is_some() {
                        self.queue_damage(QueuedDamage { target, amount: base, weapon, source, owner });
                    }
                }
            }
        }
    }

    /// Pick the next bounce victim: nearest enemy around the impact,
    /// excluding the current and previous targets.
    fn next_bounce_target(&self, data: &GameData, bullet: u16) -> Option<UnitId> {
        let b = self.bullets.get(bullet)?;
        let exclude_a = b.target_unit.map(UnitId::index);
        let exclude_b = b.prev_bounce_unit.map(UnitId::index);
        let area = Rect::around(b.target_pos, Xy::new(BOUNCE_RADIUS, BOUNCE_RADIUS));
        let mut best: Option<(i32, u16)> = None;
        for candidate in self.finder.find(area) {
            if Some(candidate) == exclude_a || Some(candidate) == exclude_b {
                continue;
            }
            let victim = self.unit(candidate);
            if victim.owner == b.owner || !self.players[victim.owner as usize].is_active() {
                continue;
            }
            if victim.status_flags.contains(StatusFlags::INVINCIBLE) {
                continue;
            }
            let d = xy_length(victim.position() - b.target_pos);
            if d > BOUNCE_RADIUS {
                continue;
            }
            if best.map_or(true, |(bd, bi)| (d, candidate) < (bd, bi)) {
                best = Some((d, candidate));
            }
        }
        let _ = data;
        best.map(|(_, index)| self.unit_id(index))
    }

    /// One tick for one bullet. Returns `true` when the bullet's slot was
    /// released.
    fn step_bullet(&mut self, data: &GameData, events: &mut EventQueue, index: u16) -> SimResult<bool> {
        let Some(b) = self.bullets.get(index) else {
            return Ok(true);
        };
        let state = b.state;
        let sprite = b.sprite;
        let weapon = data.weapons[b.weapon.index()].clone();

        match state {
            BulletState::Init => {
                let next = match weapon.behavior {
                    WeaponBehavior::AppearOnTargetUnit
                    | WeaponBehavior::AppearOnTargetSite
                    | WeaponBehavior::AppearOnAttacker
                    | WeaponBehavior::AttackTarget3x3Area
                    | WeaponBehavior::SuicideUnit => {
                        // contact weapons hit on their first tick
                        self.bullet_impact(data, events, index)?;
                        BulletState::Dying
                    }
                    WeaponBehavior::PersistOnTargetSite => BulletState::DamageOverTime,
                    WeaponBehavior::Bounce => BulletState::Bounce,
                    WeaponBehavior::Fly | WeaponBehavior::GotoMaxRange => {
                        if self.bullets.get(index).expect("live").target_unit.is_some() {
                            BulletState::Follow
                        } else {
                            BulletState::Move
                        }
                    }
                };
                if let Some(b) = self.bullets.get_mut(index) {
                    b.state = next;
                }
                Ok(false)
            }
            BulletState::Move => {
                if self.advance_bullet(data, index) {
                    self.bullet_impact(data, events, index)?;
                    self.bullet_begin_dying(data, events, index)?;
                }
                Ok(false)
            }
            BulletState::Follow | BulletState::Bounce => {
                // homing: track the live target, die in place if it died
                let target_alive = {
                    let b = self.bullets.get(index).expect("live");
                    b.target_unit.and_then(|t| self.get_unit(t))
                };
                match target_alive {
                    Some(t) => {
                        let pos = self.unit(t).position();
                        self.bullets.get_mut(index).expect("live").target_pos = pos;
                    }
                    None => {
                        self.bullet_begin_dying(data, events, index)?;
                        return Ok(false);
                    }
                }
                if self.advance_bullet(data, index) {
                    self.bullet_impact(data, events, index)?;
                    let bounces = self.bullets.get(index).map_or(0, |b| b.remaining_bounces);
                    if state == BulletState::Bounce && bounces > 0 {
                        if let Some(next) = self.next_bounce_target(data, index) {
                            let b = self.bullets.get_mut(index).expect("live");
                            b.prev_bounce_unit = b.target_unit;
                            b.target_unit = Some(next);
                            b.remaining_bounces -= 1;
                            return Ok(false);
                        }
                    }
                    self.bullet_begin_dying(data, events, index)?;
                }
                Ok(false)
            }
            BulletState::DamageOverTime => {
                let expired = {
                    let b = self.bullets.get_mut(index).expect("live");
                    b.remaining_time -= 1;
                    b.remaining_time <= 0
                };
                // periodic field damage on a coarse cadence
                if self.frame % 8 == 0 {
                    self.bullet_deal_damage(data, index);
                }
                if expired {
                    self.bullet_begin_dying(data, events, index)?;
                }
                Ok(false)
            }
            BulletState::HitNearTarget => {
                self.bullet_impact(data, events, index)?;
                self.bullet_begin_dying(data, events, index)?;
                Ok(false)
            }
            BulletState::Dying => {
                // wait for the death animation to tear the sprite down
                if self.sprites.get(sprite).is_none() {
                    let _ = self.bullets.release(index);
                    return Ok(true);
                }
                Ok(false)
            }
        }
    }

    /// Integrate the bullet toward its target position; true on arrival
    /// or lifetime expiry.
    fn advance_bullet(&mut self, data: &GameData, index: u16) -> bool {
        let (pos, target, speed, expired) = {
            let b = self.bullets.get_mut(index).expect("live");
            b.remaining_time -= 1;
            (
                b.flingy.position,
                b.target_pos,
                b.flingy.top_speed,
                b.remaining_time <= 0,
            )
        };
        let dist = xy_length(target - pos);
        if expired || Fp8::integer(dist) <= speed {
            let b = self.bullets.get_mut(index).expect("live");
            b.flingy.position = target;
            b.flingy.exact_position = XyFp8::from_xy(target);
            let sprite = b.sprite;
            self.set_sprite_position(sprite, target);
            return true;
        }
        let dir = Direction::of(target - pos);
        let exact = self.bullets.get(index).expect("live").flingy.exact_position
            + velocity_from(dir, speed);
        let new_pos = exact.to_xy();
        {
            let b = self.bullets.get_mut(index).expect("live");
            b.flingy.heading = dir;
            b.flingy.exact_position = exact;
            b.flingy.position = new_pos;
        }
        let sprite = self.bullets.get(index).expect("live").sprite;
        self.set_sprite_position(sprite, new_pos);
        let _ = data;
        false
    }

    fn bullet_impact(&mut self, data: &GameData, events: &mut EventQueue, index: u16) -> SimResult<()> {
        self.bullet_deal_damage(data, index);
        let _ = events;
        Ok(())
    }

    fn bullet_begin_dying(&mut self, data: &GameData, events: &mut EventQueue, index: u16) -> SimResult<()> {
        let sprite = self.bullets.get(index).expect("live").sprite;
        self.bullets.get_mut(index).expect("live").state = BulletState::Dying;
        let _ = events;
        self.sprite_set_animation(data, sprite, Anim::Death)
    }
}

/// Phase 4: step every live bullet, then its sprite animation.
pub fn bullet_update_system(
    mut state: ResMut<SimState>,
    data: Res<StaticData>,
    mut events: ResMut<EventQueue>,
    mut fault: ResMut<crate::errors::SimFault>,
) {
    if fault.is_set() {
        return;
    }
    let data = data.0.clone();
    let bullets = state.bullets.live_indices();
    for index in bullets {
        let released = match state.step_bullet(&data, &mut events, index) {
            Ok(released) => released,
            Err(err) => {
                fault.record(err);
                return;
            }
        };
        if !released {
            let sprite = state.bullets.get(index).map(|b| b.sprite);
            if let Some(sprite) = sprite {
                let ctx = IscriptCtx { unit: None, bullet: Some(index) };
                if let Err(err) = state.step_sprite(&data, &mut events, sprite, ctx) {
                    fault.record(err);
                    return;
                }
            }
        }
    }
}

fn point_rect_distance(p: Xy, r: Rect) -> i32 {
    let dx = (r.from.x - p.x).max(p.x - (r.to.x - 1)).max(0);
    let dy = (r.from.y - p.y).max(p.y - (r.to.y - 1)).max(0);
    xy_length(Xy::new(dx, dy))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use std::sync::Arc;

    fn arena() -> (SimState, Arc<GameData>, EventQueue) {
        (
            fixtures::blank_state(64, 64, 9),
            Arc::new(fixtures::game_data()),
            EventQueue::default(),
        )
    }

    fn fire(
        state: &mut SimState,
        data: &GameData,
        events: &mut EventQueue,
        weapon: WeaponId,
        attacker: u16,
        target: UnitId,
    ) {
        let target_pos = state.unit(state.get_unit(target).unwrap()).position();
        state.unit_mut(attacker).order_target.unit = Some(target);
        state.unit_mut(attacker).order_target.pos = target_pos;
        state.fire_unit_weapon(data, events, attacker, weapon).unwrap();
    }

    #[test]
    fn test_instant_weapon_hits_on_first_tick() {
        let (mut state, data, mut events) = arena();
        let attacker = state
            .place_completed_unit(&data, fixtures::MARINE, 0, Xy::new(200, 200))
            .unwrap()
            .index();
        let victim = state
            .place_completed_unit(&data, fixtures::MARINE, 1, Xy::new(260, 200))
            .unwrap();
        fire(&mut state, &data, &mut events, fixtures::RIFLE, attacker, victim);
        let bullet = state.bullets.live_indices()[0];
        state.step_bullet(&data, &mut events, bullet).unwrap();
        assert_eq!(state.damage_queue.len(), 1);
        assert_eq!(state.damage_queue[0].target, victim);
        assert_eq!(state.bullets.get(bullet).unwrap().state, BulletState::Dying);
    }

    #[test]
    fn test_flying_bullet_travels_then_hits() {
        let (mut state, data, mut events) = arena();
        let attacker = state
            .place_completed_unit(&data, fixtures::MARINE, 0, Xy::new(200, 200))
            .unwrap()
            .index();
        let victim = state
            .place_completed_unit(&data, fixtures::MARINE, 1, Xy::new(360, 200))
            .unwrap();
        fire(&mut state, &data, &mut events, fixtures::SPINE, attacker, victim);
        let bullet = state.bullets.live_indices()[0];
        // Init tick chooses Follow, then the missile closes 8 px per tick
        let mut hit_tick = None;
        for tick in 0..40 {
            state.step_bullet(&data, &mut events, bullet).unwrap();
            if !state.damage_queue.is_empty() {
                hit_tick = Some(tick);
                break;
            }
        }
        let hit_tick = hit_tick.expect("missile never arrived");
        assert!(hit_tick > 2, "missile hit too early, tick {hit_tick}");
    }

    #[test]
    fn test_target_death_in_flight_dies_at_impact_point() {
        let (mut state, data, mut events) = arena();
        let attacker = state
            .place_completed_unit(&data, fixtures::MARINE, 0, Xy::new(200, 200))
            .unwrap()
            .index();
        let victim = state
            .place_completed_unit(&data, fixtures::MARINE, 1, Xy::new(360, 200))
            .unwrap();
        fire(&mut state, &data, &mut events, fixtures::SPINE, attacker, victim);
        let bullet = state.bullets.live_indices()[0];
        state.step_bullet(&data, &mut events, bullet).unwrap(); // Init
        state.step_bullet(&data, &mut events, bullet).unwrap();
        let impact = state.bullets.get(bullet).unwrap().target_pos;
        // victim dies mid-flight
        let victim_index = state.get_unit(victim).unwrap();
        state.kill_unit(&data, &mut events, victim_index);
        state.destroy_unit(&data, &mut events, victim_index);
        state.step_bullet(&data, &mut events, bullet).unwrap();
        let b = state.bullets.get(bullet).unwrap();
        assert_eq!(b.state, BulletState::Dying);
        assert_eq!(b.target_pos, impact);
        assert!(state.damage_queue.is_empty());
    }

    #[test]
    fn test_splash_scales_by_ring() {
        let (mut state, data, mut events) = arena();
        let attacker = state
            .place_completed_unit(&data, fixtures::MARINE, 0, Xy::new(200, 200))
            .unwrap()
            .index();
        let near = state
            .place_completed_unit(&data, fixtures::MARINE, 1, Xy::new(360, 200))
            .unwrap();
        let mid = state
            .place_completed_unit(&data, fixtures::MARINE, 1, Xy::new(360, 240))
            .unwrap();
        fire(&mut state, &data, &mut events, fixtures::SHELL, attacker, near);
        let bullet = state.bullets.live_indices()[0];
        for _ in 0..60 {
            state.step_bullet(&data, &mut events, bullet).unwrap();
            if !state.damage_queue.is_empty() {
                break;
            }
        }
        let hits: Vec<_> = state.damage_queue.iter().collect();
        let full = hits.iter().find(|d| d.target == near).expect("direct hit");
        let outer = hits.iter().find(|d| d.target == mid);
        let base = state.weapon_damage_amount(&data, fixtures::SHELL, 0);
        assert_eq!(full.amount, base);
        if let Some(outer) = outer {
            assert!(outer.amount < full.amount);
        }
    }
}
