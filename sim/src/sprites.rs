//! The sprite/image layer and the animation interpreter.
//!
//! Sprites are positions with a layered list of images; every image runs
//! an iscript program stepped once per tick. The interpreter executes
//! against the full world state because opcodes spawn overlays, play
//! sounds, fire weapons and signal the order layer of the owning unit.

use crate::components::{Image, ImageFlags, Sprite, SpriteFlags, StatusFlags};
use crate::data::{GameData, ImageTypeId, SpriteTypeId};
use crate::errors::{SimError, SimResult};
use crate::fixed::{velocity_from, xy_length, Direction, Fp8, Xy};
use crate::iscript::{Anim, IscriptState, Op};
use crate::state::{EventQueue, SimEvent, SimState};
use crate::terrain::TILE_SIZE;

/// Which entity the currently stepped image belongs to.
#[derive(Debug, Clone, Copy, Default)]
pub struct IscriptCtx {
    pub unit: Option<u16>,
    pub bullet: Option<u16>,
}

/// Runaway guard: more opcodes than this in one image-tick is a logic
/// error (a script without a wait in its loop).
const MAX_OPS_PER_TICK: usize = 64;

/// `order_state` marker set on a unit when its death animation finished
/// and the sprite was torn down.
pub const ORDER_STATE_SPRITE_GONE: i32 = 2;

impl SimState {
    // ========================================================================
    // SPRITES
    // ========================================================================

    /// Allocate a sprite with its main image, parked on the Init animation.
    pub fn create_sprite(
        &mut self,
        data: &GameData,
        sprite_type: SpriteTypeId,
        pos: Xy,
        owner: u8,
    ) -> SimResult<u16> {
        let stype = data.sprite(sprite_type)?.clone();
        let sprite = Sprite {
            sprite_type,
            owner,
            position: pos,
            visibility_flags: 0xff,
            ..Sprite::default()
        };
        let index = self.sprites.allocate(sprite)?;
        self.row_bucket_of(pos).push(index);
        match self.add_image(data, index, stype.image, Xy::new(0, 0), false) {
            Ok(main) => {
                self.sprites.get_mut(index).expect("just allocated").main_image = Some(main);
                Ok(index)
            }
            Err(err) => {
                self.destroy_sprite(index);
                Err(err)
            }
        }
    }

    /// Create a free-standing effect sprite (explosions, overlays).
    pub fn create_effect_sprite(
        &mut self,
        data: &GameData,
        sprite_type: SpriteTypeId,
        pos: Xy,
        owner: u8,
    ) -> SimResult<u16> {
        self.create_sprite(data, sprite_type, pos, owner)
    }

    fn row_bucket_of(&mut self, pos: Xy) -> &mut Vec<u16> {
        let row = (pos.y / TILE_SIZE).clamp(0, self.terrain.height as i32 - 1);
        &mut self.sprites_by_row[row as usize]
    }

    pub fn set_sprite_position(&mut self, index: u16, pos: Xy) {
        let Some(old_pos) = self.sprites.get(index).map(|s| s.position) else {
            return;
        };
        let old_row = (old_pos.y / TILE_SIZE).clamp(0, self.terrain.height as i32 - 1);
        let new_row = (pos.y / TILE_SIZE).clamp(0, self.terrain.height as i32 - 1);
        if old_row != new_row {
            self.sprites_by_row[old_row as usize].retain(|s| *s != index);
            self.sprites_by_row[new_row as usize].push(index);
        }
        self.sprites.get_mut(index).expect("checked").position = pos;
    }

    pub fn destroy_sprite(&mut self, index: u16) {
        let Some(sprite) = self.sprites.get(index) else {
            return;
        };
        let images = sprite.images.clone();
        let pos = sprite.position;
        for image in images {
            let _ = self.images.release(image);
        }
        let row = (pos.y / TILE_SIZE).clamp(0, self.terrain.height as i32 - 1);
        self.sprites_by_row[row as usize].retain(|s| *s != index);
        let _ = self.sprites.release(index);
    }

    pub fn sprite_main_image(&self, index: u16) -> Option<u16> {
        self.sprites.get(index).and_then(|s| s.main_image)
    }

    // ========================================================================
    // IMAGES
    // ========================================================================

    /// Add an image to a sprite. Overlays go on top, underlays below.
    pub fn add_image(
        &mut self,
        data: &GameData,
        sprite: u16,
        image_type: ImageTypeId,
        offset: Xy,
        underlay: bool,
    ) -> SimResult<u16> {
        let itype = data.image(image_type)?.clone();
        let program = data.iscript.program(itype.iscript)?;
        let entry = program.entry(Anim::Init).unwrap_or(0);
        let image = Image {
            image_type,
            sprite,
            offset,
            flags: if itype.always_visible { ImageFlags::empty() } else { ImageFlags::REDRAW },
            iscript: IscriptState {
                script: itype.iscript,
                pc: entry,
                animation: Anim::Init,
                ..IscriptState::default()
            },
            ..Image::default()
        };
        let index = self.images.allocate(image)?;
        let sprite_rec = self
            .sprites
            .get_mut(sprite)
            .ok_or_else(|| SimError::LogicError(format!("image added to dead sprite {sprite}")))?;
        if underlay {
            sprite_rec.images.push(index);
        } else {
            sprite_rec.images.insert(0, index);
        }
        Ok(index)
    }

    /// Detach and free one image; tears the sprite down when it was the
    /// last one. Returns true when the sprite is gone.
    pub fn destroy_image(&mut self, index: u16) -> bool {
        let Some(sprite_index) = self.images.get(index).map(|i| i.sprite) else {
            return false;
        };
        if let Some(sprite) = self.sprites.get_mut(sprite_index) {
            sprite.images.retain(|i| *i != index);
            if sprite.main_image == Some(index) {
                sprite.main_image = None;
            }
            let empty = sprite.images.is_empty();
            let _ = self.images.release(index);
            if empty {
                self.destroy_sprite(sprite_index);
                return true;
            }
            return false;
        }
        let _ = self.images.release(index);
        false
    }

    /// Point an image's directional frame at a heading.
    pub fn set_image_heading(&mut self, data: &GameData, index: u16, heading: Direction) {
        let Some(image) = self.images.get(index) else {
            return;
        };
        let itype = &data.images[image.image_type.index()];
        if !itype.has_directional_frames {
            return;
        }
        // 32 facings; 17..31 render mirrored from 15..1
        let mut facing = (heading.index() + 4) / 8 % 32;
        let mut flipped = false;
        if facing > 16 {
            facing = 32 - facing;
            flipped = true;
        }
        let image = self.images.get_mut(index).expect("checked");
        image.frame_index_offset = facing as u16;
        image.frame_index = image.frame_index_base + image.frame_index_offset;
        image.flags.set(ImageFlags::FLIPPED, flipped);
    }

    // ========================================================================
    // ANIMATION SWITCHING
    // ========================================================================

    /// Switch every image of a sprite to an animation.
    ///
    /// Images inside a no-break section defer the switch until the section
    /// closes. Images whose script lacks the animation are destroyed for
    /// `Death`, left running otherwise.
    pub fn sprite_set_animation(&mut self, data: &GameData, sprite: u16, anim: Anim) -> SimResult<()> {
        let Some(images) = self.sprites.get(sprite).map(|s| s.images.clone()) else {
            return Ok(());
        };
        for image_index in images {
            self.image_set_animation(data, image_index, anim)?;
        }
        Ok(())
    }

    pub fn image_set_animation(&mut self, data: &GameData, index: u16, anim: Anim) -> SimResult<()> {
        let Some(image) = self.images.get(index) else {
            return Ok(());
        };
        if image.iscript.no_break {
            self.images.get_mut(index).expect("checked").iscript.pending_animation = Some(anim);
            return Ok(());
        }
        let script = image.iscript.script;
        match data.iscript.program(script)?.entry(anim) {
            Some(entry) => {
                let state = &mut self.images.get_mut(index).expect("checked").iscript;
                state.animation = anim;
                state.pc = entry;
                state.wait = 0;
                state.paused = false;
            }
            None if anim == Anim::Death => {
                self.destroy_image(index);
            }
            None => {}
        }
        Ok(())
    }

    // ========================================================================
    // THE INTERPRETER
    // ========================================================================

    /// Step one image's program by one tick.
    pub fn step_image_iscript(
        &mut self,
        data: &GameData,
        events: &mut EventQueue,
        index: u16,
        ctx: IscriptCtx,
    ) -> SimResult<()> {
        {
            let Some(image) = self.images.get_mut(index) else {
                return Ok(());
            };
            if image.iscript.paused {
                return Ok(());
            }
            if image.iscript.wait > 0 {
                image.iscript.wait -= 1;
                return Ok(());
            }
        }

        for _ in 0..MAX_OPS_PER_TICK {
            let Some(image) = self.images.get(index) else {
                return Ok(()); // destroyed itself via `end`
            };
            let pc = image.iscript.pc;
            let op = data.iscript.op(pc)?.clone();
            self.images.get_mut(index).expect("checked").iscript.pc = pc + 1;

            match op {
                Op::PlayFram(f) => {
                    let image = self.images.get_mut(index).expect("checked");
                    image.frame_index_base = f;
                    image.frame_index = f + image.frame_index_offset;
                }
                Op::PlayFramTile(f) => {
                    let image = self.images.get_mut(index).expect("checked");
                    image.frame_index_base = f;
                    image.frame_index = f;
                }
                Op::SetHorPos(x) => {
                    self.images.get_mut(index).expect("checked").offset.x = i32::from(x);
                }
                Op::SetVertPos(y) => {
                    self.images.get_mut(index).expect("checked").offset.y = i32::from(y);
                }
                Op::SetPos(x, y) => {
                    let image = self.images.get_mut(index).expect("checked");
                    image.offset = Xy::new(i32::from(x), i32::from(y));
                }
                Op::Wait(n) => {
                    self.images.get_mut(index).expect("checked").iscript.wait = i32::from(n) - 1;
                    return Ok(());
                }
                Op::WaitRand(a, b) => {
                    let n = self.rng.rand(10, i32::from(a), i32::from(b));
                    self.images.get_mut(index).expect("checked").iscript.wait = n - 1;
                    return Ok(());
                }
                Op::Goto(target) => {
                    self.images.get_mut(index).expect("checked").iscript.pc = target;
                }
                Op::Call(target) => {
                    let state = &mut self.images.get_mut(index).expect("checked").iscript;
                    state.return_address = state.pc;
                    state.pc = target;
                }
                Op::Return => {
                    let state = &mut self.images.get_mut(index).expect("checked").iscript;
                    state.pc = state.return_address;
                }
                Op::RandCondJmp(chance, target) => {
                    if self.rng.rand(11, 0, 255) <= i32::from(chance) {
                        self.images.get_mut(index).expect("checked").iscript.pc = target;
                    }
                }
                Op::ImgOl(image_type, x, y) => {
                    let sprite = self.images.get(index).expect("checked").sprite;
                    self.add_image(data, sprite, image_type, Xy::new(i32::from(x), i32::from(y)), false)?;
                }
                Op::ImgUl(image_type, x, y) => {
                    let sprite = self.images.get(index).expect("checked").sprite;
                    self.add_image(data, sprite, image_type, Xy::new(i32::from(x), i32::from(y)), true)?;
                }
                Op::ImgOlUsLo(image_type) => {
                    let image = self.images.get(index).expect("checked");
                    let (sprite, offset) = (image.sprite, image.offset);
                    let new = self.add_image(data, sprite, image_type, offset, false)?;
                    self.images.get_mut(new).expect("just added").flags |= ImageFlags::USES_SPECIAL_OFFSET;
                }
                Op::ImgUlUsLo(image_type) => {
                    let image = self.images.get(index).expect("checked");
                    let (sprite, offset) = (image.sprite, image.offset);
                    let new = self.add_image(data, sprite, image_type, offset, true)?;
                    self.images.get_mut(new).expect("just added").flags |= ImageFlags::USES_SPECIAL_OFFSET;
                }
                Op::SprOl(sprite_type, x, y) | Op::GrdSprOl(sprite_type, x, y) => {
                    let sprite = self.images.get(index).expect("checked").sprite;
                    if let Some(pos) = self.sprites.get(sprite).map(|s| s.position) {
                        let owner = self.sprites.get(sprite).map_or(0, |s| s.owner);
                        let at = pos + Xy::new(i32::from(x), i32::from(y));
                        self.create_effect_sprite(data, sprite_type, at, owner)?;
                    }
                }
                Op::PlaySnd(sound) => self.emit_sound(events, index, ctx, sound),
                Op::PlaySndBtwn(lo, hi) => {
                    let pick = self.rng.rand(12, i32::from(lo.0), i32::from(hi.0));
                    self.emit_sound(events, index, ctx, crate::data::SoundId(pick as u16));
                }
                Op::PlaySndRand(ref sounds) => {
                    if !sounds.is_empty() {
                        let pick = self.rng.rand(13, 0, sounds.len() as i32 - 1);
                        self.emit_sound(events, index, ctx, sounds[pick as usize]);
                    }
                }
                Op::DoMissileDmg | Op::DoGrdDamage => {
                    if let Some(bullet) = ctx.bullet {
                        self.bullet_deal_damage(data, bullet);
                    }
                }
                Op::AttackMelee(ref sounds) => {
                    if !sounds.is_empty() {
                        let pick = self.rng.rand(14, 0, sounds.len() as i32 - 1);
                        self.emit_sound(events, index, ctx, sounds[pick as usize]);
                    }
                    if let Some(unit) = ctx.unit {
                        self.melee_hit(data, unit);
                    }
                }
                Op::Attack => {
                    if let Some(unit) = ctx.unit {
                        self.iscript_attack(data, events, unit, None)?;
                    }
                }
                Op::AttackWith(slot) => {
                    if let Some(unit) = ctx.unit {
                        self.iscript_attack(data, events, unit, Some(slot))?;
                    }
                }
                Op::CastSpell => {
                    if let Some(unit) = ctx.unit {
                        self.iscript_cast_spell(data, events, unit)?;
                    }
                }
                Op::UseWeapon(weapon) => {
                    if let Some(unit) = ctx.unit {
                        self.fire_unit_weapon(data, events, unit, weapon)?;
                    }
                }
                Op::SigOrder(bits) => {
                    if let Some(unit) = ctx.unit {
                        self.unit_mut(unit).order_signal |= bits;
                    }
                }
                Op::OrderDone(bits) => {
                    if let Some(unit) = ctx.unit {
                        self.unit_mut(unit).order_signal &= !bits;
                    }
                }
                Op::GotoRepeatAttk => {
                    if let Some(unit) = ctx.unit {
                        let u = self.unit_mut(unit);
                        u.order_process_timer = 0;
                        u.status_flags |= StatusFlags::READY_TO_ATTACK;
                    }
                }
                Op::TurnCWise(n) => self.turn_ctx(data, ctx, i32::from(n) * 8),
                Op::TurnCCWise(n) => self.turn_ctx(data, ctx, -i32::from(n) * 8),
                Op::Turn1CWise => self.turn_ctx(data, ctx, 8),
                Op::TurnRand(n) => {
                    // three in four twists turn clockwise
                    let step = if self.rng.rand(15, 0, 3) != 0 { 8 } else { -8 };
                    self.turn_ctx(data, ctx, step * i32::from(n));
                }
                Op::SetFlDirect(n) => {
                    if let Some(unit) = ctx.unit {
                        let dir = Direction::from_int(i32::from(n) * 8);
                        self.unit_mut(unit).flingy.heading = dir;
                        self.unit_mut(unit).flingy.next_velocity_direction = dir;
                        let main = self.sprite_main_image(self.unit(unit).sprite);
                        if let Some(main) = main {
                            self.set_image_heading(data, main, dir);
                        }
                    }
                }
                Op::SetFlSpeed(v) => {
                    if let Some(unit) = ctx.unit {
                        self.unit_mut(unit).flingy.top_speed = Fp8::from_raw(v as i32);
                    }
                }
                Op::Move(px) => {
                    if let Some(unit) = ctx.unit {
                        let heading = self.unit(unit).flingy.heading;
                        let delta = velocity_from(heading, Fp8::integer(i32::from(px)));
                        let pos = self.unit(unit).position() + delta.to_xy();
                        self.set_unit_position(data, unit, pos);
                    }
                }
                Op::EngFrame(f) | Op::EngSet(f) => {
                    let image = self.images.get_mut(index).expect("checked");
                    image.frame_index_base = u16::from(f);
                    image.frame_index = u16::from(f) + image.frame_index_offset;
                }
                Op::NoBrkCodeStart => {
                    self.images.get_mut(index).expect("checked").iscript.no_break = true;
                    let sprite = self.images.get(index).expect("checked").sprite;
                    if let Some(s) = self.sprites.get_mut(sprite) {
                        s.flags |= SpriteFlags::ISCRIPT_NOBRK;
                    }
                    if let Some(unit) = ctx.unit {
                        self.unit_mut(unit).status_flags |= StatusFlags::ISCRIPT_NOBRK;
                    }
                }
                Op::NoBrkCodeEnd => {
                    let pending = {
                        let state = &mut self.images.get_mut(index).expect("checked").iscript;
                        state.no_break = false;
                        state.pending_animation.take()
                    };
                    let sprite = self.images.get(index).expect("checked").sprite;
                    if let Some(s) = self.sprites.get_mut(sprite) {
                        s.flags.remove(SpriteFlags::ISCRIPT_NOBRK);
                    }
                    if let Some(unit) = ctx.unit {
                        self.unit_mut(unit).status_flags.remove(StatusFlags::ISCRIPT_NOBRK);
                    }
                    if let Some(anim) = pending {
                        self.image_set_animation(data, index, anim)?;
                    }
                }
                Op::IgnoreRest => {
                    self.images.get_mut(index).expect("checked").iscript.paused = true;
                    return Ok(());
                }
                Op::TmpRmGraphicStart => {
                    self.images.get_mut(index).expect("checked").flags |= ImageFlags::HIDDEN;
                }
                Op::TmpRmGraphicEnd => {
                    self.images.get_mut(index).expect("checked").flags.remove(ImageFlags::HIDDEN);
                }
                Op::SetSpawnFrame(n) => {
                    self.images.get_mut(index).expect("checked").modifier = i32::from(n);
                }
                Op::FollowMainGraphic => {
                    let sprite = self.images.get(index).expect("checked").sprite;
                    if let Some(main) = self.sprite_main_image(sprite) {
                        if main != index {
                            let (frame, base, flags) = {
                                let m = self.images.get(main).expect("main image");
                                (m.frame_index, m.frame_index_base, m.flags & ImageFlags::FLIPPED)
                            };
                            let image = self.images.get_mut(index).expect("checked");
                            image.frame_index = frame;
                            image.frame_index_base = base;
                            image.flags.set(ImageFlags::FLIPPED, flags.contains(ImageFlags::FLIPPED));
                        }
                    }
                }
                Op::CreateGasOverlays(n) => {
                    let image = self.images.get(index).expect("checked");
                    let sprite = image.sprite;
                    let overlay = ImageTypeId(image.image_type.0 + 1 + u16::from(n));
                    if overlay.index() < data.images.len() {
                        self.add_image(data, sprite, overlay, Xy::new(0, 0), false)?;
                    }
                }
                Op::PwrupCondJmp(_) => {} // no powerup carriers in play
                Op::TrgtRangeCondJmp(range, target) => {
                    if let Some(unit) = ctx.unit {
                        if let Some(t) = self.unit(unit).order_target.unit.and_then(|t| self.get_unit(t)) {
                            let d = xy_length(self.unit(t).position() - self.unit(unit).position());
                            if d <= i32::from(range) {
                                self.images.get_mut(index).expect("checked").iscript.pc = target;
                            }
                        }
                    }
                }
                Op::TrgtArcCondJmp(dir, arc, target) => {
                    if let Some(unit) = ctx.unit {
                        if let Some(t) = self.unit(unit).order_target.unit.and_then(|t| self.get_unit(t)) {
                            let to_target =
                                Direction::of(self.unit(t).position() - self.unit(unit).position());
                            let diff = (to_target - Direction::from_int(i32::from(dir))).raw().unsigned_abs();
                            if i32::from(diff) <= i32::from(arc) {
                                self.images.get_mut(index).expect("checked").iscript.pc = target;
                            }
                        }
                    }
                }
                Op::CurDirectCondJmp(dir, arc, target) => {
                    if let Some(unit) = ctx.unit {
                        let heading = self.unit(unit).flingy.heading;
                        let diff = (heading - Direction::from_int(i32::from(dir))).raw().unsigned_abs();
                        if i32::from(diff) <= i32::from(arc) {
                            self.images.get_mut(index).expect("checked").iscript.pc = target;
                        }
                    }
                }
                Op::LiftoffCondJmp(target) => {
                    if let Some(unit) = ctx.unit {
                        let flags = self.unit(unit).status_flags;
                        if flags.contains(StatusFlags::IN_AIR)
                            && flags.contains(StatusFlags::GROUNDED_BUILDING)
                        {
                            self.images.get_mut(index).expect("checked").iscript.pc = target;
                        }
                    }
                }
                Op::WarpOverlay(frame) => {
                    let image = self.images.get_mut(index).expect("checked");
                    image.frame_index = frame;
                    image.modifier = i32::from(frame as u16);
                }
                Op::End => {
                    let was_death = self.images.get(index).expect("checked").iscript.animation == Anim::Death;
                    let sprite_gone = self.destroy_image(index);
                    if sprite_gone && was_death {
                        if let Some(unit) = ctx.unit {
                            self.unit_mut(unit).order_state = ORDER_STATE_SPRITE_GONE;
                        }
                    }
                    return Ok(());
                }
            }
        }
        Err(SimError::LogicError(format!(
            "iscript runaway in image {index}: {MAX_OPS_PER_TICK} opcodes without wait"
        )))
    }

    fn emit_sound(&mut self, events: &mut EventQueue, image: u16, ctx: IscriptCtx, sound: crate::data::SoundId) {
        let position = self
            .images
            .get(image)
            .and_then(|i| self.sprites.get(i.sprite))
            .map_or(Xy::new(0, 0), |s| s.position);
        let source = ctx.unit.map(|u| self.unit_id(u));
        events.push(SimEvent::PlaySound { sound, position, source });
    }

    fn turn_ctx(&mut self, data: &GameData, ctx: IscriptCtx, step: i32) {
        if let Some(unit) = ctx.unit {
            let heading = self.unit(unit).flingy.heading + Direction::from_int(step);
            self.unit_mut(unit).flingy.heading = heading;
            let main = self.sprite_main_image(self.unit(unit).sprite);
            if let Some(main) = main {
                self.set_image_heading(data, main, heading);
            }
        }
    }

    /// Step every image of a sprite.
    pub fn step_sprite(
        &mut self,
        data: &GameData,
        events: &mut EventQueue,
        sprite: u16,
        ctx: IscriptCtx,
    ) -> SimResult<()> {
        let Some(images) = self.sprites.get(sprite).map(|s| s.images.clone()) else {
            return Ok(());
        };
        for image in images {
            self.step_image_iscript(data, events, image, ctx)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::state::EventQueue;

    #[test]
    fn test_wait_sleeps_exactly_n_ticks() {
        let data = fixtures::game_data();
        let mut state = fixtures::blank_state(32, 32, 1);
        let mut events = EventQueue::default();
        let sprite = state
            .create_sprite(&data, fixtures::MARINE_SPRITE, Xy::new(64, 64), 0)
            .unwrap();
        let image = state.sprite_main_image(sprite).unwrap();
        // marine script: Init = playfram 0; wait 2; goto
        let ctx = IscriptCtx::default();
        state.step_image_iscript(&data, &mut events, image, ctx).unwrap();
        let frame_after_first = state.images.get(image).unwrap().frame_index;
        assert_eq!(frame_after_first, 0);
        assert_eq!(state.images.get(image).unwrap().iscript.wait, 1);
        // one sleeping tick, then the loop runs again
        state.step_image_iscript(&data, &mut events, image, ctx).unwrap();
        assert_eq!(state.images.get(image).unwrap().iscript.wait, 0);
        state.step_image_iscript(&data, &mut events, image, ctx).unwrap();
        assert_eq!(state.images.get(image).unwrap().iscript.wait, 1);
    }

    #[test]
    fn test_death_anim_end_tears_down_sprite() {
        let data = fixtures::game_data();
        let mut state = fixtures::blank_state(32, 32, 1);
        let mut events = EventQueue::default();
        let sprite = state
            .create_sprite(&data, fixtures::MARINE_SPRITE, Xy::new(64, 64), 0)
            .unwrap();
        state
            .sprite_set_animation(&data, sprite, Anim::Death)
            .unwrap();
        let image = state.sprite_main_image(sprite).unwrap();
        // death anim: playfram; wait 1; end. step until the sprite is gone
        let ctx = IscriptCtx::default();
        for _ in 0..4 {
            state.step_image_iscript(&data, &mut events, image, ctx).unwrap();
        }
        assert!(state.sprites.get(sprite).is_none());
        assert!(state.images.get(image).is_none());
    }

    #[test]
    fn test_sprite_row_bucket_follows_position() {
        let data = fixtures::game_data();
        let mut state = fixtures::blank_state(32, 32, 1);
        let sprite = state
            .create_sprite(&data, fixtures::MARINE_SPRITE, Xy::new(64, 64), 0)
            .unwrap();
        assert!(state.sprites_by_row[2].contains(&sprite));
        state.set_sprite_position(sprite, Xy::new(64, 200));
        assert!(!state.sprites_by_row[2].contains(&sprite));
        assert!(state.sprites_by_row[6].contains(&sprite));
    }
}
