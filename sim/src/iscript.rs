//! Animation bytecode ("iscript").
//!
//! Every image runs a tiny byte-coded program selected by its image type.
//! Programs are stored decoded: a shared instruction buffer plus, per
//! script id, a table mapping animation ids to entry points. The program
//! counter and return address are indices into the instruction buffer.
//!
//! The interpreter itself lives with the sprite layer (it needs the image,
//! its sprite, the owning unit and the PRNG); this module owns the
//! instruction set, the program store and the per-image execution state.

use crate::data::{ImageTypeId, IscriptId, SoundId, SpriteTypeId, WeaponId};
use crate::errors::{SimError, SimResult};
use serde::{Deserialize, Serialize};

/// The standard animation entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Anim {
    #[default]
    Init = 0,
    Death,
    GndAttkInit,
    AirAttkInit,
    Unused1,
    GndAttkRpt,
    AirAttkRpt,
    CastSpell,
    GndAttkToIdle,
    AirAttkToIdle,
    Unused2,
    Walking,
    WalkingToIdle,
    SpecialState1,
    SpecialState2,
    AlmostBuilt,
    Built,
    Landing,
    LiftOff,
    IsWorking,
    WorkingToIdle,
    WarpIn,
    Unused3,
    StarEditInit,
    Disable,
    Burrow,
    UnBurrow,
    Enable,
}

pub const ANIM_COUNT: usize = 28;

/// One decoded iscript instruction.
///
/// Jump targets are indices into the shared instruction buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    /// Set the current frame (direction applied separately).
    PlayFram(u16),
    /// Set the current frame from a tileset-indexed base.
    PlayFramTile(u16),
    SetHorPos(i8),
    SetVertPos(i8),
    SetPos(i8, i8),
    Wait(u8),
    WaitRand(u8, u8),
    Goto(u32),
    Call(u32),
    Return,
    /// Spawn an overlay image at an offset.
    ImgOl(ImageTypeId, i8, i8),
    /// Spawn an underlay image at an offset.
    ImgUl(ImageTypeId, i8, i8),
    /// Overlay inheriting the parent's special offset.
    ImgOlUsLo(ImageTypeId),
    /// Underlay inheriting the parent's special offset.
    ImgUlUsLo(ImageTypeId),
    /// Spawn an independent overlay sprite.
    SprOl(SpriteTypeId, i8, i8),
    /// Spawn a ground overlay sprite.
    GrdSprOl(SpriteTypeId, i8, i8),
    PlaySnd(SoundId),
    /// Play one sound from an inclusive id range.
    PlaySndBtwn(SoundId, SoundId),
    /// Play one of the listed sounds.
    PlaySndRand(Vec<SoundId>),
    /// Apply the active weapon's damage immediately.
    DoMissileDmg,
    /// Melee strike: damage now plus one of the listed sounds.
    AttackMelee(Vec<SoundId>),
    FollowMainGraphic,
    /// Jump with probability `chance / 256`.
    RandCondJmp(u8, u32),
    TurnCCWise(u8),
    TurnCWise(u8),
    Turn1CWise,
    TurnRand(u8),
    SetSpawnFrame(u8),
    /// Set bits on the owning unit's order signal.
    SigOrder(u8),
    /// Clear bits on the owning unit's order signal.
    OrderDone(u8),
    /// Fire the weapon matching the current target's air/ground domain.
    Attack,
    /// Fire a specific weapon slot: 1 ground, 2 air.
    AttackWith(u8),
    CastSpell,
    UseWeapon(WeaponId),
    /// Move forward along the current heading by N pixels.
    Move(u8),
    GotoRepeatAttk,
    EngFrame(u8),
    EngSet(u8),
    NoBrkCodeStart,
    NoBrkCodeEnd,
    IgnoreRest,
    TmpRmGraphicStart,
    TmpRmGraphicEnd,
    SetFlDirect(u8),
    SetFlSpeed(u16),
    CreateGasOverlays(u8),
    PwrupCondJmp(u32),
    /// Jump when the order target is within N pixels.
    TrgtRangeCondJmp(u16, u32),
    /// Jump when the angle to the target is within an arc.
    TrgtArcCondJmp(u16, u16, u32),
    CurDirectCondJmp(u16, u16, u32),
    LiftoffCondJmp(u32),
    WarpOverlay(u16),
    DoGrdDamage,
    End,
}

/// Animation entry table for one script id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Program {
    /// Entry pc per animation, `None` when the script lacks the animation.
    pub animations: Vec<Option<u32>>,
}

impl Program {
    pub fn entry(&self, anim: Anim) -> Option<u32> {
        self.animations.get(anim as usize).copied().flatten()
    }
}

/// The full compiled script set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IscriptData {
    pub instructions: Vec<Op>,
    pub programs: Vec<Program>,
}

impl IscriptData {
    pub fn program(&self, id: IscriptId) -> SimResult<&Program> {
        self.programs
            .get(id.index())
            .ok_or_else(|| SimError::InvalidInput(format!("iscript id out of range: {}", id.0)))
    }

    pub fn op(&self, pc: u32) -> SimResult<&Op> {
        self.instructions
            .get(pc as usize)
            .ok_or_else(|| SimError::LogicError(format!("iscript pc out of range: {pc}")))
    }
}

/// Per-image execution state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IscriptState {
    pub script: IscriptId,
    pub pc: u32,
    pub return_address: u32,
    pub animation: Anim,
    /// Frames left to sleep before the next fetch.
    pub wait: i32,
    /// Inside a no-break section: animation switches are deferred.
    pub no_break: bool,
    /// A switch requested while no-break was active.
    pub pending_animation: Option<Anim>,
    /// `IgnoreRest` was hit: sleep until an animation switch.
    pub paused: bool,
}

/// Incremental program assembler used by fixtures and tests.
#[derive(Default)]
pub struct ScriptBuilder {
    data: IscriptData,
}

impl ScriptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current instruction index; the next `op` call lands here.
    pub fn here(&self) -> u32 {
        self.data.instructions.len() as u32
    }

    pub fn op(&mut self, op: Op) -> &mut Self {
        self.data.instructions.push(op);
        self
    }

    /// Begin a new script; animations default to missing.
    pub fn script(&mut self) -> usize {
        self.data.programs.push(Program {
            animations: vec![None; ANIM_COUNT],
        });
        self.data.programs.len() - 1
    }

    /// Point `anim` of `script` at the current position.
    pub fn anim(&mut self, script: usize, anim: Anim) -> &mut Self {
        self.data.programs[script].animations[anim as usize] = Some(self.here());
        self
    }

    pub fn finish(self) -> IscriptData {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_wires_entries() {
        let mut b = ScriptBuilder::new();
        let s = b.script();
        b.anim(s, Anim::Init);
        b.op(Op::PlayFram(0));
        b.op(Op::Wait(1));
        b.op(Op::Goto(1));
        b.anim(s, Anim::Death);
        b.op(Op::End);
        let data = b.finish();
        let prog = data.program(IscriptId(0)).unwrap();
        assert_eq!(prog.entry(Anim::Init), Some(0));
        assert_eq!(prog.entry(Anim::Death), Some(3));
        assert_eq!(prog.entry(Anim::Walking), None);
        assert_eq!(data.op(3).unwrap(), &Op::End);
    }

    #[test]
    fn test_out_of_range_pc_is_logic_error() {
        let data = IscriptData::default();
        assert!(matches!(data.op(0), Err(SimError::LogicError(_))));
    }
}
