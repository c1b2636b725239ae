//! Synthetic static tables for tests, benches and demos.
//!
//! A compact stand-in dataset with one representative of each role the
//! kernel exercises: a rifle infantry unit, a worker, a shielded melee
//! unit, a mineral field, a zerg production chain (hatchery, larva,
//! drone), a flying observer and a terran command center. The constants
//! here are pinned by the scenario tests; changing one is a behavior
//! change, not a cleanup.

use crate::components::Controller;
use crate::data::*;
use crate::fixed::Fp8;
use crate::iscript::{Anim, Op, ScriptBuilder};
use crate::state::{GameType, SimState, MAX_PLAYERS, NEUTRAL_PLAYER};

pub const MARINE: UnitTypeId = UnitTypeId(0);
pub const SCV: UnitTypeId = UnitTypeId(1);
pub const ZEALOT: UnitTypeId = UnitTypeId(2);
pub const MINERAL_FIELD: UnitTypeId = UnitTypeId(3);
pub const HATCHERY: UnitTypeId = UnitTypeId(4);
pub const LARVA: UnitTypeId = UnitTypeId(5);
pub const DRONE: UnitTypeId = UnitTypeId(6);
pub const OBSERVER: UnitTypeId = UnitTypeId(7);
pub const COMMAND_CENTER: UnitTypeId = UnitTypeId(8);

pub const RIFLE: WeaponId = WeaponId(0);
pub const SPINE: WeaponId = WeaponId(1);
pub const BOUNCER: WeaponId = WeaponId(2);
pub const SHELL: WeaponId = WeaponId(3);

pub const WALKER_FLINGY: FlingyId = FlingyId(0);
pub const MISSILE_FLINGY: FlingyId = FlingyId(1);
pub const BUILDING_FLINGY: FlingyId = FlingyId(2);
pub const FLYER_FLINGY: FlingyId = FlingyId(3);

pub const MARINE_SPRITE: SpriteTypeId = SpriteTypeId(0);
pub const MISSILE_SPRITE: SpriteTypeId = SpriteTypeId(1);
pub const BUILDING_SPRITE: SpriteTypeId = SpriteTypeId(2);
pub const FLYER_SPRITE: SpriteTypeId = SpriteTypeId(3);

const UNIT_SCRIPT: u16 = 0;
const MISSILE_SCRIPT: u16 = 1;
const BUILDING_SCRIPT: u16 = 2;

/// Build the iscript set: a mobile-unit script with idle, walk, attack
/// and death; a missile script; a building script.
fn scripts() -> crate::iscript::IscriptData {
    let mut b = ScriptBuilder::new();

    // --- script 0: mobile unit ---
    let unit = b.script();
    debug_assert_eq!(unit as u16, UNIT_SCRIPT);
    b.anim(unit, Anim::Init);
    let idle = b.here();
    b.op(Op::PlayFram(0));
    b.op(Op::Wait(2));
    b.op(Op::Goto(idle));
    b.anim(unit, Anim::Walking);
    let walk = b.here();
    b.op(Op::PlayFram(1));
    b.op(Op::Wait(1));
    b.op(Op::Goto(walk));
    b.anim(unit, Anim::WalkingToIdle);
    b.op(Op::Goto(idle));
    b.anim(unit, Anim::GndAttkInit);
    b.op(Op::PlayFram(2));
    b.op(Op::Attack);
    b.op(Op::Wait(1));
    b.op(Op::GotoRepeatAttk);
    b.anim(unit, Anim::GndAttkToIdle);
    b.op(Op::Goto(idle));
    b.anim(unit, Anim::AirAttkInit);
    b.op(Op::PlayFram(2));
    b.op(Op::Attack);
    b.op(Op::Wait(1));
    b.op(Op::GotoRepeatAttk);
    b.op(Op::Goto(idle));
    b.anim(unit, Anim::Death);
    b.op(Op::PlayFram(3));
    b.op(Op::Wait(1));
    b.op(Op::End);

    // --- script 1: missile ---
    let missile = b.script();
    debug_assert_eq!(missile as u16, MISSILE_SCRIPT);
    b.anim(missile, Anim::Init);
    let fly = b.here();
    b.op(Op::PlayFram(0));
    b.op(Op::Wait(1));
    b.op(Op::Goto(fly));
    b.anim(missile, Anim::Death);
    b.op(Op::Wait(1));
    b.op(Op::End);

    // --- script 2: building ---
    let building = b.script();
    debug_assert_eq!(building as u16, BUILDING_SCRIPT);
    b.anim(building, Anim::Init);
    let sit = b.here();
    b.op(Op::PlayFram(0));
    b.op(Op::Wait(4));
    b.op(Op::Goto(sit));
    b.anim(building, Anim::IsWorking);
    b.op(Op::PlayFram(1));
    b.op(Op::Wait(4));
    b.op(Op::Goto(sit));
    b.anim(building, Anim::Death);
    b.op(Op::PlayFram(2));
    b.op(Op::Wait(1));
    b.op(Op::End);

    b.finish()
}

fn flingy(sprite: SpriteTypeId, speed: i32, accel: i32, turn: i32) -> FlingyData {
    FlingyData {
        sprite,
        top_speed: Fp8::from_raw(speed),
        acceleration: Fp8::from_raw(accel),
        halt_distance: Fp8::from_raw(speed * speed / accel.max(1) / 2),
        turn_rate: Fp8::integer(turn),
        movement_type: 0,
    }
}

fn weapon(
    damage: i32,
    cooldown: i32,
    max_range: i32,
    damage_type: DamageType,
    behavior: WeaponBehavior,
) -> WeaponData {
    WeaponData {
        damage_amount: damage,
        damage_bonus: 1,
        cooldown,
        damage_factor: 1,
        upgrade: Some(UpgradeId(0)),
        damage_type,
        behavior,
        hit_type: HitType::NormalHit,
        min_range: 0,
        max_range,
        flingy: MISSILE_FLINGY,
        lifetime: 60,
        targets_air: true,
        targets_ground: true,
        ..WeaponData::default()
    }
}

/// The full synthetic dataset.
pub fn game_data() -> GameData {
    let mut units = vec![UnitTypeData::default(); 9];

    units[MARINE.index()] = UnitTypeData {
        flingy: WALKER_FLINGY,
        dimensions: [8, 9, 8, 9],
        hit_points: Fp8::integer(40),
        armor: 0,
        armor_upgrade: Some(UpgradeId(1)),
        build_time: 360,
        mineral_cost: 50,
        supply_required: 2,
        race: Race::Terran,
        sight_range: 7,
        ground_weapon: Some(RIFLE),
        air_weapon: Some(RIFLE),
        unit_size: UnitSize::Small,
        elevation_level: 4,
        right_click_action: 1,
        return_to_idle: orders::PLAYER_GUARD,
        attack_unit: orders::ATTACK_UNIT,
        human_ai_idle: orders::PLAYER_GUARD,
        computer_ai_idle: orders::COMPUTER_AI,
        flags: UnitTypeFlags::ORGANIC | UnitTypeFlags::CAN_MOVE | UnitTypeFlags::CAN_TURN,
        ..UnitTypeData::default()
    };

    units[SCV.index()] = UnitTypeData {
        flingy: WALKER_FLINGY,
        dimensions: [11, 11, 11, 11],
        hit_points: Fp8::integer(60),
        build_time: 300,
        mineral_cost: 50,
        supply_required: 2,
        race: Race::Terran,
        sight_range: 7,
        unit_size: UnitSize::Small,
        elevation_level: 4,
        right_click_action: 5,
        return_to_idle: orders::PLAYER_GUARD,
        attack_unit: orders::ATTACK_UNIT,
        human_ai_idle: orders::PLAYER_GUARD,
        computer_ai_idle: orders::COMPUTER_AI,
        flags: UnitTypeFlags::MECHANICAL
            | UnitTypeFlags::ORGANIC
            | UnitTypeFlags::WORKER
            | UnitTypeFlags::CAN_MOVE
            | UnitTypeFlags::CAN_TURN,
        ..UnitTypeData::default()
    };

    units[ZEALOT.index()] = UnitTypeData {
        flingy: WALKER_FLINGY,
        dimensions: [11, 5, 11, 11],
        hit_points: Fp8::integer(100),
        shield_points: 60,
        has_shields: true,
        armor: 1,
        armor_upgrade: Some(UpgradeId(1)),
        build_time: 600,
        mineral_cost: 100,
        supply_required: 4,
        race: Race::Protoss,
        sight_range: 7,
        unit_size: UnitSize::Small,
        elevation_level: 4,
        right_click_action: 1,
        return_to_idle: orders::PLAYER_GUARD,
        attack_unit: orders::ATTACK_UNIT,
        human_ai_idle: orders::PLAYER_GUARD,
        computer_ai_idle: orders::COMPUTER_AI,
        flags: UnitTypeFlags::ORGANIC | UnitTypeFlags::CAN_MOVE | UnitTypeFlags::CAN_TURN,
        ..UnitTypeData::default()
    };

    units[MINERAL_FIELD.index()] = UnitTypeData {
        flingy: BUILDING_FLINGY,
        dimensions: [31, 15, 31, 15],
        placement: [64, 32],
        hit_points: Fp8::integer(100000),
        race: Race::None,
        sight_range: 1,
        unit_size: UnitSize::Independent,
        right_click_action: 0,
        return_to_idle: orders::NOTHING,
        attack_unit: orders::NOTHING,
        human_ai_idle: orders::NOTHING,
        computer_ai_idle: orders::NOTHING,
        flags: UnitTypeFlags::BUILDING
            | UnitTypeFlags::RESOURCE_CONTAINER
            | UnitTypeFlags::INVINCIBLE
            | UnitTypeFlags::SINGLE_SELECT,
        ..UnitTypeData::default()
    };

    units[HATCHERY.index()] = UnitTypeData {
        flingy: BUILDING_FLINGY,
        dimensions: [49, 32, 49, 32],
        placement: [128, 96],
        hit_points: Fp8::integer(1250),
        build_time: 1800,
        mineral_cost: 300,
        supply_provided: 2,
        race: Race::Zerg,
        sight_range: 9,
        unit_size: UnitSize::Large,
        right_click_action: 2,
        return_to_idle: orders::NOTHING,
        attack_unit: orders::NOTHING,
        human_ai_idle: orders::NOTHING,
        computer_ai_idle: orders::NOTHING,
        flags: UnitTypeFlags::BUILDING
            | UnitTypeFlags::RESOURCE_DEPOT
            | UnitTypeFlags::PRODUCTION
            | UnitTypeFlags::USES_LARVA
            | UnitTypeFlags::SINGLE_SELECT,
        ..UnitTypeData::default()
    };

    units[LARVA.index()] = UnitTypeData {
        flingy: WALKER_FLINGY,
        dimensions: [8, 8, 8, 8],
        hit_points: Fp8::integer(25),
        race: Race::Zerg,
        sight_range: 4,
        unit_size: UnitSize::Small,
        right_click_action: 0,
        return_to_idle: orders::LARVA,
        attack_unit: orders::NOTHING,
        human_ai_idle: orders::LARVA,
        computer_ai_idle: orders::LARVA,
        flags: UnitTypeFlags::ORGANIC | UnitTypeFlags::REGENERATES_HP | UnitTypeFlags::SINGLE_SELECT,
        ..UnitTypeData::default()
    };

    units[DRONE.index()] = UnitTypeData {
        flingy: WALKER_FLINGY,
        dimensions: [11, 11, 11, 11],
        hit_points: Fp8::integer(40),
        build_time: 300,
        mineral_cost: 50,
        supply_required: 2,
        race: Race::Zerg,
        sight_range: 7,
        unit_size: UnitSize::Small,
        elevation_level: 4,
        right_click_action: 5,
        return_to_idle: orders::PLAYER_GUARD,
        attack_unit: orders::ATTACK_UNIT,
        human_ai_idle: orders::PLAYER_GUARD,
        computer_ai_idle: orders::COMPUTER_AI,
        flags: UnitTypeFlags::ORGANIC
            | UnitTypeFlags::WORKER
            | UnitTypeFlags::REGENERATES_HP
            | UnitTypeFlags::CAN_MOVE
            | UnitTypeFlags::CAN_TURN,
        ..UnitTypeData::default()
    };

    units[OBSERVER.index()] = UnitTypeData {
        flingy: FLYER_FLINGY,
        dimensions: [16, 16, 16, 16],
        hit_points: Fp8::integer(40),
        shield_points: 20,
        has_shields: true,
        build_time: 600,
        mineral_cost: 25,
        gas_cost: 75,
        supply_required: 2,
        race: Race::Protoss,
        sight_range: 7,
        unit_size: UnitSize::Small,
        elevation_level: 12,
        right_click_action: 2,
        return_to_idle: orders::PLAYER_GUARD,
        attack_unit: orders::NOTHING,
        human_ai_idle: orders::PLAYER_GUARD,
        computer_ai_idle: orders::COMPUTER_AI,
        flags: UnitTypeFlags::FLYER
            | UnitTypeFlags::MECHANICAL
            | UnitTypeFlags::DETECTOR
            | UnitTypeFlags::PERMANENT_CLOAK
            | UnitTypeFlags::CAN_MOVE
            | UnitTypeFlags::CAN_TURN,
        ..UnitTypeData::default()
    };

    units[COMMAND_CENTER.index()] = UnitTypeData {
        flingy: BUILDING_FLINGY,
        dimensions: [58, 41, 58, 41],
        placement: [128, 96],
        hit_points: Fp8::integer(1500),
        build_time: 1800,
        mineral_cost: 400,
        supply_provided: 20,
        race: Race::Terran,
        sight_range: 10,
        unit_size: UnitSize::Large,
        right_click_action: 2,
        return_to_idle: orders::NOTHING,
        attack_unit: orders::NOTHING,
        human_ai_idle: orders::NOTHING,
        computer_ai_idle: orders::NOTHING,
        flags: UnitTypeFlags::BUILDING
            | UnitTypeFlags::MECHANICAL
            | UnitTypeFlags::RESOURCE_DEPOT
            | UnitTypeFlags::PRODUCTION
            | UnitTypeFlags::FLYING_BUILDING
            | UnitTypeFlags::SINGLE_SELECT,
        ..UnitTypeData::default()
    };

    let weapons = vec![
        // rifle: instant hit
        weapon(6, 15, 128, DamageType::Normal, WeaponBehavior::AppearOnTargetUnit),
        // spine: flying projectile
        weapon(10, 22, 160, DamageType::Explosive, WeaponBehavior::Fly),
        // bouncer: chains to nearby enemies
        WeaponData {
            launch_spin: 32,
            ..weapon(9, 30, 96, DamageType::Normal, WeaponBehavior::Bounce)
        },
        // shell: radial splash
        WeaponData {
            hit_type: HitType::RadialSplash,
            inner_splash: 10,
            medium_splash: 25,
            outer_splash: 40,
            ..weapon(20, 30, 192, DamageType::Explosive, WeaponBehavior::Fly)
        },
    ];

    let flingies = vec![
        flingy(MARINE_SPRITE, 1024, 64, 40),   // walker: 4 px/frame
        flingy(MISSILE_SPRITE, 2048, 2048, 127), // missile: 8 px/frame, instant turn
        flingy(BUILDING_SPRITE, 0, 1, 1),
        flingy(FLYER_SPRITE, 1024, 48, 30),
    ];

    let sprites = vec![
        SpriteTypeData { image: ImageTypeId(0), visible: true, ..Default::default() },
        SpriteTypeData { image: ImageTypeId(1), visible: true, ..Default::default() },
        SpriteTypeData { image: ImageTypeId(2), visible: true, ..Default::default() },
        SpriteTypeData { image: ImageTypeId(3), visible: true, ..Default::default() },
    ];

    let images = vec![
        ImageTypeData { iscript: IscriptId(UNIT_SCRIPT), has_directional_frames: true, ..Default::default() },
        ImageTypeData { iscript: IscriptId(MISSILE_SCRIPT), ..Default::default() },
        ImageTypeData { iscript: IscriptId(BUILDING_SCRIPT), ..Default::default() },
        ImageTypeData { iscript: IscriptId(UNIT_SCRIPT), has_directional_frames: true, ..Default::default() },
    ];

    // order table: weapon-targeting and queueing flags for the ids we use
    let mut order_table = vec![
        OrderData {
            interruptible: true,
            can_be_queued: true,
            ..OrderData::default()
        };
        190
    ];
    order_table[orders::DIE.index()].interruptible = false;
    order_table[orders::DIE.index()].executes_while_disabled = true;
    order_table[orders::DIE.index()].can_be_queued = false;
    order_table[orders::ATTACK_UNIT.index()].use_weapon_targeting = true;
    order_table[orders::ATTACK_MOVE.index()].use_weapon_targeting = true;
    order_table[orders::TOWER_ATTACK.index()].use_weapon_targeting = true;
    order_table[orders::ZERG_UNIT_MORPH.index()].interruptible = false;
    order_table[orders::CONSTRUCTING_BUILDING.index()].interruptible = false;

    let upgrades = vec![
        // weapon damage
        UpgradeData { mineral_cost_base: 100, mineral_cost_factor: 75, gas_cost_base: 100, gas_cost_factor: 75, time_base: 4000, time_factor: 480, max_level: 3 },
        // armor
        UpgradeData { mineral_cost_base: 100, mineral_cost_factor: 75, gas_cost_base: 100, gas_cost_factor: 75, time_base: 4000, time_factor: 480, max_level: 3 },
    ];

    let techs = vec![TechData { mineral_cost: 100, gas_cost: 100, research_time: 1200, energy_cost: 0 }];

    GameData {
        units,
        weapons,
        flingies,
        sprites,
        images,
        orders: order_table,
        upgrades,
        techs,
        tileset: TilesetData::default(),
        iscript: scripts(),
        sight_values: Vec::new(),
        larva_unit: Some(LARVA),
    }
    .finalize()
}

/// A fresh world on open ground with two occupied players.
pub fn blank_state(width: usize, height: usize, seed: u32) -> SimState {
    let data = game_data();
    let mut state = SimState::new(width, height, seed, GameType::Melee);
    for (index, player) in state.players.iter_mut().enumerate() {
        player.upgrade_levels = vec![0; data.upgrades.len()];
        player.tech_researched = vec![false; data.techs.len()];
        player.shared_vision = 1 << index.min(7);
        match index {
            0 => {
                player.controller = Controller::Occupied;
                player.race = Race::Terran;
                player.initially_active = true;
            }
            1 => {
                player.controller = Controller::Occupied;
                player.race = Race::Protoss;
                player.initially_active = true;
            }
            i if i == NEUTRAL_PLAYER as usize => {
                player.controller = Controller::Neutral;
            }
            _ => {}
        }
    }
    debug_assert_eq!(state.players.len(), MAX_PLAYERS);
    state
}
