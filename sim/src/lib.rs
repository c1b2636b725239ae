//! The Severed Sun - Simulation Kernel
//!
//! A deterministic, headless reimplementation of a classic real-time
//! strategy simulation engine. Given static data tables, a map and an
//! ordered stream of player commands, it advances an authoritative world
//! one logical tick at a time, producing bit-identical trajectories
//! across runs. Scheduling uses `bevy_ecs` with a chained single-threaded
//! system graph; all simulation arithmetic is integer or fixed point.

pub mod actions;
pub mod api;
pub mod components;
pub mod data;
pub mod errors;
pub mod fixed;
pub mod fixtures;
pub mod iscript;
pub mod map;
pub mod paths;
pub mod pools;
pub mod replay;
pub mod rng;
pub mod spatial;
pub mod sprites;
pub mod state;
pub mod systems;
pub mod terrain;
pub mod world;

pub use actions::{ActionData, PlayerAction};
pub use api::SimWorld;
pub use components::{Unit, UnitId};
pub use data::GameData;
pub use errors::{SimError, SimResult};
pub use map::MapData;
pub use replay::ReplayData;
pub use state::{GameType, SimEvent, SimState};
pub use world::Snapshot;
