//! Per-tick simulation phases.
//!
//! One logical tick runs these systems in a fixed chain; the order is the
//! engine's contract and never changes:
//!
//! | # | System | Responsibility |
//! |---|--------|----------------|
//! | 1 | `frame_begin_system` | advance `current_frame`, reset per-tick scratch |
//! | 2 | `action_dispatch_system` | drain this frame's player commands |
//! | 3 | `unit_update_system` | per unit: order handler, movement, animation |
//! | 4 | `bullet_update_system` | projectile state machines |
//! | 5 | `damage_apply_system` | apply damage staged this tick |
//! | 6 | `vision_system` | fog-of-war reveal on the update-tiles cadence |
//! | 7 | `creep_system` | creep growth and recession |
//! | 8 | `economy_system` | trains, builds, research, larva, supply |
//! | 9 | `status_timers_system` | passive timers, regeneration |
//! | 10 | `victory_system` | defeat evaluation |
//!
//! Every system checks the `SimFault` latch first and no-ops once a phase
//! has failed; the step surfaces the error afterwards. There is no
//! intra-step parallelism: the PRNG stream and the spatial-index mutation
//! order are observable, so the schedule runs chained on one thread.

pub mod bullets;
pub mod combat;
pub mod creep;
pub mod damage;
pub mod economy;
pub mod movement;
pub mod status;
pub mod units;
pub mod victory;
pub mod vision;

pub use bullets::bullet_update_system;
pub use creep::creep_system;
pub use damage::damage_apply_system;
pub use economy::economy_system;
pub use status::status_timers_system;
pub use units::{frame_begin_system, unit_update_system};
pub use victory::victory_system;
pub use vision::vision_system;
