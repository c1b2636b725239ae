//! Error taxonomy.
//!
//! Every failure the kernel can report is fatal for the `step()` that
//! raised it: the simulation is deterministic, so a violated invariant
//! means the state already left its valid set and continuing would only
//! amplify the divergence. Embedders catch the error, optionally restore a
//! snapshot, and retry with different inputs.

use bevy_ecs::prelude::*;
use thiserror::Error;

/// The four failure kinds of the kernel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimError {
    /// A map, replay or data byte stream violated its format contract.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A fixed-capacity arena is exhausted.
    #[error("out of capacity: {0}")]
    OutOfCapacity(&'static str),

    /// A runtime invariant does not hold.
    #[error("logic error: {0}")]
    LogicError(String),

    /// A data value the original engine supports but this kernel does not.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

pub type SimResult<T> = Result<T, SimError>;

/// Latches the first error raised inside the schedule.
///
/// Systems cannot return `Result`, so each phase checks the latch, no-ops
/// when it is set, and records its own failure into it. `SimWorld::step`
/// drains the latch after the schedule runs and surfaces the error.
#[derive(Resource, Debug, Default)]
pub struct SimFault(Option<SimError>);

impl SimFault {
    /// True when a previous phase already failed this tick.
    pub fn is_set(&self) -> bool {
        self.0.is_some()
    }

    /// Record an error; the first one wins.
    pub fn record(&mut self, err: SimError) {
        if self.0.is_none() {
            log::error!("step aborted: {err}");
            self.0 = Some(err);
        }
    }

    /// Run a fallible phase body under the latch.
    pub fn guard(&mut self, f: impl FnOnce() -> SimResult<()>) {
        if self.is_set() {
            return;
        }
        if let Err(err) = f() {
            self.record(err);
        }
    }

    pub fn take(&mut self) -> Option<SimError> {
        self.0.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_fault_wins() {
        let mut fault = SimFault::default();
        fault.record(SimError::OutOfCapacity("units"));
        fault.record(SimError::LogicError("later".into()));
        assert_eq!(fault.take(), Some(SimError::OutOfCapacity("units")));
        assert_eq!(fault.take(), None);
    }

    #[test]
    fn test_guard_skips_after_fault() {
        let mut fault = SimFault::default();
        fault.record(SimError::Unsupported("x".into()));
        let mut ran = false;
        fault.guard(|| {
            ran = true;
            Ok(())
        });
        assert!(!ran);
    }
}
