//! Emulator Provisioner
//!
//! The end-to-end workflow that turns a job's emulator definition into a
//! booted device, the teardown run when the build completes, and the guard
//! that keeps identical emulators from being scheduled side by side.

pub mod job;
pub mod runner;
pub mod teardown;
pub mod guard;

#[cfg(test)]
mod testing;

pub use job::JobConfig;
pub use runner::{ProvisionStage, Provisioner, RunningEmulator};
pub use teardown::{on_build_completed, TeardownReport};
pub use guard::{
    fingerprint, BlockReason, BuildNode, BuildQueue, ConfigFingerprint, Decision, QueuedTask, SchedulingGuard,
    TaskSnapshot,
};
