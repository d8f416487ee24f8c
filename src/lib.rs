//! ci-droid - Android emulator provisioning for automated builds
//!
//! Boots a fresh emulator for a build, waits until the device bridge sees it
//! fully booted, and tears it down again when the build completes.
//!
//! ## Architecture
//!
//! - `ci-droid-core`: errors, configuration, log sink, command execution
//! - `ci-droid-android-toolchain`: SDK tool lookup and `sdkmanager`
//! - `ci-droid-emulator-bridge`: device configuration, `avdmanager`, `emulator`, `adb`
//! - `ci-droid-provisioner`: provisioning workflow, teardown, scheduling guard

#![warn(clippy::all)]

pub mod commands;

// Re-export main components for library usage
pub use ci_droid_core as core;
pub use ci_droid_android_toolchain as toolchain;
pub use ci_droid_emulator_bridge as bridge;
pub use ci_droid_provisioner as provisioner;

/// Prelude module for convenient imports
pub mod prelude {
    pub use ci_droid_core::{CommandExecutor, EnvVars, RunnerConfig, RunnerError, TokioLauncher};
    pub use ci_droid_android_toolchain::{Platform, SdkTools};
    pub use ci_droid_emulator_bridge::{DeviceConfig, EmulatorDefinition, TcpReportChannel};
    pub use ci_droid_provisioner::{JobConfig, Provisioner, SchedulingGuard};
}
