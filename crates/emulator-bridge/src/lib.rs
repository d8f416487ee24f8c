//! Android Emulator Bridge
//!
//! Device configuration, `avdmanager`/`emulator`/`adb` command builders and
//! the output parsers that go with them.

pub mod config;
pub mod avd;
pub mod emulator;
pub mod adb;
pub mod device;
pub mod report;

pub use config::{
    DeviceConfig, EmulatorDefinition, EmulatorPorts, HardwareProperty, ScreenDensity, ScreenResolution,
};
pub use avd::{AvdDescriptor, AvdManagerCli, AvdTarget, CreateAvd, VirtualDeviceRecord};
pub use emulator::{Camera, EmulatorCli, SnapshotMode};
pub use adb::{AdbCli, DEFAULT_SERVER_PORT};
pub use device::{emulator_serial, is_online, BridgeDevice, DeviceState};
pub use report::{parse_report, PendingReport, ReportChannel, TcpReportChannel, NO_REPORT};
