//! Android Toolchain
//!
//! Locating and driving the Android SDK:
//! - Tool lookup across modern and legacy SDK layouts
//! - `sdkmanager` commands and package listing
//! - Emulator home environment

pub mod tools;
pub mod sdk_manager;
pub mod env;

pub use tools::{locate, Platform, SdkTools, Tool};
pub use sdk_manager::{required_components, SdkComponent, SdkManagerCli, SdkPackage, SdkPackages};
pub use env::EmulatorHome;
