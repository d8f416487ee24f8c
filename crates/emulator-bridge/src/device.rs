//! Device Types and State
//!
//! Devices as reported by the bridge's `devices` listing.

use serde::{Deserialize, Serialize};

/// Prefix of the serial the bridge assigns to local emulators
pub const EMULATOR_SERIAL_PREFIX: &str = "emulator-";

/// Device state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceState {
    /// Device is online and ready
    Online,
    /// Device is offline
    Offline,
    /// Device is not authorized (need to accept on device)
    Unauthorized,
    /// Device is in bootloader mode
    Bootloader,
    /// Device is in recovery mode
    Recovery,
    /// Device is in sideload mode
    Sideload,
    /// Unknown state
    Unknown,
}

impl DeviceState {
    pub fn from_status(status: &str) -> Self {
        match status {
            "device" => DeviceState::Online,
            "offline" => DeviceState::Offline,
            "unauthorized" => DeviceState::Unauthorized,
            "bootloader" => DeviceState::Bootloader,
            "recovery" => DeviceState::Recovery,
            "sideload" => DeviceState::Sideload,
            _ => DeviceState::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceState::Online => "device",
            DeviceState::Offline => "offline",
            DeviceState::Unauthorized => "unauthorized",
            DeviceState::Bootloader => "bootloader",
            DeviceState::Recovery => "recovery",
            DeviceState::Sideload => "sideload",
            DeviceState::Unknown => "unknown",
        }
    }

    pub fn is_usable(&self) -> bool {
        matches!(self, DeviceState::Online)
    }
}

/// One row of the bridge device listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeDevice {
    /// Device serial, e.g. `emulator-5554`
    pub serial: String,
    /// Status column as printed by the bridge
    pub status: String,
}

impl BridgeDevice {
    pub fn new(serial: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            status: status.into(),
        }
    }

    pub fn state(&self) -> DeviceState {
        DeviceState::from_status(&self.status)
    }

    /// Check if device is online and usable
    pub fn is_usable(&self) -> bool {
        self.state().is_usable()
    }

    /// Check if this is an emulator
    pub fn is_emulator(&self) -> bool {
        self.serial.starts_with(EMULATOR_SERIAL_PREFIX)
    }
}

/// Serial the bridge uses for the emulator listening on `console_port`
pub fn emulator_serial(console_port: u16) -> String {
    format!("{}{}", EMULATOR_SERIAL_PREFIX, console_port)
}

/// True if `devices` lists `serial` in the `device` state
pub fn is_online(devices: &[BridgeDevice], serial: &str) -> bool {
    devices.iter().any(|d| d.serial == serial && d.is_usable())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_mapping() {
        assert_eq!(DeviceState::from_status("device"), DeviceState::Online);
        assert_eq!(DeviceState::from_status("no permissions"), DeviceState::Unknown);
        assert_eq!(DeviceState::Unauthorized.as_str(), "unauthorized");
    }

    #[test]
    fn test_is_online() {
        let devices = vec![
            BridgeDevice::new("emulator-5556", "device"),
            BridgeDevice::new("emulator-5554", "offline"),
        ];
        assert!(!is_online(&devices, &emulator_serial(5554)));
        assert!(is_online(&devices, &emulator_serial(5556)));
        assert!(devices[0].is_emulator());
    }
}
