//! ADB (Android Debug Bridge) Commands
//!
//! Builds bridge invocations and parses their output.

use std::path::PathBuf;

use ci_droid_core::command::{decode_output, Command, ParsedCommand};
use ci_droid_core::env::EnvVars;
use ci_droid_core::error::{ParseError, Result, RunnerError};

use crate::device::{emulator_serial, BridgeDevice};

/// Port the bridge server listens on unless configured otherwise
pub const DEFAULT_SERVER_PORT: u16 = 5037;

pub const ENV_LOCAL_TRANSPORT_MAX_PORT: &str = "ADB_LOCAL_TRANSPORT_MAX_PORT";

const DEVICES_HEADER: &str = "list of devices attached";

/// Highest local transport port the bridge scans for `max_emulators` emulators
pub fn local_transport_max_port(max_emulators: u32) -> u32 {
    5553 + 2 * max_emulators
}

/// `adb` command builder
#[derive(Debug, Clone)]
pub struct AdbCli {
    executable: PathBuf,
    serial: Option<String>,
    port: u16,
    max_emulators: u32,
    env: EnvVars,
}

impl AdbCli {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            serial: None,
            port: DEFAULT_SERVER_PORT,
            max_emulators: 16,
            env: EnvVars::new(),
        }
    }

    /// Target a single device
    pub fn serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    /// Bridge server port; system ports are rejected
    pub fn port(mut self, port: u16) -> Result<Self> {
        if port <= 1023 {
            return Err(RunnerError::Config(format!("Invalid port {}", port)));
        }
        self.port = port;
        Ok(self)
    }

    pub fn max_emulators(mut self, max_emulators: u32) -> Self {
        self.max_emulators = max_emulators.max(1);
        self
    }

    pub fn env(mut self, env: &EnvVars) -> Self {
        self.env.overlay(env);
        self
    }

    fn env_vars(&self) -> EnvVars {
        let mut env = self.env.clone();
        env.put(
            ENV_LOCAL_TRANSPORT_MAX_PORT,
            local_transport_max_port(self.max_emulators).to_string(),
        );
        env
    }

    fn base(&self) -> Command {
        let mut command = Command::new(&self.executable).envs(&self.env_vars());
        if let Some(serial) = &self.serial {
            command = command.arg("-s").arg(serial.clone());
        }
        command.arg("-P").arg(self.port.to_string())
    }

    /// `adb -P <port> start-server`
    pub fn start_server(&self) -> Command {
        self.base().arg("start-server")
    }

    /// `adb -P <port> kill-server`
    pub fn kill_server(&self) -> Command {
        Command::new(&self.executable)
            .envs(&self.env_vars())
            .args(["-P".to_string(), self.port.to_string(), "kill-server".to_string()])
    }

    /// `adb -s emulator-<port> emu kill`
    pub fn kill_emulator(&self, console_port: u16) -> Command {
        Command::new(&self.executable)
            .envs(&self.env_vars())
            .arg("-s")
            .arg(emulator_serial(console_port))
            .arg("-P")
            .arg(self.port.to_string())
            .args(["emu", "kill"])
    }

    /// `adb devices`, parsed into bridge device rows
    pub fn devices(&self) -> ParsedCommand<Vec<BridgeDevice>> {
        Command::new(&self.executable)
            .envs(&self.env_vars())
            .arg("-P")
            .arg(self.port.to_string())
            .arg("devices")
            .with_parser(parse_devices)
    }

    /// `adb shell getprop sys.boot_completed`, parsed into a flag
    pub fn boot_completed(&self) -> ParsedCommand<bool> {
        self.base()
            .args(["shell", "getprop", "sys.boot_completed"])
            .with_parser(parse_boot_flag)
    }
}

/// Parse `adb devices` output into `{serial, status}` rows
pub fn parse_devices(output: &[u8]) -> std::result::Result<Vec<BridgeDevice>, ParseError> {
    let text = decode_output(output);

    let devices = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.to_lowercase().contains(DEVICES_HEADER))
        .filter(|line| !line.starts_with('*'))
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            match (tokens.next(), tokens.next()) {
                (Some(serial), Some(status)) => Some(BridgeDevice::new(serial, status)),
                _ => None,
            }
        })
        .collect();

    Ok(devices)
}

/// True iff the first output line is exactly `1`
pub fn parse_boot_flag(output: &[u8]) -> std::result::Result<bool, ParseError> {
    let text = decode_output(output);
    Ok(text.lines().next().is_some_and(|line| line.trim() == "1"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "List of devices attached\nemulator-5554\tdevice\nemulator-5556   offline\n\n";

    #[test]
    fn test_parse_devices() {
        let devices = parse_devices(LISTING.as_bytes()).unwrap();
        assert_eq!(
            devices,
            vec![
                BridgeDevice::new("emulator-5554", "device"),
                BridgeDevice::new("emulator-5556", "offline"),
            ]
        );
    }

    #[test]
    fn test_parse_devices_is_repeatable() {
        let first = parse_devices(LISTING.as_bytes()).unwrap();
        let second = parse_devices(LISTING.as_bytes()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_header_only_listing_is_empty() {
        assert!(parse_devices(b"List of devices attached\n").unwrap().is_empty());
        assert!(parse_devices(b"").unwrap().is_empty());
    }

    #[test]
    fn test_daemon_noise_and_short_rows_skipped() {
        let output = b"* daemon not running; starting now at tcp:5037\n* daemon started successfully\nList of devices attached\nbroken\n";
        assert!(parse_devices(output).unwrap().is_empty());
    }

    #[test]
    fn test_boot_flag() {
        assert!(parse_boot_flag(b"1\n").unwrap());
        assert!(parse_boot_flag(b"  1  \r\n").unwrap());
        assert!(!parse_boot_flag(b"0\n").unwrap());
        assert!(!parse_boot_flag(b"").unwrap());
        assert!(!parse_boot_flag(b"\n1\n").unwrap());
        assert!(!parse_boot_flag(b"10\n").unwrap());
    }

    #[test]
    fn test_start_server_environment() {
        let command = AdbCli::new("/sdk/platform-tools/adb")
            .max_emulators(2)
            .port(5038)
            .unwrap()
            .start_server();

        assert_eq!(command.argv(), vec!["-P", "5038", "start-server"]);
        assert_eq!(command.environment().get(ENV_LOCAL_TRANSPORT_MAX_PORT), Some("5557"));
    }

    #[test]
    fn test_system_port_rejected() {
        assert!(matches!(
            AdbCli::new("adb").port(1023),
            Err(RunnerError::Config(_))
        ));
    }

    #[test]
    fn test_boot_query_targets_serial() {
        let query = AdbCli::new("adb").serial("emulator-5554").boot_completed();
        assert_eq!(
            query.command().argv(),
            vec!["-s", "emulator-5554", "-P", "5037", "shell", "getprop", "sys.boot_completed"]
        );
    }

    #[test]
    fn test_kill_emulator() {
        let command = AdbCli::new("adb").kill_emulator(5560);
        assert_eq!(command.argv(), vec!["-s", "emulator-5560", "-P", "5037", "emu", "kill"]);
    }
}
