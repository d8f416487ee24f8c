//! AVD (Android Virtual Device) Manager
//!
//! Builds `avdmanager` invocations, parses its listings and writes the
//! descriptor files a created device needs.

use std::path::{Path, PathBuf};
use configparser::ini::Ini;
use serde::{Deserialize, Serialize};
use tracing::debug;

use ci_droid_core::command::{decode_output, Command, ParsedCommand};
use ci_droid_core::env::{fix_empty_and_trim, EnvVars};
use ci_droid_core::error::{ParseError, Result, RunnerError};

use crate::config::HardwareProperty;

pub const ENV_AVDMANAGER_OPTS: &str = "AVDMANAGER_OPTS";

/// Answer to the "custom hardware profile?" prompt
const CREATE_INPUT: &str = "\r\n";

const AVD_LIST_HEADER: &str = "available android virtual devices";
const TARGET_LIST_HEADER: &str = "available android targets";
const BROKEN_AVDS: &str = "android virtual devices could not be loaded";
const TAG_ABI_MARKER: &str = "tag/abi:";

/// One virtual device reported by `avdmanager list avd`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualDeviceRecord {
    pub name: String,
    pub device: Option<String>,
    pub path: Option<String>,
    pub target: Option<String>,
    pub based_on: Option<String>,
    pub tag_abi: Option<String>,
    pub sdcard: Option<String>,
    pub error: Option<String>,
}

impl VirtualDeviceRecord {
    pub fn is_broken(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetKind {
    Platform,
    AddOn,
    Unknown,
}

impl TargetKind {
    fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "platform" => TargetKind::Platform,
            "add-on" | "addon" | "add_on" => TargetKind::AddOn,
            _ => TargetKind::Unknown,
        }
    }
}

/// One target reported by `avdmanager list target`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvdTarget {
    pub id: String,
    pub name: Option<String>,
    pub kind: Option<TargetKind>,
    pub api_level: Option<u32>,
    pub revision: Option<u32>,
}

fn is_separator(lc_line: &str) -> bool {
    lc_line.starts_with('-') || lc_line.contains("loading local repository")
}

/// Lowercased key and trimmed value of a `Key: value` line.
/// Only the first colon separates, so Windows paths survive.
fn key_value(line: &str) -> Option<(String, Option<String>)> {
    let (key, value) = line.split_once(':')?;
    Some((key.trim().to_lowercase(), fix_empty_and_trim(Some(value))))
}

/// Parse `avdmanager list avd` output
pub fn parse_virtual_devices(output: &[u8]) -> std::result::Result<Vec<VirtualDeviceRecord>, ParseError> {
    let text = decode_output(output);
    let mut devices: Vec<VirtualDeviceRecord> = Vec::new();
    let mut in_listing = false;

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let lc_line = line.to_lowercase();
        if !in_listing || is_separator(&lc_line) || lc_line.contains(BROKEN_AVDS) {
            in_listing |= lc_line.starts_with(AVD_LIST_HEADER);
            continue;
        }

        let Some((key, Some(value))) = key_value(line) else {
            continue;
        };

        if key == "name" {
            devices.push(VirtualDeviceRecord {
                name: value,
                ..Default::default()
            });
            continue;
        }

        let Some(device) = devices.last_mut() else {
            continue;
        };
        match key.as_str() {
            "device" => device.device = Some(value),
            "path" => device.path = Some(value),
            "target" => device.target = Some(value),
            "based on" => {
                // Newer tools print "Based on: Android 11.0 (R) Tag/ABI: default/x86_64"
                match value.to_ascii_lowercase().find(TAG_ABI_MARKER) {
                    Some(idx) => {
                        device.based_on = fix_empty_and_trim(Some(&value[..idx]));
                        device.tag_abi = fix_empty_and_trim(Some(&value[idx + TAG_ABI_MARKER.len()..]));
                    }
                    None => device.based_on = Some(value),
                }
            }
            "tag/abi" => device.tag_abi = Some(value),
            "sdcard" => device.sdcard = Some(value),
            "error" => device.error = Some(value),
            _ => {}
        }
    }

    Ok(devices)
}

/// Parse `avdmanager list target` output
pub fn parse_targets(output: &[u8]) -> std::result::Result<Vec<AvdTarget>, ParseError> {
    let text = decode_output(output);
    let mut targets: Vec<AvdTarget> = Vec::new();
    let mut in_listing = false;

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let lc_line = line.to_lowercase();
        if !in_listing || is_separator(&lc_line) {
            in_listing |= lc_line.starts_with(TARGET_LIST_HEADER);
            continue;
        }

        let Some((key, Some(value))) = key_value(line) else {
            continue;
        };

        if key == "id" {
            let id = match (value.find('"'), value.rfind('"')) {
                (Some(start), Some(end)) if end > start => value[start + 1..end].to_string(),
                _ => return Err(ParseError::Malformed(format!("target id without quoted name: {}", line))),
            };
            targets.push(AvdTarget {
                id,
                name: None,
                kind: None,
                api_level: None,
                revision: None,
            });
            continue;
        }

        let Some(target) = targets.last_mut() else {
            continue;
        };
        match key.as_str() {
            "name" => target.name = Some(value),
            "type" => target.kind = Some(TargetKind::parse(&value)),
            "api level" => target.api_level = value.parse().ok(),
            "revision" => target.revision = value.parse().ok(),
            _ => {}
        }
    }

    Ok(targets)
}

/// Arguments of `avdmanager create avd`
#[derive(Debug, Clone, Default)]
pub struct CreateAvd {
    pub name: String,
    /// System image package, e.g. `system-images;android-30;default;x86_64`
    pub package: Option<String>,
    /// Hardware profile, e.g. `Nexus 5X`
    pub device: Option<String>,
    pub abi: Option<String>,
    /// Size (`512M`) or path of an existing image
    pub sdcard: Option<String>,
}

/// `avdmanager` command builder
#[derive(Debug, Clone)]
pub struct AvdManagerCli {
    executable: PathBuf,
    silent: bool,
    verbose: bool,
    clear_cache: bool,
    env: EnvVars,
}

impl AvdManagerCli {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            silent: false,
            verbose: false,
            clear_cache: true,
            env: EnvVars::new(),
        }
    }

    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    /// Takes precedence over `silent`
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn clear_cache(mut self, clear_cache: bool) -> Self {
        self.clear_cache = clear_cache;
        self
    }

    pub fn env(mut self, env: &EnvVars) -> Self {
        self.env.overlay(env);
        self
    }

    fn base(&self) -> Command {
        let mut env = self.env.clone();
        if let Some(tools_dir) = self.executable.parent() {
            env.put(
                ENV_AVDMANAGER_OPTS,
                format!("-Dcom.android.sdkmanager.toolsdir={}", tools_dir.display()),
            );
        }

        let mut command = Command::new(&self.executable).envs(&env);
        if self.verbose {
            command = command.arg("--verbose");
        } else if self.silent {
            command = command.arg("--silent");
        }
        if self.clear_cache {
            command = command.arg("--clear-cache");
        }
        command
    }

    /// `avdmanager list avd`
    pub fn list_avds(&self) -> ParsedCommand<Vec<VirtualDeviceRecord>> {
        self.base().args(["list", "avd"]).with_parser(parse_virtual_devices)
    }

    /// `avdmanager list target`
    pub fn list_targets(&self) -> ParsedCommand<Vec<AvdTarget>> {
        self.base().args(["list", "target"]).with_parser(parse_targets)
    }

    /// `avdmanager delete avd --name <name>`
    pub fn delete(&self, name: &str) -> Result<Command> {
        let name = required_name(Some(name))?;
        Ok(self.base().args(["delete", "avd", "--name"]).arg(name))
    }

    /// `avdmanager create avd --name <name> ... --force`
    pub fn create(&self, request: &CreateAvd) -> Result<Command> {
        let name = required_name(Some(&request.name))?;
        let mut command = self.base().args(["create", "avd", "--name"]).arg(name);

        if let Some(package) = &request.package {
            command = command.arg("--package").arg(package.clone());
        }
        if let Some(device) = &request.device {
            command = command.arg("--device").arg(device.clone());
        }
        if let Some(abi) = &request.abi {
            command = command.arg("--abi").arg(abi.clone());
        }
        if let Some(sdcard) = fix_empty_and_trim(request.sdcard.as_deref()) {
            command = command.arg("--sdcard").arg(sdcard);
        }

        Ok(command.arg("--force").stdin(CREATE_INPUT))
    }
}

fn required_name(name: Option<&str>) -> Result<String> {
    fix_empty_and_trim(name).ok_or_else(|| RunnerError::Config("Device name is required".into()))
}

/// The `<name>.ini` file that points the emulator at a device directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvdDescriptor {
    pub name: String,
    /// Platform the device targets, e.g. `android-30`
    pub target: String,
}

impl AvdDescriptor {
    pub fn new(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
        }
    }

    pub fn ini_path(&self, avd_home: &Path) -> PathBuf {
        avd_home.join(format!("{}.ini", self.name))
    }

    pub fn device_dir(&self, avd_home: &Path) -> PathBuf {
        avd_home.join(format!("{}.avd", self.name))
    }

    pub fn contents(&self, avd_home: &Path) -> String {
        let device_dir = self.device_dir(avd_home);
        let relative = avd_home
            .parent()
            .and_then(|parent| device_dir.strip_prefix(parent).ok())
            .unwrap_or(&device_dir)
            .to_path_buf();

        format!(
            "avd.ini.encoding=UTF-8\npath={}\npath.rel={}\ntarget={}\n",
            device_dir.display(),
            relative.display(),
            self.target,
        )
    }

    /// Write `<avd_home>/<name>.ini`, replacing any previous one
    pub async fn write(&self, avd_home: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(avd_home).await?;
        let path = self.ini_path(avd_home);
        tokio::fs::write(&path, self.contents(avd_home)).await?;
        debug!("Wrote AVD descriptor {:?}", path);
        Ok(path)
    }

    /// Merge `properties` into the device's `config.ini`
    pub async fn apply_properties(&self, avd_home: &Path, properties: &[HardwareProperty]) -> Result<()> {
        let device_dir = self.device_dir(avd_home);
        tokio::fs::create_dir_all(&device_dir).await?;
        let config_path = device_dir.join("config.ini");

        let existing = match tokio::fs::read_to_string(&config_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };

        let mut ini = Ini::new_cs();
        ini.read(existing)
            .map_err(|e| ParseError::Malformed(format!("{}: {}", config_path.display(), e)))?;

        for property in properties.iter().filter(|p| !p.key.is_empty()) {
            ini.set("default", &property.key, Some(property.value.clone()));
        }

        tokio::fs::write(&config_path, ini.writes()).await?;
        debug!("Applied {} properties to {:?}", properties.len(), config_path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const AVD_LISTING: &str = "\
Loading local repository...
[=========                              ] 25% Loading local repository...
Available Android Virtual Devices:
    Name: Nexus_5X
  Device: Nexus 5X (Google)
    Path: C:\\Users\\ci\\.android\\avd\\Nexus_5X.avd
  Target: Default Android System Image
          Based on: Android 11.0 (R) Tag/ABI: default/x86_64
  Sdcard: 512M
---------
    Name: legacy
    Path: /home/ci/.android/avd/legacy.avd
  Target: Android 7.0 (API level 24)
 Tag/ABI: google_apis/x86
---------
The following Android Virtual Devices could not be loaded:
    Name: broken
    Path: /home/ci/.android/avd/broken.avd
   Error: Missing system image for x86 default android-99.
";

    #[test]
    fn test_parse_virtual_devices() {
        let devices = parse_virtual_devices(AVD_LISTING.as_bytes()).unwrap();
        assert_eq!(devices.len(), 3);

        let modern = &devices[0];
        assert_eq!(modern.name, "Nexus_5X");
        assert_eq!(modern.path.as_deref(), Some("C:\\Users\\ci\\.android\\avd\\Nexus_5X.avd"));
        assert_eq!(modern.based_on.as_deref(), Some("Android 11.0 (R)"));
        assert_eq!(modern.tag_abi.as_deref(), Some("default/x86_64"));
        assert_eq!(modern.sdcard.as_deref(), Some("512M"));

        assert_eq!(devices[1].tag_abi.as_deref(), Some("google_apis/x86"));
        assert_eq!(devices[1].target.as_deref(), Some("Android 7.0 (API level 24)"));
        assert!(devices[2].is_broken());
    }

    #[test]
    fn test_parse_localized_based_on() {
        let listing = "Available Android Virtual Devices:\n    Name: x\n Based on: İTag/ABI:é\n";
        let devices = parse_virtual_devices(listing.as_bytes()).unwrap();
        assert_eq!(devices[0].based_on.as_deref(), Some("İ"));
        assert_eq!(devices[0].tag_abi.as_deref(), Some("é"));

        let listing = "Available Android Virtual Devices:\n    Name: y\n Based on: Android 14.0 (Ü) TAG/ABI: google_apis/arm64-v8a\n";
        let devices = parse_virtual_devices(listing.as_bytes()).unwrap();
        assert_eq!(devices[0].based_on.as_deref(), Some("Android 14.0 (Ü)"));
        assert_eq!(devices[0].tag_abi.as_deref(), Some("google_apis/arm64-v8a"));
    }

    #[test]
    fn test_parse_virtual_devices_without_header() {
        let output = b"    Name: stray\n    Path: /tmp/stray.avd\n";
        assert!(parse_virtual_devices(output).unwrap().is_empty());
    }

    #[test]
    fn test_parse_targets() {
        let output = "Available Android targets:\n----------\nid: 1 or \"android-30\"\n     Name: Android API 30\n     Type: Platform\n     API level: 30\n     Revision: 3\n----------\nid: 2 or \"android-33\"\n     Type: Platform\n     API level: 33\n";
        let targets = parse_targets(output.as_bytes()).unwrap();

        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].id, "android-30");
        assert_eq!(targets[0].kind, Some(TargetKind::Platform));
        assert_eq!(targets[0].revision, Some(3));
        assert_eq!(targets[1].api_level, Some(33));
        assert_eq!(targets[1].name, None);
    }

    #[test]
    fn test_global_options() {
        let cli = AvdManagerCli::new("/sdk/cmdline-tools/latest/bin/avdmanager").silent(true);
        assert_eq!(cli.list_avds().command().argv(), vec!["--silent", "--clear-cache", "list", "avd"]);

        let verbose = cli.clone().verbose(true);
        assert_eq!(verbose.list_targets().command().argv(), vec!["--verbose", "--clear-cache", "list", "target"]);
        assert_eq!(
            verbose.list_targets().command().environment().get(ENV_AVDMANAGER_OPTS),
            Some("-Dcom.android.sdkmanager.toolsdir=/sdk/cmdline-tools/latest/bin")
        );
    }

    #[test]
    fn test_create_command() {
        let cli = AvdManagerCli::new("avdmanager").clear_cache(false);
        let command = cli
            .create(&CreateAvd {
                name: "ci_dev".into(),
                package: Some("system-images;android-30;default;x86_64".into()),
                device: Some("Nexus 5X".into()),
                abi: Some("x86_64".into()),
                sdcard: Some("512M".into()),
            })
            .unwrap();

        assert_eq!(
            command.argv(),
            vec![
                "create", "avd", "--name", "ci_dev",
                "--package", "system-images;android-30;default;x86_64",
                "--device", "Nexus 5X",
                "--abi", "x86_64",
                "--sdcard", "512M",
                "--force",
            ]
        );
        assert_eq!(command.stdin_payload(), Some(b"\r\n".as_slice()));
    }

    #[test]
    fn test_empty_name_rejected() {
        let cli = AvdManagerCli::new("avdmanager");
        assert!(matches!(cli.delete(""), Err(RunnerError::Config(_))));
        assert!(matches!(cli.create(&CreateAvd::default()), Err(RunnerError::Config(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_descriptor_contents() {
        let descriptor = AvdDescriptor::new("ci_dev", "android-30");
        let contents = descriptor.contents(Path::new("/home/ci/.android/avd"));

        assert_eq!(
            contents,
            "avd.ini.encoding=UTF-8\npath=/home/ci/.android/avd/ci_dev.avd\npath.rel=avd/ci_dev.avd\ntarget=android-30\n"
        );
    }

    #[tokio::test]
    async fn test_write_descriptor_and_properties() {
        let temp = TempDir::new().unwrap();
        let avd_home = temp.path().join("avd");
        let descriptor = AvdDescriptor::new("ci_dev", "android-30");

        let ini = descriptor.write(&avd_home).await.unwrap();
        assert!(tokio::fs::read_to_string(&ini).await.unwrap().contains("target=android-30"));

        let config = descriptor.device_dir(&avd_home).join("config.ini");
        tokio::fs::create_dir_all(config.parent().unwrap()).await.unwrap();
        tokio::fs::write(&config, "hw.lcd.density=240\nabi.type=x86_64\n").await.unwrap();

        descriptor
            .apply_properties(
                &avd_home,
                &[
                    HardwareProperty::new("hw.lcd.density", "160"),
                    HardwareProperty::new("hw.ramSize", "2048"),
                ],
            )
            .await
            .unwrap();

        let written = tokio::fs::read_to_string(&config).await.unwrap();
        assert!(written.contains("hw.lcd.density=160"));
        assert!(written.contains("hw.ramSize=2048"));
        assert!(written.contains("abi.type=x86_64"));
        assert!(!written.contains("240"));
    }
}
