//! Device Configuration
//!
//! [`EmulatorDefinition`] is what a job declares, possibly containing `$VAR`
//! references. Expanding it against an environment yields a normalised
//! [`DeviceConfig`] which is validated as a whole before anything runs.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use ci_droid_core::env::{expand_variables, fix_empty_and_trim, EnvVars};
use ci_droid_core::error::{Result, RunnerError, ValidationError};

use crate::adb::DEFAULT_SERVER_PORT;
use crate::device::emulator_serial;

/// Locale used when none is configured
pub const DEFAULT_LOCALE: &str = "en_US";

/// Smallest SD card, in MB, the emulator accepts
pub const MIN_SD_CARD_MB: u32 = 9;

/// Lowest console port an emulator may use
pub const MIN_CONSOLE_PORT: u16 = 5554;

/// Prefix of generated device names
pub const GENERATED_NAME_PREFIX: &str = "ci";

static PIXELS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^([0-9]{3,4})x([0-9]{3,4})$").expect("resolution pattern is valid"));
static LOCALE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z]{2,3}(?:[_-](?:[A-Za-z]{2}|[0-9]{3}))?$").expect("locale pattern is valid")
});
static NAME_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-zA-Z0-9._-]").expect("name pattern is valid"));

/// Screen density presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScreenDensity {
    Low,
    Medium,
    Tv720p,
    High,
    ExtraHigh,
    ExtraHigh400,
    ExtraHigh420,
    ExtraExtraHigh,
    ExtraExtraHigh560,
    ExtraExtraExtraHigh,
    Unknown,
}

impl ScreenDensity {
    pub const PRESETS: [ScreenDensity; 10] = [
        ScreenDensity::Low,
        ScreenDensity::Medium,
        ScreenDensity::Tv720p,
        ScreenDensity::High,
        ScreenDensity::ExtraHigh,
        ScreenDensity::ExtraHigh400,
        ScreenDensity::ExtraHigh420,
        ScreenDensity::ExtraExtraHigh,
        ScreenDensity::ExtraExtraHigh560,
        ScreenDensity::ExtraExtraExtraHigh,
    ];

    pub fn dpi(self) -> Option<u32> {
        match self {
            ScreenDensity::Low => Some(120),
            ScreenDensity::Medium => Some(160),
            ScreenDensity::Tv720p => Some(213),
            ScreenDensity::High => Some(240),
            ScreenDensity::ExtraHigh => Some(320),
            ScreenDensity::ExtraHigh400 => Some(400),
            ScreenDensity::ExtraHigh420 => Some(420),
            ScreenDensity::ExtraExtraHigh => Some(480),
            ScreenDensity::ExtraExtraHigh560 => Some(560),
            ScreenDensity::ExtraExtraExtraHigh => Some(640),
            ScreenDensity::Unknown => None,
        }
    }

    /// Bucket name, if the density has one
    pub fn alias(self) -> Option<&'static str> {
        match self {
            ScreenDensity::Low => Some("ldpi"),
            ScreenDensity::Medium => Some("mdpi"),
            ScreenDensity::Tv720p => Some("tvdpi"),
            ScreenDensity::High => Some("hdpi"),
            ScreenDensity::ExtraHigh => Some("xhdpi"),
            ScreenDensity::ExtraExtraHigh => Some("xxhdpi"),
            ScreenDensity::ExtraExtraExtraHigh => Some("xxxhdpi"),
            _ => None,
        }
    }

    /// Resolve an alias (`mdpi`) or dpi value (`160`); anything else is `Unknown`
    pub fn parse(value: &str) -> Self {
        let value = value.trim().to_lowercase();
        if value.is_empty() {
            return ScreenDensity::Unknown;
        }

        if let Some(preset) = Self::PRESETS.iter().find(|p| p.alias() == Some(value.as_str())) {
            return *preset;
        }

        value
            .parse::<u32>()
            .ok()
            .and_then(|dpi| Self::PRESETS.iter().copied().find(|p| p.dpi() == Some(dpi)))
            .unwrap_or(ScreenDensity::Unknown)
    }

    pub fn is_known(self) -> bool {
        self != ScreenDensity::Unknown
    }
}

/// Screen resolution presets plus custom pixel sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScreenResolution {
    Qvga,
    Wqvga,
    Fwqvga,
    Hvga,
    Wvga,
    Fwvga,
    Wsvga,
    Wxga720,
    Wxga800,
    Wxga,
    Custom { width: u32, height: u32 },
    Unknown,
}

impl ScreenResolution {
    pub const PRESETS: [ScreenResolution; 10] = [
        ScreenResolution::Qvga,
        ScreenResolution::Wqvga,
        ScreenResolution::Fwqvga,
        ScreenResolution::Hvga,
        ScreenResolution::Wvga,
        ScreenResolution::Fwvga,
        ScreenResolution::Wsvga,
        ScreenResolution::Wxga720,
        ScreenResolution::Wxga800,
        ScreenResolution::Wxga,
    ];

    /// (width, height, alias, skin)
    fn preset(self) -> Option<(u32, u32, &'static str, &'static str)> {
        match self {
            ScreenResolution::Qvga => Some((240, 320, "QVGA", "QVGA")),
            ScreenResolution::Wqvga => Some((240, 400, "WQVGA", "WQVGA400")),
            ScreenResolution::Fwqvga => Some((240, 432, "FWQVGA", "WQVGA432")),
            ScreenResolution::Hvga => Some((320, 480, "HVGA", "HVGA")),
            ScreenResolution::Wvga => Some((480, 800, "WVGA", "WVGA800")),
            ScreenResolution::Fwvga => Some((480, 854, "FWVGA", "WVGA854")),
            ScreenResolution::Wsvga => Some((1024, 654, "WSVGA", "WSVGA")),
            ScreenResolution::Wxga720 => Some((1280, 720, "WXGA720", "WXGA720")),
            ScreenResolution::Wxga800 => Some((1280, 800, "WXGA800", "WXGA800")),
            ScreenResolution::Wxga => Some((1280, 800, "WXGA", "WXGA")),
            ScreenResolution::Custom { .. } | ScreenResolution::Unknown => None,
        }
    }

    /// Resolve an alias (`WVGA`) or a pixel size (`480x800`)
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value.is_empty() {
            return ScreenResolution::Unknown;
        }

        if let Some(preset) = Self::PRESETS
            .iter()
            .find(|p| p.preset().is_some_and(|(_, _, alias, _)| alias.eq_ignore_ascii_case(value)))
        {
            return *preset;
        }

        let Some(caps) = PIXELS.captures(value) else {
            return ScreenResolution::Unknown;
        };
        let (Ok(width), Ok(height)) = (caps[1].parse::<u32>(), caps[2].parse::<u32>()) else {
            return ScreenResolution::Unknown;
        };

        Self::PRESETS
            .iter()
            .copied()
            .find(|p| p.dimensions() == Some((width, height)))
            .unwrap_or(ScreenResolution::Custom { width, height })
    }

    pub fn dimensions(self) -> Option<(u32, u32)> {
        match self {
            ScreenResolution::Custom { width, height } => Some((width, height)),
            other => other.preset().map(|(w, h, _, _)| (w, h)),
        }
    }

    /// Skin name written to the device configuration
    pub fn skin_name(self) -> Option<String> {
        match self {
            ScreenResolution::Custom { width, height } => Some(format!("{}x{}", width, height)),
            other => other.preset().map(|(_, _, _, skin)| skin.to_string()),
        }
    }

    pub fn is_known(self) -> bool {
        self != ScreenResolution::Unknown
    }
}

impl fmt::Display for ScreenResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScreenResolution::Custom { width, height } => write!(f, "{}x{}", width, height),
            ScreenResolution::Unknown => f.write_str("unknown"),
            other => f.write_str(other.preset().map_or("unknown", |(_, _, alias, _)| alias)),
        }
    }
}

/// Hardware key/value written to the device's `config.ini`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareProperty {
    pub key: String,
    pub value: String,
}

impl HardwareProperty {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into().trim().to_string(),
            value: value.into().trim().to_string(),
        }
    }
}

/// Ports handed to one emulator run by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorPorts {
    /// Emulator console port (`-ports <console>,...`)
    pub console: u16,
    /// Port the bridge connects to (`-ports ...,<adb>`)
    pub adb_connect: u16,
    /// Port the emulator reports its console port to
    pub report: u16,
    /// Bridge server port (`adb -P`)
    pub adb_server: u16,
}

impl Default for EmulatorPorts {
    fn default() -> Self {
        Self {
            console: 5554,
            adb_connect: 5555,
            report: 55000,
            adb_server: DEFAULT_SERVER_PORT,
        }
    }
}

/// Emulator as declared by a job, before variable expansion
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorDefinition {
    pub avd_name: Option<String>,
    pub os_version: Option<String>,
    pub density: Option<String>,
    pub resolution: Option<String>,
    pub locale: Option<String>,
    pub device_definition: Option<String>,
    pub sd_card_size: Option<String>,
    pub target_abi: Option<String>,
    pub avd_name_suffix: Option<String>,
    pub hardware_properties: Vec<HardwareProperty>,
    pub ports: EmulatorPorts,
    /// Seconds the emulator gets to report back after launch
    pub connect_timeout_secs: Option<u64>,
    pub wipe_data: bool,
    pub memory_mb: Option<u32>,
}

impl EmulatorDefinition {
    /// Expand every field against `env` (and matrix axis values), then normalise
    pub fn expand(&self, env: &EnvVars, axes: Option<&BTreeMap<String, String>>) -> DeviceConfig {
        let expand = |value: &Option<String>| expand_variables(env, axes, value.as_deref());

        let hardware_properties = self
            .hardware_properties
            .iter()
            .filter_map(|p| {
                let key = expand_variables(env, axes, Some(&p.key))?;
                let value = expand_variables(env, axes, Some(&p.value)).unwrap_or_default();
                Some(HardwareProperty::new(key, value))
            })
            .collect();

        DeviceConfig {
            avd_name: expand(&self.avd_name),
            os_version: expand(&self.os_version).map(|v| normalise_os_version(&v)),
            density: expand(&self.density).map(|v| v.to_lowercase()),
            resolution: expand(&self.resolution).map(|v| normalise_resolution(&v)),
            locale: expand(&self.locale).map(|v| normalise_locale(&v)),
            device_definition: expand(&self.device_definition),
            sd_card_size: expand(&self.sd_card_size),
            target_abi: expand(&self.target_abi).map(|v| normalise_abi(&v)),
            avd_name_suffix: expand(&self.avd_name_suffix),
            hardware_properties,
            ports: self.ports,
            connect_timeout: self.connect_timeout_secs.map(Duration::from_secs),
            wipe_data: self.wipe_data,
            memory_mb: self.memory_mb,
        }
    }
}

fn normalise_os_version(value: &str) -> String {
    if value.len() > 2 && value.starts_with('"') && value.ends_with('"') {
        value[1..value.len() - 1].to_string()
    } else {
        value.to_string()
    }
}

fn normalise_resolution(value: &str) -> String {
    if PIXELS.is_match(value) {
        value.to_lowercase()
    } else if ScreenResolution::parse(value).is_known() {
        value.to_uppercase()
    } else {
        value.to_string()
    }
}

fn normalise_locale(value: &str) -> String {
    match value.split_once(['_', '-']) {
        Some((language, country)) => format!("{}_{}", language.to_lowercase(), country.to_uppercase()),
        None => value.to_lowercase(),
    }
}

fn normalise_abi(value: &str) -> String {
    value.strip_prefix("default/").unwrap_or(value).to_string()
}

fn sanitise(value: &str, replacement: &str) -> String {
    NAME_CHARS.replace_all(value, replacement).into_owned()
}

/// A requested virtual device, expanded and normalised
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub avd_name: Option<String>,
    pub os_version: Option<String>,
    pub density: Option<String>,
    pub resolution: Option<String>,
    pub locale: Option<String>,
    pub device_definition: Option<String>,
    pub sd_card_size: Option<String>,
    pub target_abi: Option<String>,
    pub avd_name_suffix: Option<String>,
    pub hardware_properties: Vec<HardwareProperty>,
    pub ports: EmulatorPorts,
    pub connect_timeout: Option<Duration>,
    pub wipe_data: bool,
    pub memory_mb: Option<u32>,
}

impl DeviceConfig {
    /// Collect every configuration problem; empty means valid
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if let Some(name) = &self.avd_name {
            if NAME_CHARS.is_match(name) {
                errors.push(ValidationError::new(
                    "avd_name",
                    format!("AVD name '{}' may only contain letters, digits, '.', '_' and '-'", name),
                ));
            }
        }

        if fix_empty_and_trim(self.os_version.as_deref()).is_none() {
            errors.push(ValidationError::new("os_version", "osVersion is required"));
        }

        if !self.screen_density().is_known() {
            errors.push(ValidationError::new(
                "density",
                format!("screen density '{}' not valid", self.density.as_deref().unwrap_or_default()),
            ));
        }

        if !self.screen_resolution().is_known() {
            errors.push(ValidationError::new(
                "resolution",
                format!("screen resolution '{}' not valid", self.resolution.as_deref().unwrap_or_default()),
            ));
        }

        if fix_empty_and_trim(self.target_abi.as_deref()).is_none() {
            errors.push(ValidationError::new("target_abi", "Target ABI is required"));
        }

        if let Some(locale) = &self.locale {
            if !LOCALE.is_match(locale) {
                errors.push(ValidationError::new("locale", format!("Invalid locale format {}", locale)));
            }
        }

        if let Some(size) = &self.sd_card_size {
            match size.trim().parse::<u32>() {
                Ok(mb) if mb < MIN_SD_CARD_MB => errors.push(ValidationError::new(
                    "sd_card_size",
                    format!("SD card too small, at least {} MB required", MIN_SD_CARD_MB),
                )),
                Ok(_) => {}
                Err(_) => errors.push(ValidationError::new(
                    "sd_card_size",
                    format!("Invalid SD card size {}", size),
                )),
            }
        }

        if self.ports.console < MIN_CONSOLE_PORT {
            errors.push(ValidationError::new(
                "ports.console",
                format!("Emulator console port must be at least {}", MIN_CONSOLE_PORT),
            ));
        }

        if self.ports.adb_server <= 1023 {
            errors.push(ValidationError::new(
                "ports.adb_server",
                format!("Invalid port {}", self.ports.adb_server),
            ));
        }

        errors
    }

    /// Fail with every problem at once
    pub fn ensure_valid(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(RunnerError::ValidationFailed { errors })
        }
    }

    /// Explicit name if configured, generated otherwise
    pub fn name(&self) -> String {
        match fix_empty_and_trim(self.avd_name.as_deref()) {
            Some(name) => name,
            None => self.generated_name(),
        }
    }

    pub fn is_named(&self) -> bool {
        fix_empty_and_trim(self.avd_name.as_deref()).is_some()
    }

    /// Name derived from the device properties
    pub fn generated_name(&self) -> String {
        let optional = |value: &Option<String>| {
            fix_empty_and_trim(value.as_deref())
                .map(|v| format!("_{}", sanitise(&v, "-")))
                .unwrap_or_default()
        };

        format!(
            "{}_{}_{}_{}_{}{}{}{}",
            GENERATED_NAME_PREFIX,
            sanitise(&self.locale().replace('_', "-"), "-"),
            sanitise(self.density.as_deref().unwrap_or_default(), "-"),
            sanitise(self.resolution.as_deref().unwrap_or_default(), "-"),
            sanitise(self.platform(), "_"),
            optional(&self.target_abi),
            optional(&self.device_definition),
            optional(&self.avd_name_suffix),
        )
    }

    /// Target platform, e.g. `android-30`
    pub fn platform(&self) -> &str {
        self.os_version.as_deref().unwrap_or_default()
    }

    pub fn abi(&self) -> &str {
        self.target_abi.as_deref().unwrap_or_default()
    }

    pub fn locale(&self) -> &str {
        self.locale.as_deref().unwrap_or(DEFAULT_LOCALE)
    }

    /// Language and country parts of the locale
    pub fn language_country(&self) -> (String, Option<String>) {
        match self.locale().split_once('_') {
            Some((language, country)) => (language.to_string(), Some(country.to_string())),
            None => (self.locale().to_string(), None),
        }
    }

    pub fn screen_density(&self) -> ScreenDensity {
        ScreenDensity::parse(self.density.as_deref().unwrap_or_default())
    }

    pub fn screen_resolution(&self) -> ScreenResolution {
        ScreenResolution::parse(self.resolution.as_deref().unwrap_or_default())
    }

    /// SD card argument for the device manager, e.g. `512M`
    pub fn sd_card(&self) -> Option<String> {
        fix_empty_and_trim(self.sd_card_size.as_deref()).map(|size| format!("{}M", size))
    }

    /// Bridge serial of the running emulator
    pub fn serial(&self) -> String {
        emulator_serial(self.ports.console)
    }

    /// Settings merged into `config.ini` after creation
    pub fn device_properties(&self) -> Vec<HardwareProperty> {
        let mut properties = Vec::new();

        if let Some(dpi) = self.screen_density().dpi() {
            properties.push(HardwareProperty::new("hw.lcd.density", dpi.to_string()));
        }
        let resolution = self.screen_resolution();
        if let Some((width, height)) = resolution.dimensions() {
            properties.push(HardwareProperty::new("hw.lcd.width", width.to_string()));
            properties.push(HardwareProperty::new("hw.lcd.height", height.to_string()));
        }
        if let Some(skin) = resolution.skin_name() {
            properties.push(HardwareProperty::new("skin.name", skin));
        }

        properties.extend(self.hardware_properties.iter().filter(|p| !p.key.is_empty()).cloned());
        properties
    }

    /// Deterministic identity used to compare two scheduling requests
    pub fn fingerprint_source(&self) -> String {
        let field = |value: &Option<String>| value.clone().unwrap_or_default();
        [
            field(&self.avd_name),
            field(&self.os_version),
            field(&self.density),
            field(&self.resolution),
            field(&self.locale),
            field(&self.target_abi),
            field(&self.device_definition),
            field(&self.avd_name_suffix),
        ]
        .join("|")
    }
}
