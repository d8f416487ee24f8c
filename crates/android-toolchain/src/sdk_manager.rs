//! SDK Manager
//!
//! Builds `sdkmanager` invocations and parses its package listing.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};

use ci_droid_core::command::{decode_output, Command, ParsedCommand};
use ci_droid_core::config::{ProxyConfig, SdkChannel};
use ci_droid_core::env::EnvVars;
use ci_droid_core::error::ParseError;

/// Tag of the system images installed for emulators
pub const DEFAULT_IMAGE_TAG: &str = "default";

/// Answers to license prompts while installing
const LICENSE_ANSWERS: &str = "y\ny\ny\ny\ny\ny\ny\ny\ny\ny\n";

/// SDK component types
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SdkComponent {
    /// platforms;<platform>
    Platform(String),
    /// system-images;<platform>;<tag>;<abi>
    SystemImage { platform: String, tag: String, abi: String },
    PlatformTools,
    Emulator,
}

impl SdkComponent {
    /// Get the SDK manager package name
    pub fn package_name(&self) -> String {
        match self {
            SdkComponent::Platform(platform) => format!("platforms;{}", platform),
            SdkComponent::SystemImage { platform, tag, abi } => {
                format!("system-images;{};{};{}", platform, tag, abi)
            }
            SdkComponent::PlatformTools => "platform-tools".to_string(),
            SdkComponent::Emulator => "emulator".to_string(),
        }
    }

    /// Default system image for a platform and ABI
    pub fn system_image(platform: &str, abi: &str) -> Self {
        SdkComponent::SystemImage {
            platform: platform.to_string(),
            tag: DEFAULT_IMAGE_TAG.to_string(),
            abi: abi.to_string(),
        }
    }
}

/// Components an emulator of the given platform and ABI needs, in install order
pub fn required_components(platform: &str, abi: &str) -> Vec<SdkComponent> {
    vec![
        SdkComponent::Platform(platform.to_string()),
        SdkComponent::system_image(platform, abi),
    ]
}

/// One row of the package listing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdkPackage {
    pub id: String,
    pub version: String,
    pub description: String,
}

/// Parsed `sdkmanager --list` output
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdkPackages {
    pub available: Vec<SdkPackage>,
    pub installed: Vec<SdkPackage>,
    pub updates: Vec<SdkPackage>,
}

impl SdkPackages {
    /// Required package names the inventory does not satisfy, order preserved
    pub fn missing(&self, required: &[SdkComponent]) -> Vec<String> {
        let installed: BTreeSet<&str> = self.installed.iter().map(|p| p.id.as_str()).collect();
        let mut seen = BTreeSet::new();

        required
            .iter()
            .map(SdkComponent::package_name)
            .filter(|name| !installed.contains(name.as_str()))
            .filter(|name| seen.insert(name.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    Name,
    Version,
    Description,
    Location,
    Available,
    Unsupported,
}

#[derive(Debug, Clone, Copy)]
enum Bucket {
    Available,
    Installed,
    Updates,
}

fn column_mapping(header: &str) -> Vec<Column> {
    header
        .split('|')
        .map(|cell| match cell.trim() {
            "path" | "id" => Column::Name,
            "version" | "installed" => Column::Version,
            "description" => Column::Description,
            "location" => Column::Location,
            "available" => Column::Available,
            _ => Column::Unsupported,
        })
        .collect()
}

fn is_header(line: &str) -> bool {
    line.starts_with("id") || line.starts_with("path")
}

/// Parse the table printed by `sdkmanager --list`
pub fn parse_packages(output: &[u8]) -> Result<SdkPackages, ParseError> {
    let text = decode_output(output);
    let mut packages = SdkPackages::default();
    let mut bucket: Option<Bucket> = None;
    let mut columns: Vec<Column> = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let lower = line.to_lowercase();
        if lower.starts_with("available packages") {
            bucket = Some(Bucket::Available);
            continue;
        } else if lower.starts_with("installed packages") {
            bucket = Some(Bucket::Installed);
            continue;
        } else if lower.starts_with("available updates") {
            bucket = Some(Bucket::Updates);
            continue;
        }

        let Some(target) = bucket else {
            continue;
        };
        if lower.starts_with("--") {
            continue;
        }
        if is_header(&lower) {
            columns = column_mapping(&lower);
            continue;
        }
        if columns.is_empty() || !line.contains('|') {
            continue;
        }

        let mut package = SdkPackage::default();
        let mut location = None;
        for (column, cell) in columns.iter().zip(line.split('|')) {
            let value = cell.trim();
            if value.is_empty() {
                continue;
            }
            match column {
                Column::Name => package.id = value.to_string(),
                Column::Version | Column::Available => package.version = value.to_string(),
                Column::Description => package.description = value.to_string(),
                Column::Location => location = Some(value.to_string()),
                Column::Unsupported => {}
            }
        }

        if package.id.is_empty() {
            continue;
        }
        if package.description.is_empty() {
            package.description = location.unwrap_or_default();
        }

        match target {
            Bucket::Available => packages.available.push(package),
            Bucket::Installed => packages.installed.push(package),
            Bucket::Updates => packages.updates.push(package),
        }
    }

    Ok(packages)
}

/// `sdkmanager` command builder
#[derive(Debug, Clone)]
pub struct SdkManagerCli {
    executable: PathBuf,
    sdk_root: PathBuf,
    channel: Option<SdkChannel>,
    verbose: bool,
    include_obsolete: bool,
    proxy: Option<ProxyConfig>,
    env: EnvVars,
}

impl SdkManagerCli {
    pub fn new(executable: impl Into<PathBuf>, sdk_root: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            sdk_root: sdk_root.into(),
            channel: None,
            verbose: false,
            include_obsolete: false,
            proxy: None,
            env: EnvVars::new(),
        }
    }

    pub fn channel(mut self, channel: SdkChannel) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn include_obsolete(mut self, include: bool) -> Self {
        self.include_obsolete = include;
        self
    }

    pub fn proxy(mut self, proxy: Option<ProxyConfig>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn env(mut self, env: &EnvVars) -> Self {
        self.env.overlay(env);
        self
    }

    pub fn sdk_root(&self) -> &Path {
        &self.sdk_root
    }

    fn base(&self) -> Command {
        let mut command = Command::new(&self.executable)
            .envs(&self.env)
            .arg(format!("--sdk_root={}", self.sdk_root.display()));

        if let Some(channel) = self.channel {
            command = command.arg(format!("--channel={}", channel.id()));
        }
        if self.verbose {
            command = command.arg("--verbose");
        }
        if self.include_obsolete {
            command = command.arg("--include_obsolete");
        }
        if let Some(proxy) = &self.proxy {
            let url = proxy.url();
            command = command
                .arg("--proxy=http")
                .arg(format!("--proxy_host={}", proxy.host))
                .arg(format!("--proxy_port={}", proxy.port))
                .env("HTTP_PROXY", url.clone())
                .env("HTTPS_PROXY", url);
        }

        command
    }

    /// `sdkmanager --list`, parsed into [`SdkPackages`]
    pub fn list(&self) -> ParsedCommand<SdkPackages> {
        self.base().arg("--list").with_parser(parse_packages)
    }

    /// Install the given packages in one invocation, accepting licenses
    pub fn install<I, S>(&self, packages: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.base()
            .arg("--install")
            .args(packages)
            .stdin(LICENSE_ANSWERS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "\
Loading package information...
Installed packages:
  Path                 | Version | Description                    | Location
  -------              | ------- | -------                        | -------
  emulator             | 31.3.10 | Android Emulator               | emulator
  platforms;android-30 | 3       | Android SDK Platform 30        | platforms/android-30

Available Packages:
  Path                                    | Version | Description
  -------                                 | ------- | -------
  system-images;android-30;default;x86_64 | 10      | Intel x86 Atom_64 System Image
   | 1 | row without id

Available Updates:
  ID       | Installed | Available
  -------  | -------   | -------
  emulator | 31.3.10   | 32.1.8
";

    #[test]
    fn test_component_package_name() {
        assert_eq!(
            SdkComponent::Platform("android-30".into()).package_name(),
            "platforms;android-30"
        );
        assert_eq!(
            SdkComponent::system_image("android-30", "x86_64").package_name(),
            "system-images;android-30;default;x86_64"
        );
    }

    #[test]
    fn test_parse_single_installed_row() {
        let output = b"Installed packages:\nid | version | description\nplatforms;android-30 | 1 | Android API 30\n";
        let packages = parse_packages(output).unwrap();

        assert_eq!(packages.installed.len(), 1);
        assert_eq!(packages.installed[0].id, "platforms;android-30");
        assert_eq!(packages.installed[0].version, "1");
        assert_eq!(packages.installed[0].description, "Android API 30");
        assert!(packages.available.is_empty());
    }

    #[test]
    fn test_parse_all_sections() {
        let packages = parse_packages(LISTING.as_bytes()).unwrap();

        assert_eq!(packages.installed.len(), 2);
        assert_eq!(packages.installed[0].description, "Android Emulator");
        assert_eq!(packages.available.len(), 1);
        assert_eq!(packages.available[0].id, "system-images;android-30;default;x86_64");
        assert_eq!(packages.updates.len(), 1);
        assert_eq!(packages.updates[0].version, "32.1.8");
    }

    #[test]
    fn test_location_used_when_description_missing() {
        let output = b"INSTALLED PACKAGES:\n  Path | Location\n  emulator | emulator/\n";
        let packages = parse_packages(output).unwrap();
        assert_eq!(packages.installed[0].description, "emulator/");
    }

    #[test]
    fn test_rows_outside_sections_ignored() {
        let packages = parse_packages(b"id | version\nfoo | 1\n\n   \n").unwrap();
        assert_eq!(packages, SdkPackages::default());
    }

    #[test]
    fn test_missing_components() {
        let packages = parse_packages(LISTING.as_bytes()).unwrap();
        let missing = packages.missing(&required_components("android-30", "x86_64"));
        assert_eq!(missing, vec!["system-images;android-30;default;x86_64".to_string()]);

        let empty = SdkPackages::default();
        assert_eq!(
            empty.missing(&required_components("android-30", "x86_64")),
            vec![
                "platforms;android-30".to_string(),
                "system-images;android-30;default;x86_64".to_string(),
            ]
        );
    }

    #[test]
    fn test_list_command_flags() {
        let cli = SdkManagerCli::new("/sdk/cmdline-tools/latest/bin/sdkmanager", "/sdk")
            .channel(SdkChannel::Beta)
            .verbose(true);
        let list = cli.list();

        assert_eq!(
            list.command().argv(),
            vec!["--sdk_root=/sdk", "--channel=1", "--verbose", "--list"]
        );
    }

    #[test]
    fn test_install_with_proxy() {
        let proxy = ProxyConfig {
            host: "proxy".into(),
            port: 3128,
            username: None,
            password: None,
        };
        let command = SdkManagerCli::new("/sdk/tools/bin/sdkmanager", "/sdk")
            .proxy(Some(proxy))
            .install(["platforms;android-30", "system-images;android-30;default;x86_64"]);

        assert!(command.has_arg("--proxy=http"));
        assert!(command.has_arg("--proxy_host=proxy"));
        assert!(command.has_arg("--proxy_port=3128"));
        assert_eq!(command.environment().get("HTTPS_PROXY"), Some("http://proxy:3128"));
        assert_eq!(
            &command.argv()[command.argv().len() - 3..],
            &["--install", "platforms;android-30", "system-images;android-30;default;x86_64"]
        );
        assert!(command.stdin_payload().unwrap().starts_with(b"y\n"));
    }
}
