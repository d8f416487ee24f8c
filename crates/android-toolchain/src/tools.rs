//! Tool Locator
//!
//! Resolves vendor command line tools inside an Android SDK. The modern
//! `cmdline-tools` layout is preferred; the legacy flat `tools` layout is
//! only consulted when the modern one has no match on disk.

use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

use ci_droid_core::error::{Result, RunnerError};

/// Host operating system family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Linux,
    MacOs,
    Windows,
}

impl Platform {
    /// Platform this binary was compiled for
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else {
            Platform::Linux
        }
    }

    /// Detect the platform from an `os.name`-style string reported by a node
    pub fn detect(os_name: &str) -> Option<Self> {
        let os_name = os_name.to_lowercase();
        if os_name.contains("linux") {
            Some(Platform::Linux)
        } else if os_name.contains("windows") {
            Some(Platform::Windows)
        } else if os_name.contains("mac") || os_name.contains("darwin") {
            Some(Platform::MacOs)
        } else {
            None
        }
    }

    pub fn is_windows(self) -> bool {
        self == Platform::Windows
    }
}

/// Vendor tools driven by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    SdkManager,
    AvdManager,
    Emulator,
    Adb,
    Mksdcard,
}

impl Tool {
    pub fn name(self) -> &'static str {
        match self {
            Tool::SdkManager => "sdkmanager",
            Tool::AvdManager => "avdmanager",
            Tool::Emulator => "emulator",
            Tool::Adb => "adb",
            Tool::Mksdcard => "mksdcard",
        }
    }

    fn windows_suffix(self) -> &'static str {
        match self {
            Tool::SdkManager | Tool::AvdManager => ".bat",
            Tool::Emulator | Tool::Adb | Tool::Mksdcard => ".exe",
        }
    }

    /// File name of the executable on the given platform
    pub fn executable(self, platform: Platform) -> String {
        if platform.is_windows() {
            format!("{}{}", self.name(), self.windows_suffix())
        } else {
            self.name().to_string()
        }
    }

    fn modern_dirs(self, sdk_root: &Path) -> Vec<PathBuf> {
        match self {
            Tool::SdkManager | Tool::AvdManager => {
                let cmdline_tools = sdk_root.join("cmdline-tools");
                let mut dirs = vec![cmdline_tools.join("latest").join("bin")];
                dirs.extend(versioned_bin_dirs(&cmdline_tools));
                dirs.push(cmdline_tools.join("bin"));
                dirs
            }
            Tool::Emulator | Tool::Mksdcard => vec![sdk_root.join("emulator")],
            Tool::Adb => vec![sdk_root.join("platform-tools")],
        }
    }

    fn legacy_dirs(self, sdk_root: &Path) -> Vec<PathBuf> {
        match self {
            Tool::SdkManager | Tool::AvdManager => vec![sdk_root.join("tools").join("bin")],
            Tool::Emulator | Tool::Mksdcard => vec![sdk_root.join("tools")],
            Tool::Adb => Vec::new(),
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Numeric components of a `<major>.<minor>` directory name; names that are
/// not versions sort below every version, by name
fn version_key(dir: &Path) -> (Option<Vec<u32>>, String) {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let numeric = name.split('.').map(|part| part.parse::<u32>().ok()).collect();
    (numeric, name)
}

/// `cmdline-tools/<version>/bin` directories, highest version first
fn versioned_bin_dirs(cmdline_tools: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(cmdline_tools) else {
        return Vec::new();
    };

    let mut versions: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .filter(|path| path.file_name().is_some_and(|n| n != "latest" && n != "bin"))
        .collect();
    versions.sort_by_cached_key(|path| std::cmp::Reverse(version_key(path)));

    versions.into_iter().map(|dir| dir.join("bin")).collect()
}

/// Resolve the absolute path of `tool` under `sdk_root`
pub fn locate(sdk_root: &Path, tool: Tool, platform: Platform) -> Result<PathBuf> {
    let executable = tool.executable(platform);

    tool.modern_dirs(sdk_root)
        .into_iter()
        .chain(tool.legacy_dirs(sdk_root))
        .map(|dir| dir.join(&executable))
        .find(|candidate| candidate.is_file())
        .map(|path| {
            debug!("resolved {} to {:?}", tool, path);
            path
        })
        .ok_or_else(|| RunnerError::ToolNotFound {
            tool: executable,
            sdk_root: sdk_root.to_path_buf(),
        })
}

/// Tool lookups bound to one SDK root and platform
#[derive(Debug, Clone)]
pub struct SdkTools {
    sdk_root: PathBuf,
    platform: Platform,
}

impl SdkTools {
    pub fn new(sdk_root: impl Into<PathBuf>, platform: Platform) -> Self {
        Self {
            sdk_root: sdk_root.into(),
            platform,
        }
    }

    pub fn sdk_root(&self) -> &Path {
        &self.sdk_root
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Resolve a tool; every call hits the file system again
    pub fn path(&self, tool: Tool) -> Result<PathBuf> {
        locate(&self.sdk_root, tool, self.platform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"").unwrap();
    }

    #[test]
    fn test_executable_suffix() {
        assert_eq!(Tool::SdkManager.executable(Platform::Windows), "sdkmanager.bat");
        assert_eq!(Tool::Adb.executable(Platform::Windows), "adb.exe");
        assert_eq!(Tool::Emulator.executable(Platform::Linux), "emulator");
    }

    #[test]
    fn test_modern_layout_preferred() {
        let sdk = tempfile::tempdir().unwrap();
        touch(&sdk.path().join("tools/bin/sdkmanager"));
        touch(&sdk.path().join("cmdline-tools/latest/bin/sdkmanager"));

        let path = locate(sdk.path(), Tool::SdkManager, Platform::Linux).unwrap();
        assert_eq!(path, sdk.path().join("cmdline-tools/latest/bin/sdkmanager"));
    }

    #[test]
    fn test_versioned_cmdline_tools() {
        let sdk = tempfile::tempdir().unwrap();
        touch(&sdk.path().join("cmdline-tools/8.0/bin/avdmanager"));
        touch(&sdk.path().join("cmdline-tools/11.0/bin/avdmanager"));

        touch(&sdk.path().join("cmdline-tools/9.0/bin/avdmanager"));

        let path = locate(sdk.path(), Tool::AvdManager, Platform::Linux).unwrap();
        assert_eq!(path, sdk.path().join("cmdline-tools/11.0/bin/avdmanager"));
    }

    #[test]
    fn test_version_ordering() {
        let mut dirs = vec![
            PathBuf::from("8.0"),
            PathBuf::from("nightly"),
            PathBuf::from("11.0"),
            PathBuf::from("9.1"),
        ];
        dirs.sort_by_cached_key(|path| std::cmp::Reverse(version_key(path)));
        assert_eq!(
            dirs,
            vec![
                PathBuf::from("11.0"),
                PathBuf::from("9.1"),
                PathBuf::from("8.0"),
                PathBuf::from("nightly"),
            ]
        );
    }

    #[test]
    fn test_legacy_fallback() {
        let sdk = tempfile::tempdir().unwrap();
        touch(&sdk.path().join("tools/bin/avdmanager"));
        touch(&sdk.path().join("tools/emulator"));

        assert_eq!(
            locate(sdk.path(), Tool::AvdManager, Platform::Linux).unwrap(),
            sdk.path().join("tools/bin/avdmanager")
        );
        assert_eq!(
            locate(sdk.path(), Tool::Emulator, Platform::Linux).unwrap(),
            sdk.path().join("tools/emulator")
        );
    }

    #[test]
    fn test_missing_tool_is_not_found() {
        let sdk = tempfile::tempdir().unwrap();
        match locate(sdk.path(), Tool::Adb, Platform::Windows) {
            Err(RunnerError::ToolNotFound { tool, sdk_root }) => {
                assert_eq!(tool, "adb.exe");
                assert_eq!(sdk_root, sdk.path());
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(!sdk.path().join("platform-tools").exists());
    }

    #[test]
    fn test_platform_detection() {
        assert_eq!(Platform::detect("Linux"), Some(Platform::Linux));
        assert_eq!(Platform::detect("Windows Server 2019"), Some(Platform::Windows));
        assert_eq!(Platform::detect("Mac OS X"), Some(Platform::MacOs));
        assert_eq!(Platform::detect("SunOS"), None);
    }
}
