//! Environment Manager
//!
//! Environment handed to every Android tool invocation: SDK root plus the
//! per-build emulator home holding virtual devices.

use std::path::{Path, PathBuf};
use tracing::debug;

use ci_droid_core::env::EnvVars;

pub const ENV_SDK_ROOT: &str = "ANDROID_SDK_ROOT";
pub const ENV_ANDROID_HOME: &str = "ANDROID_HOME";
pub const ENV_SDK_HOME: &str = "ANDROID_SDK_HOME";
pub const ENV_EMULATOR_HOME: &str = "ANDROID_EMULATOR_HOME";
pub const ENV_AVD_HOME: &str = "ANDROID_AVD_HOME";

/// Name of the user data directory below an emulator home
pub const ANDROID_CACHE: &str = ".android";

/// Directory tree where emulator state and virtual devices live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmulatorHome {
    root: PathBuf,
}

impl EmulatorHome {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Emulator home inside a build workspace
    pub fn in_workspace(workspace: &Path) -> Self {
        Self::new(workspace)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/.android`
    pub fn android_dir(&self) -> PathBuf {
        self.root.join(ANDROID_CACHE)
    }

    /// `<root>/.android/avd`
    pub fn avd_home(&self) -> PathBuf {
        self.android_dir().join("avd")
    }

    /// Variables pointing the tools at this home
    pub fn env_vars(&self) -> EnvVars {
        EnvVars::new()
            .with(ENV_SDK_HOME, self.root.to_string_lossy())
            .with(ENV_EMULATOR_HOME, self.android_dir().to_string_lossy())
            .with(ENV_AVD_HOME, self.avd_home().to_string_lossy())
    }

    /// Create the AVD directory if needed and return the environment
    pub async fn prepare(&self) -> std::io::Result<EnvVars> {
        let avd_home = self.avd_home();
        tokio::fs::create_dir_all(&avd_home).await?;
        debug!("emulator home ready at {:?}", avd_home);
        Ok(self.env_vars())
    }
}

/// Variables naming the SDK root
pub fn sdk_env(sdk_root: &Path) -> EnvVars {
    let root = sdk_root.to_string_lossy();
    EnvVars::new()
        .with(ENV_SDK_ROOT, root.clone())
        .with(ENV_ANDROID_HOME, root)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_vars_layout() {
        let home = EmulatorHome::new("/ws");
        let env = home.env_vars();

        assert_eq!(env.get(ENV_SDK_HOME), Some("/ws"));
        assert_eq!(env.get(ENV_EMULATOR_HOME), Some("/ws/.android"));
        assert_eq!(env.get(ENV_AVD_HOME), Some("/ws/.android/avd"));
    }

    #[test]
    fn test_sdk_env() {
        let env = sdk_env(Path::new("/opt/sdk"));
        assert_eq!(env.get(ENV_SDK_ROOT), Some("/opt/sdk"));
        assert_eq!(env.get(ENV_ANDROID_HOME), Some("/opt/sdk"));
    }

    #[tokio::test]
    async fn test_prepare_creates_avd_home() {
        let dir = tempfile::tempdir().unwrap();
        let home = EmulatorHome::in_workspace(dir.path());

        let env = home.prepare().await.unwrap();
        assert!(dir.path().join(".android/avd").is_dir());
        assert_eq!(env.len(), 3);
    }
}
