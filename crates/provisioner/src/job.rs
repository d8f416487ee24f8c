//! Job Configuration
//!
//! A job file describes one build's emulator plus the runner settings it
//! should be provisioned with.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use tracing::debug;

use ci_droid_android_toolchain::EmulatorHome;
use ci_droid_core::config::RunnerConfig;
use ci_droid_core::env::EnvVars;
use ci_droid_core::error::{Result, RunnerError};
use ci_droid_emulator_bridge::{DeviceConfig, EmulatorDefinition};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Build working directory
    pub workspace: Option<PathBuf>,
    /// Matrix axis values of this build, if any
    pub axes: BTreeMap<String, String>,
    pub emulator: EmulatorDefinition,
    pub runner: RunnerConfig,
}

impl JobConfig {
    /// Load a job file; without a `[runner]` table the per-user runner
    /// configuration applies
    pub async fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading job from {:?}", path);
        let contents = tokio::fs::read_to_string(path).await?;
        let mut job = Self::from_toml(&contents)?;

        if !declares_runner(&contents)? {
            debug!("No runner settings in {:?}, using the user configuration", path);
            job.runner = RunnerConfig::load().await?;
        }
        Ok(job)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let job: JobConfig = toml::from_str(contents)?;
        job.runner.check()?;
        Ok(job)
    }

    fn axes(&self) -> Option<&BTreeMap<String, String>> {
        (!self.axes.is_empty()).then_some(&self.axes)
    }

    /// Expanded device configuration for this build
    pub fn device(&self, env: &EnvVars) -> DeviceConfig {
        self.emulator.expand(env, self.axes())
    }

    /// Where emulator state lives: the workspace when configured to keep it
    /// there, the user's home otherwise
    pub fn emulator_home(&self) -> Result<EmulatorHome> {
        match (&self.workspace, self.runner.android.keep_in_workspace) {
            (Some(workspace), true) => Ok(EmulatorHome::in_workspace(workspace)),
            (None, true) => Err(RunnerError::Config(
                "android.keep_in_workspace requires a workspace".into(),
            )),
            (_, false) => dirs::home_dir()
                .map(EmulatorHome::new)
                .ok_or_else(|| RunnerError::Config("Cannot determine home directory".into())),
        }
    }
}

/// True when the job file carries its own `[runner]` table
pub fn declares_runner(contents: &str) -> Result<bool> {
    let table: toml::Table = toml::from_str(contents)?;
    Ok(table.contains_key("runner"))
}
