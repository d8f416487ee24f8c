//! CLI commands for ci-droid
//!
//! Each command loads a job file and runs one part of the emulator lifecycle.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use anyhow::{Context, Result};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::info;

use ci_droid_android_toolchain::{Platform, SdkTools};
use ci_droid_core::{CommandExecutor, EnvVars, RunnerError, TokioLauncher, TracingLogSink};
use ci_droid_emulator_bridge::TcpReportChannel;
use ci_droid_provisioner::{fingerprint, JobConfig, Provisioner};

/// One-line description of a failed command
pub fn describe_error(error: &anyhow::Error) -> String {
    match error.downcast_ref::<RunnerError>() {
        Some(runner) if error.chain().count() > 1 => format!("{}: {}", error, runner.user_message()),
        Some(runner) => runner.user_message(),
        None => format!("{:#}", error),
    }
}

async fn load_job(path: &Path) -> Result<JobConfig> {
    JobConfig::from_file(path)
        .await
        .with_context(|| format!("Failed to load job {}", path.display()))
}

fn provisioner(job: &JobConfig, env: &EnvVars) -> Result<Provisioner<TokioLauncher, TcpReportChannel>> {
    let sdk_root = job.runner.sdk_root(env).ok_or_else(|| {
        RunnerError::NodeUnavailable("Android SDK not found; set android.sdk_root or ANDROID_SDK_ROOT".into())
    })?;
    info!("Using Android SDK at {:?}", sdk_root);

    let executor = CommandExecutor::new(TokioLauncher, Arc::new(TracingLogSink));
    Ok(Provisioner::new(
        executor,
        TcpReportChannel,
        SdkTools::new(sdk_root, Platform::current()),
        job.runner.clone(),
        job.emulator_home()?,
    )
    .with_env(env.clone()))
}

/// Boot an emulator and keep it running until interrupted
pub struct ProvisionCommand {
    pub job: PathBuf,
}

impl ProvisionCommand {
    pub async fn execute(&self) -> Result<()> {
        let job = load_job(&self.job).await?;
        let env = EnvVars::from_process();
        let device = job.device(&env);

        let token = CancellationToken::new();
        let provisioner = provisioner(&job, &env)?.with_cancellation(token.clone());

        let interrupt = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                interrupt.cancel();
            }
        });

        let mut running = provisioner.provision(&device).await?;
        info!(
            "Emulator {} is ready as {} after {} poll(s); press Ctrl-C to stop it",
            running.name, running.serial, running.attempts
        );
        println!("{}", running.serial);

        token.cancelled().await;
        let report = provisioner.teardown(&running.ports, Some(&mut running.process)).await?;
        info!("Teardown: {:?}", report);
        Ok(())
    }
}

/// Stop the emulator and bridge server a job's ports point at
pub struct TeardownCommand {
    pub job: PathBuf,
}

impl TeardownCommand {
    pub async fn execute(&self) -> Result<()> {
        let job = load_job(&self.job).await?;
        let env = EnvVars::from_process();
        let device = job.device(&env);

        let report = provisioner(&job, &env)?.teardown(&device.ports, None).await?;
        info!("Teardown: {:?}", report);
        Ok(())
    }
}

/// Check a job's emulator configuration without running anything
pub struct ValidateCommand {
    pub job: PathBuf,
}

impl ValidateCommand {
    /// Prints the result and returns whether the configuration is valid
    pub async fn execute(&self) -> Result<bool> {
        let job = load_job(&self.job).await?;
        let device = job.device(&EnvVars::from_process());
        let errors = device.validate();

        let result = json!({
            "name": device.name(),
            "valid": errors.is_empty(),
            "errors": errors
                .iter()
                .map(|e| json!({ "field": e.field, "message": e.message }))
                .collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
        Ok(errors.is_empty())
    }
}

/// Print the scheduling fingerprint of a job's emulator
pub struct FingerprintCommand {
    pub job: PathBuf,
}

impl FingerprintCommand {
    pub async fn execute(&self) -> Result<()> {
        let job = load_job(&self.job).await?;
        let env = EnvVars::from_process();
        let axes = (!job.axes.is_empty()).then_some(&job.axes);

        let result = match fingerprint(Some(&job.emulator), Some(&env), axes) {
            Some(fp) => json!({ "fingerprint": fp.value(), "resolved": fp.is_resolved() }),
            None => json!({ "fingerprint": null, "resolved": false }),
        };
        println!("{}", serde_json::to_string_pretty(&result)?);
        Ok(())
    }
}
