//! Provisioning Runner
//!
//! Turns a validated [`DeviceConfig`] into a booted emulator that the bridge
//! lists as `device`:
//!
//! 1. list installed SDK packages
//! 2. install the missing platform and system image
//! 3. delete an existing device with the same name
//! 4. create the device
//! 5. write its descriptor and hardware properties
//! 6. start the bridge server
//! 7. launch the emulator without waiting for it
//! 8. wait for the emulator to report its console port
//! 9. poll boot completion and the bridge device list

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ci_droid_android_toolchain::env::{sdk_env, ENV_AVD_HOME};
use ci_droid_android_toolchain::{required_components, EmulatorHome, SdkComponent, SdkManagerCli, SdkTools, Tool};
use ci_droid_core::command::{CommandExecutor, Launcher, ProcessHandle};
use ci_droid_core::config::RunnerConfig;
use ci_droid_core::env::EnvVars;
use ci_droid_core::error::{Result, RunnerError};
use ci_droid_emulator_bridge::{
    is_online, AdbCli, AvdDescriptor, AvdManagerCli, CreateAvd, DeviceConfig, EmulatorCli, EmulatorPorts,
    PendingReport, ReportChannel, SnapshotMode,
};

use crate::teardown::{on_build_completed, TeardownReport};

const NOT_READY_MESSAGE: &str = "Emulator did not start or connect to ADB in the given time";

/// Progress of one provisioning run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionStage {
    CheckingPackages,
    InstallingPackages { packages: Vec<String> },
    CreatingDevice { name: String },
    StartingBridge { port: u16 },
    Launching { name: String },
    WaitingForReport { port: u16 },
    Polling { attempt: u32, attempts: u32 },
    Ready { serial: String },
}

/// A booted emulator owned by the build
#[derive(Debug)]
pub struct RunningEmulator<P> {
    pub name: String,
    pub serial: String,
    pub ports: EmulatorPorts,
    /// Poll iterations it took to become ready
    pub attempts: u32,
    pub process: P,
}

/// Drives the provisioning workflow through the host's launcher
pub struct Provisioner<L, R> {
    executor: CommandExecutor<L>,
    report: R,
    tools: SdkTools,
    config: RunnerConfig,
    home: EmulatorHome,
    env: EnvVars,
    cancel: CancellationToken,
    progress: Option<mpsc::UnboundedSender<ProvisionStage>>,
}

impl<L: Launcher, R: ReportChannel> Provisioner<L, R> {
    pub fn new(
        executor: CommandExecutor<L>,
        report: R,
        tools: SdkTools,
        config: RunnerConfig,
        home: EmulatorHome,
    ) -> Self {
        Self {
            executor,
            report,
            tools,
            config,
            home,
            env: EnvVars::new(),
            cancel: CancellationToken::new(),
            progress: None,
        }
    }

    /// Build environment passed to every tool
    pub fn with_env(mut self, env: EnvVars) -> Self {
        self.env = env;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_progress(mut self, sender: mpsc::UnboundedSender<ProvisionStage>) -> Self {
        self.progress = Some(sender);
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn executor(&self) -> &CommandExecutor<L> {
        &self.executor
    }

    pub fn avd_home(&self) -> PathBuf {
        self.config
            .android
            .avd_home
            .clone()
            .unwrap_or_else(|| self.home.avd_home())
    }

    fn stage(&self, stage: ProvisionStage) {
        debug!("Provisioning stage: {:?}", stage);
        if let Some(sender) = &self.progress {
            let _ = sender.send(stage);
        }
    }

    async fn cancellable<T>(&self, work: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(RunnerError::Cancelled),
            result = work => result,
        }
    }

    async fn tool_env(&self) -> Result<EnvVars> {
        let mut env = self.env.clone();
        env.overlay(&sdk_env(self.tools.sdk_root()));
        env.overlay(&self.home.prepare().await?);

        if let Some(avd_home) = &self.config.android.avd_home {
            tokio::fs::create_dir_all(avd_home).await?;
            env.put(ENV_AVD_HOME, avd_home.to_string_lossy());
        }
        Ok(env)
    }

    fn adb(&self, ports: &EmulatorPorts, env: &EnvVars) -> Result<AdbCli> {
        Ok(AdbCli::new(self.tools.path(Tool::Adb)?)
            .port(ports.adb_server)?
            .max_emulators(self.config.android.max_emulators)
            .env(env))
    }

    /// Provision a booted emulator for `device`
    pub async fn provision(&self, device: &DeviceConfig) -> Result<RunningEmulator<L::Process>> {
        device.ensure_valid()?;

        let name = device.name();
        info!("Provisioning emulator {} ({} {})", name, device.platform(), device.abi());
        self.executor.log().println(&format!("Provisioning emulator {}", name));

        let env = self.tool_env().await?;
        let adb = self
            .cancellable(async {
                self.ensure_packages(device, &env).await?;
                self.recreate_device(device, &name, &env).await?;

                let adb = self.adb(&device.ports, &env)?;
                self.stage(ProvisionStage::StartingBridge { port: device.ports.adb_server });
                self.executor.run(&adb.start_server()).await?;
                Ok::<_, RunnerError>(adb)
            })
            .await?;

        let report_timeout = device
            .connect_timeout
            .unwrap_or_else(|| self.config.readiness.report_timeout());
        let launch = EmulatorCli::for_device(self.tools.path(Tool::Emulator)?, device)
            .snapshot(SnapshotMode::NotPersist)
            .proxy(self.config.proxy.clone())
            .report_timeout(report_timeout)
            .launch()?
            .envs(&env);

        let pending = if device.ports.report > 0 {
            Some(self.report.listen(device.ports.report).await?)
        } else {
            None
        };

        self.stage(ProvisionStage::Launching { name: name.clone() });
        let mut process = self.executor.run_async(&launch).await?;

        let outcome = self
            .cancellable(self.await_ready(device, &adb, &mut process, pending, report_timeout))
            .await;

        match outcome {
            Ok(attempts) => {
                let serial = device.serial();
                info!("Emulator {} ready as {}", name, serial);
                self.stage(ProvisionStage::Ready { serial: serial.clone() });
                Ok(RunningEmulator {
                    name,
                    serial,
                    ports: device.ports,
                    attempts,
                    process,
                })
            }
            Err(e) => {
                if let Err(kill) = process.kill().await {
                    warn!("Failed to stop emulator {}: {}", name, kill);
                }
                Err(e)
            }
        }
    }

    async fn ensure_packages(&self, device: &DeviceConfig, env: &EnvVars) -> Result<()> {
        self.stage(ProvisionStage::CheckingPackages);
        let sdk = SdkManagerCli::new(self.tools.path(Tool::SdkManager)?, self.tools.sdk_root())
            .channel(self.config.android.channel)
            .proxy(self.config.proxy.clone())
            .env(env);

        let inventory = self.executor.run_parsed(&sdk.list()).await?;
        let missing = inventory.missing(&required_components(device.platform(), device.abi()));

        if missing.is_empty() {
            debug!("All required SDK packages installed");
            return Ok(());
        }
        if !self.config.android.install_missing {
            warn!("Missing SDK packages left uninstalled: {}", missing.join(", "));
            return Ok(());
        }

        info!("Installing SDK packages: {}", missing.join(", "));
        self.stage(ProvisionStage::InstallingPackages { packages: missing.clone() });
        self.executor.run(&sdk.install(missing)).await
    }

    async fn recreate_device(&self, device: &DeviceConfig, name: &str, env: &EnvVars) -> Result<()> {
        self.stage(ProvisionStage::CreatingDevice { name: name.to_string() });
        let avd = AvdManagerCli::new(self.tools.path(Tool::AvdManager)?)
            .silent(true)
            .env(env);

        let existing = self.executor.run_parsed(&avd.list_avds()).await?;
        if existing.iter().any(|record| record.name == name) {
            info!("Deleting existing emulator {}", name);
            self.executor.run(&avd.delete(name)?).await?;
        }

        let package = SdkComponent::system_image(device.platform(), device.abi()).package_name();
        let create = avd.create(&CreateAvd {
            name: name.to_string(),
            package: Some(package),
            device: device.device_definition.clone(),
            abi: Some(device.abi().to_string()),
            sdcard: device.sd_card(),
        })?;
        self.executor.run(&create).await?;

        let avd_home = self.avd_home();
        let descriptor = AvdDescriptor::new(name, device.platform());
        descriptor.write(&avd_home).await?;
        descriptor
            .apply_properties(&avd_home, &device.device_properties())
            .await
    }

    async fn await_ready(
        &self,
        device: &DeviceConfig,
        adb: &AdbCli,
        process: &mut L::Process,
        pending: Option<R::Pending>,
        report_timeout: Duration,
    ) -> Result<u32> {
        if let Some(pending) = pending {
            self.stage(ProvisionStage::WaitingForReport { port: device.ports.report });
            let reported = match pending.console_port(report_timeout).await {
                Err(e @ RunnerError::EmulatorDidNotStart(_)) => {
                    self.executor.log().println(NOT_READY_MESSAGE);
                    return Err(e);
                }
                other => other?,
            };
            if reported <= 0 {
                self.executor.log().println(NOT_READY_MESSAGE);
                return Err(RunnerError::EmulatorDidNotStart(format!(
                    "no console port reported on port {} within {}s",
                    device.ports.report,
                    report_timeout.as_secs()
                )));
            }
            if reported != i32::from(device.ports.console) {
                warn!("Emulator reported console port {}, expected {}", reported, device.ports.console);
            }
        }

        self.poll_ready(device, adb, process).await
    }

    async fn poll_ready(&self, device: &DeviceConfig, adb: &AdbCli, process: &mut L::Process) -> Result<u32> {
        let readiness = &self.config.readiness;
        let attempts = readiness.poll_attempts;
        let serial = device.serial();
        let boot_query = adb.clone().serial(serial.clone()).boot_completed();
        let devices_query = adb.devices();

        let mut booted = false;
        let mut online = false;

        for attempt in 1..=attempts {
            self.stage(ProvisionStage::Polling { attempt, attempts });

            if !process.is_running() {
                return Err(RunnerError::EmulatorDidNotStart(
                    "emulator process exited before it was ready".into(),
                ));
            }

            match self
                .executor
                .run_async_await_output(&boot_query, readiness.boot_query_timeout())
                .await
            {
                Ok(flag) => booted |= flag,
                Err(e) if e.is_recoverable() => debug!("Boot query failed: {}", e),
                Err(e) => return Err(e),
            }

            match self
                .executor
                .run_async_await_output(&devices_query, readiness.boot_query_timeout())
                .await
            {
                Ok(devices) => online |= is_online(&devices, &serial),
                Err(e) if e.is_recoverable() => debug!("Device listing failed: {}", e),
                Err(e) => return Err(e),
            }

            debug!("Attempt {}/{}: booted={} online={}", attempt, attempts, booted, online);
            if booted && online {
                return Ok(attempt);
            }

            if attempt < attempts {
                tokio::time::sleep(readiness.poll_interval()).await;
            }
        }

        self.executor.log().println(NOT_READY_MESSAGE);
        Err(RunnerError::EmulatorNotReady { attempts })
    }

    /// Stop the emulator on `ports` and the bridge server, then terminate
    /// `process` if the build still holds it
    pub async fn teardown(&self, ports: &EmulatorPorts, process: Option<&mut L::Process>) -> Result<TeardownReport> {
        let adb = self.adb(ports, &self.env)?;
        Ok(on_build_completed(&self.executor, &adb, ports.console, process).await)
    }
}
