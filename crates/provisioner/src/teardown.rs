//! Build completion
//!
//! Called by the host once the build that owned an emulator finishes,
//! whatever its result.

use tracing::{info, warn};

use ci_droid_core::command::{CommandExecutor, Launcher, ProcessHandle};
use ci_droid_emulator_bridge::AdbCli;

/// What teardown managed to do; failures are logged, never raised
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub emulator_stopped: bool,
    pub server_stopped: bool,
    pub process_terminated: bool,
}

/// Stop the emulator on `console_port`, then the bridge server, then terminate
/// the emulator process if the caller still holds its handle
pub async fn on_build_completed<L: Launcher>(
    executor: &CommandExecutor<L>,
    adb: &AdbCli,
    console_port: u16,
    process: Option<&mut L::Process>,
) -> TeardownReport {
    let mut report = TeardownReport::default();

    match executor.run(&adb.kill_emulator(console_port)).await {
        Ok(()) => report.emulator_stopped = true,
        Err(e) => warn!("Failed to stop emulator on port {}: {}", console_port, e),
    }

    match executor.run(&adb.kill_server()).await {
        Ok(()) => report.server_stopped = true,
        Err(e) => warn!("Failed to stop bridge server: {}", e),
    }

    if let Some(process) = process {
        match process.kill().await {
            Ok(()) => report.process_terminated = true,
            Err(e) => warn!("Failed to terminate emulator process: {}", e),
        }
    }

    info!("Emulator teardown finished: {:?}", report);
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use ci_droid_core::command::ProcessOutput;
    use ci_droid_core::log::MemoryLogSink;

    use crate::testing::{FakeLauncher, FakeResponse};

    #[tokio::test]
    async fn test_teardown_order() {
        let launcher = FakeLauncher::new(|_, _| FakeResponse::Exit(ProcessOutput::default()));
        let executor = CommandExecutor::new(launcher, Arc::new(MemoryLogSink::new()));
        let adb = AdbCli::new("adb");

        let mut emulator = executor
            .launcher()
            .spawn(&ci_droid_core::command::Command::new("emulator"), executor.log(), false)
            .await
            .unwrap();

        let report = on_build_completed(&executor, &adb, 5556, Some(&mut emulator)).await;
        assert_eq!(
            report,
            TeardownReport {
                emulator_stopped: true,
                server_stopped: true,
                process_terminated: true,
            }
        );

        let invocations = executor.launcher().invocations();
        assert_eq!(invocations[1].argv(), vec!["-s", "emulator-5556", "-P", "5037", "emu", "kill"]);
        assert_eq!(invocations[2].argv(), vec!["-P", "5037", "kill-server"]);
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_teardown() {
        let launcher = FakeLauncher::new(|command, _| {
            let exit_code = if command.has_arg("emu") { 1 } else { 0 };
            FakeResponse::Exit(ProcessOutput { exit_code, stdout: Vec::new() })
        });
        let executor = CommandExecutor::new(launcher, Arc::new(MemoryLogSink::new()));

        let report = on_build_completed(&executor, &AdbCli::new("adb"), 5554, None).await;
        assert!(!report.emulator_stopped);
        assert!(report.server_stopped);
        assert!(!report.process_terminated);
    }
}
