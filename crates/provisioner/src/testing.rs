//! Scripted launcher and report channel for workflow tests

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use parking_lot::Mutex;

use ci_droid_core::command::{decode_output, Command, Launcher, ProcessHandle, ProcessOutput};
use ci_droid_core::error::Result;
use ci_droid_core::log::SharedLogSink;
use ci_droid_emulator_bridge::{parse_report, PendingReport, ReportChannel};

/// What a scripted command does once started
pub enum FakeResponse {
    /// Exit immediately with this output
    Exit(ProcessOutput),
    /// Keep running until killed
    Running,
}

type Responder = dyn Fn(&Command, usize) -> FakeResponse + Send + Sync;

/// Launcher answering from a script instead of starting processes.
/// The responder sees each command plus how often the same command line ran before.
pub struct FakeLauncher {
    responder: Box<Responder>,
    invocations: Mutex<Vec<Command>>,
    running: Mutex<Vec<Arc<AtomicBool>>>,
}

impl FakeLauncher {
    pub fn new(responder: impl Fn(&Command, usize) -> FakeResponse + Send + Sync + 'static) -> Self {
        Self {
            responder: Box::new(responder),
            invocations: Mutex::new(Vec::new()),
            running: Mutex::new(Vec::new()),
        }
    }

    pub fn invocations(&self) -> Vec<Command> {
        self.invocations.lock().clone()
    }

    pub fn invocations_with(&self, arg: &str) -> Vec<Command> {
        self.invocations
            .lock()
            .iter()
            .filter(|c| c.has_arg(arg))
            .cloned()
            .collect()
    }

    /// True when every long-running process was killed
    pub fn all_killed(&self) -> bool {
        self.running.lock().iter().all(|killed| killed.load(Ordering::SeqCst))
    }
}

impl Launcher for FakeLauncher {
    type Process = FakeProcess;

    async fn spawn(&self, command: &Command, log: &SharedLogSink, _capture: bool) -> io::Result<FakeProcess> {
        let previous = {
            let mut invocations = self.invocations.lock();
            let previous = invocations
                .iter()
                .filter(|c| c.program() == command.program() && c.argv() == command.argv())
                .count();
            invocations.push(command.clone());
            previous
        };

        let killed = Arc::new(AtomicBool::new(false));
        let output = match (self.responder)(command, previous) {
            FakeResponse::Exit(output) => {
                for line in decode_output(&output.stdout).lines() {
                    log.println(line);
                }
                Some(output)
            }
            FakeResponse::Running => {
                self.running.lock().push(killed.clone());
                None
            }
        };

        Ok(FakeProcess { output, killed })
    }
}

pub struct FakeProcess {
    output: Option<ProcessOutput>,
    killed: Arc<AtomicBool>,
}

impl ProcessHandle for FakeProcess {
    async fn join(&mut self) -> io::Result<ProcessOutput> {
        match &self.output {
            Some(output) => Ok(output.clone()),
            None => std::future::pending().await,
        }
    }

    async fn join_timeout(&mut self, timeout: Duration) -> io::Result<Option<ProcessOutput>> {
        match &self.output {
            Some(output) => Ok(Some(output.clone())),
            None => {
                tokio::time::sleep(timeout).await;
                Ok(None)
            }
        }
    }

    async fn kill(&mut self) -> io::Result<()> {
        self.killed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_running(&mut self) -> bool {
        self.output.is_none() && !self.killed.load(Ordering::SeqCst)
    }
}

/// Report channel that always delivers the same payload
pub struct FakeReport {
    payload: String,
}

impl FakeReport {
    pub fn new(port: i32) -> Self {
        Self::payload(port.to_string())
    }

    pub fn payload(payload: impl Into<String>) -> Self {
        Self { payload: payload.into() }
    }
}

pub struct FakePending(String);

impl ReportChannel for FakeReport {
    type Pending = FakePending;

    async fn listen(&self, _port: u16) -> Result<FakePending> {
        Ok(FakePending(self.payload.clone()))
    }
}

impl PendingReport for FakePending {
    async fn console_port(self, _timeout: Duration) -> Result<i32> {
        parse_report(&self.0)
    }
}
