//! Command Model & Executor
//!
//! A [`Command`] describes exactly one invocation of an external tool:
//! executable, arguments (some of which may be sensitive), environment
//! overlay, working directory and stdin payload. The [`CommandExecutor`] runs
//! it through a host supplied [`Launcher`], echoes a masked rendition of the
//! command line to the build log and turns non-zero exits into errors.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::env::EnvVars;
use crate::error::{ParseError, Result, RunnerError};
use crate::log::SharedLogSink;

/// Placeholder written to logs instead of sensitive arguments
pub const MASK: &str = "******";

/// Turns captured stdout into a typed value
pub type OutputParser<T> = fn(&[u8]) -> std::result::Result<T, ParseError>;

/// One command line argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arg {
    value: String,
    masked: bool,
}

impl Arg {
    pub fn plain(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            masked: false,
        }
    }

    /// An argument that must never appear verbatim in logs
    pub fn sensitive(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            masked: true,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn is_masked(&self) -> bool {
        self.masked
    }

    fn rendered(&self) -> &str {
        if self.masked {
            MASK
        } else {
            &self.value
        }
    }
}

/// A single external tool invocation
#[derive(Debug, Clone)]
pub struct Command {
    program: PathBuf,
    args: Vec<Arg>,
    env: EnvVars,
    working_dir: Option<PathBuf>,
    stdin: Option<Vec<u8>>,
}

impl Command {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: EnvVars::new(),
            working_dir: None,
            stdin: None,
        }
    }

    /// Assemble a command in one go
    pub fn build(program: impl Into<PathBuf>, args: Vec<Arg>, env: EnvVars, stdin: Option<Vec<u8>>) -> Self {
        Self {
            program: program.into(),
            args,
            env,
            working_dir: None,
            stdin,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(Arg::plain(arg));
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Arg::plain));
        self
    }

    pub fn masked_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(Arg::sensitive(arg));
        self
    }

    pub fn push(mut self, arg: Arg) -> Self {
        self.args.push(arg);
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.put(key, value);
        self
    }

    pub fn envs(mut self, env: &EnvVars) -> Self {
        self.env.overlay(env);
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Attach an output parser
    pub fn with_parser<T>(self, parser: OutputParser<T>) -> ParsedCommand<T> {
        ParsedCommand {
            command: self,
            parser,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Base name of the executable, e.g. `adb`
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.to_string_lossy().into_owned())
    }

    pub fn arguments(&self) -> &[Arg] {
        &self.args
    }

    /// Unmasked argument values, as handed to the process
    pub fn argv(&self) -> Vec<&str> {
        self.args.iter().map(Arg::value).collect()
    }

    /// Arguments joined by spaces with sensitive values masked
    pub fn masked_args(&self) -> String {
        self.args.iter().map(Arg::rendered).collect::<Vec<_>>().join(" ")
    }

    /// Human readable, masked command line as written to the build log
    pub fn display(&self) -> String {
        let mut line = format!("Command: {}", self.program.display());
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg.rendered());
        }
        line
    }

    pub fn environment(&self) -> &EnvVars {
        &self.env
    }

    /// Working directory; defaults to the directory holding the executable
    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir
            .as_deref()
            .or_else(|| self.program.parent().filter(|p| !p.as_os_str().is_empty()))
    }

    pub fn stdin_payload(&self) -> Option<&[u8]> {
        self.stdin.as_deref()
    }

    /// True if the given value appears as one of the arguments
    pub fn has_arg(&self, value: &str) -> bool {
        self.args.iter().any(|a| a.value == value)
    }
}

/// A command whose stdout is turned into a typed value after exit
pub struct ParsedCommand<T> {
    command: Command,
    parser: OutputParser<T>,
}

impl<T> ParsedCommand<T> {
    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn parse(&self, output: &[u8]) -> std::result::Result<T, ParseError> {
        (self.parser)(output)
    }
}

impl<T> Clone for ParsedCommand<T> {
    fn clone(&self) -> Self {
        Self {
            command: self.command.clone(),
            parser: self.parser,
        }
    }
}

/// Exit code plus whatever stdout was captured
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Host abstraction used to start processes
#[allow(async_fn_in_trait)]
pub trait Launcher {
    type Process: ProcessHandle;

    /// Start the command. Output lines are forwarded to `log`; with `capture`
    /// set, stdout is additionally buffered and returned on join.
    async fn spawn(&self, command: &Command, log: &SharedLogSink, capture: bool) -> io::Result<Self::Process>;
}

/// A started process
#[allow(async_fn_in_trait)]
pub trait ProcessHandle {
    /// Wait until the process exits
    async fn join(&mut self) -> io::Result<ProcessOutput>;

    /// Wait until the process exits or the timeout elapses (`None`)
    async fn join_timeout(&mut self, timeout: Duration) -> io::Result<Option<ProcessOutput>>;

    /// Forcefully terminate the process. Terminating an exited process is a no-op.
    async fn kill(&mut self) -> io::Result<()>;

    /// Check whether the process is still alive
    fn is_running(&mut self) -> bool;
}

/// Launcher backed by `tokio::process`
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioLauncher;

impl Launcher for TokioLauncher {
    type Process = TokioProcess;

    async fn spawn(&self, command: &Command, log: &SharedLogSink, capture: bool) -> io::Result<TokioProcess> {
        let mut cmd = tokio::process::Command::new(command.program());
        cmd.args(command.argv())
            .envs(command.environment().iter())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .stdin(if command.stdin_payload().is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });

        if let Some(dir) = command.working_dir() {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn()?;
        debug!("spawned {} (pid {:?})", command.program_name(), child.id());

        if let (Some(mut stdin), Some(payload)) = (child.stdin.take(), command.stdin_payload()) {
            let payload = payload.to_vec();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&payload).await {
                    debug!("stdin closed early: {}", e);
                }
            });
        }

        let stdout = child
            .stdout
            .take()
            .map(|out| tokio::spawn(forward_lines(out, log.clone(), capture)));
        let stderr = child
            .stderr
            .take()
            .map(|err| tokio::spawn(forward_lines(err, log.clone(), false)));

        Ok(TokioProcess {
            child,
            stdout,
            stderr,
            exit_code: None,
        })
    }
}

async fn forward_lines<R: AsyncRead + Unpin>(reader: R, log: SharedLogSink, capture: bool) -> Vec<u8> {
    let mut reader = BufReader::new(reader);
    let mut captured = Vec::new();
    let mut line = Vec::new();

    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                log.println(String::from_utf8_lossy(&line).trim_end());
                if capture {
                    captured.extend_from_slice(&line);
                }
            }
            Err(e) => {
                warn!("failed to read process output: {}", e);
                break;
            }
        }
    }

    captured
}

/// Process started by [`TokioLauncher`]
pub struct TokioProcess {
    child: Child,
    stdout: Option<JoinHandle<Vec<u8>>>,
    stderr: Option<JoinHandle<Vec<u8>>>,
    exit_code: Option<i32>,
}

impl TokioProcess {
    async fn finish(&mut self, status: std::process::ExitStatus) -> io::Result<ProcessOutput> {
        let exit_code = status.code().unwrap_or(-1);
        self.exit_code = Some(exit_code);

        let stdout = match self.stdout.take() {
            Some(handle) => handle.await.map_err(io::Error::other)?,
            None => Vec::new(),
        };
        if let Some(handle) = self.stderr.take() {
            let _ = handle.await;
        }

        Ok(ProcessOutput { exit_code, stdout })
    }
}

impl ProcessHandle for TokioProcess {
    async fn join(&mut self) -> io::Result<ProcessOutput> {
        let status = self.child.wait().await?;
        self.finish(status).await
    }

    async fn join_timeout(&mut self, timeout: Duration) -> io::Result<Option<ProcessOutput>> {
        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(status) => Ok(Some(self.finish(status?).await?)),
            Err(_) => Ok(None),
        }
    }

    async fn kill(&mut self) -> io::Result<()> {
        if self.exit_code.is_some() {
            return Ok(());
        }
        if let Some(status) = self.child.try_wait()? {
            self.exit_code = Some(status.code().unwrap_or(-1));
            return Ok(());
        }

        self.child.kill().await?;
        self.exit_code = Some(-1);
        Ok(())
    }

    fn is_running(&mut self) -> bool {
        if self.exit_code.is_some() {
            return false;
        }
        matches!(self.child.try_wait(), Ok(None))
    }
}

/// Runs commands through a [`Launcher`] and reports to the build log
pub struct CommandExecutor<L> {
    launcher: L,
    log: SharedLogSink,
}

impl<L: Launcher> CommandExecutor<L> {
    pub fn new(launcher: L, log: SharedLogSink) -> Self {
        Self { launcher, log }
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    pub fn log(&self) -> &SharedLogSink {
        &self.log
    }

    /// Run to completion, forwarding stdout to the build log
    pub async fn run(&self, command: &Command) -> Result<()> {
        self.announce(command);
        let mut process = self.launcher.spawn(command, &self.log, false).await?;
        let output = process.join().await?;
        check_exit(command, &output)
    }

    /// Run to completion and feed the captured stdout through the parser
    pub async fn run_parsed<T>(&self, command: &ParsedCommand<T>) -> Result<T> {
        let inner = command.command();
        self.announce(inner);
        let mut process = self.launcher.spawn(inner, &self.log, true).await?;
        let output = process.join().await?;
        check_exit(inner, &output)?;
        Ok(command.parse(&output.stdout)?)
    }

    /// Start without waiting; the caller owns the returned handle
    pub async fn run_async(&self, command: &Command) -> Result<L::Process> {
        self.announce(command);
        Ok(self.launcher.spawn(command, &self.log, false).await?)
    }

    /// Start asynchronously and join with a deadline, then parse the output
    pub async fn run_async_await_output<T>(&self, command: &ParsedCommand<T>, timeout: Duration) -> Result<T> {
        let inner = command.command();
        self.announce(inner);
        let mut process = self.launcher.spawn(inner, &self.log, true).await?;

        match process.join_timeout(timeout).await? {
            Some(output) => {
                check_exit(inner, &output)?;
                Ok(command.parse(&output.stdout)?)
            }
            None => {
                if let Err(e) = process.kill().await {
                    warn!("failed to terminate {}: {}", inner.program_name(), e);
                }
                Err(RunnerError::CommandTimedOut {
                    program: inner.program_name(),
                    args: inner.masked_args(),
                    timeout,
                })
            }
        }
    }

    fn announce(&self, command: &Command) {
        let line = command.display();
        debug!("{}", line);
        self.log.println(&line);
    }
}

fn check_exit(command: &Command, output: &ProcessOutput) -> Result<()> {
    if output.success() {
        Ok(())
    } else {
        Err(RunnerError::CommandFailed {
            program: command.program_name(),
            args: command.masked_args(),
            exit_code: output.exit_code,
        })
    }
}

/// Decode tool output, tolerating stray non UTF-8 bytes
pub fn decode_output(output: &[u8]) -> String {
    String::from_utf8_lossy(output).into_owned()
}
