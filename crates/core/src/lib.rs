//! ci-droid Core - shared types for the provisioning engine
//!
//! Error taxonomy, runner configuration, the build log sink, environment
//! handling and the command model/executor used by every tool wrapper.

pub mod error;
pub mod log;
pub mod env;
pub mod config;
pub mod command;

pub use error::{ParseError, Result, RunnerError, ValidationError};
pub use log::{LogSink, MemoryLogSink, SharedLogSink, TracingLogSink};
pub use env::EnvVars;
pub use config::{ProxyConfig, RunnerConfig, SdkChannel};
pub use command::{
    Arg, Command, CommandExecutor, Launcher, OutputParser, ParsedCommand, ProcessHandle,
    ProcessOutput, TokioLauncher,
};

/// ci-droid version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
