//! Error types for ci-droid
//!
//! Centralized error handling using thiserror.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// A single problem found while validating an emulator configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Configuration field the problem belongs to
    pub field: &'static str,
    /// Human readable description
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Errors raised while turning tool output into typed records
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("unexpected output: {0}")]
    Malformed(String),

    #[error("output ended before {0}")]
    Truncated(&'static str),
}

/// Main error type for ci-droid
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("{tool} not found in Android SDK at {sdk_root:?}")]
    ToolNotFound { tool: String, sdk_root: PathBuf },

    #[error("{program} {args} failed. exit code: {exit_code}")]
    CommandFailed {
        program: String,
        args: String,
        exit_code: i32,
    },

    #[error("{program} {args} did not complete within {}ms", timeout.as_millis())]
    CommandTimedOut {
        program: String,
        args: String,
        timeout: Duration,
    },

    #[error("invalid emulator configuration:\n{}", join_lines(errors))]
    ValidationFailed { errors: Vec<ValidationError> },

    #[error("Emulator did not start: {0}")]
    EmulatorDidNotStart(String),

    #[error("Emulator did not start or connect to ADB after {attempts} attempts")]
    EmulatorNotReady { attempts: u32 },

    #[error("Build node unavailable: {0}")]
    NodeUnavailable(String),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Cancelled")]
    Cancelled,
}

/// Result type alias for ci-droid operations
pub type Result<T> = std::result::Result<T, RunnerError>;

fn join_lines(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

impl RunnerError {
    /// Check if this error is transient, i.e. worth another attempt while polling
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RunnerError::Io(_)
                | RunnerError::Parse(_)
                | RunnerError::CommandFailed { .. }
                | RunnerError::CommandTimedOut { .. }
        )
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            RunnerError::ToolNotFound { tool, sdk_root } => {
                format!("{} is not installed in the Android SDK at {}", tool, sdk_root.display())
            }
            RunnerError::CommandTimedOut { program, timeout, .. } => {
                format!("{} timed out after {}s", program, timeout.as_secs())
            }
            RunnerError::ValidationFailed { errors } => {
                format!("Emulator configuration has {} problem(s): {}", errors.len(), join_lines(errors).replace('\n', "; "))
            }
            RunnerError::Cancelled => "Operation was cancelled".to_string(),
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_failed_message() {
        let err = RunnerError::CommandFailed {
            program: "sdkmanager".into(),
            args: "--install platforms;android-30".into(),
            exit_code: 1,
        };
        assert_eq!(err.to_string(), "sdkmanager --install platforms;android-30 failed. exit code: 1");
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_validation_failed_lists_every_error() {
        let err = RunnerError::ValidationFailed {
            errors: vec![
                ValidationError::new("os_version", "osVersion is required"),
                ValidationError::new("target_abi", "Target ABI is required"),
            ],
        };
        let message = err.to_string();
        assert!(message.contains("osVersion is required"));
        assert!(message.contains("Target ABI is required"));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_user_message() {
        let err = RunnerError::ToolNotFound {
            tool: "avdmanager".into(),
            sdk_root: PathBuf::from("/opt/sdk"),
        };
        assert_eq!(err.user_message(), "avdmanager is not installed in the Android SDK at /opt/sdk");

        let err = RunnerError::ValidationFailed {
            errors: vec![
                ValidationError::new("os_version", "osVersion is required"),
                ValidationError::new("target_abi", "Target ABI is required"),
            ],
        };
        assert_eq!(
            err.user_message(),
            "Emulator configuration has 2 problem(s): osVersion is required; Target ABI is required"
        );
        assert_eq!(RunnerError::Cancelled.user_message(), "Operation was cancelled");
        assert_eq!(
            RunnerError::EmulatorNotReady { attempts: 30 }.user_message(),
            "Emulator did not start or connect to ADB after 30 attempts"
        );
    }
}
