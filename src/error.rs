use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Classification attached to every failed [`ActionResult`](crate::executor::ActionResult).
///
/// The dispatcher decides retry eligibility from the kind alone, so every
/// component error maps onto exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Render,
    Connection,
    Auth,
    Timeout,
    PermissionRepair,
    Execution,
    Config,
}

impl ErrorKind {
    /// Transient kinds are retried by the dispatcher; everything else is terminal.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Connection | ErrorKind::Timeout)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Render => "RenderError",
            ErrorKind::Connection => "ConnectionError",
            ErrorKind::Auth => "AuthError",
            ErrorKind::Timeout => "TimeoutError",
            ErrorKind::PermissionRepair => "PermissionRepairError",
            ErrorKind::Execution => "ExecutionError",
            ErrorKind::Config => "ConfigError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application-level errors raised before or around a dispatch run.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML error in {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Inventory error in {path}: {source}")]
    Inventory {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Inventory error in {path}: {source}")]
    InventoryJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_)
            | Error::ReadFile { .. }
            | Error::Toml { .. }
            | Error::Inventory { .. }
            | Error::InventoryJson { .. } => ErrorKind::Config,
            Error::Serialization(_) | Error::Io(_) => ErrorKind::Execution,
        }
    }

    /// Process exit code for this error when it escapes to `main`.
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::Config => 2,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_kinds_retry() {
        assert!(ErrorKind::Connection.is_retryable());
        assert!(ErrorKind::Timeout.is_retryable());
        for kind in [
            ErrorKind::Render,
            ErrorKind::Auth,
            ErrorKind::PermissionRepair,
            ErrorKind::Execution,
            ErrorKind::Config,
        ] {
            assert!(!kind.is_retryable(), "{kind} must be terminal");
        }
    }

    #[test]
    fn test_config_errors_exit_with_two() {
        assert_eq!(Error::config("parallelism must be >= 1").exit_code(), 2);
        let io = Error::Io(std::io::Error::other("broken pipe"));
        assert_eq!(io.exit_code(), 1);
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::PermissionRepair).unwrap();
        assert_eq!(json, "\"permission_repair\"");
    }
}
