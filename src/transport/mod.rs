//! Connections to remote hosts
//!
//! A [`Transport`] moves bytes to a host and runs commands there. It never
//! retries; the dispatcher owns retry policy.

pub mod mock;
pub mod ssh;

pub use mock::{MockTransport, TransportCall};
pub use ssh::{SshConfig, SshTransport};

use crate::error::ErrorKind;
use crate::target::Target;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// A shell command line to run on a target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCommand {
    pub line: String,
    /// Run through the target's escalation user instead of the login user
    pub escalate: bool,
}

impl RemoteCommand {
    /// Runs as the login user
    pub fn plain(line: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            escalate: false,
        }
    }

    pub fn escalated(line: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            escalate: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{host}: connection failed: {message}")]
    Connection { host: String, message: String },

    #[error("{host}: authentication failed: {message}")]
    Auth { host: String, message: String },

    #[error("{host}: no progress within {after:?}")]
    Timeout { host: String, after: Duration },

    #[error("{host}: writing payload failed with exit code {code}: {stderr}")]
    TransferFailed {
        host: String,
        code: i32,
        stderr: String,
    },
}

impl TransportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransportError::Connection { .. } => ErrorKind::Connection,
            TransportError::Auth { .. } => ErrorKind::Auth,
            TransportError::Timeout { .. } => ErrorKind::Timeout,
            TransportError::TransferFailed { .. } => ErrorKind::Execution,
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Write `bytes` to a fresh temporary file on the target and return its path
    async fn transfer(
        &self,
        target: &Target,
        remote_name: &str,
        bytes: &[u8],
    ) -> Result<String, TransportError>;

    /// Run a command; a non-zero remote exit code is `Ok`
    async fn execute(
        &self,
        target: &Target,
        command: &RemoteCommand,
    ) -> Result<CommandOutput, TransportError>;
}
