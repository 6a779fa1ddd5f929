//! OpenSSH client transport
//!
//! Shells out to the system `ssh` binary through a [`ProcessRunner`]. Payloads
//! are streamed over stdin into `cat`, so no `scp`/`sftp` subsystem is needed
//! on the remote side.

use super::{CommandOutput, RemoteCommand, Transport, TransportError};
use crate::subprocess::{ExitStatus, ProcessCommandBuilder, ProcessError, ProcessRunner};
use crate::target::Target;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};
use uuid::Uuid;

/// Exit status `ssh` reserves for its own failures
const SSH_ERROR_EXIT: i32 = 255;

const AUTH_MARKERS: &[&str] = &[
    "permission denied",
    "authentication failed",
    "host key verification failed",
    "too many authentication failures",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// Client binary
    pub program: String,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Upper bound on any single transfer or command
    #[serde(with = "humantime_serde")]
    pub io_timeout: Duration,
    /// Extra `-o` options, e.g. `StrictHostKeyChecking=accept-new`
    pub options: Vec<String>,
    /// Directory on the target that receives staged payloads
    pub remote_tmp: String,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            program: "ssh".to_string(),
            connect_timeout: Duration::from_secs(10),
            io_timeout: Duration::from_secs(60),
            options: Vec::new(),
            remote_tmp: "/tmp".to_string(),
        }
    }
}

pub struct SshTransport {
    runner: Arc<dyn ProcessRunner>,
    config: SshConfig,
}

impl SshTransport {
    pub fn new(runner: Arc<dyn ProcessRunner>, config: SshConfig) -> Self {
        Self { runner, config }
    }

    fn base_args(&self, target: &Target) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.config.connect_timeout.as_secs().max(1)),
        ];
        for option in &self.config.options {
            args.push("-o".to_string());
            args.push(option.clone());
        }
        if let Some(port) = target.auth.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        if let Some(identity) = &target.auth.identity_file {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }
        // A destination starting with '-' must never be read as an option
        args.push("--".to_string());
        args.push(target.destination());
        args
    }

    /// Escalated commands go through non-interactive sudo
    fn command_line(target: &Target, command: &RemoteCommand) -> String {
        if command.escalate && target.escalation.enabled {
            format!(
                "sudo -n -u {} -- sh -c {}",
                shell_words::quote(&target.escalation.user),
                shell_words::quote(&command.line)
            )
        } else {
            command.line.clone()
        }
    }

    fn remote_path(&self, remote_name: &str) -> String {
        let name: String = remote_name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        format!(
            "{}/.stagehand-{}-{}",
            self.config.remote_tmp.trim_end_matches('/'),
            Uuid::new_v4().simple(),
            name
        )
    }

    async fn ssh(
        &self,
        target: &Target,
        line: String,
        stdin: Option<Vec<u8>>,
    ) -> Result<CommandOutput, TransportError> {
        let mut args = self.base_args(target);
        args.push(line);

        // Auth classification matches on English client messages
        let mut builder = ProcessCommandBuilder::new(&self.config.program)
            .args(args)
            .env("LC_ALL", "C")
            .timeout(self.config.io_timeout);
        if let Some(bytes) = stdin {
            builder = builder.stdin(bytes);
        }

        let output = self
            .runner
            .run(builder.build())
            .await
            .map_err(|e| Self::map_process_error(target, e))?;

        let exit_code = match output.status {
            ExitStatus::Success => 0,
            ExitStatus::Error(code) => code,
            ExitStatus::Signal(signal) => {
                return Err(TransportError::Connection {
                    host: target.name.clone(),
                    message: format!("ssh terminated by signal {signal}"),
                })
            }
        };

        if exit_code == SSH_ERROR_EXIT {
            return Err(Self::classify_ssh_failure(target, &output.stderr));
        }

        Ok(CommandOutput {
            exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    fn map_process_error(target: &Target, error: ProcessError) -> TransportError {
        match error {
            ProcessError::Timeout(after) => TransportError::Timeout {
                host: target.name.clone(),
                after,
            },
            other => TransportError::Connection {
                host: target.name.clone(),
                message: other.to_string(),
            },
        }
    }

    fn classify_ssh_failure(target: &Target, stderr: &str) -> TransportError {
        let lowered = stderr.to_lowercase();
        let message = stderr.trim().to_string();
        if AUTH_MARKERS.iter().any(|marker| lowered.contains(marker)) {
            TransportError::Auth {
                host: target.name.clone(),
                message,
            }
        } else {
            TransportError::Connection {
                host: target.name.clone(),
                message,
            }
        }
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn transfer(
        &self,
        target: &Target,
        remote_name: &str,
        bytes: &[u8],
    ) -> Result<String, TransportError> {
        let path = self.remote_path(remote_name);
        debug!(target = %target.name, "Transferring {} bytes to {}", bytes.len(), path);

        let line = format!("umask 077 && cat > {}", shell_words::quote(&path));
        let output = self.ssh(target, line, Some(bytes.to_vec())).await?;
        if !output.success() {
            return Err(TransportError::TransferFailed {
                host: target.name.clone(),
                code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(path)
    }

    async fn execute(
        &self,
        target: &Target,
        command: &RemoteCommand,
    ) -> Result<CommandOutput, TransportError> {
        let line = Self::command_line(target, command);
        trace!(target = %target.name, "Remote command: {}", line);
        self.ssh(target, line, None).await
    }
}
