//! In-memory transport for tests
//!
//! Failures and command responses are scripted per target; every call is
//! recorded so tests can assert on exactly what reached the "network".

use super::{CommandOutput, RemoteCommand, Transport, TransportError};
use crate::error::ErrorKind;
use crate::target::Target;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Transfer {
        target: String,
        remote_name: String,
        bytes: Vec<u8>,
    },
    Execute {
        target: String,
        command: RemoteCommand,
    },
}

impl TransportCall {
    pub fn target(&self) -> &str {
        match self {
            TransportCall::Transfer { target, .. } | TransportCall::Execute { target, .. } => {
                target
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Op {
    Transfer,
    Execute,
}

struct Failure {
    kind: ErrorKind,
    /// `None` fails forever
    remaining: Option<usize>,
}

struct Response {
    target: Option<String>,
    contains: String,
    output: CommandOutput,
}

#[derive(Default)]
struct MockState {
    failures: HashMap<(String, Op), Failure>,
    responses: Vec<Response>,
    delays: HashMap<String, Duration>,
    command_delays: Vec<(String, Duration)>,
    calls: Vec<TransportCall>,
    next_file: usize,
}

#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every transfer to `target` fails with `kind`
    pub fn fail_transfer(&self, target: &str, kind: ErrorKind) -> &Self {
        self.set_failure(target, Op::Transfer, kind, None)
    }

    /// The first `times` transfers to `target` fail, later ones succeed
    pub fn fail_transfer_times(&self, target: &str, kind: ErrorKind, times: usize) -> &Self {
        self.set_failure(target, Op::Transfer, kind, Some(times))
    }

    pub fn fail_execute(&self, target: &str, kind: ErrorKind) -> &Self {
        self.set_failure(target, Op::Execute, kind, None)
    }

    pub fn fail_execute_times(&self, target: &str, kind: ErrorKind, times: usize) -> &Self {
        self.set_failure(target, Op::Execute, kind, Some(times))
    }

    /// Commands containing `contains` (on any target) return `output`
    pub fn respond(&self, contains: &str, output: CommandOutput) -> &Self {
        self.push_response(None, contains, output)
    }

    pub fn respond_for(&self, target: &str, contains: &str, output: CommandOutput) -> &Self {
        self.push_response(Some(target.to_string()), contains, output)
    }

    /// Every operation against `target` sleeps first
    pub fn delay(&self, target: &str, delay: Duration) -> &Self {
        self.lock().delays.insert(target.to_string(), delay);
        self
    }

    /// Commands containing `contains` (on any target) sleep first
    pub fn delay_command(&self, contains: &str, delay: Duration) -> &Self {
        self.lock()
            .command_delays
            .push((contains.to_string(), delay));
        self
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.lock().calls.clone()
    }

    pub fn calls_for(&self, target: &str) -> Vec<TransportCall> {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.target() == target)
            .cloned()
            .collect()
    }

    pub fn transfer_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| matches!(call, TransportCall::Transfer { .. }))
            .count()
    }

    /// Executed command lines for `target`, in order
    pub fn commands_for(&self, target: &str) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                TransportCall::Execute { target: t, command } if t == target => {
                    Some(command.line.clone())
                }
                _ => None,
            })
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_failure(&self, target: &str, op: Op, kind: ErrorKind, remaining: Option<usize>) -> &Self {
        self.lock()
            .failures
            .insert((target.to_string(), op), Failure { kind, remaining });
        self
    }

    fn push_response(&self, target: Option<String>, contains: &str, output: CommandOutput) -> &Self {
        self.lock().responses.push(Response {
            target,
            contains: contains.to_string(),
            output,
        });
        self
    }

    fn take_failure(&self, target: &Target, op: Op) -> Option<TransportError> {
        let mut state = self.lock();
        let failure = state.failures.get_mut(&(target.name.clone(), op))?;
        match failure.remaining {
            Some(0) => return None,
            Some(ref mut n) => *n -= 1,
            None => {}
        }
        Some(error_for(failure.kind, target))
    }

    async fn maybe_delay(&self, target: &Target) {
        let delay = self.lock().delays.get(&target.name).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

fn error_for(kind: ErrorKind, target: &Target) -> TransportError {
    let host = target.name.clone();
    match kind {
        ErrorKind::Auth => TransportError::Auth {
            host,
            message: "Permission denied (publickey)".to_string(),
        },
        ErrorKind::Timeout => TransportError::Timeout {
            host,
            after: Duration::from_secs(1),
        },
        ErrorKind::Connection => TransportError::Connection {
            host,
            message: "Connection refused".to_string(),
        },
        other => TransportError::TransferFailed {
            host,
            code: 1,
            stderr: format!("scripted {other}"),
        },
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn transfer(
        &self,
        target: &Target,
        remote_name: &str,
        bytes: &[u8],
    ) -> Result<String, TransportError> {
        self.lock().calls.push(TransportCall::Transfer {
            target: target.name.clone(),
            remote_name: remote_name.to_string(),
            bytes: bytes.to_vec(),
        });
        self.maybe_delay(target).await;

        if let Some(err) = self.take_failure(target, Op::Transfer) {
            return Err(err);
        }

        let mut state = self.lock();
        state.next_file += 1;
        Ok(format!(
            "/tmp/.stagehand-{}-{}-{}",
            target.name, state.next_file, remote_name
        ))
    }

    async fn execute(
        &self,
        target: &Target,
        command: &RemoteCommand,
    ) -> Result<CommandOutput, TransportError> {
        self.lock().calls.push(TransportCall::Execute {
            target: target.name.clone(),
            command: command.clone(),
        });
        self.maybe_delay(target).await;
        let command_delay = self
            .lock()
            .command_delays
            .iter()
            .find(|(contains, _)| command.line.contains(contains.as_str()))
            .map(|(_, delay)| *delay);
        if let Some(delay) = command_delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(err) = self.take_failure(target, Op::Execute) {
            return Err(err);
        }

        let state = self.lock();
        let response = state.responses.iter().find(|r| {
            r.target.as_deref().map_or(true, |t| t == target.name)
                && command.line.contains(&r.contains)
        });
        Ok(response.map(|r| r.output.clone()).unwrap_or_default())
    }
}
