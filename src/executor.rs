//! Remote action execution
//!
//! Runs the named action on a target against a previously staged payload and
//! turns whatever comes back into an [`ActionResult`].

use crate::error::ErrorKind;
use crate::stager::StagedPayload;
use crate::target::Target;
use crate::transport::{CommandOutput, RemoteCommand, Transport, TransportError};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// The remote action and its arguments, shared by every target
#[derive(Debug, Clone, Default)]
pub struct ActionRequest {
    pub action: String,
    pub extra_args: BTreeMap<String, String>,
}

impl ActionRequest {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            extra_args: BTreeMap::new(),
        }
    }

    pub fn with_args(mut self, args: BTreeMap<String, String>) -> Self {
        self.extra_args = args;
        self
    }

    /// `<action> k=v ... src=<path>` with keys and values shell-quoted
    pub fn command_line(&self, staged: &StagedPayload) -> String {
        let mut line = shell_words::quote(&self.action).into_owned();
        for (key, value) in self.extra_args.iter().filter(|(k, _)| k.as_str() != "src") {
            line.push(' ');
            line.push_str(&format!(
                "{}={}",
                shell_words::quote(key),
                shell_words::quote(value)
            ));
        }
        line.push_str(" src=");
        line.push_str(&shell_words::quote(&staged.remote_path));
        line
    }
}

/// Outcome for exactly one target
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionResult {
    pub target: String,
    pub success: bool,
    pub changed: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Structured output when the action printed a JSON object
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Stage+execute passes consumed
    pub attempts: u32,
}

impl ActionResult {
    pub fn success(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            success: true,
            changed: false,
            message: message.into(),
            error_kind: None,
            output: None,
            attempts: 1,
        }
    }

    pub fn failure(target: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            success: false,
            changed: false,
            message: message.into(),
            error_kind: Some(kind),
            output: None,
            attempts: 1,
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn retried(&self) -> bool {
        self.attempts > 1
    }
}

#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("payload staged for '{staged_for}' cannot run on '{target}'")]
    WrongTarget { staged_for: String, target: String },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ExecuteError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecuteError::WrongTarget { .. } => ErrorKind::Execution,
            ExecuteError::Transport(e) => e.kind(),
        }
    }
}

pub struct ActionExecutor {
    transport: Arc<dyn Transport>,
}

impl ActionExecutor {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Run the action, folding every error into a failed result
    pub async fn run(
        &self,
        target: &Target,
        staged: &StagedPayload,
        request: &ActionRequest,
    ) -> ActionResult {
        match self.try_run(target, staged, request).await {
            Ok(result) => result,
            Err(e) => ActionResult::failure(
                &target.name,
                ErrorKind::Execution,
                format!("{e} ({})", staged.remote_path),
            ),
        }
    }

    /// Like [`run`](Self::run) but hands transport errors back so the caller
    /// can tell transient failures from terminal ones.
    pub async fn try_run(
        &self,
        target: &Target,
        staged: &StagedPayload,
        request: &ActionRequest,
    ) -> Result<ActionResult, ExecuteError> {
        if !staged.belongs_to(target) {
            return Err(ExecuteError::WrongTarget {
                staged_for: staged.target.clone(),
                target: target.name.clone(),
            });
        }

        let line = request.command_line(staged);
        let command = if target.escalation.enabled {
            RemoteCommand::escalated(line)
        } else {
            RemoteCommand::plain(line)
        };

        debug!(target = %target.name, "Running action '{}'", request.action);
        let output = self.transport.execute(target, &command).await?;
        Ok(interpret(&target.name, output))
    }

    /// Best-effort removal of a staged file; failures are only logged
    pub async fn discard(&self, target: &Target, staged: &StagedPayload) {
        let command = RemoteCommand::plain(format!(
            "rm -f {}",
            shell_words::quote(&staged.remote_path)
        ));
        match self.transport.execute(target, &command).await {
            Ok(output) if output.success() => {
                debug!(target = %target.name, "Removed {}", staged.remote_path);
            }
            Ok(output) => warn!(
                target = %target.name,
                "Cleanup of {} exited with {}",
                staged.remote_path,
                output.exit_code
            ),
            Err(e) => warn!(target = %target.name, "Cleanup of {} failed: {}", staged.remote_path, e),
        }
    }
}

fn interpret(target: &str, output: CommandOutput) -> ActionResult {
    if !output.success() {
        let message = [output.stderr.trim(), output.stdout.trim()]
            .into_iter()
            .find(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("exit code {}", output.exit_code));
        return ActionResult::failure(target, ErrorKind::Execution, message);
    }

    let stdout = output.stdout.trim();
    let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(stdout) else {
        return ActionResult::success(target, stdout);
    };

    let message = fields
        .get("msg")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| stdout.to_string());
    let changed = fields.get("changed").and_then(Value::as_bool).unwrap_or(false);
    let failed = fields.get("failed").and_then(Value::as_bool).unwrap_or(false);

    let mut result = if failed {
        ActionResult::failure(target, ErrorKind::Execution, message)
    } else {
        ActionResult::success(target, message)
    };
    result.changed = changed;
    result.output = Some(Value::Object(fields));
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::Escalation;
    use crate::transport::MockTransport;

    fn staged_on(target: &str) -> StagedPayload {
        StagedPayload {
            target: target.to_string(),
            remote_path: format!("/tmp/.stagehand-{target}-guest.xml"),
            len: 42,
        }
    }

    fn output(exit_code: i32, stdout: &str, stderr: &str) -> CommandOutput {
        CommandOutput {
            exit_code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn test_command_line_appends_src() {
        let mut args = BTreeMap::new();
        args.insert("state".to_string(), "running".to_string());
        args.insert("src".to_string(), "/ignored".to_string());
        args.insert("name".to_string(), "my vm".to_string());
        let request = ActionRequest::new("virt_guest").with_args(args);

        assert_eq!(
            request.command_line(&staged_on("kvm1")),
            "virt_guest name='my vm' state=running src=/tmp/.stagehand-kvm1-guest.xml"
        );
    }

    #[tokio::test]
    async fn test_nonzero_exit_reports_stderr() {
        let mock = MockTransport::new();
        mock.respond("virt_guest", output(1, "", "guest not found\n"));
        let executor = ActionExecutor::new(Arc::new(mock.clone()));

        let result = executor
            .run(
                &Target::new("kvm1"),
                &staged_on("kvm1"),
                &ActionRequest::new("virt_guest"),
            )
            .await;

        assert!(!result.success);
        assert_eq!(result.message, "guest not found");
        assert_eq!(result.error_kind, Some(ErrorKind::Execution));
    }

    #[tokio::test]
    async fn test_json_stdout_is_parsed() {
        let mock = MockTransport::new();
        mock.respond(
            "virt_guest",
            output(0, r#"{"changed": true, "msg": "guest defined"}"#, ""),
        );
        let executor = ActionExecutor::new(Arc::new(mock));

        let result = executor
            .run(
                &Target::new("kvm1"),
                &staged_on("kvm1"),
                &ActionRequest::new("virt_guest"),
            )
            .await;

        assert!(result.success);
        assert!(result.changed);
        assert_eq!(result.message, "guest defined");
        assert_eq!(result.output.unwrap()["changed"], Value::Bool(true));
    }

    #[tokio::test]
    async fn test_json_failed_flag_marks_failure() {
        let mock = MockTransport::new();
        mock.respond(
            "hponcfg",
            output(0, r#"{"failed": true, "msg": "firmware too old"}"#, ""),
        );
        let executor = ActionExecutor::new(Arc::new(mock));

        let result = executor
            .run(
                &Target::new("ilo1"),
                &staged_on("ilo1"),
                &ActionRequest::new("hponcfg"),
            )
            .await;

        assert!(!result.success);
        assert_eq!(result.message, "firmware too old");
    }

    #[tokio::test]
    async fn test_plain_stdout_is_kept_verbatim() {
        let mock = MockTransport::new();
        mock.respond("virt_guest", output(0, "defined vm01\n", ""));
        let executor = ActionExecutor::new(Arc::new(mock));

        let result = executor
            .run(
                &Target::new("kvm1"),
                &staged_on("kvm1"),
                &ActionRequest::new("virt_guest"),
            )
            .await;

        assert!(result.success);
        assert_eq!(result.message, "defined vm01");
        assert!(result.output.is_none());
    }

    #[tokio::test]
    async fn test_rerun_yields_same_result() {
        let mock = MockTransport::new();
        mock.respond("virt_guest", output(0, r#"{"changed": false, "msg": "ok"}"#, ""));
        let executor = ActionExecutor::new(Arc::new(mock.clone()));
        let target = Target::new("kvm1");
        let staged = staged_on("kvm1");
        let request = ActionRequest::new("virt_guest");

        let first = executor.run(&target, &staged, &request).await;
        let second = executor.run(&target, &staged, &request).await;

        assert_eq!(first, second);
        assert_eq!(mock.commands_for("kvm1").len(), 2);
    }

    #[tokio::test]
    async fn test_payload_for_other_target_is_refused() {
        let mock = MockTransport::new();
        let executor = ActionExecutor::new(Arc::new(mock.clone()));

        let result = executor
            .run(
                &Target::new("kvm2"),
                &staged_on("kvm1"),
                &ActionRequest::new("virt_guest"),
            )
            .await;

        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::Execution));
        assert!(result.message.contains("/tmp/.stagehand-kvm1-guest.xml"));
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_transport_error_becomes_execution_failure() {
        let mock = MockTransport::new();
        mock.fail_execute("kvm1", ErrorKind::Connection);
        let executor = ActionExecutor::new(Arc::new(mock));

        let result = executor
            .run(
                &Target::new("kvm1"),
                &staged_on("kvm1"),
                &ActionRequest::new("virt_guest"),
            )
            .await;

        assert_eq!(result.error_kind, Some(ErrorKind::Execution));
        assert!(result.message.contains("Connection refused"));
        assert!(result.message.ends_with("(/tmp/.stagehand-kvm1-guest.xml)"));
    }

    #[tokio::test]
    async fn test_escalated_target_runs_escalated_command() {
        let mock = MockTransport::new();
        let executor = ActionExecutor::new(Arc::new(mock.clone()));
        let target = Target::new("kvm1").with_escalation(Escalation::to("root"));

        executor
            .run(&target, &staged_on("kvm1"), &ActionRequest::new("virt_guest"))
            .await;

        match &mock.calls()[0] {
            crate::transport::TransportCall::Execute { command, .. } => assert!(command.escalate),
            other => panic!("unexpected call {other:?}"),
        }
    }
}
