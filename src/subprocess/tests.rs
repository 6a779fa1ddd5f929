use super::*;
use std::time::Duration;

#[tokio::test]
async fn test_production_runner_success() {
    let runner = TokioProcessRunner;
    let command = ProcessCommandBuilder::new("echo")
        .arg("hello world")
        .build();

    let output = runner.run(command).await.unwrap();
    assert!(output.status.success());
    assert_eq!(output.stdout.trim(), "hello world");
    assert!(output.stderr.is_empty());
}

#[tokio::test]
async fn test_production_runner_failure_is_not_an_error() {
    let runner = TokioProcessRunner;
    let command = ProcessCommandBuilder::new("false").build();

    let output = runner.run(command).await.unwrap();
    assert!(!output.status.success());
    assert_eq!(output.status.code(), Some(1));
}

#[tokio::test]
async fn test_production_runner_command_not_found() {
    let runner = TokioProcessRunner;
    let command = ProcessCommandBuilder::new("nonexistent-command-12345").build();

    let result = runner.run(command).await;
    assert!(matches!(result, Err(ProcessError::CommandNotFound(_))));
}

#[tokio::test]
async fn test_production_runner_timeout() {
    let runner = TokioProcessRunner;
    let command = ProcessCommandBuilder::new("sleep")
        .arg("5")
        .timeout(Duration::from_millis(100))
        .build();

    let result = runner.run(command).await;
    assert!(matches!(result, Err(ProcessError::Timeout(_))));
}

#[tokio::test]
async fn test_production_runner_pipes_stdin() {
    let runner = TokioProcessRunner;
    let command = ProcessCommandBuilder::new("cat")
        .stdin(b"<domain/>".to_vec())
        .build();

    let output = runner.run(command).await.unwrap();
    assert_eq!(output.stdout, "<domain/>");
}

#[tokio::test]
async fn test_mock_runner_matches_args() {
    let mock = MockProcessRunner::new();
    mock.expect_command("ssh")
        .with_args(|args| args.last().is_some_and(|a| a.contains("chmod")))
        .returns_exit_code(1)
        .returns_stderr("Operation not permitted")
        .finish();
    mock.expect_command("ssh").returns_stdout("ok").finish();

    let chmod = ProcessCommandBuilder::new("ssh")
        .args(["host", "chmod a+r /tmp/x"])
        .build();
    let output = mock.run(chmod).await.unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert_eq!(output.stderr, "Operation not permitted");

    let other = ProcessCommandBuilder::new("ssh").args(["host", "true"]).build();
    let output = mock.run(other).await.unwrap();
    assert_eq!(output.stdout, "ok");
    assert!(mock.verify_called("ssh", 2));
}

#[tokio::test]
async fn test_mock_runner_times_falls_through() {
    let mock = MockProcessRunner::new();
    mock.expect_command("ssh").times_out(Duration::from_secs(1)).times(1).finish();
    mock.expect_command("ssh").returns_stdout("second").finish();

    let cmd = ProcessCommandBuilder::new("ssh").arg("host").build();
    assert!(matches!(
        mock.run(cmd.clone()).await,
        Err(ProcessError::Timeout(_))
    ));
    assert_eq!(mock.run(cmd).await.unwrap().stdout, "second");
}

#[tokio::test]
async fn test_mock_runner_unexpected_command() {
    let mock = MockProcessRunner::new();
    let cmd = ProcessCommandBuilder::new("scp").build();
    assert!(matches!(
        mock.run(cmd).await,
        Err(ProcessError::MockExpectationNotMet(_))
    ));
}
