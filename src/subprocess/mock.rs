use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::error::ProcessError;
use super::runner::{ExitStatus, ProcessCommand, ProcessOutput, ProcessRunner};

type ArgsMatcher = Box<dyn Fn(&[String]) -> bool + Send + Sync>;

/// Scriptable [`ProcessRunner`] that records every command it receives
#[derive(Clone)]
pub struct MockProcessRunner {
    expectations: Arc<Mutex<Vec<MockExpectation>>>,
    call_history: Arc<Mutex<Vec<ProcessCommand>>>,
}

enum MockResponse {
    Output(ProcessOutput),
    Timeout(Duration),
    NotFound,
}

struct MockExpectation {
    program: String,
    args_matcher: Option<ArgsMatcher>,
    response: MockResponse,
    times_called: usize,
    expected_times: Option<usize>,
}

pub struct MockCommandConfig {
    runner: MockProcessRunner,
    expectation: MockExpectation,
}

impl MockProcessRunner {
    pub fn new() -> Self {
        Self {
            expectations: Arc::new(Mutex::new(Vec::new())),
            call_history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Start an expectation; matched in registration order
    pub fn expect_command(&self, program: &str) -> MockCommandConfig {
        MockCommandConfig {
            runner: self.clone(),
            expectation: MockExpectation {
                program: program.to_string(),
                args_matcher: None,
                response: MockResponse::Output(ProcessOutput {
                    status: ExitStatus::Success,
                    stdout: String::new(),
                    stderr: String::new(),
                    duration: Duration::from_millis(10),
                }),
                times_called: 0,
                expected_times: None,
            },
        }
    }

    pub fn verify_called(&self, program: &str, times: usize) -> bool {
        let history = lock(&self.call_history);
        history.iter().filter(|cmd| cmd.program == program).count() == times
    }

    pub fn get_call_history(&self) -> Vec<ProcessCommand> {
        lock(&self.call_history).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl ProcessRunner for MockProcessRunner {
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError> {
        lock(&self.call_history).push(command.clone());

        let mut expectations = lock(&self.expectations);
        for expectation in expectations.iter_mut() {
            if expectation.program != command.program {
                continue;
            }
            if let Some(ref matcher) = expectation.args_matcher {
                if !matcher(&command.args) {
                    continue;
                }
            }
            if let Some(expected) = expectation.expected_times {
                if expectation.times_called >= expected {
                    continue;
                }
            }

            expectation.times_called += 1;
            return match &expectation.response {
                MockResponse::Output(output) => Ok(output.clone()),
                MockResponse::Timeout(after) => Err(ProcessError::Timeout(*after)),
                MockResponse::NotFound => Err(ProcessError::CommandNotFound(command.program)),
            };
        }

        Err(ProcessError::MockExpectationNotMet(format!(
            "No expectation found for command: {} {:?}",
            command.program, command.args
        )))
    }
}

impl MockCommandConfig {
    pub fn with_args<F>(mut self, matcher: F) -> Self
    where
        F: Fn(&[String]) -> bool + Send + Sync + 'static,
    {
        self.expectation.args_matcher = Some(Box::new(matcher));
        self
    }

    fn output_mut(&mut self) -> &mut ProcessOutput {
        if !matches!(self.expectation.response, MockResponse::Output(_)) {
            self.expectation.response = MockResponse::Output(ProcessOutput {
                status: ExitStatus::Success,
                stdout: String::new(),
                stderr: String::new(),
                duration: Duration::from_millis(10),
            });
        }
        match &mut self.expectation.response {
            MockResponse::Output(output) => output,
            _ => unreachable!("response was just set to Output"),
        }
    }

    pub fn returns_stdout(mut self, stdout: &str) -> Self {
        self.output_mut().stdout = stdout.to_string();
        self
    }

    pub fn returns_stderr(mut self, stderr: &str) -> Self {
        self.output_mut().stderr = stderr.to_string();
        self
    }

    pub fn returns_exit_code(mut self, code: i32) -> Self {
        self.output_mut().status = if code == 0 {
            ExitStatus::Success
        } else {
            ExitStatus::Error(code)
        };
        self
    }

    pub fn times_out(mut self, after: Duration) -> Self {
        self.expectation.response = MockResponse::Timeout(after);
        self
    }

    pub fn not_found(mut self) -> Self {
        self.expectation.response = MockResponse::NotFound;
        self
    }

    /// Stop matching after `n` calls so later expectations take over
    pub fn times(mut self, n: usize) -> Self {
        self.expectation.expected_times = Some(n);
        self
    }

    pub fn finish(self) {
        lock(&self.runner.expectations).push(self.expectation);
    }
}

impl Default for MockProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}
