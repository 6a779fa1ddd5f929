//! Fleet-wide dispatch
//!
//! Each target runs as its own task through `Pending → Staging → Executing →
//! Done`, gated by a semaphore sized to the configured parallelism. Tasks
//! share nothing except the report slots, and each writes only its own slot.
//!
//! An overall deadline flips a cancellation signal. Tasks drop their in-flight
//! I/O, spend at most `grace` removing anything they staged, and record a
//! timeout. Whatever is still running after `deadline + grace` is aborted.

pub mod report;
pub mod retry;

pub use report::{DispatchReport, Summary};
pub use retry::RetryPolicy;

use crate::error::ErrorKind;
use crate::executor::{ActionExecutor, ActionRequest, ActionResult};
use crate::render::{RenderRequest, Renderer, VariableBag};
use crate::stager::{PayloadStager, RepairPolicy, StageError, StagedPayload};
use crate::target::Target;
use crate::transport::Transport;
use futures::stream::{FuturesUnordered, StreamExt};
use report::ReportSlots;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Maximum targets in flight at once
    pub parallelism: usize,
    /// Overall deadline for the whole fleet
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,
    /// Cleanup allowance once the deadline passes
    #[serde(with = "humantime_serde")]
    pub grace: Duration,
    /// Leave staged files on the targets for debugging
    pub keep_remote_files: bool,
    #[serde(skip)]
    pub retry: RetryPolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            parallelism: 8,
            timeout: None,
            grace: Duration::from_secs(10),
            keep_remote_files: false,
            retry: RetryPolicy::default(),
        }
    }
}

/// What to render and run on every target
#[derive(Debug, Clone)]
pub struct DispatchJob {
    pub template: PathBuf,
    pub vars: VariableBag,
    pub action: ActionRequest,
}

impl DispatchJob {
    pub fn new(template: impl Into<PathBuf>, vars: VariableBag, action: ActionRequest) -> Self {
        Self {
            template: template.into(),
            vars,
            action,
        }
    }

    /// Global vars, overlaid with the target's own vars and identity
    pub fn render_request_for(&self, target: &Target) -> RenderRequest {
        let mut vars = self.vars.clone();
        vars.extend(target.vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        vars.insert("target_name".into(), Value::String(target.name.clone()));
        vars.insert("target_address".into(), Value::String(target.address.clone()));
        if let Some(user) = &target.auth.user {
            vars.insert("target_user".into(), Value::String(user.clone()));
        }
        RenderRequest::new(self.template.clone(), vars)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState {
    Pending,
    Staging,
    Executing,
    Done { success: bool },
}

impl fmt::Display for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetState::Pending => f.write_str("pending"),
            TargetState::Staging => f.write_str("staging"),
            TargetState::Executing => f.write_str("executing"),
            TargetState::Done { success: true } => f.write_str("done(success)"),
            TargetState::Done { success: false } => f.write_str("done(failure)"),
        }
    }
}

/// Receiving side of the fleet-wide cancellation flag
#[derive(Clone)]
struct CancelSignal(watch::Receiver<bool>);

impl CancelSignal {
    /// Resolves once cancellation is requested; never resolves if the sender is gone
    async fn cancelled(&mut self) {
        loop {
            if *self.0.borrow_and_update() {
                return;
            }
            if self.0.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

enum AttemptOutcome {
    Done(ActionResult),
    Failed { kind: ErrorKind, message: String },
    Cancelled,
}

struct Inner {
    stager: PayloadStager,
    executor: ActionExecutor,
    config: DispatchConfig,
}

pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    pub fn new(
        renderer: Arc<dyn Renderer>,
        transport: Arc<dyn Transport>,
        repair_policy: RepairPolicy,
        config: DispatchConfig,
    ) -> Self {
        let stager = PayloadStager::new(renderer, Arc::clone(&transport), repair_policy);
        let executor = ActionExecutor::new(transport);
        Self {
            inner: Arc::new(Inner {
                stager,
                executor,
                config,
            }),
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.inner.config
    }

    /// Run `job` on every target. Always returns one result per target.
    pub async fn dispatch(&self, targets: Vec<Target>, job: DispatchJob) -> DispatchReport {
        let config = &self.inner.config;
        let total = targets.len();
        info!(
            "Dispatching '{}' to {} targets (parallelism: {}, retries: {})",
            job.action.action,
            total,
            config.parallelism.max(1),
            config.retry.max_retries
        );

        let names = targets.iter().map(|t| t.name.clone()).collect();
        let slots = Arc::new(Mutex::new(ReportSlots::new(names)));
        let semaphore = Arc::new(Semaphore::new(config.parallelism.max(1)));
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let job = Arc::new(job);

        let mut tasks: FuturesUnordered<JoinHandle<()>> = FuturesUnordered::new();
        let mut aborts = Vec::with_capacity(total);
        for (index, target) in targets.into_iter().enumerate() {
            let worker = TargetWorker {
                inner: Arc::clone(&self.inner),
                job: Arc::clone(&job),
                target,
                state: TargetState::Pending,
            };
            let semaphore = Arc::clone(&semaphore);
            let slots = Arc::clone(&slots);
            let cancel = CancelSignal(cancel_rx.clone());

            let handle = tokio::spawn(async move {
                let result = worker.run(semaphore, cancel).await;
                slots.lock().await.record(index, result);
            });
            aborts.push(handle.abort_handle());
            tasks.push(handle);
        }

        match config.timeout {
            None => drain(&mut tasks).await,
            Some(deadline) => {
                if tokio::time::timeout(deadline, drain(&mut tasks)).await.is_err() {
                    warn!(
                        "Deadline of {:?} reached, cancelling {} unfinished targets",
                        deadline,
                        tasks.len()
                    );
                    let _ = cancel_tx.send(true);
                    if tokio::time::timeout(config.grace, drain(&mut tasks))
                        .await
                        .is_err()
                    {
                        warn!(
                            "{} targets still running after {:?} grace, aborting",
                            tasks.len(),
                            config.grace
                        );
                        for abort in &aborts {
                            abort.abort();
                        }
                        drain(&mut tasks).await;
                    }
                }
            }
        }

        let slots = std::mem::replace(&mut *slots.lock().await, ReportSlots::new(Vec::new()));
        let report = slots.finish();
        info!("Dispatch finished: {}", report.summary);
        report
    }
}

async fn drain(tasks: &mut FuturesUnordered<JoinHandle<()>>) {
    while let Some(joined) = tasks.next().await {
        if let Err(e) = joined {
            if e.is_panic() {
                warn!("Dispatch task panicked: {}", e);
            }
        }
    }
}

struct TargetWorker {
    inner: Arc<Inner>,
    job: Arc<DispatchJob>,
    target: Target,
    state: TargetState,
}

impl TargetWorker {
    fn transition(&mut self, next: TargetState) {
        debug!(target = %self.target.name, "{} -> {}", self.state, next);
        self.state = next;
    }

    async fn run(mut self, semaphore: Arc<Semaphore>, mut cancel: CancelSignal) -> ActionResult {
        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return self.finish(timed_out(&self.target, 0, "deadline reached before a worker was free"));
            }
            permit = semaphore.acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    let name = self.target.name.clone();
                    return self.finish(ActionResult::failure(name, ErrorKind::Execution, "worker pool closed"));
                }
            },
        };

        let retry = self.inner.config.retry.clone();
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.attempt(&mut cancel).await {
                AttemptOutcome::Done(result) => return self.finish(result.with_attempts(attempts)),
                AttemptOutcome::Cancelled => {
                    return self.finish(timed_out(&self.target, attempts, "deadline exceeded"));
                }
                AttemptOutcome::Failed { kind, message } => {
                    let retries_used = attempts - 1;
                    if !kind.is_retryable() || !retry.allows_retry(retries_used) {
                        let result = ActionResult::failure(&self.target.name, kind, message)
                            .with_attempts(attempts);
                        return self.finish(result);
                    }

                    let delay = retry.delay_for(attempts);
                    info!(
                        target = %self.target.name,
                        "{}: {}; retrying in {:?} (retry {}/{})",
                        kind,
                        message,
                        delay,
                        attempts,
                        retry.max_retries
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            return self.finish(timed_out(&self.target, attempts, "deadline exceeded during backoff"));
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// One stage+execute pass
    async fn attempt(&mut self, cancel: &mut CancelSignal) -> AttemptOutcome {
        let inner = Arc::clone(&self.inner);
        let request = self.job.render_request_for(&self.target);

        self.transition(TargetState::Staging);
        let transferred = tokio::select! {
            biased;
            _ = cancel.cancelled() => return AttemptOutcome::Cancelled,
            transferred = inner.stager.transfer(&self.target, &request) => transferred,
        };
        let staged = match transferred {
            Ok(staged) => staged,
            Err(e) => return self.stage_failed(e).await,
        };

        // From here on the remote file exists and must be discarded on every path
        let repaired = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            repaired = inner.stager.repair(&self.target, &staged) => Some(repaired),
        };
        match repaired {
            None => {
                self.discard_within_grace(&staged).await;
                return AttemptOutcome::Cancelled;
            }
            Some(Err(e)) => return self.stage_failed(e).await,
            Some(Ok(())) => {}
        }

        self.transition(TargetState::Executing);
        let executed = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            executed = inner.executor.try_run(&self.target, &staged, &self.job.action) => Some(executed),
        };

        let Some(executed) = executed else {
            self.discard_within_grace(&staged).await;
            return AttemptOutcome::Cancelled;
        };
        self.discard(&staged).await;

        match executed {
            Ok(result) => AttemptOutcome::Done(result),
            Err(e) => AttemptOutcome::Failed {
                kind: e.kind(),
                message: format!("{e} ({})", staged.remote_path),
            },
        }
    }

    async fn stage_failed(&self, error: StageError) -> AttemptOutcome {
        if let Some(partial) = error.staged() {
            self.discard(partial).await;
        }
        AttemptOutcome::Failed {
            kind: error.kind(),
            message: error.to_string(),
        }
    }

    /// Cleanup after cancellation, bounded by the grace period
    async fn discard_within_grace(&self, staged: &StagedPayload) {
        let grace = self.inner.config.grace;
        if tokio::time::timeout(grace, self.discard(staged)).await.is_err() {
            warn!(
                target = %self.target.name,
                "Cleanup of {} did not finish within {:?}",
                staged.remote_path,
                grace
            );
        }
    }

    async fn discard(&self, staged: &StagedPayload) {
        if self.inner.config.keep_remote_files {
            debug!(target = %self.target.name, "Keeping {}", staged.remote_path);
            return;
        }
        self.inner.executor.discard(&self.target, staged).await;
    }

    fn finish(&mut self, result: ActionResult) -> ActionResult {
        self.transition(TargetState::Done {
            success: result.success,
        });
        if result.success {
            info!(target = %self.target.name, attempts = result.attempts, "succeeded");
        } else {
            warn!(
                target = %self.target.name,
                attempts = result.attempts,
                "failed ({}): {}",
                result.error_kind.map(ErrorKind::as_str).unwrap_or("unknown"),
                result.message
            );
        }
        result
    }
}

fn timed_out(target: &Target, attempts: u32, message: &str) -> ActionResult {
    ActionResult::failure(&target.name, ErrorKind::Timeout, message).with_attempts(attempts)
}
