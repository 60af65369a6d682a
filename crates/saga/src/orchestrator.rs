//! Saga orchestrator for multi-step writes spanning several stores.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::audit::SagaHistory;
use crate::backoff::Backoff;
use crate::context::SagaContext;
use crate::error::{SagaError, StepResult, StepTimeout};
use crate::services::{DocumentSession, DocumentStoreError, SessionProvider};
use crate::state::SagaState;
use crate::step::SagaStep;

/// Runs an ordered list of steps as a best-effort atomic unit.
///
/// Steps execute strictly in the order they were added. A failing step is
/// retried with [`Backoff`] between attempts; once its retries are exhausted
/// the transaction (if any) is aborted and every completed step is
/// compensated in reverse order of completion.
///
/// Only document writes that pass [`SagaContext::session`] to the store are
/// covered by the transaction. Blob operations are undone solely through
/// their compensation.
///
/// One orchestrator serves one request and runs once.
pub struct SagaOrchestrator {
    label: String,
    steps: Vec<Box<dyn SagaStep>>,
    completed: Vec<usize>,
    state: SagaState,
    sessions: Option<Arc<dyn SessionProvider>>,
    backoff: Backoff,
    step_timeout: Option<Duration>,
    context: SagaContext,
    history: SagaHistory,
}

impl SagaOrchestrator {
    /// Creates a saga that runs without a document-store transaction.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            steps: Vec::new(),
            completed: Vec::new(),
            state: SagaState::Idle,
            sessions: None,
            backoff: Backoff::default(),
            step_timeout: None,
            context: SagaContext::new(),
            history: SagaHistory::new(),
        }
    }

    /// Creates a saga that wraps its run in a transaction opened from `sessions`.
    pub fn transactional(label: impl Into<String>, sessions: Arc<dyn SessionProvider>) -> Self {
        Self {
            sessions: Some(sessions),
            ..Self::new(label)
        }
    }

    /// Sets the delay policy between attempts.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the deadline applied to steps that do not define their own.
    pub fn with_step_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// Appends a step. Steps run in the order they are added.
    pub fn add_step(&mut self, step: impl SagaStep + 'static) {
        self.steps.push(Box::new(step));
    }

    /// Returns the label used in logs.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Returns the saga state.
    pub fn state(&self) -> SagaState {
        self.state
    }

    /// Returns true if the run is wrapped in a document-store transaction.
    pub fn is_transactional(&self) -> bool {
        self.sessions.is_some()
    }

    /// Returns the number of configured steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if no step has been added.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Names of the steps whose forward action succeeded, in completion order.
    pub fn completed_steps(&self) -> Vec<&str> {
        self.completed
            .iter()
            .map(|&index| self.steps[index].name())
            .collect()
    }

    /// Returns the per-step history of this run.
    pub fn history(&self) -> &SagaHistory {
        &self.history
    }

    /// Returns a handle to the run's shared values.
    pub fn context(&self) -> SagaContext {
        self.context.clone()
    }

    /// Executes every step and returns the output of the last one.
    ///
    /// An empty saga succeeds with `Value::Null`. On failure the original
    /// error of the failing step is returned after rollback; compensation
    /// failures are only logged.
    #[tracing::instrument(skip(self), fields(saga = %self.label, steps = self.steps.len()))]
    pub async fn execute(&mut self) -> Result<Value, SagaError> {
        if !self.state.can_run() {
            return Err(SagaError::AlreadyExecuted);
        }
        self.state = SagaState::Running;
        metrics::counter!("saga_executions_total").increment(1);
        let started = Instant::now();

        let session = match self.open_transaction().await {
            Ok(session) => session,
            Err(err) => {
                self.state = SagaState::RolledBack;
                metrics::counter!("saga_rolled_back_total").increment(1);
                tracing::error!(error = %err, "could not open transaction, no step was run");
                return Err(err);
            }
        };

        let result = match self.run_steps().await {
            Ok(output) => match commit(session.as_deref()).await {
                Ok(()) => {
                    self.state = SagaState::Committed;
                    Ok(output)
                }
                Err(err) => {
                    tracing::error!(error = %err, "commit failed, compensating completed steps");
                    // A failed commit leaves nothing to abort.
                    self.roll_back(None).await;
                    Err(SagaError::Transaction(err))
                }
            },
            Err(err) => {
                self.roll_back(session.as_deref()).await;
                Err(err)
            }
        };

        if let Some(session) = session {
            self.context.set_session(None).await;
            if let Err(err) = session.end_session().await {
                tracing::warn!(error = %err, "failed to end document-store session");
            }
        }

        let duration = started.elapsed().as_secs_f64();
        metrics::histogram!("saga_duration_seconds").record(duration);
        match &result {
            Ok(_) => {
                metrics::counter!("saga_committed_total").increment(1);
                tracing::info!(duration, "saga committed");
            }
            Err(err) => {
                metrics::counter!("saga_rolled_back_total").increment(1);
                tracing::warn!(duration, error = %err, "saga rolled back");
            }
        }

        result
    }

    async fn open_transaction(&self) -> Result<Option<Box<dyn DocumentSession>>, SagaError> {
        let Some(provider) = &self.sessions else {
            return Ok(None);
        };

        let session = provider.start_session().await?;
        if let Err(err) = session.start_transaction().await {
            if let Err(end_err) = session.end_session().await {
                tracing::warn!(error = %end_err, "failed to end document-store session");
            }
            return Err(err.into());
        }

        tracing::debug!(session = %session.id(), "transaction started");
        self.context.set_session(Some(session.id())).await;
        Ok(Some(session))
    }

    async fn run_steps(&mut self) -> Result<Value, SagaError> {
        let mut last = Value::Null;

        for index in 0..self.steps.len() {
            let step = self.steps[index].as_ref();
            self.history.record_start(step.name());
            tracing::info!(step = step.name(), "saga step started");

            let (outcome, attempts) = run_with_retry(step, self.backoff, self.step_timeout).await;
            match outcome {
                Ok(output) => {
                    self.history.record_finish(index, attempts, true);
                    self.completed.push(index);
                    self.context.record(step.name(), output.clone()).await;
                    tracing::info!(step = step.name(), attempts, "saga step completed");
                    last = output;
                }
                Err(source) => {
                    self.history.record_finish(index, attempts, false);
                    return Err(SagaError::StepFailed {
                        step: step.name().to_string(),
                        attempts,
                        source,
                    });
                }
            }
        }

        Ok(last)
    }

    /// Aborts the transaction, then compensates completed steps newest first.
    async fn roll_back(&mut self, session: Option<&dyn DocumentSession>) {
        self.state = SagaState::RollingBack;
        tracing::warn!(
            completed = self.completed.len(),
            "saga rolling back completed steps"
        );

        if let Some(session) = session {
            match session.abort_transaction().await {
                Ok(()) => tracing::debug!(session = %session.id(), "transaction aborted"),
                Err(err) => tracing::warn!(error = %err, "failed to abort transaction"),
            }
        }

        for &index in self.completed.iter().rev() {
            let step = self.steps[index].as_ref();
            let name = step.name().to_string();
            match step.compensate().await {
                Ok(()) => {
                    self.history.record_compensation(index, true);
                    metrics::counter!("saga_compensations_total", "step" => name.clone())
                        .increment(1);
                    tracing::info!(step = %name, "compensation completed");
                }
                Err(err) => {
                    self.history.record_compensation(index, false);
                    metrics::counter!("saga_compensation_failures_total", "step" => name.clone())
                        .increment(1);
                    tracing::error!(step = %name, error = %err, "compensation failed, continuing");
                }
            }
        }

        self.state = SagaState::RolledBack;
    }
}

impl std::fmt::Debug for SagaOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let steps: Vec<&str> = self.steps.iter().map(|s| s.name()).collect();
        f.debug_struct("SagaOrchestrator")
            .field("label", &self.label)
            .field("steps", &steps)
            .field("state", &self.state)
            .field("transactional", &self.sessions.is_some())
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

async fn commit(session: Option<&dyn DocumentSession>) -> Result<(), DocumentStoreError> {
    match session {
        Some(session) => session.commit_transaction().await,
        None => Ok(()),
    }
}

/// Runs a step until it succeeds or `retries + 1` attempts have failed.
/// Every failed attempt is followed by the step's attempt cleanup.
/// Returns the outcome and the number of attempts made.
async fn run_with_retry(
    step: &dyn SagaStep,
    backoff: Backoff,
    default_timeout: Option<Duration>,
) -> (StepResult<Value>, u32) {
    let max_attempts = step.retries().saturating_add(1);
    let timeout = step.timeout().or(default_timeout);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let outcome = attempt_once(step, timeout).await;
        if outcome.is_err()
            && let Err(cleanup) = step.discard_attempt().await
        {
            tracing::warn!(
                step = step.name(),
                attempt,
                error = %cleanup,
                "failed to clean up after failed attempt"
            );
        }

        match outcome {
            Ok(output) => return (Ok(output), attempt),
            Err(err) if attempt < max_attempts => {
                let delay = backoff.delay(attempt);
                tracing::warn!(
                    step = step.name(),
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "saga step attempt failed, retrying"
                );
                metrics::counter!("saga_step_retries_total", "step" => step.name().to_string())
                    .increment(1);
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                tracing::error!(
                    step = step.name(),
                    attempts = attempt,
                    error = %err,
                    "saga step exhausted retries"
                );
                return (Err(err), attempt);
            }
        }
    }
}

async fn attempt_once(step: &dyn SagaStep, timeout: Option<Duration>) -> StepResult<Value> {
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, step.execute()).await {
            Ok(result) => result,
            Err(_) => Err(StepTimeout {
                step: step.name().to_string(),
                timeout: limit,
            }
            .into()),
        },
        None => step.execute().await,
    }
}
