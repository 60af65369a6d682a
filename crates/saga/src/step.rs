//! Saga steps: a forward action paired with its compensation.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::error::StepResult;

/// Retries applied to a step unless configured otherwise.
pub const DEFAULT_RETRIES: u32 = 3;

/// One unit of work in a saga.
///
/// `compensate` must be safe to call even if `execute` only partially took
/// effect downstream. It is called at most once, and only after `execute`
/// returned `Ok` on some attempt.
#[async_trait]
pub trait SagaStep: Send + Sync {
    /// Name used in logs and to correlate compensation with the forward action.
    fn name(&self) -> &str;

    /// Additional attempts after the first failure.
    fn retries(&self) -> u32 {
        DEFAULT_RETRIES
    }

    /// Deadline for a single attempt, if any.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Performs the forward action.
    async fn execute(&self) -> StepResult<Value>;

    /// Undoes the forward action.
    async fn compensate(&self) -> StepResult<()>;

    /// Releases whatever a failed attempt left behind.
    ///
    /// Called after every failed attempt, including one cut short by its
    /// deadline, before the next attempt or before rollback. Unlike
    /// `compensate`, it also runs for the step that fails the saga.
    async fn discard_attempt(&self) -> StepResult<()> {
        Ok(())
    }
}

type ExecuteFn = Box<dyn Fn() -> BoxFuture<'static, StepResult<Value>> + Send + Sync>;
type CompensateFn = Box<dyn Fn() -> BoxFuture<'static, StepResult<()>> + Send + Sync>;

/// A step built from closures.
///
/// Each closure is called once per attempt and returns a fresh future, so
/// anything the future needs must be cloned into it.
pub struct Step {
    name: String,
    execute: ExecuteFn,
    compensate: CompensateFn,
    discard: Option<CompensateFn>,
    retries: u32,
    timeout: Option<Duration>,
}

impl Step {
    /// Creates a step from a forward action and its compensation.
    pub fn new<E, EFut, C, CFut>(name: impl Into<String>, execute: E, compensate: C) -> Self
    where
        E: Fn() -> EFut + Send + Sync + 'static,
        EFut: Future<Output = StepResult<Value>> + Send + 'static,
        C: Fn() -> CFut + Send + Sync + 'static,
        CFut: Future<Output = StepResult<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            execute: Box::new(move || execute().boxed()),
            compensate: Box::new(move || compensate().boxed()),
            discard: None,
            retries: DEFAULT_RETRIES,
            timeout: None,
        }
    }

    /// Sets the number of retries after the first failure.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Sets a deadline for each attempt.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Replaces the compensation.
    pub fn with_compensation<C, CFut>(mut self, compensate: C) -> Self
    where
        C: Fn() -> CFut + Send + Sync + 'static,
        CFut: Future<Output = StepResult<()>> + Send + 'static,
    {
        self.compensate = Box::new(move || compensate().boxed());
        self
    }

    /// Sets the cleanup run after each failed attempt.
    pub fn with_attempt_cleanup<C, CFut>(mut self, discard: C) -> Self
    where
        C: Fn() -> CFut + Send + Sync + 'static,
        CFut: Future<Output = StepResult<()>> + Send + 'static,
    {
        self.discard = Some(Box::new(move || discard().boxed()));
        self
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("retries", &self.retries)
            .field("timeout", &self.timeout)
            .field("attempt_cleanup", &self.discard.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SagaStep for Step {
    fn name(&self) -> &str {
        &self.name
    }

    fn retries(&self) -> u32 {
        self.retries
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn execute(&self) -> StepResult<Value> {
        (self.execute)().await
    }

    async fn compensate(&self) -> StepResult<()> {
        (self.compensate)().await
    }

    async fn discard_attempt(&self) -> StepResult<()> {
        match &self.discard {
            Some(discard) => discard().await,
            None => Ok(()),
        }
    }
}
