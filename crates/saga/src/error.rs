//! Saga error types.

use std::time::Duration;

use thiserror::Error;

use crate::services::DocumentStoreError;

/// Error returned by a step's `execute` or `compensate`.
///
/// Steps talk to heterogeneous systems, so their failures are boxed and
/// passed through to the retry loop untouched.
pub type StepError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Convenience alias for step results.
pub type StepResult<T> = std::result::Result<T, StepError>;

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// A step exhausted its retries. Carries the last attempt's error.
    #[error("Saga step '{step}' failed after {attempts} attempt(s): {source}")]
    StepFailed {
        step: String,
        attempts: u32,
        #[source]
        source: StepError,
    },

    /// Opening, committing or ending the document-store transaction failed.
    #[error("Transaction error: {0}")]
    Transaction(#[from] DocumentStoreError),

    /// The saga has already been executed.
    #[error("Saga has already been executed")]
    AlreadyExecuted,
}

impl SagaError {
    /// Returns the name of the failing step, if a step caused the failure.
    pub fn failed_step(&self) -> Option<&str> {
        match self {
            SagaError::StepFailed { step, .. } => Some(step),
            _ => None,
        }
    }

    /// Returns how many attempts were made before the saga gave up.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            SagaError::StepFailed { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }
}

/// A single step attempt ran past its deadline.
#[derive(Debug, Error)]
#[error("step '{step}' timed out after {timeout:?}")]
pub struct StepTimeout {
    pub step: String,
    pub timeout: Duration,
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
