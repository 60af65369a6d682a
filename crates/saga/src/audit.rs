//! Per-run record of what each step did.

use std::time::Instant;

/// Status of a step in the saga history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// Step is running or has executed successfully.
    Executed,
    /// Step exhausted its retries.
    Failed,
    /// Step was compensated successfully.
    Compensated,
    /// Step compensation failed.
    CompensationFailed,
}

impl StepStatus {
    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Executed => "executed",
            StepStatus::Failed => "failed",
            StepStatus::Compensated => "compensated",
            StepStatus::CompensationFailed => "compensation_failed",
        }
    }
}

/// Record of one step in a saga run.
#[derive(Debug, Clone)]
pub struct StepRecord {
    /// Name of the step.
    pub name: String,
    /// Current status.
    pub status: StepStatus,
    /// Attempts made by the forward action.
    pub attempts: u32,
    /// When the first attempt started.
    pub started_at: Instant,
    /// When the step last changed status.
    pub finished_at: Option<Instant>,
}

/// Ordered history of the steps a saga run reached.
///
/// Steps that were never started do not appear. Purely observational: the
/// error returned by a failed saga never depends on it.
#[derive(Debug, Default)]
pub struct SagaHistory {
    records: Vec<StepRecord>,
}

impl SagaHistory {
    /// Creates an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_start(&mut self, name: &str) -> usize {
        self.records.push(StepRecord {
            name: name.to_string(),
            status: StepStatus::Executed,
            attempts: 0,
            started_at: Instant::now(),
            finished_at: None,
        });
        self.records.len() - 1
    }

    pub(crate) fn record_finish(&mut self, index: usize, attempts: u32, succeeded: bool) {
        if let Some(record) = self.records.get_mut(index) {
            record.attempts = attempts;
            record.status = if succeeded {
                StepStatus::Executed
            } else {
                StepStatus::Failed
            };
            record.finished_at = Some(Instant::now());
        }
    }

    pub(crate) fn record_compensation(&mut self, index: usize, succeeded: bool) {
        if let Some(record) = self.records.get_mut(index) {
            record.status = if succeeded {
                StepStatus::Compensated
            } else {
                StepStatus::CompensationFailed
            };
            record.finished_at = Some(Instant::now());
        }
    }

    /// All records, in the order the steps started.
    pub fn records(&self) -> &[StepRecord] {
        &self.records
    }

    /// Names of steps with the given status, in start order.
    pub fn with_status(&self, status: StepStatus) -> Vec<&str> {
        self.records
            .iter()
            .filter(|r| r.status == status)
            .map(|r| r.name.as_str())
            .collect()
    }

    /// One line per step, e.g. `write_toy: failed (4 attempts)`.
    pub fn summary(&self) -> String {
        self.records
            .iter()
            .map(|r| format!("{}: {} ({} attempts)", r.name, r.status.as_str(), r.attempts))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
