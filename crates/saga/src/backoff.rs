//! Delay policy applied between attempts of a failing step.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Base delay used by [`Backoff::default`].
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// How long to wait before retrying a failed step.
///
/// `attempt` passed to [`Backoff::delay`] is the 1-based number of the attempt
/// that just failed, so the first retry waits `delay(1)`.
///
/// - `Linear`: `base × attempt` (1×, 2×, 3× …). The default.
/// - `Exponential`: `base × 2^(attempt - 1)` (1×, 2×, 4× …).
/// - `None`: retry immediately.
///
/// For a non-zero base both growing policies strictly increase per retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum Backoff {
    None,
    Linear { base: Duration },
    Exponential { base: Duration },
}

impl Backoff {
    /// Linear backoff with the given base delay.
    pub fn linear(base: Duration) -> Self {
        Backoff::Linear { base }
    }

    /// Exponential backoff with the given base delay.
    pub fn exponential(base: Duration) -> Self {
        Backoff::Exponential { base }
    }

    /// Returns the same policy with a different base delay.
    pub fn with_base(self, base: Duration) -> Self {
        match self {
            Backoff::None => Backoff::None,
            Backoff::Linear { .. } => Backoff::Linear { base },
            Backoff::Exponential { .. } => Backoff::Exponential { base },
        }
    }

    /// Delay to wait after the given failed attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self {
            Backoff::None => Duration::ZERO,
            Backoff::Linear { base } => base.saturating_mul(attempt),
            Backoff::Exponential { base } => {
                let factor = 2u32.saturating_pow(attempt - 1);
                base.saturating_mul(factor)
            }
        }
    }

    /// Returns the policy name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Backoff::None => "none",
            Backoff::Linear { .. } => "linear",
            Backoff::Exponential { .. } => "exponential",
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Linear {
            base: DEFAULT_BASE_DELAY,
        }
    }
}

impl std::fmt::Display for Backoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when a backoff policy name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown backoff policy '{0}', expected none, linear or exponential")]
pub struct UnknownBackoff(pub String);

impl FromStr for Backoff {
    type Err = UnknownBackoff;

    /// Parses a policy name, using [`DEFAULT_BASE_DELAY`] as the base.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Backoff::None),
            "linear" => Ok(Backoff::linear(DEFAULT_BASE_DELAY)),
            "exponential" => Ok(Backoff::exponential(DEFAULT_BASE_DELAY)),
            other => Err(UnknownBackoff(other.to_string())),
        }
    }
}
