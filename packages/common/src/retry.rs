use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// A single failed attempt record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryAttempt {
    /// 1-based attempt number.
    pub attempt: u8,
    /// Error message from the failed attempt.
    pub error: String,
    /// When this attempt failed.
    pub timestamp: DateTime<Utc>,
}

impl RetryAttempt {
    pub fn new(attempt: u8, error: impl Into<String>) -> Self {
        Self {
            attempt,
            error: error.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Result of recording a failure in the RetryTracker.
#[derive(Debug, Clone)]
pub enum RetryDecision {
    Retry {
        attempt: u8,
        history: Vec<RetryAttempt>,
    },
    Exhausted { history: Vec<RetryAttempt> },
}

/// Failed sandbox attempts per in-flight submission.
#[derive(Debug, Default)]
pub struct RetryTracker {
    state: HashMap<String, Vec<RetryAttempt>>,
    /// Maximum retries before exhaustion.
    max_retries: u8,
}

impl RetryTracker {
    pub fn new(max_retries: u8) -> Self {
        Self {
            state: HashMap::new(),
            max_retries,
        }
    }

    /// Record a failure for the given job ID.
    pub fn record_failure(&mut self, id: &str, error: &str) -> RetryDecision {
        let history = self.state.entry(id.to_string()).or_default();
        let attempt = u8::try_from(history.len() + 1).unwrap_or(u8::MAX);
        history.push(RetryAttempt::new(attempt, error));

        if attempt <= self.max_retries {
            RetryDecision::Retry {
                attempt,
                history: history.clone(),
            }
        } else {
            let final_history = self.state.remove(id).unwrap_or_default();
            RetryDecision::Exhausted {
                history: final_history,
            }
        }
    }

    /// Clear retry state for a job.
    pub fn clear(&mut self, id: &str) {
        self.state.remove(id);
    }

    /// Number of failed attempts recorded for a job.
    pub fn get_attempt(&self, id: &str) -> u8 {
        self.state
            .get(id)
            .map(|h| u8::try_from(h.len()).unwrap_or(u8::MAX))
            .unwrap_or(0)
    }

    /// Get the number of jobs currently being tracked.
    pub fn len(&self) -> usize {
        self.state.len()
    }

    /// Check if the tracker has no entries.
    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }
}

/// Calculate exponential backoff delay with jitter.
///
/// Formula: `min(base_ms * 2^(attempt-1) + jitter, max_ms)` (0-25% jitter)
pub fn calculate_backoff(attempt: u8, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exp_factor = 2u64.saturating_pow((attempt - 1) as u32);
    let delay_ms = base_ms.saturating_mul(exp_factor);

    let jitter = if delay_ms > 0 {
        rand::rng().random_range(0..=delay_ms / 4)
    } else {
        0
    };

    let total_delay = delay_ms.saturating_add(jitter).min(max_ms);
    Duration::from_millis(total_delay)
}

/// Clears a submission's retry history when dropped, unless defused.
pub struct RetryCleanupGuard<'a> {
    tracker: &'a Arc<Mutex<RetryTracker>>,
    job_id: String,
    defused: bool,
}

impl<'a> RetryCleanupGuard<'a> {
    pub fn new(tracker: &'a Arc<Mutex<RetryTracker>>, job_id: impl Into<String>) -> Self {
        Self {
            tracker,
            job_id: job_id.into(),
            defused: false,
        }
    }

    /// Keep the history on drop.
    pub fn defuse(&mut self) {
        self.defused = true;
    }
}

impl Drop for RetryCleanupGuard<'_> {
    fn drop(&mut self) {
        if !self.defused {
            if let Ok(mut tracker) = self.tracker.try_lock() {
                tracker.clear(&self.job_id);
            }
        }
    }
}
