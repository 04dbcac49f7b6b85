//! Recent delivery failures of one outbound channel, kept for liveness only.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

/// Failures kept per channel.
pub const FAILURE_CAPACITY: usize = 10;

/// Bounded FIFO of failure messages; the oldest entry is evicted on overflow.
///
/// Written from send completions and read by health queries, both under the
/// same lock. The lock is never held across an await.
#[derive(Debug, Default)]
pub struct FailureBuffer {
    entries: Mutex<VecDeque<String>>,
}

impl FailureBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, failure: impl Into<String>) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.len() == FAILURE_CAPACITY {
            entries.pop_front();
        }
        entries.push_back(failure.into());
    }

    /// Copy of the current failures, oldest first.
    pub fn snapshot(&self) -> Vec<String> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.iter().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_the_ten_most_recent_failures() {
        let buffer = FailureBuffer::new();
        for i in 1..=12 {
            buffer.record(format!("failure {i}"));
        }
        let kept = buffer.snapshot();
        assert_eq!(kept.len(), FAILURE_CAPACITY);
        assert_eq!(kept.first().map(String::as_str), Some("failure 3"));
        assert_eq!(kept.last().map(String::as_str), Some("failure 12"));
    }

    #[test]
    fn starts_empty() {
        assert!(FailureBuffer::new().is_empty());
    }
}
