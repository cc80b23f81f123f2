//! Bounded log of terminal item failures.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::utils::{now_utc, Timestamp};

/// What happened to an item that exhausted its retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureDisposition {
    /// Routed to the stage's error-handler stage.
    DeadLettered,
    /// Discarded.
    Dropped,
}

/// Record of a terminal failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    /// The failed item.
    pub item_id: String,
    /// Correlation id of the failed item.
    pub correlation_id: String,
    /// The stage whose processor failed.
    pub stage_id: String,
    /// Error message of the last attempt.
    pub error: String,
    /// Requeues performed before giving up.
    pub retry_count: u32,
    /// What happened to the item.
    pub disposition: FailureDisposition,
    /// When the failure became terminal.
    pub timestamp: Timestamp,
}

impl FailureRecord {
    /// Creates a record stamped now.
    #[must_use]
    pub fn new(
        item_id: impl Into<String>,
        correlation_id: impl Into<String>,
        stage_id: impl Into<String>,
        error: impl Into<String>,
        retry_count: u32,
        disposition: FailureDisposition,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            correlation_id: correlation_id.into(),
            stage_id: stage_id.into(),
            error: error.into(),
            retry_count,
            disposition,
            timestamp: now_utc(),
        }
    }
}

/// Keeps the most recent `capacity` failure records.
#[derive(Debug)]
pub struct FailureLog {
    records: Mutex<VecDeque<FailureRecord>>,
    capacity: usize,
}

impl FailureLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    /// Appends a record, evicting the oldest when full.
    pub fn record(&self, record: FailureRecord) {
        if self.capacity == 0 {
            return;
        }
        let mut records = self.records.lock();
        while records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Records oldest first.
    #[must_use]
    pub fn recent(&self) -> Vec<FailureRecord> {
        self.records.lock().iter().cloned().collect()
    }

    /// Returns the number of records kept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns true if no failures are recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(n: u32) -> FailureRecord {
        FailureRecord::new(format!("item-{n}"), "c", "s1", "boom", n, FailureDisposition::Dropped)
    }

    #[test]
    fn test_log_is_bounded() {
        let log = FailureLog::new(2);
        log.record(record(1));
        log.record(record(2));
        log.record(record(3));

        let ids: Vec<String> = log.recent().into_iter().map(|r| r.item_id).collect();
        assert_eq!(ids, vec!["item-2", "item-3"]);
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let log = FailureLog::new(0);
        log.record(record(1));
        assert!(log.is_empty());
    }

    #[test]
    fn test_disposition_serializes_snake_case() {
        let json = serde_json::to_value(FailureDisposition::DeadLettered).unwrap();
        assert_eq!(json, serde_json::json!("dead_lettered"));
    }
}
