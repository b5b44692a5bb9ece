//! Messages and records passed between the pool, the committer and the sink

use crate::manifest::WorkItem;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Result row status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Success,
    Failure,
}

impl RecordStatus {
    pub fn as_str(&self) -> &str {
        match self {
            RecordStatus::Success => "success",
            RecordStatus::Failure => "failure",
        }
    }
}

/// One row of a result artifact
///
/// `payload` is the processor output as JSON text and is empty on failure;
/// `error` is empty on success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub item_id: String,
    pub status: RecordStatus,
    pub payload: String,
    pub error: String,
    pub duration_ms: u64,
    pub processed_at: DateTime<Utc>,
}

impl ResultRecord {
    pub fn success(item: &WorkItem, payload: &serde_json::Value, duration: Duration) -> Self {
        Self {
            item_id: item.to_string(),
            status: RecordStatus::Success,
            payload: payload.to_string(),
            error: String::new(),
            duration_ms: duration_ms(duration),
            processed_at: Utc::now(),
        }
    }

    pub fn failure(item: &WorkItem, reason: impl Into<String>, duration: Duration) -> Self {
        Self {
            item_id: item.to_string(),
            status: RecordStatus::Failure,
            payload: String::new(),
            error: reason.into(),
            duration_ms: duration_ms(duration),
            processed_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RecordStatus::Success
    }

    pub fn work_item(&self) -> WorkItem {
        WorkItem::new(self.item_id.clone())
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// What happened to one item inside the pool
#[derive(Debug, Clone)]
pub enum Outcome {
    Success(ResultRecord),
    Failure(String),
}

/// Message from a worker to the checkpoint committer
#[derive(Debug, Clone)]
pub struct ItemReport {
    pub item: WorkItem,
    pub outcome: Outcome,
    pub duration: Duration,
    pub worker: usize,
}

impl ItemReport {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success(_))
    }

    /// Row to append to the result artifact for this report
    pub fn into_record(self) -> ResultRecord {
        match self.outcome {
            Outcome::Success(record) => record,
            Outcome::Failure(reason) => ResultRecord::failure(&self.item, reason, self.duration),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_success_record() {
        let item = WorkItem::from("A-METS.xml");
        let record = ResultRecord::success(
            &item,
            &serde_json::json!({"articles": 3}),
            Duration::from_millis(42),
        );
        assert!(record.is_success());
        assert_eq!(record.payload, r#"{"articles":3}"#);
        assert!(record.error.is_empty());
        assert_eq!(record.duration_ms, 42);
        assert_eq!(record.work_item(), item);
    }

    #[test]
    fn test_failure_report_becomes_failure_row() {
        let report = ItemReport {
            item: WorkItem::from("B-METS.xml"),
            outcome: Outcome::Failure("download failed".to_string()),
            duration: Duration::from_millis(7),
            worker: 0,
        };
        assert!(!report.is_success());

        let record = report.into_record();
        assert_eq!(record.status, RecordStatus::Failure);
        assert_eq!(record.item_id, "B-METS.xml");
        assert_eq!(record.error, "download failed");
        assert!(record.payload.is_empty());
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(RecordStatus::Success.as_str(), "success");
        assert_eq!(RecordStatus::Failure.as_str(), "failure");
        assert_eq!(
            serde_json::to_string(&RecordStatus::Failure).unwrap(),
            "\"failure\""
        );
    }
}
