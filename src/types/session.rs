use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::answer::FinalAnswer;

/// Status of the in-flight analysis as seen by every execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Analyzing,
    Complete,
    Error,
}

/// Execution context that produced a session-state write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionSurface {
    /// Transient UI surface that may be torn down mid-analysis.
    #[default]
    Popup,
    /// Long-lived context that survives UI teardown.
    Background,
}

/// Persisted record describing pipeline progress.
///
/// There is no lock over this record: concurrent writers are tolerated and
/// the last write wins. `revision` grows monotonically across writers so a
/// reader can detect that the copy it holds is stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub status: SessionStatus,
    pub surface: ExecutionSurface,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub revision: u64,
    /// Capture the analysis was started for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture_timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl SessionState {
    pub fn is_newer_than(&self, other: &SessionState) -> bool {
        self.revision > other.revision
    }

    pub fn is_in_flight(&self) -> bool {
        self.status == SessionStatus::Analyzing
    }
}

/// Captured image waiting to be analysed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRecord {
    /// `data:image/png;base64,...`
    pub captured_image: String,
    /// Milliseconds since the Unix epoch.
    pub capture_timestamp: i64,
}

/// Persisted analysis result shown to the user until cleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResultRecord {
    pub full_text: String,
    pub final_answer: Option<FinalAnswer>,
    pub timestamp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn result_record_uses_storage_field_names() {
        let record = AnalysisResultRecord {
            full_text: "text".into(),
            final_answer: Some(FinalAnswer::new("A")),
            timestamp: 5,
        };
        let value = serde_json::to_value(&record).expect("serialize");
        assert_eq!(
            value,
            json!({"fullText": "text", "finalAnswer": "A", "timestamp": 5})
        );
    }

    #[test]
    fn revision_orders_states() {
        let now = Utc::now();
        let older = SessionState {
            status: SessionStatus::Analyzing,
            surface: ExecutionSurface::Popup,
            started_at: now,
            updated_at: now,
            revision: 1,
            capture_timestamp: None,
            last_error: None,
        };
        let newer = SessionState {
            status: SessionStatus::Complete,
            revision: 2,
            ..older.clone()
        };
        assert!(newer.is_newer_than(&older));
        assert!(!older.is_newer_than(&newer));
        assert!(older.is_in_flight());
    }
}
