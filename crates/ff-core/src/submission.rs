use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::validation::FieldIssue;

/// Submission families accepted by the staging tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    Pole,
    Sow,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::Pole => "pole",
            RecordType::Sow => "sow",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pole" => Ok(RecordType::Pole),
            "sow" => Ok(RecordType::Sow),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_m: f64,
    pub timestamp: DateTime<Utc>,
}

/// Domain payload for a pole capture submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolePayload {
    pub pole_number: String,
    pub project_id: String,
    pub gps: GpsPoint,
    /// Named slot -> opaque photo reference. Content is never inspected.
    #[serde(default)]
    pub photos: BTreeMap<String, String>,
    pub captured_by: String,
    pub captured_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Domain payload for a scope-of-work submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SowPayload {
    pub sow_number: String,
    pub project_id: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_poles: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionMetadata {
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offline_created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    /// Idempotency key. Resubmitting the same id upserts the staging record.
    pub submission_id: String,
    pub data: serde_json::Value,
    pub metadata: SubmissionMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitAck {
    pub submission_id: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duplicate_warning: Option<String>,
    pub requires_manual_review: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkItem {
    pub submission_id: String,
    pub record_type: RecordType,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkSubmitRequest {
    pub submissions: Vec<BulkItem>,
    pub metadata: SubmissionMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkItemAck {
    pub index: usize,
    pub submission_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pole_number: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkItemFailure {
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission_id: Option<String>,
    pub issues: Vec<FieldIssue>,
}

/// Multi-status outcome of a bulk submission: every item is reported
/// individually, success means no item failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkOutcome {
    pub total: usize,
    pub successful: Vec<BulkItemAck>,
    pub failed: Vec<BulkItemFailure>,
}

impl BulkOutcome {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Staging-side counts consumed by the device-tier status reporter.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StagingCounts {
    pub staging_pending: i64,
    pub staging_validated: i64,
    pub staging_rejected: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_type_round_trips() {
        assert_eq!(RecordType::Pole.as_str(), "pole");
        assert_eq!("sow".parse::<RecordType>().unwrap(), RecordType::Sow);
        assert!("unknown".parse::<RecordType>().is_err());
    }

    #[test]
    fn pole_payload_deserializes_without_optional_fields() {
        let payload: PolePayload = serde_json::from_value(serde_json::json!({
            "pole_number": "LAW.P.B167",
            "project_id": "proj-1",
            "gps": {
                "latitude": -26.2,
                "longitude": 28.0,
                "accuracy_m": 4.2,
                "timestamp": "2025-05-22T08:30:00Z"
            },
            "captured_by": "tech-7",
            "captured_at": "2025-05-22T08:31:00Z"
        }))
        .unwrap();

        assert!(payload.photos.is_empty());
        assert!(payload.notes.is_none());
    }
}
