use chrono::{DateTime, Utc};
use ff_core::submission::{GpsPoint, PolePayload, RecordType, SubmissionMetadata, SubmitRequest};
use ff_core::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// On-device lifecycle of a capture. `staged` hands ownership to the remote
/// tier; the only backward edge is `error -> pending` on explicit retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureStatus {
    Pending,
    Staged,
    Error,
}

impl CaptureStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureStatus::Pending => "pending",
            CaptureStatus::Staged => "staged",
            CaptureStatus::Error => "error",
        }
    }

    pub fn can_transition_to(&self, next: CaptureStatus) -> bool {
        matches!(
            (self, next),
            (CaptureStatus::Pending, CaptureStatus::Staged)
                | (CaptureStatus::Pending, CaptureStatus::Error)
                | (CaptureStatus::Error, CaptureStatus::Pending)
        )
    }
}

impl fmt::Display for CaptureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CaptureStatus {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CaptureStatus::Pending),
            "staged" => Ok(CaptureStatus::Staged),
            "error" => Ok(CaptureStatus::Error),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_m: f64,
    pub timestamp: DateTime<Utc>,
}

/// What the capture flow hands to the queue; id and timestamps are assigned
/// on enqueue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureDraft {
    pub pole_number: String,
    pub project_id: String,
    pub gps: GpsFix,
    pub photo_refs: BTreeMap<String, String>,
    pub captured_by: String,
    pub device_id: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureRecord {
    pub id: String,
    pub pole_number: String,
    pub project_id: String,
    pub gps: GpsFix,
    pub photo_refs: BTreeMap<String, String>,
    pub captured_by: String,
    pub captured_at: DateTime<Utc>,
    pub device_id: String,
    pub notes: Option<String>,
    pub status: CaptureStatus,
    pub last_error: Option<String>,
    pub staging_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CaptureRecord {
    pub fn record_type(&self) -> RecordType {
        RecordType::Pole
    }

    /// Build the staging submission for this capture. The capture id doubles
    /// as the idempotency key, so a retried upload upserts rather than
    /// duplicating.
    pub fn to_submit_request(&self) -> Result<SubmitRequest> {
        let payload = PolePayload {
            pole_number: self.pole_number.clone(),
            project_id: self.project_id.clone(),
            gps: GpsPoint {
                latitude: self.gps.latitude,
                longitude: self.gps.longitude,
                accuracy_m: self.gps.accuracy_m,
                timestamp: self.gps.timestamp,
            },
            photos: self.photo_refs.clone(),
            captured_by: self.captured_by.clone(),
            captured_at: self.captured_at,
            notes: self.notes.clone(),
        };

        Ok(SubmitRequest {
            submission_id: self.id.clone(),
            data: serde_json::to_value(&payload).map_err(AppError::from)?,
            metadata: SubmissionMetadata {
                device_id: self.device_id.clone(),
                app_version: None,
                offline_created_at: Some(self.captured_at),
            },
        })
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: i64,
    pub staged: i64,
    pub error: i64,
}
