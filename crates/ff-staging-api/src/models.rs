use chrono::{DateTime, Utc};
use ff_core::submission::RecordType;
use ff_core::{AppError, Result};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StagingStatus {
    PendingValidation,
    Completed,
}

impl StagingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StagingStatus::PendingValidation => "pending_validation",
            StagingStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for StagingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StagingStatus {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending_validation" => Ok(StagingStatus::PendingValidation),
            "completed" => Ok(StagingStatus::Completed),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
    Approved,
    Rejected,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Pending => "pending",
            VerificationStatus::Approved => "approved",
            VerificationStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VerificationStatus {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(VerificationStatus::Pending),
            "approved" => Ok(VerificationStatus::Approved),
            "rejected" => Ok(VerificationStatus::Rejected),
            _ => Err(()),
        }
    }
}

/// A reviewer decision. Bulk and single verification use the same action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyAction {
    Approve,
    Reject,
}

/// Outcomes of the automated intake checks. Each predicate is evaluated and
/// logged independently.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AutoChecks {
    pub duplicate: bool,
    pub gps_valid: bool,
    pub photos_complete: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StagingRecord {
    pub submission_id: String,
    pub record_type: RecordType,
    pub status: StagingStatus,
    pub data: serde_json::Value,
    pub domain_key: String,
    pub project_id: Option<String>,
    pub device_id: String,
    pub auto_checks: AutoChecks,
    pub requires_manual_review: bool,
    pub quality_score: Option<i64>,
    pub duplicate_of: Option<String>,
    pub review_outcome: Option<VerificationStatus>,
    pub validated_at: Option<DateTime<Utc>>,
    pub validated_by: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct StagingRow {
    pub submission_id: String,
    pub record_type: String,
    pub status: String,
    pub data: String,
    pub domain_key: String,
    pub project_id: Option<String>,
    pub device_id: String,
    pub check_duplicate: bool,
    pub check_gps_valid: bool,
    pub check_photos_complete: bool,
    pub requires_manual_review: bool,
    pub quality_score: Option<i64>,
    pub duplicate_of: Option<String>,
    pub review_outcome: Option<String>,
    pub validated_at: Option<i64>,
    pub validated_by: Option<String>,
    pub submitted_at: i64,
    pub updated_at: i64,
}

pub(crate) fn timestamp(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| AppError::Database(format!("invalid stored timestamp: {secs}")))
}

fn optional_timestamp(secs: Option<i64>) -> Result<Option<DateTime<Utc>>> {
    secs.map(timestamp).transpose()
}

impl StagingRow {
    pub(crate) fn into_record(self) -> Result<StagingRecord> {
        let record_type = self
            .record_type
            .parse::<RecordType>()
            .map_err(|_| AppError::Database(format!("unexpected record type: {}", self.record_type)))?;
        let status = self
            .status
            .parse::<StagingStatus>()
            .map_err(|_| AppError::Database(format!("unexpected staging status: {}", self.status)))?;
        let review_outcome = self
            .review_outcome
            .as_deref()
            .map(|value| {
                value.parse::<VerificationStatus>().map_err(|_| {
                    AppError::Database(format!("unexpected review outcome: {value}"))
                })
            })
            .transpose()?;

        Ok(StagingRecord {
            submission_id: self.submission_id,
            record_type,
            status,
            data: serde_json::from_str(&self.data)?,
            domain_key: self.domain_key,
            project_id: self.project_id,
            device_id: self.device_id,
            auto_checks: AutoChecks {
                duplicate: self.check_duplicate,
                gps_valid: self.check_gps_valid,
                photos_complete: self.check_photos_complete,
            },
            requires_manual_review: self.requires_manual_review,
            quality_score: self.quality_score,
            duplicate_of: self.duplicate_of,
            review_outcome,
            validated_at: optional_timestamp(self.validated_at)?,
            validated_by: self.validated_by,
            submitted_at: timestamp(self.submitted_at)?,
            updated_at: timestamp(self.updated_at)?,
        })
    }
}

/// Authoritative production record for a planted pole.
#[derive(Debug, Clone, Serialize)]
pub struct PlantedPole {
    pub id: String,
    pub pole_number: String,
    pub project_id: String,
    pub gps_latitude: f64,
    pub gps_longitude: f64,
    pub gps_accuracy_m: Option<f64>,
    pub planted_date: DateTime<Utc>,
    pub planted_by: String,
    pub verification_status: VerificationStatus,
    pub verified_by: Option<String>,
    pub verified_date: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub quality_score: Option<i64>,
    pub staging_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct PlantedPoleRow {
    pub id: String,
    pub pole_number: String,
    pub project_id: String,
    pub gps_latitude: f64,
    pub gps_longitude: f64,
    pub gps_accuracy_m: Option<f64>,
    pub planted_date: i64,
    pub planted_by: String,
    pub verification_status: String,
    pub verified_by: Option<String>,
    pub verified_date: Option<i64>,
    pub rejection_reason: Option<String>,
    pub quality_score: Option<i64>,
    pub staging_id: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl PlantedPoleRow {
    pub(crate) fn into_pole(self) -> Result<PlantedPole> {
        let verification_status = self.verification_status.parse::<VerificationStatus>().map_err(
            |_| AppError::Database(format!("unexpected verification status: {}", self.verification_status)),
        )?;

        Ok(PlantedPole {
            id: self.id,
            pole_number: self.pole_number,
            project_id: self.project_id,
            gps_latitude: self.gps_latitude,
            gps_longitude: self.gps_longitude,
            gps_accuracy_m: self.gps_accuracy_m,
            planted_date: timestamp(self.planted_date)?,
            planted_by: self.planted_by,
            verification_status,
            verified_by: self.verified_by,
            verified_date: optional_timestamp(self.verified_date)?,
            rejection_reason: self.rejection_reason,
            quality_score: self.quality_score,
            staging_id: self.staging_id,
            created_at: timestamp(self.created_at)?,
            updated_at: timestamp(self.updated_at)?,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PromotionStats {
    pub total_planted: i64,
    pub pending_verification: i64,
    pub approved: i64,
    pub rejected: i64,
    pub average_quality_score: Option<f64>,
    /// approved / total * 100, rounded to two decimals; 0 when nothing is
    /// planted.
    pub completion_rate: f64,
}
