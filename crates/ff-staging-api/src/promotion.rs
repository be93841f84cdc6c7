use chrono::Utc;
use ff_core::config::StagingConfig;
use ff_core::submission::{PolePayload, RecordType};
use ff_core::{AppError, Result};
use sqlx::{Pool, Sqlite, Transaction};
use uuid::Uuid;

use crate::models::{
    PlantedPole, PlantedPoleRow, PromotionStats, StagingRow, VerificationStatus, VerifyAction,
};

/// Converts approved staging records into production records and owns every
/// write to the planted-poles store. Verification decisions always append an
/// audit entry; re-verification updates the record but never erases history.
pub struct PromotionService {
    pool: Pool<Sqlite>,
    config: StagingConfig,
}

impl PromotionService {
    pub fn new(pool: Pool<Sqlite>, config: StagingConfig) -> Self {
        Self { pool, config }
    }

    /// Drain queued auto-approve jobs. Jobs are at-least-once: promoting an
    /// already-promoted submission is a no-op, and a job that keeps failing
    /// is parked as dead after the configured attempts.
    pub async fn process_promotion_queue(&self) -> Result<u32> {
        let jobs: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT submission_id, attempts FROM promotion_jobs
            WHERE status = 'queued'
            ORDER BY created_at ASC
            LIMIT 50
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut promoted = 0u32;
        for (submission_id, attempts) in jobs {
            match self.promote(&submission_id).await {
                Ok(()) => {
                    sqlx::query("DELETE FROM promotion_jobs WHERE submission_id = ?1")
                        .bind(&submission_id)
                        .execute(&self.pool)
                        .await?;
                    promoted += 1;
                }
                Err(err) => {
                    let attempts = attempts + 1;
                    let status = if attempts >= i64::from(self.config.promotion_max_attempts) {
                        "dead"
                    } else {
                        "queued"
                    };
                    tracing::warn!(
                        submission_id = %submission_id,
                        attempts,
                        status,
                        error = %err,
                        "promotion attempt failed"
                    );
                    sqlx::query(
                        r#"
                        UPDATE promotion_jobs
                        SET attempts = ?1, status = ?2, last_error = ?3, updated_at = ?4
                        WHERE submission_id = ?5
                        "#,
                    )
                    .bind(attempts)
                    .bind(status)
                    .bind(err.to_string())
                    .bind(Utc::now().timestamp())
                    .bind(&submission_id)
                    .execute(&self.pool)
                    .await?;
                }
            }
        }

        if promoted > 0 {
            tracing::info!(promoted, "promotion queue drained");
        }
        Ok(promoted)
    }

    async fn promote(&self, submission_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let staging = Self::fetch_staging(&mut tx, submission_id).await?;

        if staging.record_type == RecordType::Pole.as_str()
            && Self::planted_by_staging(&mut tx, submission_id).await?.is_none()
        {
            let payload: PolePayload = serde_json::from_str(&staging.data)?;
            let pole_id =
                Self::insert_planted(&mut tx, submission_id, &payload, staging.quality_score, None)
                    .await?;
            Self::append_audit(&mut tx, submission_id, Some(&pole_id), "promoted", "system", None)
                .await?;
        }

        sqlx::query(
            "UPDATE staging_records SET status = 'completed', updated_at = ?1 WHERE submission_id = ?2",
        )
        .bind(Utc::now().timestamp())
        .bind(submission_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Apply a reviewer decision to one submission.
    pub async fn verify(
        &self,
        submission_id: &str,
        action: VerifyAction,
        verified_by: &str,
        notes: Option<&str>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        Self::verify_in_tx(&mut tx, submission_id, action, verified_by, notes).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Apply the same decision to every submission as one logical operation:
    /// either all of them change or none do.
    pub async fn bulk_verify(
        &self,
        submission_ids: &[String],
        action: VerifyAction,
        verified_by: &str,
        notes: Option<&str>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for submission_id in submission_ids {
            Self::verify_in_tx(&mut tx, submission_id, action, verified_by, notes).await?;
        }
        tx.commit().await?;

        tracing::info!(
            count = submission_ids.len(),
            action = ?action,
            verified_by,
            "bulk verification applied"
        );
        Ok(())
    }

    async fn verify_in_tx(
        tx: &mut Transaction<'_, Sqlite>,
        submission_id: &str,
        action: VerifyAction,
        verified_by: &str,
        notes: Option<&str>,
    ) -> Result<()> {
        let staging = Self::fetch_staging(tx, submission_id).await?;
        let now = Utc::now().timestamp();
        let planted = Self::planted_by_staging(tx, submission_id).await?;

        let (outcome, audit_action) = match action {
            VerifyAction::Approve => (VerificationStatus::Approved, "approved"),
            VerifyAction::Reject => (VerificationStatus::Rejected, "rejected"),
        };

        let pole_id = match (action, planted) {
            (VerifyAction::Approve, Some(pole)) => {
                sqlx::query(
                    r#"
                    UPDATE planted_poles
                    SET verification_status = 'approved', verified_by = ?1, verified_date = ?2,
                        rejection_reason = NULL, updated_at = ?2
                    WHERE id = ?3
                    "#,
                )
                .bind(verified_by)
                .bind(now)
                .bind(&pole.id)
                .execute(&mut **tx)
                .await?;
                Some(pole.id)
            }
            (VerifyAction::Approve, None) => {
                if staging.record_type == RecordType::Pole.as_str() {
                    let payload: PolePayload = serde_json::from_str(&staging.data)?;
                    let pole_id = Self::insert_planted(
                        tx,
                        submission_id,
                        &payload,
                        staging.quality_score,
                        Some((verified_by, now)),
                    )
                    .await?;
                    Some(pole_id)
                } else {
                    None
                }
            }
            (VerifyAction::Reject, Some(pole)) => {
                sqlx::query(
                    r#"
                    UPDATE planted_poles
                    SET verification_status = 'rejected', verified_by = ?1, verified_date = ?2,
                        rejection_reason = ?3, updated_at = ?2
                    WHERE id = ?4
                    "#,
                )
                .bind(verified_by)
                .bind(now)
                .bind(notes)
                .bind(&pole.id)
                .execute(&mut **tx)
                .await?;
                Some(pole.id)
            }
            // Rejection never creates a production record.
            (VerifyAction::Reject, None) => None,
        };

        sqlx::query(
            r#"
            UPDATE staging_records
            SET status = 'completed', review_outcome = ?1,
                validated_at = ?2, validated_by = ?3, updated_at = ?2
            WHERE submission_id = ?4
            "#,
        )
        .bind(outcome.as_str())
        .bind(now)
        .bind(verified_by)
        .bind(submission_id)
        .execute(&mut **tx)
        .await?;

        Self::append_audit(
            tx,
            submission_id,
            pole_id.as_deref(),
            audit_action,
            verified_by,
            notes,
        )
        .await?;

        Ok(())
    }

    pub async fn get_planted(&self, staging_id: &str) -> Result<Option<PlantedPole>> {
        let mut tx = self.pool.begin().await?;
        let pole = Self::planted_by_staging(&mut tx, staging_id).await?;
        tx.commit().await?;
        Ok(pole)
    }

    pub async fn stats(&self) -> Result<PromotionStats> {
        let (total, pending, approved, rejected, average_quality_score): (
            i64,
            i64,
            i64,
            i64,
            Option<f64>,
        ) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN verification_status = 'pending' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN verification_status = 'approved' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN verification_status = 'rejected' THEN 1 ELSE 0 END), 0),
                AVG(quality_score)
            FROM planted_poles
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let completion_rate = if total > 0 {
            round_two_decimals(approved as f64 / total as f64 * 100.0)
        } else {
            0.0
        };

        Ok(PromotionStats {
            total_planted: total,
            pending_verification: pending,
            approved,
            rejected,
            average_quality_score,
            completion_rate,
        })
    }

    async fn fetch_staging(
        tx: &mut Transaction<'_, Sqlite>,
        submission_id: &str,
    ) -> Result<StagingRow> {
        sqlx::query_as::<_, StagingRow>(
            "SELECT * FROM staging_records WHERE submission_id = ?1",
        )
        .bind(submission_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("staging record {submission_id} not found")))
    }

    async fn planted_by_staging(
        tx: &mut Transaction<'_, Sqlite>,
        staging_id: &str,
    ) -> Result<Option<PlantedPole>> {
        let row = sqlx::query_as::<_, PlantedPoleRow>(
            "SELECT * FROM planted_poles WHERE staging_id = ?1",
        )
        .bind(staging_id)
        .fetch_optional(&mut **tx)
        .await?;

        match row {
            Some(row) => Ok(Some(row.into_pole()?)),
            None => Ok(None),
        }
    }

    async fn insert_planted(
        tx: &mut Transaction<'_, Sqlite>,
        staging_id: &str,
        payload: &PolePayload,
        quality_score: Option<i64>,
        verification: Option<(&str, i64)>,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();
        let (status, verified_by, verified_date) = match verification {
            Some((verified_by, at)) => ("approved", Some(verified_by), Some(at)),
            None => ("pending", None, None),
        };

        sqlx::query(
            r#"
            INSERT INTO planted_poles (
                id, pole_number, project_id, gps_latitude, gps_longitude, gps_accuracy_m,
                planted_date, planted_by, verification_status, verified_by, verified_date,
                quality_score, staging_id, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)
            "#,
        )
        .bind(&id)
        .bind(&payload.pole_number)
        .bind(&payload.project_id)
        .bind(payload.gps.latitude)
        .bind(payload.gps.longitude)
        .bind(payload.gps.accuracy_m)
        .bind(payload.captured_at.timestamp())
        .bind(&payload.captured_by)
        .bind(status)
        .bind(verified_by)
        .bind(verified_date)
        .bind(quality_score)
        .bind(staging_id)
        .bind(now)
        .execute(&mut **tx)
        .await?;

        Ok(id)
    }

    async fn append_audit(
        tx: &mut Transaction<'_, Sqlite>,
        staging_id: &str,
        production_id: Option<&str>,
        action: &str,
        actor: &str,
        notes: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO verification_audit (staging_id, production_id, action, actor, notes, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(staging_id)
        .bind(production_id)
        .bind(action)
        .bind(actor)
        .bind(notes)
        .bind(Utc::now().timestamp())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

fn round_two_decimals(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
