use chrono::Utc;
use ff_core::config::StagingConfig;
use ff_core::submission::{
    BulkItem, BulkItemAck, BulkItemFailure, BulkOutcome, PolePayload, RecordType, SowPayload,
    StagingCounts, SubmitAck, SubmitRequest,
};
use ff_core::validation::{self, FieldIssue};
use ff_core::{AppError, Result};
use sqlx::{Pool, Sqlite, Transaction};

/// A submission that passed structural validation. Duplicate detection and
/// persistence happen later, inside one transaction, so two concurrent
/// submissions for the same pole can never both pass the duplicate check.
struct Validated {
    submission_id: String,
    record_type: RecordType,
    data: String,
    domain_key: String,
    project_id: String,
    gps_valid: bool,
    photos_complete: bool,
}

/// Server-side intake: validates submissions, runs the automated quality
/// checks, and decides auto-approval versus manual review. The staging store
/// is written only through this gateway.
pub struct StagingGateway {
    pool: Pool<Sqlite>,
    config: StagingConfig,
}

impl StagingGateway {
    pub fn new(pool: Pool<Sqlite>, config: StagingConfig) -> Self {
        Self { pool, config }
    }

    /// Stage a single submission. Resubmitting the same submission id upserts
    /// the existing record rather than creating a second one.
    pub async fn submit(&self, record_type: RecordType, request: SubmitRequest) -> Result<SubmitAck> {
        let validated = self.validate(record_type, &request.submission_id, &request.data)?;

        let mut tx = self.pool.begin().await?;
        let ack = self
            .stage_one(&mut tx, &validated, &request.metadata.device_id)
            .await?;
        tx.commit().await?;

        tracing::info!(
            submission_id = %ack.submission_id,
            record_type = %record_type,
            requires_manual_review = ack.requires_manual_review,
            "submission staged"
        );
        Ok(ack)
    }

    /// Stage a batch. Items are validated independently: failures are
    /// reported per item, valid items commit together. A batch over the cap
    /// is rejected outright with nothing processed.
    pub async fn submit_bulk(&self, items: Vec<BulkItem>, device_id: &str) -> Result<BulkOutcome> {
        if items.len() > self.config.bulk_max_items {
            return Err(AppError::BatchTooLarge {
                limit: self.config.bulk_max_items,
                actual: items.len(),
            });
        }

        let total = items.len();
        let mut successful = Vec::new();
        let mut failed = Vec::new();
        let mut validated_items = Vec::new();

        for (index, item) in items.into_iter().enumerate() {
            match self.validate(item.record_type, &item.submission_id, &item.data) {
                Ok(validated) => validated_items.push((index, validated)),
                Err(AppError::Validation(issues)) => failed.push(BulkItemFailure {
                    index,
                    submission_id: Some(item.submission_id),
                    issues,
                }),
                Err(err) => return Err(err),
            }
        }

        // Valid items are committed together; earlier items in the batch are
        // visible to later duplicate checks through the shared transaction.
        let mut tx = self.pool.begin().await?;
        for (index, validated) in &validated_items {
            match self.stage_one(&mut tx, validated, device_id).await {
                Ok(_ack) => successful.push(BulkItemAck {
                    index: *index,
                    submission_id: validated.submission_id.clone(),
                    pole_number: match validated.record_type {
                        RecordType::Pole => Some(validated.domain_key.clone()),
                        RecordType::Sow => None,
                    },
                }),
                Err(AppError::Duplicate(message)) => failed.push(BulkItemFailure {
                    index: *index,
                    submission_id: Some(validated.submission_id.clone()),
                    issues: vec![FieldIssue::error("domain_key", "duplicate", message)],
                }),
                Err(err) => return Err(err),
            }
        }
        tx.commit().await?;

        failed.sort_by_key(|failure| failure.index);

        tracing::info!(
            total,
            successful = successful.len(),
            failed = failed.len(),
            "bulk submission staged"
        );

        Ok(BulkOutcome {
            total,
            successful,
            failed,
        })
    }

    pub async fn get(&self, submission_id: &str) -> Result<Option<crate::models::StagingRecord>> {
        let row = sqlx::query_as::<_, crate::models::StagingRow>(
            "SELECT * FROM staging_records WHERE submission_id = ?1",
        )
        .bind(submission_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(row.into_record()?)),
            None => Ok(None),
        }
    }

    pub async fn staging_summary(&self) -> Result<StagingCounts> {
        let (pending,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM staging_records WHERE status = 'pending_validation'",
        )
        .fetch_one(&self.pool)
        .await?;
        let (validated,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM staging_records
            WHERE status = 'completed'
              AND (review_outcome IS NULL OR review_outcome = 'approved')
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        let (rejected,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM staging_records WHERE review_outcome = 'rejected'")
                .fetch_one(&self.pool)
                .await?;

        Ok(StagingCounts {
            staging_pending: pending,
            staging_validated: validated,
            staging_rejected: rejected,
        })
    }

    fn validate(
        &self,
        record_type: RecordType,
        submission_id: &str,
        data: &serde_json::Value,
    ) -> Result<Validated> {
        if submission_id.trim().is_empty() {
            return Err(AppError::Validation(vec![FieldIssue::error(
                "submission_id",
                "required",
                "submission_id is required",
            )]));
        }

        match record_type {
            RecordType::Pole => self.validate_pole(submission_id, data),
            RecordType::Sow => self.validate_sow(submission_id, data),
        }
    }

    fn validate_pole(&self, submission_id: &str, data: &serde_json::Value) -> Result<Validated> {
        let payload: PolePayload = serde_json::from_value(data.clone()).map_err(|err| {
            AppError::Validation(vec![FieldIssue::error("data", "schema", err.to_string())])
        })?;

        let mut issues = Vec::new();
        validation::require_non_empty(&mut issues, "pole_number", &payload.pole_number);
        validation::require_non_empty(&mut issues, "project_id", &payload.project_id);
        validation::require_non_empty(&mut issues, "captured_by", &payload.captured_by);
        if !payload.pole_number.trim().is_empty()
            && !validation::is_valid_pole_number(&payload.pole_number)
        {
            issues.push(FieldIssue::error(
                "pole_number",
                "format",
                format!("invalid pole number format: {}", payload.pole_number),
            ));
        }
        if !issues.is_empty() {
            return Err(AppError::Validation(issues));
        }

        let gps_valid = payload.gps.accuracy_m <= self.config.max_gps_accuracy_m
            && validation::is_plausible_coordinate(payload.gps.latitude, payload.gps.longitude);
        let photos_complete = self
            .config
            .required_photo_slots
            .iter()
            .all(|slot| payload.photos.get(slot).is_some_and(|r| !r.is_empty()));

        Ok(Validated {
            submission_id: submission_id.to_string(),
            record_type: RecordType::Pole,
            data: serde_json::to_string(&payload)?,
            domain_key: payload.pole_number.clone(),
            project_id: payload.project_id.clone(),
            gps_valid,
            photos_complete,
        })
    }

    fn validate_sow(&self, submission_id: &str, data: &serde_json::Value) -> Result<Validated> {
        let payload: SowPayload = serde_json::from_value(data.clone()).map_err(|err| {
            AppError::Validation(vec![FieldIssue::error("data", "schema", err.to_string())])
        })?;

        let mut issues = Vec::new();
        validation::require_non_empty(&mut issues, "sow_number", &payload.sow_number);
        validation::require_non_empty(&mut issues, "project_id", &payload.project_id);
        validation::require_non_empty(&mut issues, "description", &payload.description);
        if !issues.is_empty() {
            return Err(AppError::Validation(issues));
        }

        Ok(Validated {
            submission_id: submission_id.to_string(),
            record_type: RecordType::Sow,
            data: serde_json::to_string(&payload)?,
            domain_key: payload.sow_number.clone(),
            project_id: payload.project_id.clone(),
            // GPS and photo checks do not apply to scope-of-work payloads.
            gps_valid: true,
            photos_complete: true,
        })
    }

    fn allow_update(&self, record_type: RecordType) -> bool {
        match record_type {
            RecordType::Pole => self.config.allow_pole_update,
            RecordType::Sow => self.config.allow_sow_update,
        }
    }

    /// Run duplicate detection, decide auto-approval, and upsert the staging
    /// record, all inside the caller's transaction.
    async fn stage_one(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        validated: &Validated,
        device_id: &str,
    ) -> Result<SubmitAck> {
        let duplicate_of = Self::find_duplicate(
            tx,
            validated.record_type,
            &validated.domain_key,
            &validated.submission_id,
        )
        .await?;

        if duplicate_of.is_some() && !self.allow_update(validated.record_type) {
            return Err(AppError::Duplicate(format!(
                "{} {} already exists and updates are not allowed",
                validated.record_type, validated.domain_key
            )));
        }

        let duplicate = duplicate_of.is_some();
        for (name, passed, detail) in [
            ("duplicate", !duplicate, duplicate_of.as_deref().unwrap_or("none")),
            ("gps_valid", validated.gps_valid, "accuracy and coordinate range"),
            (
                "photos_complete",
                validated.photos_complete,
                "required slot coverage",
            ),
        ] {
            tracing::debug!(
                submission_id = %validated.submission_id,
                check = name,
                passed,
                detail,
                "auto check evaluated"
            );
        }

        let mut quality_score: i64 = 100;
        if duplicate {
            quality_score -= 10;
        }
        if !validated.gps_valid {
            quality_score -= 15;
        }
        if !validated.photos_complete {
            quality_score -= 20;
        }
        let quality_score = quality_score.max(0);

        let auto_approve = !duplicate && validated.gps_valid && validated.photos_complete;
        let requires_manual_review = !auto_approve;
        let duplicate_warning = duplicate_of.as_ref().map(|existing| {
            format!(
                "{} {} already staged or promoted (first seen as {existing})",
                validated.record_type, validated.domain_key
            )
        });

        let now = Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO staging_records (
                submission_id, record_type, status, data, domain_key, project_id,
                device_id, check_duplicate, check_gps_valid, check_photos_complete,
                requires_manual_review, quality_score, duplicate_of,
                submitted_at, updated_at
            ) VALUES (?1, ?2, 'pending_validation', ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)
            ON CONFLICT(submission_id) DO UPDATE SET
                data = excluded.data,
                domain_key = excluded.domain_key,
                project_id = excluded.project_id,
                device_id = excluded.device_id,
                check_duplicate = excluded.check_duplicate,
                check_gps_valid = excluded.check_gps_valid,
                check_photos_complete = excluded.check_photos_complete,
                requires_manual_review = excluded.requires_manual_review,
                quality_score = excluded.quality_score,
                duplicate_of = excluded.duplicate_of,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&validated.submission_id)
        .bind(validated.record_type.as_str())
        .bind(&validated.data)
        .bind(&validated.domain_key)
        .bind(&validated.project_id)
        .bind(device_id)
        .bind(duplicate)
        .bind(validated.gps_valid)
        .bind(validated.photos_complete)
        .bind(requires_manual_review)
        .bind(quality_score)
        .bind(&duplicate_of)
        .bind(now)
        .execute(&mut **tx)
        .await?;

        if auto_approve {
            // At-least-once: reprocessing an already-queued submission is a
            // no-op for the job table and safe for the promoter.
            sqlx::query(
                r#"
                INSERT INTO promotion_jobs (submission_id, status, attempts, created_at, updated_at)
                VALUES (?1, 'queued', 0, ?2, ?2)
                ON CONFLICT(submission_id) DO NOTHING
                "#,
            )
            .bind(&validated.submission_id)
            .bind(now)
            .execute(&mut **tx)
            .await?;
        }

        let (status,): (String,) =
            sqlx::query_as("SELECT status FROM staging_records WHERE submission_id = ?1")
                .bind(&validated.submission_id)
                .fetch_one(&mut **tx)
                .await?;

        Ok(SubmitAck {
            submission_id: validated.submission_id.clone(),
            status,
            duplicate_warning,
            requires_manual_review,
        })
    }

    async fn find_duplicate(
        tx: &mut Transaction<'_, Sqlite>,
        record_type: RecordType,
        domain_key: &str,
        submission_id: &str,
    ) -> Result<Option<String>> {
        let staged: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT submission_id FROM staging_records
            WHERE record_type = ?1 AND domain_key = ?2 AND submission_id != ?3
            LIMIT 1
            "#,
        )
        .bind(record_type.as_str())
        .bind(domain_key)
        .bind(submission_id)
        .fetch_optional(&mut **tx)
        .await?;
        if let Some((existing,)) = staged {
            return Ok(Some(existing));
        }

        if record_type == RecordType::Pole {
            let planted: Option<(String,)> = sqlx::query_as(
                "SELECT staging_id FROM planted_poles WHERE pole_number = ?1 AND staging_id != ?2 LIMIT 1",
            )
            .bind(domain_key)
            .bind(submission_id)
            .fetch_optional(&mut **tx)
            .await?;
            if let Some((existing,)) = planted {
                return Ok(Some(existing));
            }
        }

        Ok(None)
    }
}
