use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ff_core::{AppError, Result};
use sqlx::{FromRow, Pool, Sqlite};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::domain::{CaptureDraft, CaptureRecord, CaptureStatus, GpsFix, StatusCounts};
use crate::ports::{CaptureQueue, StatusMeta};

#[derive(Debug, Clone, FromRow)]
struct CaptureRow {
    id: String,
    pole_number: String,
    project_id: String,
    gps_latitude: f64,
    gps_longitude: f64,
    gps_accuracy_m: f64,
    gps_timestamp: i64,
    photo_refs: String,
    captured_by: String,
    captured_at: i64,
    device_id: String,
    notes: Option<String>,
    status: String,
    last_error: Option<String>,
    staging_id: Option<String>,
    created_at: i64,
    updated_at: i64,
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| AppError::Database(format!("invalid stored timestamp: {secs}")))
}

impl CaptureRow {
    fn into_record(self) -> Result<CaptureRecord> {
        let photo_refs: BTreeMap<String, String> = serde_json::from_str(&self.photo_refs)?;
        let status = self
            .status
            .parse::<CaptureStatus>()
            .map_err(|_| AppError::Database(format!("unexpected capture status: {}", self.status)))?;

        Ok(CaptureRecord {
            id: self.id,
            pole_number: self.pole_number,
            project_id: self.project_id,
            gps: GpsFix {
                latitude: self.gps_latitude,
                longitude: self.gps_longitude,
                accuracy_m: self.gps_accuracy_m,
                timestamp: timestamp(self.gps_timestamp)?,
            },
            photo_refs,
            captured_by: self.captured_by,
            captured_at: timestamp(self.captured_at)?,
            device_id: self.device_id,
            notes: self.notes,
            status,
            last_error: self.last_error,
            staging_id: self.staging_id,
            created_at: timestamp(self.created_at)?,
            updated_at: timestamp(self.updated_at)?,
        })
    }
}

/// Durable capture queue over SQLite. Every mutation touches a single row
/// inside a transaction, so a crash never leaves a record half-updated.
pub struct SqliteCaptureQueue {
    pool: Pool<Sqlite>,
}

impl SqliteCaptureQueue {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub async fn migrate(pool: &Pool<Sqlite>) -> Result<()> {
        sqlx::migrate!("./migrations").run(pool).await?;
        Ok(())
    }

    async fn fetch(&self, id: &str) -> Result<Option<CaptureRow>> {
        let row = sqlx::query_as::<_, CaptureRow>("SELECT * FROM field_captures WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }
}

#[async_trait]
impl CaptureQueue for SqliteCaptureQueue {
    async fn enqueue(&self, draft: CaptureDraft) -> Result<CaptureRecord> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();
        let photo_refs = serde_json::to_string(&draft.photo_refs)?;

        sqlx::query(
            r#"
            INSERT INTO field_captures (
                id, pole_number, project_id,
                gps_latitude, gps_longitude, gps_accuracy_m, gps_timestamp,
                photo_refs, captured_by, captured_at, device_id, notes,
                status, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 'pending', ?13, ?13)
            "#,
        )
        .bind(&id)
        .bind(&draft.pole_number)
        .bind(&draft.project_id)
        .bind(draft.gps.latitude)
        .bind(draft.gps.longitude)
        .bind(draft.gps.accuracy_m)
        .bind(draft.gps.timestamp.timestamp())
        .bind(&photo_refs)
        .bind(&draft.captured_by)
        .bind(now)
        .bind(&draft.device_id)
        .bind(&draft.notes)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|err| AppError::Storage(err.to_string()))?;

        let row = self
            .fetch(&id)
            .await?
            .ok_or_else(|| AppError::Storage(format!("capture {id} missing after insert")))?;
        row.into_record()
    }

    async fn get(&self, id: &str) -> Result<Option<CaptureRecord>> {
        match self.fetch(id).await? {
            Some(row) => Ok(Some(row.into_record()?)),
            None => Ok(None),
        }
    }

    async fn list_by_status(&self, status: CaptureStatus) -> Result<Vec<CaptureRecord>> {
        let rows = sqlx::query_as::<_, CaptureRow>(
            "SELECT * FROM field_captures WHERE status = ?1 ORDER BY captured_at ASC",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(CaptureRow::into_record).collect()
    }

    async fn list_by_project(&self, project_id: &str) -> Result<Vec<CaptureRecord>> {
        let rows = sqlx::query_as::<_, CaptureRow>(
            "SELECT * FROM field_captures WHERE project_id = ?1 ORDER BY captured_at ASC",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(CaptureRow::into_record).collect()
    }

    async fn list_by_pole(&self, pole_number: &str) -> Result<Vec<CaptureRecord>> {
        let rows = sqlx::query_as::<_, CaptureRow>(
            "SELECT * FROM field_captures WHERE pole_number = ?1 ORDER BY captured_at ASC",
        )
        .bind(pole_number)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(CaptureRow::into_record).collect()
    }

    async fn update_status(
        &self,
        id: &str,
        new_status: CaptureStatus,
        meta: StatusMeta,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let current: Option<(String,)> =
            sqlx::query_as("SELECT status FROM field_captures WHERE id = ?1")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;

        let current = current
            .ok_or_else(|| AppError::NotFound(format!("capture {id} not found")))?
            .0;
        let current = current
            .parse::<CaptureStatus>()
            .map_err(|_| AppError::Database(format!("unexpected capture status: {current}")))?;

        if !current.can_transition_to(new_status) {
            return Err(AppError::InvalidTransition {
                from: current.as_str().to_string(),
                to: new_status.as_str().to_string(),
            });
        }

        // A retry back to pending clears the previous failure; a successful
        // staging clears it and records the remote id.
        let last_error = match new_status {
            CaptureStatus::Error => meta.last_error,
            _ => None,
        };
        let now = Utc::now().timestamp();

        sqlx::query(
            r#"
            UPDATE field_captures
            SET status = ?1,
                last_error = ?2,
                staging_id = COALESCE(?3, staging_id),
                updated_at = ?4
            WHERE id = ?5
            "#,
        )
        .bind(new_status.as_str())
        .bind(&last_error)
        .bind(&meta.staging_id)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM field_captures WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("capture {id} not found")));
        }
        Ok(())
    }

    async fn status_counts(&self) -> Result<StatusCounts> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM field_captures GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            match status.as_str() {
                "pending" => counts.pending = count,
                "staged" => counts.staged = count,
                "error" => counts.error = count,
                _ => {}
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ff_core::db;

    pub(crate) async fn setup_queue() -> SqliteCaptureQueue {
        let pool = db::connect_in_memory().await.unwrap();
        SqliteCaptureQueue::migrate(&pool).await.unwrap();
        SqliteCaptureQueue::new(pool)
    }

    pub(crate) fn sample_draft(pole_number: &str) -> CaptureDraft {
        let mut photo_refs = BTreeMap::new();
        for slot in ["before", "front", "side", "depth", "concrete", "compaction"] {
            photo_refs.insert(slot.to_string(), format!("photos/{pole_number}/{slot}.jpg"));
        }
        CaptureDraft {
            pole_number: pole_number.to_string(),
            project_id: "proj-lawley".to_string(),
            gps: GpsFix {
                latitude: -26.2041,
                longitude: 28.0473,
                accuracy_m: 4.2,
                timestamp: Utc::now(),
            },
            photo_refs,
            captured_by: "tech-7".to_string(),
            device_id: "device-01".to_string(),
            notes: None,
        }
    }

    #[tokio::test]
    async fn enqueue_assigns_id_and_starts_pending() {
        let queue = setup_queue().await;

        let record = queue.enqueue(sample_draft("LAW.P.B167")).await.unwrap();

        assert!(!record.id.is_empty());
        assert_eq!(record.status, CaptureStatus::Pending);
        assert_eq!(record.photo_refs.len(), 6);

        let loaded = queue.get(&record.id).await.unwrap().unwrap();
        assert_eq!(loaded.pole_number, "LAW.P.B167");
    }

    #[tokio::test]
    async fn list_by_status_filters() {
        let queue = setup_queue().await;
        let a = queue.enqueue(sample_draft("LAW.P.B001")).await.unwrap();
        queue.enqueue(sample_draft("LAW.P.B002")).await.unwrap();

        queue
            .update_status(
                &a.id,
                CaptureStatus::Staged,
                StatusMeta {
                    staging_id: Some(a.id.clone()),
                    ..StatusMeta::default()
                },
            )
            .await
            .unwrap();

        let pending = queue.list_by_status(CaptureStatus::Pending).await.unwrap();
        let staged = queue.list_by_status(CaptureStatus::Staged).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(staged.len(), 1);
        assert_eq!(staged[0].staging_id.as_deref(), Some(a.id.as_str()));

        let by_project = queue.list_by_project("proj-lawley").await.unwrap();
        assert_eq!(by_project.len(), 2);

        let by_pole = queue.list_by_pole("LAW.P.B001").await.unwrap();
        assert_eq!(by_pole.len(), 1);
    }

    #[tokio::test]
    async fn records_survive_a_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("captures.db").display());

        let id = {
            let pool = ff_core::db::connect(&url, 1).await.unwrap();
            SqliteCaptureQueue::migrate(&pool).await.unwrap();
            let queue = SqliteCaptureQueue::new(pool.clone());
            let record = queue.enqueue(sample_draft("LAW.P.B167")).await.unwrap();
            pool.close().await;
            record.id
        };

        let pool = ff_core::db::connect(&url, 1).await.unwrap();
        SqliteCaptureQueue::migrate(&pool).await.unwrap();
        let queue = SqliteCaptureQueue::new(pool);

        let record = queue.get(&id).await.unwrap().unwrap();
        assert_eq!(record.status, CaptureStatus::Pending);
        assert_eq!(record.pole_number, "LAW.P.B167");
    }

    #[tokio::test]
    async fn staged_is_terminal_for_the_queue() {
        let queue = setup_queue().await;
        let record = queue.enqueue(sample_draft("LAW.P.B167")).await.unwrap();

        queue
            .update_status(&record.id, CaptureStatus::Staged, StatusMeta::default())
            .await
            .unwrap();

        let err = queue
            .update_status(&record.id, CaptureStatus::Pending, StatusMeta::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn retry_is_the_only_backward_edge() {
        let queue = setup_queue().await;
        let record = queue.enqueue(sample_draft("LAW.P.B167")).await.unwrap();

        queue
            .update_status(
                &record.id,
                CaptureStatus::Error,
                StatusMeta {
                    last_error: Some("network unreachable".to_string()),
                    ..StatusMeta::default()
                },
            )
            .await
            .unwrap();

        let errored = queue.get(&record.id).await.unwrap().unwrap();
        assert_eq!(errored.last_error.as_deref(), Some("network unreachable"));

        queue
            .update_status(&record.id, CaptureStatus::Pending, StatusMeta::default())
            .await
            .unwrap();

        let retried = queue.get(&record.id).await.unwrap().unwrap();
        assert_eq!(retried.status, CaptureStatus::Pending);
        assert!(retried.last_error.is_none());
    }

    #[tokio::test]
    async fn status_counts_cover_all_buckets() {
        let queue = setup_queue().await;
        let a = queue.enqueue(sample_draft("LAW.P.B001")).await.unwrap();
        let b = queue.enqueue(sample_draft("LAW.P.B002")).await.unwrap();
        queue.enqueue(sample_draft("LAW.P.B003")).await.unwrap();

        queue
            .update_status(&a.id, CaptureStatus::Staged, StatusMeta::default())
            .await
            .unwrap();
        queue
            .update_status(
                &b.id,
                CaptureStatus::Error,
                StatusMeta {
                    last_error: Some("timeout".to_string()),
                    ..StatusMeta::default()
                },
            )
            .await
            .unwrap();

        let counts = queue.status_counts().await.unwrap();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.staged, 1);
        assert_eq!(counts.error, 1);
    }

    #[tokio::test]
    async fn delete_unknown_capture_is_not_found() {
        let queue = setup_queue().await;
        let err = queue.delete("missing").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
