use ff_core::config::SyncConfig;
use ff_core::Result;
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::{CaptureRecord, CaptureStatus, SyncProgress, SyncStage};
use crate::ports::{CaptureQueue, StagingClient, StatusMeta};

/// Releases the single-flight token when the cycle ends, whichever way it
/// ends.
struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}


/// Drains the local capture queue to the staging tier. Exactly one cycle runs
/// at a time per device; a call that finds a cycle in flight returns the
/// current progress without starting another. There is no mid-flight
/// cancellation: a cycle runs to completion per item and
/// `retry_failed_syncs` is the only recovery lever.
pub struct SyncOrchestrator {
    queue: Arc<dyn CaptureQueue>,
    client: Arc<dyn StagingClient>,
    config: SyncConfig,
    progress: Arc<RwLock<SyncProgress>>,
    in_flight: AtomicBool,
}

impl SyncOrchestrator {
    pub fn new(
        queue: Arc<dyn CaptureQueue>,
        client: Arc<dyn StagingClient>,
        config: SyncConfig,
    ) -> Self {
        Self {
            queue,
            client,
            config,
            progress: Arc::new(RwLock::new(SyncProgress::default())),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn is_syncing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub async fn progress(&self) -> SyncProgress {
        self.progress.read().await.clone()
    }

    /// Upload every pending capture to staging.
    pub async fn sync_all(&self) -> Result<SyncProgress> {
        self.run_cycle(false).await
    }

    /// Flip every errored capture back to pending, then run one cycle.
    pub async fn retry_failed_syncs(&self) -> Result<SyncProgress> {
        self.run_cycle(true).await
    }

    /// Empty the progress error list. Capture statuses are untouched.
    pub async fn clear_errors(&self) {
        self.progress.write().await.errors.clear();
    }

    async fn run_cycle(&self, retry_first: bool) -> Result<SyncProgress> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(self.progress().await);
        }
        let _guard = FlightGuard(&self.in_flight);

        if retry_first {
            for record in self.queue.list_by_status(CaptureStatus::Error).await? {
                self.queue
                    .update_status(&record.id, CaptureStatus::Pending, StatusMeta::default())
                    .await?;
            }
        }

        let pending = self.queue.list_by_status(CaptureStatus::Pending).await?;
        {
            let mut progress = self.progress.write().await;
            *progress = SyncProgress::start_cycle(pending.len() as u32);
        }
        if pending.is_empty() {
            return Ok(self.progress().await);
        }

        tracing::info!(total = pending.len(), retry = retry_first, "sync cycle started");

        // Backend commits are bounded, so the drain is chunked; a committed
        // chunk stays committed even if a later one fails (at-least-once).
        for chunk in pending.chunks(self.config.chunk_size) {
            let uploads: Vec<_> = stream::iter(chunk.to_vec().into_iter().enumerate().map(
                |(idx, record)| {
                    let client = Arc::clone(&self.client);
                    async move {
                        let outcome = match record.to_submit_request() {
                            Ok(request) => client.submit(record.record_type(), request).await,
                            Err(err) => Err(err),
                        };
                        (idx, outcome)
                    }
                },
            ))
            .buffer_unordered(self.config.concurrent_uploads)
            .collect()
            .await;

            for (idx, outcome) in uploads {
                self.apply_upload_outcome(&chunk[idx], outcome).await;
            }
        }

        let mut progress = self.progress.write().await;
        progress.current_stage = SyncStage::Complete;
        progress.current_item = None;
        tracing::info!(
            synced = progress.synced_to_staging,
            failed = progress.errors.len(),
            "sync cycle finished"
        );
        Ok(progress.clone())
    }

    /// One capture's failure must never abort the batch, so both the status
    /// write and the progress update are absorbed into the error list.
    async fn apply_upload_outcome(
        &self,
        record: &CaptureRecord,
        outcome: Result<ff_core::submission::SubmitAck>,
    ) {
        match outcome {
            Ok(ack) => {
                if let Some(warning) = &ack.duplicate_warning {
                    tracing::warn!(
                        capture_id = %record.id,
                        pole_number = %record.pole_number,
                        warning,
                        "staging flagged a duplicate"
                    );
                }

                let meta = StatusMeta {
                    staging_id: Some(ack.submission_id.clone()),
                    last_error: None,
                };
                match self
                    .queue
                    .update_status(&record.id, CaptureStatus::Staged, meta)
                    .await
                {
                    Ok(()) => {
                        let mut progress = self.progress.write().await;
                        progress.synced_to_staging += 1;
                        if !ack.requires_manual_review {
                            progress.validated_items += 1;
                        }
                        progress.current_item =
                            Some(format!("Uploaded {} to staging", record.pole_number));
                    }
                    Err(err) => {
                        let mut progress = self.progress.write().await;
                        progress.errors.push(format!(
                            "Capture {} uploaded but could not be marked staged: {err}",
                            record.id
                        ));
                    }
                }
            }
            Err(err) => {
                let message = format!(
                    "Failed to sync capture {} ({}): {err}",
                    record.id, record.pole_number
                );
                tracing::warn!(capture_id = %record.id, error = %err, "capture sync failed");

                let meta = StatusMeta {
                    last_error: Some(err.to_string()),
                    staging_id: None,
                };
                if let Err(update_err) = self
                    .queue
                    .update_status(&record.id, CaptureStatus::Error, meta)
                    .await
                {
                    tracing::error!(
                        capture_id = %record.id,
                        error = %update_err,
                        "failed to record capture sync failure"
                    );
                }

                self.progress.write().await.errors.push(message);
            }
        }
    }
}
