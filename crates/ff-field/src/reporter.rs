use ff_core::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::ports::{CaptureQueue, StagingClient};
use crate::sync::SyncOrchestrator;

/// Operator-facing counts across every pipeline stage.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SyncSummary {
    pub offline_pending: i64,
    pub offline_error: i64,
    pub staged: i64,
    pub staging_pending: i64,
    pub staging_validated: i64,
    pub staging_rejected: i64,
}

/// Read-only aggregation over the local queue and the staging tier. Holds no
/// state of its own.
pub struct SyncStatusReporter {
    queue: Arc<dyn CaptureQueue>,
    client: Arc<dyn StagingClient>,
    orchestrator: Arc<SyncOrchestrator>,
}

impl SyncStatusReporter {
    pub fn new(
        queue: Arc<dyn CaptureQueue>,
        client: Arc<dyn StagingClient>,
        orchestrator: Arc<SyncOrchestrator>,
    ) -> Self {
        Self {
            queue,
            client,
            orchestrator,
        }
    }

    pub async fn summary(&self) -> Result<SyncSummary> {
        let local = self.queue.status_counts().await?;
        let staging = self.client.staging_summary().await?;

        Ok(SyncSummary {
            offline_pending: local.pending,
            offline_error: local.error,
            staged: local.staged,
            staging_pending: staging.staging_pending,
            staging_validated: staging.staging_validated,
            staging_rejected: staging.staging_rejected,
        })
    }

    /// Poll on a fixed interval, skipping ticks while a sync cycle is in
    /// flight so the poll never contends with an active drain.
    pub fn schedule(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let reporter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;

                if reporter.orchestrator.is_syncing() {
                    continue;
                }

                match reporter.summary().await {
                    Ok(summary) => tracing::debug!(
                        offline_pending = summary.offline_pending,
                        offline_error = summary.offline_error,
                        staged = summary.staged,
                        staging_pending = summary.staging_pending,
                        staging_validated = summary.staging_validated,
                        staging_rejected = summary.staging_rejected,
                        "sync status"
                    ),
                    Err(err) => tracing::warn!(error = %err, "sync status poll failed"),
                }
            }
        })
    }
}
