use async_trait::async_trait;
use ff_core::submission::{RecordType, StagingCounts, SubmitAck, SubmitRequest};
use ff_core::Result;
use std::time::Duration;

use crate::domain::{CaptureDraft, CaptureRecord, CaptureStatus, GpsFix, StatusCounts};

/// Fields an orchestration step may change alongside a status transition.
#[derive(Debug, Clone, Default)]
pub struct StatusMeta {
    pub last_error: Option<String>,
    pub staging_id: Option<String>,
}

/// Durable on-device store for captures awaiting sync. Writes are atomic per
/// record; an enqueue that errors has not happened.
#[async_trait]
pub trait CaptureQueue: Send + Sync {
    async fn enqueue(&self, draft: CaptureDraft) -> Result<CaptureRecord>;
    async fn get(&self, id: &str) -> Result<Option<CaptureRecord>>;
    async fn list_by_status(&self, status: CaptureStatus) -> Result<Vec<CaptureRecord>>;
    async fn list_by_project(&self, project_id: &str) -> Result<Vec<CaptureRecord>>;
    async fn list_by_pole(&self, pole_number: &str) -> Result<Vec<CaptureRecord>>;
    async fn update_status(
        &self,
        id: &str,
        new_status: CaptureStatus,
        meta: StatusMeta,
    ) -> Result<()>;
    async fn delete(&self, id: &str) -> Result<()>;
    async fn status_counts(&self) -> Result<StatusCounts>;
}

#[derive(Debug, Clone, Copy)]
pub struct PositionOptions {
    pub enable_high_accuracy: bool,
    pub timeout: Duration,
    pub max_age: Duration,
}

/// Platform location source. Fails with `PermissionDenied` when access is
/// refused and `LocationUnavailable` when no fix can be produced in time.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn current_position(&self, options: PositionOptions) -> Result<GpsFix>;
}

/// Remote staging tier as seen from the device.
#[async_trait]
pub trait StagingClient: Send + Sync {
    async fn submit(&self, record_type: RecordType, request: SubmitRequest) -> Result<SubmitAck>;
    async fn staging_summary(&self) -> Result<StagingCounts>;
}
