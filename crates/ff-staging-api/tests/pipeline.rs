//! End-to-end pipeline: enqueue offline captures, drain them through the
//! orchestrator into the staging gateway, promote, verify, and read the
//! aggregate counts back out.

use async_trait::async_trait;
use chrono::Utc;
use ff_core::config::PipelineConfig;
use ff_core::db;
use ff_core::submission::{RecordType, StagingCounts, SubmitAck, SubmitRequest};
use ff_field::domain::{CaptureDraft, CaptureStatus, GpsFix};
use ff_field::ports::{CaptureQueue, StagingClient};
use ff_field::queue::SqliteCaptureQueue;
use ff_field::reporter::SyncStatusReporter;
use ff_field::sync::SyncOrchestrator;
use ff_staging_api::{PromotionService, StagingGateway, VerifyAction};
use std::collections::BTreeMap;
use std::sync::Arc;

/// In-process adapter: the device tier's staging client backed directly by
/// the gateway, no HTTP in between.
struct LocalStagingClient {
    gateway: Arc<StagingGateway>,
}

#[async_trait]
impl StagingClient for LocalStagingClient {
    async fn submit(
        &self,
        record_type: RecordType,
        request: SubmitRequest,
    ) -> ff_core::Result<SubmitAck> {
        self.gateway.submit(record_type, request).await
    }

    async fn staging_summary(&self) -> ff_core::Result<StagingCounts> {
        self.gateway.staging_summary().await
    }
}

fn draft(pole_number: &str) -> CaptureDraft {
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
async fn captures_flow_from_device_queue_to_production_stats() {
    let config = PipelineConfig::default();

    let device_pool = db::connect_in_memory().await.unwrap();
    SqliteCaptureQueue::migrate(&device_pool).await.unwrap();
    let queue: Arc<dyn CaptureQueue> = Arc::new(SqliteCaptureQueue::new(device_pool));

    let staging_pool = db::connect_in_memory().await.unwrap();
    ff_staging_api::migrate(&staging_pool).await.unwrap();
    let gateway = Arc::new(StagingGateway::new(
        staging_pool.clone(),
        config.staging.clone(),
    ));
    let promotion = PromotionService::new(staging_pool.clone(), config.staging.clone());

    let client: Arc<dyn StagingClient> = Arc::new(LocalStagingClient {
        gateway: Arc::clone(&gateway),
    });
    let orchestrator = Arc::new(SyncOrchestrator::new(
        Arc::clone(&queue),
        Arc::clone(&client),
        config.sync.clone(),
    ));

    // Four clean captures, one pair sharing a pole number, plus one capture
    // whose pole number cannot pass structural validation.
    let a = queue.enqueue(draft("LAW.P.B001")).await.unwrap();
    let b = queue.enqueue(draft("LAW.P.B002")).await.unwrap();
    let c = queue.enqueue(draft("LAW.P.B010")).await.unwrap();
    let d = queue.enqueue(draft("LAW.P.B010")).await.unwrap();
    let bad = queue.enqueue(draft("not-a-pole")).await.unwrap();

    let progress = orchestrator.sync_all().await.unwrap();

    assert_eq!(progress.total_items, 5);
    assert_eq!(progress.synced_to_staging, 4);
    assert_eq!(progress.errors.len(), 1);

    // The malformed capture stays on the device in error, everything else
    // handed over to staging.
    let errored = queue.list_by_status(CaptureStatus::Error).await.unwrap();
    assert_eq!(errored.len(), 1);
    assert_eq!(errored[0].id, bad.id);
    let staged = queue.list_by_status(CaptureStatus::Staged).await.unwrap();
    assert_eq!(staged.len(), 4);

    // Exactly one of the two same-pole submissions is flagged duplicate.
    let c_record = gateway.get(&c.id).await.unwrap().unwrap();
    let d_record = gateway.get(&d.id).await.unwrap().unwrap();
    assert_ne!(
        c_record.auto_checks.duplicate,
        d_record.auto_checks.duplicate
    );
    let flagged = if c_record.auto_checks.duplicate {
        &c_record
    } else {
        &d_record
    };
    assert!(flagged.requires_manual_review);

    // Drain the auto-approve jobs: the three clean submissions become
    // production records pending verification.
    let promoted = promotion.process_promotion_queue().await.unwrap();
    assert_eq!(promoted, 3);

    // The duplicate-flagged submission goes through the human path.
    promotion
        .verify(
            &flagged.submission_id,
            VerifyAction::Approve,
            "reviewer@example.com",
            Some("verified against planned route"),
        )
        .await
        .unwrap();

    promotion
        .bulk_verify(
            &[a.id.clone(), b.id.clone()],
            VerifyAction::Approve,
            "reviewer@example.com",
            None,
        )
        .await
        .unwrap();

    let stats = promotion.stats().await.unwrap();
    assert_eq!(stats.total_planted, 4);
    assert_eq!(stats.approved, 3);
    assert_eq!(stats.pending_verification, 1);
    assert_eq!(stats.completion_rate, 75.0);

    // Every staging record is completed by now: three promoted by the drain,
    // the flagged one through manual review.
    let reporter = SyncStatusReporter::new(Arc::clone(&queue), Arc::clone(&client), orchestrator);
    let summary = reporter.summary().await.unwrap();
    assert_eq!(summary.offline_pending, 0);
    assert_eq!(summary.offline_error, 1);
    assert_eq!(summary.staged, 4);
    assert_eq!(summary.staging_pending, 0);
    assert_eq!(summary.staging_validated, 4);
    assert_eq!(summary.staging_rejected, 0);
}
