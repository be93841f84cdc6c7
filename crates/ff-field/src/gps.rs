use ff_core::config::GpsConfig;
use ff_core::{AppError, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::domain::GpsFix;
use crate::ports::{LocationProvider, PositionOptions};

/// Snapshot of the gate's acquisition state: idle -> tracking ->
/// acquired or error.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GpsGateStatus {
    pub tracking: bool,
    pub attempts: u32,
    pub best_accuracy_m: Option<f64>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GpsAcquisition {
    pub fix: GpsFix,
    /// False when the accuracy threshold was never met and the best-effort
    /// fix is returned instead; downstream uses this to flag manual review.
    pub accepted: bool,
    pub attempts: u32,
}

/// Acquires a location fix meeting a caller-supplied accuracy threshold with
/// bounded retries, keeping the best fix seen so a capture is never blocked
/// indefinitely by poor signal.
pub struct GpsAccuracyGate {
    provider: Arc<dyn LocationProvider>,
    settle_delay: Duration,
    status: Arc<RwLock<GpsGateStatus>>,
}

impl GpsAccuracyGate {
    pub fn new(provider: Arc<dyn LocationProvider>, config: &GpsConfig) -> Self {
        Self {
            provider,
            settle_delay: Duration::from_millis(config.settle_delay_ms),
            status: Arc::new(RwLock::new(GpsGateStatus::default())),
        }
    }

    pub async fn status(&self) -> GpsGateStatus {
        self.status.read().await.clone()
    }

    pub async fn acquire(
        &self,
        required_accuracy_m: f64,
        max_attempts: u32,
        timeout: Duration,
    ) -> Result<GpsAcquisition> {
        let deadline = Instant::now() + timeout;
        {
            let mut status = self.status.write().await;
            *status = GpsGateStatus {
                tracking: true,
                ..GpsGateStatus::default()
            };
        }

        let mut best: Option<GpsFix> = None;
        let mut attempts = 0u32;
        let mut last_error: Option<String> = None;

        while attempts < max_attempts {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            attempts += 1;
            self.status.write().await.attempts = attempts;

            let options = PositionOptions {
                enable_high_accuracy: true,
                timeout: remaining,
                max_age: Duration::ZERO,
            };

            match self.provider.current_position(options).await {
                Ok(fix) => {
                    if best.map_or(true, |b| fix.accuracy_m < b.accuracy_m) {
                        best = Some(fix);
                        self.status.write().await.best_accuracy_m = Some(fix.accuracy_m);
                    }

                    if fix.accuracy_m <= required_accuracy_m {
                        let mut status = self.status.write().await;
                        status.tracking = false;
                        status.last_error = None;
                        return Ok(GpsAcquisition {
                            fix,
                            accepted: true,
                            attempts,
                        });
                    }
                }
                Err(AppError::PermissionDenied(msg)) => {
                    let mut status = self.status.write().await;
                    status.tracking = false;
                    status.last_error = Some(msg.clone());
                    return Err(AppError::PermissionDenied(msg));
                }
                Err(err) => {
                    let msg = err.to_string();
                    self.status.write().await.last_error = Some(msg.clone());
                    last_error = Some(msg);
                }
            }

            if attempts < max_attempts && !deadline.saturating_duration_since(Instant::now()).is_zero()
            {
                tokio::time::sleep(self.settle_delay.min(remaining)).await;
            }
        }

        self.status.write().await.tracking = false;

        match best {
            Some(fix) => {
                tracing::warn!(
                    accuracy_m = fix.accuracy_m,
                    required_m = required_accuracy_m,
                    attempts,
                    "accuracy threshold not met, returning best-effort fix"
                );
                Ok(GpsAcquisition {
                    fix,
                    accepted: false,
                    attempts,
                })
            }
            None => Err(AppError::LocationUnavailable(
                last_error.unwrap_or_else(|| "no position fix obtained".to_string()),
            )),
        }
    }
}

impl GpsAccuracyGate {
    /// Convenience entry point using the configured defaults.
    pub async fn acquire_with_defaults(&self, config: &GpsConfig) -> Result<GpsAcquisition> {
        self.acquire(
            config.required_accuracy_m,
            config.max_attempts,
            Duration::from_secs(config.timeout_secs),
        )
        .await
    }
}
