use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStage {
    #[default]
    Idle,
    Uploading,
    Validating,
    Syncing,
    Complete,
}

impl SyncStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStage::Idle => "idle",
            SyncStage::Uploading => "uploading",
            SyncStage::Validating => "validating",
            SyncStage::Syncing => "syncing",
            SyncStage::Complete => "complete",
        }
    }
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// In-memory progress of one sync cycle. Reset when a cycle starts, readable
/// at any time while the cycle runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncProgress {
    pub total_items: u32,
    pub synced_to_staging: u32,
    pub validated_items: u32,
    pub synced_to_production: u32,
    pub current_stage: SyncStage,
    pub current_item: Option<String>,
    pub errors: Vec<String>,
}

impl SyncProgress {
    pub fn start_cycle(total_items: u32) -> Self {
        Self {
            total_items,
            current_stage: if total_items == 0 {
                SyncStage::Complete
            } else {
                SyncStage::Uploading
            },
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_cycle_resets_counters() {
        let mut progress = SyncProgress::default();
        progress.synced_to_staging = 7;
        progress.errors.push("old".into());

        let fresh = SyncProgress::start_cycle(3);
        assert_eq!(fresh.total_items, 3);
        assert_eq!(fresh.synced_to_staging, 0);
        assert!(fresh.errors.is_empty());
        assert_eq!(fresh.current_stage, SyncStage::Uploading);
    }

    #[test]
    fn empty_cycle_goes_straight_to_complete() {
        let progress = SyncProgress::start_cycle(0);
        assert_eq!(progress.current_stage, SyncStage::Complete);
    }
}
