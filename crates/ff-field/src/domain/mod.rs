pub mod capture;
pub mod progress;

pub use capture::{CaptureDraft, CaptureRecord, CaptureStatus, GpsFix, StatusCounts};
pub use progress::{SyncProgress, SyncStage};
