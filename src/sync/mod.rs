// ABOUTME: Sync orchestration - table-to-table synchronizer and bitemporal history tracker
// ABOUTME: Both drive repositories through the row comparator and commit once per run

pub mod history;
pub mod synchronizer;

pub use history::{
    open_ended, HistoryConfig, HistoryResult, HistoryTracker, HISTORY_ID, VALID_FROM, VALID_TO,
};
pub use synchronizer::{SyncConfig, SyncEndpoint, SyncPath, SyncPhase, SyncResult, Synchronizer};

use std::time::{Duration, Instant};

/// Absolute deadline for a run that starts now.
pub(crate) fn deadline_from(timeout: Option<Duration>) -> Option<Instant> {
    timeout.and_then(|t| Instant::now().checked_add(t))
}
