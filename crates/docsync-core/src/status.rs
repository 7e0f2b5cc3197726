//! Running counters for the sync engine.

use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

/// Shared, lock-free status counters.
#[derive(Debug, Default)]
pub struct SyncStatus {
    running: AtomicBool,
    /// Millis since epoch of the last successful sync, 0 when never
    last_sync: AtomicI64,
    errors: AtomicU64,
    files_watched: AtomicU64,
}

/// Point-in-time copy of [`SyncStatus`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub running: bool,
    pub last_sync: Option<DateTime<Utc>>,
    pub errors: u64,
    pub files_watched: u64,
}

impl SyncStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn record_sync(&self) {
        self.last_sync
            .store(Utc::now().timestamp_millis(), Ordering::SeqCst);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }

    pub fn set_files_watched(&self, count: u64) {
        self.files_watched.store(count, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let last_sync = match self.last_sync.load(Ordering::SeqCst) {
            0 => None,
            millis => Utc.timestamp_millis_opt(millis).single(),
        };

        StatusSnapshot {
            running: self.running.load(Ordering::SeqCst),
            last_sync,
            errors: self.errors.load(Ordering::SeqCst),
            files_watched: self.files_watched.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_status_has_never_synced() {
        let status = SyncStatus::new();
        assert_eq!(
            status.snapshot(),
            StatusSnapshot {
                running: false,
                last_sync: None,
                errors: 0,
                files_watched: 0,
            }
        );
    }

    #[test]
    fn test_counters_accumulate() {
        let status = SyncStatus::new();
        status.set_running(true);
        status.record_error();
        status.record_error();
        status.set_files_watched(7);
        status.record_sync();

        let snapshot = status.snapshot();
        assert!(snapshot.running);
        assert_eq!(snapshot.errors, 2);
        assert_eq!(snapshot.files_watched, 7);
        assert!(snapshot.last_sync.is_some());
    }
}
