//! Echo suppression for writes the engine applies to the local folder.
//!
//! Before the engine writes or deletes a path because of a remote change it
//! marks the path here. The watcher drops any event for a marked path while
//! the marker is live. Markers expire after a grace window whether or not the
//! event was observed, so a stale marker never blocks a later genuine edit.
//!
//! Expiry is lazy: expired entries are swept on every insert and lookup.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;
use web_time::Instant;

/// Default lifetime of a marker.
pub const DEFAULT_GRACE_WINDOW: Duration = Duration::from_secs(3);

/// Shared set of recently self-written paths.
///
/// One instance is shared (behind `Arc`) by the watcher, reconciliation and
/// the change dispatcher.
pub struct EchoSuppressor {
    grace: Duration,
    markers: Mutex<HashMap<String, Instant>>,
}

impl Default for EchoSuppressor {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE_WINDOW)
    }
}

impl EchoSuppressor {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            markers: Mutex::new(HashMap::new()),
        }
    }

    /// Mark a path the engine is about to write or delete.
    pub fn mark(&self, path: &str) {
        self.mark_at(path, Instant::now());
    }

    /// Whether events for `path` should currently be dropped.
    pub fn is_suppressed(&self, path: &str) -> bool {
        self.is_suppressed_at(path, Instant::now())
    }

    pub fn mark_at(&self, path: &str, now: Instant) {
        let mut markers = self.markers.lock().unwrap_or_else(|e| e.into_inner());
        Self::sweep(&mut markers, now, self.grace);
        markers.insert(path.to_string(), now);
        debug!("Marked {} as self-written", path);
    }

    pub fn is_suppressed_at(&self, path: &str, now: Instant) -> bool {
        let mut markers = self.markers.lock().unwrap_or_else(|e| e.into_inner());
        Self::sweep(&mut markers, now, self.grace);
        markers.contains_key(path)
    }

    /// Number of live markers.
    pub fn len(&self) -> usize {
        let mut markers = self.markers.lock().unwrap_or_else(|e| e.into_inner());
        Self::sweep(&mut markers, Instant::now(), self.grace);
        markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn sweep(markers: &mut HashMap<String, Instant>, now: Instant, grace: Duration) {
        markers.retain(|_, inserted| now.saturating_duration_since(*inserted) < grace);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marked_path_is_suppressed_within_window() {
        let echo = EchoSuppressor::new(Duration::from_secs(2));
        let t0 = Instant::now();

        echo.mark_at("q3/report.md", t0);

        assert!(echo.is_suppressed_at("q3/report.md", t0));
        assert!(echo.is_suppressed_at("q3/report.md", t0 + Duration::from_millis(1999)));
        assert!(!echo.is_suppressed_at("q3/other.md", t0));
    }

    #[test]
    fn test_marker_expires_after_window() {
        let echo = EchoSuppressor::new(Duration::from_secs(2));
        let t0 = Instant::now();

        echo.mark_at("notes.md", t0);

        assert!(!echo.is_suppressed_at("notes.md", t0 + Duration::from_secs(2)));
        // Expired markers are swept, not just ignored
        assert!(!echo.is_suppressed_at("notes.md", t0));
    }

    #[test]
    fn test_remarking_extends_window() {
        let echo = EchoSuppressor::new(Duration::from_secs(2));
        let t0 = Instant::now();

        echo.mark_at("notes.md", t0);
        echo.mark_at("notes.md", t0 + Duration::from_secs(1));

        assert!(echo.is_suppressed_at("notes.md", t0 + Duration::from_millis(2500)));
    }

    #[test]
    fn test_insert_sweeps_expired_entries() {
        let echo = EchoSuppressor::new(Duration::from_millis(100));
        let t0 = Instant::now();

        echo.mark_at("a.md", t0);
        echo.mark_at("b.md", t0 + Duration::from_millis(150));

        let markers = echo.markers.lock().unwrap();
        assert!(!markers.contains_key("a.md"));
        assert!(markers.contains_key("b.md"));
    }

    #[test]
    fn test_concurrent_mark_and_lookup() {
        use std::sync::Arc;

        let echo = Arc::new(EchoSuppressor::new(Duration::from_secs(60)));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let echo = Arc::clone(&echo);
                std::thread::spawn(move || {
                    for j in 0..100 {
                        let path = format!("dir{}/file{}.md", i, j);
                        echo.mark(&path);
                        assert!(echo.is_suppressed(&path));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(echo.len(), 800);
    }
}
