//! File watcher with debouncing for the synced folder.
//!
//! Uses notify-debouncer-mini for change detection. Created vs modified is
//! derived from an mtime cache keyed by relative path, which also filters
//! spurious events whose mtime did not change.

use anyhow::{Context, Result, bail};
use docsync_core::{EchoSuppressor, FileEvent, FileEventKind, WatchFilter};
use notify::RecursiveMode;
use notify_debouncer_mini::{DebounceEventResult, DebouncedEvent, Debouncer, new_debouncer};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Debounce window for bursts of events during saves.
pub const DEBOUNCE: Duration = Duration::from_millis(200);

/// Last seen mtime per relative path
type MtimeCache = Arc<Mutex<HashMap<String, SystemTime>>>;

/// Watches the synced folder and forwards qualifying events.
pub struct FileWatcher {
    root: PathBuf,
    filter: WatchFilter,
    echo: Arc<EchoSuppressor>,
    mtime_cache: MtimeCache,
    event_tx: mpsc::UnboundedSender<FileEvent>,
    event_rx: mpsc::UnboundedReceiver<FileEvent>,
    /// Debouncer handle; dropping it stops the watch
    debouncer: Option<Debouncer<notify::RecommendedWatcher>>,
}

impl FileWatcher {
    /// Create a watcher for `root`. Nothing is watched until [`start`].
    ///
    /// Fails when the root is not a readable directory.
    ///
    /// [`start`]: FileWatcher::start
    pub fn new(root: PathBuf, filter: WatchFilter, echo: Arc<EchoSuppressor>) -> Result<Self> {
        if !root.is_dir() {
            bail!("Watch folder {:?} is not a directory", root);
        }
        std::fs::read_dir(&root)
            .with_context(|| format!("Watch folder {:?} is not readable", root))?;

        // Canonicalize to resolve symlinks. On macOS, /var/folders/... is
        // really /private/var/folders/..., and FSEvents reports the real path.
        let root = root.canonicalize().unwrap_or(root);

        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Ok(Self {
            root,
            filter,
            echo,
            mtime_cache: Arc::new(Mutex::new(HashMap::new())),
            event_tx,
            event_rx,
            debouncer: None,
        })
    }

    /// Start watching.
    ///
    /// Emits a `Created` event for every qualifying file already present, then
    /// forwards live events. Returns the number of files found. Calling
    /// `start` on a running watcher restarts it.
    pub fn start(&mut self) -> Result<usize> {
        self.stop();
        self.mtime_cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();

        let existing = scan(&self.root, &self.filter);
        {
            let mut cache = self.mtime_cache.lock().unwrap_or_else(|e| e.into_inner());
            for (path, mtime, _) in &existing {
                cache.insert(path.clone(), *mtime);
            }
        }

        for (path, _, size) in &existing {
            if let Err(e) = self.filter.check_size(path, *size) {
                warn!("Skipping {}", e);
                continue;
            }
            if self.echo.is_suppressed(path) {
                debug!("Skipping {} (written by sync)", path);
                continue;
            }
            let _ = self
                .event_tx
                .send(FileEvent::new(FileEventKind::Created, path.clone()));
        }

        let root = self.root.clone();
        let filter = self.filter.clone();
        let echo = Arc::clone(&self.echo);
        let cache = Arc::clone(&self.mtime_cache);
        let event_tx = self.event_tx.clone();

        let mut debouncer = new_debouncer(DEBOUNCE, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    for event in events {
                        if let Some(file_event) =
                            Self::process_event(&event, &root, &filter, &echo, &cache)
                        {
                            if event_tx.send(file_event).is_err() {
                                // Receiver dropped
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    error!("File watcher error: {}", e);
                }
            }
        })?;

        debouncer
            .watcher()
            .watch(&self.root, RecursiveMode::Recursive)?;
        self.debouncer = Some(debouncer);

        info!("Watching {:?} ({} existing files)", self.root, existing.len());
        Ok(existing.len())
    }

    /// Stop watching. Events already queued stay readable.
    pub fn stop(&mut self) {
        if self.debouncer.take().is_some() {
            info!("Stopped watching {:?}", self.root);
        }
    }

    pub fn is_running(&self) -> bool {
        self.debouncer.is_some()
    }

    /// Get the receiver for file events.
    pub fn event_rx(&mut self) -> &mut mpsc::UnboundedReceiver<FileEvent> {
        &mut self.event_rx
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Classify a single debounced event, returning a FileEvent if it should
    /// be forwarded.
    fn process_event(
        event: &DebouncedEvent,
        root: &Path,
        filter: &WatchFilter,
        echo: &EchoSuppressor,
        mtime_cache: &MtimeCache,
    ) -> Option<FileEvent> {
        let relative = relative_path(root, &event.path)?;

        if let Err(e) = filter.check_path(&relative) {
            debug!("Ignoring {}", e);
            return None;
        }

        let (kind, size) = match std::fs::metadata(&event.path) {
            Ok(metadata) if metadata.is_file() => {
                let mtime = metadata.modified().ok()?;
                let mut cache = mtime_cache.lock().unwrap_or_else(|e| e.into_inner());
                let kind = match cache.insert(relative.clone(), mtime) {
                    None => FileEventKind::Created,
                    Some(last_mtime) if last_mtime == mtime => {
                        // Mtime unchanged - spurious event
                        return None;
                    }
                    Some(_) => FileEventKind::Modified,
                };
                (kind, metadata.len())
            }
            Ok(_) => return None,
            Err(_) => {
                let mut cache = mtime_cache.lock().unwrap_or_else(|e| e.into_inner());
                // Never seen: created and removed within one debounce window
                cache.remove(&relative)?;
                (FileEventKind::Deleted, 0)
            }
        };

        if echo.is_suppressed(&relative) {
            debug!("Suppressed {} event for {} (written by sync)", kind, relative);
            return None;
        }

        if kind != FileEventKind::Deleted {
            if let Err(e) = filter.check_size(&relative, size) {
                warn!("Skipping {}", e);
                return None;
            }
        }

        debug!("File event: {} - {}", kind, relative);
        Some(FileEvent::new(kind, relative))
    }
}

/// `/`-separated path of `path` relative to `root`.
fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let segments: Option<Vec<&str>> = relative
        .components()
        .map(|component| component.as_os_str().to_str())
        .collect();
    let joined = segments?.join("/");
    (!joined.is_empty()).then_some(joined)
}

/// Every qualifying file under `root` with its mtime and size.
fn scan(root: &Path, filter: &WatchFilter) -> Vec<(String, SystemTime, u64)> {
    let mut found = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot read {:?}: {}", dir, e);
                continue;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            let hidden = entry.file_name().to_string_lossy().starts_with('.');

            if metadata.is_dir() {
                if !hidden {
                    pending.push(path);
                }
                continue;
            }

            let Some(relative) = relative_path(root, &path) else {
                continue;
            };
            if !filter.accepts(&relative) {
                continue;
            }
            let mtime = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            found.push((relative, mtime, metadata.len()));
        }
    }

    found.sort_by(|a, b| a.0.cmp(&b.0));
    found
}
