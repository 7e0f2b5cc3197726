//! docsync-core: Shared Rust library for keeping a local folder of text
//! documents in sync with a team's remote document store.
//!
//! This crate provides the core functionality for:
//! - Document model, watch filtering and storage key derivation
//! - Echo suppression for writes the engine applies locally
//! - Provenance annotation (who created/edited a document, and what changed)
//! - Remote store abstraction and the sync client built on it
//! - Startup reconciliation, remote change dispatch and the local upload path
//! - FileSystem and RemoteStore trait abstractions with in-memory doubles

pub mod annotate;
pub mod client;
pub mod dispatch;
pub mod document;
pub mod echo;
pub mod engine;
pub mod events;
pub mod fs;
pub mod memory_store;
pub mod notification;
pub mod reconcile;
pub mod remote;
pub mod status;
pub mod upload;

pub use client::SyncClient;
pub use dispatch::DispatchOutcome;
pub use document::{Document, DocumentRecord, RecordSummary, ValidationError, WatchFilter};
pub use echo::EchoSuppressor;
pub use engine::{EngineSettings, SyncEngine};
pub use events::{FileEvent, FileEventKind};
pub use fs::{FileStat, FileSystem, FsError, InMemoryFs};
pub use memory_store::InMemoryStore;
pub use notification::{ChangeKind, ChangeNotification};
pub use reconcile::ReconcileReport;
pub use remote::{NotificationStream, RemoteStore, StoreError};
pub use status::{StatusSnapshot, SyncStatus};
pub use upload::UploadOutcome;
