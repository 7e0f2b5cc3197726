//! docsync-daemon library: the native pieces of the sync daemon.
//!
//! This is a thin library layer over the daemon components,
//! allowing integration tests to drive them directly.

pub mod config;
pub mod daemon;
pub mod hosted;
pub mod identity;
pub mod native_fs;
pub mod ordered;
pub mod realtime;
pub mod watcher;

// Re-export key types for convenience
pub use config::{Config, ConfigError, RemoteConfig};
pub use daemon::Daemon;
pub use hosted::HostedStore;
pub use identity::Identity;
pub use native_fs::NativeFs;
pub use ordered::OrderedExecutor;
pub use watcher::FileWatcher;
