//! Local user identity, persisted across runs.
//!
//! The identity is created once per machine account and stored as JSON. The
//! display name is what the engine records as author on uploads.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const IDENTITY_FILE: &str = ".docsync-identity.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

impl Identity {
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            user_id: uuid::Uuid::new_v4().to_string(),
            display_name: display_name.into(),
            created_at: Utc::now(),
        }
    }

    /// `~/.docsync-identity.json`, or the working directory when there is no
    /// home directory.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(IDENTITY_FILE)
    }

    /// Load the identity at `path`, creating it when missing or unreadable.
    ///
    /// A configured display name wins over the stored one and is written
    /// back.
    pub fn load_or_create(path: &Path, configured_name: Option<&str>) -> Result<Self> {
        let existing = match std::fs::read_to_string(path) {
            Ok(data) => match serde_json::from_str::<Identity>(&data) {
                Ok(identity) => Some(identity),
                Err(e) => {
                    warn!("Could not parse identity at {:?}, creating a new one: {}", path, e);
                    None
                }
            },
            Err(_) => None,
        };

        let (mut identity, dirty) = match existing {
            Some(identity) => {
                info!("Welcome back, {}", identity.display_name);
                (identity, false)
            }
            None => {
                let identity = Identity::new(resolve_display_name(configured_name, |key| {
                    std::env::var(key).ok()
                }));
                info!("Created identity for {} ({})", identity.display_name, identity.user_id);
                (identity, true)
            }
        };

        let renamed = match configured_name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) if name != identity.display_name => {
                identity.display_name = name.to_string();
                true
            }
            _ => false,
        };

        if dirty || renamed {
            identity.save(path)?;
        }
        Ok(identity)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write identity to {:?}", path))
    }
}

/// Configured name, then the login name, then "Anonymous".
pub fn resolve_display_name<F>(configured: Option<&str>, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    configured
        .map(str::to_string)
        .or_else(|| lookup("USER"))
        .or_else(|| lookup("USERNAME"))
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "Anonymous".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_display_name_resolution_order() {
        let env = |key: &str| match key {
            "USER" => Some("jdoe".to_string()),
            _ => None,
        };
        assert_eq!(resolve_display_name(Some("Jane"), env), "Jane");
        assert_eq!(resolve_display_name(None, env), "jdoe");
        assert_eq!(resolve_display_name(None, |_| None), "Anonymous");
        assert_eq!(
            resolve_display_name(None, |key| (key == "USERNAME").then(|| "win".to_string())),
            "win"
        );
    }

    #[test]
    fn test_identity_persists_between_loads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(IDENTITY_FILE);

        let first = Identity::load_or_create(&path, Some("Alice")).unwrap();
        let second = Identity::load_or_create(&path, None).unwrap();

        assert_eq!(first, second);
        assert_eq!(second.display_name, "Alice");
    }

    #[test]
    fn test_configured_name_overrides_stored_name() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(IDENTITY_FILE);

        let first = Identity::load_or_create(&path, Some("Alice")).unwrap();
        let renamed = Identity::load_or_create(&path, Some("Alice B.")).unwrap();

        assert_eq!(renamed.user_id, first.user_id);
        assert_eq!(renamed.display_name, "Alice B.");
    }

    #[test]
    fn test_corrupt_identity_is_replaced() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(IDENTITY_FILE);
        std::fs::write(&path, "not json").unwrap();

        let identity = Identity::load_or_create(&path, Some("Bob")).unwrap();
        assert_eq!(identity.display_name, "Bob");
        assert!(std::fs::read_to_string(&path).unwrap().contains("\"user_id\""));
    }
}
