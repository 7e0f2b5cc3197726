use std::path::PathBuf;
use std::time::Duration;

use docsync_core::WatchFilter;

pub const DEFAULT_WATCH_FOLDER: &str = "./team-docs";
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;
pub const DEFAULT_ALLOWED_EXTENSIONS: &str = ".md,.txt";
pub const DEFAULT_BUCKET: &str = "docsync-files";
pub const DEFAULT_ECHO_GRACE_MS: u64 = 3000;

/// Connection settings for the hosted remote store.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Base URL, e.g. `https://project.example.co`
    pub url: String,
    /// Public API key sent as `apikey` and bearer token
    pub anon_key: String,
    /// Object storage bucket holding document blobs
    pub bucket: String,
}

/// Daemon configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub watch_folder: PathBuf,
    pub max_file_size: u64,
    /// Lower-cased, each with a leading dot
    pub allowed_extensions: Vec<String>,
    /// `None` runs in local-only mode
    pub workspace_id: Option<String>,
    pub user_display_name: Option<String>,
    pub remote: Option<RemoteConfig>,
    pub echo_grace: Duration,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// Environment variables:
    /// - `DOCSYNC_URL`, `DOCSYNC_ANON_KEY`: remote store (both or neither)
    /// - `WATCH_FOLDER`: folder to sync (default `./team-docs`, supports ~)
    /// - `MAX_FILE_SIZE`: byte ceiling (default 10 MiB)
    /// - `ALLOWED_EXTENSIONS`: comma-separated (default `.md,.txt`)
    /// - `WORKSPACE_ID`: omit for local-only mode
    /// - `USER_DISPLAY_NAME`: author recorded on uploads
    /// - `DOCSYNC_BUCKET`: storage bucket (default `docsync-files`)
    /// - `ECHO_GRACE_MS`: echo suppression window (default 3000)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let watch_folder = expand_tilde(
            var("WATCH_FOLDER")
                .as_deref()
                .unwrap_or(DEFAULT_WATCH_FOLDER),
        );

        let max_file_size = match var("MAX_FILE_SIZE") {
            Some(raw) => raw
                .parse()
                .map_err(|_| ConfigError::Invalid("MAX_FILE_SIZE", raw))?,
            None => DEFAULT_MAX_FILE_SIZE,
        };

        let extensions =
            var("ALLOWED_EXTENSIONS").unwrap_or_else(|| DEFAULT_ALLOWED_EXTENSIONS.into());
        let allowed_extensions = WatchFilter::new(extensions.split(','), max_file_size)
            .allowed_extensions()
            .to_vec();
        if allowed_extensions.is_empty() {
            return Err(ConfigError::Invalid("ALLOWED_EXTENSIONS", extensions));
        }

        let echo_grace = match var("ECHO_GRACE_MS") {
            Some(raw) => Duration::from_millis(
                raw.parse()
                    .map_err(|_| ConfigError::Invalid("ECHO_GRACE_MS", raw))?,
            ),
            None => Duration::from_millis(DEFAULT_ECHO_GRACE_MS),
        };

        let remote = match (var("DOCSYNC_URL"), var("DOCSYNC_ANON_KEY")) {
            (Some(url), Some(anon_key)) => Some(RemoteConfig {
                url: url.trim_end_matches('/').to_string(),
                anon_key,
                bucket: var("DOCSYNC_BUCKET").unwrap_or_else(|| DEFAULT_BUCKET.into()),
            }),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::Missing("DOCSYNC_ANON_KEY")),
            (None, Some(_)) => return Err(ConfigError::Missing("DOCSYNC_URL")),
        };

        let workspace_id = var("WORKSPACE_ID");
        if workspace_id.is_some() && remote.is_none() {
            return Err(ConfigError::Missing("DOCSYNC_URL"));
        }

        Ok(Self {
            watch_folder,
            max_file_size,
            allowed_extensions,
            workspace_id,
            user_display_name: var("USER_DISPLAY_NAME"),
            remote,
            echo_grace,
        })
    }

    pub fn watch_filter(&self) -> WatchFilter {
        WatchFilter::new(&self.allowed_extensions, self.max_file_size)
    }

    pub fn is_local_only(&self) -> bool {
        self.workspace_id.is_none()
    }
}

/// Expand ~ or ~/ prefix to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"))
    } else if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path))
    } else {
        PathBuf::from(path)
    }
}

/// Tracing directives: `RUST_LOG` when set, otherwise info (debug with `verbose`).
///
/// Call after `.env` is loaded so a `RUST_LOG` from the file takes effect.
pub fn log_directives(verbose: bool, lookup: impl Fn(&str) -> Option<String>) -> String {
    match lookup("RUST_LOG").filter(|value| !value.trim().is_empty()) {
        Some(directives) => directives,
        None if verbose => "debug,docsync_daemon=debug,docsync_core=debug".into(),
        None => "info,docsync_daemon=info".into(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable not set")]
    Missing(&'static str),

    #[error("Invalid value for {0}: {1:?}")]
    Invalid(&'static str, String),
}
