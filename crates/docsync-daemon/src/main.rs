//! docsync: keeps a local folder of team documents in sync with a shared
//! remote store.

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use docsync_core::{EchoSuppressor, EngineSettings, RemoteStore, SyncEngine};
use docsync_daemon::config;
use docsync_daemon::identity::{self, Identity};
use docsync_daemon::{Config, Daemon, FileWatcher, HostedStore, NativeFs};

#[derive(Parser, Debug)]
#[command(name = "docsync")]
#[command(about = "Bidirectional team folder sync")]
struct Cli {
    /// Enable verbose logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch the folder and sync both ways (default)
    Start(StartArgs),
    /// Verify the remote store is reachable and list the workspace
    Check,
}

#[derive(Args, Debug, Default)]
struct StartArgs {
    /// Folder to sync (overrides WATCH_FOLDER)
    #[arg(short, long)]
    watch: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load .env before logging so RUST_LOG from the file applies
    let env_file = dotenvy::dotenv();

    let directives = config::log_directives(cli.verbose, |key| std::env::var(key).ok());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(directives))
        .init();

    match env_file {
        Ok(path) => info!("Loaded environment from {:?}", path),
        Err(e) if e.not_found() => {}
        Err(e) => warn!("Could not load .env: {}", e),
    }

    let mut config = Config::from_env().context("Invalid configuration")?;

    match cli.command.unwrap_or(Command::Start(StartArgs::default())) {
        Command::Start(args) => {
            if let Some(watch) = args.watch {
                config.watch_folder = watch;
            }
            start(config).await
        }
        Command::Check => check(config).await,
    }
}

async fn start(config: Config) -> Result<()> {
    info!("Starting docsync");
    info!("Watch folder: {:?}", config.watch_folder);
    info!("Allowed extensions: {}", config.allowed_extensions.join(", "));

    let identity_path = Identity::default_path();
    let user = match Identity::load_or_create(&identity_path, config.user_display_name.as_deref()) {
        Ok(identity) => identity.display_name,
        Err(e) => {
            warn!("Identity unavailable ({}), continuing without saving one", e);
            identity::resolve_display_name(config.user_display_name.as_deref(), |key| {
                std::env::var(key).ok()
            })
        }
    };

    if !config.watch_folder.exists() {
        std::fs::create_dir_all(&config.watch_folder)
            .with_context(|| format!("Failed to create {:?}", config.watch_folder))?;
        info!("Created watch folder {:?}", config.watch_folder);
    }

    let echo = Arc::new(EchoSuppressor::new(config.echo_grace));
    let settings = EngineSettings {
        user,
        filter: config.watch_filter(),
    };

    let watcher = FileWatcher::new(
        config.watch_folder.clone(),
        config.watch_filter(),
        Arc::clone(&echo),
    )
    .context("Cannot watch folder")?;

    let fs = NativeFs::new(watcher.root().to_path_buf());
    let mut engine: SyncEngine<NativeFs, HostedStore> = SyncEngine::new(fs, echo, settings);
    if let (Some(remote), Some(workspace_id)) =
        (config.remote.clone(), config.workspace_id.clone())
    {
        info!("Remote store: {} (bucket {})", remote.url, remote.bucket);
        engine = engine.with_remote(HostedStore::new(remote), workspace_id);
    }

    Daemon::new(Arc::new(engine), watcher)
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    info!("Shutting down");
    Ok(())
}

async fn check(config: Config) -> Result<()> {
    let (Some(remote), Some(workspace_id)) = (config.remote, config.workspace_id) else {
        bail!(
            "DOCSYNC_URL, DOCSYNC_ANON_KEY and WORKSPACE_ID must be set to check the remote store"
        );
    };

    info!("Checking {} for workspace {}", remote.url, workspace_id);
    let store = HostedStore::new(remote);
    let documents = store
        .list_records(&workspace_id)
        .await
        .context("Remote store is not reachable")?;

    info!("Remote store reachable: {} document(s) in workspace", documents.len());
    for summary in documents.iter().take(10) {
        info!("  {} (updated {})", summary.path(), summary.updated_at.to_rfc3339());
    }
    Ok(())
}
