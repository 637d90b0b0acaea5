//! nona-ingest - media ingest service
//!
//! Accepts source references over HTTP, enriches them, downloads the audio
//! and files tagged tracks into `<artist>/<album>/<title>.m4a` under the
//! library directory.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use nona_ingest::config::{CliOverrides, IngestConfig};
use nona_ingest::db::ResponseCache;
use nona_ingest::services::{
    Collaborators, CoverArtService, GeminiEnricher, JobTracker, Library, LoftyTagger,
    ProcessingPipeline, RequestQueue, YtDlp,
};
use nona_ingest::{build_router, AppState};

#[derive(Debug, Parser)]
#[command(version, about = "Media ingest service")]
struct Args {
    /// Path to config.toml (defaults to NONA_CONFIG or ~/.config/nona/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Library directory
    #[arg(long)]
    base_dir: Option<PathBuf>,

    /// Directory holding the SQLite cache
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    #[arg(long)]
    host: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,

    /// Collection members processed concurrently
    #[arg(long)]
    batch_size: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let toml_config = nona_common::config::load_or_default(args.config.as_deref());

    let default_filter = toml_config
        .logging
        .level
        .clone()
        .unwrap_or_else(|| "info".to_string());
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting nona-ingest {}", env!("CARGO_PKG_VERSION"));

    let config = IngestConfig::resolve(
        CliOverrides {
            base_dir: args.base_dir,
            cache_dir: args.cache_dir,
            host: args.host,
            port: args.port,
            batch_size: args.batch_size,
        },
        &toml_config,
    )
    .context("Invalid configuration")?;

    tokio::fs::create_dir_all(&config.base_dir)
        .await
        .with_context(|| format!("Failed to create library directory {}", config.base_dir.display()))?;
    tokio::fs::create_dir_all(&config.cache_dir)
        .await
        .with_context(|| format!("Failed to create cache directory {}", config.cache_dir.display()))?;

    let cache = ResponseCache::open(&config.cache_db_path())
        .await
        .context("Failed to open response cache")?;

    match cache.stop_all_processing_jobs().await {
        Ok(0) => {}
        Ok(count) => warn!(count, "Marked jobs abandoned by a previous run as stopped"),
        Err(e) => error!(error = %e, "Failed to stop abandoned jobs"),
    }

    let tracker = Arc::new(JobTracker::load(cache.clone(), config.max_jobs).await);

    let library = Library::new(&config.base_dir);
    library.cleanup_orphaned_temp_files().await;

    let yt_dlp = Arc::new(YtDlp::default());
    let collaborators = Collaborators {
        resolver: yt_dlp.clone(),
        retriever: yt_dlp,
        enricher: Arc::new(GeminiEnricher::new(
            config.gemini_api_key.clone(),
            config.model_name.clone(),
        )),
        tagger: Arc::new(LoftyTagger::new()),
    };
    let cover_art = CoverArtService::with_default_providers(
        config.discogs_api_key.clone(),
        RequestQueue::new(config.cover_art_interval),
    );

    let pipeline = Arc::new(
        ProcessingPipeline::new(cache.clone(), library, collaborators, cover_art)
            .with_enrich_timeout(config.enrich_timeout),
    );

    let state = AppState::new(cache, tracker, pipeline, config.batch_size);
    let tasks = state.tasks.clone();
    let app = build_router(state);

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind to {}", address))?;
    info!("Listening on http://{}", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .context("Server error")?;

    tasks.abort_all();
    info!("Server shutdown complete");
    Ok(())
}

/// Cancel `token` on Ctrl-C or SIGTERM
async fn wait_for_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
    token.cancel();
}
