mod cli;

use clap::Parser;
use cli::{BatchArgs, Cli, Commands, SegmentedArgs};
use parafetch::batch::{BatchDownloader, BatchSummary, jobs_from_provider};
use parafetch::config::{Config, resolve_path};
use parafetch::locator::{StaticUrlProvider, is_valid_url};
use parafetch::observability::Metrics;
use parafetch::paths::{file_name_from_url, validate_directory};
use parafetch::progress::{BarProgress, BarProgressFactory};
use parafetch::segmented::SegmentedDownloader;
use parafetch::transport::{HttpClient, Transport};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    // After loading, so a PARAFETCH_CONFIG from .env is honoured
    let config_path = resolve_path(cli.config.as_deref());

    // The filter comes from the config, so loading cannot log through tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if config_path.exists() {
        info!(path = %config_path.display(), "Configuration loaded");
    } else {
        info!(
            path = %config_path.display(),
            "Configuration file not found, using defaults and environment overrides"
        );
    }

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    let transport: Arc<dyn Transport> = Arc::new(HttpClient::new(config.http.to_http_config())?);
    let metrics = Arc::new(Metrics::new());

    let result = match cli.command {
        Commands::Batch(args) => run_batch(args, &config, transport, metrics.clone(), &cancel).await,
        Commands::Segmented(args) => {
            run_segmented(args, &config, transport, metrics.clone(), &cancel).await
        }
    };

    let snapshot = metrics.snapshot();
    info!(
        succeeded = snapshot.jobs_succeeded,
        skipped = snapshot.jobs_skipped,
        failed = snapshot.jobs_failed,
        failed_segments = snapshot.segments_failed,
        bytes = snapshot.bytes_written,
        "Run finished"
    );

    result
}

async fn run_batch(
    args: BatchArgs,
    config: &Config,
    transport: Arc<dyn Transport>,
    metrics: Arc<Metrics>,
    cancel: &CancellationToken,
) -> Result<(), BoxError> {
    let dir = args.dir.unwrap_or_else(|| config.download.dir.clone());
    validate_directory(&dir).await?;

    let jobs = jobs_from_provider(&StaticUrlProvider::new(args.urls), &dir);
    if jobs.is_empty() {
        return Err("no valid URLs to download".into());
    }

    let requested = args
        .threads
        .map_or(config.download.threads, |t| usize::try_from(t).unwrap_or(usize::MAX));
    let threads = if jobs.len() < requested {
        warn!(
            threads = requested,
            urls = jobs.len(),
            "More threads than URLs, lowering thread count"
        );
        jobs.len()
    } else {
        requested
    };

    let outcomes = BatchDownloader::new(transport)
        .with_progress(Arc::new(BarProgressFactory::new()))
        .with_metrics(metrics)
        .with_buffer_size(config.download.buffer_size.as_usize())
        .download_many(jobs, threads, cancel)
        .await;

    for outcome in &outcomes {
        if let Some(e) = &outcome.error {
            error!(url = %outcome.job.url, error = %e, "Download failed");
        }
    }

    let summary = BatchSummary::from_outcomes(&outcomes);
    if summary.failed > 0 {
        return Err(format!("{} of {} downloads failed", summary.failed, outcomes.len()).into());
    }
    Ok(())
}

async fn run_segmented(
    args: SegmentedArgs,
    config: &Config,
    transport: Arc<dyn Transport>,
    metrics: Arc<Metrics>,
    cancel: &CancellationToken,
) -> Result<(), BoxError> {
    if !is_valid_url(&args.url) {
        return Err(format!("invalid URL: {}", args.url).into());
    }

    let dir = args.dir.unwrap_or_else(|| config.download.dir.clone());
    validate_directory(&dir).await?;

    let name = args.output.unwrap_or_else(|| file_name_from_url(&args.url));
    let destination = dir.join(&name);
    let segments = args.segments.unwrap_or(config.download.segments);

    let report = SegmentedDownloader::new(transport)
        .with_progress(Arc::new(BarProgress::new(name)))
        .with_metrics(metrics)
        .with_buffer_size(config.download.buffer_size.as_usize())
        .download(&args.url, &destination, segments, cancel)
        .await?;

    info!(
        destination = %report.destination.display(),
        segments = report.segments.len(),
        "Saved"
    );
    Ok(())
}

/// Cancel `cancel` on Ctrl+C or SIGTERM
async fn cancel_on_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    warn!("Interrupt received, cancelling downloads that have not started");
    cancel.cancel();
}
