use anyhow::{Context, Result};
use clap::Parser;
use multirag::pipeline::{RagService, Upload};
use multirag::{api, config, logging};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use walkdir::WalkDir;

const PRELOAD_EXTENSIONS: &[&str] = &["txt", "md", "docx", "png", "jpg", "jpeg", "pdf"];

#[derive(Parser)]
#[command(
    name = "multirag",
    about = "Index text, images, and PDFs, then answer questions with citations over HTTP"
)]
struct Cli {
    /// Port to listen on (overrides `SERVER_PORT`; otherwise the first free port in 4100-4199).
    #[arg(long)]
    port: Option<u16>,
    /// Directory holding the index snapshot (overrides `INDEX_SNAPSHOT_DIR`).
    #[arg(long)]
    snapshot_dir: Option<PathBuf>,
    /// Ingest every supported file under this directory before serving.
    #[arg(long)]
    preload: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    config::init_config();
    logging::init_tracing();
    if let Err(err) = run(Cli::parse()).await {
        tracing::error!(error = %format!("{err:#}"), "Server exited with error");
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut settings = config::get_config().clone();
    if let Some(port) = cli.port {
        settings.server_port = Some(port);
    }
    if let Some(dir) = cli.snapshot_dir {
        settings.index_snapshot_dir = Some(dir);
    }

    let service = RagService::from_config(&settings).context("Failed to build retrieval engine")?;
    if let Some(dir) = cli.preload.as_deref() {
        preload(&service, dir).await?;
    }

    let app = api::create_router(Arc::new(service));
    let (listener, port) = bind_listener(settings.server_port)
        .await
        .context("Failed to bind listener")?;
    tracing::info!("Listening on http://0.0.0.0:{}", port);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;
    Ok(())
}

async fn preload(service: &RagService, dir: &Path) -> Result<()> {
    let mut ingested = 0usize;
    for entry in WalkDir::new(dir).follow_links(true) {
        let entry = entry.with_context(|| format!("Failed to walk {}", dir.display()))?;
        if !entry.file_type().is_file() || !is_supported(entry.path()) {
            continue;
        }
        let path = entry.path();
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if bytes.is_empty() {
            tracing::warn!(path = %path.display(), "Skipping empty file");
            continue;
        }
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let report = service
            .ingest(Upload::new(bytes, filename))
            .await
            .with_context(|| format!("Failed to ingest {}", path.display()))?;
        tracing::info!(
            path = %path.display(),
            indexed = report.indexed,
            skipped = report.skipped.len(),
            "Preloaded document"
        );
        ingested += 1;
    }
    tracing::info!(dir = %dir.display(), documents = ingested, "Preload complete");
    Ok(())
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| PRELOAD_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("Shutdown signal received");
    }
}

async fn bind_listener(port: Option<u16>) -> Result<(TcpListener, u16), std::io::Error> {
    use std::net::Ipv4Addr;

    if let Some(port) = port {
        return TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map(|listener| (listener, port));
    }

    const PORT_RANGE: std::ops::RangeInclusive<u16> = 4100..=4199;
    for port in PORT_RANGE {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => {
                tracing::debug!(port, "Bound server port");
                return Ok((listener, port));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port already in use; trying next");
                continue;
            }
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        "No available port found in range 4100-4199",
    ))
}
