use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use url::Url;

use chunklift::config::UploadOptions;
use chunklift::coordinator::UploadEngine;
use chunklift::provider::{ControlPlaneClient, ProviderKind};
use chunklift::session::SessionStatus;
use chunklift::source::FileSource;

#[derive(Parser)]
#[command(
    name = "chunklift",
    version,
    about = "Parallel chunked uploads to cloud object stores"
)]
struct Cli {
    /// File to upload
    file: PathBuf,

    /// Base URL of the upload control plane
    #[arg(long)]
    api_base: Url,

    /// Storage backend: s3, google_drive or gcs
    #[arg(long, default_value = "s3", value_parser = parse_provider)]
    provider: ProviderKind,

    /// Chunk size: 256K, 512K, 1M, 2M, 4M, 8M or 16M
    #[arg(long, default_value = "1M", value_parser = parse_chunk_size)]
    chunk_size: u64,

    /// Concurrent chunk transfers (1-8)
    #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(u8).range(1..=8))]
    concurrency: u8,

    /// Adapt the chunk size to observed network conditions
    #[arg(long)]
    auto_tune: bool,

    /// MIME type reported to the provider
    #[arg(long)]
    mime_type: Option<String>,

    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn parse_provider(raw: &str) -> Result<ProviderKind, String> {
    match raw {
        "s3" => Ok(ProviderKind::S3),
        "google_drive" | "googledrive" | "drive" => Ok(ProviderKind::GoogleDrive),
        "gcs" => Ok(ProviderKind::Gcs),
        other => Err(format!("unknown provider '{other}' (expected s3, google_drive or gcs)")),
    }
}

fn parse_chunk_size(raw: &str) -> Result<u64, String> {
    let raw = raw.trim().to_ascii_uppercase();
    let (number, multiplier) = if let Some(n) = raw.strip_suffix('K') {
        (n, 1024u64)
    } else if let Some(n) = raw.strip_suffix('M') {
        (n, 1024 * 1024)
    } else {
        (raw.as_str(), 1)
    };
    let value: u64 = number
        .parse()
        .map_err(|_| format!("cannot parse chunk size '{raw}'"))?;
    let bytes = value * multiplier;
    if !bytes.is_power_of_two() || !(256 * 1024..=16 * 1024 * 1024).contains(&bytes) {
        return Err(format!(
            "chunk size must be a power of two between 256K and 16M, got {raw}"
        ));
    }
    Ok(bytes)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "chunklift=info",
        1 => "chunklift=debug",
        _ => "chunklift=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let filename = cli
        .file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or("path has no file name")?;
    let source = Arc::new(FileSource::open(&cli.file)?);

    let mut options = UploadOptions::new(cli.provider);
    options.chunk_size = cli.chunk_size;
    options.concurrency = cli.concurrency as usize;
    options.auto_tune = cli.auto_tune;
    options.mime_type = cli.mime_type.clone();

    let engine = UploadEngine::new(ControlPlaneClient::new(cli.api_base.clone()));
    let session_id = engine.start(source, filename, options)?;
    let mut progress = engine.subscribe(&session_id)?;

    loop {
        tokio::select! {
            changed = progress.changed() => {
                if changed.is_err() {
                    break;
                }
                let snap = progress.borrow().clone();
                println!(
                    "[{:>6.2}%] {}/{} chunks, {:.0} KiB/s, ETA {}",
                    snap.progress_percent,
                    snap.completed_chunks,
                    snap.total_chunks,
                    snap.speed_bps / 1024.0,
                    snap.eta
                );
                if snap.status.is_terminal() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("interrupted, cancelling upload...");
                engine.cancel(&session_id).await.ok();
            }
        }
    }

    let snap = engine.progress(&session_id)?;
    match snap.status {
        SessionStatus::Completed => {
            println!("uploaded: {}", snap.final_location.as_deref().unwrap_or("(no URL)"));
            Ok(())
        }
        SessionStatus::Cancelled => Err("upload cancelled".into()),
        _ => {
            let reason = snap
                .error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".into());
            Err(format!("upload failed: {reason}").into())
        }
    }
}
