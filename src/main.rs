use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;
use screening_upload::ScreeningSession;
use screening_upload::config::IntakeConfig;
use screening_upload::error::OperationConflict;
use screening_upload::models::{EntryState, FileHandle};
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Screen retinal images against the analysis backend
#[derive(Parser, Debug)]
#[command(name = "screening-upload", version)]
struct Cli {
    /// Image files to analyze (JPEG, PNG or WebP)
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Base URL of the analysis backend (overrides ANALYSIS_BASE_URL)
    #[arg(long)]
    base_url: Option<String>,

    /// Append screening records to this JSON-lines file
    #[arg(long)]
    history: Option<PathBuf>,

    /// Print results as JSON instead of text
    #[arg(long)]
    json: bool,
}

fn mime_from_extension(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

async fn read_file(path: &Path) -> anyhow::Result<FileHandle> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(FileHandle::new(name, mime_from_extension(path), bytes))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    // Initialize tracing with EnvFilter
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "screening_upload=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = IntakeConfig::from_env();
    if let Some(base_url) = cli.base_url {
        config.analysis_base_url = base_url;
    }
    if let Some(history) = cli.history {
        config.recorder_type = "jsonl".to_string();
        config.history_path = history;
    }

    info!(
        "🩺 Analysis backend: {} ({}), max size {}MB",
        config.analysis_base_url,
        config.analysis_service_type,
        config.max_file_size / 1024 / 1024
    );

    let session = ScreeningSession::from_config(config)?;

    let mut files = Vec::with_capacity(cli.files.len());
    for path in &cli.files {
        match read_file(path).await {
            Ok(file) => files.push(file),
            Err(e) => error!("{:#}", e),
        }
    }

    let report = session.intake.accept_all(files, &session.registry).await;
    if report.accepted.is_empty() {
        anyhow::bail!("No valid images to analyze");
    }

    if !session.orchestrator.service_healthy().await {
        warn!("⚠️  Analysis backend health check failed; requests will likely fail");
    }

    match session.orchestrator.analyze_all().await {
        Ok(batch) => info!(
            "Batch done: {}/{} completed",
            batch.completed, batch.selected
        ),
        Err(OperationConflict::NothingPending) => info!("Nothing to analyze"),
        Err(e) => warn!("Batch refused: {}", e),
    }

    let entries = session.registry.list().await;
    if cli.json {
        let out: Vec<_> = entries
            .iter()
            .map(|e| json!({ "id": e.id, "file": e.file.name, "state": e.state }))
            .chain(report.rejected.iter().map(|(name, err)| {
                json!({ "file": name, "rejected": { "code": err.code(), "message": err.to_string() } })
            }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        for entry in &entries {
            match &entry.state {
                EntryState::Completed(result) => println!(
                    "{}\tstage {} ({})\tconfidence {}\trisk {}",
                    entry.file.name,
                    result.stage.map(|s| s.to_string()).unwrap_or_else(|| "?".into()),
                    result.stage_name.as_deref().unwrap_or("unknown"),
                    result
                        .confidence_percent()
                        .map(|c| format!("{:.1}%", c))
                        .unwrap_or_else(|| "n/a".into()),
                    result.risk_level.as_deref().unwrap_or("unknown")
                ),
                EntryState::Failed(message) => println!("{}\tfailed: {}", entry.file.name, message),
                other => println!("{}\t{}", entry.file.name, other.kind()),
            }
        }
        for (name, err) in &report.rejected {
            println!("{}\trejected: {}", name, err);
        }
    }

    session.orchestrator.flush_records().await;
    info!("🛑 Done.");
    Ok(())
}
