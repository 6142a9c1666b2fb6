use anyhow::{Result, anyhow};
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::config::IntakeConfig;
use crate::models::RecordSummary;

/// Sink for screening-history records
#[async_trait::async_trait]
pub trait Recorder: Send + Sync {
    async fn record(&self, summary: RecordSummary) -> Result<()>;
}

/// Writes each record to the log
pub struct TracingRecorder;

#[async_trait::async_trait]
impl Recorder for TracingRecorder {
    async fn record(&self, summary: RecordSummary) -> Result<()> {
        tracing::info!(
            stage = ?summary.stage,
            confidence = ?summary.confidence,
            risk_level = ?summary.risk_level,
            file = %summary.file_name,
            "📝 Screening recorded: {}",
            summary.stage_name.as_deref().unwrap_or("unknown stage")
        );
        Ok(())
    }
}

/// Appends one JSON document per line to a history file
pub struct JsonlRecorder {
    path: PathBuf,
    // Serializes appends so lines from concurrent records never interleave
    write_lock: Mutex<()>,
}

impl JsonlRecorder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads back every record in the history file
    pub async fn load(&self) -> Result<Vec<RecordSummary>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .enumerate()
            .map(|(i, line)| {
                serde_json::from_str(line)
                    .map_err(|e| anyhow!("Corrupt history line {}: {}", i + 1, e))
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl Recorder for JsonlRecorder {
    async fn record(&self, summary: RecordSummary) -> Result<()> {
        let mut line = serde_json::to_string(&summary)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| anyhow!("Failed to open history file {}: {}", self.path.display(), e))?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        tracing::debug!("Appended screening record to {}", self.path.display());
        Ok(())
    }
}

/// Factory function to create the recorder selected by config
pub fn create_recorder(config: &IntakeConfig) -> Box<dyn Recorder> {
    match config.recorder_type.to_lowercase().as_str() {
        "jsonl" | "file" => Box::new(JsonlRecorder::new(config.history_path.clone())),
        "tracing" | "log" => Box::new(TracingRecorder),
        other => {
            tracing::warn!("Unknown recorder type '{}', using TracingRecorder", other);
            Box::new(TracingRecorder)
        }
    }
}
