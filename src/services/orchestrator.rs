use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_util::task::TaskTracker;

use crate::error::OperationConflict;
use crate::models::{EntryState, FileHandle, RecordSummary, as_percent};
use crate::services::analysis::AnalysisService;
use crate::services::recorder::Recorder;
use crate::services::registry::{Transition, UploadRegistry};

/// Message stored when the backend fails without saying why
pub const GENERIC_FAILURE: &str = "Analysis failed. Please try again.";

/// How a single analysis request ended
#[derive(Debug, Clone, PartialEq)]
pub enum AnalyzeOutcome {
    Completed,
    Failed(String),
    /// The entry was removed while the request was in flight
    Discarded,
}

/// Tally of one `analyze_all` run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub selected: usize,
    pub completed: usize,
    pub failed: usize,
    /// Entries that left `Pending` through another caller before their turn
    pub skipped: usize,
    pub discarded: usize,
}

/// Resets the batch flag however the batch ends
struct BatchGuard<'a>(&'a AtomicBool);

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drives registry entries through the analysis backend, one request at a time
pub struct AnalysisOrchestrator {
    registry: UploadRegistry,
    service: Arc<dyn AnalysisService>,
    recorder: Arc<dyn Recorder>,
    batch_delay: Duration,
    batch_running: AtomicBool,
    records: TaskTracker,
}

impl AnalysisOrchestrator {
    pub fn new(
        registry: UploadRegistry,
        service: Arc<dyn AnalysisService>,
        recorder: Arc<dyn Recorder>,
    ) -> Self {
        Self {
            registry,
            service,
            recorder,
            batch_delay: Duration::ZERO,
            batch_running: AtomicBool::new(false),
            records: TaskTracker::new(),
        }
    }

    /// Pause between consecutive requests of a batch
    pub fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay = delay;
        self
    }

    pub fn registry(&self) -> &UploadRegistry {
        &self.registry
    }

    pub fn is_batch_in_progress(&self) -> bool {
        self.batch_running.load(Ordering::Acquire)
    }

    pub async fn service_healthy(&self) -> bool {
        self.service.health_check().await
    }

    /// Waits for every record published so far to be handed off
    pub async fn flush_records(&self) {
        self.records.close();
        self.records.wait().await;
        self.records.reopen();
    }

    /// Analyzes one entry. `Failed` entries are retried.
    ///
    /// Entries already `Analyzing` or `Completed` are refused without
    /// contacting the backend.
    pub async fn analyze_one(&self, id: &str) -> Result<AnalyzeOutcome, OperationConflict> {
        let claim = self.registry.claim(id, true).await.inspect_err(|e| {
            tracing::warn!("Analysis request refused: {}", e);
        })?;

        if claim.retry {
            tracing::info!("🔁 Retrying analysis of {} ({})", claim.file.name, id);
        }
        Ok(self.run(id, claim.file).await)
    }

    /// Analyzes every entry that is `Pending` at the time of the call,
    /// strictly one after another.
    ///
    /// A failing entry does not stop the batch; its failure is visible only
    /// through the entry's state.
    pub async fn analyze_all(&self) -> Result<BatchReport, OperationConflict> {
        if self
            .batch_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!("Batch analysis refused: another batch is running");
            return Err(OperationConflict::BatchInProgress);
        }
        let _guard = BatchGuard(&self.batch_running);

        let selection: Vec<String> = self
            .registry
            .list_pending()
            .await
            .into_iter()
            .map(|entry| entry.id)
            .collect();

        if selection.is_empty() {
            tracing::info!("No pending images to analyze");
            return Err(OperationConflict::NothingPending);
        }

        tracing::info!("🚀 Starting batch analysis of {} images", selection.len());
        let mut report = BatchReport {
            selected: selection.len(),
            ..BatchReport::default()
        };

        for (i, id) in selection.iter().enumerate() {
            if i > 0 && !self.batch_delay.is_zero() {
                tokio::time::sleep(self.batch_delay).await;
            }

            // Only entries still pending are picked up; a failed one is not
            // silently retried by the batch
            let claim = match self.registry.claim(id, false).await {
                Ok(claim) => claim,
                Err(e) => {
                    tracing::debug!("Skipping {} in batch: {}", id, e);
                    report.skipped += 1;
                    continue;
                }
            };

            match self.run(id, claim.file).await {
                AnalyzeOutcome::Completed => report.completed += 1,
                AnalyzeOutcome::Failed(_) => report.failed += 1,
                AnalyzeOutcome::Discarded => report.discarded += 1,
            }
        }

        tracing::info!(
            "✅ Batch analysis finished: {} completed, {} failed, {} skipped, {} discarded",
            report.completed,
            report.failed,
            report.skipped,
            report.discarded
        );
        Ok(report)
    }

    /// Submits a claimed entry and writes the resolution back
    async fn run(&self, id: &str, file: FileHandle) -> AnalyzeOutcome {
        tracing::info!("🔍 Analyzing {} ({} bytes)", file.name, file.size);

        let resolution = match self.service.submit(&file).await {
            Ok(response) => response
                .into_result()
                .map_err(|error| error.unwrap_or_else(|| GENERIC_FAILURE.to_string())),
            Err(e) => {
                tracing::error!("Analysis request for {} failed: {:#}", file.name, e);
                Err(e.to_string())
            }
        };

        match resolution {
            Ok(result) => {
                let summary = RecordSummary::from_result(&file.name, &result);
                match self.registry.update_state(id, EntryState::Completed(result)).await {
                    Transition::Applied => {
                        tracing::info!(
                            "✅ {}: {} (confidence {})",
                            file.name,
                            summary.stage_name.as_deref().unwrap_or("result received"),
                            summary
                                .confidence
                                .map(|c| format!("{:.1}%", as_percent(c)))
                                .unwrap_or_else(|| "n/a".to_string())
                        );
                        self.publish(summary);
                        AnalyzeOutcome::Completed
                    }
                    _ => AnalyzeOutcome::Discarded,
                }
            }
            Err(message) => {
                match self
                    .registry
                    .update_state(id, EntryState::Failed(message.clone()))
                    .await
                {
                    Transition::Applied => {
                        tracing::warn!("❌ Analysis of {} failed: {}", file.name, message);
                        AnalyzeOutcome::Failed(message)
                    }
                    _ => AnalyzeOutcome::Discarded,
                }
            }
        }
    }

    /// Hands the summary to the recorder without waiting for it
    fn publish(&self, summary: RecordSummary) {
        let recorder = Arc::clone(&self.recorder);
        self.records.spawn(async move {
            let file_name = summary.file_name.clone();
            if let Err(e) = recorder.record(summary).await {
                tracing::warn!("Failed to record screening for {}: {}", file_name, e);
            }
        });
    }
}
