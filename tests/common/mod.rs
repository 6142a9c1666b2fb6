#![allow(dead_code)]

use anyhow::{Result, anyhow};
use screening_upload::config::IntakeConfig;
use screening_upload::models::{AnalysisResponse, AnalysisResult, FileHandle, RecordSummary};
use screening_upload::services::analysis::AnalysisService;
use screening_upload::services::intake::FileIntake;
use screening_upload::services::recorder::Recorder;
use screening_upload::services::registry::UploadRegistry;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};

pub const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46, 0x49, 0x46];
pub const PNG_MAGIC: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

fn padded(magic: &[u8], size: usize) -> Vec<u8> {
    let mut bytes = magic.to_vec();
    bytes.resize(size.max(magic.len()), 0);
    bytes
}

pub fn jpeg_file(name: &str, size: usize) -> FileHandle {
    FileHandle::new(name, "image/jpeg", padded(JPEG_MAGIC, size))
}

pub fn png_file(name: &str, size: usize) -> FileHandle {
    FileHandle::new(name, "image/png", padded(PNG_MAGIC, size))
}

pub fn sample_result(stage: u8, stage_name: &str) -> AnalysisResult {
    serde_json::from_value(serde_json::json!({
        "stage": stage,
        "confidence": 0.86,
        "riskLevel": "moderate",
        "stageName": stage_name,
        "recommendations": ["Ophthalmology referral within 6-12 months"],
        "analysisFactors": ["hemorrhage_density: +2"],
        "riskScore": 2,
        "imageQuality": {"resolution": "1024x1024", "qualityScore": 0.91}
    }))
    .unwrap()
}

/// Registers one small JPEG per name and returns the ids in order
pub async fn register_jpegs(registry: &UploadRegistry, names: &[&str]) -> Vec<String> {
    let intake = FileIntake::new(IntakeConfig::default());
    let files = names.iter().map(|n| jpeg_file(n, 2048)).collect();
    let report = intake.accept_all(files, registry).await;
    assert_eq!(report.accepted.len(), names.len());
    report.accepted
}

/// Answers per file name: listed names fail, everything else succeeds.
/// Logs call boundaries and tracks how many calls overlap.
#[derive(Default)]
pub struct ScriptedService {
    pub failing: Vec<String>,
    pub log: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub calls: AtomicUsize,
}

impl ScriptedService {
    pub fn failing(names: &[&str]) -> Self {
        Self {
            failing: names.iter().map(|n| n.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl AnalysisService for ScriptedService {
    async fn submit(&self, file: &FileHandle) -> Result<AnalysisResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.log.lock().unwrap().push(format!("start:{}", file.name));

        tokio::time::sleep(Duration::from_millis(5)).await;

        self.log.lock().unwrap().push(format!("end:{}", file.name));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.contains(&file.name) {
            Ok(AnalysisResponse::failure(format!("Model could not grade {}", file.name)))
        } else {
            Ok(AnalysisResponse::success(sample_result(2, "Moderate NPDR")))
        }
    }

    async fn health_check(&self) -> bool {
        true
    }
}

/// Holds every request until released, reporting each start
pub struct GatedService {
    started: mpsc::UnboundedSender<String>,
    release: Notify,
    pub calls: AtomicUsize,
}

impl GatedService {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (started, rx) = mpsc::unbounded_channel();
        let service = Self {
            started,
            release: Notify::new(),
            calls: AtomicUsize::new(0),
        };
        (service, rx)
    }

    pub fn release_one(&self) {
        self.release.notify_one();
    }
}

#[async_trait::async_trait]
impl AnalysisService for GatedService {
    async fn submit(&self, file: &FileHandle) -> Result<AnalysisResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _ = self.started.send(file.name.clone());
        self.release.notified().await;
        Ok(AnalysisResponse::success(sample_result(1, "Mild NPDR")))
    }

    async fn health_check(&self) -> bool {
        true
    }
}

/// Fails the first call for each file with a transport error, then succeeds
#[derive(Default)]
pub struct FlakyService {
    seen: Mutex<HashMap<String, usize>>,
}

#[async_trait::async_trait]
impl AnalysisService for FlakyService {
    async fn submit(&self, file: &FileHandle) -> Result<AnalysisResponse> {
        let attempt = {
            let mut seen = self.seen.lock().unwrap();
            let count = seen.entry(file.name.clone()).or_insert(0);
            *count += 1;
            *count
        };
        if attempt == 1 {
            return Err(anyhow!("connection reset by peer"));
        }
        Ok(AnalysisResponse::success(sample_result(0, "No DR")))
    }

    async fn health_check(&self) -> bool {
        true
    }
}

/// Forwards records to a channel
pub struct ChannelRecorder(pub mpsc::UnboundedSender<RecordSummary>);

#[async_trait::async_trait]
impl Recorder for ChannelRecorder {
    async fn record(&self, summary: RecordSummary) -> Result<()> {
        self.0
            .send(summary)
            .map_err(|_| anyhow!("record channel closed"))
    }
}

/// Always fails to record
pub struct BrokenRecorder;

#[async_trait::async_trait]
impl Recorder for BrokenRecorder {
    async fn record(&self, _summary: RecordSummary) -> Result<()> {
        Err(anyhow!("history store unavailable"))
    }
}
