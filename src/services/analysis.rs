use anyhow::{Result, anyhow};
use reqwest::multipart;
use serde::Deserialize;
use std::time::Duration;

use crate::config::IntakeConfig;
use crate::models::{AnalysisPayload, AnalysisResponse, AnalysisResult, FileHandle};

/// Trait for retinal image analysis backends
#[async_trait::async_trait]
pub trait AnalysisService: Send + Sync {
    /// Submit one image for classification.
    ///
    /// Transport problems are returned as `Err`; a backend that answers but
    /// refuses the image yields `Ok` with `success == false`.
    async fn submit(&self, file: &FileHandle) -> Result<AnalysisResponse>;

    /// Check if the backend is reachable and has a model loaded
    async fn health_check(&self) -> bool;
}

/// Body returned by the screening backend's analyze endpoint.
///
/// Older backends omit `success` and only send `result`.
#[derive(Debug, Deserialize)]
struct AnalyzeBody {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default, alias = "medicalDisclaimer")]
    medical_disclaimer: Option<String>,
}

/// Error body of a rejected request (`detail` for validation errors)
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    detail: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Analysis backend reached over HTTP (`POST /api/v1/analyze`, multipart field `file`)
pub struct HttpAnalysisService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAnalysisService {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow!("Failed to build HTTP client: {}", e))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &IntakeConfig) -> Result<Self> {
        Self::new(config.analysis_base_url.clone(), config.request_timeout())
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/v1/{}", self.base_url, path)
    }
}

fn parse_analyze_body(body: &[u8]) -> Result<AnalysisResponse> {
    let body: AnalyzeBody = serde_json::from_slice(body)
        .map_err(|e| anyhow!("Malformed analysis response: {}", e))?;

    let result = body.result.map(AnalysisResult::from_value);

    Ok(AnalysisResponse {
        success: body.success.unwrap_or(result.is_some()),
        data: Some(AnalysisPayload {
            result,
            medical_disclaimer: body.medical_disclaimer,
        }),
        error: body.error,
    })
}

fn error_message(body: &[u8]) -> Option<String> {
    let body: ErrorBody = serde_json::from_slice(body).ok()?;
    match body.detail {
        Some(serde_json::Value::String(detail)) => Some(detail),
        Some(other) => Some(other.to_string()),
        None => body.error,
    }
}

#[async_trait::async_trait]
impl AnalysisService for HttpAnalysisService {
    async fn submit(&self, file: &FileHandle) -> Result<AnalysisResponse> {
        let url = self.endpoint("analyze");

        let part = multipart::Part::bytes(file.bytes.to_vec())
            .file_name(file.name.clone())
            .mime_str(&file.mime_type)
            .map_err(|e| anyhow!("Invalid MIME type '{}': {}", file.mime_type, e))?;
        let form = multipart::Form::new().part("file", part);

        tracing::debug!("Submitting {} ({} bytes) to {}", file.name, file.size, url);

        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to reach analysis service at {}: {}", url, e))?;

        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            let message = error_message(&body)
                .unwrap_or_else(|| format!("Analysis service returned {}", status));
            tracing::debug!("Analysis of {} rejected: {}", file.name, message);
            return Ok(AnalysisResponse::failure(message));
        }

        parse_analyze_body(&body)
    }

    async fn health_check(&self) -> bool {
        match self.client.get(self.endpoint("health")).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!("Analysis service health check failed: {}", e);
                false
            }
        }
    }
}

/// Service that refuses every request, for running intake without a backend
pub struct DisabledAnalysisService;

#[async_trait::async_trait]
impl AnalysisService for DisabledAnalysisService {
    async fn submit(&self, file: &FileHandle) -> Result<AnalysisResponse> {
        tracing::warn!("DisabledAnalysisService: not analyzing {}", file.name);
        Ok(AnalysisResponse::failure("Analysis service is disabled"))
    }

    async fn health_check(&self) -> bool {
        false
    }
}

/// Factory function to create the analysis service selected by config
pub fn create_analysis_service(config: &IntakeConfig) -> Result<Box<dyn AnalysisService>> {
    match config.analysis_service_type.to_lowercase().as_str() {
        "http" => Ok(Box::new(HttpAnalysisService::from_config(config)?)),
        "disabled" | "none" | "noop" => Ok(Box::new(DisabledAnalysisService)),
        other => {
            tracing::warn!("Unknown analysis service type '{}', using HTTP", other);
            Ok(Box::new(HttpAnalysisService::from_config(config)?))
        }
    }
}
