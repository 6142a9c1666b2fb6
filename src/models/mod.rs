use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An uploaded file as selected by the user. The payload is never mutated.
#[derive(Debug, Clone)]
pub struct FileHandle {
    pub name: String,
    pub size: usize,
    pub mime_type: String,
    pub bytes: Bytes,
}

impl FileHandle {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        Self {
            name: name.into(),
            size: bytes.len(),
            mime_type: mime_type.into(),
            bytes,
        }
    }
}

/// Displayable form of an accepted file, derived once at intake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Preview {
    pub data_uri: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Payload returned by the analysis backend.
///
/// The backend owns this shape. The fields used for the history record are
/// typed but optional, and everything else is carried through untouched in
/// `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, alias = "risk_level", skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<String>,
    #[serde(
        default,
        alias = "stage_name",
        alias = "stageDescription",
        alias = "stage_description",
        skip_serializing_if = "Option::is_none"
    )]
    pub stage_name: Option<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default, alias = "analysis_factors")]
    pub analysis_factors: Vec<String>,
    #[serde(default, alias = "risk_score", skip_serializing_if = "Option::is_none")]
    pub risk_score: Option<f64>,
    #[serde(default, alias = "image_quality", skip_serializing_if = "Option::is_none")]
    pub image_quality: Option<serde_json::Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl AnalysisResult {
    /// Reads a backend result, keeping it whole when the typed fields do not
    /// match. Every present result is a result.
    pub fn from_value(value: serde_json::Value) -> Self {
        match serde_json::from_value::<AnalysisResult>(value.clone()) {
            Ok(result) => result,
            Err(e) => {
                tracing::debug!("Analysis result kept as raw JSON: {}", e);
                let extra = match value {
                    serde_json::Value::Object(map) => map,
                    other => {
                        let mut map = serde_json::Map::new();
                        map.insert("value".to_string(), other);
                        map
                    }
                };
                Self {
                    extra,
                    ..Self::default()
                }
            }
        }
    }

    /// Confidence as a percentage. Backends report either a fraction or a percentage.
    pub fn confidence_percent(&self) -> Option<f64> {
        self.confidence.map(as_percent)
    }
}

pub fn as_percent(confidence: f64) -> f64 {
    if confidence <= 1.0 {
        confidence * 100.0
    } else {
        confidence
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisPayload {
    #[serde(default)]
    pub result: Option<AnalysisResult>,
    #[serde(default, alias = "medical_disclaimer")]
    pub medical_disclaimer: Option<String>,
}

/// Envelope produced by an [`crate::services::analysis::AnalysisService`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Option<AnalysisPayload>,
    #[serde(default)]
    pub error: Option<String>,
}

impl AnalysisResponse {
    pub fn success(result: AnalysisResult) -> Self {
        Self {
            success: true,
            data: Some(AnalysisPayload {
                result: Some(result),
                medical_disclaimer: None,
            }),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }

    /// Takes the result out of a well-formed successful response.
    pub fn into_result(self) -> Result<AnalysisResult, Option<String>> {
        match (self.success, self.data.and_then(|d| d.result)) {
            (true, Some(result)) => Ok(result),
            _ => Err(self.error),
        }
    }
}

/// Lifecycle of a single upload entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum EntryState {
    Pending,
    Analyzing,
    Completed(AnalysisResult),
    Failed(String),
}

impl EntryState {
    pub fn kind(&self) -> StateKind {
        match self {
            EntryState::Pending => StateKind::Pending,
            EntryState::Analyzing => StateKind::Analyzing,
            EntryState::Completed(_) => StateKind::Completed,
            EntryState::Failed(_) => StateKind::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EntryState::Completed(_) | EntryState::Failed(_))
    }
}

/// Data-free discriminant of [`EntryState`], used in events and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKind {
    Pending,
    Analyzing,
    Completed,
    Failed,
}

impl std::fmt::Display for StateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StateKind::Pending => "pending",
            StateKind::Analyzing => "analyzing",
            StateKind::Completed => "completed",
            StateKind::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct UploadEntry {
    pub id: String,
    pub file: FileHandle,
    pub preview: Preview,
    pub state: EntryState,
    /// How many times analysis has been started for this entry.
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UploadEntry {
    pub fn new(file: FileHandle, preview: Preview) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            file,
            preview,
            state: EntryState::Pending,
            attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn result(&self) -> Option<&AnalysisResult> {
        match &self.state {
            EntryState::Completed(result) => Some(result),
            _ => None,
        }
    }
}

/// Screening-history record published after a successful analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSummary {
    pub stage: Option<u8>,
    pub confidence: Option<f64>,
    pub risk_level: Option<String>,
    pub stage_name: Option<String>,
    pub file_name: String,
    pub image_quality: Option<serde_json::Value>,
    pub recorded_at: DateTime<Utc>,
}

impl RecordSummary {
    pub fn from_result(file_name: &str, result: &AnalysisResult) -> Self {
        Self {
            stage: result.stage,
            confidence: result.confidence,
            risk_level: result.risk_level.clone(),
            stage_name: result.stage_name.clone(),
            file_name: file_name.to_string(),
            image_quality: result.image_quality.clone(),
            recorded_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_analysis_result_keeps_unknown_fields() {
        let result: AnalysisResult = serde_json::from_value(json!({
            "stage": 2,
            "confidence": 0.81,
            "riskLevel": "moderate",
            "stageName": "Moderate NPDR",
            "recommendations": ["Ophthalmology referral within 6-12 months"],
            "description": "Moderate non-proliferative diabetic retinopathy",
            "imageQuality": {"qualityScore": 0.74}
        }))
        .unwrap();

        assert_eq!(result.stage, Some(2));
        assert!(result.analysis_factors.is_empty());
        assert_eq!(
            result.extra.get("description").and_then(|v| v.as_str()),
            Some("Moderate non-proliferative diabetic retinopathy")
        );
        assert_eq!(result.image_quality, Some(json!({"qualityScore": 0.74})));
    }

    #[test]
    fn test_stage_description_shape_is_read() {
        let result = AnalysisResult::from_value(json!({
            "stage": 2,
            "stage_description": "Moderate NPDR",
            "confidence": 81.0,
            "risk_level": "Moderate",
            "recommendations": []
        }));

        assert_eq!(result.stage, Some(2));
        assert_eq!(result.stage_name.as_deref(), Some("Moderate NPDR"));
        assert_eq!(result.risk_level.as_deref(), Some("Moderate"));
        assert_eq!(result.confidence_percent(), Some(81.0));
    }

    #[test]
    fn test_mismatched_result_kept_raw() {
        let result = AnalysisResult::from_value(json!({
            "stage": "two",
            "grade": {"icdr": 2}
        }));
        assert_eq!(result.stage, None);
        assert_eq!(result.extra.get("stage"), Some(&json!("two")));
        assert_eq!(result.extra.get("grade"), Some(&json!({"icdr": 2})));

        let summary = RecordSummary::from_result("eye.jpg", &result);
        assert_eq!(summary.stage_name, None);
        assert_eq!(summary.file_name, "eye.jpg");

        let result = AnalysisResult::from_value(json!("grade 2"));
        assert_eq!(result.extra.get("value"), Some(&json!("grade 2")));
    }

    #[test]
    fn test_response_without_result_is_failure() {
        let response: AnalysisResponse =
            serde_json::from_value(json!({"success": true, "data": {"medical_disclaimer": "x"}}))
                .unwrap();
        assert_eq!(response.into_result(), Err(None));

        let response = AnalysisResponse::failure("Invalid file type");
        assert_eq!(
            response.into_result(),
            Err(Some("Invalid file type".to_string()))
        );
    }

    #[test]
    fn test_new_entry_is_pending_with_unique_id() {
        let file = FileHandle::new("eye.jpg", "image/jpeg", vec![0xFF, 0xD8, 0xFF]);
        let preview = Preview {
            data_uri: String::new(),
            width: None,
            height: None,
        };
        let a = UploadEntry::new(file.clone(), preview.clone());
        let b = UploadEntry::new(file, preview);
        assert_eq!(a.state, EntryState::Pending);
        assert_eq!(a.file.size, 3);
        assert_ne!(a.id, b.id);
        assert!(a.result().is_none());
    }
}
