pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

use crate::config::IntakeConfig;
use crate::services::analysis::{AnalysisService, create_analysis_service};
use crate::services::intake::FileIntake;
use crate::services::orchestrator::AnalysisOrchestrator;
use crate::services::recorder::{Recorder, create_recorder};
use crate::services::registry::UploadRegistry;
use std::sync::Arc;

/// Everything a view needs to drive uploads: one registry shared by intake
/// and the orchestrator.
pub struct ScreeningSession {
    pub intake: FileIntake,
    pub registry: UploadRegistry,
    pub orchestrator: Arc<AnalysisOrchestrator>,
}

impl ScreeningSession {
    pub fn new(
        config: IntakeConfig,
        service: Arc<dyn AnalysisService>,
        recorder: Arc<dyn Recorder>,
    ) -> Self {
        let registry = UploadRegistry::new();
        let orchestrator = AnalysisOrchestrator::new(registry.clone(), service, recorder)
            .with_batch_delay(config.batch_delay());

        Self {
            intake: FileIntake::new(config),
            registry,
            orchestrator: Arc::new(orchestrator),
        }
    }

    /// Builds a session with the collaborators selected by config
    pub fn from_config(config: IntakeConfig) -> anyhow::Result<Self> {
        let service: Arc<dyn AnalysisService> = Arc::from(create_analysis_service(&config)?);
        let recorder: Arc<dyn Recorder> = Arc::from(create_recorder(&config));
        Ok(Self::new(config, service, recorder))
    }
}
