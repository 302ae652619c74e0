//! Structured stage logging utilities.
//!
//! Keeps lifecycle logs for one state's pipeline stage consistent: every
//! line carries the state id and the stage name.

use tracing::{error, info, warn, Span};
use vsum_models::StateId;

/// Pipeline stages a [`StateLogger`] can report for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Chunking,
    Captioning,
    Audio,
    Summary,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Chunking => "chunking",
            Stage::Captioning => "captioning",
            Stage::Audio => "audio",
            Stage::Summary => "summary",
        }
    }
}

/// Logger bound to one state and stage.
#[derive(Debug, Clone)]
pub struct StateLogger {
    state_id: String,
    stage: Stage,
}

impl StateLogger {
    pub fn new(state_id: &StateId, stage: Stage) -> Self {
        Self {
            state_id: state_id.to_string(),
            stage,
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            state_id = %self.state_id,
            stage = self.stage.as_str(),
            "Stage started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            state_id = %self.state_id,
            stage = self.stage.as_str(),
            "Stage progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            state_id = %self.state_id,
            stage = self.stage.as_str(),
            "Stage warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            state_id = %self.state_id,
            stage = self.stage.as_str(),
            "Stage failed: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            state_id = %self.state_id,
            stage = self.stage.as_str(),
            "Stage completed: {}", message
        );
    }

    pub fn state_id(&self) -> &str {
        &self.state_id
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Span carrying the state id and stage, for instrumenting stage futures.
    pub fn span(&self) -> Span {
        tracing::info_span!(
            "stage",
            state_id = %self.state_id,
            stage = self.stage.as_str()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_logger_fields() {
        let logger = StateLogger::new(&StateId::from("state-7"), Stage::Captioning);
        assert_eq!(logger.state_id(), "state-7");
        assert_eq!(logger.stage().as_str(), "captioning");
    }
}
