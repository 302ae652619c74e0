//! Stage and window status tracking.
//!
//! Every pipeline stage (chunking, each caption window, audio, the video
//! summary) moves through the same small status lattice. The caption stage
//! is summarised for observers as a count vector over those statuses.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a single pipeline action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    /// Not started / not applicable
    #[default]
    Na,
    /// Registered and waiting for dispatch
    Ready,
    /// Dispatched to a backend
    InProgress,
    /// Finished successfully
    Complete,
    /// Finished with an error
    Failed,
}

impl ActionStatus {
    /// Get string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Na => "na",
            ActionStatus::Ready => "ready",
            ActionStatus::InProgress => "in_progress",
            ActionStatus::Complete => "complete",
            ActionStatus::Failed => "failed",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, ActionStatus::Complete | ActionStatus::Failed)
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Count of caption windows per status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub struct StatusCounts {
    pub na: u32,
    pub ready: u32,
    pub in_progress: u32,
    pub complete: u32,
    pub failed: u32,
}

impl StatusCounts {
    /// Tally a sequence of statuses.
    pub fn from_statuses<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = ActionStatus>,
    {
        let mut counts = Self::default();
        for status in statuses {
            counts.record(status);
        }
        counts
    }

    /// Add one status to the tally.
    pub fn record(&mut self, status: ActionStatus) {
        match status {
            ActionStatus::Na => self.na += 1,
            ActionStatus::Ready => self.ready += 1,
            ActionStatus::InProgress => self.in_progress += 1,
            ActionStatus::Complete => self.complete += 1,
            ActionStatus::Failed => self.failed += 1,
        }
    }

    /// Windows that have not reached a terminal state.
    pub fn outstanding(&self) -> u32 {
        self.na + self.ready + self.in_progress
    }

    /// Total number of windows counted.
    pub fn total(&self) -> u32 {
        self.outstanding() + self.complete + self.failed
    }

    /// True when no window is NA, READY or IN_PROGRESS.
    pub fn is_drained(&self) -> bool {
        self.outstanding() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&ActionStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
        let parsed: ActionStatus = serde_json::from_str("\"complete\"").unwrap();
        assert_eq!(parsed, ActionStatus::Complete);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(ActionStatus::Complete.is_terminal());
        assert!(ActionStatus::Failed.is_terminal());
        assert!(!ActionStatus::Ready.is_terminal());
        assert!(!ActionStatus::InProgress.is_terminal());
        assert!(!ActionStatus::Na.is_terminal());
    }

    #[test]
    fn test_counts_drain_treats_failed_as_terminal() {
        let counts = StatusCounts::from_statuses([
            ActionStatus::Complete,
            ActionStatus::Failed,
            ActionStatus::Complete,
        ]);
        assert_eq!(counts.total(), 3);
        assert!(counts.is_drained());

        let counts = StatusCounts::from_statuses([ActionStatus::Complete, ActionStatus::InProgress]);
        assert_eq!(counts.outstanding(), 1);
        assert!(!counts.is_drained());
    }
}
