//! Core executor data types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::error::{ConfigError, PlanError};

/// Status of an executed stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StageStatus {
    /// Stage did not run because a prerequisite did not succeed.
    Skipped,
    /// Every resolver invocation returned a value.
    Succeeded,
    /// A resolver invocation returned an error.
    Failed,
}

/// Result of running one stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutcome {
    /// Stage identifier.
    pub id: String,
    /// Final status of this stage.
    pub status: StageStatus,
    /// Number of values the resolver produced (one per parent instance).
    pub instances: usize,
    /// Resolver error, when the stage failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Log lines captured while running the stage.
    pub logs: Vec<String>,
}

impl StageOutcome {
    pub(crate) fn skipped(stage_id: &str, dependency: &str, detail: &str) -> Self {
        Self {
            id: stage_id.to_string(),
            status: StageStatus::Skipped,
            instances: 0,
            error: None,
            logs: vec![format!("stage '{}' skipped because dependency '{}' {}", stage_id, dependency, detail)],
        }
    }
}

/// Outcome of executing a whole plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Assembled result document.
    pub data: Value,
    /// Per-stage outcomes in plan order.
    pub stages: Vec<StageOutcome>,
}

impl ExecutionReport {
    pub fn is_success(&self) -> bool {
        self.stages.iter().all(|stage| stage.status == StageStatus::Succeeded)
    }

    pub fn outcome(&self, stage_id: &str) -> Option<&StageOutcome> {
        self.stages.iter().find(|stage| stage.id == stage_id)
    }

    /// Stages whose resolver failed.
    pub fn failures(&self) -> impl Iterator<Item = &StageOutcome> {
        self.stages.iter().filter(|stage| stage.status == StageStatus::Failed)
    }

    pub fn summary(&self) -> StatusSummary {
        StatusSummary::of(&self.stages)
    }

    /// The assembled data, or the first stage failure.
    pub fn into_result(self) -> Result<Value, ExecutionError> {
        if let Some(failed) = self.stages.iter().find(|stage| stage.status == StageStatus::Failed) {
            return Err(ExecutionError::StageFailed {
                stage: failed.id.clone(),
                message: failed.error.clone().unwrap_or_default(),
            });
        }
        Ok(self.data)
    }
}

/// Count of stages per final status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl StatusSummary {
    pub fn of(outcomes: &[StageOutcome]) -> Self {
        let mut summary = Self::default();
        for outcome in outcomes {
            match outcome.status {
                StageStatus::Succeeded => summary.succeeded += 1,
                StageStatus::Failed => summary.failed += 1,
                StageStatus::Skipped => summary.skipped += 1,
            }
        }
        summary
    }
}

/// Errors that end an execution or the preparation before it.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("execution cancelled")]
    Cancelled,

    #[error("stage '{stage}' failed: {message}")]
    StageFailed { stage: String, message: String },

    #[error(transparent)]
    Plan(#[from] PlanError),
}

impl From<ConfigError> for ExecutionError {
    fn from(error: ConfigError) -> Self {
        ExecutionError::Plan(PlanError::Configuration(error))
    }
}
