//! Job domain types
//!
//! States of the per-file scoring state machine and the report produced once
//! a terminal state is reached.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stage at which a job stopped
///
/// Each stage carries a stable numeric code so a triggering framework can
/// decide whether to retry without parsing diagnostic text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureStage {
    TagValidation,
    ModelClusterValidation,
    Provisioning,
    RouteReadiness,
    Scoring,
    Upload,
    Tagging,
    Cleanup,
}

impl FailureStage {
    pub const fn code(self) -> u8 {
        match self {
            FailureStage::TagValidation => 10,
            FailureStage::ModelClusterValidation => 20,
            FailureStage::Provisioning => 30,
            FailureStage::RouteReadiness => 40,
            FailureStage::Scoring => 50,
            FailureStage::Upload => 55,
            FailureStage::Tagging => 60,
            FailureStage::Cleanup => 90,
        }
    }

    /// Whether cluster resources may still exist after a failure at this stage
    pub fn leaves_resources(self) -> bool {
        !matches!(
            self,
            FailureStage::TagValidation | FailureStage::ModelClusterValidation
        )
    }
}

impl std::fmt::Display for FailureStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FailureStage::TagValidation => "tag-validation",
            FailureStage::ModelClusterValidation => "model-cluster-validation",
            FailureStage::Provisioning => "provisioning",
            FailureStage::RouteReadiness => "route-readiness",
            FailureStage::Scoring => "scoring",
            FailureStage::Upload => "upload",
            FailureStage::Tagging => "tagging",
            FailureStage::Cleanup => "cleanup",
        };
        write!(f, "{}", name)
    }
}

/// State of a per-file scoring job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Received,
    TagsValidated,
    ModelClusterValidated,
    Provisioned,
    RouteReady,
    Scored,
    Tagged,
    CleanedUp,
    Done,
    Failed { stage: FailureStage, reason: String },
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed { .. })
    }

    /// Exit code for a terminal state; `None` while the job is running
    pub fn exit_code(&self) -> Option<u8> {
        match self {
            JobState::Done => Some(0),
            JobState::Failed { stage, .. } => Some(stage.code()),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Received => write!(f, "Received"),
            JobState::TagsValidated => write!(f, "TagsValidated"),
            JobState::ModelClusterValidated => write!(f, "ModelClusterValidated"),
            JobState::Provisioned => write!(f, "Provisioned"),
            JobState::RouteReady => write!(f, "RouteReady"),
            JobState::Scored => write!(f, "Scored"),
            JobState::Tagged => write!(f, "Tagged"),
            JobState::CleanedUp => write!(f, "CleanedUp"),
            JobState::Done => write!(f, "Done"),
            JobState::Failed { stage, .. } => write!(f, "Failed({})", stage),
        }
    }
}

/// Outcome of one run of the state machine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub source_key: String,
    pub work_unit_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,

    /// Every state entered, in order, ending with the terminal one
    pub transitions: Vec<JobState>,

    /// Whether the scored output reached the destination
    pub scoring_succeeded: bool,

    /// Key of the object carrying the result or the diagnostic
    pub artifact_key: String,
}

impl JobReport {
    pub fn final_state(&self) -> &JobState {
        self.transitions.last().unwrap_or(&JobState::Received)
    }

    pub fn is_done(&self) -> bool {
        matches!(self.final_state(), JobState::Done)
    }

    pub fn failed_stage(&self) -> Option<FailureStage> {
        match self.final_state() {
            JobState::Failed { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Process exit code: 0 for success, the stage code otherwise
    pub fn exit_code(&self) -> u8 {
        // A report is only built once a terminal state was reached
        self.final_state().exit_code().unwrap_or(1)
    }
}
