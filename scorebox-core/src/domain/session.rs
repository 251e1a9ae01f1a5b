//! Scoring session domain types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of one submission against the scoring service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Submitted,
    InProgress,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Submitted => write!(f, "submitted"),
            SessionStatus::InProgress => write!(f, "in_progress"),
            SessionStatus::Completed => write!(f, "completed"),
            SessionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Result of a single poll of the scoring service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Pending,
    Ready(Vec<u8>),
}

/// One file submitted to the scoring service
///
/// Created at submission; only the poll step mutates it afterwards.
#[derive(Debug, Clone)]
pub struct ScoringSession {
    pub session_id: Uuid,
    pub file_key: String,
    pub token: String,
    pub status: SessionStatus,
    pub output: Option<Vec<u8>>,
}

impl ScoringSession {
    pub fn submitted(file_key: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            file_key: file_key.into(),
            token: token.into(),
            status: SessionStatus::Submitted,
            output: None,
        }
    }

    /// Applies a poll result; terminal sessions are left untouched
    pub fn record_poll(&mut self, outcome: PollOutcome) {
        if self.status.is_terminal() {
            return;
        }
        match outcome {
            PollOutcome::Pending => self.status = SessionStatus::InProgress,
            PollOutcome::Ready(bytes) => {
                self.status = SessionStatus::Completed;
                self.output = Some(bytes);
            }
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id,
            file_key: self.file_key.clone(),
            token: self.token.clone(),
            status: self.status,
        }
    }
}

/// Byte-free view of a session for reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub file_key: String,
    pub token: String,
    pub status: SessionStatus,
}
