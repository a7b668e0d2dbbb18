//! Run record and its write-once status.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Running,
    Success,
    Failure,
    Error,
    Refused,
}

impl RunStatus {
    /// Terminal statuses, in summary order.
    pub const TERMINAL: [Self; 4] = [Self::Success, Self::Failure, Self::Error, Self::Refused];

    pub fn is_terminal(self) -> bool {
        self != Self::Running
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "RUNNING"),
            Self::Success => write!(f, "SUCCESS"),
            Self::Failure => write!(f, "FAILURE"),
            Self::Error => write!(f, "ERROR"),
            Self::Refused => write!(f, "REFUSED"),
        }
    }
}

/// One attempt of one agent at one elicitation of one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalRun {
    pub id: Uuid,
    pub task_name: String,
    pub elicitation_index: usize,
    pub model: String,
    pub status: RunStatus,
    pub diagnostic: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl EvalRun {
    pub fn new(task_name: impl Into<String>, elicitation_index: usize, model: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_name: task_name.into(),
            elicitation_index,
            model: model.into(),
            status: RunStatus::Running,
            diagnostic: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Move to a terminal status. Allowed exactly once.
    pub fn finish(&mut self, status: RunStatus, diagnostic: Option<String>) -> Result<()> {
        if !status.is_terminal() {
            anyhow::bail!("Run {} cannot transition back to {status}", self.id);
        }
        if self.status.is_terminal() {
            anyhow::bail!(
                "Run {} already finished as {}, refusing {status}",
                self.id,
                self.status
            );
        }
        self.status = status;
        self.diagnostic = diagnostic;
        self.finished_at = Some(Utc::now());
        Ok(())
    }
}
