//! Run outcome taxonomy.
//!
//! Components raise these to tell the orchestrator how a run should end.
//! Anything that is not a `RunError` is treated as retriable.

/// Typed conditions that decide a run's terminal status.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// Counts against the agent: malformed protocol output, a vanished
    /// container mid-turn, disallowed usage.
    #[error("Non-retriable failure: {message}")]
    Failure { message: String },

    /// The agent's provider declined to answer.
    #[error("Agent refused: {message}")]
    Refused { message: String },

    /// Infrastructure hiccup; the caller should retry the run.
    #[error("Retriable error: {message}")]
    Retriable { message: String },
}

impl RunError {
    /// Creates a `Failure` error.
    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure {
            message: message.into(),
        }
    }

    /// Creates a `Refused` error.
    pub fn refused(message: impl Into<String>) -> Self {
        Self::Refused {
            message: message.into(),
        }
    }

    /// Creates a `Retriable` error.
    pub fn retriable(message: impl Into<String>) -> Self {
        Self::Retriable {
            message: message.into(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }

    pub fn is_refused(&self) -> bool {
        matches!(self, Self::Refused { .. })
    }
}

/// Returns true if the error, a context layered on it, or any cause in its
/// chain is a `RunError` matching `pred`.
pub fn chain_has(err: &anyhow::Error, pred: fn(&RunError) -> bool) -> bool {
    err.downcast_ref::<RunError>().is_some_and(pred)
        || err
            .chain()
            .filter_map(|cause| cause.downcast_ref::<RunError>())
            .any(pred)
}
