//! Durable record of runs and their conversations.
//!
//! The orchestrator only needs three operations; every implementation must
//! be safe to share between concurrently executing runs.

mod jsonl;
#[cfg(test)]
mod memory;

pub(crate) use jsonl::JsonlStore;
#[cfg(test)]
pub(crate) use memory::MemoryStore;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::config::TaskConfig;
use crate::state::{EvalRun, RunStatus};
use crate::transcript::ChatMessage;

#[async_trait]
pub(crate) trait RunStore: Send + Sync {
    /// Record a new RUNNING run together with snapshots of its task and
    /// elicitation. Creating the same run twice is a no-op.
    async fn create_run(&self, run: &EvalRun, task: &TaskConfig) -> Result<()>;

    /// Append one message. Ordinals must continue the run's sequence with
    /// no gaps.
    async fn append_message(&self, run_id: Uuid, message: &ChatMessage) -> Result<()>;

    /// Record the run's terminal status.
    async fn update_status(
        &self,
        run_id: Uuid,
        status: RunStatus,
        diagnostic: Option<&str>,
    ) -> Result<()>;
}

/// Rejects an ordinal that does not directly follow `expected`.
fn check_ordinal(run_id: Uuid, expected: u32, message: &ChatMessage) -> Result<()> {
    if message.ordinal != expected {
        anyhow::bail!(
            "Run {run_id}: expected message ordinal {expected}, got {}",
            message.ordinal
        );
    }
    Ok(())
}
