//! Append-only JSON-lines store on the local filesystem.
//!
//! Layout under the root directory:
//! - `task_snapshots/<sha256>.toml`: normalized task config
//! - `elicitation_snapshots/<sha256>.toml`: normalized elicitation
//! - `runs/<run-id>.jsonl`: one event per line

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use super::{check_ordinal, RunStore};
use crate::config::{sha256_hex, TaskConfig};
use crate::state::{EvalRun, RunStatus};
use crate::transcript::ChatMessage;

const TASK_SNAPSHOTS_DIR: &str = "task_snapshots";
const ELICITATION_SNAPSHOTS_DIR: &str = "elicitation_snapshots";
const RUNS_DIR: &str = "runs";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub(crate) enum RunEvent {
    RunCreated {
        run: EvalRun,
        task_snapshot: String,
        elicitation_snapshot: String,
    },
    Message {
        message: ChatMessage,
    },
    Status {
        status: RunStatus,
        diagnostic: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct EventLine {
    pub timestamp: DateTime<Utc>,
    pub run_id: Uuid,
    #[serde(flatten)]
    pub event: RunEvent,
}

/// Filesystem-backed store. Each run writes only its own file.
#[derive(Debug)]
pub(crate) struct JsonlStore {
    root: PathBuf,
    next_ordinal: Mutex<HashMap<Uuid, u32>>,
}

impl JsonlStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for dir in [TASK_SNAPSHOTS_DIR, ELICITATION_SNAPSHOTS_DIR, RUNS_DIR] {
            let path = root.join(dir);
            std::fs::create_dir_all(&path)
                .with_context(|| format!("Failed to create store directory: {}", path.display()))?;
        }
        Ok(Self {
            root,
            next_ordinal: Mutex::new(HashMap::new()),
        })
    }

    pub fn run_path(&self, run_id: Uuid) -> PathBuf {
        self.root.join(RUNS_DIR).join(format!("{run_id}.jsonl"))
    }

    /// Read every event of one run back, in order.
    #[cfg(test)]
    pub async fn read_events(&self, run_id: Uuid) -> Result<Vec<EventLine>> {
        let path = self.run_path(run_id);
        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read run log: {}", path.display()))?;
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line)
                    .with_context(|| format!("Malformed event in {}", path.display()))
            })
            .collect()
    }

    /// Write a content-addressed snapshot unless it already exists.
    async fn snapshot(&self, dir: &str, content: &str) -> Result<String> {
        let sha = sha256_hex(content.as_bytes());
        let path = self.root.join(dir).join(format!("{sha}.toml"));

        let opened = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await;
        match opened {
            Ok(mut file) => {
                file.write_all(content.as_bytes())
                    .await
                    .with_context(|| format!("Failed to write snapshot: {}", path.display()))?;
                file.flush().await?;
                debug!(path = %path.display(), "Snapshot created");
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to create snapshot: {}", path.display()));
            }
        }
        Ok(sha)
    }

    async fn append(&self, run_id: Uuid, event: RunEvent) -> Result<()> {
        let line = EventLine {
            timestamp: Utc::now(),
            run_id,
            event,
        };
        let mut encoded = serde_json::to_string(&line).context("Failed to encode run event")?;
        encoded.push('\n');

        let path = self.run_path(run_id);
        append_line(&path, &encoded).await
    }

    fn reserve_ordinal(&self, run_id: Uuid, message: &ChatMessage) -> Result<()> {
        let mut next = self
            .next_ordinal
            .lock()
            .map_err(|_| anyhow::anyhow!("Run store lock poisoned"))?;
        let expected = next
            .get(&run_id)
            .copied()
            .with_context(|| format!("Unknown run {run_id}"))?;
        check_ordinal(run_id, expected, message)?;
        next.insert(run_id, expected + 1);
        Ok(())
    }
}

async fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("Failed to open run log: {}", path.display()))?;
    file.write_all(line.as_bytes())
        .await
        .with_context(|| format!("Failed to append to run log: {}", path.display()))?;
    file.flush().await?;
    Ok(())
}

#[async_trait]
impl RunStore for JsonlStore {
    async fn create_run(&self, run: &EvalRun, task: &TaskConfig) -> Result<()> {
        let elicitation = task.elicitation(run.elicitation_index)?;
        {
            let mut next = self
                .next_ordinal
                .lock()
                .map_err(|_| anyhow::anyhow!("Run store lock poisoned"))?;
            if next.contains_key(&run.id) {
                return Ok(());
            }
            next.insert(run.id, 0);
        }

        let task_snapshot = self
            .snapshot(TASK_SNAPSHOTS_DIR, &task.to_normalized_toml()?)
            .await?;
        let elicitation_snapshot = self
            .snapshot(ELICITATION_SNAPSHOTS_DIR, &elicitation.to_normalized_toml()?)
            .await?;

        self.append(
            run.id,
            RunEvent::RunCreated {
                run: run.clone(),
                task_snapshot,
                elicitation_snapshot,
            },
        )
        .await
    }

    async fn append_message(&self, run_id: Uuid, message: &ChatMessage) -> Result<()> {
        self.reserve_ordinal(run_id, message)?;
        self.append(
            run_id,
            RunEvent::Message {
                message: message.clone(),
            },
        )
        .await
    }

    async fn update_status(
        &self,
        run_id: Uuid,
        status: RunStatus,
        diagnostic: Option<&str>,
    ) -> Result<()> {
        if !status.is_terminal() {
            anyhow::bail!("Run {run_id} cannot transition back to {status}");
        }
        {
            let mut next = self
                .next_ordinal
                .lock()
                .map_err(|_| anyhow::anyhow!("Run store lock poisoned"))?;
            // Forgetting the run closes it to further messages and statuses.
            if next.remove(&run_id).is_none() {
                anyhow::bail!("Run {run_id} is unknown or already finished");
            }
        }
        self.append(
            run_id,
            RunEvent::Status {
                status,
                diagnostic: diagnostic.map(str::to_string),
            },
        )
        .await
    }
}
