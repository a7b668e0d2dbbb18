use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use super::{check_ordinal, RunStore};
use crate::config::TaskConfig;
use crate::state::{EvalRun, RunStatus};
use crate::transcript::ChatMessage;

#[derive(Debug)]
struct StoredRun {
    run: EvalRun,
    messages: Vec<ChatMessage>,
}

/// Keeps everything in process memory. Lost on exit.
#[derive(Debug, Default)]
pub(crate) struct MemoryStore {
    runs: Mutex<HashMap<Uuid, StoredRun>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run(&self, run_id: Uuid) -> Option<EvalRun> {
        self.lock().ok()?.get(&run_id).map(|stored| stored.run.clone())
    }

    pub fn messages(&self, run_id: Uuid) -> Vec<ChatMessage> {
        self.lock()
            .ok()
            .and_then(|runs| runs.get(&run_id).map(|stored| stored.messages.clone()))
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<Uuid, StoredRun>>> {
        self.runs
            .lock()
            .map_err(|_| anyhow::anyhow!("Run store lock poisoned"))
    }
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn create_run(&self, run: &EvalRun, _task: &TaskConfig) -> Result<()> {
        self.lock()?.entry(run.id).or_insert_with(|| StoredRun {
            run: run.clone(),
            messages: Vec::new(),
        });
        Ok(())
    }

    async fn append_message(&self, run_id: Uuid, message: &ChatMessage) -> Result<()> {
        let mut runs = self.lock()?;
        let stored = runs
            .get_mut(&run_id)
            .with_context(|| format!("Unknown run {run_id}"))?;
        let expected = u32::try_from(stored.messages.len())?;
        check_ordinal(run_id, expected, message)?;
        stored.messages.push(message.clone());
        Ok(())
    }

    async fn update_status(
        &self,
        run_id: Uuid,
        status: RunStatus,
        diagnostic: Option<&str>,
    ) -> Result<()> {
        let mut runs = self.lock()?;
        let stored = runs
            .get_mut(&run_id)
            .with_context(|| format!("Unknown run {run_id}"))?;
        stored.run.finish(status, diagnostic.map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::SAMPLE_TASK;
    use crate::transcript::{Role, Transcript};
    use std::sync::Arc;

    fn task() -> TaskConfig {
        TaskConfig::from_toml(SAMPLE_TASK).unwrap()
    }

    #[tokio::test]
    async fn test_create_append_finish() {
        let store = MemoryStore::new();
        let run = EvalRun::new("Find The Flag", 0, "scripted");
        store.create_run(&run, &task()).await.unwrap();

        let mut transcript = Transcript::new();
        let first = transcript.push(Role::User, "hi", true, None).clone();
        let second = transcript.push(Role::Assistant, "```ls```", false, None).clone();
        store.append_message(run.id, &first).await.unwrap();
        store.append_message(run.id, &second).await.unwrap();
        store
            .update_status(run.id, RunStatus::Success, None)
            .await
            .unwrap();

        assert_eq!(store.messages(run.id).len(), 2);
        assert_eq!(store.run(run.id).unwrap().status, RunStatus::Success);
    }

    #[tokio::test]
    async fn test_rejects_ordinal_gap() {
        let store = MemoryStore::new();
        let run = EvalRun::new("t", 0, "m");
        store.create_run(&run, &task()).await.unwrap();

        let mut transcript = Transcript::new();
        transcript.push(Role::User, "zero", true, None);
        let skipped = transcript.push(Role::User, "one", true, None).clone();

        let err = store.append_message(run.id, &skipped).await.unwrap_err();
        assert!(err.to_string().contains("expected message ordinal 0, got 1"));
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let store = MemoryStore::new();
        let run = EvalRun::new("t", 0, "m");
        store.create_run(&run, &task()).await.unwrap();

        let mut transcript = Transcript::new();
        let message = transcript.push(Role::User, "zero", true, None).clone();
        store.append_message(run.id, &message).await.unwrap();
        store.create_run(&run, &task()).await.unwrap();

        assert_eq!(store.messages(run.id).len(), 1);
    }

    #[tokio::test]
    async fn test_status_is_write_once() {
        let store = MemoryStore::new();
        let run = EvalRun::new("t", 0, "m");
        store.create_run(&run, &task()).await.unwrap();
        store
            .update_status(run.id, RunStatus::Error, Some("boom"))
            .await
            .unwrap();
        assert!(store
            .update_status(run.id, RunStatus::Success, None)
            .await
            .is_err());
        assert_eq!(
            store.run(run.id).unwrap().diagnostic.as_deref(),
            Some("boom")
        );
    }

    #[tokio::test]
    async fn test_concurrent_runs() {
        let store = Arc::new(MemoryStore::new());
        let task = Arc::new(task());
        let mut handles = Vec::new();

        for _ in 0..8 {
            let store = Arc::clone(&store);
            let task = Arc::clone(&task);
            handles.push(tokio::spawn(async move {
                let run = EvalRun::new("t", 0, "m");
                store.create_run(&run, &task).await.unwrap();
                let mut transcript = Transcript::new();
                for i in 0..5 {
                    let message = transcript.push(Role::User, format!("{i}"), false, None);
                    store.append_message(run.id, message).await.unwrap();
                }
                run.id
            }));
        }

        for handle in handles {
            let id = handle.await.unwrap();
            assert_eq!(store.messages(id).len(), 5);
        }
    }
}
