//! Scripted agent for testing.
//!
//! Replays predetermined replies so the orchestrator can be exercised
//! without any network access.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::Agent;
use crate::error::RunError;
use crate::transcript::ChatMessage;

/// A single scripted reaction to `act`.
#[derive(Debug, Clone)]
pub(crate) enum ScriptedReply {
    /// Answer with the given text.
    Text(String),
    /// Fail the way a provider refusal does.
    Refuse,
    /// Fail the way a disallowed request does.
    Fail(String),
    /// Fail with an unclassified error.
    Error(String),
    /// Panic mid-turn.
    Panic,
}

/// Observations a test can read after the agent has been moved into a run.
#[derive(Debug, Default)]
pub(crate) struct AgentCalls {
    invocations: AtomicUsize,
    resets: AtomicUsize,
    premembered: Mutex<Vec<Vec<ChatMessage>>>,
    prompts: Mutex<Vec<String>>,
}

impl AgentCalls {
    pub fn invocation_count(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    pub fn reset_count(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    /// One entry per `premember` call.
    pub fn premembered(&self) -> Vec<Vec<ChatMessage>> {
        self.premembered.lock().unwrap().clone()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

/// Returns configured replies in order, cycling when it runs out.
#[derive(Debug, Clone)]
pub(crate) struct ScriptedAgent {
    replies: Arc<Vec<ScriptedReply>>,
    calls: Arc<AgentCalls>,
}

impl ScriptedAgent {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: Arc::new(replies),
            calls: Arc::new(AgentCalls::default()),
        }
    }

    /// An agent that always answers with `text`.
    pub fn always(text: &str) -> Self {
        Self::new(vec![ScriptedReply::Text(text.to_string())])
    }

    pub fn calls(&self) -> Arc<AgentCalls> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn reset(&mut self) {
        self.calls.resets.fetch_add(1, Ordering::SeqCst);
    }

    fn premember(&mut self, messages: &[ChatMessage]) {
        self.calls.premembered.lock().unwrap().push(messages.to_vec());
    }

    async fn act(&mut self, environment_message: &str) -> Result<String> {
        self.calls
            .prompts
            .lock()
            .unwrap()
            .push(environment_message.to_string());
        let count = self.calls.invocations.fetch_add(1, Ordering::SeqCst);
        let reply = &self.replies[count % self.replies.len()];

        match reply {
            ScriptedReply::Text(text) => Ok(text.clone()),
            ScriptedReply::Refuse => Err(RunError::refused("scripted refusal").into()),
            ScriptedReply::Fail(msg) => Err(RunError::failure(msg.clone()).into()),
            ScriptedReply::Error(msg) => anyhow::bail!("{msg}"),
            ScriptedReply::Panic => panic!("scripted agent panic"),
        }
    }

    fn identify(&self) -> String {
        "scripted".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::chain_has;

    #[tokio::test]
    async fn test_scripted_agent_cycles_replies() {
        let mut agent = ScriptedAgent::new(vec![
            ScriptedReply::Text("first".to_string()),
            ScriptedReply::Text("second".to_string()),
        ]);

        assert_eq!(agent.act("a").await.unwrap(), "first");
        assert_eq!(agent.act("b").await.unwrap(), "second");
        assert_eq!(agent.act("c").await.unwrap(), "first");
        assert_eq!(agent.calls().invocation_count(), 3);
        assert_eq!(agent.calls().prompts(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_scripted_agent_refusal_and_failure() {
        let mut agent = ScriptedAgent::new(vec![
            ScriptedReply::Refuse,
            ScriptedReply::Fail("token limit".to_string()),
            ScriptedReply::Error("connection reset".to_string()),
        ]);

        let refused = agent.act("").await.unwrap_err();
        assert!(chain_has(&refused, RunError::is_refused));

        let failed = agent.act("").await.unwrap_err();
        assert!(chain_has(&failed, RunError::is_failure));

        let other = agent.act("").await.unwrap_err();
        assert!(!chain_has(&other, RunError::is_failure));
        assert!(!chain_has(&other, RunError::is_refused));
    }

    #[test]
    fn test_scripted_agent_tracks_reset_and_premember() {
        let mut agent = ScriptedAgent::always("ok");
        let calls = agent.calls();
        agent.reset();
        agent.premember(&[]);
        assert_eq!(calls.reset_count(), 1);
        assert_eq!(calls.premembered().len(), 1);
        assert_eq!(agent.identify(), "scripted");
    }
}
