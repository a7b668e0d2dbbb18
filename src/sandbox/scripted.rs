//! Scripted sandbox for orchestrator tests.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::{Sandbox, SandboxError, StepOutcome};

/// One queued reaction to `act`.
#[derive(Debug, Clone)]
pub(crate) enum ScriptedStep {
    /// Return this outcome.
    Outcome(StepOutcome),
    /// Behave as if the container vanished.
    Vanish,
    /// Fail with an unclassified error.
    Error(String),
}

/// Counters shared between a `ScriptedSandbox` and the test holding it.
#[derive(Debug, Default)]
pub(crate) struct SandboxCalls {
    pub resets: AtomicUsize,
    pub acts: AtomicUsize,
    pub stops: AtomicUsize,
    pub actions: Mutex<Vec<Vec<u8>>>,
}

impl SandboxCalls {
    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    pub fn acts(&self) -> usize {
        self.acts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn actions(&self) -> Vec<Vec<u8>> {
        self.actions.lock().unwrap().clone()
    }
}

/// A sandbox that replays queued steps instead of talking to Docker.
///
/// Once the queue runs dry every further action echoes a prompt line.
pub(crate) struct ScriptedSandbox {
    steps: VecDeque<ScriptedStep>,
    calls: Arc<SandboxCalls>,
    fail_reset: Option<SandboxError>,
}

impl ScriptedSandbox {
    pub fn new(steps: Vec<ScriptedStep>) -> Self {
        Self {
            steps: steps.into(),
            calls: Arc::new(SandboxCalls::default()),
            fail_reset: None,
        }
    }

    /// Make the next `reset` fail with `err`.
    pub fn failing_reset(mut self, err: SandboxError) -> Self {
        self.fail_reset = Some(err);
        self
    }

    pub fn calls(&self) -> Arc<SandboxCalls> {
        Arc::clone(&self.calls)
    }
}

/// A successful step whose screen shows `lines`.
pub(crate) fn screen(lines: &[&str]) -> StepOutcome {
    let visible_lines: Vec<String> = lines.iter().map(|l| (*l).to_string()).collect();
    StepOutcome {
        raw_output: visible_lines.join("\r\n").into_bytes(),
        visible_lines,
        ..StepOutcome::default()
    }
}

#[async_trait]
impl Sandbox for ScriptedSandbox {
    async fn reset(&mut self) -> Result<()> {
        self.calls.resets.fetch_add(1, Ordering::SeqCst);
        match self.fail_reset.take() {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    async fn act(&mut self, action: &[u8]) -> Result<StepOutcome> {
        if action.is_empty() {
            return Ok(StepOutcome::empty_input());
        }

        self.calls.acts.fetch_add(1, Ordering::SeqCst);
        self.calls.actions.lock().unwrap().push(action.to_vec());

        match self.steps.pop_front() {
            Some(ScriptedStep::Outcome(outcome)) => Ok(outcome),
            Some(ScriptedStep::Vanish) => Err(SandboxError::container_gone("scripted").into()),
            Some(ScriptedStep::Error(msg)) => anyhow::bail!("{msg}"),
            None => Ok(screen(&["root@simurgh:/#"])),
        }
    }

    async fn stop(&mut self) -> Result<()> {
        self.calls.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replays_steps_in_order() {
        let mut sandbox = ScriptedSandbox::new(vec![
            ScriptedStep::Outcome(screen(&["one"])),
            ScriptedStep::Outcome(screen(&["two"])),
        ]);
        let calls = sandbox.calls();

        assert_eq!(sandbox.act(b"a\n").await.unwrap().visible_lines, vec!["one"]);
        assert_eq!(sandbox.act(b"b\n").await.unwrap().visible_lines, vec!["two"]);
        assert_eq!(calls.acts(), 2);
        assert_eq!(calls.actions(), vec![b"a\n".to_vec(), b"b\n".to_vec()]);
    }

    #[tokio::test]
    async fn test_empty_action_is_not_counted() {
        let mut sandbox = ScriptedSandbox::new(vec![]);
        let calls = sandbox.calls();
        let outcome = sandbox.act(b"").await.unwrap();
        assert!(outcome.input_was_empty);
        assert_eq!(calls.acts(), 0);
    }

    #[tokio::test]
    async fn test_vanish_reports_container_gone() {
        let mut sandbox = ScriptedSandbox::new(vec![ScriptedStep::Vanish]);
        let err = sandbox.act(b"x\n").await.unwrap_err();
        assert!(crate::sandbox::is_container_gone(&err));
    }

    #[tokio::test]
    async fn test_failing_reset_only_once() {
        let mut sandbox = ScriptedSandbox::new(vec![])
            .failing_reset(SandboxError::container_gone("scripted"));
        assert!(sandbox.reset().await.is_err());
        assert!(sandbox.reset().await.is_ok());
        assert_eq!(sandbox.calls().resets(), 2);
    }
}
