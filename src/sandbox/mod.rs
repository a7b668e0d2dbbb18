//! Docker sandbox that exposes one interactive terminal per run.
//!
//! The driver owns a single container: it builds the image from the task's
//! declared files, boots it with resource and security limits, writes
//! keystrokes into its TTY and classifies what comes back.

mod context;
mod docker;
mod error;
#[cfg(test)]
pub(crate) mod scripted;
mod terminal;

pub(crate) use docker::{container_name_for_worker, image_tag, DockerSandbox, SettleTimings};
pub(crate) use error::{is_container_gone, SandboxError};
#[cfg(test)]
pub(crate) use scripted::ScriptedSandbox;
pub(crate) use terminal::TerminalClassifier;

use anyhow::Result;
use async_trait::async_trait;

/// Classification of one write/read cycle against the terminal.
///
/// Exactly one of `hung`, `input_was_empty`, `output_was_empty` or "none of
/// them" (success) is the primary classification. `scrolled_screen` and
/// `returned_to_bash` only carry meaning in the success case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepOutcome {
    pub hung: bool,
    pub scrolled_screen: bool,
    pub returned_to_bash: bool,
    pub input_was_empty: bool,
    pub output_was_empty: bool,
    pub raw_output: Vec<u8>,
    pub visible_lines: Vec<String>,
}

impl StepOutcome {
    /// Nothing was sent, so nothing was read.
    pub fn empty_input() -> Self {
        Self {
            input_was_empty: true,
            output_was_empty: true,
            ..Self::default()
        }
    }

    /// Keystrokes went in but the terminal stayed silent (or blank).
    pub fn empty_output(raw_output: Vec<u8>) -> Self {
        Self {
            output_was_empty: true,
            raw_output,
            ..Self::default()
        }
    }

    /// The environment stopped responding and was reset.
    #[cfg(test)]
    pub fn hung() -> Self {
        Self {
            hung: true,
            ..Self::default()
        }
    }

    /// Visible screen text, one line per row.
    pub fn visible_text(&self) -> String {
        self.visible_lines.join("\n")
    }
}

/// A disposable interactive environment.
///
/// Calls are strictly sequential; a run never issues two actions at once.
#[async_trait]
pub(crate) trait Sandbox: Send {
    /// Tear down any previous container and boot a fresh one.
    async fn reset(&mut self) -> Result<()>;

    /// Send keystrokes and classify the terminal's response.
    async fn act(&mut self, action: &[u8]) -> Result<StepOutcome>;

    /// Stop the container. Idempotent; "already gone" is success.
    async fn stop(&mut self) -> Result<()>;
}
