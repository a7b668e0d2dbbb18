//! Strict JSON: `{"keystrokes_to_terminal": "..."}` in, a compact status object out.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::{secondary_notes, Status};
use crate::error::RunError;
use crate::sandbox::StepOutcome;

#[derive(Deserialize)]
struct AgentMessage {
    keystrokes_to_terminal: String,
}

#[derive(Serialize)]
struct EnvironmentMessage {
    status: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    additional_notes: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    terminal_output: Option<String>,
}

/// Decode the whole reply; anything but a conforming object is a failure.
pub(super) fn extract(agent_reply: &str) -> Result<String> {
    let message: AgentMessage = serde_json::from_str(agent_reply)
        .map_err(|e| RunError::failure(format!("Agent reply is not valid protocol JSON: {e}")))?;
    Ok(format!("{}\n", message.keystrokes_to_terminal))
}

pub(super) fn wrap(outcome: &StepOutcome) -> String {
    let status = Status::of(outcome);
    let message = EnvironmentMessage {
        status: status.as_str(),
        additional_notes: secondary_notes(outcome),
        terminal_output: (status == Status::Success).then(|| outcome.visible_text()),
    };
    // Only string fields; serialization cannot fail.
    serde_json::to_string(&message).unwrap_or_default()
}
