//! Terminal interop protocols.
//!
//! A protocol is the textual convention an agent uses to send keystrokes to
//! the terminal and to read back what happened. Every protocol is a pair of
//! pure functions:
//! - `extract`: agent reply -> newline-terminated keystrokes
//! - `wrap`: `StepOutcome` -> the next user-facing message
//!
//! The set is closed; the orchestrator only ever sees `Protocol`.

mod angle_bracket;
mod json;
mod markdown;
mod xml;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::sandbox::StepOutcome;

/// Supported terminal interop protocols, selected per elicitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum Protocol {
    /// Commands inside fenced code blocks, prose replies.
    MarkdownCodeBlocks,
    /// Commands on lines starting with `>`, prose replies.
    ClosingAngleBracket,
    /// A JSON object in, a compact JSON object out.
    JsonBasic,
    /// `<keystrokes_to_terminal>` in, one tag per line out.
    XmlTags,
}

impl Protocol {
    /// Every protocol, in declaration order.
    pub const ALL: [Self; 4] = [
        Self::MarkdownCodeBlocks,
        Self::ClosingAngleBracket,
        Self::JsonBasic,
        Self::XmlTags,
    ];

    /// Turn an agent reply into terminal keystrokes.
    ///
    /// Only `JsonBasic` can fail; its errors carry `RunError::Failure`.
    pub fn extract(self, agent_reply: &str) -> Result<String> {
        match self {
            Self::MarkdownCodeBlocks => Ok(markdown::extract(agent_reply)),
            Self::ClosingAngleBracket => Ok(angle_bracket::extract(agent_reply)),
            Self::JsonBasic => json::extract(agent_reply),
            Self::XmlTags => Ok(xml::extract(agent_reply)),
        }
    }

    /// Describe a step outcome to the agent.
    pub fn wrap(self, outcome: &StepOutcome) -> String {
        match self {
            Self::MarkdownCodeBlocks => markdown::wrap(outcome),
            Self::ClosingAngleBracket => angle_bracket::wrap(outcome),
            Self::JsonBasic => json::wrap(outcome),
            Self::XmlTags => xml::wrap(outcome),
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MarkdownCodeBlocks => write!(f, "MARKDOWN_CODE_BLOCKS"),
            Self::ClosingAngleBracket => write!(f, "CLOSING_ANGLE_BRACKET"),
            Self::JsonBasic => write!(f, "JSON_BASIC"),
            Self::XmlTags => write!(f, "XML_TAGS"),
        }
    }
}

impl std::str::FromStr for Protocol {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "MARKDOWN_CODE_BLOCKS" => Ok(Self::MarkdownCodeBlocks),
            "CLOSING_ANGLE_BRACKET" => Ok(Self::ClosingAngleBracket),
            "JSON_BASIC" => Ok(Self::JsonBasic),
            "XML_TAGS" => Ok(Self::XmlTags),
            _ => anyhow::bail!(
                "Unknown protocol: '{s}'. Supported: MARKDOWN_CODE_BLOCKS, \
                 CLOSING_ANGLE_BRACKET, JSON_BASIC, XML_TAGS"
            ),
        }
    }
}

/// Primary classification of a step, shared by the structured protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Status {
    EnvironmentHangAndReset,
    NoInputWasGiven,
    SuccessButEmptyResponse,
    Success,
}

impl Status {
    /// Pick exactly one status: hung, then empty input, then empty output.
    pub fn of(outcome: &StepOutcome) -> Self {
        if outcome.hung {
            Self::EnvironmentHangAndReset
        } else if outcome.input_was_empty {
            Self::NoInputWasGiven
        } else if outcome.output_was_empty {
            Self::SuccessButEmptyResponse
        } else {
            Self::Success
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::EnvironmentHangAndReset => "ENVIRONMENT_HANG_AND_RESET",
            Self::NoInputWasGiven => "NO_INPUT_WAS_GIVEN",
            Self::SuccessButEmptyResponse => "SUCCESS_BUT_EMPTY_RESPONSE",
            Self::Success => "SUCCESS",
        }
    }
}

const NOTE_TOO_MUCH_OUTPUT: &str = "TOO_MUCH_OUTPUT_NOT_ALL_SHOWN";
const NOTE_RETURN_TO_BASH: &str = "DETECTED_RETURN_TO_BASH";

/// Secondary notes, only meaningful when the status is `Success`.
fn secondary_notes(outcome: &StepOutcome) -> Vec<&'static str> {
    if Status::of(outcome) != Status::Success {
        return Vec::new();
    }
    let mut notes = Vec::new();
    if outcome.scrolled_screen {
        notes.push(NOTE_TOO_MUCH_OUTPUT);
    }
    if outcome.returned_to_bash {
        notes.push(NOTE_RETURN_TO_BASH);
    }
    notes
}

const PROSE_HUNG: &str = "Your previous command seems to have been running for too long \
and hung the system. Your environment has been completely reset.\n";
const PROSE_NO_INPUT: &str = "You did not specify any input into the terminal, or the \
command to be run. Remember the format described above.\n";
const PROSE_NO_OUTPUT: &str = "Your previous command did not output anything. Are you \
giving it the input it expects?\n";
const PROSE_SCROLLED: &str = "Your previous command produced so much text, you see some \
scroll beyond the margins of the terminal. Your command output does not fit on a single \
screen and you might have to filter it.\n";
const PROSE_IN_SHELL: &str = "You see that your command finished running and the shell \
is waiting for the next command.\n";
const PROSE_NOT_IN_SHELL: &str = "Your command output something. It does not seem that \
you're in the shell, a different command might be expecting input from you.\n";
const PROSE_NEXT: &str = "What do you do next?";

/// Natural-language rendering shared by the prose protocols.
///
/// `render_screen` formats the visible lines; it is only called on success.
fn prose(outcome: &StepOutcome, render_screen: impl FnOnce(&[String]) -> String) -> String {
    let mut out = String::new();
    match Status::of(outcome) {
        Status::EnvironmentHangAndReset => out.push_str(PROSE_HUNG),
        Status::NoInputWasGiven => out.push_str(PROSE_NO_INPUT),
        Status::SuccessButEmptyResponse => out.push_str(PROSE_NO_OUTPUT),
        Status::Success => {
            if outcome.scrolled_screen {
                out.push_str(PROSE_SCROLLED);
            }
            out.push_str(if outcome.returned_to_bash {
                PROSE_IN_SHELL
            } else {
                PROSE_NOT_IN_SHELL
            });
            out.push_str("You see this new text on the screen:\n\n");
            out.push_str(&render_screen(&outcome.visible_lines));
            out.push('\n');
        }
    }
    out.push_str(PROSE_NEXT);
    out
}
