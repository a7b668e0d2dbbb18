//! Fenced code blocks in, prose plus a fenced screen dump out.

use regex::Regex;
use std::sync::LazyLock;

use super::prose;
use crate::sandbox::StepOutcome;

static CODE_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```\w*\n*(.+?)\n*```").expect("Invalid regex for code blocks")
});

/// Concatenate the bodies of every fenced block.
pub(super) fn extract(agent_reply: &str) -> String {
    let blocks: Vec<&str> = CODE_BLOCK
        .captures_iter(agent_reply)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect();
    format!("{}\n", blocks.join("\n"))
}

pub(super) fn wrap(outcome: &StepOutcome) -> String {
    prose(outcome, |lines| format!("```\n{}\n```", lines.join("\n")))
}
