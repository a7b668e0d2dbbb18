//! Lines starting with `>` are commands; the screen comes back `>`-quoted.

use regex::Regex;
use std::sync::LazyLock;

use super::prose;
use crate::sandbox::StepOutcome;

// Up to three characters of lead-in (list markers, indentation) are allowed.
static COMMAND_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^.{0,3}>\s*(.+)").expect("Invalid regex for command lines"));

pub(super) fn extract(agent_reply: &str) -> String {
    let commands: Vec<&str> = agent_reply
        .split('\n')
        .filter_map(|line| COMMAND_LINE.captures(line))
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect();
    format!("{}\n", commands.join("\n"))
}

pub(super) fn wrap(outcome: &StepOutcome) -> String {
    prose(outcome, |lines| {
        lines
            .iter()
            .map(|line| format!(">{line}"))
            .collect::<Vec<_>>()
            .join("\n")
    })
}
