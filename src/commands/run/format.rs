//! Formatting functions for batch run output.
//!
//! Pure functions returning strings; printing happens in the caller.

use colored::{ColoredString, Colorize};
use std::collections::BTreeMap;
use std::fmt::Write;

use crate::state::RunStatus;

/// Banner information shown before the first run starts.
#[derive(Debug, Clone)]
pub(crate) struct BannerInfo {
    pub task: String,
    pub elicitation_index: usize,
    pub protocol: String,
    pub agent: String,
    pub total_runs: usize,
    pub parallel_runs: usize,
    pub store_dir: String,
}

/// Status word in its summary color.
pub(crate) fn colored_status(status: RunStatus) -> ColoredString {
    let label = status.to_string();
    match status {
        RunStatus::Success => label.green().bold(),
        RunStatus::Failure => label.yellow().bold(),
        RunStatus::Error => label.red().bold(),
        RunStatus::Refused => label.magenta().bold(),
        RunStatus::Running => label.dimmed(),
    }
}

/// Formats the startup banner for display.
pub(crate) fn format_banner(info: &BannerInfo) -> String {
    let mut out = String::new();

    writeln!(&mut out, "\n{}", "━".repeat(50).dimmed()).unwrap();
    writeln!(&mut out, "{}", "   🚩 ctfbench".yellow().bold()).unwrap();
    writeln!(&mut out, "{}", "━".repeat(50).dimmed()).unwrap();

    writeln!(&mut out, "  Task:         {}", info.task.cyan().bold()).unwrap();
    writeln!(
        &mut out,
        "  Elicitation:  {} ({})",
        info.elicitation_index.to_string().cyan(),
        info.protocol.cyan()
    )
    .unwrap();
    writeln!(&mut out, "  Agent:        {}", info.agent.cyan()).unwrap();
    writeln!(
        &mut out,
        "  Runs:         {} ({} in parallel)",
        info.total_runs.to_string().cyan(),
        info.parallel_runs.to_string().cyan()
    )
    .unwrap();
    writeln!(&mut out, "  Store:        {}", info.store_dir.cyan()).unwrap();

    writeln!(&mut out, "{}", "━".repeat(50).dimmed()).unwrap();

    out
}

/// One line per finished run, e.g. `[3/10] worker 1: SUCCESS (run-id)`.
pub(crate) fn format_run_finished(
    done: usize,
    total: usize,
    worker: usize,
    status: RunStatus,
    run_id: Option<&str>,
) -> String {
    let counter = format!("[{done}/{total}]").dimmed();
    match run_id {
        Some(id) => format!(
            "{counter} worker {worker}: {} {}",
            colored_status(status),
            id.dimmed()
        ),
        None => format!("{counter} worker {worker}: {}", colored_status(status)),
    }
}

/// Share of `count` in `total` as a percentage; zero when nothing ran.
#[allow(clippy::cast_precision_loss)]
pub(crate) fn percentage(count: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    count as f64 * 100.0 / total as f64
}

/// Formats the final per-status summary.
pub(crate) fn format_summary(counts: &BTreeMap<RunStatus, usize>) -> String {
    let total: usize = counts.values().sum();
    let mut out = String::new();

    writeln!(&mut out, "\n{}", "━".repeat(50).dimmed()).unwrap();
    writeln!(&mut out, "{}", "   Results".yellow().bold()).unwrap();
    writeln!(&mut out, "{}", "━".repeat(50).dimmed()).unwrap();

    for status in RunStatus::TERMINAL {
        let count = counts.get(&status).copied().unwrap_or(0);
        writeln!(
            &mut out,
            "  {:<10} {:>4}  {:>5.1}%",
            colored_status(status),
            count,
            percentage(count, total)
        )
        .unwrap();
    }

    writeln!(&mut out, "{}", "━".repeat(50).dimmed()).unwrap();
    writeln!(&mut out, "  Total:     {}", total.to_string().cyan()).unwrap();

    out
}
