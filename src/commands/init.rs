//! Write the sample task definition into the current directory.

use anyhow::{Context, Result};
use colored::Colorize;
use std::fs;
use tracing::info;

use crate::templates;

const TASK_FILE: &str = "task.toml";

/// What `init` does to an existing or missing task file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteResult {
    Created,
    Overwritten,
    Skipped,
}

fn decide(exists: bool, force: bool) -> WriteResult {
    match (exists, force) {
        (false, _) => WriteResult::Created,
        (true, true) => WriteResult::Overwritten,
        (true, false) => WriteResult::Skipped,
    }
}

/// Runs the init command.
pub(crate) fn run(force: bool) -> Result<()> {
    let path = std::env::current_dir()
        .context("Failed to get current directory")?
        .join(TASK_FILE);
    info!("Writing sample task to {}", path.display());

    let result = decide(path.exists(), force);
    if result != WriteResult::Skipped {
        fs::write(&path, templates::SAMPLE_TASK_TOML)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    println!("{}", format_result(result));
    Ok(())
}

fn format_result(result: WriteResult) -> String {
    match result {
        WriteResult::Created => format!(
            "{} Sample task ready in {}. Check it with {}",
            "✓".green().bold(),
            TASK_FILE.cyan(),
            "ctfbench validate task.toml".green()
        ),
        WriteResult::Overwritten => format!(
            "{} Sample task ready in {} (overwritten)",
            "↻".blue(),
            TASK_FILE.cyan()
        ),
        WriteResult::Skipped => format!(
            "{} {} already exists, use --force to overwrite",
            "⊘".yellow(),
            TASK_FILE
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TaskConfig;

    #[test]
    fn test_sample_task_is_valid() {
        let task = TaskConfig::from_toml(templates::SAMPLE_TASK_TOML).unwrap();
        assert_eq!(task.elicitations.len(), 2);
        assert!(task.main_environment().is_ok());
    }

    #[test]
    fn test_decide() {
        assert_eq!(decide(false, false), WriteResult::Created);
        assert_eq!(decide(false, true), WriteResult::Created);
        assert_eq!(decide(true, true), WriteResult::Overwritten);
        assert_eq!(decide(true, false), WriteResult::Skipped);
    }

    #[test]
    fn test_format_result() {
        assert!(format_result(WriteResult::Created).contains("Sample task ready"));
        assert!(format_result(WriteResult::Overwritten).contains("overwritten"));
        assert!(format_result(WriteResult::Skipped).contains("--force"));
    }
}
