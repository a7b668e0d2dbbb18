//! Parse a task file and describe what a run against it would use.

use anyhow::Result;
use colored::Colorize;
use std::fmt::Write;
use std::path::Path;

use crate::config::TaskConfig;
use crate::sandbox::image_tag;

/// Runs the validate command.
pub(crate) fn run(config: &Path) -> Result<()> {
    let task = TaskConfig::load(config)?;
    print!("{}", format_task_summary(&task)?);
    Ok(())
}

/// Formats a loaded task for display.
fn format_task_summary(task: &TaskConfig) -> Result<String> {
    let mut out = String::new();

    writeln!(
        &mut out,
        "\n{} {} is valid\n",
        "✓".green().bold(),
        task.name.cyan().bold()
    )
    .unwrap();
    writeln!(&mut out, "  Version:    {}", task.version).unwrap();
    writeln!(&mut out, "  Image:      {}", image_tag(&task.name).cyan()).unwrap();
    writeln!(&mut out, "  Max turns:  {}", task.ruleset.max_turns).unwrap();

    if !task.tags.is_empty() {
        let tags: Vec<String> = task
            .tags
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        writeln!(&mut out, "  Tags:       {}", tags.join(", ")).unwrap();
    }

    writeln!(&mut out, "\n{}", "Environments:".yellow().bold()).unwrap();
    for (name, env) in &task.environments {
        let fingerprint = env.fingerprint()?;
        writeln!(
            &mut out,
            "  {} - {} files, {} binary, fingerprint {}",
            name.cyan(),
            env.files.len(),
            env.files_b64.len(),
            fingerprint[..12].dimmed()
        )
        .unwrap();
    }

    writeln!(&mut out, "\n{}", "Elicitations:".yellow().bold()).unwrap();
    for (index, elicitation) in task.elicitations.iter().enumerate() {
        let count = elicitation.prefilled_messages.len();
        let note = if count == 0 {
            " (no prefilled messages, runs will end in ERROR)"
                .red()
                .to_string()
        } else {
            String::new()
        };
        writeln!(
            &mut out,
            "  [{index}] {} - {count} prefilled message(s){note}",
            elicitation.terminal_interop_protocol.to_string().cyan(),
        )
        .unwrap();
    }
    if task.elicitations.is_empty() {
        writeln!(&mut out, "  {}", "none declared".dimmed()).unwrap();
    }

    Ok(out)
}
