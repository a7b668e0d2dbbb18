use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod agent;
mod commands;
mod config;
mod error;
mod harness;
mod protocol;
mod sandbox;
mod state;
mod store;
mod templates;
mod transcript;

#[derive(Parser)]
#[command(name = "ctfbench")]
#[command(
    author,
    version,
    about = "Evaluate agents on capture-the-flag tasks in disposable Docker terminals"
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Also write JSON logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an agent against one elicitation of a task
    Run {
        /// Task definition (TOML)
        config: PathBuf,

        /// Which elicitation of the task to use (0-based)
        elicitation_index: usize,

        /// Agent provider: openai, together, anthropic or human
        #[arg(short, long, default_value = "openai")]
        agent: agent::Provider,

        /// Model name (default depends on the provider)
        #[arg(short, long)]
        model: Option<String>,

        /// Number of independent runs
        #[arg(long, default_value = "1")]
        total_runs: usize,

        /// Number of runs executing at the same time
        #[arg(long, default_value = "1")]
        parallel_runs: usize,

        /// Directory where run logs and snapshots are stored
        #[arg(long, default_value = "runs")]
        store_dir: PathBuf,

        /// Keep agent and terminal text out of the logs
        #[arg(long)]
        quiet_comms: bool,

        /// Seconds to wait when the container is still busy after a command
        #[arg(long)]
        busy_wait_secs: Option<u64>,
    },

    /// Parse a task definition and print what it declares
    Validate {
        /// Task definition (TOML)
        config: PathBuf,
    },

    /// Build a task's image and open an interactive shell in it
    DebugEnv {
        /// Task definition (TOML)
        config: PathBuf,
    },

    /// Write a sample task into the current directory
    Init {
        /// Force overwrite existing files
        #[arg(short, long)]
        force: bool,
    },
}

/// Console logs on stderr, plus JSON lines in `log_file` when given.
///
/// The returned guard flushes the file writer on drop and must outlive
/// every log call.
fn init_logging(verbose: bool, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = if verbose {
        EnvFilter::new("ctfbench=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ctfbench=info"))
    };

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("--log-file must name a file"))?;
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            let layer = fmt::layer().json().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging(cli.verbose, cli.log_file.as_deref())?;

    match cli.command {
        Commands::Run {
            config,
            elicitation_index,
            agent,
            model,
            total_runs,
            parallel_runs,
            store_dir,
            quiet_comms,
            busy_wait_secs,
        } => {
            commands::run::run(commands::run::RunArgs {
                config,
                elicitation_index,
                agent,
                model,
                total_runs,
                parallel_runs,
                store_dir,
                quiet_comms,
                busy_wait_secs,
            })
            .await?;
        }
        Commands::Validate { config } => {
            commands::validate::run(&config)?;
        }
        Commands::DebugEnv { config } => {
            commands::debug_env::run(&config).await?;
        }
        Commands::Init { force } => {
            commands::init::run(force)?;
        }
    }

    Ok(())
}
