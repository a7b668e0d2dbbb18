//! Build a task's image and drop into an interactive shell inside it.

use anyhow::{Context, Result};
use bollard::Docker;
use std::path::Path;
use tokio::process::Command;
use tracing::info;

use crate::config::TaskConfig;
use crate::sandbox::{container_name_for_worker, DockerSandbox, SandboxError};

/// Runs the debug-env command.
pub(crate) async fn run(config: &Path) -> Result<()> {
    let task = TaskConfig::load(config)?;
    let environment = task.main_environment()?.clone();

    let docker = Docker::connect_with_local_defaults()
        .map_err(|e| SandboxError::docker_unavailable(e.to_string()))?;
    let sandbox = DockerSandbox::new(
        docker,
        &task.name,
        environment,
        container_name_for_worker(0),
    );
    sandbox.build().await?;

    let args = shell_args(sandbox.image_tag());
    info!("Starting interactive shell: docker {}", args.join(" "));

    let status = Command::new("docker")
        .args(&args)
        .status()
        .await
        .context("Failed to launch docker. Is the docker CLI installed?")?;

    if !status.success() {
        anyhow::bail!("Interactive shell exited with {status}");
    }
    Ok(())
}

/// Arguments for `docker` that open a throwaway interactive container.
fn shell_args(image_tag: &str) -> Vec<String> {
    vec![
        "run".to_string(),
        "-it".to_string(),
        "--rm".to_string(),
        format!("{image_tag}:latest"),
    ]
}
