use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::container::{
    AttachContainerOptions, AttachContainerResults, CPUStats, Config as ContainerConfig,
    CreateContainerOptions, InspectContainerOptions, RemoveContainerOptions, StatsOptions,
    StopContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::BuildImageOptions;
use bollard::service::HostConfig;
use bollard::Docker;
use bytes::Bytes;
use futures_util::StreamExt;
use std::pin::Pin;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::context;
use super::{Sandbox, SandboxError, StepOutcome, TerminalClassifier};
use crate::config::EnvironmentConfig;
use crate::templates;

/// Upper bound on waiting for an auto-removed container to disappear.
const REMOVAL_WAIT: Duration = Duration::from_secs(10);

/// Seconds Docker waits before killing a container we asked to stop.
const STOP_GRACE_SECS: i64 = 1;

/// Fixed delays used in place of real completion detection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct SettleTimings {
    /// Pause after writing, before checking the container still exists.
    pub short: Duration,
    /// Pause before sampling CPU load.
    pub long: Duration,
    /// Extra pause when the container is still busy.
    pub busy: Duration,
    /// CPU utilization (in cores) above which the container counts as busy.
    pub busy_threshold: f64,
}

impl Default for SettleTimings {
    fn default() -> Self {
        Self {
            short: Duration::from_millis(200),
            long: Duration::from_millis(800),
            busy: Duration::from_secs(10),
            busy_threshold: 0.2,
        }
    }
}

/// Live connection to a running container's TTY.
struct Session {
    // The writer is not Sync; the mutex keeps the sandbox shareable by reference.
    input: Mutex<Pin<Box<dyn AsyncWrite + Send>>>,
    output: mpsc::UnboundedReceiver<Bytes>,
    pump: JoinHandle<()>,
}

impl Session {
    /// Take whatever output has arrived so far without waiting for more.
    fn drain(&mut self) -> Vec<u8> {
        let mut buf = Vec::new();
        while let Ok(chunk) = self.output.try_recv() {
            buf.extend_from_slice(&chunk);
        }
        buf
    }
}

/// Drives one named container through build, boot, keystrokes and teardown.
pub(crate) struct DockerSandbox {
    docker: Docker,
    environment: EnvironmentConfig,
    image_tag: String,
    container_name: String,
    timings: SettleTimings,
    classifier: TerminalClassifier,
    session: Option<Session>,
}

impl DockerSandbox {
    pub fn new(
        docker: Docker,
        task_name: &str,
        environment: EnvironmentConfig,
        container_name: impl Into<String>,
    ) -> Self {
        let classifier = TerminalClassifier::new(environment.docker.prompt_marker());
        Self {
            docker,
            image_tag: image_tag(task_name),
            environment,
            container_name: container_name.into(),
            timings: SettleTimings::default(),
            classifier,
            session: None,
        }
    }

    pub fn with_timings(mut self, timings: SettleTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn image_tag(&self) -> &str {
        &self.image_tag
    }

    /// Build (or rebuild from cache) the image for this environment.
    pub async fn build(&self) -> Result<()> {
        let context_dir = context::materialize(&self.environment, &std::env::temp_dir())?;
        let tar_bytes = Bytes::from(context::tarball(&context_dir)?);

        info!(
            "Building image {} from {}",
            self.image_tag,
            context_dir.display()
        );

        let build_options = BuildImageOptions {
            dockerfile: "Dockerfile".to_string(),
            t: self.image_tag.clone(),
            rm: true,
            forcerm: true,
            ..Default::default()
        };

        let mut stream = self.docker.build_image(build_options, None, Some(tar_bytes));

        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(output) => {
                    if let Some(stream_text) = &output.stream {
                        let trimmed = stream_text.trim();
                        if !trimmed.is_empty() {
                            debug!("build: {}", trimmed);
                        }
                    } else if let Some(error) = &output.error {
                        return Err(SandboxError::build_failed(&self.image_tag, error).into());
                    } else if let Some(message) = output
                        .error_detail
                        .as_ref()
                        .and_then(|detail| detail.message.as_ref())
                    {
                        return Err(SandboxError::build_failed(&self.image_tag, message).into());
                    }
                }
                Err(e) => {
                    return Err(self.docker_error("build image", e));
                }
            }
        }

        debug!("Image {} is ready", self.image_tag);
        Ok(())
    }

    fn container_config(&self, seccomp_profile: &str) -> Result<ContainerConfig<String>> {
        let docker = &self.environment.docker;

        Ok(ContainerConfig {
            image: Some(format!("{}:latest", self.image_tag)),
            hostname: Some(docker.hostname.clone()),
            tty: Some(true),
            open_stdin: Some(true),
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            host_config: Some(HostConfig {
                auto_remove: Some(true),
                cap_add: Some(docker.cap_add.clone()),
                security_opt: Some(vec![format!("seccomp={seccomp_profile}")]),
                cpu_period: Some(docker.cpu_period),
                cpu_quota: Some(docker.cpu_quota),
                memory: Some(parse_memory_limit(&docker.mem_limit)?),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    fn load_seccomp_profile(&self) -> Result<String> {
        match &self.environment.docker.seccomp_profile {
            Some(path) => {
                let path = expand_path(path)?;
                std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read seccomp profile: {path}"))
            }
            None => Ok(templates::SECCOMP_PROFILE.to_string()),
        }
    }

    async fn attach(&self) -> Result<Session> {
        let AttachContainerResults { mut output, input } = self
            .docker
            .attach_container(
                &self.container_name,
                Some(AttachContainerOptions::<String> {
                    stdin: Some(true),
                    stdout: Some(true),
                    stderr: Some(true),
                    stream: Some(true),
                    logs: Some(false),
                    detach_keys: None,
                }),
            )
            .await
            .map_err(|e| self.docker_error("attach", e))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let container_name = self.container_name.clone();
        let pump = tokio::spawn(async move {
            while let Some(chunk) = output.next().await {
                match chunk {
                    Ok(log) => {
                        if tx.send(log.into_bytes()).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!("Attach stream for {} ended: {}", container_name, e);
                        break;
                    }
                }
            }
        });

        Ok(Session {
            input: Mutex::new(input),
            output: rx,
            pump,
        })
    }

    async fn ensure_container_exists(&self) -> Result<()> {
        self.docker
            .inspect_container(&self.container_name, None::<InspectContainerOptions>)
            .await
            .map(|_| ())
            .map_err(|e| self.docker_error("inspect", e))
    }

    /// CPU load in cores, from the two snapshots Docker returns in one stats call.
    async fn cpu_utilization(&self) -> Result<f64> {
        let mut stream = Box::pin(self.docker.stats(
            &self.container_name,
            Some(StatsOptions {
                stream: false,
                one_shot: false,
            }),
        ));
        let stats = stream
            .next()
            .await
            .ok_or_else(|| SandboxError::container_failed("stats stream was empty"))?
            .map_err(|e| self.docker_error("stats", e))?;

        Ok(cpu_utilization(
            CpuSnapshot::from_stats(&stats.precpu_stats),
            CpuSnapshot::from_stats(&stats.cpu_stats),
        ))
    }

    /// True once Docker reports the container removed (or already gone).
    async fn wait_for_removal(&self) -> bool {
        let mut stream = Box::pin(self.docker.wait_container(
            &self.container_name,
            Some(WaitContainerOptions {
                condition: "removed",
            }),
        ));

        let wait = async {
            while let Some(result) = stream.next().await {
                if let Err(e) = result {
                    if !is_not_found(&e) {
                        debug!("Waiting for {} removal: {}", self.container_name, e);
                    }
                    break;
                }
            }
        };

        if tokio::time::timeout(REMOVAL_WAIT, wait).await.is_err() {
            warn!(
                "Container {} was not removed within {:?}",
                self.container_name, REMOVAL_WAIT
            );
            return false;
        }
        true
    }

    /// Remove the container regardless of state. A container that never
    /// started is not covered by auto-remove and would block the name.
    async fn force_remove(&self) -> Result<()> {
        match self
            .docker
            .remove_container(
                &self.container_name,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(()) => {
                debug!("Force-removed container {}", self.container_name);
                Ok(())
            }
            // 409: removal already in progress.
            Err(e) if is_not_found(&e) || has_status(&e, 409) => Ok(()),
            Err(e) => Err(self.docker_error("remove", e)),
        }
    }

    fn docker_error(&self, operation: &str, e: BollardError) -> anyhow::Error {
        if is_not_found(&e) {
            SandboxError::container_gone(&self.container_name).into()
        } else {
            SandboxError::container_failed(format!("{operation} {}: {e}", self.container_name))
                .into()
        }
    }
}

#[async_trait]
impl Sandbox for DockerSandbox {
    async fn reset(&mut self) -> Result<()> {
        self.build().await?;
        let seccomp_profile = self.load_seccomp_profile()?;
        self.stop().await?;

        let container_config = self.container_config(&seccomp_profile)?;

        debug!("Creating container: {}", self.container_name);
        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name: self.container_name.clone(),
                    platform: None,
                }),
                container_config,
            )
            .await
            .map_err(|e| self.docker_error("create", e))?;

        debug!("Starting container");
        self.docker
            .start_container::<String>(&self.container_name, None)
            .await
            .map_err(|e| self.docker_error("start", e))?;

        self.session = Some(self.attach().await?);
        self.classifier.reset();

        info!("Container {} is up", self.container_name);
        Ok(())
    }

    async fn act(&mut self, action: &[u8]) -> Result<StepOutcome> {
        if action.is_empty() {
            return Ok(StepOutcome::empty_input());
        }

        {
            let input = self
                .session
                .as_mut()
                .context("Sandbox was not reset before acting")?
                .input
                .get_mut();
            input
                .write_all(action)
                .await
                .context("Failed to write to container")?;
            input
                .flush()
                .await
                .context("Failed to flush container input")?;
        }

        tokio::time::sleep(self.timings.short).await;
        self.ensure_container_exists().await?;
        tokio::time::sleep(self.timings.long).await;

        let load = self.cpu_utilization().await?;
        if load > self.timings.busy_threshold {
            debug!(
                "Container busy ({:.2} cores), waiting {:?} before reading",
                load, self.timings.busy
            );
            tokio::time::sleep(self.timings.busy).await;
        }

        let raw_output = self
            .session
            .as_mut()
            .map(Session::drain)
            .unwrap_or_default();
        debug!("Read {} bytes from container", raw_output.len());

        Ok(self.classifier.classify(raw_output))
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(session) = self.session.take() {
            session.pump.abort();
        }

        let result = self
            .docker
            .stop_container(
                &self.container_name,
                Some(StopContainerOptions { t: STOP_GRACE_SECS }),
            )
            .await;
        let stopped = match classify_stop(result) {
            Ok(StopResult::Gone) => return Ok(()),
            Ok(stopped) => stopped,
            Err(e) => return Err(self.docker_error("stop", e)),
        };
        debug!("Stop {}: {:?}", self.container_name, stopped);

        let removed = stopped == StopResult::Stopped && self.wait_for_removal().await;
        if !removed {
            self.force_remove().await?;
        }
        Ok(())
    }
}

/// Cumulative CPU counters at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CpuSnapshot {
    pub container_total: u64,
    pub system_total: u64,
    pub online_cpus: u64,
}

impl CpuSnapshot {
    fn from_stats(stats: &CPUStats) -> Self {
        let online_cpus = stats.online_cpus.unwrap_or_else(|| {
            stats
                .cpu_usage
                .percpu_usage
                .as_ref()
                .map_or(1, |per_cpu| per_cpu.len() as u64)
        });
        Self {
            container_total: stats.cpu_usage.total_usage,
            system_total: stats.system_cpu_usage.unwrap_or(0),
            online_cpus,
        }
    }
}

/// Container CPU delta over host CPU delta, scaled by online CPUs.
#[allow(clippy::cast_precision_loss)]
pub(crate) fn cpu_utilization(previous: CpuSnapshot, current: CpuSnapshot) -> f64 {
    let container_delta = current.container_total.saturating_sub(previous.container_total);
    let system_delta = current.system_total.saturating_sub(previous.system_total);
    if system_delta == 0 {
        return 0.0;
    }
    container_delta as f64 * current.online_cpus as f64 / system_delta as f64
}

/// Image tag derived from a task name: word characters only, lower-cased.
pub(crate) fn image_tag(task_name: &str) -> String {
    task_name
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect::<String>()
        .to_lowercase()
}

/// Container name reserved for one worker of this process.
pub(crate) fn container_name_for_worker(worker: usize) -> String {
    format!(
        "challenge_sandbox_from_pid{}_worker{worker}",
        std::process::id()
    )
}

fn is_not_found(e: &BollardError) -> bool {
    has_status(e, 404)
}

fn is_not_modified(e: &BollardError) -> bool {
    has_status(e, 304)
}

fn has_status(e: &BollardError, status: u16) -> bool {
    matches!(
        e,
        BollardError::DockerResponseServerError { status_code, .. } if *status_code == status
    )
}

/// What a stop request told us about the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopResult {
    /// It was running and is now stopping; auto-remove will follow.
    Stopped,
    /// It was not running (exited, or created but never started).
    NotRunning,
    /// No such container.
    Gone,
}

fn classify_stop(result: Result<(), BollardError>) -> Result<StopResult, BollardError> {
    match result {
        Ok(()) => Ok(StopResult::Stopped),
        Err(e) if is_not_found(&e) => Ok(StopResult::Gone),
        Err(e) if is_not_modified(&e) => Ok(StopResult::NotRunning),
        Err(e) => Err(e),
    }
}

/// Expand ~ to home directory
fn expand_path(path: &str) -> Result<String> {
    if let Some(rest) = path.strip_prefix("~/") {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(rest).display().to_string())
    } else {
        Ok(path.to_string())
    }
}

/// Parse memory limit string (e.g., "8g", "512m") to bytes
fn parse_memory_limit(limit: &str) -> Result<i64> {
    let limit = limit.trim().to_lowercase();

    let (digits, unit): (&str, i64) = if let Some(num) = limit.strip_suffix('g') {
        (num, 1024 * 1024 * 1024)
    } else if let Some(num) = limit.strip_suffix('m') {
        (num, 1024 * 1024)
    } else if let Some(num) = limit.strip_suffix('k') {
        (num, 1024)
    } else {
        (limit.as_str(), 1)
    };

    let amount: i64 = digits.parse().context("Invalid memory limit")?;
    amount
        .checked_mul(unit)
        .with_context(|| format!("Memory limit too large: {limit}"))
}
