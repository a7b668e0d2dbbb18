//! Batch execution of evaluation runs.
//!
//! `total_runs` independent runs are pulled from a shared counter by a pool
//! of `parallel_runs` workers. Each worker owns one container name for its
//! whole lifetime, so concurrent runs never touch the same container.

pub(crate) mod format;

use anyhow::{Context, Result};
use bollard::Docker;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::agent::{AgentFactory, Provider, RetryPolicy};
use crate::config::TaskConfig;
use crate::harness::{Harness, HarnessOptions};
use crate::sandbox::{container_name_for_worker, DockerSandbox, SandboxError, SettleTimings};
use crate::state::RunStatus;
use crate::store::{JsonlStore, RunStore};

use format::{format_banner, format_run_finished, format_summary, BannerInfo};

/// Everything `ctfbench run` needs.
#[derive(Debug, Clone)]
pub(crate) struct RunArgs {
    pub config: PathBuf,
    pub elicitation_index: usize,
    pub agent: Provider,
    pub model: Option<String>,
    pub total_runs: usize,
    pub parallel_runs: usize,
    pub store_dir: PathBuf,
    pub quiet_comms: bool,
    pub busy_wait_secs: Option<u64>,
}

/// A finished run as reported by a worker.
#[derive(Debug)]
struct Finished {
    worker: usize,
    status: RunStatus,
    run_id: Option<String>,
}

/// Hands out run slots until `total` have been claimed.
#[derive(Debug)]
struct RunQueue {
    next: AtomicUsize,
    total: usize,
}

impl RunQueue {
    fn new(total: usize) -> Self {
        Self {
            next: AtomicUsize::new(0),
            total,
        }
    }

    /// Claim the next run slot, or `None` when the batch is exhausted.
    fn claim(&self) -> Option<usize> {
        let slot = self.next.fetch_add(1, Ordering::SeqCst);
        (slot < self.total).then_some(slot)
    }
}

/// Number of workers actually worth spawning.
fn worker_count(total_runs: usize, parallel_runs: usize) -> usize {
    parallel_runs.max(1).min(total_runs)
}

/// Settle timings with an optional override of the busy pause.
fn settle_timings(busy_wait_secs: Option<u64>) -> SettleTimings {
    let mut timings = SettleTimings::default();
    if let Some(secs) = busy_wait_secs {
        timings.busy = Duration::from_secs(secs);
    }
    timings
}

/// Tally of terminal statuses across the batch.
fn tally(statuses: impl IntoIterator<Item = RunStatus>) -> BTreeMap<RunStatus, usize> {
    let mut counts = BTreeMap::new();
    for status in statuses {
        *counts.entry(status).or_insert(0) += 1;
    }
    counts
}

/// Runs the batch and prints the summary.
pub(crate) async fn run(args: RunArgs) -> Result<()> {
    let task = Arc::new(TaskConfig::load(&args.config)?);
    let protocol = task
        .elicitation(args.elicitation_index)?
        .terminal_interop_protocol;
    let environment = task.main_environment()?.clone();

    let docker = Docker::connect_with_local_defaults()
        .map_err(|e| SandboxError::docker_unavailable(e.to_string()))?;
    docker
        .ping()
        .await
        .map_err(|e| SandboxError::docker_unavailable(e.to_string()))
        .context("Cannot ping Docker daemon. Is Docker running?")?;

    let factory = Arc::new(AgentFactory::from_env(
        args.agent,
        args.model.clone(),
        RetryPolicy::default(),
    )?);
    let store: Arc<dyn RunStore> = Arc::new(JsonlStore::open(&args.store_dir)?);
    let harness = Arc::new(Harness::new(
        store,
        HarnessOptions {
            quiet_comms: args.quiet_comms,
        },
    ));

    let workers = worker_count(args.total_runs, args.parallel_runs);
    print!(
        "{}",
        format_banner(&BannerInfo {
            task: task.name.clone(),
            elicitation_index: args.elicitation_index,
            protocol: protocol.to_string(),
            agent: factory.build().identify(),
            total_runs: args.total_runs,
            parallel_runs: workers,
            store_dir: args.store_dir.display().to_string(),
        })
    );

    let queue = Arc::new(RunQueue::new(args.total_runs));
    let timings = settle_timings(args.busy_wait_secs);
    let (tx, mut rx) = mpsc::unbounded_channel::<Finished>();
    let mut handles = Vec::with_capacity(workers);

    for worker in 0..workers {
        let task = Arc::clone(&task);
        let factory = Arc::clone(&factory);
        let harness = Arc::clone(&harness);
        let queue = Arc::clone(&queue);
        let tx = tx.clone();
        let mut sandbox = DockerSandbox::new(
            docker.clone(),
            &task.name,
            environment.clone(),
            container_name_for_worker(worker),
        )
        .with_timings(timings);
        let elicitation_index = args.elicitation_index;

        handles.push(tokio::spawn(async move {
            while let Some(slot) = queue.claim() {
                info!(event = "run_claimed", worker, slot);
                let mut agent = factory.build();
                let finished = match harness
                    .run(&task, elicitation_index, agent.as_mut(), &mut sandbox)
                    .await
                {
                    Ok(run) => Finished {
                        worker,
                        status: run.status,
                        run_id: Some(run.id.to_string()),
                    },
                    Err(e) => {
                        error!(worker, slot, "Run could not be recorded: {e:#}");
                        Finished {
                            worker,
                            status: RunStatus::Error,
                            run_id: None,
                        }
                    }
                };
                if tx.send(finished).is_err() {
                    break;
                }
            }
        }));
    }
    drop(tx);

    let mut statuses = Vec::with_capacity(args.total_runs);
    while let Some(finished) = rx.recv().await {
        statuses.push(finished.status);
        println!(
            "{}",
            format_run_finished(
                statuses.len(),
                args.total_runs,
                finished.worker,
                finished.status,
                finished.run_id.as_deref(),
            )
        );
    }

    for handle in handles {
        if let Err(e) = handle.await {
            error!("Worker task failed: {e}");
        }
    }

    print!("{}", format_summary(&tally(statuses)));
    Ok(())
}
