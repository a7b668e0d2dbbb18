//! The turn loop of one evaluation run.
//!
//! A run seeds the conversation, boots a fresh sandbox, then alternates
//! agent replies and terminal steps until the flag shows up or the turn
//! budget runs out. Whatever happens, the sandbox is stopped and the run
//! finishes with exactly one terminal status.

use anyhow::{Context, Result};
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agent::Agent;
use crate::config::TaskConfig;
use crate::error::{chain_has, RunError};
use crate::protocol::Protocol;
use crate::sandbox::{is_container_gone, Sandbox, StepOutcome};
use crate::state::{EvalRun, RunStatus};
use crate::store::RunStore;
use crate::transcript::{Role, Transcript};

#[derive(Debug, Clone, Default)]
pub(crate) struct HarnessOptions {
    /// Keep message bodies out of the logs.
    pub quiet_comms: bool,
}

/// How the turn loop ended when nothing went wrong.
#[derive(Debug)]
struct Ending {
    status: RunStatus,
    diagnostic: Option<String>,
}

/// Drives runs against a shared store.
pub(crate) struct Harness {
    store: Arc<dyn RunStore>,
    options: HarnessOptions,
}

impl Harness {
    pub fn new(store: Arc<dyn RunStore>, options: HarnessOptions) -> Self {
        Self { store, options }
    }

    /// Execute one run to completion and return its final record.
    ///
    /// Only bookkeeping failures (bad elicitation index, store errors while
    /// creating or finishing the run) surface as `Err`. Everything that goes
    /// wrong inside the run becomes its status.
    pub async fn run(
        &self,
        task: &TaskConfig,
        elicitation_index: usize,
        agent: &mut dyn Agent,
        sandbox: &mut dyn Sandbox,
    ) -> Result<EvalRun> {
        agent.reset();
        let protocol = task.elicitation(elicitation_index)?.terminal_interop_protocol;

        let mut run = EvalRun::new(&task.name, elicitation_index, agent.identify());
        self.store
            .create_run(&run, task)
            .await
            .context("Failed to record new run")?;

        info!(
            event = "run_start",
            run_id = %run.id,
            task = %task.name,
            elicitation = elicitation_index,
            protocol = %protocol,
            model = %run.model,
            max_turns = task.ruleset.max_turns,
        );

        let outcome = AssertUnwindSafe(self.drive(
            run.id,
            task,
            elicitation_index,
            protocol,
            &mut *agent,
            &mut *sandbox,
        ))
        .catch_unwind()
        .await;

        if let Err(e) = sandbox.stop().await {
            warn!(run_id = %run.id, "Failed to stop sandbox: {e:#}");
        }

        let ending = match outcome {
            Ok(Ok(ending)) => ending,
            Ok(Err(err)) => {
                let status = classify(&err);
                warn!(run_id = %run.id, status = %status, "Run ended with error: {err:#}");
                Ending {
                    status,
                    diagnostic: Some(format_diagnostic(status, &err)),
                }
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!(run_id = %run.id, "Run panicked: {message}");
                Ending {
                    status: RunStatus::Error,
                    diagnostic: Some(format!(
                        "Error Type: Panic\nError Message: {message}\nFull Trace:\n{message}"
                    )),
                }
            }
        };

        run.finish(ending.status, ending.diagnostic.clone())?;
        self.store
            .update_status(run.id, ending.status, ending.diagnostic.as_deref())
            .await
            .context("Failed to record run status")?;

        info!(event = "run_end", run_id = %run.id, status = %run.status);
        Ok(run)
    }

    #[allow(clippy::too_many_lines)]
    async fn drive(
        &self,
        run_id: Uuid,
        task: &TaskConfig,
        elicitation_index: usize,
        protocol: Protocol,
        agent: &mut dyn Agent,
        sandbox: &mut dyn Sandbox,
    ) -> Result<Ending> {
        let flag = task.ruleset.flag.as_str();
        let mut transcript = Transcript::new();

        for prefilled in &task.elicitation(elicitation_index)?.prefilled_messages {
            self.append(
                run_id,
                &mut transcript,
                prefilled.role,
                prefilled.content.clone(),
                true,
                None,
            )
            .await?;
        }

        if transcript.is_empty() {
            anyhow::bail!("Elicitation has no messages to start the conversation");
        }

        sandbox.reset().await.map_err(retriable_if_gone)?;

        let mut premembered = false;

        for turn in 1..=task.ruleset.max_turns {
            let (last_role, last_content) = transcript
                .last()
                .map(|m| (m.role, m.content.clone()))
                .context("Conversation lost its messages")?;

            let (reply, action) = if last_role == Role::Assistant {
                // A seeded reply stands in for the agent on this turn.
                let action = protocol.extract(&last_content)?;
                info!(
                    event = "scripted_reply",
                    run_id = %run_id,
                    turn,
                    content = self.comms(&last_content),
                );
                (last_content, action)
            } else {
                if !premembered {
                    if transcript.len() > 1 {
                        agent.premember(transcript.all_but_last());
                    }
                    premembered = true;
                }

                let reply = agent.act(&last_content).await?;
                let extracted = protocol.extract(&reply);
                self.append(
                    run_id,
                    &mut transcript,
                    Role::Assistant,
                    reply.clone(),
                    false,
                    extracted.as_ref().ok().cloned(),
                )
                .await?;
                info!(
                    event = "agent_reply",
                    run_id = %run_id,
                    turn,
                    content = self.comms(&reply),
                );
                (reply, extracted?)
            };

            if reply.contains(flag) {
                info!(event = "win_from_agent", run_id = %run_id, turn);
                return Ok(Ending {
                    status: RunStatus::Success,
                    diagnostic: None,
                });
            }

            let outcome = step(sandbox, &action).await?;

            if outcome.hung {
                warn!(event = "env_hung_reset", run_id = %run_id, turn);
                sandbox.reset().await.map_err(retriable_if_gone)?;
            }

            let screen = outcome.visible_text();

            if contains_flag(&outcome.raw_output, flag) {
                info!(event = "win_from_environment", run_id = %run_id, turn);
                let raw = String::from_utf8_lossy(&outcome.raw_output).into_owned();
                self.append(run_id, &mut transcript, Role::User, raw, false, Some(screen))
                    .await?;
                return Ok(Ending {
                    status: RunStatus::Success,
                    diagnostic: None,
                });
            }

            let environment_reply = protocol.wrap(&outcome);
            info!(
                event = "environment_reply",
                run_id = %run_id,
                turn,
                content = self.comms(&environment_reply),
            );
            self.append(
                run_id,
                &mut transcript,
                Role::User,
                environment_reply,
                false,
                Some(screen),
            )
            .await?;
        }

        info!(
            event = "turns_exhausted",
            run_id = %run_id,
            max_turns = task.ruleset.max_turns,
        );
        Ok(Ending {
            status: RunStatus::Failure,
            diagnostic: Some(format!(
                "Ran out of turns: no flag after {} turns",
                task.ruleset.max_turns
            )),
        })
    }

    async fn append(
        &self,
        run_id: Uuid,
        transcript: &mut Transcript,
        role: Role,
        content: String,
        is_prefilled: bool,
        underlying_communication: Option<String>,
    ) -> Result<()> {
        let message = transcript.push(role, content, is_prefilled, underlying_communication);
        debug!(run_id = %run_id, ordinal = message.ordinal, role = %message.role, "Message appended");
        self.store.append_message(run_id, message).await
    }

    fn comms<'a>(&self, content: &'a str) -> Option<&'a str> {
        (!self.options.quiet_comms).then_some(content)
    }
}

/// Send keystrokes, or skip the sandbox entirely when there are none.
async fn step(sandbox: &mut dyn Sandbox, action: &str) -> Result<StepOutcome> {
    if action.is_empty() {
        return Ok(StepOutcome::empty_input());
    }
    sandbox.act(action.as_bytes()).await.map_err(|e| {
        if is_container_gone(&e) {
            e.context(RunError::failure("Container vanished mid-turn"))
        } else {
            e
        }
    })
}

/// A container that disappears while booting is an infrastructure race.
fn retriable_if_gone(err: anyhow::Error) -> anyhow::Error {
    if is_container_gone(&err) {
        err.context(RunError::retriable("Container vanished during reset"))
    } else {
        err
    }
}

fn contains_flag(raw_output: &[u8], flag: &str) -> bool {
    let flag = flag.as_bytes();
    !flag.is_empty() && raw_output.windows(flag.len()).any(|window| window == flag)
}

/// Failure beats refusal; everything else is worth retrying.
pub(crate) fn classify(err: &anyhow::Error) -> RunStatus {
    if chain_has(err, RunError::is_failure) {
        RunStatus::Failure
    } else if chain_has(err, RunError::is_refused) {
        RunStatus::Refused
    } else {
        RunStatus::Error
    }
}

fn format_diagnostic(status: RunStatus, err: &anyhow::Error) -> String {
    let kind = match status {
        RunStatus::Failure => "RunFailure",
        RunStatus::Refused => "RunRefused",
        _ if chain_has(err, |e| matches!(e, RunError::Retriable { .. })) => "RunRetriable",
        _ => "Unclassified",
    };
    format!("Error Type: {kind}\nError Message: {err}\nFull Trace:\n{err:?}")
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}
