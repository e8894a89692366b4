// src/core/aux/mod.rs

//! The leader-local phase executor.
//!
//! Unlike `core::machine`, this runs only on whichever replica currently
//! holds Raft leadership, and is not itself replicated: it is discarded and
//! rebuilt from scratch on every leadership change (`state_enter`). It owns
//! no authoritative state of its own; it is a supervisor over side-effecting
//! tasks, each of which reports its outcome by submitting a command back
//! into the replicated log.

pub mod phases;

use crate::core::collaborators::{ConsensusSubmit, LogEngine, NodeMembership, Registry};
use crate::core::command::{AuxInstruction, Command, PhaseArgs};
use crate::core::state::{PhaseName, StreamFsmState};
use crate::core::types::StreamId;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// A single outstanding phase task, keyed by stream so at most one phase
/// per stream can be in flight (invariant 2).
struct PhaseTask {
    handle: JoinHandle<bool>,
    args: PhaseArgs,
}

/// Collaborators a phase implementation needs. Bundled so `AuxExecutor`
/// doesn't have to thread four separate `Arc`s through every spawn call.
pub struct PhaseDeps {
    pub log_engine: Arc<dyn LogEngine>,
    pub registry: Arc<dyn Registry>,
    pub membership: Arc<dyn NodeMembership>,
    pub consensus: Arc<dyn ConsensusSubmit>,
}

/// The phase executor proper. Exists for the lifetime of one leadership
/// term; a fresh instance is built by `state_enter` on every transition.
pub struct AuxExecutor {
    tasks: DashMap<StreamId, PhaseTask>,
    deps: Arc<PhaseDeps>,
}

impl AuxExecutor {
    pub fn new(deps: Arc<PhaseDeps>) -> Self {
        Self { tasks: DashMap::new(), deps }
    }

    /// Handle a single `aux` effect emitted by `apply`.
    pub fn handle(&self, instruction: AuxInstruction) {
        match instruction {
            AuxInstruction::Phase { stream_id, args } => self.spawn_phase(stream_id, args),
            AuxInstruction::Pipeline(cmds) => self.submit_pipeline(cmds),
            AuxInstruction::ResizeCoordinator { to_add, to_remove } => {
                info!(added = to_add.len(), removed = to_remove.len(), "coordinator membership resize requested");
            }
        }
    }

    /// Spawn (or re-spawn) the task backing a stream's current phase.
    /// At most one task per stream is tracked; an existing entry for the
    /// same stream is replaced, mirroring `apply`'s invariant that a
    /// stream has at most one in-flight phase.
    fn spawn_phase(&self, stream_id: StreamId, args: PhaseArgs) {
        let name = PhaseName::from_args(&args);
        let deps = self.deps.clone();
        let stream_for_task = stream_id.clone();
        let args_for_task = args.clone();
        let handle = tokio::spawn(async move { phases::run(&deps, stream_for_task, args_for_task).await });
        if let Some(mut prior) = self.tasks.get_mut(&stream_id) {
            prior.handle.abort();
            *prior = PhaseTask { handle, args };
        } else {
            self.tasks.insert(stream_id, PhaseTask { handle, args });
        }
        let _ = name;
    }

    fn submit_pipeline(&self, cmds: Vec<Command>) {
        let consensus = self.deps.consensus.clone();
        tokio::spawn(async move {
            for cmd in cmds {
                if let Err(e) = consensus.submit(cmd).await {
                    warn!(error = %e, "pipeline command submission failed");
                }
            }
        });
    }

    /// Poll outstanding tasks for abnormal termination and retry them.
    /// Called periodically by the owning runtime (see `core::membership`
    /// for the sibling tick-driven reconciliation loop).
    pub async fn reap_finished(&self) {
        let finished: Vec<StreamId> = self
            .tasks
            .iter()
            .filter(|entry| entry.handle.is_finished())
            .map(|entry| entry.key().clone())
            .collect();

        for stream_id in finished {
            let Some((_, task)) = self.tasks.remove(&stream_id) else { continue };
            match task.handle.await {
                Ok(true) => {
                    // Normal termination: the phase itself submitted its reply command.
                }
                Ok(false) => {
                    warn!(stream_id = %stream_id, "phase finished without submitting a reply, retrying");
                    let retry_args = Self::retry_args(task.args);
                    self.spawn_phase(stream_id, retry_args);
                }
                Err(e) if e.is_cancelled() => {
                    // Replaced by a newer spawn for the same stream; nothing to do.
                }
                Err(e) => {
                    warn!(stream_id = %stream_id, error = %e, "phase task terminated abnormally, retrying");
                    let retry_args = Self::retry_args(task.args);
                    self.spawn_phase(stream_id, retry_args);
                }
            }
        }
    }

    /// Special case from the design: a failed `start_new_leader` phase is
    /// retried as `check_quorum`, since the node-offset picture that led to
    /// the election may itself have gone stale.
    fn retry_args(args: PhaseArgs) -> PhaseArgs {
        match args {
            PhaseArgs::StartNewLeader { conf } => PhaseArgs::CheckQuorum { conf },
            other => other,
        }
    }

    /// On becoming leader, resume every stream whose FSM state is not
    /// `running` by re-emitting its last recorded phase. Also used at
    /// bootstrap, where every stream not yet `running` is resumed the
    /// same way a mid-term leader handover would.
    pub fn resume_in_flight(&self, streams: &std::collections::BTreeMap<StreamId, crate::core::state::StreamState>) {
        for (stream_id, stream) in streams {
            if stream.state == StreamFsmState::Running {
                continue;
            }
            if let Some(args) = &stream.phase_args {
                info!(stream_id = %stream_id, phase = %PhaseName::from_args(args), "resuming in-flight phase after leader transition");
                self.spawn_phase(stream_id.clone(), args.clone());
            }
        }
    }
}
