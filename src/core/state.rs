// src/core/state.rs

//! The fully replicated state the consensus layer checkpoints and replays.
//!
//! The source kept a single map from handle to an untyped, dual-purpose
//! record (either a stream-process entry or a subscriber entry). That map
//! is split here into two disjoint registries so a handle's kind is known
//! from which map it is found in, not from a runtime tag.

use crate::core::command::PhaseArgs;
use crate::core::types::{Handle, Node, Role, StreamConfig, StreamId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use strum_macros::Display;

/// The per-stream lifecycle state. `running` is the only state in which a
/// stream accepts `start_replica`/`delete_replica`/`delete_cluster`
/// directly; every other state queues them in `pending_cmds`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
pub enum StreamFsmState {
    StartCluster,
    Running,
    DeleteCluster,
    StartReplica,
    DeleteReplica,
    LeaderElection,
    ReplicaRestart,
}

impl StreamFsmState {
    pub fn is_running(&self) -> bool {
        matches!(self, StreamFsmState::Running)
    }
}

/// The name of an in-flight phase, without its arguments. Kept separate
/// from [`PhaseArgs`] so logging can print just the name cheaply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
pub enum PhaseName {
    StartCluster,
    DeleteCluster,
    StartReplica,
    DeleteReplica,
    StopReplicas,
    CheckQuorum,
    StartNewLeader,
    RepairRegistryNew,
    RepairRegistryUpdate,
}

impl PhaseName {
    pub fn from_args(args: &PhaseArgs) -> Self {
        match args {
            PhaseArgs::StartCluster { .. } => PhaseName::StartCluster,
            PhaseArgs::DeleteCluster { .. } => PhaseName::DeleteCluster,
            PhaseArgs::StartReplica { .. } => PhaseName::StartReplica,
            PhaseArgs::DeleteReplica { .. } => PhaseName::DeleteReplica,
            PhaseArgs::StopReplicas { .. } => PhaseName::StopReplicas,
            PhaseArgs::CheckQuorum { .. } => PhaseName::CheckQuorum,
            PhaseArgs::StartNewLeader { .. } => PhaseName::StartNewLeader,
            PhaseArgs::RepairRegistryNew { .. } => PhaseName::RepairRegistryNew,
            PhaseArgs::RepairRegistryUpdate { .. } => PhaseName::RepairRegistryUpdate,
        }
    }
}

/// A command queued while a stream is not `running`. Carries just enough
/// to be re-submitted verbatim via `aux(pipeline(..))` on drain.
pub type PendingCommand = crate::core::command::Command;

/// All state the coordinator holds for a single managed stream.
#[derive(Debug, Clone)]
pub struct StreamState {
    pub conf: StreamConfig,
    pub state: StreamFsmState,
    pub phase: Option<PhaseName>,
    pub phase_args: Option<PhaseArgs>,
    pub reply_to: Option<crate::core::types::RequestId>,
    pub pending_cmds: VecDeque<PendingCommand>,
    pub pending_replicas: BTreeSet<Node>,
    pub subscribers: BTreeSet<Handle>,
}

impl StreamState {
    pub fn new(conf: StreamConfig) -> Self {
        Self {
            conf,
            state: StreamFsmState::StartCluster,
            phase: None,
            phase_args: None,
            reply_to: None,
            pending_cmds: VecDeque::new(),
            pending_replicas: BTreeSet::new(),
            subscribers: BTreeSet::new(),
        }
    }

    /// Invariant 1: `running` iff no phase and no in-flight reply target.
    pub fn invariant_running_iff_idle(&self) -> bool {
        self.state.is_running() == (self.phase.is_none() && self.reply_to.is_none())
    }

    pub fn enter_phase(&mut self, state: StreamFsmState, args: PhaseArgs, reply_to: Option<crate::core::types::RequestId>) {
        self.state = state;
        self.phase = Some(PhaseName::from_args(&args));
        self.phase_args = Some(args);
        self.reply_to = reply_to;
    }

    pub fn return_to_running(&mut self) {
        self.state = StreamFsmState::Running;
        self.phase = None;
        self.phase_args = None;
        self.reply_to = None;
    }

    /// Queue a command received while non-running. If it transitions the
    /// stream straight into `delete_cluster`, stale queued `down` entries
    /// are dropped first (they would request restarts of a deleted stream).
    pub fn queue_or_purge_for_delete(&mut self, cmd: PendingCommand) {
        if matches!(cmd, crate::core::command::Command::DeleteCluster { .. }) {
            self.pending_cmds.retain(|c| !c.is_superseded_by_delete());
        }
        self.pending_cmds.push_back(cmd);
    }

    pub fn drain_pending(&mut self) -> Vec<PendingCommand> {
        self.pending_cmds.drain(..).collect()
    }
}

/// The fully replicated coordinator state: every managed stream, and the
/// split monitor registries (§9 "Monitors dual-purpose map").
#[derive(Debug, Clone, Default)]
pub struct CoordinatorState {
    pub streams: BTreeMap<StreamId, StreamState>,
    /// Handles that are themselves a stream's leader or a replica process.
    pub processes: BTreeMap<Handle, (StreamId, Role)>,
    /// Handles that are subscribed to one or more streams' notifications.
    pub subscribers: BTreeMap<Handle, BTreeSet<StreamId>>,
}

impl CoordinatorState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stream(&self, id: &str) -> Option<&StreamState> {
        self.streams.get(id)
    }

    pub fn stream_mut(&mut self, id: &str) -> Option<&mut StreamState> {
        self.streams.get_mut(id)
    }

    pub fn register_process(&mut self, handle: Handle, stream_id: StreamId, role: Role) {
        self.processes.insert(handle, (stream_id, role));
    }

    pub fn remove_process(&mut self, handle: &Handle) -> Option<(StreamId, Role)> {
        self.processes.remove(handle)
    }

    pub fn add_subscriber(&mut self, handle: Handle, stream_id: StreamId) -> bool {
        self.subscribers.entry(handle).or_default().insert(stream_id)
    }

    /// Returns true if the subscriber entry was fully removed (list emptied).
    pub fn remove_subscriber(&mut self, handle: &Handle, stream_id: &str) -> bool {
        if let Some(set) = self.subscribers.get_mut(handle) {
            set.remove(stream_id);
            if set.is_empty() {
                self.subscribers.remove(handle);
                return true;
            }
        }
        false
    }

    /// Remove a subscriber from every stream it's subscribed to, for `down`.
    pub fn purge_subscriber(&mut self, handle: &Handle) -> BTreeSet<StreamId> {
        self.subscribers.remove(handle).unwrap_or_default()
    }
}
