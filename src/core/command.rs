// src/core/command.rs

//! Tagged-variant definitions for the commands the state machine accepts,
//! the effects it emits, and the auxiliary-executor instructions those
//! effects can carry.
//!
//! The source represented all of this with untyped maps keyed by atom-like
//! tags. Here every command, phase, and effect is a distinct enum variant,
//! so an invalid combination simply does not type-check.

use crate::core::types::{Handle, Node, QueueDesc, RequestId, StreamConfig, StreamId};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use strum_macros::Display;

/// Position of a command in the replicated log, handed to `apply` alongside
/// the command itself. Carried through so phase implementations and audit
/// logging can refer back to it; `apply`'s determinism does not depend on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandMeta {
    pub index: u64,
    pub term: u64,
}

/// One node's reported `(offset, epoch)` during a quorum check, or `None`
/// if the node's log does not yet exist. `None` sorts below every `Some`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeOffset {
    pub node: Node,
    pub offset: Option<(u64, u64)>,
}

impl NodeOffset {
    /// Ordering key used to pick the new leader: highest offset first, then
    /// highest epoch, then the node identifier (for a fully deterministic
    /// tie-break across replicas).
    fn rank(&self) -> (bool, u64, u64, &str) {
        match self.offset {
            Some((offset, epoch)) => (true, offset, epoch, self.node.as_str()),
            None => (false, 0, 0, self.node.as_str()),
        }
    }

    pub fn cmp_for_election(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

/// Identifies which side-effecting phase an `aux` effect should run, and
/// carries the arguments that phase needs. Re-emitted verbatim by the aux
/// executor on retry and on leader handover (`phase_args` in `StreamState`).
#[derive(Debug, Clone, PartialEq, Display, Serialize, Deserialize)]
pub enum PhaseArgs {
    StartCluster { desc: QueueDesc },
    DeleteCluster { conf: StreamConfig },
    StartReplica { node: Node, conf: StreamConfig, retries: u32, reply_to: Option<RequestId> },
    DeleteReplica { node: Node, conf: StreamConfig },
    StopReplicas { conf: StreamConfig },
    CheckQuorum { conf: StreamConfig },
    StartNewLeader { conf: StreamConfig },
    RepairRegistryNew { conf: StreamConfig },
    RepairRegistryUpdate { conf: StreamConfig },
}

/// Instructs the leader-local aux executor. Not part of replicated state:
/// interpreted only by whichever process currently holds Raft leadership.
#[derive(Debug, Clone)]
pub enum AuxInstruction {
    /// Run a single named phase for a stream.
    Phase {
        stream_id: StreamId,
        args: PhaseArgs,
    },
    /// Submit a batch of drained `pending_cmds` back into the consensus log.
    Pipeline(Vec<Command>),
    /// Reconcile the coordinator's own Raft membership against the fleet.
    ResizeCoordinator {
        to_add: Vec<Node>,
        to_remove: Vec<Node>,
    },
}

/// A notification delivered to a stream's subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Notification {
    LeaderUp {
        stream_id: StreamId,
        epoch: u64,
        leader: Handle,
    },
    LeaderDown {
        stream_id: StreamId,
        epoch: u64,
    },
    ClusterDeleted {
        stream_id: StreamId,
    },
}

/// The value carried by a `reply` effect back to a command's originator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientReply {
    Ok,
    Count(u64),
    Error(crate::core::errors::ClientError),
}

/// The closed set of effects `apply` may emit. Interpreted by the consensus
/// layer (for `monitor`/`demonitor`/`send_msg`/`delayed_cmd`) or by the
/// aux executor (for `aux`).
#[derive(Debug, Clone)]
pub enum Effect {
    Monitor(Handle),
    Demonitor(Handle),
    SendMsg(Handle, Notification),
    Reply(RequestId, ClientReply),
    Aux(AuxInstruction),
    DelayedCmd { delay_ms: u64, cmd: Command },
}

/// All commands the state machine accepts, both client-initiated and
/// internally generated (phase replies and system events).
#[derive(Debug, Clone)]
pub enum Command {
    // --- External, client-initiated ---
    Subscribe {
        stream_id: StreamId,
        subscriber: Handle,
        reply_to: RequestId,
    },
    Unsubscribe {
        stream_id: StreamId,
        subscriber: Handle,
        reply_to: RequestId,
    },
    StartCluster {
        desc: QueueDesc,
        reply_to: RequestId,
    },
    DeleteCluster {
        stream_id: StreamId,
        acting_user: String,
        reply_to: RequestId,
    },
    StartReplica {
        stream_id: StreamId,
        node: Node,
        retries: u32,
        reply_to: Option<RequestId>,
    },
    DeleteReplica {
        stream_id: StreamId,
        node: Node,
        reply_to: RequestId,
    },

    // --- Internal, phase-reply or system-generated ---
    StartClusterReply {
        stream_id: StreamId,
        conf: StreamConfig,
    },
    StartClusterFailed {
        stream_id: StreamId,
        reason: String,
    },
    StartReplicaReply {
        stream_id: StreamId,
        node: Node,
        pid: Handle,
        conf: StreamConfig,
    },
    StartReplicaFailed {
        stream_id: StreamId,
        node: Node,
        retries: u32,
        reply_to: Option<RequestId>,
        reason: String,
    },
    DeleteClusterReply {
        stream_id: StreamId,
    },
    PhaseFinished {
        stream_id: StreamId,
        ok: bool,
    },
    StreamUpdated {
        conf: StreamConfig,
    },
    ReplicasStopped {
        stream_id: StreamId,
    },
    StartLeaderElection {
        stream_id: StreamId,
        new_epoch: u64,
        offsets: Vec<NodeOffset>,
    },
    LeaderElected {
        conf: StreamConfig,
    },
    Down {
        handle: Handle,
        reason: String,
    },
}

impl Command {
    /// Name used for logging; stable across refactors of the variant's payload.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Subscribe { .. } => "subscribe",
            Command::Unsubscribe { .. } => "unsubscribe",
            Command::StartCluster { .. } => "start_cluster",
            Command::DeleteCluster { .. } => "delete_cluster",
            Command::StartReplica { .. } => "start_replica",
            Command::DeleteReplica { .. } => "delete_replica",
            Command::StartClusterReply { .. } => "start_cluster_reply",
            Command::StartClusterFailed { .. } => "start_cluster_failed",
            Command::StartReplicaReply { .. } => "start_replica_reply",
            Command::StartReplicaFailed { .. } => "start_replica_failed",
            Command::DeleteClusterReply { .. } => "delete_cluster_reply",
            Command::PhaseFinished { .. } => "phase_finished",
            Command::StreamUpdated { .. } => "stream_updated",
            Command::ReplicasStopped { .. } => "replicas_stopped",
            Command::StartLeaderElection { .. } => "start_leader_election",
            Command::LeaderElected { .. } => "leader_elected",
            Command::Down { .. } => "down",
        }
    }

    /// Whether this command, if queued in `pending_cmds` while a stream is
    /// non-running, should be dropped when the stream transitions straight
    /// into `delete_cluster` (see §4.2: queued `down` entries are filtered).
    pub fn is_superseded_by_delete(&self) -> bool {
        matches!(self, Command::Down { .. })
    }
}
