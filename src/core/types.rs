// src/core/types.rs

//! Core identifiers and the stream configuration record.
//!
//! The source of this coordinator represented commands and configs as
//! untyped maps. These are replaced with sealed sum types and a dedicated
//! `StreamConfig` struct so every invariant in the data model is explicit
//! in the type system rather than implied by convention.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of a managed stream. Unique across the coordinator.
pub type StreamId = String;

/// A fleet node identifier, as reported by the hosting service's
/// node-membership source.
pub type Node = String;

/// An opaque, globally unique identifier for an external process: a stream
/// leader, a stream replica, or a subscriber. Handles are minted by the
/// phase implementations (from whatever the log engine or RPC layer
/// returns) and are otherwise treated as inert values by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Handle(pub u64);

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handle#{}", self.0)
    }
}

/// Identifies the originator of an in-flight command, so that `reply`
/// effects can be routed back to whoever submitted it. `None` indicates
/// the command was internally generated (a phase reply or a timer).
pub type RequestId = u64;

/// The role a monitored process plays for a given stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Leader,
    Follower,
}

/// A client-submitted description of the stream to create. Lacks the
/// fields that only exist once the cluster has actually been started
/// (`epoch`, `leader_pid`, `replica_pids`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueDesc {
    pub name: StreamId,
    pub reference: String,
    pub leader_node: Node,
    pub replica_nodes: Vec<Node>,
}

/// The stream configuration record. Opaque to the coordinator except for
/// the named fields below, all of which participate in the lifecycle FSM
/// and its invariants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub name: StreamId,
    pub reference: String,
    /// Monotonically increasing leadership generation. Incremented by
    /// exactly one on every successful leader election.
    pub epoch: u64,
    pub leader_node: Node,
    pub leader_pid: Option<Handle>,
    pub replica_nodes: Vec<Node>,
    pub replica_pids: Vec<Handle>,
}

impl StreamConfig {
    pub fn from_desc(desc: QueueDesc) -> Self {
        Self {
            name: desc.name,
            reference: desc.reference,
            epoch: 0,
            leader_node: desc.leader_node,
            leader_pid: None,
            replica_nodes: desc.replica_nodes,
            replica_pids: Vec::new(),
        }
    }

    /// Invariant 4: the leader node must never also appear as a replica node.
    pub fn leader_not_in_replicas(&self) -> bool {
        !self.replica_nodes.contains(&self.leader_node)
    }
}
