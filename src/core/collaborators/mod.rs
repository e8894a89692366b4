// src/core/collaborators.rs

//! Trait boundaries for the four external systems the coordinator depends
//! on but does not own: the consensus layer, the log engine, the durable
//! topology registry, and fleet node membership. Production adapters wrap
//! the real systems; test fakes implement the same trait in memory.

pub mod demo;

use crate::core::command::Command;
use crate::core::errors::Result;
use crate::core::types::{Handle, Node, StreamConfig};
use async_trait::async_trait;

/// Result of asking the log engine to start a cluster's writer process.
#[derive(Debug, Clone)]
pub enum StartClusterResult {
    Started { leader_handle: Handle, conf: StreamConfig },
    AlreadyStarted { conf: StreamConfig },
}

/// Result of asking the log engine to start a single replica process.
#[derive(Debug, Clone)]
pub enum StartReplicaResult {
    Started(Handle),
    AlreadyPresent,
    AlreadyStarted(Handle),
    Error(String),
}

/// Result of stopping a node's process for a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopResult {
    Ok,
    NodeDown,
}

/// `(offset, epoch)` read from a single node's on-disk log overview.
#[derive(Debug, Clone, Copy)]
pub struct LogOverview {
    pub offset: u64,
    pub epoch: u64,
}

/// The per-node, per-stream replicated log engine: creates, starts, stops,
/// and inspects the leader and replica processes backing a stream.
#[async_trait]
pub trait LogEngine: Send + Sync {
    async fn cluster_start(&self, conf: &StreamConfig) -> Result<StartClusterResult>;
    async fn cluster_delete(&self, conf: &StreamConfig) -> Result<()>;
    async fn replica_start(&self, node: &Node, conf: &StreamConfig) -> Result<StartReplicaResult>;
    async fn replica_stop(&self, node: &Node, conf: &StreamConfig) -> Result<StopResult>;
    async fn replica_delete(&self, node: &Node, conf: &StreamConfig) -> Result<()>;
    async fn writer_start(&self, conf: &StreamConfig) -> Result<StartReplicaResult>;
    async fn log_overview(&self, node: &Node, conf: &StreamConfig) -> Result<Option<LogOverview>>;
}

/// The durable topology registry: the system of record for stream
/// configurations, independent of the replicated `CoordinatorState` the
/// consensus layer checkpoints.
#[async_trait]
pub trait Registry: Send + Sync {
    async fn declare(&self, conf: &StreamConfig) -> Result<()>;
    async fn update(&self, name: &str, conf: &StreamConfig) -> Result<()>;
    async fn delete(&self, name: &str, acting_user: &str) -> Result<()>;
}

/// Fleet node membership and ad hoc RPC, used by the coordinator's own
/// membership reconciliation tick and by quorum checks.
#[async_trait]
pub trait NodeMembership: Send + Sync {
    async fn cluster_nodes_all(&self) -> Result<Vec<Node>>;
    async fn cluster_nodes_running(&self) -> Result<Vec<Node>>;
    async fn is_alive(&self, handle: Handle) -> bool;
}

/// The replicated-log submission path a phase uses to hand a follow-up
/// command back to the state machine. Distinct from the Raft client a
/// public-facing API handle would use, since phases run leader-local and
/// never need the round-robin retry-across-replicas behavior.
#[async_trait]
pub trait ConsensusSubmit: Send + Sync {
    async fn submit(&self, cmd: Command) -> Result<()>;

    async fn submit_delayed(&self, delay_ms: u64, cmd: Command) {
        let submit_cmd = cmd;
        tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
        let _ = self.submit(submit_cmd).await;
    }
}
