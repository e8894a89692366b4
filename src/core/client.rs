// src/core/client.rs

//! The public client API (§6 "Client API (exposed)").
//!
//! Submits a command to the replicated log, round-robining across known
//! coordinator replicas on `timeout`/`no_such_process` until one accepts
//! it or the full set has been exhausted, matching the retry policy in
//! §5 "Cancellation/timeout".

use crate::core::command::{ClientReply, Command};
use crate::core::errors::{ClientError, CoordinatorError, Result};
use crate::core::types::{Handle, Node, QueueDesc, RequestId, StreamId};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::warn;

/// What the client API actually needs from the consensus layer: submit a
/// command to a specific replica and await its reply, or fail fast if that
/// replica is unreachable.
#[async_trait]
pub trait ReplicaSubmit: Send + Sync {
    async fn submit_to(&self, node: &Node, cmd: Command) -> Result<oneshot::Receiver<ClientReply>>;
}

/// Outcome of a client API call: the stream's current recorded leader node
/// is included alongside the reply, as the spec's "current_leader_id"
/// companion value.
#[derive(Debug, Clone)]
pub struct ClientOutcome {
    pub reply: ClientReply,
    pub current_leader_id: Option<Node>,
}

pub struct Client {
    submit: Arc<dyn ReplicaSubmit>,
    replicas: Vec<Node>,
    next: AtomicU64,
    request_ids: AtomicU64,
}

impl Client {
    pub fn new(submit: Arc<dyn ReplicaSubmit>, replicas: Vec<Node>) -> Self {
        Self { submit, replicas, next: AtomicU64::new(0), request_ids: AtomicU64::new(1) }
    }

    fn next_request_id(&self) -> RequestId {
        self.request_ids.fetch_add(1, Ordering::Relaxed)
    }

    /// Try each coordinator replica, starting from a rotating offset, until
    /// one accepts the command. Returns `coordinator_unavailable` if none do.
    async fn submit_round_robin(&self, cmd: Command) -> Result<ClientReply> {
        if self.replicas.is_empty() {
            return Err(CoordinatorError::CoordinatorUnavailable);
        }
        let start = self.next.fetch_add(1, Ordering::Relaxed) as usize % self.replicas.len();
        for offset in 0..self.replicas.len() {
            let node = &self.replicas[(start + offset) % self.replicas.len()];
            match self.submit.submit_to(node, cmd.clone()).await {
                Ok(rx) => match rx.await {
                    Ok(reply) => return Ok(reply),
                    Err(_) => {
                        warn!(node = %node, "reply channel dropped, trying next replica");
                        continue;
                    }
                },
                Err(e) => {
                    warn!(node = %node, error = %e, "submission failed, trying next replica");
                    continue;
                }
            }
        }
        Err(CoordinatorError::CoordinatorUnavailable)
    }

    pub async fn start_cluster(&self, desc: QueueDesc) -> ClientReply {
        let reply_to = self.next_request_id();
        self.dispatch(Command::StartCluster { desc, reply_to }).await
    }

    pub async fn delete_cluster(&self, stream_id: StreamId, acting_user: String) -> ClientReply {
        let reply_to = self.next_request_id();
        self.dispatch(Command::DeleteCluster { stream_id, acting_user, reply_to }).await
    }

    pub async fn add_replica(&self, stream_id: StreamId, node: Node) -> ClientReply {
        let reply_to = self.next_request_id();
        self.dispatch(Command::StartReplica { stream_id, node, retries: 1, reply_to: Some(reply_to) }).await
    }

    pub async fn delete_replica(&self, stream_id: StreamId, node: Node) -> ClientReply {
        let reply_to = self.next_request_id();
        self.dispatch(Command::DeleteReplica { stream_id, node, reply_to }).await
    }

    pub async fn subscribe(&self, stream_id: StreamId, subscriber: Handle) -> ClientReply {
        let reply_to = self.next_request_id();
        self.dispatch(Command::Subscribe { stream_id, subscriber, reply_to }).await
    }

    pub async fn unsubscribe(&self, stream_id: StreamId, subscriber: Handle) -> ClientReply {
        let reply_to = self.next_request_id();
        self.dispatch(Command::Unsubscribe { stream_id, subscriber, reply_to }).await
    }

    async fn dispatch(&self, cmd: Command) -> ClientReply {
        match self.submit_round_robin(cmd).await {
            Ok(reply) => reply,
            Err(_) => ClientReply::Error(ClientError::CoordinatorUnavailable),
        }
    }
}
