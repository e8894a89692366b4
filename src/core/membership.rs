// src/core/membership.rs

//! Coordinator cluster membership reconciliation (§4.7).
//!
//! This is deliberately *not* part of `core::machine::apply`: reconciling
//! membership requires reading the fleet's live node list, which is
//! external and non-deterministic. It instead runs as a local, per-leader
//! tick on the same cadence the teacher drives its maintenance tasks, and
//! is guarded so at most one resize task is ever in flight.

use crate::core::collaborators::NodeMembership;
use crate::core::types::Node;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Tracks the coordinator's own Raft membership and reconciles it against
/// the fleet's live node list on a timer. Holds no replicated state.
pub struct MembershipReconciler {
    membership: Arc<dyn NodeMembership>,
    current_members: parking_lot::Mutex<BTreeSet<Node>>,
    resize_in_flight: AtomicBool,
    tick_interval: Duration,
}

impl MembershipReconciler {
    pub fn new(membership: Arc<dyn NodeMembership>, seed_members: BTreeSet<Node>, tick_interval: Duration) -> Self {
        Self {
            membership,
            current_members: parking_lot::Mutex::new(seed_members),
            resize_in_flight: AtomicBool::new(false),
            tick_interval,
        }
    }

    /// Background loop: on each tick, diff `current_members` against the
    /// fleet's running nodes and spawn a single reconciliation task if one
    /// is not already outstanding. Mirrors the teacher's `run(shutdown_rx)`
    /// background-task convention.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.clone().tick().await;
                }
                _ = shutdown_rx.recv() => {
                    info!("membership reconciler shutting down");
                    return;
                }
            }
        }
    }

    async fn tick(self: Arc<Self>) {
        if self
            .resize_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("membership resize already in flight, skipping tick");
            return;
        }

        tokio::spawn(async move {
            self.reconcile_once().await;
            self.resize_in_flight.store(false, Ordering::SeqCst);
        });
    }

    async fn reconcile_once(&self) {
        let running = match self.membership.cluster_nodes_running().await {
            Ok(nodes) => nodes.into_iter().collect::<BTreeSet<_>>(),
            Err(e) => {
                warn!(error = %e, "failed to read running node set, skipping reconciliation");
                return;
            }
        };
        let all_known = match self.membership.cluster_nodes_all().await {
            Ok(nodes) => nodes.into_iter().collect::<BTreeSet<_>>(),
            Err(e) => {
                warn!(error = %e, "failed to read known node set, skipping reconciliation");
                return;
            }
        };

        let mut members = self.current_members.lock();
        let new_nodes: Vec<Node> = running.difference(&members).cloned().collect();
        let gone_nodes: Vec<Node> = members.difference(&all_known).cloned().collect();

        for node in &new_nodes {
            info!(node = %node, "adding coordinator member");
            members.insert(node.clone());
        }
        for node in &gone_nodes {
            info!(node = %node, "removing coordinator member");
            members.remove(node);
        }
    }
}
