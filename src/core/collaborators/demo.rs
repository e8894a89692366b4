// src/core/collaborators/demo.rs

//! In-memory implementations of the four external collaborator traits.
//!
//! Used by the standalone single-node binary (no real log engine, durable
//! store, or fleet membership source to talk to) and reused as-is by the
//! property and scenario tests under `tests/`, following the teacher's
//! pattern of in-memory fakes implementing the production trait.

use super::{LogEngine, LogOverview, NodeMembership, Registry, StartClusterResult, StartReplicaResult, StopResult};
use crate::core::errors::Result;
use crate::core::types::{Handle, Node, StreamConfig};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Mints process handles deterministically so tests can assert on them.
#[derive(Default)]
pub struct HandleMinter(AtomicU64);

impl HandleMinter {
    pub fn next(&self) -> Handle {
        Handle(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

/// An in-memory log engine: every "start" mints a fresh handle and records
/// a monotonically increasing offset per `(node, stream)`; nothing is
/// persisted across process restarts.
#[derive(Default)]
pub struct InMemoryLogEngine {
    handles: HandleMinter,
    leaders: DashMap<String, Handle>,
    replicas: DashMap<(String, Node), Handle>,
    overviews: DashMap<(String, Node), LogOverview>,
}

#[async_trait]
impl LogEngine for InMemoryLogEngine {
    async fn cluster_start(&self, conf: &StreamConfig) -> Result<StartClusterResult> {
        if self.leaders.contains_key(&conf.name) {
            return Ok(StartClusterResult::AlreadyStarted { conf: conf.clone() });
        } else {
            let handle = self.handles.next();
            self.leaders.insert(conf.name.clone(), handle);
            self.overviews.insert(
                (conf.name.clone(), conf.leader_node.clone()),
                LogOverview { offset: 0, epoch: conf.epoch },
            );
            return Ok(StartClusterResult::Started { leader_handle: handle, conf: conf.clone() });
        }
    }

    async fn cluster_delete(&self, conf: &StreamConfig) -> Result<()> {
        self.leaders.remove(&conf.name);
        self.replicas.retain(|(name, _), _| name != &conf.name);
        self.overviews.retain(|(name, _), _| name != &conf.name);
        Ok(())
    }

    async fn replica_start(&self, node: &Node, conf: &StreamConfig) -> Result<StartReplicaResult> {
        let key = (conf.name.clone(), node.clone());
        if let Some(existing) = self.replicas.get(&key) {
            return Ok(StartReplicaResult::AlreadyStarted(*existing));
        }
        let handle = self.handles.next();
        self.replicas.insert(key.clone(), handle);
        self.overviews.insert(key, LogOverview { offset: 0, epoch: conf.epoch });
        Ok(StartReplicaResult::Started(handle))
    }

    async fn replica_stop(&self, node: &Node, conf: &StreamConfig) -> Result<StopResult> {
        self.replicas.remove(&(conf.name.clone(), node.clone()));
        Ok(StopResult::Ok)
    }

    async fn replica_delete(&self, node: &Node, conf: &StreamConfig) -> Result<()> {
        self.replicas.remove(&(conf.name.clone(), node.clone()));
        self.overviews.remove(&(conf.name.clone(), node.clone()));
        Ok(())
    }

    async fn writer_start(&self, conf: &StreamConfig) -> Result<StartReplicaResult> {
        let handle = self.handles.next();
        self.leaders.insert(conf.name.clone(), handle);
        self.overviews.insert(
            (conf.name.clone(), conf.leader_node.clone()),
            LogOverview { offset: 0, epoch: conf.epoch },
        );
        Ok(StartReplicaResult::Started(handle))
    }

    async fn log_overview(&self, node: &Node, conf: &StreamConfig) -> Result<Option<LogOverview>> {
        Ok(self.overviews.get(&(conf.name.clone(), node.clone())).map(|o| *o))
    }
}

/// An in-memory durable registry: a plain map, standing in for a
/// transactional topology store.
#[derive(Default)]
pub struct InMemoryRegistry {
    entries: DashMap<String, StreamConfig>,
}

#[async_trait]
impl Registry for InMemoryRegistry {
    async fn declare(&self, conf: &StreamConfig) -> Result<()> {
        self.entries.insert(conf.name.clone(), conf.clone());
        Ok(())
    }

    async fn update(&self, name: &str, conf: &StreamConfig) -> Result<()> {
        if !self.entries.contains_key(name) {
            return Err(crate::core::errors::CoordinatorError::Registry(format!(
                "no registry entry for '{name}'"
            )));
        }
        self.entries.insert(name.to_string(), conf.clone());
        Ok(())
    }

    async fn delete(&self, name: &str, _acting_user: &str) -> Result<()> {
        self.entries.remove(name);
        Ok(())
    }
}

/// A single-node membership source: reports only the local node, so
/// reconciliation ticks are always a no-op. A multi-node deployment
/// supplies a real adapter atop the fleet's own membership API.
pub struct SingleNodeMembership {
    local_node: Node,
}

impl SingleNodeMembership {
    pub fn new(local_node: Node) -> Self {
        Self { local_node }
    }
}

#[async_trait]
impl NodeMembership for SingleNodeMembership {
    async fn cluster_nodes_all(&self) -> Result<Vec<Node>> {
        Ok(vec![self.local_node.clone()])
    }

    async fn cluster_nodes_running(&self) -> Result<Vec<Node>> {
        Ok(vec![self.local_node.clone()])
    }

    async fn is_alive(&self, _handle: Handle) -> bool {
        true
    }
}
