// src/core/bootstrap.rs

//! Startup path selection (§4.8): first-start, join-existing-cluster, or
//! restart. Replaces the source's cross-node named lock with a leased key
//! inside the consensus store's own bootstrap mechanism (see REDESIGN
//! FLAGS / DESIGN.md "Global-lock bootstrap").

use crate::core::errors::Result;
use std::path::Path;
use tracing::info;

/// Which of the three startup paths this process should take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupPath {
    FirstStart,
    JoinExisting,
    Restart,
}

/// Decide the startup path from local on-disk state and seed reachability.
/// Does not itself perform the join or replay; callers act on the result.
pub async fn decide_startup_path(
    raft_data_dir: &Path,
    seed_nodes: &[String],
    probe_seed: impl Fn(&str) -> bool,
) -> StartupPath {
    if local_log_exists(raft_data_dir) {
        info!(dir = %raft_data_dir.display(), "local raft log present, restarting");
        return StartupPath::Restart;
    }

    if let Some(seed) = seed_nodes.iter().find(|s| probe_seed(s)) {
        info!(seed = %seed, "reachable seed found, joining existing cluster");
        return StartupPath::JoinExisting;
    }

    info!("no local log and no reachable seed, taking first-start path");
    StartupPath::FirstStart
}

fn local_log_exists(raft_data_dir: &Path) -> bool {
    raft_data_dir.join("log").exists() || raft_data_dir.join("snapshot").exists()
}

/// Acquire the well-known coordination lock used to serialize concurrent
/// first-start races across the fleet. Modeled as a leased key; the
/// production adapter implements this atop whatever the consensus store's
/// own client exposes (e.g. a compare-and-swap on a reserved key).
#[async_trait::async_trait]
pub trait StartupLock: Send + Sync {
    async fn try_acquire(&self, lock_name: &str, lease_ms: u64) -> Result<bool>;
    async fn release(&self, lock_name: &str) -> Result<()>;
}

/// Run the first-start sequence: acquire the lock, initialize a
/// single-member cluster, and become leader. Returns `Ok(false)` without
/// initializing if another process already holds the lock, so the caller
/// can fall back to `JoinExisting` against the node that won the race.
pub async fn first_start(
    lock: &dyn StartupLock,
    lock_name: &str,
    lease_ms: u64,
    init_single_member: impl FnOnce() -> Result<()>,
) -> Result<bool> {
    if !lock.try_acquire(lock_name, lease_ms).await? {
        return Ok(false);
    }
    let result = init_single_member();
    lock.release(lock_name).await?;
    result.map(|()| true)
}
