// src/core/aux/phases.rs

//! Phase implementations. Each function here is spawned as an isolated
//! task by `AuxExecutor::spawn_phase`; on completion it submits exactly one
//! command back into the replicated log (§4.6) and returns `true`. A phase
//! that panics, or returns `false` because it decided not to submit, is
//! retried by the executor (`AuxExecutor::reap_finished`).

use super::PhaseDeps;
use crate::core::collaborators::{StartClusterResult, StartReplicaResult, StopResult};
use crate::core::command::{Command, NodeOffset, PhaseArgs};
use crate::core::types::StreamId;
use tracing::{info, warn};

pub async fn run(deps: &PhaseDeps, stream_id: StreamId, args: PhaseArgs) -> bool {
    match args {
        PhaseArgs::StartCluster { desc } => start_cluster(deps, stream_id, desc).await,
        PhaseArgs::DeleteCluster { conf } => delete_cluster(deps, stream_id, conf).await,
        PhaseArgs::StartReplica { node, conf, retries, reply_to } => {
            start_replica(deps, stream_id, node, conf, retries, reply_to).await
        }
        PhaseArgs::DeleteReplica { node, conf } => delete_replica(deps, stream_id, node, conf).await,
        PhaseArgs::StopReplicas { conf } => stop_replicas(deps, stream_id, conf).await,
        PhaseArgs::CheckQuorum { conf } => check_quorum(deps, stream_id, conf).await,
        PhaseArgs::StartNewLeader { conf } => start_new_leader(deps, stream_id, conf).await,
        PhaseArgs::RepairRegistryNew { conf } => repair_registry_new(deps, stream_id, conf).await,
        PhaseArgs::RepairRegistryUpdate { conf } => repair_registry_update(deps, stream_id, conf).await,
    }
}

async fn start_cluster(deps: &PhaseDeps, stream_id: StreamId, desc: crate::core::types::QueueDesc) -> bool {
    let conf = crate::core::types::StreamConfig::from_desc(desc);
    match deps.log_engine.cluster_start(&conf).await {
        Ok(StartClusterResult::Started { leader_handle, mut conf }) => {
            conf.leader_pid = Some(leader_handle);
            submit(deps, Command::StartClusterReply { stream_id, conf }).await;
        }
        Ok(StartClusterResult::AlreadyStarted { conf }) => {
            submit(deps, Command::StartClusterReply { stream_id, conf }).await;
        }
        Err(e) => {
            warn!(stream_id = %stream_id, error = %e, "start_cluster phase error");
            submit(deps, Command::StartClusterFailed { stream_id, reason: e.to_string() }).await;
        }
    }
    true
}

async fn delete_cluster(deps: &PhaseDeps, stream_id: StreamId, conf: crate::core::types::StreamConfig) -> bool {
    if let Err(e) = deps.log_engine.cluster_delete(&conf).await {
        warn!(stream_id = %stream_id, error = %e, "cluster_delete error, proceeding with registry delete");
    }
    if let Err(e) = deps.registry.delete(&stream_id, "coordinator").await {
        warn!(stream_id = %stream_id, error = %e, "registry delete error");
    }
    submit(deps, Command::DeleteClusterReply { stream_id }).await;
    true
}

async fn start_replica(
    deps: &PhaseDeps,
    stream_id: StreamId,
    node: String,
    conf: crate::core::types::StreamConfig,
    retries: u32,
    reply_to: Option<crate::core::types::RequestId>,
) -> bool {
    match deps.log_engine.replica_start(&node, &conf).await {
        Ok(StartReplicaResult::Started(pid)) | Ok(StartReplicaResult::AlreadyStarted(pid)) => {
            let mut conf = conf;
            conf.replica_pids.push(pid);
            if !conf.replica_nodes.contains(&node) {
                conf.replica_nodes.push(node.clone());
            }
            submit(deps, Command::StartReplicaReply { stream_id, node, pid, conf }).await;
        }
        Ok(StartReplicaResult::AlreadyPresent) => {
            submit(deps, Command::PhaseFinished { stream_id, ok: true }).await;
        }
        Ok(StartReplicaResult::Error(reason)) => {
            submit(
                deps,
                Command::StartReplicaFailed { stream_id, node, retries, reply_to, reason },
            )
            .await;
        }
        Err(e) => {
            submit(
                deps,
                Command::StartReplicaFailed { stream_id, node, retries, reply_to, reason: e.to_string() },
            )
            .await;
        }
    }
    true
}

async fn delete_replica(
    deps: &PhaseDeps,
    stream_id: StreamId,
    node: String,
    conf: crate::core::types::StreamConfig,
) -> bool {
    if let Err(e) = deps.log_engine.replica_delete(&node, &conf).await {
        warn!(stream_id = %stream_id, node = %node, error = %e, "replica_delete error");
    }
    submit(deps, Command::StreamUpdated { conf }).await;
    true
}

async fn stop_replicas(deps: &PhaseDeps, stream_id: StreamId, conf: crate::core::types::StreamConfig) -> bool {
    for node in &conf.replica_nodes {
        match deps.log_engine.replica_stop(node, &conf).await {
            Ok(StopResult::Ok) | Ok(StopResult::NodeDown) => {}
            Err(e) => warn!(stream_id = %stream_id, node = %node, error = %e, "replica_stop error, continuing"),
        }
    }
    submit(deps, Command::ReplicasStopped { stream_id }).await;
    true
}

/// Over `replica_nodes ∪ {leader_node}`, collect `(offset, epoch)` from
/// every reachable node whose log exists, then require a strict majority.
async fn check_quorum(deps: &PhaseDeps, stream_id: StreamId, conf: crate::core::types::StreamConfig) -> bool {
    let mut candidates = conf.replica_nodes.clone();
    candidates.push(conf.leader_node.clone());

    let total = candidates.len();
    let quorum = total / 2 + 1;

    let mut offsets = Vec::with_capacity(total);
    for node in &candidates {
        let overview = deps.log_engine.log_overview(node, &conf).await.ok().flatten();
        offsets.push(NodeOffset {
            node: node.clone(),
            offset: overview.map(|o| (o.offset, o.epoch)),
        });
    }

    let alive = offsets.iter().filter(|o| o.offset.is_some()).count();
    if alive < quorum {
        warn!(stream_id = %stream_id, alive, quorum, "quorum not met, phase will be retried");
        // No reply submitted: the executor's reap loop re-spawns this same
        // phase once it notices the task finished without one.
        return false;
    }

    info!(stream_id = %stream_id, alive, quorum, "quorum reached, proceeding to election");
    submit(
        deps,
        Command::StartLeaderElection { stream_id, new_epoch: conf.epoch + 1, offsets },
    )
    .await;
    true
}

async fn start_new_leader(deps: &PhaseDeps, stream_id: StreamId, conf: crate::core::types::StreamConfig) -> bool {
    if let Err(e) = deps.log_engine.replica_stop(&conf.leader_node, &conf).await {
        warn!(stream_id = %stream_id, error = %e, "stopping stale process on new leader node, continuing");
    }
    match deps.log_engine.writer_start(&conf).await {
        Ok(StartReplicaResult::Started(pid)) | Ok(StartReplicaResult::AlreadyStarted(pid)) => {
            let mut conf = conf;
            conf.leader_pid = Some(pid);
            submit(deps, Command::LeaderElected { conf }).await;
            true
        }
        Ok(StartReplicaResult::AlreadyPresent) => {
            submit(deps, Command::LeaderElected { conf }).await;
            true
        }
        Ok(StartReplicaResult::Error(reason)) => {
            warn!(stream_id = %stream_id, %reason, "start_new_leader failed");
            // No reply submitted: the executor retries this as check_quorum.
            false
        }
        Err(e) => {
            warn!(stream_id = %stream_id, error = %e, "start_new_leader failed");
            false
        }
    }
}

async fn repair_registry_new(deps: &PhaseDeps, stream_id: StreamId, conf: crate::core::types::StreamConfig) -> bool {
    if let Err(e) = deps.registry.declare(&conf).await {
        warn!(stream_id = %stream_id, error = %e, "registry declare failed, will be retried");
        return false;
    }
    submit(deps, Command::PhaseFinished { stream_id, ok: true }).await;
    true
}

async fn repair_registry_update(
    deps: &PhaseDeps,
    stream_id: StreamId,
    conf: crate::core::types::StreamConfig,
) -> bool {
    match deps.registry.update(&stream_id, &conf).await {
        Ok(()) => {}
        Err(e) => {
            warn!(stream_id = %stream_id, error = %e, "registry update missed entry, re-declaring from snapshot");
            if let Err(e) = deps.registry.declare(&conf).await {
                warn!(stream_id = %stream_id, error = %e, "registry re-declare failed, will be retried");
                return false;
            }
        }
    }
    submit(deps, Command::PhaseFinished { stream_id, ok: true }).await;
    true
}

async fn submit(deps: &PhaseDeps, cmd: Command) {
    if let Err(e) = deps.consensus.submit(cmd).await {
        warn!(error = %e, "phase reply submission failed");
    }
}
