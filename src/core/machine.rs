// src/core/machine.rs

//! The deterministic core: `apply`, `init`, and `state_enter`.
//!
//! Everything here is a pure function of `(state, command)`. No I/O, no
//! clock reads, no randomness. All side effects are returned as [`Effect`]
//! values for the surrounding runtime to interpret; see `core::aux` for the
//! leader-local executor that does so.

use crate::core::command::{
    AuxInstruction, Command, CommandMeta, ClientReply, Effect, NodeOffset, Notification, PhaseArgs,
};
use crate::core::errors::ClientError;
use crate::core::state::{CoordinatorState, StreamFsmState, StreamState};
use crate::core::types::{Handle, Role, StreamConfig};
use tracing::{debug, info, warn};

/// Construct a fresh, empty coordinator state. Called once at bootstrap,
/// or replayed from the Raft log's initial snapshot.
pub fn init() -> CoordinatorState {
    CoordinatorState::new()
}

/// Apply one command to the replicated state, returning the effects the
/// surrounding runtime must interpret (monitors, replies, aux dispatch).
pub fn apply(meta: CommandMeta, cmd: Command, state: &mut CoordinatorState) -> Vec<Effect> {
    debug!(index = meta.index, term = meta.term, cmd = cmd.name(), "apply");
    match cmd {
        Command::Subscribe { stream_id, subscriber, reply_to } => {
            apply_subscribe(state, stream_id, subscriber, reply_to)
        }
        Command::Unsubscribe { stream_id, subscriber, reply_to } => {
            apply_unsubscribe(state, stream_id, subscriber, reply_to)
        }
        Command::StartCluster { desc, reply_to } => apply_start_cluster(state, desc, reply_to),
        Command::DeleteCluster { stream_id, acting_user, reply_to } => {
            apply_delete_cluster(state, stream_id, acting_user, reply_to)
        }
        Command::StartReplica { stream_id, node, retries, reply_to } => {
            apply_start_replica(state, stream_id, node, retries, reply_to)
        }
        Command::DeleteReplica { stream_id, node, reply_to } => {
            apply_delete_replica(state, stream_id, node, reply_to)
        }
        Command::StartClusterReply { stream_id, conf } => apply_start_cluster_reply(state, stream_id, conf),
        Command::StartClusterFailed { stream_id, reason } => apply_start_cluster_failed(state, stream_id, reason),
        Command::StartReplicaReply { stream_id, node, pid, conf } => {
            apply_start_replica_reply(state, stream_id, node, pid, conf)
        }
        Command::StartReplicaFailed { stream_id, node, retries, reply_to, reason } => {
            apply_start_replica_failed(state, stream_id, node, retries, reply_to, reason)
        }
        Command::DeleteClusterReply { stream_id } => apply_delete_cluster_reply(state, stream_id),
        Command::PhaseFinished { stream_id, ok } => apply_phase_finished(state, stream_id, ok),
        Command::StreamUpdated { conf } => apply_stream_updated(state, conf),
        Command::ReplicasStopped { stream_id } => apply_replicas_stopped(state, stream_id),
        Command::StartLeaderElection { stream_id, new_epoch, offsets } => {
            apply_start_leader_election(state, stream_id, new_epoch, offsets)
        }
        Command::LeaderElected { conf } => apply_leader_elected(state, conf),
        Command::Down { handle, reason } => apply_down(state, handle, reason),
    }
}

fn reply(to: crate::core::types::RequestId, value: ClientReply) -> Effect {
    Effect::Reply(to, value)
}

fn dispatch_or_queue(
    stream: &mut StreamState,
    fsm_state: StreamFsmState,
    args: PhaseArgs,
    reply_to: Option<crate::core::types::RequestId>,
) -> Vec<Effect> {
    stream.enter_phase(fsm_state, args.clone(), reply_to);
    vec![Effect::Aux(AuxInstruction::Phase {
        stream_id: stream.conf.name.clone(),
        args,
    })]
}

fn apply_subscribe(
    state: &mut CoordinatorState,
    stream_id: String,
    subscriber: Handle,
    reply_to: crate::core::types::RequestId,
) -> Vec<Effect> {
    let Some(stream) = state.streams.get_mut(&stream_id) else {
        return vec![reply(reply_to, ClientReply::Error(ClientError::NotFound))];
    };
    if stream.subscribers.contains(&subscriber) {
        return vec![reply(reply_to, ClientReply::Ok)];
    }
    stream.subscribers.insert(subscriber);
    let leader_pid = stream.conf.leader_pid;
    let epoch = stream.conf.epoch;

    state.add_subscriber(subscriber, stream_id.clone());

    let notification = match leader_pid {
        Some(leader) => Notification::LeaderUp {
            stream_id: stream_id.clone(),
            epoch,
            leader,
        },
        None => Notification::LeaderDown {
            stream_id: stream_id.clone(),
            epoch,
        },
    };

    vec![
        Effect::Monitor(subscriber),
        Effect::SendMsg(subscriber, notification),
        reply(reply_to, ClientReply::Ok),
    ]
}

fn apply_unsubscribe(
    state: &mut CoordinatorState,
    stream_id: String,
    subscriber: Handle,
    reply_to: crate::core::types::RequestId,
) -> Vec<Effect> {
    if let Some(stream) = state.streams.get_mut(&stream_id) {
        stream.subscribers.remove(&subscriber);
    }
    let fully_removed = state.remove_subscriber(&subscriber, &stream_id);
    let mut effects = vec![reply(reply_to, ClientReply::Ok)];
    if fully_removed {
        effects.insert(0, Effect::Demonitor(subscriber));
    }
    effects
}

fn apply_start_cluster(
    state: &mut CoordinatorState,
    desc: crate::core::types::QueueDesc,
    reply_to: crate::core::types::RequestId,
) -> Vec<Effect> {
    if state.streams.contains_key(&desc.name) {
        return vec![reply(reply_to, ClientReply::Error(ClientError::AlreadyStarted))];
    }
    let name = desc.name.clone();
    let conf = StreamConfig::from_desc(desc.clone());
    let mut stream = StreamState::new(conf);
    info!(stream_id = %name, "starting cluster");
    let effects = dispatch_or_queue(
        &mut stream,
        StreamFsmState::StartCluster,
        PhaseArgs::StartCluster { desc },
        Some(reply_to),
    );
    state.streams.insert(name, stream);
    effects
}

fn apply_delete_cluster(
    state: &mut CoordinatorState,
    stream_id: String,
    _acting_user: String,
    reply_to: crate::core::types::RequestId,
) -> Vec<Effect> {
    let Some(stream) = state.streams.get_mut(&stream_id) else {
        return vec![reply(reply_to, ClientReply::Count(0))];
    };

    if !stream.state.is_running() {
        stream.queue_or_purge_for_delete(Command::DeleteCluster {
            stream_id: stream_id.clone(),
            acting_user: _acting_user,
            reply_to,
        });
        return Vec::new();
    }

    let leader_pid = stream.conf.leader_pid;
    let replica_pids = stream.conf.replica_pids.clone();

    let mut effects = Vec::new();
    if let Some(leader) = leader_pid {
        state.remove_process(&leader);
        effects.push(Effect::Demonitor(leader));
    }
    for pid in replica_pids {
        state.remove_process(&pid);
        effects.push(Effect::Demonitor(pid));
    }
    let stream = state.streams.get_mut(&stream_id).expect("checked above");
    let conf = stream.conf.clone();
    info!(stream_id = %stream_id, "deleting cluster");
    effects.extend(dispatch_or_queue(
        stream,
        StreamFsmState::DeleteCluster,
        PhaseArgs::DeleteCluster { conf },
        Some(reply_to),
    ));
    effects
}

fn apply_start_replica(
    state: &mut CoordinatorState,
    stream_id: String,
    node: String,
    retries: u32,
    reply_to: Option<crate::core::types::RequestId>,
) -> Vec<Effect> {
    let Some(stream) = state.streams.get_mut(&stream_id) else {
        return reply_to
            .map(|r| vec![reply(r, ClientReply::Error(ClientError::NotFound))])
            .unwrap_or_default();
    };

    if !stream.state.is_running() {
        stream.queue_or_purge_for_delete(Command::StartReplica {
            stream_id,
            node,
            retries,
            reply_to,
        });
        return Vec::new();
    }

    stream.pending_replicas.insert(node.clone());
    let conf = stream.conf.clone();
    dispatch_or_queue(
        stream,
        StreamFsmState::StartReplica,
        PhaseArgs::StartReplica { node, conf, retries, reply_to },
        reply_to,
    )
}

fn apply_delete_replica(
    state: &mut CoordinatorState,
    stream_id: String,
    node: String,
    reply_to: crate::core::types::RequestId,
) -> Vec<Effect> {
    let Some(stream) = state.streams.get_mut(&stream_id) else {
        return vec![reply(reply_to, ClientReply::Error(ClientError::NotFound))];
    };

    if !stream.state.is_running() {
        stream.queue_or_purge_for_delete(Command::DeleteReplica { stream_id, node, reply_to });
        return Vec::new();
    }

    // Resolved Open Question: `conf` is advanced to the post-removal
    // configuration before the phase is dispatched; the phase itself
    // receives this new `conf`, never the pre-removal one.
    let mut new_conf = stream.conf.clone();
    if let Some(pos) = new_conf.replica_nodes.iter().position(|n| n == &node) {
        new_conf.replica_nodes.remove(pos);
        if pos < new_conf.replica_pids.len() {
            let pid = new_conf.replica_pids.remove(pos);
            state.remove_process(&pid);
        }
    }
    let stream = state.streams.get_mut(&stream_id).expect("checked above");
    stream.conf = new_conf.clone();
    dispatch_or_queue(
        stream,
        StreamFsmState::DeleteReplica,
        PhaseArgs::DeleteReplica { node, conf: new_conf },
        Some(reply_to),
    )
}

fn apply_start_cluster_reply(
    state: &mut CoordinatorState,
    stream_id: String,
    conf: StreamConfig,
) -> Vec<Effect> {
    if !state.streams.contains_key(&stream_id) {
        warn!(stream_id = %stream_id, "start_cluster_reply for unknown stream");
        return Vec::new();
    }

    if let Some(leader) = conf.leader_pid {
        state.register_process(leader, stream_id.clone(), Role::Leader);
    }
    for pid in conf.replica_pids.clone() {
        state.register_process(pid, stream_id.clone(), Role::Follower);
    }

    let stream = state.streams.get_mut(&stream_id).expect("checked above");
    stream.conf = conf.clone();
    let mut effects = vec![Effect::Aux(AuxInstruction::Phase {
        stream_id: stream_id.clone(),
        args: PhaseArgs::RepairRegistryNew { conf: conf.clone() },
    })];
    stream.state = StreamFsmState::StartCluster;
    stream.phase = Some(crate::core::state::PhaseName::RepairRegistryNew);
    stream.phase_args = Some(PhaseArgs::RepairRegistryNew { conf: conf.clone() });
    if let Some(leader) = conf.leader_pid {
        effects.push(Effect::Monitor(leader));
    }
    for pid in conf.replica_pids.clone() {
        effects.push(Effect::Monitor(pid));
    }
    effects
}

fn apply_start_cluster_failed(state: &mut CoordinatorState, stream_id: String, reason: String) -> Vec<Effect> {
    warn!(stream_id = %stream_id, reason = %reason, "start_cluster phase failed");
    let reply_to = state.streams.get(&stream_id).and_then(|s| s.reply_to);
    if let Some(reply_to) = reply_to {
        state.streams.remove(&stream_id);
        return vec![reply(reply_to, ClientReply::Error(ClientError::CoordinatorUnavailable))];
    }
    Vec::new()
}

fn apply_start_replica_reply(
    state: &mut CoordinatorState,
    stream_id: String,
    node: String,
    pid: Handle,
    conf: StreamConfig,
) -> Vec<Effect> {
    if !state.streams.contains_key(&stream_id) {
        return Vec::new();
    }
    state.register_process(pid, stream_id.clone(), Role::Follower);

    let stream = state.streams.get_mut(&stream_id).expect("checked above");
    stream.conf = conf.clone();
    stream.pending_replicas.remove(&node);
    stream.phase = Some(crate::core::state::PhaseName::RepairRegistryUpdate);
    vec![
        Effect::Monitor(pid),
        Effect::Aux(AuxInstruction::Phase {
            stream_id,
            args: PhaseArgs::RepairRegistryUpdate { conf },
        }),
    ]
}

fn apply_start_replica_failed(
    state: &mut CoordinatorState,
    stream_id: String,
    node: String,
    retries: u32,
    reply_to: Option<crate::core::types::RequestId>,
    reason: String,
) -> Vec<Effect> {
    warn!(stream_id = %stream_id, node = %node, retries, reason = %reason, "start_replica failed, scheduling retry");
    let Some(stream) = state.streams.get_mut(&stream_id) else {
        return Vec::new();
    };
    stream.pending_replicas.insert(node.clone());
    stream.return_to_running();
    let mut effects = Vec::new();
    let pending = stream.drain_pending();
    if !pending.is_empty() {
        effects.push(Effect::Aux(AuxInstruction::Pipeline(pending)));
    }
    const RESTART_TIMEOUT_MS: u64 = 1000;
    effects.push(Effect::DelayedCmd {
        delay_ms: RESTART_TIMEOUT_MS * retries as u64,
        cmd: Command::StartReplica {
            stream_id,
            node,
            retries: retries + 1,
            reply_to,
        },
    });
    effects
}

fn apply_delete_cluster_reply(state: &mut CoordinatorState, stream_id: String) -> Vec<Effect> {
    let Some(stream) = state.streams.remove(&stream_id) else {
        return Vec::new();
    };
    info!(stream_id = %stream_id, "cluster deleted");
    let mut effects = Vec::new();
    for subscriber in stream.subscribers.iter() {
        effects.push(Effect::SendMsg(
            *subscriber,
            Notification::ClusterDeleted { stream_id: stream_id.clone() },
        ));
        state.remove_subscriber(subscriber, &stream_id);
    }
    if let Some(reply_to) = stream.reply_to {
        // The client API reports deletions as a count, mirroring the
        // `{ok, 0}` reply the unknown-stream path returns below.
        effects.push(reply(reply_to, ClientReply::Count(0)));
    }
    effects
}

fn apply_phase_finished(state: &mut CoordinatorState, stream_id: String, ok: bool) -> Vec<Effect> {
    let Some(stream) = state.streams.get_mut(&stream_id) else {
        return Vec::new();
    };
    if !ok {
        warn!(stream_id = %stream_id, "phase reported failure on finish");
    }
    let reply_to = stream.reply_to;
    stream.return_to_running();
    let mut effects = Vec::new();
    if let Some(reply_to) = reply_to {
        effects.push(reply(reply_to, ClientReply::Ok));
    }
    let pending = stream.drain_pending();
    if !pending.is_empty() {
        effects.push(Effect::Aux(AuxInstruction::Pipeline(pending)));
    }
    effects
}

fn apply_stream_updated(state: &mut CoordinatorState, conf: StreamConfig) -> Vec<Effect> {
    let Some(stream) = state.streams.get_mut(&conf.name) else {
        return Vec::new();
    };
    stream.conf = conf.clone();
    let stream_id = conf.name.clone();
    stream.phase = Some(crate::core::state::PhaseName::RepairRegistryUpdate);
    vec![Effect::Aux(AuxInstruction::Phase {
        stream_id,
        args: PhaseArgs::RepairRegistryUpdate { conf },
    })]
}

fn apply_replicas_stopped(state: &mut CoordinatorState, stream_id: String) -> Vec<Effect> {
    let Some(stream) = state.streams.get_mut(&stream_id) else {
        return Vec::new();
    };
    let conf = stream.conf.clone();
    stream.phase = Some(crate::core::state::PhaseName::CheckQuorum);
    stream.phase_args = Some(PhaseArgs::CheckQuorum { conf: conf.clone() });
    vec![Effect::Aux(AuxInstruction::Phase {
        stream_id,
        args: PhaseArgs::CheckQuorum { conf },
    })]
}

fn apply_start_leader_election(
    state: &mut CoordinatorState,
    stream_id: String,
    new_epoch: u64,
    mut offsets: Vec<NodeOffset>,
) -> Vec<Effect> {
    let Some(stream) = state.streams.get_mut(&stream_id) else {
        return Vec::new();
    };

    offsets.sort_by(|a, b| a.cmp_for_election(b));
    let winner = offsets.pop().expect("quorum check guarantees at least one offset");

    let old_leader = stream.conf.leader_node.clone();
    let mut conf = stream.conf.clone();
    conf.epoch = new_epoch;
    conf.leader_pid = None;
    conf.leader_node = winner.node.clone();
    conf.replica_nodes.retain(|n| n != &winner.node);
    conf.replica_pids.clear();
    if !conf.replica_nodes.contains(&old_leader) {
        conf.replica_nodes.push(old_leader.clone());
    }

    info!(stream_id = %stream_id, epoch = new_epoch, new_leader = %winner.node, "leader election decided");

    stream.conf = conf.clone();
    stream.phase = Some(crate::core::state::PhaseName::StartNewLeader);
    stream.phase_args = Some(PhaseArgs::StartNewLeader { conf: conf.clone() });

    let mut effects = vec![Effect::Aux(AuxInstruction::Phase {
        stream_id: stream_id.clone(),
        args: PhaseArgs::StartNewLeader { conf },
    })];

    if winner.node != old_leader {
        stream.pending_replicas.insert(old_leader.clone());
        effects.push(Effect::DelayedCmd {
            delay_ms: 0,
            cmd: Command::StartReplica {
                stream_id,
                node: old_leader,
                retries: 0,
                reply_to: None,
            },
        });
    }
    effects
}

fn apply_leader_elected(state: &mut CoordinatorState, conf: StreamConfig) -> Vec<Effect> {
    let stream_id = conf.name.clone();
    if !state.streams.contains_key(&stream_id) {
        return Vec::new();
    }
    if let Some(leader) = conf.leader_pid {
        state.register_process(leader, stream_id.clone(), Role::Leader);
    }

    let stream = state.streams.get_mut(&stream_id).expect("checked above");
    stream.conf = conf.clone();
    let mut effects = Vec::new();
    if let Some(leader) = conf.leader_pid {
        effects.push(Effect::Monitor(leader));
        for subscriber in stream.subscribers.iter() {
            effects.push(Effect::SendMsg(
                *subscriber,
                Notification::LeaderUp { stream_id: stream_id.clone(), epoch: conf.epoch, leader },
            ));
        }
    }
    stream.phase = Some(crate::core::state::PhaseName::RepairRegistryUpdate);
    stream.phase_args = Some(PhaseArgs::RepairRegistryUpdate { conf: conf.clone() });
    effects.push(Effect::Aux(AuxInstruction::Phase {
        stream_id,
        args: PhaseArgs::RepairRegistryUpdate { conf },
    }));
    effects
}

fn apply_down(state: &mut CoordinatorState, handle: Handle, reason: String) -> Vec<Effect> {
    if state.subscribers.contains_key(&handle) {
        let streams = state.purge_subscriber(&handle);
        for stream_id in streams {
            if let Some(stream) = state.streams.get_mut(&stream_id) {
                stream.subscribers.remove(&handle);
            }
        }
        return Vec::new();
    }

    let Some((stream_id, role)) = state.remove_process(&handle) else {
        return Vec::new();
    };

    let Some(stream) = state.streams.get_mut(&stream_id) else {
        return Vec::new();
    };

    if matches!(stream.state, StreamFsmState::DeleteCluster) {
        return Vec::new();
    }

    match role {
        Role::Leader => {
            warn!(stream_id = %stream_id, %reason, "leader down, starting election");
            let conf = stream.conf.clone();
            stream.conf.leader_pid = None;
            let epoch = stream.conf.epoch;
            let mut effects: Vec<Effect> = stream
                .subscribers
                .iter()
                .map(|s| Effect::SendMsg(*s, Notification::LeaderDown { stream_id: stream_id.clone(), epoch }))
                .collect();
            stream.state = StreamFsmState::LeaderElection;
            stream.phase = Some(crate::core::state::PhaseName::StopReplicas);
            stream.phase_args = Some(PhaseArgs::StopReplicas { conf: conf.clone() });
            effects.push(Effect::Aux(AuxInstruction::Phase {
                stream_id,
                args: PhaseArgs::StopReplicas { conf },
            }));
            effects
        }
        Role::Follower => {
            let leader_alive = stream.conf.leader_pid.is_some();
            if leader_alive {
                warn!(stream_id = %stream_id, %reason, "follower down, restarting replica");
                if let Some(pos) = stream.conf.replica_pids.iter().position(|pid| *pid == handle) {
                    let node = stream.conf.replica_nodes[pos].clone();
                    let conf = stream.conf.clone();
                    dispatch_or_queue(
                        stream,
                        StreamFsmState::ReplicaRestart,
                        PhaseArgs::StartReplica { node, conf, retries: 1, reply_to: None },
                        None,
                    )
                } else {
                    Vec::new()
                }
            } else {
                // Leader election already pending: defer this restart until it drains.
                stream.queue_or_purge_for_delete(Command::Down { handle, reason });
                Vec::new()
            }
        }
    }
}
