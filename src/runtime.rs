// src/runtime.rs

//! Wires the deterministic core (`core::machine`), the leader-local phase
//! executor (`core::aux`), and the membership reconciler into one running
//! process.
//!
//! The real consensus substrate, log engine, durable registry, and node
//! membership are external collaborators (§6) that this crate only
//! consumes through traits. What follows is the single-node runtime used
//! for a standalone deployment and for local development: one process
//! holds the only replica, so it is always leader, and `ConsensusSubmit`
//! degenerates to an in-process queue instead of a real replicated log.
//! A multi-node deployment supplies its own adapters for
//! `core::collaborators::{LogEngine, Registry, NodeMembership}` and a real
//! `ReplicaSubmit` atop its consensus client; this module's command loop
//! and effect interpretation are unchanged either way.

use crate::config::CoordinatorConfig;
use crate::core::aux::{AuxExecutor, PhaseDeps};
use crate::core::client::{Client, ReplicaSubmit};
use crate::core::collaborators::{ConsensusSubmit, LogEngine, NodeMembership, Registry};
use crate::core::command::{ClientReply, Command, CommandMeta, Effect};
use crate::core::errors::{CoordinatorError, Result};
use crate::core::machine;
use crate::core::membership::MembershipReconciler;
use crate::core::state::CoordinatorState;
use crate::core::types::{Node, RequestId};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{info, warn};

/// Everything the single-process runtime needs from the embedding
/// application: the four external collaborators from §6.
pub struct Collaborators {
    pub log_engine: Arc<dyn LogEngine>,
    pub registry: Arc<dyn Registry>,
    pub membership: Arc<dyn NodeMembership>,
}

/// Holds the replicated state and drives commands through `apply`,
/// interpreting the resulting effects. In a multi-node deployment this
/// struct would live only on the current Raft leader; here it is the
/// whole process.
pub struct Coordinator {
    state: Mutex<CoordinatorState>,
    aux: Arc<AuxExecutor>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    pending_replies: Arc<DashMap<RequestId, oneshot::Sender<ClientReply>>>,
    next_index: AtomicU64,
}

impl Coordinator {
    fn new(
        aux: Arc<AuxExecutor>,
        cmd_tx: mpsc::UnboundedSender<Command>,
        pending_replies: Arc<DashMap<RequestId, oneshot::Sender<ClientReply>>>,
    ) -> Self {
        Self {
            state: Mutex::new(machine::init()),
            aux,
            cmd_tx,
            pending_replies,
            next_index: AtomicU64::new(1),
        }
    }

    /// Apply one command and interpret its effects. This is the only
    /// place `apply` is called outside tests.
    async fn process(&self, cmd: Command) {
        let meta = CommandMeta { index: self.next_index.fetch_add(1, Ordering::Relaxed), term: 0 };
        let effects = {
            let mut state = self.state.lock();
            machine::apply(meta, cmd, &mut state)
        };
        for effect in effects {
            self.interpret(effect).await;
        }
    }

    async fn interpret(&self, effect: Effect) {
        match effect {
            Effect::Monitor(handle) => {
                info!(%handle, "monitor requested");
            }
            Effect::Demonitor(handle) => {
                info!(%handle, "demonitor requested");
            }
            Effect::SendMsg(handle, notification) => {
                info!(%handle, ?notification, "notification delivered");
            }
            Effect::Reply(request_id, value) => {
                if let Some((_, tx)) = self.pending_replies.remove(&request_id) {
                    let _ = tx.send(value);
                }
            }
            Effect::Aux(instruction) => {
                self.aux.handle(instruction);
            }
            Effect::DelayedCmd { delay_ms, cmd } => {
                let cmd_tx = self.cmd_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    let _ = cmd_tx.send(cmd);
                });
            }
        }
    }

    /// Drives the aux executor's resume-on-promotion behavior, per §4.5
    /// `state_enter`. Called once at startup, since a fresh process is
    /// always the only (and therefore newly "promoted") replica.
    fn resume_in_flight(&self) {
        let state = self.state.lock();
        self.aux.resume_in_flight(&state.streams);
    }
}

/// In-process stand-in for a replicated submission path: every command a
/// phase submits is pushed onto the same queue the client API uses.
struct LocalConsensusSubmit {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

#[async_trait]
impl ConsensusSubmit for LocalConsensusSubmit {
    async fn submit(&self, cmd: Command) -> Result<()> {
        self.cmd_tx.send(cmd).map_err(|_| CoordinatorError::CoordinatorUnavailable)
    }
}

fn reply_to_of(cmd: &Command) -> Option<RequestId> {
    match cmd {
        Command::Subscribe { reply_to, .. }
        | Command::Unsubscribe { reply_to, .. }
        | Command::StartCluster { reply_to, .. }
        | Command::DeleteCluster { reply_to, .. }
        | Command::DeleteReplica { reply_to, .. } => Some(*reply_to),
        Command::StartReplica { reply_to, .. } => *reply_to,
        _ => None,
    }
}

/// In-process stand-in for submitting a command to a named replica: there
/// is exactly one replica (this process), so `node` is ignored.
struct LocalReplicaSubmit {
    cmd_tx: mpsc::UnboundedSender<Command>,
    pending_replies: Arc<DashMap<RequestId, oneshot::Sender<ClientReply>>>,
}

#[async_trait]
impl ReplicaSubmit for LocalReplicaSubmit {
    async fn submit_to(&self, _node: &Node, cmd: Command) -> Result<oneshot::Receiver<ClientReply>> {
        let (tx, rx) = oneshot::channel();
        if let Some(request_id) = reply_to_of(&cmd) {
            self.pending_replies.insert(request_id, tx);
        }
        self.cmd_tx.send(cmd).map_err(|_| CoordinatorError::CoordinatorUnavailable)?;
        Ok(rx)
    }
}

/// Builds and runs the coordinator until `shutdown_rx` fires. Returns the
/// [`Client`] handle so callers (or, in the demo binary, a CLI loop) can
/// submit commands.
pub async fn run(
    config: CoordinatorConfig,
    collaborators: Collaborators,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<Arc<Client>> {
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<Command>();
    let pending_replies: Arc<DashMap<RequestId, oneshot::Sender<ClientReply>>> = Arc::new(DashMap::new());

    let deps = Arc::new(PhaseDeps {
        log_engine: collaborators.log_engine,
        registry: collaborators.registry,
        membership: collaborators.membership.clone(),
        consensus: Arc::new(LocalConsensusSubmit { cmd_tx: cmd_tx.clone() }),
    });
    let aux = Arc::new(AuxExecutor::new(deps));

    let coordinator = Arc::new(Coordinator::new(aux.clone(), cmd_tx.clone(), pending_replies.clone()));
    coordinator.resume_in_flight();

    let command_loop_coordinator = coordinator.clone();
    tokio::spawn(async move {
        while let Some(cmd) = cmd_rx.recv().await {
            command_loop_coordinator.process(cmd).await;
        }
    });

    let reap_aux = aux.clone();
    let mut reap_shutdown = shutdown_rx.resubscribe();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(500));
        loop {
            tokio::select! {
                _ = ticker.tick() => reap_aux.reap_finished().await,
                _ = reap_shutdown.recv() => {
                    info!("aux reaper shutting down");
                    return;
                }
            }
        }
    });

    let reconciler = Arc::new(MembershipReconciler::new(
        collaborators.membership,
        BTreeSet::new(),
        Duration::from_millis(config.tick_interval_ms),
    ));
    let reconciler_shutdown = shutdown_rx.resubscribe();
    tokio::spawn(reconciler.run(reconciler_shutdown));

    // Drain the caller-level shutdown signal so the broadcast sender's
    // reference count stays accurate even if no other task subscribes.
    tokio::spawn(async move {
        let _ = shutdown_rx.recv().await;
        warn!("coordinator runtime received shutdown signal");
    });

    let submit = Arc::new(LocalReplicaSubmit { cmd_tx, pending_replies });
    Ok(Arc::new(Client::new(submit, vec!["local".to_string()])))
}
