// tests/aux_phase_test.rs

//! S3 — a replica-start phase failure is retried with back-off.
//! S6 — a quorum-losing `check_quorum` phase exits without a reply and is
//! later retried successfully once enough nodes are reachable.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use streamcoord::core::aux::PhaseDeps;
use streamcoord::core::collaborators::demo::{InMemoryRegistry, SingleNodeMembership};
use streamcoord::core::collaborators::{
    ConsensusSubmit, LogEngine, LogOverview, StartClusterResult, StartReplicaResult, StopResult,
};
use streamcoord::core::command::{Command, PhaseArgs};
use streamcoord::core::errors::Result;
use streamcoord::core::types::{Node, QueueDesc, StreamConfig};

struct RecordingSubmit {
    submitted: Mutex<Vec<Command>>,
}

#[async_trait]
impl ConsensusSubmit for RecordingSubmit {
    async fn submit(&self, cmd: Command) -> Result<()> {
        self.submitted.lock().unwrap().push(cmd);
        Ok(())
    }
}

/// Fails `replica_start` until `succeed_after` attempts have been made.
struct FlakyLogEngine {
    attempts: AtomicUsize,
    succeed_after: usize,
    quorum_overviews: Vec<Option<LogOverview>>,
}

#[async_trait]
impl LogEngine for FlakyLogEngine {
    async fn cluster_start(&self, conf: &StreamConfig) -> Result<StartClusterResult> {
        Ok(StartClusterResult::AlreadyStarted { conf: conf.clone() })
    }
    async fn cluster_delete(&self, _conf: &StreamConfig) -> Result<()> {
        Ok(())
    }
    async fn replica_start(&self, _node: &Node, _conf: &StreamConfig) -> Result<StartReplicaResult> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt + 1 < self.succeed_after {
            Ok(StartReplicaResult::Error("enoent".into()))
        } else {
            Ok(StartReplicaResult::Started(streamcoord::core::types::Handle(42)))
        }
    }
    async fn replica_stop(&self, _node: &Node, _conf: &StreamConfig) -> Result<StopResult> {
        Ok(StopResult::Ok)
    }
    async fn replica_delete(&self, _node: &Node, _conf: &StreamConfig) -> Result<()> {
        Ok(())
    }
    async fn writer_start(&self, _conf: &StreamConfig) -> Result<StartReplicaResult> {
        Ok(StartReplicaResult::Started(streamcoord::core::types::Handle(1)))
    }
    async fn log_overview(&self, node: &Node, conf: &StreamConfig) -> Result<Option<LogOverview>> {
        let idx = conf.replica_nodes.iter().chain(std::iter::once(&conf.leader_node)).position(|n| n == node);
        Ok(idx.and_then(|i| self.quorum_overviews.get(i).copied().flatten()))
    }
}

fn conf(name: &str) -> StreamConfig {
    StreamConfig::from_desc(QueueDesc {
        name: name.into(),
        reference: "ref".into(),
        leader_node: "n1".into(),
        replica_nodes: vec!["n2".into(), "n3".into()],
    })
}

#[tokio::test]
async fn start_replica_failure_reports_failed_command_for_scheduling_retry() {
    let log_engine = Arc::new(FlakyLogEngine { attempts: AtomicUsize::new(0), succeed_after: 2, quorum_overviews: vec![] });
    let submit = Arc::new(RecordingSubmit { submitted: Mutex::new(Vec::new()) });
    let deps = PhaseDeps {
        log_engine: log_engine.clone(),
        registry: Arc::new(InMemoryRegistry::default()),
        membership: Arc::new(SingleNodeMembership::new("n1".into())),
        consensus: submit.clone(),
    };

    streamcoord::core::aux::phases::run(
        &deps,
        "s1".into(),
        PhaseArgs::StartReplica { node: "n4".into(), conf: conf("s1"), retries: 1, reply_to: None },
    )
    .await;

    let submitted = submit.submitted.lock().unwrap();
    assert_eq!(submitted.len(), 1);
    assert!(matches!(&submitted[0], Command::StartReplicaFailed { node, retries: 1, .. } if node == "n4"));
}

#[tokio::test]
async fn check_quorum_with_majority_unreachable_submits_nothing() {
    let log_engine = Arc::new(FlakyLogEngine {
        attempts: AtomicUsize::new(0),
        succeed_after: 0,
        quorum_overviews: vec![None, None, Some(LogOverview { offset: 10, epoch: 0 })],
    });
    let submit = Arc::new(RecordingSubmit { submitted: Mutex::new(Vec::new()) });
    let deps = PhaseDeps {
        log_engine,
        registry: Arc::new(InMemoryRegistry::default()),
        membership: Arc::new(SingleNodeMembership::new("n1".into())),
        consensus: submit.clone(),
    };

    streamcoord::core::aux::phases::run(&deps, "s1".into(), PhaseArgs::CheckQuorum { conf: conf("s1") }).await;

    assert!(submit.submitted.lock().unwrap().is_empty());
}

#[tokio::test]
async fn check_quorum_with_majority_reachable_submits_start_leader_election() {
    let log_engine = Arc::new(FlakyLogEngine {
        attempts: AtomicUsize::new(0),
        succeed_after: 0,
        quorum_overviews: vec![
            Some(LogOverview { offset: 5, epoch: 0 }),
            Some(LogOverview { offset: 9, epoch: 0 }),
            None,
        ],
    });
    let submit = Arc::new(RecordingSubmit { submitted: Mutex::new(Vec::new()) });
    let deps = PhaseDeps {
        log_engine,
        registry: Arc::new(InMemoryRegistry::default()),
        membership: Arc::new(SingleNodeMembership::new("n1".into())),
        consensus: submit.clone(),
    };

    streamcoord::core::aux::phases::run(&deps, "s1".into(), PhaseArgs::CheckQuorum { conf: conf("s1") }).await;

    let submitted = submit.submitted.lock().unwrap();
    assert_eq!(submitted.len(), 1);
    assert!(matches!(&submitted[0], Command::StartLeaderElection { new_epoch: 1, .. }));
}
