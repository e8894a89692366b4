// tests/scenario_delete_supersedes_pending_test.rs

//! S4 — `delete_cluster` arriving mid-election filters queued `down`
//! entries so no post-delete replica restart is issued.

use streamcoord::core::command::{Command, CommandMeta};
use streamcoord::core::machine::{apply, init};
use streamcoord::core::types::{Handle, QueueDesc, StreamConfig};

fn meta(index: u64) -> CommandMeta {
    CommandMeta { index, term: 0 }
}

#[test]
fn queued_down_is_dropped_once_delete_cluster_is_queued() {
    let mut state = init();

    let desc = QueueDesc {
        name: "s1".into(),
        reference: "ref-1".into(),
        leader_node: "n1".into(),
        replica_nodes: vec!["n2".into()],
    };
    apply(meta(1), Command::StartCluster { desc, reply_to: 1 }, &mut state);
    let mut conf = StreamConfig::from_desc(QueueDesc {
        name: "s1".into(),
        reference: "ref-1".into(),
        leader_node: "n1".into(),
        replica_nodes: vec!["n2".into()],
    });
    conf.leader_pid = Some(Handle(1));
    conf.replica_pids = vec![Handle(2)];
    apply(meta(2), Command::StartClusterReply { stream_id: "s1".into(), conf }, &mut state);
    apply(meta(3), Command::PhaseFinished { stream_id: "s1".into(), ok: true }, &mut state);

    // Leader dies: stream enters leader_election (non-running).
    apply(meta(4), Command::Down { handle: Handle(1), reason: "killed".into() }, &mut state);
    assert!(!state.streams["s1"].state.is_running());

    // A follower also goes down before the election resolves: since the
    // leader handle is no longer recorded as alive, this is queued rather
    // than acted on immediately.
    apply(meta(5), Command::Down { handle: Handle(2), reason: "killed".into() }, &mut state);
    assert_eq!(state.streams["s1"].pending_cmds.len(), 1);

    // delete_cluster arrives while still non-running: queued, and purges
    // the previously-queued `down` entry.
    apply(
        meta(6),
        Command::DeleteCluster { stream_id: "s1".into(), acting_user: "u".into(), reply_to: 10 },
        &mut state,
    );
    assert_eq!(state.streams["s1"].pending_cmds.len(), 1);
    assert!(matches!(
        state.streams["s1"].pending_cmds.front(),
        Some(Command::DeleteCluster { .. })
    ));
}
