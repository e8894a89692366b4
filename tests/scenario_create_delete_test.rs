// tests/scenario_create_delete_test.rs

//! S1 — create a cluster, drive it to `running`, then delete it.

use streamcoord::core::command::{ClientReply, Command, CommandMeta, Effect};
use streamcoord::core::machine::{apply, init};
use streamcoord::core::types::{Handle, QueueDesc, StreamConfig};

fn meta(index: u64) -> CommandMeta {
    CommandMeta { index, term: 0 }
}

fn desc(name: &str) -> QueueDesc {
    QueueDesc {
        name: name.to_string(),
        reference: "ref-1".to_string(),
        leader_node: "n1".to_string(),
        replica_nodes: vec!["n2".to_string(), "n3".to_string()],
    }
}

#[test]
fn create_then_delete_drains_to_empty_running_stream() {
    let mut state = init();

    let effects = apply(meta(1), Command::StartCluster { desc: desc("s1"), reply_to: 10 }, &mut state);
    assert!(matches!(effects.as_slice(), [Effect::Aux(_)]));
    assert_eq!(state.streams["s1"].state, streamcoord::core::state::StreamFsmState::StartCluster);

    let mut conf = StreamConfig::from_desc(desc("s1"));
    conf.leader_pid = Some(Handle(1));
    conf.replica_pids = vec![Handle(2), Handle(3)];
    let effects = apply(meta(2), Command::StartClusterReply { stream_id: "s1".into(), conf }, &mut state);
    assert!(effects.iter().any(|e| matches!(e, Effect::Monitor(Handle(1)))));
    assert!(effects.iter().any(|e| matches!(e, Effect::Monitor(Handle(2)))));
    assert!(effects.iter().any(|e| matches!(e, Effect::Monitor(Handle(3)))));

    let effects = apply(meta(3), Command::PhaseFinished { stream_id: "s1".into(), ok: true }, &mut state);
    assert!(effects.iter().any(|e| matches!(e, Effect::Reply(10, ClientReply::Ok))));
    assert!(state.streams["s1"].state.is_running());
    assert!(state.streams["s1"].conf.leader_not_in_replicas());
    assert_eq!(state.processes.len(), 3);

    let effects = apply(
        meta(4),
        Command::DeleteCluster { stream_id: "s1".into(), acting_user: "u".into(), reply_to: 20 },
        &mut state,
    );
    assert!(effects.iter().any(|e| matches!(e, Effect::Demonitor(Handle(1)))));
    assert!(effects.iter().any(|e| matches!(e, Effect::Demonitor(Handle(2)))));
    assert!(effects.iter().any(|e| matches!(e, Effect::Demonitor(Handle(3)))));
    assert!(state.streams.contains_key("s1"));

    let effects = apply(meta(5), Command::DeleteClusterReply { stream_id: "s1".into() }, &mut state);
    assert!(effects.iter().any(|e| matches!(e, Effect::Reply(20, ClientReply::Count(0)))));
    assert!(!state.streams.contains_key("s1"));
    assert!(state.processes.is_empty());
}

#[test]
fn delete_unknown_stream_replies_ok_zero_without_creating_it() {
    let mut state = init();
    let effects = apply(
        meta(1),
        Command::DeleteCluster { stream_id: "ghost".into(), acting_user: "u".into(), reply_to: 1 },
        &mut state,
    );
    assert_eq!(effects.len(), 1);
    assert!(matches!(effects[0], Effect::Reply(1, ClientReply::Count(0))));
    assert!(!state.streams.contains_key("ghost"));
}
