// tests/scenario_subscribe_leader_down_test.rs

//! S2 — a subscriber sees `leader_up`, the leader dies, the subscriber
//! sees `leader_down`, and a new leader (with a higher offset) is elected.

use streamcoord::core::command::{Command, CommandMeta, Effect, NodeOffset, Notification};
use streamcoord::core::machine::{apply, init};
use streamcoord::core::types::{Handle, QueueDesc, StreamConfig};

fn meta(index: u64) -> CommandMeta {
    CommandMeta { index, term: 0 }
}

fn running_stream(state: &mut streamcoord::core::state::CoordinatorState) {
    let desc = QueueDesc {
        name: "s1".into(),
        reference: "ref-1".into(),
        leader_node: "n1".into(),
        replica_nodes: vec!["n2".into()],
    };
    apply(meta(1), Command::StartCluster { desc, reply_to: 1 }, state);
    let mut conf = StreamConfig::from_desc(QueueDesc {
        name: "s1".into(),
        reference: "ref-1".into(),
        leader_node: "n1".into(),
        replica_nodes: vec!["n2".into()],
    });
    conf.leader_pid = Some(Handle(100));
    conf.replica_pids = vec![Handle(200)];
    apply(meta(2), Command::StartClusterReply { stream_id: "s1".into(), conf }, state);
    apply(meta(3), Command::PhaseFinished { stream_id: "s1".into(), ok: true }, state);
}

#[test]
fn subscriber_sees_leader_down_then_new_leader_up() {
    let mut state = init();
    running_stream(&mut state);

    let effects = apply(
        meta(4),
        Command::Subscribe { stream_id: "s1".into(), subscriber: Handle(900), reply_to: 5 },
        &mut state,
    );
    assert!(effects.iter().any(|e| matches!(
        e,
        Effect::SendMsg(Handle(900), Notification::LeaderUp { leader: Handle(100), .. })
    )));

    let effects = apply(meta(5), Command::Down { handle: Handle(100), reason: "killed".into() }, &mut state);
    assert!(effects.iter().any(|e| matches!(
        e,
        Effect::SendMsg(Handle(900), Notification::LeaderDown { .. })
    )));
    assert_eq!(
        state.streams["s1"].state,
        streamcoord::core::state::StreamFsmState::LeaderElection
    );

    apply(meta(6), Command::ReplicasStopped { stream_id: "s1".into() }, &mut state);

    // n2 (the surviving replica) outranks the dead former leader's empty offset.
    let offsets = vec![
        NodeOffset { node: "n1".into(), offset: None },
        NodeOffset { node: "n2".into(), offset: Some((42, 0)) },
    ];
    apply(
        meta(7),
        Command::StartLeaderElection { stream_id: "s1".into(), new_epoch: 1, offsets },
        &mut state,
    );
    assert_eq!(state.streams["s1"].conf.leader_node, "n2");
    assert_eq!(state.streams["s1"].conf.epoch, 1);

    let mut new_conf = state.streams["s1"].conf.clone();
    new_conf.leader_pid = Some(Handle(300));
    let effects = apply(meta(8), Command::LeaderElected { conf: new_conf }, &mut state);
    assert!(effects.iter().any(|e| matches!(
        e,
        Effect::SendMsg(Handle(900), Notification::LeaderUp { leader: Handle(300), epoch: 1, .. })
    )));

    apply(meta(9), Command::PhaseFinished { stream_id: "s1".into(), ok: true }, &mut state);
    assert!(state.streams["s1"].state.is_running());
    assert_ne!(state.streams["s1"].conf.leader_node, "n1");
}
