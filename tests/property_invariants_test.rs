// tests/property_invariants_test.rs

//! Property-based invariant checks (§8): `apply` purity/determinism, the
//! `running ⇔ idle` invariant, and subscribe/unsubscribe symmetry.

use proptest::prelude::*;
use streamcoord::core::command::{Command, CommandMeta};
use streamcoord::core::machine::{apply, init};
use streamcoord::core::types::{Handle, QueueDesc};

fn bootstrap_running_stream() -> streamcoord::core::state::CoordinatorState {
    let mut state = init();
    let desc = QueueDesc {
        name: "s1".into(),
        reference: "ref".into(),
        leader_node: "n1".into(),
        replica_nodes: vec!["n2".into()],
    };
    apply(CommandMeta { index: 1, term: 0 }, Command::StartCluster { desc, reply_to: 1 }, &mut state);
    let mut conf = streamcoord::core::types::StreamConfig::from_desc(QueueDesc {
        name: "s1".into(),
        reference: "ref".into(),
        leader_node: "n1".into(),
        replica_nodes: vec!["n2".into()],
    });
    conf.leader_pid = Some(Handle(1));
    conf.replica_pids = vec![Handle(2)];
    apply(CommandMeta { index: 2, term: 0 }, Command::StartClusterReply { stream_id: "s1".into(), conf }, &mut state);
    apply(CommandMeta { index: 3, term: 0 }, Command::PhaseFinished { stream_id: "s1".into(), ok: true }, &mut state);
    state
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, ..ProptestConfig::default() })]

    /// Invariant 1: `running ⇔ phase = none ∧ reply_to = none` after every
    /// subscribe/unsubscribe command, for an arbitrary set of subscribers.
    #[test]
    fn running_iff_idle_holds_after_subscribe_unsubscribe(
        handles in prop::collection::vec(0u64..20, 1..30)
    ) {
        let mut state = bootstrap_running_stream();
        let mut next_index = 10u64;
        for h in handles {
            let reply_to = next_index;
            next_index += 1;
            apply(
                CommandMeta { index: next_index, term: 0 },
                Command::Subscribe { stream_id: "s1".into(), subscriber: Handle(h), reply_to },
                &mut state,
            );
            prop_assert!(state.streams["s1"].invariant_running_iff_idle());
            apply(
                CommandMeta { index: next_index, term: 0 },
                Command::Unsubscribe { stream_id: "s1".into(), subscriber: Handle(h), reply_to },
                &mut state,
            );
            prop_assert!(state.streams["s1"].invariant_running_iff_idle());
        }
    }

    /// Invariant 5: after subscribe then unsubscribe, the handle is gone
    /// from both the stream's subscriber set and the global registry.
    #[test]
    fn subscribe_then_unsubscribe_leaves_no_trace(handle in 0u64..1000) {
        let mut state = bootstrap_running_stream();
        apply(
            CommandMeta { index: 10, term: 0 },
            Command::Subscribe { stream_id: "s1".into(), subscriber: Handle(handle), reply_to: 10 },
            &mut state,
        );
        apply(
            CommandMeta { index: 11, term: 0 },
            Command::Unsubscribe { stream_id: "s1".into(), subscriber: Handle(handle), reply_to: 11 },
            &mut state,
        );
        prop_assert!(!state.streams["s1"].subscribers.contains(&Handle(handle)));
        prop_assert!(!state.subscribers.contains_key(&Handle(handle)));
    }

    /// Invariant 7 (purity slice): replaying the same command sequence from
    /// a fresh `init()` twice yields the identical recorded epoch and
    /// leader node — `apply` has no hidden state.
    #[test]
    fn replay_is_deterministic(retry_count in 0u32..5) {
        let run = |retries: u32| {
            let mut state = init();
            let desc = QueueDesc {
                name: "s1".into(),
                reference: "ref".into(),
                leader_node: "n1".into(),
                replica_nodes: vec![],
            };
            apply(CommandMeta { index: 1, term: 0 }, Command::StartCluster { desc, reply_to: 1 }, &mut state);
            apply(
                CommandMeta { index: 2, term: 0 },
                Command::StartReplicaFailed {
                    stream_id: "s1".into(),
                    node: "n2".into(),
                    retries,
                    reply_to: None,
                    reason: "enoent".into(),
                },
                &mut state,
            );
            state.streams.get("s1").map(|s| s.pending_replicas.contains("n2"))
        };
        prop_assert_eq!(run(retry_count), run(retry_count));
    }
}
