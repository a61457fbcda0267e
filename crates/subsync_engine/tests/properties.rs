//! Property tests for commit atomicity and per-version state monotonicity.

use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use subsync_core::{SetVersion, Subscription, SubscriptionState};
use subsync_engine::{MockChannel, RetryConfig, SubscriptionCoordinator, SyncConfig, SyncResult};
use subsync_protocol::StateAck;
use subsync_testkit::{memory_store, set_ops_strategy, SetOp, PERSON};

fn setup() -> (Arc<MockChannel>, SubscriptionCoordinator) {
    let channel = Arc::new(MockChannel::new());
    let config = SyncConfig::default().with_retry(RetryConfig::no_retry());
    let coordinator = SubscriptionCoordinator::new(memory_store(), channel.clone(), config).unwrap();
    (channel, coordinator)
}

fn ack_strategy() -> impl Strategy<Value = StateAck> {
    (1u64..4, 0u8..3).prop_map(|(version, kind)| match kind {
        0 => StateAck::bootstrapping(version),
        1 => StateAck::complete(version),
        _ => StateAck::error(version, "rejected"),
    })
}

#[derive(Debug, Clone)]
enum Step {
    Commit(Vec<SetOp>),
    Ack(StateAck),
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        set_ops_strategy(4).prop_map(Step::Commit),
        ack_strategy().prop_map(Step::Ack),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn commits_are_all_or_nothing(batches in prop::collection::vec(set_ops_strategy(6), 1..6)) {
        let (_channel, coordinator) = setup();

        for ops in &batches {
            let before = coordinator.snapshot();
            let result = coordinator.update(|set| -> SyncResult<()> {
                for op in ops {
                    op.apply(set)?;
                }
                Ok(())
            });
            let after = coordinator.snapshot();

            match result {
                Ok(committed) => {
                    prop_assert_eq!(committed.version(), before.version().next());
                    prop_assert_eq!(after.version(), committed.version());
                    prop_assert_eq!(after.subscriptions(), committed.subscriptions());
                }
                Err(e) => {
                    prop_assert!(e.is_validation());
                    prop_assert_eq!(after.version(), before.version());
                    prop_assert_eq!(after.subscriptions(), before.subscriptions());
                }
            }

            let mut names = HashSet::new();
            let mut anonymous = HashSet::new();
            for subscription in after.iter() {
                match subscription.name() {
                    Some(name) => prop_assert!(names.insert(name.to_owned())),
                    None => prop_assert!(anonymous.insert((
                        subscription.object_type().to_owned(),
                        subscription.query().to_owned()
                    ))),
                }
            }
        }
    }

    #[test]
    fn acks_never_move_a_version_backwards(acks in prop::collection::vec(ack_strategy(), 0..20)) {
        let (channel, coordinator) = setup();
        coordinator
            .update(|set| -> SyncResult<()> {
                set.add(Subscription::new("people", PERSON, "age > 18")?)?;
                Ok(())
            })
            .unwrap();

        for ack in acks {
            let before = coordinator.state();
            let applied = channel.ack(ack);
            let after = coordinator.state();

            if applied {
                prop_assert!(before.can_transition_to(after));
            } else {
                prop_assert_eq!(before, after);
            }
            if before.is_terminal() {
                prop_assert_eq!(before, after);
            }
        }
        prop_assert_eq!(coordinator.version(), SetVersion::new(1));
        prop_assert!(coordinator.error_message().is_some() == (coordinator.state() == SubscriptionState::Error));
    }

    #[test]
    fn superseded_versions_stay_superseded(steps in prop::collection::vec(step_strategy(), 1..16)) {
        let (channel, coordinator) = setup();
        let mut superseded = HashSet::new();

        for step in steps {
            match step {
                Step::Commit(ops) => {
                    let previous = coordinator.snapshot();
                    let committed = coordinator.update(|set| -> SyncResult<()> {
                        for op in &ops {
                            op.apply(set)?;
                        }
                        Ok(())
                    });
                    if committed.is_ok()
                        && previous.version() != SetVersion::INITIAL
                        && !previous.state().is_terminal()
                    {
                        superseded.insert(previous.version());
                    }
                }
                Step::Ack(ack) => {
                    let version = SetVersion::new(ack.version);
                    let applied = channel.ack(ack);
                    prop_assert!(!(applied && superseded.contains(&version)));
                }
            }

            for version in &superseded {
                if let Some(state) = coordinator.state_of(*version) {
                    prop_assert_eq!(state, SubscriptionState::Superseded);
                }
            }
        }
    }
}
