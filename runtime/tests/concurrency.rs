//! Races between concurrent requests, and the membership invariant under
//! random workloads.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

mod common;

use clubhouse_core::error::{RegistrationError, StoreError};
use clubhouse_core::ids::{EventId, UserId};
use clubhouse_core::model::User;
use clubhouse_testing::properties::{MembershipOp, membership_ops};
use clubhouse_testing::{StoreOp, fixtures};
use common::Harness;
use futures::future::join_all;
use proptest::prelude::*;
use std::collections::HashSet;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_duplicate_registrations_admit_exactly_one() {
    let h = Harness::new([fixtures::user("ada")], [fixtures::solo_event("meetup")]);

    let tasks = (0..16).map(|_| {
        let coordinator = std::sync::Arc::clone(&h.coordinator);
        tokio::spawn(async move {
            coordinator
                .register(
                    &UserId::new("ada"),
                    &EventId::new("meetup"),
                    fixtures::lead("ada"),
                    None,
                )
                .await
        })
    });
    let results: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    for result in results.iter().filter(|r| r.is_err()) {
        assert!(matches!(
            result,
            Err(RegistrationError::AlreadyRegistered { .. })
        ));
    }
    assert_eq!(
        h.events
            .event(&EventId::new("meetup"))
            .unwrap()
            .participants
            .len(),
        1
    );
    assert!(h.ledger.locks().is_empty());
    h.assert_consistent();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn distinct_users_register_in_parallel() {
    let users: Vec<User> = (0..20).map(|n| fixtures::user(&format!("u{n}"))).collect();
    let h = Harness::new(users, [fixtures::solo_event("meetup")]);

    let tasks = (0..20).map(|n| {
        let coordinator = std::sync::Arc::clone(&h.coordinator);
        tokio::spawn(async move {
            let name = format!("u{n}");
            coordinator
                .register(
                    &UserId::new(name.as_str()),
                    &EventId::new("meetup"),
                    fixtures::lead(&name),
                    None,
                )
                .await
        })
    });
    for result in join_all(tasks).await {
        result.unwrap().unwrap();
    }

    assert_eq!(
        h.events
            .event(&EventId::new("meetup"))
            .unwrap()
            .participants
            .len(),
        20
    );
    h.assert_consistent();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn interleaved_register_and_unregister_stay_consistent() {
    let h = Harness::new([fixtures::user("ada")], [fixtures::solo_event("meetup")]);

    let tasks = (0..40).map(|n| {
        let coordinator = std::sync::Arc::clone(&h.coordinator);
        tokio::spawn(async move {
            let (ada, meetup) = (UserId::new("ada"), EventId::new("meetup"));
            if n % 2 == 0 {
                coordinator
                    .register(&ada, &meetup, fixtures::lead("ada"), None)
                    .await
                    .map(|_| ())
            } else {
                coordinator.unregister(&ada, &meetup).await.map(|_| ())
            }
        })
    });
    for result in join_all(tasks).await {
        match result.unwrap() {
            Ok(()) | Err(RegistrationError::AlreadyRegistered { .. }) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    h.assert_consistent();
}

fn run_workload(ops: &[MembershipOp], faults: &[bool]) -> Result<(), TestCaseError> {
    const USERS: [&str; 3] = ["ada", "bob", "cy"];
    const EVENTS: [&str; 2] = ["meetup", "gala"];

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    runtime.block_on(async {
        let h = Harness::new(
            USERS.map(fixtures::user),
            EVENTS.map(fixtures::solo_event),
        );
        let mut expected: HashSet<(usize, usize)> = HashSet::new();

        for (step, op) in ops.iter().enumerate() {
            let inject = faults.get(step).copied().unwrap_or(false);
            if inject {
                h.events.faults().fail_next(
                    StoreOp::InsertParticipant,
                    StoreError::Backend("injected".into()),
                );
                h.events.faults().fail_next(
                    StoreOp::RemoveParticipant,
                    StoreError::Backend("injected".into()),
                );
            }

            match *op {
                MembershipOp::Register { user, event } => {
                    let (u, e) = (UserId::new(USERS[user]), EventId::new(EVENTS[event]));
                    let result = h
                        .coordinator
                        .register(&u, &e, fixtures::lead(USERS[user]), None)
                        .await;
                    match result {
                        Ok(_) => {
                            prop_assert!(!inject && expected.insert((user, event)));
                        }
                        Err(RegistrationError::AlreadyRegistered { .. }) => {
                            prop_assert!(expected.contains(&(user, event)));
                        }
                        Err(RegistrationError::StorageConflict(_)) => prop_assert!(inject),
                        Err(other) => prop_assert!(false, "unexpected error: {other:?}"),
                    }
                }
                MembershipOp::Unregister { user, event } => {
                    let (u, e) = (UserId::new(USERS[user]), EventId::new(EVENTS[event]));
                    match h.coordinator.unregister(&u, &e).await {
                        Ok(outcome) => {
                            prop_assert_eq!(outcome.changed, expected.remove(&(user, event)));
                        }
                        Err(RegistrationError::StorageConflict(_)) => {
                            prop_assert!(inject && expected.contains(&(user, event)));
                        }
                        Err(other) => prop_assert!(false, "unexpected error: {other:?}"),
                    }
                }
            }
            h.events.faults().clear();

            let violations =
                clubhouse_testing::helpers::check_membership(&h.users.snapshot(), &h.events.snapshot());
            prop_assert!(violations.is_ok(), "after step {}: {:?}", step, violations);
        }

        for (user, name) in USERS.iter().enumerate() {
            for (event, event_name) in EVENTS.iter().enumerate() {
                let registered = h
                    .query
                    .is_registered(&UserId::new(*name), &EventId::new(*event_name))
                    .await
                    .unwrap();
                prop_assert_eq!(registered, expected.contains(&(user, event)));
            }
        }
        Ok(())
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn membership_invariant_holds_for_any_workload(
        ops in membership_ops(3, 2, 40),
        faults in proptest::collection::vec(proptest::bool::weighted(0.2), 40),
    ) {
        run_workload(&ops, &faults)?;
    }
}
