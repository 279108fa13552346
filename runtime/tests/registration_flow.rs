//! End-to-end register / unregister / remove-event behaviour over in-memory stores.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

mod common;

use clubhouse_core::error::{Entity, RegistrationError};
use clubhouse_core::ids::{EventId, UserId};
use clubhouse_core::environment::Clock;
use clubhouse_core::model::{LeadInfo, TeamInfo, TeamMember, User};
use clubhouse_runtime::UnregisterPolicy;
use clubhouse_testing::{fixtures, test_clock};
use common::{Harness, config};

fn ids(user: &str, event: &str) -> (UserId, EventId) {
    (UserId::new(user), EventId::new(event))
}

#[tokio::test]
async fn register_updates_both_documents() {
    let h = Harness::new([fixtures::user("ada")], [fixtures::solo_event("meetup")]);
    let (ada, meetup) = ids("ada", "meetup");

    let outcome = h
        .coordinator
        .register(&ada, &meetup, fixtures::lead("ada"), None)
        .await
        .unwrap();

    assert!(outcome.changed);
    assert!(outcome.user.is_registered_for(&meetup));
    let registration = outcome.event.participant(&ada).unwrap();
    assert_eq!(registration.lead_snapshot.email, "ada@example.com");
    assert_eq!(
        registration.lead_snapshot.profile_pic.as_deref(),
        Some("https://img.example/ada.png")
    );
    assert_eq!(registration.registered_at, test_clock().now());

    assert_eq!(h.users.user(&ada).unwrap(), outcome.user);
    assert_eq!(h.events.event(&meetup).unwrap(), outcome.event);
    assert!(h.query.is_registered(&ada, &meetup).await.unwrap());
    h.assert_consistent();
}

#[tokio::test]
async fn duplicate_registration_is_rejected_without_mutation() {
    let h = Harness::new([fixtures::user("ada")], [fixtures::solo_event("meetup")]);
    let (ada, meetup) = ids("ada", "meetup");

    h.coordinator
        .register(&ada, &meetup, fixtures::lead("ada"), None)
        .await
        .unwrap();
    let before = (h.users.snapshot(), h.events.snapshot());

    let err = h
        .coordinator
        .register(&ada, &meetup, fixtures::lead("ada"), None)
        .await
        .unwrap_err();

    assert_eq!(
        err,
        RegistrationError::AlreadyRegistered {
            user_id: ada.clone(),
            event_id: meetup.clone(),
        }
    );
    assert_eq!((h.users.snapshot(), h.events.snapshot()), before);
    assert_eq!(h.events.event(&meetup).unwrap().participants.len(), 1);
}

#[tokio::test]
async fn unknown_user_or_event_is_not_found() {
    let h = Harness::new([fixtures::user("ada")], [fixtures::solo_event("meetup")]);
    let before = (h.users.snapshot(), h.events.snapshot());

    let err = h
        .coordinator
        .register(&UserId::new("ghost"), &EventId::new("meetup"), fixtures::lead("ghost"), None)
        .await
        .unwrap_err();
    assert_eq!(err, RegistrationError::NotFound(Entity::User(UserId::new("ghost"))));

    let err = h
        .coordinator
        .register(&UserId::new("ada"), &EventId::new("gala"), fixtures::lead("ada"), None)
        .await
        .unwrap_err();
    assert_eq!(err, RegistrationError::NotFound(Entity::Event(EventId::new("gala"))));

    assert_eq!((h.users.snapshot(), h.events.snapshot()), before);
}

#[tokio::test]
async fn invalid_requests_fail_before_any_write() {
    let h = Harness::new(
        [fixtures::user("ada")],
        [fixtures::solo_event("meetup"), fixtures::team_event("hack", 2)],
    );
    let before = (h.users.snapshot(), h.events.snapshot());
    let ada = UserId::new("ada");

    let cases = [
        (EventId::new("meetup"), LeadInfo::new("", "ada@example.com", "555"), None),
        (EventId::new("meetup"), LeadInfo::new("Ada", "  ", "555"), None),
        (
            EventId::new("meetup"),
            fixtures::lead("ada"),
            Some(fixtures::team("Owls", 1)),
        ),
        (EventId::new("hack"), fixtures::lead("ada"), Some(fixtures::team("Owls", 3))),
        (EventId::new("hack"), fixtures::lead("ada"), Some(fixtures::team(" ", 1))),
        (EventId::new(""), fixtures::lead("ada"), None),
    ];

    for (event_id, lead, team) in cases {
        let err = h
            .coordinator
            .register(&ada, &event_id, lead, team)
            .await
            .unwrap_err();
        assert!(
            matches!(err, RegistrationError::ValidationFailed(_)),
            "expected validation failure, got {err:?}"
        );
    }

    assert_eq!((h.users.snapshot(), h.events.snapshot()), before);
}

#[tokio::test]
async fn blank_team_members_do_not_count_toward_the_limit() {
    let h = Harness::new([fixtures::user("ada")], [fixtures::team_event("hack", 2)]);
    let (ada, hack) = ids("ada", "hack");
    let team = TeamInfo::new(
        "Owls",
        vec![
            TeamMember::new("Grace", "grace@example.com"),
            TeamMember::default(),
            TeamMember::new("Linus", "linus@example.com"),
        ],
    );

    let outcome = h
        .coordinator
        .register(&ada, &hack, fixtures::lead("ada"), Some(team))
        .await
        .unwrap();

    let stored = outcome.event.participant(&ada).unwrap();
    assert_eq!(stored.team.as_ref().unwrap().members.len(), 2);
    assert_eq!(h.query.roster(&hack).await.unwrap().len(), 3);
    h.assert_consistent();
}

#[tokio::test]
async fn unregister_removes_both_halves() {
    let h = Harness::new([fixtures::user("ada")], [fixtures::solo_event("meetup")]);
    let (ada, meetup) = ids("ada", "meetup");
    h.coordinator
        .register(&ada, &meetup, fixtures::lead("ada"), None)
        .await
        .unwrap();

    let outcome = h.coordinator.unregister(&ada, &meetup).await.unwrap();

    assert!(outcome.changed);
    assert!(!outcome.user.is_registered_for(&meetup));
    assert!(!outcome.event.has_participant(&ada));
    assert!(!h.query.is_registered(&ada, &meetup).await.unwrap());
    h.assert_consistent();
}

#[tokio::test]
async fn unregistering_a_non_member_is_a_no_op_by_default() {
    let h = Harness::new([fixtures::user("ada")], [fixtures::solo_event("meetup")]);
    let (ada, meetup) = ids("ada", "meetup");
    let before = (h.users.snapshot(), h.events.snapshot());

    let outcome = h.coordinator.unregister(&ada, &meetup).await.unwrap();

    assert!(!outcome.changed);
    assert_eq!(outcome.user, before.0[&ada]);
    assert_eq!((h.users.snapshot(), h.events.snapshot()), before);
}

#[tokio::test]
async fn strict_policy_rejects_non_members() {
    let h = Harness::with_config(
        [fixtures::user("ada")],
        [fixtures::solo_event("meetup")],
        config(UnregisterPolicy::Strict),
    );
    let (ada, meetup) = ids("ada", "meetup");

    let err = h.coordinator.unregister(&ada, &meetup).await.unwrap_err();

    assert_eq!(
        err,
        RegistrationError::NotRegistered {
            user_id: ada,
            event_id: meetup,
        }
    );
}

#[tokio::test]
async fn unregister_unknown_user_is_not_found() {
    let h = Harness::new(Vec::<User>::new(), [fixtures::solo_event("meetup")]);
    let (ghost, meetup) = ids("ghost", "meetup");

    let err = h.coordinator.unregister(&ghost, &meetup).await.unwrap_err();
    assert_eq!(err, RegistrationError::NotFound(Entity::User(ghost)));
}

#[tokio::test]
async fn reregistering_after_unregister_succeeds() {
    let h = Harness::new([fixtures::user("ada")], [fixtures::solo_event("meetup")]);
    let (ada, meetup) = ids("ada", "meetup");

    for _ in 0..3 {
        h.coordinator
            .register(&ada, &meetup, fixtures::lead("ada"), None)
            .await
            .unwrap();
        h.coordinator.unregister(&ada, &meetup).await.unwrap();
    }
    h.coordinator
        .register(&ada, &meetup, fixtures::lead("ada"), None)
        .await
        .unwrap();

    assert_eq!(h.events.event(&meetup).unwrap().participants.len(), 1);
    h.assert_consistent();
}

#[tokio::test]
async fn removing_an_event_withdraws_every_registration() {
    let h = Harness::new(
        [fixtures::user("ada"), fixtures::user("bob")],
        [fixtures::solo_event("meetup"), fixtures::solo_event("gala")],
    );
    for user in ["ada", "bob"] {
        for event in ["meetup", "gala"] {
            let (u, e) = ids(user, event);
            h.coordinator
                .register(&u, &e, fixtures::lead(user), None)
                .await
                .unwrap();
        }
    }

    let removed = h.coordinator.remove_event(&EventId::new("meetup")).await.unwrap();

    assert_eq!(removed.id, EventId::new("meetup"));
    assert!(h.events.event(&EventId::new("meetup")).is_none());
    for user in ["ada", "bob"] {
        let events = h.query.registered_events(&UserId::new(user)).await.unwrap();
        assert_eq!(events, vec![EventId::new("gala")]);
    }
    h.assert_consistent();

    let err = h
        .coordinator
        .remove_event(&EventId::new("meetup"))
        .await
        .unwrap_err();
    assert_eq!(err, RegistrationError::NotFound(Entity::Event(EventId::new("meetup"))));
}

#[tokio::test]
async fn status_query_for_unknown_user_is_not_found() {
    let h = Harness::new(Vec::<User>::new(), [fixtures::solo_event("meetup")]);
    let err = h
        .query
        .is_registered(&UserId::new("ghost"), &EventId::new("meetup"))
        .await
        .unwrap_err();
    assert!(matches!(err, RegistrationError::NotFound(Entity::User(_))));
}

#[tokio::test]
async fn team_views_group_members_under_their_lead() {
    let h = Harness::new(
        [fixtures::user("ada"), fixtures::user("bob")],
        [fixtures::team_event("hack", 3)],
    );
    let hack = EventId::new("hack");
    h.coordinator
        .register(&UserId::new("ada"), &hack, fixtures::lead("ada"), Some(fixtures::team("Owls", 2)))
        .await
        .unwrap();
    h.coordinator
        .register(&UserId::new("bob"), &hack, fixtures::lead("bob"), None)
        .await
        .unwrap();

    let teams = h.query.teams(&hack).await.unwrap();

    assert_eq!(teams.len(), 2);
    assert_eq!(teams[0].team_name.as_deref(), Some("Owls"));
    assert_eq!(teams[0].lead.email, "ada@example.com");
    assert_eq!(teams[0].members.len(), 2);
    assert_eq!(teams[1].team_name, None);
    assert_eq!(h.query.roster(&hack).await.unwrap().len(), 4);
}
