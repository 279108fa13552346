//! # Clubhouse Testing
//!
//! Testing utilities and helpers for Clubhouse registration.
//!
//! This crate provides:
//! - In-memory `UserStore`/`EventStore` implementations with fault injection
//! - Mock implementations of Environment traits
//! - Fixtures for users, events and registrations
//! - An invariant checker for the membership fact
//! - Property-based testing strategies
//!
//! ## Example
//!
//! ```
//! use clubhouse_testing::{fixtures, helpers, InMemoryEventStore, InMemoryUserStore};
//!
//! let users = InMemoryUserStore::with_users([fixtures::user("ada")]);
//! let events = InMemoryEventStore::with_events([fixtures::solo_event("meetup")]);
//! assert!(helpers::check_membership(&users.snapshot(), &events.snapshot()).is_ok());
//! ```

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use chrono::{DateTime, Utc};
use clubhouse_core::environment::{Clock, IdGenerator};

/// In-memory stores and fault injection
pub mod memory;

/// Mock implementations for testing.
pub mod mocks {
    use super::{Clock, DateTime, IdGenerator, Utc};
    use clubhouse_core::error::StoreError;
    use clubhouse_core::ids::{CommentId, UserId};
    use clubhouse_core::store::{Credentials, IdentityProvider, StoreFuture};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use clubhouse_testing::mocks::FixedClock;
    /// use clubhouse_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        )
    }

    /// Predictable comment ids: `comment-1`, `comment-2`, ...
    #[derive(Debug, Default)]
    pub struct SequentialIds {
        next: AtomicU64,
    }

    impl SequentialIds {
        /// Start at `comment-1`.
        #[must_use]
        pub const fn new() -> Self {
            Self {
                next: AtomicU64::new(0),
            }
        }
    }

    impl IdGenerator for SequentialIds {
        fn comment_id(&self) -> CommentId {
            let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
            CommentId::new(format!("comment-{n}"))
        }
    }

    /// Identity provider backed by a fixed token table.
    #[derive(Debug, Clone, Default)]
    pub struct StaticIdentity {
        tokens: HashMap<String, UserId>,
    }

    impl StaticIdentity {
        /// Empty token table.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Accept `token` as `user_id`.
        #[must_use]
        pub fn with_token(mut self, token: impl Into<String>, user_id: UserId) -> Self {
            self.tokens.insert(token.into(), user_id);
            self
        }
    }

    impl IdentityProvider for StaticIdentity {
        fn current_user(&self, credentials: &Credentials) -> StoreFuture<'_, Option<UserId>> {
            let resolved = self.tokens.get(credentials.token()).cloned();
            Box::pin(async move { Ok::<_, StoreError>(resolved) })
        }
    }
}

/// Fixtures for common documents.
pub mod fixtures {
    use super::mocks::test_clock;
    use super::Clock;
    use clubhouse_core::ids::{EventId, UserId};
    use clubhouse_core::model::{
        CapacityPolicy, Event, LeadInfo, LeadSnapshot, Money, Pricing, Registration, TeamInfo,
        TeamMember, User,
    };

    /// A user with a profile image derived from the id.
    #[must_use]
    pub fn user(id: &str) -> User {
        User::new(UserId::new(id), Some(format!("https://img.example/{id}.png")))
    }

    /// A free event without team registrations.
    #[must_use]
    pub fn solo_event(id: &str) -> Event {
        Event::new(EventId::new(id), format!("Event {id}"), CapacityPolicy::solo(), Pricing::free())
    }

    /// A team event with rosters of at most `team_size`.
    #[must_use]
    pub fn team_event(id: &str, team_size: u32) -> Event {
        Event::new(
            EventId::new(id),
            format!("Team event {id}"),
            CapacityPolicy::teams(team_size),
            Pricing::free(),
        )
    }

    /// A paid solo event.
    #[must_use]
    pub fn paid_event(id: &str, units: u64) -> Event {
        Event::new(
            EventId::new(id),
            format!("Paid event {id}"),
            CapacityPolicy::solo(),
            Pricing::paid(Money::from_units(units)),
        )
    }

    /// Lead details for `name`.
    #[must_use]
    pub fn lead(name: &str) -> LeadInfo {
        LeadInfo::new(name, format!("{name}@example.com"), "555-0100")
    }

    /// A team of `size` fully specified members.
    #[must_use]
    pub fn team(name: &str, size: usize) -> TeamInfo {
        TeamInfo::new(
            name,
            (1..=size)
                .map(|n| TeamMember::new(format!("member{n}"), format!("member{n}@example.com")))
                .collect(),
        )
    }

    /// A solo registration led by `lead_id`.
    #[must_use]
    pub fn registration(lead_id: &str) -> Registration {
        Registration {
            lead: UserId::new(lead_id),
            lead_snapshot: LeadSnapshot {
                name: lead_id.to_string(),
                email: format!("{lead_id}@example.com"),
                phone: "555-0100".to_string(),
                profile_pic: None,
            },
            team: None,
            registered_at: test_clock().now(),
        }
    }
}

/// Test helpers and utilities.
pub mod helpers {
    use clubhouse_core::ids::{EventId, UserId};
    use clubhouse_core::model::{Event, User};
    use std::collections::HashMap;

    /// Check the bidirectional membership fact across both stores.
    ///
    /// # Errors
    ///
    /// Returns a description of every violation found.
    pub fn check_membership(
        users: &HashMap<UserId, User>,
        events: &HashMap<EventId, Event>,
    ) -> Result<(), Vec<String>> {
        let mut violations = Vec::new();

        for user in users.values() {
            for event_id in &user.events {
                let held = events
                    .get(event_id)
                    .is_some_and(|event| event.has_participant(&user.id));
                if !held {
                    violations.push(format!(
                        "user {} lists event {event_id} without a matching registration",
                        user.id
                    ));
                }
            }
        }

        for event in events.values() {
            let mut seen = std::collections::HashSet::new();
            for registration in &event.participants {
                if !seen.insert(&registration.lead) {
                    violations.push(format!(
                        "event {} has more than one registration led by {}",
                        event.id, registration.lead
                    ));
                }
                let listed = users
                    .get(&registration.lead)
                    .is_some_and(|user| user.is_registered_for(&event.id));
                if !listed {
                    violations.push(format!(
                        "event {} has a registration led by {} missing from the user",
                        event.id, registration.lead
                    ));
                }
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }

    /// Install a `tracing` subscriber for test output (honours `RUST_LOG`).
    ///
    /// Safe to call from many tests; only the first call installs it.
    pub fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;

    /// One step of a random registration workload.
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum MembershipOp {
        /// Register `user` for `event`
        Register {
            /// Index into the user pool
            user: usize,
            /// Index into the event pool
            event: usize,
        },
        /// Unregister `user` from `event`
        Unregister {
            /// Index into the user pool
            user: usize,
            /// Index into the event pool
            event: usize,
        },
    }

    /// Random register/unregister sequences over `users` × `events` pools.
    pub fn membership_ops(
        users: usize,
        events: usize,
        max_len: usize,
    ) -> impl Strategy<Value = Vec<MembershipOp>> {
        let op = prop_oneof![
            (0..users, 0..events).prop_map(|(user, event)| MembershipOp::Register { user, event }),
            (0..users, 0..events).prop_map(|(user, event)| MembershipOp::Unregister { user, event }),
        ];
        proptest::collection::vec(op, 0..max_len)
    }
}

// Re-export commonly used items
pub use memory::{FaultPlan, InMemoryEventStore, InMemoryUserStore, StoreOp};
pub use mocks::{FixedClock, SequentialIds, StaticIdentity, test_clock};
