//! Shared wiring for runtime integration tests.

#![allow(dead_code)] // Not every test file uses every helper

use clubhouse_core::model::{Event, User};
use clubhouse_core::store::MembershipLedger;
use clubhouse_core::projection::ProjectionPolicy;
use clubhouse_runtime::retry::RetryPolicy;
use clubhouse_runtime::{
    CompensationPolicy, CoordinatorConfig, RegistrationCoordinator, RegistrationQuery,
    SagaLedger, UnregisterPolicy,
};
use clubhouse_testing::{InMemoryEventStore, InMemoryUserStore, helpers, test_clock};
use std::sync::Arc;
use std::time::Duration;

/// Millisecond backoff without jitter so failure tests stay fast and predictable.
pub fn fast_retry(max_retries: usize) -> RetryPolicy {
    RetryPolicy::builder()
        .max_retries(max_retries)
        .initial_delay(Duration::from_millis(1))
        .max_delay(Duration::from_millis(5))
        .jitter(false)
        .build()
}

pub fn config(policy: UnregisterPolicy) -> CoordinatorConfig {
    CoordinatorConfig {
        deadline: Duration::from_secs(5),
        retry: fast_retry(3),
        unregister_policy: policy,
    }
}

pub struct Harness {
    pub users: InMemoryUserStore,
    pub events: InMemoryEventStore,
    pub ledger: Arc<SagaLedger>,
    pub coordinator: Arc<RegistrationCoordinator>,
    pub query: RegistrationQuery,
}

impl Harness {
    pub fn new(
        users: impl IntoIterator<Item = User>,
        events: impl IntoIterator<Item = Event>,
    ) -> Self {
        Self::with_config(users, events, config(UnregisterPolicy::Permissive))
    }

    pub fn with_config(
        users: impl IntoIterator<Item = User>,
        events: impl IntoIterator<Item = Event>,
        config: CoordinatorConfig,
    ) -> Self {
        helpers::init_test_tracing();
        let users = InMemoryUserStore::with_users(users);
        let events = InMemoryEventStore::with_events(events);
        let ledger = Arc::new(
            SagaLedger::new(Arc::new(users.clone()), Arc::new(events.clone())).with_compensation(
                CompensationPolicy {
                    retry: fast_retry(3),
                    budget: Duration::from_secs(1),
                },
            ),
        );
        let coordinator = Arc::new(RegistrationCoordinator::new(
            Arc::new(users.clone()),
            Arc::new(events.clone()),
            Arc::clone(&ledger) as Arc<dyn MembershipLedger>,
            Arc::new(test_clock()),
            config,
        ));
        let query = RegistrationQuery::new(
            Arc::new(users.clone()),
            Arc::new(events.clone()),
            ProjectionPolicy::default(),
        );
        Self {
            users,
            events,
            ledger,
            coordinator,
            query,
        }
    }

    pub fn assert_consistent(&self) {
        if let Err(violations) =
            helpers::check_membership(&self.users.snapshot(), &self.events.snapshot())
        {
            panic!("membership invariant violated: {violations:#?}");
        }
    }
}
