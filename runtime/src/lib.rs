//! # Clubhouse Runtime
//!
//! Services that keep user membership sets and event rosters consistent.
//!
//! ## Core Components
//!
//! - **`SagaLedger`**: paired conditional writes with a compensating inverse
//! - **`RegistrationCoordinator`**: validation, idempotency, deadlines, retries
//! - **`RegistrationQuery`**: status and roster views
//! - **`CommentLedger`**: comments and star ratings with author checks
//! - **`Config`**: environment-driven settings
//!
//! ## Example
//!
//! ```ignore
//! use clubhouse_runtime::{RegistrationCoordinator, SagaLedger, config::Config};
//!
//! let config = Config::load();
//! let ledger = Arc::new(SagaLedger::new(users.clone(), events.clone()));
//! let coordinator = RegistrationCoordinator::new(
//!     users, events, ledger, Arc::new(SystemClock), config.coordinator,
//! );
//!
//! let outcome = coordinator.register(&user_id, &event_id, lead, None).await?;
//! assert!(outcome.user.is_registered_for(&event_id));
//! ```

/// Retry logic with exponential backoff
pub mod retry;

/// Prometheus metrics for observability
pub mod metrics;

/// Environment-driven configuration
pub mod config;

/// Saga-based membership ledger
pub mod saga;

/// Register / unregister / remove-event orchestration
pub mod coordinator;

/// Registration status and roster views
pub mod query;

/// Event comments and ratings
pub mod reviews;

/// Caller resolution
pub mod identity;

pub use coordinator::{
    CoordinatorConfig, RegistrationCoordinator, RegistrationOutcome, UnregisterPolicy,
};
pub use query::RegistrationQuery;
pub use reviews::{CommentLedger, NewComment};
pub use saga::{CompensationPolicy, SagaLedger};
