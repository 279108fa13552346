//! # Clubhouse Core
//!
//! Domain types, storage ports and pure read-side projections for club
//! event registration.
//!
//! ## Core Concepts
//!
//! - **User / Event**: the two independently stored documents
//! - **Registration**: a lead's enrollment record embedded in an event
//! - **Membership fact**: `E ∈ U.events ⇔ Event(E)` has a registration led by `U`
//! - **Ports**: `UserStore`, `EventStore`, `MembershipLedger`, `IdentityProvider`
//! - **Environment**: injected `Clock` and `IdGenerator`
//!
//! ## Architecture Principles
//!
//! - Validate before mutating (no partial effects on bad input)
//! - Only a ledger mutates membership, and always both halves together
//! - Read models are pure functions of stored documents
//!
//! ## Example
//!
//! ```
//! use clubhouse_core::model::{CapacityPolicy, Event, Pricing};
//! use clubhouse_core::projection::{project, ProjectionPolicy};
//! use clubhouse_core::ids::EventId;
//!
//! let event = Event::new(EventId::new("meetup"), "Meetup", CapacityPolicy::solo(), Pricing::free());
//! assert!(project(&event, &ProjectionPolicy::default()).is_empty());
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

/// Typed identifiers
pub mod ids;

/// User and event documents
pub mod model;

/// Error taxonomy
pub mod error;

/// Storage and identity ports
pub mod store;

/// Pure read-side views
pub mod projection;

pub use error::{ConflictReason, Entity, LedgerError, RegistrationError, StoreError};
pub use ids::{CommentId, EventId, UserId};

/// Environment module - Dependency injection traits
///
/// All sources of nondeterminism (time, fresh identifiers) are abstracted
/// behind traits so tests can pin them.
pub mod environment {
    use crate::ids::CommentId;
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use clubhouse_core::environment::{Clock, SystemClock};
    ///
    /// let now = SystemClock.now();
    /// assert!(now.timestamp() > 0);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }

    /// Source of fresh comment identifiers.
    pub trait IdGenerator: Send + Sync {
        /// A new, never before issued comment id
        fn comment_id(&self) -> CommentId;
    }

    /// Random v4 UUID identifiers.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct UuidGenerator;

    impl IdGenerator for UuidGenerator {
        fn comment_id(&self) -> CommentId {
            CommentId::new(uuid::Uuid::new_v4().to_string())
        }
    }
}
