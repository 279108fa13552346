//! Error taxonomy for registration, store ports and the membership ledger.
//!
//! Three layers:
//!
//! - [`StoreError`]: what a storage port reports (transient vs. permanent)
//! - [`LedgerError`]: what the atomic paired mutation reports, including
//!   whether anything was left applied
//! - [`RegistrationError`]: the public taxonomy returned to callers

use crate::ids::{CommentId, EventId, UserId};
use std::fmt;
use thiserror::Error;

/// The kind of document a `NotFound` refers to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Entity {
    /// A user document
    User(UserId),
    /// An event document
    Event(EventId),
    /// A comment inside an event
    Comment(CommentId),
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user {id}"),
            Self::Event(id) => write!(f, "event {id}"),
            Self::Comment(id) => write!(f, "comment {id}"),
        }
    }
}

/// Errors reported by storage ports.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The document to mutate does not exist.
    #[error("{0} does not exist")]
    Missing(Entity),

    /// Temporary failure (connection reset, lock timeout); safe to retry.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A conditional write or serializable transaction lost a race.
    #[error("Write conflict: {0}")]
    Conflict(String),

    /// Any other backend failure.
    #[error("Backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether retrying the same operation may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Conflict(_))
    }
}

/// Errors reported by a `MembershipLedger`.
///
/// Every variant except [`LedgerError::CompensationFailed`] guarantees that
/// the pre-state is intact.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The user already holds a registration for the event.
    #[error("User {user_id} is already registered for event {event_id}")]
    AlreadyMember {
        /// The user
        user_id: UserId,
        /// The event
        event_id: EventId,
    },

    /// A document disappeared before the atomic step.
    #[error("{0} does not exist")]
    Missing(Entity),

    /// The deadline passed before both writes were applied.
    #[error("Deadline exceeded before the membership change committed")]
    DeadlineExceeded,

    /// A write failed and nothing was applied (or it was rolled back).
    #[error("Membership change rolled back: {0}")]
    RolledBack(StoreError),

    /// The second write failed and undoing the first also failed.
    #[error("Compensation failed after {cause}: {compensation}")]
    CompensationFailed {
        /// Why the second write failed
        cause: StoreError,
        /// Why the compensating write failed
        compensation: StoreError,
    },
}

impl LedgerError {
    /// Whether the coordinator may retry the whole atomic step.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::RolledBack(e) if e.is_transient())
    }
}

/// Why a registration could not commit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConflictReason {
    /// The caller's deadline expired
    DeadlineExceeded,
    /// A store write failed and the change was rolled back
    RolledBack(String),
    /// The rollback failed too; an operator must reconcile
    CompensationFailed(String),
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeadlineExceeded => f.write_str("deadline exceeded"),
            Self::RolledBack(reason) => write!(f, "rolled back: {reason}"),
            Self::CompensationFailed(reason) => write!(f, "compensation failed: {reason}"),
        }
    }
}

/// Errors returned by registration, status and comment operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    /// A referenced user, event or comment does not exist.
    #[error("Not found: {0}")]
    NotFound(Entity),

    /// Malformed input; nothing was written.
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// The user is already registered for the event.
    #[error("User {user_id} is already registered for event {event_id}")]
    AlreadyRegistered {
        /// The user
        user_id: UserId,
        /// The event
        event_id: EventId,
    },

    /// Unregister of a non-member under the strict policy.
    #[error("User {user_id} is not registered for event {event_id}")]
    NotRegistered {
        /// The user
        user_id: UserId,
        /// The event
        event_id: EventId,
    },

    /// The caller does not own the resource.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The atomic step could not commit; the caller may retry.
    #[error("Storage conflict: {0}")]
    StorageConflict(ConflictReason),
}

impl From<StoreError> for RegistrationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Missing(entity) => Self::NotFound(entity),
            other => Self::StorageConflict(ConflictReason::RolledBack(other.to_string())),
        }
    }
}

impl From<LedgerError> for RegistrationError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::AlreadyMember { user_id, event_id } => {
                Self::AlreadyRegistered { user_id, event_id }
            }
            LedgerError::Missing(entity) => Self::NotFound(entity),
            LedgerError::DeadlineExceeded => Self::StorageConflict(ConflictReason::DeadlineExceeded),
            LedgerError::RolledBack(cause) => {
                Self::StorageConflict(ConflictReason::RolledBack(cause.to_string()))
            }
            err @ LedgerError::CompensationFailed { .. } => {
                Self::StorageConflict(ConflictReason::CompensationFailed(err.to_string()))
            }
        }
    }
}
