//! Storage ports for the user store, the event catalog and the membership ledger.
//!
//! # Dyn Compatibility
//!
//! These traits return `Pin<Box<dyn Future>>` instead of using `async fn` so
//! they can be held as `Arc<dyn UserStore>` by stateless workers.
//!
//! # Ownership of membership
//!
//! `UserStore::add_event`/`remove_event` and
//! `EventStore::insert_participant`/`remove_participant` are the raw halves
//! of the membership fact. Only a [`MembershipLedger`] calls them; every other
//! component treats `User.events` and `Event.participants` as read-only.

use crate::error::{LedgerError, StoreError};
use crate::ids::{CommentId, EventId, UserId};
use crate::model::{Comment, Event, Registration, User};
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

/// Boxed future returned by store ports.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Boxed future returned by a membership ledger.
pub type LedgerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, LedgerError>> + Send + 'a>>;

/// Durable storage for user documents.
pub trait UserStore: Send + Sync {
    /// Load a user. `Ok(None)` when it does not exist.
    fn get(&self, user_id: UserId) -> StoreFuture<'_, Option<User>>;

    /// Insert or replace a user document.
    fn save(&self, user: User) -> StoreFuture<'_, ()>;

    /// Add `event_id` to the user's membership set if absent.
    ///
    /// Returns `true` if it was inserted, `false` if already present.
    ///
    /// # Errors
    ///
    /// `StoreError::Missing` if the user does not exist.
    fn add_event(&self, user_id: UserId, event_id: EventId) -> StoreFuture<'_, bool>;

    /// Remove `event_id` from the user's membership set.
    ///
    /// Returns `true` if it was present.
    ///
    /// # Errors
    ///
    /// `StoreError::Missing` if the user does not exist.
    fn remove_event(&self, user_id: UserId, event_id: EventId) -> StoreFuture<'_, bool>;
}

/// Durable storage for event documents.
pub trait EventStore: Send + Sync {
    /// Load an event. `Ok(None)` when it does not exist.
    fn get(&self, event_id: EventId) -> StoreFuture<'_, Option<Event>>;

    /// Insert or replace an event document.
    fn save(&self, event: Event) -> StoreFuture<'_, ()>;

    /// Delete an event, returning the removed document.
    fn delete(&self, event_id: EventId) -> StoreFuture<'_, Option<Event>>;

    /// Append a registration unless one with the same lead exists.
    ///
    /// Returns `true` if appended.
    ///
    /// # Errors
    ///
    /// `StoreError::Missing` if the event does not exist.
    fn insert_participant(
        &self,
        event_id: EventId,
        registration: Registration,
    ) -> StoreFuture<'_, bool>;

    /// Remove the registration led by `lead`, returning it if present.
    ///
    /// # Errors
    ///
    /// `StoreError::Missing` if the event does not exist.
    fn remove_participant(
        &self,
        event_id: EventId,
        lead: UserId,
    ) -> StoreFuture<'_, Option<Registration>>;

    /// Append a comment and return the full updated list.
    ///
    /// # Errors
    ///
    /// `StoreError::Missing` if the event does not exist.
    fn append_comment(&self, event_id: EventId, comment: Comment) -> StoreFuture<'_, Vec<Comment>>;

    /// Remove a comment by id and return the full updated list.
    ///
    /// # Errors
    ///
    /// `StoreError::Missing` if the event or the comment does not exist.
    fn remove_comment(
        &self,
        event_id: EventId,
        comment_id: CommentId,
    ) -> StoreFuture<'_, Vec<Comment>>;
}

/// Point in time after which a paired mutation must not start a new write.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline(Instant);

impl Deadline {
    /// Deadline `timeout` from now.
    #[must_use]
    pub fn after(timeout: Duration) -> Self {
        Self(Instant::now() + timeout)
    }

    /// Deadline at a fixed instant.
    #[must_use]
    pub const fn at(instant: Instant) -> Self {
        Self(instant)
    }

    /// The underlying instant.
    #[must_use]
    pub const fn instant(self) -> Instant {
        self.0
    }

    /// Whether the deadline has passed.
    #[must_use]
    pub fn is_expired(self) -> bool {
        Instant::now() >= self.0
    }

    /// Time left, zero once expired.
    #[must_use]
    pub fn remaining(self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }
}

/// Post-state of a paired mutation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MembershipChange {
    /// The user after the change
    pub user: User,
    /// The event after the change
    pub event: Event,
    /// `false` when the call was a no-op (withdrawing a non-member)
    pub changed: bool,
}

/// Applies both halves of a membership change as one atomic unit.
///
/// Implementations either use a native multi-document transaction or run
/// a saga with a compensating inverse. Either way, when a call returns an
/// error other than [`LedgerError::CompensationFailed`] the pre-state is
/// unchanged, and concurrent calls for the same `(user, event)` pair are
/// serialized.
pub trait MembershipLedger: Send + Sync {
    /// Add `event_id` to the lead's membership set and append `registration`
    /// to the event's participants.
    ///
    /// # Errors
    ///
    /// `AlreadyMember` if the user already holds the membership.
    fn enroll(
        &self,
        event_id: EventId,
        registration: Registration,
        deadline: Deadline,
    ) -> LedgerFuture<'_, MembershipChange>;

    /// Remove `event_id` from the user's membership set and the user's
    /// registration from the event. A non-member yields `changed == false`.
    fn withdraw(
        &self,
        user_id: UserId,
        event_id: EventId,
        deadline: Deadline,
    ) -> LedgerFuture<'_, MembershipChange>;
}

/// Opaque caller credentials presented at the boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials(String);

impl Credentials {
    /// Wrap a bearer token or session key.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.0
    }
}

/// Resolves a verified caller identity. Implemented outside this workspace.
pub trait IdentityProvider: Send + Sync {
    /// The user behind `credentials`, or `None` when they are not valid.
    fn current_user(&self, credentials: &Credentials) -> StoreFuture<'_, Option<UserId>>;
}
