//! Saga-based membership ledger over two independent document stores.
//!
//! A paired mutation is two conditional single-document writes:
//!
//! ```text
//! enroll:   users.add_event ──► events.insert_participant
//!                 ▲ undo: users.remove_event
//! withdraw: users.remove_event ──► events.remove_participant
//!                 ▲ undo: users.add_event
//! ```
//!
//! The compensating write for step one is fixed before step one runs; if
//! step two fails, or the deadline passes before both writes land, it is
//! applied (with retries) and the caller sees an error with the pre-state
//! intact. A write cut off by the deadline may still have landed, so its own
//! inverse is applied as well. Only when compensation itself fails does the
//! ledger report [`LedgerError::CompensationFailed`].
//!
//! Each change runs on a detached task: dropping the returned future leaves
//! the saga to finish (or compensate) on its own.
//!
//! Calls for the same `(user, event)` pair run one at a time through an
//! in-process keyed lock; unrelated pairs never contend. Across processes
//! the conditional writes decide races.

use crate::metrics::SagaMetrics;
use crate::retry::{RetryPolicy, retry_within};
use clubhouse_core::error::{Entity, LedgerError, StoreError};
use clubhouse_core::ids::{EventId, UserId};
use clubhouse_core::model::{Event, Registration, User};
use clubhouse_core::store::{
    Deadline, EventStore, LedgerFuture, MembershipChange, MembershipLedger, UserStore,
};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinError;
use tracing::Instrument;

/// How hard the ledger tries to undo a half-applied change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompensationPolicy {
    /// Backoff between compensation attempts
    pub retry: RetryPolicy,
    /// Time allowed for compensation, independent of the caller's deadline
    pub budget: Duration,
}

impl Default for CompensationPolicy {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::builder().max_retries(5).build(),
            budget: Duration::from_secs(2),
        }
    }
}

/// Per-`(user, event)` async locks, reclaimed once nobody holds or awaits them.
#[derive(Debug, Default)]
pub struct PairLocks {
    locks: DashMap<(UserId, EventId), Arc<Mutex<()>>>,
}

impl PairLocks {
    /// Create an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `(user_id, event_id)`.
    pub async fn acquire(&self, user_id: UserId, event_id: EventId) -> PairGuard<'_> {
        let key = (user_id, event_id);
        let lock = Arc::clone(
            self.locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        let guard = Arc::clone(&lock).lock_owned().await;
        PairGuard {
            locks: self,
            key,
            lock,
            guard: Some(guard),
        }
    }

    /// Number of pairs with a live lock entry.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no pair is currently locked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Exclusive access to one pair; released on drop.
#[derive(Debug)]
pub struct PairGuard<'a> {
    locks: &'a PairLocks,
    key: (UserId, EventId),
    lock: Arc<Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for PairGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        // Map entry plus our own handle: nobody else is waiting.
        self.locks
            .locks
            .remove_if(&self.key, |_, lock| {
                Arc::ptr_eq(lock, &self.lock) && Arc::strong_count(lock) == 2
            });
    }
}

/// [`MembershipLedger`] that pairs two conditional writes with a compensating inverse.
#[derive(Clone)]
pub struct SagaLedger {
    users: Arc<dyn UserStore>,
    events: Arc<dyn EventStore>,
    locks: Arc<PairLocks>,
    compensation: CompensationPolicy,
}

impl SagaLedger {
    /// Create a ledger over the two stores.
    #[must_use]
    pub fn new(users: Arc<dyn UserStore>, events: Arc<dyn EventStore>) -> Self {
        Self {
            users,
            events,
            locks: Arc::new(PairLocks::new()),
            compensation: CompensationPolicy::default(),
        }
    }

    /// Override the compensation retry policy.
    #[must_use]
    pub fn with_compensation(mut self, compensation: CompensationPolicy) -> Self {
        self.compensation = compensation;
        self
    }

    /// The keyed lock table (exposed for diagnostics).
    ///
    /// Acquiring a pair here waits for any in-flight change on that pair,
    /// including one whose caller has gone away.
    #[must_use]
    pub fn locks(&self) -> &PairLocks {
        &self.locks
    }

    async fn run_enroll(
        &self,
        event_id: EventId,
        registration: Registration,
        deadline: Deadline,
    ) -> Result<MembershipChange, LedgerError> {
        let user_id = registration.lead.clone();
        let _pair = self.locks.acquire(user_id.clone(), event_id.clone()).await;

        let (mut user, mut event) = self.load_pair(&user_id, &event_id).await?;
        if deadline.is_expired() {
            return Err(LedgerError::DeadlineExceeded);
        }

        let write = self.users.add_event(user_id.clone(), event_id.clone());
        let Some(inserted) = within(deadline, write).await else {
            if user.is_registered_for(&event_id) {
                return Err(LedgerError::DeadlineExceeded);
            }
            let cause =
                StoreError::Unavailable("deadline passed during membership write".to_string());
            return Err(self
                .undo_enroll(&user_id, &event_id, None, cause, LedgerError::DeadlineExceeded)
                .await);
        };
        if !inserted.map_err(step_failed)? {
            return Err(LedgerError::AlreadyMember { user_id, event_id });
        }

        if deadline.is_expired() {
            let cause = StoreError::Unavailable("deadline passed between writes".to_string());
            return Err(self
                .undo_enroll(&user_id, &event_id, None, cause, LedgerError::DeadlineExceeded)
                .await);
        }

        let write = self
            .events
            .insert_participant(event_id.clone(), registration.clone());
        match within(deadline, write).await {
            Some(Ok(true)) => {}
            Some(Ok(false)) => {
                let cause = StoreError::Conflict(format!("event already lists lead {user_id}"));
                let failure = LedgerError::AlreadyMember {
                    user_id: user_id.clone(),
                    event_id: event_id.clone(),
                };
                return Err(self.undo_enroll(&user_id, &event_id, None, cause, failure).await);
            }
            Some(Err(cause)) => {
                let failure = step_failed(cause.clone());
                return Err(self.undo_enroll(&user_id, &event_id, None, cause, failure).await);
            }
            None => {
                // The registration may have landed; retract it unless it predates us.
                let retract = (!event.has_participant(&user_id)).then_some(&user_id);
                let cause = StoreError::Unavailable(
                    "deadline passed during participant write".to_string(),
                );
                return Err(self
                    .undo_enroll(&user_id, &event_id, retract, cause, LedgerError::DeadlineExceeded)
                    .await);
            }
        }

        user.events.insert(event_id.clone());
        event.participants.push(registration);
        let (user, event) = self.reload_pair(user, event).await;
        tracing::debug!(user_id = %user.id, event_id = %event.id, "Membership enrolled");
        Ok(MembershipChange {
            user,
            event,
            changed: true,
        })
    }

    async fn run_withdraw(
        &self,
        user_id: UserId,
        event_id: EventId,
        deadline: Deadline,
    ) -> Result<MembershipChange, LedgerError> {
        let _pair = self.locks.acquire(user_id.clone(), event_id.clone()).await;

        let (mut user, mut event) = self.load_pair(&user_id, &event_id).await?;
        if deadline.is_expired() {
            return Err(LedgerError::DeadlineExceeded);
        }

        let write = self.users.remove_event(user_id.clone(), event_id.clone());
        let Some(removed) = within(deadline, write).await else {
            if !user.is_registered_for(&event_id) {
                return Err(LedgerError::DeadlineExceeded);
            }
            let cause =
                StoreError::Unavailable("deadline passed during membership write".to_string());
            return Err(self
                .undo_withdraw(&user_id, &event_id, None, cause, LedgerError::DeadlineExceeded)
                .await);
        };
        if !removed.map_err(step_failed)? {
            return Ok(MembershipChange {
                user,
                event,
                changed: false,
            });
        }

        if deadline.is_expired() {
            let cause = StoreError::Unavailable("deadline passed between writes".to_string());
            return Err(self
                .undo_withdraw(&user_id, &event_id, None, cause, LedgerError::DeadlineExceeded)
                .await);
        }

        let write = self
            .events
            .remove_participant(event_id.clone(), user_id.clone());
        match within(deadline, write).await {
            Some(Ok(Some(_))) => {}
            Some(Ok(None)) => {
                tracing::warn!(
                    user_id = %user_id,
                    event_id = %event_id,
                    "Event held no registration for a listed member"
                );
            }
            Some(Err(StoreError::Missing(entity))) => {
                // Event deleted mid-withdraw: both sides are now empty.
                return Err(LedgerError::Missing(entity));
            }
            Some(Err(cause)) => {
                let failure = step_failed(cause.clone());
                return Err(self.undo_withdraw(&user_id, &event_id, None, cause, failure).await);
            }
            None => {
                // The registration may be gone; put the one we loaded back.
                let restore = event.participant(&user_id).cloned();
                let cause = StoreError::Unavailable(
                    "deadline passed during participant write".to_string(),
                );
                return Err(self
                    .undo_withdraw(&user_id, &event_id, restore, cause, LedgerError::DeadlineExceeded)
                    .await);
            }
        }

        user.events.remove(&event_id);
        event.participants.retain(|r| r.lead != user_id);
        let (user, event) = self.reload_pair(user, event).await;
        tracing::debug!(user_id = %user.id, event_id = %event.id, "Membership withdrawn");
        Ok(MembershipChange {
            user,
            event,
            changed: true,
        })
    }

    async fn load_pair(
        &self,
        user_id: &UserId,
        event_id: &EventId,
    ) -> Result<(User, Event), LedgerError> {
        let user = self
            .users
            .get(user_id.clone())
            .await
            .map_err(step_failed)?
            .ok_or_else(|| LedgerError::Missing(Entity::User(user_id.clone())))?;
        let event = self
            .events
            .get(event_id.clone())
            .await
            .map_err(step_failed)?
            .ok_or_else(|| LedgerError::Missing(Entity::Event(event_id.clone())))?;
        Ok((user, event))
    }

    /// Fresh post-state, falling back to the locally applied change if a read fails.
    async fn reload_pair(&self, user: User, event: Event) -> (User, Event) {
        let user = match self.users.get(user.id.clone()).await {
            Ok(Some(fresh)) => fresh,
            Ok(None) => {
                tracing::warn!(user_id = %user.id, "User vanished after commit, using local state");
                user
            }
            Err(err) => {
                tracing::warn!(user_id = %user.id, error = %err, "Post-commit user read failed");
                user
            }
        };
        let event = match self.events.get(event.id.clone()).await {
            Ok(Some(fresh)) => fresh,
            Ok(None) => {
                tracing::warn!(event_id = %event.id, "Event vanished after commit, using local state");
                event
            }
            Err(err) => {
                tracing::warn!(event_id = %event.id, error = %err, "Post-commit event read failed");
                event
            }
        };
        (user, event)
    }

    /// Undo the membership write, first retracting `retract`'s registration if given.
    async fn undo_enroll(
        &self,
        user_id: &UserId,
        event_id: &EventId,
        retract: Option<&UserId>,
        cause: StoreError,
        failure: LedgerError,
    ) -> LedgerError {
        let deadline = Deadline::after(self.compensation.budget);
        if let Some(lead) = retract {
            let retracted = retry_within(
                &self.compensation.retry,
                deadline,
                || self.events.remove_participant(event_id.clone(), lead.clone()),
                StoreError::is_transient,
            )
            .await;
            if let Err(compensation) = retracted.or_else(gone) {
                return settle("enroll", user_id, event_id, Err(compensation), cause, failure);
            }
        }
        let undone = retry_within(
            &self.compensation.retry,
            deadline,
            || self.users.remove_event(user_id.clone(), event_id.clone()),
            StoreError::is_transient,
        )
        .await;
        settle("enroll", user_id, event_id, undone.map(drop), cause, failure)
    }

    /// Restore the membership write, first putting `restore` back if given.
    async fn undo_withdraw(
        &self,
        user_id: &UserId,
        event_id: &EventId,
        restore: Option<Registration>,
        cause: StoreError,
        failure: LedgerError,
    ) -> LedgerError {
        let deadline = Deadline::after(self.compensation.budget);
        if let Some(registration) = restore {
            let restored = retry_within(
                &self.compensation.retry,
                deadline,
                || {
                    self.events
                        .insert_participant(event_id.clone(), registration.clone())
                },
                StoreError::is_transient,
            )
            .await;
            if let Err(compensation) = restored {
                return settle("withdraw", user_id, event_id, Err(compensation), cause, failure);
            }
        }
        let undone = retry_within(
            &self.compensation.retry,
            deadline,
            || self.users.add_event(user_id.clone(), event_id.clone()),
            StoreError::is_transient,
        )
        .await;
        settle("withdraw", user_id, event_id, undone.map(drop), cause, failure)
    }
}

impl MembershipLedger for SagaLedger {
    fn enroll(
        &self,
        event_id: EventId,
        registration: Registration,
        deadline: Deadline,
    ) -> LedgerFuture<'_, MembershipChange> {
        let saga = self.clone();
        let task = tokio::spawn(
            async move { saga.run_enroll(event_id, registration, deadline).await }
                .instrument(tracing::Span::current()),
        );
        Box::pin(async move { task.await.unwrap_or_else(|err| Err(aborted(&err))) })
    }

    fn withdraw(
        &self,
        user_id: UserId,
        event_id: EventId,
        deadline: Deadline,
    ) -> LedgerFuture<'_, MembershipChange> {
        let saga = self.clone();
        let task = tokio::spawn(
            async move { saga.run_withdraw(user_id, event_id, deadline).await }
                .instrument(tracing::Span::current()),
        );
        Box::pin(async move { task.await.unwrap_or_else(|err| Err(aborted(&err))) })
    }
}

/// Run one store write, or `None` once `deadline` passes first.
async fn within<T>(
    deadline: Deadline,
    write: impl Future<Output = Result<T, StoreError>>,
) -> Option<Result<T, StoreError>> {
    tokio::time::timeout(deadline.remaining(), write).await.ok()
}

/// A retraction against a deleted event has nothing left to undo.
fn gone<T: Default>(err: StoreError) -> Result<T, StoreError> {
    match err {
        StoreError::Missing(_) => Ok(T::default()),
        other => Err(other),
    }
}

/// A saga task that panicked or was cancelled may have stopped between writes.
fn aborted(err: &JoinError) -> LedgerError {
    tracing::error!(error = %err, "Membership task aborted, stores need reconciliation");
    SagaMetrics::record_compensation_failure("aborted");
    LedgerError::CompensationFailed {
        cause: StoreError::Backend(format!("membership task aborted: {err}")),
        compensation: StoreError::Backend("not attempted".to_string()),
    }
}

fn step_failed(err: StoreError) -> LedgerError {
    match err {
        StoreError::Missing(entity) => LedgerError::Missing(entity),
        other => LedgerError::RolledBack(other),
    }
}

fn settle(
    operation: &'static str,
    user_id: &UserId,
    event_id: &EventId,
    undone: Result<(), StoreError>,
    cause: StoreError,
    failure: LedgerError,
) -> LedgerError {
    match undone {
        Ok(()) => {
            SagaMetrics::record_compensation(operation);
            tracing::warn!(
                operation,
                user_id = %user_id,
                event_id = %event_id,
                cause = %cause,
                "Second write failed, first write compensated"
            );
            failure
        }
        Err(compensation) => {
            SagaMetrics::record_compensation_failure(operation);
            tracing::error!(
                operation,
                user_id = %user_id,
                event_id = %event_id,
                cause = %cause,
                compensation = %compensation,
                "Compensation failed, stores need reconciliation"
            );
            LedgerError::CompensationFailed {
                cause,
                compensation,
            }
        }
    }
}
