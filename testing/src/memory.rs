//! In-memory store implementations with fault injection
//!
//! Provides fast, deterministic storage for coordinator tests:
//! - [`InMemoryUserStore`]: `HashMap`-backed user documents
//! - [`InMemoryEventStore`]: `HashMap`-backed event documents
//! - [`FaultPlan`]: scripted failures and delays per store operation
//!
//! Each write takes the lock, checks its precondition and mutates in one
//! critical section, so conditional writes behave like a document store's
//! atomic single-document update.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap on poisoned locks

use clubhouse_core::error::{Entity, StoreError};
use clubhouse_core::ids::{CommentId, EventId, UserId};
use clubhouse_core::model::{Comment, Event, Registration, User};
use clubhouse_core::store::{EventStore, StoreFuture, UserStore};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

/// A store operation that a [`FaultPlan`] can target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreOp {
    /// `UserStore::get` / `EventStore::get`
    Get,
    /// `save`
    Save,
    /// `EventStore::delete`
    Delete,
    /// `UserStore::add_event`
    AddEvent,
    /// `UserStore::remove_event`
    RemoveEvent,
    /// `EventStore::insert_participant`
    InsertParticipant,
    /// `EventStore::remove_participant`
    RemoveParticipant,
    /// `EventStore::append_comment`
    AppendComment,
    /// `EventStore::remove_comment`
    RemoveComment,
}

#[derive(Debug)]
enum Fault {
    Fail(StoreError),
    Delay(Duration),
}

/// Scripted failures, consumed in order per operation.
///
/// # Example
///
/// ```
/// use clubhouse_testing::memory::{FaultPlan, InMemoryEventStore, StoreOp};
/// use clubhouse_core::error::StoreError;
///
/// let events = InMemoryEventStore::new();
/// events
///     .faults()
///     .fail_next(StoreOp::InsertParticipant, StoreError::Unavailable("injected".into()));
/// assert_eq!(events.faults().pending(StoreOp::InsertParticipant), 1);
/// ```
#[derive(Clone, Debug, Default)]
pub struct FaultPlan {
    queue: Arc<Mutex<HashMap<StoreOp, VecDeque<Fault>>>>,
}

impl FaultPlan {
    /// Create an empty plan.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call to `op` fail with `error` without touching state.
    pub fn fail_next(&self, op: StoreOp, error: StoreError) {
        self.push(op, Fault::Fail(error));
    }

    /// Make the next `times` calls to `op` fail with `error`.
    pub fn fail_times(&self, op: StoreOp, error: &StoreError, times: usize) {
        for _ in 0..times {
            self.push(op, Fault::Fail(error.clone()));
        }
    }

    /// Make the next call to `op` sleep for `delay` before running.
    pub fn delay_next(&self, op: StoreOp, delay: Duration) {
        self.push(op, Fault::Delay(delay));
    }

    /// Number of scripted faults not yet consumed for `op`.
    #[must_use]
    pub fn pending(&self, op: StoreOp) -> usize {
        self.queue.lock().unwrap().get(&op).map_or(0, VecDeque::len)
    }

    /// Drop every scripted fault.
    pub fn clear(&self) {
        self.queue.lock().unwrap().clear();
    }

    fn push(&self, op: StoreOp, fault: Fault) {
        self.queue
            .lock()
            .unwrap()
            .entry(op)
            .or_default()
            .push_back(fault);
    }

    async fn apply(&self, op: StoreOp) -> Result<(), StoreError> {
        let fault = self
            .queue
            .lock()
            .unwrap()
            .get_mut(&op)
            .and_then(VecDeque::pop_front);
        match fault {
            Some(Fault::Fail(error)) => Err(error),
            Some(Fault::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

/// In-memory user store.
#[derive(Clone, Debug, Default)]
pub struct InMemoryUserStore {
    users: Arc<RwLock<HashMap<UserId, User>>>,
    faults: FaultPlan,
}

impl InMemoryUserStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with `users`.
    #[must_use]
    pub fn with_users(users: impl IntoIterator<Item = User>) -> Self {
        let store = Self::new();
        {
            let mut map = store.users.write().unwrap();
            for user in users {
                map.insert(user.id.clone(), user);
            }
        }
        store
    }

    /// The fault plan consulted before every operation.
    #[must_use]
    pub const fn faults(&self) -> &FaultPlan {
        &self.faults
    }

    /// Synchronous read for assertions.
    #[must_use]
    pub fn user(&self, id: &UserId) -> Option<User> {
        self.users.read().unwrap().get(id).cloned()
    }

    /// Clone of every stored user.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<UserId, User> {
        self.users.read().unwrap().clone()
    }

    /// Number of stored users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.users.read().unwrap().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.read().unwrap().is_empty()
    }

    fn update<T>(
        &self,
        user_id: &UserId,
        mutate: impl FnOnce(&mut User) -> T,
    ) -> Result<T, StoreError> {
        let mut users = self.users.write().unwrap();
        let user = users
            .get_mut(user_id)
            .ok_or_else(|| StoreError::Missing(Entity::User(user_id.clone())))?;
        Ok(mutate(user))
    }
}

impl UserStore for InMemoryUserStore {
    fn get(&self, user_id: UserId) -> StoreFuture<'_, Option<User>> {
        Box::pin(async move {
            self.faults.apply(StoreOp::Get).await?;
            Ok(self.user(&user_id))
        })
    }

    fn save(&self, user: User) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.faults.apply(StoreOp::Save).await?;
            self.users.write().unwrap().insert(user.id.clone(), user);
            Ok(())
        })
    }

    fn add_event(&self, user_id: UserId, event_id: EventId) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            self.faults.apply(StoreOp::AddEvent).await?;
            self.update(&user_id, |user| user.events.insert(event_id))
        })
    }

    fn remove_event(&self, user_id: UserId, event_id: EventId) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            self.faults.apply(StoreOp::RemoveEvent).await?;
            self.update(&user_id, |user| user.events.remove(&event_id))
        })
    }
}

/// In-memory event catalog.
#[derive(Clone, Debug, Default)]
pub struct InMemoryEventStore {
    events: Arc<RwLock<HashMap<EventId, Event>>>,
    faults: FaultPlan,
}

impl InMemoryEventStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with `events`.
    #[must_use]
    pub fn with_events(events: impl IntoIterator<Item = Event>) -> Self {
        let store = Self::new();
        {
            let mut map = store.events.write().unwrap();
            for event in events {
                map.insert(event.id.clone(), event);
            }
        }
        store
    }

    /// The fault plan consulted before every operation.
    #[must_use]
    pub const fn faults(&self) -> &FaultPlan {
        &self.faults
    }

    /// Synchronous read for assertions.
    #[must_use]
    pub fn event(&self, id: &EventId) -> Option<Event> {
        self.events.read().unwrap().get(id).cloned()
    }

    /// Clone of every stored event.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<EventId, Event> {
        self.events.read().unwrap().clone()
    }

    /// Number of stored events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().unwrap().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().unwrap().is_empty()
    }

    fn update<T>(
        &self,
        event_id: &EventId,
        mutate: impl FnOnce(&mut Event) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut events = self.events.write().unwrap();
        let event = events
            .get_mut(event_id)
            .ok_or_else(|| StoreError::Missing(Entity::Event(event_id.clone())))?;
        mutate(event)
    }
}

impl EventStore for InMemoryEventStore {
    fn get(&self, event_id: EventId) -> StoreFuture<'_, Option<Event>> {
        Box::pin(async move {
            self.faults.apply(StoreOp::Get).await?;
            Ok(self.event(&event_id))
        })
    }

    fn save(&self, event: Event) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.faults.apply(StoreOp::Save).await?;
            self.events.write().unwrap().insert(event.id.clone(), event);
            Ok(())
        })
    }

    fn delete(&self, event_id: EventId) -> StoreFuture<'_, Option<Event>> {
        Box::pin(async move {
            self.faults.apply(StoreOp::Delete).await?;
            Ok(self.events.write().unwrap().remove(&event_id))
        })
    }

    fn insert_participant(
        &self,
        event_id: EventId,
        registration: Registration,
    ) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            self.faults.apply(StoreOp::InsertParticipant).await?;
            self.update(&event_id, |event| {
                if event.has_participant(&registration.lead) {
                    return Ok(false);
                }
                event.participants.push(registration);
                Ok(true)
            })
        })
    }

    fn remove_participant(
        &self,
        event_id: EventId,
        lead: UserId,
    ) -> StoreFuture<'_, Option<Registration>> {
        Box::pin(async move {
            self.faults.apply(StoreOp::RemoveParticipant).await?;
            self.update(&event_id, |event| {
                Ok(event
                    .participants
                    .iter()
                    .position(|r| r.lead == lead)
                    .map(|index| event.participants.remove(index)))
            })
        })
    }

    fn append_comment(&self, event_id: EventId, comment: Comment) -> StoreFuture<'_, Vec<Comment>> {
        Box::pin(async move {
            self.faults.apply(StoreOp::AppendComment).await?;
            self.update(&event_id, |event| {
                event.ratings.push(comment);
                Ok(event.ratings.clone())
            })
        })
    }

    fn remove_comment(
        &self,
        event_id: EventId,
        comment_id: CommentId,
    ) -> StoreFuture<'_, Vec<Comment>> {
        Box::pin(async move {
            self.faults.apply(StoreOp::RemoveComment).await?;
            self.update(&event_id, |event| {
                let index = event
                    .ratings
                    .iter()
                    .position(|c| c.id == comment_id)
                    .ok_or_else(|| StoreError::Missing(Entity::Comment(comment_id.clone())))?;
                event.ratings.remove(index);
                Ok(event.ratings.clone())
            })
        })
    }
}
