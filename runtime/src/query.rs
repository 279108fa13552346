//! Read-only registration status and roster views.

use clubhouse_core::error::{Entity, RegistrationError};
use clubhouse_core::ids::{EventId, UserId};
use clubhouse_core::model::{Event, User};
use clubhouse_core::projection::{
    ProjectedParticipant, ProjectionPolicy, TeamView, average_rating, project, project_teams,
};
use clubhouse_core::store::{EventStore, UserStore};
use std::sync::Arc;

/// Answers "is this user registered?" and builds participant views.
///
/// Status comes from the user's membership set alone; rosters are
/// projected from the event document on every call.
pub struct RegistrationQuery {
    users: Arc<dyn UserStore>,
    events: Arc<dyn EventStore>,
    policy: ProjectionPolicy,
}

impl RegistrationQuery {
    /// Create a query service over both stores.
    #[must_use]
    pub fn new(
        users: Arc<dyn UserStore>,
        events: Arc<dyn EventStore>,
        policy: ProjectionPolicy,
    ) -> Self {
        Self {
            users,
            events,
            policy,
        }
    }

    /// Whether `user_id` holds a registration for `event_id`.
    ///
    /// # Errors
    ///
    /// `NotFound` if the user does not exist.
    pub async fn is_registered(
        &self,
        user_id: &UserId,
        event_id: &EventId,
    ) -> Result<bool, RegistrationError> {
        Ok(self.user(user_id).await?.is_registered_for(event_id))
    }

    /// Every event the user holds a registration for, in id order.
    ///
    /// # Errors
    ///
    /// `NotFound` if the user does not exist.
    pub async fn registered_events(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<EventId>, RegistrationError> {
        Ok(self.user(user_id).await?.events.into_iter().collect())
    }

    /// One entry per person registered for the event.
    ///
    /// # Errors
    ///
    /// `NotFound` if the event does not exist.
    pub async fn roster(
        &self,
        event_id: &EventId,
    ) -> Result<Vec<ProjectedParticipant>, RegistrationError> {
        Ok(project(&self.event(event_id).await?, &self.policy))
    }

    /// Registrations grouped per lead and team.
    ///
    /// # Errors
    ///
    /// `NotFound` if the event does not exist.
    pub async fn teams(&self, event_id: &EventId) -> Result<Vec<TeamView>, RegistrationError> {
        Ok(project_teams(&self.event(event_id).await?, &self.policy))
    }

    /// Mean star rating of the event's comments.
    ///
    /// # Errors
    ///
    /// `NotFound` if the event does not exist.
    pub async fn average_rating(&self, event_id: &EventId) -> Result<Option<f64>, RegistrationError> {
        Ok(average_rating(&self.event(event_id).await?.ratings))
    }

    async fn user(&self, user_id: &UserId) -> Result<User, RegistrationError> {
        self.users
            .get(user_id.clone())
            .await?
            .ok_or_else(|| RegistrationError::NotFound(Entity::User(user_id.clone())))
    }

    async fn event(&self, event_id: &EventId) -> Result<Event, RegistrationError> {
        self.events
            .get(event_id.clone())
            .await?
            .ok_or_else(|| RegistrationError::NotFound(Entity::Event(event_id.clone())))
    }
}
