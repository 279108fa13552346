//! Registration coordinator: validation, idempotency and deadlines in front
//! of a [`MembershipLedger`].
//!
//! The coordinator never writes membership itself. It validates the request,
//! loads both documents, rejects duplicates early and hands the paired
//! mutation to the ledger, retrying only when the ledger reports a transient
//! failure with nothing left applied.

use crate::metrics::RegistrationMetrics;
use crate::retry::{RetryPolicy, retry_within};
use clubhouse_core::environment::Clock;
use clubhouse_core::error::{Entity, LedgerError, RegistrationError};
use clubhouse_core::ids::{EventId, UserId};
use clubhouse_core::model::{Event, LeadInfo, Registration, TeamInfo, User};
use clubhouse_core::store::{Deadline, EventStore, MembershipChange, MembershipLedger, UserStore};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What `unregister` does for a user who holds no registration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnregisterPolicy {
    /// Succeed and return the unchanged state.
    #[default]
    Permissive,
    /// Fail with `NotRegistered`.
    Strict,
}

impl fmt::Display for UnregisterPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Permissive => f.write_str("permissive"),
            Self::Strict => f.write_str("strict"),
        }
    }
}

impl FromStr for UnregisterPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "permissive" => Ok(Self::Permissive),
            "strict" => Ok(Self::Strict),
            other => Err(format!("unknown unregister policy: {other}")),
        }
    }
}

/// Coordinator tuning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Deadline applied when the caller does not supply one
    pub deadline: Duration,
    /// Retries for transient ledger failures
    pub retry: RetryPolicy,
    /// Behaviour of `unregister` for non-members
    pub unregister_policy: UnregisterPolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            unregister_policy: UnregisterPolicy::default(),
        }
    }
}

/// Post-mutation state of both documents.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistrationOutcome {
    /// The user after the call
    pub user: User,
    /// The event after the call
    pub event: Event,
    /// `false` when nothing had to change
    pub changed: bool,
}

impl From<MembershipChange> for RegistrationOutcome {
    fn from(change: MembershipChange) -> Self {
        Self {
            user: change.user,
            event: change.event,
            changed: change.changed,
        }
    }
}

/// Entry point for register, unregister and event removal.
pub struct RegistrationCoordinator {
    users: Arc<dyn UserStore>,
    events: Arc<dyn EventStore>,
    ledger: Arc<dyn MembershipLedger>,
    clock: Arc<dyn Clock>,
    config: CoordinatorConfig,
}

impl RegistrationCoordinator {
    /// Create a coordinator over the given ports.
    #[must_use]
    pub fn new(
        users: Arc<dyn UserStore>,
        events: Arc<dyn EventStore>,
        ledger: Arc<dyn MembershipLedger>,
        clock: Arc<dyn Clock>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            users,
            events,
            ledger,
            clock,
            config,
        }
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Register `user_id` (as lead) for `event_id` under the configured deadline.
    ///
    /// # Errors
    ///
    /// - `ValidationFailed` for blank ids, incomplete lead details or a team
    ///   that does not fit the event
    /// - `NotFound` if the user or event does not exist
    /// - `AlreadyRegistered` if the user already holds a registration
    /// - `StorageConflict` if the paired write could not commit
    pub async fn register(
        &self,
        user_id: &UserId,
        event_id: &EventId,
        lead: LeadInfo,
        team: Option<TeamInfo>,
    ) -> Result<RegistrationOutcome, RegistrationError> {
        let deadline = Deadline::after(self.config.deadline);
        self.register_until(user_id, event_id, lead, team, deadline)
            .await
    }

    /// [`register`](Self::register) with an explicit deadline.
    ///
    /// # Errors
    ///
    /// See [`register`](Self::register).
    #[tracing::instrument(skip_all, fields(user_id = %user_id, event_id = %event_id))]
    pub async fn register_until(
        &self,
        user_id: &UserId,
        event_id: &EventId,
        lead: LeadInfo,
        team: Option<TeamInfo>,
        deadline: Deadline,
    ) -> Result<RegistrationOutcome, RegistrationError> {
        let started = Instant::now();
        let result = self
            .try_register(user_id, event_id, lead, team, deadline)
            .await;
        RegistrationMetrics::record_outcome("register", outcome_label(&result), started.elapsed());
        match &result {
            Ok(_) => tracing::info!("Registration committed"),
            Err(err) => tracing::info!(error = %err, "Registration rejected"),
        }
        result
    }

    /// Remove `user_id`'s registration from `event_id` under the configured deadline.
    ///
    /// # Errors
    ///
    /// - `ValidationFailed` for blank ids
    /// - `NotFound` if the user or event does not exist
    /// - `NotRegistered` for a non-member under [`UnregisterPolicy::Strict`]
    /// - `StorageConflict` if the paired write could not commit
    pub async fn unregister(
        &self,
        user_id: &UserId,
        event_id: &EventId,
    ) -> Result<RegistrationOutcome, RegistrationError> {
        let deadline = Deadline::after(self.config.deadline);
        self.unregister_until(user_id, event_id, deadline).await
    }

    /// [`unregister`](Self::unregister) with an explicit deadline.
    ///
    /// # Errors
    ///
    /// See [`unregister`](Self::unregister).
    #[tracing::instrument(skip_all, fields(user_id = %user_id, event_id = %event_id))]
    pub async fn unregister_until(
        &self,
        user_id: &UserId,
        event_id: &EventId,
        deadline: Deadline,
    ) -> Result<RegistrationOutcome, RegistrationError> {
        let started = Instant::now();
        let result = self.try_unregister(user_id, event_id, deadline).await;
        RegistrationMetrics::record_outcome(
            "unregister",
            outcome_label(&result),
            started.elapsed(),
        );
        match &result {
            Ok(outcome) => tracing::info!(changed = outcome.changed, "Unregistration committed"),
            Err(err) => tracing::info!(error = %err, "Unregistration rejected"),
        }
        result
    }

    /// Delete an event and withdraw every registration it holds.
    ///
    /// Returns the event as it was when deleted.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the event does not exist
    /// - `StorageConflict` if a withdrawal or the delete could not commit;
    ///   registrations withdrawn before the failure stay withdrawn
    #[tracing::instrument(skip_all, fields(event_id = %event_id))]
    pub async fn remove_event(&self, event_id: &EventId) -> Result<Event, RegistrationError> {
        require_id(event_id.is_blank(), "event")?;
        let deadline = Deadline::after(self.config.deadline);
        let event = self.load_event(event_id).await?;

        for registration in &event.participants {
            match self
                .withdraw_with_retry(&registration.lead, event_id, deadline)
                .await
            {
                Ok(_) | Err(LedgerError::Missing(Entity::User(_))) => {}
                Err(err) => return Err(err.into()),
            }
        }

        let removed = self
            .events
            .delete(event_id.clone())
            .await?
            .ok_or_else(|| RegistrationError::NotFound(Entity::Event(event_id.clone())))?;

        // Sweep leads that enrolled between the withdrawals and the delete.
        for registration in &removed.participants {
            match self
                .users
                .remove_event(registration.lead.clone(), event_id.clone())
                .await
            {
                Ok(_) => {}
                Err(err) => tracing::warn!(
                    user_id = %registration.lead,
                    error = %err,
                    "Could not pull deleted event from user"
                ),
            }
        }

        tracing::info!(
            withdrawn = event.participants.len(),
            "Event removed with its registrations"
        );
        Ok(removed)
    }

    async fn try_register(
        &self,
        user_id: &UserId,
        event_id: &EventId,
        lead: LeadInfo,
        team: Option<TeamInfo>,
        deadline: Deadline,
    ) -> Result<RegistrationOutcome, RegistrationError> {
        require_id(user_id.is_blank(), "user")?;
        require_id(event_id.is_blank(), "event")?;
        lead.validate()?;

        let user = self.load_user(user_id).await?;
        let event = self.load_event(event_id).await?;
        let team = team.map(|t| t.into_team(event.capacity)).transpose()?;

        if user.is_registered_for(event_id) {
            return Err(RegistrationError::AlreadyRegistered {
                user_id: user_id.clone(),
                event_id: event_id.clone(),
            });
        }

        let registration = Registration {
            lead: user_id.clone(),
            lead_snapshot: lead.snapshot(user.profile_image.clone()),
            team,
            registered_at: self.clock.now(),
        };

        let change = retry_within(
            &self.config.retry,
            deadline,
            || {
                self.ledger
                    .enroll(event_id.clone(), registration.clone(), deadline)
            },
            LedgerError::is_retryable,
        )
        .await?;
        Ok(change.into())
    }

    async fn try_unregister(
        &self,
        user_id: &UserId,
        event_id: &EventId,
        deadline: Deadline,
    ) -> Result<RegistrationOutcome, RegistrationError> {
        require_id(user_id.is_blank(), "user")?;
        require_id(event_id.is_blank(), "event")?;

        let user = self.load_user(user_id).await?;
        let strict = self.config.unregister_policy == UnregisterPolicy::Strict;
        if strict && !user.is_registered_for(event_id) {
            return Err(not_registered(user_id, event_id));
        }

        let change = self
            .withdraw_with_retry(user_id, event_id, deadline)
            .await?;
        if strict && !change.changed {
            return Err(not_registered(user_id, event_id));
        }
        Ok(change.into())
    }

    async fn withdraw_with_retry(
        &self,
        user_id: &UserId,
        event_id: &EventId,
        deadline: Deadline,
    ) -> Result<MembershipChange, LedgerError> {
        retry_within(
            &self.config.retry,
            deadline,
            || {
                self.ledger
                    .withdraw(user_id.clone(), event_id.clone(), deadline)
            },
            LedgerError::is_retryable,
        )
        .await
    }

    async fn load_user(&self, user_id: &UserId) -> Result<User, RegistrationError> {
        self.users
            .get(user_id.clone())
            .await?
            .ok_or_else(|| RegistrationError::NotFound(Entity::User(user_id.clone())))
    }

    async fn load_event(&self, event_id: &EventId) -> Result<Event, RegistrationError> {
        self.events
            .get(event_id.clone())
            .await?
            .ok_or_else(|| RegistrationError::NotFound(Entity::Event(event_id.clone())))
    }
}

fn require_id(blank: bool, kind: &str) -> Result<(), RegistrationError> {
    if blank {
        Err(RegistrationError::ValidationFailed(format!(
            "Invalid {kind} id: cannot be empty"
        )))
    } else {
        Ok(())
    }
}

fn not_registered(user_id: &UserId, event_id: &EventId) -> RegistrationError {
    RegistrationError::NotRegistered {
        user_id: user_id.clone(),
        event_id: event_id.clone(),
    }
}

/// Metric label for a coordinator result.
pub(crate) fn outcome_label<T>(result: &Result<T, RegistrationError>) -> &'static str {
    match result {
        Ok(_) => "success",
        Err(RegistrationError::NotFound(_)) => "not_found",
        Err(RegistrationError::ValidationFailed(_)) => "validation_failed",
        Err(RegistrationError::AlreadyRegistered { .. }) => "already_registered",
        Err(RegistrationError::NotRegistered { .. }) => "not_registered",
        Err(RegistrationError::Forbidden(_)) => "forbidden",
        Err(RegistrationError::StorageConflict(_)) => "conflict",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use clubhouse_core::error::ConflictReason;
    use clubhouse_core::ids::CommentId;

    #[test]
    fn unregister_policy_parses_case_insensitively() {
        assert_eq!("Strict".parse::<UnregisterPolicy>(), Ok(UnregisterPolicy::Strict));
        assert_eq!(
            " permissive ".parse::<UnregisterPolicy>(),
            Ok(UnregisterPolicy::Permissive)
        );
        assert!("lenient".parse::<UnregisterPolicy>().is_err());
        assert_eq!(UnregisterPolicy::default(), UnregisterPolicy::Permissive);
    }

    #[test]
    fn outcome_labels_cover_conflicts() {
        let conflict: Result<(), _> =
            Err(RegistrationError::StorageConflict(ConflictReason::DeadlineExceeded));
        assert_eq!(outcome_label(&conflict), "conflict");
        assert_eq!(outcome_label(&Ok::<_, RegistrationError>(())), "success");
    }

    #[test]
    fn outcome_labels_cover_comment_failures() {
        let forbidden: Result<(), _> = Err(RegistrationError::Forbidden("not the author".into()));
        assert_eq!(outcome_label(&forbidden), "forbidden");
        let missing: Result<(), _> =
            Err(RegistrationError::NotFound(Entity::Comment(CommentId::new("c-1"))));
        assert_eq!(outcome_label(&missing), "not_found");
    }

    #[test]
    fn blank_ids_fail_validation() {
        let err = require_id(true, "event").unwrap_err();
        assert_eq!(
            err,
            RegistrationError::ValidationFailed("Invalid event id: cannot be empty".to_string())
        );
    }
}
