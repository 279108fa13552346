//! Transactional membership ledger.
//!
//! Both halves of a membership change are written in one `SERIALIZABLE`
//! transaction. The user row is locked `FOR UPDATE`, which serializes calls
//! for the same user across processes, and the event row `FOR SHARE`, which
//! blocks a concurrent delete of the event. Any failure rolls the whole
//! transaction back, so the ledger never reports
//! [`LedgerError::CompensationFailed`].

use crate::rows::{self, store_error};
use clubhouse_core::error::{Entity, LedgerError, StoreError};
use clubhouse_core::ids::{EventId, UserId};
use clubhouse_core::model::Registration;
use clubhouse_core::store::{Deadline, LedgerFuture, MembershipChange, MembershipLedger};
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Instant;

/// [`MembershipLedger`] backed by a single `PostgreSQL` transaction.
#[derive(Clone, Debug)]
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    /// Create a ledger over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn run_enroll(
        &self,
        event_id: EventId,
        registration: Registration,
        deadline: Deadline,
    ) -> Result<MembershipChange, LedgerError> {
        let start = Instant::now();
        let user_id = registration.lead.clone();
        let result = within(deadline, async {
            let mut tx = self.begin(deadline).await?;
            lock_pair(&mut tx, &user_id, &event_id).await?;

            let inserted = sqlx::query(
                r"
                INSERT INTO user_events (user_id, event_id)
                VALUES ($1, $2)
                ON CONFLICT (user_id, event_id) DO NOTHING
                ",
            )
            .bind(user_id.as_str())
            .bind(event_id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| step_failed(store_error(e)))?
            .rows_affected()
                == 1;
            let appended = inserted
                && rows::insert_registration(&mut tx, &event_id, &registration)
                    .await
                    .map_err(step_failed)?;
            if !appended {
                return Err(LedgerError::AlreadyMember {
                    user_id: user_id.clone(),
                    event_id: event_id.clone(),
                });
            }

            let change = post_state(&mut tx, &user_id, &event_id, true).await?;
            tx.commit().await.map_err(|e| step_failed(store_error(e)))?;
            Ok::<_, LedgerError>(change)
        })
        .await;

        record("enroll", &result, start);
        result
    }

    async fn run_withdraw(
        &self,
        user_id: UserId,
        event_id: EventId,
        deadline: Deadline,
    ) -> Result<MembershipChange, LedgerError> {
        let start = Instant::now();
        let result = within(deadline, async {
            let mut tx = self.begin(deadline).await?;
            lock_pair(&mut tx, &user_id, &event_id).await?;

            let removed = sqlx::query("DELETE FROM user_events WHERE user_id = $1 AND event_id = $2")
                .bind(user_id.as_str())
                .bind(event_id.as_str())
                .execute(&mut *tx)
                .await
                .map_err(|e| step_failed(store_error(e)))?
                .rows_affected()
                == 1;
            if removed {
                let deleted = sqlx::query(
                    "DELETE FROM registrations WHERE event_id = $1 AND lead_id = $2",
                )
                .bind(event_id.as_str())
                .bind(user_id.as_str())
                .execute(&mut *tx)
                .await
                .map_err(|e| step_failed(store_error(e)))?
                .rows_affected();
                if deleted == 0 {
                    tracing::warn!(
                        user_id = %user_id,
                        event_id = %event_id,
                        "Event held no registration for a listed member"
                    );
                }
            }

            let change = post_state(&mut tx, &user_id, &event_id, removed).await?;
            tx.commit().await.map_err(|e| step_failed(store_error(e)))?;
            Ok::<_, LedgerError>(change)
        })
        .await;

        record("withdraw", &result, start);
        result
    }

    /// Open a serializable transaction whose statements cannot outlive `deadline`.
    async fn begin(&self, deadline: Deadline) -> Result<Transaction<'_, Postgres>, LedgerError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| step_failed(store_error(e)))?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await
            .map_err(|e| step_failed(store_error(e)))?;

        // A zero statement_timeout disables the limit.
        let millis = deadline.remaining().as_millis().max(1);
        sqlx::query("SELECT set_config('statement_timeout', $1, true)")
            .bind(millis.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| step_failed(store_error(e)))?;
        Ok(tx)
    }
}

async fn within<T>(
    deadline: Deadline,
    work: impl Future<Output = Result<T, LedgerError>>,
) -> Result<T, LedgerError> {
    if deadline.is_expired() {
        return Err(LedgerError::DeadlineExceeded);
    }
    tokio::time::timeout(deadline.remaining(), work)
        .await
        .map_err(|_| LedgerError::DeadlineExceeded)?
}

async fn lock_pair(
    tx: &mut Transaction<'_, Postgres>,
    user_id: &UserId,
    event_id: &EventId,
) -> Result<(), LedgerError> {
    let user = sqlx::query("SELECT id FROM users WHERE id = $1 FOR UPDATE")
        .bind(user_id.as_str())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| step_failed(store_error(e)))?;
    if user.is_none() {
        return Err(LedgerError::Missing(Entity::User(user_id.clone())));
    }

    let event = sqlx::query("SELECT id FROM events WHERE id = $1 FOR SHARE")
        .bind(event_id.as_str())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| step_failed(store_error(e)))?;
    if event.is_none() {
        return Err(LedgerError::Missing(Entity::Event(event_id.clone())));
    }
    Ok(())
}

async fn post_state(
    tx: &mut Transaction<'_, Postgres>,
    user_id: &UserId,
    event_id: &EventId,
    changed: bool,
) -> Result<MembershipChange, LedgerError> {
    let user = rows::load_user(&mut **tx, user_id)
        .await
        .map_err(step_failed)?
        .ok_or_else(|| LedgerError::Missing(Entity::User(user_id.clone())))?;
    let event = rows::load_event(&mut **tx, event_id)
        .await
        .map_err(step_failed)?
        .ok_or_else(|| LedgerError::Missing(Entity::Event(event_id.clone())))?;
    Ok(MembershipChange {
        user,
        event,
        changed,
    })
}

fn step_failed(err: StoreError) -> LedgerError {
    match err {
        StoreError::Missing(entity) => LedgerError::Missing(entity),
        other => LedgerError::RolledBack(other),
    }
}

fn record(operation: &'static str, result: &Result<MembershipChange, LedgerError>, start: Instant) {
    let outcome = match result {
        Ok(change) if change.changed => "committed",
        Ok(_) => "unchanged",
        Err(LedgerError::AlreadyMember { .. }) => "already_member",
        Err(LedgerError::Missing(_)) => "missing",
        Err(LedgerError::DeadlineExceeded) => "deadline_exceeded",
        Err(LedgerError::RolledBack(_) | LedgerError::CompensationFailed { .. }) => "rolled_back",
    };
    metrics::counter!(
        "registration_ledger_transactions_total",
        "operation" => operation,
        "outcome" => outcome
    )
    .increment(1);
    metrics::histogram!("registration_ledger_transaction_duration_seconds", "operation" => operation)
        .record(start.elapsed().as_secs_f64());

    if let Err(err) = result {
        tracing::debug!(operation, error = %err, "Membership transaction rolled back");
    }
}

impl MembershipLedger for PostgresLedger {
    fn enroll(
        &self,
        event_id: EventId,
        registration: Registration,
        deadline: Deadline,
    ) -> LedgerFuture<'_, MembershipChange> {
        Box::pin(self.run_enroll(event_id, registration, deadline))
    }

    fn withdraw(
        &self,
        user_id: UserId,
        event_id: EventId,
        deadline: Deadline,
    ) -> LedgerFuture<'_, MembershipChange> {
        Box::pin(self.run_withdraw(user_id, event_id, deadline))
    }
}
