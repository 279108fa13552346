//! Event documents: the `events` row with its registrations and comments.

use crate::rows::{self, store_error};
use clubhouse_core::error::{Entity, StoreError};
use clubhouse_core::ids::{CommentId, EventId, UserId};
use clubhouse_core::model::{Comment, Event, Registration};
use clubhouse_core::store::{EventStore, StoreFuture};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};

/// `PostgreSQL`-backed [`EventStore`].
#[derive(Clone, Debug)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    /// Create a store over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load(&self, event_id: &EventId) -> Result<Option<Event>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(store_error)?;
        rows::load_event(&mut conn, event_id).await
    }

    async fn upsert(&self, event: &Event) -> Result<(), StoreError> {
        let team_size = i32::try_from(event.capacity.team_size)
            .map_err(|e| StoreError::Backend(format!("Team size out of range: {e}")))?;
        let amount = i64::try_from(event.pricing.amount.cents())
            .map_err(|e| StoreError::Backend(format!("Amount out of range: {e}")))?;

        let mut tx = self.pool.begin().await.map_err(store_error)?;
        sqlx::query(
            r"
            INSERT INTO events (id, title, is_team_event, team_size, is_paid, amount_cents)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                title = EXCLUDED.title,
                is_team_event = EXCLUDED.is_team_event,
                team_size = EXCLUDED.team_size,
                is_paid = EXCLUDED.is_paid,
                amount_cents = EXCLUDED.amount_cents
            ",
        )
        .bind(event.id.as_str())
        .bind(&event.title)
        .bind(event.capacity.is_team_event)
        .bind(team_size)
        .bind(event.pricing.is_paid)
        .bind(amount)
        .execute(&mut *tx)
        .await
        .map_err(store_error)?;

        replace_children(&mut tx, event).await?;
        tx.commit().await.map_err(store_error)
    }

    async fn remove(&self, event_id: &EventId) -> Result<Option<Event>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(store_error)?;
        let Some(event) = rows::load_event(&mut tx, event_id).await? else {
            return Ok(None);
        };
        sqlx::query("DELETE FROM events WHERE id = $1")
            .bind(event_id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(store_error)?;
        tx.commit().await.map_err(store_error)?;
        Ok(Some(event))
    }

    async fn insert(&self, event_id: &EventId, registration: &Registration) -> Result<bool, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(store_error)?;
        rows::insert_registration(&mut conn, event_id, registration).await
    }

    async fn take(&self, event_id: &EventId, lead: &UserId) -> Result<Option<Registration>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(store_error)?;
        if !rows::event_exists(&mut tx, event_id).await? {
            return Err(StoreError::Missing(Entity::Event(event_id.clone())));
        }
        let removed = sqlx::query(
            r"
            DELETE FROM registrations
            WHERE event_id = $1 AND lead_id = $2
            RETURNING lead_id, lead_snapshot, team, registered_at
            ",
        )
        .bind(event_id.as_str())
        .bind(lead.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(store_error)?;
        let registration = removed.as_ref().map(rows::row_to_registration).transpose()?;
        tx.commit().await.map_err(store_error)?;
        Ok(registration)
    }

    async fn comment(&self, event_id: &EventId, comment: &Comment) -> Result<Vec<Comment>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(store_error)?;
        rows::insert_comment(&mut tx, event_id, comment).await?;
        let comments = rows::load_comments(&mut tx, event_id).await?;
        tx.commit().await.map_err(store_error)?;
        Ok(comments)
    }

    async fn uncomment(&self, event_id: &EventId, comment_id: &CommentId) -> Result<Vec<Comment>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(store_error)?;
        if !rows::event_exists(&mut tx, event_id).await? {
            return Err(StoreError::Missing(Entity::Event(event_id.clone())));
        }
        let result = sqlx::query("DELETE FROM comments WHERE event_id = $1 AND id = $2")
            .bind(event_id.as_str())
            .bind(comment_id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(store_error)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Missing(Entity::Comment(comment_id.clone())));
        }
        let comments = rows::load_comments(&mut tx, event_id).await?;
        tx.commit().await.map_err(store_error)?;
        Ok(comments)
    }
}

/// Rewrite registrations and comments to match `event`, preserving order.
async fn replace_children(conn: &mut PgConnection, event: &Event) -> Result<(), StoreError> {
    for delete in [
        "DELETE FROM registrations WHERE event_id = $1",
        "DELETE FROM comments WHERE event_id = $1",
    ] {
        sqlx::query(delete)
            .bind(event.id.as_str())
            .execute(&mut *conn)
            .await
            .map_err(store_error)?;
    }
    for registration in &event.participants {
        sqlx::query(
            r"
            INSERT INTO registrations (event_id, lead_id, lead_snapshot, team, registered_at)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(event.id.as_str())
        .bind(registration.lead.as_str())
        .bind(Json(&registration.lead_snapshot))
        .bind(registration.team.as_ref().map(Json))
        .bind(registration.registered_at)
        .execute(&mut *conn)
        .await
        .map_err(store_error)?;
    }
    for comment in &event.ratings {
        rows::insert_comment(conn, &event.id, comment).await?;
    }
    Ok(())
}

impl EventStore for PostgresEventStore {
    fn get(&self, event_id: EventId) -> StoreFuture<'_, Option<Event>> {
        Box::pin(async move { self.load(&event_id).await })
    }

    fn save(&self, event: Event) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.upsert(&event).await })
    }

    fn delete(&self, event_id: EventId) -> StoreFuture<'_, Option<Event>> {
        Box::pin(async move { self.remove(&event_id).await })
    }

    fn insert_participant(
        &self,
        event_id: EventId,
        registration: Registration,
    ) -> StoreFuture<'_, bool> {
        Box::pin(async move { self.insert(&event_id, &registration).await })
    }

    fn remove_participant(
        &self,
        event_id: EventId,
        lead: UserId,
    ) -> StoreFuture<'_, Option<Registration>> {
        Box::pin(async move { self.take(&event_id, &lead).await })
    }

    fn append_comment(&self, event_id: EventId, comment: Comment) -> StoreFuture<'_, Vec<Comment>> {
        Box::pin(async move { self.comment(&event_id, &comment).await })
    }

    fn remove_comment(
        &self,
        event_id: EventId,
        comment_id: CommentId,
    ) -> StoreFuture<'_, Vec<Comment>> {
        Box::pin(async move { self.uncomment(&event_id, &comment_id).await })
    }
}
