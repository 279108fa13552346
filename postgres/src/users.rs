//! User documents: one `users` row plus a `user_events` row per membership.

use crate::rows::{self, store_error, store_error_or_missing};
use clubhouse_core::error::{Entity, StoreError};
use clubhouse_core::ids::{EventId, UserId};
use clubhouse_core::model::User;
use clubhouse_core::store::{StoreFuture, UserStore};
use sqlx::PgPool;

/// `PostgreSQL`-backed [`UserStore`].
#[derive(Clone, Debug)]
pub struct PostgresUserStore {
    pool: PgPool,
}

impl PostgresUserStore {
    /// Create a store over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load(&self, user_id: &UserId) -> Result<Option<User>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(store_error)?;
        rows::load_user(&mut conn, user_id).await
    }

    async fn upsert(&self, user: &User) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(store_error)?;

        sqlx::query(
            r"
            INSERT INTO users (id, profile_image)
            VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE SET profile_image = EXCLUDED.profile_image
            ",
        )
        .bind(user.id.as_str())
        .bind(user.profile_image.as_deref())
        .execute(&mut *tx)
        .await
        .map_err(store_error)?;

        sqlx::query("DELETE FROM user_events WHERE user_id = $1")
            .bind(user.id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(store_error)?;

        for event_id in &user.events {
            sqlx::query("INSERT INTO user_events (user_id, event_id) VALUES ($1, $2)")
                .bind(user.id.as_str())
                .bind(event_id.as_str())
                .execute(&mut *tx)
                .await
                .map_err(store_error)?;
        }

        tx.commit().await.map_err(store_error)
    }

    async fn insert_membership(&self, user_id: &UserId, event_id: &EventId) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r"
            INSERT INTO user_events (user_id, event_id)
            VALUES ($1, $2)
            ON CONFLICT (user_id, event_id) DO NOTHING
            ",
        )
        .bind(user_id.as_str())
        .bind(event_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| store_error_or_missing(e, Entity::User(user_id.clone())))?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_membership(&self, user_id: &UserId, event_id: &EventId) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await.map_err(store_error)?;
        if !rows::user_exists(&mut tx, user_id).await? {
            return Err(StoreError::Missing(Entity::User(user_id.clone())));
        }
        let result = sqlx::query("DELETE FROM user_events WHERE user_id = $1 AND event_id = $2")
            .bind(user_id.as_str())
            .bind(event_id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(store_error)?;
        tx.commit().await.map_err(store_error)?;
        Ok(result.rows_affected() == 1)
    }
}

impl UserStore for PostgresUserStore {
    fn get(&self, user_id: UserId) -> StoreFuture<'_, Option<User>> {
        Box::pin(async move { self.load(&user_id).await })
    }

    fn save(&self, user: User) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.upsert(&user).await })
    }

    fn add_event(&self, user_id: UserId, event_id: EventId) -> StoreFuture<'_, bool> {
        Box::pin(async move { self.insert_membership(&user_id, &event_id).await })
    }

    fn remove_event(&self, user_id: UserId, event_id: EventId) -> StoreFuture<'_, bool> {
        Box::pin(async move { self.delete_membership(&user_id, &event_id).await })
    }
}
