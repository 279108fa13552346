//! Row loaders and error mapping shared by the stores and the ledger.

use clubhouse_core::error::{Entity, StoreError};
use clubhouse_core::ids::{CommentId, EventId, UserId};
use clubhouse_core::model::{
    CapacityPolicy, Comment, Event, LeadSnapshot, Money, Pricing, Rating, Registration, Team,
    User,
};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgConnection, Row};

const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const LOCK_NOT_AVAILABLE: &str = "55P03";
const QUERY_CANCELED: &str = "57014";
const FOREIGN_KEY_VIOLATION: &str = "23503";

/// Classify a sqlx error as transient or permanent.
pub(crate) fn store_error(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some(SERIALIZATION_FAILURE | DEADLOCK_DETECTED) => StoreError::Conflict(err.to_string()),
            Some(LOCK_NOT_AVAILABLE | QUERY_CANCELED) => StoreError::Unavailable(err.to_string()),
            _ => StoreError::Backend(err.to_string()),
        },
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(err.to_string())
        }
        _ => StoreError::Backend(err.to_string()),
    }
}

/// Like [`store_error`], but a foreign-key violation means `missing` is gone.
pub(crate) fn store_error_or_missing(err: sqlx::Error, missing: Entity) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.code().as_deref() == Some(FOREIGN_KEY_VIOLATION) {
            return StoreError::Missing(missing);
        }
    }
    store_error(err)
}

fn decode_error(what: &str, err: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(format!("Invalid stored {what}: {err}"))
}

pub(crate) async fn user_exists(conn: &mut PgConnection, user_id: &UserId) -> Result<bool, StoreError> {
    let row = sqlx::query("SELECT 1 FROM users WHERE id = $1")
        .bind(user_id.as_str())
        .fetch_optional(&mut *conn)
        .await
        .map_err(store_error)?;
    Ok(row.is_some())
}

pub(crate) async fn event_exists(
    conn: &mut PgConnection,
    event_id: &EventId,
) -> Result<bool, StoreError> {
    let row = sqlx::query("SELECT 1 FROM events WHERE id = $1")
        .bind(event_id.as_str())
        .fetch_optional(&mut *conn)
        .await
        .map_err(store_error)?;
    Ok(row.is_some())
}

pub(crate) async fn load_user(
    conn: &mut PgConnection,
    user_id: &UserId,
) -> Result<Option<User>, StoreError> {
    let Some(row) = sqlx::query("SELECT id, profile_image FROM users WHERE id = $1")
        .bind(user_id.as_str())
        .fetch_optional(&mut *conn)
        .await
        .map_err(store_error)?
    else {
        return Ok(None);
    };

    let mut user = User::new(
        UserId::new(row.get::<String, _>("id")),
        row.get("profile_image"),
    );
    let events = sqlx::query("SELECT event_id FROM user_events WHERE user_id = $1")
        .bind(user_id.as_str())
        .fetch_all(&mut *conn)
        .await
        .map_err(store_error)?;
    user.events = events
        .iter()
        .map(|r| EventId::new(r.get::<String, _>("event_id")))
        .collect();
    Ok(Some(user))
}

pub(crate) async fn load_event(
    conn: &mut PgConnection,
    event_id: &EventId,
) -> Result<Option<Event>, StoreError> {
    let Some(row) = sqlx::query(
        r"
        SELECT id, title, is_team_event, team_size, is_paid, amount_cents
        FROM events
        WHERE id = $1
        ",
    )
    .bind(event_id.as_str())
    .fetch_optional(&mut *conn)
    .await
    .map_err(store_error)?
    else {
        return Ok(None);
    };

    let team_size: i32 = row.get("team_size");
    let amount: i64 = row.get("amount_cents");
    let mut event = Event::new(
        EventId::new(row.get::<String, _>("id")),
        row.get::<String, _>("title"),
        CapacityPolicy {
            is_team_event: row.get("is_team_event"),
            team_size: u32::try_from(team_size).map_err(|e| decode_error("team size", e))?,
        },
        Pricing {
            is_paid: row.get("is_paid"),
            amount: Money::from_cents(u64::try_from(amount).map_err(|e| decode_error("amount", e))?),
        },
    );

    let registrations = sqlx::query(
        r"
        SELECT lead_id, lead_snapshot, team, registered_at
        FROM registrations
        WHERE event_id = $1
        ORDER BY position ASC
        ",
    )
    .bind(event_id.as_str())
    .fetch_all(&mut *conn)
    .await
    .map_err(store_error)?;
    event.participants = registrations
        .iter()
        .map(row_to_registration)
        .collect::<Result<_, _>>()?;

    event.ratings = load_comments(conn, event_id).await?;
    Ok(Some(event))
}

pub(crate) async fn load_comments(
    conn: &mut PgConnection,
    event_id: &EventId,
) -> Result<Vec<Comment>, StoreError> {
    let rows = sqlx::query(
        r"
        SELECT id, author_id, display_name, rating, body, created_at
        FROM comments
        WHERE event_id = $1
        ORDER BY position ASC
        ",
    )
    .bind(event_id.as_str())
    .fetch_all(&mut *conn)
    .await
    .map_err(store_error)?;
    rows.iter().map(row_to_comment).collect()
}

pub(crate) fn row_to_registration(row: &PgRow) -> Result<Registration, StoreError> {
    let snapshot: Json<LeadSnapshot> = row
        .try_get("lead_snapshot")
        .map_err(|e| decode_error("lead snapshot", e))?;
    let team: Option<Json<Team>> = row.try_get("team").map_err(|e| decode_error("team", e))?;
    Ok(Registration {
        lead: UserId::new(row.get::<String, _>("lead_id")),
        lead_snapshot: snapshot.0,
        team: team.map(|t| t.0),
        registered_at: row.get("registered_at"),
    })
}

fn row_to_comment(row: &PgRow) -> Result<Comment, StoreError> {
    let raw: i16 = row.get("rating");
    let rating = u8::try_from(raw)
        .map_err(|e| decode_error("rating", e))
        .and_then(|r| Rating::new(r).map_err(|e| decode_error("rating", e)))?;
    Ok(Comment {
        id: CommentId::new(row.get::<String, _>("id")),
        author: UserId::new(row.get::<String, _>("author_id")),
        display_name: row.get("display_name"),
        rating,
        text: row.get("body"),
        created_at: row.get("created_at"),
    })
}

pub(crate) async fn insert_registration(
    conn: &mut PgConnection,
    event_id: &EventId,
    registration: &Registration,
) -> Result<bool, StoreError> {
    let result = sqlx::query(
        r"
        INSERT INTO registrations (event_id, lead_id, lead_snapshot, team, registered_at)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (event_id, lead_id) DO NOTHING
        ",
    )
    .bind(event_id.as_str())
    .bind(registration.lead.as_str())
    .bind(Json(&registration.lead_snapshot))
    .bind(registration.team.as_ref().map(Json))
    .bind(registration.registered_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| store_error_or_missing(e, Entity::Event(event_id.clone())))?;
    Ok(result.rows_affected() == 1)
}

pub(crate) async fn insert_comment(
    conn: &mut PgConnection,
    event_id: &EventId,
    comment: &Comment,
) -> Result<(), StoreError> {
    sqlx::query(
        r"
        INSERT INTO comments (id, event_id, author_id, display_name, rating, body, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ",
    )
    .bind(comment.id.as_str())
    .bind(event_id.as_str())
    .bind(comment.author.as_str())
    .bind(&comment.display_name)
    .bind(i16::from(comment.rating.value()))
    .bind(&comment.text)
    .bind(comment.created_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| store_error_or_missing(e, Entity::Event(event_id.clone())))?;
    Ok(())
}
