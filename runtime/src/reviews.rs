//! Comment and star-rating ledger for events.
//!
//! Comments live inside the event document and never touch membership.
//! Only the author may delete a comment.

use crate::coordinator::outcome_label;
use crate::metrics::CommentMetrics;
use clubhouse_core::environment::{Clock, IdGenerator};
use clubhouse_core::error::{Entity, RegistrationError};
use clubhouse_core::ids::{CommentId, EventId, UserId};
use clubhouse_core::model::{Comment, Rating};
use clubhouse_core::store::EventStore;
use std::sync::Arc;

/// A review as submitted by a user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewComment {
    /// Who is writing
    pub author: UserId,
    /// Name shown next to the comment
    pub display_name: String,
    /// Stars, validated to `1..=5`
    pub rating: u8,
    /// Free text
    pub text: String,
}

impl NewComment {
    fn validate(&self) -> Result<Rating, RegistrationError> {
        if self.author.is_blank() {
            return Err(RegistrationError::ValidationFailed(
                "Invalid user id: cannot be empty".to_string(),
            ));
        }
        if self.display_name.trim().is_empty() {
            return Err(RegistrationError::ValidationFailed(
                "Missing display name".to_string(),
            ));
        }
        if self.text.trim().is_empty() {
            return Err(RegistrationError::ValidationFailed(
                "Missing comment text".to_string(),
            ));
        }
        Rating::new(self.rating)
    }
}

/// Appends and removes event comments.
pub struct CommentLedger {
    events: Arc<dyn EventStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl CommentLedger {
    /// Create a ledger over the event store.
    #[must_use]
    pub fn new(events: Arc<dyn EventStore>, clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self { events, clock, ids }
    }

    /// Append a comment and return the event's full comment list.
    ///
    /// # Errors
    ///
    /// - `ValidationFailed` for a rating outside `1..=5` or blank fields
    /// - `NotFound` if the event does not exist
    #[tracing::instrument(skip_all, fields(event_id = %event_id, author = %comment.author))]
    pub async fn add_comment(
        &self,
        event_id: &EventId,
        comment: NewComment,
    ) -> Result<Vec<Comment>, RegistrationError> {
        let result = self.try_add(event_id, comment).await;
        CommentMetrics::record("add", outcome_label(&result));
        result
    }

    /// Remove a comment written by `caller`.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the event or the comment does not exist
    /// - `Forbidden` if `caller` is not the author
    #[tracing::instrument(skip_all, fields(event_id = %event_id, comment_id = %comment_id))]
    pub async fn delete_comment(
        &self,
        event_id: &EventId,
        comment_id: &CommentId,
        caller: &UserId,
    ) -> Result<Vec<Comment>, RegistrationError> {
        let result = self.try_delete(event_id, comment_id, caller).await;
        CommentMetrics::record("delete", outcome_label(&result));
        result
    }

    async fn try_add(
        &self,
        event_id: &EventId,
        comment: NewComment,
    ) -> Result<Vec<Comment>, RegistrationError> {
        let rating = comment.validate()?;
        let comment = Comment {
            id: self.ids.comment_id(),
            author: comment.author,
            display_name: comment.display_name.trim().to_string(),
            rating,
            text: comment.text.trim().to_string(),
            created_at: self.clock.now(),
        };
        let comment_id = comment.id.clone();
        let comments = self.events.append_comment(event_id.clone(), comment).await?;
        tracing::info!(comment_id = %comment_id, "Comment added");
        Ok(comments)
    }

    async fn try_delete(
        &self,
        event_id: &EventId,
        comment_id: &CommentId,
        caller: &UserId,
    ) -> Result<Vec<Comment>, RegistrationError> {
        let event = self
            .events
            .get(event_id.clone())
            .await?
            .ok_or_else(|| RegistrationError::NotFound(Entity::Event(event_id.clone())))?;
        let comment = event
            .comment(comment_id)
            .ok_or_else(|| RegistrationError::NotFound(Entity::Comment(comment_id.clone())))?;
        if &comment.author != caller {
            tracing::warn!(caller = %caller, "Comment deletion by non-author refused");
            return Err(RegistrationError::Forbidden(format!(
                "only the author may delete comment {comment_id}"
            )));
        }
        let comments = self
            .events
            .remove_comment(event_id.clone(), comment_id.clone())
            .await?;
        tracing::info!("Comment deleted");
        Ok(comments)
    }
}
