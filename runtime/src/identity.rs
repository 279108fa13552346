//! Caller resolution at the service boundary.

use clubhouse_core::error::RegistrationError;
use clubhouse_core::ids::UserId;
use clubhouse_core::store::{Credentials, IdentityProvider};

/// Resolve the verified caller behind `credentials`.
///
/// # Errors
///
/// - `Forbidden` when the credentials do not identify a user
/// - `StorageConflict` when the identity provider itself fails
pub async fn authenticated_user(
    identity: &dyn IdentityProvider,
    credentials: &Credentials,
) -> Result<UserId, RegistrationError> {
    identity.current_user(credentials).await?.ok_or_else(|| {
        tracing::debug!("Rejected unauthenticated caller");
        RegistrationError::Forbidden("authentication required".to_string())
    })
}
