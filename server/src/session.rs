//! Session guard: resolves a session cookie to a verified identity.

use crate::store::{hash_field, Store, StoreError};
use arena_types::IdentityVerification;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session required")]
    SessionRequired,
    #[error("session invalid or expired")]
    SessionInvalid,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SessionError {
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::SessionRequired => arena_types::api::codes::SESSION_REQUIRED,
            SessionError::SessionInvalid => arena_types::api::codes::SESSION_INVALID,
            SessionError::Store(_) => arena_types::api::codes::INTERNAL_ERROR,
        }
    }
}

/// Resolves `session_token` to a non-expired identity verification. Both
/// failure paths emit an audit event with the action name and hashed
/// context; no raw token reaches the log.
pub async fn require_active_session(
    store: &Store,
    session_token: Option<&str>,
    action: &str,
) -> Result<IdentityVerification, SessionError> {
    let Some(token) = session_token.filter(|t| !t.is_empty()) else {
        store
            .audit()
            .record(
                action,
                serde_json::json!({ "outcome": "session_required" }),
            )
            .await;
        return Err(SessionError::SessionRequired);
    };

    let data = store.snapshot().await?;
    match data.verification_by_session(token, crate::now_ms()) {
        Some(verification) => Ok(verification.clone()),
        None => {
            store
                .audit()
                .record(
                    action,
                    serde_json::json!({
                        "outcome": "session_invalid",
                        "session": hash_field(token),
                    }),
                )
                .await;
            Err(SessionError::SessionInvalid)
        }
    }
}
