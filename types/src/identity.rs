use serde::{Deserialize, Serialize};

/// How long a verified identity session stays valid (7 days).
pub const SESSION_TTL_MS: u64 = 7 * 24 * 60 * 60 * 1000;

/// A successful one-person-one-identity proof, bound to a session token.
///
/// At most one non-expired record exists per `nullifier_hash` and per
/// `session_token`. Immutable after creation except for the wallet, which
/// can be attached later.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityVerification {
    pub nullifier_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<String>,
    pub user_id: String,
    pub session_token: String,
    pub created_at: u64,
    pub expires_at: u64,
}

impl IdentityVerification {
    pub fn new(
        nullifier_hash: String,
        wallet_address: Option<String>,
        user_id: String,
        session_token: String,
        created_at: u64,
    ) -> Self {
        Self {
            nullifier_hash,
            wallet_address,
            user_id,
            session_token,
            created_at,
            expires_at: created_at.saturating_add(SESSION_TTL_MS),
        }
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at
    }
}
