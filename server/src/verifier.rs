//! Boundary to the external identity-proof verifier.
//!
//! The proof cryptography is opaque to this service: we forward the proof
//! payload and get back accept/reject plus the user-scoped nullifier. On
//! accept, a session is minted and the verification record upserted so that
//! at most one live record exists per nullifier.

use crate::store::{hash_field, Store, StoreError};
use arena_types::api::VerifyRequest;
use arena_types::IdentityVerification;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;
use url::Url;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("invalid verification payload")]
    InvalidPayload { fields: Vec<String> },
    #[error("identity proof rejected: {0}")]
    Rejected(String),
    #[error("identity verifier unavailable")]
    Upstream(#[source] anyhow::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct VerifierClient {
    http: reqwest::Client,
    base_url: Url,
    app_id: String,
}

#[derive(Deserialize)]
struct VerifierResponse {
    success: bool,
    #[serde(default)]
    code: Option<String>,
}

impl VerifierClient {
    pub fn new(base_url: &str, app_id: String) -> Result<Self, url::ParseError> {
        Ok(Self {
            http: reqwest::Client::new(),
            base_url: Url::parse(base_url)?,
            app_id,
        })
    }

    /// Submits the opaque proof for verification. Returns the proof's
    /// nullifier hash on accept.
    async fn check_proof(&self, proof: &serde_json::Value) -> Result<String, VerifyError> {
        let nullifier_hash = proof
            .get("nullifier_hash")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| VerifyError::InvalidPayload {
                fields: vec!["proof.nullifier_hash is required".into()],
            })?;

        let url = self
            .base_url
            .join(&format!("verify/{}", self.app_id))
            .map_err(|err| VerifyError::Upstream(err.into()))?;
        let response = self
            .http
            .post(url)
            .json(proof)
            .send()
            .await
            .map_err(|err| VerifyError::Upstream(err.into()))?;

        let status = response.status();
        if status.is_success() {
            let body: VerifierResponse = response
                .json()
                .await
                .map_err(|err| VerifyError::Upstream(err.into()))?;
            if body.success {
                return Ok(nullifier_hash);
            }
            return Err(VerifyError::Rejected(
                body.code.unwrap_or_else(|| "verification_failed".into()),
            ));
        }
        if status.is_client_error() {
            let body: Result<VerifierResponse, _> = response.json().await;
            let code = body
                .ok()
                .and_then(|b| b.code)
                .unwrap_or_else(|| "invalid_proof".into());
            return Err(VerifyError::Rejected(code));
        }
        Err(VerifyError::Upstream(anyhow::anyhow!(
            "verifier returned {status}"
        )))
    }
}

/// Verifies a proof and establishes a session. For an already-known
/// nullifier the existing record is refreshed in place, preserving the
/// one-live-record-per-nullifier invariant.
pub async fn verify_and_create_session(
    store: &Store,
    verifier: &VerifierClient,
    request: VerifyRequest,
) -> Result<IdentityVerification, VerifyError> {
    let mut missing = Vec::new();
    let proof = match request.proof {
        Some(proof) => proof,
        None => {
            missing.push("proof is required".to_string());
            serde_json::Value::Null
        }
    };
    let user_id = crate::require_field(request.user_id, "userId", &mut missing);
    if !missing.is_empty() {
        return Err(VerifyError::InvalidPayload { fields: missing });
    }

    let nullifier_hash = verifier.check_proof(&proof).await?;

    let now = crate::now_ms();
    let session_token = Uuid::new_v4().to_string();
    let verification = IdentityVerification::new(
        nullifier_hash.clone(),
        request.wallet_address.clone(),
        user_id,
        session_token,
        now,
    );

    let stored = store
        .with_lock::<_, VerifyError>({
            let verification = verification.clone();
            move |data| {
                data.verifications
                    .retain(|v| v.nullifier_hash != verification.nullifier_hash);
                data.verifications.push(verification.clone());
                Ok(verification)
            }
        })
        .await?;

    store
        .audit()
        .record(
            "identity_verified",
            serde_json::json!({
                "nullifier": hash_field(&stored.nullifier_hash),
                "user": hash_field(&stored.user_id),
            }),
        )
        .await;
    info!(
        nullifier = %hash_field(&stored.nullifier_hash),
        "identity verified, session created"
    );
    Ok(stored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LockConfig;
    use axum::{http::StatusCode, response::IntoResponse, routing::post, Json, Router};
    use std::net::SocketAddr;
    use tempfile::TempDir;

    async fn serve_verifier(accept: bool) -> (String, tokio::task::JoinHandle<()>) {
        let router = Router::new().route(
            "/verify/:app_id",
            post(move |Json(_proof): Json<serde_json::Value>| async move {
                if accept {
                    Json(serde_json::json!({"success": true})).into_response()
                } else {
                    (
                        StatusCode::BAD_REQUEST,
                        Json(serde_json::json!({"success": false, "code": "max_verifications_reached"})),
                    )
                        .into_response()
                }
            }),
        );
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            axum::serve(listener, router.into_make_service())
                .await
                .unwrap();
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        (base_url, handle)
    }

    fn store_in(dir: &TempDir) -> Store {
        Store::open(
            dir.path().join("store.json"),
            dir.path().join("audit.log"),
            LockConfig::default(),
        )
    }

    fn request(nullifier: &str, user_id: &str) -> VerifyRequest {
        VerifyRequest {
            proof: Some(serde_json::json!({
                "nullifier_hash": nullifier,
                "merkle_root": "0xroot",
                "proof": "0xproof",
            })),
            user_id: Some(user_id.to_string()),
            wallet_address: Some("0xwallet".to_string()),
        }
    }

    #[tokio::test]
    async fn accepted_proof_creates_session() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let (base_url, handle) = serve_verifier(true).await;
        let verifier = VerifierClient::new(&base_url, "app_1".into()).unwrap();

        let verification =
            verify_and_create_session(&store, &verifier, request("0xnull-1", "user-1"))
                .await
                .unwrap();
        assert_eq!(verification.nullifier_hash, "0xnull-1");
        assert!(!verification.session_token.is_empty());

        let data = store.snapshot().await.unwrap();
        assert_eq!(data.verifications.len(), 1);
        handle.abort();
    }

    #[tokio::test]
    async fn reverifying_same_nullifier_keeps_one_live_record() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let (base_url, handle) = serve_verifier(true).await;
        let verifier = VerifierClient::new(&base_url, "app_1".into()).unwrap();

        let first = verify_and_create_session(&store, &verifier, request("0xnull-1", "user-1"))
            .await
            .unwrap();
        let second = verify_and_create_session(&store, &verifier, request("0xnull-1", "user-1"))
            .await
            .unwrap();
        assert_ne!(first.session_token, second.session_token);

        let data = store.snapshot().await.unwrap();
        assert_eq!(data.verifications.len(), 1);
        assert_eq!(data.verifications[0].session_token, second.session_token);
        handle.abort();
    }

    #[tokio::test]
    async fn rejected_proof_creates_nothing() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let (base_url, handle) = serve_verifier(false).await;
        let verifier = VerifierClient::new(&base_url, "app_1".into()).unwrap();

        let err = verify_and_create_session(&store, &verifier, request("0xnull-1", "user-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::Rejected(code) if code == "max_verifications_reached"));
        assert!(store.snapshot().await.unwrap().verifications.is_empty());
        handle.abort();
    }

    #[tokio::test]
    async fn missing_fields_are_itemized() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let verifier = VerifierClient::new("http://localhost:1", "app_1".into()).unwrap();

        let err = verify_and_create_session(
            &store,
            &verifier,
            VerifyRequest {
                proof: None,
                user_id: None,
                wallet_address: None,
            },
        )
        .await
        .unwrap_err();
        let VerifyError::InvalidPayload { fields } = err else {
            panic!("expected InvalidPayload");
        };
        assert_eq!(fields.len(), 2);
    }
}
