//! Payment lifecycle manager.
//!
//! Owns the `pending → confirmed | failed` state machine. Initiation is
//! idempotent on the client-supplied reference; confirmation reconciles the
//! local record against the processor's authoritative transaction status.
//! Terminal states never transition again, and a re-confirm of an
//! already-confirmed payment short-circuits without re-invoking the
//! processor or re-running side effects.

use crate::processor::{ProcessorClient, ProcessorError};
use crate::store::{hash_field, Store, StoreData, StoreError};
use arena_types::api::{
    codes, ConfirmPaymentRequest, ConfirmPaymentResponse, InitiatePaymentRequest,
    InitiatePaymentResponse, ProcessorPayload,
};
use arena_types::{token, IdentityVerification, PaymentKind, PaymentRecord, PaymentStatus,
    PaymentStatusHistoryRecord};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("invalid payload: {}", fields.join("; "))]
    InvalidPayload { fields: Vec<String> },
    #[error("payment reference not found")]
    ReferenceNotFound,
    #[error("reference already in use")]
    ReferenceConflict,
    #[error("session does not match this payment")]
    SessionInvalid,
    #[error("wallet does not match this payment")]
    WalletMismatch,
    #[error("identity does not match this payment")]
    IdentityMismatch,
    #[error("transaction does not correspond to this payment")]
    TransactionInvalid,
    #[error("payment rejected")]
    PaymentRejected,
    #[error("unsupported token: {0}")]
    UnsupportedToken(String),
    #[error("tournament not found: {0}")]
    TournamentNotFound(String),
    #[error("payment processor unavailable")]
    Upstream(#[source] ProcessorError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PaymentError {
    pub fn code(&self) -> &'static str {
        match self {
            PaymentError::InvalidPayload { .. } => codes::INVALID_PAYLOAD,
            PaymentError::ReferenceNotFound => codes::REFERENCE_NOT_FOUND,
            PaymentError::ReferenceConflict => codes::REFERENCE_CONFLICT,
            PaymentError::SessionInvalid => codes::SESSION_INVALID,
            PaymentError::WalletMismatch => codes::WALLET_MISMATCH,
            PaymentError::IdentityMismatch => codes::IDENTITY_MISMATCH,
            PaymentError::TransactionInvalid => codes::TRANSACTION_INVALID,
            PaymentError::PaymentRejected => codes::PAYMENT_REJECTED,
            PaymentError::UnsupportedToken(_) => codes::INVALID_PAYLOAD,
            PaymentError::TournamentNotFound(_) => codes::INVALID_PAYLOAD,
            PaymentError::Upstream(_) => codes::UPSTREAM_ERROR,
            PaymentError::Store(_) => codes::INTERNAL_ERROR,
        }
    }
}

/// Outcome decided by the processor's report, applied under the store lock.
enum ConfirmOutcome {
    Confirmed,
    AlreadyConfirmed,
    Failed(FailureKind),
}

#[derive(Clone, Copy)]
enum FailureKind {
    TransactionInvalid,
    PaymentRejected,
}

impl FailureKind {
    fn reason(&self) -> &'static str {
        match self {
            FailureKind::TransactionInvalid => "transaction does not correspond to this payment",
            FailureKind::PaymentRejected => "processor reported failure",
        }
    }

    fn into_error(self) -> PaymentError {
        match self {
            FailureKind::TransactionInvalid => PaymentError::TransactionInvalid,
            FailureKind::PaymentRejected => PaymentError::PaymentRejected,
        }
    }
}

pub struct PaymentLifecycle {
    store: Arc<Store>,
    processor: ProcessorClient,
    recipient_address: Option<String>,
}

impl PaymentLifecycle {
    pub fn new(
        store: Arc<Store>,
        processor: ProcessorClient,
        recipient_address: Option<String>,
    ) -> Self {
        Self {
            store,
            processor,
            recipient_address,
        }
    }

    /// Creates a pending payment record, or returns the existing one for a
    /// reference this user already initiated. A reference owned by another
    /// user, or one whose payment already failed, conflicts.
    pub async fn initiate(
        &self,
        request: InitiatePaymentRequest,
        identity: &IdentityVerification,
    ) -> Result<InitiatePaymentResponse, PaymentError> {
        let mut fields = Vec::new();
        let reference = crate::require_field(request.reference, "reference", &mut fields);
        let kind_raw = crate::require_field(request.kind, "type", &mut fields);
        let token_identifier = crate::require_field(request.token, "token", &mut fields);
        let amount = crate::require_number(request.amount, "amount", &mut fields);
        let wallet_address =
            crate::require_field(request.wallet_address, "walletAddress", &mut fields);
        let user_id = crate::require_field(request.user_id, "userId", &mut fields);
        if kind_raw == "tournament" && is_blank(&request.tournament_id) {
            fields.push("tournamentId is required for tournament payments".to_string());
        }
        if !fields.is_empty() {
            return Err(PaymentError::InvalidPayload { fields });
        }
        let kind = PaymentKind::parse(&kind_raw).ok_or_else(|| PaymentError::InvalidPayload {
            fields: vec!["type must be quick_match or tournament".to_string()],
        })?;

        if user_id != identity.user_id {
            return Err(PaymentError::IdentityMismatch);
        }
        if let Some(identity_wallet) = identity.wallet_address.as_deref() {
            if !identity_wallet.eq_ignore_ascii_case(&wallet_address) {
                return Err(PaymentError::WalletMismatch);
            }
        }

        let token_address = token::normalize(&token_identifier)
            .map_err(|_| PaymentError::UnsupportedToken(token_identifier.clone()))?;
        let token_amount =
            token::to_base_units(amount, &token_identifier).map_err(|err| match err {
                token::TokenError::UnsupportedToken(t) => PaymentError::UnsupportedToken(t),
                token::TokenError::InvalidAmount(_) => PaymentError::InvalidPayload {
                    fields: vec!["amount must be a finite non-negative number".to_string()],
                },
            })?;

        let now = crate::now_ms();
        let user_hash = hash_field(&identity.user_id);
        let identity = identity.clone();
        let tournament_id = request.tournament_id.clone();
        let recipient_address = self.recipient_address.clone();
        let response = self
            .store
            .with_lock::<_, PaymentError>({
                let reference = reference.clone();
                move |data| {
                    if kind == PaymentKind::Tournament {
                        let id = tournament_id.as_deref().unwrap_or_default();
                        if data.tournament(id).is_none() {
                            return Err(PaymentError::TournamentNotFound(id.to_string()));
                        }
                    }

                    if let Some(existing) = data.payment_by_reference(&reference) {
                        if existing.user_id != identity.user_id {
                            return Err(PaymentError::ReferenceConflict);
                        }
                        if existing.status == PaymentStatus::Failed {
                            // A failed reference is burned; retries need a
                            // fresh one.
                            return Err(PaymentError::ReferenceConflict);
                        }
                        return Ok(InitiatePaymentResponse {
                            success: true,
                            reference: existing.reference.clone(),
                            tournament_id: existing.tournament_id.clone(),
                        });
                    }

                    let record = PaymentRecord {
                        payment_id: Uuid::new_v4().to_string(),
                        user_id: identity.user_id.clone(),
                        tournament_id: tournament_id.clone(),
                        reference: reference.clone(),
                        transaction_id: None,
                        token_address,
                        token_amount,
                        recipient_address,
                        status: PaymentStatus::Pending,
                        kind,
                        wallet_address: Some(wallet_address),
                        nullifier_hash: Some(identity.nullifier_hash.clone()),
                        session_token: Some(identity.session_token.clone()),
                        created_at: now,
                        updated_at: now,
                        confirmed_at: None,
                    };
                    data.payment_history.push(PaymentStatusHistoryRecord {
                        payment_id: record.payment_id.clone(),
                        old_status: None,
                        new_status: PaymentStatus::Pending,
                        changed_at: now,
                        reason: Some("payment initiated".to_string()),
                    });
                    let response = InitiatePaymentResponse {
                        success: true,
                        reference: record.reference.clone(),
                        tournament_id: record.tournament_id.clone(),
                    };
                    data.payments.push(record);
                    Ok(response)
                }
            })
            .await?;

        self.store
            .audit()
            .record(
                "payment_initiated",
                serde_json::json!({
                    "reference": response.reference,
                    "kind": kind.as_str(),
                    "user": user_hash,
                }),
            )
            .await;
        info!(reference = %response.reference, kind = kind.as_str(), "payment initiated");
        Ok(response)
    }

    /// Confirms a pending payment against the processor's authoritative
    /// transaction status. Exactly one `pending → confirmed` transition
    /// happens per reference, no matter how many confirm calls race.
    pub async fn confirm(
        &self,
        request: ConfirmPaymentRequest,
        identity: &IdentityVerification,
    ) -> Result<ConfirmPaymentResponse, PaymentError> {
        let mut fields = Vec::new();
        let reference = crate::require_field(request.reference, "reference", &mut fields);
        let payload = match request.payload {
            Some(payload) => payload,
            None => {
                fields.push("payload is required".to_string());
                ProcessorPayload::default()
            }
        };
        let transaction_id = crate::require_field(
            payload.transaction_id.clone(),
            "payload.transaction_id",
            &mut fields,
        );
        let payload_wallet = crate::require_field(
            payload.wallet_address.clone(),
            "payload.wallet_address",
            &mut fields,
        );
        crate::require_field(payload.token.clone(), "payload.token", &mut fields);
        crate::require_field(
            payload.token_amount.clone(),
            "payload.token_amount",
            &mut fields,
        );
        if !fields.is_empty() {
            return Err(PaymentError::InvalidPayload { fields });
        }

        // Ownership checks run on a snapshot first so an attacker probing
        // someone else's reference never triggers a processor call.
        let snapshot = self.store.snapshot().await?;
        let payment = snapshot
            .payment_by_reference(&reference)
            .ok_or(PaymentError::ReferenceNotFound)?;
        self.check_ownership(payment, identity, &payload_wallet)?;

        match payment.status {
            PaymentStatus::Confirmed => {
                return Ok(ConfirmPaymentResponse {
                    success: true,
                    message: "Pago ya confirmado previamente".to_string(),
                });
            }
            PaymentStatus::Failed => return Err(PaymentError::PaymentRejected),
            PaymentStatus::Pending => {}
        }

        // The client-side payload reporting an error is itself a rejection;
        // the processor is not consulted.
        if payload.status.as_deref() == Some("error") || payload.error_code.is_some() {
            let reason = payload
                .error_code
                .clone()
                .unwrap_or_else(|| "payload carried error status".to_string());
            self.apply_outcome(
                &reference,
                identity,
                ConfirmOutcome::Failed(FailureKind::PaymentRejected),
                None,
                Some(reason),
            )
            .await?;
            return Err(PaymentError::PaymentRejected);
        }

        // Authoritative check, outside the store lock: the processor call
        // can take seconds and must not serialize unrelated mutations.
        let transaction = self
            .processor
            .transaction_status(&transaction_id)
            .await
            .map_err(|err| {
                warn!(reference = %reference, "processor lookup failed: {err}");
                PaymentError::Upstream(err)
            })?;

        let outcome = if transaction.reference.as_deref() != Some(reference.as_str()) {
            ConfirmOutcome::Failed(FailureKind::TransactionInvalid)
        } else if let Some(tx_created) = transaction.created_at_ms() {
            // A transaction minted before the payment record existed cannot
            // belong to it: replayed or cross-wired transaction id.
            if tx_created < payment.created_at {
                ConfirmOutcome::Failed(FailureKind::TransactionInvalid)
            } else if transaction.is_failed() {
                ConfirmOutcome::Failed(FailureKind::PaymentRejected)
            } else {
                ConfirmOutcome::Confirmed
            }
        } else if transaction.is_failed() {
            ConfirmOutcome::Failed(FailureKind::PaymentRejected)
        } else {
            ConfirmOutcome::Confirmed
        };

        let status_reason = match &outcome {
            ConfirmOutcome::Failed(FailureKind::TransactionInvalid) => None,
            _ => transaction
                .transaction_status
                .as_deref()
                .map(|status| format!("processor status {status}")),
        };
        let outcome = self
            .apply_outcome(
                &reference,
                identity,
                outcome,
                Some(transaction_id),
                status_reason,
            )
            .await?;

        match outcome {
            ConfirmOutcome::Confirmed => {
                info!(reference = %reference, "payment confirmed");
                Ok(ConfirmPaymentResponse {
                    success: true,
                    message: "Pago confirmado".to_string(),
                })
            }
            ConfirmOutcome::AlreadyConfirmed => Ok(ConfirmPaymentResponse {
                success: true,
                message: "Pago ya confirmado previamente".to_string(),
            }),
            ConfirmOutcome::Failed(kind) => Err(kind.into_error()),
        }
    }

    fn check_ownership(
        &self,
        payment: &PaymentRecord,
        identity: &IdentityVerification,
        payload_wallet: &str,
    ) -> Result<(), PaymentError> {
        if payment.session_token.as_deref() != Some(identity.session_token.as_str()) {
            return Err(PaymentError::SessionInvalid);
        }
        if payment.user_id != identity.user_id
            || payment.nullifier_hash.as_deref() != Some(identity.nullifier_hash.as_str())
        {
            return Err(PaymentError::IdentityMismatch);
        }
        if let Some(payment_wallet) = payment.wallet_address.as_deref() {
            if !payment_wallet.eq_ignore_ascii_case(payload_wallet) {
                return Err(PaymentError::WalletMismatch);
            }
        }
        Ok(())
    }

    /// Applies a decided outcome under the store lock, re-validating that
    /// the payment is still pending. The loser of a confirm race lands in
    /// the idempotent already-confirmed path here.
    async fn apply_outcome(
        &self,
        reference: &str,
        identity: &IdentityVerification,
        outcome: ConfirmOutcome,
        transaction_id: Option<String>,
        reason: Option<String>,
    ) -> Result<ConfirmOutcome, PaymentError> {
        let now = crate::now_ms();
        let reference_owned = reference.to_string();
        let identity = identity.clone();
        let applied = self
            .store
            .with_lock::<_, PaymentError>(move |data| {
                let payment = data
                    .payment_by_reference_mut(&reference_owned)
                    .ok_or(PaymentError::ReferenceNotFound)?;
                if payment.session_token.as_deref() != Some(identity.session_token.as_str()) {
                    return Err(PaymentError::SessionInvalid);
                }
                match payment.status {
                    PaymentStatus::Confirmed => return Ok(ConfirmOutcome::AlreadyConfirmed),
                    PaymentStatus::Failed => return Err(PaymentError::PaymentRejected),
                    PaymentStatus::Pending => {}
                }

                let (new_status, reason) = match &outcome {
                    ConfirmOutcome::Confirmed => (
                        PaymentStatus::Confirmed,
                        reason.unwrap_or_else(|| "processor confirmed".to_string()),
                    ),
                    ConfirmOutcome::Failed(kind) => (
                        PaymentStatus::Failed,
                        reason.unwrap_or_else(|| kind.reason().to_string()),
                    ),
                    // Callers never pass this in; nothing to apply.
                    ConfirmOutcome::AlreadyConfirmed => {
                        return Ok(ConfirmOutcome::AlreadyConfirmed)
                    }
                };

                let payment_id = payment.payment_id.clone();
                let old_status = payment.status;
                payment.status = new_status;
                payment.updated_at = now;
                if new_status == PaymentStatus::Confirmed {
                    payment.confirmed_at = Some(now);
                    if transaction_id.is_some() {
                        payment.transaction_id = transaction_id.clone();
                    }
                }
                data.payment_history.push(PaymentStatusHistoryRecord {
                    payment_id,
                    old_status: Some(old_status),
                    new_status,
                    changed_at: now,
                    reason: Some(reason),
                });
                Ok(outcome)
            })
            .await?;

        let outcome_name = match &applied {
            ConfirmOutcome::Confirmed => "confirmed",
            ConfirmOutcome::AlreadyConfirmed => "already_confirmed",
            ConfirmOutcome::Failed(_) => "failed",
        };
        self.store
            .audit()
            .record(
                "payment_confirmation",
                serde_json::json!({
                    "reference": reference,
                    "outcome": outcome_name,
                }),
            )
            .await;
        Ok(applied)
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::{ProcessorTransaction, RetryPolicy};
    use crate::store::LockConfig;
    use arena_types::TournamentRecord;
    use axum::{
        extract::{Path, State as AxumState},
        http::StatusCode,
        response::IntoResponse,
        routing::get,
        Json, Router,
    };
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    struct MockProcessor {
        base_url: String,
        calls: Arc<AtomicUsize>,
        handle: tokio::task::JoinHandle<()>,
    }

    impl Drop for MockProcessor {
        fn drop(&mut self) {
            self.handle.abort();
        }
    }

    #[derive(Clone)]
    struct MockState {
        transaction: Arc<ProcessorTransaction>,
        calls: Arc<AtomicUsize>,
        fail_with: Option<StatusCode>,
    }

    async fn mock_processor(
        transaction: ProcessorTransaction,
        fail_with: Option<StatusCode>,
    ) -> MockProcessor {
        let calls = Arc::new(AtomicUsize::new(0));
        let state = MockState {
            transaction: Arc::new(transaction),
            calls: calls.clone(),
            fail_with,
        };
        let router = Router::new()
            .route(
                "/transaction/:id",
                get(
                    |AxumState(state): AxumState<MockState>, Path(_id): Path<String>| async move {
                        state.calls.fetch_add(1, Ordering::SeqCst);
                        match state.fail_with {
                            Some(status) => status.into_response(),
                            None => Json(state.transaction.as_ref().clone()).into_response(),
                        }
                    },
                ),
            )
            .with_state(state);
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            axum::serve(listener, router.into_make_service())
                .await
                .unwrap();
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        MockProcessor {
            base_url,
            calls,
            handle,
        }
    }

    fn identity() -> IdentityVerification {
        IdentityVerification::new(
            "0xnullifier".into(),
            Some("0xwallet".into()),
            "user-1".into(),
            "session-1".into(),
            crate::now_ms(),
        )
    }

    fn other_identity() -> IdentityVerification {
        IdentityVerification::new(
            "0xnullifier-2".into(),
            Some("0xwallet-2".into()),
            "user-2".into(),
            "session-2".into(),
            crate::now_ms(),
        )
    }

    fn tournament() -> TournamentRecord {
        TournamentRecord {
            tournament_id: "t1".into(),
            name: "Weekly".into(),
            buy_in_token: "0x2cfc85d8e48f8eab294be644d9e25c3030863003".into(),
            buy_in_amount: "1000000000000000000".into(),
            prize_pool: "0".into(),
            max_players: 16,
            current_players: 0,
            start_time: 0,
            end_time: u64::MAX,
            prize_distribution: vec![50, 30, 20],
            accepted_tokens: vec!["0x2cfc85d8e48f8eab294be644d9e25c3030863003".into()],
        }
    }

    async fn store_with_tournament(dir: &TempDir) -> Arc<Store> {
        let store = Arc::new(Store::open(
            dir.path().join("store.json"),
            dir.path().join("audit.log"),
            LockConfig {
                retry_base: Duration::from_millis(1),
                ..LockConfig::default()
            },
        ));
        store
            .with_lock::<_, StoreError>(|data| {
                data.tournaments.push(tournament());
                Ok(())
            })
            .await
            .unwrap();
        store
    }

    fn lifecycle(store: Arc<Store>, processor_url: &str) -> PaymentLifecycle {
        let processor = ProcessorClient::new(processor_url, "app_test".into(), None)
            .unwrap()
            .with_retry_policy(RetryPolicy {
                max_attempts: 2,
                initial_backoff: Duration::ZERO,
                max_backoff: Duration::ZERO,
            });
        PaymentLifecycle::new(store, processor, Some("0xtreasury".into()))
    }

    fn initiate_request(reference: &str) -> InitiatePaymentRequest {
        InitiatePaymentRequest {
            reference: Some(reference.into()),
            kind: Some("tournament".into()),
            token: Some("WLD".into()),
            amount: Some(1.0),
            tournament_id: Some("t1".into()),
            wallet_address: Some("0xwallet".into()),
            user_id: Some("user-1".into()),
        }
    }

    fn confirm_request(reference: &str, transaction_id: &str) -> ConfirmPaymentRequest {
        ConfirmPaymentRequest {
            reference: Some(reference.into()),
            payload: Some(ProcessorPayload {
                status: Some("success".into()),
                transaction_id: Some(transaction_id.into()),
                token: Some("WLD".into()),
                token_amount: Some("1000000000000000000".into()),
                wallet_address: Some("0xwallet".into()),
                error_code: None,
            }),
        }
    }

    fn mined_transaction(reference: &str) -> ProcessorTransaction {
        ProcessorTransaction {
            transaction_status: Some("mined".into()),
            reference: Some(reference.into()),
            token: Some("WLD".into()),
            amount: Some("1000000000000000000".into()),
            wallet_address: Some("0xwallet".into()),
            tournament_id: Some("t1".into()),
            created_at: None,
        }
    }

    #[tokio::test]
    async fn initiate_creates_pending_record_with_history() {
        let dir = TempDir::new().unwrap();
        let store = store_with_tournament(&dir).await;
        let processor = mock_processor(mined_transaction("r1"), None).await;
        let payments = lifecycle(store.clone(), &processor.base_url);

        let response = payments
            .initiate(initiate_request("r1"), &identity())
            .await
            .unwrap();
        assert!(response.success);
        assert_eq!(response.reference, "r1");
        assert_eq!(response.tournament_id.as_deref(), Some("t1"));

        let data = store.snapshot().await.unwrap();
        assert_eq!(data.payments.len(), 1);
        let payment = &data.payments[0];
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert_eq!(payment.token_amount, "1000000000000000000");
        assert_eq!(
            payment.token_address,
            "0x2cfc85d8e48f8eab294be644d9e25c3030863003"
        );
        assert_eq!(payment.nullifier_hash.as_deref(), Some("0xnullifier"));
        assert_eq!(payment.recipient_address.as_deref(), Some("0xtreasury"));
        assert_eq!(data.payment_history.len(), 1);
        assert_eq!(data.payment_history[0].new_status, PaymentStatus::Pending);
        assert_eq!(data.payment_history[0].old_status, None);
    }

    #[tokio::test]
    async fn initiate_is_idempotent_for_the_same_user() {
        let dir = TempDir::new().unwrap();
        let store = store_with_tournament(&dir).await;
        let processor = mock_processor(mined_transaction("r1"), None).await;
        let payments = lifecycle(store.clone(), &processor.base_url);

        let first = payments
            .initiate(initiate_request("r1"), &identity())
            .await
            .unwrap();
        let second = payments
            .initiate(initiate_request("r1"), &identity())
            .await
            .unwrap();
        assert_eq!(first.reference, second.reference);
        assert_eq!(second.tournament_id.as_deref(), Some("t1"));

        let data = store.snapshot().await.unwrap();
        assert_eq!(data.payments.len(), 1);
        assert_eq!(data.payment_history.len(), 1);
    }

    #[tokio::test]
    async fn initiate_rejects_cross_user_reference_reuse() {
        let dir = TempDir::new().unwrap();
        let store = store_with_tournament(&dir).await;
        let processor = mock_processor(mined_transaction("r1"), None).await;
        let payments = lifecycle(store.clone(), &processor.base_url);

        payments
            .initiate(initiate_request("r1"), &identity())
            .await
            .unwrap();

        let mut request = initiate_request("r1");
        request.user_id = Some("user-2".into());
        request.wallet_address = Some("0xwallet-2".into());
        let err = payments
            .initiate(request, &other_identity())
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::ReferenceConflict));

        let data = store.snapshot().await.unwrap();
        assert_eq!(data.payments.len(), 1);
        assert_eq!(data.payments[0].user_id, "user-1");
    }

    #[tokio::test]
    async fn initiate_itemizes_missing_fields() {
        let dir = TempDir::new().unwrap();
        let store = store_with_tournament(&dir).await;
        let processor = mock_processor(mined_transaction("r1"), None).await;
        let payments = lifecycle(store, &processor.base_url);

        let err = payments
            .initiate(
                InitiatePaymentRequest {
                    reference: None,
                    kind: Some("tournament".into()),
                    token: None,
                    amount: None,
                    tournament_id: None,
                    wallet_address: Some("0xwallet".into()),
                    user_id: Some("user-1".into()),
                },
                &identity(),
            )
            .await
            .unwrap_err();
        let PaymentError::InvalidPayload { fields } = err else {
            panic!("expected InvalidPayload");
        };
        // reference, token, amount, tournamentId all missing.
        assert_eq!(fields.len(), 4);
        assert!(fields.iter().any(|f| f.contains("reference")));
        assert!(fields.iter().any(|f| f.contains("tournamentId")));
    }

    #[tokio::test]
    async fn initiate_requires_existing_tournament() {
        let dir = TempDir::new().unwrap();
        let store = store_with_tournament(&dir).await;
        let processor = mock_processor(mined_transaction("r1"), None).await;
        let payments = lifecycle(store, &processor.base_url);

        let mut request = initiate_request("r1");
        request.tournament_id = Some("t-missing".into());
        let err = payments.initiate(request, &identity()).await.unwrap_err();
        assert!(matches!(err, PaymentError::TournamentNotFound(id) if id == "t-missing"));
    }

    #[tokio::test]
    async fn initiate_rejects_unsupported_token() {
        let dir = TempDir::new().unwrap();
        let store = store_with_tournament(&dir).await;
        let processor = mock_processor(mined_transaction("r1"), None).await;
        let payments = lifecycle(store, &processor.base_url);

        let mut request = initiate_request("r1");
        request.token = Some("DOGE".into());
        let err = payments.initiate(request, &identity()).await.unwrap_err();
        assert!(matches!(err, PaymentError::UnsupportedToken(token) if token == "DOGE"));
    }

    #[tokio::test]
    async fn confirm_transitions_to_confirmed_with_history() {
        let dir = TempDir::new().unwrap();
        let store = store_with_tournament(&dir).await;
        let processor = mock_processor(mined_transaction("r1"), None).await;
        let payments = lifecycle(store.clone(), &processor.base_url);
        let identity = identity();

        payments
            .initiate(initiate_request("r1"), &identity)
            .await
            .unwrap();
        let response = payments
            .confirm(confirm_request("r1", "tx-1"), &identity)
            .await
            .unwrap();
        assert!(response.success);
        assert_eq!(response.message, "Pago confirmado");

        let data = store.snapshot().await.unwrap();
        let payment = data.payment_by_reference("r1").unwrap();
        assert_eq!(payment.status, PaymentStatus::Confirmed);
        assert_eq!(payment.transaction_id.as_deref(), Some("tx-1"));
        assert!(payment.confirmed_at.is_some());

        let transitions: Vec<_> = data
            .payment_history
            .iter()
            .filter(|h| h.payment_id == payment.payment_id)
            .collect();
        assert_eq!(transitions.len(), 2);
        assert_eq!(transitions[1].old_status, Some(PaymentStatus::Pending));
        assert_eq!(transitions[1].new_status, PaymentStatus::Confirmed);
    }

    #[tokio::test]
    async fn reconfirming_skips_the_processor_and_side_effects() {
        let dir = TempDir::new().unwrap();
        let store = store_with_tournament(&dir).await;
        let processor = mock_processor(mined_transaction("r1"), None).await;
        let payments = lifecycle(store.clone(), &processor.base_url);
        let identity = identity();

        payments
            .initiate(initiate_request("r1"), &identity)
            .await
            .unwrap();
        payments
            .confirm(confirm_request("r1", "tx-1"), &identity)
            .await
            .unwrap();
        assert_eq!(processor.calls.load(Ordering::SeqCst), 1);

        let response = payments
            .confirm(confirm_request("r1", "tx-1"), &identity)
            .await
            .unwrap();
        assert!(response.success);
        assert_eq!(response.message, "Pago ya confirmado previamente");
        // No second processor call, no extra history row.
        assert_eq!(processor.calls.load(Ordering::SeqCst), 1);
        let data = store.snapshot().await.unwrap();
        assert_eq!(data.payment_history.len(), 2);
    }

    #[tokio::test]
    async fn racing_confirms_produce_exactly_one_transition() {
        let dir = TempDir::new().unwrap();
        let store = store_with_tournament(&dir).await;
        let processor = mock_processor(mined_transaction("r1"), None).await;
        let payments = Arc::new(lifecycle(store.clone(), &processor.base_url));
        let identity = identity();

        payments
            .initiate(initiate_request("r1"), &identity)
            .await
            .unwrap();

        let (a, b) = tokio::join!(
            {
                let payments = payments.clone();
                let identity = identity.clone();
                async move { payments.confirm(confirm_request("r1", "tx-1"), &identity).await }
            },
            {
                let payments = payments.clone();
                let identity = identity.clone();
                async move { payments.confirm(confirm_request("r1", "tx-1"), &identity).await }
            }
        );
        let a = a.unwrap();
        let b = b.unwrap();
        assert!(a.success && b.success);

        let data = store.snapshot().await.unwrap();
        let confirmed_rows = data
            .payment_history
            .iter()
            .filter(|h| h.new_status == PaymentStatus::Confirmed)
            .count();
        assert_eq!(confirmed_rows, 1, "exactly one pending→confirmed append");
        assert_eq!(
            data.payment_by_reference("r1").unwrap().status,
            PaymentStatus::Confirmed
        );
    }

    #[tokio::test]
    async fn transaction_predating_payment_is_rejected_and_failed() {
        let dir = TempDir::new().unwrap();
        let store = store_with_tournament(&dir).await;
        let mut transaction = mined_transaction("r1");
        // Mined long before the payment record existed.
        transaction.created_at = Some(serde_json::json!(crate::now_ms() - 3_600_000));
        let processor = mock_processor(transaction, None).await;
        let payments = lifecycle(store.clone(), &processor.base_url);
        let identity = identity();

        payments
            .initiate(initiate_request("r1"), &identity)
            .await
            .unwrap();
        let err = payments
            .confirm(confirm_request("r1", "tx-1"), &identity)
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::TransactionInvalid));

        let data = store.snapshot().await.unwrap();
        assert_eq!(
            data.payment_by_reference("r1").unwrap().status,
            PaymentStatus::Failed
        );
        assert_eq!(
            data.payment_history.last().unwrap().new_status,
            PaymentStatus::Failed
        );
    }

    #[tokio::test]
    async fn reference_mismatch_from_processor_fails_the_payment() {
        let dir = TempDir::new().unwrap();
        let store = store_with_tournament(&dir).await;
        let processor = mock_processor(mined_transaction("some-other-ref"), None).await;
        let payments = lifecycle(store.clone(), &processor.base_url);
        let identity = identity();

        payments
            .initiate(initiate_request("r1"), &identity)
            .await
            .unwrap();
        let err = payments
            .confirm(confirm_request("r1", "tx-1"), &identity)
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::TransactionInvalid));
        let data = store.snapshot().await.unwrap();
        assert_eq!(
            data.payment_by_reference("r1").unwrap().status,
            PaymentStatus::Failed
        );
    }

    #[tokio::test]
    async fn upstream_failure_keeps_the_payment_pending() {
        let dir = TempDir::new().unwrap();
        let store = store_with_tournament(&dir).await;
        let processor =
            mock_processor(mined_transaction("r1"), Some(StatusCode::SERVICE_UNAVAILABLE)).await;
        let payments = lifecycle(store.clone(), &processor.base_url);
        let identity = identity();

        payments
            .initiate(initiate_request("r1"), &identity)
            .await
            .unwrap();
        let err = payments
            .confirm(confirm_request("r1", "tx-1"), &identity)
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Upstream(_)));

        // No partial transition was persisted.
        let data = store.snapshot().await.unwrap();
        assert_eq!(
            data.payment_by_reference("r1").unwrap().status,
            PaymentStatus::Pending
        );
        assert_eq!(data.payment_history.len(), 1);
    }

    #[tokio::test]
    async fn payload_error_status_rejects_and_fails_the_payment() {
        let dir = TempDir::new().unwrap();
        let store = store_with_tournament(&dir).await;
        let processor = mock_processor(mined_transaction("r1"), None).await;
        let payments = lifecycle(store.clone(), &processor.base_url);
        let identity = identity();

        payments
            .initiate(initiate_request("r1"), &identity)
            .await
            .unwrap();
        let mut request = confirm_request("r1", "tx-1");
        request.payload.as_mut().unwrap().status = Some("error".into());
        request.payload.as_mut().unwrap().error_code = Some("user_rejected".into());
        let err = payments.confirm(request, &identity).await.unwrap_err();
        assert!(matches!(err, PaymentError::PaymentRejected));

        // Processor never consulted; payment failed with the payload reason.
        assert_eq!(processor.calls.load(Ordering::SeqCst), 0);
        let data = store.snapshot().await.unwrap();
        assert_eq!(
            data.payment_by_reference("r1").unwrap().status,
            PaymentStatus::Failed
        );
        assert_eq!(
            data.payment_history.last().unwrap().reason.as_deref(),
            Some("user_rejected")
        );
    }

    #[tokio::test]
    async fn confirm_rejects_foreign_sessions_with_specific_codes() {
        let dir = TempDir::new().unwrap();
        let store = store_with_tournament(&dir).await;
        let processor = mock_processor(mined_transaction("r1"), None).await;
        let payments = lifecycle(store.clone(), &processor.base_url);

        payments
            .initiate(initiate_request("r1"), &identity())
            .await
            .unwrap();

        // Different session entirely.
        let err = payments
            .confirm(confirm_request("r1", "tx-1"), &other_identity())
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::SessionInvalid));

        // Same session, wallet swapped out in the payload.
        let mut request = confirm_request("r1", "tx-1");
        request.payload.as_mut().unwrap().wallet_address = Some("0xintruder".into());
        let err = payments.confirm(request, &identity()).await.unwrap_err();
        assert!(matches!(err, PaymentError::WalletMismatch));

        // Never reached the processor.
        assert_eq!(processor.calls.load(Ordering::SeqCst), 0);
        let data = store.snapshot().await.unwrap();
        assert_eq!(
            data.payment_by_reference("r1").unwrap().status,
            PaymentStatus::Pending
        );
    }

    #[tokio::test]
    async fn confirm_itemizes_missing_payload_fields() {
        let dir = TempDir::new().unwrap();
        let store = store_with_tournament(&dir).await;
        let processor = mock_processor(mined_transaction("r1"), None).await;
        let payments = lifecycle(store, &processor.base_url);

        let err = payments
            .confirm(
                ConfirmPaymentRequest {
                    reference: None,
                    payload: None,
                },
                &identity(),
            )
            .await
            .unwrap_err();
        let PaymentError::InvalidPayload { fields } = err else {
            panic!("expected InvalidPayload");
        };
        // reference, payload, transaction_id, wallet, token, amount.
        assert_eq!(fields.len(), 6);
    }

    #[tokio::test]
    async fn failed_reference_cannot_be_reinitiated() {
        let dir = TempDir::new().unwrap();
        let store = store_with_tournament(&dir).await;
        let mut transaction = mined_transaction("r1");
        transaction.transaction_status = Some("failed".into());
        let processor = mock_processor(transaction, None).await;
        let payments = lifecycle(store.clone(), &processor.base_url);
        let identity = identity();

        payments
            .initiate(initiate_request("r1"), &identity)
            .await
            .unwrap();
        let err = payments
            .confirm(confirm_request("r1", "tx-1"), &identity)
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::PaymentRejected));

        let err = payments
            .initiate(initiate_request("r1"), &identity)
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::ReferenceConflict));
    }
}
