//! Request/response payloads for the HTTP API.
//!
//! The client-facing surface is camelCase; the payment-processor payload
//! keeps the processor's snake_case field names.

use crate::tournament::{TournamentRecord, TournamentStatus};
use serde::{Deserialize, Serialize};

/// Stable machine-readable error codes returned in error envelopes.
pub mod codes {
    pub const INVALID_PAYLOAD: &str = "INVALID_PAYLOAD";
    pub const SESSION_REQUIRED: &str = "SESSION_REQUIRED";
    pub const SESSION_INVALID: &str = "SESSION_INVALID";
    pub const WALLET_MISMATCH: &str = "WALLET_MISMATCH";
    pub const IDENTITY_MISMATCH: &str = "IDENTITY_MISMATCH";
    pub const REFERENCE_NOT_FOUND: &str = "REFERENCE_NOT_FOUND";
    pub const REFERENCE_CONFLICT: &str = "REFERENCE_CONFLICT";
    pub const TRANSACTION_INVALID: &str = "TRANSACTION_INVALID";
    pub const PAYMENT_REJECTED: &str = "PAYMENT_REJECTED";
    pub const VERIFICATION_REJECTED: &str = "VERIFICATION_REJECTED";
    pub const UPSTREAM_ERROR: &str = "UPSTREAM_ERROR";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

/// Error envelope shared by the payment endpoints.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub code: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            success: false,
            code: code.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiatePaymentRequest {
    pub reference: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub token: Option<String>,
    pub amount: Option<f64>,
    #[serde(default)]
    pub tournament_id: Option<String>,
    pub wallet_address: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiatePaymentResponse {
    pub success: bool,
    pub reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tournament_id: Option<String>,
}

/// The authorization result the mini-app client got back from the payment
/// processor, forwarded verbatim for server-side verification.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProcessorPayload {
    pub status: Option<String>,
    pub transaction_id: Option<String>,
    pub token: Option<String>,
    pub token_amount: Option<String>,
    pub wallet_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConfirmPaymentRequest {
    pub reference: Option<String>,
    pub payload: Option<ProcessorPayload>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConfirmPaymentResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinTournamentRequest {
    pub token: Option<String>,
    pub amount: Option<f64>,
    pub user_id: Option<String>,
    pub username: Option<String>,
    pub wallet_address: Option<String>,
    pub score: Option<u64>,
    pub payment_reference: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JoinTournamentResponse {
    pub success: bool,
    pub tournament: TournamentView,
}

/// Client-facing projection of a tournament with freshly derived status.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TournamentView {
    pub tournament_id: String,
    pub name: String,
    pub buy_in_token: String,
    pub buy_in_amount: String,
    pub prize_pool: String,
    pub max_players: u32,
    pub current_players: u32,
    pub start_time: u64,
    pub end_time: u64,
    pub status: TournamentStatus,
    pub prize_distribution: Vec<u8>,
    pub accepted_tokens: Vec<String>,
}

impl TournamentView {
    pub fn from_record(record: &TournamentRecord, now_ms: u64) -> Self {
        Self {
            tournament_id: record.tournament_id.clone(),
            name: record.name.clone(),
            buy_in_token: record.buy_in_token.clone(),
            buy_in_amount: record.buy_in_amount.clone(),
            prize_pool: record.prize_pool.clone(),
            max_players: record.max_players,
            current_players: record.current_players,
            start_time: record.start_time,
            end_time: record.end_time,
            status: record.status_at(now_ms),
            prize_distribution: record.prize_distribution.clone(),
            accepted_tokens: record.accepted_tokens.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    /// Opaque proof payload, passed through to the identity verifier.
    pub proof: Option<serde_json::Value>,
    pub user_id: Option<String>,
    pub wallet_address: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub success: bool,
    pub session_token: String,
    pub expires_at: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportScoreRequest {
    pub user_id: Option<String>,
    #[serde(default)]
    pub tournament_id: Option<String>,
    pub score: Option<u64>,
    pub username: Option<String>,
    pub wallet_address: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportScoreResponse {
    pub success: bool,
    pub best_score: u64,
}
