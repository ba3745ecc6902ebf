use axum::{
    extract::{Path, State as AxumState},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::error;

use crate::payments::PaymentError;
use crate::session::{require_active_session, SessionError};
use crate::tournaments::JoinError;
use crate::verifier::{verify_and_create_session, VerifyError};
use crate::Service;
use arena_types::api::{
    codes, ConfirmPaymentRequest, ErrorResponse, InitiatePaymentRequest, JoinTournamentRequest,
    ReportScoreRequest, VerifyRequest, VerifyResponse,
};

/// Cookie carrying the session token. Mini-app webviews may also send it in
/// the x-session-token header.
const SESSION_COOKIE: &str = "arena_session";

#[derive(Serialize)]
struct HealthzResponse {
    ok: bool,
}

/// Basic health check endpoint - always returns ok if the service can
/// respond. Used for liveness checks and load balancer health probes.
pub(super) async fn healthz() -> Response {
    Json(HealthzResponse { ok: true }).into_response()
}

fn session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = headers
        .get("x-session-token")
        .and_then(|value| value.to_str().ok())
    {
        let token = token.trim();
        if !token.is_empty() {
            return Some(token.to_string());
        }
    }
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    for pair in cookies.split(';') {
        if let Some((name, value)) = pair.trim().split_once('=') {
            if name == SESSION_COOKIE && !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

fn session_error_response(err: SessionError) -> Response {
    match err {
        SessionError::Store(inner) => internal_error_response("session lookup", &inner),
        err => (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse::new(err.code(), err.to_string())),
        )
            .into_response(),
    }
}

fn internal_error_response(context: &str, err: &dyn std::fmt::Display) -> Response {
    // Full detail goes to the log; the client only learns that we failed.
    error!("internal error during {context}: {err}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new(codes::INTERNAL_ERROR, "internal error")),
    )
        .into_response()
}

fn payment_error_response(err: PaymentError) -> Response {
    let status = match &err {
        PaymentError::InvalidPayload { .. }
        | PaymentError::UnsupportedToken(_)
        | PaymentError::TournamentNotFound(_)
        | PaymentError::TransactionInvalid
        | PaymentError::PaymentRejected => StatusCode::BAD_REQUEST,
        PaymentError::ReferenceNotFound => StatusCode::NOT_FOUND,
        PaymentError::ReferenceConflict => StatusCode::CONFLICT,
        PaymentError::SessionInvalid => StatusCode::UNAUTHORIZED,
        PaymentError::WalletMismatch | PaymentError::IdentityMismatch => StatusCode::FORBIDDEN,
        PaymentError::Upstream(_) => StatusCode::SERVICE_UNAVAILABLE,
        PaymentError::Store(inner) => {
            return internal_error_response("payment operation", inner);
        }
    };
    (
        status,
        Json(ErrorResponse::new(err.code(), err.to_string())),
    )
        .into_response()
}

/// Join failures use the `{error}` envelope with a status per failure
/// class: validation 400, session 401, ownership 403, missing 404,
/// duplicates 409.
fn join_error_response(err: JoinError) -> Response {
    let status = match &err {
        JoinError::InvalidPayload { .. }
        | JoinError::TournamentFinished
        | JoinError::TokenNotAccepted(_)
        | JoinError::TokenMismatch
        | JoinError::AmountMismatch => StatusCode::BAD_REQUEST,
        JoinError::SessionMismatch => StatusCode::UNAUTHORIZED,
        JoinError::PaymentNotConfirmed
        | JoinError::TournamentMismatch
        | JoinError::UserMismatch
        | JoinError::NullifierMismatch
        | JoinError::WalletMismatch
        | JoinError::NotParticipant => StatusCode::FORBIDDEN,
        JoinError::TournamentNotFound(_) | JoinError::PaymentNotFound => StatusCode::NOT_FOUND,
        JoinError::TournamentFull | JoinError::AlreadyJoined => StatusCode::CONFLICT,
        JoinError::Corrupt(detail) => {
            error!("store corruption during join: {detail}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "internal error" })),
            )
                .into_response();
        }
        JoinError::Store(inner) => {
            error!("store failure during join: {inner}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "internal error" })),
            )
                .into_response();
        }
    };
    (
        status,
        Json(serde_json::json!({ "error": err.to_string() })),
    )
        .into_response()
}

pub(super) async fn verify_identity(
    AxumState(service): AxumState<Arc<Service>>,
    Json(request): Json<VerifyRequest>,
) -> Response {
    match verify_and_create_session(service.store(), service.verifier(), request).await {
        Ok(verification) => {
            let cookie = format!(
                "{SESSION_COOKIE}={}; Path=/; HttpOnly; SameSite=None; Secure",
                verification.session_token
            );
            let body = Json(VerifyResponse {
                success: true,
                session_token: verification.session_token,
                expires_at: verification.expires_at,
            });
            match axum::http::HeaderValue::from_str(&cookie) {
                Ok(value) => ([(header::SET_COOKIE, value)], body).into_response(),
                Err(_) => body.into_response(),
            }
        }
        Err(VerifyError::InvalidPayload { fields }) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(codes::INVALID_PAYLOAD, fields.join("; "))),
        )
            .into_response(),
        Err(VerifyError::Rejected(code)) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(codes::VERIFICATION_REJECTED, code)),
        )
            .into_response(),
        Err(VerifyError::Upstream(err)) => {
            error!("identity verifier unavailable: {err}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse::new(
                    codes::UPSTREAM_ERROR,
                    "identity verifier unavailable",
                )),
            )
                .into_response()
        }
        Err(VerifyError::Store(inner)) => internal_error_response("identity verification", &inner),
    }
}

pub(super) async fn initiate_payment(
    AxumState(service): AxumState<Arc<Service>>,
    headers: HeaderMap,
    Json(request): Json<InitiatePaymentRequest>,
) -> Response {
    let token = session_token(&headers);
    let identity =
        match require_active_session(service.store(), token.as_deref(), "initiate_payment").await {
            Ok(identity) => identity,
            Err(err) => return session_error_response(err),
        };

    match service.payments().initiate(request, &identity).await {
        Ok(response) => Json(response).into_response(),
        Err(err) => payment_error_response(err),
    }
}

pub(super) async fn confirm_payment(
    AxumState(service): AxumState<Arc<Service>>,
    headers: HeaderMap,
    Json(request): Json<ConfirmPaymentRequest>,
) -> Response {
    let token = session_token(&headers);
    let identity =
        match require_active_session(service.store(), token.as_deref(), "confirm_payment").await {
            Ok(identity) => identity,
            Err(err) => return session_error_response(err),
        };

    match service.payments().confirm(request, &identity).await {
        Ok(response) => Json(response).into_response(),
        Err(err) => payment_error_response(err),
    }
}

pub(super) async fn list_tournaments(
    AxumState(service): AxumState<Arc<Service>>,
) -> Response {
    match service.tournaments().list().await {
        Ok(views) => Json(views).into_response(),
        Err(err) => internal_error_response("tournament listing", &err),
    }
}

pub(super) async fn get_tournament(
    AxumState(service): AxumState<Arc<Service>>,
    Path(tournament_id): Path<String>,
) -> Response {
    match service.tournaments().get(&tournament_id).await {
        Ok(view) => Json(view).into_response(),
        Err(err) => join_error_response(err),
    }
}

pub(super) async fn get_leaderboard(
    AxumState(service): AxumState<Arc<Service>>,
    Path(tournament_id): Path<String>,
) -> Response {
    match service.tournaments().leaderboard(&tournament_id).await {
        Ok(entries) => Json(entries).into_response(),
        Err(err) => join_error_response(err),
    }
}

pub(super) async fn join_tournament(
    AxumState(service): AxumState<Arc<Service>>,
    Path(tournament_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<JoinTournamentRequest>,
) -> Response {
    let token = session_token(&headers);
    let identity =
        match require_active_session(service.store(), token.as_deref(), "join_tournament").await {
            Ok(identity) => identity,
            Err(SessionError::Store(inner)) => {
                return internal_error_response("join session lookup", &inner)
            }
            Err(err) => {
                return (
                    StatusCode::UNAUTHORIZED,
                    Json(serde_json::json!({ "error": err.to_string() })),
                )
                    .into_response()
            }
        };

    match service
        .tournaments()
        .join(&tournament_id, request, &identity)
        .await
    {
        Ok(response) => Json(response).into_response(),
        Err(err) => join_error_response(err),
    }
}

pub(super) async fn report_score(
    AxumState(service): AxumState<Arc<Service>>,
    headers: HeaderMap,
    Json(request): Json<ReportScoreRequest>,
) -> Response {
    let token = session_token(&headers);
    let identity =
        match require_active_session(service.store(), token.as_deref(), "report_score").await {
            Ok(identity) => identity,
            Err(err) => return session_error_response(err),
        };

    match service.tournaments().report_score(request, &identity).await {
        Ok(response) => Json(response).into_response(),
        Err(err) => join_error_response(err),
    }
}
