//! Tournament state manager.
//!
//! Admits confirmed, paid identities into tournaments exactly once and
//! keeps the prize pool, participant count, and leaderboard consistent: the
//! whole admission (duplicate check, participant append, pool credit,
//! leaderboard upsert) commits as one locked critical section or not at all.

use crate::store::{hash_field, Store, StoreError};
use arena_types::api::{
    JoinTournamentRequest, JoinTournamentResponse, ReportScoreRequest, ReportScoreResponse,
    TournamentView,
};
use arena_types::{
    token, GameProgressRecord, IdentityVerification, LeaderboardEntry, ParticipantStatus,
    PaymentStatus, TournamentParticipantRecord, TournamentResultRecord, TournamentStatus,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum JoinError {
    #[error("invalid payload: {}", fields.join("; "))]
    InvalidPayload { fields: Vec<String> },
    #[error("tournament not found: {0}")]
    TournamentNotFound(String),
    #[error("tournament already finished")]
    TournamentFinished,
    #[error("tournament is full")]
    TournamentFull,
    #[error("token not accepted for this tournament: {0}")]
    TokenNotAccepted(String),
    #[error("token does not match the payment")]
    TokenMismatch,
    #[error("amount does not match the payment")]
    AmountMismatch,
    #[error("payment not found for reference")]
    PaymentNotFound,
    #[error("payment is not confirmed")]
    PaymentNotConfirmed,
    #[error("payment belongs to a different tournament")]
    TournamentMismatch,
    #[error("session does not match the payment")]
    SessionMismatch,
    #[error("user does not match the payment")]
    UserMismatch,
    #[error("identity proof does not match the payment")]
    NullifierMismatch,
    #[error("wallet does not match the payment")]
    WalletMismatch,
    #[error("user already joined this tournament")]
    AlreadyJoined,
    #[error("user is not a participant of this tournament")]
    NotParticipant,
    #[error("stored amounts corrupt: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct Tournaments {
    store: Arc<Store>,
}

impl Tournaments {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub async fn list(&self) -> Result<Vec<TournamentView>, StoreError> {
        let data = self.store.snapshot().await?;
        let now = crate::now_ms();
        Ok(data
            .tournaments
            .iter()
            .map(|t| TournamentView::from_record(t, now))
            .collect())
    }

    /// Tournament with freshly derived status; never a stale cached value.
    pub async fn get(&self, tournament_id: &str) -> Result<TournamentView, JoinError> {
        let data = self.store.snapshot().await?;
        let record = data
            .tournament(tournament_id)
            .ok_or_else(|| JoinError::TournamentNotFound(tournament_id.to_string()))?;
        Ok(TournamentView::from_record(record, crate::now_ms()))
    }

    pub async fn participant_exists(
        &self,
        tournament_id: &str,
        user_id: &str,
    ) -> Result<bool, StoreError> {
        let data = self.store.snapshot().await?;
        Ok(data.participant(tournament_id, user_id).is_some())
    }

    /// Admits a participant whose entry payment is confirmed. The entire
    /// validation sequence runs under the store lock so a racing duplicate
    /// join can never double-credit the pool.
    pub async fn join(
        &self,
        tournament_id: &str,
        request: JoinTournamentRequest,
        identity: &IdentityVerification,
    ) -> Result<JoinTournamentResponse, JoinError> {
        let mut fields = Vec::new();
        let token_identifier = crate::require_field(request.token, "token", &mut fields);
        let amount = crate::require_number(request.amount, "amount", &mut fields);
        let user_id = crate::require_field(request.user_id, "userId", &mut fields);
        let username = crate::require_field(request.username, "username", &mut fields);
        let wallet_address =
            crate::require_field(request.wallet_address, "walletAddress", &mut fields);
        let score = crate::require_number(request.score, "score", &mut fields);
        let payment_reference =
            crate::require_field(request.payment_reference, "paymentReference", &mut fields);
        if !fields.is_empty() {
            return Err(JoinError::InvalidPayload { fields });
        }

        if user_id != identity.user_id {
            return Err(JoinError::UserMismatch);
        }

        let canonical_token = token::normalize(&token_identifier)
            .map_err(|_| JoinError::TokenNotAccepted(token_identifier.clone()))?;
        // Recomputed from the human amount; the client's own base-unit
        // claims are never trusted.
        let expected_amount = token::to_base_units(amount, &token_identifier)
            .map_err(|_| JoinError::InvalidPayload {
                fields: vec!["amount must be a finite non-negative number".to_string()],
            })?;

        let now = crate::now_ms();
        let reference_hash = hash_field(&payment_reference);
        let tournament_id_owned = tournament_id.to_string();
        let identity_clone = identity.clone();
        let record = self
            .store
            .with_lock::<_, JoinError>(move |data| {
                let tournament = data
                    .tournament(&tournament_id_owned)
                    .ok_or_else(|| JoinError::TournamentNotFound(tournament_id_owned.clone()))?
                    .clone();
                if tournament.status_at(now) == TournamentStatus::Finished {
                    return Err(JoinError::TournamentFinished);
                }
                if tournament.is_full() {
                    return Err(JoinError::TournamentFull);
                }
                if !tournament.accepts_token(&canonical_token) {
                    return Err(JoinError::TokenNotAccepted(token_identifier.clone()));
                }

                let payment = data
                    .payment_by_reference(&payment_reference)
                    .ok_or(JoinError::PaymentNotFound)?;
                if payment.token_address != canonical_token {
                    return Err(JoinError::TokenMismatch);
                }
                if payment.token_amount != expected_amount {
                    return Err(JoinError::AmountMismatch);
                }
                if payment.status != PaymentStatus::Confirmed {
                    return Err(JoinError::PaymentNotConfirmed);
                }
                if payment.tournament_id.as_deref() != Some(tournament_id_owned.as_str()) {
                    return Err(JoinError::TournamentMismatch);
                }
                if payment.session_token.as_deref() != Some(identity_clone.session_token.as_str())
                {
                    return Err(JoinError::SessionMismatch);
                }
                if payment.user_id != identity_clone.user_id {
                    return Err(JoinError::UserMismatch);
                }
                if payment.nullifier_hash.as_deref()
                    != Some(identity_clone.nullifier_hash.as_str())
                {
                    return Err(JoinError::NullifierMismatch);
                }
                match payment.wallet_address.as_deref() {
                    Some(payment_wallet)
                        if payment_wallet.eq_ignore_ascii_case(&wallet_address) => {}
                    _ => return Err(JoinError::WalletMismatch),
                }

                if data.participant(&tournament_id_owned, &user_id).is_some() {
                    return Err(JoinError::AlreadyJoined);
                }

                // All checks passed: commit participant, pool credit, player
                // count, and leaderboard entry together.
                let new_pool = token::add_base_units(
                    &tournament.prize_pool,
                    &tournament.buy_in_amount,
                )
                .ok_or_else(|| {
                    JoinError::Corrupt(format!(
                        "prize pool {} + buy-in {}",
                        tournament.prize_pool, tournament.buy_in_amount
                    ))
                })?;

                data.participants.push(TournamentParticipantRecord {
                    tournament_id: tournament_id_owned.clone(),
                    user_id: user_id.clone(),
                    payment_reference: payment_reference.clone(),
                    joined_at: now,
                    status: ParticipantStatus::Active,
                });
                upsert_result(
                    data,
                    &tournament_id_owned,
                    &user_id,
                    &username,
                    Some(wallet_address.clone()),
                    score,
                    now,
                );

                let tournament = data
                    .tournament_mut(&tournament_id_owned)
                    .ok_or_else(|| JoinError::TournamentNotFound(tournament_id_owned.clone()))?;
                tournament.prize_pool = new_pool;
                tournament.current_players += 1;
                Ok(tournament.clone())
            })
            .await?;

        self.store
            .audit()
            .record(
                "tournament_join",
                serde_json::json!({
                    "tournament": record.tournament_id,
                    "user": hash_field(&identity.user_id),
                    "reference": reference_hash,
                }),
            )
            .await;
        info!(
            tournament = %record.tournament_id,
            players = record.current_players,
            "participant admitted"
        );
        Ok(JoinTournamentResponse {
            success: true,
            tournament: TournamentView::from_record(&record, now),
        })
    }

    /// Leaderboard sorted by score descending. Equal scores rank the
    /// earlier-posted result first. Prize is floor(pool × pct / 100) for
    /// ranks the distribution covers.
    pub async fn leaderboard(
        &self,
        tournament_id: &str,
    ) -> Result<Vec<LeaderboardEntry>, JoinError> {
        let data = self.store.snapshot().await?;
        let tournament = data
            .tournament(tournament_id)
            .ok_or_else(|| JoinError::TournamentNotFound(tournament_id.to_string()))?;

        let mut results: Vec<&TournamentResultRecord> = data
            .results
            .iter()
            .filter(|r| r.tournament_id == tournament_id)
            .collect();
        results.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then(a.updated_at.cmp(&b.updated_at))
                .then(a.user_id.cmp(&b.user_id))
        });

        Ok(results
            .into_iter()
            .enumerate()
            .map(|(index, result)| {
                let rank = index as u32 + 1;
                let prize = tournament
                    .prize_distribution
                    .get(index)
                    .and_then(|pct| prize_for(&tournament.prize_pool, *pct));
                LeaderboardEntry {
                    rank,
                    user_id: result.user_id.clone(),
                    username: result.username.clone(),
                    wallet_address: result.wallet_address.clone(),
                    score: result.score,
                    prize,
                }
            })
            .collect())
    }

    /// Records a finished game's score: bumps the per-user progress
    /// aggregate and, for tournament play, raises the participant's
    /// leaderboard score when the new one is higher.
    pub async fn report_score(
        &self,
        request: ReportScoreRequest,
        identity: &IdentityVerification,
    ) -> Result<ReportScoreResponse, JoinError> {
        let mut fields = Vec::new();
        let user_id = crate::require_field(request.user_id, "userId", &mut fields);
        let score = crate::require_number(request.score, "score", &mut fields);
        if !fields.is_empty() {
            return Err(JoinError::InvalidPayload { fields });
        }
        if user_id != identity.user_id {
            return Err(JoinError::UserMismatch);
        }

        let now = crate::now_ms();
        let username = request
            .username
            .unwrap_or_else(|| identity.user_id.clone());
        let wallet_address = request
            .wallet_address
            .or_else(|| identity.wallet_address.clone());
        let tournament_id = request.tournament_id;
        let best_score = self
            .store
            .with_lock::<_, JoinError>(move |data| {
                if let Some(tournament_id) = tournament_id.as_deref() {
                    if data.tournament(tournament_id).is_none() {
                        return Err(JoinError::TournamentNotFound(tournament_id.to_string()));
                    }
                    if data.participant(tournament_id, &user_id).is_none() {
                        return Err(JoinError::NotParticipant);
                    }
                    upsert_result(
                        data,
                        tournament_id,
                        &user_id,
                        &username,
                        wallet_address.clone(),
                        score,
                        now,
                    );
                }

                if !data.game_progress.iter().any(|p| p.user_id == user_id) {
                    data.game_progress.push(GameProgressRecord {
                        user_id: user_id.clone(),
                        games_played: 0,
                        best_score: 0,
                        updated_at: now,
                    });
                }
                let progress = data
                    .game_progress
                    .iter_mut()
                    .find(|p| p.user_id == user_id)
                    .ok_or_else(|| JoinError::Corrupt("game progress row missing".into()))?;
                progress.games_played += 1;
                progress.best_score = progress.best_score.max(score);
                progress.updated_at = now;
                Ok(progress.best_score)
            })
            .await?;

        Ok(ReportScoreResponse {
            success: true,
            best_score,
        })
    }
}

/// Raises (never lowers) a participant's leaderboard score.
fn upsert_result(
    data: &mut crate::store::StoreData,
    tournament_id: &str,
    user_id: &str,
    username: &str,
    wallet_address: Option<String>,
    score: u64,
    now: u64,
) {
    match data
        .results
        .iter_mut()
        .find(|r| r.tournament_id == tournament_id && r.user_id == user_id)
    {
        Some(existing) => {
            if score > existing.score {
                existing.score = score;
                existing.updated_at = now;
            }
        }
        None => data.results.push(TournamentResultRecord {
            tournament_id: tournament_id.to_string(),
            user_id: user_id.to_string(),
            username: username.to_string(),
            wallet_address,
            score,
            updated_at: now,
        }),
    }
}

fn prize_for(pool: &str, pct: u8) -> Option<String> {
    let pool: u128 = pool.parse().ok()?;
    Some((pool.checked_mul(pct as u128)? / 100).to_string())
}
