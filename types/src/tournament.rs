//! Tournament definitions, participants, results, and derived status.

use serde::{Deserialize, Serialize};

/// Tournament lifecycle, derived from wall-clock time on every read. Never
/// stored authoritatively.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TournamentStatus {
    Upcoming,
    Active,
    Finished,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TournamentRecord {
    pub tournament_id: String,
    pub name: String,
    /// Canonical address of the buy-in token.
    pub buy_in_token: String,
    /// Buy-in, integer base units as a decimal string.
    pub buy_in_amount: String,
    /// Cumulative pool of confirmed buy-ins, integer base units.
    pub prize_pool: String,
    pub max_players: u32,
    pub current_players: u32,
    pub start_time: u64,
    pub end_time: u64,
    /// Percentages by rank, summing to 100.
    pub prize_distribution: Vec<u8>,
    /// Canonical addresses of tokens accepted for entry.
    pub accepted_tokens: Vec<String>,
}

impl TournamentRecord {
    pub fn status_at(&self, now_ms: u64) -> TournamentStatus {
        if now_ms < self.start_time {
            TournamentStatus::Upcoming
        } else if now_ms < self.end_time {
            TournamentStatus::Active
        } else {
            TournamentStatus::Finished
        }
    }

    pub fn is_full(&self) -> bool {
        self.current_players >= self.max_players
    }

    pub fn accepts_token(&self, canonical_address: &str) -> bool {
        self.accepted_tokens
            .iter()
            .any(|accepted| accepted == canonical_address)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    Active,
    Eliminated,
}

/// Unique per (tournament_id, user_id): a user joins a tournament at most
/// once.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TournamentParticipantRecord {
    pub tournament_id: String,
    pub user_id: String,
    pub payment_reference: String,
    pub joined_at: u64,
    pub status: ParticipantStatus,
}

/// Persisted source of leaderboard entries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TournamentResultRecord {
    pub tournament_id: String,
    pub user_id: String,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<String>,
    pub score: u64,
    pub updated_at: u64,
}

/// Computed leaderboard row. Rank follows score ordering; prize is derived
/// from the pool and the tournament's distribution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub user_id: String,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<String>,
    pub score: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prize: Option<String>,
}

/// Per-user aggregate across quick matches and tournaments.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameProgressRecord {
    pub user_id: String,
    pub games_played: u64,
    pub best_score: u64,
    pub updated_at: u64,
}
