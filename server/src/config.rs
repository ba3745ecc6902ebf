//! Service configuration.

use crate::processor::RetryPolicy;
use crate::store::LockConfig;
use anyhow::Context;
use arena_types::{token, TournamentRecord};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug)]
pub struct ProcessorConfig {
    pub base_url: String,
    pub app_id: String,
    pub api_key: Option<String>,
    pub retry: RetryPolicy,
}

#[derive(Clone, Debug)]
pub struct VerifierConfig {
    pub base_url: String,
    pub app_id: String,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub store_path: PathBuf,
    pub audit_log_path: PathBuf,
    pub lock: LockConfig,
    /// Treasury wallet recorded as the payment recipient.
    pub recipient_address: Option<String>,
    pub processor: ProcessorConfig,
    pub verifier: VerifierConfig,
    /// JSON file of tournament definitions seeded into the store on boot.
    pub tournaments_path: Option<PathBuf>,
    pub http_body_limit_bytes: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("data/store.json"),
            audit_log_path: PathBuf::from("data/audit.log"),
            lock: LockConfig::default(),
            recipient_address: None,
            processor: ProcessorConfig {
                base_url: "https://developer.worldcoin.org/api/v2/minikit/".to_string(),
                app_id: String::new(),
                api_key: None,
                retry: RetryPolicy::default(),
            },
            verifier: VerifierConfig {
                base_url: "https://developer.worldcoin.org/api/v2/".to_string(),
                app_id: String::new(),
            },
            tournaments_path: None,
            http_body_limit_bytes: Some(64 * 1024),
        }
    }
}

/// One tournament definition as written in the config file. Amounts are
/// human-denominated; conversion to base units happens at load.
#[derive(Clone, Debug, Deserialize)]
pub struct TournamentSeed {
    pub tournament_id: String,
    pub name: String,
    pub token: String,
    pub buy_in: f64,
    pub max_players: u32,
    pub start_time: u64,
    pub end_time: u64,
    pub prize_distribution: Vec<u8>,
    #[serde(default)]
    pub accepted_tokens: Vec<String>,
}

impl TournamentSeed {
    pub fn to_record(&self) -> anyhow::Result<TournamentRecord> {
        let buy_in_token = token::normalize(&self.token)
            .with_context(|| format!("tournament {}: buy-in token", self.tournament_id))?;
        let buy_in_amount = token::to_base_units(self.buy_in, &self.token)
            .with_context(|| format!("tournament {}: buy-in amount", self.tournament_id))?;

        let distribution_total: u32 = self.prize_distribution.iter().map(|p| *p as u32).sum();
        anyhow::ensure!(
            distribution_total == 100,
            "tournament {}: prize distribution sums to {distribution_total}, expected 100",
            self.tournament_id
        );
        anyhow::ensure!(
            self.end_time > self.start_time,
            "tournament {}: end_time must be after start_time",
            self.tournament_id
        );

        let mut accepted = Vec::new();
        let sources = if self.accepted_tokens.is_empty() {
            std::slice::from_ref(&self.token)
        } else {
            self.accepted_tokens.as_slice()
        };
        for identifier in sources {
            let canonical = token::normalize(identifier)
                .with_context(|| format!("tournament {}: accepted token", self.tournament_id))?;
            if !accepted.contains(&canonical) {
                accepted.push(canonical);
            }
        }

        Ok(TournamentRecord {
            tournament_id: self.tournament_id.clone(),
            name: self.name.clone(),
            buy_in_token,
            buy_in_amount,
            prize_pool: "0".to_string(),
            max_players: self.max_players,
            current_players: 0,
            start_time: self.start_time,
            end_time: self.end_time,
            prize_distribution: self.prize_distribution.clone(),
            accepted_tokens: accepted,
        })
    }
}

pub fn load_tournament_seeds(path: &Path) -> anyhow::Result<Vec<TournamentSeed>> {
    let raw = std::fs::read(path)
        .with_context(|| format!("read tournaments config {}", path.display()))?;
    serde_json::from_slice(&raw)
        .with_context(|| format!("parse tournaments config {}", path.display()))
}
