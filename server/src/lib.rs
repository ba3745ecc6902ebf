//! Backend service for arena tournaments: identity-gated, token-paid entry
//! with exactly-once payment confirmation and tournament admission.

pub mod api;
pub mod config;
pub mod payments;
pub mod processor;
pub mod session;
pub mod store;
pub mod tournaments;
pub mod verifier;

use crate::config::ServerConfig;
use crate::payments::PaymentLifecycle;
use crate::processor::ProcessorClient;
use crate::store::{Store, StoreError};
use crate::tournaments::Tournaments;
use crate::verifier::VerifierClient;
use anyhow::Context;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

/// Current wall-clock time in unix milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Pulls a required string field out of a request, recording a per-field
/// message when it is missing or blank. The placeholder return is only
/// observed by callers that abort on a non-empty `missing` list.
pub(crate) fn require_field(
    value: Option<String>,
    name: &str,
    missing: &mut Vec<String>,
) -> String {
    match value {
        Some(value) if !value.trim().is_empty() => value,
        _ => {
            missing.push(format!("{name} is required"));
            String::new()
        }
    }
}

/// Numeric counterpart of [`require_field`].
pub(crate) fn require_number<T: Default>(
    value: Option<T>,
    name: &str,
    missing: &mut Vec<String>,
) -> T {
    match value {
        Some(value) => value,
        None => {
            missing.push(format!("{name} is required"));
            T::default()
        }
    }
}

/// Aggregate of the service's components, shared across request handlers.
pub struct Service {
    pub config: ServerConfig,
    store: Arc<Store>,
    payments: PaymentLifecycle,
    tournaments: Tournaments,
    verifier: VerifierClient,
}

impl Service {
    pub async fn new(config: ServerConfig) -> anyhow::Result<Self> {
        if let Some(parent) = config.store_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create data dir {}", parent.display()))?;
            }
        }

        let store = Arc::new(Store::open(
            config.store_path.clone(),
            config.audit_log_path.clone(),
            config.lock.clone(),
        ));

        let processor = ProcessorClient::new(
            &config.processor.base_url,
            config.processor.app_id.clone(),
            config.processor.api_key.clone(),
        )
        .context("build processor client")?
        .with_retry_policy(config.processor.retry.clone());

        let verifier = VerifierClient::new(
            &config.verifier.base_url,
            config.verifier.app_id.clone(),
        )
        .context("build verifier client")?;

        let payments = PaymentLifecycle::new(
            store.clone(),
            processor,
            config.recipient_address.clone(),
        );
        let tournaments = Tournaments::new(store.clone());

        let service = Self {
            config,
            store,
            payments,
            tournaments,
            verifier,
        };
        service.seed_tournaments().await?;
        Ok(service)
    }

    /// Inserts configured tournaments not yet present in the store. Existing
    /// records keep their accumulated pool and participants.
    async fn seed_tournaments(&self) -> anyhow::Result<()> {
        let Some(path) = self.config.tournaments_path.as_deref() else {
            return Ok(());
        };
        let seeds = config::load_tournament_seeds(path)?;
        let mut records = Vec::with_capacity(seeds.len());
        for seed in &seeds {
            records.push(seed.to_record()?);
        }

        let seeded = self
            .store
            .with_lock::<_, StoreError>(move |data| {
                let mut seeded = 0usize;
                for record in records {
                    if data.tournament(&record.tournament_id).is_none() {
                        data.tournaments.push(record);
                        seeded += 1;
                    }
                }
                Ok(seeded)
            })
            .await?;
        info!(seeded, total = seeds.len(), "tournament definitions loaded");
        Ok(())
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn payments(&self) -> &PaymentLifecycle {
        &self.payments
    }

    pub fn tournaments(&self) -> &Tournaments {
        &self.tournaments
    }

    pub fn verifier(&self) -> &VerifierClient {
        &self.verifier
    }
}
