//! Durable record store.
//!
//! All persisted state lives in one JSON document. Mutations run as
//! advisory-locked critical sections: acquire the lock, load, apply, persist
//! via temp-file + atomic rename, release. Plain reads bypass the lock and
//! may observe a subsequently-stale snapshot; callers needing strict
//! consistency re-validate inside [`Store::with_lock`].

mod audit;
mod lock;

pub use audit::{hash_field, AuditLog};
pub use lock::{LockConfig, LockError, StoreLock};

use arena_types::{
    GameProgressRecord, IdentityVerification, PaymentRecord, PaymentStatusHistoryRecord,
    TournamentParticipantRecord, TournamentRecord, TournamentResultRecord,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store document corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// The entire persisted state of the service.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StoreData {
    #[serde(default)]
    pub verifications: Vec<IdentityVerification>,
    #[serde(default)]
    pub payments: Vec<PaymentRecord>,
    #[serde(default)]
    pub payment_history: Vec<PaymentStatusHistoryRecord>,
    #[serde(default)]
    pub tournaments: Vec<TournamentRecord>,
    #[serde(default)]
    pub participants: Vec<TournamentParticipantRecord>,
    #[serde(default)]
    pub results: Vec<TournamentResultRecord>,
    #[serde(default)]
    pub game_progress: Vec<GameProgressRecord>,
}

impl StoreData {
    pub fn payment_by_reference(&self, reference: &str) -> Option<&PaymentRecord> {
        self.payments.iter().find(|p| p.reference == reference)
    }

    pub fn payment_by_reference_mut(&mut self, reference: &str) -> Option<&mut PaymentRecord> {
        self.payments.iter_mut().find(|p| p.reference == reference)
    }

    pub fn tournament(&self, tournament_id: &str) -> Option<&TournamentRecord> {
        self.tournaments
            .iter()
            .find(|t| t.tournament_id == tournament_id)
    }

    pub fn tournament_mut(&mut self, tournament_id: &str) -> Option<&mut TournamentRecord> {
        self.tournaments
            .iter_mut()
            .find(|t| t.tournament_id == tournament_id)
    }

    pub fn participant(
        &self,
        tournament_id: &str,
        user_id: &str,
    ) -> Option<&TournamentParticipantRecord> {
        self.participants
            .iter()
            .find(|p| p.tournament_id == tournament_id && p.user_id == user_id)
    }

    /// Non-expired verification for a session token.
    pub fn verification_by_session(
        &self,
        session_token: &str,
        now_ms: u64,
    ) -> Option<&IdentityVerification> {
        self.verifications
            .iter()
            .find(|v| v.session_token == session_token && !v.is_expired(now_ms))
    }

    /// Drops expired identity verifications. Runs at the start of every
    /// locked mutation, so expiry is enforced lazily but durably.
    pub fn purge_expired(&mut self, now_ms: u64) -> usize {
        let before = self.verifications.len();
        self.verifications.retain(|v| !v.is_expired(now_ms));
        before - self.verifications.len()
    }
}

pub struct Store {
    path: PathBuf,
    lock: StoreLock,
    audit: AuditLog,
}

impl Store {
    pub fn open(path: PathBuf, audit_path: PathBuf, lock_config: LockConfig) -> Self {
        let lock_path = lock_path_for(&path);
        Self {
            path,
            lock: StoreLock::new(lock_path, lock_config),
            audit: AuditLog::new(audit_path),
        }
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Lock-free snapshot read. The result may be stale by the time the
    /// caller acts on it.
    pub async fn snapshot(&self) -> Result<StoreData, StoreError> {
        self.load().await
    }

    /// Runs `f` as an advisory-locked read-modify-write transaction. The
    /// document is persisted only when `f` returns Ok; an Err leaves the
    /// on-disk state untouched.
    pub async fn with_lock<T, E>(
        &self,
        f: impl FnOnce(&mut StoreData) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let _guard = self
            .lock
            .acquire()
            .await
            .map_err(StoreError::from)
            .map_err(E::from)?;
        let mut data = self.load().await.map_err(E::from)?;
        let purged = data.purge_expired(crate::now_ms());
        if purged > 0 {
            debug!(purged, "purged expired identity verifications");
        }
        let value = f(&mut data)?;
        self.persist(&data).await.map_err(E::from)?;
        Ok(value)
    }

    async fn load(&self) -> Result<StoreData, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(StoreData::default()),
            Err(err) => Err(err.into()),
        }
    }

    async fn persist(&self, data: &StoreData) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(data)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

fn lock_path_for(store_path: &std::path::Path) -> PathBuf {
    let mut name = store_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "store".into());
    name.push(".lock");
    store_path.with_file_name(name)
}
