//! Append-only audit log.
//!
//! One line-delimited JSON entry per event. Identifying fields (wallets,
//! session tokens, user ids) must be passed through [`hash_field`] before
//! they reach the log; raw secrets never land on disk.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::io::Write as _;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::warn;

/// Privacy-preserving digest of an identifying field: first 16 hex chars of
/// its sha256. Stable for correlation, useless for recovery.
pub fn hash_field(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    hex::encode(&digest[..8])
}

#[derive(Serialize)]
struct AuditEntry<'a> {
    ts: u64,
    action: &'a str,
    detail: serde_json::Value,
}

pub struct AuditLog {
    path: PathBuf,
    writer: Mutex<()>,
}

impl AuditLog {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            writer: Mutex::new(()),
        }
    }

    /// Appends one entry. Best-effort: a failed append is logged and
    /// swallowed so an audit-disk problem cannot fail user requests.
    pub async fn record(&self, action: &str, detail: serde_json::Value) {
        let entry = AuditEntry {
            ts: crate::now_ms(),
            action,
            detail,
        };
        let line = match serde_json::to_string(&entry) {
            Ok(line) => line,
            Err(err) => {
                warn!(action, "failed to encode audit entry: {err}");
                return;
            }
        };

        let _guard = self.writer.lock().await;
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| writeln!(file, "{line}"));
        if let Err(err) = result {
            warn!(path = %self.path.display(), action, "failed to append audit entry: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn entries_append_as_json_lines() {
        let dir = TempDir::new().unwrap();
        let log = AuditLog::new(dir.path().join("audit.log"));

        log.record("payment_initiated", serde_json::json!({"reference": "r1"}))
            .await;
        log.record("payment_confirmed", serde_json::json!({"reference": "r1"}))
            .await;

        let contents = std::fs::read_to_string(dir.path().join("audit.log")).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["action"], "payment_initiated");
        assert_eq!(first["detail"]["reference"], "r1");
        assert!(first["ts"].as_u64().unwrap() > 0);
    }

    #[test]
    fn hash_field_is_stable_and_not_reversible_looking() {
        let a = hash_field("0xwallet-address");
        let b = hash_field("0xwallet-address");
        let c = hash_field("0xother-wallet");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);
        assert!(!a.contains("wallet"));
    }
}
