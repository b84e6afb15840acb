//! Migration ledger.
//!
//! Append-only record of which migration steps have completed on each
//! network, serving as the durable cursor the executor resumes from. One
//! JSON document per network id keeps the write-serialization scope equal
//! to the
//! per-network sequencing the executor needs: an async mutex serializes
//! writers inside the process, an fs2 exclusive lock serializes across
//! processes, and every write lands via temp file + rename.
//!
//! The ledger may legitimately under-report after a crash (transaction
//! mined, record not yet written). That is why step `apply` actions are
//! required to be idempotent: the executor will simply run the step again.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use alloy_primitives::B256;
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::error::{OrchestrateError, Result};

/// One completed migration step on one network. Never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub network_id: String,
    pub sequence: u64,
    pub name: String,
    /// RFC 3339 UTC timestamp of when the step completed.
    pub applied_at: String,
    /// Transactions the step submitted, in order.
    pub tx_hashes: Vec<B256>,
}

impl MigrationRecord {
    /// Build a record stamped with the current time.
    pub fn new(network_id: &str, sequence: u64, name: &str, tx_hashes: Vec<B256>) -> Self {
        Self {
            network_id: network_id.to_string(),
            sequence,
            name: name.to_string(),
            applied_at: chrono::Utc::now().to_rfc3339(),
            tx_hashes,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerDocument {
    #[serde(default)]
    records: Vec<MigrationRecord>,
}

/// File-backed, append-only migration ledger.
pub struct MigrationLedger {
    dir: PathBuf,
    // Per-network write serialization within this process.
    locks: std::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl MigrationLedger {
    /// Open a ledger directory, creating it if needed.
    pub fn open(dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&dir).map_err(|e| {
            OrchestrateError::Ledger(format!(
                "failed to create ledger directory {}: {e}",
                dir.display()
            ))
        })?;
        Ok(Self {
            dir,
            locks: std::sync::Mutex::new(HashMap::new()),
        })
    }

    /// Highest sequence number recorded for a network, if any.
    pub fn last_applied(&self, network_id: &str) -> Result<Option<u64>> {
        let document = self.load(network_id)?;
        Ok(document.records.iter().map(|r| r.sequence).max())
    }

    /// Whether a specific step has been recorded for a network.
    pub fn has_applied(&self, network_id: &str, sequence: u64) -> Result<bool> {
        let document = self.load(network_id)?;
        Ok(document.records.iter().any(|r| r.sequence == sequence))
    }

    /// All records for a network, in application order.
    pub fn records(&self, network_id: &str) -> Result<Vec<MigrationRecord>> {
        Ok(self.load(network_id)?.records)
    }

    /// Durably append a record.
    ///
    /// The step counts as applied only once this returns. Sequence numbers
    /// must move strictly forward; recording at or below the current cursor
    /// is a configuration error, not an overwrite.
    pub async fn record(&self, network_id: &str, record: MigrationRecord) -> Result<()> {
        if record.network_id != network_id {
            return Err(OrchestrateError::Configuration(format!(
                "record for network {} submitted to ledger of {network_id}",
                record.network_id
            )));
        }

        let guard = self.network_lock(network_id);
        let _held = guard.lock().await;

        let lock_file = self.acquire_file_lock(network_id)?;

        let mut document = self.load(network_id)?;
        if let Some(last) = document.records.iter().map(|r| r.sequence).max()
            && record.sequence <= last
        {
            return Err(OrchestrateError::Configuration(format!(
                "sequence regression on {network_id}: step {} recorded after {last}",
                record.sequence
            )));
        }

        tracing::debug!(
            network = %network_id,
            step = record.sequence,
            name = %record.name,
            "Recording migration"
        );

        document.records.push(record);
        let result = self.persist(network_id, &document);

        let _ = FileExt::unlock(&lock_file);
        result
    }

    fn network_lock(&self, network_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks
            .entry(network_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn acquire_file_lock(&self, network_id: &str) -> Result<std::fs::File> {
        let lock_path = self.dir.join(format!("{network_id}.lock"));
        let file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| {
                OrchestrateError::Ledger(format!("failed to open {}: {e}", lock_path.display()))
            })?;
        file.lock_exclusive().map_err(|e| {
            OrchestrateError::Ledger(format!("failed to lock {}: {e}", lock_path.display()))
        })?;
        Ok(file)
    }

    fn document_path(&self, network_id: &str) -> PathBuf {
        self.dir.join(format!("{network_id}.json"))
    }

    fn load(&self, network_id: &str) -> Result<LedgerDocument> {
        let path = self.document_path(network_id);
        if !path.exists() {
            return Ok(LedgerDocument::default());
        }
        let content = std::fs::read_to_string(&path).map_err(|e| {
            OrchestrateError::Ledger(format!("failed to read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            OrchestrateError::Ledger(format!("corrupt ledger {}: {e}", path.display()))
        })
    }

    fn persist(&self, network_id: &str, document: &LedgerDocument) -> Result<()> {
        let path = self.document_path(network_id);
        let json = serde_json::to_string_pretty(document)
            .map_err(|e| OrchestrateError::Ledger(format!("failed to serialize ledger: {e}")))?;

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| {
            OrchestrateError::Ledger(format!("failed to write {}: {e}", tmp.display()))
        })?;
        std::fs::rename(&tmp, &path).map_err(|e| {
            OrchestrateError::Ledger(format!("failed to commit {}: {e}", path.display()))
        })
    }
}
