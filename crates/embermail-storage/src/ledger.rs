//! Append-only delivery result ledger

use std::path::PathBuf;

use async_trait::async_trait;
use embermail_common::types::DeliveryResult;
use embermail_common::{Error, Result};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Where delivery results are recorded as they are produced: one append
/// per completed unit, records never mutated afterwards. Appends happen
/// while a run is in flight so partial runs are not lost.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Append a single result record
    async fn append(&self, record: &DeliveryResult) -> Result<()>;
}

/// JSON-lines file ledger: one serialized `DeliveryResult` per line, each
/// record appended and flushed on its own.
pub struct FileLedger {
    path: PathBuf,
}

impl FileLedger {
    /// Create a ledger at the given path, creating parent directories
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    Error::Ledger(format!("Failed to create ledger directory: {e}"))
                })?;
            }
        }

        info!(path = %path.display(), "Initialized result ledger");
        Ok(Self { path })
    }

    /// Path of the ledger file
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl Ledger for FileLedger {
    async fn append(&self, record: &DeliveryResult) -> Result<()> {
        let mut line = serde_json::to_string(record)
            .map_err(|e| Error::Ledger(format!("Failed to serialize result: {e}")))?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| Error::Ledger(format!("Failed to open ledger: {e}")))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| Error::Ledger(format!("Failed to append to ledger: {e}")))?;
        file.flush()
            .await
            .map_err(|e| Error::Ledger(format!("Failed to flush ledger: {e}")))?;

        debug!(recipient = %record.recipient, success = record.success, "Result appended");
        Ok(())
    }
}

/// In-memory ledger for tests and in-process summaries
#[derive(Default)]
pub struct MemoryLedger {
    records: tokio::sync::Mutex<Vec<DeliveryResult>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all appended records, in append order
    pub async fn records(&self) -> Vec<DeliveryResult> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn append(&self, record: &DeliveryResult) -> Result<()> {
        self.records.lock().await.push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embermail_common::types::Recipient;
    use pretty_assertions::assert_eq;

    fn result_for(address: &str, success: bool) -> DeliveryResult {
        let recipient = Recipient::email(address);
        if success {
            DeliveryResult::sent(&recipient, "Sent successfully", None, "test")
        } else {
            DeliveryResult::failed(&recipient, "Rejected", Some("test"))
        }
    }

    #[tokio::test]
    async fn test_file_ledger_appends_json_lines() {
        let path = std::env::temp_dir().join(format!("embermail-ledger-{}.jsonl", uuid::Uuid::new_v4()));
        let ledger = FileLedger::new(&path).unwrap();

        ledger.append(&result_for("a@x.com", true)).await.unwrap();
        ledger.append(&result_for("b@x.com", false)).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: DeliveryResult = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.recipient, "a@x.com");
        assert!(first.success);
        let second: DeliveryResult = serde_json::from_str(lines[1]).unwrap();
        assert!(!second.success);

        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn test_memory_ledger_preserves_order() {
        let ledger = MemoryLedger::new();
        ledger.append(&result_for("a@x.com", true)).await.unwrap();
        ledger.append(&result_for("b@x.com", true)).await.unwrap();

        let records = ledger.records().await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].recipient, "a@x.com");
        assert_eq!(records[1].recipient, "b@x.com");
    }
}
