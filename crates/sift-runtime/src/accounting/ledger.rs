//! Month-partitioned usage ledger.
//!
//! Each calendar month (UTC) is one file `<dir>/YYYY-MM.json` holding a JSON
//! array of flat [`UsageRecord`]s. Appends are a read-modify-write of the
//! whole file under one async mutex, finished by writing a temporary file and
//! renaming it over the target.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::Mutex;

use sift_core::UsageRecord;

/// Errors from ledger I/O.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Ledger I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Ledger file is not a JSON array of records: {0}")]
    Format(#[from] serde_json::Error),
}

pub struct UsageLedger {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl UsageLedger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding records stamped within the month of `timestamp`.
    pub fn partition_path(&self, timestamp: &DateTime<Utc>) -> PathBuf {
        self.dir.join(format!("{}.json", timestamp.format("%Y-%m")))
    }

    /// Append one record and return it as written.
    ///
    /// The record is stamped inside the critical section, so entries within
    /// a partition are in timestamp order. Existing entries are carried over
    /// untouched even if they do not parse as records.
    pub async fn append(&self, mut record: UsageRecord) -> Result<UsageRecord, LedgerError> {
        let _guard = self.write_lock.lock().await;

        record.timestamp = Utc::now();
        let path = self.partition_path(&record.timestamp);
        tokio::fs::create_dir_all(&self.dir).await?;

        let mut entries: Vec<JsonValue> = read_array(&path).await?;
        entries.push(serde_json::to_value(&record)?);

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(&entries)?).await?;
        tokio::fs::rename(&tmp, &path).await?;

        Ok(record)
    }

    /// All records of one month. A month without a file is empty.
    pub async fn read_month(&self, year: i32, month: u32) -> Result<Vec<UsageRecord>, LedgerError> {
        let path = self.dir.join(format!("{year:04}-{month:02}.json"));
        read_array(&path).await
    }
}

async fn read_array<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>, LedgerError> {
    match tokio::fs::read(path).await {
        Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(Vec::new()),
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;
    use sift_core::TokenUsage;
    use std::sync::Arc;

    fn record(session_id: &str) -> UsageRecord {
        UsageRecord {
            timestamp: Utc::now(),
            session_id: session_id.to_string(),
            model: "gpt-4o".to_string(),
            task_type: "search".to_string(),
            token_usage: TokenUsage::new(80, 20),
            cost: 0.0024,
            thinking_time: 0.0,
            content: "Lithium prices fell.".to_string(),
        }
    }

    #[tokio::test]
    async fn test_append_creates_month_file() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = UsageLedger::new(dir.path().join("costs"));

        let written = ledger.append(record("s1")).await.unwrap();
        let path = ledger.partition_path(&written.timestamp);
        assert!(path.exists());

        let raw: Vec<JsonValue> =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw.len(), 1);
        // usage fields are flattened next to the cost
        assert_eq!(raw[0]["prompt_tokens"], 80);
        assert_eq!(raw[0]["total_tokens"], 100);
        assert_eq!(raw[0]["session_id"], "s1");
    }

    #[tokio::test]
    async fn test_concurrent_appends_lose_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Arc::new(UsageLedger::new(dir.path()));

        let handles: Vec<_> = (0..20)
            .map(|i| {
                let ledger = Arc::clone(&ledger);
                tokio::spawn(async move { ledger.append(record(&format!("s{i}"))).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let now = Utc::now();
        let records = ledger.read_month(now.year(), now.month()).await.unwrap();
        assert_eq!(records.len(), 20);
        assert!(records.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[tokio::test]
    async fn test_missing_month_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = UsageLedger::new(dir.path());
        assert!(ledger.read_month(1999, 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_partition_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = UsageLedger::new(dir.path());
        let path = ledger.partition_path(&Utc::now());
        std::fs::write(&path, "{not json").unwrap();

        assert!(matches!(
            ledger.append(record("s1")).await,
            Err(LedgerError::Format(_))
        ));
    }
}
