//! A single time-bucketed shard of the index: its own in-memory inverted
//! index plus an on-disk JSON-lines log under `<indexDir>/partition_<bucket>/`.
//!
//! Writes are append-only on disk, but an in-memory term index makes them
//! searchable without re-reading the file.

use crate::error::{GrepwiseError, Result};
use crate::model::{LogRecord, PartitionType};
use chrono::{Datelike, TimeZone, Utc};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::instrument;

/// Computes the bucket key (`partition_<yyyy[-MM[-dd]]>`) a given timestamp
/// belongs to, plus the bucket's half-open millisecond range.
pub fn bucket_for(timestamp_ms: i64, partition_type: PartitionType) -> (String, (i64, i64)) {
    let dt = Utc.timestamp_millis_opt(timestamp_ms).single().unwrap_or_else(Utc::now);
    match partition_type {
        PartitionType::Daily => {
            let start = Utc
                .with_ymd_and_hms(dt.year(), dt.month(), dt.day(), 0, 0, 0)
                .single()
                .unwrap();
            let end = start + chrono::Duration::days(1);
            (
                format!("partition_{}", start.format("%Y-%m-%d")),
                (start.timestamp_millis(), end.timestamp_millis()),
            )
        }
        PartitionType::Weekly => {
            let days_from_monday = dt.weekday().num_days_from_monday() as i64;
            let start = Utc
                .with_ymd_and_hms(dt.year(), dt.month(), dt.day(), 0, 0, 0)
                .single()
                .unwrap()
                - chrono::Duration::days(days_from_monday);
            let end = start + chrono::Duration::days(7);
            (
                format!("partition_{}", start.format("%Y-%m-%d")),
                (start.timestamp_millis(), end.timestamp_millis()),
            )
        }
        PartitionType::Monthly => {
            let start = Utc.with_ymd_and_hms(dt.year(), dt.month(), 1, 0, 0, 0).single().unwrap();
            let end = if dt.month() == 12 {
                Utc.with_ymd_and_hms(dt.year() + 1, 1, 1, 0, 0, 0).single().unwrap()
            } else {
                Utc.with_ymd_and_hms(dt.year(), dt.month() + 1, 1, 0, 0, 0).single().unwrap()
            };
            (
                format!("partition_{}", start.format("%Y-%m")),
                (start.timestamp_millis(), end.timestamp_millis()),
            )
        }
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric() && c != '_' && c != '.' && c != '@')
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

struct PartitionData {
    records: HashMap<String, LogRecord>,
    /// token -> set of record ids.
    terms: HashMap<String, HashSet<String>>,
}

pub struct Partition {
    pub bucket: String,
    pub range: (i64, i64),
    dir: PathBuf,
    data: RwLock<PartitionData>,
    pub created_at: i64,
}

impl Partition {
    /// Opens (creating if absent) the on-disk directory for this bucket and
    /// replays any existing records so the in-memory index survives restarts.
    pub async fn open(base_dir: &PathBuf, bucket: String, range: (i64, i64)) -> Result<Self> {
        let dir = base_dir.join(&bucket);
        tokio::fs::create_dir_all(&dir).await?;
        let mut data = PartitionData {
            records: HashMap::new(),
            terms: HashMap::new(),
        };

        let log_path = dir.join("records.jsonl");
        if log_path.exists() {
            let contents = tokio::fs::read_to_string(&log_path).await?;
            for line in contents.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                if let Ok(record) = serde_json::from_str::<LogRecord>(line) {
                    index_record_terms(&mut data.terms, &record);
                    data.records.insert(record.id.clone(), record);
                }
            }
        }

        Ok(Self {
            bucket,
            range,
            dir,
            data: RwLock::new(data),
            created_at: Utc::now().timestamp_millis(),
        })
    }

    /// Appends records to this partition's on-disk log and in-memory index.
    /// The write lock on `data` serializes concurrent writers.
    #[instrument(skip(self, records))]
    pub async fn write(&self, records: Vec<LogRecord>) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let log_path = self.dir.join("records.jsonl");
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await?;

        let mut guard = self.data.write().await;
        let mut written = 0;
        for record in records {
            let line = serde_json::to_string(&record)
                .map_err(|e| GrepwiseError::Internal(format!("failed to serialize record: {e}")))?;
            file.write_all(line.as_bytes()).await?;
            file.write_all(b"\n").await?;
            index_record_terms(&mut guard.terms, &record);
            guard.records.insert(record.id.clone(), record);
            written += 1;
        }
        file.flush().await?;
        Ok(written)
    }

    /// Returns every record matching `predicate`, in no particular order;
    /// callers sort/merge across partitions.
    pub async fn scan(&self, predicate: impl Fn(&LogRecord) -> bool) -> Vec<LogRecord> {
        let guard = self.data.read().await;
        guard.records.values().filter(|r| predicate(r)).cloned().collect()
    }

    /// Candidate record ids for a single lowercased token, or `None` if the
    /// token has no postings (fast-path rejection without scanning records).
    pub async fn postings_for(&self, token: &str) -> Option<HashSet<String>> {
        let guard = self.data.read().await;
        guard.terms.get(token).cloned()
    }

    pub async fn get(&self, id: &str) -> Option<LogRecord> {
        self.data.read().await.records.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.data.read().await.records.len()
    }

    pub async fn all(&self) -> Vec<LogRecord> {
        self.data.read().await.records.values().cloned().collect()
    }

    /// Removes records with `timestamp < cutoff_ms`. Returns the removed
    /// records (for archival) and the count deleted.
    pub async fn delete_older_than(&self, cutoff_ms: i64) -> Vec<LogRecord> {
        let mut guard = self.data.write().await;
        let (to_delete, to_keep): (Vec<_>, Vec<_>) =
            guard.records.drain().partition(|(_, r)| r.timestamp < cutoff_ms);
        guard.records = to_keep.into_iter().collect();
        guard.terms.clear();
        let records: HashMap<_, _> = guard.records.clone();
        for record in records.values() {
            index_record_terms(&mut guard.terms, record);
        }
        to_delete.into_iter().map(|(_, r)| r).collect()
    }

    /// Removes this partition's on-disk directory. Called after an
    /// optional archive hand-off during retention or housekeeping eviction.
    pub async fn delete_directory(&self) -> Result<()> {
        if self.dir.exists() {
            tokio::fs::remove_dir_all(&self.dir).await?;
        }
        Ok(())
    }

    /// Rewrites the on-disk log to match the current in-memory contents.
    /// Used after in-place deletion so a restart doesn't resurrect records.
    pub async fn compact(&self) -> Result<()> {
        let guard = self.data.read().await;
        let log_path = self.dir.join("records.jsonl");
        let mut buf = String::new();
        for record in guard.records.values() {
            buf.push_str(&serde_json::to_string(record).map_err(|e| GrepwiseError::Internal(e.to_string()))?);
            buf.push('\n');
        }
        tokio::fs::write(&log_path, buf).await?;
        Ok(())
    }
}

fn index_record_terms(terms: &mut HashMap<String, HashSet<String>>, record: &LogRecord) {
    for token in tokenize(&record.message).chain(tokenize(&record.raw_content)) {
        terms.entry(token).or_default().insert(record.id.clone());
    }
    for value in record.metadata.values() {
        for token in tokenize(value) {
            terms.entry(token).or_default().insert(record.id.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LogLevel;
    use tempfile::tempdir;

    #[tokio::test]
    async fn write_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let (bucket, range) = bucket_for(Utc::now().timestamp_millis(), PartitionType::Daily);
        let partition = Partition::open(&dir.path().to_path_buf(), bucket, range).await.unwrap();
        let record = LogRecord::new(Utc::now().timestamp_millis(), LogLevel::Info, "hello world", "s", "hello world");
        let id = record.id.clone();
        partition.write(vec![record]).await.unwrap();
        assert_eq!(partition.len().await, 1);
        assert!(partition.get(&id).await.is_some());
    }

    #[tokio::test]
    async fn reopening_replays_existing_log() {
        let dir = tempdir().unwrap();
        let ts = Utc::now().timestamp_millis();
        let (bucket, range) = bucket_for(ts, PartitionType::Daily);
        {
            let partition = Partition::open(&dir.path().to_path_buf(), bucket.clone(), range).await.unwrap();
            let record = LogRecord::new(ts, LogLevel::Info, "persisted", "s", "persisted");
            partition.write(vec![record]).await.unwrap();
        }
        let reopened = Partition::open(&dir.path().to_path_buf(), bucket, range).await.unwrap();
        assert_eq!(reopened.len().await, 1);
    }

    #[tokio::test]
    async fn delete_older_than_removes_matching_records_only() {
        let dir = tempdir().unwrap();
        let (bucket, range) = bucket_for(Utc::now().timestamp_millis(), PartitionType::Daily);
        let partition = Partition::open(&dir.path().to_path_buf(), bucket, range).await.unwrap();
        partition
            .write(vec![
                LogRecord::new(1000, LogLevel::Info, "old", "s", "old"),
                LogRecord::new(9_999_999_999_000, LogLevel::Info, "new", "s", "new"),
            ])
            .await
            .unwrap();
        let deleted = partition.delete_older_than(5000).await;
        assert_eq!(deleted.len(), 1);
        assert_eq!(partition.len().await, 1);
    }

    #[test]
    fn daily_bucket_naming() {
        let ts = Utc.with_ymd_and_hms(2026, 7, 30, 12, 0, 0).unwrap().timestamp_millis();
        let (bucket, _) = bucket_for(ts, PartitionType::Daily);
        assert_eq!(bucket, "partition_2026-07-30");
    }
}
