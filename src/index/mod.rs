//! Index Engine (C3): partitions incoming records by time bucket, maintains
//! a per-partition inverted index for full-text and regex search, and owns
//! the Search Cache and Archive Store as collaborators.
//!
//! `DashMap` backs the concurrent partition registry; each partition is an
//! `Arc<Partition>` shard so reads never block on unrelated buckets.

mod archive;
mod cache;
mod partition;

pub use archive::ArchiveStore;
pub use cache::{CacheKey, CacheStatsSnapshot, SearchCache};
pub use partition::{bucket_for, Partition};

use crate::config::AppConfig;
use crate::error::{GrepwiseError, Result};
use crate::model::{LogRecord, PartitionType};
use dashmap::DashMap;
use regex::Regex;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Per-call cap so a pathological query can't pin unbounded memory.
const MAX_RESULTS: usize = 10_000;

pub struct IndexEngine {
    index_dir: std::path::PathBuf,
    partition_type: PartitionType,
    max_active_partitions: usize,
    auto_archive: bool,
    partitions: DashMap<String, Arc<Partition>>,
    /// Insertion order of buckets, oldest first, for the max-active eviction policy.
    order: std::sync::Mutex<Vec<String>>,
    cache: SearchCache,
    archive: ArchiveStore,
}

impl IndexEngine {
    pub fn new(config: AppConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.index_path)?;
        let archive = ArchiveStore::new(config.archive_directory.clone())?;
        let cache = SearchCache::new(config.cache.enabled, config.cache.max_size, config.cache.ttl_ms);
        Ok(Self {
            index_dir: config.index_path,
            partition_type: config.partition.partition_type,
            max_active_partitions: config.partition.max_active,
            auto_archive: config.partition.auto_archive,
            partitions: DashMap::new(),
            order: std::sync::Mutex::new(Vec::new()),
            cache,
            archive,
        })
    }

    async fn get_or_create_partition(&self, bucket: &str, range: (i64, i64)) -> Result<Arc<Partition>> {
        if let Some(p) = self.partitions.get(bucket) {
            return Ok(p.clone());
        }
        let partition = Arc::new(Partition::open(&self.index_dir, bucket.to_string(), range).await?);
        self.partitions.insert(bucket.to_string(), partition.clone());
        self.order.lock().unwrap().push(bucket.to_string());
        self.enforce_active_limit().await?;
        Ok(partition)
    }

    /// Closes the oldest partitions (archiving first, if configured) once
    /// the number of open partitions exceeds `max_active_partitions`.
    async fn enforce_active_limit(&self) -> Result<()> {
        loop {
            let over_limit = self.partitions.len() > self.max_active_partitions;
            if !over_limit {
                return Ok(());
            }
            let oldest = {
                let mut order = self.order.lock().unwrap();
                if order.is_empty() {
                    return Ok(());
                }
                order.remove(0)
            };
            let Some((_, partition)) = self.partitions.remove(&oldest) else {
                continue;
            };
            if self.auto_archive {
                let records = partition.all().await;
                if !records.is_empty() {
                    if let Err(e) = self.archive.archive(&records).await {
                        warn!(error = %e, bucket = %oldest, "failed to archive evicted partition");
                    }
                }
            }
            partition.delete_directory().await?;
            info!(bucket = %oldest, "closed partition over max-active limit");
        }
    }

    /// Writes `batch` to the appropriate partitions, grouped by time bucket.
    /// Invalidates any cached search results overlapping the batch's range.
    /// Returns the count of records actually written.
    #[instrument(skip(self, batch))]
    pub async fn index(&self, batch: Vec<LogRecord>) -> Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }
        let (mut lo, mut hi) = (i64::MAX, i64::MIN);
        let mut grouped: std::collections::HashMap<String, (Vec<LogRecord>, (i64, i64))> = std::collections::HashMap::new();
        for record in batch {
            lo = lo.min(record.timestamp);
            hi = hi.max(record.timestamp);
            let (bucket, range) = bucket_for(record.timestamp, self.partition_type);
            grouped.entry(bucket).or_insert_with(|| (Vec::new(), range)).0.push(record);
        }

        let mut written = 0;
        for (bucket, (records, range)) in grouped {
            let partition = self.get_or_create_partition(&bucket, range).await?;
            written += partition.write(records).await?;
        }

        self.cache.invalidate_range(lo, hi);
        Ok(written)
    }

    /// Every open partition whose range could contain `[start, end]`
    /// (`None` bounds mean unbounded).
    fn partitions_in_range(&self, start: Option<i64>, end: Option<i64>) -> Vec<Arc<Partition>> {
        self.partitions
            .iter()
            .filter(|entry| {
                let (p_start, p_end) = entry.value().range;
                let after_start = end.map(|e| p_start <= e).unwrap_or(true);
                let before_end = start.map(|s| p_end >= s).unwrap_or(true);
                after_start && before_end
            })
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Full-text or regex search across all matching partitions, most
    /// recent first, capped at [`MAX_RESULTS`].
    #[instrument(skip(self))]
    pub async fn search(
        &self,
        query: &str,
        is_regex: bool,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<Vec<LogRecord>> {
        let key = CacheKey {
            query: query.to_string(),
            is_regex,
            start,
            end,
        };
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached);
        }

        let single_token = if is_regex { None } else { NativeQuery::parse(query).single_free_text_token() };

        let predicate: Box<dyn Fn(&LogRecord) -> bool + Send + Sync> = if is_regex {
            let re = Regex::new(query).map_err(|e| GrepwiseError::ParseFailure(format!("invalid regex: {e}")))?;
            Box::new(move |r: &LogRecord| re.is_match(&r.message) || re.is_match(&r.raw_content))
        } else {
            let expr = NativeQuery::parse(query);
            Box::new(move |r: &LogRecord| expr.matches(r))
        };

        let mut results = Vec::new();
        for partition in self.partitions_in_range(start, end) {
            let in_range = |r: &LogRecord| {
                start.map(|s| r.timestamp >= s).unwrap_or(true) && end.map(|e| r.timestamp <= e).unwrap_or(true)
            };
            // A single free-text term has a corresponding posting list; skip
            // scanning the whole partition when it has no postings for the
            // term at all, and otherwise only fetch the candidate ids.
            let mut matches = if let Some(token) = &single_token {
                match partition.postings_for(token).await {
                    None => Vec::new(),
                    Some(ids) => {
                        let mut m = Vec::with_capacity(ids.len());
                        for id in ids {
                            if let Some(record) = partition.get(&id).await {
                                if in_range(&record) && predicate(&record) {
                                    m.push(record);
                                }
                            }
                        }
                        m
                    }
                }
            } else {
                partition.scan(|r| in_range(r) && predicate(r)).await
            };
            results.append(&mut matches);
        }
        results.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        results.truncate(MAX_RESULTS);

        self.cache.put(key, results.clone());
        Ok(results)
    }

    pub async fn find_by_id(&self, id: &str) -> Option<LogRecord> {
        for partition in self.partitions.iter() {
            if let Some(record) = partition.value().get(id).await {
                return Some(record);
            }
        }
        None
    }

    pub async fn find_by_level(&self, level: crate::model::LogLevel) -> Vec<LogRecord> {
        let mut out = Vec::new();
        for partition in self.all_partitions() {
            out.extend(partition.scan(|r| r.level == level).await);
        }
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        out.truncate(MAX_RESULTS);
        out
    }

    pub async fn find_by_source(&self, source: &str) -> Vec<LogRecord> {
        let mut out = Vec::new();
        for partition in self.all_partitions() {
            out.extend(partition.scan(|r| r.source == source).await);
        }
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        out.truncate(MAX_RESULTS);
        out
    }

    fn all_partitions(&self) -> Vec<Arc<Partition>> {
        self.partitions.iter().map(|e| e.value().clone()).collect()
    }

    /// Deletes records older than `cutoff_ms` across all partitions,
    /// archiving each affected partition's removed records first when
    /// auto-archive is enabled. Returns the total count deleted.
    #[instrument(skip(self))]
    pub async fn delete_logs_older_than(&self, cutoff_ms: i64) -> Result<u64> {
        let mut total = 0u64;
        for partition in self.all_partitions() {
            let removed = partition.delete_older_than(cutoff_ms).await;
            if removed.is_empty() {
                continue;
            }
            if self.auto_archive {
                if let Err(e) = self.archive.archive(&removed).await {
                    warn!(error = %e, bucket = %partition.bucket, "failed to archive before delete");
                }
            }
            partition.compact().await?;
            total += removed.len() as u64;
        }
        if total > 0 {
            self.cache.clear();
        }
        Ok(total)
    }

    pub fn archive_store(&self) -> &ArchiveStore {
        &self.archive
    }

    pub fn cache_stats(&self) -> CacheStatsSnapshot {
        self.cache.stats()
    }

    pub fn active_partition_count(&self) -> usize {
        self.partitions.len()
    }
}

/// A small boolean query language over indexed fields: whitespace-separated
/// terms are ANDed; `field:value` matches `level`/`source`/a metadata key
/// exactly (case-insensitive for `level`); any other term is a
/// case-insensitive substring match against the message or raw content;
/// `*` alone matches everything.
struct NativeQuery {
    terms: Vec<Term>,
}

enum Term {
    Field(String, String),
    FreeText(String),
}

impl NativeQuery {
    fn parse(query: &str) -> Self {
        let trimmed = query.trim();
        if trimmed.is_empty() || trimmed == "*" {
            return Self { terms: Vec::new() };
        }
        let terms = trimmed
            .split_whitespace()
            .map(|tok| match tok.split_once(':') {
                Some((field, value)) if !field.is_empty() => Term::Field(field.to_lowercase(), value.to_lowercase()),
                _ => Term::FreeText(tok.to_lowercase()),
            })
            .collect();
        Self { terms }
    }

    /// The query's token when it's exactly one free-text term, suitable for
    /// a direct posting-list lookup rather than a full partition scan.
    fn single_free_text_token(&self) -> Option<String> {
        match self.terms.as_slice() {
            [Term::FreeText(text)] => Some(text.clone()),
            _ => None,
        }
    }

    fn matches(&self, record: &LogRecord) -> bool {
        self.terms.iter().all(|term| match term {
            Term::Field(field, value) => match field.as_str() {
                "level" => record.level.as_str().eq_ignore_ascii_case(value),
                "source" => record.source.to_lowercase().contains(value),
                other => record
                    .metadata
                    .get(other)
                    .map(|v| v.to_lowercase() == *value)
                    .unwrap_or(false),
            },
            Term::FreeText(text) => {
                record.message.to_lowercase().contains(text) || record.raw_content.to_lowercase().contains(text)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LogLevel;
    use tempfile::tempdir;

    fn test_config(dir: &std::path::Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.index_path = dir.join("index");
        config.archive_directory = dir.join("archive");
        config.partition.max_active = 2;
        config
    }

    #[tokio::test]
    async fn index_then_search_finds_record() {
        let dir = tempdir().unwrap();
        let engine = IndexEngine::new(test_config(dir.path())).unwrap();
        let record = LogRecord::new(
            chrono::Utc::now().timestamp_millis(),
            LogLevel::Error,
            "database connection refused",
            "app",
            "database connection refused",
        );
        engine.index(vec![record]).await.unwrap();
        let results = engine.search("connection", false, None, None).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn search_is_cached_on_repeat_query() {
        let dir = tempdir().unwrap();
        let engine = IndexEngine::new(test_config(dir.path())).unwrap();
        let ts = chrono::Utc::now().timestamp_millis();
        engine
            .index(vec![LogRecord::new(ts, LogLevel::Info, "hello", "app", "hello")])
            .await
            .unwrap();
        engine.search("hello", false, None, None).await.unwrap();
        engine.search("hello", false, None, None).await.unwrap();
        assert_eq!(engine.cache_stats().hits, 1);
    }

    #[tokio::test]
    async fn write_invalidates_overlapping_cache_entry() {
        let dir = tempdir().unwrap();
        let engine = IndexEngine::new(test_config(dir.path())).unwrap();
        let ts = chrono::Utc::now().timestamp_millis();
        engine
            .index(vec![LogRecord::new(ts, LogLevel::Info, "hello", "app", "hello")])
            .await
            .unwrap();
        engine.search("hello", false, None, None).await.unwrap();
        engine
            .index(vec![LogRecord::new(ts, LogLevel::Info, "hello again", "app", "hello again")])
            .await
            .unwrap();
        let results = engine.search("hello", false, None, None).await.unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn field_query_filters_by_level() {
        let dir = tempdir().unwrap();
        let engine = IndexEngine::new(test_config(dir.path())).unwrap();
        let ts = chrono::Utc::now().timestamp_millis();
        engine
            .index(vec![
                LogRecord::new(ts, LogLevel::Error, "boom", "app", "boom"),
                LogRecord::new(ts, LogLevel::Info, "boom", "app", "boom"),
            ])
            .await
            .unwrap();
        let results = engine.search("level:error", false, None, None).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].level, LogLevel::Error);
    }

    #[tokio::test]
    async fn delete_older_than_removes_and_archives() {
        let dir = tempdir().unwrap();
        let engine = IndexEngine::new(test_config(dir.path())).unwrap();
        engine
            .index(vec![LogRecord::new(1000, LogLevel::Info, "old", "app", "old")])
            .await
            .unwrap();
        let deleted = engine.delete_logs_older_than(5000).await.unwrap();
        assert_eq!(deleted, 1);
    }

    #[tokio::test]
    async fn find_by_id_scans_across_partitions() {
        let dir = tempdir().unwrap();
        let engine = IndexEngine::new(test_config(dir.path())).unwrap();
        let record = LogRecord::new(chrono::Utc::now().timestamp_millis(), LogLevel::Info, "x", "app", "x");
        let id = record.id.clone();
        engine.index(vec![record]).await.unwrap();
        assert!(engine.find_by_id(&id).await.is_some());
        assert!(engine.find_by_id("missing").await.is_none());
    }
}
