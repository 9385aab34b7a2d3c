//! Log Buffer (C2): a bounded in-memory queue between ingestion drivers and
//! the Index Engine, with size- and time-triggered flush.
//!
//! A `tokio::time::interval` drives a background flusher task alongside
//! synchronous size-triggered flushes from `add`/`add_all`.

use crate::index::IndexEngine;
use crate::model::LogRecord;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{interval, Duration};
use tracing::{debug, error, instrument, warn};

/// Counters exposed for observability; the buffer's failure policy (drop on
/// `index` failure) is communicated to callers through these, not through a
/// retried write.
#[derive(Debug, Default)]
pub struct BufferMetrics {
    pub flushed: AtomicU64,
    pub dropped: AtomicU64,
}

pub struct LogBuffer {
    records: Mutex<Vec<LogRecord>>,
    max_buffer_size: usize,
    index: Arc<IndexEngine>,
    pub metrics: Arc<BufferMetrics>,
}

impl LogBuffer {
    pub fn new(max_buffer_size: usize, index: Arc<IndexEngine>) -> Self {
        Self {
            records: Mutex::new(Vec::with_capacity(max_buffer_size)),
            max_buffer_size,
            index,
            metrics: Arc::new(BufferMetrics::default()),
        }
    }

    /// Appends one record; triggers an immediate flush once the buffer
    /// reaches `max_buffer_size`.
    #[instrument(skip(self, record))]
    pub async fn add(&self, record: LogRecord) -> bool {
        let should_flush = {
            let mut guard = self.records.lock().await;
            guard.push(record);
            guard.len() >= self.max_buffer_size
        };
        if should_flush {
            self.flush().await;
        }
        true
    }

    /// Appends a batch atomically with respect to ordering within the call;
    /// may trigger one or more flushes.
    pub async fn add_all(&self, records: Vec<LogRecord>) -> usize {
        let count = records.len();
        let should_flush = {
            let mut guard = self.records.lock().await;
            guard.extend(records);
            guard.len() >= self.max_buffer_size
        };
        if should_flush {
            self.flush().await;
        }
        count
    }

    /// Drains the buffer into a single batch and hands it to the Index
    /// Engine. On failure the batch is dropped (logged, counted), never
    /// retried in place.
    #[instrument(skip(self))]
    pub async fn flush(&self) -> usize {
        let batch = {
            let mut guard = self.records.lock().await;
            std::mem::take(&mut *guard)
        };
        if batch.is_empty() {
            return 0;
        }
        let batch_len = batch.len();
        match self.index.index(batch).await {
            Ok(written) => {
                self.metrics.flushed.fetch_add(written as u64, Ordering::Relaxed);
                debug!(written, "flushed batch to index");
                written
            }
            Err(e) => {
                self.metrics.dropped.fetch_add(batch_len as u64, Ordering::Relaxed);
                error!(error = %e, dropped = batch_len, "dropping batch after index failure");
                0
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }
}

/// Spawns the background flusher task; returns a cooperative stop handle.
pub fn spawn_flusher(buffer: Arc<LogBuffer>, flush_interval_ms: u64) -> tokio::sync::mpsc::Sender<()> {
    let (tx, mut rx) = tokio::sync::mpsc::channel(1);
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_millis(flush_interval_ms));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    buffer.flush().await;
                }
                _ = rx.recv() => {
                    warn!("log buffer flusher received stop signal");
                    buffer.flush().await;
                    break;
                }
            }
        }
    });
    tx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::model::LogLevel;
    use tempfile::tempdir;

    async fn test_index() -> Arc<IndexEngine> {
        let dir = tempdir().unwrap();
        let mut config = AppConfig::default();
        config.index_path = dir.path().join("index");
        config.archive_directory = dir.path().join("archive");
        Arc::new(IndexEngine::new(config).unwrap())
    }

    #[tokio::test]
    async fn add_triggers_flush_at_capacity() {
        let index = test_index().await;
        let buffer = LogBuffer::new(2, index.clone());
        buffer
            .add(LogRecord::new(1, LogLevel::Info, "a", "s", "a"))
            .await;
        assert_eq!(buffer.len().await, 1);
        buffer
            .add(LogRecord::new(2, LogLevel::Info, "b", "s", "b"))
            .await;
        // Capacity reached -> synchronous flush drains the buffer.
        assert_eq!(buffer.len().await, 0);
        assert_eq!(buffer.metrics.flushed.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn flush_is_idempotent_on_empty_buffer() {
        let index = test_index().await;
        let buffer = LogBuffer::new(10, index);
        assert_eq!(buffer.flush().await, 0);
    }

    #[tokio::test]
    async fn add_all_preserves_count() {
        let index = test_index().await;
        let buffer = LogBuffer::new(10, index);
        let records = vec![
            LogRecord::new(1, LogLevel::Info, "a", "s", "a"),
            LogRecord::new(2, LogLevel::Info, "b", "s", "b"),
        ];
        let added = buffer.add_all(records).await;
        assert_eq!(added, 2);
        assert_eq!(buffer.len().await, 2);
    }
}
