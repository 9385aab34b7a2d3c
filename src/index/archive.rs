//! Archive Store: compresses log records evicted from the index into a ZIP
//! file before deletion, so retention never loses data outright.

use crate::error::{GrepwiseError, Result};
use crate::model::{ArchiveMetadata, LogRecord};
use chrono::Utc;
use std::io::{Read, Write};
use std::path::PathBuf;
use tracing::instrument;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub struct ArchiveStore {
    dir: PathBuf,
}

impl ArchiveStore {
    pub fn new(dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// The sidecar metadata path for a given archive filename:
    /// `archive_<ts>_<uuid>.zip` -> `archive_<ts>_<uuid>.meta.json`.
    fn meta_path_for(&self, filename: &str) -> PathBuf {
        self.dir.join(format!("{}.meta.json", filename.trim_end_matches(".zip")))
    }

    /// Writes `records` as a single `records.jsonl` entry inside a new ZIP
    /// archive, persists a `meta.json` sidecar carrying its `ArchiveMetadata`
    /// (including the generated id, so it survives process restarts), and
    /// returns that metadata. The filename follows
    /// `archive_<yyyyMMddHHmmss>_<uuid>.zip`.
    #[instrument(skip(self, records))]
    pub async fn archive(&self, records: &[LogRecord]) -> Result<ArchiveMetadata> {
        if records.is_empty() {
            return Err(GrepwiseError::Validation("cannot archive an empty batch".into()));
        }
        let now = Utc::now();
        let id = uuid::Uuid::new_v4().to_string();
        let filename = format!("archive_{}_{}.zip", now.format("%Y%m%d%H%M%S"), id);
        let path = self.dir.join(&filename);

        let mut jsonl = String::new();
        for record in records {
            jsonl.push_str(&serde_json::to_string(record).map_err(|e| GrepwiseError::Internal(e.to_string()))?);
            jsonl.push('\n');
        }

        let path_clone = path.clone();
        let size_bytes = tokio::task::spawn_blocking(move || -> Result<u64> {
            let file = std::fs::File::create(&path_clone)?;
            let mut zip = ZipWriter::new(file);
            let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
            zip.start_file("records.jsonl", options)
                .map_err(|e| GrepwiseError::Internal(format!("zip write failed: {e}")))?;
            zip.write_all(jsonl.as_bytes())?;
            zip.finish().map_err(|e| GrepwiseError::Internal(format!("zip finalize failed: {e}")))?;
            Ok(std::fs::metadata(&path_clone)?.len())
        })
        .await
        .map_err(|e| GrepwiseError::Internal(format!("archive task panicked: {e}")))??;

        let time_range_start = records.iter().map(|r| r.timestamp).min().unwrap();
        let time_range_end = records.iter().map(|r| r.timestamp).max().unwrap();

        let metadata = ArchiveMetadata {
            id,
            filename,
            created_at: now.timestamp_millis(),
            log_count: records.len() as u64,
            size_bytes,
            time_range_start,
            time_range_end,
        };

        let meta_path = self.meta_path_for(&metadata.filename);
        let meta_json = serde_json::to_vec_pretty(&metadata).map_err(|e| GrepwiseError::Internal(e.to_string()))?;
        tokio::fs::write(&meta_path, meta_json).await?;

        Ok(metadata)
    }

    /// Reads every `LogRecord` back out of a previously written archive.
    pub async fn read_archive(&self, filename: &str) -> Result<Vec<LogRecord>> {
        let path = self.dir.join(filename);
        tokio::task::spawn_blocking(move || -> Result<Vec<LogRecord>> {
            let file = std::fs::File::open(&path)?;
            let mut zip = ZipArchive::new(file).map_err(|e| GrepwiseError::Internal(format!("zip open failed: {e}")))?;
            let mut entry = zip
                .by_name("records.jsonl")
                .map_err(|e| GrepwiseError::NotFound(format!("records.jsonl missing in archive: {e}")))?;
            let mut buf = String::new();
            entry.read_to_string(&mut buf)?;
            Ok(buf
                .lines()
                .filter(|l| !l.trim().is_empty())
                .filter_map(|l| serde_json::from_str(l).ok())
                .collect())
        })
        .await
        .map_err(|e| GrepwiseError::Internal(format!("archive task panicked: {e}")))?
    }

    /// Looks up an archive's persisted metadata by id. Metadata absent
    /// implies the archive is gone.
    fn find_metadata(&self, id: &str) -> Result<ArchiveMetadata> {
        if self.dir.exists() {
            for entry in std::fs::read_dir(&self.dir)? {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().to_string();
                if !name.ends_with(".meta.json") {
                    continue;
                }
                let text = std::fs::read_to_string(entry.path())?;
                let metadata: ArchiveMetadata =
                    serde_json::from_str(&text).map_err(|e| GrepwiseError::Internal(e.to_string()))?;
                if metadata.id == id {
                    return Ok(metadata);
                }
            }
        }
        Err(GrepwiseError::NotFound(format!("archive not found: {id}")))
    }

    /// Deletes an archive by id, removing both the ZIP file and its
    /// `meta.json` sidecar. Metadata absent implies the archive is already
    /// gone, reported as `NotFound`.
    pub async fn delete_archive(&self, id: &str) -> Result<()> {
        let metadata = self.find_metadata(id)?;
        let zip_path = self.dir.join(&metadata.filename);
        let meta_path = self.meta_path_for(&metadata.filename);
        let _ = tokio::fs::remove_file(&zip_path).await;
        tokio::fs::remove_file(&meta_path).await?;
        Ok(())
    }

    pub fn path_for(&self, filename: &str) -> PathBuf {
        self.dir.join(filename)
    }

    /// Lists every archive's persisted metadata, read straight from each
    /// `meta.json` sidecar rather than re-derived from the ZIP contents, so
    /// the id and timestamps are stable across calls and process restarts.
    pub fn list_archives(&self) -> Result<Vec<ArchiveMetadata>> {
        let mut archives = Vec::new();
        if !self.dir.exists() {
            return Ok(archives);
        }
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.ends_with(".meta.json") {
                continue;
            }
            let text = std::fs::read_to_string(entry.path())?;
            let metadata: ArchiveMetadata =
                serde_json::from_str(&text).map_err(|e| GrepwiseError::Internal(e.to_string()))?;
            archives.push(metadata);
        }
        archives.sort_by_key(|a| a.created_at);
        Ok(archives)
    }
}
