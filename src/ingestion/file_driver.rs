//! File driver (C8): tails files under a directory matching a glob-style
//! pattern, resuming from a tracked `(offset, inode)` per path.
//!
//! A scan-interval `tokio::time::interval` re-lists the directory each tick
//! rather than watching for filesystem events, so it behaves the same way
//! across platforms without an inotify/kqueue dependency.

use crate::buffer::LogBuffer;
use crate::parsers::ParserChain;
use dashmap::DashMap;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::time::{interval, Duration};
use tracing::{instrument, warn};

#[derive(Clone, Copy, Default)]
struct FileCursor {
    offset: u64,
    inode: u64,
}

/// Simple shell-style glob match supporting `*` and `?`; sufficient for the
/// file patterns (`*.log`, `access.log`, etc.) sources declare.
pub fn glob_match(pattern: &str, name: &str) -> bool {
    fn inner(p: &[u8], n: &[u8]) -> bool {
        match (p.first(), n.first()) {
            (None, None) => true,
            (Some(b'*'), _) => inner(&p[1..], n) || (!n.is_empty() && inner(p, &n[1..])),
            (Some(b'?'), Some(_)) => inner(&p[1..], &n[1..]),
            (Some(pc), Some(nc)) if pc == nc => inner(&p[1..], &n[1..]),
            _ => false,
        }
    }
    inner(pattern.as_bytes(), name.as_bytes())
}

pub fn spawn_file_driver(
    directory_path: String,
    file_pattern: String,
    scan_interval_seconds: u64,
    source_name: String,
    buffer: Arc<LogBuffer>,
) -> tokio::sync::mpsc::Sender<()> {
    let (tx, mut rx) = tokio::sync::mpsc::channel(1);
    tokio::spawn(async move {
        let cursors: DashMap<PathBuf, FileCursor> = DashMap::new();
        let parsers = ParserChain::new();
        let mut ticker = interval(Duration::from_secs(scan_interval_seconds.max(1)));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    scan_once(&directory_path, &file_pattern, &source_name, &cursors, &parsers, &buffer).await;
                }
                _ = rx.recv() => {
                    warn!(source = %source_name, "file driver received stop signal");
                    break;
                }
            }
        }
    });
    tx
}

#[instrument(skip(cursors, parsers, buffer))]
async fn scan_once(
    directory_path: &str,
    file_pattern: &str,
    source_name: &str,
    cursors: &DashMap<PathBuf, FileCursor>,
    parsers: &ParserChain,
    buffer: &Arc<LogBuffer>,
) {
    let mut dir = match tokio::fs::read_dir(directory_path).await {
        Ok(d) => d,
        Err(e) => {
            warn!(directory = %directory_path, error = %e, "failed to read source directory");
            return;
        }
    };

    while let Ok(Some(entry)) = dir.next_entry().await {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !glob_match(file_pattern, name) {
            continue;
        }
        if let Err(e) = tail_file(&path, source_name, cursors, parsers, buffer).await {
            warn!(path = %path.display(), error = %e, "failed to tail file");
        }
    }
}

async fn tail_file(
    path: &Path,
    source_name: &str,
    cursors: &DashMap<PathBuf, FileCursor>,
    parsers: &ParserChain,
    buffer: &Arc<LogBuffer>,
) -> std::io::Result<()> {
    let metadata = tokio::fs::metadata(path).await?;
    let inode = metadata.ino();
    let size = metadata.len();

    let mut cursor = cursors.get(path).map(|c| *c).unwrap_or_default();
    if cursor.inode != inode || size < cursor.offset {
        // Truncation or file replacement: restart from the beginning.
        cursor = FileCursor { offset: 0, inode };
    }
    if size <= cursor.offset {
        cursors.insert(path.to_path_buf(), cursor);
        return Ok(());
    }

    let mut file = tokio::fs::File::open(path).await?;
    file.seek(std::io::SeekFrom::Start(cursor.offset)).await?;
    let mut reader = BufReader::new(file);
    let mut records = Vec::new();
    let mut line = String::new();
    let mut consumed = cursor.offset;
    loop {
        line.clear();
        let read = reader.read_line(&mut line).await?;
        if read == 0 {
            break;
        }
        consumed += read as u64;
        let trimmed = line.trim_end_matches(['\n', '\r']);
        if trimmed.is_empty() {
            continue;
        }
        if let Some(record) = parsers.parse(trimmed, source_name) {
            records.push(record);
        }
    }

    cursors.insert(path.to_path_buf(), FileCursor { offset: consumed, inode });
    if !records.is_empty() {
        let count = records.len();
        buffer.add_all(records).await;
        tracing::debug!(path = %path.display(), count, "tailed new lines");
    }
    Ok(())
}
