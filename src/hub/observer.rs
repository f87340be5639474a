//! Activity observer: incremental tailing of append-only activity logs.
//!
//! Each watched file has a byte cursor. A poll reads only the bytes appended
//! since the last poll, so every complete line is delivered exactly once.
//! A file that shrinks or is replaced yields no data; the cursor never moves
//! backwards.

use std::collections::HashMap;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, info, warn};

use super::message::DEFAULT_PROJECT;
use super::transcript::parse_activity_line;

/// Incomplete trailing lines longer than this are discarded.
const MAX_CARRY_BYTES: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityRecord {
    pub project: String,
    pub text: String,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug)]
struct WatchEntry {
    offset: u64,
    /// Bytes after the last newline, held until the line completes.
    carry: Vec<u8>,
}

pub struct ActivityObserver {
    entries: HashMap<PathBuf, WatchEntry>,
    max_entry_chars: usize,
}

impl ActivityObserver {
    pub fn new(max_entry_chars: usize) -> Self {
        Self {
            entries: HashMap::new(),
            max_entry_chars,
        }
    }

    /// Start tailing `path` from its current end. Returns false if the file
    /// is already watched or cannot be read.
    pub async fn watch(&mut self, path: &Path) -> bool {
        if self.entries.contains_key(path) {
            return false;
        }
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => {
                debug!("Watching {} from offset {}", path.display(), meta.len());
                self.entries.insert(
                    path.to_path_buf(),
                    WatchEntry {
                        offset: meta.len(),
                        carry: Vec::new(),
                    },
                );
                true
            }
            Ok(_) => false,
            Err(e) => {
                debug!("Cannot watch {}: {e}", path.display());
                false
            }
        }
    }

    pub fn unwatch(&mut self, path: &Path) -> bool {
        self.entries.remove(path).is_some()
    }

    /// Unwatch files not modified within `active_within`. Returns the paths dropped.
    pub async fn prune_idle(&mut self, active_within: Duration) -> Vec<PathBuf> {
        let now = SystemTime::now();
        let mut idle = Vec::new();
        for path in self.entries.keys() {
            let Ok(meta) = tokio::fs::metadata(path).await else {
                // Missing files are dropped by the next poll.
                continue;
            };
            if !is_recent(&meta, now, active_within) {
                idle.push(path.clone());
            }
        }
        for path in &idle {
            self.unwatch(path);
        }
        idle
    }

    pub fn is_watching(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }

    pub fn watched(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.entries.keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn offset(&self, path: &Path) -> Option<u64> {
        self.entries.get(path).map(|e| e.offset)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Read newly appended bytes from every watched file and hand each parsed
    /// record to `handler`. Returns the number of records delivered.
    pub async fn poll(&mut self, handler: &mut (dyn FnMut(&Path, ActivityRecord) + Send)) -> usize {
        let mut gone = Vec::new();
        let mut delivered = 0;

        for (path, entry) in &mut self.entries {
            let size = match tokio::fs::metadata(path).await {
                Ok(meta) => meta.len(),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    gone.push(path.clone());
                    continue;
                }
                Err(e) => {
                    warn!("Failed to stat {}: {e}", path.display());
                    continue;
                }
            };
            if size <= entry.offset {
                continue;
            }

            let chunk = match read_range(path, entry.offset, size).await {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!("Failed to read {}: {e}", path.display());
                    continue;
                }
            };
            entry.offset += chunk.len() as u64;

            for line in split_lines(&mut entry.carry, &chunk) {
                let line = String::from_utf8_lossy(&line);
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let Some(parsed) = parse_activity_line(line, self.max_entry_chars) else {
                    continue;
                };
                let project = parsed
                    .cwd
                    .as_deref()
                    .and_then(project_from_cwd)
                    .unwrap_or_else(|| project_from_path(path));
                handler(
                    path,
                    ActivityRecord {
                        project,
                        text: parsed.text,
                        observed_at: Utc::now(),
                    },
                );
                delivered += 1;
            }
        }

        for path in gone {
            info!("Activity log removed, unwatching {}", path.display());
            self.entries.remove(&path);
        }
        delivered
    }
}

async fn read_range(path: &Path, start: u64, end: u64) -> std::io::Result<Vec<u8>> {
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(SeekFrom::Start(start)).await?;
    let mut buf = Vec::with_capacity(usize::try_from(end - start).unwrap_or(0));
    file.take(end - start).read_to_end(&mut buf).await?;
    Ok(buf)
}

/// Split `carry + chunk` on newlines; the unterminated tail becomes the new carry.
fn split_lines(carry: &mut Vec<u8>, chunk: &[u8]) -> Vec<Vec<u8>> {
    carry.extend_from_slice(chunk);
    let mut lines = Vec::new();
    let mut start = 0;
    for (i, &b) in carry.iter().enumerate() {
        if b == b'\n' {
            lines.push(carry[start..i].to_vec());
            start = i + 1;
        }
    }
    carry.drain(..start);
    if carry.len() > MAX_CARRY_BYTES {
        debug!("Dropping {} byte unterminated line", carry.len());
        carry.clear();
    }
    lines
}

fn project_from_cwd(cwd: &str) -> Option<String> {
    Path::new(cwd)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .filter(|n| !n.is_empty())
}

/// Claude stores transcripts under a directory named after the encoded cwd
/// (`-home-me-code-agentvox`); its last segment is the best remaining guess.
fn project_from_path(path: &Path) -> String {
    path.parent()
        .and_then(Path::file_name)
        .map(|n| n.to_string_lossy().to_string())
        .and_then(|n| n.rsplit('-').find(|s| !s.is_empty()).map(str::to_string))
        .unwrap_or_else(|| DEFAULT_PROJECT.into())
}

/// Find `*.jsonl` files under `roots` (up to two levels deep) modified within `active_within`.
pub fn discover_active_logs(roots: &[PathBuf], active_within: Duration) -> Vec<PathBuf> {
    let now = SystemTime::now();
    let mut found = Vec::new();
    for root in roots {
        collect_logs(root, 0, now, active_within, &mut found);
    }
    found.sort();
    found
}

fn collect_logs(dir: &Path, depth: usize, now: SystemTime, active_within: Duration, found: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.filter_map(Result::ok) {
        let path = entry.path();
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if meta.is_dir() {
            if depth < 1 {
                collect_logs(&path, depth + 1, now, active_within, found);
            }
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
            continue;
        }
        if is_recent(&meta, now, active_within) {
            found.push(path);
        }
    }
}

/// Modified within `active_within` of `now`. Timestamps in the future count as recent.
fn is_recent(meta: &std::fs::Metadata, now: SystemTime, active_within: Duration) -> bool {
    meta.modified()
        .map(|m| now.duration_since(m).map_or(true, |age| age <= active_within))
        .unwrap_or(false)
}
