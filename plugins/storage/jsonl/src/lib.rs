use std::cmp::Reverse;
use std::collections::{BTreeMap, HashSet};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use relay_api::{
    BoxFuture, Event, EventKey, EventQuery, EventStore, RelayError, SaveOutcome, SortOrder,
};

fn default_path() -> String {
    "data/events.jsonl".into()
}

fn default_recent_records() -> usize {
    1_000
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct JsonlStoreConfig {
    #[serde(default = "default_path")]
    pub path: String,
    /// Newest events kept in memory to answer recent-events queries.
    #[serde(default = "default_recent_records")]
    pub recent_records: usize,
}

impl Default for JsonlStoreConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            recent_records: default_recent_records(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  In-memory index
// ═══════════════════════════════════════════════════════════════

/// Dedup keys of every stored event plus the newest `capacity` events.
///
/// `recent` is keyed so that iterating it in reverse yields the query
/// order: `published_at` descending, equal timestamps in insertion order.
struct Index {
    keys: HashSet<EventKey>,
    recent: BTreeMap<(DateTime<Utc>, Reverse<u64>), Event>,
    capacity: usize,
    next_seq: u64,
    total: usize,
}

impl Index {
    fn new(capacity: usize) -> Self {
        Self {
            keys: HashSet::new(),
            recent: BTreeMap::new(),
            capacity: capacity.max(1),
            next_seq: 0,
            total: 0,
        }
    }

    /// Returns false for an event already indexed.
    fn insert(&mut self, event: Event) -> bool {
        if !self.keys.insert(event.key()) {
            return false;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.total += 1;
        self.recent.insert((event.published_at, Reverse(seq)), event);
        if self.recent.len() > self.capacity {
            self.recent.pop_first();
        }
        true
    }

    /// Answer `query` from memory when the retained events are enough to
    /// be sure of the result.
    fn answer(&self, query: &EventQuery) -> Option<Vec<Event>> {
        if query.order != SortOrder::Desc {
            return None;
        }
        let limit = query.limit?;
        if limit > self.capacity {
            return None;
        }
        let hits: Vec<Event> = self
            .recent
            .values()
            .rev()
            .filter(|e| query.matches(e))
            .take(limit)
            .cloned()
            .collect();
        (hits.len() == limit || self.recent.len() == self.total).then_some(hits)
    }
}

// ═══════════════════════════════════════════════════════════════
//  JsonlStore
// ═══════════════════════════════════════════════════════════════

/// Append-only JSON-lines event store.
///
/// On disk:
/// ```text
/// {path}      one JSON Event per line, in insertion order
/// ```
/// The index is rebuilt from the file on `init` (or the first call). A
/// last line without its newline is the remains of an interrupted write
/// and is cut off before anything is appended. Lines that fail to parse
/// are skipped. File access runs on the blocking pool.
pub struct JsonlStore {
    path: PathBuf,
    recent_records: usize,
    index: Mutex<Option<Index>>,
}

impl JsonlStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_recent(path, default_recent_records())
    }

    pub fn with_recent(path: impl Into<PathBuf>, recent_records: usize) -> Self {
        Self {
            path: path.into(),
            recent_records,
            index: Mutex::new(None),
        }
    }

    pub fn from_config(config: &JsonlStoreConfig) -> Self {
        Self::with_recent(&config.path, config.recent_records)
    }

    async fn load(&self) -> Result<Index, RelayError> {
        let path = self.path.clone();
        let capacity = self.recent_records;
        blocking(move || load_index(&path, capacity)).await
    }
}

impl EventStore for JsonlStore {
    fn init(&self) -> BoxFuture<'_, Result<(), RelayError>> {
        Box::pin(async move {
            let mut guard = self.index.lock().await;
            let index = self.load().await?;
            tracing::info!(path = %self.path.display(), events = index.total, "jsonl store opened");
            *guard = Some(index);
            Ok(())
        })
    }

    fn save(&self, event: &Event) -> BoxFuture<'_, Result<SaveOutcome, RelayError>> {
        let event = event.clone();
        Box::pin(async move {
            let mut guard = self.index.lock().await;
            if guard.is_none() {
                *guard = Some(self.load().await?);
            }
            let Some(index) = guard.as_mut() else {
                return Err(RelayError::persistence("index unavailable"));
            };
            if index.keys.contains(&event.key()) {
                return Ok(SaveOutcome::Duplicate);
            }

            let line = serde_json::to_string(&event)
                .map_err(|e| RelayError::persistence(format!("serialize: {e}")))?;
            let path = self.path.clone();
            blocking(move || append_line(&path, &line)).await?;

            index.insert(event);
            Ok(SaveOutcome::Stored)
        })
    }

    fn query(&self, query: &EventQuery) -> BoxFuture<'_, Result<Vec<Event>, RelayError>> {
        let query = query.clone();
        Box::pin(async move {
            {
                let mut guard = self.index.lock().await;
                if guard.is_none() {
                    *guard = Some(self.load().await?);
                }
                if let Some(hits) = guard.as_ref().and_then(|i| i.answer(&query)) {
                    return Ok(hits);
                }
            }

            let path = self.path.clone();
            let events = blocking(move || {
                let mut events = Vec::new();
                scan_lines(&path, |e| events.push(e))?;
                Ok(events)
            })
            .await?;
            Ok(query.apply(events))
        })
    }

    fn flush(&self) -> BoxFuture<'_, Result<(), RelayError>> {
        // Every append opens, writes and closes the file.
        Box::pin(async { Ok(()) })
    }
}

// ═══════════════════════════════════════════════════════════════
//  File access (blocking pool)
// ═══════════════════════════════════════════════════════════════

async fn blocking<T, F>(f: F) -> Result<T, RelayError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, RelayError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| RelayError::persistence(format!("blocking task: {e}")))?
}

/// Visit every complete line. A trailing fragment without `\n` is not
/// visited. Returns (bytes covered by complete lines, file length).
fn scan_lines(path: &Path, mut on_event: impl FnMut(Event)) -> Result<(u64, u64), RelayError> {
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((0, 0)),
        Err(e) => {
            return Err(RelayError::Persistence(format!("open {}: {e}", path.display())));
        }
    };

    let mut reader = std::io::BufReader::new(file);
    let mut buf = Vec::new();
    let mut complete: u64 = 0;
    let mut length: u64 = 0;
    let mut lineno: usize = 0;
    loop {
        buf.clear();
        let n = reader
            .read_until(b'\n', &mut buf)
            .map_err(|e| RelayError::persistence(format!("read: {e}")))?;
        if n == 0 {
            break;
        }
        length += n as u64;
        if buf.last() != Some(&b'\n') {
            break;
        }
        complete = length;
        lineno += 1;

        let line = &buf[..buf.len() - 1];
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            continue;
        }
        match serde_json::from_slice::<Event>(line) {
            Ok(event) => on_event(event),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    line = lineno,
                    error = %e,
                    "corrupt event line, skipping"
                );
            }
        }
    }
    Ok((complete, length))
}

fn load_index(path: &Path, capacity: usize) -> Result<Index, RelayError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| RelayError::Persistence(format!("mkdir: {e}")))?;
    }

    let mut index = Index::new(capacity);
    let (complete, length) = scan_lines(path, |e| {
        index.insert(e);
    })?;

    if complete < length {
        tracing::warn!(
            path = %path.display(),
            dropped_bytes = length - complete,
            "truncating interrupted last line"
        );
        std::fs::OpenOptions::new()
            .write(true)
            .open(path)
            .and_then(|f| f.set_len(complete))
            .map_err(|e| RelayError::Persistence(format!("truncate {}: {e}", path.display())))?;
    }
    Ok(index)
}

fn append_line(path: &Path, line: &str) -> Result<(), RelayError> {
    let mut f = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| RelayError::Persistence(format!("open {}: {e}", path.display())))?;
    writeln!(f, "{line}").map_err(|e| RelayError::persistence(format!("write: {e}")))
}
