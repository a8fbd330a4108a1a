// Tracked-player records and their JSON file persistence.
//
// The store is an insertion-ordered sequence of records, shared between the
// app loop and the active background task as `Arc<Mutex<PlayerStore>>`.
// Exactly one background task mutates it at a time (the app enforces the
// single-active-task convention); lock scopes never span an await point.

use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use serde_json::Value;
use thiserror::Error;
use tracing::warn;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("player {0} is already tracked")]
    DuplicateId(i64),
}

// ---------------------------------------------------------------------------
// PlayerRecord
// ---------------------------------------------------------------------------

/// One tracked player: persistent identity plus transient derived state.
///
/// `current_name`, `last_active` and `error` are derived fields, overwritten
/// by the refresh engine and never persisted. When `error` is set the other
/// derived fields are stale and must not be displayed as current, though
/// they are retained for reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerRecord {
    pub id: i64,
    pub nickname: String,
    pub description: String,
    pub current_name: Option<String>,
    pub last_active: Option<String>,
    pub error: Option<String>,
}

impl PlayerRecord {
    pub fn new(id: i64, nickname: impl Into<String>) -> Self {
        PlayerRecord {
            id,
            nickname: nickname.into(),
            description: String::new(),
            current_name: None,
            last_active: None,
            error: None,
        }
    }

    /// Record a successful profile fetch: derived fields are rewritten and
    /// any previous error is cleared.
    pub fn apply_profile(&mut self, current_name: Option<String>, last_active: Option<String>) {
        self.current_name = current_name;
        self.last_active = last_active;
        self.error = None;
    }

    /// Record a failed fetch. Derived values from an earlier successful
    /// fetch are kept as stale reference data; only the error changes.
    pub fn set_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }

    /// Record a field-level parse problem. First error wins so a generic
    /// diagnosis never overwrites a more specific one.
    pub fn set_field_error(&mut self, message: impl Into<String>) {
        if self.error.is_none() {
            self.error = Some(message.into());
        }
    }
}

// ---------------------------------------------------------------------------
// PlayerStore
// ---------------------------------------------------------------------------

/// Insertion-ordered collection of tracked players, unique by id.
#[derive(Debug, Default)]
pub struct PlayerStore {
    records: Vec<PlayerRecord>,
}

/// Alias for the shared form every task receives.
pub type SharedStore = std::sync::Arc<Mutex<PlayerStore>>;

/// Acquire the shared store.
///
/// Panics if the mutex is poisoned (a task panicked while holding the
/// lock); the task driver converts that panic into a failure outcome.
pub fn lock(store: &SharedStore) -> std::sync::MutexGuard<'_, PlayerStore> {
    store.lock().expect("player store mutex poisoned")
}

impl PlayerStore {
    pub fn new() -> Self {
        PlayerStore::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, id: i64) -> bool {
        self.records.iter().any(|r| r.id == id)
    }

    /// Index of the record with the given id, in display order.
    pub fn position(&self, id: i64) -> Option<usize> {
        self.records.iter().position(|r| r.id == id)
    }

    pub fn get(&self, index: usize) -> Option<&PlayerRecord> {
        self.records.get(index)
    }

    pub fn get_by_id(&self, id: i64) -> Option<&PlayerRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn get_mut_by_id(&mut self, id: i64) -> Option<&mut PlayerRecord> {
        self.records.iter_mut().find(|r| r.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlayerRecord> {
        self.records.iter()
    }

    /// Append a record, rejecting duplicate ids. Returns the new index.
    pub fn add(&mut self, record: PlayerRecord) -> Result<usize, StoreError> {
        if self.contains(record.id) {
            return Err(StoreError::DuplicateId(record.id));
        }
        self.records.push(record);
        Ok(self.records.len() - 1)
    }

    /// Remove the record with the given id, preserving the order of the
    /// remaining entries. Returns the removed record and its old index.
    pub fn remove(&mut self, id: i64) -> Option<(usize, PlayerRecord)> {
        let index = self.position(id)?;
        Some((index, self.records.remove(index)))
    }
}

// ---------------------------------------------------------------------------
// File persistence
// ---------------------------------------------------------------------------

/// Read the player file: a JSON array of objects carrying at least
/// `"id"` (integer) and `"nick"` (string). Unknown keys are ignored;
/// malformed entries (wrong shape, missing keys, duplicate ids) are skipped.
///
/// Returns the parsed records plus the raw entry count of the file, so the
/// caller can report "loaded M of N". A missing or unparseable file reads
/// as an empty list; there is no hard failure path.
pub fn load_players(path: &Path) -> (Vec<PlayerRecord>, usize) {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(_) => return (Vec::new(), 0),
    };

    let value: Value = match serde_json::from_str(&text) {
        Ok(value) => value,
        Err(e) => {
            warn!("player file {} is not valid JSON: {e}", path.display());
            return (Vec::new(), 0);
        }
    };

    let entries = match value.as_array() {
        Some(entries) => entries,
        None => {
            warn!("player file {} is not a JSON array", path.display());
            return (Vec::new(), 0);
        }
    };

    let mut records: Vec<PlayerRecord> = Vec::new();
    for entry in entries {
        let Some(record) = parse_entry(entry) else {
            warn!("skipping malformed player entry: {entry}");
            continue;
        };
        if records.iter().any(|r| r.id == record.id) {
            warn!("skipping duplicate player id {} in file", record.id);
            continue;
        }
        records.push(record);
    }

    (records, entries.len())
}

fn parse_entry(entry: &Value) -> Option<PlayerRecord> {
    let obj = entry.as_object()?;
    let id = obj.get("id")?.as_i64()?;
    let nick = obj.get("nick")?.as_str()?;
    let mut record = PlayerRecord::new(id, nick);
    if let Some(desc) = obj.get("desc").and_then(Value::as_str) {
        record.description = desc.to_string();
    }
    Some(record)
}

/// Write the player file: the whole list, 4-space indentation, key order as
/// inserted. Writes to a sibling temp file and renames over the target, so
/// a failed write leaves the previous contents intact.
pub fn save_players(path: &Path, store: &PlayerStore) -> std::io::Result<()> {
    let entries: Vec<Value> = store
        .iter()
        .map(|r| {
            let mut obj = serde_json::Map::new();
            obj.insert("id".into(), Value::from(r.id));
            obj.insert("nick".into(), Value::from(r.nickname.clone()));
            obj.insert("desc".into(), Value::from(r.description.clone()));
            Value::Object(obj)
        })
        .collect();

    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    serde::Serialize::serialize(&Value::Array(entries), &mut serializer)
        .map_err(std::io::Error::other)?;
    buf.push(b'\n');

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let tmp = path.with_extension("json.tmp");
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(&buf)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
