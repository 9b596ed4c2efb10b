//! File-backed state store for the event history and the cursor.
//!
//! Two JSON documents:
//!   history file → `[Event, ...]`  (≤ 100, ascending by time)
//!   state file   → `{"latest_ids": [..], "table_id": .., "last_post_time": ..}`
//!
//! A missing file loads as the empty default. Every save replaces the whole
//! file: the new content goes to `<file>.tmp`, is fsynced, then renamed over
//! the target, so a crash mid-write never leaves a truncated document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::chat::MessageRef;
use crate::event::{parse_timestamp, Event};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}: malformed JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Bookkeeping that lets a restarted process pick up where it left off.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CursorState {
    /// Live announcement messages, oldest first.
    #[serde(rename = "latest_ids", default)]
    pub announcement_refs: Vec<MessageRef>,
    /// The single summary (table) message.
    #[serde(rename = "table_id", default)]
    pub summary_ref: Option<MessageRef>,
    /// Time of the newest event ever announced. `None` = nothing yet.
    #[serde(
        rename = "last_post_time",
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_opt_timestamp",
        deserialize_with = "deserialize_opt_timestamp"
    )]
    pub last_announced_at: Option<DateTime<Utc>>,
}

impl CursorState {
    /// Move the announcement checkpoint forward. Never moves it back.
    pub fn advance(&mut self, at: DateTime<Utc>) {
        match self.last_announced_at {
            Some(current) if current >= at => {}
            _ => self.last_announced_at = Some(at),
        }
    }
}

/// Everything one poll cycle reads and writes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub history: Vec<Event>,
    pub cursor: CursorState,
}

/// Paths to the two persisted documents.
#[derive(Debug, Clone)]
pub struct StateStore {
    history_path: PathBuf,
    state_path: PathBuf,
}

impl StateStore {
    pub fn new(history_path: impl Into<PathBuf>, state_path: impl Into<PathBuf>) -> Self {
        Self {
            history_path: history_path.into(),
            state_path: state_path.into(),
        }
    }

    /// True when both documents exist on disk (i.e. not a first run).
    pub fn is_initialized(&self) -> bool {
        self.history_path.exists() && self.state_path.exists()
    }

    pub fn load(&self) -> Result<Snapshot, StoreError> {
        let history: Vec<Event> = read_json(&self.history_path)?.unwrap_or_default();
        let cursor: CursorState = read_json(&self.state_path)?.unwrap_or_default();
        debug!(
            events = history.len(),
            announcements = cursor.announcement_refs.len(),
            "state loaded"
        );
        Ok(Snapshot { history, cursor })
    }

    /// Persist both documents. History first: if the state write then fails
    /// the cursor on disk still points at the previous cycle.
    pub fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        write_json_atomic(&self.history_path, &snapshot.history)?;
        write_json_atomic(&self.state_path, &snapshot.cursor)?;
        debug!(events = snapshot.history.len(), "state saved");
        Ok(())
    }

    pub fn history_path(&self) -> &Path {
        &self.history_path
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Option<T>, StoreError> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "no state file yet, starting empty");
            return Ok(None);
        }
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|source| StoreError::Json {
            path: path.to_path_buf(),
            source,
        })
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let io_err = |source: std::io::Error| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };

    let json = serde_json::to_string_pretty(value).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    {
        let mut file = File::create(&tmp_path).map_err(io_err)?;
        file.write_all(json.as_bytes()).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
    }
    fs::rename(&tmp_path, path).map_err(io_err)
}

fn serialize_opt_timestamp<S: Serializer>(
    dt: &Option<DateTime<Utc>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match dt {
        Some(dt) => serializer.serialize_some(&dt.to_rfc3339()),
        None => serializer.serialize_none(),
    }
}

fn deserialize_opt_timestamp<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error> {
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(s) => parse_timestamp(&s)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {s}"))),
    }
}
