//! Session persistence and per-key ownership.
//!
//! [`SessionManager`] combines a [`SessionStore`] with [`KeyedLocks`] so
//! that only one turn at a time may mutate a given conversation while
//! different conversations proceed in parallel.
//!
//! Two stores are provided:
//!
//! - [`MemorySessionStore`] for tests and one-shot runs.
//! - [`JsonlSessionStore`] writing one JSONL file per conversation under a
//!   directory. The first line is a metadata header, every following line
//!   is one [`Turn`]. Files are replaced atomically (write to a temporary
//!   file, then rename).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use percent_encoding::{NON_ALPHANUMERIC, percent_decode_str, percent_encode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use skein_types::Result;
use skein_types::error::SkeinError;
use skein_types::session::{Session, Turn};

use crate::security::validate_session_key;
use crate::sync::{KeyGuard, KeyedLocks};

/// Durable storage for sessions, keyed by conversation key.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a session, or `None` if nothing is stored under `key`.
    async fn read(&self, key: &str) -> Result<Option<Session>>;

    /// Store a session, replacing any previous version atomically.
    async fn write(&self, session: &Session) -> Result<()>;

    /// All stored keys.
    async fn keys(&self) -> Result<Vec<String>>;
}

/// Volatile in-memory store.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: parking_lot::Mutex<HashMap<String, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn read(&self, key: &str) -> Result<Option<Session>> {
        Ok(self.sessions.lock().get(key).cloned())
    }

    async fn write(&self, session: &Session) -> Result<()> {
        self.sessions
            .lock()
            .insert(session.key.clone(), session.clone());
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.sessions.lock().keys().cloned().collect())
    }
}

/// Header line of a session file.
#[derive(Debug, Serialize, Deserialize)]
struct SessionHeader {
    #[serde(rename = "_type")]
    kind: String,
    key: String,
    #[serde(default)]
    revision: u64,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    #[serde(default)]
    metadata: HashMap<String, serde_json::Value>,
}

const HEADER_KIND: &str = "session";
const SESSION_EXT: &str = "jsonl";

/// One JSONL file per session under `dir`.
///
/// File names are the percent-encoded conversation key, so arbitrary keys
/// map to safe, reversible names.
pub struct JsonlSessionStore {
    dir: PathBuf,
}

impl JsonlSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let encoded = percent_encode(key.as_bytes(), NON_ALPHANUMERIC).to_string();
        self.dir.join(format!("{encoded}.{SESSION_EXT}"))
    }
}

fn encode_session(session: &Session) -> Result<String> {
    let header = SessionHeader {
        kind: HEADER_KIND.into(),
        key: session.key.clone(),
        revision: session.revision,
        created_at: session.created_at,
        last_activity: session.last_activity,
        metadata: session.metadata.clone(),
    };
    let mut out = serde_json::to_string(&header)?;
    out.push('\n');
    for turn in &session.turns {
        out.push_str(&serde_json::to_string(turn)?);
        out.push('\n');
    }
    Ok(out)
}

fn decode_session(key: &str, content: &str) -> Result<Session> {
    let mut lines = content.lines().filter(|l| !l.trim().is_empty());
    let header: SessionHeader = match lines.next() {
        Some(line) => serde_json::from_str(line)?,
        None => {
            return Err(SkeinError::SessionStore(format!(
                "session file for {key} is empty"
            )));
        }
    };

    let mut turns = Vec::new();
    for (idx, line) in lines.enumerate() {
        match serde_json::from_str::<Turn>(line) {
            Ok(turn) => turns.push(turn),
            Err(e) => warn!(key, line = idx + 2, error = %e, "skipping malformed turn"),
        }
    }

    Ok(Session {
        key: header.key,
        turns,
        revision: header.revision,
        created_at: header.created_at,
        last_activity: header.last_activity,
        metadata: header.metadata,
    })
}

#[async_trait]
impl SessionStore for JsonlSessionStore {
    async fn read(&self, key: &str) -> Result<Option<Session>> {
        let path = self.path_for(key);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => decode_session(key, &content).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, session: &Session) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(&session.key);
        let tmp = path.with_extension(format!("{SESSION_EXT}.tmp"));
        tokio::fs::write(&tmp, encode_session(session)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(key = %session.key, revision = session.revision, "session written");
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SESSION_EXT) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                keys.push(percent_decode_str(stem).decode_utf8_lossy().into_owned());
            }
        }
        Ok(keys)
    }
}

/// Loads, saves and serializes access to sessions.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    locks: KeyedLocks,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            locks: KeyedLocks::new(),
        }
    }

    /// In-memory manager, mostly for tests.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemorySessionStore::new()))
    }

    /// Take exclusive ownership of `key` for the duration of a turn.
    pub async fn lock(&self, key: &str) -> Result<KeyGuard> {
        validate_session_key(key)?;
        Ok(self.locks.lock(key).await)
    }

    /// Load the session for `key`, or a fresh empty one.
    pub async fn load(&self, key: &str) -> Result<Session> {
        validate_session_key(key)?;
        match self.store.read(key).await? {
            Some(session) => {
                debug!(key, turns = session.len(), revision = session.revision, "session loaded");
                Ok(session)
            }
            None => {
                debug!(key, "creating new session");
                Ok(Session::new(key))
            }
        }
    }

    /// Persist `session`, bumping its revision.
    pub async fn save(&self, session: &mut Session) -> Result<()> {
        validate_session_key(&session.key)?;
        session.revision += 1;
        session.last_activity = Utc::now();
        if let Err(e) = self.store.write(session).await {
            session.revision -= 1;
            return Err(e);
        }
        Ok(())
    }

    /// Append `turn` and persist.
    pub async fn append_turn(&self, session: &mut Session, turn: Turn) -> Result<()> {
        session.push(turn);
        self.save(session).await
    }

    /// Stored conversation keys, sorted.
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut keys = self.store.keys().await?;
        keys.sort();
        Ok(keys)
    }

    /// Load a stored session without creating one.
    pub async fn get(&self, key: &str) -> Result<Option<Session>> {
        validate_session_key(key)?;
        self.store.read(key).await
    }
}
