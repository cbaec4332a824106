//! Per-session persistent state with per-key mutual exclusion.
//!
//! The canonical authority is the filesystem: one JSON file per
//! `(session, key)` pair, guarded by an advisory lock file. Lock acquisition
//! and file I/O are blocking, so they run on the blocking pool. The lock is
//! scoped to a single read-modify-write and released on every exit path (the
//! guard drops with the closure).

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::{Map, Value};
use thiserror::Error;

/// The closed set of state records a session can own. `Quota` is global:
/// it maps to a single shared file regardless of session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKey {
    Retry,
    Debounce,
    Override,
    Todo,
    Quota,
}

impl StateKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateKey::Retry => "retry",
            StateKey::Debounce => "debounce",
            StateKey::Override => "override",
            StateKey::Todo => "todo",
            StateKey::Quota => "quota",
        }
    }

    /// Keys that belong to a session, in cleanup order.
    pub const SESSION_KEYS: [StateKey; 4] = [
        StateKey::Retry,
        StateKey::Debounce,
        StateKey::Override,
        StateKey::Todo,
    ];
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state I/O error: {message}")]
    Io { message: String },

    #[error("state serialization error: {message}")]
    Serialize { message: String },

    #[error("state task panicked: {message}")]
    Task { message: String },
}

impl From<std::io::Error> for StateError {
    fn from(e: std::io::Error) -> Self {
        StateError::Io {
            message: e.to_string(),
        }
    }
}

pub type JsonMap = Map<String, Value>;

/// File-backed state store. Cheap to clone conceptually but owned once and
/// shared via `Arc`; all mutation goes through [`StateStore::update`].
#[derive(Debug)]
pub struct StateStore {
    state_dir: PathBuf,
}

impl StateStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Result<Self, StateError> {
        let state_dir = state_dir.into();
        std::fs::create_dir_all(&state_dir)?;
        Ok(Self { state_dir })
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    fn file_stem(session_id: &str, key: StateKey) -> String {
        match key {
            StateKey::Quota => "quota_state".to_string(),
            other => format!("{}_{}", session_id, other.as_str()),
        }
    }

    fn data_path(&self, session_id: &str, key: StateKey) -> PathBuf {
        self.state_dir
            .join(format!("{}.json", Self::file_stem(session_id, key)))
    }

    fn lock_path(&self, session_id: &str, key: StateKey) -> PathBuf {
        self.state_dir
            .join(format!("{}.lock", Self::file_stem(session_id, key)))
    }

    /// Run `f` against the data file while holding the exclusive advisory
    /// lock for this `(session, key)`.
    async fn with_lock<T, F>(&self, session_id: &str, key: StateKey, f: F) -> Result<T, StateError>
    where
        T: Send + 'static,
        F: FnOnce(&Path) -> Result<T, StateError> + Send + 'static,
    {
        let data_path = self.data_path(session_id, key);
        let lock_path = self.lock_path(session_id, key);

        tokio::task::spawn_blocking(move || {
            let lock_file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(&lock_path)?;
            let mut lock = fd_lock::RwLock::new(lock_file);
            let _guard = lock.write()?;
            f(&data_path)
            // guard drops here; lock released on every exit path
        })
        .await
        .map_err(|e| StateError::Task {
            message: e.to_string(),
        })?
    }

    /// Read the record for `(session, key)`. Missing or corrupt files read
    /// as an empty object (corruption self-heals on the next write).
    pub async fn read(&self, session_id: &str, key: StateKey) -> Result<JsonMap, StateError> {
        self.with_lock(session_id, key, |path| Ok(read_map(path)))
            .await
    }

    /// Overwrite the record for `(session, key)`.
    pub async fn write(
        &self,
        session_id: &str,
        key: StateKey,
        map: JsonMap,
    ) -> Result<(), StateError> {
        self.with_lock(session_id, key, move |path| write_map(path, &map))
            .await
    }

    /// Atomic read-modify-write under one lock acquisition. `f` may return a
    /// value computed from the pre- or post-state; the mutated map is always
    /// written back.
    pub async fn update<T, F>(&self, session_id: &str, key: StateKey, f: F) -> Result<T, StateError>
    where
        T: Send + 'static,
        F: FnOnce(&mut JsonMap) -> T + Send + 'static,
    {
        self.with_lock(session_id, key, move |path| {
            let mut map = read_map(path);
            let out = f(&mut map);
            write_map(path, &map)?;
            Ok(out)
        })
        .await
    }

    // ----- retry counts, by stage -----

    pub async fn retry_count(&self, session_id: &str, stage: &str) -> Result<u32, StateError> {
        let state = self.read(session_id, StateKey::Retry).await?;
        Ok(read_u32(&state, stage))
    }

    pub async fn increment_retry_count(
        &self,
        session_id: &str,
        stage: &str,
    ) -> Result<u32, StateError> {
        let stage = stage.to_string();
        self.update(session_id, StateKey::Retry, move |state| {
            let next = read_u32(state, &stage) + 1;
            state.insert(stage, Value::from(next));
            next
        })
        .await
    }

    pub async fn reset_retry_count(&self, session_id: &str, stage: &str) -> Result<(), StateError> {
        let stage = stage.to_string();
        self.update(session_id, StateKey::Retry, move |state| {
            state.insert(stage, Value::from(0));
        })
        .await
    }

    // ----- debounce timestamps, by stage -----

    pub async fn touch_stage(&self, session_id: &str, stage: &str) -> Result<(), StateError> {
        let stage = stage.to_string();
        let now_ms = chrono::Utc::now().timestamp_millis();
        self.update(session_id, StateKey::Debounce, move |state| {
            state.insert(stage, Value::from(now_ms));
        })
        .await
    }

    /// True when the stage was touched within `window` — the caller should
    /// skip this invocation.
    pub async fn should_debounce(
        &self,
        session_id: &str,
        stage: &str,
        window: Duration,
    ) -> Result<bool, StateError> {
        let state = self.read(session_id, StateKey::Debounce).await?;
        let Some(last_ms) = state.get(stage).and_then(Value::as_i64) else {
            return Ok(false);
        };
        let elapsed_ms = chrono::Utc::now().timestamp_millis().saturating_sub(last_ms);
        Ok(elapsed_ms >= 0 && (elapsed_ms as u128) < window.as_millis())
    }

    // ----- override skip counter -----

    pub async fn set_override(&self, session_id: &str, skip_count: u32) -> Result<(), StateError> {
        self.update(session_id, StateKey::Override, move |state| {
            state.insert("skip_count".to_string(), Value::from(skip_count));
            state.insert(
                "set_at".to_string(),
                Value::from(chrono::Local::now().to_rfc3339()),
            );
        })
        .await
    }

    /// Returns true and decrements when a skip is pending.
    pub async fn check_and_consume_override(&self, session_id: &str) -> Result<bool, StateError> {
        self.update(session_id, StateKey::Override, |state| {
            let skip_count = read_u32(state, "skip_count");
            if skip_count > 0 {
                state.insert("skip_count".to_string(), Value::from(skip_count - 1));
                true
            } else {
                false
            }
        })
        .await
    }

    // ----- session cleanup -----

    /// Delete all scratch state for a session, lock files included.
    pub async fn cleanup_session(&self, session_id: &str) -> Result<(), StateError> {
        let paths: Vec<PathBuf> = StateKey::SESSION_KEYS
            .iter()
            .flat_map(|&key| {
                [
                    self.data_path(session_id, key),
                    self.lock_path(session_id, key),
                ]
            })
            .collect();
        tokio::task::spawn_blocking(move || {
            for path in paths {
                match std::fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(StateError::from(e)),
                }
            }
            Ok(())
        })
        .await
        .map_err(|e| StateError::Task {
            message: e.to_string(),
        })?
    }
}

fn read_u32(map: &JsonMap, key: &str) -> u32 {
    map.get(key).and_then(Value::as_u64).unwrap_or(0) as u32
}

fn read_map(path: &Path) -> JsonMap {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(_) => return JsonMap::new(),
    };
    match serde_json::from_str::<Value>(&content) {
        Ok(Value::Object(map)) => map,
        // corrupt or non-object content reads as empty; the next write heals it
        _ => JsonMap::new(),
    }
}

fn write_map(path: &Path, map: &JsonMap) -> Result<(), StateError> {
    let json = serde_json::to_string_pretty(map).map_err(|e| StateError::Serialize {
        message: e.to_string(),
    })?;
    std::fs::write(path, json)?;
    Ok(())
}
