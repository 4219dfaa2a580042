use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::SessionStoreError;
use crate::schema::{Session, SnapshotEnvelope, SNAPSHOT_VERSION};

/// Persistence port for the whole session collection.
pub trait SessionStorage: Send {
    /// Loads the stored collection. A missing snapshot is an empty collection.
    fn load(&self) -> Result<Vec<Session>, SessionStoreError>;

    /// Replaces the stored collection.
    fn save(&self, sessions: &[Session]) -> Result<(), SessionStoreError>;
}

/// JSON snapshot file, replaced atomically through a sibling temp file.
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl SessionStorage for JsonFileStorage {
    fn load(&self) -> Result<Vec<Session>, SessionStoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(SessionStoreError::io(
                    "reading session snapshot",
                    &self.path,
                    source,
                ))
            }
        };

        let envelope = serde_json::from_str::<SnapshotEnvelope<Vec<Session>>>(&raw)
            .map_err(|source| SessionStoreError::json_parse(&self.path, source))?;
        if envelope.version != SNAPSHOT_VERSION {
            return Err(SessionStoreError::UnsupportedVersion {
                path: self.path.clone(),
                found: envelope.version,
            });
        }

        Ok(envelope.sessions)
    }

    fn save(&self, sessions: &[Session]) -> Result<(), SessionStoreError> {
        if let Some(parent) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| {
                SessionStoreError::io("creating session directory", parent, source)
            })?;
        }

        let envelope = SnapshotEnvelope {
            version: SNAPSHOT_VERSION,
            sessions,
        };
        let body = serde_json::to_vec_pretty(&envelope)
            .map_err(|source| SessionStoreError::json_serialize(&self.path, source))?;

        let temp = self.temp_path();
        fs::write(&temp, body)
            .map_err(|source| SessionStoreError::io("writing session snapshot", &temp, source))?;
        fs::rename(&temp, &self.path).map_err(|source| {
            SessionStoreError::io("replacing session snapshot", &self.path, source)
        })
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    sessions: Vec<Session>,
    saves: usize,
    fail_saves: bool,
}

/// In-memory storage; clones share state so tests can inspect what was saved.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_sessions(sessions: Vec<Session>) -> Self {
        let storage = Self::default();
        storage.lock().sessions = sessions;
        storage
    }

    #[must_use]
    pub fn saved_sessions(&self) -> Vec<Session> {
        self.lock().sessions.clone()
    }

    #[must_use]
    pub fn save_count(&self) -> usize {
        self.lock().saves
    }

    /// Makes every later `save` fail with an I/O error.
    pub fn fail_saves(&self, fail: bool) {
        self.lock().fail_saves = fail;
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl SessionStorage for MemoryStorage {
    fn load(&self) -> Result<Vec<Session>, SessionStoreError> {
        Ok(self.lock().sessions.clone())
    }

    fn save(&self, sessions: &[Session]) -> Result<(), SessionStoreError> {
        let mut state = self.lock();
        if state.fail_saves {
            return Err(SessionStoreError::io(
                "writing session snapshot",
                "memory",
                std::io::Error::other("simulated save failure"),
            ));
        }
        state.sessions = sessions.to_vec();
        state.saves += 1;
        Ok(())
    }
}
