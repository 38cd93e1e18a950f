//! Session persistence.
//!
//! Sessions are saved only at turn boundaries, so a loaded session is always
//! between turns. [`FileSessionStore`] keeps one directory per session:
//!
//! ```text
//! sessions_dir/
//!   sess-18c3f0a1b2c-0001/
//!     manifest.json
//!     turn-001.json
//!     turn-002.json
//! ```
//!
//! Each `turn-NNN.json` is a full snapshot after that turn; `load` reads the
//! highest one. Only the newest [`DEFAULT_SNAPSHOT_RETENTION`] snapshots are
//! kept unless [`FileSessionStore::with_retention`] says otherwise.
//! `manifest.json` is replaced atomically and is what `list` reads.

use super::{Session, SessionStatus};
use crate::error::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Persistence contract used by the planner and the session registry.
pub trait SessionStore: Send + Sync {
    /// `Ok(None)` when no session with this id exists.
    fn load(&self, id: &str) -> Result<Option<Session>, StoreError>;
    fn save(&self, session: &Session) -> Result<(), StoreError>;
    /// All stored sessions, most recently updated first.
    fn list(&self) -> Result<Vec<SessionManifest>, StoreError>;
    /// Returns `true` if something was deleted.
    fn delete(&self, id: &str) -> Result<bool, StoreError>;
}

// ── SessionManifest ────────────────────────────────────────────────

/// Lightweight metadata for listings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SessionManifest {
    pub id: String,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_reason: Option<String>,
    pub turn: u32,
    pub used_tokens: u64,
    pub max_tokens: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// First 100 characters of the goal.
    pub goal_preview: String,
}

impl SessionManifest {
    pub fn of(session: &Session) -> Self {
        Self {
            id: session.id().to_string(),
            status: session.status(),
            end_reason: session.end_reason().map(str::to_string),
            turn: session.turn(),
            used_tokens: session.budget().used_tokens(),
            max_tokens: session.budget().max_tokens(),
            created_at: session.created_at(),
            updated_at: session.updated_at(),
            goal_preview: session.preview(),
        }
    }
}

fn newest_first(manifests: &mut [SessionManifest]) {
    manifests.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
}

// ── FileSessionStore ───────────────────────────────────────────────

/// Turn snapshots kept per session unless configured otherwise.
pub const DEFAULT_SNAPSHOT_RETENTION: usize = 20;

pub struct FileSessionStore {
    sessions_dir: PathBuf,
    /// Newest snapshots kept per session; `None` keeps every one.
    retention: Option<usize>,
}

fn io_err(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

impl FileSessionStore {
    /// Create a store, ensuring the root directory exists.
    pub fn new(sessions_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let sessions_dir = sessions_dir.into();
        std::fs::create_dir_all(&sessions_dir).map_err(|e| io_err(&sessions_dir, e))?;
        Ok(Self {
            sessions_dir,
            retention: Some(DEFAULT_SNAPSHOT_RETENTION),
        })
    }

    /// Keep only the newest `keep` turn snapshots per session (at least one).
    pub fn with_retention(mut self, keep: usize) -> Self {
        self.retention = Some(keep.max(1));
        self
    }

    /// Never prune snapshots.
    pub fn keep_all_snapshots(mut self) -> Self {
        self.retention = None;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.sessions_dir
    }

    /// Session directory, refusing ids that would escape the root.
    fn session_dir(&self, id: &str) -> Result<PathBuf, StoreError> {
        if id.is_empty() || id.contains(['/', '\\']) || id == "." || id == ".." {
            return Err(io_err(
                Path::new(id),
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid session id"),
            ));
        }
        Ok(self.sessions_dir.join(id))
    }

    fn turn_filename(turn: u32) -> String {
        format!("turn-{turn:03}.json")
    }

    /// Atomic write: temp file, then rename into place.
    fn write_atomic(dir: &Path, name: &str, contents: &str) -> Result<(), StoreError> {
        let final_path = dir.join(name);
        let tmp_path = dir.join(format!(".{name}.tmp"));
        std::fs::write(&tmp_path, contents).map_err(|e| io_err(&tmp_path, e))?;
        std::fs::rename(&tmp_path, &final_path).map_err(|e| io_err(&final_path, e))?;
        Ok(())
    }

    /// Every `turn-NNN.json` in a session directory, oldest turn first.
    fn snapshots(dir: &Path) -> Result<Vec<(u32, PathBuf)>, StoreError> {
        let entries = std::fs::read_dir(dir).map_err(|e| io_err(dir, e))?;
        let mut snapshots = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_err(dir, e))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(turn_str) = name
                .strip_prefix("turn-")
                .and_then(|s| s.strip_suffix(".json"))
                && let Ok(turn) = turn_str.parse::<u32>()
            {
                snapshots.push((turn, entry.path()));
            }
        }
        snapshots.sort_by_key(|(turn, _)| *turn);
        Ok(snapshots)
    }

    /// Highest `turn-NNN.json` in a session directory.
    fn latest_snapshot(dir: &Path) -> Result<Option<PathBuf>, StoreError> {
        Ok(Self::snapshots(dir)?.pop().map(|(_, path)| path))
    }

    /// Delete all but the newest `keep` snapshots. Returns how many were
    /// removed. The manifest is never touched.
    fn prune(dir: &Path, keep: usize) -> Result<usize, StoreError> {
        let snapshots = Self::snapshots(dir)?;
        let excess = snapshots.len().saturating_sub(keep);
        for (_, path) in snapshots.iter().take(excess) {
            std::fs::remove_file(path).map_err(|e| io_err(path, e))?;
        }
        Ok(excess)
    }

    /// Number of turn snapshots kept for a session.
    pub fn snapshot_count(&self, id: &str) -> Result<usize, StoreError> {
        let dir = self.session_dir(id)?;
        if !dir.exists() {
            return Ok(0);
        }
        Ok(Self::snapshots(&dir)?.len())
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self, id: &str) -> Result<Option<Session>, StoreError> {
        let dir = self.session_dir(id)?;
        if !dir.exists() {
            return Ok(None);
        }
        let Some(path) = Self::latest_snapshot(&dir)? else {
            return Ok(None);
        };
        let json = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        let session: Session = serde_json::from_str(&json).map_err(|source| StoreError::Serde {
            id: id.to_string(),
            source,
        })?;
        debug!("Loaded session {id} from {}", path.display());
        Ok(Some(session))
    }

    fn save(&self, session: &Session) -> Result<(), StoreError> {
        let dir = self.session_dir(session.id())?;
        std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;

        let serde_err = |source| StoreError::Serde {
            id: session.id().to_string(),
            source,
        };
        let snapshot = serde_json::to_string_pretty(session).map_err(serde_err)?;
        Self::write_atomic(&dir, &Self::turn_filename(session.turn()), &snapshot)?;

        let manifest =
            serde_json::to_string_pretty(&SessionManifest::of(session)).map_err(serde_err)?;
        Self::write_atomic(&dir, "manifest.json", &manifest)?;

        if let Some(keep) = self.retention {
            let pruned = Self::prune(&dir, keep)?;
            if pruned > 0 {
                debug!("Pruned {pruned} old snapshot(s) of {}", session.id());
            }
        }

        debug!(
            "Saved session {} at turn {} to {}",
            session.id(),
            session.turn(),
            dir.display()
        );
        Ok(())
    }

    fn list(&self) -> Result<Vec<SessionManifest>, StoreError> {
        let entries =
            std::fs::read_dir(&self.sessions_dir).map_err(|e| io_err(&self.sessions_dir, e))?;

        let mut manifests = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&self.sessions_dir, e))?;
            if !entry.file_type().is_ok_and(|ft| ft.is_dir()) {
                continue;
            }
            let manifest_path = entry.path().join("manifest.json");
            if !manifest_path.exists() {
                continue;
            }
            match std::fs::read_to_string(&manifest_path) {
                Ok(json) => match serde_json::from_str::<SessionManifest>(&json) {
                    Ok(m) => manifests.push(m),
                    Err(e) => {
                        warn!(
                            "Skipping malformed manifest at {}: {e}",
                            manifest_path.display()
                        );
                    }
                },
                Err(e) => {
                    warn!(
                        "Skipping unreadable manifest at {}: {e}",
                        manifest_path.display()
                    );
                }
            }
        }
        newest_first(&mut manifests);
        Ok(manifests)
    }

    fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let dir = self.session_dir(id)?;
        if !dir.exists() {
            return Ok(false);
        }
        std::fs::remove_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        Ok(true)
    }
}

// ── MemorySessionStore ─────────────────────────────────────────────

/// In-memory store, for tests and embedding.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn sessions(&self) -> std::sync::MutexGuard<'_, HashMap<String, Session>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self, id: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.sessions().get(id).cloned())
    }

    fn save(&self, session: &Session) -> Result<(), StoreError> {
        self.sessions()
            .insert(session.id().to_string(), session.clone());
        Ok(())
    }

    fn list(&self) -> Result<Vec<SessionManifest>, StoreError> {
        let mut manifests: Vec<SessionManifest> =
            self.sessions().values().map(SessionManifest::of).collect();
        newest_first(&mut manifests);
        Ok(manifests)
    }

    fn delete(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.sessions().remove(id).is_some())
    }
}
