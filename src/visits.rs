//! "Have I visited this quest link" flags.
//!
//! Flags are scoped to a client session (the equivalent of browser local
//! storage) and keyed by quest id only, so switching wallets inside one
//! session keeps the flags. Values are the literal string `"true"`.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use moka::future::Cache;
use tracing::debug;
use uuid::Uuid;

pub const VISITED_KEY_PREFIX: &str = "quest_visited_";
pub const VISITED_VALUE: &str = "true";
pub const MAX_SESSION_ID_LEN: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum VisitError {
    #[error("flag store I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("flag store file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("invalid session id")]
    InvalidSession,
}

/// String key/value storage with local-storage semantics.
pub trait FlagStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), VisitError>;
    fn remove(&self, key: &str) -> Result<(), VisitError>;
}

#[derive(Debug, Default)]
pub struct MemoryFlagStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryFlagStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl FlagStore for MemoryFlagStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), VisitError> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), VisitError> {
        self.entries().remove(key);
        Ok(())
    }
}

/// JSON file backed store. Every mutation rewrites the file through a
/// temporary sibling and a rename.
#[derive(Debug)]
pub struct FileFlagStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl FileFlagStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, VisitError> {
        let path = path.into();
        let entries = match fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => HashMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn mutate(&self, apply: impl FnOnce(&mut HashMap<String, String>)) -> Result<(), VisitError> {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        apply(&mut entries);
        let encoded = serde_json::to_vec(&*entries)?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp = self.path.with_extension("json.tmp");
        fs::write(&temp, encoded)?;
        fs::rename(&temp, &self.path)?;
        Ok(())
    }
}

impl FlagStore for FileFlagStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), VisitError> {
        self.mutate(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<(), VisitError> {
        self.mutate(|entries| {
            entries.remove(key);
        })
    }
}

pub fn visited_key(quest_id: &Uuid) -> String {
    format!("{VISITED_KEY_PREFIX}{quest_id}")
}

/// Completion is allowed when the quest has no link, or its link was visited.
pub fn can_complete(quest_link: Option<&str>, visited: bool) -> bool {
    match quest_link.map(str::trim) {
        None | Some("") => true,
        Some(_) => visited,
    }
}

#[derive(Clone)]
pub struct VisitTracker {
    store: Arc<dyn FlagStore>,
}

impl VisitTracker {
    pub fn new(store: Arc<dyn FlagStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryFlagStore::new()))
    }

    pub fn is_visited(&self, quest_id: &Uuid) -> bool {
        self.store
            .get(&visited_key(quest_id))
            .is_some_and(|value| value == VISITED_VALUE)
    }

    pub fn mark_visited(&self, quest_id: &Uuid) -> Result<(), VisitError> {
        self.store.set(&visited_key(quest_id), VISITED_VALUE)
    }

    pub fn clear(&self, quest_id: &Uuid) -> Result<(), VisitError> {
        self.store.remove(&visited_key(quest_id))
    }
}

pub fn sanitize_session_id(value: &str) -> Result<String, VisitError> {
    let trimmed = value.trim();
    let valid = !trimmed.is_empty()
        && trimmed.len() <= MAX_SESSION_ID_LEN
        && trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(VisitError::InvalidSession);
    }
    Ok(trimmed.to_string())
}

/// One tracker per client session. Sessions idle past the configured
/// timeout are evicted; with a directory configured they survive restarts.
#[derive(Clone)]
pub struct SessionVisits {
    trackers: Cache<String, VisitTracker>,
    directory: Option<PathBuf>,
}

impl SessionVisits {
    pub fn new(max_capacity: u64, idle: Duration, directory: Option<PathBuf>) -> Self {
        assert!(max_capacity > 0, "Session capacity must be positive");
        let trackers = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_idle(idle)
            .build();
        Self {
            trackers,
            directory,
        }
    }

    pub async fn tracker(&self, session_id: &str) -> Result<VisitTracker, VisitError> {
        let session_id = sanitize_session_id(session_id)?;
        let directory = self.directory.clone();
        let key = session_id.clone();
        self.trackers
            .try_get_with(key, async move {
                let tracker = match directory {
                    Some(dir) => {
                        let path = dir.join(format!("{session_id}.json"));
                        debug!(path = %path.display(), "Opening session flag file");
                        VisitTracker::new(Arc::new(FileFlagStore::open(path)?))
                    }
                    None => VisitTracker::in_memory(),
                };
                Ok::<_, VisitError>(tracker)
            })
            .await
            .map_err(|err: Arc<VisitError>| match Arc::try_unwrap(err) {
                Ok(err) => err,
                Err(shared) => VisitError::Io(io::Error::other(shared.to_string())),
            })
    }

    pub fn session_count(&self) -> u64 {
        self.trackers.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linkless_quests_ignore_flag() {
        assert!(can_complete(None, false));
        assert!(can_complete(None, true));
        assert!(can_complete(Some("  "), false));
        assert!(!can_complete(Some("https://x.com/reva"), false));
        assert!(can_complete(Some("https://x.com/reva"), true));
    }

    #[test]
    fn tracker_uses_local_storage_keys() {
        let store = Arc::new(MemoryFlagStore::new());
        let tracker = VisitTracker::new(store.clone());
        let quest_id = Uuid::new_v4();

        assert!(!tracker.is_visited(&quest_id));
        tracker.mark_visited(&quest_id).unwrap();
        assert_eq!(
            store.get(&format!("quest_visited_{quest_id}")),
            Some("true".to_string())
        );
        assert!(tracker.is_visited(&quest_id));

        tracker.clear(&quest_id).unwrap();
        assert!(!tracker.is_visited(&quest_id));
    }

    #[test]
    fn non_true_values_do_not_count() {
        let store = Arc::new(MemoryFlagStore::new());
        let quest_id = Uuid::new_v4();
        store.set(&visited_key(&quest_id), "false").unwrap();
        assert!(!VisitTracker::new(store).is_visited(&quest_id));
    }

    #[test]
    fn file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flags.json");
        let quest_id = Uuid::new_v4();

        {
            let tracker = VisitTracker::new(Arc::new(FileFlagStore::open(&path).unwrap()));
            tracker.mark_visited(&quest_id).unwrap();
        }

        let reopened = VisitTracker::new(Arc::new(FileFlagStore::open(&path).unwrap()));
        assert!(reopened.is_visited(&quest_id));
        reopened.clear(&quest_id).unwrap();

        let again = VisitTracker::new(Arc::new(FileFlagStore::open(&path).unwrap()));
        assert!(!again.is_visited(&quest_id));
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flags.json");
        fs::write(&path, b"{not json").unwrap();
        assert!(matches!(
            FileFlagStore::open(&path),
            Err(VisitError::Corrupt(_))
        ));
    }

    #[test]
    fn session_ids_are_restricted() {
        assert_eq!(sanitize_session_id(" abc-123_x ").unwrap(), "abc-123_x");
        assert!(sanitize_session_id("../etc/passwd").is_err());
        assert!(sanitize_session_id("").is_err());
        assert!(sanitize_session_id(&"a".repeat(MAX_SESSION_ID_LEN + 1)).is_err());
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let sessions = SessionVisits::new(100, Duration::from_secs(60), None);
        let quest_id = Uuid::new_v4();

        sessions
            .tracker("browser-a")
            .await
            .unwrap()
            .mark_visited(&quest_id)
            .unwrap();

        assert!(sessions.tracker("browser-a").await.unwrap().is_visited(&quest_id));
        assert!(!sessions.tracker("browser-b").await.unwrap().is_visited(&quest_id));
    }

    #[tokio::test]
    async fn session_files_live_in_directory() {
        let dir = tempfile::tempdir().unwrap();
        let sessions = SessionVisits::new(
            100,
            Duration::from_secs(60),
            Some(dir.path().to_path_buf()),
        );
        let quest_id = Uuid::new_v4();
        sessions
            .tracker("tab1")
            .await
            .unwrap()
            .mark_visited(&quest_id)
            .unwrap();
        assert!(dir.path().join("tab1.json").exists());
    }
}
