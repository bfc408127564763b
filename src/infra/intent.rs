//! Persisted monitoring intent
//!
//! The last explicit start/stop request is recorded so that a restarted
//! process can pick monitoring back up. The runtime file lives under /run by
//! default, which is cleared on reboot: a crash resumes, a boot does not.

use parking_lot::Mutex;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorIntent {
    Running,
    Stopped,
}

impl MonitorIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorIntent::Running => "running",
            MonitorIntent::Stopped => "stopped",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "running" => Some(MonitorIntent::Running),
            "stopped" => Some(MonitorIntent::Stopped),
            _ => None,
        }
    }
}

pub trait IntentStore: Send + Sync {
    /// Last recorded intent, None if nothing was ever recorded
    fn load(&self) -> Option<MonitorIntent>;

    fn save(&self, intent: MonitorIntent) -> io::Result<()>;
}

/// Process-local store, used in tests and when persistence is off
#[derive(Default)]
pub struct MemoryIntentStore {
    intent: Mutex<Option<MonitorIntent>>,
}

impl MemoryIntentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_intent(intent: MonitorIntent) -> Self {
        Self { intent: Mutex::new(Some(intent)) }
    }
}

impl IntentStore for MemoryIntentStore {
    fn load(&self) -> Option<MonitorIntent> {
        *self.intent.lock()
    }

    fn save(&self, intent: MonitorIntent) -> io::Result<()> {
        *self.intent.lock() = Some(intent);
        Ok(())
    }
}

/// Single-word file, replaced atomically on save
pub struct RuntimeFileIntentStore {
    path: PathBuf,
}

impl RuntimeFileIntentStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }
}

impl IntentStore for RuntimeFileIntentStore {
    fn load(&self) -> Option<MonitorIntent> {
        match fs::read_to_string(&self.path) {
            Ok(content) => {
                let intent = MonitorIntent::parse(&content);
                if intent.is_none() {
                    warn!(path = %self.path.display(), "intent_file_unreadable");
                }
                intent
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "intent_load_failed");
                None
            }
        }
    }

    fn save(&self, intent: MonitorIntent) -> io::Result<()> {
        // Create parent directories if they don't exist
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, intent.as_str())?;
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), intent = %intent.as_str(), "intent_saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_store() {
        let store = MemoryIntentStore::new();
        assert_eq!(store.load(), None);
        store.save(MonitorIntent::Running).unwrap();
        assert_eq!(store.load(), Some(MonitorIntent::Running));
    }

    #[test]
    fn test_file_store_persists_across_instances() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("geobeep").join("intent");

        let store = RuntimeFileIntentStore::new(&path);
        assert_eq!(store.load(), None);
        store.save(MonitorIntent::Running).unwrap();

        let reopened = RuntimeFileIntentStore::new(&path);
        assert_eq!(reopened.load(), Some(MonitorIntent::Running));

        reopened.save(MonitorIntent::Stopped).unwrap();
        assert_eq!(store.load(), Some(MonitorIntent::Stopped));
    }

    #[test]
    fn test_file_store_ignores_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("intent");
        fs::write(&path, "maybe\n").unwrap();
        assert_eq!(RuntimeFileIntentStore::new(&path).load(), None);
    }
}
