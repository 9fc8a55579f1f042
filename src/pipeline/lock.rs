use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::ir::TonePosition;

#[derive(Debug, Serialize, Deserialize)]
struct LockFile {
    position: f32,
}

/// Slider position that survives restarts.
#[derive(Clone, Debug)]
pub struct LockStore {
    path: PathBuf,
}

impl LockStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raw stored value. A missing or unreadable file means "not locked".
    pub fn load(&self) -> Option<f32> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!("read lock file {}: {e}", self.path.display());
                return None;
            }
        };
        match serde_json::from_str::<LockFile>(&text) {
            Ok(lock) if lock.position.is_finite() => Some(lock.position.clamp(-100.0, 100.0)),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("ignoring malformed lock file {}: {e}", self.path.display());
                None
            }
        }
    }

    pub fn locked_position(&self) -> Option<TonePosition> {
        self.load().map(TonePosition::snap)
    }

    pub fn save(&self, value: f32) -> anyhow::Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create lock dir: {}", dir.display()))?;
        }
        let position = if value.is_finite() {
            value.clamp(-100.0, 100.0)
        } else {
            0.0
        };
        let body = serde_json::to_string_pretty(&LockFile { position })?;
        std::fs::write(&self.path, body)
            .with_context(|| format!("write lock file: {}", self.path.display()))?;
        Ok(())
    }

    pub fn clear(&self) -> anyhow::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                Err(e).with_context(|| format!("remove lock file: {}", self.path.display()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_load_clear() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LockStore::new(dir.path().join("state").join("lock.json"));
        assert_eq!(store.locked_position(), None);

        store.save(60.0).expect("save");
        assert_eq!(store.load(), Some(60.0));
        assert_eq!(store.locked_position(), Some(TonePosition::Polite));

        store.save(-400.0).expect("save");
        assert_eq!(store.locked_position(), Some(TonePosition::MoreCasual));

        store.clear().expect("clear");
        store.clear().expect("clear twice");
        assert_eq!(store.load(), None);
    }

    #[test]
    fn malformed_file_is_not_a_lock() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("lock.json");
        std::fs::write(&path, "{not json").expect("write");
        assert_eq!(LockStore::new(path).load(), None);
    }
}
