//! # Record Storage
//!
//! Every persisted record (object pool, per-avatar quest state, per-conversation
//! threads, NPC personas) is a small pretty-printed JSON document under the data
//! directory:
//!
//! ```text
//! data/
//! ├── pools/objects.json
//! ├── quests/player/<avatar>.json
//! ├── chat/<avatar>/<npc>.json
//! └── npcs/<npc>.json
//! ```
//!
//! Writes go through [`write_file_locked`]: an exclusive `fs2` lock on the
//! destination, a uniquely named temp file in the same directory, then an atomic
//! rename and a best-effort directory fsync. Readers never see a half-written file.
//! There is no cross-record transaction; two turns racing on the same record end
//! with last-writer-wins.

use fs2::FileExt;
use log::warn;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::validation::safe_filename;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StorageError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Directory-rooted JSON record store. Cheap to clone.
#[derive(Debug, Clone)]
pub struct JsonStore {
    root: PathBuf,
}

impl JsonStore {
    pub fn new(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| StorageError::io(&root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a record named by an arbitrary id under nested directories.
    /// Both directory segments and the id are percent-encoded.
    pub fn record_path(&self, dirs: &[&str], id: &str) -> PathBuf {
        let mut path = self.root.clone();
        for d in dirs {
            path.push(safe_filename(d));
        }
        path.push(format!("{}.json", safe_filename(id)));
        path
    }

    /// Path of a fixed-name file (e.g. `pools/objects.json`); segments are trusted.
    pub fn fixed_path(&self, segments: &[&str]) -> PathBuf {
        let mut path = self.root.clone();
        for s in segments {
            path.push(s);
        }
        path
    }

    /// Load a record, falling back to `T::default()` when it is missing or unreadable.
    pub fn load_or_default<T>(&self, path: &Path) -> T
    where
        T: DeserializeOwned + Default,
    {
        match self.load(path) {
            Ok(Some(v)) => v,
            Ok(None) => T::default(),
            Err(e) => {
                warn!("Discarding unreadable record {}: {}", path.display(), e);
                T::default()
            }
        }
    }

    /// Load a record; `Ok(None)` when the file does not exist.
    pub fn load<T>(&self, path: &Path) -> StorageResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::io(path, e)),
        };
        if content.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&content)?))
    }

    pub fn save<T>(&self, path: &Path, value: &T) -> StorageResult<()>
    where
        T: Serialize,
    {
        let content = serde_json::to_string_pretty(value)?;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| StorageError::io(dir, e))?;
        }
        write_file_locked(path, &content).map_err(|e| StorageError::io(path, e))
    }

    /// Remove a single record. Returns whether it existed.
    pub fn remove(&self, path: &Path) -> StorageResult<bool> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::io(path, e)),
        }
    }

    /// Remove every `*.json` record directly inside `dir`. Returns how many were removed.
    pub fn remove_all_in(&self, dir: &Path) -> StorageResult<usize> {
        let entries = match std::fs::read_dir(dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(StorageError::io(dir, e)),
        };
        let mut removed = 0;
        for entry in entries.flatten() {
            let p = entry.path();
            if p.extension().and_then(|s| s.to_str()) == Some("json") && self.remove(&p)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Write `content` to `path` atomically while holding an exclusive lock on the destination.
pub fn write_file_locked(path: &Path, content: &str) -> std::io::Result<()> {
    use std::fs::{self, File, OpenOptions};
    use std::io::Write;

    // fs2 has no async API; records are small so blocking here is brief.
    let lock_file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)?;
    lock_file.lock_exclusive()?;

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let base = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("record.json");
    let mut counter = 0u32;
    let tmp_path = loop {
        let candidate = dir.join(format!(".{}.tmp-{}-{}", base, std::process::id(), counter));
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
        {
            Ok(mut tmp) => {
                tmp.write_all(content.as_bytes())?;
                tmp.flush()?;
                let _ = tmp.sync_all();
                break candidate;
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                counter = counter.saturating_add(1);
            }
            Err(e) => return Err(e),
        }
    };

    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }
    if let Ok(dir_file) = File::open(dir) {
        let _ = dir_file.sync_all();
    }
    drop(lock_file);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Rec {
        n: u32,
        name: String,
    }

    fn setup_test_store() -> (tempfile::TempDir, JsonStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn save_then_load() {
        let (_dir, store) = setup_test_store();
        let path = store.record_path(&["chat", "avatar one"], "npc/1");
        let rec = Rec {
            n: 3,
            name: "héllo".into(),
        };
        store.save(&path, &rec).unwrap();
        assert_eq!(store.load::<Rec>(&path).unwrap(), Some(rec));
        assert!(path.starts_with(store.root()));
        assert!(path.to_str().unwrap().contains("avatar%20one"));
    }

    #[test]
    fn missing_and_corrupt_records_default() {
        let (_dir, store) = setup_test_store();
        let path = store.fixed_path(&["pools", "objects.json"]);
        assert_eq!(store.load_or_default::<Rec>(&path), Rec::default());

        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{not json").unwrap();
        assert_eq!(store.load_or_default::<Rec>(&path), Rec::default());
        assert!(store.load::<Rec>(&path).is_err());
    }

    #[test]
    fn overwrite_leaves_no_temp_files() {
        let (_dir, store) = setup_test_store();
        let path = store.record_path(&["npcs"], "guide");
        for n in 0..5 {
            store
                .save(
                    &path,
                    &Rec {
                        n,
                        name: "x".into(),
                    },
                )
                .unwrap();
        }
        let names: Vec<String> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["guide.json".to_string()]);
        assert_eq!(store.load::<Rec>(&path).unwrap().unwrap().n, 4);
    }

    #[test]
    fn remove_all_in_dir() {
        let (_dir, store) = setup_test_store();
        for npc in ["a", "b", "c"] {
            let p = store.record_path(&["chat", "av"], npc);
            store.save(&p, &Rec::default()).unwrap();
        }
        let dir = store.root().join("chat").join("av");
        assert_eq!(store.remove_all_in(&dir).unwrap(), 3);
        assert_eq!(store.remove_all_in(&dir).unwrap(), 0);
        let p = store.record_path(&["chat", "av"], "a");
        assert!(!store.remove(&p).unwrap());
    }
}
