//! Shared registry of findable in-world objects.
//!
//! Objects are never deleted. They age out of [`ObjectPool::active`] once their
//! `last_seen` falls outside the staleness window, and come back the next time
//! they ping.
use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Mutex;

use super::types::{ObjectRegistration, PoolFile, PoolObject, PoolStatus};
use crate::storage::{JsonStore, StorageError};

/// Optional predicates for [`ObjectPool::active`].
#[derive(Debug, Clone, Default)]
pub struct ActiveFilter {
    pub min_difficulty: Option<u32>,
    pub max_difficulty: Option<u32>,
    pub category: Option<String>,
    pub exclude: HashSet<String>,
}

impl ActiveFilter {
    pub fn difficulty(d: Option<u32>) -> Self {
        Self {
            min_difficulty: d,
            max_difficulty: d,
            ..Default::default()
        }
    }

    pub fn excluding<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude.extend(ids.into_iter().map(Into::into));
        self
    }

    fn matches(&self, obj: &PoolObject) -> bool {
        if self.exclude.contains(&obj.id) {
            return false;
        }
        if let Some(min) = self.min_difficulty {
            if obj.difficulty < min {
                return false;
            }
        }
        if let Some(max) = self.max_difficulty {
            if obj.difficulty > max {
                return false;
            }
        }
        match &self.category {
            Some(c) => obj.category == *c,
            None => true,
        }
    }
}

pub struct ObjectPool {
    store: JsonStore,
    path: PathBuf,
    stale_window: Duration,
    objects: Mutex<BTreeMap<String, PoolObject>>,
}

impl ObjectPool {
    /// Open the pool stored under `<data_dir>/pools/objects.json`.
    pub fn open(store: JsonStore, stale_seconds: i64) -> Self {
        let path = store.fixed_path(&["pools", "objects.json"]);
        let file: PoolFile = store.load_or_default(&path);
        info!(
            "Object pool loaded: {} objects (stale window {}s)",
            file.objects.len(),
            stale_seconds
        );
        Self {
            store,
            path,
            stale_window: Duration::seconds(stale_seconds),
            objects: Mutex::new(file.objects),
        }
    }

    pub fn stale_window(&self) -> Duration {
        self.stale_window
    }

    /// Upsert by id, stamping `last_seen = now`.
    pub fn register(&self, reg: ObjectRegistration) -> Result<PoolObject, StorageError> {
        self.register_at(reg, Utc::now())
    }

    pub fn register_at(
        &self,
        reg: ObjectRegistration,
        now: DateTime<Utc>,
    ) -> Result<PoolObject, StorageError> {
        let obj = reg.into_object(now);
        let mut objects = self.lock();
        let mut next = objects.clone();
        let fresh = next.insert(obj.id.clone(), obj.clone()).is_none();
        let snapshot = PoolFile { objects: next };
        // memory only changes once the record is on disk
        self.store.save(&self.path, &snapshot)?;
        *objects = snapshot.objects;
        drop(objects);
        if fresh {
            info!(
                "Pool object registered: {} difficulty={} category={}",
                crate::logutil::escape_log(&obj.id),
                obj.difficulty,
                crate::logutil::escape_log(&obj.category)
            );
        } else {
            debug!("Pool object refreshed: {}", crate::logutil::escape_log(&obj.id));
        }
        Ok(obj)
    }

    pub fn get(&self, id: &str) -> Option<PoolObject> {
        self.lock().get(id).cloned()
    }

    /// Live objects matching `filter`, ordered by id.
    pub fn active(&self, filter: &ActiveFilter) -> Vec<PoolObject> {
        self.active_at(filter, Utc::now())
    }

    pub fn active_at(&self, filter: &ActiveFilter, now: DateTime<Utc>) -> Vec<PoolObject> {
        let cutoff = now - self.stale_window;
        self.lock()
            .values()
            .filter(|o| o.last_seen >= cutoff && filter.matches(o))
            .cloned()
            .collect()
    }

    pub fn status(&self) -> PoolStatus {
        self.status_at(Utc::now())
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> PoolStatus {
        let cutoff = now - self.stale_window;
        let objects = self.lock();
        let mut status = PoolStatus {
            total_objects: objects.len(),
            ..Default::default()
        };
        for obj in objects.values().filter(|o| o.last_seen >= cutoff) {
            status.active_objects += 1;
            *status.by_difficulty.entry(obj.difficulty).or_default() += 1;
            let cat = if obj.category.is_empty() {
                "uncategorized".to_string()
            } else {
                obj.category.clone()
            };
            *status.by_category.entry(cat).or_default() += 1;
        }
        status
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, PoolObject>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.objects.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_pool(stale: i64) -> (TempDir, ObjectPool) {
        let dir = TempDir::new().unwrap();
        let store = JsonStore::new(dir.path()).unwrap();
        (dir, ObjectPool::open(store, stale))
    }

    #[test]
    fn test_register_is_upsert() {
        let (_dir, pool) = setup_pool(600);
        pool.register(ObjectRegistration::new("cube").with_difficulty(2))
            .unwrap();
        pool.register(ObjectRegistration::new("cube").with_difficulty(3))
            .unwrap();
        let all = pool.active(&ActiveFilter::default());
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].difficulty, 3);
    }

    #[test]
    fn test_staleness_window() {
        let (_dir, pool) = setup_pool(600);
        let now = Utc::now();
        pool.register_at(ObjectRegistration::new("old"), now - Duration::seconds(601))
            .unwrap();
        pool.register_at(ObjectRegistration::new("new"), now).unwrap();
        let ids: Vec<String> = pool
            .active_at(&ActiveFilter::default(), now)
            .into_iter()
            .map(|o| o.id)
            .collect();
        assert_eq!(ids, vec!["new".to_string()]);

        let status = pool.status_at(now);
        assert_eq!(status.total_objects, 2);
        assert_eq!(status.active_objects, 1);
    }

    #[test]
    fn test_filters() {
        let (_dir, pool) = setup_pool(600);
        for (id, d, cat) in [("a", 1, "spooky"), ("b", 2, "chill"), ("c", 3, "spooky")] {
            pool.register(
                ObjectRegistration::new(id)
                    .with_difficulty(d)
                    .with_category(cat),
            )
            .unwrap();
        }
        let f = ActiveFilter {
            min_difficulty: Some(2),
            ..Default::default()
        };
        assert_eq!(pool.active(&f).len(), 2);

        let f = ActiveFilter {
            category: Some("spooky".into()),
            ..Default::default()
        }
        .excluding(["a"]);
        let got = pool.active(&f);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].id, "c");

        assert_eq!(pool.active(&ActiveFilter::difficulty(Some(2)))[0].id, "b");
    }

    #[test]
    fn test_failed_save_leaves_pool_unchanged() {
        let (dir, pool) = setup_pool(600);
        // a plain file where the pools directory should go makes every save fail
        std::fs::write(dir.path().join("pools"), b"").unwrap();
        assert!(pool.register(ObjectRegistration::new("lamp")).is_err());
        assert!(pool.get("lamp").is_none());
        assert_eq!(pool.status().total_objects, 0);
    }

    #[test]
    fn test_pool_persists_across_open() {
        let dir = TempDir::new().unwrap();
        {
            let pool = ObjectPool::open(JsonStore::new(dir.path()).unwrap(), 600);
            pool.register(ObjectRegistration::new("lamp").with_name("Old Lamp"))
                .unwrap();
        }
        let pool = ObjectPool::open(JsonStore::new(dir.path()).unwrap(), 600);
        assert_eq!(pool.get("lamp").unwrap().name(), "Old Lamp");
    }
}
