//! Short-lived store for encoded packages too large to deliver directly.
//!
//! Entries are pruned opportunistically on every write and after each async job;
//! there is no background timer.
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageCacheEntry {
    pub token: String,
    pub body: String,
    pub expires_at: DateTime<Utc>,
}

pub struct PackageCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, PackageCacheEntry>>,
}

impl PackageCache {
    pub fn new(ttl_seconds: i64) -> Self {
        Self {
            ttl: Duration::seconds(ttl_seconds),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Park `body` under a fresh fetch token and return the token.
    pub fn put(&self, body: String) -> String {
        self.put_at(body, Utc::now())
    }

    pub fn put_at(&self, body: String, now: DateTime<Utc>) -> String {
        let token = super::registry::new_token();
        let mut entries = self.lock();
        entries.retain(|_, e| e.expires_at > now);
        entries.insert(
            token.clone(),
            PackageCacheEntry {
                token: token.clone(),
                body,
                expires_at: now + self.ttl,
            },
        );
        token
    }

    /// Body for `token`, readable any number of times until it expires.
    pub fn get(&self, token: &str) -> Option<String> {
        self.get_at(token, Utc::now())
    }

    pub fn get_at(&self, token: &str, now: DateTime<Utc>) -> Option<String> {
        self.lock()
            .get(token)
            .filter(|e| e.expires_at > now)
            .map(|e| e.body.clone())
    }

    pub fn prune(&self) -> usize {
        self.prune_at(Utc::now())
    }

    pub fn prune_at(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, PackageCacheEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
