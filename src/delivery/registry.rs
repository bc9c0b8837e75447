//! Callback registrations: where to deliver async results for an (object, NPC) pair,
//! and the bearer token that proves a submission came from that object.
use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::logutil::{escape_log, redact_secrets};
use crate::validation::{validate_callback_url, ValidationError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallbackRegistration {
    pub object_id: String,
    pub npc_id: String,
    pub delivery_url: String,
    #[serde(skip_serializing)]
    pub token: String,
    pub region: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error(transparent)]
    InvalidUrl(#[from] ValidationError),

    #[error("no callback registered for this object and npc")]
    NotRegistered,

    #[error("callback registration expired")]
    Expired,

    #[error("callback token mismatch")]
    TokenMismatch,
}

impl RegistryError {
    pub fn code(&self) -> &'static str {
        match self {
            RegistryError::InvalidUrl(_) => "invalid_callback_url",
            RegistryError::NotRegistered => "callback_not_registered",
            RegistryError::Expired => "callback_expired",
            RegistryError::TokenMismatch => "callback_token_mismatch",
        }
    }
}

/// Token plus seconds until it lapses without further activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuedToken {
    pub callback_token: String,
    pub expires_sec: i64,
}

type Key = (String, String);

pub struct CallbackRegistry {
    ttl: Duration,
    entries: Mutex<HashMap<Key, CallbackRegistration>>,
}

impl CallbackRegistry {
    pub fn new(ttl_seconds: i64) -> Self {
        Self {
            ttl: Duration::seconds(ttl_seconds),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(
        &self,
        object_id: &str,
        npc_id: &str,
        url: &str,
        region: &str,
    ) -> Result<IssuedToken, RegistryError> {
        self.register_at(object_id, npc_id, url, region, Utc::now())
    }

    /// Same URL within the TTL keeps the token; a new URL (or a lapsed entry) rotates it.
    pub fn register_at(
        &self,
        object_id: &str,
        npc_id: &str,
        url: &str,
        region: &str,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, RegistryError> {
        let url = validate_callback_url(url)?;
        let key = (object_id.to_string(), npc_id.to_string());
        let mut entries = self.lock();
        entries.retain(|_, e| !self.is_expired(e, now));

        let reuse = entries
            .get(&key)
            .filter(|e| e.delivery_url == url)
            .map(|e| e.token.clone());
        let rotated = reuse.is_none();
        let token = reuse.unwrap_or_else(new_token);

        entries.insert(
            key,
            CallbackRegistration {
                object_id: object_id.to_string(),
                npc_id: npc_id.to_string(),
                delivery_url: url.clone(),
                token: token.clone(),
                region: region.to_string(),
                updated_at: now,
            },
        );
        drop(entries);

        if rotated {
            info!(
                "Callback registered: object={} npc={} url={}",
                escape_log(object_id),
                escape_log(npc_id),
                redact_secrets(&url)
            );
        }
        Ok(IssuedToken {
            callback_token: token,
            expires_sec: self.ttl.num_seconds(),
        })
    }

    pub fn validate(
        &self,
        object_id: &str,
        npc_id: &str,
        token: &str,
    ) -> Result<CallbackRegistration, RegistryError> {
        self.validate_at(object_id, npc_id, token, Utc::now())
    }

    /// Check a presented token. A successful check counts as activity and extends the TTL.
    pub fn validate_at(
        &self,
        object_id: &str,
        npc_id: &str,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<CallbackRegistration, RegistryError> {
        let key = (object_id.to_string(), npc_id.to_string());
        let mut entries = self.lock();
        let entry = entries.get_mut(&key).ok_or(RegistryError::NotRegistered)?;
        if self.is_expired(entry, now) {
            entries.remove(&key);
            return Err(RegistryError::Expired);
        }
        if !constant_time_eq(entry.token.as_bytes(), token.as_bytes()) {
            warn!(
                target: "security",
                "Callback token mismatch for object={} npc={}",
                escape_log(object_id),
                escape_log(npc_id)
            );
            return Err(RegistryError::TokenMismatch);
        }
        entry.updated_at = now;
        Ok(entry.clone())
    }

    /// Current registration if still live, without touching it.
    pub fn lookup(&self, object_id: &str, npc_id: &str) -> Option<CallbackRegistration> {
        let key = (object_id.to_string(), npc_id.to_string());
        let now = Utc::now();
        self.lock()
            .get(&key)
            .filter(|e| !self.is_expired(e, now))
            .cloned()
    }

    pub fn prune(&self) -> usize {
        self.prune_at(Utc::now())
    }

    pub fn prune_at(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, e| e.updated_at + self.ttl > now);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_expired(&self, entry: &CallbackRegistration, now: DateTime<Utc>) -> bool {
        entry.updated_at + self.ttl <= now
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Key, CallbackRegistration>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub fn new_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_url_rejected() {
        let reg = CallbackRegistry::new(60);
        let err = reg.register("o", "n", "ftp://x", "r").unwrap_err();
        assert_eq!(err.code(), "invalid_callback_url");
        assert_eq!(err.clone(), err);
        assert!(reg.is_empty());
    }

    #[test]
    fn test_validate_touches_and_checks_token() {
        let reg = CallbackRegistry::new(60);
        let t0 = Utc::now();
        let issued = reg
            .register_at("o", "n", "http://h/cb", "r", t0)
            .unwrap();
        assert_eq!(issued.expires_sec, 60);

        assert_eq!(
            reg.validate_at("o", "n", "nope", t0).unwrap_err(),
            RegistryError::TokenMismatch
        );
        assert_eq!(
            reg.validate_at("o", "other", &issued.callback_token, t0)
                .unwrap_err(),
            RegistryError::NotRegistered
        );

        // activity at +50s keeps it alive at +100s
        let t50 = t0 + Duration::seconds(50);
        reg.validate_at("o", "n", &issued.callback_token, t50).unwrap();
        let t100 = t0 + Duration::seconds(100);
        assert!(reg.validate_at("o", "n", &issued.callback_token, t100).is_ok());

        let late = t100 + Duration::seconds(61);
        assert_eq!(
            reg.validate_at("o", "n", &issued.callback_token, late)
                .unwrap_err(),
            RegistryError::Expired
        );
    }

    #[test]
    fn test_prune_expired() {
        let reg = CallbackRegistry::new(60);
        let t0 = Utc::now();
        reg.register_at("a", "n", "http://h/1", "", t0).unwrap();
        reg.register_at("b", "n", "http://h/2", "", t0 + Duration::seconds(30))
            .unwrap();
        assert_eq!(reg.prune_at(t0 + Duration::seconds(61)), 1);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_new_url_rotates_token() {
        let reg = CallbackRegistry::new(60);
        let t0 = Utc::now();
        let first = reg.register_at("o", "n", "http://h/1", "r", t0).unwrap();
        let same = reg.register_at("o", "n", "http://h/1", "r", t0).unwrap();
        assert_eq!(first.callback_token, same.callback_token);

        let moved = reg.register_at("o", "n", "http://h/2", "r", t0).unwrap();
        assert_ne!(first.callback_token, moved.callback_token);
        assert_eq!(
            reg.validate_at("o", "n", &first.callback_token, t0)
                .unwrap_err(),
            RegistryError::TokenMismatch
        );
        let live = reg.validate_at("o", "n", &moved.callback_token, t0).unwrap();
        assert_eq!(live.delivery_url, "http://h/2");
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_register_prunes_lapsed_entries() {
        let reg = CallbackRegistry::new(60);
        let t0 = Utc::now();
        let old = reg.register_at("a", "n", "http://h/1", "", t0).unwrap();
        let later = t0 + Duration::seconds(120);
        reg.register_at("b", "n", "http://h/2", "", later).unwrap();
        assert_eq!(reg.len(), 1);

        // a lapsed entry re-registered on the same URL gets a fresh token
        let again = reg.register_at("a", "n", "http://h/1", "", later).unwrap();
        assert_ne!(old.callback_token, again.callback_token);
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }
}
