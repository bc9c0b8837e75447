//! Per-(avatar, NPC) continuity records.
//!
//! A thread remembers the remote conversation handle, the fingerprint of the
//! instructions that handle was seeded with, and a bounded local turn log used
//! when the model has to be called statelessly.
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::llm::ChatMessage;
use crate::logutil::escape_log;
use crate::storage::{JsonStore, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnEntry {
    pub direction: Direction,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationThread {
    pub avatar_id: String,
    pub npc_id: String,
    #[serde(default)]
    pub remote_handle: Option<String>,
    #[serde(default)]
    pub instructions_fingerprint: Option<String>,
    #[serde(default)]
    pub turn_log: Vec<TurnEntry>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ConversationThread {
    pub fn new(avatar_id: &str, npc_id: &str) -> Self {
        Self {
            avatar_id: avatar_id.to_string(),
            npc_id: npc_id.to_string(),
            ..Default::default()
        }
    }

    /// A handle can only be reused if it exists and was seeded with the same instructions.
    pub fn reusable_handle(&self, fingerprint: &str) -> Option<&str> {
        match (&self.remote_handle, &self.instructions_fingerprint) {
            (Some(h), Some(fp)) if fp == fingerprint => Some(h.as_str()),
            _ => None,
        }
    }

    pub fn set_handle(&mut self, handle: String, fingerprint: &str) {
        self.remote_handle = Some(handle);
        self.instructions_fingerprint = Some(fingerprint.to_string());
    }

    pub fn clear_handle(&mut self) {
        self.remote_handle = None;
        self.instructions_fingerprint = None;
    }

    /// Append one exchange, dropping the oldest entries beyond `limit`.
    pub fn record_turn(&mut self, user_text: &str, reply: &str, error: Option<&str>, limit: usize) {
        let now = Utc::now();
        self.turn_log.push(TurnEntry {
            direction: Direction::In,
            text: user_text.to_string(),
            timestamp: now,
            error: None,
        });
        self.turn_log.push(TurnEntry {
            direction: Direction::Out,
            text: reply.to_string(),
            timestamp: now,
            error: error.map(str::to_string),
        });
        if self.turn_log.len() > limit {
            let excess = self.turn_log.len() - limit;
            self.turn_log.drain(..excess);
        }
        self.updated_at = Some(now);
    }

    /// The last `n` log entries as model messages. Failed replies (apologies) are left out.
    pub fn recent_messages(&self, n: usize) -> Vec<ChatMessage> {
        let start = self.turn_log.len().saturating_sub(n);
        self.turn_log[start..]
            .iter()
            .filter(|t| t.error.is_none())
            .map(|t| match t.direction {
                Direction::In => ChatMessage::user(t.text.clone()),
                Direction::Out => ChatMessage::assistant(t.text.clone()),
            })
            .collect()
    }
}

/// Lowercase hex SHA-256 of the composed instructions.
pub fn fingerprint(instructions: &str) -> String {
    let digest = Sha256::digest(instructions.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[derive(Debug, Clone)]
pub struct ConversationStore {
    store: JsonStore,
}

impl ConversationStore {
    pub fn new(store: JsonStore) -> Self {
        Self { store }
    }

    pub fn load(&self, avatar_id: &str, npc_id: &str) -> ConversationThread {
        let path = self.store.record_path(&["chat", avatar_id], npc_id);
        let mut thread: ConversationThread = self.store.load_or_default(&path);
        if thread.avatar_id.is_empty() {
            thread.avatar_id = avatar_id.to_string();
            thread.npc_id = npc_id.to_string();
        }
        thread
    }

    pub fn save(&self, thread: &ConversationThread) -> Result<(), StorageError> {
        let path = self
            .store
            .record_path(&["chat", &thread.avatar_id], &thread.npc_id);
        self.store.save(&path, thread)
    }

    /// Forget one conversation. Returns whether a record existed.
    pub fn reset(&self, avatar_id: &str, npc_id: &str) -> Result<bool, StorageError> {
        let path = self.store.record_path(&["chat", avatar_id], npc_id);
        let removed = self.store.remove(&path)?;
        if removed {
            info!(
                "Conversation reset: avatar={} npc={}",
                escape_log(avatar_id),
                escape_log(npc_id)
            );
        }
        Ok(removed)
    }

    /// Forget every conversation for an avatar.
    pub fn reset_all(&self, avatar_id: &str) -> Result<usize, StorageError> {
        let marker = self.store.record_path(&["chat", avatar_id], "_");
        let Some(dir) = marker.parent() else {
            warn!("No conversation directory for {}", escape_log(avatar_id));
            return Ok(0);
        };
        let removed = self.store.remove_all_in(dir)?;
        info!(
            "Conversation reset: avatar={} removed={}",
            escape_log(avatar_id),
            removed
        );
        Ok(removed)
    }
}
