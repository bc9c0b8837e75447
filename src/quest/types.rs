//! Record types for the object pool and per-avatar quest state.
//!
//! These are the on-disk shapes. Every collection and optional field carries a
//! serde default so records written by older builds (or by hand) still load.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

fn default_difficulty() -> u32 {
    1
}

/// A discoverable in-world prop, refreshed every time the object pings `/pool/register`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolObject {
    #[serde(alias = "object_id")]
    pub id: String,
    #[serde(alias = "object_name", default)]
    pub display_name: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub position: String,
    #[serde(default = "default_difficulty")]
    pub difficulty: u32,
    #[serde(default)]
    pub hint: String,
    #[serde(default)]
    pub found_message: String,
    #[serde(default)]
    pub category: String,
    pub last_seen: DateTime<Utc>,
}

impl PoolObject {
    /// Name shown to players; falls back to the id for objects registered without one.
    pub fn name(&self) -> &str {
        if self.display_name.trim().is_empty() {
            &self.id
        } else {
            &self.display_name
        }
    }
}

/// Registration payload from an in-world object. `last_seen` is stamped by the pool.
#[derive(Debug, Clone, Default)]
pub struct ObjectRegistration {
    pub id: String,
    pub display_name: String,
    pub region: String,
    pub position: String,
    pub difficulty: Option<u32>,
    pub hint: String,
    pub found_message: String,
    pub category: String,
}

impl ObjectRegistration {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_difficulty(mut self, difficulty: u32) -> Self {
        self.difficulty = Some(difficulty);
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = hint.into();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub(crate) fn into_object(self, last_seen: DateTime<Utc>) -> PoolObject {
        PoolObject {
            id: self.id,
            display_name: self.display_name,
            region: self.region,
            position: self.position,
            difficulty: self.difficulty.unwrap_or(1).max(1),
            hint: self.hint,
            found_message: self.found_message,
            category: self.category,
            last_seen,
        }
    }
}

/// On-disk shape of `pools/objects.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolFile {
    #[serde(default)]
    pub objects: BTreeMap<String, PoolObject>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct PoolStatus {
    pub total_objects: usize,
    pub active_objects: usize,
    pub by_difficulty: BTreeMap<u32, usize>,
    pub by_category: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestStatus {
    Active,
    Completed,
}

impl QuestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestStatus::Active => "active",
            QuestStatus::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Objective {
    pub object_id: String,
    #[serde(alias = "object_name", default)]
    pub name: String,
    #[serde(default)]
    pub hint: String,
    #[serde(default)]
    pub found: bool,
    #[serde(default)]
    pub found_at: Option<DateTime<Utc>>,
}

impl Objective {
    pub fn from_object(obj: &PoolObject) -> Self {
        Self {
            object_id: obj.id.clone(),
            name: obj.name().to_string(),
            hint: obj.hint.clone(),
            found: false,
            found_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quest {
    pub quest_id: String,
    #[serde(default = "default_difficulty")]
    pub difficulty: u32,
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub objectives: Vec<Objective>,
    pub status: QuestStatus,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reward_given: bool,
    #[serde(default)]
    pub reward_given_at: Option<DateTime<Utc>>,
}

impl Quest {
    pub fn new(quest_id: String, difficulty: u32, objectives: Vec<Objective>) -> Self {
        Self {
            quest_id,
            difficulty,
            generated_at: Utc::now(),
            objectives,
            status: QuestStatus::Active,
            completed_at: None,
            reward_given: false,
            reward_given_at: None,
        }
    }

    pub fn found_count(&self) -> usize {
        self.objectives.iter().filter(|o| o.found).count()
    }

    pub fn total_count(&self) -> usize {
        self.objectives.len()
    }

    pub fn is_active(&self) -> bool {
        self.status == QuestStatus::Active
    }

    /// Completed and still waiting for the reward hand-off.
    pub fn awaiting_reward(&self) -> bool {
        self.status == QuestStatus::Completed && !self.reward_given
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AvatarHistory {
    #[serde(default)]
    pub quests_completed: u32,
    #[serde(alias = "recent_objects", default)]
    pub recent_object_ids: VecDeque<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_quest: Option<Quest>,
}

impl AvatarHistory {
    /// Push ids into the recent-object FIFO, skipping ones already present, evicting the oldest past `cap`.
    pub fn remember_objects<'a>(&mut self, ids: impl IntoIterator<Item = &'a str>, cap: usize) {
        for id in ids {
            if !self.recent_object_ids.iter().any(|r| r == id) {
                self.recent_object_ids.push_back(id.to_string());
            }
        }
        while self.recent_object_ids.len() > cap {
            self.recent_object_ids.pop_front();
        }
    }
}

/// Everything persisted for one avatar in `quests/player/<avatar>.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    #[serde(default)]
    pub current_quest: Option<Quest>,
    #[serde(default)]
    pub history: AvatarHistory,
}

/// Outcome of an objective-found event.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FoundOutcome {
    pub matched: bool,
    pub quest_completed: bool,
    pub found_count: usize,
    pub total_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quest_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub found_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Result of the pre-turn hook: text to place ahead of the user message plus pending actions.
#[derive(Debug, Clone, Default)]
pub struct PreTurn {
    pub quest_context: String,
    pub actions: Vec<String>,
    pub generated: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PostTurn {
    pub actions: Vec<String>,
    pub forced_reply: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recent_fifo_dedupes_and_evicts_oldest() {
        let mut h = AvatarHistory::default();
        h.remember_objects(["a", "b", "c"], 3);
        h.remember_objects(["b", "d"], 3);
        assert_eq!(
            h.recent_object_ids.iter().collect::<Vec<_>>(),
            vec!["b", "c", "d"]
        );
    }

    #[test]
    fn test_legacy_field_names_load() {
        let raw = r#"{
            "current_quest": null,
            "history": {"quests_completed": 2, "recent_objects": ["x1"]}
        }"#;
        let state: PlayerState = serde_json::from_str(raw).unwrap();
        assert_eq!(state.history.quests_completed, 2);
        assert_eq!(state.history.recent_object_ids.len(), 1);

        let obj = r#"{"object_id":"cube","object_name":"Red Cube","last_seen":"2026-01-01T00:00:00Z"}"#;
        let obj: PoolObject = serde_json::from_str(obj).unwrap();
        assert_eq!(obj.id, "cube");
        assert_eq!(obj.name(), "Red Cube");
        assert_eq!(obj.difficulty, 1);
    }

    #[test]
    fn test_quest_counts() {
        let mut q = Quest::new(
            "quest_1".into(),
            1,
            vec![
                Objective {
                    object_id: "a".into(),
                    name: "A".into(),
                    hint: String::new(),
                    found: true,
                    found_at: Some(Utc::now()),
                },
                Objective {
                    object_id: "b".into(),
                    name: "B".into(),
                    hint: String::new(),
                    found: false,
                    found_at: None,
                },
            ],
        );
        assert_eq!(q.found_count(), 1);
        assert_eq!(q.total_count(), 2);
        assert!(q.is_active());
        q.status = QuestStatus::Completed;
        assert!(q.awaiting_reward());
    }
}
