//! Per-avatar quest lifecycle: `none -> active -> completed -> none`.
//!
//! State lives in one JSON record per avatar and is re-read on every call, so the
//! engine itself holds nothing mutable. Concurrent events for the same avatar are
//! last-writer-wins.
use chrono::Utc;
use log::{debug, info, warn};
use rand::seq::SliceRandom;
use std::sync::Arc;

use super::errors::QuestError;
use super::pool::{ActiveFilter, ObjectPool};
use super::types::{
    FoundOutcome, Objective, PlayerState, PostTurn, PreTurn, Quest, QuestStatus,
};
use crate::config::QuestConfig;
use crate::logutil::escape_log;
use crate::storage::JsonStore;

/// Single words that must match a whole word of the message.
const INTENT_WORDS: &[&str] = &[
    "quest",
    "adventure",
    "mission",
    "task",
    "bored",
    "challenge",
    "find",
    "hunt",
    "search",
    "sure",
    "yes",
    "yeah",
    "yep",
    "ok",
    "okay",
    "start",
    "begin",
    "ready",
    "chill",
    "spooky",
];

/// Phrases that match anywhere in the normalised message.
const INTENT_PHRASES: &[&str] = &[
    "something to do",
    "of course",
    "why not",
    "let's go",
    "lets go",
    "let's do it",
    "lets do it",
    "give me",
    "i want",
    "i'd like",
    "i would like",
];

const COMPLETION_REPLY: &str = "You found them all! Here is your reward.";

pub struct QuestEngine {
    pool: Arc<ObjectPool>,
    store: JsonStore,
    config: QuestConfig,
}

impl QuestEngine {
    pub fn new(pool: Arc<ObjectPool>, store: JsonStore, config: QuestConfig) -> Self {
        Self {
            pool,
            store,
            config,
        }
    }

    pub fn pool(&self) -> &Arc<ObjectPool> {
        &self.pool
    }

    pub fn default_reward_item(&self) -> &str {
        &self.config.reward_item
    }

    pub fn player_state(&self, avatar: &str) -> PlayerState {
        if avatar.is_empty() {
            return PlayerState::default();
        }
        let path = self.store.record_path(&["quests", "player"], avatar);
        self.store.load_or_default(&path)
    }

    fn save_state(&self, avatar: &str, state: &PlayerState) -> Result<(), QuestError> {
        let path = self.store.record_path(&["quests", "player"], avatar);
        self.store.save(&path, state)?;
        Ok(())
    }

    /// Draw a new quest from the pool.
    ///
    /// Fails with `AlreadyActive` while any quest is current, including one that is
    /// completed but not yet rewarded.
    pub fn generate(
        &self,
        avatar: &str,
        difficulty: Option<u32>,
        count: Option<usize>,
    ) -> Result<Quest, QuestError> {
        if avatar.is_empty() {
            return Err(QuestError::MissingAvatar);
        }
        let mut state = self.player_state(avatar);
        if let Some(current) = &state.current_quest {
            debug!(
                "generate skipped for {}: quest {} is {}",
                escape_log(avatar),
                current.quest_id,
                current.status.as_str()
            );
            return Err(QuestError::AlreadyActive {
                quest_id: current.quest_id.clone(),
            });
        }

        let max = self.config.max_objectives.max(1);
        let count = match count {
            Some(c) => c.max(1),
            None => (state.history.quests_completed as usize + 1).clamp(1, max),
        };

        let recent: Vec<String> = state.history.recent_object_ids.iter().cloned().collect();
        let mut candidates = self
            .pool
            .active(&ActiveFilter::difficulty(difficulty).excluding(recent.iter().cloned()));
        if candidates.len() < count {
            candidates = self
                .pool
                .active(&ActiveFilter::default().excluding(recent.iter().cloned()));
        }
        if candidates.len() < count {
            candidates = self.pool.active(&ActiveFilter::default());
        }
        if candidates.is_empty() {
            warn!("Quest generation for {} failed: no active objects", escape_log(avatar));
            return Err(QuestError::NoActiveObjects);
        }

        let mut rng = rand::thread_rng();
        let selected: Vec<_> = candidates
            .choose_multiple(&mut rng, count.min(candidates.len()))
            .collect();
        let quest_difficulty = difficulty
            .unwrap_or_else(|| selected.iter().map(|o| o.difficulty).max().unwrap_or(1));
        let objectives = selected.iter().map(|o| Objective::from_object(o)).collect();

        let simple = uuid::Uuid::new_v4().simple().to_string();
        let quest = Quest::new(format!("quest_{}", &simple[..12]), quest_difficulty, objectives);
        state.current_quest = Some(quest.clone());
        self.save_state(avatar, &state)?;

        info!(
            "Quest {} generated for {}: {} objectives, difficulty {}",
            quest.quest_id,
            escape_log(avatar),
            quest.total_count(),
            quest.difficulty
        );
        Ok(quest)
    }

    /// Mark the first unfound objective matching `object_id` as found.
    ///
    /// Repeat finds are no-ops that still report current progress.
    pub fn record_found(&self, avatar: &str, object_id: &str) -> Result<FoundOutcome, QuestError> {
        if avatar.is_empty() {
            return Err(QuestError::MissingAvatar);
        }
        let mut state = self.player_state(avatar);
        let quest = match state.current_quest.as_mut() {
            Some(q) if q.is_active() => q,
            _ => return Err(QuestError::NoActiveQuest),
        };

        let now = Utc::now();
        let mut matched = false;
        if let Some(obj) = quest
            .objectives
            .iter_mut()
            .find(|o| o.object_id == object_id && !o.found)
        {
            obj.found = true;
            obj.found_at = Some(now);
            matched = true;
        }

        let found_count = quest.found_count();
        let total_count = quest.total_count();
        let quest_completed = found_count == total_count;
        if quest_completed {
            quest.status = QuestStatus::Completed;
            quest.completed_at = Some(now);
            info!(
                "Quest {} completed by {} ({}/{})",
                quest.quest_id,
                escape_log(avatar),
                found_count,
                total_count
            );
        }
        let quest_id = quest.quest_id.clone();

        if matched {
            self.save_state(avatar, &state)?;
        }

        let found_message = if matched {
            self.pool
                .get(object_id)
                .map(|o| o.found_message)
                .filter(|m| !m.is_empty())
        } else {
            None
        };

        Ok(FoundOutcome {
            matched,
            quest_completed,
            found_count,
            total_count,
            quest_id: Some(quest_id),
            found_message,
            reason: None,
        })
    }

    /// Grant the reward for a completed quest. Fires at most once per quest; returns the
    /// archived quest when it fired.
    pub fn grant_reward(&self, avatar: &str) -> Result<Option<Quest>, QuestError> {
        let mut state = self.player_state(avatar);
        let mut quest = match state.current_quest.take() {
            Some(q) if q.awaiting_reward() => q,
            other => {
                state.current_quest = other;
                return Ok(None);
            }
        };

        quest.reward_given = true;
        quest.reward_given_at = Some(Utc::now());
        let cap = self.config.max_recent_objects;
        state
            .history
            .remember_objects(quest.objectives.iter().map(|o| o.object_id.as_str()), cap);
        state.history.quests_completed += 1;
        state.history.last_quest = Some(quest.clone());
        self.save_state(avatar, &state)?;

        info!(
            "Reward granted to {} for {} (total completed {})",
            escape_log(avatar),
            quest.quest_id,
            state.history.quests_completed
        );
        Ok(Some(quest))
    }

    /// Plain-text quest block for the model, placed ahead of the user message.
    pub fn render_context(&self, avatar: &str) -> String {
        render_state(&self.player_state(avatar))
    }

    /// Compact status for the `Q` field of a result package, e.g. `active:1/3`.
    pub fn status_line(&self, avatar: &str) -> String {
        match self.player_state(avatar).current_quest {
            None => "none".to_string(),
            Some(q) => format!("{}:{}/{}", q.status.as_str(), q.found_count(), q.total_count()),
        }
    }

    /// Whether a chat message reads as asking for (or accepting) a quest.
    pub fn wants_quest(message: &str) -> bool {
        let normalized = message.to_lowercase().replace(['\u{2019}', '\u{2018}'], "'");
        if INTENT_PHRASES.iter().any(|p| normalized.contains(p)) {
            return true;
        }
        normalized
            .split(|c: char| !(c.is_alphanumeric() || c == '\''))
            .any(|w| INTENT_WORDS.contains(&w))
    }

    /// Before the model runs: auto-generate a quest when none is current and the
    /// message signals intent, then render the context block.
    pub fn pre_turn(&self, avatar: &str, npc_id: &str, message: &str) -> PreTurn {
        let mut generated = None;
        if !avatar.is_empty()
            && self.player_state(avatar).current_quest.is_none()
            && Self::wants_quest(message)
        {
            match self.generate(avatar, None, None) {
                Ok(q) => {
                    info!(
                        "Quest {} auto-generated for {} via {}",
                        q.quest_id,
                        escape_log(avatar),
                        escape_log(npc_id)
                    );
                    generated = Some(q.quest_id);
                }
                Err(e) => debug!("Auto-generate skipped for {}: {}", escape_log(avatar), e),
            }
        }
        PreTurn {
            quest_context: self.render_context(avatar),
            actions: Vec::new(),
            generated,
        }
    }

    /// After the model runs: hand out the reward if the quest just completed.
    ///
    /// `forced_reply` is only set when a reward fired and the model produced nothing.
    pub fn post_turn(&self, avatar: &str, reward_item: &str, reply: &str) -> PostTurn {
        let mut out = PostTurn::default();
        if avatar.is_empty() {
            return out;
        }
        match self.grant_reward(avatar) {
            Ok(Some(_)) => {
                let item = if reward_item.trim().is_empty() {
                    self.config.reward_item.as_str()
                } else {
                    reward_item
                };
                out.actions.push(format!("Give:{}", item));
                if reply.trim().is_empty() {
                    out.forced_reply = Some(COMPLETION_REPLY.to_string());
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Reward for {} not recorded: {}", escape_log(avatar), e),
        }
        out
    }

    /// `/quest/event` entry point. `object_found` and the older `cube_clicked` both
    /// record a find; anything else is acknowledged without a match.
    pub fn handle_event(
        &self,
        avatar: &str,
        object_id: &str,
        event: &str,
    ) -> Result<FoundOutcome, QuestError> {
        match event {
            "object_found" | "cube_clicked" | "" => match self.record_found(avatar, object_id) {
                Err(QuestError::NoActiveQuest) => Ok(FoundOutcome {
                    reason: Some("no_active_quest".to_string()),
                    ..Default::default()
                }),
                other => other,
            },
            _ => {
                debug!("Ignoring quest event {} from {}", escape_log(event), escape_log(avatar));
                Ok(FoundOutcome {
                    reason: Some("unknown_event".to_string()),
                    ..Default::default()
                })
            }
        }
    }
}

/// Render the quest block for a given state. This text is the only world state the
/// model sees, so it lists found objects explicitly.
pub fn render_state(state: &PlayerState) -> String {
    let mut lines: Vec<String> = vec!["QUEST_STATUS:".to_string()];
    let quest = match &state.current_quest {
        None => {
            lines.push("status=none".to_string());
            lines.push(format!("quests_completed={}", state.history.quests_completed));
            lines.push(String::new());
            lines.push("QUEST_RULES:".to_string());
            lines.push("- Player has no active quest".to_string());
            lines.push("- Offer an adventure if they seem interested".to_string());
            lines.push("- Keep replies short, single message, no markdown".to_string());
            return lines.join("\n");
        }
        Some(q) => q,
    };

    let found = quest.found_count();
    let total = quest.total_count();
    lines.push(format!("quest_id={}", quest.quest_id));
    lines.push(format!("status={}", quest.status.as_str()));
    lines.push(format!("difficulty={}", quest.difficulty));
    lines.push(format!("found={}/{}", found, total));

    let found_objs: Vec<&Objective> = quest.objectives.iter().filter(|o| o.found).collect();
    if !found_objs.is_empty() {
        lines.push("FOUND_OBJECTS:".to_string());
        for o in found_objs {
            lines.push(format!("- {} (FOUND)", o.name));
        }
    }
    if quest.is_active() {
        let remaining: Vec<&Objective> = quest.objectives.iter().filter(|o| !o.found).collect();
        if !remaining.is_empty() {
            lines.push("REMAINING_OBJECTIVES:".to_string());
            for o in remaining {
                lines.push(format!("- {}: hint=\"{}\"", o.name, o.hint));
            }
        }
    }
    if quest.reward_given {
        lines.push("reward_given=true".to_string());
    }

    lines.push(String::new());
    lines.push("QUEST_RULES:".to_string());
    match (quest.status, quest.reward_given) {
        (QuestStatus::Active, _) => {
            lines.push("- Quest is active; the player is searching".to_string());
            lines.push("- Acknowledge everything under FOUND_OBJECTS".to_string());
            lines.push("- Use the hints to guide them to REMAINING_OBJECTIVES".to_string());
            lines.push(
                "- Never claim an object is found unless it is listed under FOUND_OBJECTS"
                    .to_string(),
            );
            lines.push(format!("- Player has found {} of {} objects", found, total));
        }
        (QuestStatus::Completed, false) => {
            lines.push("- Every object is found; the quest is complete".to_string());
            lines.push("- Congratulate the player; the reward is handed over automatically".to_string());
            lines.push("- Offer another quest afterwards if they want one".to_string());
        }
        (QuestStatus::Completed, true) => {
            lines.push("- Quest completed and rewarded".to_string());
            lines.push("- Offer another quest if the player is interested".to_string());
        }
    }
    lines.push("- Keep replies short, single message, no markdown".to_string());
    lines.join("\n")
}
