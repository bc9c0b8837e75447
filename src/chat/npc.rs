//! NPC personas and instruction composition.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::logutil::escape_log;
use crate::storage::{JsonStore, StorageError};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NpcPersona {
    pub npc_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub persona: String,
    /// Item handed out by `Give:<item>` when a quest is rewarded through this NPC.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reward_item: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl NpcPersona {
    pub fn bare(npc_id: &str) -> Self {
        Self {
            npc_id: npc_id.to_string(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        if self.display_name.trim().is_empty() {
            &self.npc_id
        } else {
            &self.display_name
        }
    }
}

#[derive(Debug, Clone)]
pub struct NpcStore {
    store: JsonStore,
}

impl NpcStore {
    pub fn new(store: JsonStore) -> Self {
        Self { store }
    }

    /// Stored persona, or a bare one for NPCs nobody has configured.
    pub fn get(&self, npc_id: &str) -> NpcPersona {
        let path = self.store.record_path(&["npcs"], npc_id);
        match self.store.load::<NpcPersona>(&path) {
            Ok(Some(p)) => p,
            Ok(None) => NpcPersona::bare(npc_id),
            Err(e) => {
                log::warn!("Unreadable persona for {}: {}", escape_log(npc_id), e);
                NpcPersona::bare(npc_id)
            }
        }
    }

    pub fn upsert(&self, mut persona: NpcPersona) -> Result<NpcPersona, StorageError> {
        persona.updated_at = Some(Utc::now());
        let path = self.store.record_path(&["npcs"], &persona.npc_id);
        self.store.save(&path, &persona)?;
        log::info!("NPC persona saved: {}", escape_log(&persona.npc_id));
        Ok(persona)
    }
}

/// Compose the system instructions for one NPC talking to one avatar.
///
/// Quest state is deliberately absent: it changes every few turns and would
/// otherwise invalidate the remote conversation each time.
pub fn build_instructions(
    npc: &NpcPersona,
    personalization: Option<&str>,
    reply_max_bytes: usize,
) -> String {
    let aim = reply_max_bytes * 9 / 10;
    let mut out = format!(
        "You are {name}, an SLQuest NPC chatting in Second Life. NPC ID: {id}. \
         Reply must be short for Second Life: aim <= {aim} characters. \
         No markdown. One message only. \
         Each player message may be preceded by a QUEST_STATUS block; it is the \
         authoritative quest state and must never be contradicted.",
        name = npc.name(),
        id = npc.npc_id,
        aim = aim,
    );
    if !npc.persona.trim().is_empty() {
        out.push_str("\n\nPERSONA:\n");
        out.push_str(npc.persona.trim());
    }
    if let Some(block) = personalization.filter(|b| !b.trim().is_empty()) {
        out.push_str("\n\n");
        out.push_str(block.trim());
    }
    out
}
