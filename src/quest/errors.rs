use thiserror::Error;

use crate::storage::StorageError;

/// Errors returned by the quest engine.
#[derive(Debug, Error)]
pub enum QuestError {
    #[error("avatar key is required")]
    MissingAvatar,

    /// The avatar still has a quest (active, or completed but not yet rewarded).
    #[error("avatar already has quest {quest_id}")]
    AlreadyActive { quest_id: String },

    #[error("no active objects in the pool")]
    NoActiveObjects,

    #[error("avatar has no active quest")]
    NoActiveQuest,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl QuestError {
    /// Stable code used in API responses and logs.
    pub fn code(&self) -> &'static str {
        match self {
            QuestError::MissingAvatar => "missing_avatar_key",
            QuestError::AlreadyActive { .. } => "already_has_active_quest",
            QuestError::NoActiveObjects => "no_active_objects",
            QuestError::NoActiveQuest => "no_active_quest",
            QuestError::Storage(_) => "storage_error",
        }
    }
}
