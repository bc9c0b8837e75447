//! Scavenger-hunt quests built from a shared pool of in-world objects.
//!
//! - [`pool::ObjectPool`] tracks which props exist and when they last pinged.
//! - [`engine::QuestEngine`] draws quests from the pool and walks each avatar
//!   through `none -> active -> completed -> none`.

pub mod engine;
pub mod errors;
pub mod pool;
pub mod types;

pub use engine::QuestEngine;
pub use errors::QuestError;
pub use pool::{ActiveFilter, ObjectPool};
pub use types::{
    AvatarHistory, FoundOutcome, ObjectRegistration, Objective, PlayerState, PoolObject,
    PoolStatus, PostTurn, PreTurn, Quest, QuestStatus,
};
