//! NPC chat: conversation continuity, personas, personalization and reply shaping.

pub mod conversation;
pub mod llm;
pub mod npc;
pub mod orchestrator;
pub mod profile;
pub mod reply;

pub use conversation::{ConversationStore, ConversationThread};
pub use llm::{CompletionRequest, LlmError, LlmService, OpenAiResponsesClient};
pub use npc::{NpcPersona, NpcStore};
pub use orchestrator::{TurnMode, TurnOrchestrator, TurnOutcome, TurnRequest, APOLOGY};
pub use profile::{HttpProfileClient, NoProfile, ProfileCard, ProfileLookup};
