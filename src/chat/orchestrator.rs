//! # Turn Orchestrator
//!
//! Runs one avatar->NPC chat turn against the remote model while keeping the
//! remote conversation coherent across independent HTTP calls.
//!
//! ## Continuity
//!
//! 1. Compose the NPC instructions and fingerprint them.
//! 2. If the stored handle exists and was seeded with the same fingerprint, send only
//!    the new turn on that handle ([`TurnMode::Continued`]).
//! 3. Otherwise open a fresh remote conversation seeded with the instructions
//!    ([`TurnMode::Fresh`]).
//! 4. If the remote side rejects a reused handle, the turn is retried once on a newly
//!    created conversation ([`TurnMode::Recreated`]). Other failures leave the handle
//!    in place for the next turn.
//! 5. Any remaining failure falls back to a stateless call rebuilt from the local turn
//!    log ([`TurnMode::Stateless`]), so a reply is always attempted.
//!
//! Quest context is prepended to the turn text rather than baked into the
//! instructions. The reply is normalised and clamped before it is recorded.
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

use super::conversation::{fingerprint, ConversationStore, ConversationThread};
use super::llm::{CompletionRequest, LlmError, LlmService};
use super::npc::{build_instructions, NpcPersona, NpcStore};
use super::profile::ProfileLookup;
use super::reply::{clamp_reply, normalize_punctuation};
use crate::config::ConversationConfig;
use crate::logutil::escape_log;
use crate::metrics;

/// User-facing reply when the model could not produce one.
pub const APOLOGY: &str = "Sorry, I glitched. Try again.";

#[derive(Debug, Clone, Default)]
pub struct TurnRequest {
    pub avatar_id: String,
    pub npc_id: String,
    pub message: String,
    /// Quest block placed ahead of the message; empty for none.
    pub quest_context: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnMode {
    Continued,
    Fresh,
    Recreated,
    Stateless,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub reply: String,
    pub ok: bool,
    pub error_code: Option<String>,
    /// Path that produced the reply; the last one attempted when the turn failed.
    pub mode: TurnMode,
    pub npc: NpcPersona,
}

pub struct TurnOrchestrator {
    llm: Arc<dyn LlmService>,
    conversations: ConversationStore,
    npcs: NpcStore,
    profiles: Arc<dyn ProfileLookup>,
    config: ConversationConfig,
}

impl TurnOrchestrator {
    pub fn new(
        llm: Arc<dyn LlmService>,
        conversations: ConversationStore,
        npcs: NpcStore,
        profiles: Arc<dyn ProfileLookup>,
        config: ConversationConfig,
    ) -> Self {
        Self {
            llm,
            conversations,
            npcs,
            profiles,
            config,
        }
    }

    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    pub fn npcs(&self) -> &NpcStore {
        &self.npcs
    }

    pub fn profiles(&self) -> &Arc<dyn ProfileLookup> {
        &self.profiles
    }

    pub fn config(&self) -> &ConversationConfig {
        &self.config
    }

    pub async fn run_turn(&self, req: &TurnRequest) -> TurnOutcome {
        metrics::inc_turns();
        let npc = self.npcs.get(&req.npc_id);
        let card = self.profiles.lookup(&req.avatar_id, false).await;
        let personalization = card.and_then(|c| c.personalization_block());
        let instructions =
            build_instructions(&npc, personalization.as_deref(), self.config.reply_max_bytes);
        let fp = fingerprint(&instructions);

        let mut thread = self.conversations.load(&req.avatar_id, &req.npc_id);
        let turn_text = compose_turn(&req.quest_context, &req.message);

        let started = Instant::now();
        let (mode, result) = self
            .complete_with_continuity(&mut thread, &instructions, &fp, &turn_text)
            .await;
        metrics::observe_llm_latency(started);

        let result = result.and_then(|text| {
            let normalized = normalize_punctuation(text.trim());
            if normalized.trim().is_empty() {
                Err(LlmError::EmptyCompletion)
            } else {
                Ok(clamp_reply(&normalized, self.config.reply_max_bytes))
            }
        });

        let outcome = match result {
            Ok(reply) => TurnOutcome {
                reply,
                ok: true,
                error_code: None,
                mode,
                npc,
            },
            Err(e) => {
                metrics::inc_turns_failed();
                warn!(
                    "Turn failed for avatar={} npc={} ({:?}): {}",
                    escape_log(&req.avatar_id),
                    escape_log(&req.npc_id),
                    mode,
                    e
                );
                TurnOutcome {
                    reply: APOLOGY.to_string(),
                    ok: false,
                    error_code: Some(e.code().to_string()),
                    mode,
                    npc,
                }
            }
        };

        thread.record_turn(
            &req.message,
            &outcome.reply,
            outcome.error_code.as_deref(),
            self.config.turn_log_limit,
        );
        if let Err(e) = self.conversations.save(&thread) {
            warn!(
                "Could not persist conversation avatar={} npc={}: {}",
                escape_log(&req.avatar_id),
                escape_log(&req.npc_id),
                e
            );
        }
        outcome
    }

    async fn complete_with_continuity(
        &self,
        thread: &mut ConversationThread,
        instructions: &str,
        fp: &str,
        turn_text: &str,
    ) -> (TurnMode, Result<String, LlmError>) {
        if let Some(handle) = thread.reusable_handle(fp).map(str::to_string) {
            match self
                .llm
                .complete(&CompletionRequest::continued(&handle, turn_text))
                .await
            {
                Ok(text) => return (TurnMode::Continued, Ok(text)),
                Err(e) if e.is_invalid_handle() => {
                    info!("Remote conversation {} rejected; recreating", handle);
                    thread.clear_handle();
                    metrics::inc_handle_recreations();
                    if let Some(text) = self.try_fresh(thread, instructions, fp, turn_text).await {
                        return (TurnMode::Recreated, Ok(text));
                    }
                }
                // the handle is still good; answer this turn without it
                Err(e) => {
                    warn!("Turn on conversation {} failed ({}); going stateless", handle, e);
                }
            }
        } else {
            if thread.remote_handle.is_some() {
                debug!(
                    "Instructions changed for avatar={} npc={}; dropping remote handle",
                    escape_log(&thread.avatar_id),
                    escape_log(&thread.npc_id)
                );
                thread.clear_handle();
            }
            if let Some(text) = self.try_fresh(thread, instructions, fp, turn_text).await {
                return (TurnMode::Fresh, Ok(text));
            }
        }

        metrics::inc_stateless_fallbacks();
        let history = thread.recent_messages(self.config.stateless_history);
        let request = CompletionRequest::stateless(instructions, history, turn_text);
        (TurnMode::Stateless, self.llm.complete(&request).await)
    }

    /// Open a conversation seeded with `instructions` and run the turn on it.
    /// The handle is kept on the thread only if the turn succeeds.
    async fn try_fresh(
        &self,
        thread: &mut ConversationThread,
        instructions: &str,
        fp: &str,
        turn_text: &str,
    ) -> Option<String> {
        let handle = match self.llm.create_conversation(instructions).await {
            Ok(h) => h,
            Err(e) => {
                warn!("Could not create remote conversation: {}", e);
                return None;
            }
        };
        match self
            .llm
            .complete(&CompletionRequest::continued(&handle, turn_text))
            .await
        {
            Ok(text) => {
                thread.set_handle(handle, fp);
                Some(text)
            }
            Err(e) => {
                warn!("Turn on new conversation {} failed: {}", handle, e);
                None
            }
        }
    }
}

/// Quest context goes ahead of the player's words so the model reads state first.
pub fn compose_turn(quest_context: &str, message: &str) -> String {
    if quest_context.trim().is_empty() {
        message.to_string()
    } else {
        format!("{}\n\nPLAYER_MESSAGE:\n{}", quest_context.trim_end(), message)
    }
}
