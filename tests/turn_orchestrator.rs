//! Conversation continuity: handle reuse, recreation, stateless fallback and
//! instruction-fingerprint rotation, driven by a scripted model.
mod common;

use common::ScriptedLlm;
use slquest::chat::conversation::fingerprint;
use slquest::chat::llm::LlmError;
use slquest::chat::{
    ConversationStore, NoProfile, NpcPersona, NpcStore, TurnMode, TurnOrchestrator, TurnRequest,
    APOLOGY,
};
use slquest::config::ConversationConfig;
use slquest::storage::JsonStore;
use std::sync::Arc;
use tempfile::TempDir;

fn setup(llm: Arc<ScriptedLlm>) -> (TurnOrchestrator, TempDir) {
    let dir = TempDir::new().unwrap();
    let store = JsonStore::new(dir.path()).unwrap();
    let orch = TurnOrchestrator::new(
        llm,
        ConversationStore::new(store.clone()),
        NpcStore::new(store),
        Arc::new(NoProfile),
        ConversationConfig::default(),
    );
    (orch, dir)
}

fn turn(message: &str) -> TurnRequest {
    TurnRequest {
        avatar_id: "avatar-1".into(),
        npc_id: "Guide".into(),
        message: message.into(),
        quest_context: String::new(),
    }
}

#[tokio::test]
async fn first_turn_opens_conversation_and_second_reuses_it() {
    let llm = Arc::new(ScriptedLlm::new());
    let (orch, _dir) = setup(llm.clone());

    let first = orch.run_turn(&turn("hello")).await;
    assert!(first.ok);
    assert_eq!(first.mode, TurnMode::Fresh);

    let second = orch.run_turn(&turn("again")).await;
    assert!(second.ok);
    assert_eq!(second.mode, TurnMode::Continued);
    assert_eq!(llm.create_count(), 1);

    let completions = llm.completions();
    assert_eq!(completions.len(), 2);
    assert_eq!(completions[0].conversation.as_deref(), Some("conv_auto_0"));
    assert_eq!(completions[1].conversation.as_deref(), Some("conv_auto_0"));
    // continued turns never resend the instructions
    assert!(completions[1].instructions.is_none());
    assert_eq!(completions[1].turn, "again");

    let thread = orch.conversations().load("avatar-1", "Guide");
    assert_eq!(thread.remote_handle.as_deref(), Some("conv_auto_0"));
    assert_eq!(thread.turn_log.len(), 4);
}

#[tokio::test]
async fn stale_handle_is_recreated_once() {
    let llm = Arc::new(ScriptedLlm::new());
    let (orch, _dir) = setup(llm.clone());
    orch.run_turn(&turn("hello")).await;

    llm.push_complete(Err(LlmError::ConversationNotFound));
    let outcome = orch.run_turn(&turn("still there?")).await;
    assert!(outcome.ok);
    assert_eq!(outcome.mode, TurnMode::Recreated);
    assert_eq!(llm.create_count(), 2);

    let thread = orch.conversations().load("avatar-1", "Guide");
    assert_eq!(thread.remote_handle.as_deref(), Some("conv_auto_1"));
}

#[tokio::test]
async fn transient_failure_keeps_the_handle_and_answers_statelessly() {
    let llm = Arc::new(ScriptedLlm::new());
    let (orch, _dir) = setup(llm.clone());
    orch.run_turn(&turn("hello")).await;

    llm.push_complete(Err(LlmError::Timeout(std::time::Duration::from_secs(30))));
    llm.push_complete(Ok("Sorry, I drifted off.".into()));
    let outcome = orch.run_turn(&turn("you there?")).await;
    assert!(outcome.ok);
    assert_eq!(outcome.mode, TurnMode::Stateless);
    assert_eq!(llm.create_count(), 1);

    let thread = orch.conversations().load("avatar-1", "Guide");
    assert_eq!(thread.remote_handle.as_deref(), Some("conv_auto_0"));

    // the next turn goes back to the same remote conversation
    let next = orch.run_turn(&turn("ok good")).await;
    assert_eq!(next.mode, TurnMode::Continued);
    assert_eq!(
        llm.completions().pop().unwrap().conversation.as_deref(),
        Some("conv_auto_0")
    );
}

#[tokio::test]
async fn recreate_failure_falls_back_to_stateless_with_history() {
    let llm = Arc::new(ScriptedLlm::new());
    let (orch, _dir) = setup(llm.clone());
    orch.run_turn(&turn("hello")).await;

    llm.push_complete(Err(LlmError::Http {
        status: 404,
        body: "conversation not found".into(),
    }));
    llm.push_create(Err(LlmError::Timeout(std::time::Duration::from_secs(10))));
    llm.push_complete(Ok("Stateless answer.".into()));

    let outcome = orch.run_turn(&turn("what now?")).await;
    assert!(outcome.ok);
    assert_eq!(outcome.mode, TurnMode::Stateless);
    assert_eq!(outcome.reply, "Stateless answer.");

    let last = llm.completions().pop().unwrap();
    assert!(last.conversation.is_none());
    assert!(last.instructions.is_some());
    // the earlier exchange is replayed from the local turn log
    assert_eq!(last.history.len(), 2);
    assert_eq!(last.history[0].content, "hello");

    let thread = orch.conversations().load("avatar-1", "Guide");
    assert!(thread.remote_handle.is_none());
}

#[tokio::test]
async fn total_failure_returns_apology_and_records_error() {
    let llm = Arc::new(ScriptedLlm::new());
    let (orch, _dir) = setup(llm.clone());

    llm.push_create(Err(LlmError::Transport("connection refused".into())));
    llm.push_complete(Err(LlmError::Timeout(std::time::Duration::from_secs(30))));

    let outcome = orch.run_turn(&turn("hello")).await;
    assert!(!outcome.ok);
    assert_eq!(outcome.reply, APOLOGY);
    assert_eq!(outcome.error_code.as_deref(), Some("llm_timeout"));
    assert_eq!(outcome.mode, TurnMode::Stateless);

    let thread = orch.conversations().load("avatar-1", "Guide");
    let last = thread.turn_log.last().unwrap();
    assert_eq!(last.error.as_deref(), Some("llm_timeout"));
}

#[tokio::test]
async fn empty_completion_is_a_failure() {
    let llm = Arc::new(ScriptedLlm::new());
    let (orch, _dir) = setup(llm.clone());
    llm.push_complete(Ok("   ".into()));
    // fresh attempt returns blank text, which is still a successful call
    let outcome = orch.run_turn(&turn("hello")).await;
    assert!(!outcome.ok);
    assert_eq!(outcome.error_code.as_deref(), Some("empty_reply"));
}

#[tokio::test]
async fn persona_change_rotates_the_conversation() {
    let llm = Arc::new(ScriptedLlm::new());
    let (orch, _dir) = setup(llm.clone());

    orch.run_turn(&turn("hello")).await;
    let before = orch.conversations().load("avatar-1", "Guide");

    orch.npcs()
        .upsert(NpcPersona {
            npc_id: "Guide".into(),
            display_name: "Mira".into(),
            persona: "A cheerful lighthouse keeper.".into(),
            ..Default::default()
        })
        .unwrap();

    let outcome = orch.run_turn(&turn("who are you?")).await;
    assert_eq!(outcome.mode, TurnMode::Fresh);
    assert_eq!(llm.create_count(), 2);

    let after = orch.conversations().load("avatar-1", "Guide");
    assert_ne!(before.instructions_fingerprint, after.instructions_fingerprint);
    assert_eq!(after.remote_handle.as_deref(), Some("conv_auto_1"));

    let seeded = llm
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            common::Call::Create { instructions } => Some(instructions),
            _ => None,
        })
        .last()
        .unwrap();
    assert!(seeded.contains("lighthouse keeper"));
    assert_eq!(
        after.instructions_fingerprint.as_deref(),
        Some(fingerprint(&seeded).as_str())
    );
}

#[tokio::test]
async fn quest_context_does_not_rotate_the_conversation() {
    let llm = Arc::new(ScriptedLlm::new());
    let (orch, _dir) = setup(llm.clone());

    let mut req = turn("hello");
    req.quest_context = "QUEST_STATUS:\nstatus=none".into();
    orch.run_turn(&req).await;

    req.quest_context = "QUEST_STATUS:\nstatus=active\nfound=1/2".into();
    req.message = "found one".into();
    let outcome = orch.run_turn(&req).await;
    assert_eq!(outcome.mode, TurnMode::Continued);
    assert_eq!(llm.create_count(), 1);

    let last = llm.completions().pop().unwrap();
    assert!(last.turn.starts_with("QUEST_STATUS:"));
    assert!(last.turn.ends_with("PLAYER_MESSAGE:\nfound one"));
}

#[tokio::test]
async fn long_replies_are_clamped_and_normalised() {
    let llm = Arc::new(ScriptedLlm::new());
    let (orch, _dir) = setup(llm.clone());
    let long = format!("It\u{2019}s fine. {}", "word ".repeat(400));
    llm.push_complete(Ok(long));

    let outcome = orch.run_turn(&turn("talk a lot")).await;
    assert!(outcome.ok);
    assert!(outcome.reply.len() <= orch.config().reply_max_bytes);
    assert!(outcome.reply.starts_with("It's fine."));
}
