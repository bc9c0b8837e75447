/// Integration tests for the quest engine and object pool.
///
/// Walks the full `none -> active -> completed -> none` lifecycle through the
/// public API, including difficulty auto-scaling and the one-shot reward.
use chrono::{Duration, Utc};
use slquest::config::QuestConfig;
use slquest::quest::{ActiveFilter, ObjectPool, ObjectRegistration, QuestEngine, QuestError};
use slquest::storage::JsonStore;
use std::sync::Arc;
use tempfile::TempDir;

fn setup_engine(count: usize, difficulty: u32) -> (QuestEngine, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let store = JsonStore::new(temp_dir.path()).unwrap();
    let pool = Arc::new(ObjectPool::open(store.clone(), 600));
    for i in 0..count {
        pool.register(
            ObjectRegistration::new(format!("obj-{}", i))
                .with_name(format!("Lantern {}", i))
                .with_hint("by the docks")
                .with_difficulty(difficulty),
        )
        .unwrap();
    }
    (QuestEngine::new(pool, store, QuestConfig::default()), temp_dir)
}

#[test]
fn first_quest_has_one_objective_and_blocks_regeneration() {
    let (engine, _temp) = setup_engine(5, 1);

    let quest = engine.generate("avatar-a", None, None).unwrap();
    assert_eq!(quest.total_count(), 1, "auto-scale is min(0 + 1, 3)");

    match engine.generate("avatar-a", None, None) {
        Err(QuestError::AlreadyActive { quest_id }) => assert_eq!(quest_id, quest.quest_id),
        other => panic!("expected AlreadyActive, got {:?}", other),
    }
    let state = engine.player_state("avatar-a");
    assert_eq!(state.current_quest.unwrap().quest_id, quest.quest_id);
}

#[test]
fn sole_objective_found_completes_and_rewards_once() {
    let (engine, _temp) = setup_engine(3, 1);
    let quest = engine.generate("avatar-b", None, None).unwrap();
    let target = quest.objectives[0].object_id.clone();

    let outcome = engine.handle_event("avatar-b", &target, "object_found").unwrap();
    assert!(outcome.matched);
    assert!(outcome.quest_completed);
    assert_eq!((outcome.found_count, outcome.total_count), (1, 1));

    // completed but unrewarded still blocks generation
    assert!(matches!(
        engine.generate("avatar-b", None, None),
        Err(QuestError::AlreadyActive { .. })
    ));

    let first = engine.post_turn("avatar-b", "", "Well done!");
    assert_eq!(first.actions, vec!["Give:QUEST_REWARD".to_string()]);
    assert!(first.forced_reply.is_none());

    let second = engine.post_turn("avatar-b", "", "Well done!");
    assert!(second.actions.is_empty(), "reward must fire exactly once");

    let state = engine.player_state("avatar-b");
    assert!(state.current_quest.is_none());
    assert_eq!(state.history.quests_completed, 1);
    let archived = state.history.last_quest.unwrap();
    assert!(archived.reward_given);
    assert!(archived.reward_given_at.is_some());
    assert!(state.history.recent_object_ids.contains(&target));
}

#[test]
fn explicit_count_is_not_capped_by_auto_scaling() {
    let (engine, _temp) = setup_engine(5, 1);
    let quest = engine.generate("avatar-x", None, Some(5)).unwrap();
    assert_eq!(quest.total_count(), 5);

    // more than the pool holds yields every active object
    let (engine, _temp) = setup_engine(4, 1);
    let quest = engine.generate("avatar-y", None, Some(9)).unwrap();
    assert_eq!(quest.total_count(), 4);
}

#[test]
fn repeat_find_is_idempotent() {
    let (engine, _temp) = setup_engine(6, 1);
    let quest = engine.generate("avatar-c", None, Some(2)).unwrap();
    let target = quest.objectives[0].object_id.clone();

    let first = engine.record_found("avatar-c", &target).unwrap();
    assert!(first.matched);
    assert_eq!(first.found_count, 1);
    let found_at = engine.player_state("avatar-c").current_quest.unwrap().objectives[0].found_at;

    let again = engine.record_found("avatar-c", &target).unwrap();
    assert!(!again.matched);
    assert_eq!(again.found_count, 1);
    assert!(!again.quest_completed);
    let after = engine.player_state("avatar-c").current_quest.unwrap().objectives[0].found_at;
    assert_eq!(found_at, after);
}

#[test]
fn unknown_object_and_no_quest_are_not_errors_for_events() {
    let (engine, _temp) = setup_engine(2, 1);

    let none = engine.handle_event("avatar-d", "obj-0", "object_found").unwrap();
    assert!(!none.matched);
    assert_eq!(none.reason.as_deref(), Some("no_active_quest"));

    engine.generate("avatar-d", None, None).unwrap();
    let miss = engine.handle_event("avatar-d", "not-in-quest", "cube_clicked").unwrap();
    assert!(!miss.matched);
    assert_eq!(miss.total_count, 1);

    let ignored = engine.handle_event("avatar-d", "obj-0", "touched").unwrap();
    assert_eq!(ignored.reason.as_deref(), Some("unknown_event"));
}

#[test]
fn second_quest_scales_up_and_avoids_recent_objects() {
    let (engine, _temp) = setup_engine(6, 1);
    let first = engine.generate("avatar-e", None, None).unwrap();
    let first_obj = first.objectives[0].object_id.clone();
    engine.record_found("avatar-e", &first_obj).unwrap();
    engine.grant_reward("avatar-e").unwrap().unwrap();

    let second = engine.generate("avatar-e", None, None).unwrap();
    assert_eq!(second.total_count(), 2);
    assert!(second.objectives.iter().all(|o| o.object_id != first_obj));
}

#[test]
fn stale_objects_are_excluded_until_reregistered() {
    let temp_dir = TempDir::new().unwrap();
    let store = JsonStore::new(temp_dir.path()).unwrap();
    let pool = ObjectPool::open(store, 600);
    let long_ago = Utc::now() - Duration::seconds(3600);
    pool.register_at(ObjectRegistration::new("old-crate"), long_ago)
        .unwrap();

    assert!(pool.active(&ActiveFilter::default()).is_empty());
    let status = pool.status();
    assert_eq!(status.total_objects, 1);
    assert_eq!(status.active_objects, 0);

    pool.register(ObjectRegistration::new("old-crate")).unwrap();
    assert_eq!(pool.active(&ActiveFilter::default()).len(), 1);
}

#[test]
fn pre_turn_generates_on_intent_and_renders_context() {
    let (engine, _temp) = setup_engine(3, 1);

    let idle = engine.pre_turn("avatar-f", "Guide", "nice weather");
    assert!(idle.generated.is_none());
    assert!(idle.quest_context.contains("status=none"));

    let eager = engine.pre_turn("avatar-f", "Guide", "I'm bored, got a quest?");
    let quest_id = eager.generated.expect("intent should generate a quest");
    assert!(eager.quest_context.contains(&format!("quest_id={}", quest_id)));
    assert!(eager.quest_context.contains("REMAINING_OBJECTIVES:"));
    assert_eq!(engine.status_line("avatar-f"), "active:0/1");
}
