mod common;

use common::*;
use std::sync::Arc;
use trainingground_qengine::behaviours::{
    BehaviourFactory, BehaviourRegistry, InteractiveBehaviour, Outcome,
};
use trainingground_qengine::models::state::QuestionState;
use trainingground_qengine::questions::{InMemoryQuestionBank, QuestionBank};
use trainingground_qengine::services::usage_store::{
    abort_save, pending_changes, prepare_save, InMemoryUsageStore, UsageStore,
};
use trainingground_qengine::EngineError;

#[tokio::test]
async fn test_save_and_load_round_trip() {
    let store = InMemoryUsageStore::new();
    let bank = bank();
    let mut usage = new_usage("interactive");
    let slot = usage.add_question(bank.load_question("mc-hinted").await.unwrap(), Some(2.0));
    usage.start_all_questions(None, Some("student-1")).unwrap();
    usage
        .process_action(
            slot,
            vars(&[("answer", "1"), ("-submit", "1")]),
            None,
            Some("student-1"),
        )
        .unwrap();
    assert!(!usage.id().is_stored());

    store.save_usage(&mut usage).await.unwrap();
    assert!(usage.id().is_stored());
    let usage_id = usage.id().to_string();
    assert_eq!(store.step_count(&usage_id).await, 2);

    let loaded = store
        .load_usage(&usage_id, &bank, registry())
        .await
        .unwrap();
    let original = usage.attempt(slot).unwrap();
    let restored = loaded.attempt(slot).unwrap();

    assert_eq!(loaded.preferred_behaviour(), "interactive");
    assert_eq!(restored.behaviour_name(), Some("interactive"));
    assert_eq!(restored.num_steps(), original.num_steps());
    assert_eq!(restored.state(), QuestionState::Todo);
    assert_eq!(restored.last_behaviour_var("_triesleft"), Some("1"));
    assert_eq!(restored.max_mark(), 2.0);
    assert!(restored.steps().iter().all(|step| step.is_read_only()));
    assert_eq!(
        restored.steps()[0].timestamp(),
        original.steps()[0].timestamp()
    );
    assert!(pending_changes(&loaded).unwrap().is_empty());
}

#[tokio::test]
async fn test_saving_loaded_usage_writes_only_new_steps() {
    let store = InMemoryUsageStore::new();
    let bank = bank();
    let mut usage = new_usage("deferredfeedback");
    let slot = usage.add_question(bank.load_question("tf-sky").await.unwrap(), None);
    usage.start_all_questions(None, None).unwrap();
    store.save_usage(&mut usage).await.unwrap();
    let usage_id = usage.id().to_string();

    let mut loaded = store
        .load_usage(&usage_id, &bank, registry())
        .await
        .unwrap();
    loaded
        .process_action(slot, vars(&[("answer", "1")]), None, None)
        .unwrap();
    let changes = pending_changes(&loaded).unwrap();
    assert!(changes.steps_added.contains(&(slot, 1)));
    assert!(changes.attempts_modified.contains(&slot));

    store.save_usage(&mut loaded).await.unwrap();
    assert_eq!(store.step_count(&usage_id).await, 2);
    assert!(pending_changes(&loaded).unwrap().is_empty());

    // Nothing changed, nothing written.
    store.save_usage(&mut loaded).await.unwrap();
    assert_eq!(store.step_count(&usage_id).await, 2);

    loaded.finish_all_questions(None, None).unwrap();
    store.save_usage(&mut loaded).await.unwrap();

    let reloaded = store
        .load_usage(&usage_id, &bank, registry())
        .await
        .unwrap();
    assert_eq!(reloaded.state(slot).unwrap(), QuestionState::GradedCorrect);
    assert_eq!(store.step_count(&usage_id).await, 3);
}

#[tokio::test]
async fn test_regrade_replaces_stored_steps() {
    let store = InMemoryUsageStore::new();
    let bank = bank();
    let mut usage = new_usage("deferredfeedback");
    let slot = usage.add_question(bank.load_question("essay-1").await.unwrap(), None);
    usage.start_all_questions(None, None).unwrap();
    usage
        .process_action(slot, vars(&[("answer", "An answer")]), None, None)
        .unwrap();
    usage.finish_all_questions(None, None).unwrap();
    usage
        .manual_grade(slot, "fine", Some(0.5), None, Some("grader"))
        .unwrap();
    store.save_usage(&mut usage).await.unwrap();
    let usage_id = usage.id().to_string();
    assert_eq!(store.step_count(&usage_id).await, 4);

    let mut loaded = store
        .load_usage(&usage_id, &bank, registry())
        .await
        .unwrap();
    loaded.regrade_all_questions().unwrap();
    let changes = pending_changes(&loaded).unwrap();
    assert!(changes.steps_deleted.contains(&slot));
    assert_eq!(changes.steps_added.len(), 4);

    store.save_usage(&mut loaded).await.unwrap();
    assert_eq!(store.step_count(&usage_id).await, 4);

    let reloaded = store
        .load_usage(&usage_id, &bank, registry())
        .await
        .unwrap();
    assert_eq!(
        reloaded.state(slot).unwrap(),
        QuestionState::ManualGradedPartial
    );
    assert_close(reloaded.mark(slot).unwrap(), 0.5);
}

#[tokio::test]
async fn test_set_max_mark_without_loading() {
    let store = InMemoryUsageStore::new();
    let bank = bank();
    let mut usage = new_usage("deferredfeedback");
    let slot = usage.add_question(bank.load_question("tf-sky").await.unwrap(), Some(1.0));
    usage.start_all_questions(None, None).unwrap();
    usage
        .process_action(slot, vars(&[("answer", "1")]), None, None)
        .unwrap();
    usage.finish_all_questions(None, None).unwrap();
    store.save_usage(&mut usage).await.unwrap();
    let usage_id = usage.id().to_string();

    let changed = store
        .set_max_mark_in_attempts(&[usage_id.clone()], slot, 5.0)
        .await
        .unwrap();
    assert_eq!(changed, 1);

    let loaded = store
        .load_usage(&usage_id, &bank, registry())
        .await
        .unwrap();
    assert_close(loaded.mark(slot).unwrap(), 5.0);
}

#[tokio::test]
async fn test_unknown_behaviour_loads_as_missing() {
    let store = InMemoryUsageStore::new();
    let bank = bank();
    let mut usage = new_usage("deferredfeedback");
    let slot = usage.add_question(bank.load_question("tf-sky").await.unwrap(), None);
    usage.start_all_questions(None, None).unwrap();
    usage
        .process_action(slot, vars(&[("answer", "0")]), None, None)
        .unwrap();
    store.save_usage(&mut usage).await.unwrap();
    let usage_id = usage.id().to_string();

    // A registry without the behaviour the attempt was stored with.
    let mut sparse = BehaviourRegistry::new();
    let factory: BehaviourFactory = |_| Arc::new(InteractiveBehaviour);
    sparse.register("interactive", factory).unwrap();

    let mut loaded = store
        .load_usage(&usage_id, &bank, Arc::new(sparse))
        .await
        .unwrap();
    let attempt = loaded.attempt(slot).unwrap();
    assert_eq!(attempt.behaviour_name(), Some("deferredfeedback"));
    assert_eq!(attempt.state(), QuestionState::Complete);
    assert_eq!(
        loaded.finish_question(slot, None, None).unwrap(),
        Outcome::Discard
    );
}

#[tokio::test]
async fn test_regrade_refuses_unavailable_behaviour() {
    let store = InMemoryUsageStore::new();
    let bank = bank();
    let mut usage = new_usage("deferredfeedback");
    let slot = usage.add_question(bank.load_question("tf-sky").await.unwrap(), None);
    usage.start_all_questions(None, None).unwrap();
    usage
        .process_action(slot, vars(&[("answer", "1")]), None, None)
        .unwrap();
    usage.finish_all_questions(None, None).unwrap();
    store.save_usage(&mut usage).await.unwrap();
    let usage_id = usage.id().to_string();
    assert_eq!(store.step_count(&usage_id).await, 3);

    let mut sparse = BehaviourRegistry::new();
    let factory: BehaviourFactory = |_| Arc::new(InteractiveBehaviour);
    sparse.register("interactive", factory).unwrap();
    let mut loaded = store
        .load_usage(&usage_id, &bank, Arc::new(sparse))
        .await
        .unwrap();

    assert_eq!(
        loaded.regrade_all_questions(),
        Err(EngineError::CannotRegrade("deferredfeedback".to_string()))
    );
    assert!(matches!(
        loaded.regrade_question(slot, None),
        Err(EngineError::CannotRegrade(_))
    ));
    assert_eq!(loaded.attempt(slot).unwrap().num_steps(), 3);
    assert!(pending_changes(&loaded).unwrap().is_empty());

    store.save_usage(&mut loaded).await.unwrap();
    assert_eq!(store.step_count(&usage_id).await, 3);
    let reloaded = store
        .load_usage(&usage_id, &bank, registry())
        .await
        .unwrap();
    assert_eq!(reloaded.state(slot).unwrap(), QuestionState::GradedCorrect);
}

#[tokio::test]
async fn test_aborted_save_leaves_usage_retryable() {
    let store = InMemoryUsageStore::new();
    let bank = bank();
    let mut usage = new_usage("deferredfeedback");
    let slot = usage.add_question(bank.load_question("tf-sky").await.unwrap(), None);
    usage.start_all_questions(None, None).unwrap();

    let write = prepare_save(&mut usage).unwrap();
    assert!(usage.id().is_stored());
    abort_save(&mut usage, write);
    assert!(!usage.id().is_stored());
    let attempt = usage.attempt(slot).unwrap();
    assert_eq!(attempt.id(), None);
    assert!(attempt.steps().iter().all(|step| step.id().is_none()));

    store.save_usage(&mut usage).await.unwrap();
    let usage_id = usage.id().to_string();
    assert_eq!(store.step_count(&usage_id).await, 1);

    usage
        .process_action(slot, vars(&[("answer", "1")]), None, None)
        .unwrap();
    let pending = pending_changes(&usage).unwrap();
    let write = prepare_save(&mut usage).unwrap();
    assert!(pending_changes(&usage).unwrap().is_empty());
    abort_save(&mut usage, write);
    assert_eq!(pending_changes(&usage).unwrap(), pending);
    assert_eq!(usage.id().to_string(), usage_id);
    assert_eq!(usage.attempt(slot).unwrap().steps()[1].id(), None);

    store.save_usage(&mut usage).await.unwrap();
    assert_eq!(store.step_count(&usage_id).await, 2);
    let loaded = store
        .load_usage(&usage_id, &bank, registry())
        .await
        .unwrap();
    assert_eq!(loaded.state(slot).unwrap(), QuestionState::Complete);
}

#[tokio::test]
async fn test_delete_usage() {
    let store = InMemoryUsageStore::new();
    let bank = bank();
    let mut usage = new_usage("deferredfeedback");
    usage.add_question(bank.load_question("desc-1").await.unwrap(), None);
    usage.start_all_questions(None, None).unwrap();
    store.save_usage(&mut usage).await.unwrap();
    let usage_id = usage.id().to_string();

    store.delete_usage(&usage_id).await.unwrap();
    assert_eq!(store.step_count(&usage_id).await, 0);
    assert!(store.load_usage(&usage_id, &bank, registry()).await.is_err());
}

#[tokio::test]
async fn test_missing_question_fails_load() {
    let store = InMemoryUsageStore::new();
    let mut usage = new_usage("deferredfeedback");
    usage.add_question(Arc::new(single_choice()), None);
    usage.start_all_questions(None, None).unwrap();
    store.save_usage(&mut usage).await.unwrap();

    let empty = InMemoryQuestionBank::new();
    let err = store
        .load_usage(&usage.id().to_string(), &empty, registry())
        .await
        .unwrap_err();
    assert!(format!("{:#}", err).contains("Question mc-capital not found"));
}
