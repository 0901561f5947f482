mod common;

use common::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use trainingground_qengine::engine::flag_checksum;
use trainingground_qengine::models::state::QuestionState;
use trainingground_qengine::models::submission::SubmittedBatch;
use trainingground_qengine::questions::MultiChoiceQuestion;
use trainingground_qengine::EngineError;

#[test]
fn test_total_mark_poisoned_by_needs_grading() {
    let mut usage = new_usage("deferredfeedback");
    let choice = usage.add_question(Arc::new(single_choice()), Some(1.0));
    let essay_slot = usage.add_question(Arc::new(essay()), Some(1.0));
    usage.start_all_questions(None, None).unwrap();

    usage
        .process_action(choice, vars(&[("answer", "0")]), None, None)
        .unwrap();
    usage
        .process_action(essay_slot, vars(&[("answer", "Some text")]), None, None)
        .unwrap();
    usage.finish_all_questions(None, None).unwrap();

    assert_eq!(usage.state(choice).unwrap(), QuestionState::GradedCorrect);
    assert_eq!(usage.state(essay_slot).unwrap(), QuestionState::NeedsGrading);
    assert_eq!(usage.total_mark(), None);

    usage
        .manual_grade(essay_slot, "ok", Some(0.5), None, None)
        .unwrap();
    assert_close(usage.total_mark(), 1.5);
}

#[test]
fn test_sequence_check_guards_stale_pages() {
    let mut usage = new_usage("deferredfeedback");
    let slot = usage.add_question(Arc::new(true_false()), None);
    usage.start_all_questions(None, None).unwrap();
    let rendered_with = usage.attempt(slot).unwrap().num_steps();

    usage
        .process_action(slot, vars(&[("answer", "0")]), None, None)
        .unwrap();

    let stale = SubmittedBatch::new()
        .with_response(slot, vars(&[("answer", "1")]))
        .with_sequence_check(slot, rendered_with);
    let err = usage.process_all_actions(&stale, None, None).unwrap_err();
    assert!(err.is_recoverable());
    assert!(matches!(err, EngineError::OutOfSequence { .. }));
    assert_eq!(usage.attempt(slot).unwrap().num_steps(), 2);

    let fresh = SubmittedBatch::new()
        .with_response(slot, vars(&[("answer", "1")]))
        .with_sequence_check(slot, rendered_with + 1);
    usage.process_all_actions(&fresh, None, None).unwrap();
    assert_eq!(usage.attempt(slot).unwrap().num_steps(), 3);
}

#[test]
fn test_batch_is_validated_before_any_slot_changes() {
    let mut usage = new_usage("deferredfeedback");
    let first = usage.add_question(Arc::new(true_false()), None);
    let second = usage.add_question(Arc::new(true_false()), None);
    usage.start_all_questions(None, None).unwrap();

    let batch = SubmittedBatch::new()
        .with_response(first, vars(&[("answer", "1")]))
        .with_response(second, vars(&[("answer", "1")]))
        .with_sequence_check(second, 7);
    assert!(usage.process_all_actions(&batch, None, None).is_err());
    assert_eq!(usage.attempt(first).unwrap().num_steps(), 1);

    let unknown = SubmittedBatch::new().with_slots(vec![first, 99]);
    assert!(matches!(
        usage.process_all_actions(&unknown, None, None),
        Err(EngineError::UnknownSlot(99))
    ));
}

#[test]
fn test_batch_rejects_unstarted_slot_before_processing() {
    let mut usage = new_usage("deferredfeedback");
    let started = usage.add_question(Arc::new(true_false()), None);
    let unstarted = usage.add_question(Arc::new(true_false()), None);
    usage.start_question(started, None, None).unwrap();

    let batch = SubmittedBatch::new().with_response(started, vars(&[("answer", "1")]));
    assert!(matches!(
        usage.process_all_actions(&batch, None, None),
        Err(EngineError::NotStarted)
    ));
    assert_eq!(usage.attempt(started).unwrap().num_steps(), 1);
    assert_eq!(usage.attempt(unstarted).unwrap().num_steps(), 0);

    let listed = SubmittedBatch::new()
        .with_slots(vec![started])
        .with_response(started, vars(&[("answer", "1")]));
    usage.process_all_actions(&listed, None, None).unwrap();
    assert_eq!(usage.attempt(started).unwrap().num_steps(), 2);
}

#[test]
fn test_flags_applied_after_scoring() {
    let mut usage = new_usage("deferredfeedback");
    let first = usage.add_question(Arc::new(true_false()), None);
    let second = usage.add_question(Arc::new(true_false()), None);
    usage.start_all_questions(None, None).unwrap();

    let batch = SubmittedBatch::new()
        .with_slots(vec![first])
        .with_response(first, vars(&[("answer", "1")]))
        .with_flag(second, true);
    usage.process_all_actions(&batch, None, None).unwrap();

    assert_eq!(usage.state(first).unwrap(), QuestionState::Complete);
    assert_eq!(usage.attempt(second).unwrap().num_steps(), 1);
    assert!(usage.attempt(second).unwrap().is_flagged());
}

#[test]
fn test_batch_from_post_data() {
    let mut usage = new_usage("interactive");
    let slot = usage.add_question(Arc::new(single_choice_with_hint()), None);
    usage.start_all_questions(None, None).unwrap();
    let prefix = usage.attempt(slot).unwrap().field_prefix();

    let post: BTreeMap<String, String> = [
        (format!("{}answer", prefix), "0".to_string()),
        (format!("{}-submit", prefix), "1".to_string()),
        (format!("{}:sequencecheck", prefix), "1".to_string()),
        (format!("{}:flagged", prefix), "1".to_string()),
        ("unrelated".to_string(), "x".to_string()),
    ]
    .into_iter()
    .collect();

    let batch = SubmittedBatch::from_post_data(&usage, &post).unwrap();
    assert_eq!(batch.slots, Some(vec![slot]));
    let response = &batch.responses[&slot];
    assert_eq!(response.data, vars(&[("answer", "0"), ("-submit", "1")]));
    assert_eq!(response.sequence_check, Some(1));
    assert_eq!(response.flagged, Some(true));

    usage.process_all_actions(&batch, None, None).unwrap();
    assert_eq!(usage.state(slot).unwrap(), QuestionState::GradedCorrect);
    assert!(usage.attempt(slot).unwrap().is_flagged());
}

#[test]
fn test_post_data_rejects_malformed_values() {
    let mut usage = new_usage("deferredfeedback");
    let slot = usage.add_question(Arc::new(single_choice()), None);
    usage.start_all_questions(None, None).unwrap();
    let prefix = usage.attempt(slot).unwrap().field_prefix();

    let post: BTreeMap<String, String> =
        [(format!("{}answer", prefix), "first".to_string())].into_iter().collect();
    assert!(matches!(
        SubmittedBatch::from_post_data(&usage, &post),
        Err(EngineError::InvalidParam { .. })
    ));
}

#[test]
fn test_regrade_replays_history() {
    let mut usage = new_usage("deferredfeedback");
    let question = MultiChoiceQuestion::new(
        "mc-shuffled",
        "Pick",
        single_choice().answers.clone(),
    )
    .with_shuffle(true);
    let slot = usage.add_question(Arc::new(question), Some(1.0));
    usage.start_all_questions(None, Some("student")).unwrap();
    usage
        .process_action(slot, vars(&[("answer", "0")]), None, Some("student"))
        .unwrap();
    usage.set_flagged(slot, true).unwrap();
    usage.finish_question(slot, None, Some("student")).unwrap();

    let before = usage.attempt(slot).unwrap();
    let order = before.last_qt_var("_order").map(str::to_string);
    let timestamps: Vec<_> = before.steps().iter().map(|s| s.timestamp()).collect();
    let states: Vec<_> = before.steps().iter().map(|s| s.state()).collect();

    usage.regrade_question(slot, None).unwrap();
    let after = usage.attempt(slot).unwrap();
    assert_eq!(after.last_qt_var("_order").map(str::to_string), order);
    assert_eq!(
        after.steps().iter().map(|s| s.timestamp()).collect::<Vec<_>>(),
        timestamps
    );
    assert_eq!(
        after.steps().iter().map(|s| s.state()).collect::<Vec<_>>(),
        states
    );
    assert!(after.is_flagged());

    usage.regrade_question(slot, Some(4.0)).unwrap();
    assert_close(usage.mark(slot).unwrap(), 4.0);
    assert_eq!(usage.max_mark(slot).unwrap(), 4.0);
}

#[test]
fn test_unknown_slot_everywhere() {
    let mut usage = new_usage("deferredfeedback");
    usage.add_question(Arc::new(true_false()), None);

    assert!(matches!(usage.attempt(5), Err(EngineError::UnknownSlot(5))));
    assert!(matches!(
        usage.start_question(5, None, None),
        Err(EngineError::UnknownSlot(5))
    ));
    assert!(matches!(
        usage.regrade_question(5, None),
        Err(EngineError::UnknownSlot(5))
    ));
    assert!(matches!(
        usage.correct_response(5),
        Err(EngineError::UnknownSlot(5))
    ));
}

#[test]
fn test_flag_checksum_guards_flag_changes() {
    let mut usage = new_usage("deferredfeedback");
    let slot = usage.add_question(Arc::new(true_false()), None);
    usage.start_all_questions(None, None).unwrap();
    let usage_id = usage.id().to_string();

    let good = flag_checksum("secret", &usage_id, slot, "student-3");
    let forged = flag_checksum("secret", &usage_id, slot, "student-4");

    assert!(!usage
        .set_flag_checked(slot, true, "secret", "student-3", &forged)
        .unwrap());
    assert!(!usage.attempt(slot).unwrap().is_flagged());
    assert!(usage
        .set_flag_checked(slot, true, "secret", "student-3", &good)
        .unwrap());
    assert!(usage.attempt(slot).unwrap().is_flagged());
}

#[test]
fn test_preferred_behaviour_must_be_archetypal() {
    let mut usage = new_usage("deferredfeedback");
    assert!(matches!(
        usage.set_preferred_behaviour("manualgraded"),
        Err(EngineError::NotArchetypal(_))
    ));
    assert!(matches!(
        usage.set_preferred_behaviour("nosuchthing"),
        Err(EngineError::UnknownBehaviour(_))
    ));
    usage.set_preferred_behaviour("interactive").unwrap();
    assert_eq!(usage.preferred_behaviour(), "interactive");
}
