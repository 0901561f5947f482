mod common;

use common::*;
use std::sync::Arc;
use trainingground_qengine::models::state::QuestionState;
use trainingground_qengine::models::step::VarMap;
use trainingground_qengine::Attempt;

/// State, fraction and every stored variable of each step.
fn history(attempt: &Attempt) -> Vec<(QuestionState, Option<f64>, VarMap)> {
    attempt
        .steps()
        .iter()
        .map(|step| (step.state(), step.fraction(), step.all_vars().clone()))
        .collect()
}

#[test]
fn test_regrade_interactive_keeps_tries_and_penalty() {
    let mut usage = new_usage("interactive");
    let slot = usage.add_question(Arc::new(single_choice_with_hint()), Some(2.0));
    usage.start_all_questions(None, None).unwrap();
    usage
        .process_action(slot, vars(&[("answer", "1"), ("-submit", "1")]), None, None)
        .unwrap();
    usage
        .process_action(slot, vars(&[("-tryagain", "1")]), None, None)
        .unwrap();
    usage
        .process_action(slot, vars(&[("answer", "0"), ("-submit", "1")]), None, None)
        .unwrap();
    let before = history(usage.attempt(slot).unwrap());
    assert_eq!(before.len(), 4);

    usage.regrade_question(slot, None).unwrap();

    let after = usage.attempt(slot).unwrap();
    assert_eq!(history(after), before);
    assert_eq!(after.last_behaviour_var("_triesleft"), Some("0"));
    assert_eq!(after.last_behaviour_var("_rawfraction"), Some("1"));
    assert_close(after.mark(), (1.0 - 0.3333333) * 2.0);
}

#[test]
fn test_regrade_cbm_keeps_certainty_bookkeeping() {
    let mut usage = new_usage("immediatecbm");
    let sure = usage.add_question(Arc::new(true_false()), None);
    let unsure = usage.add_question(Arc::new(true_false()), None);
    usage.start_all_questions(None, None).unwrap();
    usage
        .process_action(
            sure,
            vars(&[("answer", "0"), ("-submit", "1"), ("-certainty", "2")]),
            None,
            None,
        )
        .unwrap();
    usage
        .process_action(unsure, vars(&[("answer", "1")]), None, None)
        .unwrap();
    usage.finish_question(unsure, None, None).unwrap();

    let sure_before = history(usage.attempt(sure).unwrap());
    let unsure_before = history(usage.attempt(unsure).unwrap());

    usage.regrade_all_questions().unwrap();

    assert_eq!(history(usage.attempt(sure).unwrap()), sure_before);
    assert_eq!(history(usage.attempt(unsure).unwrap()), unsure_before);
    assert_close(usage.fraction(sure).unwrap(), -2.0 / 3.0);
    let unsure_attempt = usage.attempt(unsure).unwrap();
    assert_eq!(
        unsure_attempt.last_behaviour_var("_assumedcertainty"),
        Some("1")
    );
    assert_close(unsure_attempt.fraction(), 1.0 / 3.0);
}

#[test]
fn test_regrade_adaptive_reuses_random_seed() {
    let registry = registry();
    let behaviour = registry.make("adaptive", "deferredfeedback").unwrap();
    let mut donor = Attempt::new(Arc::new(single_choice()), "usage-r", 1, None);
    donor.start(behaviour, VarMap::new(), None, None).unwrap();
    donor
        .process_action(vars(&[("answer", "9")]), None, None)
        .unwrap();
    donor
        .process_action(vars(&[("answer", "1")]), None, None)
        .unwrap();
    let seed = donor.last_behaviour_var("_randomseed").map(str::to_string);
    assert!(seed.is_some());

    let mut regraded = Attempt::new(Arc::clone(donor.question()), "usage-r", 1, None);
    regraded.regrade(&donor).unwrap();

    assert_eq!(history(&regraded), history(&donor));
    assert_eq!(
        regraded.last_behaviour_var("_randomseed").map(str::to_string),
        seed
    );
    assert_eq!(regraded.state(), QuestionState::GradedWrong);
}

#[test]
fn test_regrade_manual_grades_replay_in_order() {
    let mut usage = new_usage("deferredfeedback");
    let slot = usage.add_question(Arc::new(essay()), Some(2.0));
    usage.start_all_questions(None, None).unwrap();
    usage
        .process_action(slot, vars(&[("answer", "Long answer")]), None, None)
        .unwrap();
    usage.finish_all_questions(None, None).unwrap();
    usage
        .manual_grade(slot, "first pass", Some(1.0), None, Some("grader-1"))
        .unwrap();
    usage
        .manual_grade(slot, "second pass", Some(1.5), None, Some("grader-2"))
        .unwrap();
    let before = history(usage.attempt(slot).unwrap());

    usage.regrade_question(slot, None).unwrap();

    let after = usage.attempt(slot).unwrap();
    assert_eq!(history(after), before);
    assert_eq!(after.steps()[4].actor_id(), Some("grader-2"));
    assert_eq!(after.manual_comment(), Some("second pass"));
    assert_close(after.mark(), 1.5);
}
