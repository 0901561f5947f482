//! Question behaviours: the strategies that decide how a question attempt
//! reacts to each submitted action.
//!
//! Behaviours are stateless apart from construction parameters. They read
//! the attempt they act on and classify the pending step by setting its
//! state and fraction, returning [`Outcome::Keep`] or [`Outcome::Discard`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::engine::attempt::Attempt;
use crate::engine::error::{EngineError, EngineResult};
use crate::models::state::QuestionState;
use crate::models::step::{PendingStep, Step, VarMap, BEHAVIOUR_PREFIX};
use crate::questions::{ExpectedFields, Question};

pub mod adaptive;
pub mod deferred_feedback;
pub mod immediate_cbm;
pub mod immediate_feedback;
pub mod information_item;
pub mod interactive;
pub mod manual_graded;
pub mod missing;

pub use adaptive::AdaptiveBehaviour;
pub use deferred_feedback::DeferredFeedbackBehaviour;
pub use immediate_cbm::{Certainty, ImmediateCbmBehaviour};
pub use immediate_feedback::ImmediateFeedbackBehaviour;
pub use information_item::InformationItemBehaviour;
pub use interactive::InteractiveBehaviour;
pub use manual_graded::ManualGradedBehaviour;
pub use missing::MissingBehaviour;

/// Whether a pending step is appended to the attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Keep,
    Discard,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Keep => "keep",
            Outcome::Discard => "discard",
        }
    }
}

/// How a behaviour treats a submission identical to the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameResponsePolicy {
    AlwaysProcess,
    /// Compare the question-type response through the question.
    DiscardIdentical,
    /// Compare everything submitted. Any submitted key starting with the
    /// prefix forces processing.
    DiscardIdenticalUnlessAction(&'static str),
}

impl SameResponsePolicy {
    pub fn is_same(&self, attempt: &Attempt, pending: &PendingStep) -> bool {
        match self {
            SameResponsePolicy::AlwaysProcess => false,
            SameResponsePolicy::DiscardIdentical => attempt
                .question()
                .is_same_response(&attempt.last_qt_data(), &pending.qt_data()),
            SameResponsePolicy::DiscardIdenticalUnlessAction(prefix) => {
                let submitted = pending.submitted_vars();
                let forced = submitted.keys().any(|key| {
                    key.strip_prefix(BEHAVIOUR_PREFIX)
                        .unwrap_or(key)
                        .starts_with(prefix)
                });
                if forced {
                    return false;
                }
                match attempt.last_step() {
                    Some(last) => last.submitted_vars() == submitted,
                    None => false,
                }
            }
        }
    }
}

/// Strategy interface implemented by every behaviour.
pub trait Behaviour: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    /// Archetypal behaviours can be chosen as a usage's preferred behaviour.
    fn is_archetypal(&self) -> bool {
        false
    }

    fn min_fraction(&self, question: &dyn Question) -> f64 {
        question.min_fraction()
    }

    /// Whether stored history can be replayed through this behaviour.
    fn can_regrade(&self) -> bool {
        true
    }

    /// Seeds bookkeeping variables on the first step. Must leave a step that
    /// already carries them untouched.
    fn init_first_step(&self, _attempt: &Attempt, _step: &mut Step) -> EngineResult<()> {
        Ok(())
    }

    /// Behaviour-namespace fields read from submitted data.
    fn expected_data(&self, _attempt: &Attempt) -> ExpectedFields {
        ExpectedFields::new()
    }

    fn same_response_policy(&self) -> SameResponsePolicy {
        SameResponsePolicy::DiscardIdentical
    }

    fn is_same_response(&self, attempt: &Attempt, pending: &PendingStep) -> bool {
        self.same_response_policy().is_same(attempt, pending)
    }

    fn process_action(&self, attempt: &Attempt, pending: &mut PendingStep) -> EngineResult<Outcome> {
        if pending.has_behaviour_var("comment") {
            self.process_comment(attempt, pending)
        } else if pending.has_behaviour_var("finish") {
            self.process_finish(attempt, pending)
        } else {
            self.process_save(attempt, pending)
        }
    }

    fn process_finish(&self, attempt: &Attempt, pending: &mut PendingStep) -> EngineResult<Outcome>;

    fn process_save(&self, attempt: &Attempt, pending: &mut PendingStep) -> EngineResult<Outcome> {
        process_save(self, attempt, pending)
    }

    fn process_comment(&self, attempt: &Attempt, pending: &mut PendingStep) -> EngineResult<Outcome> {
        process_comment(attempt, pending)
    }

    /// Behaviour part of a correct response, without the `-` prefix.
    fn correct_response(&self, _attempt: &Attempt) -> VarMap {
        VarMap::new()
    }

    /// Behaviour variables, without the `-` prefix, carried into an attempt
    /// built on this one.
    fn behaviour_resume_data(&self, _attempt: &Attempt) -> VarMap {
        VarMap::new()
    }

    fn resume_data(&self, attempt: &Attempt) -> EngineResult<VarMap> {
        let mut data = attempt.step(0)?.all_vars().clone();
        data.extend(attempt.last_qt_data());
        for (name, value) in self.behaviour_resume_data(attempt) {
            data.insert(format!("{}{}", BEHAVIOUR_PREFIX, name), value);
        }
        Ok(data)
    }

    /// The hint to show at this point in the attempt, if any.
    fn applicable_hint(&self, _attempt: &Attempt) -> Option<String> {
        None
    }

    fn question_summary(&self, attempt: &Attempt) -> Option<String> {
        attempt.question().question_summary()
    }

    fn right_answer_summary(&self, attempt: &Attempt) -> Option<String> {
        attempt.question().right_answer_summary()
    }
}

/// Saving a response without submitting it: never graded, only marked
/// complete or not.
pub fn process_save<B: Behaviour + ?Sized>(
    behaviour: &B,
    attempt: &Attempt,
    pending: &mut PendingStep,
) -> EngineResult<Outcome> {
    if attempt.state().is_finished() || behaviour.is_same_response(attempt, pending) {
        return Ok(Outcome::Discard);
    }
    let response = pending.qt_data();
    let question = attempt.question();
    let state = if question.is_complete_response(&response) {
        QuestionState::Complete
    } else {
        QuestionState::Todo
    };
    pending.set_state(state)?;
    pending.set_new_response_summary(question.summarise_response(&response));
    Ok(Outcome::Keep)
}

/// Grades the latest response, or gives up when nothing gradable was saved.
pub fn grade_last_response(attempt: &Attempt, pending: &mut PendingStep) -> EngineResult<Outcome> {
    if attempt.state().is_finished() {
        return Ok(Outcome::Discard);
    }
    let response = attempt.last_qt_data();
    let question = attempt.question();
    if question.is_gradable_response(&response) {
        let (fraction, state) = question.grade_response(&response);
        pending.set_fraction(Some(fraction))?;
        pending.set_state(state)?;
    } else {
        pending.set_state(QuestionState::GaveUp)?;
    }
    Ok(Outcome::Keep)
}

/// Comment and optional manual mark from a grader.
pub fn process_comment(attempt: &Attempt, pending: &mut PendingStep) -> EngineResult<Outcome> {
    let mark = pending
        .get_behaviour_var("mark")
        .map(str::trim)
        .filter(|mark| !mark.is_empty())
        .map(|mark| parse_number("-mark", mark))
        .transpose()?;

    let (fraction, awarded) = match mark {
        Some(mark) => {
            let max_mark = match pending.get_behaviour_var("maxmark") {
                Some(max_mark) => parse_number("-maxmark", max_mark)?,
                None => attempt.max_mark(),
            };
            let min_fraction = attempt.min_fraction()?;
            let out_of_range = EngineError::MarkOutOfRange {
                mark,
                max_mark,
                min_fraction,
            };
            if max_mark <= 0.0 {
                if mark != 0.0 {
                    return Err(out_of_range);
                }
                (Some(0.0), Some(0.0))
            } else {
                let fraction = mark / max_mark;
                if fraction > 1.0 || fraction < min_fraction {
                    return Err(out_of_range);
                }
                (Some(fraction), Some(fraction))
            }
        }
        None => (attempt.fraction(), None),
    };

    pending.set_state(attempt.state().commented(awarded))?;
    pending.set_fraction(fraction)?;
    Ok(Outcome::Keep)
}

fn parse_number(name: &str, raw: &str) -> EngineResult<f64> {
    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(EngineError::InvalidParam {
            name: name.to_string(),
            kind: "number",
            value: raw.to_string(),
        }),
    }
}

/// Creates a behaviour. The argument is the usage's preferred behaviour.
pub type BehaviourFactory = fn(&str) -> Arc<dyn Behaviour>;

/// Maps behaviour names to factories.
#[derive(Clone, Default)]
pub struct BehaviourRegistry {
    factories: BTreeMap<String, BehaviourFactory>,
}

impl fmt::Debug for BehaviourRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BehaviourRegistry")
            .field("behaviours", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl BehaviourRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in behaviour.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let builtins: [(&str, BehaviourFactory); 7] = [
            ("deferredfeedback", |_| Arc::new(DeferredFeedbackBehaviour)),
            ("immediatefeedback", |_| Arc::new(ImmediateFeedbackBehaviour)),
            ("immediatecbm", |_| Arc::new(ImmediateCbmBehaviour)),
            ("interactive", |_| Arc::new(InteractiveBehaviour)),
            ("manualgraded", |_| Arc::new(ManualGradedBehaviour)),
            ("informationitem", |_| Arc::new(InformationItemBehaviour)),
            ("adaptive", |preferred| Arc::new(AdaptiveBehaviour::new(preferred))),
        ];
        for (name, factory) in builtins {
            // Built-in names are valid and distinct.
            let _ = registry.register(name, factory);
        }
        registry
    }

    pub fn register(&mut self, name: &str, factory: BehaviourFactory) -> EngineResult<()> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
        if !valid {
            return Err(EngineError::InvalidBehaviourName(name.to_string()));
        }
        if self.factories.contains_key(name) {
            return Err(EngineError::DuplicateBehaviour(name.to_string()));
        }
        self.factories.insert(name.to_string(), factory);
        Ok(())
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn make(&self, name: &str, preferred: &str) -> EngineResult<Arc<dyn Behaviour>> {
        self.factories
            .get(name)
            .map(|factory| factory(preferred))
            .ok_or_else(|| EngineError::UnknownBehaviour(name.to_string()))
    }

    pub fn make_archetypal(&self, name: &str) -> EngineResult<Arc<dyn Behaviour>> {
        let behaviour = self.make(name, name)?;
        if !behaviour.is_archetypal() {
            return Err(EngineError::NotArchetypal(name.to_string()));
        }
        Ok(behaviour)
    }

    /// Used when loading stored attempts: an unknown name must not make the
    /// history unreadable.
    pub fn make_or_missing(&self, name: &str, preferred: &str) -> Arc<dyn Behaviour> {
        match self.make(name, preferred) {
            Ok(behaviour) => behaviour,
            Err(_) => {
                tracing::warn!("Unknown question behaviour '{}', using missing behaviour", name);
                Arc::new(MissingBehaviour::new(name))
            }
        }
    }

    pub fn archetypal_names(&self) -> Vec<String> {
        self.factories
            .iter()
            .filter(|(name, factory)| factory(name).is_archetypal())
            .map(|(name, _)| name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_validates_names() {
        let mut registry = BehaviourRegistry::new();
        let factory: BehaviourFactory = |_| Arc::new(DeferredFeedbackBehaviour);
        assert_eq!(
            registry.register("Deferred-Feedback", factory),
            Err(EngineError::InvalidBehaviourName("Deferred-Feedback".to_string()))
        );
        assert_eq!(
            registry.register("", factory),
            Err(EngineError::InvalidBehaviourName(String::new()))
        );
        registry.register("deferred2", factory).unwrap();
        assert_eq!(
            registry.register("deferred2", factory),
            Err(EngineError::DuplicateBehaviour("deferred2".to_string()))
        );
    }

    #[test]
    fn archetypal_lookup() {
        let registry = BehaviourRegistry::with_defaults();
        assert_eq!(
            registry.make_archetypal("interactive").unwrap().name(),
            "interactive"
        );
        assert_eq!(
            registry.make_archetypal("manualgraded").unwrap_err(),
            EngineError::NotArchetypal("manualgraded".to_string())
        );
        assert_eq!(
            registry.make_archetypal("nosuch").unwrap_err(),
            EngineError::UnknownBehaviour("nosuch".to_string())
        );
        assert_eq!(
            registry.archetypal_names(),
            vec![
                "deferredfeedback",
                "immediatecbm",
                "immediatefeedback",
                "interactive"
            ]
        );
    }

    #[test]
    fn unknown_stored_behaviour_falls_back_to_missing() {
        let registry = BehaviourRegistry::with_defaults();
        let behaviour = registry.make_or_missing("retired", "deferredfeedback");
        assert_eq!(behaviour.name(), "retired");
        assert!(!behaviour.is_archetypal());
    }
}
