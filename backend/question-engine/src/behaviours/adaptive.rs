use super::{Behaviour, Outcome, SameResponsePolicy};
use crate::engine::attempt::Attempt;
use crate::engine::error::EngineResult;
use crate::models::state::QuestionState;
use crate::models::step::{Namespace, PendingStep, Step};
use crate::questions::{fields, ExpectedFields, ParamType};

/// Behaviour for questions that drive their own interaction: every new
/// submission is sent to the question, which grades it as soon as it can.
#[derive(Debug, Clone)]
pub struct AdaptiveBehaviour {
    preferred: String,
}

impl AdaptiveBehaviour {
    pub fn new(preferred: &str) -> Self {
        Self {
            preferred: preferred.to_string(),
        }
    }

    fn process_remote_action(&self, attempt: &Attempt, pending: &mut PendingStep) -> EngineResult<Outcome> {
        let response = pending.qt_data();
        let question = attempt.question();
        pending.set_new_response_summary(question.summarise_response(&response));
        if question.is_gradable_response(&response) {
            let (fraction, state) = question.grade_response(&response);
            pending.set_fraction(Some(fraction))?;
            pending.set_state(state)?;
        } else {
            pending.set_state(QuestionState::Todo)?;
            pending.set_cached_var(
                Namespace::Behaviour,
                "_statestring",
                format!("Incomplete response after {} steps", attempt.num_steps()),
            )?;
        }
        Ok(Outcome::Keep)
    }
}

impl Behaviour for AdaptiveBehaviour {
    fn name(&self) -> &str {
        "adaptive"
    }

    fn init_first_step(&self, _attempt: &Attempt, step: &mut Step) -> EngineResult<()> {
        if step.has_behaviour_var("_randomseed") {
            return Ok(());
        }
        step.set_cached_var(
            Namespace::Behaviour,
            "_randomseed",
            rand::random::<u32>().to_string(),
        )?;
        step.set_cached_var(
            Namespace::Behaviour,
            "_preferredbehaviour",
            self.preferred.clone(),
        )?;
        step.set_cached_var(Namespace::Behaviour, "_statestring", "Not yet answered")
    }

    fn expected_data(&self, attempt: &Attempt) -> ExpectedFields {
        if attempt.state().is_active() {
            fields(&[("submit", ParamType::Bool)])
        } else {
            ExpectedFields::new()
        }
    }

    fn same_response_policy(&self) -> SameResponsePolicy {
        SameResponsePolicy::DiscardIdenticalUnlessAction("omact_")
    }

    fn process_action(&self, attempt: &Attempt, pending: &mut PendingStep) -> EngineResult<Outcome> {
        if pending.has_behaviour_var("finish") {
            self.process_finish(attempt, pending)
        } else if pending.has_behaviour_var("comment") {
            self.process_comment(attempt, pending)
        } else if attempt.state().is_finished() || self.is_same_response(attempt, pending) {
            Ok(Outcome::Discard)
        } else {
            self.process_remote_action(attempt, pending)
        }
    }

    fn process_finish(&self, attempt: &Attempt, pending: &mut PendingStep) -> EngineResult<Outcome> {
        if attempt.state().is_finished() {
            return Ok(Outcome::Discard);
        }
        pending.set_state(QuestionState::GaveUp)?;
        Ok(Outcome::Keep)
    }
}
