use super::{grade_last_response, process_save, Behaviour, Outcome};
use crate::engine::attempt::Attempt;
use crate::engine::error::EngineResult;
use crate::models::state::QuestionState;
use crate::models::step::PendingStep;
use crate::questions::{fields, ExpectedFields, ParamType};

/// One submission per attempt, graded as soon as it is submitted.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateFeedbackBehaviour;

impl ImmediateFeedbackBehaviour {
    fn process_submit(&self, attempt: &Attempt, pending: &mut PendingStep) -> EngineResult<Outcome> {
        if attempt.state().is_finished() {
            return Ok(Outcome::Discard);
        }
        let response = pending.qt_data();
        let question = attempt.question();
        if question.is_gradable_response(&response) {
            let (fraction, state) = question.grade_response(&response);
            pending.set_fraction(Some(fraction))?;
            pending.set_state(state)?;
        } else {
            pending.set_state(QuestionState::Invalid)?;
        }
        pending.set_new_response_summary(question.summarise_response(&response));
        Ok(Outcome::Keep)
    }
}

impl Behaviour for ImmediateFeedbackBehaviour {
    fn name(&self) -> &str {
        "immediatefeedback"
    }

    fn is_archetypal(&self) -> bool {
        true
    }

    fn expected_data(&self, attempt: &Attempt) -> ExpectedFields {
        if attempt.state().is_active() {
            fields(&[("submit", ParamType::Bool)])
        } else {
            ExpectedFields::new()
        }
    }

    fn process_action(&self, attempt: &Attempt, pending: &mut PendingStep) -> EngineResult<Outcome> {
        if pending.has_behaviour_var("comment") {
            self.process_comment(attempt, pending)
        } else if pending.has_behaviour_var("finish") {
            self.process_finish(attempt, pending)
        } else if pending.has_behaviour_var("submit") {
            self.process_submit(attempt, pending)
        } else {
            process_save(self, attempt, pending)
        }
    }

    fn process_finish(&self, attempt: &Attempt, pending: &mut PendingStep) -> EngineResult<Outcome> {
        grade_last_response(attempt, pending)
    }
}
