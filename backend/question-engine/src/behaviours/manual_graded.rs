use super::{Behaviour, Outcome};
use crate::engine::attempt::Attempt;
use crate::engine::error::EngineResult;
use crate::models::state::QuestionState;
use crate::models::step::PendingStep;

/// Responses wait for a grader. Grading happens only through comments
/// carrying a mark, and may be repeated.
#[derive(Debug, Default, Clone, Copy)]
pub struct ManualGradedBehaviour;

impl Behaviour for ManualGradedBehaviour {
    fn name(&self) -> &str {
        "manualgraded"
    }

    fn process_finish(&self, attempt: &Attempt, pending: &mut PendingStep) -> EngineResult<Outcome> {
        if attempt.state().is_finished() {
            return Ok(Outcome::Discard);
        }
        let state = if attempt
            .question()
            .is_complete_response(&attempt.last_qt_data())
        {
            QuestionState::NeedsGrading
        } else {
            QuestionState::GaveUp
        };
        pending.set_state(state)?;
        Ok(Outcome::Keep)
    }
}
