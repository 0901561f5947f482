use super::{grade_last_response, Behaviour, Outcome};
use crate::engine::attempt::Attempt;
use crate::engine::error::EngineResult;
use crate::models::step::PendingStep;

/// Responses are only saved until the attempt is finished, then graded once.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeferredFeedbackBehaviour;

impl Behaviour for DeferredFeedbackBehaviour {
    fn name(&self) -> &str {
        "deferredfeedback"
    }

    fn is_archetypal(&self) -> bool {
        true
    }

    fn process_finish(&self, attempt: &Attempt, pending: &mut PendingStep) -> EngineResult<Outcome> {
        grade_last_response(attempt, pending)
    }
}
