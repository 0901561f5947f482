use super::{process_comment, Behaviour, Outcome};
use crate::engine::attempt::Attempt;
use crate::engine::error::{EngineError, EngineResult};
use crate::models::state::QuestionState;
use crate::models::step::PendingStep;
use crate::questions::{fields, ExpectedFields, ParamType, Question};

/// Content with nothing to answer. The learner only marks it as seen.
#[derive(Debug, Default, Clone, Copy)]
pub struct InformationItemBehaviour;

impl Behaviour for InformationItemBehaviour {
    fn name(&self) -> &str {
        "informationitem"
    }

    fn min_fraction(&self, _question: &dyn Question) -> f64 {
        0.0
    }

    fn expected_data(&self, attempt: &Attempt) -> ExpectedFields {
        if attempt.state() == QuestionState::Todo {
            fields(&[("seen", ParamType::Bool)])
        } else {
            ExpectedFields::new()
        }
    }

    fn process_action(&self, attempt: &Attempt, pending: &mut PendingStep) -> EngineResult<Outcome> {
        if pending.has_behaviour_var("comment") {
            self.process_comment(attempt, pending)
        } else if pending.has_behaviour_var("finish") {
            self.process_finish(attempt, pending)
        } else if pending.has_behaviour_var("seen") && attempt.state() == QuestionState::Todo {
            pending.set_state(QuestionState::Complete)?;
            Ok(Outcome::Keep)
        } else {
            Ok(Outcome::Discard)
        }
    }

    fn process_finish(&self, attempt: &Attempt, pending: &mut PendingStep) -> EngineResult<Outcome> {
        if attempt.state().is_finished() {
            return Ok(Outcome::Discard);
        }
        pending.set_state(QuestionState::Finished)?;
        Ok(Outcome::Keep)
    }

    fn process_comment(&self, attempt: &Attempt, pending: &mut PendingStep) -> EngineResult<Outcome> {
        let has_mark = pending
            .get_behaviour_var("mark")
            .map(|mark| !mark.trim().is_empty())
            .unwrap_or(false);
        if has_mark {
            return Err(EngineError::CannotGrade(
                "Information items cannot be graded".to_string(),
            ));
        }
        process_comment(attempt, pending)
    }
}
