use super::{process_save, Behaviour, Outcome, SameResponsePolicy};
use crate::engine::attempt::Attempt;
use crate::engine::error::EngineResult;
use crate::models::state::QuestionState;
use crate::models::step::{Namespace, PendingStep, VarMap};
use crate::questions::{fields, ExpectedFields, ParamType, Question};

/// How sure the learner says they are of an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Certainty {
    Low = 1,
    Medium = 2,
    High = 3,
}

impl Certainty {
    pub const DEFAULT: Certainty = Certainty::Low;

    pub fn from_var(value: &str) -> Option<Self> {
        match value.trim() {
            "1" => Some(Certainty::Low),
            "2" => Some(Certainty::Medium),
            "3" => Some(Certainty::High),
            _ => None,
        }
    }

    pub fn as_var(&self) -> String {
        (*self as u8).to_string()
    }

    fn factor(&self) -> f64 {
        match self {
            Certainty::Low => 1.0 / 3.0,
            Certainty::Medium => 4.0 / 3.0,
            Certainty::High => 3.0,
        }
    }

    fn offset(&self) -> f64 {
        match self {
            Certainty::Low => 0.0,
            Certainty::Medium => -2.0 / 3.0,
            Certainty::High => -2.0,
        }
    }

    /// Certainty-based marking: confident wrong answers cost marks.
    pub fn adjust_fraction(&self, fraction: f64) -> f64 {
        self.offset() + self.factor() * fraction
    }
}

/// Immediate feedback where every submission carries a certainty level.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateCbmBehaviour;

impl ImmediateCbmBehaviour {
    fn process_submit(&self, attempt: &Attempt, pending: &mut PendingStep) -> EngineResult<Outcome> {
        if attempt.state().is_finished() {
            return Ok(Outcome::Discard);
        }
        let response = pending.qt_data();
        let question = attempt.question();
        let certainty = pending
            .get_behaviour_var("certainty")
            .and_then(Certainty::from_var);
        pending.set_new_response_summary(question.summarise_response(&response));

        match certainty {
            Some(certainty) if question.is_gradable_response(&response) => {
                grade(question.as_ref(), &response, Some(certainty), pending)?;
            }
            _ => pending.set_state(QuestionState::Invalid)?,
        }
        Ok(Outcome::Keep)
    }
}

fn grade(
    question: &dyn Question,
    response: &VarMap,
    certainty: Option<Certainty>,
    pending: &mut PendingStep,
) -> EngineResult<()> {
    let (raw, state) = question.grade_response(response);
    let certainty = match certainty {
        Some(certainty) => certainty,
        None => {
            pending.set_cached_var(
                Namespace::Behaviour,
                "_assumedcertainty",
                Certainty::DEFAULT.as_var(),
            )?;
            Certainty::DEFAULT
        }
    };
    pending.set_cached_var(Namespace::Behaviour, "_rawfraction", raw.to_string())?;
    pending.set_fraction(Some(certainty.adjust_fraction(raw)))?;
    pending.set_state(state)?;
    Ok(())
}

impl Behaviour for ImmediateCbmBehaviour {
    fn name(&self) -> &str {
        "immediatecbm"
    }

    fn is_archetypal(&self) -> bool {
        true
    }

    fn min_fraction(&self, question: &dyn Question) -> f64 {
        Certainty::High.adjust_fraction(question.min_fraction())
    }

    fn expected_data(&self, attempt: &Attempt) -> ExpectedFields {
        if attempt.state().is_active() {
            fields(&[("submit", ParamType::Bool), ("certainty", ParamType::Int)])
        } else {
            ExpectedFields::new()
        }
    }

    fn is_same_response(&self, attempt: &Attempt, pending: &PendingStep) -> bool {
        SameResponsePolicy::DiscardIdentical.is_same(attempt, pending)
            && attempt.last_behaviour_var("certainty") == pending.get_behaviour_var("certainty")
    }

    fn process_action(&self, attempt: &Attempt, pending: &mut PendingStep) -> EngineResult<Outcome> {
        if pending.has_behaviour_var("comment") {
            self.process_comment(attempt, pending)
        } else if pending.has_behaviour_var("finish") {
            self.process_finish(attempt, pending)
        } else if pending.has_behaviour_var("submit") {
            self.process_submit(attempt, pending)
        } else {
            self.process_save(attempt, pending)
        }
    }

    fn process_save(&self, attempt: &Attempt, pending: &mut PendingStep) -> EngineResult<Outcome> {
        let outcome = process_save(self, attempt, pending)?;
        let has_certainty = pending
            .get_behaviour_var("certainty")
            .and_then(Certainty::from_var)
            .is_some();
        if outcome == Outcome::Keep && pending.state() == QuestionState::Complete && !has_certainty {
            pending.set_state(QuestionState::Todo)?;
        }
        Ok(outcome)
    }

    fn process_finish(&self, attempt: &Attempt, pending: &mut PendingStep) -> EngineResult<Outcome> {
        if attempt.state().is_finished() {
            return Ok(Outcome::Discard);
        }
        let response = attempt.last_qt_data();
        let question = attempt.question();
        if !question.is_gradable_response(&response) {
            pending.set_state(QuestionState::GaveUp)?;
            return Ok(Outcome::Keep);
        }
        let certainty = attempt
            .last_behaviour_var("certainty")
            .and_then(Certainty::from_var);
        grade(question.as_ref(), &response, certainty, pending)?;
        Ok(Outcome::Keep)
    }

    fn correct_response(&self, attempt: &Attempt) -> VarMap {
        if attempt.state().is_active() {
            VarMap::from([("certainty".to_string(), Certainty::High.as_var())])
        } else {
            VarMap::new()
        }
    }

    fn behaviour_resume_data(&self, attempt: &Attempt) -> VarMap {
        attempt
            .last_behaviour_var("certainty")
            .map(|certainty| VarMap::from([("certainty".to_string(), certainty.to_string())]))
            .unwrap_or_default()
    }
}
