use super::{process_save, Behaviour, Outcome, SameResponsePolicy};
use crate::engine::attempt::Attempt;
use crate::engine::error::EngineResult;
use crate::models::state::QuestionState;
use crate::models::step::{Namespace, PendingStep, Step};
use crate::questions::{fields, ExpectedFields, ParamType};

/// Several tries with a hint after each wrong one. Later tries score less.
#[derive(Debug, Default, Clone, Copy)]
pub struct InteractiveBehaviour;

impl InteractiveBehaviour {
    fn total_tries(attempt: &Attempt) -> u32 {
        attempt.question().hints().len() as u32 + 1
    }

    fn tries_left(attempt: &Attempt) -> u32 {
        attempt
            .last_behaviour_var("_triesleft")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(|| Self::total_tries(attempt))
    }

    /// The learner has been told they were wrong and must ask to try again.
    pub fn is_try_again_state(attempt: &Attempt) -> bool {
        if !attempt.state().is_active() {
            return false;
        }
        attempt
            .last_step()
            .map(|last| last.has_behaviour_var("submit") && last.has_behaviour_var("_triesleft"))
            .unwrap_or(false)
    }

    fn adjusted_fraction(attempt: &Attempt, raw: f64, tries_left: u32) -> f64 {
        let tries_used = Self::total_tries(attempt).saturating_sub(tries_left);
        let penalised = raw - attempt.question().penalty() * f64::from(tries_used);
        penalised.max(raw.min(0.0))
    }

    fn process_submit(&self, attempt: &Attempt, pending: &mut PendingStep) -> EngineResult<Outcome> {
        if attempt.state().is_finished()
            || Self::is_try_again_state(attempt)
            || self.is_same_response(attempt, pending)
        {
            return Ok(Outcome::Discard);
        }

        let response = pending.qt_data();
        let question = attempt.question();
        pending.set_new_response_summary(question.summarise_response(&response));
        if !question.is_gradable_response(&response) {
            pending.set_state(QuestionState::Invalid)?;
            return Ok(Outcome::Keep);
        }

        let tries_left = Self::tries_left(attempt);
        let (raw, state) = question.grade_response(&response);
        if state == QuestionState::GradedCorrect || tries_left <= 1 {
            pending.set_cached_var(Namespace::Behaviour, "_rawfraction", raw.to_string())?;
            pending.set_cached_var(
                Namespace::Behaviour,
                "_triesleft",
                tries_left.saturating_sub(1).to_string(),
            )?;
            pending.set_fraction(Some(Self::adjusted_fraction(attempt, raw, tries_left)))?;
            pending.set_state(state)?;
        } else {
            pending.set_cached_var(
                Namespace::Behaviour,
                "_triesleft",
                (tries_left - 1).to_string(),
            )?;
            pending.set_state(QuestionState::Todo)?;
        }
        Ok(Outcome::Keep)
    }

    fn process_try_again(&self, attempt: &Attempt, pending: &mut PendingStep) -> EngineResult<Outcome> {
        if !Self::is_try_again_state(attempt) {
            return Ok(Outcome::Discard);
        }
        pending.set_state(QuestionState::Todo)?;
        Ok(Outcome::Keep)
    }
}

impl Behaviour for InteractiveBehaviour {
    fn name(&self) -> &str {
        "interactive"
    }

    fn is_archetypal(&self) -> bool {
        true
    }

    fn init_first_step(&self, attempt: &Attempt, step: &mut Step) -> EngineResult<()> {
        if step.has_behaviour_var("_triesleft") {
            return Ok(());
        }
        step.set_cached_var(
            Namespace::Behaviour,
            "_triesleft",
            Self::total_tries(attempt).to_string(),
        )
    }

    fn expected_data(&self, attempt: &Attempt) -> ExpectedFields {
        if Self::is_try_again_state(attempt) {
            fields(&[("tryagain", ParamType::Bool)])
        } else if attempt.state().is_active() {
            fields(&[("submit", ParamType::Bool)])
        } else {
            ExpectedFields::new()
        }
    }

    fn same_response_policy(&self) -> SameResponsePolicy {
        SameResponsePolicy::DiscardIdenticalUnlessAction("omact_")
    }

    fn process_action(&self, attempt: &Attempt, pending: &mut PendingStep) -> EngineResult<Outcome> {
        if pending.has_behaviour_var("comment") {
            self.process_comment(attempt, pending)
        } else if pending.has_behaviour_var("finish") {
            self.process_finish(attempt, pending)
        } else if pending.has_behaviour_var("tryagain") {
            self.process_try_again(attempt, pending)
        } else if pending.has_behaviour_var("submit") {
            self.process_submit(attempt, pending)
        } else {
            self.process_save(attempt, pending)
        }
    }

    fn process_save(&self, attempt: &Attempt, pending: &mut PendingStep) -> EngineResult<Outcome> {
        if Self::is_try_again_state(attempt) {
            return Ok(Outcome::Discard);
        }
        process_save(self, attempt, pending)
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
        let tries_left = Self::tries_left(attempt);
        let (raw, state) = question.grade_response(&response);
        pending.set_cached_var(Namespace::Behaviour, "_rawfraction", raw.to_string())?;
        pending.set_fraction(Some(Self::adjusted_fraction(attempt, raw, tries_left)))?;
        pending.set_state(state)?;
        Ok(Outcome::Keep)
    }

    fn applicable_hint(&self, attempt: &Attempt) -> Option<String> {
        if !Self::is_try_again_state(attempt) {
            return None;
        }
        let tries_used = Self::total_tries(attempt).saturating_sub(Self::tries_left(attempt));
        let index = tries_used.checked_sub(1)? as usize;
        attempt.question().hints().get(index).cloned()
    }
}
