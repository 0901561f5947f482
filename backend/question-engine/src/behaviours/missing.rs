use super::{Behaviour, Outcome};
use crate::engine::attempt::Attempt;
use crate::engine::error::EngineResult;
use crate::models::step::PendingStep;

/// Stands in for a stored behaviour that is no longer registered. The
/// history stays readable and can be commented on, nothing else.
#[derive(Debug, Clone)]
pub struct MissingBehaviour {
    stored_name: String,
}

impl MissingBehaviour {
    pub fn new(stored_name: &str) -> Self {
        Self {
            stored_name: stored_name.to_string(),
        }
    }
}

impl Behaviour for MissingBehaviour {
    /// Reports the stored name so that saving does not lose it.
    fn name(&self) -> &str {
        &self.stored_name
    }

    fn can_regrade(&self) -> bool {
        false
    }

    fn process_action(&self, attempt: &Attempt, pending: &mut PendingStep) -> EngineResult<Outcome> {
        if pending.has_behaviour_var("comment") {
            self.process_comment(attempt, pending)
        } else {
            Ok(Outcome::Discard)
        }
    }

    fn process_finish(&self, _attempt: &Attempt, _pending: &mut PendingStep) -> EngineResult<Outcome> {
        Ok(Outcome::Discard)
    }
}
