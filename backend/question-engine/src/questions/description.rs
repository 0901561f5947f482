use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{ExpectedData, ExpectedFields, Question};
use crate::behaviours::{Behaviour, BehaviourRegistry};
use crate::engine::error::EngineResult;
use crate::models::state::QuestionState;
use crate::models::step::VarMap;

/// Text shown in a quiz that carries no marks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptionQuestion {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub question_text: String,
}

impl DescriptionQuestion {
    pub fn new(id: &str, question_text: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            question_text: question_text.to_string(),
        }
    }
}

impl Question for DescriptionQuestion {
    fn id(&self) -> &str {
        &self.id
    }

    fn qtype(&self) -> &'static str {
        "description"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn default_mark(&self) -> f64 {
        0.0
    }

    fn expected_data(&self) -> ExpectedData {
        ExpectedData::Fields(ExpectedFields::new())
    }

    fn is_complete_response(&self, _response: &VarMap) -> bool {
        false
    }

    fn grade_response(&self, _response: &VarMap) -> (f64, QuestionState) {
        (0.0, QuestionState::Finished)
    }

    fn correct_response(&self) -> VarMap {
        VarMap::new()
    }

    fn question_summary(&self) -> Option<String> {
        Some(self.question_text.clone())
    }

    fn make_behaviour(
        &self,
        registry: &BehaviourRegistry,
        preferred: &str,
    ) -> EngineResult<Arc<dyn Behaviour>> {
        registry.make("informationitem", preferred)
    }
}
