use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{fields, ExpectedData, ParamType, Question};
use crate::behaviours::{Behaviour, BehaviourRegistry};
use crate::engine::error::EngineResult;
use crate::models::state::QuestionState;
use crate::models::step::VarMap;

/// Free-text answer that a grader has to mark.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EssayQuestion {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub question_text: String,
    #[serde(default = "default_mark")]
    pub default_mark: f64,
    #[serde(default)]
    pub grader_info: Option<String>,
}

fn default_mark() -> f64 {
    1.0
}

impl EssayQuestion {
    pub fn new(id: &str, question_text: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            question_text: question_text.to_string(),
            default_mark: default_mark(),
            grader_info: None,
        }
    }

    pub fn with_mark(mut self, default_mark: f64) -> Self {
        self.default_mark = default_mark;
        self
    }

    fn text<'a>(&self, response: &'a VarMap) -> &'a str {
        response.get("answer").map(|s| s.trim()).unwrap_or("")
    }
}

impl Question for EssayQuestion {
    fn id(&self) -> &str {
        &self.id
    }

    fn qtype(&self) -> &'static str {
        "essay"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn default_mark(&self) -> f64 {
        self.default_mark
    }

    fn expected_data(&self) -> ExpectedData {
        ExpectedData::Fields(fields(&[("answer", ParamType::CleanHtml)]))
    }

    fn is_complete_response(&self, response: &VarMap) -> bool {
        !self.text(response).is_empty()
    }

    fn is_gradable_response(&self, _response: &VarMap) -> bool {
        false
    }

    fn is_same_response(&self, previous: &VarMap, current: &VarMap) -> bool {
        self.text(previous) == self.text(current)
    }

    fn grade_response(&self, _response: &VarMap) -> (f64, QuestionState) {
        (0.0, QuestionState::NeedsGrading)
    }

    fn correct_response(&self) -> VarMap {
        VarMap::new()
    }

    fn summarise_response(&self, response: &VarMap) -> Option<String> {
        let text = self.text(response);
        (!text.is_empty()).then(|| text.to_string())
    }

    fn question_summary(&self) -> Option<String> {
        Some(self.question_text.clone())
    }

    fn make_behaviour(
        &self,
        registry: &BehaviourRegistry,
        preferred: &str,
    ) -> EngineResult<Arc<dyn Behaviour>> {
        registry.make("manualgraded", preferred)
    }
}
