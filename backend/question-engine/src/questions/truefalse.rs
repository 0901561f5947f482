use serde::{Deserialize, Serialize};

use super::multichoice::default_penalty;
use super::{fields, ExpectedData, ParamType, Question};
use crate::models::state::QuestionState;
use crate::models::step::VarMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrueFalseQuestion {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub question_text: String,
    #[serde(default = "default_mark")]
    pub default_mark: f64,
    #[serde(default = "default_penalty")]
    pub penalty: f64,
    pub right_answer: bool,
    #[serde(default)]
    pub hints: Vec<String>,
}

fn default_mark() -> f64 {
    1.0
}

impl TrueFalseQuestion {
    pub fn new(id: &str, question_text: &str, right_answer: bool) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            question_text: question_text.to_string(),
            default_mark: default_mark(),
            penalty: 1.0,
            right_answer,
            hints: Vec::new(),
        }
    }

    pub fn with_mark(mut self, default_mark: f64) -> Self {
        self.default_mark = default_mark;
        self
    }

    fn answer(&self, response: &VarMap) -> Option<bool> {
        match response.get("answer").map(String::as_str) {
            Some("1") => Some(true),
            Some("0") => Some(false),
            _ => None,
        }
    }
}

fn label(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

impl Question for TrueFalseQuestion {
    fn id(&self) -> &str {
        &self.id
    }

    fn qtype(&self) -> &'static str {
        "truefalse"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn default_mark(&self) -> f64 {
        self.default_mark
    }

    fn penalty(&self) -> f64 {
        self.penalty
    }

    fn hints(&self) -> &[String] {
        &self.hints
    }

    fn expected_data(&self) -> ExpectedData {
        ExpectedData::Fields(fields(&[("answer", ParamType::Bool)]))
    }

    fn is_complete_response(&self, response: &VarMap) -> bool {
        self.answer(response).is_some()
    }

    fn grade_response(&self, response: &VarMap) -> (f64, QuestionState) {
        let fraction = if self.answer(response) == Some(self.right_answer) {
            1.0
        } else {
            0.0
        };
        (fraction, QuestionState::graded_for_fraction(fraction))
    }

    fn correct_response(&self) -> VarMap {
        let value = if self.right_answer { "1" } else { "0" };
        VarMap::from([("answer".to_string(), value.to_string())])
    }

    fn summarise_response(&self, response: &VarMap) -> Option<String> {
        self.answer(response).map(|v| label(v).to_string())
    }

    fn question_summary(&self) -> Option<String> {
        Some(self.question_text.clone())
    }

    fn right_answer_summary(&self) -> Option<String> {
        Some(label(self.right_answer).to_string())
    }
}
