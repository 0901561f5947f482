use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use super::{fields, ExpectedData, ParamType, Question};
use crate::engine::error::EngineResult;
use crate::models::state::{QuestionState, CORRECT_THRESHOLD};
use crate::models::step::{Namespace, Step, VarMap};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiChoiceAnswer {
    pub text: String,
    pub fraction: f64,
    #[serde(default)]
    pub feedback: Option<String>,
}

/// Single-response multiple choice. The response field `answer` holds the
/// index of the chosen answer in definition order; the display order chosen
/// for the attempt is cached as `_order`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiChoiceQuestion {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub question_text: String,
    #[serde(default = "default_mark")]
    pub default_mark: f64,
    #[serde(default = "default_penalty")]
    pub penalty: f64,
    #[serde(default = "default_shuffle")]
    pub shuffle_answers: bool,
    pub answers: Vec<MultiChoiceAnswer>,
    #[serde(default)]
    pub hints: Vec<String>,
}

fn default_mark() -> f64 {
    1.0
}

pub(crate) fn default_penalty() -> f64 {
    0.3333333
}

fn default_shuffle() -> bool {
    true
}

impl MultiChoiceQuestion {
    pub fn new(id: &str, question_text: &str, answers: Vec<MultiChoiceAnswer>) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            question_text: question_text.to_string(),
            default_mark: default_mark(),
            penalty: default_penalty(),
            shuffle_answers: false,
            answers,
            hints: Vec::new(),
        }
    }

    pub fn with_hints(mut self, hints: Vec<String>) -> Self {
        self.hints = hints;
        self
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle_answers = shuffle;
        self
    }

    fn chosen(&self, response: &VarMap) -> Option<&MultiChoiceAnswer> {
        let index = response.get("answer")?.parse::<usize>().ok()?;
        self.answers.get(index)
    }
}

impl Question for MultiChoiceQuestion {
    fn id(&self) -> &str {
        &self.id
    }

    fn qtype(&self) -> &'static str {
        "multichoice"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn default_mark(&self) -> f64 {
        self.default_mark
    }

    fn min_fraction(&self) -> f64 {
        self.answers
            .iter()
            .map(|a| a.fraction)
            .fold(0.0_f64, f64::min)
    }

    fn penalty(&self) -> f64 {
        self.penalty
    }

    fn hints(&self) -> &[String] {
        &self.hints
    }

    fn init_first_step(&self, step: &mut Step) -> EngineResult<()> {
        if step.has_qt_var("_order") {
            return Ok(());
        }
        let mut order: Vec<usize> = (0..self.answers.len()).collect();
        if self.shuffle_answers {
            order.shuffle(&mut rand::rng());
        }
        let order = order
            .iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(",");
        step.set_cached_var(Namespace::Question, "_order", order)
    }

    fn expected_data(&self) -> ExpectedData {
        ExpectedData::Fields(fields(&[("answer", ParamType::Int)]))
    }

    fn is_complete_response(&self, response: &VarMap) -> bool {
        self.chosen(response).is_some()
    }

    fn grade_response(&self, response: &VarMap) -> (f64, QuestionState) {
        let fraction = self.chosen(response).map(|a| a.fraction).unwrap_or(0.0);
        (fraction, QuestionState::graded_for_fraction(fraction))
    }

    fn correct_response(&self) -> VarMap {
        let best = self
            .answers
            .iter()
            .enumerate()
            .find(|(_, a)| a.fraction > CORRECT_THRESHOLD);
        match best {
            Some((index, _)) => VarMap::from([("answer".to_string(), index.to_string())]),
            None => VarMap::new(),
        }
    }

    fn summarise_response(&self, response: &VarMap) -> Option<String> {
        self.chosen(response).map(|a| a.text.clone())
    }

    fn question_summary(&self) -> Option<String> {
        let choices = self
            .answers
            .iter()
            .map(|a| a.text.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        Some(format!("{}: {}", self.question_text, choices))
    }

    fn right_answer_summary(&self) -> Option<String> {
        self.answers
            .iter()
            .find(|a| a.fraction > CORRECT_THRESHOLD)
            .map(|a| a.text.clone())
    }
}
