//! Question definitions as seen by the engine.
//!
//! The engine never grades anything itself: every question type implements
//! [`Question`] and the attempt's behaviour decides when to call it. The
//! reference types in this module back the stored question bank.

use anyhow::Result;
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::behaviours::{Behaviour, BehaviourRegistry};
use crate::engine::error::{EngineError, EngineResult};
use crate::models::state::QuestionState;
use crate::models::step::{is_cached_key, Step, VarMap};

pub mod description;
pub mod essay;
pub mod multichoice;
pub mod truefalse;

pub use description::DescriptionQuestion;
pub use essay::EssayQuestion;
pub use multichoice::{MultiChoiceAnswer, MultiChoiceQuestion};
pub use truefalse::TrueFalseQuestion;

/// How a submitted field is cleaned before it reaches a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    Bool,
    Int,
    Number,
    Text,
    CleanHtml,
    Sequence,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::Bool => "bool",
            ParamType::Int => "int",
            ParamType::Number => "number",
            ParamType::Text => "text",
            ParamType::CleanHtml => "clean_html",
            ParamType::Sequence => "sequence",
        }
    }

    /// Normalises a raw submitted value. Malformed values are rejected
    /// rather than silently coerced.
    pub fn clean(&self, name: &str, raw: &str) -> EngineResult<String> {
        let trimmed = raw.trim();
        let invalid = || EngineError::InvalidParam {
            name: name.to_string(),
            kind: self.as_str(),
            value: raw.to_string(),
        };

        match self {
            ParamType::Bool => match trimmed.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok("1".to_string()),
                "" | "0" | "false" | "no" | "off" => Ok("0".to_string()),
                _ => Err(invalid()),
            },
            ParamType::Int => trimmed
                .parse::<i64>()
                .map(|v| v.to_string())
                .map_err(|_| invalid()),
            ParamType::Number => match trimmed.parse::<f64>() {
                Ok(v) if v.is_finite() => Ok(v.to_string()),
                _ => Err(invalid()),
            },
            ParamType::Text => Ok(trimmed.to_string()),
            ParamType::CleanHtml => Ok(script_tags().replace_all(trimmed, "").into_owned()),
            ParamType::Sequence => {
                if trimmed.is_empty() || sequence_pattern().is_match(trimmed) {
                    Ok(trimmed.to_string())
                } else {
                    Err(invalid())
                }
            }
        }
    }
}

lazy_static! {
    static ref SCRIPT_TAGS: Regex = Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").unwrap();
    static ref SEQUENCE: Regex = Regex::new(r"^\d+(\s*,\s*\d+)*$").unwrap();
}

fn script_tags() -> &'static Regex {
    &SCRIPT_TAGS
}

fn sequence_pattern() -> &'static Regex {
    &SEQUENCE
}

pub type ExpectedFields = BTreeMap<String, ParamType>;

/// The question-type fields a response is made of.
#[derive(Debug, Clone, PartialEq)]
pub enum ExpectedData {
    Fields(ExpectedFields),
    /// Take every question-type field under the attempt's prefix.
    Raw,
}

pub fn fields(pairs: &[(&str, ParamType)]) -> ExpectedFields {
    pairs
        .iter()
        .map(|(name, kind)| (name.to_string(), *kind))
        .collect()
}

/// Strips cached variables, leaving what the learner actually answered.
pub fn response_only(response: &VarMap) -> VarMap {
    response
        .iter()
        .filter(|(name, _)| !is_cached_key(name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Immutable question definition shared by every attempt at it.
pub trait Question: fmt::Debug + Send + Sync {
    fn id(&self) -> &str;

    fn qtype(&self) -> &'static str;

    fn name(&self) -> &str;

    fn default_mark(&self) -> f64;

    fn min_fraction(&self) -> f64 {
        0.0
    }

    /// Fraction deducted for each extra try in multiple-try behaviours.
    fn penalty(&self) -> f64 {
        0.0
    }

    fn hints(&self) -> &[String] {
        &[]
    }

    /// Records per-attempt randomisation. Must leave an already initialised
    /// step alone so that replays reproduce the original attempt.
    fn init_first_step(&self, _step: &mut Step) -> EngineResult<()> {
        Ok(())
    }

    fn expected_data(&self) -> ExpectedData;

    fn is_complete_response(&self, response: &VarMap) -> bool;

    fn is_gradable_response(&self, response: &VarMap) -> bool {
        self.is_complete_response(response)
    }

    fn is_same_response(&self, previous: &VarMap, current: &VarMap) -> bool {
        response_only(previous) == response_only(current)
    }

    fn grade_response(&self, response: &VarMap) -> (f64, QuestionState);

    fn correct_response(&self) -> VarMap;

    fn summarise_response(&self, _response: &VarMap) -> Option<String> {
        None
    }

    fn question_summary(&self) -> Option<String> {
        None
    }

    fn right_answer_summary(&self) -> Option<String> {
        None
    }

    /// Picks the behaviour for a new attempt. Most types honour the
    /// preferred archetype; some force their own.
    fn make_behaviour(
        &self,
        registry: &BehaviourRegistry,
        preferred: &str,
    ) -> EngineResult<Arc<dyn Behaviour>> {
        registry.make_archetypal(preferred)
    }
}

/// Stored form of the reference question types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "qtype", rename_all = "lowercase")]
pub enum QuestionDefinition {
    MultiChoice(MultiChoiceQuestion),
    TrueFalse(TrueFalseQuestion),
    Essay(EssayQuestion),
    Description(DescriptionQuestion),
}

impl QuestionDefinition {
    pub fn into_question(self) -> Arc<dyn Question> {
        match self {
            QuestionDefinition::MultiChoice(q) => Arc::new(q),
            QuestionDefinition::TrueFalse(q) => Arc::new(q),
            QuestionDefinition::Essay(q) => Arc::new(q),
            QuestionDefinition::Description(q) => Arc::new(q),
        }
    }
}

/// Question definition provider used when usages are loaded from storage.
#[async_trait]
pub trait QuestionBank: Send + Sync {
    async fn load_question(&self, question_id: &str) -> Result<Arc<dyn Question>>;
}

/// Question bank over definitions held in memory (previews, tests).
#[derive(Default)]
pub struct InMemoryQuestionBank {
    questions: RwLock<HashMap<String, Arc<dyn Question>>>,
}

impl InMemoryQuestionBank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, question: Arc<dyn Question>) {
        let mut questions = self
            .questions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        questions.insert(question.id().to_string(), question);
    }
}

#[async_trait]
impl QuestionBank for InMemoryQuestionBank {
    async fn load_question(&self, question_id: &str) -> Result<Arc<dyn Question>> {
        let questions = self
            .questions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        questions
            .get(question_id)
            .cloned()
            .ok_or_else(|| EngineError::QuestionNotFound(question_id.to_string()).into())
    }
}
