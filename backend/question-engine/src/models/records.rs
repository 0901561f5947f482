use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::QuestionState;
use crate::utils::time::bson_datetime_as_chrono;

/// Row of `question_usages`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub owning_plugin: String,
    pub context: String,
    pub preferred_behaviour: String,
}

/// Row of `question_attempts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub usage_id: String,
    pub slot: u32,
    pub question_id: String,
    pub behaviour: String,
    pub max_mark: f64,
    pub min_fraction: f64,
    #[serde(default)]
    pub flagged: bool,
    #[serde(default)]
    pub question_summary: Option<String>,
    #[serde(default)]
    pub right_answer_summary: Option<String>,
    #[serde(default)]
    pub response_summary: Option<String>,
    #[serde(with = "bson_datetime_as_chrono")]
    pub time_modified: DateTime<Utc>,
}

/// Row of `question_attempt_steps`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub attempt_id: String,
    pub sequence_number: u32,
    pub state: QuestionState,
    #[serde(default)]
    pub fraction: Option<f64>,
    #[serde(with = "bson_datetime_as_chrono")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub actor_id: Option<String>,
}

/// Row of `question_attempt_step_data`: one step variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDataRecord {
    pub step_id: String,
    pub name: String,
    pub value: String,
}
