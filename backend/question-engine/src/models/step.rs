use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};

use super::state::QuestionState;
use crate::engine::error::{EngineError, EngineResult};
use crate::utils::time::truncate_to_millis;

/// Variable bag of a step. Ordered so that replays and storage writes are
/// deterministic.
pub type VarMap = BTreeMap<String, String>;

/// Names starting with this marker are cached/internal, never submitted.
pub const CACHED_MARKER: char = '_';
/// Behaviour variables are stored with this prefix.
pub const BEHAVIOUR_PREFIX: char = '-';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    /// Data owned by the question type.
    Question,
    /// Data owned by the behaviour.
    Behaviour,
}

impl Namespace {
    pub fn key(&self, name: &str) -> String {
        match self {
            Namespace::Question => name.to_string(),
            Namespace::Behaviour => format!("{}{}", BEHAVIOUR_PREFIX, name),
        }
    }
}

pub fn is_cached_key(key: &str) -> bool {
    let name = key.strip_prefix(BEHAVIOUR_PREFIX).unwrap_or(key);
    name.starts_with(CACHED_MARKER)
}

/// One recorded action against a question attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    id: Option<String>,
    state: QuestionState,
    fraction: Option<f64>,
    timestamp: DateTime<Utc>,
    actor_id: Option<String>,
    data: VarMap,
    read_only: bool,
}

impl Step {
    pub fn new(data: VarMap, timestamp: Option<DateTime<Utc>>, actor_id: Option<String>) -> Self {
        Self {
            id: None,
            state: QuestionState::Unprocessed,
            fraction: None,
            timestamp: truncate_to_millis(timestamp.unwrap_or_else(Utc::now)),
            actor_id,
            data,
            read_only: false,
        }
    }

    /// Rebuilds a step loaded from storage. Loaded steps can never be changed.
    pub fn read_only(
        id: Option<String>,
        state: QuestionState,
        fraction: Option<f64>,
        timestamp: DateTime<Utc>,
        actor_id: Option<String>,
        data: VarMap,
    ) -> Self {
        Self {
            id,
            state,
            fraction,
            timestamp,
            actor_id,
            data,
            read_only: true,
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub(crate) fn set_id(&mut self, id: String) {
        self.id = Some(id);
    }

    pub(crate) fn clear_id(&mut self) {
        self.id = None;
    }

    pub fn state(&self) -> QuestionState {
        self.state
    }

    pub fn fraction(&self) -> Option<f64> {
        self.fraction
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn actor_id(&self) -> Option<&str> {
        self.actor_id.as_deref()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub(crate) fn freeze(&mut self) {
        self.read_only = true;
    }

    pub fn set_state(&mut self, state: QuestionState) -> EngineResult<()> {
        self.ensure_writable()?;
        self.state = state;
        Ok(())
    }

    pub fn set_fraction(&mut self, fraction: Option<f64>) -> EngineResult<()> {
        self.ensure_writable()?;
        self.fraction = fraction;
        Ok(())
    }

    pub fn has_var(&self, namespace: Namespace, name: &str) -> bool {
        self.data.contains_key(&namespace.key(name))
    }

    pub fn get_var(&self, namespace: Namespace, name: &str) -> Option<&str> {
        self.data.get(&namespace.key(name)).map(String::as_str)
    }

    /// Stores an internal variable. Only `_`-prefixed names are accepted so
    /// that cached values can never be mistaken for submitted data.
    pub fn set_cached_var(
        &mut self,
        namespace: Namespace,
        name: &str,
        value: impl Into<String>,
    ) -> EngineResult<()> {
        self.ensure_writable()?;
        if !name.starts_with(CACHED_MARKER) {
            return Err(EngineError::InvalidVariableName(name.to_string()));
        }
        self.data.insert(namespace.key(name), value.into());
        Ok(())
    }

    pub fn has_qt_var(&self, name: &str) -> bool {
        self.has_var(Namespace::Question, name)
    }

    pub fn get_qt_var(&self, name: &str) -> Option<&str> {
        self.get_var(Namespace::Question, name)
    }

    pub fn has_behaviour_var(&self, name: &str) -> bool {
        self.has_var(Namespace::Behaviour, name)
    }

    pub fn get_behaviour_var(&self, name: &str) -> Option<&str> {
        self.get_var(Namespace::Behaviour, name)
    }

    /// Question-type variables, submitted and cached.
    pub fn qt_data(&self) -> VarMap {
        self.data
            .iter()
            .filter(|(name, _)| !name.starts_with(BEHAVIOUR_PREFIX))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    /// Behaviour variables with the namespace prefix removed.
    pub fn behaviour_data(&self) -> VarMap {
        self.data
            .iter()
            .filter_map(|(name, value)| {
                name.strip_prefix(BEHAVIOUR_PREFIX)
                    .map(|stripped| (stripped.to_string(), value.clone()))
            })
            .collect()
    }

    /// The data the actor actually submitted, i.e. everything except cached
    /// variables. This is what a regrade replays.
    pub fn submitted_vars(&self) -> VarMap {
        self.data
            .iter()
            .filter(|(name, _)| !is_cached_key(name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    pub fn all_vars(&self) -> &VarMap {
        &self.data
    }

    fn ensure_writable(&self) -> EngineResult<()> {
        if self.read_only {
            return Err(EngineError::ImmutableStep);
        }
        Ok(())
    }
}

/// A step that is being built by a behaviour and has not been kept yet.
#[derive(Debug, Clone)]
pub struct PendingStep {
    step: Step,
    new_response_summary: Option<String>,
}

impl PendingStep {
    pub fn new(data: VarMap, timestamp: Option<DateTime<Utc>>, actor_id: Option<String>) -> Self {
        Self {
            step: Step::new(data, timestamp, actor_id),
            new_response_summary: None,
        }
    }

    pub fn set_new_response_summary(&mut self, summary: Option<String>) {
        self.new_response_summary = summary;
    }

    pub fn response_summary_changed(&self) -> bool {
        self.new_response_summary.is_some()
    }

    pub fn into_parts(self) -> (Step, Option<String>) {
        (self.step, self.new_response_summary)
    }
}

impl Deref for PendingStep {
    type Target = Step;

    fn deref(&self) -> &Step {
        &self.step
    }
}

impl DerefMut for PendingStep {
    fn deref_mut(&mut self) -> &mut Step {
        &mut self.step
    }
}
