use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::error::{EngineError, EngineResult};
use super::observer::{NullObserver, UsageObserver};
use crate::behaviours::{Behaviour, BehaviourRegistry, Outcome};
use crate::metrics;
use crate::models::records::AttemptRecord;
use crate::models::state::QuestionState;
use crate::models::step::{PendingStep, Step, VarMap, BEHAVIOUR_PREFIX, CACHED_MARKER};
use crate::questions::{ExpectedData, Question};

/// One learner's instance of one question within a usage.
pub struct Attempt {
    id: Option<String>,
    usage_id: String,
    slot: u32,
    question: Arc<dyn Question>,
    behaviour: Option<Arc<dyn Behaviour>>,
    max_mark: f64,
    min_fraction: Option<f64>,
    flagged: bool,
    steps: Vec<Step>,
    question_summary: Option<String>,
    right_answer_summary: Option<String>,
    response_summary: Option<String>,
    time_modified: DateTime<Utc>,
    observer: Arc<dyn UsageObserver>,
}

impl fmt::Debug for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attempt")
            .field("id", &self.id)
            .field("usage_id", &self.usage_id)
            .field("slot", &self.slot)
            .field("question", &self.question.id())
            .field("behaviour", &self.behaviour_name())
            .field("max_mark", &self.max_mark)
            .field("steps", &self.steps.len())
            .field("state", &self.state())
            .finish()
    }
}

impl Attempt {
    pub fn new(
        question: Arc<dyn Question>,
        usage_id: impl Into<String>,
        slot: u32,
        max_mark: Option<f64>,
    ) -> Self {
        let max_mark = max_mark.unwrap_or_else(|| question.default_mark());
        Self {
            id: None,
            usage_id: usage_id.into(),
            slot,
            question,
            behaviour: None,
            max_mark,
            min_fraction: None,
            flagged: false,
            steps: Vec::new(),
            question_summary: None,
            right_answer_summary: None,
            response_summary: None,
            time_modified: Utc::now(),
            observer: Arc::new(NullObserver),
        }
    }

    /// Rebuilds an attempt from its stored row and steps.
    pub fn restore(
        record: AttemptRecord,
        question: Arc<dyn Question>,
        registry: &BehaviourRegistry,
        preferred_behaviour: &str,
        steps: Vec<Step>,
    ) -> Self {
        let behaviour = registry.make_or_missing(&record.behaviour, preferred_behaviour);
        Self {
            id: Some(record.id),
            usage_id: record.usage_id,
            slot: record.slot,
            question,
            behaviour: Some(behaviour),
            max_mark: record.max_mark,
            min_fraction: Some(record.min_fraction),
            flagged: record.flagged,
            steps,
            question_summary: record.question_summary,
            right_answer_summary: record.right_answer_summary,
            response_summary: record.response_summary,
            time_modified: record.time_modified,
            observer: Arc::new(NullObserver),
        }
    }

    /// Stored row for this attempt. Fails for attempts without a behaviour
    /// or an id.
    pub fn to_record(&self, question_id: &str) -> EngineResult<AttemptRecord> {
        let id = self
            .id
            .clone()
            .ok_or_else(|| EngineError::InvalidRecord(format!("attempt in slot {} has no id", self.slot)))?;
        Ok(AttemptRecord {
            id,
            usage_id: self.usage_id.clone(),
            slot: self.slot,
            question_id: question_id.to_string(),
            behaviour: self
                .behaviour_name()
                .ok_or(EngineError::NotStarted)?
                .to_string(),
            max_mark: self.max_mark,
            min_fraction: self.min_fraction()?,
            flagged: self.flagged,
            question_summary: self.question_summary.clone(),
            right_answer_summary: self.right_answer_summary.clone(),
            response_summary: self.response_summary.clone(),
            time_modified: self.time_modified,
        })
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

    pub fn usage_id(&self) -> &str {
        &self.usage_id
    }

    pub(crate) fn set_usage_id(&mut self, usage_id: String) {
        self.usage_id = usage_id;
    }

    pub fn slot(&self) -> u32 {
        self.slot
    }

    pub(crate) fn set_observer(&mut self, observer: Arc<dyn UsageObserver>) {
        self.observer = observer;
    }

    pub fn question(&self) -> &Arc<dyn Question> {
        &self.question
    }

    pub fn behaviour(&self) -> Option<&Arc<dyn Behaviour>> {
        self.behaviour.as_ref()
    }

    pub fn behaviour_name(&self) -> Option<&str> {
        self.behaviour.as_ref().map(|b| b.name())
    }

    pub fn max_mark(&self) -> f64 {
        self.max_mark
    }

    /// Fixed when the attempt starts.
    pub fn min_fraction(&self) -> EngineResult<f64> {
        self.min_fraction.ok_or(EngineError::NotStarted)
    }

    pub fn is_flagged(&self) -> bool {
        self.flagged
    }

    pub fn set_flagged(&mut self, flagged: bool) {
        if self.flagged != flagged {
            self.flagged = flagged;
            self.observer.notify_attempt_modified(self.slot);
        }
    }

    /// Carries a flag over without recording a change.
    pub(crate) fn inherit_flag(&mut self, flagged: bool) {
        self.flagged = flagged;
    }

    pub fn time_modified(&self) -> DateTime<Utc> {
        self.time_modified
    }

    pub fn question_summary(&self) -> Option<&str> {
        self.question_summary.as_deref()
    }

    pub fn right_answer_summary(&self) -> Option<&str> {
        self.right_answer_summary.as_deref()
    }

    pub fn response_summary(&self) -> Option<&str> {
        self.response_summary.as_deref()
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Steps from the most recent back to step 0.
    pub fn steps_rev(&self) -> impl Iterator<Item = &Step> + '_ {
        self.steps.iter().rev()
    }

    pub fn step(&self, index: usize) -> EngineResult<&Step> {
        self.steps.get(index).ok_or(EngineError::StepIndexOutOfBounds {
            index,
            len: self.steps.len(),
        })
    }

    pub fn num_steps(&self) -> usize {
        self.steps.len()
    }

    pub fn last_step(&self) -> Option<&Step> {
        self.steps.last()
    }

    pub fn state(&self) -> QuestionState {
        self.last_step()
            .map(Step::state)
            .unwrap_or(QuestionState::NotStarted)
    }

    pub fn fraction(&self) -> Option<f64> {
        self.last_step().and_then(Step::fraction)
    }

    pub fn mark(&self) -> Option<f64> {
        self.fraction().map(|fraction| fraction * self.max_mark)
    }

    /// Question-type data of the latest step that has any.
    pub fn last_qt_data(&self) -> VarMap {
        self.steps_rev()
            .map(Step::qt_data)
            .find(|data| !data.is_empty())
            .unwrap_or_default()
    }

    pub fn last_qt_var(&self, name: &str) -> Option<&str> {
        self.steps_rev().find_map(|step| step.get_qt_var(name))
    }

    pub fn last_behaviour_var(&self, name: &str) -> Option<&str> {
        self.steps_rev().find_map(|step| step.get_behaviour_var(name))
    }

    pub fn last_action_time(&self) -> Option<DateTime<Utc>> {
        self.last_step().map(Step::timestamp)
    }

    pub fn has_manual_comment(&self) -> bool {
        self.steps.iter().any(|step| step.has_behaviour_var("comment"))
    }

    pub fn manual_comment(&self) -> Option<&str> {
        self.last_behaviour_var("comment")
    }

    pub fn applicable_hint(&self) -> Option<String> {
        self.behaviour
            .as_ref()
            .and_then(|behaviour| behaviour.applicable_hint(self))
    }

    pub fn field_prefix(&self) -> String {
        format!("q{}:{}_", self.usage_id, self.slot)
    }

    pub fn flag_field_name(&self) -> String {
        format!("{}:flagged", self.field_prefix())
    }

    pub fn sequence_check_field_name(&self) -> String {
        format!("{}:sequencecheck", self.field_prefix())
    }

    /// Starts the attempt: builds step 0 from `data` and lets the question
    /// and the behaviour record their initial variables.
    pub fn start(
        &mut self,
        behaviour: Arc<dyn Behaviour>,
        data: VarMap,
        timestamp: Option<DateTime<Utc>>,
        actor_id: Option<String>,
    ) -> EngineResult<()> {
        if !self.steps.is_empty() {
            return Err(EngineError::AlreadyStarted);
        }

        let mut first = Step::new(data, timestamp, actor_id);
        first.set_state(QuestionState::Todo)?;
        self.question.init_first_step(&mut first)?;
        behaviour.init_first_step(self, &mut first)?;

        self.min_fraction = Some(behaviour.min_fraction(self.question.as_ref()));
        self.question_summary = behaviour.question_summary(self);
        self.right_answer_summary = behaviour.right_answer_summary(self);
        self.behaviour = Some(behaviour);
        self.add_step(first);

        let behaviour_name = self.behaviour_name().unwrap_or_default();
        metrics::record_attempt_started(behaviour_name);
        tracing::info!(
            "Started question {} in slot {} of usage {} with {}",
            self.question.id(),
            self.slot,
            self.usage_id,
            behaviour_name
        );
        Ok(())
    }

    /// Starts with the behaviour the question picks for `preferred`.
    pub fn start_preferred(
        &mut self,
        registry: &BehaviourRegistry,
        preferred: &str,
        timestamp: Option<DateTime<Utc>>,
        actor_id: Option<String>,
    ) -> EngineResult<()> {
        let behaviour = self.question.make_behaviour(registry, preferred)?;
        self.start(behaviour, VarMap::new(), timestamp, actor_id)
    }

    /// Starts with `prior`'s behaviour, seeded with its resume data.
    pub fn start_based_on(
        &mut self,
        prior: &Attempt,
        timestamp: Option<DateTime<Utc>>,
        actor_id: Option<String>,
    ) -> EngineResult<()> {
        let behaviour = prior.behaviour.clone().ok_or(EngineError::NotStarted)?;
        let data = behaviour.resume_data(prior)?;
        self.start(behaviour, data, timestamp, actor_id)
    }

    pub fn resume_data(&self) -> EngineResult<VarMap> {
        let behaviour = self.behaviour.as_ref().ok_or(EngineError::NotStarted)?;
        behaviour.resume_data(self)
    }

    pub fn process_action(
        &mut self,
        data: VarMap,
        timestamp: Option<DateTime<Utc>>,
        actor_id: Option<String>,
    ) -> EngineResult<Outcome> {
        let behaviour = self.behaviour.clone().ok_or(EngineError::NotStarted)?;
        let mut pending = PendingStep::new(data, timestamp, actor_id);
        let outcome = behaviour.process_action(self, &mut pending)?;
        metrics::record_action(behaviour.name(), outcome.as_str());

        match outcome {
            Outcome::Keep => {
                let (step, summary) = pending.into_parts();
                tracing::debug!(
                    "Slot {} of usage {}: kept step {} ({})",
                    self.slot,
                    self.usage_id,
                    self.steps.len(),
                    step.state()
                );
                if summary.is_some() {
                    self.response_summary = summary;
                }
                self.add_step(step);
                self.observer.notify_attempt_modified(self.slot);
            }
            Outcome::Discard => {
                tracing::debug!(
                    "Slot {} of usage {}: discarded action in state {}",
                    self.slot,
                    self.usage_id,
                    self.state()
                );
            }
        }
        Ok(outcome)
    }

    pub fn finish(
        &mut self,
        timestamp: Option<DateTime<Utc>>,
        actor_id: Option<String>,
    ) -> EngineResult<Outcome> {
        let data = VarMap::from([("-finish".to_string(), "1".to_string())]);
        self.process_action(data, timestamp, actor_id)
    }

    /// Records a grader's comment and, optionally, an absolute mark out of
    /// this attempt's max mark.
    pub fn manual_grade(
        &mut self,
        comment: &str,
        mark: Option<f64>,
        timestamp: Option<DateTime<Utc>>,
        actor_id: Option<String>,
    ) -> EngineResult<Outcome> {
        let mut data = VarMap::from([("-comment".to_string(), comment.to_string())]);
        if let Some(mark) = mark {
            data.insert("-mark".to_string(), mark.to_string());
            data.insert("-maxmark".to_string(), self.max_mark.to_string());
        }
        self.process_action(data, timestamp, actor_id)
    }

    /// Replays `donor`'s history through the donor's behaviour. The attempt
    /// must not have been started.
    pub fn regrade(&mut self, donor: &Attempt) -> EngineResult<()> {
        let behaviour = donor.behaviour.clone().ok_or(EngineError::NotStarted)?;
        if !behaviour.can_regrade() {
            return Err(EngineError::CannotRegrade(behaviour.name().to_string()));
        }
        let mut steps = donor.steps.iter();
        let first = steps.next().ok_or(EngineError::NotStarted)?;
        self.start(
            behaviour,
            first.all_vars().clone(),
            Some(first.timestamp()),
            first.actor_id().map(str::to_string),
        )?;
        for step in steps {
            self.process_action(
                step.submitted_vars(),
                Some(step.timestamp()),
                step.actor_id().map(str::to_string),
            )?;
        }
        Ok(())
    }

    /// Question correct response merged with the behaviour's part.
    pub fn correct_response(&self) -> VarMap {
        let mut response = self.question.correct_response();
        if let Some(behaviour) = &self.behaviour {
            for (name, value) in behaviour.correct_response(self) {
                response.insert(format!("{}{}", BEHAVIOUR_PREFIX, name), value);
            }
        }
        response
    }

    pub fn check_sequence(&self, expected_steps: usize) -> EngineResult<()> {
        if expected_steps != self.steps.len() {
            metrics::record_out_of_sequence();
            tracing::warn!(
                "Out of sequence submission for slot {} of usage {}: expected {}, have {}",
                self.slot,
                self.usage_id,
                expected_steps,
                self.steps.len()
            );
            return Err(EngineError::OutOfSequence {
                usage_id: self.usage_id.clone(),
                slot: self.slot,
                expected: expected_steps,
                actual: self.steps.len(),
            });
        }
        Ok(())
    }

    /// Reads this attempt's fields out of flat form data.
    pub fn extract_submitted_data(&self, post: &BTreeMap<String, String>) -> EngineResult<VarMap> {
        let prefix = self.field_prefix();
        let mut data = VarMap::new();

        if let Some(behaviour) = &self.behaviour {
            for (name, kind) in behaviour.expected_data(self) {
                let field = format!("{}{}{}", prefix, BEHAVIOUR_PREFIX, name);
                if let Some(raw) = post.get(&field) {
                    data.insert(format!("{}{}", BEHAVIOUR_PREFIX, name), kind.clean(&field, raw)?);
                }
            }
        }

        match self.question.expected_data() {
            ExpectedData::Fields(expected) => {
                for (name, kind) in expected {
                    let field = format!("{}{}", prefix, name);
                    if let Some(raw) = post.get(&field) {
                        data.insert(name, kind.clean(&field, raw)?);
                    }
                }
            }
            ExpectedData::Raw => {
                for (field, value) in post {
                    let Some(name) = field.strip_prefix(&prefix) else {
                        continue;
                    };
                    let reserved = name.starts_with(BEHAVIOUR_PREFIX)
                        || name.starts_with(CACHED_MARKER)
                        || name.starts_with(':');
                    if !name.is_empty() && !reserved {
                        data.insert(name.to_string(), value.clone());
                    }
                }
            }
        }
        Ok(data)
    }

    /// Gives every unsaved step a storage id. Returns the sequence numbers
    /// of the steps that got one.
    pub(crate) fn assign_step_ids(&mut self, mut next_id: impl FnMut() -> String) -> Vec<usize> {
        let mut assigned = Vec::new();
        for (seq, step) in self.steps.iter_mut().enumerate() {
            if step.id().is_none() {
                step.set_id(next_id());
                assigned.push(seq);
            }
        }
        assigned
    }

    pub(crate) fn clear_step_ids(&mut self, seqs: &[usize]) {
        for seq in seqs {
            if let Some(step) = self.steps.get_mut(*seq) {
                step.clear_id();
            }
        }
    }

    fn add_step(&mut self, mut step: Step) {
        step.freeze();
        self.time_modified = step.timestamp();
        self.steps.push(step);
        let seq = self.steps.len() - 1;
        self.observer
            .notify_step_added(&self.steps[seq], self.slot, seq);
    }
}
