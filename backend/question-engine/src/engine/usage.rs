use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::attempt::Attempt;
use super::error::{EngineError, EngineResult};
use super::flags::verify_flag_checksum;
use super::observer::{NullObserver, UsageObserver};
use crate::behaviours::{BehaviourRegistry, Outcome};
use crate::metrics;
use crate::models::records::UsageRecord;
use crate::models::state::QuestionState;
use crate::models::step::VarMap;
use crate::models::submission::SubmittedBatch;
use crate::models::UsageId;
use crate::questions::Question;

/// A set of question attempts that belong together, e.g. one quiz attempt.
pub struct Usage {
    id: UsageId,
    owning_plugin: String,
    context: String,
    preferred_behaviour: String,
    attempts: BTreeMap<u32, Attempt>,
    registry: Arc<BehaviourRegistry>,
    observer: Arc<dyn UsageObserver>,
}

impl fmt::Debug for Usage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Usage")
            .field("id", &self.id)
            .field("owning_plugin", &self.owning_plugin)
            .field("context", &self.context)
            .field("preferred_behaviour", &self.preferred_behaviour)
            .field("attempts", &self.attempts)
            .finish()
    }
}

impl Usage {
    /// New unsaved usage. The preferred behaviour must be archetypal.
    pub fn new(
        owning_plugin: &str,
        context: &str,
        preferred_behaviour: &str,
        registry: Arc<BehaviourRegistry>,
    ) -> EngineResult<Self> {
        registry.make_archetypal(preferred_behaviour)?;
        Ok(Self {
            id: UsageId::ephemeral(),
            owning_plugin: owning_plugin.to_string(),
            context: context.to_string(),
            preferred_behaviour: preferred_behaviour.to_string(),
            attempts: BTreeMap::new(),
            registry,
            observer: Arc::new(NullObserver),
        })
    }

    /// Rebuilds a stored usage. Attempts are keyed by their own slot.
    pub fn restore(
        record: UsageRecord,
        attempts: Vec<Attempt>,
        registry: Arc<BehaviourRegistry>,
        observer: Arc<dyn UsageObserver>,
    ) -> Self {
        let mut usage = Self {
            id: UsageId::Stored(record.id),
            owning_plugin: record.owning_plugin,
            context: record.context,
            preferred_behaviour: record.preferred_behaviour,
            attempts: attempts
                .into_iter()
                .map(|attempt| (attempt.slot(), attempt))
                .collect(),
            registry,
            observer: Arc::new(NullObserver),
        };
        usage.set_observer(observer);
        usage
    }

    pub fn to_record(&self) -> UsageRecord {
        UsageRecord {
            id: self.id.as_str().to_string(),
            owning_plugin: self.owning_plugin.clone(),
            context: self.context.clone(),
            preferred_behaviour: self.preferred_behaviour.clone(),
        }
    }

    pub fn id(&self) -> &UsageId {
        &self.id
    }

    /// Switches to the stored id. Attempts follow.
    pub(crate) fn set_id(&mut self, id: String) {
        for attempt in self.attempts.values_mut() {
            attempt.set_usage_id(id.clone());
        }
        self.id = UsageId::Stored(id);
    }

    pub(crate) fn reset_id(&mut self, id: UsageId) {
        for attempt in self.attempts.values_mut() {
            attempt.set_usage_id(id.as_str().to_string());
        }
        self.id = id;
    }

    pub fn owning_plugin(&self) -> &str {
        &self.owning_plugin
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn registry(&self) -> &Arc<BehaviourRegistry> {
        &self.registry
    }

    pub fn observer(&self) -> &Arc<dyn UsageObserver> {
        &self.observer
    }

    pub(crate) fn set_observer(&mut self, observer: Arc<dyn UsageObserver>) {
        for attempt in self.attempts.values_mut() {
            attempt.set_observer(Arc::clone(&observer));
        }
        self.observer = observer;
    }

    pub fn preferred_behaviour(&self) -> &str {
        &self.preferred_behaviour
    }

    pub fn set_preferred_behaviour(&mut self, name: &str) -> EngineResult<()> {
        self.registry.make_archetypal(name)?;
        self.preferred_behaviour = name.to_string();
        self.observer.notify_modified();
        Ok(())
    }

    /// Adds a question in the next free slot and returns the slot.
    pub fn add_question(&mut self, question: Arc<dyn Question>, max_mark: Option<f64>) -> u32 {
        let slot = self.attempts.keys().next_back().map_or(1, |last| last + 1);
        let mut attempt = Attempt::new(question, self.id.as_str(), slot, max_mark);
        attempt.set_observer(Arc::clone(&self.observer));
        self.attempts.insert(slot, attempt);
        self.observer.notify_attempt_added(slot);
        slot
    }

    pub fn attempt(&self, slot: u32) -> EngineResult<&Attempt> {
        self.attempts.get(&slot).ok_or(EngineError::UnknownSlot(slot))
    }

    fn attempt_mut(&mut self, slot: u32) -> EngineResult<&mut Attempt> {
        self.attempts
            .get_mut(&slot)
            .ok_or(EngineError::UnknownSlot(slot))
    }

    pub fn attempts(&self) -> impl Iterator<Item = &Attempt> + '_ {
        self.attempts.values()
    }

    pub(crate) fn attempts_mut(&mut self) -> impl Iterator<Item = &mut Attempt> + '_ {
        self.attempts.values_mut()
    }

    pub fn slots(&self) -> Vec<u32> {
        self.attempts.keys().copied().collect()
    }

    pub fn first_slot(&self) -> Option<u32> {
        self.attempts.keys().next().copied()
    }

    pub fn question_count(&self) -> usize {
        self.attempts.len()
    }

    pub fn question(&self, slot: u32) -> EngineResult<&Arc<dyn Question>> {
        Ok(self.attempt(slot)?.question())
    }

    pub fn state(&self, slot: u32) -> EngineResult<QuestionState> {
        Ok(self.attempt(slot)?.state())
    }

    pub fn fraction(&self, slot: u32) -> EngineResult<Option<f64>> {
        Ok(self.attempt(slot)?.fraction())
    }

    pub fn mark(&self, slot: u32) -> EngineResult<Option<f64>> {
        Ok(self.attempt(slot)?.mark())
    }

    pub fn max_mark(&self, slot: u32) -> EngineResult<f64> {
        Ok(self.attempt(slot)?.max_mark())
    }

    pub fn question_summary(&self, slot: u32) -> EngineResult<Option<&str>> {
        Ok(self.attempt(slot)?.question_summary())
    }

    pub fn response_summary(&self, slot: u32) -> EngineResult<Option<&str>> {
        Ok(self.attempt(slot)?.response_summary())
    }

    pub fn right_answer_summary(&self, slot: u32) -> EngineResult<Option<&str>> {
        Ok(self.attempt(slot)?.right_answer_summary())
    }

    pub fn correct_response(&self, slot: u32) -> EngineResult<VarMap> {
        Ok(self.attempt(slot)?.correct_response())
    }

    /// Sum of the marks. Ungraded attempts count as zero, but a single
    /// attempt waiting for manual grading makes the total unknown.
    pub fn total_mark(&self) -> Option<f64> {
        let mut total = 0.0;
        for attempt in self.attempts.values() {
            if attempt.state() == QuestionState::NeedsGrading {
                return None;
            }
            total += attempt.mark().unwrap_or(0.0);
        }
        Some(total)
    }

    pub fn start_question(
        &mut self,
        slot: u32,
        timestamp: Option<DateTime<Utc>>,
        actor_id: Option<&str>,
    ) -> EngineResult<()> {
        let registry = Arc::clone(&self.registry);
        let preferred = self.preferred_behaviour.clone();
        self.attempt_mut(slot)?.start_preferred(
            &registry,
            &preferred,
            timestamp,
            actor_id.map(str::to_string),
        )
    }

    pub fn start_all_questions(
        &mut self,
        timestamp: Option<DateTime<Utc>>,
        actor_id: Option<&str>,
    ) -> EngineResult<()> {
        for slot in self.slots() {
            self.start_question(slot, timestamp, actor_id)?;
        }
        Ok(())
    }

    /// Starts the attempt in `slot` from where `prior` left off.
    pub fn start_question_based_on(
        &mut self,
        slot: u32,
        prior: &Attempt,
        timestamp: Option<DateTime<Utc>>,
        actor_id: Option<&str>,
    ) -> EngineResult<()> {
        self.attempt_mut(slot)?
            .start_based_on(prior, timestamp, actor_id.map(str::to_string))
    }

    pub fn process_action(
        &mut self,
        slot: u32,
        data: VarMap,
        timestamp: Option<DateTime<Utc>>,
        actor_id: Option<&str>,
    ) -> EngineResult<Outcome> {
        self.attempt_mut(slot)?
            .process_action(data, timestamp, actor_id.map(str::to_string))
    }

    /// Processes a whole page of submissions. Every listed slot must exist and
    /// be started, and every declared sequence check must match, before
    /// anything is processed.
    pub fn process_all_actions(
        &mut self,
        batch: &SubmittedBatch,
        timestamp: Option<DateTime<Utc>>,
        actor_id: Option<&str>,
    ) -> EngineResult<()> {
        let slots = batch.slots.clone().unwrap_or_else(|| self.slots());

        for slot in &slots {
            let attempt = self.attempt(*slot)?;
            if attempt.behaviour().is_none() {
                return Err(EngineError::NotStarted);
            }
            if let Some(expected) = batch.responses.get(slot).and_then(|r| r.sequence_check) {
                attempt.check_sequence(expected)?;
            }
        }
        for (slot, response) in &batch.responses {
            if response.flagged.is_some() {
                self.attempt(*slot)?;
            }
        }

        for slot in &slots {
            let data = batch
                .responses
                .get(slot)
                .map(|r| r.data.clone())
                .unwrap_or_default();
            self.process_action(*slot, data, timestamp, actor_id)?;
        }

        for (slot, response) in &batch.responses {
            if let Some(flagged) = response.flagged {
                self.attempt_mut(*slot)?.set_flagged(flagged);
            }
        }
        Ok(())
    }

    pub fn finish_question(
        &mut self,
        slot: u32,
        timestamp: Option<DateTime<Utc>>,
        actor_id: Option<&str>,
    ) -> EngineResult<Outcome> {
        self.attempt_mut(slot)?
            .finish(timestamp, actor_id.map(str::to_string))
    }

    pub fn finish_all_questions(
        &mut self,
        timestamp: Option<DateTime<Utc>>,
        actor_id: Option<&str>,
    ) -> EngineResult<()> {
        for slot in self.slots() {
            self.finish_question(slot, timestamp, actor_id)?;
        }
        tracing::info!("Finished all questions in usage {}", self.id);
        Ok(())
    }

    pub fn manual_grade(
        &mut self,
        slot: u32,
        comment: &str,
        mark: Option<f64>,
        timestamp: Option<DateTime<Utc>>,
        grader_id: Option<&str>,
    ) -> EngineResult<Outcome> {
        self.attempt_mut(slot)?
            .manual_grade(comment, mark, timestamp, grader_id.map(str::to_string))
    }

    pub fn set_flagged(&mut self, slot: u32, flagged: bool) -> EngineResult<()> {
        self.attempt_mut(slot)?.set_flagged(flagged);
        Ok(())
    }

    /// Changes a flag on behalf of a page that only holds a checksum.
    /// Returns whether the checksum verified.
    pub fn set_flag_checked(
        &mut self,
        slot: u32,
        flagged: bool,
        secret: &str,
        actor_id: &str,
        checksum: &str,
    ) -> EngineResult<bool> {
        let usage_id = self.id.as_str().to_string();
        let attempt = self.attempt_mut(slot)?;
        if !verify_flag_checksum(secret, &usage_id, slot, actor_id, checksum) {
            tracing::warn!("Rejected flag change for slot {} of usage {}", slot, usage_id);
            return Ok(false);
        }
        attempt.set_flagged(flagged);
        Ok(true)
    }

    /// Replays the attempt in `slot` against the current question definition,
    /// optionally with a new max mark, and replaces it.
    pub fn regrade_question(&mut self, slot: u32, new_max_mark: Option<f64>) -> EngineResult<()> {
        let old = self.attempt(slot)?;
        let max_mark = new_max_mark.unwrap_or_else(|| old.max_mark());
        let mut regraded = Attempt::new(
            Arc::clone(old.question()),
            self.id.as_str(),
            slot,
            Some(max_mark),
        );
        if let Some(id) = old.id() {
            regraded.set_id(id.to_string());
        }
        regraded.inherit_flag(old.is_flagged());

        if let Err(e) = regraded.regrade(old) {
            metrics::record_regrade("error");
            tracing::warn!("Failed to regrade slot {} of usage {}: {}", slot, self.id, e);
            return Err(e);
        }

        self.observer.notify_delete_attempt_steps(slot);
        regraded.set_observer(Arc::clone(&self.observer));
        for (seq, step) in regraded.steps().iter().enumerate() {
            self.observer.notify_step_added(step, slot, seq);
        }
        self.observer.notify_attempt_modified(slot);
        self.attempts.insert(slot, regraded);

        metrics::record_regrade("success");
        tracing::info!("Regraded slot {} of usage {}", slot, self.id);
        Ok(())
    }

    /// Regrades every started slot. Fails without touching any slot when one
    /// of them cannot be replayed.
    pub fn regrade_all_questions(&mut self) -> EngineResult<()> {
        for attempt in self.attempts.values() {
            if let Some(behaviour) = attempt.behaviour() {
                if !behaviour.can_regrade() {
                    return Err(EngineError::CannotRegrade(behaviour.name().to_string()));
                }
            }
        }
        for slot in self.slots() {
            if self.attempt(slot)?.num_steps() == 0 {
                continue;
            }
            self.regrade_question(slot, None)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::flags::flag_checksum;
    use crate::questions::{EssayQuestion, TrueFalseQuestion};

    fn usage() -> Usage {
        Usage::new(
            "mod_quiz",
            "ctx-1",
            "deferredfeedback",
            Arc::new(BehaviourRegistry::with_defaults()),
        )
        .unwrap()
    }

    fn answer(value: &str) -> VarMap {
        VarMap::from([("answer".to_string(), value.to_string())])
    }

    #[test]
    fn slots_are_assigned_in_order() {
        let mut u = usage();
        let q = Arc::new(TrueFalseQuestion::new("tf", "Yes?", true));
        assert_eq!(u.add_question(q.clone(), None), 1);
        assert_eq!(u.add_question(q.clone(), None), 2);
        assert_eq!(u.add_question(q, None), 3);
        assert_eq!(u.slots(), vec![1, 2, 3]);
        assert_eq!(u.first_slot(), Some(1));
        assert_eq!(u.question_count(), 3);
        assert_eq!(u.state(4).unwrap_err(), EngineError::UnknownSlot(4));
    }

    #[test]
    fn preferred_behaviour_must_be_archetypal() {
        let mut u = usage();
        assert_eq!(
            u.set_preferred_behaviour("manualgraded"),
            Err(EngineError::NotArchetypal("manualgraded".to_string()))
        );
        u.set_preferred_behaviour("interactive").unwrap();
        assert_eq!(u.preferred_behaviour(), "interactive");
    }

    #[test]
    fn essay_forces_manual_grading() {
        let mut u = usage();
        let slot = u.add_question(Arc::new(EssayQuestion::new("e", "Discuss")), None);
        u.start_question(slot, None, None).unwrap();
        assert_eq!(u.attempt(slot).unwrap().behaviour_name(), Some("manualgraded"));
    }

    #[test]
    fn regrade_keeps_slot_id_and_flag() {
        let mut u = usage();
        let slot = u.add_question(Arc::new(TrueFalseQuestion::new("tf", "Yes?", true)), None);
        u.start_question(slot, None, None).unwrap();
        u.process_action(slot, answer("1"), None, None).unwrap();
        u.finish_question(slot, None, None).unwrap();
        u.set_flagged(slot, true).unwrap();

        u.regrade_question(slot, Some(4.0)).unwrap();
        let attempt = u.attempt(slot).unwrap();
        assert_eq!(attempt.slot(), slot);
        assert!(attempt.is_flagged());
        assert_eq!(attempt.num_steps(), 3);
        assert_eq!(attempt.mark(), Some(4.0));
    }

    #[test]
    fn flag_changes_need_a_valid_checksum() {
        let mut u = usage();
        let slot = u.add_question(Arc::new(TrueFalseQuestion::new("tf", "Yes?", true)), None);
        let good = flag_checksum("s3cret", u.id().as_str(), slot, "student");
        assert!(!u.set_flag_checked(slot, true, "s3cret", "student", "deadbeef").unwrap());
        assert!(!u.attempt(slot).unwrap().is_flagged());
        assert!(u.set_flag_checked(slot, true, "s3cret", "student", &good).unwrap());
        assert!(u.attempt(slot).unwrap().is_flagged());
    }
}
