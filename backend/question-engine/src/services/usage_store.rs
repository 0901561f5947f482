use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::behaviours::BehaviourRegistry;
use crate::engine::attempt::Attempt;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::observer::{PendingChanges, UnitOfWork};
use crate::engine::usage::Usage;
use crate::metrics::track_store_operation;
use crate::models::records::{AttemptRecord, StepDataRecord, StepRecord, UsageRecord};
use crate::models::step::{Step, VarMap};
use crate::models::UsageId;
use crate::questions::{Question, QuestionBank};

/// Persistence of question usages.
#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn load_usage(
        &self,
        usage_id: &str,
        bank: &dyn QuestionBank,
        registry: Arc<BehaviourRegistry>,
    ) -> Result<Usage>;

    /// Inserts an unsaved usage in full, or writes the changes recorded
    /// since the last save. A failed save leaves the usage as it was, so it
    /// can be retried.
    async fn save_usage(&self, usage: &mut Usage) -> Result<()>;

    async fn delete_usage(&self, usage_id: &str) -> Result<()>;

    /// Changes the max mark of the attempts in `slot` of each usage without
    /// loading them. Returns how many attempts changed.
    async fn set_max_mark_in_attempts(
        &self,
        usage_ids: &[String],
        slot: u32,
        new_max_mark: f64,
    ) -> Result<u64>;
}

/// Everything one save has to write.
#[derive(Debug, Default)]
pub struct UsageWrite {
    pub usage: Option<UsageRecord>,
    pub usage_is_new: bool,
    pub new_attempts: Vec<AttemptRecord>,
    pub updated_attempts: Vec<AttemptRecord>,
    /// Attempt ids whose stored steps are removed before new ones go in.
    pub cleared_attempts: Vec<String>,
    pub new_steps: Vec<StepRecord>,
    pub new_step_data: Vec<StepDataRecord>,
    rollback: Rollback,
}

/// What `prepare_save` changed on the usage itself.
#[derive(Debug, Default)]
struct Rollback {
    previous_id: Option<UsageId>,
    attempts_assigned: Vec<u32>,
    steps_assigned: Vec<(u32, Vec<usize>)>,
    taken: Option<PendingChanges>,
}

impl UsageWrite {
    pub fn is_empty(&self) -> bool {
        self.usage.is_none()
            && self.new_attempts.is_empty()
            && self.updated_attempts.is_empty()
            && self.cleared_attempts.is_empty()
            && self.new_steps.is_empty()
    }
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Assigns storage ids and collects the rows to write. Hand the result to
/// `complete_save` once written, or to `abort_save` if the write failed.
pub fn prepare_save(usage: &mut Usage) -> EngineResult<UsageWrite> {
    let mut write = UsageWrite::default();
    match collect_rows(usage, &mut write) {
        Ok(()) => Ok(write),
        Err(e) => {
            abort_save(usage, write);
            Err(e)
        }
    }
}

fn collect_rows(usage: &mut Usage, write: &mut UsageWrite) -> EngineResult<()> {
    write.usage_is_new = !usage.id().is_stored();
    if write.usage_is_new {
        write.rollback.previous_id = Some(usage.id().clone());
        usage.set_id(new_id());
    }

    let tracked = usage.observer().as_unit_of_work().map(UnitOfWork::take);
    write.rollback.taken = tracked.clone();
    let changes = tracked.clone().unwrap_or_default();
    let touched = changes.slots_to_update();

    if write.usage_is_new || changes.usage_modified || tracked.is_none() {
        write.usage = Some(usage.to_record());
    }

    for attempt in usage.attempts_mut() {
        let slot = attempt.slot();
        let is_new = attempt.id().is_none();
        if is_new {
            attempt.set_id(new_id());
            write.rollback.attempts_assigned.push(slot);
        }
        let attempt_id = attempt.id().map(str::to_string).unwrap_or_default();

        if !is_new && changes.steps_deleted.contains(&slot) {
            write.cleared_attempts.push(attempt_id.clone());
        }

        let assigned = attempt.assign_step_ids(new_id);
        if !assigned.is_empty() {
            write.rollback.steps_assigned.push((slot, assigned.clone()));
        }
        for seq in &assigned {
            let step = &attempt.steps()[*seq];
            let (record, data) = step_rows(step, &attempt_id, *seq)?;
            write.new_steps.push(record);
            write.new_step_data.extend(data);
        }

        let record = attempt.to_record(attempt.question().id())?;
        if is_new {
            write.new_attempts.push(record);
        } else if tracked.is_none() || touched.contains(&slot) || !assigned.is_empty() {
            write.updated_attempts.push(record);
        }
    }
    Ok(())
}

/// Undoes `prepare_save` after a failed write so the usage can be saved
/// again later.
pub fn abort_save(usage: &mut Usage, write: UsageWrite) {
    let rollback = write.rollback;
    for attempt in usage.attempts_mut() {
        let slot = attempt.slot();
        if rollback.attempts_assigned.contains(&slot) {
            attempt.clear_id();
        }
        if let Some((_, seqs)) = rollback.steps_assigned.iter().find(|(s, _)| *s == slot) {
            attempt.clear_step_ids(seqs);
        }
    }
    if let Some(previous) = rollback.previous_id {
        usage.reset_id(previous);
    }
    if let (Some(taken), Some(unit)) = (rollback.taken, usage.observer().as_unit_of_work()) {
        unit.restore(taken);
    }
    tracing::warn!("Save of usage {} rolled back", usage.id());
}

/// Stored usages track their changes from now on.
pub fn complete_save(usage: &mut Usage, write: &UsageWrite) {
    if usage.observer().as_unit_of_work().is_none() {
        usage.set_observer(Arc::new(UnitOfWork::new()));
    }
    tracing::info!(
        "Saved usage {}: {} new attempts, {} updated, {} new steps",
        usage.id(),
        write.new_attempts.len(),
        write.updated_attempts.len(),
        write.new_steps.len()
    );
}

fn step_rows(
    step: &Step,
    attempt_id: &str,
    seq: usize,
) -> EngineResult<(StepRecord, Vec<StepDataRecord>)> {
    let step_id = step
        .id()
        .ok_or_else(|| EngineError::InvalidRecord(format!("step {} has no id", seq)))?
        .to_string();
    let data = step
        .all_vars()
        .iter()
        .map(|(name, value)| StepDataRecord {
            step_id: step_id.clone(),
            name: name.clone(),
            value: value.clone(),
        })
        .collect();
    let record = StepRecord {
        id: step_id,
        attempt_id: attempt_id.to_string(),
        sequence_number: seq as u32,
        state: step.state(),
        fraction: step.fraction(),
        timestamp: step.timestamp(),
        actor_id: step.actor_id().map(str::to_string),
    };
    Ok((record, data))
}

/// Rebuilds a usage from its stored rows. Steps come back read-only and in
/// sequence order.
pub async fn assemble_usage(
    usage: UsageRecord,
    attempts: Vec<AttemptRecord>,
    mut steps: Vec<StepRecord>,
    data: Vec<StepDataRecord>,
    bank: &dyn QuestionBank,
    registry: Arc<BehaviourRegistry>,
) -> Result<Usage> {
    let mut vars_by_step: HashMap<String, VarMap> = HashMap::new();
    for row in data {
        vars_by_step
            .entry(row.step_id)
            .or_default()
            .insert(row.name, row.value);
    }

    steps.sort_by_key(|step| step.sequence_number);
    let mut steps_by_attempt: HashMap<String, Vec<Step>> = HashMap::new();
    for row in steps {
        let vars = vars_by_step.remove(&row.id).unwrap_or_default();
        steps_by_attempt
            .entry(row.attempt_id.clone())
            .or_default()
            .push(Step::read_only(
                Some(row.id),
                row.state,
                row.fraction,
                row.timestamp,
                row.actor_id,
                vars,
            ));
    }

    let mut questions: HashMap<String, Arc<dyn Question>> = HashMap::new();
    let mut restored = Vec::with_capacity(attempts.len());
    for record in attempts {
        let question = match questions.get(&record.question_id) {
            Some(question) => Arc::clone(question),
            None => {
                let question = bank
                    .load_question(&record.question_id)
                    .await
                    .with_context(|| {
                        format!(
                            "Failed to load question {} for slot {}",
                            record.question_id, record.slot
                        )
                    })?;
                questions.insert(record.question_id.clone(), Arc::clone(&question));
                question
            }
        };
        let steps = steps_by_attempt.remove(&record.id).unwrap_or_default();
        restored.push(Attempt::restore(
            record,
            question,
            &registry,
            &usage.preferred_behaviour,
            steps,
        ));
    }

    Ok(Usage::restore(
        usage,
        restored,
        registry,
        Arc::new(UnitOfWork::new()),
    ))
}

#[derive(Debug, Default, Clone)]
struct Tables {
    usages: Vec<UsageRecord>,
    attempts: Vec<AttemptRecord>,
    steps: Vec<StepRecord>,
    step_data: Vec<StepDataRecord>,
}

/// Usage store over rows held in memory (previews, tests).
#[derive(Default)]
pub struct InMemoryUsageStore {
    tables: RwLock<Tables>,
}

impl InMemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn step_count(&self, usage_id: &str) -> usize {
        let tables = self.tables.read().await;
        let attempt_ids: BTreeSet<&str> = tables
            .attempts
            .iter()
            .filter(|a| a.usage_id == usage_id)
            .map(|a| a.id.as_str())
            .collect();
        tables
            .steps
            .iter()
            .filter(|s| attempt_ids.contains(s.attempt_id.as_str()))
            .count()
    }
}

fn clear_steps(tables: &mut Tables, attempt_ids: &BTreeSet<String>) {
    let step_ids: BTreeSet<String> = tables
        .steps
        .iter()
        .filter(|s| attempt_ids.contains(&s.attempt_id))
        .map(|s| s.id.clone())
        .collect();
    tables.steps.retain(|s| !step_ids.contains(&s.id));
    tables.step_data.retain(|d| !step_ids.contains(&d.step_id));
}

#[async_trait]
impl UsageStore for InMemoryUsageStore {
    async fn load_usage(
        &self,
        usage_id: &str,
        bank: &dyn QuestionBank,
        registry: Arc<BehaviourRegistry>,
    ) -> Result<Usage> {
        let (usage, attempts, steps, data) = {
            let tables = self.tables.read().await;
            let usage = tables
                .usages
                .iter()
                .find(|u| u.id == usage_id)
                .cloned()
                .with_context(|| format!("Question usage {} not found", usage_id))?;
            let attempts: Vec<AttemptRecord> = tables
                .attempts
                .iter()
                .filter(|a| a.usage_id == usage_id)
                .cloned()
                .collect();
            let attempt_ids: BTreeSet<&str> = attempts.iter().map(|a| a.id.as_str()).collect();
            let steps: Vec<StepRecord> = tables
                .steps
                .iter()
                .filter(|s| attempt_ids.contains(s.attempt_id.as_str()))
                .cloned()
                .collect();
            let step_ids: BTreeSet<&str> = steps.iter().map(|s| s.id.as_str()).collect();
            let data: Vec<StepDataRecord> = tables
                .step_data
                .iter()
                .filter(|d| step_ids.contains(d.step_id.as_str()))
                .cloned()
                .collect();
            (usage, attempts, steps, data)
        };
        assemble_usage(usage, attempts, steps, data, bank, registry).await
    }

    async fn save_usage(&self, usage: &mut Usage) -> Result<()> {
        let write = prepare_save(usage).context("Failed to prepare usage for saving")?;
        {
            let mut tables = self.tables.write().await;
            if let Some(record) = &write.usage {
                tables.usages.retain(|u| u.id != record.id);
                tables.usages.push(record.clone());
            }
            let cleared: BTreeSet<String> = write.cleared_attempts.iter().cloned().collect();
            clear_steps(&mut tables, &cleared);
            for record in write.new_attempts.iter().chain(write.updated_attempts.iter()) {
                tables.attempts.retain(|a| a.id != record.id);
                tables.attempts.push(record.clone());
            }
            tables.steps.extend(write.new_steps.iter().cloned());
            tables.step_data.extend(write.new_step_data.iter().cloned());
        }
        complete_save(usage, &write);
        Ok(())
    }

    async fn delete_usage(&self, usage_id: &str) -> Result<()> {
        let mut tables = self.tables.write().await;
        let attempt_ids: BTreeSet<String> = tables
            .attempts
            .iter()
            .filter(|a| a.usage_id == usage_id)
            .map(|a| a.id.clone())
            .collect();
        clear_steps(&mut tables, &attempt_ids);
        tables.attempts.retain(|a| a.usage_id != usage_id);
        tables.usages.retain(|u| u.id != usage_id);
        tracing::info!("Deleted usage {}", usage_id);
        Ok(())
    }

    async fn set_max_mark_in_attempts(
        &self,
        usage_ids: &[String],
        slot: u32,
        new_max_mark: f64,
    ) -> Result<u64> {
        track_store_operation("set_max_mark", async {
            let mut tables = self.tables.write().await;
            let mut changed = 0;
            for attempt in tables
                .attempts
                .iter_mut()
                .filter(|a| a.slot == slot && usage_ids.contains(&a.usage_id))
            {
                attempt.max_mark = new_max_mark;
                changed += 1;
            }
            Ok(changed)
        })
        .await
    }
}

/// Changes a stored usage would write on its next save.
pub fn pending_changes(usage: &Usage) -> Option<PendingChanges> {
    usage.observer().as_unit_of_work().map(UnitOfWork::snapshot)
}
