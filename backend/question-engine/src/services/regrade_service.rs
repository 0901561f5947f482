use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;

use crate::behaviours::BehaviourRegistry;
use crate::models::state::QuestionState;
use crate::questions::QuestionBank;
use crate::services::usage_store::UsageStore;

/// Before/after figures for one regraded slot.
#[derive(Debug, Clone, Serialize)]
pub struct SlotRegrade {
    pub slot: u32,
    pub old_state: QuestionState,
    pub new_state: QuestionState,
    pub old_mark: Option<f64>,
    pub new_mark: Option<f64>,
}

impl SlotRegrade {
    pub fn changed(&self) -> bool {
        self.old_state != self.new_state || self.old_mark != self.new_mark
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UsageRegrade {
    pub usage_id: String,
    pub slots: Vec<SlotRegrade>,
}

#[derive(Debug, Default, Serialize)]
pub struct RegradeReport {
    pub regraded: Vec<UsageRegrade>,
    pub failed: Vec<(String, String)>,
}

/// Loads stored usages, replays every started attempt against the current
/// question definitions and saves the result.
pub struct RegradeService {
    store: Arc<dyn UsageStore>,
    bank: Arc<dyn QuestionBank>,
    registry: Arc<BehaviourRegistry>,
    batch_size: usize,
}

impl RegradeService {
    pub fn new(
        store: Arc<dyn UsageStore>,
        bank: Arc<dyn QuestionBank>,
        registry: Arc<BehaviourRegistry>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            bank,
            registry,
            batch_size: batch_size.max(1),
        }
    }

    pub async fn regrade_usage(&self, usage_id: &str) -> Result<UsageRegrade> {
        let mut usage = self
            .store
            .load_usage(usage_id, self.bank.as_ref(), Arc::clone(&self.registry))
            .await
            .with_context(|| format!("Failed to load usage {}", usage_id))?;

        let started: Vec<(u32, QuestionState, Option<f64>)> = usage
            .attempts()
            .filter(|attempt| attempt.num_steps() > 0)
            .map(|attempt| (attempt.slot(), attempt.state(), attempt.mark()))
            .collect();

        usage
            .regrade_all_questions()
            .with_context(|| format!("Failed to regrade usage {}", usage_id))?;

        let mut slots = Vec::with_capacity(started.len());
        for (slot, old_state, old_mark) in started {
            let attempt = usage.attempt(slot)?;
            slots.push(SlotRegrade {
                slot,
                old_state,
                new_state: attempt.state(),
                old_mark,
                new_mark: attempt.mark(),
            });
        }

        self.store
            .save_usage(&mut usage)
            .await
            .with_context(|| format!("Failed to save regraded usage {}", usage_id))?;

        let changed = slots.iter().filter(|s| s.changed()).count();
        tracing::info!(
            "Regraded usage {}: {} slots, {} changed",
            usage_id,
            slots.len(),
            changed
        );

        Ok(UsageRegrade {
            usage_id: usage_id.to_string(),
            slots,
        })
    }

    /// Regrades usages in batches. A failing usage is reported and does not
    /// stop the others.
    pub async fn regrade_usages(&self, usage_ids: &[String]) -> RegradeReport {
        let mut report = RegradeReport::default();
        for (batch_no, batch) in usage_ids.chunks(self.batch_size).enumerate() {
            tracing::debug!("Regrading batch {} ({} usages)", batch_no + 1, batch.len());
            let results =
                futures::future::join_all(batch.iter().map(|id| self.regrade_usage(id))).await;
            for (usage_id, result) in batch.iter().zip(results) {
                match result {
                    Ok(regrade) => report.regraded.push(regrade),
                    Err(e) => {
                        tracing::error!("Regrade of usage {} failed: {:#}", usage_id, e);
                        report.failed.push((usage_id.clone(), format!("{:#}", e)));
                    }
                }
            }
        }
        report
    }

    /// Changes the max mark of `slot` in stored attempts without replaying
    /// them. Marks follow because they are derived from the fraction.
    pub async fn set_max_mark(
        &self,
        usage_ids: &[String],
        slot: u32,
        new_max_mark: f64,
    ) -> Result<u64> {
        if !new_max_mark.is_finite() || new_max_mark < 0.0 {
            anyhow::bail!("Max mark must be a non-negative number, got {}", new_max_mark);
        }
        let mut changed = 0;
        for batch in usage_ids.chunks(self.batch_size) {
            changed += self
                .store
                .set_max_mark_in_attempts(batch, slot, new_max_mark)
                .await?;
        }
        tracing::info!(
            "Max mark of slot {} set to {} in {} attempts",
            slot,
            new_max_mark,
            changed
        );
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::usage::Usage;
    use crate::questions::{InMemoryQuestionBank, TrueFalseQuestion};
    use crate::services::usage_store::InMemoryUsageStore;
    use std::collections::BTreeMap;

    async fn stored_usage(
        store: &InMemoryUsageStore,
        bank: &InMemoryQuestionBank,
        registry: Arc<BehaviourRegistry>,
    ) -> String {
        bank.insert(Arc::new(TrueFalseQuestion::new("tf", "Sky is blue", true)));
        let question = bank.load_question("tf").await.unwrap();
        let mut usage = Usage::new("test", "ctx", "deferredfeedback", registry).unwrap();
        usage.add_question(question, Some(2.0));
        usage.start_all_questions(None, None).unwrap();
        let data = BTreeMap::from([("answer".to_string(), "1".to_string())]);
        usage.process_action(1, data, None, Some("u1")).unwrap();
        usage.finish_all_questions(None, None).unwrap();
        store.save_usage(&mut usage).await.unwrap();
        usage.id().to_string()
    }

    #[tokio::test]
    async fn test_regrade_reports_unchanged_marks() {
        let store = Arc::new(InMemoryUsageStore::new());
        let bank = Arc::new(InMemoryQuestionBank::new());
        let registry = Arc::new(BehaviourRegistry::with_defaults());
        let usage_id = stored_usage(&store, &bank, Arc::clone(&registry)).await;

        let service = RegradeService::new(store.clone(), bank.clone(), registry, 10);
        let report = service
            .regrade_usages(&[usage_id.clone(), "missing".to_string()])
            .await;

        assert_eq!(report.regraded.len(), 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "missing");

        let slot = &report.regraded[0].slots[0];
        assert_eq!(slot.old_state, QuestionState::GradedCorrect);
        assert!(!slot.changed());
        assert_eq!(slot.new_mark, Some(2.0));
        assert_eq!(store.step_count(&usage_id).await, 3);
    }

    #[tokio::test]
    async fn test_set_max_mark_rejects_negative() {
        let store = Arc::new(InMemoryUsageStore::new());
        let bank = Arc::new(InMemoryQuestionBank::new());
        let registry = Arc::new(BehaviourRegistry::with_defaults());
        let service = RegradeService::new(store, bank, registry, 10);

        assert!(service.set_max_mark(&[], 1, -1.0).await.is_err());
        assert_eq!(service.set_max_mark(&[], 1, 5.0).await.unwrap(), 0);
    }
}
