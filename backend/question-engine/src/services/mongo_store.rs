use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::doc;
use mongodb::{Client, ClientSession, Collection, Database};
use std::sync::Arc;

use super::usage_store::{
    abort_save, assemble_usage, complete_save, prepare_save, UsageStore, UsageWrite,
};
use crate::behaviours::BehaviourRegistry;
use crate::engine::usage::Usage;
use crate::metrics::track_store_operation;
use crate::models::records::{AttemptRecord, StepDataRecord, StepRecord, UsageRecord};
use crate::questions::QuestionBank;

const USAGES: &str = "question_usages";
const ATTEMPTS: &str = "question_attempts";
const STEPS: &str = "question_attempt_steps";
const STEP_DATA: &str = "question_attempt_step_data";

/// Usage store backed by MongoDB. Every save runs in one transaction, so
/// the deployment has to be a replica set.
#[derive(Clone)]
pub struct MongoUsageStore {
    client: Client,
    mongo: Database,
}

impl MongoUsageStore {
    pub fn new(client: Client, mongo: Database) -> Self {
        Self { client, mongo }
    }

    fn usages(&self) -> Collection<UsageRecord> {
        self.mongo.collection(USAGES)
    }

    fn attempts(&self) -> Collection<AttemptRecord> {
        self.mongo.collection(ATTEMPTS)
    }

    fn steps(&self) -> Collection<StepRecord> {
        self.mongo.collection(STEPS)
    }

    fn step_data(&self) -> Collection<StepDataRecord> {
        self.mongo.collection(STEP_DATA)
    }

    async fn begin(&self) -> Result<ClientSession> {
        let mut session = self
            .client
            .start_session()
            .await
            .context("Failed to start MongoDB session")?;
        session
            .start_transaction()
            .await
            .context("Failed to start transaction")?;
        Ok(session)
    }

    async fn step_ids_for(
        &self,
        attempt_ids: &[String],
        session: &mut ClientSession,
    ) -> Result<Vec<String>> {
        let mut cursor = self
            .steps()
            .find(doc! { "attempt_id": { "$in": attempt_ids.to_vec() } })
            .session(&mut *session)
            .await
            .context("Failed to find attempt steps")?;
        let steps: Vec<StepRecord> = cursor
            .stream(&mut *session)
            .try_collect()
            .await
            .context("Failed to collect attempt steps")?;
        Ok(steps.into_iter().map(|step| step.id).collect())
    }

    async fn delete_steps_of(
        &self,
        attempt_ids: &[String],
        session: &mut ClientSession,
    ) -> Result<()> {
        if attempt_ids.is_empty() {
            return Ok(());
        }
        let step_ids = self.step_ids_for(attempt_ids, session).await?;
        if step_ids.is_empty() {
            return Ok(());
        }
        self.step_data()
            .delete_many(doc! { "step_id": { "$in": step_ids.clone() } })
            .session(&mut *session)
            .await
            .context("Failed to delete step data")?;
        self.steps()
            .delete_many(doc! { "_id": { "$in": step_ids } })
            .session(&mut *session)
            .await
            .context("Failed to delete steps")?;
        Ok(())
    }

    async fn write_rows(&self, write: &UsageWrite, session: &mut ClientSession) -> Result<()> {
        if let Some(usage) = &write.usage {
            if write.usage_is_new {
                self.usages()
                    .insert_one(usage)
                    .session(&mut *session)
                    .await
                    .context("Failed to insert question usage")?;
            } else {
                self.usages()
                    .replace_one(doc! { "_id": usage.id.as_str() }, usage)
                    .session(&mut *session)
                    .await
                    .context("Failed to update question usage")?;
            }
        }

        self.delete_steps_of(&write.cleared_attempts, session).await?;

        if !write.new_attempts.is_empty() {
            self.attempts()
                .insert_many(&write.new_attempts)
                .session(&mut *session)
                .await
                .context("Failed to insert question attempts")?;
        }
        for attempt in &write.updated_attempts {
            self.attempts()
                .replace_one(doc! { "_id": attempt.id.as_str() }, attempt)
                .session(&mut *session)
                .await
                .with_context(|| format!("Failed to update question attempt {}", attempt.id))?;
        }

        if !write.new_steps.is_empty() {
            self.steps()
                .insert_many(&write.new_steps)
                .session(&mut *session)
                .await
                .context("Failed to insert attempt steps")?;
        }
        if !write.new_step_data.is_empty() {
            self.step_data()
                .insert_many(&write.new_step_data)
                .session(&mut *session)
                .await
                .context("Failed to insert step data")?;
        }
        Ok(())
    }

    async fn delete_rows(&self, usage_id: &str, session: &mut ClientSession) -> Result<()> {
        let mut cursor = self
            .attempts()
            .find(doc! { "usage_id": usage_id })
            .session(&mut *session)
            .await
            .context("Failed to query question attempts")?;
        let attempts: Vec<AttemptRecord> = cursor
            .stream(&mut *session)
            .try_collect()
            .await
            .context("Failed to collect question attempts")?;
        let attempt_ids: Vec<String> = attempts.into_iter().map(|a| a.id).collect();

        self.delete_steps_of(&attempt_ids, session).await?;
        self.attempts()
            .delete_many(doc! { "usage_id": usage_id })
            .session(&mut *session)
            .await
            .context("Failed to delete question attempts")?;
        self.usages()
            .delete_one(doc! { "_id": usage_id })
            .session(&mut *session)
            .await
            .context("Failed to delete question usage")?;
        Ok(())
    }
}

/// Commits on success, aborts otherwise. The original error wins over an
/// abort failure.
async fn finish_transaction(mut session: ClientSession, result: Result<()>) -> Result<()> {
    match result {
        Ok(()) => session
            .commit_transaction()
            .await
            .context("Failed to commit transaction"),
        Err(e) => {
            if let Err(abort_err) = session.abort_transaction().await {
                tracing::error!("Failed to abort transaction: {}", abort_err);
            }
            Err(e)
        }
    }
}

#[async_trait]
impl UsageStore for MongoUsageStore {
    async fn load_usage(
        &self,
        usage_id: &str,
        bank: &dyn QuestionBank,
        registry: Arc<BehaviourRegistry>,
    ) -> Result<Usage> {
        let (usage, attempts, steps, data) = track_store_operation("load_usage", async {
            let usage = self
                .usages()
                .find_one(doc! { "_id": usage_id })
                .await
                .context("Failed to query question usage")?
                .with_context(|| format!("Question usage {} not found", usage_id))?;

            let attempts: Vec<AttemptRecord> = self
                .attempts()
                .find(doc! { "usage_id": usage_id })
                .sort(doc! { "slot": 1 })
                .await
                .context("Failed to query question attempts")?
                .try_collect()
                .await
                .context("Failed to collect question attempts")?;

            let attempt_ids: Vec<String> = attempts.iter().map(|a| a.id.clone()).collect();
            let steps: Vec<StepRecord> = self
                .steps()
                .find(doc! { "attempt_id": { "$in": attempt_ids } })
                .sort(doc! { "attempt_id": 1, "sequence_number": 1 })
                .await
                .context("Failed to query attempt steps")?
                .try_collect()
                .await
                .context("Failed to collect attempt steps")?;

            let step_ids: Vec<String> = steps.iter().map(|s| s.id.clone()).collect();
            let data: Vec<StepDataRecord> = self
                .step_data()
                .find(doc! { "step_id": { "$in": step_ids.clone() } })
                .await
                .context("Failed to query step data")?
                .try_collect()
                .await
                .context("Failed to collect step data")?;

            Ok((usage, attempts, steps, data))
        })
        .await?;

        tracing::info!(
            "Loaded usage {} with {} attempts and {} steps",
            usage_id,
            attempts.len(),
            steps.len()
        );
        assemble_usage(usage, attempts, steps, data, bank, registry).await
    }

    async fn save_usage(&self, usage: &mut Usage) -> Result<()> {
        let write = prepare_save(usage).context("Failed to prepare usage for saving")?;
        if !write.is_empty() {
            let written = track_store_operation("save_usage", async {
                let mut session = self.begin().await?;
                let result = self.write_rows(&write, &mut session).await;
                finish_transaction(session, result).await
            })
            .await;
            if let Err(e) = written {
                abort_save(usage, write);
                return Err(e);
            }
        }
        complete_save(usage, &write);
        Ok(())
    }

    async fn delete_usage(&self, usage_id: &str) -> Result<()> {
        track_store_operation("delete_usage", async {
            let mut session = self.begin().await?;
            let result = self.delete_rows(usage_id, &mut session).await;
            finish_transaction(session, result).await
        })
        .await?;
        tracing::info!("Deleted usage {}", usage_id);
        Ok(())
    }

    async fn set_max_mark_in_attempts(
        &self,
        usage_ids: &[String],
        slot: u32,
        new_max_mark: f64,
    ) -> Result<u64> {
        let result = track_store_operation("set_max_mark", async {
            self.attempts()
                .update_many(
                    doc! { "usage_id": { "$in": usage_ids.to_vec() }, "slot": slot as i64 },
                    doc! { "$set": { "max_mark": new_max_mark } },
                )
                .await
                .context("Failed to update attempt max marks")
        })
        .await?;
        tracing::info!(
            "Set max mark {} for slot {} in {} attempts",
            new_max_mark,
            slot,
            result.modified_count
        );
        Ok(result.modified_count)
    }
}
