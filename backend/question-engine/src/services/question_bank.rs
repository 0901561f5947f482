use anyhow::{Context, Result};
use async_trait::async_trait;
use mongodb::bson::doc;
use mongodb::{Collection, Database};
use std::sync::Arc;

use crate::engine::error::EngineError;
use crate::metrics::track_store_operation;
use crate::questions::{Question, QuestionBank, QuestionDefinition};

/// Question bank reading stored definitions from the `questions` collection.
#[derive(Clone)]
pub struct MongoQuestionBank {
    mongo: Database,
}

impl MongoQuestionBank {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    fn questions(&self) -> Collection<QuestionDefinition> {
        self.mongo.collection("questions")
    }

    pub async fn save_question(&self, id: &str, definition: &QuestionDefinition) -> Result<()> {
        track_store_operation("save_question", async {
            self.questions()
                .replace_one(doc! { "_id": id }, definition)
                .upsert(true)
                .await
                .with_context(|| format!("Failed to save question {}", id))
        })
        .await?;
        tracing::info!("Saved question {}", id);
        Ok(())
    }
}

#[async_trait]
impl QuestionBank for MongoQuestionBank {
    async fn load_question(&self, question_id: &str) -> Result<Arc<dyn Question>> {
        let definition = track_store_operation("load_question", async {
            self.questions()
                .find_one(doc! { "_id": question_id })
                .await
                .with_context(|| format!("Failed to query question {}", question_id))
        })
        .await?
        .ok_or_else(|| EngineError::QuestionNotFound(question_id.to_string()))?;

        Ok(definition.into_question())
    }
}
