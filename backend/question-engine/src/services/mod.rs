use crate::behaviours::BehaviourRegistry;
use crate::config::Config;
use mongodb::{Client as MongoClient, Database};
use std::sync::Arc;

use self::mongo_store::MongoUsageStore;
use self::question_bank::MongoQuestionBank;
use self::regrade_service::RegradeService;

pub struct EngineState {
    pub config: Config,
    pub mongo_client: MongoClient,
    pub mongo: Database,
    pub registry: Arc<BehaviourRegistry>,
}

impl EngineState {
    pub async fn new(config: Config, mongo_client: MongoClient) -> anyhow::Result<Self> {
        let registry = Arc::new(BehaviourRegistry::with_defaults());
        registry
            .make_archetypal(&config.engine.preferred_behaviour)
            .map_err(|e| anyhow::anyhow!("Invalid preferred behaviour: {}", e))?;

        let mongo = mongo_client.database(&config.mongo_database);
        mongo
            .run_command(mongodb::bson::doc! { "ping": 1 })
            .await
            .map_err(|e| anyhow::anyhow!("MongoDB ping failed: {}", e))?;
        tracing::info!("MongoDB connection established successfully");

        Ok(Self {
            config,
            mongo_client,
            mongo,
            registry,
        })
    }

    pub fn usage_store(&self) -> MongoUsageStore {
        MongoUsageStore::new(self.mongo_client.clone(), self.mongo.clone())
    }

    pub fn question_bank(&self) -> MongoQuestionBank {
        MongoQuestionBank::new(self.mongo.clone())
    }

    pub fn regrade_service(&self) -> RegradeService {
        RegradeService::new(
            Arc::new(self.usage_store()),
            Arc::new(self.question_bank()),
            Arc::clone(&self.registry),
            self.config.engine.regrade_batch_size,
        )
    }
}

pub mod mongo_store;
pub mod question_bank;
pub mod regrade_service;
pub mod usage_store;
