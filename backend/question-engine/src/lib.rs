//! Question engine for TrainingGround: question attempts driven by
//! pluggable behaviours, grouped into usages and persisted in MongoDB.

pub mod behaviours;
pub mod config;
pub mod engine;
pub mod metrics;
pub mod models;
pub mod questions;
pub mod services;
pub mod utils;

pub use config::Config;
pub use engine::{Attempt, EngineError, EngineResult, Usage};
pub use services::EngineState;
