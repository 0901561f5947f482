use serde::Deserialize;
use std::env;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct EngineSettings {
    #[validate(length(min = 1, message = "Preferred behaviour must not be empty"))]
    pub preferred_behaviour: String,
    #[validate(range(min = 1, max = 1000, message = "Regrade batch size must be 1-1000"))]
    pub regrade_batch_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub mongo_uri: String,
    pub mongo_database: String,
    pub flag_secret: String,
    pub engine: EngineSettings,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Root .env first (two levels up), then the local one
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        let env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let mongo_uri = settings
            .get_string("database.mongo_uri")
            .or_else(|_| env::var("MONGO_URI"))
            .unwrap_or_else(|_| "mongodb://localhost:27017".to_string());

        let mongo_database = settings
            .get_string("database.mongo_database")
            .or_else(|_| env::var("MONGO_DATABASE"))
            .unwrap_or_else(|_| "trainingground".to_string());

        let flag_secret = match settings
            .get_string("engine.flag_secret")
            .or_else(|_| env::var("FLAG_SECRET"))
        {
            Ok(secret) => secret,
            Err(_) if env == "prod" => {
                return Err(config::ConfigError::Message(
                    "FLAG_SECRET must be set in production".to_string(),
                ));
            }
            Err(_) => {
                eprintln!("WARNING: Using default FLAG_SECRET (dev mode only!)");
                "dev-flag-secret-only-for-local-testing".to_string()
            }
        };

        let preferred_behaviour = settings
            .get_string("engine.preferred_behaviour")
            .or_else(|_| env::var("PREFERRED_BEHAVIOUR"))
            .unwrap_or_else(|_| "deferredfeedback".to_string());

        let regrade_batch_size = match settings
            .get_string("engine.regrade_batch_size")
            .or_else(|_| env::var("REGRADE_BATCH_SIZE"))
        {
            Ok(raw) => raw.trim().parse::<usize>().map_err(|_| {
                config::ConfigError::Message(format!("Invalid REGRADE_BATCH_SIZE '{}'", raw))
            })?,
            Err(_) => 50,
        };

        let engine = EngineSettings {
            preferred_behaviour,
            regrade_batch_size,
        };
        engine
            .validate()
            .map_err(|e| config::ConfigError::Message(format!("Invalid engine settings: {}", e)))?;

        Ok(Config {
            mongo_uri,
            mongo_database,
            flag_secret,
            engine,
        })
    }
}
