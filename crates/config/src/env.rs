use quarry_common::error::{QuarryError, QuarryResult};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub blob_root: String,
    pub blob_bucket: String,
    pub log_level: String,
    pub schedule_interval_secs: u64,
    pub max_deliver: u32,
    pub alert_webhook_url: Option<String>,
}

impl AppConfig {
    /// Load configuration from environment variables.
    /// Loads `.env` file if present, then reads required vars.
    pub fn from_env() -> QuarryResult<Self> {
        // Best-effort .env load; ignore if missing
        let _ = dotenvy::dotenv();

        Ok(Self {
            database_url: get_var("DATABASE_URL")?,
            blob_root: get_var_or("BLOB_ROOT", "/var/lib/quarry/blobs"),
            blob_bucket: get_var_or("BLOB_BUCKET", "documents"),
            log_level: get_var_or("LOG_LEVEL", "info"),
            schedule_interval_secs: get_var_or("SCHEDULE_INTERVAL_SECS", "60")
                .parse()
                .map_err(|e| QuarryError::Config(format!("invalid SCHEDULE_INTERVAL_SECS: {e}")))?,
            max_deliver: get_var_or("SYNC_MAX_DELIVER", "5")
                .parse()
                .map_err(|e| QuarryError::Config(format!("invalid SYNC_MAX_DELIVER: {e}")))?,
            alert_webhook_url: env::var("ALERT_WEBHOOK_URL").ok(),
        })
    }
}

fn get_var(key: &str) -> QuarryResult<String> {
    env::var(key).map_err(|_| QuarryError::Config(format!("{key} is required but not set")))
}

fn get_var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}
