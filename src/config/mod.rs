use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub environment: String,
    pub port: u16,
    pub database_url: String,
    pub max_connections: u32,
    pub log_level: String,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Interval of the buy-offer matching sweep.
    pub match_interval_secs: u64,
    /// Interval of the offer expiry sweep.
    pub expiry_interval_secs: u64,
    /// Interval of the matched-trade promotion sweep.
    pub promotion_interval_secs: u64,
    /// Per-cycle cap on offers handled by the expiry sweep.
    pub expiry_batch_size: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            match_interval_secs: 10,
            expiry_interval_secs: 30,
            promotion_interval_secs: 30,
            expiry_batch_size: 500,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if it exists

        Ok(Config {
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()?,
            database_url: env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            max_connections: env::var("MAX_CONNECTIONS")
                .unwrap_or_else(|_| "50".to_string())
                .parse()
                .unwrap_or(50),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            scheduler: SchedulerConfig {
                match_interval_secs: env::var("MATCH_INTERVAL_SECS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
                expiry_interval_secs: env::var("EXPIRY_INTERVAL_SECS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .unwrap_or(30),
                promotion_interval_secs: env::var("PROMOTION_INTERVAL_SECS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .unwrap_or(30),
                expiry_batch_size: env::var("EXPIRY_BATCH_SIZE")
                    .unwrap_or_else(|_| "500".to_string())
                    .parse()
                    .unwrap_or(500),
            },
        })
    }
}
