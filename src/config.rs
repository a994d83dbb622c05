use serde::Deserialize;
use time::{macros::format_description, Time, UtcOffset};

use crate::error::{ReconcileError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub iap: IAPConfig,
    pub entitlements: EntitlementConfig,
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IAPConfig {
    pub apple_shared_secret: String,
    pub apple_environment: String,
    pub google_package_name: String,
    #[serde(default)]
    pub google_service_account_key_path: Option<String>,
    pub request_timeout_ms: u64,
    pub retry_attempts: u8,
    /// Base delay between retries; the n-th retry waits n times this
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_apple_production_url")]
    pub apple_production_url: String,
    #[serde(default = "default_apple_sandbox_url")]
    pub apple_sandbox_url: String,
    #[serde(default = "default_google_api_base_url")]
    pub google_api_base_url: String,
}

fn default_retry_backoff_ms() -> u64 {
    200
}

fn default_apple_production_url() -> String {
    "https://buy.itunes.apple.com/verifyReceipt".to_string()
}

fn default_apple_sandbox_url() -> String {
    "https://sandbox.itunes.apple.com/verifyReceipt".to_string()
}

fn default_google_api_base_url() -> String {
    "https://androidpublisher.googleapis.com/androidpublisher/v3/applications".to_string()
}

/// Balances a user falls back to when a membership ends
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct EntitlementConfig {
    pub default_point: i32,
    pub default_ai_point: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    /// Wall-clock time of the daily sweep, "HH:MM"
    pub run_at: String,
    /// Fixed offset the wall-clock time is interpreted in, "+09:00"
    pub utc_offset: String,
    #[serde(default)]
    pub run_on_start: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub json: bool,
}

impl ScheduleConfig {
    pub fn run_at_time(&self) -> Result<Time> {
        Time::parse(&self.run_at, format_description!("[hour]:[minute]")).map_err(|e| {
            ReconcileError::Config(format!("schedule.run_at '{}': {}", self.run_at, e))
        })
    }

    pub fn offset(&self) -> Result<UtcOffset> {
        UtcOffset::parse(
            &self.utc_offset,
            format_description!("[offset_hour sign:mandatory]:[offset_minute]"),
        )
        .map_err(|e| {
            ReconcileError::Config(format!("schedule.utc_offset '{}': {}", self.utc_offset, e))
        })
    }
}

impl Config {
    pub fn load() -> std::result::Result<Self, config::ConfigError> {
        // Load .env file if it exists (for environment variable overrides)
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(true))
            .add_source(
                config::Environment::with_prefix("ENTITLEMENTS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
