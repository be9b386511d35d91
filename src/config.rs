use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use validator::Validate;

use crate::models::rma::{Disposition, ReturnCondition};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_DOCK_LOCATION_CODE: &str = "DOCK";
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;
const CONFIG_DIR: &str = "config";
const ENV_PREFIX: &str = "WAREHOUSE";

/// Disposition mapping for inspected return items.
///
/// Which inspection conditions put stock back into the ledger is a site
/// policy, not core logic, so it is configuration with conservative
/// defaults: only sellable stock re-enters available inventory.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ReturnsConfig {
    #[serde(default = "default_sellable_disposition")]
    pub sellable: Disposition,
    #[serde(default)]
    pub damaged: Disposition,
    #[serde(default)]
    pub scrap: Disposition,
    #[serde(default)]
    pub quarantine: Disposition,
}

impl Default for ReturnsConfig {
    fn default() -> Self {
        Self {
            sellable: Disposition::Restock,
            damaged: Disposition::RecordOnly,
            scrap: Disposition::RecordOnly,
            quarantine: Disposition::RecordOnly,
        }
    }
}

impl ReturnsConfig {
    pub fn disposition_for(&self, condition: ReturnCondition) -> Disposition {
        match condition {
            ReturnCondition::Sellable => self.sellable,
            ReturnCondition::Damaged => self.damaged,
            ReturnCondition::Scrap => self.scrap,
            ReturnCondition::Quarantine => self.quarantine,
        }
    }
}

/// Application configuration with validation.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Deployment environment name (development, test, production).
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Log level filter passed to the tracing subscriber.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Location code of the transient receiving dock in each warehouse.
    /// Received stock lands here before put-away moves it into storage.
    #[validate(length(min = 1, max = 32))]
    #[serde(default = "default_dock_location_code")]
    pub dock_location_code: String,

    /// Buffer size of the domain event channel.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Condition-to-disposition policy for return inspection.
    #[serde(default)]
    pub returns: ReturnsConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            log_level: default_log_level(),
            dock_location_code: default_dock_location_code(),
            event_channel_capacity: default_event_channel_capacity(),
            returns: ReturnsConfig::default(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from `config/default.toml`, an environment
    /// specific overlay, and `WAREHOUSE_*` environment variables, in that
    /// order of precedence.
    pub fn load() -> Result<Self, ConfigError> {
        let environment =
            std::env::var(format!("{}_ENVIRONMENT", ENV_PREFIX)).unwrap_or_else(|_| DEFAULT_ENV.into());

        let mut builder = Config::builder()
            .set_default("environment", environment.clone())?
            .set_default("log_level", DEFAULT_LOG_LEVEL)?
            .set_default("dock_location_code", DEFAULT_DOCK_LOCATION_CODE)?
            .set_default("event_channel_capacity", DEFAULT_EVENT_CHANNEL_CAPACITY as i64)?;

        let default_file = Path::new(CONFIG_DIR).join("default.toml");
        if default_file.exists() {
            builder = builder.add_source(File::from(default_file));
        }
        let env_file = Path::new(CONFIG_DIR).join(format!("{}.toml", environment));
        if env_file.exists() {
            builder = builder.add_source(File::from(env_file));
        }

        let settings: AppConfig = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;

        settings
            .validate()
            .map_err(|e| ConfigError::Message(format!("invalid configuration: {}", e)))?;

        Ok(settings)
    }
}

fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_dock_location_code() -> String {
    DEFAULT_DOCK_LOCATION_CODE.to_string()
}

fn default_event_channel_capacity() -> usize {
    DEFAULT_EVENT_CHANNEL_CAPACITY
}

fn default_sellable_disposition() -> Disposition {
    Disposition::Restock
}
