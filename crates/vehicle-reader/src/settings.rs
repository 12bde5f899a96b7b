//! Reader settings

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use obd_protocol::AdapterConfig;
use obd_scheduler::SchedulerConfig;
use serde::{Deserialize, Serialize};

/// Settings file read when no path is given
pub const DEFAULT_SETTINGS_FILE: &str = "vehicle-reader.toml";

/// Prefix of environment overrides, e.g. `VEHICLE_READER__ADAPTER__PORT`
pub const ENV_PREFIX: &str = "VEHICLE_READER";

/// Logging output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Maximum level: trace, debug, info, warn or error
    pub level: String,
    /// Emit JSON instead of plain text
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Everything the reader needs to run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Serial port and adapter timing
    pub adapter: AdapterConfig,
    /// Signals to poll
    pub poller: SchedulerConfig,
    /// Log output
    pub logging: LoggingConfig,
}

impl Settings {
    /// Load settings from an optional TOML file, then environment overrides
    ///
    /// A missing file is not an error; defaults apply.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let file = File::with_name(path.unwrap_or(DEFAULT_SETTINGS_FILE)).required(false);
        Self::from_builder(Config::builder().add_source(file))
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
