//! Layered settings: defaults, TOML file, environment, command line

use config::{Config, ConfigError, Environment, File, FileFormat};
use obd_poller::PollerConfig;
use obd_protocol::ConnectOptions;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Settings file looked up in the working directory when none is given
pub const DEFAULT_CONFIG_FILE: &str = "lap-timer-obd";

/// Prefix of environment overrides, e.g. `LAP_TIMER_OBD_POLL__INTERVAL_MS`
pub const ENV_PREFIX: &str = "LAP_TIMER_OBD";

/// Polling loop settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    /// Delay between two polls in milliseconds
    pub interval_ms: u64,
    /// Delay before reconnecting after the car went away
    pub reconnect_delay_secs: u64,
    /// Commands to try during discovery, empty for all
    pub watch: Vec<String>,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval_ms: 125,
            reconnect_delay_secs: 5,
            watch: Vec::new(),
        }
    }
}

impl PollSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            watch: self.watch.clone(),
        }
    }
}

/// Complete application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub connection: ConnectOptions,
    pub poll: PollSettings,
    /// One of trace, debug, info, warn, error
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            connection: ConnectOptions::default(),
            poll: PollSettings::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from `path`, or from `lap-timer-obd.toml` if it exists,
    /// then apply `LAP_TIMER_OBD_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, ENV_PREFIX)
    }

    fn load_with_env(path: Option<&Path>, prefix: &str) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        Config::builder()
            .add_source(Config::try_from(&Settings::default())?)
            .add_source(file)
            .add_source(
                Environment::with_prefix(prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("poll.watch")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Settings from a TOML document layered over the defaults
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Config::try_from(&Settings::default())?)
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    pub fn log_level(&self) -> Result<Level, ConfigError> {
        self.log_level
            .parse()
            .map_err(|_| ConfigError::Message(format!("invalid log level: {}", self.log_level)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obd_protocol::ObdProtocol;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.connection.device, "/dev/ttyS3");
        assert_eq!(settings.connection.baud_rate, 38400);
        assert_eq!(settings.connection.protocol, ObdProtocol::Auto);
        assert!(settings.connection.fast);
        assert!(settings.connection.start_low_power);
        assert_eq!(settings.poll.interval(), Duration::from_millis(125));
        assert_eq!(settings.poll.reconnect_delay(), Duration::from_secs(5));
        assert_eq!(settings.log_level().unwrap(), Level::INFO);
    }

    #[test]
    fn test_toml_overrides_keep_defaults() {
        let settings = Settings::from_toml(
            r#"
            log_level = "debug"

            [connection]
            device = "/dev/ttyUSB0"
            protocol = "6"
            fast = false

            [poll]
            interval_ms = 50
            watch = ["RPM", "SPEED"]
            "#,
        )
        .unwrap();

        assert_eq!(settings.connection.device, "/dev/ttyUSB0");
        assert_eq!(settings.connection.protocol, ObdProtocol::Iso15765_4Can11bit500);
        assert!(!settings.connection.fast);
        assert_eq!(settings.connection.baud_rate, 38400);
        assert_eq!(settings.connection.timeout_ms, 2000);
        assert_eq!(settings.poll.interval_ms, 50);
        assert_eq!(settings.poll.reconnect_delay_secs, 5);
        assert_eq!(settings.poll.poller_config().watch, vec!["RPM", "SPEED"]);
        assert_eq!(settings.log_level().unwrap(), Level::DEBUG);
    }

    #[test]
    fn test_protocol_by_name() {
        let settings = Settings::from_toml("[connection]\nprotocol = \"ISO9141-2\"").unwrap();
        assert_eq!(settings.connection.protocol, ObdProtocol::Iso9141_2);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(Settings::from_toml("[connection]\nprotocol = \"Z\"").is_err());

        let settings = Settings::from_toml("log_level = \"loud\"").unwrap();
        assert!(settings.log_level().is_err());
    }

    #[test]
    fn test_environment_overrides() {
        // Own prefix so parallel tests never see these variables
        let prefix = "LAP_TIMER_OBD_ENV_TEST";
        let vars = [
            ("CONNECTION__DEVICE", "/dev/ttyUSB9"),
            ("CONNECTION__PROTOCOL", "6"),
            ("POLL__WATCH", "RPM,SPEED"),
            ("LOG_LEVEL", "debug"),
        ];
        for (key, value) in vars {
            std::env::set_var(format!("{}_{}", prefix, key), value);
        }

        let settings = Settings::load_with_env(None, prefix);
        for (key, _) in vars {
            std::env::remove_var(format!("{}_{}", prefix, key));
        }
        let settings = settings.unwrap();

        assert_eq!(settings.connection.device, "/dev/ttyUSB9");
        assert_eq!(settings.connection.protocol, ObdProtocol::Iso15765_4Can11bit500);
        assert_eq!(settings.poll.watch, vec!["RPM", "SPEED"]);
        assert_eq!(settings.log_level().unwrap(), Level::DEBUG);
        // Untouched keys keep their defaults
        assert_eq!(settings.connection.baud_rate, 38400);
        assert!(settings.connection.start_low_power);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let path = Path::new("/nonexistent/lap-timer-obd.toml");
        assert!(Settings::load(Some(path)).is_err());
    }
}
