//! Configuration System using Figment
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. Built-in defaults (BCM pins 19-26, `data-dash` instance, 10/30/3 second windows)
//! 2. `config/beam_dash.toml` (or the path given with `--config`)
//! 3. Environment variables prefixed with `BEAM_DASH_`, nested with `__`
//! 4. `PROJECT_ID`, which selects the cloud project
//!
//! # Example
//! ```no_run
//! use beam_dash::config::DashConfig;
//!
//! let config = DashConfig::load()?;
//! println!("Instance: {}", config.bigtable.instance_id);
//! # Ok::<(), beam_dash::error::DashError>(())
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::path::Path;

use crate::error::{DashError, DashResult};
use crate::side::Side;

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "config/beam_dash.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DashConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Bigtable connection settings
    pub bigtable: BigtableConfig,
    /// Physical board layout
    pub board: BoardConfig,
    /// Debounce and rowkey timing windows, in seconds
    pub timing: TimingConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    pub log_format: String,
}

/// Bigtable configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BigtableConfig {
    /// Cloud project, normally supplied through `PROJECT_ID`
    pub project_id: Option<String>,
    /// Bigtable instance
    pub instance_id: String,
    /// Table receiving race rows
    pub races_table: String,
    /// Table mapping board addresses and tags to sides
    pub registry_table: String,
    /// Data API base URL
    pub endpoint: String,
    /// Static OAuth token; when unset the GCE metadata server is asked
    pub access_token: Option<String>,
    /// HTTP request timeout in milliseconds
    pub request_timeout_ms: u64,
}

/// Board wiring and loop pacing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    /// BCM pins, one per sensor; sensor ids are assigned 1.. in order
    pub pins: Vec<u8>,
    /// Address used as this board's registry key; discovered when unset
    pub address: Option<Ipv4Addr>,
    /// Side registered for a board the registry has never seen
    pub default_side: Side,
    /// Sleep between loop iterations in milliseconds
    pub poll_interval_ms: u64,
}

/// Timing windows
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Minimum time between two recorded broken events on one sensor
    pub debounce_secs: f64,
    /// Rowkey is cleared when no scan was accepted for this long
    pub rowkey_reset_secs: f64,
    /// Minimum time between RFID read attempts
    pub rfid_wait_secs: f64,
    /// Timestamps are subtracted from this so newer rows sort first
    pub max_value: f64,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "beam_dash".to_string(),
            log_level: "info".to_string(),
            log_format: "compact".to_string(),
        }
    }
}

impl Default for BigtableConfig {
    fn default() -> Self {
        Self {
            project_id: None,
            instance_id: "data-dash".to_string(),
            races_table: "races".to_string(),
            registry_table: "ip_addresses".to_string(),
            endpoint: "https://bigtable.googleapis.com".to_string(),
            access_token: None,
            request_timeout_ms: 10_000,
        }
    }
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            pins: (19..27).collect(),
            address: None,
            default_side: Side::LEFT,
            poll_interval_ms: 5,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            debounce_secs: 10.0,
            rowkey_reset_secs: 30.0,
            rfid_wait_secs: 3.0,
            max_value: 9_999_999_999.0,
        }
    }
}

impl DashConfig {
    /// Load configuration from the default path and the environment
    pub fn load() -> DashResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and the environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> DashResult<Self> {
        Ok(Self::figment(path.as_ref()).extract()?)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(DashConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("BEAM_DASH_").split("__"))
            .merge(
                Env::raw()
                    .only(&["PROJECT_ID"])
                    .map(|_| "bigtable.project_id".into()),
            )
    }

    /// Validate configuration after loading
    ///
    /// `require_project` is false when running against the in-memory store.
    pub fn validate(&self, require_project: bool) -> DashResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(DashError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.to_lowercase().as_str()) {
            return Err(DashError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        if self.board.pins.is_empty() {
            return Err(DashError::Configuration(
                "board.pins must list at least one sensor pin".to_string(),
            ));
        }

        if self.board.pins.len() > usize::from(u8::MAX) {
            return Err(DashError::Configuration(format!(
                "board.pins lists {} pins; at most {} sensors are supported",
                self.board.pins.len(),
                u8::MAX
            )));
        }

        let mut seen = HashSet::new();
        for pin in &self.board.pins {
            if !seen.insert(pin) {
                return Err(DashError::Configuration(format!("Duplicate pin: {}", pin)));
            }
        }

        let windows = [
            ("debounce_secs", self.timing.debounce_secs),
            ("rowkey_reset_secs", self.timing.rowkey_reset_secs),
            ("rfid_wait_secs", self.timing.rfid_wait_secs),
            ("max_value", self.timing.max_value),
        ];
        for (name, value) in windows {
            if !(value.is_finite() && value > 0.0) {
                return Err(DashError::Configuration(format!(
                    "timing.{} must be a positive number, got {}",
                    name, value
                )));
            }
        }

        if require_project
            && self
                .bigtable
                .project_id
                .as_deref()
                .map_or(true, |p| p.trim().is_empty())
        {
            return Err(DashError::Configuration(
                "PROJECT_ID is not set".to_string(),
            ));
        }

        Ok(())
    }

    /// The project id, or a configuration error when it is missing
    pub fn project_id(&self) -> DashResult<&str> {
        self.bigtable
            .project_id
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| DashError::Configuration("PROJECT_ID is not set".to_string()))
    }

    /// Sensor ids paired with their pins, ids starting at 1
    pub fn sensor_pins(&self) -> impl Iterator<Item = (u8, u8)> + '_ {
        self.board
            .pins
            .iter()
            .copied()
            .zip(1..=u8::MAX)
            .map(|(pin, id)| (id, pin))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn defaults_match_track_layout() {
        let config = DashConfig::default();
        assert_eq!(config.board.pins, vec![19, 20, 21, 22, 23, 24, 25, 26]);
        assert_eq!(config.bigtable.instance_id, "data-dash");
        assert_eq!(config.bigtable.races_table, "races");
        assert_eq!(config.bigtable.registry_table, "ip_addresses");
        assert_eq!(config.timing.debounce_secs, 10.0);
        assert_eq!(config.timing.rowkey_reset_secs, 30.0);
        assert_eq!(config.timing.rfid_wait_secs, 3.0);
        assert_eq!(config.timing.max_value, 9_999_999_999.0);
    }

    #[test]
    fn sensor_ids_start_at_one() {
        let config = DashConfig::default();
        let pairs: Vec<_> = config.sensor_pins().collect();
        assert_eq!(pairs.first(), Some(&(1, 19)));
        assert_eq!(pairs.last(), Some(&(8, 26)));
    }

    #[test]
    #[serial]
    fn file_and_env_layers_override_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [board]
            pins = [5, 6]
            default_side = 1

            [timing]
            debounce_secs = 2.5
            "#
        )
        .unwrap();

        std::env::set_var("PROJECT_ID", "race-project");
        std::env::set_var("BEAM_DASH_BIGTABLE__INSTANCE_ID", "other-instance");
        let config = DashConfig::load_from(file.path());
        std::env::remove_var("PROJECT_ID");
        std::env::remove_var("BEAM_DASH_BIGTABLE__INSTANCE_ID");

        let config = config.unwrap();
        assert_eq!(config.board.pins, vec![5, 6]);
        assert_eq!(config.board.default_side, Side::RIGHT);
        assert_eq!(config.timing.debounce_secs, 2.5);
        assert_eq!(config.timing.rowkey_reset_secs, 30.0);
        assert_eq!(config.bigtable.instance_id, "other-instance");
        assert_eq!(config.project_id().unwrap(), "race-project");
        assert!(config.validate(true).is_ok());
    }

    #[test]
    #[serial]
    fn missing_file_falls_back_to_defaults() {
        std::env::remove_var("PROJECT_ID");
        let config = DashConfig::load_from("does/not/exist.toml").unwrap();
        assert_eq!(config.board.pins.len(), 8);
        assert!(config.project_id().is_err());
    }

    #[test]
    fn missing_project_only_matters_when_required() {
        let config = DashConfig::default();
        assert!(config.validate(false).is_ok());
        assert!(config.validate(true).is_err());
    }

    #[test]
    fn duplicate_pins_are_rejected() {
        let mut config = DashConfig::default();
        config.board.pins = vec![19, 20, 19];
        assert!(config.validate(false).is_err());
    }

    #[test]
    fn too_many_pins_are_rejected() {
        let mut config = DashConfig::default();
        config.board.pins = (0..=u8::MAX).collect();
        assert!(config.validate(false).is_err());

        // Ids never wrap, even when validation is skipped
        let pairs: Vec<_> = config.sensor_pins().collect();
        assert_eq!(pairs.len(), 255);
        assert_eq!(pairs.last(), Some(&(255, 254)));

        config.board.pins.pop();
        assert!(config.validate(false).is_ok());
    }

    #[test]
    fn non_positive_windows_are_rejected() {
        let mut config = DashConfig::default();
        config.timing.rfid_wait_secs = 0.0;
        assert!(config.validate(false).is_err());
    }

    #[test]
    fn invalid_log_level_is_rejected() {
        let mut config = DashConfig::default();
        config.application.log_level = "loud".to_string();
        assert!(config.validate(false).is_err());
    }
}
