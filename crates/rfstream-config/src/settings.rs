//! Stream settings file format.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use rfstream_core::{Backoff, SAMPLE_RATE, SAMPLES_PER_STEP, StreamConfig};

use crate::error::ConfigError;
use crate::validation::{ValidationResult, validate_settings};

/// Wait policy as written in a settings file.
///
/// ```toml
/// [backoff]
/// kind = "sleep"
/// sleep_us = 50
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffSettings {
    /// Busy-spin on every attempt.
    Spin,
    /// Spin for `spin_limit` attempts, then yield.
    SpinThenYield {
        /// Attempts that spin before yielding starts.
        #[serde(default = "default_spin_limit")]
        spin_limit: u32,
    },
    /// Sleep a fixed interval on every attempt.
    Sleep {
        /// Sleep interval in microseconds.
        sleep_us: u64,
    },
}

fn default_spin_limit() -> u32 {
    64
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self::SpinThenYield {
            spin_limit: default_spin_limit(),
        }
    }
}

impl From<BackoffSettings> for Backoff {
    fn from(settings: BackoffSettings) -> Self {
        match settings {
            BackoffSettings::Spin => Backoff::Spin,
            BackoffSettings::SpinThenYield { spin_limit } => Backoff::SpinThenYield { spin_limit },
            BackoffSettings::Sleep { sleep_us } => Backoff::Sleep(Duration::from_micros(sleep_us)),
        }
    }
}

/// Stream construction settings.
///
/// Every key is optional; missing keys take the defaults below.
///
/// # TOML Format
///
/// ```toml
/// sample_rate = 625000000
/// max_channels = 128
/// command_capacity = 1024
/// output_capacity = 1048576
/// steps_per_page = 16
/// time_offset = 0
/// time_unit_hz = 1e9
/// strict = false
///
/// [backoff]
/// kind = "spin_then_yield"
/// spin_limit = 64
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamSettings {
    /// Output samples per second. Also the WAV header rate for renders.
    pub sample_rate: u64,

    /// Channel-table capacity.
    pub max_channels: usize,

    /// Command ring slots.
    pub command_capacity: usize,

    /// Output ring samples.
    pub output_capacity: usize,

    /// Steps generated between stop-flag checks.
    pub steps_per_page: usize,

    /// Initial global time offset for start triggers.
    pub time_offset: i64,

    /// Ticks per second of the global time unit (1e9 = nanoseconds).
    pub time_unit_hz: f64,

    /// Global time per step. Derived from `sample_rate` and `time_unit_hz`
    /// when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_time: Option<f64>,

    /// Latch the first rejected command as a fault.
    pub strict: bool,

    /// Wait policy on full or empty rings.
    pub backoff: BackoffSettings,
}

impl Default for StreamSettings {
    fn default() -> Self {
        let core = StreamConfig::default();
        Self {
            sample_rate: SAMPLE_RATE,
            max_channels: core.max_channels,
            command_capacity: core.command_capacity,
            output_capacity: core.output_capacity,
            steps_per_page: core.steps_per_page,
            time_offset: core.time_offset,
            time_unit_hz: 1e9,
            step_time: None,
            strict: core.strict,
            backoff: BackoffSettings::default(),
        }
    }
}

impl StreamSettings {
    /// Load settings from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
        Self::from_toml(&content)
    }

    /// Load settings from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Save the settings to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::create_dir(parent, e))?;
        }
        let content = self.to_toml()?;
        std::fs::write(path, content).map_err(|e| ConfigError::write_file(path, e))?;
        Ok(())
    }

    /// Convert the settings to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Global time one step spans.
    pub fn step_time(&self) -> f64 {
        self.step_time.unwrap_or_else(|| {
            SAMPLES_PER_STEP as f64 * self.time_unit_hz / self.sample_rate as f64
        })
    }

    /// Check every key against its allowed range.
    pub fn validate(&self) -> ValidationResult<()> {
        validate_settings(self)
    }

    /// Validate and convert into the core stream configuration.
    pub fn to_stream_config(&self) -> Result<StreamConfig, ConfigError> {
        self.validate()?;
        Ok(StreamConfig {
            max_channels: self.max_channels,
            command_capacity: self.command_capacity,
            output_capacity: self.output_capacity,
            steps_per_page: self.steps_per_page,
            step_time: self.step_time(),
            time_offset: self.time_offset,
            strict: self.strict,
            backoff: self.backoff.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_core() {
        let settings = StreamSettings::default();
        let config = settings.to_stream_config().unwrap();
        assert_eq!(config, StreamConfig::default());
    }

    #[test]
    fn empty_file_is_all_defaults() {
        assert_eq!(
            StreamSettings::from_toml("").unwrap(),
            StreamSettings::default()
        );
    }

    #[test]
    fn step_time_derives_from_rates() {
        let settings = StreamSettings {
            sample_rate: 1_000_000,
            time_unit_hz: 1e6,
            ..StreamSettings::default()
        };
        assert_eq!(settings.step_time(), 32.0);

        let explicit = StreamSettings {
            step_time: Some(7.5),
            ..settings
        };
        assert_eq!(explicit.step_time(), 7.5);
    }

    #[test]
    fn backoff_table_parses() {
        let settings = StreamSettings::from_toml(
            r#"
            max_channels = 16
            [backoff]
            kind = "sleep"
            sleep_us = 250
            "#,
        )
        .unwrap();
        assert_eq!(settings.max_channels, 16);
        assert_eq!(
            Backoff::from(settings.backoff),
            Backoff::Sleep(Duration::from_micros(250))
        );

        let spin: StreamSettings = toml::from_str("[backoff]\nkind = \"spin_then_yield\"").unwrap();
        assert_eq!(spin.backoff, BackoffSettings::default());
    }

    #[test]
    fn toml_round_trip() {
        let settings = StreamSettings {
            strict: true,
            time_offset: -500,
            backoff: BackoffSettings::Spin,
            ..StreamSettings::default()
        };
        let parsed = StreamSettings::from_toml(&settings.to_toml().unwrap()).unwrap();
        assert_eq!(parsed, settings);
    }

    #[test]
    fn invalid_settings_do_not_convert() {
        let settings = StreamSettings {
            command_capacity: 0,
            ..StreamSettings::default()
        };
        assert!(matches!(
            settings.to_stream_config(),
            Err(ConfigError::Validation(_))
        ));
    }
}
