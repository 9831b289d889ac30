//! Configuration for the `laser_tune` tool.
//!
//! Settings are layered with figment:
//! 1. Built-in defaults ([`TuneConfig::default`])
//! 2. A TOML file (optional)
//! 3. Environment variables prefixed with `LASER_TUNE_`; nested keys use `__`,
//!    e.g. `LASER_TUNE_LINK__PORT=/dev/ttyUSB0` or `LASER_TUNE_TIMEOUTS__LINE_S=2.5`
//!
//! ```toml
//! [link]
//! port = "/dev/ttyUSB0"
//! baud_rate = 115200
//!
//! [trial]
//! duration_s = 30.0
//! apply_gains = true
//!
//! [tuning]
//! iterations = 40
//! desired_output = 0.75
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::logging::{parse_log_level, parse_output_format};
use crate::protocol::frame::normalize_command_id;
use crate::trial::{GainLimits, TrialSettings};
use crate::transport::LinkOptions;
use crate::tuning::SearchSpace;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "LASER_TUNE_";

/// Top-level tool configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TuneConfig {
    pub link: LinkConfig,
    pub timeouts: TimeoutConfig,
    pub trial: TrialConfig,
    pub tuning: TuningConfig,
    pub logging: LoggingConfig,
}

/// Serial link settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Port path; may also be given on the command line.
    pub port: Option<String>,
    pub baud_rate: u32,
    /// Two hex digits.
    pub default_command_id: String,
    pub log_data_lines: bool,
    pub data_log_every: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 115_200,
            default_command_id: "00".to_string(),
            log_data_lines: false,
            data_log_every: 50,
        }
    }
}

/// Timeouts, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request/response exchanges (GET_PID, SET_PID, acks).
    pub command_s: f64,
    /// Each telemetry line during a trial.
    pub line_s: f64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            command_s: 2.0,
            line_s: 5.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrialConfig {
    /// Total time budget per trial; unbounded when absent.
    pub duration_s: Option<f64>,
    pub stop_on_done: bool,
    /// Write candidate gains with SET_PID before each trial.
    pub apply_gains: bool,
}

impl Default for TrialConfig {
    fn default() -> Self {
        Self {
            duration_s: None,
            stop_on_done: true,
            apply_gains: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningConfig {
    pub iterations: usize,
    pub kp_max: f64,
    pub ki_max: f64,
    pub kd_max: f64,
    /// Process value trials are scored against.
    pub desired_output: f64,
    /// Seed for the random search.
    pub seed: u64,
    pub history_path: PathBuf,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            iterations: 20,
            kp_max: 1.0,
            ki_max: 1.0,
            kd_max: 0.2,
            desired_output: 0.8,
            seed: 42,
            history_path: PathBuf::from("tuning_history.csv"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error.
    pub level: String,
    /// pretty, compact or json.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl TuneConfig {
    /// Load defaults, then `path` (if given), then the environment, and validate.
    ///
    /// A path that does not exist is an error; omit it to run on defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(TuneConfig::default()));

        if let Some(path) = path {
            if !path.exists() {
                bail!("Config file not found: {}", path.display());
            }
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::from_figment(figment)
    }

    /// Extract and validate from a prepared figment.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: TuneConfig = figment
            .extract()
            .context("Failed to extract configuration")?;
        config
            .validate()
            .context("Configuration validation failed")?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        parse_log_level(&self.logging.level).map_err(anyhow::Error::msg)?;
        parse_output_format(&self.logging.format).map_err(anyhow::Error::msg)?;

        let id = &self.link.default_command_id;
        if id.trim().len() != 2 {
            bail!("link.default_command_id must be 2 hex digits, got '{}'", id);
        }
        normalize_command_id(id)
            .with_context(|| format!("Invalid link.default_command_id '{}'", id))?;

        if self.link.baud_rate == 0 {
            bail!("link.baud_rate must be positive");
        }
        if self.link.data_log_every == 0 {
            bail!("link.data_log_every must be at least 1");
        }

        for (name, value) in [
            ("timeouts.command_s", self.timeouts.command_s),
            ("timeouts.line_s", self.timeouts.line_s),
            ("tuning.kp_max", self.tuning.kp_max),
            ("tuning.ki_max", self.tuning.ki_max),
            ("tuning.kd_max", self.tuning.kd_max),
        ] {
            if !(value.is_finite() && value > 0.0) {
                bail!("{} must be a positive number, got {}", name, value);
            }
        }
        if let Some(duration) = self.trial.duration_s {
            if !(duration.is_finite() && duration > 0.0) {
                bail!("trial.duration_s must be a positive number, got {}", duration);
            }
        }
        if !self.tuning.desired_output.is_finite() {
            bail!("tuning.desired_output must be finite");
        }
        if self.tuning.iterations == 0 {
            bail!("tuning.iterations must be at least 1");
        }

        Ok(())
    }

    pub fn link_options(&self) -> LinkOptions {
        LinkOptions {
            default_command_id: self.link.default_command_id.clone(),
            log_data_lines: self.link.log_data_lines,
            data_log_every: self.link.data_log_every,
        }
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeouts.command_s)
    }

    pub fn line_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeouts.line_s)
    }

    pub fn gain_limits(&self) -> GainLimits {
        GainLimits {
            kp_max: self.tuning.kp_max,
            ki_max: self.tuning.ki_max,
            kd_max: self.tuning.kd_max,
        }
    }

    pub fn trial_settings(&self) -> TrialSettings {
        TrialSettings {
            limits: self.gain_limits(),
            command_timeout: self.command_timeout(),
            line_timeout: self.line_timeout(),
            duration_budget: self.trial.duration_s.map(Duration::from_secs_f64),
            stop_on_done: self.trial.stop_on_done,
            apply_gains: self.trial.apply_gains,
        }
    }

    pub fn search_space(&self) -> SearchSpace {
        SearchSpace::pid_gains(self.tuning.kp_max, self.tuning.ki_max, self.tuning.kd_max)
    }
}
