//! Configuration System using Figment
//!
//! This module provides strongly-typed configuration loading for a tool run.
//! Configuration is loaded from:
//! 1. a TOML file (base configuration)
//! 2. Environment variables (prefixed with `HIOKI_`, nested keys split on `__`)
//!
//! Every section except `[host]` is optional; an absent section means "leave the
//! instrument as it is".
//!
//! # Example
//! ```no_run
//! use hioki_daq::config::Settings;
//!
//! let settings = Settings::load_from("config/hioki.toml")?;
//! println!("Instrument at {}:{}", settings.host.host, settings.host.port);
//! # Ok::<(), hioki_daq::error::DaqError>(())
//! ```

use crate::error::{AppResult, DaqError};
use crate::scripting::SandboxMode;
use crate::sequencer::{PatternValue, SequenceSpec};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationSettings,
    /// Instrument address
    pub host: HostSettings,
    /// Reset behaviour
    #[serde(default)]
    pub system: SystemSettings,
    /// Front panel display
    #[serde(default)]
    pub display: DisplaySettings,
    /// Measurement setup
    #[serde(default)]
    pub measure: MeasureSettings,
    /// Panel memory
    #[serde(default)]
    pub panel: PanelSettings,
    /// On-screen label
    #[serde(default)]
    pub label: LabelSettings,
    /// Sampling run; no run section means configure only
    #[serde(default)]
    pub run: Option<RunSettings>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationSettings {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Directory for run files and saved script results
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            output_dir: default_output_dir(),
        }
    }
}

/// Network address of the instrument
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSettings {
    /// Host name or IP address
    #[serde(default = "default_host")]
    pub host: String,
    /// TCP port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Connect and read budget in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl HostSettings {
    /// Connect and read budget.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// System section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemSettings {
    /// Send `*RST` before anything else
    #[serde(default)]
    pub reset: bool,
}

/// Display section; values are passed through to the device
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DisplaySettings {
    /// Backlight 0 to 100
    pub brightness: Option<String>,
    /// Screen view
    pub view: Option<String>,
    /// Display on/off
    pub state: Option<String>,
    /// Display type
    #[serde(alias = "type")]
    pub kind: Option<String>,
}

/// Measure section; values are passed through to the device
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeasureSettings {
    /// Range value or MAX/MIN/DEFault
    pub voltage_range: Option<String>,
    /// Auto-range on/off
    pub voltage_range_auto: Option<String>,
    /// Integration speed
    pub speed: Option<String>,
    /// Samples per trigger
    pub sample_count: Option<String>,
    /// Number format
    pub format: Option<String>,
    /// Continuous triggering
    pub continuous: Option<String>,
    /// Automatic input impedance
    #[serde(alias = "impedence_auto")]
    pub impedance_auto: Option<String>,
    /// Read temperature alongside voltage
    #[serde(default)]
    pub temperature: bool,
}

/// Panel section; `load` wins when both are set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PanelSettings {
    /// Panel number to recall
    pub load: Option<String>,
    /// Panel number to store
    pub save: Option<String>,
}

/// Label section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LabelSettings {
    /// Label on/off
    pub state: Option<String>,
    /// Label text, strftime directives allowed
    pub text: Option<String>,
}

/// Run section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSettings {
    /// Number of samples to take
    #[serde(default = "default_samples")]
    pub samples: u32,
    /// Seconds between samples
    #[serde(default = "default_polling_rate")]
    pub polling_rate: f64,
    /// Write the settings snapshot at the top of the run file
    #[serde(default)]
    pub settings_dump: bool,
    /// End the run once a non-looping IO sequence finishes
    #[serde(default)]
    pub stop_when_sequence_done: bool,
    /// Output pattern sequence
    #[serde(default)]
    pub io_sequence: Option<IoSequenceSettings>,
    /// Script to run instead of the sampling loop
    #[serde(default)]
    pub script: Option<ScriptSettings>,
}

impl RunSettings {
    /// Interval between samples.
    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs_f64(self.polling_rate)
    }
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            samples: default_samples(),
            polling_rate: default_polling_rate(),
            settings_dump: false,
            stop_when_sequence_done: false,
            io_sequence: None,
            script: None,
        }
    }
}

/// Declarative IO sequence: either `range` or `values`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IoSequenceSettings {
    /// `[start, stop, step]`, stop inclusive
    pub range: Option<[i64; 3]>,
    /// Explicit patterns, integers or `"0b..."` strings
    pub values: Option<Vec<PatternValue>>,
    /// Start over after the last pattern
    #[serde(default, rename = "loop")]
    pub looping: bool,
    /// Samples taken on each pattern before advancing
    #[serde(default = "default_samples_per_step")]
    pub samples_per_step: u32,
}

impl IoSequenceSettings {
    /// The sequence source this section describes.
    pub fn spec(&self) -> AppResult<SequenceSpec> {
        match (&self.range, &self.values) {
            (Some([start, stop, step]), None) => Ok(SequenceSpec::Range {
                start: *start,
                stop: *stop,
                step: *step,
            }),
            (None, Some(values)) => Ok(SequenceSpec::List(values.clone())),
            _ => Err(DaqError::Configuration(
                "io_sequence needs exactly one of 'range' or 'values'".into(),
            )),
        }
    }
}

/// Script section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptSettings {
    /// Rhai script file
    pub path: PathBuf,
    /// Capability tier
    #[serde(default)]
    pub mode: SandboxMode,
    /// Wall-clock budget in seconds
    #[serde(default = "default_script_timeout_secs")]
    pub timeout_secs: u64,
    /// Save non-empty results when the script ends, even on failure
    #[serde(default = "default_true")]
    pub autosave: bool,
}

impl ScriptSettings {
    /// Wall-clock budget.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_host() -> String {
    "192.168.1.200".to_string()
}

fn default_port() -> u16 {
    23
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_samples() -> u32 {
    10
}

fn default_polling_rate() -> f64 {
    1.0
}

fn default_samples_per_step() -> u32 {
    1
}

fn default_script_timeout_secs() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

const ENV_PREFIX: &str = "HIOKI_";

impl Settings {
    /// Load configuration from a TOML file and environment variables
    ///
    /// Environment variables override the file, e.g. `HIOKI_HOST__HOST=10.0.0.5`.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings: Settings = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse configuration from TOML text, without environment overrides.
    pub fn from_toml_str(toml: &str) -> AppResult<Self> {
        let settings: Settings = Figment::from(Toml::string(toml)).extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.host.host.trim().is_empty() {
            return Err(DaqError::Configuration("host must not be empty".into()));
        }
        if self.host.port == 0 {
            return Err(DaqError::Configuration("port must be non-zero".into()));
        }
        if self.host.timeout_secs == 0 {
            return Err(DaqError::Configuration("timeout_secs must be positive".into()));
        }

        if let Some(run) = &self.run {
            if run.samples == 0 {
                return Err(DaqError::Configuration("run.samples must be at least 1".into()));
            }
            if !run.polling_rate.is_finite() || run.polling_rate < 0.0 {
                return Err(DaqError::Configuration(format!(
                    "Invalid polling_rate {}. Must be a non-negative number of seconds",
                    run.polling_rate
                )));
            }
            if let Some(io) = &run.io_sequence {
                io.spec()?;
                if io.samples_per_step == 0 {
                    return Err(DaqError::Configuration(
                        "io_sequence.samples_per_step must be at least 1".into(),
                    ));
                }
            }
            if let Some(script) = &run.script {
                if script.timeout_secs == 0 {
                    return Err(DaqError::Configuration(
                        "script.timeout_secs must be positive".into(),
                    ));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const FULL: &str = r#"
[application]
log_level = "debug"
output_dir = "out"

[host]
host = "10.0.0.7"
port = 23
timeout_secs = 5

[system]
reset = true

[display]
brightness = "50"
type = "1"

[measure]
voltage_range = "10"
speed = "FAST"
impedence_auto = "ON"
temperature = true

[label]
text = "R%d"

[run]
samples = 16
polling_rate = 0.5
settings_dump = true

[run.io_sequence]
values = [1, "0b10", "4"]
loop = true
samples_per_step = 2
"#;

    #[test]
    fn test_parse_full_config() {
        let settings = Settings::from_toml_str(FULL).unwrap();
        assert_eq!(settings.host.host, "10.0.0.7");
        assert_eq!(settings.host.timeout(), Duration::from_secs(5));
        assert!(settings.system.reset);
        assert_eq!(settings.display.kind.as_deref(), Some("1"));
        assert_eq!(settings.measure.impedance_auto.as_deref(), Some("ON"));
        assert!(settings.measure.temperature);

        let run = settings.run.unwrap();
        assert_eq!(run.samples, 16);
        assert_eq!(run.polling_interval(), Duration::from_millis(500));
        let io = run.io_sequence.unwrap();
        assert!(io.looping);
        assert_eq!(io.samples_per_step, 2);
        assert!(matches!(io.spec().unwrap(), SequenceSpec::List(v) if v.len() == 3));
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::from_toml_str("[host]\n").unwrap();
        assert_eq!(settings.host.host, "192.168.1.200");
        assert_eq!(settings.host.port, 23);
        assert_eq!(settings.host.timeout_secs, 10);
        assert_eq!(settings.application.output_dir, PathBuf::from("data"));
        assert!(settings.run.is_none());
    }

    #[test]
    fn test_missing_host_section() {
        assert!(Settings::from_toml_str("[system]\nreset = true\n").is_err());
    }

    #[test]
    fn test_invalid_log_level() {
        let result = Settings::from_toml_str("[application]\nlog_level = \"loud\"\n[host]\n");
        assert!(matches!(result, Err(DaqError::Configuration(_))));
    }

    #[test]
    fn test_sequence_needs_one_source() {
        let toml = r#"
[host]
[run.io_sequence]
range = [0, 7, 1]
values = [1]
"#;
        assert!(Settings::from_toml_str(toml).is_err());
    }

    #[test]
    fn test_script_section() {
        let toml = r#"
[host]
[run.script]
path = "sweep.rhai"
mode = "trusted"
"#;
        let settings = Settings::from_toml_str(toml).unwrap();
        let script = settings.run.unwrap().script.unwrap();
        assert_eq!(script.mode, SandboxMode::Trusted);
        assert_eq!(script.timeout(), Duration::from_secs(300));
        assert!(script.autosave);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FULL.as_bytes()).unwrap();
        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.application.log_level, "debug");
    }
}
