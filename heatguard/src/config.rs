//! Startup configuration.
//!
//! Loaded once from a TOML file and validated eagerly. Detection
//! thresholds have no defaults: a missing or non-numeric `high` in either
//! source section is a [`Error::Configuration`] and stops startup before
//! any component is built.
//!
//! ```toml
//! [room]
//! high = 50
//! max_rate_per_minute = 10
//!
//! [printer]
//! high = 300
//! max_rate_per_minute = 100
//!
//! [fan]
//! auto_recovery_secs = 30
//! fans = ["fan1"]
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::reading::SourceKind;

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "HEATGUARD_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "heatguard.toml";

const DEFAULT_ROOM_MAX_RATE: f64 = 10.0;
const DEFAULT_PRINTER_MAX_RATE: f64 = 100.0;

/// Limits applied to one kind of source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceLimits {
    /// Overheat threshold (°C). Readings strictly above it violate.
    pub high: f64,

    /// Thermal-runaway threshold (°C per minute). Rates strictly above it
    /// violate.
    pub max_rate_per_minute: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub room: SourceLimits,
    pub printer: SourceLimits,
}

impl Thresholds {
    pub fn for_kind(&self, kind: SourceKind) -> &SourceLimits {
        match kind {
            SourceKind::Room => &self.room,
            SourceKind::Printer => &self.printer,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HysteresisConfig {
    /// Consecutive safe readings required before an alert resolves.
    pub safe_required: u32,
}

impl Default for HysteresisConfig {
    fn default() -> Self {
        Self { safe_required: 3 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FanConfig {
    /// How long a thermal-runaway override holds before clearing itself.
    pub auto_recovery_secs: u64,

    /// Fan identifiers hosted by the fan-controller process.
    pub fans: Vec<String>,
}

impl Default for FanConfig {
    fn default() -> Self {
        Self {
            auto_recovery_secs: 30,
            fans: vec!["fan1".to_string()],
        }
    }
}

impl FanConfig {
    pub fn auto_recovery(&self) -> Duration {
        Duration::from_secs(self.auto_recovery_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub dump_interval_secs: u64,
    pub directory: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            dump_interval_secs: 120,
            directory: PathBuf::from("persistence"),
        }
    }
}

impl PersistenceConfig {
    pub fn dump_interval(&self) -> Duration {
        Duration::from_secs(self.dump_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Publisher workers draining the command queue.
    pub workers: usize,

    /// Commands that may wait in the queue before new ones are dropped.
    pub queue_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub host: String,
    pub port: u16,
    /// MQTT client identifier. Each binary supplies its own default.
    pub client_id: Option<String>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub thresholds: Thresholds,
    pub hysteresis: HysteresisConfig,
    pub fan: FanConfig,
    pub persistence: PersistenceConfig,
    pub dispatch: DispatchConfig,
    pub bus: BusConfig,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    room: Option<RawLimits>,
    printer: Option<RawLimits>,
    #[serde(default)]
    hysteresis: HysteresisConfig,
    #[serde(default)]
    fan: FanConfig,
    #[serde(default)]
    persistence: PersistenceConfig,
    #[serde(default)]
    dispatch: DispatchConfig,
    #[serde(default)]
    bus: BusConfig,
}

#[derive(Debug, Deserialize)]
struct RawLimits {
    high: Option<toml::Value>,
    #[serde(alias = "maxRatePerMinute")]
    max_rate_per_minute: Option<toml::Value>,
}

impl Config {
    /// Path from [`CONFIG_PATH_ENV`], or `heatguard.toml` in the working
    /// directory.
    pub fn path_from_env() -> PathBuf {
        std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let raw: RawConfig =
            toml::from_str(text).map_err(|e| Error::Configuration(e.to_string()))?;

        let thresholds = Thresholds {
            room: limits("room", raw.room, DEFAULT_ROOM_MAX_RATE)?,
            printer: limits("printer", raw.printer, DEFAULT_PRINTER_MAX_RATE)?,
        };

        if raw.hysteresis.safe_required == 0 {
            return Err(Error::Configuration(
                "'safe_required' in 'hysteresis' must be at least 1".into(),
            ));
        }
        if raw.fan.auto_recovery_secs == 0 {
            return Err(Error::Configuration(
                "'auto_recovery_secs' in 'fan' must be positive".into(),
            ));
        }
        if raw.fan.fans.is_empty() {
            return Err(Error::Configuration("'fans' in 'fan' must not be empty".into()));
        }
        if raw.persistence.dump_interval_secs == 0 {
            return Err(Error::Configuration(
                "'dump_interval_secs' in 'persistence' must be positive".into(),
            ));
        }
        if raw.dispatch.workers == 0 || raw.dispatch.queue_capacity == 0 {
            return Err(Error::Configuration(
                "'workers' and 'queue_capacity' in 'dispatch' must be positive".into(),
            ));
        }

        Ok(Self {
            thresholds,
            hysteresis: raw.hysteresis,
            fan: raw.fan,
            persistence: raw.persistence,
            dispatch: raw.dispatch,
            bus: raw.bus,
        })
    }
}

fn limits(section: &str, raw: Option<RawLimits>, default_rate: f64) -> Result<SourceLimits> {
    let raw = raw.ok_or_else(|| Error::Configuration(format!("missing '{section}' section")))?;

    let high = raw
        .high
        .ok_or_else(|| Error::Configuration(format!("missing 'high' in '{section}' section")))?;
    let high = numeric(section, "high", &high)?;

    let max_rate_per_minute = match raw.max_rate_per_minute {
        Some(value) => numeric(section, "max_rate_per_minute", &value)?,
        None => default_rate,
    };

    Ok(SourceLimits {
        high,
        max_rate_per_minute,
    })
}

fn numeric(section: &str, key: &str, value: &toml::Value) -> Result<f64> {
    let number = match value {
        toml::Value::Integer(i) => *i as f64,
        toml::Value::Float(f) => *f,
        _ => {
            return Err(Error::Configuration(format!(
                "'{key}' in '{section}' must be numeric"
            )));
        }
    };

    if !number.is_finite() {
        return Err(Error::Configuration(format!(
            "'{key}' in '{section}' must be finite"
        )));
    }

    Ok(number)
}
