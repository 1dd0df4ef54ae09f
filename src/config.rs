//! Patrol configuration loaded from `patrol.toml`.
//!
//! [`PatrolConfig`] holds every tunable policy value of the engine.
//! Values missing from the file fall back to sensible defaults.
//! The `PATROL_DATABASE` environment variable takes precedence over the file
//! for the database path.

use std::path::{Path, PathBuf};

use chrono::{Duration, FixedOffset};
use serde::Deserialize;

use crate::error::{PatrolError, Result};

pub const DEFAULT_CONFIG_FILE: &str = "patrol.toml";
pub const DATABASE_ENV: &str = "PATROL_DATABASE";

/// Top-level configuration loaded from `patrol.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct PatrolConfig {
    /// Path of the SQLite database holding all attendance state.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// How far back an out-of-zone sample looks for an in-zone anchor.
    #[serde(default = "default_debounce_window_secs")]
    pub debounce_window_secs: u64,

    /// How far back the sweep looks for expired active assignments.
    #[serde(default = "default_sweep_window_secs")]
    pub sweep_window_secs: u64,

    #[serde(default = "default_job_interval_secs")]
    pub sweep_interval_secs: u64,

    #[serde(default = "default_job_interval_secs")]
    pub refresh_interval_secs: u64,

    #[serde(default = "default_job_interval_secs")]
    pub alert_interval_secs: u64,

    /// Offset applied to sample timestamps that carry no zone designator.
    #[serde(default)]
    pub local_utc_offset_minutes: i32,

    /// Default `tracing` filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("patrol.sqlite")
}

// Five minutes.
fn default_debounce_window_secs() -> u64 {
    300
}

// Two hours.
fn default_sweep_window_secs() -> u64 {
    7200
}

fn default_job_interval_secs() -> u64 {
    60
}

fn default_log_filter() -> String {
    "patrol=info".to_string()
}

impl Default for PatrolConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            debounce_window_secs: default_debounce_window_secs(),
            sweep_window_secs: default_sweep_window_secs(),
            sweep_interval_secs: default_job_interval_secs(),
            refresh_interval_secs: default_job_interval_secs(),
            alert_interval_secs: default_job_interval_secs(),
            local_utc_offset_minutes: 0,
            log_filter: default_log_filter(),
        }
    }
}

impl PatrolConfig {
    /// Loads the configuration from `path`, or defaults if the file is absent.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<PatrolConfig>(&contents)?
        } else {
            Self::default()
        };

        if let Ok(db) = std::env::var(DATABASE_ENV) {
            if !db.is_empty() {
                config.database_path = PathBuf::from(db);
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.local_offset().is_none() {
            return Err(PatrolError::Config(format!(
                "local_utc_offset_minutes out of range: {}",
                self.local_utc_offset_minutes
            )));
        }
        for (name, secs) in [
            ("sweep_interval_secs", self.sweep_interval_secs),
            ("refresh_interval_secs", self.refresh_interval_secs),
            ("alert_interval_secs", self.alert_interval_secs),
        ] {
            if secs == 0 {
                return Err(PatrolError::Config(format!("{name} must be positive")));
            }
        }
        Ok(())
    }

    pub fn debounce_window(&self) -> Duration {
        seconds(self.debounce_window_secs)
    }

    pub fn sweep_window(&self) -> Duration {
        seconds(self.sweep_window_secs)
    }

    pub fn local_offset(&self) -> Option<FixedOffset> {
        FixedOffset::east_opt(self.local_utc_offset_minutes.checked_mul(60)?)
    }
}

fn seconds(secs: u64) -> Duration {
    Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX / 1000))
}
