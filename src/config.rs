use crate::error::Error;
use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const MIB: u64 = 1024 * 1024;
pub const GIB: u64 = 1024 * MIB;

/// Upper bound for every hour-valued setting (ten years).
pub const MAX_HOURS: f64 = 24.0 * 365.0 * 10.0;
/// Upper bound for `activity_grace_minutes` (one week).
pub const MAX_ACTIVITY_GRACE_MINUTES: u64 = 7 * 24 * 60;

static CONFIG_FILE_NAME: &str = "SessionJanitor";
static ENV_PREFIX: &str = "SESSION_JANITOR";

/// Points awarded by each eviction factor. Kept as data so the ranking can be
/// tuned from configuration without touching the scoring code.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ScoringWeights {
    /// Age beyond twice the cleanup delay.
    pub age_overdue: u32,
    /// Age at or beyond the cleanup delay.
    pub age_due: u32,
    pub oversized: u32,
    pub large: u32,
    pub inactive: u32,
    pub abandoned: u32,
    pub empty: u32,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            age_overdue: 1000,
            age_due: 500,
            oversized: 800,
            large: 200,
            inactive: 300,
            abandoned: 600,
            empty: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Volume root holding the `uploads`, `processing` and `downloads` trees.
    pub root_path: PathBuf,
    /// Where session archives are written. Defaults to `<root_path>/_archive`.
    pub archive_root: Option<PathBuf>,
    pub archive_before_delete: bool,
    pub cleanup_delay_hours: f64,
    pub warn_percent: f64,
    pub critical_percent: f64,
    /// How far below `warn_percent` the monitor starts emitting info alerts.
    pub info_margin_percent: f64,
    pub max_session_bytes: u64,
    pub warn_session_bytes: u64,
    pub monitor_interval_seconds: u64,
    /// Let the monitoring loop run a bounded cleanup at warning level, not only alert.
    pub auto_cleanup_on_warning: bool,
    pub registry_retention_hours: f64,
    pub registry_max_entries: usize,
    /// Skip deleting sessions touched within this many minutes. 0 disables the check.
    pub activity_grace_minutes: u64,
    /// Glob patterns for entries under a category root that are never sessions.
    pub ignore_patterns: Vec<String>,
    pub weights: ScoringWeights,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_path: PathBuf::from("./storage"),
            archive_root: None,
            archive_before_delete: false,
            cleanup_delay_hours: 8.0,
            warn_percent: 85.0,
            critical_percent: 95.0,
            info_margin_percent: 5.0,
            max_session_bytes: GIB,
            warn_session_bytes: 500 * MIB,
            monitor_interval_seconds: 300,
            auto_cleanup_on_warning: false,
            registry_retention_hours: 24.0,
            registry_max_entries: 1000,
            activity_grace_minutes: 0,
            ignore_patterns: vec![".*".to_string(), "*.tmp".to_string()],
            weights: ScoringWeights::default(),
        }
    }
}

impl StorageConfig {
    pub fn with_root(root_path: impl Into<PathBuf>) -> Self {
        Self {
            root_path: root_path.into(),
            ..Self::default()
        }
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.archive_root
            .clone()
            .unwrap_or_else(|| self.root_path.join("_archive"))
    }

    pub fn validate(&self) -> Result<(), Error> {
        let invalid = |msg: String| Err(Error::Config(ConfigError::Message(msg)));

        if !(0.0..=100.0).contains(&self.warn_percent)
            || !(0.0..=100.0).contains(&self.critical_percent)
        {
            return invalid(format!(
                "thresholds must be within 0-100 (warn={}, critical={})",
                self.warn_percent, self.critical_percent
            ));
        }
        if self.warn_percent >= self.critical_percent {
            return invalid(format!(
                "warn_percent ({}) must be below critical_percent ({})",
                self.warn_percent, self.critical_percent
            ));
        }
        if self.warn_session_bytes > self.max_session_bytes {
            return invalid(format!(
                "warn_session_bytes ({}) must not exceed max_session_bytes ({})",
                self.warn_session_bytes, self.max_session_bytes
            ));
        }
        for (name, hours) in [
            ("cleanup_delay_hours", self.cleanup_delay_hours),
            ("registry_retention_hours", self.registry_retention_hours),
        ] {
            if !(0.0..=MAX_HOURS).contains(&hours) {
                return invalid(format!("{} must be within 0-{} ({})", name, MAX_HOURS, hours));
            }
        }
        if self.activity_grace_minutes > MAX_ACTIVITY_GRACE_MINUTES {
            return invalid(format!(
                "activity_grace_minutes must not exceed {} ({})",
                MAX_ACTIVITY_GRACE_MINUTES, self.activity_grace_minutes
            ));
        }
        if self.monitor_interval_seconds == 0 {
            return invalid("monitor_interval_seconds must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// Load configuration from built-in defaults, an optional `SessionJanitor.toml`
/// and `SESSION_JANITOR_*` environment variables, in that order.
pub fn load_configuration() -> Result<StorageConfig, Error> {
    load_configuration_from(Path::new(CONFIG_FILE_NAME), false)
}

pub fn load_configuration_from(path: &Path, required: bool) -> Result<StorageConfig, Error> {
    let builder = Config::builder()
        .add_source(ConfigFile::from(path).required(required))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let config = builder.try_deserialize::<StorageConfig>()?;
    config.validate()?;
    Ok(config)
}
