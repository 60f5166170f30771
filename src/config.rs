use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::feed::mode::TapSensitivity;
use crate::feed::policy::NoveltyWeight;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EchoConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub feed: FeedConfig,
    pub scheduling: SchedulingConfig,
    pub adaptation: AdaptationConfig,
    pub narration: NarrationConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
    /// Patient whose feed this client shows. Issued by the identity provider.
    pub patient_id: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FeedConfig {
    pub initial_batch_size: usize,
    pub top_up_batch_size: usize,
    pub prefetch_distance: usize,
    pub narration_delay_ms: u64,
    pub recall_prompt_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SchedulingConfig {
    /// How long a liked memory stays out of the candidate pool.
    pub fixation_cooldown_hours: i64,
    pub novelty_weight: NoveltyWeight,
    pub engagement_penalty: f64,
    pub max_jitter: f64,
    pub score_temperature: f64,
    pub persist_retries: u32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AdaptationConfig {
    pub tap_sensitivity: TapSensitivity,
    pub missed_tap_window_ms: u64,
    /// `HH:MM`, local time. Anything unparseable disables sundowning.
    pub sundowning_time: String,
    pub sundowning_check_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NarrationConfig {
    /// `"http"` or `"none"`.
    pub provider: String,
    pub endpoint: String,
    pub voice_id: String,
    pub timeout_secs: u64,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            feed: FeedConfig::default(),
            scheduling: SchedulingConfig::default(),
            adaptation: AdaptationConfig::default(),
            narration: NarrationConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_echo_dir()
            .join("echo.db")
            .to_string_lossy()
            .into_owned();
        Self {
            db_path,
            patient_id: "default".into(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            initial_batch_size: 10,
            top_up_batch_size: 5,
            prefetch_distance: 3,
            narration_delay_ms: 500,
            recall_prompt_delay_ms: 1500,
        }
    }
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            fixation_cooldown_hours: 24,
            novelty_weight: NoveltyWeight::Medium,
            engagement_penalty: 10.0,
            max_jitter: 20.0,
            score_temperature: 10.0,
            persist_retries: 1,
        }
    }
}

impl Default for AdaptationConfig {
    fn default() -> Self {
        Self {
            tap_sensitivity: TapSensitivity::Medium,
            missed_tap_window_ms: 2000,
            sundowning_time: "18:00".into(),
            sundowning_check_secs: 60,
        }
    }
}

impl Default for NarrationConfig {
    fn default() -> Self {
        Self {
            provider: "none".into(),
            endpoint: "http://localhost:3000/api/generate-narrator".into(),
            voice_id: "default".into(),
            timeout_secs: 30,
        }
    }
}

/// Longest fixation cooldown accepted from config (ten years).
pub const MAX_FIXATION_COOLDOWN_HOURS: i64 = 24 * 365 * 10;

/// A failed write is retried at most once, then dropped.
pub const MAX_PERSIST_RETRIES: u32 = 1;

impl SchedulingConfig {
    /// Replace out-of-range values with their defaults, warning for each one.
    pub fn validate(&mut self) {
        let defaults = Self::default();

        if !(1..=MAX_FIXATION_COOLDOWN_HOURS).contains(&self.fixation_cooldown_hours) {
            warn!(
                value = self.fixation_cooldown_hours,
                default = defaults.fixation_cooldown_hours,
                "fixation_cooldown_hours out of range, using default"
            );
            self.fixation_cooldown_hours = defaults.fixation_cooldown_hours;
        }
        reset_if_invalid(
            &mut self.engagement_penalty,
            |v| v.is_finite() && v >= 0.0,
            defaults.engagement_penalty,
            "engagement_penalty",
        );
        reset_if_invalid(
            &mut self.max_jitter,
            |v| v.is_finite() && v >= 0.0,
            defaults.max_jitter,
            "max_jitter",
        );
        reset_if_invalid(
            &mut self.score_temperature,
            |v| v.is_finite() && v > 0.0,
            defaults.score_temperature,
            "score_temperature",
        );
        if self.persist_retries > MAX_PERSIST_RETRIES {
            warn!(
                value = self.persist_retries,
                max = MAX_PERSIST_RETRIES,
                "persist_retries capped"
            );
            self.persist_retries = MAX_PERSIST_RETRIES;
        }
    }
}

fn reset_if_invalid(value: &mut f64, valid: impl Fn(f64) -> bool, default: f64, name: &str) {
    if !valid(*value) {
        warn!(field = name, value = *value, default, "invalid scheduling value, using default");
        *value = default;
    }
}

/// Returns `~/.echo/`
pub fn default_echo_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".echo")
}

/// Returns the default config file path: `~/.echo/config.toml`
pub fn default_config_path() -> PathBuf {
    default_echo_dir().join("config.toml")
}

impl EchoConfig {
    /// Load config from the default TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            EchoConfig::default()
        };

        config.apply_env_overrides();
        config.scheduling.validate();
        Ok(config)
    }

    /// Apply environment variable overrides
    /// (ECHO_DB, ECHO_PATIENT, ECHO_LOG_LEVEL, ECHO_NARRATION_ENDPOINT).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("ECHO_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("ECHO_PATIENT") {
            self.storage.patient_id = val;
        }
        if let Ok(val) = std::env::var("ECHO_LOG_LEVEL") {
            self.server.log_level = val;
        }
        if let Ok(val) = std::env::var("ECHO_NARRATION_ENDPOINT") {
            self.narration.endpoint = val;
        }
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
