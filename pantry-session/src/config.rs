//! Session engine configuration
//!
//! Resolution: explicit path → `PANTRY_SESSION_CONFIG` → platform config dir
//! (`pantry/session.toml`) → compiled defaults, then environment overrides.
//! Every duration is stored in milliseconds.

use crate::error::{Result, SessionError};
use crate::model::{SkillLevel, Units};
use pantry_common::config::{env_override, load_toml_or_default, resolve_config_path};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Env var naming the session config file
pub const CONFIG_PATH_ENV: &str = "PANTRY_SESSION_CONFIG";
/// Config file name under the platform config directory
pub const CONFIG_FILE_NAME: &str = "session.toml";

/// Host runtime flavour; selects the session lookup timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeProfile {
    Development,
    #[default]
    Production,
}

impl std::str::FromStr for RuntimeProfile {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(RuntimeProfile::Development),
            "production" | "prod" => Ok(RuntimeProfile::Production),
            other => Err(SessionError::Config(format!("Unknown runtime profile: {}", other))),
        }
    }
}

/// Retry/backoff policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 4_000,
            max_retries: 3,
        }
    }
}

/// Profile cache policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_ms: 5 * 60 * 1_000 }
    }
}

/// Initialization coordinator policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitConfig {
    /// Re-initialization requests within this window after completion are absorbed
    pub debounce_ms: u64,
}

impl Default for InitConfig {
    fn default() -> Self {
        Self { debounce_ms: 1_000 }
    }
}

/// Field defaults used when synthesizing an approximate profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileDefaults {
    pub locale: String,
    pub units: Units,
    pub time_per_meal_minutes: u32,
    pub skill_level: SkillLevel,
}

impl Default for ProfileDefaults {
    fn default() -> Self {
        Self {
            locale: "en-US".to_string(),
            units: Units::Metric,
            time_per_meal_minutes: 30,
            skill_level: SkillLevel::Beginner,
        }
    }
}

/// Complete session engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub profile: RuntimeProfile,
    /// Overrides the profile-dependent session lookup timeout
    pub session_timeout_ms: Option<u64>,
    pub profile_timeout_ms: u64,
    pub sign_out_timeout_ms: u64,
    /// EventBus buffer per subscriber
    pub event_capacity: usize,
    pub retry: RetryConfig,
    pub cache: CacheConfig,
    pub init: InitConfig,
    pub defaults: ProfileDefaults,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            profile: RuntimeProfile::Production,
            session_timeout_ms: None,
            profile_timeout_ms: 10_000,
            sign_out_timeout_ms: 5_000,
            event_capacity: 100,
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
            init: InitConfig::default(),
            defaults: ProfileDefaults::default(),
        }
    }
}

impl SessionConfig {
    /// Resolve, load, apply env overrides and validate
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = resolve_config_path(explicit, CONFIG_PATH_ENV, CONFIG_FILE_NAME);
        let mut config: SessionConfig = load_toml_or_default(path.as_deref())?;
        config.apply_env_overrides();
        config.validate()?;

        info!(
            profile = ?config.profile,
            session_timeout_ms = config.session_timeout().as_millis() as u64,
            max_retries = config.retry.max_retries,
            source = %path.as_deref().map(|p| p.display().to_string()).unwrap_or_else(|| "defaults".to_string()),
            "Session config loaded"
        );
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(profile) = env_override::<RuntimeProfile>("PANTRY_SESSION_PROFILE") {
            self.profile = profile;
        }
        if let Some(ms) = env_override::<u64>("PANTRY_PROFILE_TIMEOUT_MS") {
            self.profile_timeout_ms = ms;
        }
        if let Some(retries) = env_override::<u32>("PANTRY_MAX_RETRIES") {
            self.retry.max_retries = retries;
        }
    }

    /// Reject settings that would disable the circuit breaker or the cache
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_retries == 0 {
            return Err(SessionError::Config("retry.max_retries must be at least 1".into()));
        }
        if self.retry.base_delay_ms == 0 {
            return Err(SessionError::Config("retry.base_delay_ms must be positive".into()));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(SessionError::Config(format!(
                "retry.max_delay_ms ({}) is below retry.base_delay_ms ({})",
                self.retry.max_delay_ms, self.retry.base_delay_ms
            )));
        }
        if self.cache.ttl_ms == 0 {
            return Err(SessionError::Config("cache.ttl_ms must be positive".into()));
        }
        if self.profile_timeout_ms == 0 {
            return Err(SessionError::Config("profile_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    /// Session lookup deadline: 20 s in development, 15 s in production
    pub fn session_timeout(&self) -> Duration {
        let default_ms = match self.profile {
            RuntimeProfile::Development => 20_000,
            RuntimeProfile::Production => 15_000,
        };
        Duration::from_millis(self.session_timeout_ms.unwrap_or(default_ms))
    }

    pub fn profile_timeout(&self) -> Duration {
        Duration::from_millis(self.profile_timeout_ms)
    }

    pub fn sign_out_timeout(&self) -> Duration {
        Duration::from_millis(self.sign_out_timeout_ms)
    }
}
