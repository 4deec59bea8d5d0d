use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, SubtransError};
use crate::translate::Provider;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub limits: LimitsConfig,
    pub free: FreeConfig,
    pub rate_limit: RateLimitConfig,
    pub ai: AiConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum number of subtitle entries accepted in one job
    pub max_units: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FreeConfig {
    /// Public translation endpoint
    pub endpoint: String,
    /// Per-request deadline in seconds
    pub timeout_secs: u64,
    /// Upper bound on concurrent workers
    pub max_workers: usize,
    /// Misses handled per worker before another worker is added
    pub units_per_worker: usize,
    /// Total attempts per unit, first call included
    pub max_attempts: u32,
    /// Base delay for exponential backoff after a throttling response
    pub throttle_base_delay_ms: u64,
    /// Random delay range after other transient errors
    pub transient_delay_min_ms: u64,
    pub transient_delay_max_ms: u64,
    /// Random pause after each successful call, spreads bursts
    pub pacing_min_ms: u64,
    pub pacing_max_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Sliding window length in milliseconds
    pub window_ms: u64,
    /// Admissions allowed within one window
    pub max_calls: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    /// Per-request deadline in seconds
    pub timeout_secs: u64,
    /// Total attempts per batch, first call included
    pub max_attempts: u32,
    /// Base delay for exponential backoff on rate limiting or timeout
    pub backoff_base_ms: u64,
    /// Pause inserted between consecutive batches
    pub batch_pause_ms: u64,
    pub temperature: f32,
    pub max_tokens: u32,
    pub groq: ProviderSettings,
    pub gemini: ProviderSettings,
    pub openai: ProviderSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub endpoint: String,
    pub model: String,
    pub batch_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Capacity of the in-process tier
    pub max_entries: usize,
    /// Expiry applied by the shared tier, in seconds
    pub ttl_secs: u64,
    /// Redis URL for the shared tier; disabled when unset
    pub redis_url: Option<String>,
    /// Namespace prepended to shared tier keys
    pub key_prefix: String,
    /// Deadline for each shared tier call, connect included
    pub timeout_ms: u64,
    /// How long the shared tier is skipped after it fails or times out
    pub cooldown_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self { max_units: 50_000 }
    }
}

impl Default for FreeConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://translate.google.com/translate_a/single".to_string(),
            timeout_secs: 5,
            max_workers: 10,
            units_per_worker: 4,
            max_attempts: 3,
            throttle_base_delay_ms: 3_000,
            transient_delay_min_ms: 300,
            transient_delay_max_ms: 800,
            pacing_min_ms: 50,
            pacing_max_ms: 150,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: 1_000,
            max_calls: 15,
        }
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_attempts: 4,
            backoff_base_ms: 2_000,
            batch_pause_ms: 300,
            temperature: 0.3,
            max_tokens: 2_000,
            groq: Provider::Groq.default_settings(),
            gemini: Provider::Gemini.default_settings(),
            openai: Provider::OpenAi.default_settings(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 5_000,
            ttl_secs: 7 * 24 * 60 * 60,
            redis_url: None,
            key_prefix: "subtrans:translation:".to_string(),
            timeout_ms: 500,
            cooldown_secs: 30,
        }
    }
}

impl AiConfig {
    pub fn provider_settings(&self, provider: Provider) -> &ProviderSettings {
        match provider {
            Provider::Groq => &self.groq,
            Provider::Gemini => &self.gemini,
            Provider::OpenAi => &self.openai,
        }
    }
}

impl CacheConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SubtransError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| SubtransError::Config(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| SubtransError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| SubtransError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Reject values that would stall or break the engines
    pub fn validate(&self) -> Result<()> {
        if self.limits.max_units == 0 {
            return Err(SubtransError::Config("limits.max_units must be positive".to_string()));
        }
        if self.rate_limit.window_ms == 0 || self.rate_limit.max_calls == 0 {
            return Err(SubtransError::Config(
                "rate_limit.window_ms and rate_limit.max_calls must be positive".to_string(),
            ));
        }
        if self.free.max_workers == 0 || self.free.units_per_worker == 0 {
            return Err(SubtransError::Config(
                "free.max_workers and free.units_per_worker must be positive".to_string(),
            ));
        }
        if self.free.max_attempts == 0 || self.ai.max_attempts == 0 {
            return Err(SubtransError::Config("max_attempts must be at least 1".to_string()));
        }
        if self.free.transient_delay_min_ms > self.free.transient_delay_max_ms
            || self.free.pacing_min_ms > self.free.pacing_max_ms
        {
            return Err(SubtransError::Config("delay ranges must have min <= max".to_string()));
        }
        if self.cache.max_entries == 0 {
            return Err(SubtransError::Config("cache.max_entries must be positive".to_string()));
        }
        if self.cache.timeout_ms == 0 {
            return Err(SubtransError::Config("cache.timeout_ms must be positive".to_string()));
        }
        for provider in Provider::ALL {
            if self.ai.provider_settings(provider).batch_size == 0 {
                return Err(SubtransError::Config(format!(
                    "ai.{}.batch_size must be positive",
                    provider
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.limits.max_units, 50_000);
        assert_eq!(config.cache.ttl_secs, 604_800);
        assert_eq!(config.ai.provider_settings(Provider::Groq).batch_size, 20);
        assert_eq!(config.ai.provider_settings(Provider::OpenAi).batch_size, 12);
        assert_eq!(config.ai.provider_settings(Provider::Gemini).batch_size, 8);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [rate_limit]
            max_calls = 5

            [ai.groq]
            endpoint = "http://localhost:9000/v1/chat/completions"
            model = "llama-test"
            batch_size = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.rate_limit.max_calls, 5);
        assert_eq!(config.rate_limit.window_ms, 1_000);
        assert_eq!(config.ai.provider_settings(Provider::Groq).batch_size, 3);
        assert_eq!(config.ai.provider_settings(Provider::Gemini).batch_size, 8);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.cache.redis_url = Some("redis://127.0.0.1/".to_string());
        config.save_to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.cache.redis_url.as_deref(), Some("redis://127.0.0.1/"));
        assert_eq!(
            loaded.ai.provider_settings(Provider::OpenAi),
            &Provider::OpenAi.default_settings()
        );
    }

    #[test]
    fn test_validate_rejects_zero_window() {
        let mut config = Config::default();
        config.rate_limit.max_calls = 0;
        assert!(matches!(config.validate(), Err(SubtransError::Config(_))));
    }

    #[test]
    fn test_cache_deadline_settings() {
        let config: Config = toml::from_str("[cache]\ntimeout_ms = 250\n").unwrap();
        assert_eq!(config.cache.timeout(), Duration::from_millis(250));
        assert_eq!(config.cache.cooldown(), Duration::from_secs(30));

        let mut config = Config::default();
        config.cache.timeout_ms = 0;
        assert!(matches!(config.validate(), Err(SubtransError::Config(_))));
    }
}
