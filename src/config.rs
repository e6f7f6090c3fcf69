use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::time::Duration;

use crate::analysis::CoordinatorConfig;
use crate::error::CoreError;
use crate::execution::CleanupMode;
use crate::models::Timeframe;
use crate::retry::RetryPolicy;

const ENV_PREFIX: &str = "SIGNALBOT";
const CONFIG_FILE_ENV: &str = "SIGNALBOT_CONFIG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Technical,
    AiAugmented,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StrategySettings {
    pub name: String,
    pub symbol: String,
    pub kind: StrategyKind,
    pub timeframes: Vec<Timeframe>,
    #[serde(default = "default_min_candles")]
    pub min_candles: usize,
}

fn default_min_candles() -> usize {
    60
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    pub lock_ttl_secs: u64,
    pub cache_ttl_secs: u64,
    pub ai_timeout_secs: u64,
    pub store_timeout_ms: u64,
    pub lock_wait_ms: u64,
    pub cache_bucket_secs: u64,
    /// Signal loop period; ticks are aligned to multiples of it
    pub signal_interval_secs: u64,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            lock_ttl_secs: 30,
            cache_ttl_secs: 25,
            ai_timeout_secs: 20,
            store_timeout_ms: 2000,
            lock_wait_ms: 2000,
            cache_bucket_secs: 60,
            signal_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MarketDataSettings {
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for MarketDataSettings {
    fn default() -> Self {
        Self {
            max_retries: crate::market_data::MAX_RETRIES,
            retry_base_delay_ms: 250,
            request_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub poll_interval_secs: u64,
    pub venue_timeout_secs: u64,
    /// Always list open orders instead of trusting recorded order ids
    pub list_and_match: bool,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 15,
            venue_timeout_secs: 10,
            list_and_match: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct OpenAiSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub max_retries: u32,
}

impl Default for OpenAiSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: crate::api::OPENAI_API_BASE.to_string(),
            model: crate::api::DEFAULT_MODEL.to_string(),
            max_retries: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct VenueSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub timeout_secs: u64,
}

impl Default for VenueSettings {
    fn default() -> Self {
        Self {
            base_url: crate::api::BINANCE_FUTURES_BASE.to_string(),
            api_key: None,
            api_secret: None,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    pub queue_capacity: usize,
    pub webhook_urls: Vec<String>,
    pub webhook_timeout_secs: u64,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            webhook_urls: Vec::new(),
            webhook_timeout_secs: 5,
        }
    }
}

/// Application settings
///
/// Layered lowest to highest: built-in defaults, `config/default.toml`, the file named
/// by `SIGNALBOT_CONFIG`, then `SIGNALBOT__SECTION__KEY` environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub worker_id: String,
    /// Unset runs with a process-local coordination store
    pub redis_url: Option<String>,
    /// Unset keeps positions in memory
    pub database_url: Option<String>,
    pub strategies: Vec<StrategySettings>,
    pub analysis: AnalysisSettings,
    pub market_data: MarketDataSettings,
    pub monitor: MonitorSettings,
    pub openai: OpenAiSettings,
    pub venue: VenueSettings,
    pub dispatch: DispatchSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            worker_id: "signalbot".to_string(),
            redis_url: None,
            database_url: None,
            strategies: vec![
                StrategySettings {
                    name: "technical".to_string(),
                    symbol: "BTCUSDT".to_string(),
                    kind: StrategyKind::Technical,
                    timeframes: vec![Timeframe::M15, Timeframe::H1, Timeframe::H4],
                    min_candles: default_min_candles(),
                },
                StrategySettings {
                    name: "ai_augmented".to_string(),
                    symbol: "BTCUSDT".to_string(),
                    kind: StrategyKind::AiAugmented,
                    timeframes: vec![Timeframe::H1, Timeframe::H4],
                    min_candles: default_min_candles(),
                },
            ],
            analysis: AnalysisSettings::default(),
            market_data: MarketDataSettings::default(),
            monitor: MonitorSettings::default(),
            openai: OpenAiSettings::default(),
            venue: VenueSettings::default(),
            dispatch: DispatchSettings::default(),
        }
    }
}

fn config_error(e: config::ConfigError) -> CoreError {
    CoreError::Config(e.to_string())
}

impl Settings {
    /// Load from files and environment. Call `dotenvy::dotenv()` first to pick up `.env`.
    pub fn load() -> Result<Self, CoreError> {
        let mut builder = Config::builder()
            .add_source(File::with_name("config/default").required(false));

        if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
            builder = builder.add_source(File::with_name(&path).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("dispatch.webhook_urls")
                    .try_parsing(true),
            )
            .build()
            .map_err(config_error)?;

        let mut settings: Settings = config.try_deserialize().map_err(config_error)?;
        settings.apply_conventional_env();
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_toml_str(toml: &str) -> Result<Self, CoreError> {
        let settings: Settings = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(config_error)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Fall back to the conventional variable names used by the wider tooling
    fn apply_conventional_env(&mut self) {
        let env = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

        if self.redis_url.is_none() {
            self.redis_url = env("REDIS_URL");
        }
        if self.database_url.is_none() {
            self.database_url = env("DATABASE_URL");
        }
        if self.openai.api_key.is_none() {
            self.openai.api_key = env("OPENAI_API_KEY");
        }
        if self.venue.api_key.is_none() {
            self.venue.api_key = env("BINANCE_API_KEY");
        }
        if self.venue.api_secret.is_none() {
            self.venue.api_secret = env("BINANCE_API_SECRET");
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.analysis.cache_ttl_secs >= self.analysis.lock_ttl_secs {
            return Err(CoreError::Config(format!(
                "analysis.cache_ttl_secs ({}) must be below analysis.lock_ttl_secs ({})",
                self.analysis.cache_ttl_secs, self.analysis.lock_ttl_secs
            )));
        }
        if self.analysis.ai_timeout_secs >= self.analysis.lock_ttl_secs {
            return Err(CoreError::Config(format!(
                "analysis.ai_timeout_secs ({}) must be below analysis.lock_ttl_secs ({})",
                self.analysis.ai_timeout_secs, self.analysis.lock_ttl_secs
            )));
        }
        if self.analysis.store_timeout_ms == 0 {
            return Err(CoreError::Config(
                "analysis.store_timeout_ms must be positive".to_string(),
            ));
        }
        if self.analysis.signal_interval_secs == 0 || self.monitor.poll_interval_secs == 0 {
            return Err(CoreError::Config("intervals must be positive".to_string()));
        }
        for strategy in &self.strategies {
            if strategy.timeframes.is_empty() {
                return Err(CoreError::Config(format!(
                    "strategy '{}' has no timeframes",
                    strategy.name
                )));
            }
            if strategy.symbol.trim().is_empty() {
                return Err(CoreError::Config(format!(
                    "strategy '{}' has no symbol",
                    strategy.name
                )));
            }
        }
        Ok(())
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            lock_ttl: Duration::from_secs(self.analysis.lock_ttl_secs),
            cache_ttl: Duration::from_secs(self.analysis.cache_ttl_secs),
            ai_timeout: Duration::from_secs(self.analysis.ai_timeout_secs),
            store_timeout: Duration::from_millis(self.analysis.store_timeout_ms),
            lock_wait: Duration::from_millis(self.analysis.lock_wait_ms),
            cache_bucket: Duration::from_secs(self.analysis.cache_bucket_secs),
            worker_id: self.worker_id.clone(),
            strategy: "ai_augmented".to_string(),
        }
    }

    pub fn market_data_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.market_data.max_retries,
            Duration::from_millis(self.market_data.retry_base_delay_ms),
            2.0,
        )
        .with_jitter(0.1)
    }

    pub fn cleanup_mode(&self) -> CleanupMode {
        if self.monitor.list_and_match {
            CleanupMode::ListAndMatch
        } else {
            CleanupMode::RecordedIds
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();

        let coordinator = settings.coordinator_config();
        assert_eq!(coordinator.lock_ttl, Duration::from_secs(30));
        assert_eq!(coordinator.cache_ttl, Duration::from_secs(25));
        assert_eq!(coordinator.ai_timeout, Duration::from_secs(20));
        assert_eq!(coordinator.lock_wait, Duration::from_secs(2));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let settings = Settings::from_toml_str(
            r#"
            worker_id = "worker-7"

            [analysis]
            ai_timeout_secs = 8

            [[strategies]]
            name = "eth_fast"
            symbol = "ETHUSDT"
            kind = "technical"
            timeframes = ["5m", "15m"]
            "#,
        )
        .unwrap();

        assert_eq!(settings.worker_id, "worker-7");
        assert_eq!(settings.analysis.ai_timeout_secs, 8);
        assert_eq!(settings.analysis.lock_ttl_secs, 30);
        assert_eq!(settings.strategies.len(), 1);
        assert_eq!(settings.strategies[0].timeframes, vec![Timeframe::M5, Timeframe::M15]);
        assert_eq!(settings.strategies[0].min_candles, 60);
        assert_eq!(settings.monitor.poll_interval_secs, 15);
    }

    #[test]
    fn test_cache_ttl_must_be_below_lock_ttl() {
        let err = Settings::from_toml_str(
            r#"
            [analysis]
            lock_ttl_secs = 10
            cache_ttl_secs = 10
            "#,
        )
        .unwrap_err();

        assert!(matches!(err, CoreError::Config(_)));
    }

    #[test]
    fn test_ai_timeout_must_be_below_lock_ttl() {
        let err = Settings::from_toml_str(
            r#"
            [analysis]
            lock_ttl_secs = 5
            cache_ttl_secs = 4
            ai_timeout_secs = 20
            "#,
        )
        .unwrap_err();

        assert!(err.to_string().contains("ai_timeout_secs"));
    }

    #[test]
    fn test_unknown_timeframe_rejected() {
        let result = Settings::from_toml_str(
            r#"
            [[strategies]]
            name = "bad"
            symbol = "BTCUSDT"
            kind = "technical"
            timeframes = ["7m"]
            "#,
        );
        assert!(result.is_err());
    }
}
