use serde::Deserialize;
use std::path::Path;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{Error, Result};
use crate::exchange::kalshi::DEFAULT_SERIES_TICKERS;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub kalshi: KalshiConfig,
    pub polymarket: PolymarketConfig,
    pub scanner: ScannerConfig,
    pub execution: ExecutionConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KalshiConfig {
    pub api_url: String,
    pub max_markets: usize,
    pub max_rps: u32,
    /// Fee rate charged on the winning leg's profit.
    pub fee_rate: f64,
    /// Series swept during discovery, in priority order.
    pub series_tickers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PolymarketConfig {
    pub gamma_url: String,
    pub clob_url: String,
    pub max_markets: usize,
    pub max_rps: u32,
    pub fee_rate: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub interval_seconds: u64,
    pub min_profit_cents: f64,
    /// Fuzzy match cutoff as integer percent.
    pub match_threshold: u32,
    pub auto_execute: bool,
    pub overrides_path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub max_position_usd: f64,
    pub max_daily_loss_usd: f64,
    pub cooldown_seconds: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.kalshi.api_url.is_empty() {
            return Err(Error::Config("kalshi.api_url cannot be empty".into()));
        }
        if self.polymarket.gamma_url.is_empty() || self.polymarket.clob_url.is_empty() {
            return Err(Error::Config(
                "polymarket.gamma_url and polymarket.clob_url cannot be empty".into(),
            ));
        }
        if self.kalshi.max_rps == 0 || self.polymarket.max_rps == 0 {
            return Err(Error::Config("max_rps must be at least 1".into()));
        }
        if self.scanner.match_threshold > 100 {
            return Err(Error::Config(
                "scanner.match_threshold must be 0-100".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.kalshi.fee_rate)
            || !(0.0..1.0).contains(&self.polymarket.fee_rate)
        {
            return Err(Error::Config("fee rates must be in [0, 1)".into()));
        }
        if self.scanner.interval_seconds == 0 {
            return Err(Error::Config(
                "scanner.interval_seconds must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn init_logging(&self) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&self.logging.level));

        match self.logging.format.as_str() {
            "json" => {
                fmt().json().with_env_filter(filter).init();
            }
            _ => {
                fmt().with_env_filter(filter).init();
            }
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            kalshi: KalshiConfig::default(),
            polymarket: PolymarketConfig::default(),
            scanner: ScannerConfig::default(),
            execution: ExecutionConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for KalshiConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.elections.kalshi.com/trade-api/v2".into(),
            max_markets: 15000,
            max_rps: 10,
            fee_rate: 0.07,
            series_tickers: DEFAULT_SERIES_TICKERS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl Default for PolymarketConfig {
    fn default() -> Self {
        Self {
            gamma_url: "https://gamma-api.polymarket.com".into(),
            clob_url: "https://clob.polymarket.com".into(),
            max_markets: 5000,
            max_rps: 10,
            fee_rate: 0.02,
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 60,
            min_profit_cents: 2.0,
            match_threshold: 80,
            auto_execute: false,
            overrides_path: "market_overrides.json".into(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_position_usd: 100.0,
            max_daily_loss_usd: 50.0,
            cooldown_seconds: 5.0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let mut config = Config::default();
        config.scanner.match_threshold = 101;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_rate_cap() {
        let mut config = Config::default();
        config.kalshi.max_rps = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_partial_toml_over_defaults() {
        let config: Config = toml::from_str(
            r#"
            [scanner]
            interval_seconds = 5
            match_threshold = 85
            "#,
        )
        .unwrap();
        assert_eq!(config.scanner.interval_seconds, 5);
        assert_eq!(config.scanner.match_threshold, 85);
        assert_eq!(config.kalshi.max_rps, 10);
        assert!(!config.kalshi.series_tickers.is_empty());
    }
}
