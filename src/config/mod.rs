use std::env;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::error::{AppError, Result};

pub const DEFAULT_JWT_SECRET: &str = "your-super-secret-jwt-key-change-in-production";

/// Work factor bounds accepted by bcrypt
pub const MIN_BCRYPT_COST: u32 = 4;
pub const MAX_BCRYPT_COST: u32 = 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl FromStr for Environment {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            "test" => Ok(Environment::Test),
            other => Err(AppError::Config(format!("Unknown environment: {}", other))),
        }
    }
}

#[derive(Clone)]
pub struct Config {
    pub port: u16,
    pub environment: Environment,
    pub database_url: String,
    pub jwt_secret: String,
    pub jwt_expires_in: Duration,
    pub binance_api_key: String,
    pub binance_api_secret: String,
    pub binance_base_url: String,
    pub binance_ws_url: String,
    pub market_stream_symbols: Vec<String>,
    pub default_risk_percentage: f64,
    pub max_position_size: f64,
    pub log_level: String,
    pub frontend_url: String,
    pub metrics_port: u16,
    pub bcrypt_cost: u32,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("port", &self.port)
            .field("environment", &self.environment)
            .field("database_url", &self.database_url)
            .field("jwt_expires_in", &self.jwt_expires_in)
            .field("binance_base_url", &self.binance_base_url)
            .field("binance_credentials", &self.has_binance_credentials())
            .field("market_stream_symbols", &self.market_stream_symbols)
            .field("frontend_url", &self.frontend_url)
            .field("metrics_port", &self.metrics_port)
            .finish_non_exhaustive()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3001,
            environment: Environment::Development,
            database_url: "sqlite://data/trade-bionic.db".to_string(),
            jwt_secret: DEFAULT_JWT_SECRET.to_string(),
            jwt_expires_in: Duration::from_secs(24 * 3600),
            binance_api_key: String::new(),
            binance_api_secret: String::new(),
            binance_base_url: "https://api.binance.com".to_string(),
            binance_ws_url: "wss://stream.binance.com:9443/ws".to_string(),
            market_stream_symbols: Vec::new(),
            default_risk_percentage: 2.0,
            max_position_size: 10.0,
            log_level: "info".to_string(),
            frontend_url: "http://localhost:3000".to_string(),
            metrics_port: 9090,
            bcrypt_cost: bcrypt::DEFAULT_COST,
        }
    }
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T: FromStr>(key: &str, default: T) -> Result<T> {
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{} has an invalid value: {}", key, raw))),
        None => Ok(default),
    }
}

/// Parses lifetimes like `24h`, `30m`, `7d`, `45s` or a bare number of seconds
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    let invalid = || AppError::Config(format!("Invalid duration: {}", raw));
    let (digits, unit) = match raw.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => raw.split_at(idx),
        None => (raw, "s"),
    };
    let value: u64 = digits.parse().map_err(|_| invalid())?;
    let scale = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86_400,
        _ => return Err(invalid()),
    };
    let secs = value
        .checked_mul(scale)
        .filter(|secs| *secs > 0)
        .ok_or_else(invalid)?;
    Ok(Duration::from_secs(secs))
}

impl Config {
    /// Load configuration from the process environment, reading `.env` first
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        let defaults = Config::default();

        let environment = match var("APP_ENV").or_else(|| var("NODE_ENV")) {
            Some(raw) => raw.parse()?,
            None => defaults.environment,
        };

        let jwt_expires_in = match var("JWT_EXPIRES_IN") {
            Some(raw) => parse_duration(&raw)?,
            None => defaults.jwt_expires_in,
        };

        let market_stream_symbols = var("MARKET_STREAM_SYMBOLS")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_uppercase())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            port: parse_var("PORT", defaults.port)?,
            environment,
            database_url: var("DATABASE_URL").unwrap_or(defaults.database_url),
            jwt_secret: env::var("JWT_SECRET").unwrap_or(defaults.jwt_secret),
            jwt_expires_in,
            binance_api_key: var("BINANCE_API_KEY").unwrap_or_default(),
            binance_api_secret: var("BINANCE_API_SECRET").unwrap_or_default(),
            binance_base_url: var("BINANCE_BASE_URL").unwrap_or(defaults.binance_base_url),
            binance_ws_url: var("BINANCE_WS_URL").unwrap_or(defaults.binance_ws_url),
            market_stream_symbols,
            default_risk_percentage: parse_var(
                "DEFAULT_RISK_PERCENTAGE",
                defaults.default_risk_percentage,
            )?,
            max_position_size: parse_var("MAX_POSITION_SIZE", defaults.max_position_size)?,
            log_level: var("LOG_LEVEL").unwrap_or(defaults.log_level),
            frontend_url: var("FRONTEND_URL").unwrap_or(defaults.frontend_url),
            metrics_port: parse_var("METRICS_PORT", defaults.metrics_port)?,
            bcrypt_cost: parse_var("BCRYPT_COST", defaults.bcrypt_cost)?,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.jwt_secret.trim().is_empty() {
            return Err(AppError::Config("Missing required configuration: jwtSecret".into()));
        }
        if self.environment == Environment::Production && self.jwt_secret == DEFAULT_JWT_SECRET {
            return Err(AppError::Config("JWT_SECRET must be changed in production".into()));
        }
        if !(MIN_BCRYPT_COST..=MAX_BCRYPT_COST).contains(&self.bcrypt_cost) {
            return Err(AppError::Config(format!(
                "BCRYPT_COST must be between {} and {}",
                MIN_BCRYPT_COST,
                MAX_BCRYPT_COST
            )));
        }
        if !self.has_binance_credentials() {
            warn!("Binance credentials not configured; signed exchange endpoints will be unavailable");
        }
        Ok(())
    }

    pub fn has_binance_credentials(&self) -> bool {
        !self.binance_api_key.is_empty() && !self.binance_api_secret.is_empty()
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }
}
