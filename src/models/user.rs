use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::types::{Role, Strategy};

pub const MIN_PASSWORD_LENGTH: usize = 6;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub is_active: bool,
    pub role: Role,
    #[serde(skip_serializing)]
    pub api_keys: ApiKeys,
    pub trading_settings: TradingSettings,
    pub wallet_address: Option<String>,
    pub onic_balance: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExchangeCredentials {
    pub api_key: String,
    pub api_secret: String,
    pub is_active: bool,
}

impl ExchangeCredentials {
    /// Enabled and complete enough to sign requests with
    pub fn is_usable(&self) -> bool {
        self.is_active && !self.api_key.is_empty() && !self.api_secret.is_empty()
    }
}

impl fmt::Debug for ExchangeCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeCredentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .field("is_active", &self.is_active)
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiKeys {
    pub binance: ExchangeCredentials,
    pub bybit: ExchangeCredentials,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TradingSettings {
    pub risk_percentage: f64,
    pub max_position_size: f64,
    pub preferred_strategy: Strategy,
    pub copy_trading_enabled: bool,
}

impl Default for TradingSettings {
    fn default() -> Self {
        Self {
            risk_percentage: 2.0,
            max_position_size: 10.0,
            preferred_strategy: Strategy::RsiEma,
            copy_trading_enabled: false,
        }
    }
}

impl TradingSettings {
    pub fn validate(&self) -> Result<()> {
        check_range("riskPercentage", self.risk_percentage, 0.1, 10.0)?;
        check_range("maxPositionSize", self.max_position_size, 1.0, 100.0)?;
        Ok(())
    }
}

/// Bounds check shared by every settings block
pub(crate) fn check_range(field: &str, value: f64, min: f64, max: f64) -> Result<()> {
    if !value.is_finite() || value < min || value > max {
        return Err(AppError::Validation(format!(
            "{} must be between {} and {}",
            field, min, max
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub wallet_address: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradingSettingsPatch {
    pub risk_percentage: Option<f64>,
    pub max_position_size: Option<f64>,
    pub preferred_strategy: Option<Strategy>,
    pub copy_trading_enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub wallet_address: Option<String>,
    pub trading_settings: Option<TradingSettingsPatch>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeysUpdate {
    pub exchange: crate::types::Exchange,
    pub api_key: String,
    pub api_secret: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn validate_email(email: &str) -> Result<()> {
    let mut parts = email.splitn(2, '@');
    let local = parts.next().unwrap_or("");
    let domain = parts.next().unwrap_or("");
    if local.is_empty() || !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.') {
        return Err(AppError::validation("Invalid email address"));
    }
    Ok(())
}

impl User {
    /// Builds a new account from a registration request. The password must
    /// already be hashed.
    pub fn new(
        email: &str,
        password_hash: String,
        username: Option<&str>,
        first_name: Option<&str>,
        last_name: Option<&str>,
        wallet_address: Option<&str>,
    ) -> Result<Self> {
        let email = normalize_email(email);
        validate_email(&email)?;

        let username = match username.map(str::trim).filter(|u| !u.is_empty()) {
            Some(u) => u.to_string(),
            None => email.split('@').next().unwrap_or_default().to_string(),
        };

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            email,
            password_hash,
            username,
            first_name: first_name.map(|s| s.trim().to_string()).unwrap_or_default(),
            last_name: last_name.map(|s| s.trim().to_string()).unwrap_or_default(),
            is_active: true,
            role: Role::User,
            api_keys: ApiKeys::default(),
            trading_settings: TradingSettings::default(),
            wallet_address: wallet_address
                .map(|w| w.trim().to_string())
                .filter(|w| !w.is_empty()),
            onic_balance: 0.0,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn apply_profile(&mut self, update: ProfileUpdate) -> Result<()> {
        if let Some(username) = update.username {
            let username = username.trim();
            if username.is_empty() {
                return Err(AppError::validation("Username cannot be empty"));
            }
            self.username = username.to_string();
        }
        if let Some(first) = update.first_name {
            self.first_name = first.trim().to_string();
        }
        if let Some(last) = update.last_name {
            self.last_name = last.trim().to_string();
        }
        if let Some(wallet) = update.wallet_address {
            let wallet = wallet.trim();
            self.wallet_address = (!wallet.is_empty()).then(|| wallet.to_string());
        }
        if let Some(patch) = update.trading_settings {
            let mut settings = self.trading_settings.clone();
            if let Some(v) = patch.risk_percentage {
                settings.risk_percentage = v;
            }
            if let Some(v) = patch.max_position_size {
                settings.max_position_size = v;
            }
            if let Some(v) = patch.preferred_strategy {
                settings.preferred_strategy = v;
            }
            if let Some(v) = patch.copy_trading_enabled {
                settings.copy_trading_enabled = v;
            }
            settings.validate()?;
            self.trading_settings = settings;
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn set_api_keys(&mut self, update: ApiKeysUpdate) -> Result<()> {
        if update.api_key.trim().is_empty() || update.api_secret.trim().is_empty() {
            return Err(AppError::validation("API key and secret are required"));
        }
        let creds = ExchangeCredentials {
            api_key: update.api_key.trim().to_string(),
            api_secret: update.api_secret.trim().to_string(),
            is_active: update.is_active,
        };
        match update.exchange {
            crate::types::Exchange::Binance => self.api_keys.binance = creds,
            crate::types::Exchange::Bybit => self.api_keys.bybit = creds,
        }
        self.updated_at = Utc::now();
        Ok(())
    }
}
