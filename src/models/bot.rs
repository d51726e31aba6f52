use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::user::check_range;
use crate::types::{Interval, Strategy};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bot {
    pub id: String,
    #[serde(skip_serializing)]
    pub user_id: String,
    pub name: String,
    pub strategy: Strategy,
    pub symbol: String,
    pub interval: Interval,
    pub is_active: bool,
    pub settings: BotSettings,
    pub performance: BotPerformance,
    pub last_activity: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TradingHours {
    pub start: String,
    pub end: String,
}

impl Default for TradingHours {
    fn default() -> Self {
        Self {
            start: "00:00".to_string(),
            end: "23:59".to_string(),
        }
    }
}

fn is_clock_time(s: &str) -> bool {
    let Some((h, m)) = s.split_once(':') else {
        return false;
    };
    if h.len() != 2 || m.len() != 2 {
        return false;
    }
    matches!((h.parse::<u8>(), m.parse::<u8>()), (Ok(h), Ok(m)) if h < 24 && m < 60)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BotSettings {
    pub risk_percentage: f64,
    pub max_position_size: f64,
    pub stop_loss_percentage: f64,
    pub take_profit_percentage: f64,
    pub max_positions: u32,
    pub trading_hours: TradingHours,
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            risk_percentage: 2.0,
            max_position_size: 10.0,
            stop_loss_percentage: 2.5,
            take_profit_percentage: 4.0,
            max_positions: 1,
            trading_hours: TradingHours::default(),
        }
    }
}

impl BotSettings {
    pub fn validate(&self) -> Result<()> {
        check_range("riskPercentage", self.risk_percentage, 0.1, 10.0)?;
        check_range("maxPositionSize", self.max_position_size, 1.0, 100.0)?;
        check_range("stopLossPercentage", self.stop_loss_percentage, 0.5, 10.0)?;
        check_range("takeProfitPercentage", self.take_profit_percentage, 1.0, 20.0)?;
        check_range("maxPositions", self.max_positions as f64, 1.0, 10.0)?;
        if !is_clock_time(&self.trading_hours.start) || !is_clock_time(&self.trading_hours.end) {
            return Err(AppError::validation("tradingHours must use HH:MM"));
        }
        Ok(())
    }

    /// Shallow merge: every field present in the patch replaces the stored one
    pub fn merge(&self, patch: BotSettingsPatch) -> Self {
        Self {
            risk_percentage: patch.risk_percentage.unwrap_or(self.risk_percentage),
            max_position_size: patch.max_position_size.unwrap_or(self.max_position_size),
            stop_loss_percentage: patch.stop_loss_percentage.unwrap_or(self.stop_loss_percentage),
            take_profit_percentage: patch
                .take_profit_percentage
                .unwrap_or(self.take_profit_percentage),
            max_positions: patch.max_positions.unwrap_or(self.max_positions),
            trading_hours: patch
                .trading_hours
                .unwrap_or_else(|| self.trading_hours.clone()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotSettingsPatch {
    pub risk_percentage: Option<f64>,
    pub max_position_size: Option<f64>,
    pub stop_loss_percentage: Option<f64>,
    pub take_profit_percentage: Option<f64>,
    pub max_positions: Option<u32>,
    pub trading_hours: Option<TradingHours>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BotPerformance {
    pub total_trades: u64,
    pub winning_trades: u64,
    pub win_rate: f64,
    pub total_profit: f64,
    pub total_loss: f64,
    pub net_profit: f64,
    pub max_drawdown: f64,
    pub sharpe_ratio: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBotRequest {
    pub name: Option<String>,
    pub strategy: Option<String>,
    pub symbol: Option<String>,
    pub interval: Option<String>,
    pub settings: Option<BotSettings>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBotRequest {
    pub name: Option<String>,
    pub strategy: Option<String>,
    pub symbol: Option<String>,
    pub interval: Option<String>,
    pub settings: Option<BotSettingsPatch>,
    pub is_active: Option<bool>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Bot {
    pub fn create(user_id: &str, req: CreateBotRequest) -> Result<Self> {
        let (Some(name), Some(strategy), Some(symbol), Some(interval)) = (
            non_empty(req.name),
            non_empty(req.strategy),
            non_empty(req.symbol),
            non_empty(req.interval),
        ) else {
            return Err(AppError::validation("Missing required fields"));
        };

        let strategy: Strategy = strategy
            .parse()
            .map_err(|_| AppError::validation("Invalid strategy"))?;
        let interval: Interval = interval
            .parse()
            .map_err(|_| AppError::validation("Invalid interval"))?;

        let settings = req.settings.unwrap_or_default();
        settings.validate()?;

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            name,
            strategy,
            symbol: symbol.to_uppercase(),
            interval,
            is_active: false,
            settings,
            performance: BotPerformance::default(),
            last_activity: now,
            created_at: now,
            updated_at: now,
        })
    }

    /// Applies a partial update. Nothing is written to `self` unless the
    /// whole request is valid.
    pub fn apply_update(&mut self, req: UpdateBotRequest) -> Result<()> {
        let mut next = self.clone();

        if let Some(name) = non_empty(req.name) {
            next.name = name;
        }
        if let Some(strategy) = non_empty(req.strategy) {
            next.strategy = strategy
                .parse()
                .map_err(|_| AppError::validation("Invalid strategy"))?;
        }
        if let Some(symbol) = non_empty(req.symbol) {
            next.symbol = symbol.to_uppercase();
        }
        if let Some(interval) = non_empty(req.interval) {
            next.interval = interval
                .parse()
                .map_err(|_| AppError::validation("Invalid interval"))?;
        }
        if let Some(patch) = req.settings {
            let merged = next.settings.merge(patch);
            merged.validate()?;
            next.settings = merged;
        }
        if let Some(active) = req.is_active {
            next.is_active = active;
        }

        next.updated_at = Utc::now();
        *self = next;
        Ok(())
    }

    pub fn toggle(&mut self) -> bool {
        self.is_active = !self.is_active;
        self.updated_at = Utc::now();
        self.is_active
    }
}
