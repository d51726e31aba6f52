use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::types::{Exchange, ExchangeOrder, Strategy, TradeSide, TradeStatus};

/// Order ids given to trades recorded by hand rather than placed
pub const MANUAL_ORDER_PREFIX: &str = "manual-";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub id: String,
    pub user_id: String,
    pub bot_id: Option<String>,
    pub symbol: String,
    pub side: TradeSide,
    pub quantity: f64,
    pub price: f64,
    pub total_value: f64,
    pub strategy: Strategy,
    pub exchange: Exchange,
    pub order_id: String,
    pub status: TradeStatus,
    pub pnl: Option<f64>,
    pub pnl_percentage: Option<f64>,
    pub entry_time: DateTime<Utc>,
    pub exit_time: Option<DateTime<Utc>>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub copy_trade_info: Option<CopyTradeInfo>,
    #[serde(skip_serializing)]
    pub metadata: TradeMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyTradeInfo {
    pub leader_id: String,
    pub leader_name: String,
    pub original_trade_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TradeMetadata {
    pub risk_percentage: f64,
    pub market_conditions: Option<String>,
}

impl Default for TradeMetadata {
    fn default() -> Self {
        Self {
            risk_percentage: 2.0,
            market_conditions: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTradeRequest {
    pub bot_id: Option<String>,
    pub symbol: String,
    pub side: TradeSide,
    pub quantity: f64,
    pub price: f64,
    pub strategy: Strategy,
    #[serde(default)]
    pub exchange: Exchange,
    pub order_id: Option<String>,
    #[serde(default)]
    pub status: TradeStatus,
    pub entry_time: Option<DateTime<Utc>>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub copy_trade_info: Option<CopyTradeInfo>,
    pub risk_percentage: Option<f64>,
    pub market_conditions: Option<String>,
}

fn check_non_negative(field: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(AppError::Validation(format!("{} must be a non-negative number", field)));
    }
    Ok(())
}

impl Trade {
    pub fn record(user_id: &str, req: NewTradeRequest) -> Result<Self> {
        let symbol = req.symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(AppError::validation("Missing required fields"));
        }
        check_non_negative("quantity", req.quantity)?;
        check_non_negative("price", req.price)?;
        if let Some(sl) = req.stop_loss {
            check_non_negative("stopLoss", sl)?;
        }
        if let Some(tp) = req.take_profit {
            check_non_negative("takeProfit", tp)?;
        }

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            bot_id: req.bot_id.filter(|b| !b.is_empty()),
            symbol,
            side: req.side,
            quantity: req.quantity,
            price: req.price,
            total_value: req.quantity * req.price,
            strategy: req.strategy,
            exchange: req.exchange,
            order_id: req
                .order_id
                .filter(|o| !o.trim().is_empty())
                .unwrap_or_else(|| format!("{}{}", MANUAL_ORDER_PREFIX, Uuid::new_v4().simple())),
            status: req.status,
            pnl: None,
            pnl_percentage: None,
            entry_time: req.entry_time.unwrap_or(now),
            exit_time: None,
            stop_loss: req.stop_loss,
            take_profit: req.take_profit,
            copy_trade_info: req.copy_trade_info,
            metadata: TradeMetadata {
                risk_percentage: req.risk_percentage.unwrap_or(2.0),
                market_conditions: req.market_conditions,
            },
            created_at: now,
            updated_at: now,
        })
    }

    /// Builds the stored record for an order the exchange accepted
    pub fn from_exchange_order(
        user_id: &str,
        bot_id: Option<String>,
        strategy: Strategy,
        order: &ExchangeOrder,
        requested_price: Option<f64>,
    ) -> Self {
        let now = Utc::now();
        // Market orders report price 0 until filled
        let price = if order.price > 0.0 {
            order.price
        } else {
            requested_price.unwrap_or(0.0)
        };
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            bot_id,
            symbol: order.symbol.clone(),
            side: order.side,
            quantity: order.quantity,
            price,
            total_value: order.quantity * price,
            strategy,
            exchange: Exchange::Binance,
            order_id: order.order_id.clone(),
            status: TradeStatus::from_exchange_status(&order.status),
            pnl: None,
            pnl_percentage: None,
            entry_time: DateTime::from_timestamp_millis(order.timestamp).unwrap_or(now),
            exit_time: None,
            stop_loss: None,
            take_profit: None,
            copy_trade_info: None,
            metadata: TradeMetadata::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn calculate_pnl(&self, exit_price: f64) -> f64 {
        match self.side {
            TradeSide::Buy => (exit_price - self.price) * self.quantity,
            TradeSide::Sell => (self.price - exit_price) * self.quantity,
        }
    }

    pub fn calculate_pnl_percentage(&self, exit_price: f64) -> f64 {
        if self.price == 0.0 {
            return 0.0;
        }
        match self.side {
            TradeSide::Buy => (exit_price - self.price) / self.price * 100.0,
            TradeSide::Sell => (self.price - exit_price) / self.price * 100.0,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.exit_time.is_some()
    }

    /// Recorded by hand, so the exchange knows nothing about it
    pub fn is_manual(&self) -> bool {
        self.order_id.starts_with(MANUAL_ORDER_PREFIX)
    }

    /// Closes the position at `exit_price`, fixing its realised P&L
    pub fn close(&mut self, exit_price: f64) -> Result<f64> {
        if !exit_price.is_finite() || exit_price <= 0.0 {
            return Err(AppError::validation("exitPrice must be a positive number"));
        }
        if self.is_closed() {
            return Err(AppError::validation("Trade already closed"));
        }
        if matches!(self.status, TradeStatus::Cancelled | TradeStatus::Failed) {
            return Err(AppError::validation("Cannot close a cancelled or failed trade"));
        }
        // A resting exchange order has no position behind it yet
        if self.status == TradeStatus::Pending && !self.is_manual() {
            return Err(AppError::validation("Cannot close an unfilled order"));
        }

        let pnl = self.calculate_pnl(exit_price);
        let now = Utc::now();
        self.pnl = Some(pnl);
        self.pnl_percentage = Some(self.calculate_pnl_percentage(exit_price));
        self.exit_time = Some(now);
        self.status = TradeStatus::Filled;
        self.updated_at = now;
        Ok(pnl)
    }

    pub fn mark_cancelled(&mut self) -> Result<()> {
        if self.status != TradeStatus::Pending {
            return Err(AppError::validation("Only pending trades can be cancelled"));
        }
        self.status = TradeStatus::Cancelled;
        self.updated_at = Utc::now();
        Ok(())
    }
}
