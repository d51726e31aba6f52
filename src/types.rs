use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AppError;

/// Implements `as_str`, `Display` and `FromStr` for a closed set of wire labels.
macro_rules! wire_enum {
    ($name:ident, $what:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = AppError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    _ => Err(AppError::Validation(format!("Invalid {}: {}", $what, s))),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Strategy {
    #[serde(rename = "scalping")]
    Scalping,
    #[serde(rename = "momentum")]
    Momentum,
    #[serde(rename = "rsi_ema")]
    RsiEma,
    #[serde(rename = "copy_trading")]
    CopyTrading,
}

wire_enum!(Strategy, "strategy", {
    Scalping => "scalping",
    Momentum => "momentum",
    RsiEma => "rsi_ema",
    CopyTrading => "copy_trading",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "4h")]
    FourHours,
    #[serde(rename = "1d")]
    OneDay,
}

wire_enum!(Interval, "interval", {
    OneMinute => "1m",
    FiveMinutes => "5m",
    FifteenMinutes => "15m",
    OneHour => "1h",
    FourHours => "4h",
    OneDay => "1d",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
    Trader,
}

wire_enum!(Role, "role", {
    User => "user",
    Admin => "admin",
    Trader => "trader",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

wire_enum!(TradeSide, "side", {
    Buy => "buy",
    Sell => "sell",
});

impl TradeSide {
    /// Side label in the exchange's REST vocabulary
    pub fn as_exchange_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        }
    }

    pub fn from_exchange_str(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" => Some(TradeSide::Buy),
            "SELL" => Some(TradeSide::Sell),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    #[default]
    Pending,
    Filled,
    Cancelled,
    Failed,
}

wire_enum!(TradeStatus, "status", {
    Pending => "pending",
    Filled => "filled",
    Cancelled => "cancelled",
    Failed => "failed",
});

impl TradeStatus {
    /// Maps a Binance order status onto the stored trade status
    pub fn from_exchange_status(status: &str) -> Self {
        match status {
            "FILLED" => TradeStatus::Filled,
            "CANCELED" | "EXPIRED" | "EXPIRED_IN_MATCH" | "PENDING_CANCEL" => TradeStatus::Cancelled,
            "REJECTED" => TradeStatus::Failed,
            _ => TradeStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Exchange {
    #[default]
    Binance,
    Bybit,
}

wire_enum!(Exchange, "exchange", {
    Binance => "binance",
    Bybit => "bybit",
});

/// Top-of-book update pushed by the live ticker stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub bid: f64,
    pub ask: f64,
    pub venue: String,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
}

/// An order as handed to the exchange client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub symbol: String,
    pub side: TradeSide,
    pub quantity: f64,
    pub price: Option<f64>,
    pub order_type: OrderType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketData {
    pub symbol: String,
    pub price: f64,
    pub volume: f64,
    #[serde(rename = "change24h")]
    pub change_24h: f64,
    #[serde(rename = "high24h")]
    pub high_24h: f64,
    #[serde(rename = "low24h")]
    pub low_24h: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBook {
    pub symbol: String,
    pub bids: Vec<(f64, f64)>,
    pub asks: Vec<(f64, f64)>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Kline {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub close_time: i64,
    pub quote_asset_volume: f64,
    pub number_of_trades: u64,
    pub taker_buy_base_asset_volume: f64,
    pub taker_buy_quote_asset_volume: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub asset: String,
    pub free: f64,
    pub locked: f64,
    pub total: f64,
}

/// Order state as reported back by the exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeOrder {
    pub symbol: String,
    pub side: TradeSide,
    pub quantity: f64,
    pub price: f64,
    pub order_id: String,
    pub status: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
    pub symbol: String,
    pub status: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub min_qty: Option<f64>,
    pub step_size: Option<f64>,
}

/// Number of decimal places implied by a lot step such as `0.00100000`
pub fn step_precision(step: f64) -> u32 {
    if step <= 0.0 || step >= 1.0 {
        return 0;
    }
    let text = format!("{:.8}", step);
    let decimals = text.split('.').nth(1).unwrap_or("");
    decimals.trim_end_matches('0').len() as u32
}
