use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ExchangeError;
use crate::types::{
    step_precision, AccountBalance, ExchangeOrder, Interval, Kline, MarketData, Order, OrderBook,
    OrderType, SymbolInfo, TradeSide,
};

pub mod binance;
pub use binance::BinanceVenue;

pub const DEFAULT_DEPTH_LIMIT: u32 = 20;
pub const DEFAULT_KLINE_LIMIT: u32 = 100;
pub const DEFAULT_HISTORY_LIMIT: u32 = 50;

/// One request per call against an exchange's REST API. No retries, no rate
/// limiting; callers see the exchange's failure directly.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Get the venue name
    fn name(&self) -> &str;

    /// A client for the same venue that signs with another account's keys
    fn for_account(&self, api_key: &str, api_secret: &str) -> Arc<dyn ExchangeClient>;

    async fn ping(&self) -> Result<(), ExchangeError>;

    async fn current_price(&self, symbol: &str) -> Result<f64, ExchangeError>;

    /// 24h ticker statistics for a symbol
    async fn market_data(&self, symbol: &str) -> Result<MarketData, ExchangeError>;

    async fn order_book(&self, symbol: &str, limit: u32) -> Result<OrderBook, ExchangeError>;

    async fn klines(
        &self,
        symbol: &str,
        interval: Interval,
        limit: u32,
    ) -> Result<Vec<Kline>, ExchangeError>;

    /// Non-zero balances of the configured account
    async fn account_balances(&self) -> Result<Vec<AccountBalance>, ExchangeError>;

    /// Submit an order to the venue
    async fn place_order(&self, order: &Order) -> Result<ExchangeOrder, ExchangeError>;

    async fn market_order(
        &self,
        symbol: &str,
        side: TradeSide,
        quantity: f64,
    ) -> Result<ExchangeOrder, ExchangeError> {
        self.place_order(&Order {
            symbol: symbol.to_string(),
            side,
            quantity,
            price: None,
            order_type: OrderType::Market,
        })
        .await
    }

    async fn limit_order(
        &self,
        symbol: &str,
        side: TradeSide,
        quantity: f64,
        price: f64,
    ) -> Result<ExchangeOrder, ExchangeError> {
        self.place_order(&Order {
            symbol: symbol.to_string(),
            side,
            quantity,
            price: Some(price),
            order_type: OrderType::Limit,
        })
        .await
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<bool, ExchangeError>;

    async fn order_status(&self, symbol: &str, order_id: &str)
        -> Result<ExchangeOrder, ExchangeError>;

    async fn order_history(
        &self,
        symbol: &str,
        limit: u32,
    ) -> Result<Vec<ExchangeOrder>, ExchangeError>;

    async fn open_orders(&self, symbol: Option<&str>) -> Result<Vec<ExchangeOrder>, ExchangeError>;

    async fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo, ExchangeError>;

    /// Smallest tradable quantity from the symbol's lot-size rule
    async fn min_quantity(&self, symbol: &str) -> Result<f64, ExchangeError> {
        let info = self.symbol_info(symbol).await?;
        info.min_qty
            .ok_or_else(|| ExchangeError::Parse(format!("{} has no LOT_SIZE filter", symbol)))
    }

    /// Round a quantity to the lot step precision. Lookup failures leave the
    /// quantity untouched.
    async fn round_quantity(&self, symbol: &str, quantity: f64) -> f64 {
        match self.symbol_info(symbol).await {
            Ok(SymbolInfo {
                step_size: Some(step),
                ..
            }) => round_to_step(quantity, step),
            Ok(_) => quantity,
            Err(e) => {
                tracing::warn!(symbol = %symbol, error = %e, "Could not round quantity");
                quantity
            }
        }
    }

    /// Stop any background tasks or connections
    async fn stop(&self) -> Result<(), ExchangeError> {
        Ok(())
    }
}

pub fn round_to_step(quantity: f64, step: f64) -> f64 {
    let factor = 10f64.powi(step_precision(step) as i32);
    (quantity * factor).round() / factor
}

/// Rejects orders the exchange would bounce anyway
pub fn validate_order(order: &Order) -> Result<(), ExchangeError> {
    if !order.quantity.is_finite() || order.quantity <= 0.0 {
        return Err(ExchangeError::OrderRejected(format!(
            "Invalid quantity: {}",
            order.quantity
        )));
    }
    if order.order_type == OrderType::Limit {
        match order.price {
            Some(p) if p.is_finite() && p > 0.0 => {}
            _ => {
                return Err(ExchangeError::OrderRejected(
                    "Invalid price for limit order".to_string(),
                ))
            }
        }
    }
    Ok(())
}
