//! Win-rate, P&L and risk-adjusted return bookkeeping for bots and traders.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::models::{BotPerformance, Trade};

/// Per-trade risk-free rate used by the Sharpe ratio
pub const DEFAULT_RISK_FREE_RATE: f64 = 0.02;

pub fn win_rate(winning: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        winning as f64 / total as f64 * 100.0
    }
}

impl BotPerformance {
    /// Folds one realised trade result into the running totals
    pub fn record(&mut self, pnl: f64) {
        self.total_trades += 1;
        if pnl > 0.0 {
            self.winning_trades += 1;
            self.total_profit += pnl;
        } else {
            self.total_loss += pnl.abs();
        }
        self.net_profit = self.total_profit - self.total_loss;
        self.win_rate = win_rate(self.winning_trades, self.total_trades);
        if self.net_profit < self.max_drawdown {
            self.max_drawdown = self.net_profit;
        }
    }
}

/// Sharpe ratio over realised per-trade P&L: mean excess return divided by
/// the sample standard deviation. Zero when fewer than two samples exist or
/// the returns do not vary.
pub fn sharpe_ratio(pnls: &[f64], risk_free_rate: f64) -> f64 {
    if pnls.len() < 2 {
        return 0.0;
    }
    let n = pnls.len() as f64;
    let mean = pnls.iter().sum::<f64>() / n;
    let variance = pnls.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std_dev = variance.sqrt();
    if std_dev == 0.0 || !std_dev.is_finite() {
        return 0.0;
    }
    (mean - risk_free_rate) / std_dev
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeStats {
    pub total: u64,
    pub winning: u64,
    pub win_rate: f64,
    pub total_profit: f64,
    pub avg_profit: f64,
}

impl TradeStats {
    pub fn from_trades(trades: &[Trade]) -> Self {
        let total = trades.len() as u64;
        let winning = trades.iter().filter(|t| t.pnl.unwrap_or(0.0) > 0.0).count() as u64;
        let total_profit: f64 = trades.iter().map(|t| t.pnl.unwrap_or(0.0)).sum();
        Self {
            total,
            winning,
            win_rate: win_rate(winning, total),
            total_profit,
            avg_profit: if total > 0 { total_profit / total as f64 } else { 0.0 },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodProfit {
    pub daily_profit: f64,
    pub weekly_profit: f64,
    pub monthly_profit: f64,
}

impl PeriodProfit {
    /// Sums realised P&L by when the position closed (falling back to entry)
    pub fn from_trades(trades: &[Trade], now: DateTime<Utc>) -> Self {
        let mut out = Self::default();
        for trade in trades {
            let Some(pnl) = trade.pnl else { continue };
            let at = trade.exit_time.unwrap_or(trade.entry_time);
            let age = now - at;
            if age < Duration::zero() {
                continue;
            }
            if age <= Duration::days(1) {
                out.daily_profit += pnl;
            }
            if age <= Duration::days(7) {
                out.weekly_profit += pnl;
            }
            if age <= Duration::days(30) {
                out.monthly_profit += pnl;
            }
        }
        out
    }
}
