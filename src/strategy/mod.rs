pub mod indicators;
pub mod risk;

use serde::Serialize;
use tracing::debug;

use crate::models::Bot;
use self::indicators::{Bands, Macd};
use crate::types::{Kline, MarketData, Strategy};

pub const RSI_PERIOD: usize = 14;
pub const EMA_PERIOD: usize = 20;
pub const MOMENTUM_PERIOD: usize = 14;
pub const SCALPING_THRESHOLD: f64 = 0.001;
pub const RSI_OVERSOLD: f64 = 30.0;
pub const RSI_OVERBOUGHT: f64 = 70.0;
pub const BOLLINGER_PERIOD: usize = 20;
pub const BOLLINGER_WIDTH: f64 = 2.0;
pub const MACD_FAST: usize = 12;
pub const MACD_SLOW: usize = 26;
pub const MACD_SIGNAL: usize = 9;
/// Confidence reported with every analysis
pub const DEFAULT_CONFIDENCE: f64 = 0.5;
/// Candles loaded when a bot is tested
pub const ANALYSIS_KLINES: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Buy,
    Sell,
    Hold,
}

/// Close above EMA while RSI is oversold buys; the mirror sells
pub fn rsi_ema_signal(closes: &[f64], rsi_period: usize, ema_period: usize) -> Signal {
    if closes.len() < rsi_period.max(ema_period) {
        return Signal::Hold;
    }
    let latest = closes.len() - 1;
    let close = closes[latest];
    let ema = indicators::ema(closes, ema_period)[latest];
    let rsi = indicators::rsi(closes, rsi_period)[latest];

    match (ema, rsi) {
        (Some(ema), Some(rsi)) if close > ema && rsi < RSI_OVERSOLD => Signal::Buy,
        (Some(ema), Some(rsi)) if close < ema && rsi > RSI_OVERBOUGHT => Signal::Sell,
        _ => Signal::Hold,
    }
}

/// Momentum is `close - close[period back]`; buy when positive and rising,
/// sell when negative and falling.
pub fn momentum_signal(closes: &[f64], period: usize) -> Signal {
    if period == 0 || closes.len() < period + 2 {
        return Signal::Hold;
    }
    let latest = closes.len() - 1;
    let current = closes[latest] - closes[latest - period];
    let previous = closes[latest - 1] - closes[latest - 1 - period];

    if current > 0.0 && current > previous {
        Signal::Buy
    } else if current < 0.0 && current < previous {
        Signal::Sell
    } else {
        Signal::Hold
    }
}

/// Fades any single-candle move larger than `threshold`
pub fn scalping_signal(closes: &[f64], threshold: f64) -> Signal {
    let [.., previous, current] = closes else {
        return Signal::Hold;
    };
    if *previous == 0.0 {
        return Signal::Hold;
    }
    let spread = (current - previous).abs() / previous;
    if spread > threshold {
        if current > previous {
            Signal::Sell
        } else {
            Signal::Buy
        }
    } else {
        Signal::Hold
    }
}

pub fn signal_for(strategy: Strategy, closes: &[f64]) -> Signal {
    match strategy {
        Strategy::RsiEma => rsi_ema_signal(closes, RSI_PERIOD, EMA_PERIOD),
        Strategy::Momentum => momentum_signal(closes, MOMENTUM_PERIOD),
        Strategy::Scalping => scalping_signal(closes, SCALPING_THRESHOLD),
        // No leader feed to copy from
        Strategy::CopyTrading => Signal::Hold,
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketConditions {
    pub volume: f64,
    #[serde(rename = "change24h")]
    pub change_24h: f64,
    pub volatility: f64,
}

/// Latest reading of each indicator; `None` until there is enough history
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndicatorSnapshot {
    pub rsi: Option<f64>,
    pub ema: Option<f64>,
    pub bollinger: Option<Bands>,
    pub macd: Option<Macd>,
}

impl IndicatorSnapshot {
    pub fn from_closes(closes: &[f64]) -> Self {
        fn last<T: Copy>(series: Vec<Option<T>>) -> Option<T> {
            series.last().copied().flatten()
        }
        Self {
            rsi: last(indicators::rsi(closes, RSI_PERIOD)),
            ema: last(indicators::ema(closes, EMA_PERIOD)),
            bollinger: last(indicators::bollinger_bands(closes, BOLLINGER_PERIOD, BOLLINGER_WIDTH)),
            macd: last(indicators::macd(closes, MACD_FAST, MACD_SLOW, MACD_SIGNAL)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub symbol: String,
    pub current_price: f64,
    pub strategy: Strategy,
    /// Always `hold`: a dry run never acts
    pub signal: Signal,
    /// What the strategy would do on these candles
    pub strategy_signal: Signal,
    pub confidence: f64,
    pub market_conditions: MarketConditions,
    pub indicators: IndicatorSnapshot,
}

/// Dry run of a bot's strategy against current market data
pub fn analyze(bot: &Bot, market: &MarketData, klines: &[Kline]) -> Analysis {
    let closes: Vec<f64> = klines.iter().map(|k| k.close).collect();
    let strategy_signal = signal_for(bot.strategy, &closes);
    debug!(
        bot_id = %bot.id,
        strategy = %bot.strategy,
        candles = closes.len(),
        signal = ?strategy_signal,
        "Analyzed bot"
    );

    Analysis {
        symbol: bot.symbol.clone(),
        current_price: market.price,
        strategy: bot.strategy,
        signal: Signal::Hold,
        strategy_signal,
        confidence: DEFAULT_CONFIDENCE,
        market_conditions: MarketConditions {
            volume: market.volume,
            change_24h: market.change_24h,
            volatility: market.change_24h.abs(),
        },
        indicators: IndicatorSnapshot::from_closes(&closes),
    }
}
