use crate::types::TradeSide;

/// Share of the balance a single position may never exceed
pub const MAX_BALANCE_SHARE: f64 = 0.1;

/// Position value risking `risk` of the balance with a stop `stop_loss` away,
/// capped at a tenth of the balance. Fractions, not percentages.
pub fn position_size(balance: f64, risk: f64, stop_loss: f64) -> f64 {
    if balance <= 0.0 || risk <= 0.0 || stop_loss <= 0.0 {
        return 0.0;
    }
    let sized = balance * risk / stop_loss;
    sized.min(balance * MAX_BALANCE_SHARE)
}

pub fn stop_loss_price(entry: f64, side: TradeSide, stop_loss: f64) -> f64 {
    match side {
        TradeSide::Buy => entry * (1.0 - stop_loss),
        TradeSide::Sell => entry * (1.0 + stop_loss),
    }
}

pub fn take_profit_price(entry: f64, side: TradeSide, take_profit: f64) -> f64 {
    match side {
        TradeSide::Buy => entry * (1.0 + take_profit),
        TradeSide::Sell => entry * (1.0 - take_profit),
    }
}
