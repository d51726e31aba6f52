//! Indicator series over close prices. Every function returns one value per
//! input price; positions without enough history are `None`.

use serde::Serialize;

pub fn sma(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    if period == 0 {
        return vec![None; prices.len()];
    }
    let mut out = Vec::with_capacity(prices.len());
    let mut sum = 0.0;
    for (i, price) in prices.iter().enumerate() {
        sum += price;
        if i >= period {
            sum -= prices[i - period];
        }
        out.push((i + 1 >= period).then(|| sum / period as f64));
    }
    out
}

/// Exponential moving average with `alpha = 2 / (span + 1)` and adjusted
/// weights, so early values are not biased toward the first price.
pub fn ema(prices: &[f64], span: usize) -> Vec<Option<f64>> {
    if span == 0 {
        return vec![None; prices.len()];
    }
    let decay = 1.0 - 2.0 / (span as f64 + 1.0);
    let mut weighted = 0.0;
    let mut weights = 0.0;
    prices
        .iter()
        .map(|price| {
            weighted = price + decay * weighted;
            weights = 1.0 + decay * weights;
            Some(weighted / weights)
        })
        .collect()
}

fn ema_of(values: &[Option<f64>], span: usize) -> Vec<Option<f64>> {
    let decay = 1.0 - 2.0 / (span as f64 + 1.0);
    let mut weighted = 0.0;
    let mut weights = 0.0;
    values
        .iter()
        .map(|value| {
            let v = (*value)?;
            weighted = v + decay * weighted;
            weights = 1.0 + decay * weights;
            Some(weighted / weights)
        })
        .collect()
}

/// RSI from rolling mean gains and losses over `period` price changes.
/// A window with no losses reads 100; a flat window has no value.
pub fn rsi(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; prices.len()];
    if period == 0 || prices.len() <= period {
        return out;
    }
    let deltas: Vec<f64> = prices.windows(2).map(|w| w[1] - w[0]).collect();
    for end in period..=deltas.len() {
        let window = &deltas[end - period..end];
        let gain = window.iter().map(|d| d.max(0.0)).sum::<f64>() / period as f64;
        let loss = window.iter().map(|d| (-d).max(0.0)).sum::<f64>() / period as f64;
        out[end] = match (gain, loss) {
            (g, l) if l == 0.0 && g == 0.0 => None,
            (_, l) if l == 0.0 => Some(100.0),
            (g, l) => Some(100.0 - 100.0 / (1.0 + g / l)),
        };
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

/// Bollinger bands: SMA plus and minus `width` sample standard deviations
pub fn bollinger_bands(prices: &[f64], period: usize, width: f64) -> Vec<Option<Bands>> {
    let middle = sma(prices, period);
    middle
        .iter()
        .enumerate()
        .map(|(i, mean)| {
            let mean = (*mean)?;
            if period < 2 {
                return None;
            }
            let window = &prices[i + 1 - period..=i];
            let variance =
                window.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / (period - 1) as f64;
            let std = variance.sqrt();
            Some(Bands {
                upper: mean + width * std,
                middle: mean,
                lower: mean - width * std,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Macd {
    pub line: f64,
    pub signal: f64,
    pub histogram: f64,
}

pub fn macd(prices: &[f64], fast: usize, slow: usize, signal: usize) -> Vec<Option<Macd>> {
    let fast = ema(prices, fast);
    let slow = ema(prices, slow);
    let line: Vec<Option<f64>> = fast
        .iter()
        .zip(&slow)
        .map(|(f, s)| Some((*f)? - (*s)?))
        .collect();
    let signal_line = ema_of(&line, signal);
    line.iter()
        .zip(&signal_line)
        .map(|(l, s)| {
            let (line, signal) = ((*l)?, (*s)?);
            Some(Macd {
                line,
                signal,
                histogram: line - signal,
            })
        })
        .collect()
}
