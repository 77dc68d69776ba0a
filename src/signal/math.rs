//! Series math primitives for the indicator catalog.
//!
//! All functions are pure, never panic on short input, and return empty
//! series (or `None`) below their minimum data length.

/// Simple moving average of the trailing `period` values.
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}

/// Rolling SMA series. Element `i` covers the window ending at
/// `values[i + period - 1]`; length is `len - period + 1`.
pub fn sma_series(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(values.len() - period + 1);
    let mut sum: f64 = values[..period].iter().sum();
    out.push(sum / period as f64);
    for i in period..values.len() {
        sum += values[i] - values[i - period];
        out.push(sum / period as f64);
    }
    out
}

/// Population standard deviation of a window.
pub fn stddev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// Mean absolute deviation around `mean`.
pub fn mean_abs_dev(values: &[f64], mean: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().map(|v| (v - mean).abs()).sum::<f64>() / values.len() as f64
}

/// Full-length EMA seeded with the first value (streaming form).
pub fn ema_full(values: &[f64], period: usize) -> Vec<f64> {
    if values.is_empty() || period == 0 {
        return Vec::new();
    }
    let k = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut prev = values[0];
    out.push(prev);
    for &v in &values[1..] {
        prev = v * k + prev * (1.0 - k);
        out.push(prev);
    }
    out
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss <= 0.0 {
        if avg_gain <= 0.0 {
            return 50.0;
        }
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

/// Wilder-smoothed RSI series. First element corresponds to
/// `closes[period]`; length is `len - period`.
pub fn rsi_series(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() <= period {
        return Vec::new();
    }
    let mut gains = 0.0;
    let mut losses = 0.0;
    for i in 1..=period {
        let delta = closes[i] - closes[i - 1];
        if delta >= 0.0 {
            gains += delta;
        } else {
            losses -= delta;
        }
    }
    let p = period as f64;
    let mut avg_gain = gains / p;
    let mut avg_loss = losses / p;
    let mut out = Vec::with_capacity(closes.len() - period);
    out.push(rsi_from_averages(avg_gain, avg_loss));
    for i in period + 1..closes.len() {
        let delta = closes[i] - closes[i - 1];
        let (gain, loss) = if delta >= 0.0 { (delta, 0.0) } else { (0.0, -delta) };
        avg_gain = (avg_gain * (p - 1.0) + gain) / p;
        avg_loss = (avg_loss * (p - 1.0) + loss) / p;
        out.push(rsi_from_averages(avg_gain, avg_loss));
    }
    out
}

/// Wilder-smoothed Average True Range. Needs `period + 1` candles.
pub fn atr(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Option<f64> {
    let len = closes.len();
    if period == 0 || len <= period || highs.len() != len || lows.len() != len {
        return None;
    }
    let true_range = |i: usize| -> f64 {
        let hl = highs[i] - lows[i];
        let hc = (highs[i] - closes[i - 1]).abs();
        let lc = (lows[i] - closes[i - 1]).abs();
        hl.max(hc).max(lc)
    };
    let p = period as f64;
    let mut value = (1..=period).map(true_range).sum::<f64>() / p;
    for i in period + 1..len {
        value = (value * (p - 1.0) + true_range(i)) / p;
    }
    Some(value)
}

/// Raw stochastic %K series over `period`-bar high/low windows.
/// Element `i` corresponds to bar `i + period - 1`.
pub fn stoch_k_series(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Vec<f64> {
    let len = closes.len();
    if period == 0 || len < period || highs.len() != len || lows.len() != len {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(len - period + 1);
    for end in period - 1..len {
        let start = end + 1 - period;
        let hh = highest(&highs[start..=end]);
        let ll = lowest(&lows[start..=end]);
        let range = hh - ll;
        if range <= 0.0 {
            out.push(50.0);
        } else {
            out.push((closes[end] - ll) / range * 100.0);
        }
    }
    out
}

/// On-balance volume series; same length as input, starting at zero.
pub fn obv_series(closes: &[f64], volumes: &[f64]) -> Vec<f64> {
    let len = closes.len().min(volumes.len());
    if len == 0 {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(len);
    let mut obv = 0.0;
    out.push(obv);
    for i in 1..len {
        if closes[i] > closes[i - 1] {
            obv += volumes[i];
        } else if closes[i] < closes[i - 1] {
            obv -= volumes[i];
        }
        out.push(obv);
    }
    out
}

pub fn highest(values: &[f64]) -> f64 {
    values.iter().copied().fold(f64::MIN, f64::max)
}

pub fn lowest(values: &[f64]) -> f64 {
    values.iter().copied().fold(f64::MAX, f64::min)
}

/// Last two elements of a series, as (previous, last).
pub fn last_two(values: &[f64]) -> Option<(f64, f64)> {
    if values.len() < 2 {
        return None;
    }
    Some((values[values.len() - 2], values[values.len() - 1]))
}
