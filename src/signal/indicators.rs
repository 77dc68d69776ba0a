//! The indicator catalog.
//!
//! Each indicator is a pure function from prepared candle series (plus an
//! order book for DOM) to an [`IndicatorResult`]. Weights and thresholds come
//! from configuration; the relative fractions for secondary conditions are
//! fixed. Conditions are evaluated in order and the first match wins. Scores
//! are rounded to the nearest integer and clamped to the indicator's
//! `max_score` at this boundary, so downstream arithmetic stays bounded.
//!
//! Indicators below their minimum data length return a neutral result with
//! score 0 instead of an error.

use crate::config::{
    AtrParams, AwesomeParams, BollingerParams, CciParams, CmfParams, DomParams, EmaTrendParams,
    KdjParams, MacdParams, ObvParams, RsiParams, StochRsiParams, StochasticParams, WilliamsParams,
};
use crate::signal::math;
use crate::types::{AtrReading, Candle, IndicatorResult, IndicatorSignal, OrderBook, VolRegime};

use crate::types::IndicatorSignal::{Buy, Neutral, Sell};

/// Round and clamp a raw score into an integer result.
fn score_result(value: f64, raw: f64, signal: IndicatorSignal, max_score: i32) -> IndicatorResult {
    let bound = max_score.max(0) as f64;
    let score = raw.round().clamp(-bound, bound) as i32;
    IndicatorResult { value, score, signal }
}

/// RSI with Wilder smoothing. Oversold readings score bullish, scaled by how
/// deep into the zone the value sits; a turn off the extreme adds +5.
pub fn rsi(closes: &[f64], cfg: &RsiParams) -> IndicatorResult {
    let series = math::rsi_series(closes, cfg.period);
    let (prev, last) = match math::last_two(&series) {
        Some(pair) => pair,
        None => return IndicatorResult::neutral(series.last().copied().unwrap_or(50.0)),
    };

    if last <= cfg.oversold {
        let mut raw = cfg.weight * (1.0 + (cfg.oversold - last) / cfg.oversold);
        if last > prev {
            raw += 5.0;
        }
        return score_result(last, raw, Buy, cfg.max_score);
    }
    if last >= cfg.overbought {
        let mut raw = cfg.weight * (1.0 + (last - cfg.overbought) / (100.0 - cfg.overbought));
        if last < prev {
            raw += 5.0;
        }
        return score_result(last, -raw, Sell, cfg.max_score);
    }
    IndicatorResult::neutral(last)
}

/// Stochastic RSI. A %K/%D cross inside an extreme zone awards full weight;
/// sitting in the zone without a cross awards half.
pub fn stoch_rsi(closes: &[f64], cfg: &StochRsiParams) -> IndicatorResult {
    let rsis = math::rsi_series(closes, cfg.rsi_period);
    let raw_k = math::stoch_k_series(&rsis, &rsis, &rsis, cfg.stoch_period);
    let k_series = math::sma_series(&raw_k, cfg.k_period);
    let d_series = math::sma_series(&k_series, cfg.d_period);

    let (pk, k) = match math::last_two(&k_series) {
        Some(pair) => pair,
        None => return IndicatorResult::neutral(50.0),
    };
    let (pd, d) = match math::last_two(&d_series) {
        Some(pair) => pair,
        None => return IndicatorResult::neutral(k),
    };

    let crossed_up = pk <= pd && k > d;
    let crossed_down = pk >= pd && k < d;

    if crossed_up && (k < cfg.oversold || pk < cfg.oversold) {
        return score_result(k, cfg.weight, Buy, cfg.max_score);
    }
    if crossed_down && (k > cfg.overbought || pk > cfg.overbought) {
        return score_result(k, -cfg.weight, Sell, cfg.max_score);
    }
    if k < cfg.oversold {
        return score_result(k, cfg.weight / 2.0, Buy, cfg.max_score);
    }
    if k > cfg.overbought {
        return score_result(k, -cfg.weight / 2.0, Sell, cfg.max_score);
    }
    IndicatorResult::neutral(k)
}

/// MACD histogram momentum. Growing same-sign histogram scores full weight,
/// a fading one 0.67x, a fresh signal-line cross 0.83x.
pub fn macd(closes: &[f64], cfg: &MacdParams) -> IndicatorResult {
    if closes.len() < cfg.slow + cfg.signal {
        return IndicatorResult::neutral(0.0);
    }
    let fast = math::ema_full(closes, cfg.fast);
    let slow = math::ema_full(closes, cfg.slow);
    let line: Vec<f64> = fast.iter().zip(&slow).map(|(f, s)| f - s).collect();
    let signal = math::ema_full(&line, cfg.signal);
    let hist: Vec<f64> = line.iter().zip(&signal).map(|(m, s)| m - s).collect();

    let (ph, h) = match math::last_two(&hist) {
        Some(pair) => pair,
        None => return IndicatorResult::neutral(0.0),
    };
    let (pm, m) = math::last_two(&line).unwrap_or((0.0, 0.0));
    let (ps, s) = math::last_two(&signal).unwrap_or((0.0, 0.0));

    // Accelerating: histogram expanding away from zero.
    if h > 0.0 && ph > 0.0 && h > ph {
        return score_result(h, cfg.weight, Buy, cfg.max_score);
    }
    if h < 0.0 && ph < 0.0 && h < ph {
        return score_result(h, -cfg.weight, Sell, cfg.max_score);
    }
    // Decelerating: same sign, shrinking.
    if h > 0.0 && ph > 0.0 {
        return score_result(h, cfg.weight * 0.67, Buy, cfg.max_score);
    }
    if h < 0.0 && ph < 0.0 {
        return score_result(h, -cfg.weight * 0.67, Sell, cfg.max_score);
    }
    // Fresh cross of the signal line this bar.
    if pm <= ps && m > s {
        return score_result(h, cfg.weight * 0.83, Buy, cfg.max_score);
    }
    if pm >= ps && m < s {
        return score_result(h, -cfg.weight * 0.83, Sell, cfg.max_score);
    }
    IndicatorResult::neutral(h)
}

/// Bollinger Bands, mean-reversion scored. Value is %B.
pub fn bollinger(closes: &[f64], cfg: &BollingerParams) -> IndicatorResult {
    if closes.len() < cfg.period + 1 {
        return IndicatorResult::neutral(0.5);
    }
    let window = &closes[closes.len() - cfg.period..];
    let prev_window = &closes[closes.len() - cfg.period - 1..closes.len() - 1];

    let mid = window.iter().sum::<f64>() / cfg.period as f64;
    let sd = math::stddev(window);
    let upper = mid + cfg.std_dev * sd;
    let lower = mid - cfg.std_dev * sd;

    let prev_mid = prev_window.iter().sum::<f64>() / cfg.period as f64;
    let prev_sd = math::stddev(prev_window);
    let prev_upper = prev_mid + cfg.std_dev * prev_sd;
    let prev_lower = prev_mid - cfg.std_dev * prev_sd;

    let close = closes[closes.len() - 1];
    let prev_close = closes[closes.len() - 2];
    let width = upper - lower;
    let percent_b = if width > 0.0 { (close - lower) / width } else { 0.5 };

    if prev_close <= prev_lower && close > prev_close {
        return score_result(percent_b, cfg.weight, Buy, cfg.max_score);
    }
    if close <= lower {
        return score_result(percent_b, cfg.weight / 2.0, Buy, cfg.max_score);
    }
    if prev_close >= prev_upper && close < prev_close {
        return score_result(percent_b, -cfg.weight, Sell, cfg.max_score);
    }
    if close >= upper {
        return score_result(percent_b, -cfg.weight / 2.0, Sell, cfg.max_score);
    }
    // Walking the band while still inside it.
    if percent_b <= 0.1 {
        return score_result(percent_b, cfg.weight * 0.25, Buy, cfg.max_score);
    }
    if percent_b >= 0.9 {
        return score_result(percent_b, -cfg.weight * 0.25, Sell, cfg.max_score);
    }
    IndicatorResult::neutral(percent_b)
}

/// Williams %R. A turn up from the oversold floor scores 1.25x weight.
pub fn williams_r(
    highs: &[f64],
    lows: &[f64],
    closes: &[f64],
    cfg: &WilliamsParams,
) -> IndicatorResult {
    let ks = math::stoch_k_series(highs, lows, closes, cfg.period);
    let (pk, k) = match math::last_two(&ks) {
        Some(pair) => pair,
        None => return IndicatorResult::neutral(-50.0),
    };
    let wr = k - 100.0;
    let prev_wr = pk - 100.0;

    if prev_wr <= cfg.oversold && wr > prev_wr {
        return score_result(wr, cfg.weight * 1.25, Buy, cfg.max_score);
    }
    if wr <= cfg.oversold {
        return score_result(wr, cfg.weight, Buy, cfg.max_score);
    }
    if prev_wr >= cfg.overbought && wr < prev_wr {
        return score_result(wr, -cfg.weight * 1.25, Sell, cfg.max_score);
    }
    if wr >= cfg.overbought {
        return score_result(wr, -cfg.weight, Sell, cfg.max_score);
    }
    IndicatorResult::neutral(wr)
}

/// Fast stochastic (%K with SMA %D). Same shape as Stochastic RSI with a
/// 0.56 fraction for the plain extreme zone.
pub fn stochastic(
    highs: &[f64],
    lows: &[f64],
    closes: &[f64],
    cfg: &StochasticParams,
) -> IndicatorResult {
    let k_series = math::stoch_k_series(highs, lows, closes, cfg.k_period);
    let d_series = math::sma_series(&k_series, cfg.d_period);

    let (pk, k) = match math::last_two(&k_series) {
        Some(pair) => pair,
        None => return IndicatorResult::neutral(50.0),
    };
    let (pd, d) = match math::last_two(&d_series) {
        Some(pair) => pair,
        None => return IndicatorResult::neutral(k),
    };

    let crossed_up = pk <= pd && k > d;
    let crossed_down = pk >= pd && k < d;

    if crossed_up && (k < cfg.oversold || pk < cfg.oversold) {
        return score_result(k, cfg.weight, Buy, cfg.max_score);
    }
    if crossed_down && (k > cfg.overbought || pk > cfg.overbought) {
        return score_result(k, -cfg.weight, Sell, cfg.max_score);
    }
    if k < cfg.oversold {
        return score_result(k, cfg.weight * 0.56, Buy, cfg.max_score);
    }
    if k > cfg.overbought {
        return score_result(k, -cfg.weight * 0.56, Sell, cfg.max_score);
    }
    IndicatorResult::neutral(k)
}

/// EMA trend stack (10/25/50 by default). Golden cross 1.05x, full alignment
/// 0.79x, price on the right side of the long EMA 0.26x.
pub fn ema_trend(closes: &[f64], cfg: &EmaTrendParams) -> IndicatorResult {
    if closes.len() < cfg.long + 1 {
        return IndicatorResult::neutral(0.0);
    }
    let short = math::ema_full(closes, cfg.short);
    let medium = math::ema_full(closes, cfg.medium);
    let long = math::ema_full(closes, cfg.long);

    let (ps, s) = math::last_two(&short).unwrap_or((0.0, 0.0));
    let (pm, m) = math::last_two(&medium).unwrap_or((0.0, 0.0));
    let l = *long.last().unwrap_or(&0.0);
    let close = closes[closes.len() - 1];

    if ps <= pm && s > m {
        return score_result(s, cfg.weight * 1.05, Buy, cfg.max_score);
    }
    if ps >= pm && s < m {
        return score_result(s, -cfg.weight * 1.05, Sell, cfg.max_score);
    }
    if s > m && m > l {
        return score_result(s, cfg.weight * 0.79, Buy, cfg.max_score);
    }
    if s < m && m < l {
        return score_result(s, -cfg.weight * 0.79, Sell, cfg.max_score);
    }
    if close > l {
        return score_result(s, cfg.weight * 0.26, Buy, cfg.max_score);
    }
    if close < l {
        return score_result(s, -cfg.weight * 0.26, Sell, cfg.max_score);
    }
    IndicatorResult::neutral(s)
}

/// Awesome Oscillator over median prices. Zero-line cross scores full weight,
/// a saucer 0.71x, plain same-sign momentum 0.29x.
pub fn awesome_oscillator(highs: &[f64], lows: &[f64], cfg: &AwesomeParams) -> IndicatorResult {
    let len = highs.len().min(lows.len());
    if len < cfg.slow + 2 {
        return IndicatorResult::neutral(0.0);
    }
    let medians: Vec<f64> = (0..len).map(|i| (highs[i] + lows[i]) / 2.0).collect();
    let fast = math::sma_series(&medians, cfg.fast);
    let slow = math::sma_series(&medians, cfg.slow);
    let offset = fast.len() - slow.len();
    let ao: Vec<f64> = slow
        .iter()
        .enumerate()
        .map(|(i, s)| fast[i + offset] - s)
        .collect();
    if ao.len() < 3 {
        return IndicatorResult::neutral(ao.last().copied().unwrap_or(0.0));
    }
    let a0 = ao[ao.len() - 1];
    let a1 = ao[ao.len() - 2];
    let a2 = ao[ao.len() - 3];

    if a1 <= 0.0 && a0 > 0.0 {
        return score_result(a0, cfg.weight, Buy, cfg.max_score);
    }
    if a1 >= 0.0 && a0 < 0.0 {
        return score_result(a0, -cfg.weight, Sell, cfg.max_score);
    }
    // Saucer: a dip in momentum that resolves in the prevailing direction.
    if a0 > 0.0 && a1 < a2 && a0 > a1 {
        return score_result(a0, cfg.weight * 0.71, Buy, cfg.max_score);
    }
    if a0 < 0.0 && a1 > a2 && a0 < a1 {
        return score_result(a0, -cfg.weight * 0.71, Sell, cfg.max_score);
    }
    if a0 > 0.0 {
        return score_result(a0, cfg.weight * 0.29, Buy, cfg.max_score);
    }
    if a0 < 0.0 {
        return score_result(a0, -cfg.weight * 0.29, Sell, cfg.max_score);
    }
    IndicatorResult::neutral(a0)
}

/// KDJ. The J line leaving [0, 100] scores full weight; K/D crosses in an
/// extreme zone 0.88x; sitting in the zone 0.59x.
pub fn kdj(highs: &[f64], lows: &[f64], closes: &[f64], cfg: &KdjParams) -> IndicatorResult {
    let rsv = math::stoch_k_series(highs, lows, closes, cfg.period);
    if rsv.len() < 2 {
        return IndicatorResult::neutral(50.0);
    }
    let k_factor = (cfg.k_smooth as f64 - 1.0) / cfg.k_smooth as f64;
    let d_factor = (cfg.d_smooth as f64 - 1.0) / cfg.d_smooth as f64;

    let mut k = 50.0;
    let mut d = 50.0;
    let mut pk = k;
    let mut pd = d;
    for value in &rsv {
        pk = k;
        pd = d;
        k = k * k_factor + value * (1.0 - k_factor);
        d = d * d_factor + k * (1.0 - d_factor);
    }
    let j = 3.0 * k - 2.0 * d;

    if j < 0.0 {
        return score_result(j, cfg.weight, Buy, cfg.max_score);
    }
    if j > 100.0 {
        return score_result(j, -cfg.weight, Sell, cfg.max_score);
    }
    if pk <= pd && k > d && d < 20.0 {
        return score_result(j, cfg.weight * 0.88, Buy, cfg.max_score);
    }
    if pk >= pd && k < d && d > 80.0 {
        return score_result(j, -cfg.weight * 0.88, Sell, cfg.max_score);
    }
    if k < 20.0 {
        return score_result(j, cfg.weight * 0.59, Buy, cfg.max_score);
    }
    if k > 80.0 {
        return score_result(j, -cfg.weight * 0.59, Sell, cfg.max_score);
    }
    IndicatorResult::neutral(j)
}

/// Bars compared when judging OBV vs price direction. One bar cannot
/// diverge (each OBV step carries the price's sign); a short window can.
const OBV_LOOKBACK: usize = 5;

/// On-balance volume vs its SMA. Directional confirmation scores full weight,
/// a price/volume divergence 0.56x.
pub fn obv(closes: &[f64], volumes: &[f64], cfg: &ObvParams) -> IndicatorResult {
    let min_len = cfg.sma_period.max(OBV_LOOKBACK) + 1;
    if closes.len() < min_len {
        return IndicatorResult::neutral(0.0);
    }
    let series = math::obv_series(closes, volumes);
    if series.len() < min_len {
        return IndicatorResult::neutral(0.0);
    }
    let obv_sma = match math::sma(&series, cfg.sma_period) {
        Some(v) => v,
        None => return IndicatorResult::neutral(0.0),
    };
    let last_obv = series[series.len() - 1];
    let close = closes[closes.len() - 1];

    let price_dir = close - closes[closes.len() - 1 - OBV_LOOKBACK];
    let obv_dir = last_obv - series[series.len() - 1 - OBV_LOOKBACK];

    if price_dir > 0.0 && obv_dir > 0.0 && last_obv > obv_sma {
        return score_result(last_obv, cfg.weight, Buy, cfg.max_score);
    }
    if price_dir < 0.0 && obv_dir < 0.0 && last_obv < obv_sma {
        return score_result(last_obv, -cfg.weight, Sell, cfg.max_score);
    }
    if price_dir < 0.0 && obv_dir > 0.0 {
        return score_result(last_obv, cfg.weight * 0.56, Buy, cfg.max_score);
    }
    if price_dir > 0.0 && obv_dir < 0.0 {
        return score_result(last_obv, -cfg.weight * 0.56, Sell, cfg.max_score);
    }
    IndicatorResult::neutral(last_obv)
}

fn cmf_at(candles: &[Candle], period: usize, end: usize) -> f64 {
    let start = end + 1 - period;
    let mut money_flow = 0.0;
    let mut volume = 0.0;
    for candle in &candles[start..=end] {
        let range = candle.high - candle.low;
        if range > 0.0 {
            let multiplier = ((candle.close - candle.low) - (candle.high - candle.close)) / range;
            money_flow += multiplier * candle.volume;
        }
        volume += candle.volume;
    }
    if volume > 0.0 {
        money_flow / volume
    } else {
        0.0
    }
}

/// Chaikin Money Flow. |CMF| above the strong threshold scores full weight,
/// plain same-sign 0.53x; a zero-line cross adds ±5.
pub fn cmf(candles: &[Candle], cfg: &CmfParams) -> IndicatorResult {
    if candles.len() < cfg.period + 1 {
        return IndicatorResult::neutral(0.0);
    }
    let last = cmf_at(candles, cfg.period, candles.len() - 1);
    let prev = cmf_at(candles, cfg.period, candles.len() - 2);

    let (mut raw, mut signal) = if last > cfg.strong_threshold {
        (cfg.weight, Buy)
    } else if last < -cfg.strong_threshold {
        (-cfg.weight, Sell)
    } else if last > 0.0 {
        (cfg.weight * 0.53, Buy)
    } else if last < 0.0 {
        (-cfg.weight * 0.53, Sell)
    } else {
        (0.0, Neutral)
    };

    if prev <= 0.0 && last > 0.0 {
        raw += 5.0;
        signal = Buy;
    } else if prev >= 0.0 && last < 0.0 {
        raw -= 5.0;
        signal = Sell;
    }

    if raw == 0.0 {
        return IndicatorResult::neutral(last);
    }
    score_result(last, raw, signal, cfg.max_score)
}

/// Average True Range regime. Non-directional: the score is always zero and
/// the reading feeds position sizing and confidence penalties instead.
pub fn atr_reading(
    highs: &[f64],
    lows: &[f64],
    closes: &[f64],
    cfg: &AtrParams,
) -> (IndicatorResult, Option<AtrReading>) {
    let value = match math::atr(highs, lows, closes, cfg.period) {
        Some(v) => v,
        None => return (IndicatorResult::neutral(0.0), None),
    };
    let close = closes[closes.len() - 1];
    if close <= 0.0 {
        return (IndicatorResult::neutral(value), None);
    }
    let atr_pct = value / close * 100.0;
    let regime = if atr_pct < cfg.low_pct {
        VolRegime::Low
    } else if atr_pct < cfg.high_pct {
        VolRegime::Medium
    } else {
        VolRegime::High
    };
    (
        IndicatorResult::neutral(value),
        Some(AtrReading { atr: value, atr_pct, regime }),
    )
}

fn cci_at(tps: &[f64], period: usize, end: usize) -> f64 {
    let window = &tps[end + 1 - period..=end];
    let mean = window.iter().sum::<f64>() / period as f64;
    let dev = math::mean_abs_dev(window, mean);
    if dev <= 0.0 {
        return 0.0;
    }
    (tps[end] - mean) / (0.015 * dev)
}

/// Commodity Channel Index, momentum scored. |CCI| > 200 scores full weight,
/// > 100 scores 0.625x; a zero-line cross adds ±5.
pub fn cci(highs: &[f64], lows: &[f64], closes: &[f64], cfg: &CciParams) -> IndicatorResult {
    let len = closes.len();
    if len < cfg.period + 1 || highs.len() != len || lows.len() != len {
        return IndicatorResult::neutral(0.0);
    }
    let tps: Vec<f64> = (0..len)
        .map(|i| (highs[i] + lows[i] + closes[i]) / 3.0)
        .collect();
    let last = cci_at(&tps, cfg.period, len - 1);
    let prev = cci_at(&tps, cfg.period, len - 2);

    let (mut raw, mut signal) = if last > cfg.strong {
        (cfg.weight, Buy)
    } else if last < -cfg.strong {
        (-cfg.weight, Sell)
    } else if last > cfg.moderate {
        (cfg.weight * 0.625, Buy)
    } else if last < -cfg.moderate {
        (-cfg.weight * 0.625, Sell)
    } else {
        (0.0, Neutral)
    };

    if prev <= 0.0 && last > 0.0 {
        raw += 5.0;
        signal = Buy;
    } else if prev >= 0.0 && last < 0.0 {
        raw -= 5.0;
        signal = Sell;
    }

    if raw == 0.0 {
        return IndicatorResult::neutral(last);
    }
    score_result(last, raw, signal, cfg.max_score)
}

/// Depth-of-market imbalance. Band contributions are additive: the moderate
/// band earns half weight and the strong band stacks the other half.
pub fn dom(book: &OrderBook, cfg: &DomParams) -> IndicatorResult {
    let bid_volume = book.bid_volume();
    let ask_volume = book.ask_volume();
    let total = bid_volume + ask_volume;
    if total <= 0.0 {
        return IndicatorResult::neutral(0.0);
    }
    let imbalance = (bid_volume - ask_volume) / total;

    let mut raw = 0.0;
    if imbalance > cfg.moderate_imbalance {
        raw += cfg.weight / 2.0;
        if imbalance > cfg.strong_imbalance {
            raw += cfg.weight / 2.0;
        }
    } else if imbalance < -cfg.moderate_imbalance {
        raw -= cfg.weight / 2.0;
        if imbalance < -cfg.strong_imbalance {
            raw -= cfg.weight / 2.0;
        }
    }

    let signal = if imbalance > cfg.moderate_imbalance {
        Buy
    } else if imbalance < -cfg.moderate_imbalance {
        Sell
    } else {
        Neutral
    };
    if raw == 0.0 {
        return IndicatorResult::neutral(imbalance);
    }
    score_result(imbalance, raw, signal, cfg.max_score)
}
