//! Signal Engine - indicator aggregation and classification
//!
//! Runs the indicator catalog over a candle window (plus an optional order
//! book), sums the directional scores under the configured caps, classifies
//! the total into one of the nine bands and derives a penalty-adjusted
//! confidence. Pure given its inputs; the only state is a last-signal cache
//! per symbol.

pub mod indicators;
pub mod math;

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use tracing::{error, trace};

use crate::config::{ConfidencePenalties, IndicatorsConfig, SignalConfig};
use crate::types::{
    AtrReading, Candle, IndicatorResult, IndicatorSignal, OrderBook, Signal, SignalAction,
    SignalClass,
};

/// Indicators excluded from the directional sum. ATR is a volatility gauge,
/// DOM goes through its own microstructure cap.
const NON_DIRECTIONAL: &[&str] = &["atr"];
const MICROSTRUCTURE: &[&str] = &["dom"];

pub struct SignalEngine {
    config: SignalConfig,
    indicators: IndicatorsConfig,
    last_signals: RwLock<HashMap<String, Signal>>,
}

impl SignalEngine {
    pub fn new(config: SignalConfig, indicators: IndicatorsConfig) -> Self {
        Self {
            config,
            indicators,
            last_signals: RwLock::new(HashMap::new()),
        }
    }

    /// Evaluate the full catalog for one symbol.
    pub fn evaluate(
        &self,
        symbol: &str,
        candles: &[Candle],
        book: Option<&OrderBook>,
        now_ms: i64,
    ) -> Signal {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let highs: Vec<f64> = candles.iter().map(|c| c.high).collect();
        let lows: Vec<f64> = candles.iter().map(|c| c.low).collect();
        let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();

        let cfg = &self.indicators;
        let mut results: BTreeMap<String, IndicatorResult> = BTreeMap::new();
        results.insert("rsi".into(), indicators::rsi(&closes, &cfg.rsi));
        results.insert("stoch_rsi".into(), indicators::stoch_rsi(&closes, &cfg.stoch_rsi));
        results.insert("macd".into(), indicators::macd(&closes, &cfg.macd));
        results.insert("bollinger".into(), indicators::bollinger(&closes, &cfg.bollinger));
        results.insert(
            "williams_r".into(),
            indicators::williams_r(&highs, &lows, &closes, &cfg.williams_r),
        );
        results.insert(
            "stochastic".into(),
            indicators::stochastic(&highs, &lows, &closes, &cfg.stochastic),
        );
        results.insert("ema_trend".into(), indicators::ema_trend(&closes, &cfg.ema_trend));
        results.insert(
            "awesome".into(),
            indicators::awesome_oscillator(&highs, &lows, &cfg.awesome),
        );
        results.insert("kdj".into(), indicators::kdj(&highs, &lows, &closes, &cfg.kdj));
        results.insert("obv".into(), indicators::obv(&closes, &volumes, &cfg.obv));
        results.insert("cmf".into(), indicators::cmf(candles, &cfg.cmf));
        results.insert("cci".into(), indicators::cci(&highs, &lows, &closes, &cfg.cci));

        let (atr_result, atr) = indicators::atr_reading(&highs, &lows, &closes, &cfg.atr);
        results.insert("atr".into(), atr_result);

        if let Some(book) = book {
            results.insert("dom".into(), indicators::dom(book, &cfg.dom));
        }

        let indicator_sum: i32 = results
            .iter()
            .filter(|(name, _)| {
                !NON_DIRECTIONAL.contains(&name.as_str()) && !MICROSTRUCTURE.contains(&name.as_str())
            })
            .map(|(_, r)| r.score)
            .sum();
        let indicator_score = indicator_sum.clamp(-self.config.indicator_cap, self.config.indicator_cap);

        let micro_sum = results.get("dom").map(|r| r.score).unwrap_or(0);
        let microstructure_score = micro_sum.clamp(-self.config.micro_cap, self.config.micro_cap);

        let total_score = (indicator_score + microstructure_score)
            .clamp(-self.config.total_cap, self.config.total_cap);

        let classification = self.classify(total_score);
        let action = if classification.is_bullish() {
            SignalAction::Long
        } else if classification.is_bearish() {
            SignalAction::Short
        } else {
            SignalAction::Hold
        };

        let mut bullish_count = 0usize;
        let mut bearish_count = 0usize;
        let mut directional_total = 0usize;
        for (name, result) in &results {
            if NON_DIRECTIONAL.contains(&name.as_str()) {
                continue;
            }
            directional_total += 1;
            match result.signal {
                IndicatorSignal::Buy => bullish_count += 1,
                IndicatorSignal::Sell => bearish_count += 1,
                IndicatorSignal::Neutral => {}
            }
        }
        let confluence = if directional_total > 0 {
            bullish_count.max(bearish_count) as f64 / directional_total as f64
        } else {
            0.0
        };

        let confidence = apply_confidence_penalties(
            &self.config.penalties,
            total_score,
            atr.as_ref(),
            bullish_count,
            bearish_count,
            confluence,
        );

        trace!(
            symbol = %symbol,
            total = total_score,
            class = %classification,
            confidence = confidence,
            "signal evaluated"
        );

        let signal = Signal {
            symbol: symbol.to_string(),
            total_score,
            indicator_score,
            microstructure_score,
            classification,
            action,
            confidence,
            bullish_count,
            bearish_count,
            confluence,
            indicators: results,
            atr,
            timestamp: now_ms,
        };

        if let Ok(mut cache) = self.last_signals.write() {
            cache.insert(symbol.to_string(), signal.clone());
        }
        signal
    }

    /// Linear band scan; the first band containing the score wins.
    pub fn classify(&self, score: i32) -> SignalClass {
        for band in &self.config.bands {
            if score >= band.min && score <= band.max {
                return band.class;
            }
        }
        // A valid band table partitions the whole range, so this is an
        // invariant violation: complain loudly and stay flat.
        error!(score, "total score outside every classification band");
        SignalClass::Neutral
    }

    /// Last computed signal for a symbol, if any.
    pub fn last_signal(&self, symbol: &str) -> Option<Signal> {
        self.last_signals.read().ok()?.get(symbol).cloned()
    }
}

/// Start at 1.0 and subtract each configured penalty once; clamp to [0, 1].
pub(crate) fn apply_confidence_penalties(
    penalties: &ConfidencePenalties,
    total_score: i32,
    atr: Option<&AtrReading>,
    bullish_count: usize,
    bearish_count: usize,
    confluence: f64,
) -> f64 {
    let mut confidence = 1.0;

    if total_score.abs() < penalties.low_score_threshold {
        confidence -= penalties.low_score_penalty;
    }
    if let Some(reading) = atr {
        if reading.atr_pct > penalties.high_vol_atr_pct {
            confidence -= penalties.high_vol_penalty;
        } else if reading.atr_pct > penalties.elevated_vol_atr_pct {
            confidence -= penalties.elevated_vol_penalty;
        }
    }
    let conflicts = bullish_count.min(bearish_count);
    confidence -= penalties.conflict_penalty_per_pair * conflicts as f64;
    if confluence < penalties.low_confluence_threshold {
        confidence -= penalties.low_confluence_penalty;
    }

    confidence.clamp(0.0, 1.0)
}
