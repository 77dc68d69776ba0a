//! Configuration management
//!
//! Loads from YAML files + environment variables via .env. Every section
//! carries serde defaults so a missing file yields the documented baseline;
//! `AppConfig::default()` is the same baseline and doubles as the test
//! fixture.

mod types;

pub use types::*;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::types::SignalClass;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub bot: BotConfig,
    pub signal: SignalConfig,
    pub indicators: IndicatorsConfig,
    pub risk: RiskConfig,
    pub paper: PaperConfig,
    pub screener: ScreenerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Trading mode: paper | live | backtest. Only paper is implemented;
    /// other values are rejected at load time.
    pub mode: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self { mode: "paper".to_string() }
    }
}

/// One classification band: a closed integer interval of total score.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Band {
    pub class: SignalClass,
    pub min: i32,
    pub max: i32,
}

/// Scoring caps, classification bands and confidence penalties.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// Cap on the directional indicator sum.
    pub indicator_cap: i32,
    /// Cap on the order-book (DOM) contribution.
    pub micro_cap: i32,
    /// Cap on the combined total score.
    pub total_cap: i32,
    /// Ordered bands; the first band containing the total score wins.
    pub bands: Vec<Band>,
    pub penalties: ConfidencePenalties,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            indicator_cap: 200,
            micro_cap: 20,
            total_cap: 220,
            bands: default_bands(),
            penalties: ConfidencePenalties::default(),
        }
    }
}

/// The default nine-band partition of [-220, 220].
pub fn default_bands() -> Vec<Band> {
    vec![
        Band { class: SignalClass::ExtremeBuy, min: 130, max: 220 },
        Band { class: SignalClass::StrongBuy, min: 90, max: 129 },
        Band { class: SignalClass::Buy, min: 60, max: 89 },
        Band { class: SignalClass::BuyWeak, min: 40, max: 59 },
        Band { class: SignalClass::Neutral, min: -39, max: 39 },
        Band { class: SignalClass::SellWeak, min: -59, max: -40 },
        Band { class: SignalClass::Sell, min: -89, max: -60 },
        Band { class: SignalClass::StrongSell, min: -129, max: -90 },
        Band { class: SignalClass::ExtremeSell, min: -220, max: -130 },
    ]
}

/// Confidence penalty table. Values are applied verbatim, so a config file
/// can retune the whole block.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ConfidencePenalties {
    pub low_score_threshold: i32,
    pub low_score_penalty: f64,
    pub high_vol_atr_pct: f64,
    pub high_vol_penalty: f64,
    pub elevated_vol_atr_pct: f64,
    pub elevated_vol_penalty: f64,
    pub conflict_penalty_per_pair: f64,
    pub low_confluence_threshold: f64,
    pub low_confluence_penalty: f64,
}

impl Default for ConfidencePenalties {
    fn default() -> Self {
        Self {
            low_score_threshold: 60,
            low_score_penalty: 0.10,
            high_vol_atr_pct: 6.0,
            high_vol_penalty: 0.06,
            elevated_vol_atr_pct: 4.0,
            elevated_vol_penalty: 0.03,
            conflict_penalty_per_pair: 0.02,
            low_confluence_threshold: 0.6,
            low_confluence_penalty: 0.05,
        }
    }
}

// ── Per-indicator parameters ────────────────────────────────────

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RsiParams {
    pub weight: f64,
    pub max_score: i32,
    pub period: usize,
    pub oversold: f64,
    pub overbought: f64,
}

impl Default for RsiParams {
    fn default() -> Self {
        Self { weight: 17.0, max_score: 34, period: 14, oversold: 30.0, overbought: 70.0 }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct StochRsiParams {
    pub weight: f64,
    pub max_score: i32,
    pub rsi_period: usize,
    pub stoch_period: usize,
    pub k_period: usize,
    pub d_period: usize,
    pub oversold: f64,
    pub overbought: f64,
}

impl Default for StochRsiParams {
    fn default() -> Self {
        Self {
            weight: 40.0,
            max_score: 40,
            rsi_period: 14,
            stoch_period: 14,
            k_period: 3,
            d_period: 3,
            oversold: 20.0,
            overbought: 80.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct MacdParams {
    pub weight: f64,
    pub max_score: i32,
    pub fast: usize,
    pub slow: usize,
    pub signal: usize,
}

impl Default for MacdParams {
    fn default() -> Self {
        Self { weight: 36.0, max_score: 36, fast: 12, slow: 26, signal: 9 }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct BollingerParams {
    pub weight: f64,
    pub max_score: i32,
    pub period: usize,
    pub std_dev: f64,
}

impl Default for BollingerParams {
    fn default() -> Self {
        Self { weight: 40.0, max_score: 40, period: 20, std_dev: 2.0 }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct WilliamsParams {
    pub weight: f64,
    pub max_score: i32,
    pub period: usize,
    pub oversold: f64,
    pub overbought: f64,
}

impl Default for WilliamsParams {
    fn default() -> Self {
        Self { weight: 40.0, max_score: 50, period: 14, oversold: -80.0, overbought: -20.0 }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct StochasticParams {
    pub weight: f64,
    pub max_score: i32,
    pub k_period: usize,
    pub d_period: usize,
    pub oversold: f64,
    pub overbought: f64,
}

impl Default for StochasticParams {
    fn default() -> Self {
        Self { weight: 18.0, max_score: 36, k_period: 14, d_period: 3, oversold: 20.0, overbought: 80.0 }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct EmaTrendParams {
    pub weight: f64,
    pub max_score: i32,
    pub short: usize,
    pub medium: usize,
    pub long: usize,
}

impl Default for EmaTrendParams {
    fn default() -> Self {
        Self { weight: 36.0, max_score: 38, short: 10, medium: 25, long: 50 }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct AwesomeParams {
    pub weight: f64,
    pub max_score: i32,
    pub fast: usize,
    pub slow: usize,
}

impl Default for AwesomeParams {
    fn default() -> Self {
        Self { weight: 34.0, max_score: 34, fast: 5, slow: 34 }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct KdjParams {
    pub weight: f64,
    pub max_score: i32,
    pub period: usize,
    pub k_smooth: usize,
    pub d_smooth: usize,
}

impl Default for KdjParams {
    fn default() -> Self {
        Self { weight: 34.0, max_score: 34, period: 9, k_smooth: 3, d_smooth: 3 }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ObvParams {
    pub weight: f64,
    pub max_score: i32,
    pub sma_period: usize,
}

impl Default for ObvParams {
    fn default() -> Self {
        Self { weight: 36.0, max_score: 36, sma_period: 20 }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct CmfParams {
    pub weight: f64,
    pub max_score: i32,
    pub period: usize,
    pub strong_threshold: f64,
}

impl Default for CmfParams {
    fn default() -> Self {
        Self { weight: 38.0, max_score: 38, period: 20, strong_threshold: 0.1 }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct AtrParams {
    pub weight: f64,
    pub max_score: i32,
    pub period: usize,
    /// ATR% below this is a LOW-volatility regime.
    pub low_pct: f64,
    /// ATR% at or above this is a HIGH-volatility regime.
    pub high_pct: f64,
}

impl Default for AtrParams {
    fn default() -> Self {
        Self { weight: 30.0, max_score: 30, period: 14, low_pct: 2.0, high_pct: 4.0 }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct CciParams {
    pub weight: f64,
    pub max_score: i32,
    pub period: usize,
    pub strong: f64,
    pub moderate: f64,
}

impl Default for CciParams {
    fn default() -> Self {
        Self { weight: 32.0, max_score: 32, period: 20, strong: 200.0, moderate: 100.0 }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct DomParams {
    pub weight: f64,
    pub max_score: i32,
    pub moderate_imbalance: f64,
    pub strong_imbalance: f64,
}

impl Default for DomParams {
    fn default() -> Self {
        Self { weight: 30.0, max_score: 30, moderate_imbalance: 0.1, strong_imbalance: 0.3 }
    }
}

/// The full indicator parameter set.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct IndicatorsConfig {
    pub rsi: RsiParams,
    pub stoch_rsi: StochRsiParams,
    pub macd: MacdParams,
    pub bollinger: BollingerParams,
    pub williams_r: WilliamsParams,
    pub stochastic: StochasticParams,
    pub ema_trend: EmaTrendParams,
    pub awesome: AwesomeParams,
    pub kdj: KdjParams,
    pub obv: ObvParams,
    pub cmf: CmfParams,
    pub atr: AtrParams,
    pub cci: CciParams,
    pub dom: DomParams,
}

/// Entry gates, sizing and exit parameters.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Daily drawdown fraction that blocks new entries (0.03 = 3%).
    pub max_daily_drawdown: f64,
    pub max_open_positions: usize,
    /// Minimum |total score| for entry.
    pub min_score: i32,
    /// Minimum count of indicators agreeing on the dominant direction.
    pub min_confluence: usize,
    pub min_confidence: f64,
    /// Base position size as an equity fraction.
    pub default_position_size: f64,
    pub max_position_size: f64,
    pub default_leverage: f64,
    pub max_leverage: f64,
    /// Stop-loss distance as ROI on margin.
    pub stop_loss_roi: f64,
    /// Take-profit distance as ROI on margin.
    pub take_profit_roi: f64,
    pub taker_fee: f64,
    pub maintenance_margin_rate: f64,
    /// Minimum distance to the liquidation price, as a fraction of price.
    pub min_liquidation_buffer: f64,
    /// Consecutive losses that latch the circuit breaker.
    pub circuit_breaker_threshold: u32,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_daily_drawdown: 0.03,
            max_open_positions: 5,
            min_score: 75,
            min_confluence: 4,
            min_confidence: 0.85,
            default_position_size: 0.10,
            max_position_size: 0.25,
            default_leverage: 5.0,
            max_leverage: 10.0,
            stop_loss_roi: 0.06,
            take_profit_roi: 0.15,
            taker_fee: 0.0006,
            maintenance_margin_rate: 0.005,
            min_liquidation_buffer: 0.05,
            circuit_breaker_threshold: 3,
        }
    }
}

/// Paper-trading cost model.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct PaperConfig {
    pub initial_balance: f64,
    pub taker_fee: f64,
    pub maker_fee: f64,
    /// Fill slippage as a fraction of price (adverse direction).
    pub slippage: f64,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self { initial_balance: 10_000.0, taker_fee: 0.0006, maker_fee: 0.0002, slippage: 0.0005 }
    }
}

/// Screener loop knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScreenerConfig {
    pub top_coins_count: usize,
    /// Minimum 24h turnover (quote currency) to enter the universe.
    pub min_volume_24h: f64,
    pub scan_interval_ms: u64,
    pub cooldown_ms: i64,
    pub candle_granularity_mins: u32,
    pub candle_cache_ms: i64,
    pub batch_size: usize,
    pub batch_delay_ms: u64,
    /// Screening validity filter (stricter than risk entry gates).
    pub min_abs_score: i32,
    pub min_confidence: f64,
    pub max_spread_pct: f64,
    pub min_confluence: f64,
    pub max_opportunities: usize,
}

impl Default for ScreenerConfig {
    fn default() -> Self {
        Self {
            top_coins_count: 100,
            min_volume_24h: 5_000_000.0,
            scan_interval_ms: 60_000,
            cooldown_ms: 300_000,
            candle_granularity_mins: 30,
            candle_cache_ms: 30_000,
            batch_size: 10,
            batch_delay_ms: 500,
            min_abs_score: 40,
            min_confidence: 0.7,
            max_spread_pct: 0.1,
            min_confluence: 0.5,
            max_opportunities: 10,
        }
    }
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Config::builder()
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (PERPSCOUT_*)
            .add_source(Environment::with_prefix("PERPSCOUT").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.validate()?;
        Ok(app_config)
    }

    /// Reject configurations the engine cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.bot.mode != "paper" {
            anyhow::bail!("Unsupported mode '{}': only paper is implemented", self.bot.mode);
        }
        if self.signal.bands.is_empty() {
            anyhow::bail!("Classification bands must not be empty");
        }
        if self.risk.max_leverage < 1.0 || self.risk.default_leverage < 1.0 {
            anyhow::bail!("Leverage must be at least 1");
        }
        if self.paper.initial_balance <= 0.0 {
            anyhow::bail!("Initial balance must be positive");
        }
        Ok(())
    }

    /// Generate a digest of the config for logging
    pub fn digest(&self) -> String {
        format!(
            "mode={} top_coins={} scan_interval_ms={} min_score={} min_conf={:.2}",
            self.bot.mode,
            self.screener.top_coins_count,
            self.screener.scan_interval_ms,
            self.risk.min_score,
            self.risk.min_confidence
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_bands_partition_the_score_range() {
        let bands = default_bands();
        let total_cap = SignalConfig::default().total_cap;
        for score in -total_cap..=total_cap {
            let hits = bands
                .iter()
                .filter(|b| score >= b.min && score <= b.max)
                .count();
            assert_eq!(hits, 1, "score {} matched {} bands", score, hits);
        }
    }

    #[test]
    fn default_config_validates() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn live_mode_is_rejected() {
        let mut cfg = AppConfig::default();
        cfg.bot.mode = "live".to_string();
        assert!(cfg.validate().is_err());
    }
}
