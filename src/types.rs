//! Core types used throughout the screener
//!
//! Defines common data structures for candles, order books, signals,
//! positions and trade records.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single OHLCV candle. Timestamps are Unix milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// One price level of an order book side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: f64,
    pub size: f64,
}

/// Order book snapshot. Bids sorted descending, asks ascending.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBook {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub timestamp: i64,
}

impl OrderBook {
    /// Re-sort levels and drop non-positive entries after ingestion.
    pub fn normalize_levels(&mut self) {
        self.bids.retain(|l| l.price > 0.0 && l.size > 0.0);
        self.asks.retain(|l| l.price > 0.0 && l.size > 0.0);
        self.bids
            .sort_by(|a, b| b.price.partial_cmp(&a.price).unwrap_or(std::cmp::Ordering::Equal));
        self.asks
            .sort_by(|a, b| a.price.partial_cmp(&b.price).unwrap_or(std::cmp::Ordering::Equal));
    }

    pub fn bid_volume(&self) -> f64 {
        self.bids.iter().map(|l| l.size).sum()
    }

    pub fn ask_volume(&self) -> f64 {
        self.asks.iter().map(|l| l.size).sum()
    }

    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|l| l.price)
    }
}

/// Position side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    Long,
    Short,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "LONG"),
            Side::Short => write!(f, "SHORT"),
        }
    }
}

/// Per-indicator vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IndicatorSignal {
    Buy,
    Sell,
    Neutral,
}

impl Default for IndicatorSignal {
    fn default() -> Self {
        IndicatorSignal::Neutral
    }
}

/// Result of one indicator evaluation. Scores are integers, bounded by the
/// indicator's configured max score; positive = bullish.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorResult {
    pub value: f64,
    pub score: i32,
    pub signal: IndicatorSignal,
}

impl IndicatorResult {
    /// Neutral result used when an indicator lacks enough data.
    pub fn neutral(value: f64) -> Self {
        Self {
            value,
            score: 0,
            signal: IndicatorSignal::Neutral,
        }
    }
}

/// Volatility regime derived from ATR as a percent of price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VolRegime {
    Low,
    Medium,
    High,
}

impl Default for VolRegime {
    fn default() -> Self {
        VolRegime::Medium
    }
}

impl fmt::Display for VolRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VolRegime::Low => write!(f, "LOW"),
            VolRegime::Medium => write!(f, "MEDIUM"),
            VolRegime::High => write!(f, "HIGH"),
        }
    }
}

/// ATR reading attached to a signal for sizing decisions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AtrReading {
    pub atr: f64,
    /// ATR as percent of the last close (e.g. 2.5 = 2.5%).
    pub atr_pct: f64,
    pub regime: VolRegime,
}

/// The nine ordered classification bands. Together they partition
/// the total-score range `[-220, 220]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalClass {
    ExtremeBuy,
    StrongBuy,
    Buy,
    BuyWeak,
    Neutral,
    SellWeak,
    Sell,
    StrongSell,
    ExtremeSell,
}

impl SignalClass {
    /// True for bands on the positive (bullish) half.
    pub fn is_bullish(&self) -> bool {
        matches!(
            self,
            SignalClass::ExtremeBuy | SignalClass::StrongBuy | SignalClass::Buy | SignalClass::BuyWeak
        )
    }

    /// True for bands on the negative (bearish) half.
    pub fn is_bearish(&self) -> bool {
        matches!(
            self,
            SignalClass::ExtremeSell
                | SignalClass::StrongSell
                | SignalClass::Sell
                | SignalClass::SellWeak
        )
    }

    pub fn is_extreme(&self) -> bool {
        matches!(self, SignalClass::ExtremeBuy | SignalClass::ExtremeSell)
    }

    pub fn is_strong(&self) -> bool {
        matches!(self, SignalClass::StrongBuy | SignalClass::StrongSell)
    }

    pub fn is_weak(&self) -> bool {
        matches!(self, SignalClass::BuyWeak | SignalClass::SellWeak)
    }
}

impl fmt::Display for SignalClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SignalClass::ExtremeBuy => "EXTREME_BUY",
            SignalClass::StrongBuy => "STRONG_BUY",
            SignalClass::Buy => "BUY",
            SignalClass::BuyWeak => "BUY_WEAK",
            SignalClass::Neutral => "NEUTRAL",
            SignalClass::SellWeak => "SELL_WEAK",
            SignalClass::Sell => "SELL",
            SignalClass::StrongSell => "STRONG_SELL",
            SignalClass::ExtremeSell => "EXTREME_SELL",
        };
        write!(f, "{}", s)
    }
}

/// Action a signal suggests. Derived from the classification band's half:
/// bullish bands map to Long, bearish to Short, NEUTRAL to Hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalAction {
    Long,
    Short,
    Hold,
}

impl fmt::Display for SignalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalAction::Long => write!(f, "LONG"),
            SignalAction::Short => write!(f, "SHORT"),
            SignalAction::Hold => write!(f, "HOLD"),
        }
    }
}

/// Aggregated signal for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    /// Clamped sum of indicator and microstructure scores, in `[-220, 220]`.
    pub total_score: i32,
    /// Directional indicator sum after the indicator cap.
    pub indicator_score: i32,
    /// Order-book (DOM) contribution after the microstructure cap.
    pub microstructure_score: i32,
    pub classification: SignalClass,
    pub action: SignalAction,
    /// Confidence in `[0, 1]` after penalties.
    pub confidence: f64,
    pub bullish_count: usize,
    pub bearish_count: usize,
    /// Fraction of indicators agreeing on the dominant direction.
    pub confluence: f64,
    pub indicators: BTreeMap<String, IndicatorResult>,
    pub atr: Option<AtrReading>,
    pub timestamp: i64,
}

impl Signal {
    /// Side implied by the classification band; None when NEUTRAL.
    pub fn side(&self) -> Option<Side> {
        if self.classification.is_bullish() {
            Some(Side::Long)
        } else if self.classification.is_bearish() {
            Some(Side::Short)
        } else {
            None
        }
    }
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    StopLoss,
    TakeProfit,
    Manual,
    CloseAll,
    Liquidation,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::StopLoss => write!(f, "stop_loss"),
            CloseReason::TakeProfit => write!(f, "take_profit"),
            CloseReason::Manual => write!(f, "manual"),
            CloseReason::CloseAll => write!(f, "close_all"),
            CloseReason::Liquidation => write!(f, "liquidation"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus {
    Open,
    Closed,
}

/// A simulated perp position. Owned exclusively by the paper trader;
/// the risk manager only tracks ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub symbol: String,
    pub side: Side,
    /// Contract size in base units.
    pub size: f64,
    pub entry_price: f64,
    pub current_price: f64,
    pub leverage: f64,
    /// Margin locked for this position (notional / leverage).
    pub margin: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub unrealized_pnl: f64,
    pub open_fee: f64,
    /// Signal snapshot captured at entry.
    pub signal: Option<Signal>,
    pub open_time: i64,
    pub status: PositionStatus,
    pub close_price: Option<f64>,
    pub close_fee: Option<f64>,
    pub realized_pnl: Option<f64>,
    pub close_time: Option<i64>,
    pub close_reason: Option<CloseReason>,
}

/// Account snapshot. Counts only OPEN positions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub balance: f64,
    pub equity: f64,
    pub margin: f64,
    pub free_margin: f64,
    pub realized_profit: f64,
    pub open_positions: usize,
}

/// One entry of the in-memory trade log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: String,
    pub position_id: String,
    pub symbol: String,
    pub side: Side,
    /// "OPEN" or "CLOSE".
    pub action: String,
    pub price: f64,
    pub size: f64,
    pub fee: f64,
    pub pnl: Option<f64>,
    pub reason: Option<CloseReason>,
    pub timestamp: i64,
    pub balance_after: f64,
}

/// A ranked screener hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub symbol: String,
    pub total_score: i32,
    pub classification: SignalClass,
    pub action: SignalAction,
    pub confidence: f64,
    pub confluence: f64,
    pub rank_score: f64,
    pub price: f64,
    pub spread_pct: f64,
    pub turnover_24h: f64,
    pub funding_rate: Option<f64>,
    pub timestamp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_book_normalization_sorts_and_filters() {
        let mut book = OrderBook {
            bids: vec![
                BookLevel { price: 100.0, size: 1.0 },
                BookLevel { price: 101.0, size: 2.0 },
                BookLevel { price: 99.0, size: 0.0 },
            ],
            asks: vec![
                BookLevel { price: 103.0, size: 1.0 },
                BookLevel { price: 102.0, size: 2.0 },
            ],
            timestamp: 0,
        };
        book.normalize_levels();
        assert_eq!(book.bids.len(), 2);
        assert_eq!(book.best_bid(), Some(101.0));
        assert_eq!(book.best_ask(), Some(102.0));
        assert!((book.bid_volume() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn classification_halves() {
        assert!(SignalClass::ExtremeBuy.is_bullish());
        assert!(SignalClass::BuyWeak.is_bullish());
        assert!(SignalClass::SellWeak.is_bearish());
        assert!(!SignalClass::Neutral.is_bullish());
        assert!(!SignalClass::Neutral.is_bearish());
    }

    #[test]
    fn close_reason_display_matches_wire_format() {
        assert_eq!(CloseReason::StopLoss.to_string(), "stop_loss");
        assert_eq!(CloseReason::CloseAll.to_string(), "close_all");
    }
}
