//! Risk Manager - entry gates, position sizing and loss controls
//!
//! Implements:
//! - Entry gates (circuit breaker, daily drawdown, position count,
//!   score/confluence/confidence minimums)
//! - Confidence-weighted position sizing with leverage regime adjustment
//! - Stop-loss / take-profit levels from ROI targets
//! - Liquidation-price buffer checks
//! - Circuit breaker latched on consecutive losses
//! - Daily PnL accounting with a UTC-midnight reset
//!
//! The risk manager never owns positions; it tracks ids handed to it by the
//! paper trader. Rejections are values with a reason string, not errors.

use chrono::{DateTime, Datelike, Utc};
use std::collections::HashSet;
use std::sync::RwLock;
use tracing::{info, warn};

use crate::config::RiskConfig;
use crate::types::{Side, Signal, VolRegime};

/// Sizing proposal for an admitted trade.
#[derive(Debug, Clone, Copy)]
pub struct PositionSizing {
    pub side: Side,
    /// Equity fraction allocated to the position.
    pub size_pct: f64,
    pub leverage: f64,
    /// Contract size in base units.
    pub size: f64,
    pub notional: f64,
    pub margin: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
}

/// Outcome of the entry gates. A rejection carries a reason and zero sizing.
#[derive(Debug, Clone)]
pub struct EntryDecision {
    pub allowed: bool,
    pub reason: Option<String>,
    pub sizing: Option<PositionSizing>,
}

impl EntryDecision {
    fn rejected(reason: impl Into<String>) -> Self {
        Self { allowed: false, reason: Some(reason.into()), sizing: None }
    }
}

/// Result of recording a realized trade.
#[derive(Debug, Clone, Copy)]
pub struct TradeResultInfo {
    pub pnl: f64,
    pub consecutive_losses: u32,
    pub circuit_breaker_triggered: bool,
    /// True only on the close that latched the breaker.
    pub breaker_just_latched: bool,
}

/// Point-in-time view of the risk state.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RiskSnapshot {
    pub daily_start_balance: f64,
    pub current_balance: f64,
    pub daily_pnl: f64,
    pub daily_drawdown: f64,
    pub consecutive_losses: u32,
    pub circuit_breaker_triggered: bool,
    pub tracked_positions: usize,
}

#[derive(Debug)]
struct RiskState {
    daily_start_balance: f64,
    current_balance: f64,
    daily_pnl: f64,
    consecutive_losses: u32,
    circuit_breaker_triggered: bool,
    tracked_positions: HashSet<String>,
    day_key: String,
}

pub struct RiskManager {
    config: RiskConfig,
    state: RwLock<RiskState>,
}

impl RiskManager {
    pub fn new(config: RiskConfig, initial_balance: f64) -> Self {
        Self::new_at(config, initial_balance, Utc::now())
    }

    /// Constructor with an explicit clock, used by the daily-reset tests.
    pub fn new_at(config: RiskConfig, initial_balance: f64, now: DateTime<Utc>) -> Self {
        Self {
            config,
            state: RwLock::new(RiskState {
                daily_start_balance: initial_balance,
                current_balance: initial_balance,
                daily_pnl: 0.0,
                consecutive_losses: 0,
                circuit_breaker_triggered: false,
                tracked_positions: HashSet::new(),
                day_key: Self::date_key(now),
            }),
        }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    fn date_key(dt: DateTime<Utc>) -> String {
        format!("{}-{:02}-{:02}", dt.year(), dt.month(), dt.day())
    }

    // ── Entry gates ─────────────────────────────────────────────

    /// Run all entry gates, then compute sizing for an admitted signal.
    pub fn evaluate_entry(&self, signal: &Signal, equity: f64, price: f64) -> EntryDecision {
        {
            let state = self.state.read().unwrap();

            if state.circuit_breaker_triggered {
                return EntryDecision::rejected(format!(
                    "Circuit breaker active ({} consecutive losses)",
                    state.consecutive_losses
                ));
            }

            let drawdown = Self::drawdown_of(&state);
            if drawdown >= self.config.max_daily_drawdown {
                return EntryDecision::rejected(format!(
                    "Daily drawdown limit reached ({:.2}% >= {:.2}%)",
                    drawdown * 100.0,
                    self.config.max_daily_drawdown * 100.0
                ));
            }

            if state.tracked_positions.len() >= self.config.max_open_positions {
                return EntryDecision::rejected(format!(
                    "Max open positions reached ({}/{})",
                    state.tracked_positions.len(),
                    self.config.max_open_positions
                ));
            }
        }

        if signal.total_score.abs() < self.config.min_score {
            return EntryDecision::rejected(format!(
                "Score {} below minimum {}",
                signal.total_score, self.config.min_score
            ));
        }

        let agreeing = signal.bullish_count.max(signal.bearish_count);
        if agreeing < self.config.min_confluence {
            return EntryDecision::rejected(format!(
                "Confluence {} below minimum {}",
                agreeing, self.config.min_confluence
            ));
        }

        if signal.confidence < self.config.min_confidence {
            return EntryDecision::rejected(format!(
                "Confidence {:.2} below minimum {:.2}",
                signal.confidence, self.config.min_confidence
            ));
        }

        let sizing = self.position_sizing(signal, equity, price);
        if sizing.size <= 0.0 {
            return EntryDecision::rejected("Position size computed as zero");
        }

        EntryDecision { allowed: true, reason: None, sizing: Some(sizing) }
    }

    // ── Sizing ──────────────────────────────────────────────────

    /// Confidence-weighted sizing with classification and volatility
    /// adjustments. Pure in the config and the signal.
    pub fn position_sizing(&self, signal: &Signal, equity: f64, price: f64) -> PositionSizing {
        let side = signal.side().unwrap_or(if signal.total_score >= 0 {
            Side::Long
        } else {
            Side::Short
        });

        let mut size_pct = self.config.default_position_size * signal.confidence;
        if signal.classification.is_extreme() {
            size_pct *= 1.20;
        }
        if signal.classification.is_weak() {
            size_pct *= 0.80;
        }
        size_pct = size_pct.min(self.config.max_position_size);

        let mut leverage = self.config.default_leverage;
        match signal.atr.map(|a| a.regime) {
            Some(VolRegime::High) => leverage = leverage.min(4.0),
            Some(VolRegime::Low) => leverage = (leverage + 2.0).min(self.config.max_leverage),
            _ => {}
        }

        let notional = equity * size_pct;
        let size = if price > 0.0 { notional / price } else { 0.0 };
        let margin = if leverage > 0.0 { notional / leverage } else { notional };
        let (stop_loss, take_profit) = self.exit_levels(side, price, leverage);

        PositionSizing {
            side,
            size_pct,
            leverage,
            size,
            notional,
            margin,
            stop_loss,
            take_profit,
        }
    }

    /// Stop-loss and take-profit prices from the configured ROI targets.
    /// The stop distance is fee-adjusted so the realized loss lands near the
    /// target after both taker fees.
    pub fn exit_levels(&self, side: Side, entry: f64, leverage: f64) -> (f64, f64) {
        let sl_move = (self.config.stop_loss_roi - 2.0 * self.config.taker_fee) / leverage;
        let tp_move = self.config.take_profit_roi / leverage;
        match side {
            Side::Long => (entry * (1.0 - sl_move), entry * (1.0 + tp_move)),
            Side::Short => (entry * (1.0 + sl_move), entry * (1.0 - tp_move)),
        }
    }

    // ── Liquidation buffer ──────────────────────────────────────

    /// Theoretical liquidation price under the maintenance margin rate.
    pub fn liquidation_price(&self, side: Side, entry: f64, leverage: f64) -> f64 {
        let distance = (1.0 / leverage) * (1.0 - self.config.maintenance_margin_rate);
        match side {
            Side::Long => entry * (1.0 - distance),
            Side::Short => entry * (1.0 + distance),
        }
    }

    /// Signed distance from the liquidation price as a fraction of the
    /// current price. Negative once the price has crossed it.
    pub fn liquidation_buffer(&self, side: Side, entry: f64, leverage: f64, current: f64) -> f64 {
        if current <= 0.0 {
            return 0.0;
        }
        let liquidation = self.liquidation_price(side, entry, leverage);
        match side {
            Side::Long => (current - liquidation) / current,
            Side::Short => (liquidation - current) / current,
        }
    }

    pub fn buffer_is_safe(&self, side: Side, entry: f64, leverage: f64, current: f64) -> bool {
        self.liquidation_buffer(side, entry, leverage, current) >= self.config.min_liquidation_buffer
    }

    // ── Position tracking (ids only) ────────────────────────────

    pub fn track_position(&self, id: &str) {
        if let Ok(mut state) = self.state.write() {
            state.tracked_positions.insert(id.to_string());
        }
    }

    pub fn untrack_position(&self, id: &str) {
        if let Ok(mut state) = self.state.write() {
            state.tracked_positions.remove(id);
        }
    }

    pub fn tracked_count(&self) -> usize {
        self.state.read().map(|s| s.tracked_positions.len()).unwrap_or(0)
    }

    // ── Trade results & balance ─────────────────────────────────

    pub fn record_trade_result(&self, position_id: &str, pnl: f64) -> TradeResultInfo {
        self.record_trade_result_at(position_id, pnl, Utc::now())
    }

    /// Record a realized PnL. Serialized against the daily reset by holding
    /// the state lock across both.
    pub fn record_trade_result_at(
        &self,
        position_id: &str,
        pnl: f64,
        now: DateTime<Utc>,
    ) -> TradeResultInfo {
        let mut state = self.state.write().unwrap();
        Self::roll_day_if_needed(&mut state, now);

        state.tracked_positions.remove(position_id);
        state.current_balance += pnl;
        state.daily_pnl = state.current_balance - state.daily_start_balance;

        if pnl < 0.0 {
            state.consecutive_losses += 1;
        } else {
            state.consecutive_losses = 0;
        }

        let mut just_latched = false;
        if !state.circuit_breaker_triggered
            && state.consecutive_losses >= self.config.circuit_breaker_threshold
        {
            state.circuit_breaker_triggered = true;
            just_latched = true;
            warn!(
                consecutive_losses = state.consecutive_losses,
                "circuit breaker latched; blocking new entries"
            );
        }

        TradeResultInfo {
            pnl,
            consecutive_losses: state.consecutive_losses,
            circuit_breaker_triggered: state.circuit_breaker_triggered,
            breaker_just_latched: just_latched,
        }
    }

    pub fn update_balance(&self, balance: f64) {
        self.update_balance_at(balance, Utc::now());
    }

    /// Refresh the tracked balance (e.g. after equity changes).
    pub fn update_balance_at(&self, balance: f64, now: DateTime<Utc>) {
        let mut state = self.state.write().unwrap();
        Self::roll_day_if_needed(&mut state, now);
        state.current_balance = balance;
        state.daily_pnl = state.current_balance - state.daily_start_balance;
    }

    /// Apply the UTC-midnight reset if the day changed. Never fails.
    pub fn maybe_daily_reset_at(&self, now: DateTime<Utc>) {
        let mut state = self.state.write().unwrap();
        Self::roll_day_if_needed(&mut state, now);
    }

    fn roll_day_if_needed(state: &mut RiskState, now: DateTime<Utc>) {
        let key = Self::date_key(now);
        if key == state.day_key {
            return;
        }
        info!(day = %key, balance = state.current_balance, "daily risk reset");
        state.day_key = key;
        state.daily_start_balance = state.current_balance;
        state.daily_pnl = 0.0;
        state.consecutive_losses = 0;
        state.circuit_breaker_triggered = false;
    }

    /// Manual breaker reset issued by the operator.
    pub fn reset_circuit_breaker(&self) {
        let mut state = self.state.write().unwrap();
        state.circuit_breaker_triggered = false;
        state.consecutive_losses = 0;
        info!("circuit breaker manually reset");
    }

    /// Re-initialize alongside an account reset.
    pub fn reset_at(&self, initial_balance: f64, now: DateTime<Utc>) {
        let mut state = self.state.write().unwrap();
        *state = RiskState {
            daily_start_balance: initial_balance,
            current_balance: initial_balance,
            daily_pnl: 0.0,
            consecutive_losses: 0,
            circuit_breaker_triggered: false,
            tracked_positions: HashSet::new(),
            day_key: Self::date_key(now),
        };
    }

    pub fn daily_drawdown(&self) -> f64 {
        self.state.read().map(|s| Self::drawdown_of(&s)).unwrap_or(0.0)
    }

    fn drawdown_of(state: &RiskState) -> f64 {
        if state.daily_start_balance <= 0.0 {
            return 0.0;
        }
        ((state.daily_start_balance - state.current_balance) / state.daily_start_balance).max(0.0)
    }

    pub fn snapshot(&self) -> RiskSnapshot {
        let state = self.state.read().unwrap();
        RiskSnapshot {
            daily_start_balance: state.daily_start_balance,
            current_balance: state.current_balance,
            daily_pnl: state.daily_pnl,
            daily_drawdown: Self::drawdown_of(&state),
            consecutive_losses: state.consecutive_losses,
            circuit_breaker_triggered: state.circuit_breaker_triggered,
            tracked_positions: state.tracked_positions.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AtrReading, SignalAction, SignalClass};
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    fn make_signal(
        score: i32,
        classification: SignalClass,
        confidence: f64,
        bullish: usize,
        bearish: usize,
        regime: VolRegime,
    ) -> Signal {
        Signal {
            symbol: "BTCUSDT".to_string(),
            total_score: score,
            indicator_score: score,
            microstructure_score: 0,
            classification,
            action: if classification.is_bullish() {
                SignalAction::Long
            } else if classification.is_bearish() {
                SignalAction::Short
            } else {
                SignalAction::Hold
            },
            confidence,
            bullish_count: bullish,
            bearish_count: bearish,
            confluence: bullish.max(bearish) as f64 / 13.0,
            indicators: BTreeMap::new(),
            atr: Some(AtrReading { atr: 100.0, atr_pct: 3.0, regime }),
            timestamp: 1_700_000_000_000,
        }
    }

    fn manager() -> RiskManager {
        RiskManager::new(RiskConfig::default(), 10_000.0)
    }

    #[test]
    fn strong_long_is_sized() {
        let config = RiskConfig { default_leverage: 6.0, ..Default::default() };
        let rm = RiskManager::new(config, 10_000.0);
        let signal = make_signal(100, SignalClass::StrongBuy, 0.9, 6, 2, VolRegime::Medium);

        let decision = rm.evaluate_entry(&signal, 10_000.0, 50_000.0);
        assert!(decision.allowed, "rejected: {:?}", decision.reason);
        let sizing = decision.sizing.unwrap();
        assert!(sizing.size > 0.0);
        assert!(sizing.leverage >= 2.0 && sizing.leverage <= 10.0);
        assert!(sizing.stop_loss < 50_000.0);
        assert!(sizing.take_profit > 50_000.0);
        assert_eq!(sizing.side, Side::Long);
    }

    #[test]
    fn extreme_and_weak_adjust_size() {
        let rm = manager();
        let base = make_signal(100, SignalClass::StrongBuy, 0.9, 6, 2, VolRegime::Medium);
        let extreme = make_signal(150, SignalClass::ExtremeBuy, 0.9, 6, 2, VolRegime::Medium);
        let weak = make_signal(45, SignalClass::BuyWeak, 0.9, 6, 2, VolRegime::Medium);

        let s_base = rm.position_sizing(&base, 10_000.0, 100.0);
        let s_extreme = rm.position_sizing(&extreme, 10_000.0, 100.0);
        let s_weak = rm.position_sizing(&weak, 10_000.0, 100.0);
        assert!((s_extreme.size_pct - s_base.size_pct * 1.20).abs() < 1e-9);
        assert!((s_weak.size_pct - s_base.size_pct * 0.80).abs() < 1e-9);
    }

    #[test]
    fn leverage_follows_volatility_regime() {
        let config = RiskConfig {
            default_leverage: 6.0,
            max_leverage: 7.0,
            ..Default::default()
        };
        let rm = RiskManager::new(config, 10_000.0);

        let high = make_signal(100, SignalClass::StrongBuy, 0.9, 6, 0, VolRegime::High);
        assert!((rm.position_sizing(&high, 10_000.0, 100.0).leverage - 4.0).abs() < 1e-9);

        let low = make_signal(100, SignalClass::StrongBuy, 0.9, 6, 0, VolRegime::Low);
        // 6 + 2 clamped to max_leverage 7.
        assert!((rm.position_sizing(&low, 10_000.0, 100.0).leverage - 7.0).abs() < 1e-9);

        let medium = make_signal(100, SignalClass::StrongBuy, 0.9, 6, 0, VolRegime::Medium);
        assert!((rm.position_sizing(&medium, 10_000.0, 100.0).leverage - 6.0).abs() < 1e-9);
    }

    #[test]
    fn exit_levels_match_roi_targets() {
        let rm = manager();
        let (sl, tp) = rm.exit_levels(Side::Long, 50_000.0, 5.0);
        // (0.06 - 0.0012) / 5 = 0.01176; 0.15 / 5 = 0.03
        assert!((sl - 50_000.0 * (1.0 - 0.011_76)).abs() < 1e-6);
        assert!((tp - 50_000.0 * 1.03).abs() < 1e-6);

        let (sl_s, tp_s) = rm.exit_levels(Side::Short, 50_000.0, 5.0);
        assert!(sl_s > 50_000.0);
        assert!(tp_s < 50_000.0);
    }

    #[test]
    fn max_open_positions_blocks_entry() {
        let rm = manager();
        for i in 0..5 {
            rm.track_position(&format!("pos-{}", i));
        }
        let signal = make_signal(100, SignalClass::StrongBuy, 0.9, 6, 0, VolRegime::Medium);
        let decision = rm.evaluate_entry(&signal, 10_000.0, 50_000.0);
        assert!(!decision.allowed);
        assert!(decision.reason.unwrap().contains("Max open positions"));
    }

    #[test]
    fn circuit_breaker_latches_after_three_losses() {
        let rm = manager();
        for i in 0..3 {
            let info = rm.record_trade_result(&format!("p{}", i), -100.0);
            assert_eq!(info.consecutive_losses, i + 1);
        }
        assert!(rm.snapshot().circuit_breaker_triggered);

        let signal = make_signal(100, SignalClass::StrongBuy, 0.9, 6, 0, VolRegime::Medium);
        let decision = rm.evaluate_entry(&signal, 10_000.0, 50_000.0);
        assert!(!decision.allowed);
        assert!(decision.reason.unwrap().contains("Circuit breaker"));

        rm.reset_circuit_breaker();
        let decision = rm.evaluate_entry(&signal, 10_000.0, 50_000.0);
        assert!(decision.allowed);
    }

    #[test]
    fn winning_trade_resets_the_streak() {
        let rm = manager();
        rm.record_trade_result("a", -50.0);
        rm.record_trade_result("b", -50.0);
        let info = rm.record_trade_result("c", 0.0);
        assert_eq!(info.consecutive_losses, 0);
        assert!(!info.circuit_breaker_triggered);
    }

    #[test]
    fn daily_drawdown_blocks_entry() {
        let rm = manager();
        rm.update_balance(9_600.0); // -4% on a 3% limit
        let signal = make_signal(100, SignalClass::StrongBuy, 0.9, 6, 0, VolRegime::Medium);
        let decision = rm.evaluate_entry(&signal, 9_600.0, 50_000.0);
        assert!(!decision.allowed);
        assert!(decision.reason.unwrap().contains("drawdown"));
    }

    #[test]
    fn liquidation_buffer_scenario() {
        let rm = manager();
        // LONG at 50k, 10x: liquidation at 50_000 * (1 - 0.1 * 0.995) = 45_025.
        let liq = rm.liquidation_price(Side::Long, 50_000.0, 10.0);
        assert!((liq - 45_025.0).abs() < 1e-6);
        assert!(rm.buffer_is_safe(Side::Long, 50_000.0, 10.0, 48_000.0));
        assert!(!rm.buffer_is_safe(Side::Long, 50_000.0, 10.0, 45_500.0));
    }

    #[test]
    fn daily_reset_clears_state_at_midnight() {
        let day1 = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let day2 = Utc.with_ymd_and_hms(2025, 3, 2, 0, 0, 1).unwrap();
        let rm = RiskManager::new_at(RiskConfig::default(), 10_000.0, day1);

        rm.record_trade_result_at("a", -200.0, day1);
        rm.record_trade_result_at("b", -200.0, day1);
        rm.record_trade_result_at("c", -200.0, day1);
        let snap = rm.snapshot();
        assert!(snap.circuit_breaker_triggered);
        assert!((snap.daily_pnl + 600.0).abs() < 1e-9);

        rm.maybe_daily_reset_at(day2);
        let snap = rm.snapshot();
        assert!(!snap.circuit_breaker_triggered);
        assert_eq!(snap.consecutive_losses, 0);
        assert!((snap.daily_pnl).abs() < 1e-9);
        assert!((snap.daily_start_balance - 9_400.0).abs() < 1e-9);
    }

    #[test]
    fn low_score_and_confidence_gates() {
        let rm = manager();
        let weak = make_signal(50, SignalClass::BuyWeak, 0.9, 6, 0, VolRegime::Medium);
        assert!(!rm.evaluate_entry(&weak, 10_000.0, 100.0).allowed);

        let diffuse = make_signal(100, SignalClass::StrongBuy, 0.9, 3, 0, VolRegime::Medium);
        assert!(!rm.evaluate_entry(&diffuse, 10_000.0, 100.0).allowed);

        let unsure = make_signal(100, SignalClass::StrongBuy, 0.7, 6, 0, VolRegime::Medium);
        assert!(!rm.evaluate_entry(&unsure, 10_000.0, 100.0).allowed);
    }
}
