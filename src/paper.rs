//! Paper Trading Engine
//!
//! Simulates order execution against live prices with slippage and taker
//! fees. Owns the account and all positions; the risk manager only sees
//! position ids. Exit triggers run on every price tick in a fixed order:
//! stop-loss, take-profit, then the liquidation-buffer check, which warns
//! but never closes on its own.
//!
//! Key behavior:
//! - **Value-style rejections**: a gated or under-margined open returns a
//!   reason, not an error
//! - **Account invariants**: equity = balance + unrealized PnL and
//!   free margin = equity - margin hold after every mutation
//! - **In-memory trade log**: OPEN/CLOSE records until a sink subscribes

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

use crate::config::PaperConfig;
use crate::events::{EngineEvent, EventBus};
use crate::risk::RiskManager;
use crate::types::{
    AccountSnapshot, CloseReason, Position, PositionStatus, Side, Signal, TradeRecord,
};

/// Outcome of an open request.
#[derive(Debug, Clone)]
pub enum OpenOutcome {
    Opened(Position),
    Rejected { reason: String },
}

impl OpenOutcome {
    pub fn is_opened(&self) -> bool {
        matches!(self, OpenOutcome::Opened(_))
    }
}

#[derive(Debug, Clone)]
struct AccountState {
    balance: f64,
    equity: f64,
    margin: f64,
    free_margin: f64,
    realized_profit: f64,
}

impl AccountState {
    fn new(balance: f64) -> Self {
        Self {
            balance,
            equity: balance,
            margin: 0.0,
            free_margin: balance,
            realized_profit: 0.0,
        }
    }
}

/// Monotone counters over the simulator lifetime.
#[derive(Debug, Clone, Default)]
struct TradeStats {
    total_trades: u32,
    wins: u32,
    losses: u32,
    gross_profit: f64,
    gross_loss: f64,
    peak_equity: f64,
    max_drawdown: f64,
}

/// Derived statistics reported on demand.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsReport {
    pub total_trades: u32,
    pub wins: u32,
    pub losses: u32,
    pub win_rate: f64,
    pub gross_profit: f64,
    pub gross_loss: f64,
    /// Infinity when there are profits and no losses; 0 when neither.
    pub profit_factor: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub expectancy: f64,
    pub peak_equity: f64,
    pub max_drawdown: f64,
    pub roi: f64,
    pub running_days: f64,
    pub annualized_return: f64,
}

pub struct PaperTradingEngine {
    config: PaperConfig,
    risk: Arc<RiskManager>,
    events: EventBus,
    account: RwLock<AccountState>,
    positions: RwLock<HashMap<String, Position>>,
    trade_log: RwLock<Vec<TradeRecord>>,
    stats: RwLock<TradeStats>,
    started_at: RwLock<i64>,
}

impl PaperTradingEngine {
    pub fn new(config: PaperConfig, risk: Arc<RiskManager>, events: EventBus) -> Self {
        let initial = config.initial_balance;
        Self {
            config,
            risk,
            events,
            account: RwLock::new(AccountState::new(initial)),
            positions: RwLock::new(HashMap::new()),
            trade_log: RwLock::new(Vec::new()),
            stats: RwLock::new(TradeStats {
                peak_equity: initial,
                ..Default::default()
            }),
            started_at: RwLock::new(Utc::now().timestamp_millis()),
        }
    }

    // ── Account views ───────────────────────────────────────────

    pub fn equity(&self) -> f64 {
        self.account.read().map(|a| a.equity).unwrap_or(0.0)
    }

    pub fn account_snapshot(&self) -> AccountSnapshot {
        let account = self.account.read().unwrap();
        let open = self.positions.read().map(|p| p.len()).unwrap_or(0);
        AccountSnapshot {
            balance: account.balance,
            equity: account.equity,
            margin: account.margin,
            free_margin: account.free_margin,
            realized_profit: account.realized_profit,
            open_positions: open,
        }
    }

    pub fn open_positions(&self) -> Vec<Position> {
        self.positions
            .read()
            .map(|p| p.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn position(&self, id: &str) -> Option<Position> {
        self.positions.read().ok()?.get(id).cloned()
    }

    pub fn trade_log(&self) -> Vec<TradeRecord> {
        self.trade_log.read().map(|t| t.clone()).unwrap_or_default()
    }

    /// Re-derive equity and free margin from balance, open PnL and margins.
    fn recompute_account(&self) {
        let (unrealized, margin): (f64, f64) = {
            let positions = self.positions.read().unwrap();
            (
                positions.values().map(|p| p.unrealized_pnl).sum(),
                positions.values().map(|p| p.margin).sum(),
            )
        };
        let mut account = self.account.write().unwrap();
        account.margin = margin;
        account.equity = account.balance + unrealized;
        account.free_margin = account.equity - account.margin;
    }

    // ── Open ────────────────────────────────────────────────────

    pub fn open_position(&self, symbol: &str, signal: &Signal, market_price: f64) -> OpenOutcome {
        self.open_position_at(symbol, signal, market_price, Utc::now().timestamp_millis())
    }

    pub fn open_position_at(
        &self,
        symbol: &str,
        signal: &Signal,
        market_price: f64,
        now_ms: i64,
    ) -> OpenOutcome {
        if market_price <= 0.0 {
            return OpenOutcome::Rejected { reason: "No market price available".to_string() };
        }

        let equity = self.equity();
        let decision = self.risk.evaluate_entry(signal, equity, market_price);
        let sizing = match decision.sizing {
            Some(sizing) if decision.allowed => sizing,
            _ => {
                let reason = decision.reason.unwrap_or_else(|| "Trade not admitted".to_string());
                info!(symbol = %symbol, reason = %reason, "[PAPER] open rejected");
                return OpenOutcome::Rejected { reason };
            }
        };

        // Slippage moves the fill against the taker.
        let fill_price = match sizing.side {
            Side::Long => market_price * (1.0 + self.config.slippage),
            Side::Short => market_price * (1.0 - self.config.slippage),
        };
        let notional = sizing.size * fill_price;
        let margin = notional / sizing.leverage;
        let open_fee = notional * self.config.taker_fee;

        {
            let account = self.account.read().unwrap();
            if margin > account.free_margin {
                let reason = format!(
                    "Insufficient free margin: need ${:.2}, have ${:.2}",
                    margin, account.free_margin
                );
                info!(symbol = %symbol, reason = %reason, "[PAPER] open rejected");
                return OpenOutcome::Rejected { reason };
            }
        }

        let (stop_loss, take_profit) =
            self.risk.exit_levels(sizing.side, fill_price, sizing.leverage);

        let position = Position {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            side: sizing.side,
            size: sizing.size,
            entry_price: fill_price,
            current_price: fill_price,
            leverage: sizing.leverage,
            margin,
            stop_loss,
            take_profit,
            unrealized_pnl: 0.0,
            open_fee,
            signal: Some(signal.clone()),
            open_time: now_ms,
            status: PositionStatus::Open,
            close_price: None,
            close_fee: None,
            realized_pnl: None,
            close_time: None,
            close_reason: None,
        };

        {
            let mut account = self.account.write().unwrap();
            account.balance -= open_fee;
        }
        {
            let mut positions = self.positions.write().unwrap();
            positions.insert(position.id.clone(), position.clone());
        }
        self.recompute_account();
        self.risk.track_position(&position.id);

        let record = TradeRecord {
            id: uuid::Uuid::new_v4().to_string(),
            position_id: position.id.clone(),
            symbol: symbol.to_string(),
            side: position.side,
            action: "OPEN".to_string(),
            price: fill_price,
            size: position.size,
            fee: open_fee,
            pnl: None,
            reason: None,
            timestamp: now_ms,
            balance_after: self.account.read().unwrap().balance,
        };
        self.trade_log.write().unwrap().push(record);

        info!(
            symbol = %symbol,
            side = %position.side,
            size = position.size,
            entry = fill_price,
            leverage = position.leverage,
            "[PAPER] position opened"
        );
        self.events.publish(EngineEvent::PositionOpened(position.clone()));
        self.events
            .publish(EngineEvent::AccountUpdate(self.account_snapshot()));

        OpenOutcome::Opened(position)
    }

    // ── Price ticks ─────────────────────────────────────────────

    /// Update every open position for `symbol` and fire exits in order:
    /// stop-loss, take-profit, then the liquidation-buffer warning.
    /// Returns the positions that were closed by this tick.
    pub fn on_price_tick(&self, symbol: &str, price: f64) -> Vec<(String, CloseReason)> {
        if price <= 0.0 {
            return Vec::new();
        }

        let mut triggered: Vec<(String, CloseReason)> = Vec::new();
        let mut warnings: Vec<(String, f64)> = Vec::new();
        {
            let mut positions = self.positions.write().unwrap();
            for position in positions.values_mut() {
                if position.symbol != symbol {
                    continue;
                }
                position.current_price = price;
                position.unrealized_pnl = match position.side {
                    Side::Long => (price - position.entry_price) * position.size,
                    Side::Short => (position.entry_price - price) * position.size,
                };

                let stop_hit = match position.side {
                    Side::Long => price <= position.stop_loss,
                    Side::Short => price >= position.stop_loss,
                };
                if stop_hit {
                    triggered.push((position.id.clone(), CloseReason::StopLoss));
                    continue;
                }

                let take_hit = match position.side {
                    Side::Long => price >= position.take_profit,
                    Side::Short => price <= position.take_profit,
                };
                if take_hit {
                    triggered.push((position.id.clone(), CloseReason::TakeProfit));
                    continue;
                }

                let buffer = self.risk.liquidation_buffer(
                    position.side,
                    position.entry_price,
                    position.leverage,
                    price,
                );
                if buffer < self.risk.config().min_liquidation_buffer {
                    warnings.push((position.id.clone(), buffer));
                }
            }
        }
        self.recompute_account();

        for (id, buffer) in warnings {
            warn!(
                position_id = %id,
                symbol = %symbol,
                buffer = format!("{:.4}", buffer),
                "[PAPER] liquidation buffer below minimum"
            );
            self.events.publish(EngineEvent::LiquidationWarning {
                position_id: id,
                symbol: symbol.to_string(),
                buffer,
            });
        }

        let mut closed = Vec::new();
        for (id, reason) in triggered {
            match self.close_position(&id, price, reason) {
                Ok(_) => closed.push((id, reason)),
                Err(e) => warn!(position_id = %id, error = %e, "[PAPER] exit close failed"),
            }
        }
        closed
    }

    // ── Close ───────────────────────────────────────────────────

    pub fn close_position(
        &self,
        id: &str,
        price: f64,
        reason: CloseReason,
    ) -> anyhow::Result<Position> {
        self.close_position_at(id, price, reason, Utc::now().timestamp_millis())
    }

    pub fn close_position_at(
        &self,
        id: &str,
        price: f64,
        reason: CloseReason,
        now_ms: i64,
    ) -> anyhow::Result<Position> {
        let mut position = {
            let mut positions = self.positions.write().unwrap();
            positions
                .remove(id)
                .ok_or_else(|| anyhow::anyhow!("Unknown position id: {}", id))?
        };

        // Closing crosses the spread the other way.
        let fill_price = match position.side {
            Side::Long => price * (1.0 - self.config.slippage),
            Side::Short => price * (1.0 + self.config.slippage),
        };
        let notional = position.size * fill_price;
        let close_fee = notional * self.config.taker_fee;
        let gross_pnl = match position.side {
            Side::Long => (fill_price - position.entry_price) * position.size,
            Side::Short => (position.entry_price - fill_price) * position.size,
        };
        // The open fee already left the balance at entry; the realized PnL
        // reported for the trade still carries both fees.
        let net_pnl = gross_pnl - position.open_fee - close_fee;

        {
            let mut account = self.account.write().unwrap();
            account.balance += gross_pnl - close_fee;
            account.realized_profit += net_pnl;
        }
        self.recompute_account();

        position.status = PositionStatus::Closed;
        position.current_price = fill_price;
        position.unrealized_pnl = 0.0;
        position.close_price = Some(fill_price);
        position.close_fee = Some(close_fee);
        position.realized_pnl = Some(net_pnl);
        position.close_time = Some(now_ms);
        position.close_reason = Some(reason);

        let record = TradeRecord {
            id: uuid::Uuid::new_v4().to_string(),
            position_id: position.id.clone(),
            symbol: position.symbol.clone(),
            side: position.side,
            action: "CLOSE".to_string(),
            price: fill_price,
            size: position.size,
            fee: close_fee,
            pnl: Some(net_pnl),
            reason: Some(reason),
            timestamp: now_ms,
            balance_after: self.account.read().unwrap().balance,
        };
        self.trade_log.write().unwrap().push(record.clone());

        let equity = self.equity();
        {
            let mut stats = self.stats.write().unwrap();
            stats.total_trades += 1;
            if net_pnl > 0.0 {
                stats.wins += 1;
                stats.gross_profit += net_pnl;
            } else if net_pnl < 0.0 {
                stats.losses += 1;
                stats.gross_loss += -net_pnl;
            }
            if equity > stats.peak_equity {
                stats.peak_equity = equity;
            }
            if stats.peak_equity > 0.0 {
                let drawdown = (stats.peak_equity - equity) / stats.peak_equity;
                if drawdown > stats.max_drawdown {
                    stats.max_drawdown = drawdown;
                }
            }
        }

        let info = self.risk.record_trade_result(&position.id, net_pnl);
        self.risk.update_balance(equity);

        info!(
            symbol = %position.symbol,
            side = %position.side,
            reason = %reason,
            pnl = format!("{:.2}", net_pnl),
            "[PAPER] position closed"
        );
        self.events.publish(EngineEvent::PositionClosed {
            position: position.clone(),
            trade: record,
        });
        self.events.publish(EngineEvent::TradeRecorded {
            position_id: position.id.clone(),
            pnl: net_pnl,
            consecutive_losses: info.consecutive_losses,
        });
        if info.breaker_just_latched {
            self.events.publish(EngineEvent::CircuitBreaker {
                consecutive_losses: info.consecutive_losses,
                triggered: true,
            });
        }
        self.events
            .publish(EngineEvent::AccountUpdate(self.account_snapshot()));

        Ok(position)
    }

    /// Close every open position at its last seen price.
    pub fn close_all(&self) -> Vec<Position> {
        let targets: Vec<(String, f64)> = self
            .positions
            .read()
            .unwrap()
            .values()
            .map(|p| (p.id.clone(), p.current_price))
            .collect();

        let mut closed = Vec::new();
        for (id, price) in targets {
            if let Ok(position) = self.close_position(&id, price, CloseReason::CloseAll) {
                closed.push(position);
            }
        }
        closed
    }

    // ── Stats & reset ───────────────────────────────────────────

    pub fn stats_report(&self) -> StatsReport {
        self.stats_report_at(Utc::now().timestamp_millis())
    }

    pub fn stats_report_at(&self, now_ms: i64) -> StatsReport {
        let stats = self.stats.read().unwrap().clone();
        let equity = self.equity();
        let initial = self.config.initial_balance;

        let win_rate = if stats.total_trades > 0 {
            stats.wins as f64 / stats.total_trades as f64
        } else {
            0.0
        };
        let profit_factor = if stats.gross_loss > 0.0 {
            stats.gross_profit / stats.gross_loss
        } else if stats.gross_profit > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };
        let avg_win = if stats.wins > 0 { stats.gross_profit / stats.wins as f64 } else { 0.0 };
        let avg_loss = if stats.losses > 0 { stats.gross_loss / stats.losses as f64 } else { 0.0 };
        let expectancy = win_rate * avg_win - (1.0 - win_rate) * avg_loss;
        let roi = if initial > 0.0 { (equity - initial) / initial } else { 0.0 };

        let started = *self.started_at.read().unwrap();
        let running_days = ((now_ms - started).max(0)) as f64 / 86_400_000.0;
        let annualized_return = if running_days > 0.0 && roi > -1.0 {
            (1.0 + roi).powf(365.0 / running_days.max(1.0)) - 1.0
        } else {
            0.0
        };

        StatsReport {
            total_trades: stats.total_trades,
            wins: stats.wins,
            losses: stats.losses,
            win_rate,
            gross_profit: stats.gross_profit,
            gross_loss: stats.gross_loss,
            profit_factor,
            avg_win,
            avg_loss,
            expectancy,
            peak_equity: stats.peak_equity,
            max_drawdown: stats.max_drawdown,
            roi,
            running_days,
            annualized_return,
        }
    }

    /// Restore the initial balance and wipe positions, log and stats.
    /// Also re-initializes the risk manager. Idempotent.
    pub fn reset(&self) {
        let initial = self.config.initial_balance;
        {
            let mut positions = self.positions.write().unwrap();
            positions.clear();
        }
        {
            let mut account = self.account.write().unwrap();
            *account = AccountState::new(initial);
        }
        self.trade_log.write().unwrap().clear();
        {
            let mut stats = self.stats.write().unwrap();
            *stats = TradeStats { peak_equity: initial, ..Default::default() };
        }
        *self.started_at.write().unwrap() = Utc::now().timestamp_millis();
        self.risk.reset_at(initial, Utc::now());

        info!(balance = initial, "[PAPER] account reset");
        self.events
            .publish(EngineEvent::AccountUpdate(self.account_snapshot()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RiskConfig;
    use crate::types::{AtrReading, SignalAction, SignalClass, VolRegime};
    use std::collections::BTreeMap;

    fn make_signal(score: i32, classification: SignalClass) -> Signal {
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
            confidence: 0.9,
            bullish_count: 6,
            bearish_count: 1,
            confluence: 6.0 / 13.0,
            indicators: BTreeMap::new(),
            atr: Some(AtrReading { atr: 500.0, atr_pct: 3.0, regime: VolRegime::Medium }),
            timestamp: 0,
        }
    }

    fn engine_with(risk_config: RiskConfig) -> PaperTradingEngine {
        let paper = PaperConfig::default();
        let risk = Arc::new(RiskManager::new(risk_config, paper.initial_balance));
        PaperTradingEngine::new(paper, risk, EventBus::new(64))
    }

    fn engine() -> PaperTradingEngine {
        engine_with(RiskConfig::default())
    }

    fn assert_account_invariants(engine: &PaperTradingEngine) {
        let snapshot = engine.account_snapshot();
        let unrealized: f64 = engine.open_positions().iter().map(|p| p.unrealized_pnl).sum();
        assert!(
            (snapshot.equity - (snapshot.balance + unrealized)).abs() < 1e-6,
            "equity {} != balance {} + unrealized {}",
            snapshot.equity,
            snapshot.balance,
            unrealized
        );
        assert!((snapshot.free_margin - (snapshot.equity - snapshot.margin)).abs() < 1e-6);
        assert!(snapshot.margin >= -1e-9);
    }

    #[test]
    fn open_allocates_margin_and_charges_fee() {
        let engine = engine();
        let signal = make_signal(100, SignalClass::StrongBuy);
        let outcome = engine.open_position("BTCUSDT", &signal, 50_000.0);
        let position = match outcome {
            OpenOutcome::Opened(p) => p,
            OpenOutcome::Rejected { reason } => panic!("rejected: {}", reason),
        };

        assert_eq!(position.side, Side::Long);
        assert!(position.entry_price > 50_000.0); // slippage against the taker
        assert!(position.margin > 0.0);
        let snapshot = engine.account_snapshot();
        assert!(snapshot.balance < 10_000.0); // open fee deducted
        assert!((snapshot.margin - position.margin).abs() < 1e-9);
        assert_eq!(snapshot.open_positions, 1);
        assert_account_invariants(&engine);
    }

    #[test]
    fn open_is_rejected_without_free_margin() {
        // A sizing profile that wants 5x the account as margin.
        let risk_config = RiskConfig {
            default_position_size: 5.0,
            max_position_size: 5.0,
            default_leverage: 1.0,
            max_leverage: 1.0,
            ..Default::default()
        };
        let engine = engine_with(risk_config);
        let signal = make_signal(100, SignalClass::StrongBuy);
        match engine.open_position("BTCUSDT", &signal, 50_000.0) {
            OpenOutcome::Rejected { reason } => {
                assert!(reason.contains("Insufficient free margin"), "{}", reason)
            }
            OpenOutcome::Opened(_) => panic!("expected rejection"),
        }
        assert_eq!(engine.open_positions().len(), 0);
    }

    #[test]
    fn stop_loss_fires_on_tick() {
        let engine = engine();
        let signal = make_signal(100, SignalClass::StrongBuy);
        let position = match engine.open_position("BTCUSDT", &signal, 50_000.0) {
            OpenOutcome::Opened(p) => p,
            OpenOutcome::Rejected { reason } => panic!("rejected: {}", reason),
        };

        // Above the stop: nothing happens.
        let closed = engine.on_price_tick("BTCUSDT", position.stop_loss * 1.001);
        assert!(closed.is_empty());
        assert_account_invariants(&engine);

        let closed = engine.on_price_tick("BTCUSDT", position.stop_loss * 0.999);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].1, CloseReason::StopLoss);
        assert!(engine.open_positions().is_empty());
        let log = engine.trade_log();
        assert_eq!(log.last().unwrap().reason, Some(CloseReason::StopLoss));
        assert!(log.last().unwrap().pnl.unwrap() < 0.0);
        assert_account_invariants(&engine);
    }

    #[test]
    fn take_profit_fires_on_tick() {
        let engine = engine();
        let signal = make_signal(-100, SignalClass::StrongSell);
        let position = match engine.open_position("ETHUSDT", &signal, 3_000.0) {
            OpenOutcome::Opened(p) => p,
            OpenOutcome::Rejected { reason } => panic!("rejected: {}", reason),
        };
        assert_eq!(position.side, Side::Short);
        assert!(position.take_profit < position.entry_price);

        let closed = engine.on_price_tick("ETHUSDT", position.take_profit * 0.999);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].1, CloseReason::TakeProfit);
        let trade = engine.trade_log().last().unwrap().clone();
        assert!(trade.pnl.unwrap() > 0.0);
        assert_account_invariants(&engine);
    }

    #[test]
    fn liquidation_breach_warns_but_keeps_the_position() {
        // Wide stop so the buffer check is reachable before the stop-loss.
        let risk_config = RiskConfig {
            stop_loss_roi: 2.0,
            default_leverage: 10.0,
            max_leverage: 10.0,
            ..Default::default()
        };
        let engine = engine_with(risk_config);
        let signal = make_signal(100, SignalClass::StrongBuy);
        let position = match engine.open_position("BTCUSDT", &signal, 50_000.0) {
            OpenOutcome::Opened(p) => p,
            OpenOutcome::Rejected { reason } => panic!("rejected: {}", reason),
        };

        // ~6% below entry: inside the liquidation buffer, above the stop.
        let danger = position.entry_price * 0.94;
        let closed = engine.on_price_tick("BTCUSDT", danger);
        assert!(closed.is_empty());
        assert_eq!(engine.open_positions().len(), 1);
    }

    #[test]
    fn close_unknown_position_is_an_error() {
        let engine = engine();
        let result = engine.close_position("no-such-id", 100.0, CloseReason::Manual);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Unknown position"));
    }

    #[test]
    fn round_trip_accounting_matches_fees_and_slippage() {
        let engine = engine();
        let signal = make_signal(100, SignalClass::StrongBuy);
        let position = match engine.open_position("BTCUSDT", &signal, 50_000.0) {
            OpenOutcome::Opened(p) => p,
            OpenOutcome::Rejected { reason } => panic!("rejected: {}", reason),
        };

        let closed = engine
            .close_position(&position.id, 50_000.0, CloseReason::Manual)
            .unwrap();
        let net = closed.realized_pnl.unwrap();
        let expected_balance =
            10_000.0 - position.open_fee - closed.close_fee.unwrap()
                + (closed.close_price.unwrap() - position.entry_price) * position.size;
        let snapshot = engine.account_snapshot();
        assert!((snapshot.balance - expected_balance).abs() < 1e-6);
        // Same identity through the reported net PnL.
        assert!((snapshot.balance - (10_000.0 + net)).abs() < 1e-6);
        assert!((snapshot.realized_profit - net).abs() < 1e-9);
        assert_account_invariants(&engine);
    }

    #[test]
    fn close_all_flattens_every_position() {
        let engine = engine();
        let long = make_signal(100, SignalClass::StrongBuy);
        let short = make_signal(-100, SignalClass::StrongSell);
        assert!(engine.open_position("BTCUSDT", &long, 50_000.0).is_opened());
        assert!(engine.open_position("ETHUSDT", &short, 3_000.0).is_opened());

        let closed = engine.close_all();
        assert_eq!(closed.len(), 2);
        assert!(engine.open_positions().is_empty());
        assert!(closed.iter().all(|p| p.close_reason == Some(CloseReason::CloseAll)));
        assert_eq!(engine.account_snapshot().margin, 0.0);
        assert_account_invariants(&engine);
    }

    #[test]
    fn stats_track_wins_and_losses() {
        let engine = engine();
        let signal = make_signal(100, SignalClass::StrongBuy);

        let p1 = match engine.open_position("BTCUSDT", &signal, 50_000.0) {
            OpenOutcome::Opened(p) => p,
            _ => panic!(),
        };
        engine.close_position(&p1.id, 52_000.0, CloseReason::Manual).unwrap();

        let p2 = match engine.open_position("BTCUSDT", &signal, 50_000.0) {
            OpenOutcome::Opened(p) => p,
            _ => panic!(),
        };
        engine.close_position(&p2.id, 49_000.0, CloseReason::Manual).unwrap();

        let report = engine.stats_report();
        assert_eq!(report.total_trades, 2);
        assert_eq!(report.wins, 1);
        assert_eq!(report.losses, 1);
        assert!((report.win_rate - 0.5).abs() < 1e-9);
        assert!(report.profit_factor > 0.0 && report.profit_factor.is_finite());
        assert!(report.avg_win > 0.0);
        assert!(report.avg_loss > 0.0);
        let expected = report.win_rate * report.avg_win - (1.0 - report.win_rate) * report.avg_loss;
        assert!((report.expectancy - expected).abs() < 1e-9);
    }

    #[test]
    fn profit_factor_conventions() {
        let engine = engine();
        // No trades at all: 0.
        assert_eq!(engine.stats_report().profit_factor, 0.0);

        // Only winners: infinity.
        let signal = make_signal(100, SignalClass::StrongBuy);
        let p = match engine.open_position("BTCUSDT", &signal, 50_000.0) {
            OpenOutcome::Opened(p) => p,
            _ => panic!(),
        };
        engine.close_position(&p.id, 55_000.0, CloseReason::Manual).unwrap();
        assert!(engine.stats_report().profit_factor.is_infinite());
    }

    #[test]
    fn reset_is_idempotent() {
        let engine = engine();
        let signal = make_signal(100, SignalClass::StrongBuy);
        assert!(engine.open_position("BTCUSDT", &signal, 50_000.0).is_opened());

        engine.reset();
        let first = engine.account_snapshot();
        engine.reset();
        let second = engine.account_snapshot();

        assert_eq!(first.balance, 10_000.0);
        assert_eq!(first.equity, 10_000.0);
        assert_eq!(first.open_positions, 0);
        assert_eq!(second.balance, first.balance);
        assert!(engine.trade_log().is_empty());
        assert_eq!(engine.stats_report().total_trades, 0);
    }

    #[test]
    fn equity_tracks_unrealized_pnl() {
        let engine = engine();
        let signal = make_signal(100, SignalClass::StrongBuy);
        let position = match engine.open_position("BTCUSDT", &signal, 50_000.0) {
            OpenOutcome::Opened(p) => p,
            _ => panic!(),
        };

        // A small favorable move, still inside stop/take bounds.
        let up = position.entry_price * 1.002;
        engine.on_price_tick("BTCUSDT", up);
        let snapshot = engine.account_snapshot();
        assert!(snapshot.equity > snapshot.balance);
        assert_account_invariants(&engine);
    }
}
