//! End-to-end engine scenarios

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

use perpscout::commands::{dispatch, Command, CommandResponse};
use perpscout::config::AppConfig;
use perpscout::events::EngineEvent;
use perpscout::market::{ContractInfo, MarketData, OrderBookUpdate, TickerUpdate};
use perpscout::paper::OpenOutcome;
use perpscout::signal::SignalEngine;
use perpscout::types::{
    AtrReading, Candle, CloseReason, IndicatorSignal, Side, Signal, SignalAction, SignalClass,
    VolRegime,
};

// ============================================================================
// Fixtures
// ============================================================================

struct StaticMarket {
    contracts: Vec<ContractInfo>,
    candles: Vec<Candle>,
}

#[async_trait]
impl MarketData for StaticMarket {
    async fn list_contracts(&self) -> Result<Vec<ContractInfo>> {
        Ok(self.contracts.clone())
    }

    async fn fetch_candles(
        &self,
        _symbol: &str,
        _granularity_mins: u32,
        _from: Option<i64>,
        _to: Option<i64>,
    ) -> Result<Vec<Candle>> {
        Ok(self.candles.clone())
    }

    async fn subscribe_ticker(&self, _symbols: &[String]) -> Result<mpsc::Receiver<TickerUpdate>> {
        let (_tx, rx) = mpsc::channel(1);
        Ok(rx)
    }

    async fn subscribe_order_book(
        &self,
        _symbols: &[String],
        _depth: usize,
    ) -> Result<mpsc::Receiver<OrderBookUpdate>> {
        let (_tx, rx) = mpsc::channel(1);
        Ok(rx)
    }
}

fn trend_candles(factor: f64, n: usize) -> Vec<Candle> {
    (0..n)
        .map(|i| {
            let close = 100.0 * factor.powi(i as i32);
            Candle {
                timestamp: 1_700_000_000_000 + i as i64 * 1_800_000,
                open: close * 0.999,
                high: close * 1.004,
                low: close * 0.996,
                close,
                volume: 25_000.0,
            }
        })
        .collect()
}

fn contract(symbol: &str, turnover: f64) -> ContractInfo {
    ContractInfo {
        symbol: symbol.to_string(),
        is_quanto: false,
        turnover_24h: turnover,
        volume_24h: turnover / 50_000.0,
        tick_size: 0.1,
        lot_size: 0.001,
        multiplier: 1.0,
        max_leverage: 100.0,
    }
}

fn strong_signal(score: i32, classification: SignalClass) -> Signal {
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
        bearish_count: 2,
        confluence: 6.0 / 13.0,
        indicators: BTreeMap::new(),
        atr: Some(AtrReading { atr: 500.0, atr_pct: 3.0, regime: VolRegime::Medium }),
        timestamp: 1_700_000_000_000,
    }
}

fn default_build(
    candles: Vec<Candle>,
) -> (Arc<perpscout::screener::Screener>, perpscout::events::EventBus) {
    let provider = Arc::new(StaticMarket {
        contracts: vec![contract("BTCUSDT", 900_000_000.0), contract("ETHUSDT", 400_000_000.0)],
        candles,
    });
    perpscout::build(AppConfig::default(), provider)
}

// ============================================================================
// Signal scenarios
// ============================================================================

#[test]
fn monotonic_uptrend_flags_rsi_overbought() {
    let config = AppConfig::default();
    let engine = SignalEngine::new(config.signal, config.indicators);
    let candles = trend_candles(1.02, 20);
    let signal = engine.evaluate("BTCUSDT", &candles, None, 0);

    let rsi = signal.indicators.get("rsi").expect("rsi present");
    assert_eq!(rsi.signal, IndicatorSignal::Sell);
    assert!(rsi.score < 0);
}

#[test]
fn monotonic_downtrend_flags_rsi_oversold() {
    let config = AppConfig::default();
    let engine = SignalEngine::new(config.signal, config.indicators);
    let candles = trend_candles(0.98, 20);
    let signal = engine.evaluate("BTCUSDT", &candles, None, 0);

    let rsi = signal.indicators.get("rsi").expect("rsi present");
    assert_eq!(rsi.signal, IndicatorSignal::Buy);
    assert!(rsi.score > 0);
}

#[test]
fn classification_boundaries_hold_end_to_end() {
    let config = AppConfig::default();
    let engine = SignalEngine::new(config.signal, config.indicators);
    assert_eq!(engine.classify(130), SignalClass::ExtremeBuy);
    assert_eq!(engine.classify(129), SignalClass::StrongBuy);
    assert_eq!(engine.classify(-39), SignalClass::Neutral);
    assert_eq!(engine.classify(-40), SignalClass::SellWeak);
}

// ============================================================================
// Risk + paper scenarios
// ============================================================================

#[tokio::test]
async fn strong_long_open_produces_bracketed_position() {
    let config = AppConfig::default();
    let risk = Arc::new(perpscout::risk::RiskManager::new(config.risk, 10_000.0));
    let paper = perpscout::paper::PaperTradingEngine::new(
        config.paper,
        Arc::clone(&risk),
        perpscout::events::EventBus::default(),
    );

    let signal = strong_signal(100, SignalClass::StrongBuy);
    let position = match paper.open_position("BTCUSDT", &signal, 50_000.0) {
        OpenOutcome::Opened(p) => p,
        OpenOutcome::Rejected { reason } => panic!("rejected: {}", reason),
    };
    assert_eq!(position.side, Side::Long);
    assert!(position.size > 0.0);
    assert!(position.leverage >= 2.0 && position.leverage <= 10.0);
    assert!(position.stop_loss < 50_000.0);
    assert!(position.take_profit > 50_000.0);
}

#[tokio::test]
async fn circuit_breaker_latches_and_blocks_the_fourth_trade() {
    let config = AppConfig::default();
    let risk = Arc::new(perpscout::risk::RiskManager::new(config.risk, 10_000.0));
    let events = perpscout::events::EventBus::default();
    let mut rx = events.subscribe();
    let paper = perpscout::paper::PaperTradingEngine::new(config.paper, Arc::clone(&risk), events);

    let signal = strong_signal(100, SignalClass::StrongBuy);
    for _ in 0..3 {
        let position = match paper.open_position("BTCUSDT", &signal, 50_000.0) {
            OpenOutcome::Opened(p) => p,
            OpenOutcome::Rejected { reason } => panic!("rejected: {}", reason),
        };
        // Small losing close, well inside the drawdown limit.
        paper
            .close_position(&position.id, 49_900.0, CloseReason::Manual)
            .unwrap();
    }
    assert!(risk.snapshot().circuit_breaker_triggered);

    match paper.open_position("BTCUSDT", &signal, 50_000.0) {
        OpenOutcome::Rejected { reason } => assert!(reason.contains("Circuit breaker")),
        OpenOutcome::Opened(_) => panic!("breaker should block the fourth trade"),
    }

    // The latch was announced on the bus.
    let mut saw_breaker = false;
    while let Ok(event) = rx.try_recv() {
        if let EngineEvent::CircuitBreaker { triggered: true, .. } = event {
            saw_breaker = true;
        }
    }
    assert!(saw_breaker);
}

#[tokio::test]
async fn daily_drawdown_blocks_new_trades() {
    let config = AppConfig::default();
    let risk = Arc::new(perpscout::risk::RiskManager::new(config.risk, 10_000.0));
    let paper = perpscout::paper::PaperTradingEngine::new(
        config.paper,
        Arc::clone(&risk),
        perpscout::events::EventBus::default(),
    );

    risk.update_balance(9_600.0); // -4% against a 3% limit
    let signal = strong_signal(100, SignalClass::StrongBuy);
    match paper.open_position("BTCUSDT", &signal, 50_000.0) {
        OpenOutcome::Rejected { reason } => assert!(reason.contains("drawdown")),
        OpenOutcome::Opened(_) => panic!("drawdown limit should block the trade"),
    }
}

#[tokio::test]
async fn max_positions_gate_blocks_the_sixth_open() {
    let config = AppConfig::default();
    let risk = Arc::new(perpscout::risk::RiskManager::new(config.risk, 10_000.0));
    let paper = perpscout::paper::PaperTradingEngine::new(
        config.paper,
        Arc::clone(&risk),
        perpscout::events::EventBus::default(),
    );

    let signal = strong_signal(100, SignalClass::StrongBuy);
    for i in 0..5 {
        let outcome = paper.open_position(&format!("SYM{}USDT", i), &signal, 1_000.0);
        assert!(outcome.is_opened(), "open {} failed", i);
    }
    match paper.open_position("LASTUSDT", &signal, 1_000.0) {
        OpenOutcome::Rejected { reason } => assert!(reason.contains("Max open positions")),
        OpenOutcome::Opened(_) => panic!("sixth open should be blocked"),
    }
}

#[tokio::test]
async fn reset_restores_the_initial_account() {
    let config = AppConfig::default();
    let risk = Arc::new(perpscout::risk::RiskManager::new(config.risk, 10_000.0));
    let paper = perpscout::paper::PaperTradingEngine::new(
        config.paper,
        Arc::clone(&risk),
        perpscout::events::EventBus::default(),
    );

    let signal = strong_signal(100, SignalClass::StrongBuy);
    let position = match paper.open_position("BTCUSDT", &signal, 50_000.0) {
        OpenOutcome::Opened(p) => p,
        OpenOutcome::Rejected { reason } => panic!("rejected: {}", reason),
    };
    paper.close_position(&position.id, 51_000.0, CloseReason::Manual).unwrap();

    paper.reset();
    let snapshot = paper.account_snapshot();
    assert_eq!(snapshot.balance, 10_000.0);
    assert_eq!(snapshot.equity, 10_000.0);
    assert_eq!(snapshot.open_positions, 0);
    assert!(!risk.snapshot().circuit_breaker_triggered);
    assert_eq!(risk.snapshot().tracked_positions, 0);
}

// ============================================================================
// Screener command flow
// ============================================================================

#[tokio::test]
async fn scan_now_and_get_state_round_trip() {
    let (screener, events) = default_build(trend_candles(1.01, 80));
    let mut rx = events.subscribe();

    screener.init_universe().await;
    match dispatch(&screener, Command::ScanNow).await {
        CommandResponse::Ok => {}
        other => panic!("unexpected response: {:?}", other),
    }

    // The scan publishes an opportunity list (possibly empty) and a signal
    // is cached for every scanned symbol.
    let mut saw_opportunities = false;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, EngineEvent::Opportunities(_)) {
            saw_opportunities = true;
        }
    }
    assert!(saw_opportunities);
    assert!(screener.last_signal("BTCUSDT").is_some());

    match dispatch(&screener, Command::GetState).await {
        CommandResponse::State(state) => {
            assert_eq!(state.universe_size, 2);
            assert_eq!(state.account.balance, 10_000.0);
            assert!(!state.running);
        }
        other => panic!("unexpected response: {:?}", other),
    }
}

#[tokio::test]
async fn open_command_flows_through_the_risk_gates() {
    let (screener, _events) = default_build(trend_candles(1.01, 80));
    screener.init_universe().await;
    dispatch(&screener, Command::ScanNow).await;

    // Whatever the cached signal looks like, the command must come back as a
    // value: opened, gated, or a structured error; never a panic.
    let response = dispatch(
        &screener,
        Command::Open {
            symbol: "BTCUSDT".to_string(),
            side: None,
            price: Some(50_000.0),
        },
    )
    .await;
    match response {
        CommandResponse::Opened { position } => assert_eq!(position.symbol, "BTCUSDT"),
        CommandResponse::Rejected { reason } => assert!(!reason.is_empty()),
        CommandResponse::Error { message } => assert!(!message.is_empty()),
        other => panic!("unexpected response: {:?}", other),
    }

    let response = dispatch(
        &screener,
        Command::Open {
            symbol: "NOPEUSDT".to_string(),
            side: None,
            price: None,
        },
    )
    .await;
    match response {
        CommandResponse::Error { message } => assert!(message.contains("No signal")),
        other => panic!("unexpected response: {:?}", other),
    }
}

#[tokio::test]
async fn reset_account_command_is_idempotent() {
    let (screener, _events) = default_build(trend_candles(1.0, 80));
    let first = dispatch(&screener, Command::ResetAccount).await;
    let second = dispatch(&screener, Command::ResetAccount).await;
    assert!(matches!(first, CommandResponse::Ok));
    assert!(matches!(second, CommandResponse::Ok));

    match dispatch(&screener, Command::GetState).await {
        CommandResponse::State(state) => {
            assert_eq!(state.account.balance, 10_000.0);
            assert_eq!(state.stats.total_trades, 0);
        }
        other => panic!("unexpected response: {:?}", other),
    }
}
