//! Perpscout Library
//!
//! Real-time perpetual-futures opportunity screener and paper-trading
//! simulator: indicators feed a bounded signal score, the risk manager gates
//! and sizes entries, and the paper trader owns the simulated account.

pub mod commands;
pub mod config;
pub mod events;
pub mod market;
pub mod paper;
pub mod risk;
pub mod screener;
pub mod signal;
pub mod types;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::events::EventBus;
use crate::market::MarketData;
use crate::paper::PaperTradingEngine;
use crate::risk::RiskManager;
use crate::screener::Screener;
use crate::signal::SignalEngine;

/// Wire the full engine from a configuration and a market-data provider.
/// Subscribe on the returned bus before starting the screener to see every
/// event from the first scan.
pub fn build(config: AppConfig, provider: Arc<dyn MarketData>) -> (Arc<Screener>, EventBus) {
    let events = EventBus::default();
    let risk = Arc::new(RiskManager::new(config.risk, config.paper.initial_balance));
    let paper = Arc::new(PaperTradingEngine::new(
        config.paper,
        Arc::clone(&risk),
        events.clone(),
    ));
    let engine = SignalEngine::new(config.signal, config.indicators);
    let screener = Arc::new(Screener::new(
        config.screener,
        provider,
        engine,
        risk,
        paper,
        events.clone(),
    ));
    (screener, events)
}
