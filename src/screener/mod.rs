//! Screener Loop
//!
//! Maintains the symbol universe, consumes ticker and order-book streams,
//! and runs the scheduled scan cycle: candles (behind a short cache) feed
//! the signal engine, valid signals are ranked, and the top of the list is
//! published as the current opportunity set. A symbol entering the list does
//! not auto-trade; opens arrive through the operator command surface.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use crate::config::ScreenerConfig;
use crate::events::{EngineEvent, EventBus, StatusSnapshot};
use crate::market::{MarketData, OrderBookUpdate, TickerUpdate};
use crate::paper::PaperTradingEngine;
use crate::risk::RiskManager;
use crate::signal::SignalEngine;
use crate::types::{Candle, CloseReason, Opportunity, OrderBook, Signal, SignalAction};

/// Fallback universe when contract discovery fails.
const FALLBACK_SYMBOLS: &[&str] = &[
    "BTCUSDT", "ETHUSDT", "SOLUSDT", "XRPUSDT", "BNBUSDT", "DOGEUSDT", "ADAUSDT", "LINKUSDT",
    "AVAXUSDT", "LTCUSDT",
];

/// Latest ticker values for one symbol.
#[derive(Debug, Clone, Default)]
pub struct TickerSnapshot {
    pub price: f64,
    pub best_bid: f64,
    pub best_ask: f64,
    /// Spread as percent of the mid price.
    pub spread_pct: f64,
    pub volume_24h: f64,
    pub turnover_24h: f64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Default)]
struct SymbolRecord {
    ticker: TickerSnapshot,
    book: Option<OrderBook>,
    last_signal: Option<Signal>,
    candles: Option<CandleCache>,
    cooldown_until: i64,
    funding_rate: Option<f64>,
}

#[derive(Debug, Clone)]
struct CandleCache {
    fetched_at: i64,
    candles: Vec<Candle>,
}

pub struct Screener {
    config: ScreenerConfig,
    provider: Arc<dyn MarketData>,
    engine: SignalEngine,
    risk: Arc<RiskManager>,
    paper: Arc<PaperTradingEngine>,
    events: EventBus,
    symbols: RwLock<HashMap<String, SymbolRecord>>,
    /// Whole list swapped atomically between scans.
    opportunities: RwLock<Arc<Vec<Opportunity>>>,
    running: AtomicBool,
    scan_count: AtomicU64,
    stream_tasks: RwLock<Vec<JoinHandle<()>>>,
}

impl Screener {
    pub fn new(
        config: ScreenerConfig,
        provider: Arc<dyn MarketData>,
        engine: SignalEngine,
        risk: Arc<RiskManager>,
        paper: Arc<PaperTradingEngine>,
        events: EventBus,
    ) -> Self {
        Self {
            config,
            provider,
            engine,
            risk,
            paper,
            events,
            symbols: RwLock::new(HashMap::new()),
            opportunities: RwLock::new(Arc::new(Vec::new())),
            running: AtomicBool::new(false),
            scan_count: AtomicU64::new(0),
            stream_tasks: RwLock::new(Vec::new()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn paper(&self) -> &Arc<PaperTradingEngine> {
        &self.paper
    }

    pub fn risk(&self) -> &Arc<RiskManager> {
        &self.risk
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn universe(&self) -> Vec<String> {
        self.symbols.read().map(|s| s.keys().cloned().collect()).unwrap_or_default()
    }

    pub fn opportunities(&self) -> Vec<Opportunity> {
        self.opportunities
            .read()
            .map(|ops| ops.as_ref().clone())
            .unwrap_or_default()
    }

    pub fn ticker(&self, symbol: &str) -> Option<TickerSnapshot> {
        self.symbols.read().ok()?.get(symbol).map(|r| r.ticker.clone())
    }

    pub fn last_signal(&self, symbol: &str) -> Option<Signal> {
        self.symbols.read().ok()?.get(symbol)?.last_signal.clone()
    }

    // ── Universe ────────────────────────────────────────────────

    /// Build the symbol universe: linear perps above the turnover floor,
    /// sorted by turnover, top N retained. Falls back to a fixed list when
    /// discovery fails.
    pub async fn init_universe(&self) -> Vec<String> {
        let selected: Vec<(String, f64)> = match self.provider.list_contracts().await {
            Ok(contracts) => {
                let mut eligible: Vec<_> = contracts
                    .into_iter()
                    .filter(|c| c.is_linear() && c.turnover_24h >= self.config.min_volume_24h)
                    .collect();
                eligible.sort_by(|a, b| {
                    b.turnover_24h
                        .partial_cmp(&a.turnover_24h)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                eligible.truncate(self.config.top_coins_count);
                eligible.into_iter().map(|c| (c.symbol, c.turnover_24h)).collect()
            }
            Err(e) => {
                warn!(error = %e, "contract discovery failed; using fallback symbols");
                FALLBACK_SYMBOLS.iter().map(|s| (s.to_string(), 0.0)).collect()
            }
        };

        let mut symbols = self.symbols.write().unwrap();
        symbols.clear();
        for (symbol, turnover) in &selected {
            let mut record = SymbolRecord::default();
            record.ticker.turnover_24h = *turnover;
            symbols.insert(symbol.clone(), record);
        }
        info!(count = symbols.len(), "symbol universe initialized");
        selected.into_iter().map(|(s, _)| s).collect()
    }

    // ── Streams ─────────────────────────────────────────────────

    fn apply_ticker(&self, update: TickerUpdate) {
        {
            let mut symbols = self.symbols.write().unwrap();
            let record = match symbols.get_mut(&update.symbol) {
                Some(r) => r,
                None => return,
            };
            let mid = (update.best_bid + update.best_ask) / 2.0;
            record.ticker = TickerSnapshot {
                price: update.price,
                best_bid: update.best_bid,
                best_ask: update.best_ask,
                spread_pct: if mid > 0.0 {
                    (update.best_ask - update.best_bid).max(0.0) / mid * 100.0
                } else {
                    0.0
                },
                volume_24h: update.volume_24h,
                turnover_24h: update.turnover_24h,
                updated_at: update.ts,
            };
        }
        // Every tick drives position management for that symbol.
        let closed = self.paper.on_price_tick(&update.symbol, update.price);
        for (_, reason) in &closed {
            if matches!(reason, CloseReason::StopLoss) {
                self.start_cooldown(&update.symbol);
            }
        }
    }

    fn apply_order_book(&self, update: OrderBookUpdate) {
        let mut symbols = self.symbols.write().unwrap();
        if let Some(record) = symbols.get_mut(&update.symbol) {
            let mut book = update.book;
            book.normalize_levels();
            record.book = Some(book);
        }
    }

    /// Start the screener: universe, streams and the scan loop.
    pub async fn run(self: Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("screener already running");
            return;
        }
        self.events.publish(EngineEvent::ScreenerStarted);

        let universe = if self.universe().is_empty() {
            self.init_universe().await
        } else {
            self.universe()
        };

        match self.provider.subscribe_ticker(&universe).await {
            Ok(mut rx) => {
                let screener = Arc::clone(&self);
                let handle = tokio::spawn(async move {
                    while let Some(update) = rx.recv().await {
                        screener.apply_ticker(update);
                    }
                    debug!("ticker stream closed");
                });
                self.stream_tasks.write().unwrap().push(handle);
            }
            Err(e) => warn!(error = %e, "ticker subscription failed"),
        }

        match self.provider.subscribe_order_book(&universe, 25).await {
            Ok(mut rx) => {
                let screener = Arc::clone(&self);
                let handle = tokio::spawn(async move {
                    while let Some(update) = rx.recv().await {
                        screener.apply_order_book(update);
                    }
                    debug!("order book stream closed");
                });
                self.stream_tasks.write().unwrap().push(handle);
            }
            Err(e) => warn!(error = %e, "order book subscription failed"),
        }

        let scan_interval = Duration::from_millis(self.config.scan_interval_ms);
        while self.is_running() {
            self.risk.maybe_daily_reset_at(Utc::now());
            self.scan_cycle().await;
            self.events
                .publish(EngineEvent::StatusUpdate(self.status_snapshot()));
            // Re-check the stop flag across the long sleep in coarse steps.
            let mut remaining = scan_interval;
            let step = Duration::from_millis(250);
            while self.is_running() && remaining > Duration::ZERO {
                let chunk = remaining.min(step);
                sleep(chunk).await;
                remaining = remaining.saturating_sub(chunk);
            }
        }
    }

    /// Stop issuing scans and drop the streams. Open positions stay open.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        for handle in self.stream_tasks.write().unwrap().drain(..) {
            handle.abort();
        }
        self.events.publish(EngineEvent::ScreenerStopped);
        info!("screener stopped");
    }

    // ── Scan cycle ──────────────────────────────────────────────

    /// Scan the whole universe in batches and publish the ranked result.
    pub async fn scan_cycle(&self) {
        let cycle = self.scan_count.fetch_add(1, Ordering::SeqCst) + 1;
        let symbols = self.universe();
        let mut found: Vec<Opportunity> = Vec::new();
        let mut scanned = 0usize;
        let mut skipped = 0usize;

        for batch in symbols.chunks(self.config.batch_size.max(1)) {
            for symbol in batch {
                let now = Utc::now().timestamp_millis();
                match self.scan_symbol(symbol, now).await {
                    ScanOutcome::Opportunity(op) => {
                        scanned += 1;
                        found.push(op);
                    }
                    ScanOutcome::NoSignal => scanned += 1,
                    ScanOutcome::Skipped => skipped += 1,
                }
            }
            if self.config.batch_delay_ms > 0 {
                sleep(Duration::from_millis(self.config.batch_delay_ms)).await;
            }
        }

        let valid = found.len();
        self.publish_opportunities(found);
        debug!(cycle, scanned, skipped, valid, "scan cycle complete");
    }

    async fn scan_symbol(&self, symbol: &str, now: i64) -> ScanOutcome {
        let (cached, book, ticker, cooldown_until) = {
            let symbols = self.symbols.read().unwrap();
            match symbols.get(symbol) {
                Some(record) => (
                    record.candles.clone(),
                    record.book.clone(),
                    record.ticker.clone(),
                    record.cooldown_until,
                ),
                None => return ScanOutcome::Skipped,
            }
        };

        if cooldown_until > now {
            return ScanOutcome::Skipped;
        }

        let candles = match cached {
            Some(cache) if now - cache.fetched_at < self.config.candle_cache_ms => cache.candles,
            _ => {
                let fetched = self
                    .provider
                    .fetch_candles(symbol, self.config.candle_granularity_mins, None, None)
                    .await;
                match fetched {
                    Ok(candles) => {
                        let mut symbols = self.symbols.write().unwrap();
                        if let Some(record) = symbols.get_mut(symbol) {
                            record.candles =
                                Some(CandleCache { fetched_at: now, candles: candles.clone() });
                        }
                        candles
                    }
                    Err(e) => {
                        warn!(symbol = %symbol, error = %e, "candle fetch failed");
                        return ScanOutcome::Skipped;
                    }
                }
            }
        };
        if candles.is_empty() {
            return ScanOutcome::Skipped;
        }

        let signal = self.engine.evaluate(symbol, &candles, book.as_ref(), now);
        {
            let mut symbols = self.symbols.write().unwrap();
            if let Some(record) = symbols.get_mut(symbol) {
                record.last_signal = Some(signal.clone());
            }
        }

        if !self.passes_validity(&signal, ticker.spread_pct) {
            return ScanOutcome::NoSignal;
        }

        // Funding rate is informational only; fetched just for hits.
        let funding_rate = self.provider.fetch_funding_rate(symbol).await.unwrap_or(None);
        if funding_rate.is_some() {
            let mut symbols = self.symbols.write().unwrap();
            if let Some(record) = symbols.get_mut(symbol) {
                record.funding_rate = funding_rate;
            }
        }

        let price = if ticker.price > 0.0 {
            ticker.price
        } else {
            candles.last().map(|c| c.close).unwrap_or(0.0)
        };
        let rank_score = self.rank_score(&signal, &ticker);
        self.events.publish(EngineEvent::Signal(signal.clone()));

        ScanOutcome::Opportunity(Opportunity {
            symbol: symbol.to_string(),
            total_score: signal.total_score,
            classification: signal.classification,
            action: signal.action,
            confidence: signal.confidence,
            confluence: signal.confluence,
            rank_score,
            price,
            spread_pct: ticker.spread_pct,
            turnover_24h: ticker.turnover_24h,
            funding_rate,
            timestamp: now,
        })
    }

    /// Screening validity filter; stricter than the risk entry gates.
    fn passes_validity(&self, signal: &Signal, spread_pct: f64) -> bool {
        signal.action != SignalAction::Hold
            && signal.total_score.abs() >= self.config.min_abs_score
            && signal.confidence >= self.config.min_confidence
            && spread_pct <= self.config.max_spread_pct
            && signal.confluence >= self.config.min_confluence
    }

    /// Composite rank for ordering opportunities.
    fn rank_score(&self, signal: &Signal, ticker: &TickerSnapshot) -> f64 {
        let mut rank = (signal.total_score.abs() as f64 / 220.0) * 100.0
            + signal.confidence * 50.0
            + signal.confluence * 30.0;

        let turnover = ticker.turnover_24h;
        rank += if turnover >= 100_000_000.0 {
            20.0
        } else if turnover >= 50_000_000.0 {
            15.0
        } else if turnover >= 10_000_000.0 {
            10.0
        } else if turnover >= 5_000_000.0 {
            5.0
        } else {
            0.0
        };

        if signal.classification.is_extreme() {
            rank += 15.0;
        } else if signal.classification.is_strong() {
            rank += 10.0;
        }

        if ticker.spread_pct > 0.05 {
            rank -= 10.0;
        }
        if ticker.spread_pct > 0.08 {
            rank -= 10.0;
        }
        rank
    }

    /// Sort, truncate and atomically swap the opportunity list.
    fn publish_opportunities(&self, mut found: Vec<Opportunity>) {
        found.sort_by(|a, b| {
            b.rank_score
                .partial_cmp(&a.rank_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        found.truncate(self.config.max_opportunities);
        let list = Arc::new(found);
        *self.opportunities.write().unwrap() = Arc::clone(&list);
        self.events
            .publish(EngineEvent::Opportunities(list.as_ref().clone()));
    }

    /// Put a symbol on cooldown for the configured window.
    pub fn start_cooldown(&self, symbol: &str) {
        let until = Utc::now().timestamp_millis() + self.config.cooldown_ms;
        let mut symbols = self.symbols.write().unwrap();
        if let Some(record) = symbols.get_mut(symbol) {
            record.cooldown_until = until;
            debug!(symbol = %symbol, until, "cooldown started");
        }
    }

    // ── State & commands ────────────────────────────────────────

    pub fn status_snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            running: self.is_running(),
            account: self.paper.account_snapshot(),
            risk: self.risk.snapshot(),
            open_positions: self.paper.open_positions(),
            opportunities: self.opportunities(),
            stats: self.paper.stats_report(),
            universe_size: self.universe().len(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

enum ScanOutcome {
    Opportunity(Opportunity),
    NoSignal,
    Skipped,
}
