//! Market data capability
//!
//! The screener consumes market data through this trait; any provider that
//! can list contracts, serve candles and stream ticker/order-book updates
//! will do. Transport concerns (REST, WebSocket, reconnects) live behind the
//! implementation.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::types::{Candle, OrderBook};

/// Metadata for one tradable contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractInfo {
    pub symbol: String,
    /// Quanto contracts are excluded from the universe.
    pub is_quanto: bool,
    /// 24h turnover in quote currency.
    pub turnover_24h: f64,
    /// 24h volume in base units.
    pub volume_24h: f64,
    pub tick_size: f64,
    pub lot_size: f64,
    pub multiplier: f64,
    pub max_leverage: f64,
}

impl ContractInfo {
    pub fn is_linear(&self) -> bool {
        !self.is_quanto
    }
}

/// One ticker stream event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerUpdate {
    pub symbol: String,
    pub price: f64,
    pub best_bid: f64,
    pub best_ask: f64,
    pub volume_24h: f64,
    pub turnover_24h: f64,
    pub ts: i64,
}

/// One order-book stream event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookUpdate {
    pub symbol: String,
    pub book: OrderBook,
}

/// Abstract market-data provider.
#[async_trait]
pub trait MarketData: Send + Sync {
    /// List active contracts with 24h statistics.
    async fn list_contracts(&self) -> Result<Vec<ContractInfo>>;

    /// Fetch candles at the given granularity, most recent last.
    async fn fetch_candles(
        &self,
        symbol: &str,
        granularity_mins: u32,
        from: Option<i64>,
        to: Option<i64>,
    ) -> Result<Vec<Candle>>;

    /// Subscribe to ticker updates for a set of symbols.
    async fn subscribe_ticker(&self, symbols: &[String]) -> Result<mpsc::Receiver<TickerUpdate>>;

    /// Subscribe to order-book updates for a set of symbols.
    async fn subscribe_order_book(
        &self,
        symbols: &[String],
        depth: usize,
    ) -> Result<mpsc::Receiver<OrderBookUpdate>>;

    /// Latest funding rate, when the venue exposes one.
    async fn fetch_funding_rate(&self, _symbol: &str) -> Result<Option<f64>> {
        Ok(None)
    }
}
