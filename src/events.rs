//! Engine event stream
//!
//! Broadcasts engine updates to all subscribed consumers (dashboards,
//! loggers, tests). Events are a tagged enum so any transport can serialize
//! them uniformly; sending with no subscribers is fine and ignored.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::paper::StatsReport;
use crate::risk::RiskSnapshot;
use crate::types::{AccountSnapshot, Opportunity, Position, Signal, TradeRecord};

/// Full state snapshot pushed periodically and returned by `get_state`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub running: bool,
    pub account: AccountSnapshot,
    pub risk: RiskSnapshot,
    pub open_positions: Vec<Position>,
    pub opportunities: Vec<Opportunity>,
    pub stats: StatsReport,
    pub universe_size: usize,
    pub timestamp: i64,
}

/// Everything a consumer can receive from the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineEvent {
    Opportunities(Vec<Opportunity>),
    Signal(Signal),
    PositionOpened(Position),
    PositionClosed {
        position: Position,
        trade: TradeRecord,
    },
    AccountUpdate(AccountSnapshot),
    CircuitBreaker {
        consecutive_losses: u32,
        triggered: bool,
    },
    TradeRecorded {
        position_id: String,
        pnl: f64,
        consecutive_losses: u32,
    },
    LiquidationWarning {
        position_id: String,
        symbol: String,
        buffer: f64,
    },
    ScreenerStarted,
    ScreenerStopped,
    StatusUpdate(StatusSnapshot),
    /// Invariant violations surface here after the offending command aborts.
    Diagnostic {
        message: String,
    },
}

/// Channel for broadcasting engine events to all connected consumers.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    /// Create a new bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: EngineEvent) {
        // Ignore send errors (no receivers is fine)
        let _ = self.tx.send(event);
    }

    /// Serialize an event the way a wire transport would.
    pub fn to_json(event: &EngineEvent) -> Option<String> {
        serde_json::to_string(event).ok()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
