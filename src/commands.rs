//! Operator command surface
//!
//! The dashboard (or any other controller) drives the engine through these
//! values. Responses are values too: domain rejections and unknown ids come
//! back as `Rejected`/`Error`, never as panics.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::events::StatusSnapshot;
use crate::paper::OpenOutcome;
use crate::screener::Screener;
use crate::types::{CloseReason, Position, Side};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    StartScreener,
    StopScreener,
    ScanNow,
    GetState,
    Open {
        symbol: String,
        #[serde(default)]
        side: Option<Side>,
        #[serde(default)]
        price: Option<f64>,
    },
    Close {
        position_id: String,
        #[serde(default)]
        price: Option<f64>,
    },
    CloseAll,
    ResetAccount,
    ResetCircuitBreaker,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CommandResponse {
    Ok,
    /// A risk-gate or margin rejection; expected operation, not a failure.
    Rejected { reason: String },
    Opened { position: Position },
    Closed { positions: Vec<Position> },
    State(Box<StatusSnapshot>),
    /// Unknown symbol/position or an aborted operation.
    Error { message: String },
}

impl CommandResponse {
    pub fn error(message: impl Into<String>) -> Self {
        CommandResponse::Error { message: message.into() }
    }
}

/// Dispatch one operator command against the engine.
pub async fn dispatch(screener: &Arc<Screener>, command: Command) -> CommandResponse {
    match command {
        Command::StartScreener => {
            if screener.is_running() {
                return CommandResponse::error("Screener already running");
            }
            let screener = Arc::clone(screener);
            tokio::spawn(async move { screener.run().await });
            CommandResponse::Ok
        }
        Command::StopScreener => {
            screener.stop();
            CommandResponse::Ok
        }
        Command::ScanNow => {
            screener.scan_cycle().await;
            CommandResponse::Ok
        }
        Command::GetState => CommandResponse::State(Box::new(screener.status_snapshot())),
        Command::Open { symbol, side, price } => {
            let signal = match screener.last_signal(&symbol) {
                Some(signal) => signal,
                None => {
                    return CommandResponse::error(format!(
                        "No signal available for symbol {}",
                        symbol
                    ))
                }
            };
            let market_price = price
                .or_else(|| screener.ticker(&symbol).map(|t| t.price).filter(|p| *p > 0.0))
                .unwrap_or(0.0);
            if market_price <= 0.0 {
                return CommandResponse::error(format!("No market price for {}", symbol));
            }
            if let (Some(requested), Some(derived)) = (side, signal.side()) {
                if requested != derived {
                    return CommandResponse::error(format!(
                        "Requested side {} conflicts with signal side {}",
                        requested, derived
                    ));
                }
            }
            match screener.paper().open_position(&symbol, &signal, market_price) {
                OpenOutcome::Opened(position) => CommandResponse::Opened { position },
                OpenOutcome::Rejected { reason } => CommandResponse::Rejected { reason },
            }
        }
        Command::Close { position_id, price } => {
            let position = match screener.paper().position(&position_id) {
                Some(p) => p,
                None => {
                    return CommandResponse::error(format!("Unknown position id: {}", position_id))
                }
            };
            let close_price = price.unwrap_or(position.current_price);
            match screener
                .paper()
                .close_position(&position_id, close_price, CloseReason::Manual)
            {
                Ok(closed) => {
                    screener.start_cooldown(&closed.symbol);
                    CommandResponse::Closed { positions: vec![closed] }
                }
                Err(e) => CommandResponse::error(e.to_string()),
            }
        }
        Command::CloseAll => {
            let closed = screener.paper().close_all();
            for position in &closed {
                screener.start_cooldown(&position.symbol);
            }
            CommandResponse::Closed { positions: closed }
        }
        Command::ResetAccount => {
            screener.paper().reset();
            CommandResponse::Ok
        }
        Command::ResetCircuitBreaker => {
            screener.risk().reset_circuit_breaker();
            CommandResponse::Ok
        }
    }
}
