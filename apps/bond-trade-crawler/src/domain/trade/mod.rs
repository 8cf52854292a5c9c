//! Trade Records
//!
//! Canonical representation of one reported bond trade, as emitted by the
//! fetch pipeline and consumed by sinks.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One executed trade returned by the search endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Reported quantity (kept verbatim, the endpoint uses strings like "1MM+").
    pub quantity: String,
    /// Security identifier the trade belongs to.
    pub instrument_id: String,
    /// Execution price.
    pub price: Decimal,
    /// Trade date (`MM/DD/YYYY`).
    pub trade_date: String,
    /// Time of execution as reported.
    pub execution_time: String,
}

impl fmt::Display for TradeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] {} {:.3} {}",
            self.trade_date, self.execution_time, self.instrument_id, self.price, self.quantity
        )
    }
}

/// Result of one fetch against the search endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Decoded trades (possibly none).
    Trades(Vec<TradeRecord>),
    /// Response had no trade block; the session silently expired.
    Unauthenticated,
}
