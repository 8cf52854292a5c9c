//! Trade Sink
//!
//! Supervisors publish decoded trades into a bounded mpsc channel; a single
//! listener task drains it and writes one line per trade to stdout, in
//! arrival order.

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::application::ports::{SinkError, TradeSink};
use crate::domain::trade::TradeRecord;
use crate::infrastructure::metrics;

/// Default channel capacity.
pub const DEFAULT_CAPACITY: usize = 1_024;

/// Channel-backed [`TradeSink`].
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<TradeRecord>,
}

impl ChannelSink {
    /// Create a sink and the receiver its listener drains.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<TradeRecord>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl TradeSink for ChannelSink {
    async fn publish(&self, trades: Vec<TradeRecord>) -> Result<(), SinkError> {
        for trade in trades {
            self.tx.send(trade).await.map_err(|_| SinkError::Closed)?;
        }
        Ok(())
    }
}

/// Write every trade from `rx` to `out` until all senders are dropped.
///
/// Returns the number of trades written.
pub async fn run_listener<W: AsyncWrite + Unpin + Send>(
    mut rx: mpsc::Receiver<TradeRecord>,
    mut out: W,
) -> u64 {
    let mut written = 0;
    while let Some(trade) = rx.recv().await {
        let line = format!("{trade}\n");
        if let Err(e) = out.write_all(line.as_bytes()).await {
            tracing::warn!(error = %e, "Failed to write trade");
            continue;
        }
        written += 1;
        metrics::record_trades_emitted(1);
    }
    if let Err(e) = out.flush().await {
        tracing::warn!(error = %e, "Failed to flush trade output");
    }
    written
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use rust_decimal::Decimal;
    use tokio::io::AsyncReadExt;

    use super::*;

    fn trade(id: &str) -> TradeRecord {
        TradeRecord {
            quantity: "250".to_string(),
            instrument_id: id.to_string(),
            price: Decimal::from_str("99.125").unwrap(),
            trade_date: "05/29/2019".to_string(),
            execution_time: "14:31:07".to_string(),
        }
    }

    #[tokio::test]
    async fn listener_writes_in_arrival_order() {
        let (sink, rx) = ChannelSink::new(8);
        let listener = tokio::spawn(run_listener(rx, Vec::new()));

        sink.publish(vec![trade("A"), trade("B")]).await.unwrap();
        sink.publish(vec![trade("C")]).await.unwrap();
        drop(sink);

        assert_eq!(listener.await.unwrap(), 3);
    }

    #[tokio::test]
    async fn listener_output_format() {
        let (sink, rx) = ChannelSink::new(8);
        sink.publish(vec![trade("C765371")]).await.unwrap();
        drop(sink);

        let mut out = Vec::new();
        assert_eq!(run_listener(rx, &mut out).await, 1);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "05/29/2019 [14:31:07] C765371 99.125 250\n"
        );
    }

    #[tokio::test]
    async fn listener_waits_on_a_slow_reader() {
        let (sink, rx) = ChannelSink::new(8);
        let (writer, mut reader) = tokio::io::duplex(16);
        let listener = tokio::spawn(run_listener(rx, writer));

        sink.publish(vec![trade("A"), trade("B")]).await.unwrap();
        drop(sink);

        let mut text = String::new();
        reader.read_to_string(&mut text).await.unwrap();
        assert_eq!(listener.await.unwrap(), 2);
        assert_eq!(text.lines().count(), 2);
        assert!(text.starts_with("05/29/2019 [14:31:07] A 99.125 250\n"));
    }

    #[tokio::test]
    async fn closed_listener_is_reported() {
        let (sink, rx) = ChannelSink::new(1);
        drop(rx);
        assert_eq!(
            sink.publish(vec![trade("A")]).await,
            Err(SinkError::Closed)
        );
    }
}
