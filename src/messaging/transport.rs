//! Line-oriented JSON chat transport
//!
//! Inbound chat events arrive as one JSON `InboundMessage` per line and
//! outbound messages are written the same way. The binary wires this to
//! stdin/stdout so it can sit behind any chat bridge.

use crate::error::Result;
use crate::metrics::MetricsCollector;
use crate::types::{InboundMessage, OutboundMessage};
use chrono::Utc;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::LinesStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info, warn};

pub struct ConsoleTransport {
    metrics: Arc<MetricsCollector>,
}

impl ConsoleTransport {
    pub fn new(metrics: Arc<MetricsCollector>) -> Self {
        Self { metrics }
    }

    /// Stream of inbound messages parsed from `reader`.
    ///
    /// Blank lines are ignored and malformed lines are logged and skipped.
    pub fn inbound<R>(reader: R) -> impl Stream<Item = InboundMessage>
    where
        R: AsyncBufRead + Unpin,
    {
        LinesStream::new(tokio::io::AsyncBufReadExt::lines(reader)).filter_map(|line| {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!("Failed to read inbound line: {}", e);
                    return None;
                }
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                return None;
            }
            match serde_json::from_str::<InboundMessage>(trimmed) {
                Ok(message) => Some(message),
                Err(e) => {
                    warn!("Skipping malformed inbound message: {}", e);
                    None
                }
            }
        })
    }

    /// Drain `receiver` into `writer` until every publisher is gone.
    ///
    /// Transient notices whose discard deadline has already passed are
    /// dropped instead of written.
    pub async fn write_outbound<W>(
        &self,
        mut writer: W,
        mut receiver: mpsc::Receiver<OutboundMessage>,
    ) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        info!("Outbound writer started");

        while let Some(message) = receiver.recv().await {
            if let Some(deadline) = message.discard_after {
                if deadline < Utc::now() {
                    debug!(
                        "Discarding stale notice for channel {}",
                        message.channel_id
                    );
                    self.metrics.service().messages_dropped_total.inc();
                    continue;
                }
            }

            let mut line = serde_json::to_vec(&message)?;
            line.push(b'\n');
            writer.write_all(&line).await?;
            writer.flush().await?;
        }

        info!("Outbound writer stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageFormat;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_inbound_skips_malformed_lines() {
        let input = concat!(
            r#"{"channel_id":"c1","sender":{"id":"p1","display_name":"Alice"},"text":"/join"}"#,
            "\n",
            "not json\n",
            "\n",
            r#"{"channel_id":"c2","channel_name":"Two","sender":{"id":"p2","display_name":"Bob"},"text":"hi"}"#,
            "\n"
        );

        let messages: Vec<InboundMessage> =
            ConsoleTransport::inbound(BufReader::new(input.as_bytes()))
                .collect()
                .await;

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].channel_id, "c1");
        assert_eq!(messages[0].channel_name, "");
        assert_eq!(messages[1].sender.display_name, "Bob");
    }

    #[tokio::test]
    async fn test_outbound_writes_json_lines() {
        let transport = ConsoleTransport::new(Arc::new(MetricsCollector::new().unwrap()));
        let (tx, rx) = mpsc::channel(4);
        tx.send(OutboundMessage::new("c1", "hello", MessageFormat::Text))
            .await
            .unwrap();
        drop(tx);

        let mut out = Vec::new();
        transport.write_outbound(&mut out, rx).await.unwrap();

        let text = String::from_utf8(out).unwrap();
        let written: OutboundMessage = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(written.text, "hello");
        assert_eq!(written.format, MessageFormat::Text);
    }

    #[tokio::test]
    async fn test_outbound_drops_expired_notices() {
        let metrics = Arc::new(MetricsCollector::new().unwrap());
        let transport = ConsoleTransport::new(metrics.clone());
        let (tx, rx) = mpsc::channel(4);

        let mut stale = OutboundMessage::new("c1", "stale", MessageFormat::Html);
        stale.discard_after = Some(Utc::now() - chrono::Duration::seconds(1));
        tx.send(stale).await.unwrap();
        drop(tx);

        let mut out = Vec::new();
        transport.write_outbound(&mut out, rx).await.unwrap();

        assert!(out.is_empty());
        assert_eq!(metrics.service().messages_dropped_total.get(), 1);
    }
}
