//! Push transport
//!
//! A [`PushLink`] is a pair of frame queues. Dropping `outgoing` closes the
//! connection; `incoming` yielding `None` means the connection is gone.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::ClientError;
use crate::shared::protocol::Frame;

/// An open push connection
#[derive(Debug)]
pub struct PushLink {
    pub outgoing: mpsc::UnboundedSender<Frame>,
    pub incoming: mpsc::UnboundedReceiver<Frame>,
}

impl PushLink {
    pub fn send(&self, frame: Frame) -> Result<(), ClientError> {
        self.outgoing.send(frame).map_err(|_| ClientError::Closed)
    }
}

/// Opens push connections to the gateway
#[async_trait]
pub trait PushConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<PushLink, ClientError>;
}

/// WebSocket transport over tokio-tungstenite
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl PushConnector for WsConnector {
    async fn connect(&self, url: &str) -> Result<PushLink, ClientError> {
        let (socket, _) = match tokio::time::timeout(self.connect_timeout, connect_async(url)).await
        {
            Ok(result) => result.map_err(|e| ClientError::Connect(e.to_string()))?,
            Err(_) => {
                return Err(ClientError::Connect(format!(
                    "timed out after {}ms connecting to {}",
                    self.connect_timeout.as_millis(),
                    url
                )))
            }
        };
        let (mut sink, mut stream) = socket.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Frame>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<Frame>();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = out_rx.recv() => {
                        let Some(frame) = frame else {
                            let _ = sink.close().await;
                            break;
                        };
                        let text = match serde_json::to_string(&frame) {
                            Ok(text) => text,
                            Err(e) => {
                                tracing::error!("Failed to serialize frame: {}", e);
                                continue;
                            }
                        };
                        if sink.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    msg = stream.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => match serde_json::from_str::<Frame>(&text) {
                                Ok(frame) => {
                                    if in_tx.send(frame).is_err() {
                                        break;
                                    }
                                }
                                Err(e) => tracing::debug!(error = %e, "Ignoring malformed frame"),
                            },
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Err(e)) => {
                                tracing::debug!(error = %e, "Push connection error");
                                break;
                            }
                            _ => {}
                        }
                    }
                }
            }
        });

        Ok(PushLink {
            outgoing: out_tx,
            incoming: in_rx,
        })
    }
}
