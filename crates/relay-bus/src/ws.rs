use crate::connection::{BusConnection, BusReceiver, BusSender, Connector};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use relay_core::{Envelope, Identity, RelayError, RelayResult};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{error, info, warn};

/// Connects participants to a hub over WebSocket.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    /// Connect to the hub at `url`, e.g. `ws://127.0.0.1:8765/ws`.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// The hub endpoint.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, identity: Identity) -> RelayResult<BusConnection> {
        let (stream, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| RelayError::Bus(format!("connect to {} failed: {e}", self.url)))?;
        let (mut write, mut read) = stream.split();
        info!(participant = %identity, url = %self.url, "Connected to hub");

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Envelope>();
        tokio::spawn(async move {
            while let Some(envelope) = out_rx.recv().await {
                let raw = match envelope.to_json() {
                    Ok(raw) => raw,
                    Err(e) => {
                        warn!(error = %e, kind = envelope.kind(), "Failed to encode envelope");
                        continue;
                    }
                };
                if let Err(e) = write.send(WsMessage::Text(raw)).await {
                    error!(error = %e, "WebSocket write failed");
                    break;
                }
            }
            let _ = write.close().await;
        });

        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let name = identity.name().to_string();
        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => match Envelope::from_json(&text) {
                        Ok(envelope) => {
                            if in_tx.send(envelope).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(participant = %name, error = %e, "Dropping unparsable frame"),
                    },
                    Ok(WsMessage::Close(_)) => {
                        info!(participant = %name, "Hub closed the connection");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(participant = %name, error = %e, "WebSocket read failed");
                        break;
                    }
                }
            }
        });

        Ok(BusConnection {
            sender: BusSender::from_channel(out_tx),
            receiver: BusReceiver::new(identity, in_rx),
        })
    }
}
