use crate::connection::{BusConnection, BusReceiver, BusSender, Connector};
use crate::switchboard::Switchboard;
use async_trait::async_trait;
use relay_core::{Envelope, Identity, RelayResult};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

/// Attaches participants to a switchboard in the same process.
///
/// Frames go through the same encode, route and decode steps as over a
/// socket, so routing and filtering behave identically.
#[derive(Clone)]
pub struct LocalConnector {
    switchboard: Arc<Switchboard>,
}

impl LocalConnector {
    /// Connect participants to `switchboard`.
    pub fn new(switchboard: Arc<Switchboard>) -> Self {
        Self { switchboard }
    }
}

#[async_trait]
impl Connector for LocalConnector {
    async fn connect(&self, identity: Identity) -> RelayResult<BusConnection> {
        let (peer_id, mut raw_rx) = self.switchboard.attach();

        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let name = identity.name().to_string();
        tokio::spawn(async move {
            while let Some(raw) = raw_rx.recv().await {
                match Envelope::from_json(&raw) {
                    Ok(envelope) => {
                        if in_tx.send(envelope).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(participant = %name, error = %e, "Dropping unparsable frame"),
                }
            }
        });

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Envelope>();
        let board = Arc::clone(&self.switchboard);
        tokio::spawn(async move {
            while let Some(envelope) = out_rx.recv().await {
                match envelope.to_json() {
                    Ok(raw) => board.route(peer_id, &raw),
                    Err(e) => warn!(error = %e, kind = envelope.kind(), "Failed to encode envelope"),
                }
            }
            board.detach(peer_id);
        });

        Ok(BusConnection {
            sender: BusSender::from_channel(out_tx),
            receiver: BusReceiver::new(identity, in_rx),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::{Message, Target};

    #[tokio::test]
    async fn test_local_peers_talk_through_switchboard() {
        let (board, hub) = Switchboard::new(Identity::hub("node"));
        let (_hub_tx, mut hub_rx) = hub.split();
        let connector = LocalConnector::new(board.clone());

        let coord = connector
            .connect(Identity::coordinator("c1"))
            .await
            .unwrap();
        let exec = connector.connect(Identity::executor("e1")).await.unwrap();
        let (coord_tx, mut coord_rx) = coord.split();
        let (exec_tx, mut exec_rx) = exec.split();
        assert_eq!(board.peer_count(), 2);

        coord_tx
            .send(Envelope::new("c1", "e1", Message::WorkerDequeue))
            .unwrap();
        assert_eq!(exec_rx.recv().await.unwrap().message, Message::WorkerDequeue);

        exec_tx
            .send(Envelope::new("e1", "c1", Message::WorkerReady))
            .unwrap();
        assert_eq!(coord_rx.recv().await.unwrap().message, Message::WorkerReady);

        coord_tx
            .send(Envelope::new("c1", Target::AnyHub, Message::AgentReady))
            .unwrap();
        let at_hub = hub_rx.recv().await.unwrap();
        assert_eq!(at_hub.origin, "c1");
        assert_eq!(at_hub.message, Message::AgentReady);
    }
}
