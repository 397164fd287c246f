use crate::connection::{BusConnection, BusReceiver, BusSender};
use parking_lot::RwLock;
use relay_core::{Envelope, Identity};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A peer attached to the switchboard.
#[derive(Debug)]
struct Peer {
    tx: mpsc::UnboundedSender<String>,
}

/// The hub's routing point. Every participant other than the hub attaches
/// here as a peer.
///
/// Routing rule: an envelope whose target is hub-scoped goes to the hub's
/// inbox; anything else is flooded, byte-for-byte, to every peer except the
/// sender. `any` is flooded and also delivered to the hub. Peers filter by
/// target themselves.
pub struct Switchboard {
    hub: Identity,
    peers: RwLock<HashMap<Uuid, Peer>>,
    hub_inbox: mpsc::UnboundedSender<Envelope>,
}

impl Switchboard {
    /// Create a switchboard for `hub` and the hub's own bus connection.
    ///
    /// The hub's receiver sees hub-scoped envelopes and `any`. Whatever the
    /// hub sends is flooded to every peer.
    pub fn new(hub: Identity) -> (Arc<Self>, BusConnection) {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let switchboard = Arc::new(Self {
            hub: hub.clone(),
            peers: RwLock::new(HashMap::new()),
            hub_inbox: inbox_tx,
        });

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Envelope>();
        let board = Arc::clone(&switchboard);
        tokio::spawn(async move {
            while let Some(envelope) = out_rx.recv().await {
                match envelope.to_json() {
                    Ok(raw) => board.flood(None, &raw),
                    Err(e) => warn!(error = %e, kind = envelope.kind(), "Failed to encode hub envelope"),
                }
            }
        });

        let connection = BusConnection {
            sender: BusSender::from_channel(out_tx),
            receiver: BusReceiver::new(hub, inbox_rx),
        };
        (switchboard, connection)
    }

    /// The hub this switchboard routes for.
    pub fn hub(&self) -> &Identity {
        &self.hub
    }

    /// Register a peer. Routed frames for it arrive on the returned receiver.
    pub fn attach(&self) -> (Uuid, mpsc::UnboundedReceiver<String>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.peers.write().insert(id, Peer { tx });
        info!(peer_id = %id, "Peer attached");
        (id, rx)
    }

    /// Forget a peer.
    pub fn detach(&self, id: Uuid) {
        if self.peers.write().remove(&id).is_some() {
            info!(peer_id = %id, "Peer detached");
        }
    }

    /// Number of attached peers.
    pub fn peer_count(&self) -> usize {
        self.peers.read().len()
    }

    /// Route one raw frame received from peer `from`.
    pub fn route(&self, from: Uuid, raw: &str) {
        let envelope = match Envelope::from_json(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(peer_id = %from, error = %e, "Dropping unparsable frame");
                return;
            }
        };
        if !self.hub.is_hub_scoped(&envelope.target) {
            debug!(
                origin = %envelope.origin,
                target = %envelope.target,
                kind = envelope.kind(),
                "Flooding"
            );
            self.flood(Some(from), raw);
        }
        // `any` is both flooded and dispatched locally.
        if self.hub.accepts(&envelope.target) {
            debug!(origin = %envelope.origin, kind = envelope.kind(), "Routing to hub");
            if self.hub_inbox.send(envelope).is_err() {
                warn!("Hub inbox closed, envelope dropped");
            }
        }
    }

    /// Send `raw` unmodified to every peer except `skip`.
    fn flood(&self, skip: Option<Uuid>, raw: &str) {
        let peers = self.peers.read();
        for (id, peer) in peers.iter() {
            if Some(*id) != skip {
                let _ = peer.tx.send(raw.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::{Message, Target};

    fn frame(origin: &str, target: impl Into<Target>, message: Message) -> String {
        Envelope::new(origin, target, message).to_json().unwrap()
    }

    #[tokio::test]
    async fn test_hub_scoped_goes_to_inbox_only() {
        let (board, hub) = Switchboard::new(Identity::hub("node"));
        let (_hub_tx, mut hub_rx) = hub.split();
        let (a, mut a_rx) = board.attach();
        let (_b, mut b_rx) = board.attach();

        board.route(a, &frame("c1", "node", Message::AgentReady));
        board.route(a, &frame("c1", Target::AnyHub, Message::AgentComplete));

        assert_eq!(hub_rx.recv().await.unwrap().message, Message::AgentReady);
        assert_eq!(hub_rx.recv().await.unwrap().message, Message::AgentComplete);
        assert!(a_rx.try_recv().is_err());
        assert!(b_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_other_targets_flood_unmodified_except_sender() {
        let (board, _hub) = Switchboard::new(Identity::hub("node"));
        let (a, mut a_rx) = board.attach();
        let (_b, mut b_rx) = board.attach();
        let (_c, mut c_rx) = board.attach();

        let raw = frame("c1", "c1_Executor-1", Message::WorkerDequeue);
        board.route(a, &raw);

        assert_eq!(b_rx.recv().await.unwrap(), raw);
        assert_eq!(c_rx.recv().await.unwrap(), raw);
        assert!(a_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_any_is_flooded_and_dispatched() {
        let (board, hub) = Switchboard::new(Identity::hub("node"));
        let (_hub_tx, mut hub_rx) = hub.split();
        let (a, mut a_rx) = board.attach();
        let (_b, mut b_rx) = board.attach();

        let raw = frame("x", Target::Any, Message::Ping);
        board.route(a, &raw);
        assert_eq!(b_rx.recv().await.unwrap(), raw);
        assert!(a_rx.try_recv().is_err());
        let at_hub = hub_rx.recv().await.unwrap();
        assert_eq!(at_hub.message, Message::Ping);
        assert_eq!(at_hub.origin, "x");
    }

    #[tokio::test]
    async fn test_coordinator_wildcard_skips_hub() {
        let (board, hub) = Switchboard::new(Identity::hub("node"));
        let (_hub_tx, mut hub_rx) = hub.split();
        let (a, _a_rx) = board.attach();
        let (_b, mut b_rx) = board.attach();

        board.route(a, &frame("x", Target::AnyCoordinator, Message::Ping));
        assert!(b_rx.recv().await.is_some());
        let pending =
            tokio::time::timeout(std::time::Duration::from_millis(20), hub_rx.recv()).await;
        assert!(pending.is_err());
    }

    #[tokio::test]
    async fn test_hub_sends_reach_every_peer() {
        let (board, hub) = Switchboard::new(Identity::hub("node"));
        let (hub_tx, _hub_rx) = hub.split();
        let (_a, mut a_rx) = board.attach();
        let (_b, mut b_rx) = board.attach();

        hub_tx
            .send(Envelope::new("node", "c1", Message::AgentDequeue))
            .unwrap();
        let a = Envelope::from_json(&a_rx.recv().await.unwrap()).unwrap();
        let b = Envelope::from_json(&b_rx.recv().await.unwrap()).unwrap();
        assert_eq!(a.message, Message::AgentDequeue);
        assert_eq!(b.target, Target::named("c1"));
    }

    #[tokio::test]
    async fn test_garbage_is_dropped() {
        let (board, _hub) = Switchboard::new(Identity::hub("node"));
        let (a, _a_rx) = board.attach();
        let (_b, mut b_rx) = board.attach();
        board.route(a, "not json");
        board.route(a, r#"{"type":"nope","origin":"x","target":"any"}"#);
        assert!(b_rx.try_recv().is_err());
        board.detach(a);
        assert_eq!(board.peer_count(), 1);
    }
}
