use async_trait::async_trait;
use relay_core::{Envelope, Identity, RelayError, RelayResult};
use tokio::sync::mpsc;

/// The sending half of a bus connection. Cheap to clone.
///
/// Delivery is fire-and-forget: a successful `send` only means the envelope
/// was handed to the connection's writer.
#[derive(Debug, Clone)]
pub struct BusSender {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl BusSender {
    /// Wrap the channel a connection's writer task drains.
    pub fn from_channel(tx: mpsc::UnboundedSender<Envelope>) -> Self {
        Self { tx }
    }

    /// Queue `envelope` for delivery.
    pub fn send(&self, envelope: Envelope) -> RelayResult<()> {
        self.tx
            .send(envelope)
            .map_err(|e| RelayError::Bus(format!("connection closed, dropped '{}'", e.0.kind())))
    }

    /// Whether the writer behind this sender has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// The receiving half of a bus connection.
///
/// Yields only envelopes whose target this participant accepts. Once the
/// underlying connection drops, every further `recv` returns `None`; a new
/// connection is needed to resume.
#[derive(Debug)]
pub struct BusReceiver {
    identity: Identity,
    rx: mpsc::UnboundedReceiver<Envelope>,
    closed: bool,
}

impl BusReceiver {
    /// Filter `rx` for `identity`.
    pub fn new(identity: Identity, rx: mpsc::UnboundedReceiver<Envelope>) -> Self {
        Self {
            identity,
            rx,
            closed: false,
        }
    }

    /// The participant this receiver filters for.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Next envelope addressed to this participant.
    pub async fn recv(&mut self) -> Option<Envelope> {
        if self.closed {
            return None;
        }
        while let Some(envelope) = self.rx.recv().await {
            if self.identity.accepts(&envelope.target) {
                return Some(envelope);
            }
            tracing::trace!(
                participant = %self.identity,
                target = %envelope.target,
                kind = envelope.kind(),
                "Ignoring envelope for another participant"
            );
        }
        self.closed = true;
        None
    }
}

/// Both halves of one participant's connection to the hub.
#[derive(Debug)]
pub struct BusConnection {
    /// Outbound half.
    pub sender: BusSender,
    /// Inbound half, already filtered.
    pub receiver: BusReceiver,
}

impl BusConnection {
    /// Split into sender and receiver.
    pub fn split(self) -> (BusSender, BusReceiver) {
        (self.sender, self.receiver)
    }
}

/// Opens bus connections for participants.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect `identity` to the hub.
    async fn connect(&self, identity: Identity) -> RelayResult<BusConnection>;
}
