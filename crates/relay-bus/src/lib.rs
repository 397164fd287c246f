//! Message bus for the relay orchestrator.
//!
//! The hub owns a [`Switchboard`]; every other participant holds one
//! connection to it, either over WebSocket ([`WsConnector`] against a
//! [`BusServer`]) or in-process ([`LocalConnector`]). Both paths apply the
//! same routing rule and hand participants a [`BusSender`] and a
//! target-filtered [`BusReceiver`].

/// Connection halves and the `Connector` trait.
pub mod connection;
/// In-process connector.
pub mod local;
/// Axum WebSocket server.
pub mod server;
/// Hub routing.
pub mod switchboard;
/// WebSocket client connector.
pub mod ws;

pub use connection::{BusConnection, BusReceiver, BusSender, Connector};
pub use local::LocalConnector;
pub use server::BusServer;
pub use switchboard::Switchboard;
pub use ws::WsConnector;
