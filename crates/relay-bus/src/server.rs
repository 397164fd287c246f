use crate::switchboard::Switchboard;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use relay_core::{RelayError, RelayResult};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// The hub's network endpoint: `/ws` for participants, `/health` for liveness checks.
pub struct BusServer;

impl BusServer {
    /// Build the router around `switchboard`.
    pub fn build(switchboard: Arc<Switchboard>) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .with_state(switchboard)
    }

    /// Bind `addr` and serve until the process exits.
    pub async fn serve(addr: SocketAddr, switchboard: Arc<Switchboard>) -> RelayResult<()> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "Bus listening");
        axum::serve(listener, Self::build(switchboard))
            .await
            .map_err(|e| RelayError::Bus(format!("server stopped: {e}")))
    }
}

async fn health_handler(State(switchboard): State<Arc<Switchboard>>) -> impl IntoResponse {
    serde_json::json!({
        "status": "ok",
        "service": "relay",
        "peers": switchboard.peer_count(),
    })
    .to_string()
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(switchboard): State<Arc<Switchboard>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, switchboard))
}

async fn handle_socket(socket: WebSocket, switchboard: Arc<Switchboard>) {
    let (peer_id, mut rx) = switchboard.attach();
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let send_task = tokio::spawn(async move {
        while let Some(raw) = rx.recv().await {
            if ws_sender.send(Message::Text(raw.into())).await.is_err() {
                break;
            }
        }
    });

    let board = Arc::clone(&switchboard);
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => board.route(peer_id, text.as_str()),
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    switchboard.detach(peer_id);
}
