//! Local, unauthenticated WebSocket server for on-boat clients (spec §4.9):
//! an axum `WebSocketUpgrade` handler with a per-connection channel for
//! fan-out.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::routing::get;
use axum::Router;
use serde_json::json;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::sync::ClientSyncCoordinator;

/// Required by cloud deployment targets (Fly.io et al.) that restart an
/// instance if this returns non-200.
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(json!({"status": "ok", "version": env!("CARGO_PKG_VERSION")}))
}

#[derive(Clone)]
struct AppState {
    coordinator: ClientSyncCoordinator,
}

pub struct DirectServer {
    port: u16,
    coordinator: ClientSyncCoordinator,
}

impl DirectServer {
    pub fn new(port: u16, coordinator: ClientSyncCoordinator) -> Self {
        Self { port, coordinator }
    }

    pub async fn run(self) -> std::io::Result<()> {
        // Local boat clients include browser-based chart plotters running
        // off a different origin than this server, so CORS is wide open
        // rather than allowlisted (unlike the upstream relay, which is
        // authenticated per spec §4.10).
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

        let app = Router::new()
            .route("/", get(ws_upgrade))
            .route("/health", get(health_check))
            .layer(cors)
            .with_state(AppState { coordinator: self.coordinator });

        let addr = format!("0.0.0.0:{}", self.port);
        tracing::info!(%addr, "direct server listening");
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, app).await
    }
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> axum::response::Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.coordinator))
}

async fn handle_socket(socket: WebSocket, coordinator: ClientSyncCoordinator) {
    use futures_util::{SinkExt, StreamExt};

    let transport_name = format!("direct:{}", Uuid::new_v4());
    let (tx, mut rx) = mpsc::unbounded_channel::<serde_json::Value>();

    coordinator.register_transport(transport_name.clone(), tx.clone(), None).await;
    coordinator.handle_client_connection(&transport_name).await;

    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            let text = payload.to_string();
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = stream.next().await {
        let Message::Text(text) = msg else { continue };
        match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(parsed) => {
                if let Some(ack) = coordinator.handle_inbound(parsed).await {
                    let _ = tx.send(ack);
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, transport = %transport_name, "dropping malformed client frame");
            }
        }
    }

    coordinator.unregister_transport(&transport_name).await;
    coordinator.handle_client_disconnection();
    writer.abort();
}
