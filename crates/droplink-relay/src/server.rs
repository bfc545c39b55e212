//! WebSocket relay server.
//!
//! One HTTP process hosts the whole relay: a `/ws` endpoint for signaling,
//! permissive CORS, and optional static serving of the web client. Each
//! WebSocket connection gets a fresh [`ConnectionId`], an outbound queue in
//! the [`RelayRouter`], and a read loop that dispatches decoded
//! [`ClientMessage`]s against the shared [`PairingRegistry`] and router.
//!
//! The server never inspects offer/answer/candidate payloads and never
//! carries file bytes.

use std::sync::Arc;

use anyhow::Result;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use droplink_core::config::Config;
use droplink_core::protocol::{self, ClientMessage, ConnectionId, ServerMessage};
use droplink_core::registry::{PairResult, PairingRegistry};
use droplink_core::relay::{RelayRouter, SignalingEnvelope};

/// State shared by every connection: the code registry and the router are
/// the only things that outlive a single socket.
#[derive(Clone)]
struct AppState {
    registry: Arc<PairingRegistry>,
    router: Arc<RelayRouter>,
}

/// Run the relay server until the process is stopped.
///
/// # Errors
///
/// Returns an error if the listen socket cannot be bound.
pub async fn run(config: Config) -> Result<()> {
    let state = AppState {
        registry: Arc::new(PairingRegistry::with_ttl(config.code_ttl())),
        router: Arc::new(RelayRouter::new()),
    };

    let mut app = Router::new()
        .route("/ws", get(ws_handler))
        .with_state(state)
        .layer(CorsLayer::permissive());

    if let Some(dir) = &config.network.static_dir {
        app = app.fallback_service(ServeDir::new(dir));
        tracing::info!("serving static files from {}", dir.display());
    }

    let addr = format!("0.0.0.0:{}", config.network.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("relay listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutting down");
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

/// Serve one client connection for its whole lifetime.
async fn handle_connection(socket: WebSocket, state: AppState) {
    let id = ConnectionId::generate();
    tracing::info!("client connected: {id}");

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ServerMessage>();
    state.router.register(id, outbound_tx);

    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let text = match protocol::encode(&message) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!("failed to encode server message: {e}");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = ws_rx.next().await {
        match message {
            Ok(Message::Text(text)) => match protocol::decode::<ClientMessage>(&text) {
                Ok(client_message) => dispatch(&state, id, client_message),
                Err(e) => {
                    tracing::warn!("undecodable message from {id}: {e}");
                }
            },
            Ok(Message::Close(_)) | Err(_) => break,
            // Pings are answered by axum; binary frames have no meaning on
            // the signaling channel.
            Ok(_) => {}
        }
    }

    state.registry.remove_owned_by(id);
    state.router.unregister(id);
    writer.abort();
    tracing::info!("client disconnected: {id}");
}

/// Route one decoded client message.
fn dispatch(state: &AppState, from: ConnectionId, message: ClientMessage) {
    match message {
        ClientMessage::GenerateCode => match state.registry.generate_code(from) {
            Ok(code) => {
                let _ = state.router.deliver(
                    from,
                    ServerMessage::CodeIssued {
                        code: code.to_string(),
                    },
                );
            }
            Err(e) => {
                tracing::error!("code generation failed: {e}");
                report(state, from, "could not issue a pairing code");
            }
        },
        ClientMessage::VerifyCode { code } => match state.registry.verify_code(&code, from) {
            PairResult::Paired { peer } => {
                // Both sides learn their peer; the owner side is told first
                // so a vanished owner is reported instead of half-pairing.
                if state
                    .router
                    .deliver(peer, ServerMessage::PairSuccess { peer_id: from })
                    .is_err()
                {
                    tracing::warn!("code {code} verified but owner {peer} is gone");
                    report(state, from, "peer device disconnected");
                    return;
                }
                let _ = state
                    .router
                    .deliver(from, ServerMessage::PairSuccess { peer_id: peer });
                tracing::info!("paired {from} with {peer}");
            }
            PairResult::Expired => {
                report(state, from, "pairing code invalid or expired");
            }
        },
        ClientMessage::Offer { target, offer } => {
            forward(
                state,
                from,
                SignalingEnvelope::Offer {
                    target,
                    payload: offer,
                },
            );
        }
        ClientMessage::Answer { target, answer } => {
            forward(
                state,
                from,
                SignalingEnvelope::Answer {
                    target,
                    payload: answer,
                },
            );
        }
        ClientMessage::Candidate { target, candidate } => {
            forward(
                state,
                from,
                SignalingEnvelope::Candidate {
                    target,
                    payload: candidate,
                },
            );
        }
    }
}

fn forward(state: &AppState, from: ConnectionId, envelope: SignalingEnvelope) {
    if let Err(e) = state.router.forward(from, envelope) {
        tracing::warn!("relay failed: {e}");
        report(state, from, &e.to_string());
    }
}

fn report(state: &AppState, to: ConnectionId, message: &str) {
    let _ = state.router.deliver(
        to,
        ServerMessage::PairError {
            message: message.to_string(),
        },
    );
}
