//! HTTP + WebSocket transport for the companion
//!
//! Endpoints:
//! - GET /health - Health check and model status
//! - POST /message - Deliver one exchange message and return its reply
//! - GET /assessment/latest - Most recent assessment
//! - WS /ws - Pushed messages; inbound frames are fire-and-forget messages
//!
//! The broadcast side of the socket is the companion's pairing channel: it is
//! reachable while at least one socket is connected.

use axum::{
    extract::{ws::{Message, WebSocket}, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use futures_util::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::core::channel::{PairingChannel, ReplyHandle};
use crate::core::exchange::ExchangeProtocol;
use crate::core::orchestrator::InferenceOrchestrator;
use crate::types::{ChannelError, RiskAssessmentPayload};

const PUSH_BUFFER: usize = 100;

/// Pairing channel that fans pushed messages out to connected sockets
#[derive(Debug, Clone)]
pub struct BroadcastChannel {
    tx: broadcast::Sender<Value>,
}

impl BroadcastChannel {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(PUSH_BUFFER);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Value> {
        self.tx.subscribe()
    }

    pub fn subscribers(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl PairingChannel for BroadcastChannel {
    fn is_reachable(&self) -> bool {
        self.tx.receiver_count() > 0
    }

    fn send_with_reply(&self, _message: Value) -> BoxFuture<'_, Result<Value, ChannelError>> {
        Box::pin(async { Err(ChannelError::RepliesUnsupported) })
    }

    fn send(&self, message: Value) -> Result<(), ChannelError> {
        self.tx.send(message).map(|_| ()).map_err(|_| ChannelError::Unreachable)
    }
}

/// App state
pub struct AppState {
    pub protocol: Arc<ExchangeProtocol>,
    pub orchestrator: InferenceOrchestrator,
    pub pushes: BroadcastChannel,
}

impl AppState {
    /// Companion endpoint whose pushes go to connected sockets
    pub fn new(orchestrator: InferenceOrchestrator) -> Arc<Self> {
        let pushes = BroadcastChannel::new();
        let protocol = Arc::new(ExchangeProtocol::companion(
            Arc::new(pushes.clone()),
            orchestrator.clone(),
        ));
        Arc::new(Self {
            protocol,
            orchestrator,
            pushes,
        })
    }
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub model: String,
    pub model_invocations: u64,
    pub subscribers: usize,
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/message", post(deliver_message))
        .route("/assessment/latest", get(latest_assessment))
        .route("/ws", get(websocket_handler))
        .with_state(state)
}

/// Health check endpoint
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: crate::VERSION.to_string(),
        model: state.orchestrator.model_status(),
        model_invocations: state.orchestrator.model_invocations(),
        subscribers: state.pushes.subscribers(),
    })
}

/// Dispatch one message as send-with-reply
async fn deliver_message(
    State(state): State<Arc<AppState>>,
    Json(message): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    let (reply, rx) = ReplyHandle::channel();
    state.protocol.handle_inbound(message, Some(reply)).await;
    match rx.await {
        Ok(body) => Ok(Json(body)),
        Err(_) => {
            warn!("message handled without a reply");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Latest assessment in wire form
async fn latest_assessment(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RiskAssessmentPayload>, StatusCode> {
    let assessment = state
        .protocol
        .view()
        .latest_assessment()
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(RiskAssessmentPayload::from_assessment(&assessment)))
}

/// WebSocket handler for pushed messages
async fn websocket_handler(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let rx = state.pushes.subscribe();
    ws.on_upgrade(move |socket| handle_websocket(socket, rx, state))
}

/// Handle WebSocket connection
async fn handle_websocket(
    mut socket: WebSocket,
    mut rx: broadcast::Receiver<Value>,
    state: Arc<AppState>,
) {
    debug!(subscribers = state.pushes.subscribers(), "socket connected");
    loop {
        tokio::select! {
            pushed = rx.recv() => match pushed {
                Ok(message) => {
                    let text = message.to_string();
                    if socket.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "socket fell behind; pushes dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            inbound = socket.recv() => match inbound {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<Value>(&text) {
                    Ok(message) => state.protocol.handle_inbound(message, None).await,
                    Err(e) => debug!(error = %e, "discarding non-JSON frame"),
                },
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }
    debug!("socket disconnected");
}

/// Run the API server
pub async fn run_server(addr: &str, orchestrator: InferenceOrchestrator) -> Result<(), Box<dyn std::error::Error>> {
    let router = create_router(AppState::new(orchestrator));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "companion API listening");
    axum::serve(listener, router).await?;
    Ok(())
}
