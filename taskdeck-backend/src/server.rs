//! Backend server core: shared state, WebSocket handler, and request
//! dispatch.
//!
//! Each binary frame carries one [`BackendRequest`]; the server answers with
//! exactly one [`BackendResponse`] echoing the request id. Connections hold
//! no auth state of their own: the caller is resolved from the bearer token
//! on every request, so a token works on any connection until revoked.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use taskdeck_proto::backend::{
    self, BackendFailure, BackendOp, BackendReply, BackendRequest, BackendResponse, FailureKind,
};
use tokio::sync::mpsc;

use crate::store::BackendStore;

/// Default maximum allowed frame size in bytes (64 KB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 64 * 1024;

/// Request id used when a frame cannot be decoded far enough to read one.
const UNKNOWN_REQUEST_ID: u64 = 0;

/// Shared server state: the tables and the frame size limit.
pub struct BackendState {
    /// Account and task tables.
    pub store: BackendStore,
    /// Maximum allowed frame size in bytes.
    max_payload_size: usize,
}

impl Default for BackendState {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendState {
    /// Creates a state with an empty store and the default frame size limit.
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: BackendStore::new(),
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }

    /// Creates a state with a custom frame size limit and store.
    #[must_use]
    pub const fn with_config(max_payload_size: usize, store: BackendStore) -> Self {
        Self {
            store,
            max_payload_size,
        }
    }
}

/// Handles an upgraded WebSocket connection.
///
/// Requests are answered in arrival order. A malformed or oversized frame
/// gets a protocol failure and the connection stays open.
pub async fn handle_socket(socket: WebSocket, state: Arc<BackendState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    tracing::info!("client connected");

    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!("WebSocket write failed");
                break;
            }
        }
    });

    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Binary(data) => {
                    let response = handle_frame(&data, &reader_state).await;
                    match backend::encode_response(&response) {
                        Ok(bytes) => {
                            if tx.send(Message::Binary(bytes.into())).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::error!(id = response.id, error = %e, "failed to encode response");
                        }
                    }
                }
                Message::Close(_) => {
                    tracing::info!("received close frame");
                    break;
                }
                _ => {
                    // Ignore text, ping, pong frames.
                }
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    tracing::info!("client disconnected");
}

/// Decodes one frame and dispatches it, turning codec problems into
/// protocol failures.
async fn handle_frame(data: &[u8], state: &BackendState) -> BackendResponse {
    if data.len() > state.max_payload_size {
        tracing::warn!(
            size = data.len(),
            max = state.max_payload_size,
            "frame exceeds size limit"
        );
        return BackendResponse {
            id: UNKNOWN_REQUEST_ID,
            result: Err(BackendFailure::new(
                FailureKind::Protocol,
                format!(
                    "payload too large: {} bytes (max {})",
                    data.len(),
                    state.max_payload_size
                ),
            )),
        };
    }

    match backend::decode_request(data) {
        Ok(request) => dispatch(state, request).await,
        Err(e) => {
            tracing::warn!(error = %e, "failed to decode request");
            BackendResponse {
                id: UNKNOWN_REQUEST_ID,
                result: Err(BackendFailure::new(FailureKind::Protocol, e.to_string())),
            }
        }
    }
}

/// Executes one request against the store.
pub async fn dispatch(state: &BackendState, request: BackendRequest) -> BackendResponse {
    let BackendRequest { id, token, op } = request;
    let token = token.as_deref();
    let store = &state.store;
    let name = op.name();

    let result = match op {
        BackendOp::SignUp { email, password } => store
            .sign_up(&email, &password)
            .await
            .map(|session| BackendReply::SignedUp { session }),
        BackendOp::SignIn { email, password } => store
            .sign_in(&email, &password)
            .await
            .map(BackendReply::Session),
        BackendOp::SignOut => {
            store.sign_out(token).await;
            Ok(BackendReply::SignedOut)
        }
        BackendOp::GetUser => store.user(token).await.map(BackendReply::User),
        BackendOp::SelectTasks { owner_id } => {
            store.select(token, owner_id).await.map(BackendReply::Tasks)
        }
        BackendOp::InsertTask { owner_id, task } => store
            .insert(token, owner_id, &task)
            .await
            .map(BackendReply::Task),
        BackendOp::UpdateTask {
            owner_id,
            task_id,
            patch,
        } => store
            .update(token, owner_id, task_id, &patch)
            .await
            .map(BackendReply::Task),
        BackendOp::DeleteTask { owner_id, task_id } => store
            .delete(token, owner_id, task_id)
            .await
            .map(|()| BackendReply::Deleted),
    };

    match &result {
        Ok(_) => tracing::debug!(id, op = name, "request served"),
        Err(e) => tracing::info!(id, op = name, error = %e, "request refused"),
    }

    BackendResponse {
        id,
        result: result.map_err(BackendFailure::from),
    }
}

/// Starts the backend server on the given address.
///
/// Returns the bound address (useful when binding to port 0) and a
/// `JoinHandle` for the server task.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(BackendState::new())).await
}

/// Starts the backend server with a pre-configured [`BackendState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<BackendState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "backend server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<BackendState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}
