//! WebSocket client for `taskdeck-backend`.
//!
//! Implements [`AuthService`] and [`TaskService`] over one WebSocket
//! connection. Each call sends a postcard-encoded [`BackendRequest`] and
//! waits for the [`BackendResponse`] carrying the same id; a background
//! reader task matches responses to waiting callers, so calls from several
//! tasks may be in flight at once.
//!
//! The session is kept in memory and, when a `session_file` is configured,
//! persisted as JSON so a later run can restore it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use taskdeck_proto::backend::{
    self, BackendFailure, BackendOp, BackendReply, BackendRequest,
};
use taskdeck_proto::identity::{AuthChange, AuthEvent, Session};
use taskdeck_proto::task::{NewTask, Task, TaskPatch};

use super::{AuthService, NewTaskRecord, RemoteError, SignUpOutcome, TaskScope, TaskService};
use crate::listeners::{Listeners, Subscription};

/// Type alias for the write half of a WebSocket connection.
type WsSender = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

/// Type alias for the read half of a WebSocket connection.
type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

type Reply = Result<BackendReply, BackendFailure>;
type PendingMap = Arc<parking_lot::Mutex<HashMap<u64, oneshot::Sender<Reply>>>>;

/// Connection settings for [`WsBackend::connect`].
#[derive(Debug, Clone)]
pub struct WsOptions {
    /// Backend WebSocket URL, e.g. `ws://127.0.0.1:9100/ws`.
    pub url: String,
    /// Timeout for establishing the connection.
    pub connect_timeout: Duration,
    /// Timeout for each request/response exchange.
    pub request_timeout: Duration,
    /// Where to persist the session between runs.
    pub session_file: Option<PathBuf>,
}

impl WsOptions {
    /// Options for `url` with default timeouts and no session file.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            session_file: None,
        }
    }
}

struct Inner {
    url: String,
    request_timeout: Duration,
    session_file: Option<PathBuf>,
    ws_sender: tokio::sync::Mutex<WsSender>,
    pending: PendingMap,
    next_id: AtomicU64,
    connected: Arc<AtomicBool>,
    session: parking_lot::Mutex<Option<Session>>,
    listeners: Listeners<AuthChange>,
    reader_handle: tokio::task::JoinHandle<()>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.reader_handle.abort();
    }
}

/// Remote services reached over a WebSocket connection.
#[derive(Clone)]
pub struct WsBackend {
    inner: Arc<Inner>,
}

impl WsBackend {
    /// Connects to the backend and spawns the response reader.
    ///
    /// # Errors
    ///
    /// - [`RemoteError::Timeout`] if the connection is not established in time.
    /// - [`RemoteError::Network`] if the URL is unreachable or the handshake fails.
    pub async fn connect(options: WsOptions) -> Result<Self, RemoteError> {
        let url = options.url.as_str();
        let (ws_stream, _response) = tokio::time::timeout(options.connect_timeout, connect_async(url))
            .await
            .map_err(|_| {
                tracing::warn!(url, "backend WebSocket connect timed out");
                RemoteError::Timeout
            })?
            .map_err(|e| {
                tracing::warn!(url, err = %e, "backend WebSocket connect failed");
                RemoteError::Network(e.to_string())
            })?;

        let (ws_sender, ws_reader) = ws_stream.split();
        let pending: PendingMap = Arc::default();
        let connected = Arc::new(AtomicBool::new(true));
        let reader_handle = tokio::spawn(reader_loop(
            ws_reader,
            Arc::clone(&pending),
            Arc::clone(&connected),
        ));
        tracing::info!(url, "connected to backend");

        Ok(Self {
            inner: Arc::new(Inner {
                url: options.url,
                request_timeout: options.request_timeout,
                session_file: options.session_file,
                ws_sender: tokio::sync::Mutex::new(ws_sender),
                pending,
                next_id: AtomicU64::new(1),
                connected,
                session: parking_lot::Mutex::new(None),
                listeners: Listeners::new(),
                reader_handle,
            }),
        })
    }

    /// The backend URL this client is connected to.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Returns `true` while the connection is up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Relaxed)
    }

    /// Sends one request and waits for its response.
    async fn request(&self, op: BackendOp) -> Result<BackendReply, RemoteError> {
        if !self.is_connected() {
            return Err(RemoteError::Network("connection closed".to_string()));
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let op_name = op.name();
        let token = self
            .inner
            .session
            .lock()
            .as_ref()
            .map(|s| s.access_token.clone());
        let bytes = backend::encode_request(&BackendRequest { id, token, op })
            .map_err(|e| RemoteError::Protocol(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().insert(id, tx);

        let sent = {
            let mut sender = self.inner.ws_sender.lock().await;
            sender.send(Message::Binary(bytes.into())).await
        };
        if let Err(e) = sent {
            tracing::warn!(op = op_name, err = %e, "backend send failed");
            self.inner.pending.lock().remove(&id);
            self.inner.connected.store(false, Ordering::Relaxed);
            return Err(RemoteError::Network(e.to_string()));
        }

        match tokio::time::timeout(self.inner.request_timeout, rx).await {
            Err(_) => {
                self.inner.pending.lock().remove(&id);
                tracing::warn!(op = op_name, id, "backend request timed out");
                Err(RemoteError::Timeout)
            }
            Ok(Err(_)) => Err(RemoteError::Network("connection closed".to_string())),
            Ok(Ok(reply)) => reply.map_err(RemoteError::from),
        }
    }

    /// A task request; an auth failure here means the session is gone.
    async fn task_request(&self, op: BackendOp) -> Result<BackendReply, RemoteError> {
        let result = self.request(op).await;
        if let Err(RemoteError::Auth(reason)) = &result {
            tracing::warn!(reason = %reason, "session rejected by backend");
            self.end_session();
        }
        result
    }

    fn start_session(&self, session: Session) {
        *self.inner.session.lock() = Some(session.clone());
        if let Some(path) = &self.inner.session_file {
            if let Err(e) = save_session(path, &session) {
                tracing::warn!(path = %path.display(), err = %e, "failed to persist session");
            }
        }
        self.inner
            .listeners
            .emit(&AuthChange::new(AuthEvent::SignedIn, Some(session)));
    }

    fn end_session(&self) {
        let had_session = self.inner.session.lock().take().is_some();
        if let Some(path) = &self.inner.session_file {
            discard_session(path);
        }
        if had_session {
            self.inner
                .listeners
                .emit(&AuthChange::new(AuthEvent::SignedOut, None));
        }
    }

    async fn restore_session(&self, path: &Path) -> Result<Option<Session>, RemoteError> {
        let Some(stored) = load_session(path) else {
            return Ok(None);
        };
        *self.inner.session.lock() = Some(stored.clone());
        match self.request(BackendOp::GetUser).await {
            Ok(BackendReply::User(user)) => {
                let session = Session {
                    access_token: stored.access_token,
                    user,
                };
                *self.inner.session.lock() = Some(session.clone());
                tracing::info!(user_id = %session.user.id, "restored persisted session");
                Ok(Some(session))
            }
            Ok(other) => {
                *self.inner.session.lock() = None;
                Err(unexpected("get_user", &other))
            }
            Err(RemoteError::Auth(reason)) => {
                tracing::info!(reason = %reason, "persisted session is stale, discarding");
                *self.inner.session.lock() = None;
                discard_session(path);
                Ok(None)
            }
            Err(e) => {
                *self.inner.session.lock() = None;
                Err(e)
            }
        }
    }
}

impl AuthService for WsBackend {
    async fn current_session(&self) -> Result<Option<Session>, RemoteError> {
        let current = self.inner.session.lock().clone();
        if current.is_some() {
            return Ok(current);
        }
        match self.inner.session_file.clone() {
            Some(path) => self.restore_session(&path).await,
            None => Ok(None),
        }
    }

    fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&AuthChange) + Send + Sync + 'static,
    {
        let session = self.inner.session.lock().clone();
        callback(&AuthChange::new(AuthEvent::InitialSession, session));
        self.inner.listeners.subscribe(callback)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome, RemoteError> {
        let op = BackendOp::SignUp {
            email: email.to_string(),
            password: password.to_string(),
        };
        match self.request(op).await? {
            BackendReply::SignedUp {
                session: Some(session),
            } => {
                self.start_session(session);
                Ok(SignUpOutcome::SessionStarted)
            }
            BackendReply::SignedUp { session: None } => Ok(SignUpOutcome::ConfirmationRequired),
            other => Err(unexpected("sign_up", &other)),
        }
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, RemoteError> {
        let op = BackendOp::SignIn {
            email: email.to_string(),
            password: password.to_string(),
        };
        match self.request(op).await? {
            BackendReply::Session(session) => {
                self.start_session(session.clone());
                Ok(session)
            }
            other => Err(unexpected("sign_in", &other)),
        }
    }

    async fn sign_out(&self) -> Result<(), RemoteError> {
        let has_session = self.inner.session.lock().is_some();
        let result = if has_session {
            match self.request(BackendOp::SignOut).await {
                Ok(BackendReply::SignedOut) => Ok(()),
                Ok(other) => Err(unexpected("sign_out", &other)),
                Err(e) => Err(e),
            }
        } else {
            Ok(())
        };
        // The local session ends even when the remote revoke fails.
        self.end_session();
        result
    }
}

impl TaskService for WsBackend {
    async fn select(&self, scope: &TaskScope) -> Result<Vec<Task>, RemoteError> {
        let op = BackendOp::SelectTasks {
            owner_id: scope.owner_id,
        };
        match self.task_request(op).await? {
            BackendReply::Tasks(rows) => Ok(rows.into_iter().filter(|t| scope.contains(t)).collect()),
            other => Err(unexpected("select_tasks", &other)),
        }
    }

    async fn insert(&self, record: &NewTaskRecord) -> Result<Task, RemoteError> {
        let op = BackendOp::InsertTask {
            owner_id: record.owner_id,
            task: NewTask {
                title: record.title.clone(),
                description: Some(record.description.clone()),
                priority: record.priority,
            },
        };
        match self.task_request(op).await? {
            BackendReply::Task(task) => Ok(task),
            other => Err(unexpected("insert_task", &other)),
        }
    }

    async fn update(&self, scope: &TaskScope, patch: &TaskPatch) -> Result<Task, RemoteError> {
        let op = BackendOp::UpdateTask {
            owner_id: scope.owner_id,
            task_id: scope.require_row()?,
            patch: patch.clone(),
        };
        match self.task_request(op).await? {
            BackendReply::Task(task) => Ok(task),
            other => Err(unexpected("update_task", &other)),
        }
    }

    async fn delete(&self, scope: &TaskScope) -> Result<(), RemoteError> {
        let op = BackendOp::DeleteTask {
            owner_id: scope.owner_id,
            task_id: scope.require_row()?,
        };
        match self.task_request(op).await? {
            BackendReply::Deleted => Ok(()),
            other => Err(unexpected("delete_task", &other)),
        }
    }
}

fn unexpected(op: &str, reply: &BackendReply) -> RemoteError {
    tracing::warn!(op, ?reply, "unexpected backend reply");
    RemoteError::Protocol(format!("unexpected reply to {op}"))
}

/// Background task that reads responses and completes waiting requests.
///
/// Malformed frames are logged and skipped. When the connection ends every
/// waiting request is failed by dropping its sender.
async fn reader_loop(mut ws_reader: WsReader, pending: PendingMap, connected: Arc<AtomicBool>) {
    while let Some(msg_result) = ws_reader.next().await {
        match msg_result {
            Ok(Message::Binary(data)) => match backend::decode_response(&data) {
                Ok(response) => {
                    let waiter = pending.lock().remove(&response.id);
                    match waiter {
                        Some(tx) => {
                            // The caller may have timed out and gone away.
                            let _ = tx.send(response.result);
                        }
                        None => tracing::debug!(id = response.id, "response for unknown request"),
                    }
                }
                Err(e) => tracing::warn!(err = %e, "malformed backend frame, skipping"),
            },
            Ok(Message::Close(_)) => {
                tracing::info!("backend WebSocket closed by server");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(err = %e, "backend WebSocket read error");
                break;
            }
        }
    }
    connected.store(false, Ordering::Relaxed);
    pending.lock().clear();
    tracing::info!("backend reader task exiting");
}

fn load_session(path: &Path) -> Option<Session> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!(path = %path.display(), err = %e, "failed to read session file");
            return None;
        }
    };
    match serde_json::from_str(&contents) {
        Ok(session) => Some(session),
        Err(e) => {
            tracing::warn!(path = %path.display(), err = %e, "corrupt session file, ignoring");
            None
        }
    }
}

fn save_session(path: &Path, session: &Session) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(session).map_err(std::io::Error::other)?;
    std::fs::write(path, json)
}

fn discard_session(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), err = %e, "failed to remove session file"),
    }
}
