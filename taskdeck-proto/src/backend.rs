//! Wire protocol between the `TaskDeck` client and the development backend.
//!
//! Every WebSocket binary frame carries one postcard-encoded message. The
//! client sends [`BackendRequest`]s tagged with a caller-chosen `id`; the
//! server answers each with exactly one [`BackendResponse`] carrying the same
//! `id`. Requests on one connection may be answered out of order.

use serde::{Deserialize, Serialize};

use crate::identity::{Identity, Session, UserId};
use crate::task::{NewTask, Task, TaskId, TaskPatch};

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// A request from client to backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendRequest {
    /// Correlation id echoed in the response.
    pub id: u64,
    /// Access token of the caller's session, if signed in.
    pub token: Option<String>,
    /// The operation to perform.
    pub op: BackendOp,
}

/// Operations understood by the backend.
///
/// Task operations carry the `owner_id` the client believes it is acting
/// for; the server resolves the real owner from `token` and treats a
/// mismatch as "no such row".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendOp {
    /// Register a new account.
    SignUp {
        /// Account email.
        email: String,
        /// Account password.
        password: String,
    },
    /// Open a session with email and password.
    SignIn {
        /// Account email.
        email: String,
        /// Account password.
        password: String,
    },
    /// Revoke the session identified by the request token.
    SignOut,
    /// Resolve the request token to its user.
    GetUser,
    /// List the owner's tasks, newest first.
    SelectTasks {
        /// Owner filter.
        owner_id: UserId,
    },
    /// Insert a task for the owner.
    InsertTask {
        /// Owner of the new row.
        owner_id: UserId,
        /// Fields of the new row.
        task: NewTask,
    },
    /// Patch one of the owner's tasks.
    UpdateTask {
        /// Owner filter.
        owner_id: UserId,
        /// Row filter.
        task_id: TaskId,
        /// Fields to change.
        patch: TaskPatch,
    },
    /// Delete one of the owner's tasks.
    DeleteTask {
        /// Owner filter.
        owner_id: UserId,
        /// Row filter.
        task_id: TaskId,
    },
}

impl BackendOp {
    /// Short operation name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SignUp { .. } => "sign_up",
            Self::SignIn { .. } => "sign_in",
            Self::SignOut => "sign_out",
            Self::GetUser => "get_user",
            Self::SelectTasks { .. } => "select_tasks",
            Self::InsertTask { .. } => "insert_task",
            Self::UpdateTask { .. } => "update_task",
            Self::DeleteTask { .. } => "delete_task",
        }
    }
}

/// A backend answer to one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendResponse {
    /// The `id` of the request this answers.
    pub id: u64,
    /// Outcome of the operation.
    pub result: Result<BackendReply, BackendFailure>,
}

/// Successful operation results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendReply {
    /// Account created; `session` is `None` when email confirmation is required.
    SignedUp {
        /// Session opened by the sign-up, if any.
        session: Option<Session>,
    },
    /// A session was opened.
    Session(Session),
    /// The session was revoked.
    SignedOut,
    /// The user behind the request token.
    User(Identity),
    /// Result rows of a select.
    Tasks(Vec<Task>),
    /// The inserted or updated row.
    Task(Task),
    /// The row was deleted.
    Deleted,
}

/// Category of a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// Bad credentials, unknown or expired token, duplicate account.
    Auth,
    /// No row matched the filter.
    NotFound,
    /// The request was understood but violates a constraint.
    Rejected,
    /// The request could not be decoded or is not allowed here.
    Protocol,
}

/// A failed operation with a human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendFailure {
    /// Failure category.
    pub kind: FailureKind,
    /// Human-readable description.
    pub message: String,
}

impl BackendFailure {
    /// Creates a failure of the given kind.
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Encodes a [`BackendRequest`] using postcard.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the request cannot be serialized.
pub fn encode_request(request: &BackendRequest) -> Result<Vec<u8>, CodecError> {
    postcard::to_allocvec(request).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a [`BackendRequest`] from bytes.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the bytes are not a valid request.
pub fn decode_request(bytes: &[u8]) -> Result<BackendRequest, CodecError> {
    postcard::from_bytes(bytes).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Encodes a [`BackendResponse`] using postcard.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the response cannot be serialized.
pub fn encode_response(response: &BackendResponse) -> Result<Vec<u8>, CodecError> {
    postcard::to_allocvec(response).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a [`BackendResponse`] from bytes.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the bytes are not a valid response.
pub fn decode_response(bytes: &[u8]) -> Result<BackendResponse, CodecError> {
    postcard::from_bytes(bytes).map_err(|e| CodecError::Serialization(e.to_string()))
}
