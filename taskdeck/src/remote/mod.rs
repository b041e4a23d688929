//! Remote service contract for the `TaskDeck` client.
//!
//! Defines the [`AuthService`] and [`TaskService`] traits the stores are
//! written against. Concrete implementations:
//! - [`memory::MemoryBackend`]: in-process backend for tests and the offline demo
//! - [`ws::WsBackend`]: WebSocket client for `taskdeck-backend`

pub mod memory;
pub mod ws;

use std::fmt;

use taskdeck_proto::backend::{BackendFailure, FailureKind};
use taskdeck_proto::identity::{AuthChange, Session, UserId};
use taskdeck_proto::task::{Priority, Task, TaskId, TaskPatch};

use crate::listeners::Subscription;

/// Errors reported by a remote service call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// The service could not be reached or the connection dropped.
    #[error("network error: {0}")]
    Network(String),

    /// Credentials or session were rejected.
    #[error("{0}")]
    Auth(String),

    /// No row matched the filter.
    #[error("not found: {0}")]
    NotFound(String),

    /// The service refused the request (constraint violation).
    #[error("rejected: {0}")]
    Rejected(String),

    /// The service answered with something the client did not expect.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// No answer within the request timeout.
    #[error("request timed out")]
    Timeout,
}

impl From<BackendFailure> for RemoteError {
    fn from(failure: BackendFailure) -> Self {
        match failure.kind {
            FailureKind::Auth => Self::Auth(failure.message),
            FailureKind::NotFound => Self::NotFound(failure.message),
            FailureKind::Rejected => Self::Rejected(failure.message),
            FailureKind::Protocol => Self::Protocol(failure.message),
        }
    }
}

/// Remote operations, used for call accounting and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    /// [`AuthService::current_session`].
    CurrentSession,
    /// [`AuthService::sign_up`].
    SignUp,
    /// [`AuthService::sign_in_with_password`].
    SignIn,
    /// [`AuthService::sign_out`].
    SignOut,
    /// [`TaskService::select`].
    Select,
    /// [`TaskService::insert`].
    Insert,
    /// [`TaskService::update`].
    Update,
    /// [`TaskService::delete`].
    Delete,
}

impl fmt::Display for RemoteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CurrentSession => "current_session",
            Self::SignUp => "sign_up",
            Self::SignIn => "sign_in",
            Self::SignOut => "sign_out",
            Self::Select => "select",
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Result of a successful sign-up request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignUpOutcome {
    /// The account is active and a session was opened.
    SessionStarted,
    /// The account exists but must be confirmed before signing in.
    ConfirmationRequired,
}

/// Row filter for task operations. Always carries the owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskScope {
    /// Rows must belong to this user.
    pub owner_id: UserId,
    /// Narrow to a single row.
    pub task_id: Option<TaskId>,
}

impl TaskScope {
    /// All rows of one owner.
    #[must_use]
    pub const fn owner(owner_id: UserId) -> Self {
        Self {
            owner_id,
            task_id: None,
        }
    }

    /// One row of one owner.
    #[must_use]
    pub const fn row(owner_id: UserId, task_id: TaskId) -> Self {
        Self {
            owner_id,
            task_id: Some(task_id),
        }
    }

    /// Returns `true` if `task` is inside this scope.
    #[must_use]
    pub fn contains(&self, task: &Task) -> bool {
        task.owner_id == self.owner_id && self.task_id.is_none_or(|id| id == task.id)
    }

    /// The row id, or a [`RemoteError::Rejected`] for owner-wide scopes.
    ///
    /// # Errors
    ///
    /// Returns an error when the scope does not name a row.
    pub fn require_row(&self) -> Result<TaskId, RemoteError> {
        self.task_id
            .ok_or_else(|| RemoteError::Rejected("row filter requires a task id".to_string()))
    }
}

/// Insert payload with the owner and defaults already applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTaskRecord {
    /// Owner of the new row.
    pub owner_id: UserId,
    /// Task title.
    pub title: String,
    /// Description, `""` when none was given.
    pub description: String,
    /// Task priority.
    pub priority: Priority,
}

/// Remote authentication service.
///
/// Implementations must deliver every session change to the subscribed
/// callbacks, including changes caused by this client's own calls.
pub trait AuthService: Send + Sync + 'static {
    /// Reads the persisted session, if any.
    fn current_session(
        &self,
    ) -> impl std::future::Future<Output = Result<Option<Session>, RemoteError>> + Send;

    /// Registers a session-change callback until the returned handle is dropped.
    fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&AuthChange) + Send + Sync + 'static;

    /// Registers a new account.
    fn sign_up(
        &self,
        email: &str,
        password: &str,
    ) -> impl std::future::Future<Output = Result<SignUpOutcome, RemoteError>> + Send;

    /// Opens a session with email and password.
    fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> impl std::future::Future<Output = Result<Session, RemoteError>> + Send;

    /// Ends the current session.
    fn sign_out(&self) -> impl std::future::Future<Output = Result<(), RemoteError>> + Send;
}

/// Remote task table.
///
/// Every call is owner-scoped; the service's access policy applies the same
/// filter independently.
pub trait TaskService: Send + Sync + 'static {
    /// All rows in `scope`, newest first.
    fn select(
        &self,
        scope: &TaskScope,
    ) -> impl std::future::Future<Output = Result<Vec<Task>, RemoteError>> + Send;

    /// Inserts a row and returns it as stored.
    fn insert(
        &self,
        record: &NewTaskRecord,
    ) -> impl std::future::Future<Output = Result<Task, RemoteError>> + Send;

    /// Patches the row in `scope` and returns it as stored.
    fn update(
        &self,
        scope: &TaskScope,
        patch: &TaskPatch,
    ) -> impl std::future::Future<Output = Result<Task, RemoteError>> + Send;

    /// Deletes the row in `scope`.
    fn delete(
        &self,
        scope: &TaskScope,
    ) -> impl std::future::Future<Output = Result<(), RemoteError>> + Send;
}
