//! Per-user task list backed by the remote task table.
//!
//! [`TaskStore`] keeps the signed-in user's tasks newest-first and reloads
//! them whenever the session store reports a different user.

pub mod store;

pub use store::TaskStore;

use thiserror::Error;

use crate::remote::RemoteError;

/// Errors returned by task store operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskStoreError {
    /// A mutation was attempted with nobody signed in.
    #[error("user not authenticated")]
    Unauthenticated,
    /// The session store has not finished initializing.
    #[error("session store is not initialized")]
    SessionNotInitialized,
    /// The remote call failed.
    #[error(transparent)]
    Remote(#[from] RemoteError),
}
