//! Authenticated identity and remote session types.
//!
//! A [`Session`] is what the remote auth service hands out; an [`Identity`]
//! is the part of it the client stores care about. Every session-change
//! notification carries an [`AuthEvent`] together with the session (or its
//! absence) as an [`AuthChange`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of a user account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(Uuid);

impl UserId {
    /// Creates a fresh random user identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID value.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The authenticated user as seen by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Account identifier; every visible task carries it as `owner_id`.
    pub id: UserId,
    /// Account email address.
    pub email: String,
    /// When the account was created.
    pub created_at: DateTime<Utc>,
}

/// A live remote session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Opaque bearer token presented on every backend request.
    pub access_token: String,
    /// The account this session belongs to.
    pub user: Identity,
}

impl Session {
    /// Returns the identity this session authenticates.
    #[must_use]
    pub fn identity(&self) -> Identity {
        self.user.clone()
    }
}

/// Maps an optional session to an optional identity.
///
/// Used by both the initial session check and every change notification, so
/// that the two paths can never disagree.
#[must_use]
pub fn identity_of(session: Option<&Session>) -> Option<Identity> {
    session.map(Session::identity)
}

/// Kind of session change reported by the auth service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthEvent {
    /// Delivered once to a new subscriber with the current session.
    InitialSession,
    /// A session was established by sign-in (or sign-up without confirmation).
    SignedIn,
    /// The session ended by sign-out or expiry.
    SignedOut,
    /// The access token was rotated; the user did not change.
    TokenRefreshed,
    /// Account details changed for the signed-in user.
    UserUpdated,
}

impl std::fmt::Display for AuthEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InitialSession => write!(f, "initial_session"),
            Self::SignedIn => write!(f, "signed_in"),
            Self::SignedOut => write!(f, "signed_out"),
            Self::TokenRefreshed => write!(f, "token_refreshed"),
            Self::UserUpdated => write!(f, "user_updated"),
        }
    }
}

/// A session-change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChange {
    /// What happened.
    pub event: AuthEvent,
    /// The session after the change, if any.
    pub session: Option<Session>,
}

impl AuthChange {
    /// Creates a notification for the given event and session.
    #[must_use]
    pub const fn new(event: AuthEvent, session: Option<Session>) -> Self {
        Self { event, session }
    }

    /// Identity derived from the carried session.
    #[must_use]
    pub fn identity(&self) -> Option<Identity> {
        identity_of(self.session.as_ref())
    }
}
