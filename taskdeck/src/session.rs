//! Session store: the authenticated identity of the running client.
//!
//! [`SessionStore`] derives an [`Identity`] from the remote session and keeps
//! it current by subscribing to the auth service's change notifications.
//! Other components observe identity transitions through
//! [`SessionStore::subscribe`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};

use taskdeck_proto::identity::{AuthEvent, Identity, identity_of};

use crate::listeners::{Listeners, Subscription};
use crate::loading::LoadingFlag;
use crate::remote::{AuthService, SignUpOutcome};

/// Errors surfaced by session operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// The auth service refused the request; carries its message.
    #[error("{0}")]
    Auth(String),
}

/// The identity before and after a change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityTransition {
    /// Identity before the change.
    pub previous: Option<Identity>,
    /// Identity after the change.
    pub current: Option<Identity>,
}

impl IdentityTransition {
    /// Returns `true` if the account changed (not just its details).
    #[must_use]
    pub fn user_changed(&self) -> bool {
        self.previous.as_ref().map(|i| i.id) != self.current.as_ref().map(|i| i.id)
    }
}

struct Inner<A> {
    auth: A,
    user: RwLock<Option<Identity>>,
    loading: LoadingFlag,
    observers: Listeners<IdentityTransition>,
    /// Dropped together with the store, which unsubscribes from the service.
    auth_subscription: Mutex<Option<Subscription>>,
    init_started: AtomicBool,
    initialized: AtomicBool,
    event_seen: AtomicBool,
}

impl<A> Inner<A> {
    fn apply(&self, event: AuthEvent, identity: Option<Identity>) {
        let previous = {
            let mut user = self.user.write();
            if *user == identity {
                tracing::debug!(%event, "auth change left identity unchanged");
                return;
            }
            std::mem::replace(&mut *user, identity.clone())
        };
        match &identity {
            Some(id) => tracing::info!(%event, user_id = %id.id, "identity set"),
            None => tracing::info!(%event, "identity cleared"),
        }
        self.observers.emit(&IdentityTransition {
            previous,
            current: identity,
        });
    }
}

/// Shared handle to the session state. Clones refer to the same store.
pub struct SessionStore<A> {
    inner: Arc<Inner<A>>,
}

impl<A> Clone for SessionStore<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: AuthService> SessionStore<A> {
    /// Creates a store that reports loading until [`initialize`](Self::initialize) runs.
    pub fn new(auth: A) -> Self {
        Self {
            inner: Arc::new(Inner {
                auth,
                user: RwLock::new(None),
                loading: LoadingFlag::pending(),
                observers: Listeners::new(),
                auth_subscription: Mutex::new(None),
                init_started: AtomicBool::new(false),
                initialized: AtomicBool::new(false),
                event_seen: AtomicBool::new(false),
            }),
        }
    }

    /// Creates and initializes a store.
    pub async fn connect(auth: A) -> Self {
        let store = Self::new(auth);
        store.initialize().await;
        store
    }

    /// Subscribes to session changes and reads the persisted session.
    ///
    /// The subscription is registered before the initial read so that no
    /// change can slip between the two; a notification that arrives first
    /// wins over the initial read. Runs once; later calls return immediately.
    /// A failed read is logged and leaves the identity absent.
    pub async fn initialize(&self) {
        if self.inner.init_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let _loading = self.inner.loading.begin();

        let weak = Arc::downgrade(&self.inner);
        let subscription = self.inner.auth.subscribe(move |change| {
            if let Some(inner) = weak.upgrade() {
                // Only a real change outranks the initial read.
                if change.event != AuthEvent::InitialSession {
                    inner.event_seen.store(true, Ordering::SeqCst);
                }
                inner.apply(change.event, change.identity());
            }
        });
        *self.inner.auth_subscription.lock() = Some(subscription);

        match self.inner.auth.current_session().await {
            Ok(session) => {
                if !self.inner.event_seen.load(Ordering::SeqCst) {
                    self.inner
                        .apply(AuthEvent::InitialSession, identity_of(session.as_ref()));
                }
            }
            Err(e) => tracing::error!(error = %e, "failed to read persisted session"),
        }
        self.inner.initialized.store(true, Ordering::SeqCst);
    }

    /// Registers a new account.
    ///
    /// Does not sign in by itself; when the service opens a session the
    /// change notification sets the identity.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Auth`] with the service's message.
    pub async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome, SessionError> {
        let _loading = self.inner.loading.begin();
        self.inner
            .auth
            .sign_up(email, password)
            .await
            .inspect(|outcome| tracing::info!(email, ?outcome, "sign-up accepted"))
            .map_err(|e| {
                tracing::warn!(email, error = %e, "sign-up failed");
                SessionError::Auth(e.to_string())
            })
    }

    /// Signs in with email and password.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Auth`] with the service's message.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<(), SessionError> {
        let _loading = self.inner.loading.begin();
        match self.inner.auth.sign_in_with_password(email, password).await {
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::warn!(email, error = %e, "sign-in failed");
                Err(SessionError::Auth(e.to_string()))
            }
        }
    }

    /// Ends the session. Failures are logged, not returned.
    pub async fn sign_out(&self) {
        let _loading = self.inner.loading.begin();
        if let Err(e) = self.inner.auth.sign_out().await {
            tracing::error!(error = %e, "sign-out failed");
        }
    }

    /// The current identity, if signed in.
    #[must_use]
    pub fn user(&self) -> Option<Identity> {
        self.inner.user.read().clone()
    }

    /// Returns `true` before the initial check finishes and while any auth
    /// operation is in flight.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.inner.loading.is_loading()
    }

    /// Returns `true` once [`initialize`](Self::initialize) has completed.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::SeqCst)
    }

    /// Registers a callback fired on every identity transition.
    ///
    /// Re-deriving the same identity (a token refresh, for instance) does
    /// not fire it.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&IdentityTransition) + Send + Sync + 'static,
    {
        self.inner.observers.subscribe(callback)
    }

    /// The auth service this store talks to.
    #[must_use]
    pub fn auth(&self) -> &A {
        &self.inner.auth
    }
}
