//! Integration tests for the session store lifecycle.
//!
//! Covers the one-shot initialization, sign-up with and without email
//! confirmation, observer notifications, and listener teardown.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use parking_lot::Mutex;
use taskdeck::remote::memory::MemoryBackend;
use taskdeck::remote::{RemoteError, RemoteOp, SignUpOutcome};
use taskdeck::session::{IdentityTransition, SessionError, SessionStore};

/// Records every transition an observer sees.
fn record(store: &SessionStore<MemoryBackend>) -> (
    Arc<Mutex<Vec<IdentityTransition>>>,
    taskdeck::listeners::Subscription,
) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let sub = store.subscribe(move |t: &IdentityTransition| sink.lock().push(t.clone()));
    (seen, sub)
}

#[tokio::test]
async fn sign_up_without_confirmation_signs_in() {
    let backend = MemoryBackend::new();
    let store = SessionStore::connect(backend).await;
    let (seen, _sub) = record(&store);

    let outcome = store.sign_up("ann@example.com", "secret1").await.unwrap();
    assert_eq!(outcome, SignUpOutcome::SessionStarted);

    let user = store.user().unwrap();
    assert_eq!(user.email, "ann@example.com");
    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].previous, None);
    assert_eq!(seen[0].current.as_ref(), Some(&user));
    assert!(seen[0].user_changed());
}

#[tokio::test]
async fn sign_up_with_confirmation_leaves_identity_absent() {
    let backend = MemoryBackend::new().with_confirmation();
    let store = SessionStore::connect(backend.clone()).await;

    let outcome = store.sign_up("ann@example.com", "secret1").await.unwrap();
    assert_eq!(outcome, SignUpOutcome::ConfirmationRequired);
    assert!(store.user().is_none());

    let err = store.sign_in("ann@example.com", "secret1").await.unwrap_err();
    assert_eq!(err, SessionError::Auth("Email not confirmed".to_string()));

    assert!(backend.confirm_email("ann@example.com"));
    store.sign_in("ann@example.com", "secret1").await.unwrap();
    assert_eq!(store.user().unwrap().email, "ann@example.com");
}

#[tokio::test]
async fn duplicate_sign_up_reports_message() {
    let backend = MemoryBackend::new();
    backend.register("ann@example.com", "secret1");
    let store = SessionStore::connect(backend).await;

    let err = store.sign_up("ann@example.com", "secret1").await.unwrap_err();
    assert_eq!(err.to_string(), "User already registered");
    assert!(!store.is_loading());
}

#[tokio::test]
async fn network_failure_surfaces_as_message() {
    let backend = MemoryBackend::new();
    backend.register("ann@example.com", "secret1");
    let store = SessionStore::connect(backend.clone()).await;

    backend.fail_next(RemoteOp::SignIn, RemoteError::Network("offline".to_string()));
    let err = store.sign_in("ann@example.com", "secret1").await.unwrap_err();
    assert_eq!(err, SessionError::Auth("network error: offline".to_string()));
    assert!(store.user().is_none());
    assert!(!store.is_loading());
}

#[tokio::test]
async fn persisted_session_is_restored_on_connect() {
    let backend = MemoryBackend::new();
    let session = backend.seed_session("ann@example.com");

    let store = SessionStore::connect(backend.clone()).await;
    assert!(store.is_initialized());
    assert_eq!(store.user(), Some(session.user));
    assert_eq!(backend.calls(RemoteOp::CurrentSession), 1);
}

#[tokio::test]
async fn remote_expiry_clears_identity_and_notifies() {
    let backend = MemoryBackend::new();
    backend.register("ann@example.com", "secret1");
    let store = SessionStore::connect(backend.clone()).await;
    store.sign_in("ann@example.com", "secret1").await.unwrap();
    let (seen, _sub) = record(&store);

    backend.expire_session();

    assert!(store.user().is_none());
    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].previous.is_some());
    assert!(seen[0].current.is_none());
}

#[tokio::test]
async fn dropping_every_handle_releases_the_auth_listener() {
    let backend = MemoryBackend::new();
    let store = SessionStore::connect(backend.clone()).await;
    let clone = store.clone();
    assert_eq!(backend.listener_count(), 1);

    drop(store);
    assert_eq!(backend.listener_count(), 1);
    drop(clone);
    assert_eq!(backend.listener_count(), 0);

    // Events after teardown reach nobody and do not panic.
    backend.seed_session("ann@example.com");
    backend.expire_session();
}

#[tokio::test]
async fn observer_unsubscribe_stops_delivery() {
    let backend = MemoryBackend::new();
    backend.register("ann@example.com", "secret1");
    let store = SessionStore::connect(backend).await;
    let (seen, sub) = record(&store);

    store.sign_in("ann@example.com", "secret1").await.unwrap();
    assert_eq!(seen.lock().len(), 1);

    sub.unsubscribe();
    store.sign_out().await;
    assert_eq!(seen.lock().len(), 1);
    assert!(store.user().is_none());
}
