//! End-to-end tests: both stores over the WebSocket client against an
//! in-process `taskdeck-backend`.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use taskdeck::app::{App, Reply};
use taskdeck::remote::ws::{WsBackend, WsOptions};
use taskdeck::session::SessionStore;
use taskdeck::tasks::{TaskStore, TaskStoreError};
use taskdeck_backend::server::{self, BackendState};
use taskdeck_backend::store::BackendStore;
use taskdeck_proto::task::{NewTask, Priority, TaskPatch};

async fn start_backend(state: BackendState) -> String {
    let (addr, _handle) = server::start_server_with_state("127.0.0.1:0", Arc::new(state))
        .await
        .expect("failed to start backend");
    format!("ws://{addr}/ws")
}

async fn client(url: &str) -> WsBackend {
    let mut options = WsOptions::new(url);
    options.request_timeout = Duration::from_secs(5);
    WsBackend::connect(options).await.unwrap()
}

async fn stores(
    backend: &WsBackend,
) -> (SessionStore<WsBackend>, TaskStore<WsBackend>) {
    let session = SessionStore::connect(backend.clone()).await;
    let tasks = TaskStore::new(backend.clone(), &session).unwrap();
    (session, tasks)
}

#[tokio::test]
async fn task_lifecycle_over_websocket() {
    let url = start_backend(BackendState::new()).await;
    let backend = client(&url).await;
    let (session, tasks) = stores(&backend).await;

    session.sign_up("ann@example.com", "secret1").await.unwrap();
    tasks.wait_for_reload().await;
    assert!(tasks.todos().is_empty());

    let milk = tasks
        .create_todo(NewTask::new("Buy milk", Priority::Medium))
        .await
        .unwrap();
    let plants = tasks
        .create_todo(NewTask::new("Water plants", Priority::Low).with_description("balcony"))
        .await
        .unwrap();
    assert_eq!(tasks.todos()[0].id, plants.id);
    assert_eq!(plants.description, "balcony");

    let renamed = tasks
        .update_todo(
            milk.id,
            TaskPatch {
                title: Some("Buy oat milk".to_string()),
                ..TaskPatch::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(renamed.title, "Buy oat milk");
    assert_eq!(tasks.todos()[1].title, "Buy oat milk");

    tasks.toggle_todo(milk.id).await.unwrap();
    tasks.delete_todo(plants.id).await.unwrap();

    // A fresh fetch agrees with the locally patched list.
    let local = tasks.todos();
    tasks.refresh_todos().await;
    assert_eq!(tasks.todos(), local);
    assert_eq!(local.len(), 1);
    assert!(local[0].completed);
}

#[tokio::test]
async fn two_clients_never_see_each_others_tasks() {
    let url = start_backend(BackendState::new()).await;
    let ann_backend = client(&url).await;
    let bob_backend = client(&url).await;
    let (ann, ann_tasks) = stores(&ann_backend).await;
    let (bob, bob_tasks) = stores(&bob_backend).await;

    ann.sign_up("ann@example.com", "secret1").await.unwrap();
    bob.sign_up("bob@example.com", "secret2").await.unwrap();
    ann_tasks.wait_for_reload().await;
    bob_tasks.wait_for_reload().await;

    let secret = ann_tasks
        .create_todo(NewTask::new("Ann's secret", Priority::High))
        .await
        .unwrap();
    bob_tasks.refresh_todos().await;
    assert!(bob_tasks.todos().is_empty());

    // Bob guessing Ann's task id gets nothing.
    let err = bob_tasks
        .update_todo(secret.id, TaskPatch::completed(true))
        .await
        .unwrap_err();
    assert!(matches!(err, TaskStoreError::Remote(_)));
    let err = bob_tasks.delete_todo(secret.id).await.unwrap_err();
    assert!(matches!(err, TaskStoreError::Remote(_)));

    ann_tasks.refresh_todos().await;
    assert_eq!(ann_tasks.todos(), vec![secret]);
}

#[tokio::test]
async fn confirmation_required_backend() {
    let state = BackendState::with_config(64 * 1024, BackendStore::with_confirmation());
    let url = start_backend(state).await;
    let backend = client(&url).await;
    let (session, _tasks) = stores(&backend).await;

    let outcome = session.sign_up("ann@example.com", "secret1").await.unwrap();
    assert_eq!(outcome, taskdeck::remote::SignUpOutcome::ConfirmationRequired);
    assert!(session.user().is_none());

    let err = session.sign_in("ann@example.com", "secret1").await.unwrap_err();
    assert_eq!(err.to_string(), "Email not confirmed");
}

#[tokio::test]
async fn persisted_session_survives_client_restart() {
    let url = start_backend(BackendState::new()).await;
    let dir = tempfile::tempdir().unwrap();
    let mut options = WsOptions::new(&url);
    options.session_file = Some(dir.path().join("session.json"));

    let first = WsBackend::connect(options.clone()).await.unwrap();
    let (session, tasks) = stores(&first).await;
    session.sign_up("ann@example.com", "secret1").await.unwrap();
    tasks.wait_for_reload().await;
    tasks
        .create_todo(NewTask::new("Buy milk", Priority::Medium))
        .await
        .unwrap();
    drop((session, tasks, first));

    let second = WsBackend::connect(options).await.unwrap();
    let (session, tasks) = stores(&second).await;
    tasks.wait_for_reload().await;
    assert_eq!(session.user().unwrap().email, "ann@example.com");
    assert_eq!(tasks.todos().len(), 1);
    assert_eq!(tasks.todos()[0].title, "Buy milk");
}

#[tokio::test]
async fn app_commands_over_websocket() {
    let url = start_backend(BackendState::new()).await;
    let backend = client(&url).await;
    let mut app = App::new(backend.clone(), backend);
    app.start().await.unwrap();

    let reply = app.handle_line("signup ann@example.com secret1").await;
    assert_eq!(
        reply,
        Reply::Lines(vec!["Signed up and signed in as ann@example.com".to_string()])
    );
    app.handle_line("add high Buy milk").await;

    let Reply::Lines(listing) = app.handle_line("list pending high").await else {
        panic!("unexpected quit");
    };
    assert_eq!(listing.len(), 1);
    assert!(listing[0].ends_with("Buy milk"));

    let Reply::Lines(stats) = app.handle_line("stats").await else {
        panic!("unexpected quit");
    };
    assert_eq!(stats[0], "1 tasks: 0 completed, 1 pending (0% done)");
}
