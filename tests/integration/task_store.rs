//! Integration tests for the task store driven by a live session store.
//!
//! Covers creation while signed out, newest-first insertion, in-place
//! updates, failure atomicity, and the reload that follows a user switch.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use chrono::{Duration, Utc};
use taskdeck::remote::memory::MemoryBackend;
use taskdeck::remote::{RemoteError, RemoteOp};
use taskdeck::session::SessionStore;
use taskdeck::tasks::{TaskStore, TaskStoreError};
use taskdeck_proto::identity::UserId;
use taskdeck_proto::task::{NewTask, Priority, Task, TaskId, TaskPatch};

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

type Stores = (
    MemoryBackend,
    SessionStore<MemoryBackend>,
    TaskStore<MemoryBackend>,
);

/// Builds both stores over one memory backend with two registered accounts.
async fn setup() -> Stores {
    let backend = MemoryBackend::new();
    backend.register("user1@example.com", "secret1");
    backend.register("user2@example.com", "secret2");
    let session = SessionStore::connect(backend.clone()).await;
    let tasks = TaskStore::new(backend.clone(), &session).unwrap();
    (backend, session, tasks)
}

async fn sign_in(stores: &Stores, email: &str, password: &str) -> UserId {
    let (_, session, tasks) = stores;
    session.sign_in(email, password).await.unwrap();
    tasks.wait_for_reload().await;
    session.user().unwrap().id
}

/// A stored row for `owner`, created `age_secs` seconds ago.
fn row(owner: UserId, title: &str, completed: bool, age_secs: i64) -> Task {
    let created = Utc::now() - Duration::seconds(age_secs);
    Task {
        id: TaskId::new(),
        owner_id: owner,
        title: title.to_string(),
        description: String::new(),
        priority: Priority::Medium,
        completed,
        created_at: created,
        updated_at: created,
    }
}

// ===========================================================================
// Creation
// ===========================================================================

#[tokio::test]
async fn create_while_signed_out_is_unauthenticated() {
    let stores = setup().await;
    let (backend, _, tasks) = &stores;

    let err = tasks
        .create_todo(NewTask::new("Buy milk", Priority::Medium))
        .await
        .unwrap_err();
    assert_eq!(err, TaskStoreError::Unauthenticated);
    assert_eq!(err.to_string(), "user not authenticated");
    assert_eq!(backend.calls(RemoteOp::Insert), 0);
}

#[tokio::test]
async fn create_prepends_new_pending_task() {
    let stores = setup().await;
    let (backend, _, tasks) = &stores;
    let user = sign_in(&stores, "user1@example.com", "secret1").await;
    backend.insert_row(row(user, "Older", false, 60));
    tasks.refresh_todos().await;
    assert_eq!(tasks.todos().len(), 1);

    let created = tasks
        .create_todo(NewTask::new("Buy milk", Priority::Medium))
        .await
        .unwrap();

    let list = tasks.todos();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0], created);
    assert_eq!(list[0].title, "Buy milk");
    assert!(!list[0].completed);
    assert_eq!(list[0].description, "");
    assert_eq!(list[0].owner_id, user);
    assert_eq!(list[1].title, "Older");
}

#[tokio::test]
async fn failed_create_leaves_list_untouched() {
    let stores = setup().await;
    let (backend, _, tasks) = &stores;
    let user = sign_in(&stores, "user1@example.com", "secret1").await;
    backend.insert_row(row(user, "Existing", false, 5));
    tasks.refresh_todos().await;
    let before = tasks.todos();

    backend.fail_next(
        RemoteOp::Insert,
        RemoteError::Rejected("duplicate key".to_string()),
    );
    let err = tasks
        .create_todo(NewTask::new("Buy milk", Priority::High))
        .await
        .unwrap_err();
    assert!(matches!(err, TaskStoreError::Remote(RemoteError::Rejected(_))));
    assert_eq!(tasks.todos(), before);
    assert_eq!(tasks.error().as_deref(), Some("rejected: duplicate key"));
}

// ===========================================================================
// Update, toggle, delete
// ===========================================================================

#[tokio::test]
async fn update_replaces_in_place_and_keeps_order() {
    let stores = setup().await;
    let (backend, _, tasks) = &stores;
    let user = sign_in(&stores, "user1@example.com", "secret1").await;
    let a = row(user, "A", false, 10);
    let b = row(user, "B", true, 20);
    backend.insert_row(b.clone());
    backend.insert_row(a.clone());
    tasks.refresh_todos().await;
    assert_eq!(tasks.todos().iter().map(|t| t.id).collect::<Vec<_>>(), vec![a.id, b.id]);

    let updated = tasks
        .update_todo(a.id, TaskPatch::completed(true))
        .await
        .unwrap();
    assert!(updated.completed);

    let list = tasks.todos();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0].id, a.id);
    assert!(list[0].completed);
    assert_eq!(list[1], b);
}

#[tokio::test]
async fn update_of_foreign_row_is_refused() {
    let stores = setup().await;
    let (backend, _, tasks) = &stores;
    sign_in(&stores, "user1@example.com", "secret1").await;
    let foreign = row(UserId::new(), "Not mine", false, 5);
    backend.insert_row(foreign.clone());

    let err = tasks
        .update_todo(foreign.id, TaskPatch::completed(true))
        .await
        .unwrap_err();
    assert!(matches!(err, TaskStoreError::Remote(RemoteError::NotFound(_))));
    let stored = backend.rows().into_iter().find(|t| t.id == foreign.id).unwrap();
    assert!(!stored.completed);
}

#[tokio::test]
async fn toggle_flips_and_ignores_unknown_ids() {
    let stores = setup().await;
    let (backend, _, tasks) = &stores;
    let user = sign_in(&stores, "user1@example.com", "secret1").await;
    let a = row(user, "A", false, 5);
    backend.insert_row(a.clone());
    tasks.refresh_todos().await;

    let toggled = tasks.toggle_todo(a.id).await.unwrap().unwrap();
    assert!(toggled.completed);
    let toggled = tasks.toggle_todo(a.id).await.unwrap().unwrap();
    assert!(!toggled.completed);

    let calls = backend.calls(RemoteOp::Update);
    assert_eq!(tasks.toggle_todo(TaskId::new()).await.unwrap(), None);
    assert_eq!(backend.calls(RemoteOp::Update), calls);
}

#[tokio::test]
async fn delete_removes_only_that_entry() {
    let stores = setup().await;
    let (backend, _, tasks) = &stores;
    let user = sign_in(&stores, "user1@example.com", "secret1").await;
    let a = row(user, "A", false, 5);
    let b = row(user, "B", false, 10);
    backend.insert_row(a.clone());
    backend.insert_row(b.clone());
    tasks.refresh_todos().await;

    tasks.delete_todo(a.id).await.unwrap();
    assert_eq!(tasks.todos(), vec![b]);

    backend.fail_next(RemoteOp::Delete, RemoteError::Network("offline".to_string()));
    let before = tasks.todos();
    assert!(tasks.delete_todo(before[0].id).await.is_err());
    assert_eq!(tasks.todos(), before);
}

// ===========================================================================
// Identity transitions
// ===========================================================================

#[tokio::test]
async fn switching_users_clears_and_reloads_for_new_user_only() {
    let stores = setup().await;
    let (backend, session, tasks) = &stores;
    let user1 = sign_in(&stores, "user1@example.com", "secret1").await;
    backend.insert_row(row(user1, "user1 task", false, 5));
    tasks.refresh_todos().await;
    assert_eq!(tasks.todos().len(), 1);

    let before = backend.selected_owners().len();
    session.sign_in("user2@example.com", "secret2").await.unwrap();
    let user2 = session.user().unwrap().id;
    assert_ne!(user1, user2);
    // The stale list is gone as soon as the transition is observed.
    assert!(tasks.todos().iter().all(|t| t.owner_id == user2));

    tasks.wait_for_reload().await;
    assert!(tasks.todos().is_empty());
    assert_eq!(&backend.selected_owners()[before..], &[user2]);
    assert_eq!(tasks.identity().map(|u| u.id), Some(user2));
}

#[tokio::test]
async fn sign_out_clears_without_remote_call() {
    let stores = setup().await;
    let (backend, session, tasks) = &stores;
    let user = sign_in(&stores, "user1@example.com", "secret1").await;
    backend.insert_row(row(user, "A", false, 5));
    tasks.refresh_todos().await;

    let selects = backend.calls(RemoteOp::Select);
    session.sign_out().await;
    tasks.wait_for_reload().await;
    assert!(tasks.todos().is_empty());
    assert_eq!(backend.calls(RemoteOp::Select), selects);

    tasks.refresh_todos().await;
    assert!(tasks.todos().is_empty());
    assert_eq!(backend.calls(RemoteOp::Select), selects);
}

#[tokio::test]
async fn fetched_rows_always_belong_to_the_signed_in_user() {
    let stores = setup().await;
    let (backend, _, tasks) = &stores;
    let user = sign_in(&stores, "user1@example.com", "secret1").await;
    for i in 0..5 {
        backend.insert_row(row(user, &format!("mine {i}"), i % 2 == 0, i));
        backend.insert_row(row(UserId::new(), &format!("theirs {i}"), false, i));
    }
    tasks.refresh_todos().await;

    let list = tasks.todos();
    assert_eq!(list.len(), 5);
    assert!(list.iter().all(|t| t.owner_id == user));
    assert!(list.windows(2).all(|w| w[0].created_at >= w[1].created_at));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn rapid_user_switches_never_leave_rows_of_another_user() {
    let stores = setup().await;
    let (backend, session, tasks) = &stores;
    let user1 = sign_in(&stores, "user1@example.com", "secret1").await;
    backend.insert_row(row(user1, "user1 task", false, 5));
    let user2 = sign_in(&stores, "user2@example.com", "secret2").await;
    backend.insert_row(row(user2, "user2 task", false, 5));

    for round in 0..100 {
        let (email, password) = if round % 2 == 0 {
            ("user1@example.com", "secret1")
        } else {
            ("user2@example.com", "secret2")
        };
        let refreshes: Vec<_> = (0..4)
            .map(|_| {
                let tasks = tasks.clone();
                tokio::spawn(async move { tasks.refresh_todos().await })
            })
            .collect();
        session.sign_in(email, password).await.unwrap();
        for refresh in refreshes {
            refresh.await.unwrap();
        }
        tasks.wait_for_reload().await;

        let current = session.user().unwrap().id;
        let list = tasks.todos();
        assert_eq!(list.len(), 1, "round {round}");
        assert_eq!(list[0].owner_id, current, "round {round}");
    }
}
