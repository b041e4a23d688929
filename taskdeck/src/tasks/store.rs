//! The task store.
//!
//! Every operation reaching the remote service clears `error` when it
//! starts, holds the loading flag for its duration, and patches the local
//! list only after the remote call succeeded. Overlapping operations are not
//! serialized; each applies its own result when it completes.
//!
//! Lock order is `todos` before `identity`. A result is written only while
//! holding `todos` and after checking that its user is still current, and an
//! identity change swaps the user and clears the list under the same lock.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::task::{AbortHandle, JoinHandle};

use taskdeck_proto::identity::Identity;
use taskdeck_proto::task::{NewTask, Task, TaskFilter, TaskId, TaskPatch, TaskStats};

use super::TaskStoreError;
use crate::listeners::Subscription;
use crate::loading::LoadingFlag;
use crate::remote::{AuthService, NewTaskRecord, RemoteError, TaskScope, TaskService};
use crate::session::{IdentityTransition, SessionStore};

#[derive(Default)]
struct Reload {
    handle: Option<JoinHandle<()>>,
    abort: Option<AbortHandle>,
}

struct Inner<T> {
    service: T,
    identity: RwLock<Option<Identity>>,
    todos: RwLock<Vec<Task>>,
    error: Mutex<Option<String>>,
    loading: LoadingFlag,
    reload: Mutex<Reload>,
    session_subscription: Mutex<Option<Subscription>>,
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        if let Some(abort) = self.reload.get_mut().abort.take() {
            abort.abort();
        }
    }
}

impl<T: TaskService> Inner<T> {
    fn current_user_is(&self, identity: &Identity) -> bool {
        self.identity
            .read()
            .as_ref()
            .is_some_and(|current| current.id == identity.id)
    }

    /// Runs `patch` on the list if `identity` is still the current user.
    fn patch_for(&self, identity: &Identity, patch: impl FnOnce(&mut Vec<Task>)) -> bool {
        let mut todos = self.todos.write();
        if !self.current_user_is(identity) {
            tracing::debug!(user_id = %identity.id, "discarding result for previous user");
            return false;
        }
        patch(&mut todos);
        true
    }

    fn require_identity(&self) -> Result<Identity, TaskStoreError> {
        self.identity
            .read()
            .clone()
            .ok_or(TaskStoreError::Unauthenticated)
    }

    fn record_error(&self, operation: &str, error: &RemoteError) {
        tracing::warn!(operation, error = %error, "task operation failed");
        *self.error.lock() = Some(error.to_string());
    }

    fn on_identity_change(self: &Arc<Self>, transition: &IdentityTransition) {
        {
            let mut todos = self.todos.write();
            *self.identity.write() = transition.current.clone();
            if !transition.user_changed() {
                return;
            }
            todos.clear();
        }
        *self.error.lock() = None;
        if let Some(abort) = self.reload.lock().abort.take() {
            abort.abort();
        }
        if transition.current.is_some() {
            self.schedule_reload();
        }
    }

    fn schedule_reload(self: &Arc<Self>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no tokio runtime, task reload skipped");
            return;
        };
        let weak = Arc::downgrade(self);
        let handle = runtime.spawn(async move {
            if let Some(inner) = weak.upgrade() {
                inner.refresh().await;
            }
        });
        let mut reload = self.reload.lock();
        if let Some(previous) = reload.abort.replace(handle.abort_handle()) {
            previous.abort();
        }
        reload.handle = Some(handle);
    }

    async fn refresh(&self) {
        let identity = self.identity.read().clone();
        let Some(identity) = identity else {
            let mut todos = self.todos.write();
            if self.identity.read().is_none() {
                todos.clear();
            }
            return;
        };
        let _loading = self.loading.begin();
        *self.error.lock() = None;

        match self.service.select(&TaskScope::owner(identity.id)).await {
            Ok(rows) => {
                let fetched = rows.len();
                let rows: Vec<Task> = rows
                    .into_iter()
                    .filter(|t| t.owner_id == identity.id)
                    .collect();
                if rows.len() != fetched {
                    tracing::warn!(
                        dropped = fetched - rows.len(),
                        "select returned rows of another owner"
                    );
                }
                let count = rows.len();
                if self.patch_for(&identity, |todos| *todos = rows) {
                    tracing::debug!(user_id = %identity.id, count, "tasks loaded");
                }
            }
            Err(e) if self.current_user_is(&identity) => self.record_error("refresh", &e),
            Err(e) => tracing::debug!(
                user_id = %identity.id,
                error = %e,
                "ignoring refresh failure for previous user"
            ),
        }
    }
}

/// Shared handle to the current user's task list.
pub struct TaskStore<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for TaskStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: TaskService> TaskStore<T> {
    /// Creates a store bound to `session`.
    ///
    /// If a user is already signed in, a reload is scheduled on the current
    /// tokio runtime; [`wait_for_reload`](Self::wait_for_reload) awaits it.
    ///
    /// # Errors
    ///
    /// Returns [`TaskStoreError::SessionNotInitialized`] if `session` has not
    /// finished initializing.
    pub fn new<A: AuthService>(service: T, session: &SessionStore<A>) -> Result<Self, TaskStoreError> {
        if !session.is_initialized() {
            return Err(TaskStoreError::SessionNotInitialized);
        }
        let inner = Arc::new(Inner {
            service,
            identity: RwLock::new(None),
            todos: RwLock::new(Vec::new()),
            error: Mutex::new(None),
            loading: LoadingFlag::idle(),
            reload: Mutex::new(Reload::default()),
            session_subscription: Mutex::new(None),
        });

        let weak = Arc::downgrade(&inner);
        let subscription = session.subscribe(move |transition| {
            if let Some(inner) = weak.upgrade() {
                inner.on_identity_change(transition);
            }
        });
        *inner.session_subscription.lock() = Some(subscription);

        let user = session.user();
        let signed_in = user.is_some();
        *inner.identity.write() = user;
        if signed_in {
            inner.schedule_reload();
        }
        Ok(Self { inner })
    }

    /// Reloads the list for the current user.
    ///
    /// With nobody signed in the list is cleared without a remote call. On
    /// failure `error` is set and the list is left as it was.
    pub async fn refresh_todos(&self) {
        self.inner.refresh().await;
    }

    /// Creates a task owned by the current user and prepends it.
    ///
    /// # Errors
    ///
    /// Returns [`TaskStoreError::Unauthenticated`] with nobody signed in, or
    /// [`TaskStoreError::Remote`] if the insert fails.
    pub async fn create_todo(&self, task: NewTask) -> Result<Task, TaskStoreError> {
        let identity = self.inner.require_identity()?;
        let _loading = self.inner.loading.begin();
        *self.inner.error.lock() = None;

        let record = NewTaskRecord {
            owner_id: identity.id,
            title: task.title,
            description: task.description.unwrap_or_default(),
            priority: task.priority,
        };
        match self.inner.service.insert(&record).await {
            Ok(created) => {
                self.inner
                    .patch_for(&identity, |todos| todos.insert(0, created.clone()));
                tracing::info!(task_id = %created.id, "task created");
                Ok(created)
            }
            Err(e) => {
                self.inner.record_error("create", &e);
                Err(e.into())
            }
        }
    }

    /// Applies `patch` to one of the current user's tasks, in place.
    ///
    /// # Errors
    ///
    /// Returns [`TaskStoreError::Unauthenticated`] with nobody signed in, or
    /// [`TaskStoreError::Remote`] if the update fails.
    pub async fn update_todo(&self, id: TaskId, patch: TaskPatch) -> Result<Task, TaskStoreError> {
        let identity = self.inner.require_identity()?;
        let _loading = self.inner.loading.begin();
        *self.inner.error.lock() = None;

        match self
            .inner
            .service
            .update(&TaskScope::row(identity.id, id), &patch)
            .await
        {
            Ok(updated) => {
                self.inner.patch_for(&identity, |todos| {
                    if let Some(slot) = todos.iter_mut().find(|t| t.id == updated.id) {
                        *slot = updated.clone();
                    }
                });
                tracing::info!(task_id = %id, "task updated");
                Ok(updated)
            }
            Err(e) => {
                self.inner.record_error("update", &e);
                Err(e.into())
            }
        }
    }

    /// Deletes one of the current user's tasks.
    ///
    /// # Errors
    ///
    /// Returns [`TaskStoreError::Unauthenticated`] with nobody signed in, or
    /// [`TaskStoreError::Remote`] if the delete fails.
    pub async fn delete_todo(&self, id: TaskId) -> Result<(), TaskStoreError> {
        let identity = self.inner.require_identity()?;
        let _loading = self.inner.loading.begin();
        *self.inner.error.lock() = None;

        match self
            .inner
            .service
            .delete(&TaskScope::row(identity.id, id))
            .await
        {
            Ok(()) => {
                self.inner.patch_for(&identity, |todos| todos.retain(|t| t.id != id));
                tracing::info!(task_id = %id, "task deleted");
                Ok(())
            }
            Err(e) => {
                self.inner.record_error("delete", &e);
                Err(e.into())
            }
        }
    }

    /// Flips the completion flag of a task in the local list.
    ///
    /// Returns `Ok(None)` without a remote call if `id` is not in the list.
    ///
    /// # Errors
    ///
    /// Same as [`update_todo`](Self::update_todo).
    pub async fn toggle_todo(&self, id: TaskId) -> Result<Option<Task>, TaskStoreError> {
        let completed = self
            .inner
            .todos
            .read()
            .iter()
            .find(|t| t.id == id)
            .map(|t| t.completed);
        let Some(completed) = completed else {
            tracing::debug!(task_id = %id, "toggle of unknown task ignored");
            return Ok(None);
        };
        self.update_todo(id, TaskPatch::completed(!completed))
            .await
            .map(Some)
    }

    /// Waits until the reload scheduled by the last identity change finishes.
    pub async fn wait_for_reload(&self) {
        loop {
            let handle = self.inner.reload.lock().handle.take();
            let Some(handle) = handle else { break };
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    tracing::error!(error = %e, "task reload failed");
                }
            }
        }
    }

    /// Snapshot of the list, newest first.
    #[must_use]
    pub fn todos(&self) -> Vec<Task> {
        self.inner.todos.read().clone()
    }

    /// Looks up a task by id.
    #[must_use]
    pub fn get(&self, id: TaskId) -> Option<Task> {
        self.inner.todos.read().iter().find(|t| t.id == id).cloned()
    }

    /// Tasks passing `filter`, in list order.
    #[must_use]
    pub fn filtered(&self, filter: &TaskFilter) -> Vec<Task> {
        self.inner
            .todos
            .read()
            .iter()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect()
    }

    /// Counts over the current list.
    #[must_use]
    pub fn stats(&self) -> TaskStats {
        TaskStats::from_tasks(&self.inner.todos.read())
    }

    /// Message of the most recent failed operation, if any.
    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.inner.error.lock().clone()
    }

    /// Returns `true` while any operation is in flight.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.inner.loading.is_loading()
    }

    /// The user this store currently loads tasks for.
    #[must_use]
    pub fn identity(&self) -> Option<Identity> {
        self.inner.identity.read().clone()
    }
}
