//! In-process backend for tests and the offline demo.
//!
//! [`MemoryBackend`] implements both [`AuthService`] and [`TaskService`]
//! over shared in-memory state. Clones share the same state, so a test can
//! hand one clone to the stores and keep another to inspect call counts,
//! inject faults, or simulate session expiry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;

use taskdeck_proto::identity::{AuthChange, AuthEvent, Identity, Session, UserId};
use taskdeck_proto::task::{NewTask, Task, TaskId, TaskPatch};
use taskdeck_proto::validation::{validate_credentials, validate_new_task, validate_patch};

use super::{AuthService, NewTaskRecord, RemoteError, RemoteOp, SignUpOutcome, TaskScope, TaskService};
use crate::listeners::{Listeners, Subscription};

struct Account {
    identity: Identity,
    password: String,
    confirmed: bool,
}

#[derive(Default)]
struct State {
    accounts: HashMap<String, Account>,
    session: Option<Session>,
    /// Newest first.
    rows: Vec<Task>,
    calls: HashMap<RemoteOp, usize>,
    faults: HashMap<RemoteOp, RemoteError>,
    selected_owners: Vec<UserId>,
    next_token: u64,
    require_confirmation: bool,
    latency: Option<Duration>,
}

impl State {
    fn issue_session(&mut self, identity: Identity) -> Session {
        self.next_token += 1;
        let session = Session {
            access_token: format!("mem-{}", self.next_token),
            user: identity,
        };
        self.session = Some(session.clone());
        session
    }

    fn caller(&self) -> Result<UserId, RemoteError> {
        self.session
            .as_ref()
            .map(|s| s.user.id)
            .ok_or_else(|| RemoteError::Auth("not signed in".to_string()))
    }
}

/// Shared in-memory users, session and task rows.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<State>>,
    listeners: Listeners<AuthChange>,
}

impl MemoryBackend {
    /// Creates an empty backend; sign-ups open a session immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes sign-ups wait for [`confirm_email`](Self::confirm_email).
    #[must_use]
    pub fn with_confirmation(self) -> Self {
        self.state.lock().require_confirmation = true;
        self
    }

    /// Delays every call by `latency` before it takes effect.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state.lock().latency = latency;
    }

    /// How many times `op` has been called.
    #[must_use]
    pub fn calls(&self, op: RemoteOp) -> usize {
        self.state.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Makes the next call of `op` fail with `error`.
    pub fn fail_next(&self, op: RemoteOp, error: RemoteError) {
        self.state.lock().faults.insert(op, error);
    }

    /// Owners of every `select` call so far, in call order.
    #[must_use]
    pub fn selected_owners(&self) -> Vec<UserId> {
        self.state.lock().selected_owners.clone()
    }

    /// Number of live auth-change subscriptions.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Every stored row regardless of owner, newest first.
    #[must_use]
    pub fn rows(&self) -> Vec<Task> {
        self.state.lock().rows.clone()
    }

    /// Creates a confirmed account without opening a session.
    pub fn register(&self, email: &str, password: &str) -> Identity {
        let identity = Identity {
            id: UserId::new(),
            email: email.to_string(),
            created_at: Utc::now(),
        };
        self.state.lock().accounts.insert(
            email.to_string(),
            Account {
                identity: identity.clone(),
                password: password.to_string(),
                confirmed: true,
            },
        );
        identity
    }

    /// Simulates a session persisted by an earlier run: registers `email`
    /// if needed and makes it current without notifying subscribers.
    pub fn seed_session(&self, email: &str) -> Session {
        let existing = self
            .state
            .lock()
            .accounts
            .get(email)
            .map(|a| a.identity.clone());
        let identity = existing.unwrap_or_else(|| self.register(email, "seeded-password"));
        self.state.lock().issue_session(identity)
    }

    /// Confirms a pending account. Returns `false` for unknown emails.
    pub fn confirm_email(&self, email: &str) -> bool {
        self.state
            .lock()
            .accounts
            .get_mut(email)
            .map(|a| a.confirmed = true)
            .is_some()
    }

    /// Stores `task` as-is, bypassing validation and the access policy.
    pub fn insert_row(&self, task: Task) {
        self.state.lock().rows.insert(0, task);
    }

    /// Ends the current session as if it expired remotely.
    pub fn expire_session(&self) {
        let had_session = self.state.lock().session.take().is_some();
        if had_session {
            tracing::debug!("memory backend session expired");
            self.listeners
                .emit(&AuthChange::new(AuthEvent::SignedOut, None));
        }
    }

    /// Rotates the access token of the current session.
    pub fn refresh_session(&self) {
        let refreshed = {
            let mut state = self.state.lock();
            let current = state.session.as_ref().map(|s| s.user.clone());
            current.map(|identity| state.issue_session(identity))
        };
        if let Some(session) = refreshed {
            self.listeners
                .emit(&AuthChange::new(AuthEvent::TokenRefreshed, Some(session)));
        }
    }

    /// Changes the email of the signed-in account.
    pub fn update_email(&self, email: &str) {
        let updated = {
            let mut state = self.state.lock();
            let Some(mut session) = state.session.clone() else {
                return;
            };
            let old_email = session.user.email.clone();
            session.user.email = email.to_string();
            if let Some(mut account) = state.accounts.remove(&old_email) {
                account.identity.email = email.to_string();
                state.accounts.insert(email.to_string(), account);
            }
            state.session = Some(session.clone());
            session
        };
        self.listeners
            .emit(&AuthChange::new(AuthEvent::UserUpdated, Some(updated)));
    }

    /// Counts the call, applies latency, then consumes an injected fault.
    async fn enter(&self, op: RemoteOp) -> Result<(), RemoteError> {
        let latency = {
            let mut state = self.state.lock();
            *state.calls.entry(op).or_insert(0) += 1;
            state.latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        match self.state.lock().faults.remove(&op) {
            Some(error) => {
                tracing::debug!(%op, %error, "memory backend injected fault");
                Err(error)
            }
            None => Ok(()),
        }
    }

    /// Like [`enter`](Self::enter), for calls made on behalf of the signed-in
    /// user. The caller is fixed when the call is issued, as a request
    /// carries its token.
    async fn enter_as_caller(&self, op: RemoteOp) -> Result<UserId, RemoteError> {
        let caller = self.state.lock().caller();
        self.enter(op).await?;
        caller
    }
}

impl AuthService for MemoryBackend {
    async fn current_session(&self) -> Result<Option<Session>, RemoteError> {
        self.enter(RemoteOp::CurrentSession).await?;
        Ok(self.state.lock().session.clone())
    }

    fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&AuthChange) + Send + Sync + 'static,
    {
        let session = self.state.lock().session.clone();
        callback(&AuthChange::new(AuthEvent::InitialSession, session));
        self.listeners.subscribe(callback)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome, RemoteError> {
        self.enter(RemoteOp::SignUp).await?;
        if let Some(error) = validate_credentials(email, password).iter().next() {
            return Err(RemoteError::Rejected(error.to_string()));
        }

        let started = {
            let mut state = self.state.lock();
            if state.accounts.contains_key(email) {
                return Err(RemoteError::Auth("User already registered".to_string()));
            }
            let identity = Identity {
                id: UserId::new(),
                email: email.to_string(),
                created_at: Utc::now(),
            };
            let confirmed = !state.require_confirmation;
            state.accounts.insert(
                email.to_string(),
                Account {
                    identity: identity.clone(),
                    password: password.to_string(),
                    confirmed,
                },
            );
            confirmed.then(|| state.issue_session(identity))
        };

        match started {
            Some(session) => {
                self.listeners
                    .emit(&AuthChange::new(AuthEvent::SignedIn, Some(session)));
                Ok(SignUpOutcome::SessionStarted)
            }
            None => Ok(SignUpOutcome::ConfirmationRequired),
        }
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, RemoteError> {
        self.enter(RemoteOp::SignIn).await?;
        let session = {
            let mut state = self.state.lock();
            let identity = match state.accounts.get(email) {
                Some(account) if account.password == password => {
                    if !account.confirmed {
                        return Err(RemoteError::Auth("Email not confirmed".to_string()));
                    }
                    account.identity.clone()
                }
                _ => return Err(RemoteError::Auth("Invalid login credentials".to_string())),
            };
            state.issue_session(identity)
        };
        self.listeners
            .emit(&AuthChange::new(AuthEvent::SignedIn, Some(session.clone())));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), RemoteError> {
        let result = self.enter(RemoteOp::SignOut).await;
        // The local session ends even when the remote revoke fails.
        self.state.lock().session = None;
        self.listeners
            .emit(&AuthChange::new(AuthEvent::SignedOut, None));
        result
    }
}

impl TaskService for MemoryBackend {
    async fn select(&self, scope: &TaskScope) -> Result<Vec<Task>, RemoteError> {
        self.state.lock().selected_owners.push(scope.owner_id);
        let caller = self.enter_as_caller(RemoteOp::Select).await?;
        let state = self.state.lock();
        let mut rows: Vec<Task> = state
            .rows
            .iter()
            .filter(|t| t.owner_id == caller && scope.contains(t))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn insert(&self, record: &NewTaskRecord) -> Result<Task, RemoteError> {
        let caller = self.enter_as_caller(RemoteOp::Insert).await?;
        let draft = NewTask {
            title: record.title.clone(),
            description: Some(record.description.clone()),
            priority: record.priority,
        };
        let clean = validate_new_task(&draft).map_err(|e| RemoteError::Rejected(e.to_string()))?;

        let mut state = self.state.lock();
        if caller != record.owner_id {
            return Err(RemoteError::Rejected(
                "new row violates row-level security policy".to_string(),
            ));
        }
        let now = Utc::now();
        let task = Task {
            id: TaskId::new(),
            owner_id: caller,
            title: clean.title,
            description: clean.description.unwrap_or_default(),
            priority: clean.priority,
            completed: false,
            created_at: now,
            updated_at: now,
        };
        state.rows.insert(0, task.clone());
        Ok(task)
    }

    async fn update(&self, scope: &TaskScope, patch: &TaskPatch) -> Result<Task, RemoteError> {
        let caller = self.enter_as_caller(RemoteOp::Update).await?;
        let task_id = scope.require_row()?;
        let patch = validate_patch(patch).map_err(|e| RemoteError::Rejected(e.to_string()))?;

        let mut state = self.state.lock();
        let row = state
            .rows
            .iter_mut()
            .find(|t| t.owner_id == caller && scope.contains(t))
            .ok_or_else(|| RemoteError::NotFound(format!("task {task_id}")))?;
        patch.apply_to(row, Utc::now());
        Ok(row.clone())
    }

    async fn delete(&self, scope: &TaskScope) -> Result<(), RemoteError> {
        let caller = self.enter_as_caller(RemoteOp::Delete).await?;
        let task_id = scope.require_row()?;

        let mut state = self.state.lock();
        let before = state.rows.len();
        state
            .rows
            .retain(|t| !(t.owner_id == caller && scope.contains(t)));
        if state.rows.len() == before {
            return Err(RemoteError::NotFound(format!("task {task_id}")));
        }
        Ok(())
    }
}
