//! In-memory account and task tables with per-row ownership enforcement.
//!
//! The [`BackendStore`] plays the hosted service: it registers accounts,
//! issues opaque bearer tokens, and serves the task table. Every task
//! operation resolves the caller from its token and only ever touches rows
//! whose `owner_id` is that caller.

use std::collections::HashMap;
use std::fmt::Write as _;

use chrono::Utc;
use rand::Rng;
use sha2::{Digest, Sha256};
use taskdeck_proto::backend::{BackendFailure, FailureKind};
use taskdeck_proto::identity::{Identity, Session, UserId};
use taskdeck_proto::task::{NewTask, Task, TaskId, TaskPatch};
use taskdeck_proto::validation::{validate_credentials, validate_new_task, validate_patch};
use tokio::sync::RwLock;

/// Bytes of randomness in an access token.
const TOKEN_BYTES: usize = 32;

/// Bytes of salt mixed into each password hash.
const SALT_BYTES: usize = 16;

/// Errors returned by store operations. Each maps onto a wire
/// [`FailureKind`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// Missing, unknown or revoked token, or bad credentials.
    #[error("{0}")]
    Auth(String),
    /// No row the caller may see has that id.
    #[error("{0}")]
    NotFound(String),
    /// The payload failed validation or the ownership policy.
    #[error("{0}")]
    Rejected(String),
}

impl From<BackendError> for BackendFailure {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::Auth(msg) => Self::new(FailureKind::Auth, msg),
            BackendError::NotFound(msg) => Self::new(FailureKind::NotFound, msg),
            BackendError::Rejected(msg) => Self::new(FailureKind::Rejected, msg),
        }
    }
}

struct Account {
    identity: Identity,
    salt: [u8; SALT_BYTES],
    password_hash: Vec<u8>,
    confirmed: bool,
}

#[derive(Default)]
struct Tables {
    /// Keyed by email.
    accounts: HashMap<String, Account>,
    /// Live access tokens.
    tokens: HashMap<String, UserId>,
    /// Newest first.
    tasks: Vec<Task>,
}

impl Tables {
    fn caller(&self, token: Option<&str>) -> Result<UserId, BackendError> {
        let token = token.ok_or_else(|| BackendError::Auth("not signed in".to_string()))?;
        self.tokens
            .get(token)
            .copied()
            .ok_or_else(|| BackendError::Auth("invalid or expired token".to_string()))
    }

    fn identity(&self, id: UserId) -> Option<&Identity> {
        self.accounts
            .values()
            .map(|a| &a.identity)
            .find(|identity| identity.id == id)
    }

    fn issue_session(&mut self, identity: Identity) -> Session {
        let access_token = random_hex::<TOKEN_BYTES>();
        self.tokens.insert(access_token.clone(), identity.id);
        Session {
            access_token,
            user: identity,
        }
    }
}

/// The backend's account and task tables.
///
/// Thread-safe via [`RwLock`]; shared by every connection.
pub struct BackendStore {
    tables: RwLock<Tables>,
    require_confirmation: bool,
}

impl Default for BackendStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendStore {
    /// Creates an empty store where sign-up signs the user in immediately.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            require_confirmation: false,
        }
    }

    /// Creates an empty store where new accounts must confirm their email
    /// before signing in.
    #[must_use]
    pub fn with_confirmation() -> Self {
        Self {
            require_confirmation: true,
            ..Self::new()
        }
    }

    /// Registers an account. Returns a session unless confirmation is required.
    ///
    /// # Errors
    ///
    /// [`BackendError::Rejected`] for malformed credentials,
    /// [`BackendError::Auth`] if the email is taken.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<Session>, BackendError> {
        if let Some(error) = validate_credentials(email, password).iter().next() {
            return Err(BackendError::Rejected(error.to_string()));
        }

        let mut tables = self.tables.write().await;
        if tables.accounts.contains_key(email) {
            return Err(BackendError::Auth("User already registered".to_string()));
        }
        let identity = Identity {
            id: UserId::new(),
            email: email.to_string(),
            created_at: Utc::now(),
        };
        let salt: [u8; SALT_BYTES] = rand::rng().random();
        let confirmed = !self.require_confirmation;
        tables.accounts.insert(
            email.to_string(),
            Account {
                identity: identity.clone(),
                salt,
                password_hash: hash_password(&salt, password),
                confirmed,
            },
        );
        tracing::info!(user_id = %identity.id, confirmed, "account registered");
        Ok(confirmed.then(|| tables.issue_session(identity)))
    }

    /// Exchanges credentials for a new session.
    ///
    /// # Errors
    ///
    /// [`BackendError::Auth`] for unknown email, wrong password or an
    /// unconfirmed account.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, BackendError> {
        let mut tables = self.tables.write().await;
        let identity = match tables.accounts.get(email) {
            Some(account) if hash_password(&account.salt, password) == account.password_hash => {
                if !account.confirmed {
                    return Err(BackendError::Auth("Email not confirmed".to_string()));
                }
                account.identity.clone()
            }
            _ => return Err(BackendError::Auth("Invalid login credentials".to_string())),
        };
        tracing::info!(user_id = %identity.id, "signed in");
        Ok(tables.issue_session(identity))
    }

    /// Revokes a token. Unknown tokens are ignored.
    pub async fn sign_out(&self, token: Option<&str>) {
        let Some(token) = token else { return };
        if let Some(user_id) = self.tables.write().await.tokens.remove(token) {
            tracing::info!(user_id = %user_id, "signed out");
        }
    }

    /// Marks an account confirmed. Returns `false` if no such account.
    pub async fn confirm_email(&self, email: &str) -> bool {
        let mut tables = self.tables.write().await;
        tables
            .accounts
            .get_mut(email)
            .map(|account| account.confirmed = true)
            .is_some()
    }

    /// Resolves a token to the account it authenticates.
    ///
    /// # Errors
    ///
    /// [`BackendError::Auth`] if the token is missing, unknown or revoked.
    pub async fn user(&self, token: Option<&str>) -> Result<Identity, BackendError> {
        let tables = self.tables.read().await;
        let id = tables.caller(token)?;
        tables
            .identity(id)
            .cloned()
            .ok_or_else(|| BackendError::Auth("account no longer exists".to_string()))
    }

    /// The caller's rows matching `owner_id`, newest first.
    ///
    /// Rows of other owners are never returned, whatever `owner_id` asks for.
    ///
    /// # Errors
    ///
    /// [`BackendError::Auth`] if the token does not resolve.
    pub async fn select(
        &self,
        token: Option<&str>,
        owner_id: UserId,
    ) -> Result<Vec<Task>, BackendError> {
        let tables = self.tables.read().await;
        let caller = tables.caller(token)?;
        let mut rows: Vec<Task> = tables
            .tasks
            .iter()
            .filter(|t| t.owner_id == caller && t.owner_id == owner_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    /// Inserts a row owned by `owner_id`.
    ///
    /// # Errors
    ///
    /// [`BackendError::Auth`] if the token does not resolve,
    /// [`BackendError::Rejected`] if the payload is invalid or `owner_id`
    /// is not the caller.
    pub async fn insert(
        &self,
        token: Option<&str>,
        owner_id: UserId,
        task: &NewTask,
    ) -> Result<Task, BackendError> {
        let clean = validate_new_task(task).map_err(|e| BackendError::Rejected(e.to_string()))?;

        let mut tables = self.tables.write().await;
        let caller = tables.caller(token)?;
        if caller != owner_id {
            tracing::warn!(caller = %caller, owner_id = %owner_id, "insert for foreign owner refused");
            return Err(BackendError::Rejected(
                "new row violates row-level security policy".to_string(),
            ));
        }
        let now = Utc::now();
        let row = Task {
            id: TaskId::new(),
            owner_id: caller,
            title: clean.title,
            description: clean.description.unwrap_or_default(),
            priority: clean.priority,
            completed: false,
            created_at: now,
            updated_at: now,
        };
        tables.tasks.insert(0, row.clone());
        Ok(row)
    }

    /// Applies `patch` to the caller's row `task_id`.
    ///
    /// # Errors
    ///
    /// [`BackendError::Auth`] if the token does not resolve,
    /// [`BackendError::Rejected`] for an invalid patch,
    /// [`BackendError::NotFound`] if the caller owns no such row.
    pub async fn update(
        &self,
        token: Option<&str>,
        owner_id: UserId,
        task_id: TaskId,
        patch: &TaskPatch,
    ) -> Result<Task, BackendError> {
        let patch = validate_patch(patch).map_err(|e| BackendError::Rejected(e.to_string()))?;

        let mut tables = self.tables.write().await;
        let caller = tables.caller(token)?;
        let row = tables
            .tasks
            .iter_mut()
            .find(|t| t.id == task_id && t.owner_id == caller && t.owner_id == owner_id)
            .ok_or_else(|| BackendError::NotFound(format!("task {task_id}")))?;
        patch.apply_to(row, Utc::now());
        Ok(row.clone())
    }

    /// Deletes the caller's row `task_id`.
    ///
    /// # Errors
    ///
    /// [`BackendError::Auth`] if the token does not resolve,
    /// [`BackendError::NotFound`] if the caller owns no such row.
    pub async fn delete(
        &self,
        token: Option<&str>,
        owner_id: UserId,
        task_id: TaskId,
    ) -> Result<(), BackendError> {
        let mut tables = self.tables.write().await;
        let caller = tables.caller(token)?;
        let before = tables.tasks.len();
        tables
            .tasks
            .retain(|t| !(t.id == task_id && t.owner_id == caller && t.owner_id == owner_id));
        if tables.tasks.len() == before {
            return Err(BackendError::NotFound(format!("task {task_id}")));
        }
        Ok(())
    }

    /// Number of registered accounts.
    pub async fn account_count(&self) -> usize {
        self.tables.read().await.accounts.len()
    }

    /// Number of rows across all owners.
    pub async fn task_count(&self) -> usize {
        self.tables.read().await.tasks.len()
    }
}

fn hash_password(salt: &[u8], password: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hasher.finalize().to_vec()
}

fn random_hex<const N: usize>() -> String {
    let bytes: [u8; N] = rand::rng().random();
    let mut output = String::with_capacity(N * 2);
    for byte in bytes {
        let _ = write!(output, "{byte:02x}");
    }
    output
}
