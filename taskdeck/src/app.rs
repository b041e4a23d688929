//! Line-oriented front end over the session and task stores.
//!
//! [`Command::parse`] turns one input line into a command; [`App::execute`]
//! validates its arguments, calls the stores and renders the outcome as
//! text lines. Form validation always runs before a store is touched.

use std::fmt::Write as _;

use taskdeck_proto::task::{
    Completion, NewTask, ParseViewError, Priority, Task, TaskFilter, TaskId, TaskPatch, TaskStats,
};
use taskdeck_proto::validation::{
    FormErrors, ValidationError, validate_credentials, validate_new_task, validate_patch,
};

use crate::remote::{AuthService, SignUpOutcome, TaskService};
use crate::session::{SessionError, SessionStore};
use crate::tasks::{TaskStore, TaskStoreError};

/// Trailing characters of a task id shown in listings. The leading
/// characters of a v7 id are a timestamp and collide for tasks created
/// together.
const SHORT_ID_LEN: usize = 8;

const HELP: &[&str] = &[
    "signup <email> <password>        create an account",
    "signin <email> <password>        sign in",
    "signout                          sign out",
    "whoami                           show the signed-in user",
    "list [all|pending|completed] [low|medium|high]",
    "add [priority] <title> [-- description]",
    "edit <id> title=.. description=.. priority=.. completed=true|false",
    "toggle <id>                      flip completion",
    "delete <id>                      delete a task",
    "refresh                          reload tasks from the backend",
    "stats                            show counts",
    "help                             show this help",
    "quit                             exit",
];

/// Errors reported to the user for one command.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Wrong arguments for a known command.
    #[error("usage: {0}")]
    Usage(&'static str),
    /// Not a known command.
    #[error("unknown command: {0} (try `help`)")]
    UnknownCommand(String),
    /// A filter, priority or id could not be parsed.
    #[error(transparent)]
    Parse(#[from] ParseViewError),
    /// `edit` named a field that does not exist.
    #[error("unknown field: {0} (expected title, description, priority or completed)")]
    UnknownField(String),
    /// No task id ends with the given text.
    #[error("no task matches id {0}")]
    UnknownId(String),
    /// Several task ids end with the given text.
    #[error("id {0} matches more than one task")]
    AmbiguousId(String),
    /// A store was used before [`App::start`].
    #[error("{0} store is not initialized")]
    NotInitialized(&'static str),
    /// A task field failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The sign-in/sign-up form failed validation.
    #[error("{}", render_form_errors(.0))]
    Form(FormErrors),
    /// The auth service refused the request.
    #[error(transparent)]
    Session(#[from] SessionError),
    /// The task store refused the request.
    #[error(transparent)]
    Tasks(#[from] TaskStoreError),
}

fn render_form_errors(errors: &FormErrors) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// One parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create an account.
    SignUp {
        /// Account email.
        email: String,
        /// Account password.
        password: String,
    },
    /// Sign in.
    SignIn {
        /// Account email.
        email: String,
        /// Account password.
        password: String,
    },
    /// Sign out.
    SignOut,
    /// Show the signed-in user.
    WhoAmI,
    /// List tasks, optionally filtered.
    List {
        /// Filter to apply; the configured default when `None`.
        filter: Option<TaskFilter>,
    },
    /// Create a task.
    Add(NewTask),
    /// Patch a task.
    Edit {
        /// Task id or unique suffix.
        id: String,
        /// Fields to change.
        patch: TaskPatch,
    },
    /// Flip a task's completion.
    Toggle {
        /// Task id or unique suffix.
        id: String,
    },
    /// Delete a task.
    Delete {
        /// Task id or unique suffix.
        id: String,
    },
    /// Reload tasks from the backend.
    Refresh,
    /// Show counts.
    Stats,
    /// Show help.
    Help,
    /// Exit.
    Quit,
}

impl Command {
    /// Parses one line. Blank lines yield `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError`] for unknown commands or malformed arguments.
    pub fn parse(line: &str) -> Result<Option<Self>, AppError> {
        let line = line.trim();
        let (name, rest) = line
            .split_once(char::is_whitespace)
            .map_or((line, ""), |(n, r)| (n, r.trim()));
        let args: Vec<&str> = rest.split_whitespace().collect();

        let command = match name.to_ascii_lowercase().as_str() {
            "" => return Ok(None),
            "signup" | "signin" => {
                let [email, password] = args[..] else {
                    return Err(AppError::Usage("signup|signin <email> <password>"));
                };
                let (email, password) = (email.to_string(), password.to_string());
                if name.eq_ignore_ascii_case("signup") {
                    Self::SignUp { email, password }
                } else {
                    Self::SignIn { email, password }
                }
            }
            "signout" => Self::SignOut,
            "whoami" => Self::WhoAmI,
            "list" | "ls" => Self::List {
                filter: parse_filter(&args)?,
            },
            "add" => Self::Add(parse_add(rest)?),
            "edit" => {
                let Some((id, fields)) = rest.split_once(char::is_whitespace) else {
                    return Err(AppError::Usage("edit <id> field=value..."));
                };
                Self::Edit {
                    id: id.to_string(),
                    patch: parse_patch(fields)?,
                }
            }
            "toggle" | "done" => Self::Toggle {
                id: single_id(&args, "toggle <id>")?,
            },
            "delete" | "rm" => Self::Delete {
                id: single_id(&args, "delete <id>")?,
            },
            "refresh" => Self::Refresh,
            "stats" => Self::Stats,
            "help" | "?" => Self::Help,
            "quit" | "exit" => Self::Quit,
            other => return Err(AppError::UnknownCommand(other.to_string())),
        };
        Ok(Some(command))
    }
}

fn single_id(args: &[&str], usage: &'static str) -> Result<String, AppError> {
    match args {
        [id] => Ok((*id).to_string()),
        _ => Err(AppError::Usage(usage)),
    }
}

fn parse_filter(args: &[&str]) -> Result<Option<TaskFilter>, AppError> {
    if args.is_empty() {
        return Ok(None);
    }
    let mut filter = TaskFilter::all();
    for arg in args {
        if let Ok(priority) = arg.parse::<Priority>() {
            filter = filter.with_priority(priority);
        } else {
            filter.completion = arg.parse::<Completion>()?;
        }
    }
    Ok(Some(filter))
}

fn parse_add(rest: &str) -> Result<NewTask, AppError> {
    if rest.trim().is_empty() {
        return Err(AppError::Usage("add [priority] <title> [-- description]"));
    }
    let (head, description) = match rest.split_once("--") {
        Some((head, desc)) => (head.trim(), Some(desc.trim().to_string())),
        None => (rest.trim(), None),
    };
    let (first, remainder) = head
        .split_once(char::is_whitespace)
        .map_or((head, ""), |(f, r)| (f, r.trim()));
    let (priority, title) = match first.parse::<Priority>() {
        Ok(priority) => (priority, remainder),
        Err(_) => (Priority::default(), head),
    };
    Ok(NewTask {
        title: title.to_string(),
        description,
        priority,
    })
}

fn parse_patch(fields: &str) -> Result<TaskPatch, AppError> {
    let mut pairs: Vec<(String, String)> = Vec::new();
    for token in fields.split_whitespace() {
        match token.split_once('=') {
            Some((key, value)) => pairs.push((key.to_ascii_lowercase(), value.to_string())),
            None => match pairs.last_mut() {
                // Unquoted values may span several words.
                Some((_, value)) => {
                    value.push(' ');
                    value.push_str(token);
                }
                None => return Err(AppError::Usage("edit <id> field=value...")),
            },
        }
    }

    let mut patch = TaskPatch::default();
    for (key, value) in pairs {
        match key.as_str() {
            "title" => patch.title = Some(value),
            "description" | "desc" => patch.description = Some(value),
            "priority" => patch.priority = Some(value.parse()?),
            "completed" | "done" => {
                patch.completed = Some(match value.to_ascii_lowercase().as_str() {
                    "true" | "yes" | "1" => true,
                    "false" | "no" | "0" => false,
                    _ => return Err(AppError::Usage("completed=true|false")),
                });
            }
            _ => return Err(AppError::UnknownField(key)),
        }
    }
    if patch.is_empty() {
        return Err(AppError::Usage("edit <id> field=value..."));
    }
    Ok(patch)
}

/// Outcome of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Text to show the user.
    Lines(Vec<String>),
    /// The user asked to exit.
    Quit,
}

impl Reply {
    fn line(text: impl Into<String>) -> Self {
        Self::Lines(vec![text.into()])
    }
}

/// The front end: both stores plus display settings.
pub struct App<A, T> {
    session: SessionStore<A>,
    tasks: Option<TaskStore<T>>,
    task_service: Option<T>,
    default_filter: TaskFilter,
}

impl<A: AuthService, T: TaskService> App<A, T> {
    /// Builds the stores; call [`start`](Self::start) before executing commands.
    pub fn new(auth: A, task_service: T) -> Self {
        Self {
            session: SessionStore::new(auth),
            tasks: None,
            task_service: Some(task_service),
            default_filter: TaskFilter::all(),
        }
    }

    /// Sets the filter used by a bare `list`.
    #[must_use]
    pub fn with_default_filter(mut self, filter: TaskFilter) -> Self {
        self.default_filter = filter;
        self
    }

    /// Initializes the session store, then creates the task store bound to it.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Tasks`] if the task store cannot be created.
    pub async fn start(&mut self) -> Result<(), AppError> {
        self.session.initialize().await;
        if let Some(service) = self.task_service.take() {
            let tasks = TaskStore::new(service, &self.session)?;
            tasks.wait_for_reload().await;
            self.tasks = Some(tasks);
        }
        Ok(())
    }

    /// The session store, once initialized.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotInitialized`] before [`start`](Self::start).
    pub fn session(&self) -> Result<&SessionStore<A>, AppError> {
        if self.session.is_initialized() {
            Ok(&self.session)
        } else {
            Err(AppError::NotInitialized("session"))
        }
    }

    /// The task store, once created.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotInitialized`] before [`start`](Self::start).
    pub fn tasks(&self) -> Result<&TaskStore<T>, AppError> {
        self.tasks.as_ref().ok_or(AppError::NotInitialized("task"))
    }

    /// Parses and executes one line, rendering errors as text.
    pub async fn handle_line(&self, line: &str) -> Reply {
        let result = match Command::parse(line) {
            Ok(Some(command)) => self.execute(command).await,
            Ok(None) => Ok(Reply::Lines(Vec::new())),
            Err(e) => Err(e),
        };
        result.unwrap_or_else(|e| {
            tracing::debug!(error = %e, line, "command failed");
            Reply::line(format!("error: {e}"))
        })
    }

    /// Executes one command.
    ///
    /// # Errors
    ///
    /// Returns [`AppError`] on validation failure or when a store refuses.
    pub async fn execute(&self, command: Command) -> Result<Reply, AppError> {
        match command {
            Command::SignUp { email, password } => {
                check_form(&email, &password)?;
                let outcome = self.session()?.sign_up(&email, &password).await?;
                self.tasks()?.wait_for_reload().await;
                Ok(Reply::line(match outcome {
                    SignUpOutcome::SessionStarted => format!("Signed up and signed in as {email}"),
                    SignUpOutcome::ConfirmationRequired => {
                        format!("Check {email} to confirm your account, then sign in")
                    }
                }))
            }
            Command::SignIn { email, password } => {
                check_form(&email, &password)?;
                self.session()?.sign_in(&email, &password).await?;
                let tasks = self.tasks()?;
                tasks.wait_for_reload().await;
                Ok(Reply::line(format!(
                    "Signed in as {email} ({} tasks)",
                    tasks.todos().len()
                )))
            }
            Command::SignOut => {
                self.session()?.sign_out().await;
                Ok(Reply::line("Signed out"))
            }
            Command::WhoAmI => Ok(Reply::line(match self.session()?.user() {
                Some(user) => format!("Signed in as {} ({})", user.email, user.id),
                None => "Not signed in".to_string(),
            })),
            Command::List { filter } => {
                let filter = filter.unwrap_or(self.default_filter);
                let tasks = self.tasks()?.filtered(&filter);
                if tasks.is_empty() {
                    return Ok(Reply::line("No tasks"));
                }
                Ok(Reply::Lines(tasks.iter().map(render_task).collect()))
            }
            Command::Add(draft) => {
                let draft = validate_new_task(&draft)?;
                let task = self.tasks()?.create_todo(draft).await?;
                Ok(Reply::line(format!("Added {}", render_task(&task))))
            }
            Command::Edit { id, patch } => {
                let patch = validate_patch(&patch)?;
                let id = self.resolve_id(&id)?;
                let task = self.tasks()?.update_todo(id, patch).await?;
                Ok(Reply::line(format!("Updated {}", render_task(&task))))
            }
            Command::Toggle { id } => {
                let id = self.resolve_id(&id)?;
                Ok(Reply::line(match self.tasks()?.toggle_todo(id).await? {
                    Some(task) if task.completed => format!("Completed {}", render_task(&task)),
                    Some(task) => format!("Reopened {}", render_task(&task)),
                    None => "Nothing to toggle".to_string(),
                }))
            }
            Command::Delete { id } => {
                let id = self.resolve_id(&id)?;
                self.tasks()?.delete_todo(id).await?;
                Ok(Reply::line(format!("Deleted {}", short_id(id))))
            }
            Command::Refresh => {
                let tasks = self.tasks()?;
                tasks.refresh_todos().await;
                Ok(Reply::line(match tasks.error() {
                    Some(error) => format!("Refresh failed: {error}"),
                    None => format!("Loaded {} tasks", tasks.todos().len()),
                }))
            }
            Command::Stats => Ok(Reply::Lines(render_stats(&self.tasks()?.stats()))),
            Command::Help => Ok(Reply::Lines(HELP.iter().map(ToString::to_string).collect())),
            Command::Quit => Ok(Reply::Quit),
        }
    }

    /// Resolves a full id or a unique suffix against the loaded list.
    fn resolve_id(&self, prefix: &str) -> Result<TaskId, AppError> {
        let tasks = self.tasks()?;
        if let Ok(id) = prefix.parse::<TaskId>() {
            return Ok(id);
        }
        let needle = prefix.to_ascii_lowercase();
        let mut matches = tasks
            .todos()
            .into_iter()
            .filter(|t| t.id.to_string().ends_with(&needle));
        match (matches.next(), matches.next()) {
            (Some(task), None) => Ok(task.id),
            (None, _) => Err(AppError::UnknownId(prefix.to_string())),
            (Some(_), Some(_)) => Err(AppError::AmbiguousId(prefix.to_string())),
        }
    }
}

fn check_form(email: &str, password: &str) -> Result<(), AppError> {
    let errors = validate_credentials(email, password);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(AppError::Form(errors))
    }
}

fn short_id(id: TaskId) -> String {
    let full = id.to_string();
    full[full.len() - SHORT_ID_LEN..].to_string()
}

/// One listing line: short id, checkbox, priority, title and description.
#[must_use]
pub fn render_task(task: &Task) -> String {
    let mut line = format!(
        "{} [{}] {:<6} {}",
        short_id(task.id),
        if task.completed { 'x' } else { ' ' },
        task.priority.to_string(),
        task.title
    );
    if !task.description.is_empty() {
        let _ = write!(line, " - {}", task.description);
    }
    line
}

fn render_stats(stats: &TaskStats) -> Vec<String> {
    let by = stats.pending_by_priority;
    vec![
        format!(
            "{} tasks: {} completed, {} pending ({}% done)",
            stats.total,
            stats.completed,
            stats.pending,
            stats.completion_percent()
        ),
        format!(
            "pending by priority: high {}, medium {}, low {}",
            by.high, by.medium, by.low
        ),
    ]
}
