//! Task records, the create/patch payloads, and the derived list views.
//!
//! A [`Task`] belongs to exactly one user (`owner_id`). The client keeps
//! tasks newest-first; the filter and statistics helpers here are pure
//! functions over that list.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identity::UserId;

/// Maximum allowed task title length in characters.
pub const MAX_TASK_TITLE_LENGTH: usize = 200;

/// Maximum allowed task description length in characters.
pub const MAX_TASK_DESCRIPTION_LENGTH: usize = 500;

/// Unique identifier for a task, based on UUID v7 for time-ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Creates a new time-ordered task identifier (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `TaskId` from an existing UUID.
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

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = ParseViewError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| ParseViewError::TaskId(s.to_string()))
    }
}

/// Error returned when a textual view parameter cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseViewError {
    /// Not one of `low`, `medium`, `high`.
    #[error("unknown priority: {0} (expected low, medium or high)")]
    Priority(String),
    /// Not one of `all`, `pending`, `completed`.
    #[error("unknown completion filter: {0} (expected all, pending or completed)")]
    Completion(String),
    /// Not a valid task identifier.
    #[error("invalid task id: {0}")]
    TaskId(String),
}

/// Task priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Can wait.
    Low,
    /// The default for new tasks.
    #[default]
    Medium,
    /// Needs attention first.
    High,
}

impl Priority {
    /// All priorities, highest first.
    pub const ALL: [Self; 3] = [Self::High, Self::Medium, Self::Low];
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

impl FromStr for Priority {
    type Err = ParseViewError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(ParseViewError::Priority(s.to_string())),
        }
    }
}

/// A stored task record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier.
    pub id: TaskId,
    /// The user this task belongs to.
    pub owner_id: UserId,
    /// Short title, non-empty, at most [`MAX_TASK_TITLE_LENGTH`] characters.
    pub title: String,
    /// Free-form details, possibly empty, at most
    /// [`MAX_TASK_DESCRIPTION_LENGTH`] characters.
    pub description: String,
    /// Task priority.
    pub priority: Priority,
    /// Whether the task is done.
    pub completed: bool,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
    /// When the task was last modified.
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied by the user when creating a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
    /// Task title.
    pub title: String,
    /// Optional description; stored as an empty string when absent.
    pub description: Option<String>,
    /// Task priority.
    pub priority: Priority,
}

impl NewTask {
    /// Creates a payload with no description.
    pub fn new(title: impl Into<String>, priority: Priority) -> Self {
        Self {
            title: title.into(),
            description: None,
            priority,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPatch {
    /// New title.
    pub title: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New priority.
    pub priority: Option<Priority>,
    /// New completion state.
    pub completed: Option<bool>,
}

impl TaskPatch {
    /// A patch that only sets the completion flag.
    #[must_use]
    pub const fn completed(completed: bool) -> Self {
        Self {
            title: None,
            description: None,
            priority: None,
            completed: Some(completed),
        }
    }

    /// Returns `true` if no field is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.priority.is_none()
            && self.completed.is_none()
    }

    /// Applies the set fields to `task` and stamps `updated_at`.
    pub fn apply_to(&self, task: &mut Task, now: DateTime<Utc>) {
        if let Some(title) = &self.title {
            task.title.clone_from(title);
        }
        if let Some(description) = &self.description {
            task.description.clone_from(description);
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(completed) = self.completed {
            task.completed = completed;
        }
        task.updated_at = now;
    }
}

/// Which completion states a view shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Completion {
    /// Every task.
    #[default]
    All,
    /// Only tasks still to do.
    Pending,
    /// Only finished tasks.
    Completed,
}

impl std::fmt::Display for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Pending => write!(f, "pending"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

impl FromStr for Completion {
    type Err = ParseViewError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "pending" | "todo" => Ok(Self::Pending),
            "completed" | "done" => Ok(Self::Completed),
            _ => Err(ParseViewError::Completion(s.to_string())),
        }
    }
}

/// A filter over a task list by completion state and priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TaskFilter {
    /// Completion states to keep.
    pub completion: Completion,
    /// Keep only this priority, if set.
    pub priority: Option<Priority>,
}

impl TaskFilter {
    /// Filter that keeps every task.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            completion: Completion::All,
            priority: None,
        }
    }

    /// Filter on completion state only.
    #[must_use]
    pub const fn completion(completion: Completion) -> Self {
        Self {
            completion,
            priority: None,
        }
    }

    /// Narrows the filter to one priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Returns `true` if `task` passes the filter.
    #[must_use]
    pub fn matches(&self, task: &Task) -> bool {
        let completion_ok = match self.completion {
            Completion::All => true,
            Completion::Pending => !task.completed,
            Completion::Completed => task.completed,
        };
        completion_ok && self.priority.is_none_or(|p| p == task.priority)
    }

    /// Returns the matching tasks, preserving list order.
    #[must_use]
    pub fn apply<'a>(&self, tasks: &'a [Task]) -> Vec<&'a Task> {
        tasks.iter().filter(|t| self.matches(t)).collect()
    }
}

/// Pending-task counts per priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PriorityCounts {
    /// Pending high-priority tasks.
    pub high: usize,
    /// Pending medium-priority tasks.
    pub medium: usize,
    /// Pending low-priority tasks.
    pub low: usize,
}

impl PriorityCounts {
    /// Count for one priority.
    #[must_use]
    pub const fn get(&self, priority: Priority) -> usize {
        match priority {
            Priority::High => self.high,
            Priority::Medium => self.medium,
            Priority::Low => self.low,
        }
    }
}

/// Aggregate counts over a task list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TaskStats {
    /// Number of tasks.
    pub total: usize,
    /// Number of completed tasks.
    pub completed: usize,
    /// Number of pending tasks.
    pub pending: usize,
    /// Pending tasks broken down by priority.
    pub pending_by_priority: PriorityCounts,
}

impl TaskStats {
    /// Computes statistics for a task list.
    #[must_use]
    pub fn from_tasks(tasks: &[Task]) -> Self {
        let mut stats = Self {
            total: tasks.len(),
            ..Self::default()
        };
        for task in tasks {
            if task.completed {
                stats.completed += 1;
            } else {
                stats.pending += 1;
                match task.priority {
                    Priority::High => stats.pending_by_priority.high += 1,
                    Priority::Medium => stats.pending_by_priority.medium += 1,
                    Priority::Low => stats.pending_by_priority.low += 1,
                }
            }
        }
        stats
    }

    /// Completed share of all tasks as a whole percentage, rounded half up.
    ///
    /// Returns `0` for an empty list.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn completion_percent(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        // (2 * 100 * c + t) / (2 * t) rounds half up without floats.
        let pct = (200 * self.completed + self.total) / (2 * self.total);
        pct as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_task(title: &str, priority: Priority, completed: bool) -> Task {
        let now = Utc::now();
        Task {
            id: TaskId::new(),
            owner_id: UserId::new(),
            title: title.to_string(),
            description: String::new(),
            priority,
            completed,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn task_id_display_is_uuid() {
        let id = TaskId::new();
        let display = id.to_string();
        assert_eq!(display.len(), 36);
        assert!(display.contains('-'));
    }

    #[test]
    fn task_id_parse_round_trip() {
        let id = TaskId::new();
        assert_eq!(id.to_string().parse::<TaskId>().unwrap(), id);
        assert!(matches!(
            "nope".parse::<TaskId>(),
            Err(ParseViewError::TaskId(_))
        ));
    }

    #[test]
    fn priority_parse_and_display() {
        assert_eq!("HIGH".parse::<Priority>().unwrap(), Priority::High);
        assert_eq!("low".parse::<Priority>().unwrap(), Priority::Low);
        assert_eq!(Priority::Medium.to_string(), "medium");
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn priority_serializes_lowercase() {
        let json = serde_json::to_string(&Priority::High).unwrap();
        assert_eq!(json, "\"high\"");
    }

    #[test]
    fn completion_parse_accepts_aliases() {
        assert_eq!("done".parse::<Completion>().unwrap(), Completion::Completed);
        assert_eq!("todo".parse::<Completion>().unwrap(), Completion::Pending);
        assert!("maybe".parse::<Completion>().is_err());
    }

    #[test]
    fn patch_apply_sets_only_given_fields() {
        let mut task = make_task("Original", Priority::Low, false);
        let before = task.clone();
        let later = before.updated_at + chrono::Duration::seconds(5);
        let patch = TaskPatch {
            priority: Some(Priority::High),
            ..TaskPatch::default()
        };
        patch.apply_to(&mut task, later);
        assert_eq!(task.priority, Priority::High);
        assert_eq!(task.title, before.title);
        assert_eq!(task.completed, before.completed);
        assert_eq!(task.updated_at, later);
        assert_eq!(task.created_at, before.created_at);
    }

    #[test]
    fn patch_completed_helper() {
        let patch = TaskPatch::completed(true);
        assert_eq!(patch.completed, Some(true));
        assert!(!patch.is_empty());
        assert!(TaskPatch::default().is_empty());
    }

    #[test]
    fn filter_by_completion_and_priority() {
        let tasks = vec![
            make_task("a", Priority::High, false),
            make_task("b", Priority::High, true),
            make_task("c", Priority::Low, false),
        ];
        let pending = TaskFilter::completion(Completion::Pending).apply(&tasks);
        assert_eq!(pending.len(), 2);

        let pending_high = TaskFilter::completion(Completion::Pending)
            .with_priority(Priority::High)
            .apply(&tasks);
        assert_eq!(pending_high.len(), 1);
        assert_eq!(pending_high[0].title, "a");

        let done = TaskFilter::completion(Completion::Completed).apply(&tasks);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].title, "b");

        assert_eq!(TaskFilter::all().apply(&tasks).len(), 3);
    }

    #[test]
    fn filter_preserves_order() {
        let tasks = vec![
            make_task("first", Priority::Low, false),
            make_task("second", Priority::Low, false),
        ];
        let kept = TaskFilter::all().apply(&tasks);
        assert_eq!(kept[0].title, "first");
        assert_eq!(kept[1].title, "second");
    }

    #[test]
    fn stats_counts_pending_by_priority() {
        let tasks = vec![
            make_task("a", Priority::High, false),
            make_task("b", Priority::High, true),
            make_task("c", Priority::Medium, false),
            make_task("d", Priority::Low, false),
        ];
        let stats = TaskStats::from_tasks(&tasks);
        assert_eq!(stats.total, 4);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.pending, 3);
        assert_eq!(stats.pending_by_priority.high, 1);
        assert_eq!(stats.pending_by_priority.medium, 1);
        assert_eq!(stats.pending_by_priority.low, 1);
        assert_eq!(stats.pending_by_priority.get(Priority::High), 1);
    }

    #[test]
    fn completion_percent_rounds() {
        let empty = TaskStats::from_tasks(&[]);
        assert_eq!(empty.completion_percent(), 0);

        let tasks = vec![
            make_task("a", Priority::Low, true),
            make_task("b", Priority::Low, false),
            make_task("c", Priority::Low, false),
        ];
        // 1/3 = 33.3%
        assert_eq!(TaskStats::from_tasks(&tasks).completion_percent(), 33);

        let tasks = vec![
            make_task("a", Priority::Low, true),
            make_task("b", Priority::Low, true),
            make_task("c", Priority::Low, false),
        ];
        // 2/3 = 66.7%
        assert_eq!(TaskStats::from_tasks(&tasks).completion_percent(), 67);

        let tasks = vec![
            make_task("a", Priority::Low, true),
            make_task("b", Priority::Low, false),
        ];
        assert_eq!(TaskStats::from_tasks(&tasks).completion_percent(), 50);
    }
}
