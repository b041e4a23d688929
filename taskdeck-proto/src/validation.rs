//! Form-level validation run before any store or backend call.
//!
//! The client uses these to reject bad input synchronously; the backend runs
//! the same checks again on every request it receives.

use std::sync::LazyLock;

use regex::Regex;

use crate::task::{MAX_TASK_DESCRIPTION_LENGTH, MAX_TASK_TITLE_LENGTH, NewTask, TaskPatch};

/// Minimum accepted password length in characters.
pub const MIN_PASSWORD_LENGTH: usize = 6;

// The pattern is a literal; compiling it cannot fail.
#[allow(clippy::unwrap_used)]
static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());

/// A single rejected field.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// No email given.
    #[error("Email is required")]
    EmailRequired,
    /// Email does not look like `name@host.tld`.
    #[error("Please enter a valid email address")]
    EmailInvalid,
    /// No password given.
    #[error("Password is required")]
    PasswordRequired,
    /// Password shorter than [`MIN_PASSWORD_LENGTH`].
    #[error("Password must be at least 6 characters")]
    PasswordTooShort,
    /// Title empty after trimming.
    #[error("Task title is required")]
    TitleEmpty,
    /// Title longer than [`MAX_TASK_TITLE_LENGTH`].
    #[error("Task title too long (max 200 characters)")]
    TitleTooLong,
    /// Description longer than [`MAX_TASK_DESCRIPTION_LENGTH`].
    #[error("Task description too long (max 500 characters)")]
    DescriptionTooLong,
}

/// Per-field errors of a sign-in/sign-up form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormErrors {
    /// Problem with the email field.
    pub email: Option<ValidationError>,
    /// Problem with the password field.
    pub password: Option<ValidationError>,
}

impl FormErrors {
    /// Returns `true` when both fields passed.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.email.is_none() && self.password.is_none()
    }

    /// All field errors, email first.
    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.email.iter().chain(self.password.iter())
    }
}

/// Checks an email address.
///
/// # Errors
///
/// Returns [`ValidationError::EmailRequired`] or [`ValidationError::EmailInvalid`].
pub fn validate_email(email: &str) -> Result<(), ValidationError> {
    if email.is_empty() {
        return Err(ValidationError::EmailRequired);
    }
    if !EMAIL_RE.is_match(email) {
        return Err(ValidationError::EmailInvalid);
    }
    Ok(())
}

/// Checks a password.
///
/// # Errors
///
/// Returns [`ValidationError::PasswordRequired`] or
/// [`ValidationError::PasswordTooShort`].
pub fn validate_password(password: &str) -> Result<(), ValidationError> {
    if password.is_empty() {
        return Err(ValidationError::PasswordRequired);
    }
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(ValidationError::PasswordTooShort);
    }
    Ok(())
}

/// Validates a credentials form, collecting every field error.
#[must_use]
pub fn validate_credentials(email: &str, password: &str) -> FormErrors {
    FormErrors {
        email: validate_email(email).err(),
        password: validate_password(password).err(),
    }
}

fn check_title(title: &str) -> Result<String, ValidationError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(ValidationError::TitleEmpty);
    }
    if title.chars().count() > MAX_TASK_TITLE_LENGTH {
        return Err(ValidationError::TitleTooLong);
    }
    Ok(title.to_string())
}

fn check_description(description: &str) -> Result<String, ValidationError> {
    let description = description.trim();
    if description.chars().count() > MAX_TASK_DESCRIPTION_LENGTH {
        return Err(ValidationError::DescriptionTooLong);
    }
    Ok(description.to_string())
}

/// Validates and normalizes a create-task form.
///
/// Title and description are trimmed; a blank description becomes `None`.
///
/// # Errors
///
/// Returns the first failing field.
pub fn validate_new_task(task: &NewTask) -> Result<NewTask, ValidationError> {
    let title = check_title(&task.title)?;
    let description = match task.description.as_deref() {
        Some(d) => Some(check_description(d)?).filter(|d| !d.is_empty()),
        None => None,
    };
    Ok(NewTask {
        title,
        description,
        priority: task.priority,
    })
}

/// Validates and normalizes an edit form.
///
/// # Errors
///
/// Returns the first failing field.
pub fn validate_patch(patch: &TaskPatch) -> Result<TaskPatch, ValidationError> {
    Ok(TaskPatch {
        title: patch.title.as_deref().map(check_title).transpose()?,
        description: patch
            .description
            .as_deref()
            .map(check_description)
            .transpose()?,
        priority: patch.priority,
        completed: patch.completed,
    })
}
