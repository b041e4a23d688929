//! Shared data contracts for `TaskDeck`: identities, tasks, derived views,
//! form validation, and the backend wire protocol.

pub mod backend;
pub mod identity;
pub mod task;
pub mod validation;
