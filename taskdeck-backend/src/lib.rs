//! `TaskDeck` development backend library.
//!
//! Exposes the backend server for use in tests and embedding. The server
//! accepts WebSocket connections, authenticates requests by bearer token,
//! and serves each user's rows of the task table.

pub mod config;
pub mod server;
pub mod store;
