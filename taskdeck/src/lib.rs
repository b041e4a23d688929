//! `TaskDeck`: per-user task lists over a hosted auth and database backend.
//!
//! The two stores are the heart of the client: [`session::SessionStore`]
//! tracks who is signed in, [`tasks::TaskStore`] keeps that user's tasks in
//! step with the backend. Both talk to the backend only through the traits
//! in [`remote`].

pub mod app;
pub mod config;
pub mod listeners;
pub mod loading;
pub mod remote;
pub mod session;
pub mod tasks;
