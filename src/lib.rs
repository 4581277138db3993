//! chime - a console Gmail watcher
//!
//! This crate provides the core functionality for chime: OAuth credential
//! management, a thin Gmail API adapter, console and audible notification,
//! and the polling loop that ties them together.

pub mod auth;
pub mod config;
pub mod notify;
pub mod provider;
pub mod watch;
