//! Operator console for a log-management API.
//!
//! The two workflows with real state live in [`export`] and [`dashboard`];
//! both talk to the server through the [`api::LogQueryClient`] trait.

pub mod api;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod export;
pub mod log_entry;
pub mod render;
pub mod session;
pub mod user;

pub use error::{ConsoleError, ErrorKind, Result};
