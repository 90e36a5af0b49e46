//! Workdeck Core - shared runtime services
//!
//! This crate provides the pieces of the workdeck runtime that sit outside
//! the terminal session manager but that it depends on:
//! - Auth: token validation for HTTP requests and WebSocket upgrades
//! - Shutdown: coordinated cancellation of background tasks

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod shutdown;

pub use auth::{AuthContext, AuthError, AuthMethod, AuthStore, TokenValidator};
pub use shutdown::{shutdown_signal_with_controller, wait_for_shutdown_signal, ShutdownController};
