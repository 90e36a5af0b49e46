//! Middleware module for the workdeck HTTP server
//!
//! Provides:
//! - Authentication extractor (Bearer token / API key / query token)

pub mod auth;
