//! Common utilities and types shared across session coordinator crates.

#![warn(clippy::pedantic)]

/// Module for identifier newtypes (connections, users, rooms)
pub mod types;

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for JWT utilities (size limits, user claims, HS256 validation)
pub mod jwt;
