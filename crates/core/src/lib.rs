//! Shared types, errors and well-known names for the Beacon workspace.
//!
//! This crate has no internal dependencies so every other crate can use it.

pub mod error;
pub mod event_types;
pub mod roles;
pub mod types;
