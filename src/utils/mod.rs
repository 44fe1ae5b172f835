//! Shared utilities.

pub mod events;
