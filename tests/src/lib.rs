//! Shared support for the session guard integration tests.

pub mod fixtures;
pub mod setup;
