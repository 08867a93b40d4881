//! Authoritative in-memory session registry for the session guard.

pub mod registry;

pub use registry::*;
