//! Caller-facing session operations for the session guard.
//!
//! No wire binding lives here; request handlers of any transport call
//! into [`SessionApi`].

pub mod sessions;
pub mod state;
pub mod status;

pub use state::SessionApi;
pub use status::ServiceStatus;
