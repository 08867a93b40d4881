//! Core types, policies, and risk scoring for the session guard.

pub mod anomaly;
pub mod clock;
pub mod error;
pub mod events;
pub mod limits;
pub mod policy;
pub mod risk;
pub mod session;
pub mod signals;

pub use anomaly::*;
pub use clock::*;
pub use error::{Error, Result};
pub use events::*;
pub use policy::*;
pub use risk::*;
pub use session::*;
pub use signals::*;
