//! Background work for the session guard.
//!
//! - Monitor (renew, warn, and expire sessions on a fixed interval)
//! - Anomaly detection (critical-risk sweep, origin fan-out)
//! - Delivery (bounded audit and alert calls)
//! - Notifications (log audit sink, log/webhook alert channels)

pub mod anomaly;
pub mod delivery;
pub mod monitor;
pub mod notifications;

pub use anomaly::*;
pub use delivery::*;
pub use monitor::*;
pub use notifications::*;
