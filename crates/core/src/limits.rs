//! Size limits and fixed constants for session signals and policies.
//!
//! # Usage Note
//!
//! Constants used at runtime: `MAX_USER_ID_LEN`, `FINGERPRINT_PATTERN`,
//! `MAX_RECOVERY_STATE_BYTES`, `MAX_POLICY_DURATION_SECS`,
//! `SHORT_TIMEOUT_ALERT_SECS`.
//!
//! Other constants are exported for downstream crates and documentation.
//! The `#[validate]` derive macro requires literal values in attributes,
//! so field limits are duplicated there. Keep both in sync when modifying.

// === String Field Limits (chars) ===

/// IP address max length (IPv6 = 45 chars).
pub const MAX_IP_LEN: usize = 45;

/// User agent string max length.
/// Browser UAs: 100-300 typical, 500+ with extensions.
pub const MAX_USER_AGENT_LEN: usize = 512;

/// User ID max length.
/// UUIDs=36, emails=~50, custom IDs up to 128.
pub const MAX_USER_ID_LEN: usize = 128;

/// City name max length.
pub const MAX_CITY_LEN: usize = 128;

/// ISO 3166-1 alpha-2 country code length.
pub const COUNTRY_CODE_LEN: u64 = 2;

/// Client fingerprint hash: hex digest between 64 and 512 bits.
pub const FINGERPRINT_PATTERN: &str = r"^[0-9a-fA-F]{16,128}$";

// === Recovery Limits ===

/// Maximum recoverable state blob size in bytes (64KB).
pub const MAX_RECOVERY_STATE_BYTES: usize = 64 * 1024;

// === Monitor Bounds ===

/// Timeouts at or below this many seconds mark a session as a high-value target.
pub const SHORT_TIMEOUT_ALERT_SECS: u64 = 15 * 60;

/// Upper bound for any policy duration (one year).
///
/// Keeps every derived idle threshold well inside `chrono::Duration` range.
pub const MAX_POLICY_DURATION_SECS: u64 = 365 * 24 * 60 * 60;
