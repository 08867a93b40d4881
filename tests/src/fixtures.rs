//! Test fixtures: policies, signals, and identities.

use guard_core::{
    DeviceClass, GeoLocation, PolicyTable, SessionSignals, TimeoutPolicy, UserIdentity,
};
use std::collections::BTreeSet;

/// Fingerprint shared by a user's usual device.
pub const HOME_FINGERPRINT: &str = "9f86d081884c7d659a2feaa0c55ad015";

/// A second, never-seen device.
pub const NEW_FINGERPRINT: &str = "d4735e3a265e16eee03f59718b9b5d03";

pub const IPHONE_UA: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";

pub const DESKTOP_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// 30 minute timeout, warn 5 minutes before, 1 minute grace.
pub fn office_policy(auto_renew: bool) -> TimeoutPolicy {
    TimeoutPolicy {
        name: if auto_renew { "office-renew" } else { "office" }.to_string(),
        timeout_secs: 30 * 60,
        auto_renew,
        renew_threshold_secs: if auto_renew { 5 * 60 } else { 0 },
        warn_before_secs: 5 * 60,
        grace_period_secs: 60,
        device_classes: BTreeSet::new(),
        roles: BTreeSet::new(),
    }
}

/// 10 minute timeout for administrators.
pub fn admin_policy() -> TimeoutPolicy {
    TimeoutPolicy {
        name: "admin".to_string(),
        timeout_secs: 10 * 60,
        auto_renew: false,
        renew_threshold_secs: 0,
        warn_before_secs: 2 * 60,
        grace_period_secs: 0,
        device_classes: BTreeSet::new(),
        roles: BTreeSet::from(["admin".to_string()]),
    }
}

/// 60 minute auto-renewing timeout for phones and tablets.
pub fn mobile_policy() -> TimeoutPolicy {
    TimeoutPolicy {
        name: "mobile".to_string(),
        timeout_secs: 60 * 60,
        auto_renew: true,
        renew_threshold_secs: 10 * 60,
        warn_before_secs: 5 * 60,
        grace_period_secs: 2 * 60,
        device_classes: BTreeSet::from([DeviceClass::Mobile, DeviceClass::Tablet]),
        roles: BTreeSet::new(),
    }
}

/// Single-policy table: every session uses `policy`.
pub fn only(policy: TimeoutPolicy) -> PolicyTable {
    PolicyTable::new(policy, Vec::new())
}

/// Built-in default plus the admin and mobile policies.
pub fn standard_table() -> PolicyTable {
    PolicyTable::default()
        .with_policy(admin_policy())
        .with_policy(mobile_policy())
}

pub fn user(id: &str) -> UserIdentity {
    UserIdentity::new(id)
}

pub fn admin(id: &str) -> UserIdentity {
    UserIdentity::new(id).with_role("admin")
}

/// Desktop signals from `origin` with the home fingerprint.
pub fn signals(origin: &str) -> SessionSignals {
    SessionSignals::new(origin, HOME_FINGERPRINT).with_user_agent(DESKTOP_UA)
}

/// Signals located in `country`.
pub fn signals_in(origin: &str, country: &str) -> SessionSignals {
    signals(origin).with_geo(GeoLocation::new(country, None))
}

/// Phone signals; the device class comes from the user agent.
pub fn mobile_signals(origin: &str) -> SessionSignals {
    SessionSignals::new(origin, HOME_FINGERPRINT).with_user_agent(IPHONE_UA)
}
