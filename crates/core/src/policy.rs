//! Timeout policy definitions and resolution.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::error::{Error, Result};
use crate::limits::MAX_POLICY_DURATION_SECS;
use crate::session::{Session, UserIdentity};
use crate::signals::DeviceClass;

/// Seconds as a duration, clamped to the policy bound so unvalidated
/// values cannot overflow.
fn bounded_secs(secs: u64) -> Duration {
    let secs = i64::try_from(secs.min(MAX_POLICY_DURATION_SECS)).unwrap_or(i64::MAX);
    Duration::seconds(secs)
}

/// A named set of inactivity timeout parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutPolicy {
    pub name: String,
    /// Inactivity timeout in seconds
    pub timeout_secs: u64,
    /// Silently renew sessions nearing their timeout
    #[serde(default)]
    pub auto_renew: bool,
    /// Renewal window before the timeout, in seconds
    #[serde(default)]
    pub renew_threshold_secs: u64,
    /// Warning window before the timeout, in seconds
    #[serde(default)]
    pub warn_before_secs: u64,
    /// Idle time tolerated past the timeout, in seconds
    #[serde(default)]
    pub grace_period_secs: u64,
    /// Device classes this policy applies to (empty = all)
    #[serde(default)]
    pub device_classes: BTreeSet<DeviceClass>,
    /// Roles this policy applies to (empty = all)
    #[serde(default)]
    pub roles: BTreeSet<String>,
}

impl TimeoutPolicy {
    /// Built-in fallback: 30 minute timeout, warn 5 minutes before, 1 minute grace.
    pub fn builtin_default() -> Self {
        Self {
            name: "default".to_string(),
            timeout_secs: 30 * 60,
            auto_renew: false,
            renew_threshold_secs: 0,
            warn_before_secs: 5 * 60,
            grace_period_secs: 60,
            device_classes: BTreeSet::new(),
            roles: BTreeSet::new(),
        }
    }

    pub fn timeout(&self) -> Duration {
        bounded_secs(self.timeout_secs)
    }

    pub fn renew_threshold(&self) -> Duration {
        bounded_secs(self.renew_threshold_secs)
    }

    pub fn warn_before(&self) -> Duration {
        bounded_secs(self.warn_before_secs)
    }

    pub fn grace_period(&self) -> Duration {
        bounded_secs(self.grace_period_secs)
    }

    /// Idle time at which the session is silently renewed.
    pub fn renew_at(&self) -> Duration {
        self.timeout() - self.renew_threshold()
    }

    /// Idle time at which the session is warned.
    pub fn warn_at(&self) -> Duration {
        self.timeout() - self.warn_before()
    }

    /// Idle time at which the session is expired.
    pub fn expire_at(&self) -> Duration {
        self.timeout() + self.grace_period()
    }

    /// Hard expiry instant for a session last active at `last_activity`.
    pub fn expires_at(&self, last_activity: DateTime<Utc>) -> DateTime<Utc> {
        last_activity + self.expire_at()
    }

    /// Check the duration invariants.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::invalid_policy("<unnamed>", "name is required"));
        }
        if self.timeout_secs == 0 {
            return Err(Error::invalid_policy(&self.name, "timeout must be positive"));
        }
        for (field, secs) in [
            ("timeout", self.timeout_secs),
            ("renew_threshold", self.renew_threshold_secs),
            ("warn_before", self.warn_before_secs),
            ("grace_period", self.grace_period_secs),
        ] {
            if secs > MAX_POLICY_DURATION_SECS {
                return Err(Error::invalid_policy(
                    &self.name,
                    format!("{} exceeds {} seconds", field, MAX_POLICY_DURATION_SECS),
                ));
            }
        }
        if self.renew_threshold_secs >= self.timeout_secs {
            return Err(Error::invalid_policy(
                &self.name,
                "renew_threshold must be shorter than timeout",
            ));
        }
        if self.warn_before_secs >= self.timeout_secs {
            return Err(Error::invalid_policy(
                &self.name,
                "warn_before must be shorter than timeout",
            ));
        }
        Ok(())
    }

    /// Whether the applicability filter admits this user and device.
    pub fn applies_to(&self, user: &UserIdentity, device: DeviceClass) -> bool {
        let device_ok = self.device_classes.is_empty() || self.device_classes.contains(&device);
        let role_ok = self.roles.is_empty() || !self.roles.is_disjoint(&user.roles);
        device_ok && role_ok
    }

    /// Resolution order: smaller timeout first, then role-filtered over
    /// wildcard, then device-filtered over wildcard, then by name.
    fn precedence(&self, other: &Self) -> Ordering {
        self.timeout_secs
            .cmp(&other.timeout_secs)
            .then_with(|| self.roles.is_empty().cmp(&other.roles.is_empty()))
            .then_with(|| {
                self.device_classes
                    .is_empty()
                    .cmp(&other.device_classes.is_empty())
            })
            .then_with(|| self.name.cmp(&other.name))
    }
}

/// The read-only policy store: a mandatory default plus filtered policies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyTable {
    #[serde(default = "TimeoutPolicy::builtin_default")]
    pub default: TimeoutPolicy,
    #[serde(default)]
    pub policies: Vec<TimeoutPolicy>,
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self {
            default: TimeoutPolicy::builtin_default(),
            policies: Vec::new(),
        }
    }
}

impl PolicyTable {
    pub fn new(default: TimeoutPolicy, policies: Vec<TimeoutPolicy>) -> Self {
        Self { default, policies }
    }

    pub fn with_policy(mut self, policy: TimeoutPolicy) -> Self {
        self.policies.push(policy);
        self
    }

    /// Validate every policy, including the default.
    pub fn validate(&self) -> Result<()> {
        self.default.validate()?;
        for policy in &self.policies {
            policy.validate()?;
        }
        Ok(())
    }
}

/// Selects the most restrictive applicable policy for a user and device.
///
/// Resolution is pure, so it can run on every tick without coordination.
#[derive(Debug, Clone)]
pub struct TimeoutPolicyResolver {
    table: PolicyTable,
}

impl TimeoutPolicyResolver {
    /// Creates a resolver over a validated table.
    pub fn new(table: PolicyTable) -> Result<Self> {
        table.validate()?;
        Ok(Self { table })
    }

    pub fn table(&self) -> &PolicyTable {
        &self.table
    }

    /// The most restrictive matching policy, or `PolicyNotFound`.
    pub fn try_resolve(&self, user: &UserIdentity, device: DeviceClass) -> Result<&TimeoutPolicy> {
        self.table
            .policies
            .iter()
            .filter(|p| p.applies_to(user, device))
            .min_by(|a, b| a.precedence(b))
            .ok_or_else(|| {
                Error::PolicyNotFound(format!("user {} on {}", user.user_id, device))
            })
    }

    /// The most restrictive matching policy, falling back to the default.
    pub fn resolve(&self, user: &UserIdentity, device: DeviceClass) -> &TimeoutPolicy {
        self.try_resolve(user, device).unwrap_or(&self.table.default)
    }

    /// Policy in force for a session.
    pub fn resolve_for(&self, session: &Session) -> &TimeoutPolicy {
        self.resolve(&session.user, session.device_class)
    }
}
