//! Heuristic session risk scoring.
//!
//! Scores are additive over weighted signals and mapped to a [`RiskLevel`]
//! through fixed thresholds. The scorer only proposes a level; the registry
//! decides whether it may be applied.

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{Error, Result};
use crate::session::{RiskLevel, Session};

/// How the odd-hour rule treats a user with no prior sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FirstSessionHourRule {
    /// Never flag a first session for its hour
    #[default]
    Ignore,
    /// Flag a first session created outside `[start_hour, end_hour)` UTC.
    /// A window with `start_hour > end_hour` wraps past midnight.
    OutsideWindow { start_hour: u32, end_hour: u32 },
}

impl FirstSessionHourRule {
    /// Whether a first session created at `hour` is flagged.
    pub fn flags(&self, hour: u32) -> bool {
        match *self {
            Self::Ignore => false,
            Self::OutsideWindow {
                start_hour,
                end_hour,
            } => {
                let inside = if start_hour <= end_hour {
                    (start_hour..end_hour).contains(&hour)
                } else {
                    hour >= start_hour || hour < end_hour
                };
                !inside
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Self::OutsideWindow {
            start_hour,
            end_hour,
        } = *self
        {
            if start_hour > 23 || end_hour > 23 {
                return Err(Error::validation(format!(
                    "first_session_hours window {}..{} must use hours 0-23",
                    start_hour, end_hour
                )));
            }
        }
        Ok(())
    }
}

/// Risk scoring weights and thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_new_country_points")]
    pub new_country_points: u32,
    #[serde(default = "default_new_fingerprint_points")]
    pub new_fingerprint_points: u32,
    #[serde(default = "default_odd_hour_points")]
    pub odd_hour_points: u32,
    /// Points per concurrent active session beyond the allowance
    #[serde(default = "default_concurrency_points")]
    pub concurrency_points: u32,
    #[serde(default = "default_concurrency_allowance")]
    pub concurrency_allowance: usize,
    #[serde(default = "default_medium_threshold")]
    pub medium_threshold: u32,
    #[serde(default = "default_high_threshold")]
    pub high_threshold: u32,
    #[serde(default = "default_critical_threshold")]
    pub critical_threshold: u32,
    #[serde(default)]
    pub first_session_hours: FirstSessionHourRule,
}

fn default_new_country_points() -> u32 {
    30
}

fn default_new_fingerprint_points() -> u32 {
    20
}

fn default_odd_hour_points() -> u32 {
    25
}

fn default_concurrency_points() -> u32 {
    10
}

fn default_concurrency_allowance() -> usize {
    3
}

fn default_medium_threshold() -> u32 {
    20
}

fn default_high_threshold() -> u32 {
    40
}

fn default_critical_threshold() -> u32 {
    70
}

impl RiskConfig {
    /// Check thresholds are ordered and the hour window is well formed.
    pub fn validate(&self) -> Result<()> {
        if !(self.medium_threshold <= self.high_threshold
            && self.high_threshold <= self.critical_threshold)
        {
            return Err(Error::validation(
                "risk thresholds must satisfy medium <= high <= critical",
            ));
        }
        self.first_session_hours.validate()
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            new_country_points: default_new_country_points(),
            new_fingerprint_points: default_new_fingerprint_points(),
            odd_hour_points: default_odd_hour_points(),
            concurrency_points: default_concurrency_points(),
            concurrency_allowance: default_concurrency_allowance(),
            medium_threshold: default_medium_threshold(),
            high_threshold: default_high_threshold(),
            critical_threshold: default_critical_threshold(),
            first_session_hours: FirstSessionHourRule::default(),
        }
    }
}

/// A signal that contributed to a score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "factor", rename_all = "snake_case")]
pub enum RiskFactor {
    NewCountry { country: String },
    NewFingerprint,
    OddHour { hour: u32 },
    Concurrency { active: usize },
}

/// Outcome of scoring a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub score: u32,
    pub level: RiskLevel,
    pub factors: Vec<RiskFactor>,
}

/// Computes risk levels from a session and the owning user's history.
#[derive(Debug, Clone, Default)]
pub struct RiskScorer {
    config: RiskConfig,
}

impl RiskScorer {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Map a score to a level.
    pub fn level_for(&self, score: u32) -> RiskLevel {
        if score >= self.config.critical_threshold {
            RiskLevel::Critical
        } else if score >= self.config.high_threshold {
            RiskLevel::High
        } else if score >= self.config.medium_threshold {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    /// Score `session` against every session of the same user.
    ///
    /// `user_sessions` may include `session` itself; it is never treated
    /// as its own history.
    pub fn assess(&self, session: &Session, user_sessions: &[Session]) -> RiskAssessment {
        let prior: Vec<&Session> = user_sessions
            .iter()
            .filter(|s| s.id != session.id && s.created_at <= session.created_at)
            .collect();

        let mut score = 0;
        let mut factors = Vec::new();

        if let Some(country) = session.signals.country() {
            let known: BTreeSet<&str> = prior.iter().filter_map(|s| s.signals.country()).collect();
            if !known.is_empty() && !known.contains(country) {
                score += self.config.new_country_points;
                factors.push(RiskFactor::NewCountry {
                    country: country.to_string(),
                });
            }
        }

        if !prior.is_empty()
            && prior
                .iter()
                .all(|s| s.signals.fingerprint != session.signals.fingerprint)
        {
            score += self.config.new_fingerprint_points;
            factors.push(RiskFactor::NewFingerprint);
        }

        let hour = session.created_at.hour();
        if self.is_odd_hour(hour, &prior) {
            score += self.config.odd_hour_points;
            factors.push(RiskFactor::OddHour { hour });
        }

        let (active, excess) = self.concurrency_excess(session, user_sessions);
        if excess > 0 {
            score += self.config.concurrency_points * excess as u32;
            factors.push(RiskFactor::Concurrency { active });
        }

        RiskAssessment {
            score,
            level: self.level_for(score),
            factors,
        }
    }

    /// An hour is odd when no prior session started in it. With no history
    /// at all the configured first-session rule decides.
    fn is_odd_hour(&self, hour: u32, prior: &[&Session]) -> bool {
        if prior.is_empty() {
            return self.config.first_session_hours.flags(hour);
        }

        let normal_hours: BTreeSet<u32> = prior.iter().map(|s| s.created_at.hour()).collect();
        !normal_hours.contains(&hour)
    }

    /// Sessions ranked past the allowance (by creation order among the
    /// user's live sessions) carry the full excess; earlier ones carry none.
    fn concurrency_excess(&self, session: &Session, user_sessions: &[Session]) -> (usize, usize) {
        let mut live: Vec<(DateTime<Utc>, &str)> = user_sessions
            .iter()
            .filter(|s| s.is_live() && s.id != session.id)
            .map(|s| (s.created_at, s.id.as_str()))
            .collect();
        if session.is_live() {
            live.push((session.created_at, session.id.as_str()));
        }
        live.sort();

        let active = live.len();
        let allowance = self.config.concurrency_allowance;
        let rank = live
            .iter()
            .position(|(_, id)| *id == session.id.as_str())
            .map(|i| i + 1)
            .unwrap_or(0);

        if rank > allowance {
            (active, active - allowance)
        } else {
            (active, 0)
        }
    }
}
