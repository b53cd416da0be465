//! Rate limit rules.
//!
//! A [`Rule`] is an immutable `(limit, period)` quota. Rules are built either
//! directly or from a [`RuleConfig`] read out of the service configuration.

use std::cmp::Ordering;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RatewardenError, Result};

/// A single sliding-window quota: at most `limit` events per `period`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rule {
    limit: u64,
    period: Duration,
}

impl Rule {
    /// Create a rule, rejecting a zero limit or an empty period.
    pub fn new(limit: u64, period: Duration) -> Result<Self> {
        if limit == 0 {
            return Err(RatewardenError::InvalidRule(
                "limit must be at least 1".to_string(),
            ));
        }
        if period.as_micros() == 0 {
            return Err(RatewardenError::InvalidRule(
                "period must be at least one microsecond".to_string(),
            ));
        }
        Ok(Self { limit, period })
    }

    /// Shorthand for a rule with a whole-second period.
    pub fn per_seconds(limit: u64, seconds: u64) -> Result<Self> {
        Self::new(limit, Duration::from_secs(seconds))
    }

    /// Maximum admitted events per window.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Window length.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Admitted events per second. Lower is stricter.
    pub fn rate(&self) -> f64 {
        self.limit as f64 / self.period.as_secs_f64()
    }

    /// Order by strictness, strictest (fewest events per second) first.
    ///
    /// `a.limit / a.period < b.limit / b.period` is evaluated exactly as
    /// `a.limit * b.period < b.limit * a.period`. Products too large for
    /// `u128` fall back to comparing [`Rule::rate`].
    pub fn strictness_cmp(&self, other: &Rule) -> Ordering {
        let lhs = other.period.as_micros().checked_mul(self.limit as u128);
        let rhs = self.period.as_micros().checked_mul(other.limit as u128);
        match (lhs, rhs) {
            (Some(lhs), Some(rhs)) => lhs.cmp(&rhs),
            _ => self.rate().total_cmp(&other.rate()),
        }
    }

    /// Stable key namespacing this rule's counters, e.g. `l5-p10000000us`.
    ///
    /// Derived only from `(limit, period)`, so it survives restarts and is
    /// shared by every instance holding an equal rule.
    pub fn identity_key(&self) -> String {
        format!("l{}-p{}us", self.limit, self.period.as_micros())
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} per {:?}", self.limit, self.period)
    }
}

/// Coarse time unit accepted in rule configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
}

impl TimeUnit {
    /// Get the duration of one unit.
    pub fn duration(&self) -> Duration {
        match self {
            TimeUnit::Second => Duration::from_secs(1),
            TimeUnit::Minute => Duration::from_secs(60),
            TimeUnit::Hour => Duration::from_secs(3600),
            TimeUnit::Day => Duration::from_secs(86400),
        }
    }
}

/// A rule as written in configuration.
///
/// Exactly one of `period_secs`, `period_ms` or `unit` sets the period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Number of events allowed per period
    pub limit: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<TimeUnit>,
}

impl RuleConfig {
    /// Validate the definition and build the rule.
    pub fn build(&self) -> Result<Rule> {
        let period = match (self.period_secs, self.period_ms, self.unit) {
            (Some(secs), None, None) => Duration::from_secs(secs),
            (None, Some(ms), None) => Duration::from_millis(ms),
            (None, None, Some(unit)) => unit.duration(),
            (None, None, None) => {
                return Err(RatewardenError::InvalidRule(
                    "one of period_secs, period_ms or unit is required".to_string(),
                ))
            }
            _ => {
                return Err(RatewardenError::InvalidRule(
                    "only one of period_secs, period_ms or unit may be set".to_string(),
                ))
            }
        };
        Rule::new(self.limit, period)
    }
}
