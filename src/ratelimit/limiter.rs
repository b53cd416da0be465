//! Multi-rule rate limiter.

use std::sync::Arc;

use tracing::{debug, trace};

use super::rule::Rule;
use crate::error::{RatewardenError, Result};
use crate::store::WindowStore;

/// Outcome of evaluating every rule for one identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Every rule admitted the event
    Allowed,
    /// The first rule, in evaluation order, that denied the event
    Denied { rule: Rule },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }
}

/// Applies an ordered set of rules to identifiers through a shared store.
///
/// Rules are evaluated strictest first and evaluation stops at the first
/// denial, so looser rules never see the event. Events already recorded by
/// stricter rules are not rolled back. The limiter holds no mutable state of
/// its own and can be shared freely.
pub struct RateLimiter<S: WindowStore + ?Sized = dyn WindowStore> {
    /// Rules sorted by ascending `rate()`
    rules: Vec<Rule>,
    store: Arc<S>,
}

impl<S: WindowStore + ?Sized> RateLimiter<S> {
    /// Create a limiter over `rules`, in any order.
    ///
    /// Rules with equal strictness keep the order they were given in.
    pub fn new(store: Arc<S>, rules: impl IntoIterator<Item = Rule>) -> Result<Self> {
        let mut rules: Vec<Rule> = rules.into_iter().collect();
        if rules.is_empty() {
            return Err(RatewardenError::EmptyRuleSet);
        }
        rules.sort_by(|a, b| a.strictness_cmp(b));

        debug!(
            rules = ?rules.iter().map(|r| r.to_string()).collect::<Vec<_>>(),
            "Creating rate limiter"
        );

        Ok(Self { rules, store })
    }

    /// Check `identifier` against every rule and report which one denied it.
    ///
    /// Store failures are returned as errors, never as a decision.
    pub async fn check(&self, identifier: &str) -> Result<Decision> {
        for rule in &self.rules {
            trace!(identifier = %identifier, rule = %rule, "Checking rule");

            if !self.store.check_and_update(rule, identifier).await? {
                debug!(
                    identifier = %identifier,
                    rule = %rule,
                    "Rate limit exceeded"
                );
                return Ok(Decision::Denied { rule: *rule });
            }
        }
        Ok(Decision::Allowed)
    }

    /// Whether one more event for `identifier` is admitted.
    pub async fn is_allowed(&self, identifier: &str) -> Result<bool> {
        Ok(self.check(identifier).await?.is_allowed())
    }

    /// Rules in evaluation order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// The store shared by this limiter.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}

impl<S: WindowStore + ?Sized> Clone for RateLimiter<S> {
    fn clone(&self) -> Self {
        Self {
            rules: self.rules.clone(),
            store: Arc::clone(&self.store),
        }
    }
}
