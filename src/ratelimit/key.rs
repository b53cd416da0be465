//! Window key generation.

use std::fmt;

use super::rule::Rule;

/// A key that uniquely identifies the window for one (rule, identifier) pair.
///
/// The identifier is opaque and may contain any character, including the
/// `:` separator, so it is written length-prefixed. The namespace and the
/// rule key have fixed shapes, which keeps the composite unambiguous.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowKey {
    /// Store-wide key prefix
    pub namespace: String,
    /// Caller-supplied partitioning key, used verbatim
    pub identifier: String,
    /// [`Rule::identity_key`] of the rule this window belongs to
    pub rule_key: String,
}

impl WindowKey {
    /// Create a new window key.
    pub fn new(namespace: &str, identifier: &str, rule: &Rule) -> Self {
        Self {
            namespace: namespace.to_string(),
            identifier: identifier.to_string(),
            rule_key: rule.identity_key(),
        }
    }

    /// Convert the window key to its storage representation,
    /// `namespace:<byte length>:identifier:rule_key`.
    pub fn to_string_key(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.namespace,
            self.identifier.len(),
            self.identifier,
            self.rule_key
        )
    }
}

impl fmt::Display for WindowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_key())
    }
}
