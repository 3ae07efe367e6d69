//! Eager-loading policy.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Association members loaded together with their owning entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryPolicy {
    #[serde(default)]
    include: BTreeSet<(String, String)>,
}

impl QueryPolicy {
    /// A policy that loads no associations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads `entity.member` whenever `entity` is projected.
    #[must_use]
    pub fn include(mut self, entity: &str, member: &str) -> Self {
        self.include.insert((entity.to_string(), member.to_string()));
        self
    }

    /// Is `entity.member` eagerly loaded.
    #[must_use]
    pub fn is_included(&self, entity: &str, member: &str) -> bool {
        self.include
            .contains(&(entity.to_string(), member.to_string()))
    }

    /// Does the policy include anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.include.is_empty()
    }
}
