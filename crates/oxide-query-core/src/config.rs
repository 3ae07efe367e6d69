//! Translator configuration.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// How a session detects modified instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingMode {
    /// Keep a copy of every materialized instance and compare on submit.
    #[default]
    Snapshot,
    /// Rely on explicit change notifications.
    Notify,
}

/// Knobs shared by translation, caching and change tracking.
///
/// Missing fields in a JSON document take their defaults.
///
/// ```
/// use oxide_query_core::config::{TrackingMode, TranslatorConfig};
///
/// let config = TranslatorConfig::from_json(r#"{ "plan_cache_capacity": 16 }"#).unwrap();
/// assert_eq!(config.plan_cache_capacity, 16);
/// assert_eq!(config.tracking, TrackingMode::Snapshot);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslatorConfig {
    /// Replace text, blob and timestamp literals with parameters.
    pub parameterize_constants: bool,
    /// Look up and store plans in the plan cache.
    pub enable_plan_cache: bool,
    /// Maximum number of cached plans.
    pub plan_cache_capacity: usize,
    /// Change detection strategy for sessions.
    pub tracking: TrackingMode,
    /// Parameter sets sent per batched command.
    pub batch_size: usize,
    /// Run the alias scope checker after every rewrite pass.
    pub validate_scopes: bool,
    /// Rewrite correlated collections into client joins.
    pub client_joins: bool,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            parameterize_constants: true,
            enable_plan_cache: false,
            plan_cache_capacity: 64,
            tracking: TrackingMode::Snapshot,
            batch_size: 50,
            validate_scopes: false,
            client_joins: true,
        }
    }
}

impl TranslatorConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Sets literal parameterization.
    #[must_use]
    pub const fn parameterize_constants(mut self, enabled: bool) -> Self {
        self.parameterize_constants = enabled;
        self
    }

    /// Enables the plan cache with `capacity` entries.
    #[must_use]
    pub const fn plan_cache(mut self, capacity: usize) -> Self {
        self.enable_plan_cache = capacity > 0;
        self.plan_cache_capacity = capacity;
        self
    }

    /// Sets the tracking mode.
    #[must_use]
    pub const fn tracking(mut self, mode: TrackingMode) -> Self {
        self.tracking = mode;
        self
    }

    /// Sets the batch size; zero is treated as one.
    #[must_use]
    pub const fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = if size == 0 { 1 } else { size };
        self
    }

    /// Sets scope validation.
    #[must_use]
    pub const fn validate_scopes(mut self, enabled: bool) -> Self {
        self.validate_scopes = enabled;
        self
    }

    /// Sets the client-join rewrite.
    #[must_use]
    pub const fn client_joins(mut self, enabled: bool) -> Self {
        self.client_joins = enabled;
        self
    }
}
