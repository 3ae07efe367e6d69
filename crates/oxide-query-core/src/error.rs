//! Error types for query translation, materialization and change tracking.

use thiserror::Error;

/// Errors raised by the translation engine.
///
/// None of these are recoverable locally: a translation either yields a
/// complete command or fails with one of these.
#[derive(Debug, Error)]
pub enum QueryError {
    /// A node kind or operator that the binder or formatter cannot lower or
    /// render for the current dialect.
    #[error("unsupported construct: {construct}")]
    Unsupported {
        /// Description of the offending construct.
        construct: String,
    },

    /// The mapping has no entity with this name.
    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    /// A member referenced by a query or command is not mapped.
    #[error("mapping error on {entity}.{member}: {reason}")]
    Mapping {
        /// Entity name.
        entity: String,
        /// Member name.
        member: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Association key lists of different length.
    #[error("association {entity}.{member} has {keys} key members but {related} related key members")]
    KeyMismatch {
        /// Entity name.
        entity: String,
        /// Association member.
        member: String,
        /// Number of local key members.
        keys: usize,
        /// Number of related key members.
        related: usize,
    },

    /// No constructor can bind every read-only member of an entity.
    #[error("cannot construct {entity}: {reason}")]
    Construction {
        /// Entity name.
        entity: String,
        /// Why construction failed.
        reason: String,
    },

    /// The commit order of a session cannot be produced.
    #[error("dependency cycle detected at {item}")]
    DependencyCycle {
        /// The first item found twice on the DFS stack.
        item: String,
    },

    /// Malformed algebra input (wrong lambda arity, non-sequence source, ...).
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// A result row could not be turned into a value.
    #[error("materialization error: {0}")]
    Materialize(String),

    /// The execution capability reported a failure.
    #[error("execution error: {0}")]
    Execution(String),

    /// Invalid configuration or mapping document.
    #[error("configuration error: {0}")]
    Config(#[from] serde_json::Error),

    /// A shared cache lock was poisoned by a panicking writer.
    #[error("cache lock poisoned: {0}")]
    Poisoned(&'static str),
}

impl QueryError {
    /// Shorthand for [`QueryError::Unsupported`].
    pub fn unsupported(construct: impl Into<String>) -> Self {
        Self::Unsupported {
            construct: construct.into(),
        }
    }

    /// Shorthand for [`QueryError::Mapping`].
    pub fn mapping(
        entity: impl Into<String>,
        member: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Mapping {
            entity: entity.into(),
            member: member.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for [`QueryError::InvalidQuery`].
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidQuery(message.into())
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, QueryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_offender() {
        let err = QueryError::mapping("Customer", "Nickname", "not mapped");
        assert_eq!(
            err.to_string(),
            "mapping error on Customer.Nickname: not mapped"
        );

        let err = QueryError::DependencyCycle {
            item: String::from("Order#1"),
        };
        assert_eq!(err.to_string(), "dependency cycle detected at Order#1");
    }

    #[test]
    fn test_config_error_from_json() {
        let bad: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: QueryError = bad.unwrap_err().into();
        assert!(matches!(err, QueryError::Config(_)));
    }
}
