//! Result type tags carried by every expression node.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::{SqlValue, Value};

/// The static result type of an expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Type {
    /// Type not known; treated as an opaque scalar.
    #[default]
    Unknown,
    /// Commands and blocks.
    Void,
    /// Boolean.
    Bool,
    /// 64-bit integer.
    Int,
    /// Double precision float.
    Float,
    /// Text.
    Text,
    /// Binary.
    Blob,
    /// Timestamp.
    DateTime,
    /// Instance of a mapped entity.
    Entity(String),
    /// Anonymous record with named fields.
    Record(Vec<(String, Type)>),
    /// A sequence of elements.
    Sequence(Box<Type>),
    /// A group: key plus a sequence of elements.
    Grouping {
        /// Type of the grouping key.
        key: Box<Type>,
        /// Type of each grouped element.
        element: Box<Type>,
    },
}

impl Type {
    /// Creates `Sequence(element)`.
    #[must_use]
    pub fn sequence(element: Self) -> Self {
        Self::Sequence(Box::new(element))
    }

    /// Returns true for types that map onto a single SQL column.
    #[must_use]
    pub const fn is_scalar(&self) -> bool {
        matches!(
            self,
            Self::Unknown
                | Self::Bool
                | Self::Int
                | Self::Float
                | Self::Text
                | Self::Blob
                | Self::DateTime
        )
    }

    /// Returns true for [`Type::Bool`].
    #[must_use]
    pub const fn is_bool(&self) -> bool {
        matches!(self, Self::Bool)
    }

    /// Returns true for numeric types.
    #[must_use]
    pub const fn is_numeric(&self) -> bool {
        matches!(self, Self::Int | Self::Float)
    }

    /// Returns true for sequences and groupings.
    #[must_use]
    pub const fn is_sequence(&self) -> bool {
        matches!(self, Self::Sequence(_) | Self::Grouping { .. })
    }

    /// Returns true for entity and record types.
    #[must_use]
    pub const fn is_structured(&self) -> bool {
        matches!(self, Self::Entity(_) | Self::Record(_))
    }

    /// Element type of a sequence or grouping.
    #[must_use]
    pub fn element(&self) -> Option<&Self> {
        match self {
            Self::Sequence(e) => Some(e),
            Self::Grouping { element, .. } => Some(element),
            _ => None,
        }
    }

    /// Entity name for entity types.
    #[must_use]
    pub fn entity_name(&self) -> Option<&str> {
        match self {
            Self::Entity(name) => Some(name),
            _ => None,
        }
    }

    /// Type of a named field in a record type.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Self> {
        match self {
            Self::Record(fields) => fields.iter().find(|(n, _)| n == name).map(|(_, t)| t),
            _ => None,
        }
    }

    /// Infers the type of a runtime value.
    #[must_use]
    pub fn of_value(value: &Value) -> Self {
        match value {
            Value::Scalar(s) => Self::of_sql_value(s),
            Value::Object(o) => o
                .entity
                .as_ref()
                .map_or_else(|| Self::Record(Vec::new()), |e| Self::Entity(e.clone())),
            Value::List(items) => {
                Self::sequence(items.first().map_or(Self::Unknown, Self::of_value))
            }
        }
    }

    /// Infers the type of a scalar value.
    #[must_use]
    pub const fn of_sql_value(value: &SqlValue) -> Self {
        match value {
            SqlValue::Null => Self::Unknown,
            SqlValue::Bool(_) => Self::Bool,
            SqlValue::Int(_) => Self::Int,
            SqlValue::Float(_) => Self::Float,
            SqlValue::Text(_) => Self::Text,
            SqlValue::Blob(_) => Self::Blob,
            SqlValue::DateTime(_) => Self::DateTime,
        }
    }

    /// The value a defaulted aggregate or `*_or_default` returns.
    #[must_use]
    pub const fn default_value(&self) -> Value {
        match self {
            Self::Bool => Value::Scalar(SqlValue::Bool(false)),
            Self::Int => Value::Scalar(SqlValue::Int(0)),
            Self::Float => Value::Scalar(SqlValue::Float(0.0)),
            _ => Value::NULL,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "?"),
            Self::Void => write!(f, "void"),
            Self::Bool => write!(f, "bool"),
            Self::Int => write!(f, "int"),
            Self::Float => write!(f, "float"),
            Self::Text => write!(f, "text"),
            Self::Blob => write!(f, "blob"),
            Self::DateTime => write!(f, "datetime"),
            Self::Entity(name) => write!(f, "{name}"),
            Self::Record(fields) => {
                write!(f, "{{")?;
                for (i, (name, ty)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}: {ty}")?;
                }
                write!(f, "}}")
            }
            Self::Sequence(e) => write!(f, "[{e}]"),
            Self::Grouping { key, element } => write!(f, "group<{key}, {element}>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_classification() {
        assert!(Type::Int.is_scalar());
        assert!(Type::Int.is_numeric());
        assert!(!Type::Entity("Customer".into()).is_scalar());
        assert!(Type::sequence(Type::Int).is_sequence());
        assert_eq!(Type::sequence(Type::Text).element(), Some(&Type::Text));
    }

    #[test]
    fn test_type_display() {
        let ty = Type::sequence(Type::Record(vec![
            ("Id".into(), Type::Int),
            ("Name".into(), Type::Text),
        ]));
        assert_eq!(ty.to_string(), "[{Id: int, Name: text}]");
    }

    #[test]
    fn test_default_values() {
        assert_eq!(Type::Int.default_value(), Value::from(0));
        assert!(Type::Entity("Order".into()).default_value().is_null());
    }
}
