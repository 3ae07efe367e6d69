//! Runtime values: SQL parameters, result rows and materialized objects.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::{QueryError, Result};

/// A scalar SQL value, used for constants, parameters and row cells.
#[derive(Debug, Clone, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum SqlValue {
    /// NULL value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Float value.
    Float(f64),
    /// Text value.
    Text(String),
    /// Binary blob value.
    Blob(Vec<u8>),
    /// Timestamp without time zone.
    DateTime(NaiveDateTime),
}

impl SqlValue {
    /// Returns the SQL representation for inline use (escaped).
    ///
    /// **Warning**: Prefer using parameterized queries instead.
    #[must_use]
    pub fn to_sql_inline(&self) -> String {
        match self {
            Self::Null => String::from("NULL"),
            Self::Bool(b) => {
                if *b {
                    String::from("1")
                } else {
                    String::from("0")
                }
            }
            Self::Int(n) => format!("{n}"),
            Self::Float(f) => {
                if f.fract() == 0.0 && f.is_finite() {
                    format!("{f:.1}")
                } else {
                    format!("{f}")
                }
            }
            Self::Text(s) => {
                // Escape single quotes by doubling them
                let escaped = s.replace('\'', "''");
                format!("'{escaped}'")
            }
            Self::Blob(b) => {
                let hex: String = b.iter().map(|byte| format!("{byte:02X}")).collect();
                format!("X'{hex}'")
            }
            Self::DateTime(dt) => format!("'{}'", dt.format("%Y-%m-%d %H:%M:%S%.f")),
        }
    }

    /// Returns true for [`SqlValue::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the integer value, widening booleans.
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    /// Interprets the value as a boolean the way SQL engines report them.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Int(n) => Some(*n != 0),
            Self::Float(f) => Some(*f != 0.0),
            _ => None,
        }
    }

    /// A stable textual key, used for hashing values on the client side.
    #[must_use]
    pub fn key(&self) -> String {
        match self {
            Self::Bool(b) => format!("{}", i64::from(*b)),
            Self::Float(f) if f.fract() == 0.0 => format!("{f:.0}"),
            other => other.to_sql_inline(),
        }
    }

    /// Short type label used in messages.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Blob(_) => "blob",
            Self::DateTime(_) => "datetime",
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sql_inline())
    }
}

/// Trait for types that can be converted to SQL values.
pub trait ToSqlValue {
    /// Converts the value to a `SqlValue`.
    fn to_sql_value(self) -> SqlValue;
}

impl ToSqlValue for SqlValue {
    fn to_sql_value(self) -> SqlValue {
        self
    }
}

impl ToSqlValue for bool {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Bool(self)
    }
}

impl ToSqlValue for i64 {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Int(self)
    }
}

impl ToSqlValue for i32 {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Int(i64::from(self))
    }
}

impl ToSqlValue for u32 {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Int(i64::from(self))
    }
}

impl ToSqlValue for f64 {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Float(self)
    }
}

impl ToSqlValue for String {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Text(self)
    }
}

impl ToSqlValue for &str {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Text(String::from(self))
    }
}

impl ToSqlValue for NaiveDateTime {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::DateTime(self)
    }
}

impl<T: ToSqlValue> ToSqlValue for Option<T> {
    fn to_sql_value(self) -> SqlValue {
        match self {
            Some(v) => v.to_sql_value(),
            None => SqlValue::Null,
        }
    }
}

/// A materialized instance of a mapped entity or anonymous record.
///
/// `entity` is `None` for records built by projections.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Object {
    /// Name of the entity this object is an instance of.
    pub entity: Option<String>,
    /// Member values keyed by member name.
    pub fields: BTreeMap<String, Value>,
}

impl Object {
    /// Creates an empty instance of an entity.
    #[must_use]
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: Some(entity.into()),
            fields: BTreeMap::new(),
        }
    }

    /// Creates an empty anonymous record.
    #[must_use]
    pub fn record() -> Self {
        Self::default()
    }

    /// Sets a member, builder style.
    #[must_use]
    pub fn with(mut self, member: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(member.into(), value.into());
        self
    }

    /// Sets a member in place.
    pub fn set(&mut self, member: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(member.into(), value.into());
    }

    /// Reads a member.
    #[must_use]
    pub fn get(&self, member: &str) -> Option<&Value> {
        self.fields.get(member)
    }

    /// Reads a member, failing when missing.
    pub fn require(&self, member: &str) -> Result<&Value> {
        self.fields.get(member).ok_or_else(|| {
            QueryError::Materialize(format!(
                "{} has no member {member}",
                self.entity.as_deref().unwrap_or("record")
            ))
        })
    }
}

/// A value produced by evaluating a projector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// A scalar.
    Scalar(SqlValue),
    /// An entity instance or record.
    Object(Object),
    /// A sequence (collection navigation, grouping, list result).
    List(Vec<Value>),
}

impl Value {
    /// The null scalar.
    pub const NULL: Self = Self::Scalar(SqlValue::Null);

    /// Returns true for a null scalar.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Scalar(SqlValue::Null))
    }

    /// Returns the scalar payload, if any.
    #[must_use]
    pub const fn as_scalar(&self) -> Option<&SqlValue> {
        match self {
            Self::Scalar(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the object payload, if any.
    #[must_use]
    pub const fn as_object(&self) -> Option<&Object> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Returns the list payload, if any.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Reads a member of an object value; null propagates.
    pub fn member(&self, name: &str) -> Result<Self> {
        match self {
            Self::Object(o) => Ok(o.get(name).cloned().unwrap_or(Self::NULL)),
            Self::Scalar(SqlValue::Null) => Ok(Self::NULL),
            other => Err(QueryError::Materialize(format!(
                "cannot read member {name} of {other:?}"
            ))),
        }
    }
}

impl From<SqlValue> for Value {
    fn from(value: SqlValue) -> Self {
        Self::Scalar(value)
    }
}

impl From<Object> for Value {
    fn from(value: Object) -> Self {
        Self::Object(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Scalar(SqlValue::Int(value))
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Scalar(SqlValue::Int(i64::from(value)))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Scalar(SqlValue::Text(value.to_string()))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Scalar(SqlValue::Text(value))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Scalar(SqlValue::Bool(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Scalar(SqlValue::Float(value))
    }
}

/// One result row, read by column ordinal.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    values: Vec<SqlValue>,
}

impl Row {
    /// Creates a row from its cells.
    #[must_use]
    pub const fn new(values: Vec<SqlValue>) -> Self {
        Self { values }
    }

    /// Reads the cell at `ordinal`.
    pub fn get(&self, ordinal: usize) -> Result<&SqlValue> {
        self.values.get(ordinal).ok_or_else(|| {
            QueryError::Materialize(format!(
                "column ordinal {ordinal} out of range ({} columns)",
                self.values.len()
            ))
        })
    }

    /// Number of cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true when the row has no cells.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// All cells in order.
    #[must_use]
    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }
}

impl From<Vec<SqlValue>> for Row {
    fn from(values: Vec<SqlValue>) -> Self {
        Self::new(values)
    }
}
