//! Typed boundary between Rust structs and the dynamic object model.
//!
//! The engine works on [`Object`] values and [`EntityDef`] metadata only.
//! `#[derive(Entity)]` implements these traits so typed code can register
//! its structs as mappings and convert results back.

use chrono::NaiveDateTime;

use crate::ast::Type;
use crate::error::{QueryError, Result};
use crate::mapping::EntityDef;
use crate::value::{Object, SqlValue, Value};

/// A Rust type stored in one member of an entity.
pub trait FieldValue: Sized {
    /// Column type of the member, or the related type for navigations.
    fn field_type() -> Type;

    /// Converts into the dynamic model.
    fn to_value(&self) -> Value;

    /// Converts from the dynamic model.
    fn from_value(value: &Value) -> Result<Self>;
}

/// A struct mapped onto a table.
pub trait Entity: Sized {
    /// Logical entity name.
    const NAME: &'static str;

    /// Mapping metadata.
    fn entity_def() -> EntityDef;

    /// Converts an instance into an object.
    fn to_object(&self) -> Object;

    /// Builds an instance from an object.
    fn from_object(object: &Object) -> Result<Self>;
}

fn mismatch(expected: &str, value: &Value) -> QueryError {
    QueryError::Materialize(format!("expected {expected}, found {value:?}"))
}

impl FieldValue for i64 {
    fn field_type() -> Type {
        Type::Int
    }

    fn to_value(&self) -> Value {
        Value::Scalar(SqlValue::Int(*self))
    }

    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Scalar(SqlValue::Int(n)) => Ok(*n),
            Value::Scalar(SqlValue::Bool(b)) => Ok(i64::from(*b)),
            #[allow(clippy::cast_possible_truncation)]
            Value::Scalar(SqlValue::Float(f)) => Ok(*f as i64),
            other => Err(mismatch("integer", other)),
        }
    }
}

impl FieldValue for i32 {
    fn field_type() -> Type {
        Type::Int
    }

    fn to_value(&self) -> Value {
        Value::Scalar(SqlValue::Int(i64::from(*self)))
    }

    fn from_value(value: &Value) -> Result<Self> {
        let n = i64::from_value(value)?;
        Self::try_from(n).map_err(|_| mismatch("32-bit integer", value))
    }
}

impl FieldValue for f64 {
    fn field_type() -> Type {
        Type::Float
    }

    fn to_value(&self) -> Value {
        Value::Scalar(SqlValue::Float(*self))
    }

    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Scalar(SqlValue::Float(f)) => Ok(*f),
            #[allow(clippy::cast_precision_loss)]
            Value::Scalar(SqlValue::Int(n)) => Ok(*n as f64),
            other => Err(mismatch("float", other)),
        }
    }
}

impl FieldValue for bool {
    fn field_type() -> Type {
        Type::Bool
    }

    fn to_value(&self) -> Value {
        Value::Scalar(SqlValue::Bool(*self))
    }

    fn from_value(value: &Value) -> Result<Self> {
        value
            .as_scalar()
            .and_then(SqlValue::as_bool)
            .ok_or_else(|| mismatch("boolean", value))
    }
}

impl FieldValue for String {
    fn field_type() -> Type {
        Type::Text
    }

    fn to_value(&self) -> Value {
        Value::Scalar(SqlValue::Text(self.clone()))
    }

    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Scalar(SqlValue::Text(s)) => Ok(s.clone()),
            other => Err(mismatch("text", other)),
        }
    }
}

impl FieldValue for NaiveDateTime {
    fn field_type() -> Type {
        Type::DateTime
    }

    fn to_value(&self) -> Value {
        Value::Scalar(SqlValue::DateTime(*self))
    }

    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Scalar(SqlValue::DateTime(dt)) => Ok(*dt),
            Value::Scalar(SqlValue::Text(s)) => {
                NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
                    .map_err(|e| QueryError::Materialize(format!("invalid timestamp {s}: {e}")))
            }
            other => Err(mismatch("timestamp", other)),
        }
    }
}

impl<T: FieldValue> FieldValue for Option<T> {
    fn field_type() -> Type {
        T::field_type()
    }

    fn to_value(&self) -> Value {
        self.as_ref().map_or(Value::NULL, FieldValue::to_value)
    }

    fn from_value(value: &Value) -> Result<Self> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

impl<T: FieldValue> FieldValue for Vec<T> {
    fn field_type() -> Type {
        Type::sequence(T::field_type())
    }

    fn to_value(&self) -> Value {
        Value::List(self.iter().map(FieldValue::to_value).collect())
    }

    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::List(items) => items.iter().map(T::from_value).collect(),
            v if v.is_null() => Ok(Vec::new()),
            other => Err(mismatch("list", other)),
        }
    }
}

/// Reads a member of an object for a generated `from_object`; a missing
/// member reads as null.
pub fn read_field<T: FieldValue>(object: &Object, member: &str) -> Result<T> {
    T::from_value(object.get(member).unwrap_or(&Value::NULL)).map_err(|e| match e {
        QueryError::Materialize(reason) => QueryError::Materialize(format!(
            "{}.{member}: {reason}",
            object.entity.as_deref().unwrap_or("record")
        )),
        other => other,
    })
}

/// Converts an object value into an entity, for generated `FieldValue`
/// impls.
pub fn entity_from_value<E: Entity>(value: &Value) -> Result<E> {
    match value {
        Value::Object(o) => E::from_object(o),
        other => Err(mismatch(E::NAME, other)),
    }
}
