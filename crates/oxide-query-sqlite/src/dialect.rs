//! SQLite dialect implementation.

use oxide_query_core::ast::{BinaryOp, Function, Type};
use oxide_query_core::dialect::{arg, generic_function, Dialect, LimitStyle, OffsetStrategy};
use oxide_query_core::error::{QueryError, Result};

/// SQLite dialect.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteDialect;

impl SqliteDialect {
    /// Creates a new SQLite dialect.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

/// `strftime` pattern for a date part.
const fn date_part(function: Function) -> Option<&'static str> {
    match function {
        Function::Year => Some("%Y"),
        Function::Month => Some("%m"),
        Function::Day => Some("%d"),
        Function::Hour => Some("%H"),
        Function::Minute => Some("%M"),
        Function::Second => Some("%S"),
        _ => None,
    }
}

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn offset_strategy(&self) -> OffsetStrategy {
        OffsetStrategy::Native
    }

    fn limit_style(&self) -> LimitStyle {
        LimitStyle::Limit
    }

    fn limit_clause(&self, take: Option<&str>, skip: Option<&str>) -> String {
        match (take, skip) {
            (Some(t), Some(s)) => format!("LIMIT {t} OFFSET {s}"),
            (Some(t), None) => format!("LIMIT {t}"),
            // OFFSET needs a LIMIT; -1 means no limit.
            (None, Some(s)) => format!("LIMIT -1 OFFSET {s}"),
            (None, None) => String::new(),
        }
    }

    fn supports_function(&self, function: Function) -> bool {
        // Math functions are a compile-time option of the library.
        !matches!(function, Function::Sqrt | Function::Power)
    }

    fn type_name(&self, ty: &Type) -> Result<&'static str> {
        match ty {
            Type::Bool | Type::Int => Ok("INTEGER"),
            Type::Float => Ok("REAL"),
            Type::Text | Type::DateTime => Ok("TEXT"),
            Type::Blob => Ok("BLOB"),
            other => Err(QueryError::unsupported(format!(
                "type {other} in sqlite declarations"
            ))),
        }
    }

    fn binary(&self, op: BinaryOp, left: &str, right: &str) -> Result<String> {
        Ok(match op {
            BinaryOp::BitXor => format!("(~({left} & {right}) & ({left} | {right}))"),
            BinaryOp::Coalesce => format!("COALESCE({left}, {right})"),
            other => format!("{left} {} {right}", other.as_str()),
        })
    }

    fn function(&self, function: Function, args: &[String]) -> Result<String> {
        let a = |i| arg("sqlite", function, args, i);
        if let Some(pattern) = date_part(function) {
            return Ok(format!("CAST(strftime('{pattern}', {}) AS INTEGER)", a(0)?));
        }
        Ok(match function {
            Function::Floor => {
                let x = a(0)?;
                format!("(CAST({x} AS INTEGER) - ({x} < CAST({x} AS INTEGER)))")
            }
            Function::Ceiling => {
                let x = a(0)?;
                format!("(CAST({x} AS INTEGER) + ({x} > CAST({x} AS INTEGER)))")
            }
            Function::Sign => {
                let x = a(0)?;
                format!("(CASE WHEN {x} > 0 THEN 1 WHEN {x} < 0 THEN -1 ELSE 0 END)")
            }
            Function::Sqrt | Function::Power => {
                return Err(QueryError::unsupported(format!(
                    "{} in sqlite",
                    function.as_str()
                )));
            }
            Function::Now => "CURRENT_TIMESTAMP".to_string(),
            Function::GeneratedIdentity => "last_insert_rowid()".to_string(),
            other => generic_function("sqlite", other, args)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_dialect() {
        let d = SqliteDialect::new();
        assert_eq!(d.name(), "sqlite");
        assert_eq!(d.quote_identifier("order"), "\"order\"");
        assert_eq!(d.offset_strategy(), OffsetStrategy::Native);
        assert!(!d.supports_apply());
        assert!(!d.supports_control_flow());
    }

    #[test]
    fn test_skip_without_take() {
        let d = SqliteDialect::new();
        assert_eq!(d.limit_clause(None, Some("10")), "LIMIT -1 OFFSET 10");
        assert_eq!(d.limit_clause(Some("5"), Some("10")), "LIMIT 5 OFFSET 10");
        assert_eq!(d.limit_clause(Some("5"), None), "LIMIT 5");
    }

    #[test]
    fn test_functions() {
        let d = SqliteDialect::new();
        let x = vec!["t0.\"Placed\"".to_string()];
        assert_eq!(
            d.function(Function::Year, &x).unwrap(),
            "CAST(strftime('%Y', t0.\"Placed\") AS INTEGER)"
        );
        assert_eq!(
            d.function(Function::GeneratedIdentity, &[]).unwrap(),
            "last_insert_rowid()"
        );
        assert_eq!(
            d.function(Function::Upper, &x).unwrap(),
            "UPPER(t0.\"Placed\")"
        );
        assert!(!d.supports_function(Function::Sqrt));
        assert!(d.function(Function::Power, &x).is_err());
    }

    #[test]
    fn test_xor_is_spelled_out() {
        let d = SqliteDialect::new();
        assert_eq!(
            d.binary(BinaryOp::BitXor, "a", "b").unwrap(),
            "(~(a & b) & (a | b))"
        );
        assert_eq!(d.binary(BinaryOp::Concat, "a", "b").unwrap(), "a || b");
    }
}
