//! SQL dialect support.
//!
//! The formatter renders structure; a [`Dialect`] supplies the spelling of
//! identifiers, parameters, functions and operators, and chooses how
//! offset/limit is expressed.

mod access;
mod generic;
mod tsql;

pub use access::AccessDialect;
pub use generic::GenericDialect;
pub use tsql::TsqlDialect;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ast::{BinaryOp, Function, Type};
use crate::error::{QueryError, Result};

/// How rows at an offset are selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OffsetStrategy {
    /// The dialect's own `OFFSET` clause.
    Native,
    /// A `ROW_NUMBER()` column filtered by range.
    RowNumber,
    /// Nested selects taking the leading rows in alternating order.
    NestedOrderBy,
}

/// How a row limit is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LimitStyle {
    /// `SELECT ... LIMIT n`.
    Limit,
    /// `SELECT TOP (n) ...`.
    Top,
}

/// Trait for SQL dialect-specific behavior.
pub trait Dialect: Send + Sync + fmt::Debug {
    /// Returns the name of the dialect.
    fn name(&self) -> &'static str;

    /// Quotes an identifier.
    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Returns the placeholder for a named parameter.
    fn parameter_placeholder(&self, name: &str) -> String {
        format!("@{name}")
    }

    /// Offset strategy applied by the rewrite pipeline.
    fn offset_strategy(&self) -> OffsetStrategy {
        OffsetStrategy::RowNumber
    }

    /// Limit syntax.
    fn limit_style(&self) -> LimitStyle {
        LimitStyle::Limit
    }

    /// The trailing limit clause for [`LimitStyle::Limit`] dialects.
    fn limit_clause(&self, take: Option<&str>, skip: Option<&str>) -> String {
        match (take, skip) {
            (Some(t), Some(s)) => format!("LIMIT {t} OFFSET {s}"),
            (Some(t), None) => format!("LIMIT {t}"),
            (None, Some(s)) => format!("OFFSET {s}"),
            (None, None) => String::new(),
        }
    }

    /// The leading `TOP` clause for [`LimitStyle::Top`] dialects.
    fn top_clause(&self, take: &str) -> String {
        format!("TOP ({take}) ")
    }

    /// Returns whether `CROSS APPLY`/`OUTER APPLY` can be written.
    fn supports_apply(&self) -> bool {
        false
    }

    /// Returns whether `IF`/`DECLARE` batches can be written.
    fn supports_control_flow(&self) -> bool {
        false
    }

    /// Returns whether nested joins need parentheses around the left side.
    fn nests_joins(&self) -> bool {
        false
    }

    /// Returns whether `EXCEPT`/`INTERSECT` are available.
    fn supports_set_difference(&self) -> bool {
        true
    }

    /// Returns whether the function can be evaluated by the server.
    fn supports_function(&self, function: Function) -> bool {
        let _ = function;
        true
    }

    /// Returns whether the operator can be evaluated by the server.
    fn supports_operator(&self, op: BinaryOp) -> bool {
        let _ = op;
        true
    }

    /// Literal for a boolean in value context.
    fn bool_literal(&self, value: bool) -> &'static str {
        if value {
            "1"
        } else {
            "0"
        }
    }

    /// Keyword joining two sources in a cross join.
    fn cross_join_keyword(&self) -> &'static str {
        "CROSS JOIN"
    }

    /// Ordering used by `ROW_NUMBER()` when none is given.
    fn row_number_default_order(&self) -> &'static str {
        ""
    }

    /// SQL type name for variable declarations.
    fn type_name(&self, ty: &Type) -> Result<&'static str> {
        match ty {
            Type::Bool => Ok("BOOLEAN"),
            Type::Int => Ok("BIGINT"),
            Type::Float => Ok("DOUBLE PRECISION"),
            Type::Text => Ok("VARCHAR"),
            Type::Blob => Ok("BLOB"),
            Type::DateTime => Ok("TIMESTAMP"),
            other => Err(QueryError::unsupported(format!(
                "type {other} in {} declarations",
                self.name()
            ))),
        }
    }

    /// Renders a binary operation over already rendered operands.
    fn binary(&self, op: BinaryOp, left: &str, right: &str) -> Result<String> {
        Ok(match op {
            BinaryOp::Coalesce => format!("COALESCE({left}, {right})"),
            other => format!("{left} {} {right}", other.as_str()),
        })
    }

    /// Renders a conditional value.
    fn conditional(&self, test: &str, if_true: &str, if_false: &str) -> String {
        format!("CASE WHEN {test} THEN {if_true} ELSE {if_false} END")
    }

    /// Renders a function call over already rendered arguments.
    fn function(&self, function: Function, args: &[String]) -> Result<String> {
        generic_function(self.name(), function, args)
    }
}

/// Argument `i` of a function call, or an arity error naming the function.
///
/// # Errors
///
/// Returns [`QueryError::InvalidQuery`] when fewer than `i + 1` arguments
/// were rendered.
pub fn arg<'a>(dialect: &str, function: Function, args: &'a [String], i: usize) -> Result<&'a str> {
    args.get(i).map(String::as_str).ok_or_else(|| {
        QueryError::invalid(format!(
            "{} expects at least {} arguments in {dialect}",
            function.as_str(),
            i + 1
        ))
    })
}

/// ANSI-leaning spellings shared by most dialects. Dialects override the
/// functions they spell differently and fall back to this for the rest.
///
/// # Errors
///
/// Returns an error when an argument is missing.
pub fn generic_function(dialect: &str, function: Function, args: &[String]) -> Result<String> {
    let a = |i| arg(dialect, function, args, i);
    Ok(match function {
        Function::Length
        | Function::Upper
        | Function::Lower
        | Function::Trim
        | Function::Abs
        | Function::Floor
        | Function::Sqrt
        | Function::Sign => format!("{}({})", function.as_str(), a(0)?),
        Function::Ceiling => format!("CEIL({})", a(0)?),
        Function::Round => match args.get(1) {
            Some(digits) => format!("ROUND({}, {digits})", a(0)?),
            None => format!("ROUND({})", a(0)?),
        },
        Function::Power => format!("POWER({}, {})", a(0)?, a(1)?),
        Function::Substring => match args.get(2) {
            Some(len) => format!("SUBSTR({}, {} + 1, {len})", a(0)?, a(1)?),
            None => format!("SUBSTR({}, {} + 1)", a(0)?, a(1)?),
        },
        Function::Replace => format!("REPLACE({}, {}, {})", a(0)?, a(1)?, a(2)?),
        Function::IndexOf => format!("(INSTR({}, {}) - 1)", a(0)?, a(1)?),
        Function::Contains => format!("{} LIKE '%' || {} || '%'", a(0)?, a(1)?),
        Function::StartsWith => format!("{} LIKE {} || '%'", a(0)?, a(1)?),
        Function::EndsWith => format!("{} LIKE '%' || {}", a(0)?, a(1)?),
        Function::Year
        | Function::Month
        | Function::Day
        | Function::Hour
        | Function::Minute
        | Function::Second => format!("EXTRACT({} FROM {})", function.as_str(), a(0)?),
        Function::Now => "CURRENT_TIMESTAMP".to_string(),
        Function::GeneratedIdentity => "LAST_INSERT_ID()".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limit_clause() {
        let d = GenericDialect::new();
        assert_eq!(d.limit_clause(Some("5"), Some("10")), "LIMIT 5 OFFSET 10");
        assert_eq!(d.limit_clause(None, Some("10")), "OFFSET 10");
        assert_eq!(d.limit_clause(None, None), "");
    }

    #[test]
    fn test_generic_functions() {
        let d = GenericDialect::new();
        let args = vec!["t0.\"Name\"".to_string(), "2".to_string(), "3".to_string()];
        assert_eq!(
            d.function(Function::Substring, &args).unwrap(),
            "SUBSTR(t0.\"Name\", 2 + 1, 3)"
        );
        assert!(d.function(Function::Replace, &args[..1]).is_err());
        assert_eq!(
            d.binary(BinaryOp::Coalesce, "a", "b").unwrap(),
            "COALESCE(a, b)"
        );
    }
}
