//! Transact-SQL dialect.

use super::{arg, generic_function, Dialect, LimitStyle, OffsetStrategy};
use crate::ast::{BinaryOp, Function, Type};
use crate::error::{QueryError, Result};

/// SQL Server dialect: bracket quoting, `TOP`, `APPLY` and batches.
#[derive(Debug, Default, Clone, Copy)]
pub struct TsqlDialect;

impl TsqlDialect {
    /// Creates a new T-SQL dialect.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Dialect for TsqlDialect {
    fn name(&self) -> &'static str {
        "tsql"
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("[{}]", name.replace(']', "]]"))
    }

    fn offset_strategy(&self) -> OffsetStrategy {
        OffsetStrategy::RowNumber
    }

    fn limit_style(&self) -> LimitStyle {
        LimitStyle::Top
    }

    fn supports_apply(&self) -> bool {
        true
    }

    fn supports_control_flow(&self) -> bool {
        true
    }

    fn row_number_default_order(&self) -> &'static str {
        "ORDER BY (SELECT 1)"
    }

    fn type_name(&self, ty: &Type) -> Result<&'static str> {
        match ty {
            Type::Bool => Ok("BIT"),
            Type::Int => Ok("BIGINT"),
            Type::Float => Ok("FLOAT"),
            Type::Text => Ok("NVARCHAR(MAX)"),
            Type::Blob => Ok("VARBINARY(MAX)"),
            Type::DateTime => Ok("DATETIME2"),
            other => Err(QueryError::unsupported(format!("type {other} in tsql declarations"))),
        }
    }

    fn binary(&self, op: BinaryOp, left: &str, right: &str) -> Result<String> {
        Ok(match op {
            BinaryOp::Concat => format!("{left} + {right}"),
            BinaryOp::LeftShift => format!("{left} * POWER(2, {right})"),
            BinaryOp::RightShift => format!("{left} / POWER(2, {right})"),
            BinaryOp::Coalesce => format!("COALESCE({left}, {right})"),
            other => format!("{left} {} {right}", other.as_str()),
        })
    }

    fn function(&self, function: Function, args: &[String]) -> Result<String> {
        let a = |i| arg("tsql", function, args, i);
        Ok(match function {
            Function::Length => format!("LEN({})", a(0)?),
            Function::Trim => format!("RTRIM(LTRIM({}))", a(0)?),
            Function::Ceiling => format!("CEILING({})", a(0)?),
            Function::Sqrt => format!("SQRT({})", a(0)?),
            Function::Round => format!(
                "ROUND({}, {})",
                a(0)?,
                args.get(1).map_or("0", String::as_str)
            ),
            Function::Substring => format!(
                "SUBSTRING({}, {} + 1, {})",
                a(0)?,
                a(1)?,
                args.get(2).map_or("8000", String::as_str)
            ),
            Function::IndexOf => format!("(CHARINDEX({}, {}) - 1)", a(1)?, a(0)?),
            Function::Contains => format!("{} LIKE '%' + {} + '%'", a(0)?, a(1)?),
            Function::StartsWith => format!("{} LIKE {} + '%'", a(0)?, a(1)?),
            Function::EndsWith => format!("{} LIKE '%' + {}", a(0)?, a(1)?),
            Function::Year
            | Function::Month
            | Function::Day
            | Function::Hour
            | Function::Minute
            | Function::Second => format!(
                "DATEPART({}, {})",
                function.as_str().to_lowercase(),
                a(0)?
            ),
            Function::Now => "GETDATE()".to_string(),
            Function::GeneratedIdentity => "SCOPE_IDENTITY()".to_string(),
            other => generic_function("tsql", other, args)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tsql_dialect() {
        let d = TsqlDialect::new();
        assert_eq!(d.quote_identifier("Order Details"), "[Order Details]");
        assert_eq!(d.top_clause("10"), "TOP (10) ");
        assert_eq!(d.limit_style(), LimitStyle::Top);
        assert!(d.supports_apply());
        assert_eq!(d.type_name(&Type::Int).unwrap(), "BIGINT");
    }

    #[test]
    fn test_tsql_spellings() {
        let d = TsqlDialect::new();
        let args = vec!["a".to_string(), "b".to_string()];
        assert_eq!(d.function(Function::IndexOf, &args).unwrap(), "(CHARINDEX(b, a) - 1)");
        assert_eq!(d.function(Function::Year, &args).unwrap(), "DATEPART(year, a)");
        assert_eq!(d.binary(BinaryOp::Concat, "a", "b").unwrap(), "a + b");
        assert_eq!(
            d.binary(BinaryOp::LeftShift, "a", "b").unwrap(),
            "a * POWER(2, b)"
        );
    }
}
