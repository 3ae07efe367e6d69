//! Microsoft Access (Jet) dialect.

use super::{arg, generic_function, Dialect, LimitStyle, OffsetStrategy};
use crate::ast::{BinaryOp, Function};
use crate::error::{QueryError, Result};

/// Access dialect: no window functions, so offsets use nested `TOP`
/// selects; shifts become multiplication by powers of two.
#[derive(Debug, Default, Clone, Copy)]
pub struct AccessDialect;

impl AccessDialect {
    /// Creates a new Access dialect.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Dialect for AccessDialect {
    fn name(&self) -> &'static str {
        "access"
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("[{name}]")
    }

    fn offset_strategy(&self) -> OffsetStrategy {
        OffsetStrategy::NestedOrderBy
    }

    fn limit_style(&self) -> LimitStyle {
        LimitStyle::Top
    }

    fn top_clause(&self, take: &str) -> String {
        format!("TOP {take} ")
    }

    fn nests_joins(&self) -> bool {
        true
    }

    fn supports_set_difference(&self) -> bool {
        false
    }

    fn cross_join_keyword(&self) -> &'static str {
        ","
    }

    fn supports_operator(&self, op: BinaryOp) -> bool {
        !matches!(op, BinaryOp::BitXor)
    }

    fn binary(&self, op: BinaryOp, left: &str, right: &str) -> Result<String> {
        Ok(match op {
            BinaryOp::Concat => format!("{left} & {right}"),
            BinaryOp::Mod => format!("{left} MOD {right}"),
            BinaryOp::BitAnd => format!("{left} BAND {right}"),
            BinaryOp::BitOr => format!("{left} BOR {right}"),
            BinaryOp::LeftShift => format!("{left} * 2 ^ {right}"),
            BinaryOp::RightShift => format!("{left} \\ 2 ^ {right}"),
            BinaryOp::Coalesce => format!("IIF({left} IS NULL, {right}, {left})"),
            BinaryOp::BitXor => {
                return Err(QueryError::unsupported("bitwise XOR in access"));
            }
            other => format!("{left} {} {right}", other.as_str()),
        })
    }

    fn conditional(&self, test: &str, if_true: &str, if_false: &str) -> String {
        format!("IIF({test}, {if_true}, {if_false})")
    }

    fn function(&self, function: Function, args: &[String]) -> Result<String> {
        let a = |i| arg("access", function, args, i);
        Ok(match function {
            Function::Length => format!("Len({})", a(0)?),
            Function::Upper => format!("UCase({})", a(0)?),
            Function::Lower => format!("LCase({})", a(0)?),
            Function::Ceiling => format!("-Int(-{})", a(0)?),
            Function::Floor => format!("Int({})", a(0)?),
            Function::Sqrt => format!("Sqr({})", a(0)?),
            Function::Sign => format!("Sgn({})", a(0)?),
            Function::Power => format!("{} ^ {}", a(0)?, a(1)?),
            Function::Substring => match args.get(2) {
                Some(len) => format!("Mid({}, {} + 1, {len})", a(0)?, a(1)?),
                None => format!("Mid({}, {} + 1)", a(0)?, a(1)?),
            },
            Function::IndexOf => format!("(InStr({}, {}) - 1)", a(0)?, a(1)?),
            Function::Contains => format!("{} LIKE '*' & {} & '*'", a(0)?, a(1)?),
            Function::StartsWith => format!("{} LIKE {} & '*'", a(0)?, a(1)?),
            Function::EndsWith => format!("{} LIKE '*' & {}", a(0)?, a(1)?),
            Function::Year => format!("Year({})", a(0)?),
            Function::Month => format!("Month({})", a(0)?),
            Function::Day => format!("Day({})", a(0)?),
            Function::Hour => format!("Hour({})", a(0)?),
            Function::Minute => format!("Minute({})", a(0)?),
            Function::Second => format!("Second({})", a(0)?),
            Function::Now => "Now()".to_string(),
            Function::GeneratedIdentity => "@@IDENTITY".to_string(),
            other => generic_function("access", other, args)?,
        })
    }
}
