//! SQL text generation.
//!
//! The formatter walks a rewritten tree and writes one clause per line,
//! indenting nested selects by two spaces. Aliases are renamed `t0`, `t1`,
//! ... in order of first use. Dialect-specific spellings come from the
//! [`Dialect`]; everything structural is decided here.
//!
//! Two rendering contexts exist. A predicate in value position is written
//! as a conditional yielding 1 or 0; a value in predicate position is
//! compared against zero.

use std::collections::HashMap;

use crate::ast::{
    AggregateExpr, BinaryOp, ColumnAssignment, ExprKind, ExprRef, Function, InSource, JoinKind,
    OrderExpr, OrderKind, SelectExpr, SetOpKind, TableAlias, UnaryOp, VariableDecl,
};
use crate::command::{QueryCommand, QueryParameter};
use crate::dialect::{Dialect, LimitStyle};
use crate::error::{QueryError, Result};
use crate::value::{SqlValue, Value};

/// Formats `expr` for `dialect`.
///
/// `expr` is a projection, a select, or a command. The projector of a
/// projection is not part of the text.
pub fn format_sql(dialect: &dyn Dialect, expr: &ExprRef) -> Result<QueryCommand> {
    let mut f = SqlFormatter::new(dialect);
    let text = f.statement(expr)?;
    Ok(QueryCommand::new(text, f.parameters))
}

/// Writes SQL text for one command.
pub struct SqlFormatter<'d> {
    dialect: &'d dyn Dialect,
    depth: usize,
    aliases: HashMap<TableAlias, usize>,
    parameters: Vec<QueryParameter>,
    /// Columns of this alias are written without a qualifier.
    unqualified: Option<TableAlias>,
}

impl std::fmt::Debug for SqlFormatter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlFormatter")
            .field("dialect", &self.dialect.name())
            .field("parameters", &self.parameters.len())
            .finish_non_exhaustive()
    }
}

fn is_predicate(e: &ExprRef) -> bool {
    match e.kind() {
        ExprKind::Binary { op, .. } => op.is_comparison() || op.is_logical(),
        ExprKind::Unary {
            op: UnaryOp::Not,
            operand,
        } => !operand.ty().is_numeric(),
        ExprKind::IsNull(_)
        | ExprKind::Between { .. }
        | ExprKind::Exists(_)
        | ExprKind::In(_) => true,
        ExprKind::Call { function, .. } => matches!(
            function,
            Function::Contains | Function::StartsWith | Function::EndsWith
        ),
        ExprKind::OuterJoined { expr, .. } => is_predicate(expr),
        _ => false,
    }
}

/// Operators whose operands can be regrouped without changing the result.
const fn is_associative(op: BinaryOp) -> bool {
    matches!(
        op,
        BinaryOp::Add
            | BinaryOp::Mul
            | BinaryOp::And
            | BinaryOp::Or
            | BinaryOp::BitAnd
            | BinaryOp::BitOr
            | BinaryOp::BitXor
            | BinaryOp::Concat
    )
}

fn needs_parens(parent: BinaryOp, child: &ExprRef, right: bool) -> bool {
    let ExprKind::Binary { op, .. } = child.kind() else {
        return false;
    };
    if parent == BinaryOp::Coalesce || *op == BinaryOp::Coalesce {
        return false;
    }
    op.precedence() < parent.precedence()
        || (right && op.precedence() == parent.precedence() && !is_associative(parent))
}

const fn join_keyword(kind: JoinKind) -> &'static str {
    match kind {
        JoinKind::CrossJoin => "CROSS JOIN",
        JoinKind::InnerJoin => "INNER JOIN",
        JoinKind::CrossApply => "CROSS APPLY",
        JoinKind::OuterApply => "OUTER APPLY",
        JoinKind::LeftOuter => "LEFT OUTER JOIN",
    }
}

impl<'d> SqlFormatter<'d> {
    /// A formatter with no aliases or parameters registered.
    #[must_use]
    pub fn new(dialect: &'d dyn Dialect) -> Self {
        Self {
            dialect,
            depth: 0,
            aliases: HashMap::new(),
            parameters: Vec::new(),
            unqualified: None,
        }
    }

    fn nl(&self) -> String {
        format!("\n{}", "  ".repeat(self.depth))
    }

    fn alias(&mut self, alias: TableAlias) -> String {
        let next = self.aliases.len();
        let n = *self.aliases.entry(alias).or_insert(next);
        format!("t{n}")
    }

    fn quote(&self, name: &str) -> String {
        self.dialect.quote_identifier(name)
    }

    /// Writes a top-level statement.
    pub fn statement(&mut self, expr: &ExprRef) -> Result<String> {
        match expr.kind() {
            ExprKind::Projection(p) => self.statement(&p.select),
            ExprKind::Select(s) => self.select(s),
            ExprKind::Insert { table, assignments } => self.insert(table, assignments),
            ExprKind::Update {
                table,
                where_clause,
                assignments,
            } => self.update(table, where_clause, assignments),
            ExprKind::Delete {
                table,
                where_clause,
            } => self.delete(table, where_clause.as_ref()),
            ExprKind::Block(commands) => {
                let parts = commands
                    .iter()
                    .map(|c| self.statement(c))
                    .collect::<Result<Vec<_>>>()?;
                Ok(parts.join(";\n"))
            }
            ExprKind::If {
                check,
                if_true,
                if_false,
            } => self.if_command(check, if_true, if_false.as_ref()),
            ExprKind::Declaration { variables, source } => self.declaration(variables, source),
            _ => Err(QueryError::unsupported(format!(
                "{} as a SQL statement",
                expr.kind_name()
            ))),
        }
    }

    fn select(&mut self, s: &SelectExpr) -> Result<String> {
        let mut sql = String::from("SELECT ");
        if s.distinct {
            sql.push_str("DISTINCT ");
        }
        let limit_style = self.dialect.limit_style();
        if limit_style == LimitStyle::Top {
            if s.skip.is_some() {
                return Err(QueryError::unsupported(format!(
                    "skip without a row-number rewrite in {}",
                    self.dialect.name()
                )));
            }
            if let Some(take) = &s.take {
                let take = self.value(take)?;
                sql.push_str(&self.dialect.top_clause(&take));
            }
        }
        if s.columns.is_empty() {
            sql.push_str("NULL");
        } else {
            let mut cols = Vec::with_capacity(s.columns.len());
            for d in &s.columns {
                let v = self.value(&d.expr)?;
                let bare = d.expr.as_column().is_some_and(|c| c.name == d.name);
                if bare {
                    cols.push(v);
                } else {
                    cols.push(format!("{v} AS {}", self.quote(&d.name)));
                }
            }
            sql.push_str(&cols.join(", "));
        }
        if let Some(from) = &s.from {
            let src = self.source(from)?;
            sql.push_str(&format!("{}FROM {src}", self.nl()));
        }
        if let Some(w) = &s.where_clause {
            let w = self.predicate(w)?;
            sql.push_str(&format!("{}WHERE {w}", self.nl()));
        }
        if !s.group_by.is_empty() {
            let keys = s
                .group_by
                .iter()
                .map(|g| self.value(g))
                .collect::<Result<Vec<_>>>()?;
            sql.push_str(&format!("{}GROUP BY {}", self.nl(), keys.join(", ")));
        }
        if !s.order_by.is_empty() {
            let keys = self.orderings(&s.order_by)?;
            sql.push_str(&format!("{}ORDER BY {keys}", self.nl()));
        }
        if limit_style == LimitStyle::Limit {
            let take = s.take.as_ref().map(|t| self.value(t)).transpose()?;
            let skip = s.skip.as_ref().map(|t| self.value(t)).transpose()?;
            let clause = self.dialect.limit_clause(take.as_deref(), skip.as_deref());
            if !clause.is_empty() {
                sql.push_str(&format!("{}{clause}", self.nl()));
            }
        }
        Ok(sql)
    }

    fn orderings(&mut self, order_by: &[OrderExpr]) -> Result<String> {
        let mut keys = Vec::with_capacity(order_by.len());
        for o in order_by {
            let k = self.value(&o.expr)?;
            keys.push(match o.kind {
                OrderKind::Ascending => k,
                OrderKind::Descending => format!("{k} DESC"),
            });
        }
        Ok(keys.join(", "))
    }

    /// `( <select> )` with the select indented one level deeper.
    fn subquery(&mut self, sel: &ExprRef) -> Result<String> {
        let ExprKind::Select(s) = sel.kind() else {
            return Err(QueryError::unsupported(format!(
                "{} as a subquery",
                sel.kind_name()
            )));
        };
        self.depth += 1;
        let open = self.nl();
        let body = self.select(s);
        self.depth -= 1;
        Ok(format!("({open}{}{})", body?, self.nl()))
    }

    fn source(&mut self, from: &ExprRef) -> Result<String> {
        match from.kind() {
            ExprKind::Table(t) => {
                let alias = self.alias(t.alias);
                Ok(format!("{} AS {alias}", self.quote(&t.name)))
            }
            ExprKind::Select(s) => {
                let alias = self.alias(s.alias);
                let sub = self.subquery(from)?;
                Ok(format!("{sub} AS {alias}"))
            }
            ExprKind::SetOp(op) => {
                if matches!(op.kind, SetOpKind::Except | SetOpKind::Intersect)
                    && !self.dialect.supports_set_difference()
                {
                    return Err(QueryError::unsupported(format!(
                        "{} in {}",
                        op.kind.as_str(),
                        self.dialect.name()
                    )));
                }
                let alias = self.alias(op.alias);
                let (ExprKind::Select(l), ExprKind::Select(r)) = (op.left.kind(), op.right.kind())
                else {
                    return Err(QueryError::unsupported("set operation over non-selects"));
                };
                self.depth += 1;
                let inner = self.nl();
                let left = self.select(l);
                let right = self.select(r);
                self.depth -= 1;
                Ok(format!(
                    "({inner}{}{inner}{}{inner}{}{}) AS {alias}",
                    left?,
                    op.kind.as_str(),
                    right?,
                    self.nl()
                ))
            }
            ExprKind::Join(j) => {
                if j.kind.is_apply() && !self.dialect.supports_apply() {
                    return Err(QueryError::unsupported(format!(
                        "{} in {}",
                        join_keyword(j.kind),
                        self.dialect.name()
                    )));
                }
                let mut left = self.source(&j.left)?;
                if self.dialect.nests_joins() && matches!(j.left.kind(), ExprKind::Join(_)) {
                    left = format!("({left})");
                }
                let mut right = self.source(&j.right)?;
                if matches!(j.right.kind(), ExprKind::Join(_)) {
                    right = format!("({right})");
                }
                let keyword = match j.kind {
                    JoinKind::CrossJoin => self.dialect.cross_join_keyword(),
                    other => join_keyword(other),
                };
                let mut sql = if keyword == "," {
                    format!("{left}, {right}")
                } else {
                    format!("{left}{}{keyword} {right}", self.nl())
                };
                if let Some(c) = &j.condition {
                    let c = self.predicate(c)?;
                    sql.push_str(&format!(" ON {c}"));
                }
                Ok(sql)
            }
            _ => Err(QueryError::unsupported(format!(
                "{} as a FROM source",
                from.kind_name()
            ))),
        }
    }

    /// Renders `e` where a value is expected.
    fn value(&mut self, e: &ExprRef) -> Result<String> {
        if is_predicate(e) {
            let test = self.node(e)?;
            return Ok(self.dialect.conditional(
                &test,
                self.dialect.bool_literal(true),
                self.dialect.bool_literal(false),
            ));
        }
        self.node(e)
    }

    /// Renders `e` where a truth value is expected.
    fn predicate(&mut self, e: &ExprRef) -> Result<String> {
        if is_predicate(e) {
            return self.node(e);
        }
        if let Some(Value::Scalar(SqlValue::Bool(b))) = e.as_constant() {
            return Ok(if *b { "1 = 1" } else { "1 = 0" }.to_string());
        }
        let v = self.node(e)?;
        Ok(if matches!(e.kind(), ExprKind::Binary { .. }) {
            format!("({v}) <> 0")
        } else {
            format!("{v} <> 0")
        })
    }

    fn operand(&mut self, parent: BinaryOp, child: &ExprRef, right: bool) -> Result<String> {
        let s = if parent.is_logical() {
            self.predicate(child)?
        } else {
            self.value(child)?
        };
        Ok(if needs_parens(parent, child, right) {
            format!("({s})")
        } else {
            s
        })
    }

    fn wrapped(&mut self, e: &ExprRef) -> Result<String> {
        let v = self.value(e)?;
        Ok(if matches!(e.kind(), ExprKind::Binary { .. }) {
            format!("({v})")
        } else {
            v
        })
    }

    fn parameter(&mut self, name: &str, value: &ExprRef) -> Result<String> {
        if !self.parameters.iter().any(|p| p.name == name) {
            let Some(Value::Scalar(v)) = value.as_constant() else {
                return Err(QueryError::unsupported(format!(
                    "parameter {name} bound to {}",
                    value.kind_name()
                )));
            };
            self.parameters.push(QueryParameter {
                name: name.to_string(),
                ty: value.ty().clone(),
                value: v.clone(),
            });
        }
        Ok(self.dialect.parameter_placeholder(name))
    }

    fn aggregate(&mut self, a: &AggregateExpr) -> Result<String> {
        let arg = match &a.argument {
            None => "*".to_string(),
            Some(arg) => self.value(arg)?,
        };
        let distinct = if a.distinct { "DISTINCT " } else { "" };
        Ok(format!("{}({distinct}{arg})", a.kind.as_str()))
    }

    #[allow(clippy::too_many_lines)]
    fn node(&mut self, e: &ExprRef) -> Result<String> {
        match e.kind() {
            ExprKind::Constant(Value::Scalar(v)) => Ok(match v {
                SqlValue::Bool(b) => self.dialect.bool_literal(*b).to_string(),
                other => other.to_sql_inline(),
            }),
            ExprKind::NamedValue { name, value } => self.parameter(name, value),
            ExprKind::Column(c) => {
                let name = self.quote(&c.name);
                if self.unqualified == Some(c.alias) {
                    return Ok(name);
                }
                Ok(format!("{}.{name}", self.alias(c.alias)))
            }
            ExprKind::Variable { name } => Ok(format!("@{name}")),
            ExprKind::Binary { op, left, right } => {
                if matches!(op, BinaryOp::Eq | BinaryOp::NotEq) {
                    let other = if right.is_null_constant() {
                        Some(left)
                    } else if left.is_null_constant() {
                        Some(right)
                    } else {
                        None
                    };
                    if let Some(other) = other {
                        let v = self.wrapped(other)?;
                        let not = if *op == BinaryOp::NotEq { "NOT " } else { "" };
                        return Ok(format!("{v} IS {not}NULL"));
                    }
                }
                let l = self.operand(*op, left, false)?;
                let r = self.operand(*op, right, true)?;
                self.dialect.binary(*op, &l, &r)
            }
            ExprKind::Unary { op, operand } => match op {
                UnaryOp::Not if !operand.ty().is_numeric() => {
                    let p = self.predicate(operand)?;
                    Ok(if matches!(operand.kind(), ExprKind::Binary { .. }) {
                        format!("NOT ({p})")
                    } else {
                        format!("NOT {p}")
                    })
                }
                UnaryOp::Not | UnaryOp::BitNot => Ok(format!("~{}", self.wrapped(operand)?)),
                UnaryOp::Neg => Ok(format!("-{}", self.wrapped(operand)?)),
            },
            ExprKind::Conditional {
                test,
                if_true,
                if_false,
            } => {
                let t = self.predicate(test)?;
                let a = self.value(if_true)?;
                let b = self.value(if_false)?;
                Ok(self.dialect.conditional(&t, &a, &b))
            }
            ExprKind::Call { function, args } => {
                if !self.dialect.supports_function(*function) {
                    return Err(QueryError::unsupported(format!(
                        "{} in {}",
                        function.as_str(),
                        self.dialect.name()
                    )));
                }
                let args = args
                    .iter()
                    .map(|a| self.value(a))
                    .collect::<Result<Vec<_>>>()?;
                self.dialect.function(*function, &args)
            }
            ExprKind::IsNull(operand) => Ok(format!("{} IS NULL", self.wrapped(operand)?)),
            ExprKind::Between { expr, lower, upper } => {
                let v = self.wrapped(expr)?;
                let l = self.wrapped(lower)?;
                let u = self.wrapped(upper)?;
                Ok(format!("{v} BETWEEN {l} AND {u}"))
            }
            ExprKind::In(i) => match &i.source {
                InSource::Values(values) if values.is_empty() => Ok("0 <> 0".to_string()),
                InSource::Values(values) => {
                    let v = self.wrapped(&i.expr)?;
                    let list = values
                        .iter()
                        .map(|x| self.value(x))
                        .collect::<Result<Vec<_>>>()?;
                    Ok(format!("{v} IN ({})", list.join(", ")))
                }
                InSource::Select(sub) => {
                    let v = self.wrapped(&i.expr)?;
                    Ok(format!("{v} IN {}", self.subquery(sub)?))
                }
            },
            ExprKind::Exists(sub) => Ok(format!("EXISTS{}", self.subquery(sub)?)),
            ExprKind::Scalar(sub) | ExprKind::Projection(crate::ast::ProjectionExpr { select: sub, .. }) => {
                self.subquery(sub)
            }
            ExprKind::Select(_) => self.subquery(e),
            ExprKind::Aggregate(a) => self.aggregate(a),
            ExprKind::RowNumber { order_by } => {
                if order_by.is_empty() {
                    let default = self.dialect.row_number_default_order();
                    return Ok(format!("ROW_NUMBER() OVER({default})"));
                }
                let keys = self.orderings(order_by)?;
                Ok(format!("ROW_NUMBER() OVER(ORDER BY {keys})"))
            }
            ExprKind::OuterJoined { expr, .. } => self.node(expr),
            _ => Err(QueryError::unsupported(format!(
                "{} in SQL text",
                e.kind_name()
            ))),
        }
    }

    fn target_table(&mut self, table: &ExprRef) -> Result<String> {
        let ExprKind::Table(t) = table.kind() else {
            return Err(QueryError::unsupported(format!(
                "{} as a command target",
                table.kind_name()
            )));
        };
        self.unqualified = Some(t.alias);
        Ok(self.quote(&t.name))
    }

    fn insert(&mut self, table: &ExprRef, assignments: &[ColumnAssignment]) -> Result<String> {
        let name = self.target_table(table)?;
        let mut columns = Vec::with_capacity(assignments.len());
        let mut values = Vec::with_capacity(assignments.len());
        for a in assignments {
            columns.push(self.node(&a.column)?);
            values.push(self.value(&a.value)?);
        }
        self.unqualified = None;
        if assignments.is_empty() {
            return Ok(format!("INSERT INTO {name}{}DEFAULT VALUES", self.nl()));
        }
        Ok(format!(
            "INSERT INTO {name}({}){}VALUES ({})",
            columns.join(", "),
            self.nl(),
            values.join(", ")
        ))
    }

    fn update(
        &mut self,
        table: &ExprRef,
        where_clause: &ExprRef,
        assignments: &[ColumnAssignment],
    ) -> Result<String> {
        let name = self.target_table(table)?;
        let mut sets = Vec::with_capacity(assignments.len());
        for a in assignments {
            let c = self.node(&a.column)?;
            let v = self.value(&a.value)?;
            sets.push(format!("{c} = {v}"));
        }
        let w = self.predicate(where_clause);
        self.unqualified = None;
        Ok(format!(
            "UPDATE {name}{}SET {}{}WHERE {}",
            self.nl(),
            sets.join(", "),
            self.nl(),
            w?
        ))
    }

    fn delete(&mut self, table: &ExprRef, where_clause: Option<&ExprRef>) -> Result<String> {
        let name = self.target_table(table)?;
        let w = where_clause.map(|w| self.predicate(w)).transpose();
        self.unqualified = None;
        let mut sql = format!("DELETE FROM {name}");
        if let Some(w) = w? {
            sql.push_str(&format!("{}WHERE {w}", self.nl()));
        }
        Ok(sql)
    }

    fn require_control_flow(&self, what: &str) -> Result<()> {
        if self.dialect.supports_control_flow() {
            Ok(())
        } else {
            Err(QueryError::unsupported(format!(
                "{what} in {}",
                self.dialect.name()
            )))
        }
    }

    fn if_command(
        &mut self,
        check: &ExprRef,
        if_true: &ExprRef,
        if_false: Option<&ExprRef>,
    ) -> Result<String> {
        self.require_control_flow("IF")?;
        let test = self.predicate(check)?;
        let then = self.statement(if_true)?;
        let mut sql = format!("IF {test}\nBEGIN\n{then}\nEND");
        if let Some(other) = if_false {
            let other = self.statement(other)?;
            sql.push_str(&format!("\nELSE\nBEGIN\n{other}\nEND"));
        }
        Ok(sql)
    }

    /// `DECLARE` each variable, then assign them all from one select over
    /// the source's FROM and WHERE. Variable values are written in the
    /// scope of that FROM.
    fn declaration(&mut self, variables: &[VariableDecl], source: &ExprRef) -> Result<String> {
        self.require_control_flow("DECLARE")?;
        let ExprKind::Select(s) = source.kind() else {
            return Err(QueryError::unsupported("declaration source is not a select"));
        };
        let mut lines = Vec::with_capacity(variables.len() + 1);
        for v in variables {
            let ty = self.dialect.type_name(&v.ty)?;
            lines.push(format!("DECLARE @{} {ty}", v.name));
        }
        let mut assignments = Vec::with_capacity(variables.len());
        for v in variables {
            let value = self.value(&v.value)?;
            assignments.push(format!("@{} = {value}", v.name));
        }
        let mut sql = format!("SELECT {}", assignments.join(", "));
        if let Some(from) = &s.from {
            let src = self.source(from)?;
            sql.push_str(&format!("{}FROM {src}", self.nl()));
        }
        if let Some(w) = &s.where_clause {
            let w = self.predicate(w)?;
            sql.push_str(&format!("{}WHERE {w}", self.nl()));
        }
        lines.push(sql);
        Ok(lines.join(";\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{
        between, column, in_values, is_null, lit, named_value, not, null, select, table,
        ColumnDecl, ExprExt, Type,
    };
    use crate::dialect::{AccessDialect, GenericDialect, TsqlDialect};

    fn customers() -> (TableAlias, SelectExpr) {
        let t = TableAlias::new();
        let s = SelectExpr::new(
            TableAlias::new(),
            vec![
                ColumnDecl::new("Id", column(t, "Id", Type::Int)),
                ColumnDecl::new("Name", column(t, "Name", Type::Text)),
            ],
            Some(table(t, Some("Customer".into()), "Customers")),
        );
        (t, s)
    }

    #[test]
    fn test_select_layout() {
        let (t, mut s) = customers();
        s.where_clause = Some(column(t, "Id", Type::Int).gt(lit(3)));
        s.order_by = vec![OrderExpr::new(
            OrderKind::Descending,
            column(t, "Name", Type::Text),
        )];
        s.take = Some(lit(5));
        let cmd = format_sql(&GenericDialect::new(), &select(s)).unwrap();
        assert_eq!(
            cmd.text,
            "SELECT t0.\"Id\", t0.\"Name\"\nFROM \"Customers\" AS t0\nWHERE t0.\"Id\" > 3\nORDER BY t0.\"Name\" DESC\nLIMIT 5"
        );
        assert!(cmd.parameters.is_empty());
    }

    #[test]
    fn test_top_and_brackets_for_tsql() {
        let (_, mut s) = customers();
        s.take = Some(lit(1));
        let cmd = format_sql(&TsqlDialect::new(), &select(s)).unwrap();
        assert!(cmd.text.starts_with("SELECT TOP (1) t0.[Id], t0.[Name]"));
    }

    #[test]
    fn test_null_comparisons() {
        let (t, mut s) = customers();
        s.where_clause = Some(
            column(t, "Name", Type::Text)
                .eq(null(Type::Text))
                .or(column(t, "Id", Type::Int).ne(null(Type::Int))),
        );
        let cmd = format_sql(&GenericDialect::new(), &select(s)).unwrap();
        assert!(cmd
            .text
            .contains("WHERE t0.\"Name\" IS NULL OR t0.\"Id\" IS NOT NULL"));
    }

    #[test]
    fn test_predicate_in_value_position() {
        let (t, mut s) = customers();
        s.columns
            .push(ColumnDecl::new("Big", column(t, "Id", Type::Int).gt(lit(10))));
        let cmd = format_sql(&GenericDialect::new(), &select(s)).unwrap();
        assert!(cmd
            .text
            .contains("CASE WHEN t0.\"Id\" > 10 THEN 1 ELSE 0 END AS \"Big\""));
    }

    #[test]
    fn test_value_in_predicate_position() {
        let (t, mut s) = customers();
        s.where_clause = Some(column(t, "Active", Type::Int));
        let cmd = format_sql(&GenericDialect::new(), &select(s)).unwrap();
        assert!(cmd.text.ends_with("WHERE t0.\"Active\" <> 0"));
    }

    #[test]
    fn test_empty_in_list_is_false() {
        let (t, mut s) = customers();
        s.where_clause = Some(in_values(column(t, "Id", Type::Int), Vec::new()));
        let cmd = format_sql(&GenericDialect::new(), &select(s)).unwrap();
        assert!(cmd.text.ends_with("WHERE 0 <> 0"));
    }

    #[test]
    fn test_precedence_parentheses() {
        let (t, mut s) = customers();
        let id = column(t, "Id", Type::Int);
        let expr = crate::ast::binary(
            BinaryOp::Sub,
            id.clone(),
            crate::ast::binary(BinaryOp::Sub, id.clone(), lit(1)),
        )
        .mul(lit(2));
        s.columns = vec![ColumnDecl::new("x", expr)];
        let cmd = format_sql(&GenericDialect::new(), &select(s)).unwrap();
        assert!(cmd
            .text
            .starts_with("SELECT (t0.\"Id\" - (t0.\"Id\" - 1)) * 2 AS \"x\""));
    }

    #[test]
    fn test_parameters_in_emission_order() {
        let (t, mut s) = customers();
        s.where_clause = Some(
            column(t, "Name", Type::Text)
                .eq(named_value("p1", lit("b")))
                .and(column(t, "Name", Type::Text).ne(named_value("p0", lit("a"))))
                .and(column(t, "Name", Type::Text).ne(named_value("p1", lit("b")))),
        );
        let cmd = format_sql(&GenericDialect::new(), &select(s)).unwrap();
        let names: Vec<&str> = cmd.parameters.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["p1", "p0"]);
        assert!(cmd.text.contains("@p1"));
    }

    #[test]
    fn test_subquery_indentation() {
        let (_, inner) = customers();
        let inner_alias = inner.alias;
        let s = SelectExpr::new(
            TableAlias::new(),
            vec![ColumnDecl::new("Id", column(inner_alias, "Id", Type::Int))],
            Some(select(inner)),
        );
        let cmd = format_sql(&GenericDialect::new(), &select(s)).unwrap();
        assert_eq!(
            cmd.text,
            "SELECT t0.\"Id\"\nFROM (\n  SELECT t1.\"Id\", t1.\"Name\"\n  FROM \"Customers\" AS t1\n) AS t0"
        );
    }

    #[test]
    fn test_apply_requires_dialect_support() {
        let (_, left) = customers();
        let (_, right) = customers();
        let j = crate::ast::join(JoinKind::CrossApply, select(left), select(right), None);
        let s = SelectExpr::new(TableAlias::new(), Vec::new(), Some(j));
        let err = format_sql(&GenericDialect::new(), &select(s.clone())).unwrap_err();
        assert!(matches!(err, QueryError::Unsupported { .. }));
        let cmd = format_sql(&TsqlDialect::new(), &select(s)).unwrap();
        assert!(cmd.text.contains("CROSS APPLY"));
        assert!(cmd.text.starts_with("SELECT NULL"));
    }

    #[test]
    fn test_access_nests_joins() {
        let a = TableAlias::new();
        let b = TableAlias::new();
        let c = TableAlias::new();
        let ab = crate::ast::join(
            JoinKind::InnerJoin,
            table(a, None, "A"),
            table(b, None, "B"),
            Some(column(a, "Id", Type::Int).eq(column(b, "Id", Type::Int))),
        );
        let abc = crate::ast::join(
            JoinKind::InnerJoin,
            ab,
            table(c, None, "C"),
            Some(column(b, "Id", Type::Int).eq(column(c, "Id", Type::Int))),
        );
        let s = SelectExpr::new(
            TableAlias::new(),
            vec![ColumnDecl::new("Id", column(a, "Id", Type::Int))],
            Some(abc),
        );
        let cmd = format_sql(&AccessDialect::new(), &select(s)).unwrap();
        assert!(cmd.text.contains("FROM ([A] AS t0"));
    }

    #[test]
    fn test_not_on_numbers_is_bitwise() {
        let (t, mut s) = customers();
        s.columns = vec![ColumnDecl::new(
            "x",
            crate::ast::unary(UnaryOp::Not, column(t, "Id", Type::Int)),
        )];
        s.where_clause = Some(not(is_null(column(t, "Name", Type::Text))));
        let cmd = format_sql(&GenericDialect::new(), &select(s)).unwrap();
        assert!(cmd.text.starts_with("SELECT ~t0.\"Id\" AS \"x\""));
        assert!(cmd.text.contains("WHERE NOT t0.\"Name\" IS NULL"));
    }

    #[test]
    fn test_between_renders_inclusive_range() {
        let (t, mut s) = customers();
        s.where_clause = Some(between(column(t, "Id", Type::Int), lit(11), lit(15)));
        let cmd = format_sql(&GenericDialect::new(), &select(s)).unwrap();
        assert!(cmd.text.ends_with("WHERE t0.\"Id\" BETWEEN 11 AND 15"));
    }

    #[test]
    fn test_commands_use_unqualified_columns() {
        let t = TableAlias::new();
        let target = table(t, Some("Customer".into()), "Customers");
        let ins = crate::ast::insert(
            target.clone(),
            vec![ColumnAssignment {
                column: column(t, "Name", Type::Text),
                value: named_value("p0", lit("Ann")),
            }],
        );
        let upd = crate::ast::update(
            target.clone(),
            column(t, "Id", Type::Int).eq(lit(7)),
            vec![ColumnAssignment {
                column: column(t, "Name", Type::Text),
                value: lit("Bo"),
            }],
        );
        let del = crate::ast::delete(target, Some(column(t, "Id", Type::Int).eq(lit(7))));
        let cmd = format_sql(&GenericDialect::new(), &crate::ast::block(vec![ins, upd, del]))
            .unwrap();
        assert_eq!(
            cmd.text,
            "INSERT INTO \"Customers\"(\"Name\")\nVALUES (@p0);\nUPDATE \"Customers\"\nSET \"Name\" = 'Bo'\nWHERE \"Id\" = 7;\nDELETE FROM \"Customers\"\nWHERE \"Id\" = 7"
        );
        assert_eq!(cmd.parameters.len(), 1);
    }

    #[test]
    fn test_if_needs_control_flow() {
        let t = TableAlias::new();
        let target = table(t, None, "Customers");
        let cmd = crate::ast::if_command(
            lit(true),
            crate::ast::delete(target, None),
            None,
        );
        assert!(format_sql(&GenericDialect::new(), &cmd).is_err());
        let text = format_sql(&TsqlDialect::new(), &cmd).unwrap().text;
        assert_eq!(text, "IF 1 = 1\nBEGIN\nDELETE FROM [Customers]\nEND");
    }
}
