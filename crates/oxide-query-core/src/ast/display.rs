//! Deterministic text rendering of expression trees.
//!
//! Aliases and lambda parameters are numbered in order of first
//! appearance, so two trees built independently but with the same shape
//! render identically. The plan cache keys on this rendering.

use std::collections::HashMap;
use std::fmt::{self, Write};

use super::expr::{ExprKind, ExprRef, InSource, OrderExpr, OrderKind, TableAlias};
use super::query::QueryOp;
use super::Expr;

/// Renders trees with normalized alias and parameter names.
#[derive(Debug, Default)]
pub struct TreePrinter {
    aliases: HashMap<TableAlias, usize>,
    params: HashMap<u64, usize>,
    lift_constants: bool,
    out: String,
}

impl TreePrinter {
    /// A printer that renders constants.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A printer that renders every constant as `?`.
    #[must_use]
    pub fn shape() -> Self {
        Self {
            lift_constants: true,
            ..Self::default()
        }
    }

    /// Renders `expr`.
    #[must_use]
    pub fn print(mut self, expr: &ExprRef) -> String {
        // Writing to a String cannot fail.
        let _ = self.node(expr);
        self.out
    }

    fn alias(&mut self, alias: TableAlias) -> String {
        let next = self.aliases.len();
        let n = *self.aliases.entry(alias).or_insert(next);
        format!("t{n}")
    }

    fn param(&mut self, id: u64) -> String {
        let next = self.params.len();
        let n = *self.params.entry(id).or_insert(next);
        format!("p{n}")
    }

    fn list(&mut self, items: &[ExprRef]) -> fmt::Result {
        self.out.push('[');
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            self.node(item)?;
        }
        self.out.push(']');
        Ok(())
    }

    fn orderings(&mut self, order_by: &[OrderExpr]) -> fmt::Result {
        self.out.push('[');
        for (i, o) in order_by.iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            self.node(&o.expr)?;
            if o.kind == OrderKind::Descending {
                self.out.push_str(" desc");
            }
        }
        self.out.push(']');
        Ok(())
    }

    fn opt(&mut self, label: &str, e: Option<&ExprRef>) -> fmt::Result {
        if let Some(e) = e {
            write!(self.out, " {label}=")?;
            self.node(e)?;
        }
        Ok(())
    }

    fn call(&mut self, name: &str, children: &[&ExprRef]) -> fmt::Result {
        write!(self.out, "{name}(")?;
        for (i, c) in children.iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            self.node(c)?;
        }
        self.out.push(')');
        Ok(())
    }

    #[allow(clippy::too_many_lines)]
    fn node(&mut self, expr: &ExprRef) -> fmt::Result {
        match expr.kind() {
            ExprKind::Constant(v) => {
                if self.lift_constants {
                    self.out.push('?');
                } else {
                    match v {
                        crate::value::Value::Scalar(s) => write!(self.out, "{s}")?,
                        other => write!(self.out, "{other:?}")?,
                    }
                }
            }
            ExprKind::Parameter(p) => {
                let name = self.param(p.id);
                self.out.push_str(&name);
            }
            ExprKind::Lambda { params, body } => {
                self.out.push('(');
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    let name = self.param(p.id);
                    self.out.push_str(&name);
                }
                self.out.push_str(") => ");
                self.node(body)?;
            }
            ExprKind::Unary { op, operand } => {
                write!(self.out, "{}(", op.as_str())?;
                self.node(operand)?;
                self.out.push(')');
            }
            ExprKind::Binary { op, left, right } => {
                self.out.push('(');
                self.node(left)?;
                write!(self.out, " {} ", op.as_str())?;
                self.node(right)?;
                self.out.push(')');
            }
            ExprKind::Conditional {
                test,
                if_true,
                if_false,
            } => self.call("Iif", &[test, if_true, if_false])?,
            ExprKind::Member { object, member } => {
                self.node(object)?;
                write!(self.out, ".{member}")?;
            }
            ExprKind::Call { function, args } => {
                self.out.push_str(function.as_str());
                self.list(args)?;
            }
            ExprKind::New { fields } => {
                self.out.push_str("new {");
                for (i, (name, e)) in fields.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    write!(self.out, "{name} = ")?;
                    self.node(e)?;
                }
                self.out.push('}');
            }
            ExprKind::Query(op) => self.query(op)?,
            ExprKind::Table(t) => {
                let a = self.alias(t.alias);
                write!(self.out, "Table({a} {})", t.name)?;
            }
            ExprKind::Column(c) => {
                let a = self.alias(c.alias);
                write!(self.out, "{a}.{}", c.name)?;
            }
            ExprKind::Select(s) => {
                let a = self.alias(s.alias);
                write!(self.out, "Select({a}")?;
                if s.distinct {
                    self.out.push_str(" distinct");
                }
                self.out.push_str(" [");
                for (i, c) in s.columns.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    write!(self.out, "{}: ", c.name)?;
                    self.node(&c.expr)?;
                }
                self.out.push(']');
                self.opt("from", s.from.as_ref())?;
                self.opt("where", s.where_clause.as_ref())?;
                if !s.group_by.is_empty() {
                    self.out.push_str(" group=");
                    self.list(&s.group_by)?;
                }
                if !s.order_by.is_empty() {
                    self.out.push_str(" order=");
                    self.orderings(&s.order_by)?;
                }
                self.opt("skip", s.skip.as_ref())?;
                self.opt("take", s.take.as_ref())?;
                if s.reverse {
                    self.out.push_str(" reverse");
                }
                self.out.push(')');
            }
            ExprKind::Join(j) => {
                write!(self.out, "{:?}(", j.kind)?;
                self.node(&j.left)?;
                self.out.push_str(", ");
                self.node(&j.right)?;
                self.opt("on", j.condition.as_ref())?;
                self.out.push(')');
            }
            ExprKind::SetOp(s) => {
                let a = self.alias(s.alias);
                write!(self.out, "{:?}({a}, ", s.kind)?;
                self.node(&s.left)?;
                self.out.push_str(", ");
                self.node(&s.right)?;
                self.out.push(')');
            }
            ExprKind::Aggregate(a) => {
                write!(self.out, "{}(", a.kind.as_str())?;
                if a.distinct {
                    self.out.push_str("distinct ");
                }
                match &a.argument {
                    Some(arg) => self.node(arg)?,
                    None => self.out.push('*'),
                }
                self.out.push(')');
            }
            ExprKind::AggregateSubquery(a) => {
                let g = self.alias(a.group_by_alias);
                write!(self.out, "AggregateSubquery({g}, ")?;
                self.node(&a.aggregate_in_group)?;
                self.out.push(')');
            }
            ExprKind::Scalar(s) => self.call("Scalar", &[s])?,
            ExprKind::Exists(s) => self.call("Exists", &[s])?,
            ExprKind::In(i) => {
                self.out.push_str("In(");
                self.node(&i.expr)?;
                self.out.push_str(", ");
                match &i.source {
                    InSource::Select(s) => self.node(s)?,
                    InSource::Values(v) => self.list(v)?,
                }
                self.out.push(')');
            }
            ExprKind::IsNull(e) => self.call("IsNull", &[e])?,
            ExprKind::Between { expr, lower, upper } => {
                self.call("Between", &[expr, lower, upper])?;
            }
            ExprKind::RowNumber { order_by } => {
                self.out.push_str("RowNumber");
                self.orderings(order_by)?;
            }
            ExprKind::Projection(p) => {
                self.out.push_str("Projection(");
                self.node(&p.select)?;
                self.out.push_str(", ");
                self.node(&p.projector)?;
                if let Some(agg) = p.aggregator {
                    write!(self.out, ", {agg:?}")?;
                }
                self.out.push(')');
            }
            ExprKind::NamedValue { name, value } => {
                write!(self.out, "@{name}")?;
                if !self.lift_constants {
                    self.out.push('=');
                    self.node(value)?;
                }
            }
            ExprKind::ClientJoin(c) => {
                self.out.push_str("ClientJoin(");
                self.node(&c.projection)?;
                self.out.push_str(", ");
                self.list(&c.outer_key)?;
                self.out.push_str(", ");
                self.list(&c.inner_key)?;
                self.out.push(')');
            }
            ExprKind::OuterJoined { test, expr } => self.call("OuterJoined", &[test, expr])?,
            ExprKind::Entity { entity, expr } => {
                write!(self.out, "Entity<{entity}>(")?;
                self.node(expr)?;
                self.out.push(')');
            }
            ExprKind::Insert { table, assignments }
            | ExprKind::Update {
                table, assignments, ..
            } => {
                write!(self.out, "{}(", expr.kind_name())?;
                self.node(table)?;
                for a in assignments {
                    self.out.push_str(", ");
                    self.node(&a.column)?;
                    self.out.push_str(" = ");
                    self.node(&a.value)?;
                }
                if let ExprKind::Update { where_clause, .. } = expr.kind() {
                    self.opt("where", Some(where_clause))?;
                }
                self.out.push(')');
            }
            ExprKind::Delete {
                table,
                where_clause,
            } => {
                self.out.push_str("Delete(");
                self.node(table)?;
                self.opt("where", where_clause.as_ref())?;
                self.out.push(')');
            }
            ExprKind::Block(commands) => {
                self.out.push_str("Block");
                self.list(commands)?;
            }
            ExprKind::If {
                check,
                if_true,
                if_false,
            } => {
                self.out.push_str("If(");
                self.node(check)?;
                self.out.push_str(", ");
                self.node(if_true)?;
                self.opt("else", if_false.as_ref())?;
                self.out.push(')');
            }
            ExprKind::Declaration { variables, source } => {
                self.out.push_str("Declare(");
                for v in variables {
                    write!(self.out, "@{} = ", v.name)?;
                    self.node(&v.value)?;
                    self.out.push_str(", ");
                }
                self.node(source)?;
                self.out.push(')');
            }
            ExprKind::Variable { name } => write!(self.out, "@{name}")?,
        }
        Ok(())
    }

    fn query(&mut self, op: &QueryOp) -> fmt::Result {
        if let QueryOp::Source { entity } = op {
            return write!(self.out, "Source<{entity}>");
        }
        let children = op.children();
        let name = match op {
            QueryOp::OrderBy {
                descending: true, ..
            } => "OrderByDescending",
            QueryOp::Element { kind, .. } => {
                write!(self.out, "{kind:?}")?;
                ""
            }
            QueryOp::Aggregate { op, .. } => {
                write!(self.out, "{op:?}")?;
                ""
            }
            QueryOp::SetOp { kind, .. } => {
                write!(self.out, "{kind:?}")?;
                ""
            }
            other => other.name(),
        };
        self.call(name, &children)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Only the root node is copied; children stay shared.
        let root: ExprRef = std::sync::Arc::new(self.clone());
        f.write_str(&TreePrinter::new().print(&root))
    }
}
