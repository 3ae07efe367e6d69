//! Structural equality over expression trees.
//!
//! Two trees compare equal when they denote the same computation up to a
//! consistent renaming of lambda parameters and table aliases. Aliases
//! declared by matching sources are paired when entering a select, join or
//! projection, and the pairing is dropped on exit. The comparison never
//! reports different queries as equal; it may miss equal queries written
//! in different shapes.

use std::collections::HashMap;
use std::mem::discriminant;

use crate::ast::{same, ExprKind, ExprRef, InSource, OrderExpr, TableAlias};
use crate::value::Value;
use crate::visit::children;

/// Compares trees with `==` on constants.
#[must_use]
pub fn are_equal(a: &ExprRef, b: &ExprRef) -> bool {
    Comparer::new().compare(a, b)
}

/// Compares trees with a caller-supplied constant comparison.
#[must_use]
pub fn are_equal_with(a: &ExprRef, b: &ExprRef, values: &dyn Fn(&Value, &Value) -> bool) -> bool {
    let mut c = Comparer::new();
    c.values = Some(values);
    c.compare(a, b)
}

/// Scoped structural comparer.
#[derive(Default)]
pub struct Comparer<'f> {
    aliases: Vec<HashMap<TableAlias, TableAlias>>,
    params: Vec<HashMap<u64, u64>>,
    values: Option<&'f dyn Fn(&Value, &Value) -> bool>,
}

impl std::fmt::Debug for Comparer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Comparer")
            .field("alias_scopes", &self.aliases.len())
            .field("param_scopes", &self.params.len())
            .finish_non_exhaustive()
    }
}

/// Declared aliases of a source in left-to-right order.
fn ordered_aliases(source: &ExprRef, out: &mut Vec<TableAlias>) {
    match source.kind() {
        ExprKind::Table(t) => out.push(t.alias),
        ExprKind::Select(s) => out.push(s.alias),
        ExprKind::SetOp(s) => out.push(s.alias),
        ExprKind::Join(j) => {
            ordered_aliases(&j.left, out);
            ordered_aliases(&j.right, out);
        }
        _ => {}
    }
}

impl<'f> Comparer<'f> {
    /// A comparer with empty scopes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Treats `a` in the left tree as `b` in the right tree.
    #[must_use]
    pub fn with_alias(mut self, a: TableAlias, b: TableAlias) -> Self {
        self.aliases.push(HashMap::from([(a, b)]));
        self
    }

    fn map_alias(&self, a: TableAlias) -> TableAlias {
        self.aliases
            .iter()
            .rev()
            .find_map(|scope| scope.get(&a).copied())
            .unwrap_or(a)
    }

    fn map_param(&self, id: u64) -> u64 {
        self.params
            .iter()
            .rev()
            .find_map(|scope| scope.get(&id).copied())
            .unwrap_or(id)
    }

    fn push_sources(&mut self, a: Option<&ExprRef>, b: Option<&ExprRef>) -> bool {
        let mut la = Vec::new();
        let mut lb = Vec::new();
        if let Some(a) = a {
            ordered_aliases(a, &mut la);
        }
        if let Some(b) = b {
            ordered_aliases(b, &mut lb);
        }
        if la.len() != lb.len() {
            return false;
        }
        self.aliases.push(la.into_iter().zip(lb).collect());
        true
    }

    fn values_equal(&self, a: &Value, b: &Value) -> bool {
        self.values.map_or_else(|| a == b, |f| f(a, b))
    }

    fn opt(&mut self, a: Option<&ExprRef>, b: Option<&ExprRef>) -> bool {
        match (a, b) {
            (Some(a), Some(b)) => self.compare(a, b),
            (None, None) => true,
            _ => false,
        }
    }

    fn list(&mut self, a: &[ExprRef], b: &[ExprRef]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| self.compare(x, y))
    }

    fn orderings(&mut self, a: &[OrderExpr], b: &[OrderExpr]) -> bool {
        a.len() == b.len()
            && a
                .iter()
                .zip(b)
                .all(|(x, y)| x.kind == y.kind && self.compare(&x.expr, &y.expr))
    }

    /// Compares two trees.
    #[allow(clippy::too_many_lines)]
    pub fn compare(&mut self, a: &ExprRef, b: &ExprRef) -> bool {
        if same(a, b) && self.aliases.is_empty() && self.params.is_empty() {
            return true;
        }
        if discriminant(a.kind()) != discriminant(b.kind()) || a.ty() != b.ty() {
            return false;
        }
        match (a.kind(), b.kind()) {
            (ExprKind::Constant(x), ExprKind::Constant(y)) => self.values_equal(x, y),
            (ExprKind::Parameter(x), ExprKind::Parameter(y)) => self.map_param(x.id) == y.id,
            (
                ExprKind::Lambda {
                    params: pa,
                    body: ba,
                },
                ExprKind::Lambda {
                    params: pb,
                    body: bb,
                },
            ) => {
                if pa.len() != pb.len() || pa.iter().zip(pb).any(|(x, y)| x.ty != y.ty) {
                    return false;
                }
                self.params
                    .push(pa.iter().zip(pb).map(|(x, y)| (x.id, y.id)).collect());
                let r = self.compare(ba, bb);
                self.params.pop();
                r
            }
            (ExprKind::Column(x), ExprKind::Column(y)) => {
                x.name == y.name && self.map_alias(x.alias) == y.alias
            }
            (ExprKind::Table(x), ExprKind::Table(y)) => x.name == y.name && x.entity == y.entity,
            (ExprKind::Select(x), ExprKind::Select(y)) => {
                if x.distinct != y.distinct
                    || x.reverse != y.reverse
                    || x.columns.len() != y.columns.len()
                    || !self.opt(x.from.as_ref(), y.from.as_ref())
                {
                    return false;
                }
                if !self.push_sources(x.from.as_ref(), y.from.as_ref()) {
                    return false;
                }
                let r = self.opt(x.where_clause.as_ref(), y.where_clause.as_ref())
                    && self.orderings(&x.order_by, &y.order_by)
                    && self.list(&x.group_by, &y.group_by)
                    && self.opt(x.skip.as_ref(), y.skip.as_ref())
                    && self.opt(x.take.as_ref(), y.take.as_ref())
                    && x
                        .columns
                        .iter()
                        .zip(&y.columns)
                        .all(|(c, d)| c.name == d.name && self.compare(&c.expr, &d.expr));
                self.aliases.pop();
                r
            }
            (ExprKind::Join(x), ExprKind::Join(y)) => {
                if x.kind != y.kind || !self.compare(&x.left, &y.left) {
                    return false;
                }
                // The right side of an apply may reference the left.
                let pushed_left =
                    x.kind.is_apply() && self.push_sources(Some(&x.left), Some(&y.left));
                let right = self.compare(&x.right, &y.right);
                if pushed_left {
                    self.aliases.pop();
                }
                if !right {
                    return false;
                }
                let mut la = Vec::new();
                let mut lb = Vec::new();
                ordered_aliases(a, &mut la);
                ordered_aliases(b, &mut lb);
                if la.len() != lb.len() {
                    return false;
                }
                self.aliases.push(la.into_iter().zip(lb).collect());
                let r = self.opt(x.condition.as_ref(), y.condition.as_ref());
                self.aliases.pop();
                r
            }
            (ExprKind::Projection(x), ExprKind::Projection(y)) => {
                if x.aggregator != y.aggregator || !self.compare(&x.select, &y.select) {
                    return false;
                }
                if !self.push_sources(Some(&x.select), Some(&y.select)) {
                    return false;
                }
                let r = self.compare(&x.projector, &y.projector);
                self.aliases.pop();
                r
            }
            (ExprKind::AggregateSubquery(x), ExprKind::AggregateSubquery(y)) => {
                self.map_alias(x.group_by_alias) == y.group_by_alias
                    && self.compare(&x.subquery, &y.subquery)
            }
            (ExprKind::In(x), ExprKind::In(y)) => {
                self.compare(&x.expr, &y.expr)
                    && match (&x.source, &y.source) {
                        (InSource::Select(s), InSource::Select(t)) => self.compare(s, t),
                        (InSource::Values(s), InSource::Values(t)) => self.list(s, t),
                        _ => false,
                    }
            }
            (ExprKind::RowNumber { order_by: x }, ExprKind::RowNumber { order_by: y }) => {
                self.orderings(x, y)
            }
            _ => attributes_equal(a.kind(), b.kind()) && {
                let ca = children(a);
                let cb = children(b);
                ca.len() == cb.len() && ca.into_iter().zip(cb).all(|(x, y)| self.compare(x, y))
            },
        }
    }
}

/// Non-child attributes of nodes handled by the generic child comparison.
fn attributes_equal(a: &ExprKind, b: &ExprKind) -> bool {
    match (a, b) {
        (ExprKind::Unary { op: x, .. }, ExprKind::Unary { op: y, .. }) => x == y,
        (ExprKind::Binary { op: x, .. }, ExprKind::Binary { op: y, .. }) => x == y,
        (ExprKind::Member { member: x, .. }, ExprKind::Member { member: y, .. }) => x == y,
        (ExprKind::Call { function: x, .. }, ExprKind::Call { function: y, .. }) => x == y,
        (ExprKind::New { fields: x }, ExprKind::New { fields: y }) => {
            x.len() == y.len() && x.iter().zip(y).all(|((n, _), (m, _))| n == m)
        }
        (ExprKind::Query(x), ExprKind::Query(y)) => query_attributes_equal(x, y),
        (ExprKind::SetOp(x), ExprKind::SetOp(y)) => x.kind == y.kind,
        (ExprKind::Aggregate(x), ExprKind::Aggregate(y)) => {
            x.kind == y.kind && x.distinct == y.distinct
        }
        (ExprKind::NamedValue { name: x, .. }, ExprKind::NamedValue { name: y, .. }) => x == y,
        (ExprKind::Entity { entity: x, .. }, ExprKind::Entity { entity: y, .. }) => x == y,
        (ExprKind::Variable { name: x }, ExprKind::Variable { name: y }) => x == y,
        (ExprKind::Declaration { variables: x, .. }, ExprKind::Declaration { variables: y, .. }) => {
            x.len() == y.len() && x.iter().zip(y).all(|(v, w)| v.name == w.name)
        }
        _ => true,
    }
}

fn query_attributes_equal(a: &crate::ast::QueryOp, b: &crate::ast::QueryOp) -> bool {
    use crate::ast::QueryOp as Q;
    match (a, b) {
        (Q::Source { entity: x }, Q::Source { entity: y }) => x == y,
        (
            Q::OrderBy {
                descending: d1,
                then: t1,
                ..
            },
            Q::OrderBy {
                descending: d2,
                then: t2,
                ..
            },
        ) => d1 == d2 && t1 == t2,
        (Q::Element { kind: x, .. }, Q::Element { kind: y, .. }) => x == y,
        (Q::Aggregate { op: x, .. }, Q::Aggregate { op: y, .. }) => x == y,
        (Q::SetOp { kind: x, .. }, Q::SetOp { kind: y, .. }) => x == y,
        _ => discriminant(a) == discriminant(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{column, lit, projection, select, table, ColumnDecl, ExprExt, Query, SelectExpr, Type};

    fn customers_where(city: &str) -> ExprRef {
        let t = TableAlias::new();
        let s = TableAlias::new();
        let mut sel = SelectExpr::new(
            s,
            vec![ColumnDecl::new("Id", column(t, "Id", Type::Int))],
            Some(table(t, Some("Customer".into()), "Customers")),
        );
        sel.where_clause = Some(column(t, "City", Type::Text).eq(lit(city)));
        projection(select(sel), column(s, "Id", Type::Int), None)
    }

    #[test]
    fn test_alpha_renamed_aliases_are_equal() {
        assert!(are_equal(&customers_where("London"), &customers_where("London")));
    }

    #[test]
    fn test_different_constants_differ() {
        assert!(!are_equal(&customers_where("London"), &customers_where("Paris")));
    }

    #[test]
    fn test_custom_value_comparison() {
        let ignore_case = |a: &Value, b: &Value| match (a, b) {
            (Value::Scalar(x), Value::Scalar(y)) => {
                x.to_string().to_lowercase() == y.to_string().to_lowercase()
            }
            _ => a == b,
        };
        assert!(are_equal_with(
            &customers_where("London"),
            &customers_where("LONDON"),
            &ignore_case
        ));
    }

    #[test]
    fn test_lambda_parameters_are_renamed() {
        let q1 = Query::from("Customer")
            .filter(|c| c.member("City").eq(lit("London")))
            .into_expr();
        let q2 = Query::from("Customer")
            .filter(|c| c.member("City").eq(lit("London")))
            .into_expr();
        assert!(are_equal(&q1, &q2));
        let q3 = Query::from("Customer")
            .filter(|c| c.member("Country").eq(lit("London")))
            .into_expr();
        assert!(!are_equal(&q1, &q3));
    }

    #[test]
    fn test_unrelated_aliases_do_not_match() {
        let a = column(TableAlias::new(), "x", Type::Int);
        let b = column(TableAlias::new(), "x", Type::Int);
        assert!(!are_equal(&a, &b));
        assert!(are_equal(&a, &a));
    }
}
