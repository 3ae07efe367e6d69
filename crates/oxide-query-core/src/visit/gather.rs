//! Read-only gatherers over expression trees.

use std::collections::HashSet;

use crate::ast::{ColumnExpr, ExprKind, ExprRef, InSource, TableAlias};

/// Direct children of a node, in visitation order.
#[must_use]
pub fn children(expr: &ExprRef) -> Vec<&ExprRef> {
    match expr.kind() {
        ExprKind::Constant(_)
        | ExprKind::Parameter(_)
        | ExprKind::Table(_)
        | ExprKind::Column(_)
        | ExprKind::Variable { .. } => Vec::new(),
        ExprKind::Lambda { body, .. } => vec![body],
        ExprKind::Unary { operand, .. } => vec![operand],
        ExprKind::Binary { left, right, .. } => vec![left, right],
        ExprKind::Conditional {
            test,
            if_true,
            if_false,
        } => vec![test, if_true, if_false],
        ExprKind::Member { object, .. } => vec![object],
        ExprKind::Call { args, .. } | ExprKind::Block(args) => args.iter().collect(),
        ExprKind::New { fields } => fields.iter().map(|(_, e)| e).collect(),
        ExprKind::Query(op) => op.children(),
        ExprKind::Select(s) => {
            let mut v: Vec<&ExprRef> = Vec::new();
            v.extend(s.from.as_ref());
            v.extend(s.where_clause.as_ref());
            v.extend(s.columns.iter().map(|c| &c.expr));
            v.extend(s.order_by.iter().map(|o| &o.expr));
            v.extend(s.group_by.iter());
            v.extend(s.skip.as_ref());
            v.extend(s.take.as_ref());
            v
        }
        ExprKind::Join(j) => {
            let mut v = vec![&j.left, &j.right];
            v.extend(j.condition.as_ref());
            v
        }
        ExprKind::SetOp(s) => vec![&s.left, &s.right],
        ExprKind::Aggregate(a) => a.argument.iter().collect(),
        ExprKind::AggregateSubquery(a) => vec![&a.subquery],
        ExprKind::Scalar(s) | ExprKind::Exists(s) | ExprKind::IsNull(s) => vec![s],
        ExprKind::In(i) => {
            let mut v = vec![&i.expr];
            match &i.source {
                InSource::Select(s) => v.push(s),
                InSource::Values(vals) => v.extend(vals.iter()),
            }
            v
        }
        ExprKind::Between { expr, lower, upper } => vec![expr, lower, upper],
        ExprKind::RowNumber { order_by } => order_by.iter().map(|o| &o.expr).collect(),
        ExprKind::Projection(p) => vec![&p.select, &p.projector],
        ExprKind::NamedValue { value, .. } => vec![value],
        ExprKind::ClientJoin(c) => {
            let mut v = vec![&c.projection];
            v.extend(c.outer_key.iter());
            v.extend(c.inner_key.iter());
            v
        }
        ExprKind::OuterJoined { test, expr } => vec![test, expr],
        ExprKind::Entity { expr, .. } => vec![expr],
        ExprKind::Insert { table, assignments } => {
            let mut v = vec![table];
            for a in assignments {
                v.push(&a.column);
                v.push(&a.value);
            }
            v
        }
        ExprKind::Update {
            table,
            where_clause,
            assignments,
        } => {
            let mut v = vec![table, where_clause];
            for a in assignments {
                v.push(&a.column);
                v.push(&a.value);
            }
            v
        }
        ExprKind::Delete {
            table,
            where_clause,
        } => {
            let mut v = vec![table];
            v.extend(where_clause.as_ref());
            v
        }
        ExprKind::If {
            check,
            if_true,
            if_false,
        } => {
            let mut v = vec![check, if_true];
            v.extend(if_false.as_ref());
            v
        }
        ExprKind::Declaration { variables, source } => {
            let mut v = vec![source];
            v.extend(variables.iter().map(|d| &d.value));
            v
        }
    }
}

pub(crate) fn visit_all<'a>(expr: &'a ExprRef, f: &mut impl FnMut(&'a ExprRef)) {
    let mut stack = vec![expr];
    while let Some(e) = stack.pop() {
        f(e);
        let mut kids = children(e);
        kids.reverse();
        stack.extend(kids);
    }
}

/// Returns true if any node in the tree satisfies `pred`.
pub fn contains(expr: &ExprRef, pred: impl Fn(&ExprRef) -> bool) -> bool {
    let mut stack = vec![expr];
    while let Some(e) = stack.pop() {
        if pred(e) {
            return true;
        }
        stack.extend(children(e));
    }
    false
}

/// Aliases declared by a FROM source: tables, selects, set operations and
/// both sides of joins. Does not look inside selects.
#[must_use]
pub fn declared_aliases(source: &ExprRef) -> HashSet<TableAlias> {
    let mut out = HashSet::new();
    let mut stack = vec![source];
    while let Some(e) = stack.pop() {
        match e.kind() {
            ExprKind::Table(t) => {
                out.insert(t.alias);
            }
            ExprKind::Select(s) => {
                out.insert(s.alias);
            }
            ExprKind::SetOp(s) => {
                out.insert(s.alias);
            }
            ExprKind::Join(j) => {
                stack.push(&j.left);
                stack.push(&j.right);
            }
            _ => {}
        }
    }
    out
}

/// Aliases of every column referenced anywhere in the tree.
#[must_use]
pub fn referenced_aliases(expr: &ExprRef) -> HashSet<TableAlias> {
    let mut out = HashSet::new();
    visit_all(expr, &mut |e| {
        if let ExprKind::Column(c) = e.kind() {
            out.insert(c.alias);
        }
    });
    out
}

/// Every column referenced in the tree, first occurrence order, no
/// duplicates.
#[must_use]
pub fn referenced_columns(expr: &ExprRef) -> Vec<ColumnExpr> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    visit_all(expr, &mut |e| {
        if let ExprKind::Column(c) = e.kind() {
            if seen.insert(c.clone()) {
                out.push(c.clone());
            }
        }
    });
    out
}

/// Does the select compute aggregates in its own columns (not in nested
/// subqueries)?
#[must_use]
pub fn has_aggregates(select: &ExprRef) -> bool {
    let Some(s) = select.as_select() else {
        return false;
    };
    s.columns.iter().any(|c| aggregate_outside_subquery(&c.expr))
}

fn aggregate_outside_subquery(expr: &ExprRef) -> bool {
    match expr.kind() {
        ExprKind::Aggregate(_) | ExprKind::AggregateSubquery(_) => true,
        ExprKind::Select(_)
        | ExprKind::Scalar(_)
        | ExprKind::Exists(_)
        | ExprKind::Projection(_) => false,
        _ => children(expr).into_iter().any(aggregate_outside_subquery),
    }
}

/// Ids of lambda parameters referenced but not bound within the tree.
#[must_use]
pub fn free_parameters(expr: &ExprRef) -> HashSet<u64> {
    fn go(e: &ExprRef, bound: &mut Vec<u64>, out: &mut HashSet<u64>) {
        match e.kind() {
            ExprKind::Parameter(p) => {
                if !bound.contains(&p.id) {
                    out.insert(p.id);
                }
            }
            ExprKind::Lambda { params, body } => {
                let n = bound.len();
                bound.extend(params.iter().map(|p| p.id));
                go(body, bound, out);
                bound.truncate(n);
            }
            _ => {
                for c in children(e) {
                    go(c, bound, out);
                }
            }
        }
    }
    let mut out = HashSet::new();
    go(expr, &mut Vec::new(), &mut out);
    out
}
