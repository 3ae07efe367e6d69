//! Tree traversal.
//!
//! [`Rewriter`] is the base of every pass: implementors override
//! [`Rewriter::rewrite`] for the node kinds they care about and delegate
//! everything else to [`walk`], which rewrites children and rebuilds a node
//! only when some child came back as a different `Arc`.

mod gather;
mod replace;
mod scope;

pub use gather::{
    children, contains, declared_aliases, has_aggregates, referenced_aliases,
    referenced_columns, free_parameters,
};
pub use replace::{
    fold_members, record_field, refresh_aliases, replace_nodes, substitute_params, ColumnMapper,
};
pub use scope::check_scopes;

use crate::ast::{
    self, same, ClientJoinExpr, ColumnAssignment, ColumnDecl, Expr, ExprKind, ExprRef, InExpr,
    InSource, OrderExpr, ProjectionExpr, SelectExpr, Type, VariableDecl,
};
use crate::error::Result;

/// A tree-to-tree pass.
pub trait Rewriter {
    /// Rewrites one node. The default rewrites children only.
    fn rewrite(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        walk(self, expr)
    }
}

/// Rewrites an optional child.
pub fn rewrite_opt<R: Rewriter + ?Sized>(
    r: &mut R,
    expr: Option<&ExprRef>,
) -> Result<Option<ExprRef>> {
    expr.map(|e| r.rewrite(e)).transpose()
}

/// Rewrites a list of children.
pub fn rewrite_list<R: Rewriter + ?Sized>(r: &mut R, items: &[ExprRef]) -> Result<Vec<ExprRef>> {
    items.iter().map(|e| r.rewrite(e)).collect()
}

/// Rewrites the expressions of column declarations.
pub fn rewrite_columns<R: Rewriter + ?Sized>(
    r: &mut R,
    columns: &[ColumnDecl],
) -> Result<Vec<ColumnDecl>> {
    columns
        .iter()
        .map(|c| {
            let e = r.rewrite(&c.expr)?;
            Ok(if same(&e, &c.expr) {
                c.clone()
            } else {
                ColumnDecl {
                    name: c.name.clone(),
                    ty: c.ty.clone(),
                    expr: e,
                }
            })
        })
        .collect()
}

/// Rewrites the keys of orderings.
pub fn rewrite_orderings<R: Rewriter + ?Sized>(
    r: &mut R,
    order_by: &[OrderExpr],
) -> Result<Vec<OrderExpr>> {
    order_by
        .iter()
        .map(|o| Ok(OrderExpr::new(o.kind, r.rewrite(&o.expr)?)))
        .collect()
}

/// Identity comparison of optional children.
#[must_use]
pub fn same_opt(a: Option<&ExprRef>, b: Option<&ExprRef>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => same(a, b),
        (None, None) => true,
        _ => false,
    }
}

/// Identity comparison of child lists.
#[must_use]
pub fn same_list(a: &[ExprRef], b: &[ExprRef]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| same(x, y))
}

/// Identity comparison of column declarations.
#[must_use]
pub fn same_columns(a: &[ColumnDecl], b: &[ColumnDecl]) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .zip(b)
            .all(|(x, y)| x.name == y.name && same(&x.expr, &y.expr))
}

/// Identity comparison of orderings.
#[must_use]
pub fn same_orderings(a: &[OrderExpr], b: &[OrderExpr]) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .zip(b)
            .all(|(x, y)| x.kind == y.kind && same(&x.expr, &y.expr))
}

/// Rewrites every part of a select and rebuilds it if anything changed.
pub fn walk_select<R: Rewriter + ?Sized>(
    r: &mut R,
    expr: &ExprRef,
    s: &SelectExpr,
) -> Result<ExprRef> {
    let from = rewrite_opt(r, s.from.as_ref())?;
    let where_clause = rewrite_opt(r, s.where_clause.as_ref())?;
    let columns = rewrite_columns(r, &s.columns)?;
    let order_by = rewrite_orderings(r, &s.order_by)?;
    let group_by = rewrite_list(r, &s.group_by)?;
    let skip = rewrite_opt(r, s.skip.as_ref())?;
    let take = rewrite_opt(r, s.take.as_ref())?;
    if same_opt(from.as_ref(), s.from.as_ref())
        && same_opt(where_clause.as_ref(), s.where_clause.as_ref())
        && same_columns(&columns, &s.columns)
        && same_orderings(&order_by, &s.order_by)
        && same_list(&group_by, &s.group_by)
        && same_opt(skip.as_ref(), s.skip.as_ref())
        && same_opt(take.as_ref(), s.take.as_ref())
    {
        return Ok(expr.clone());
    }
    Ok(ast::select(SelectExpr {
        alias: s.alias,
        columns,
        from,
        where_clause,
        order_by,
        group_by,
        distinct: s.distinct,
        skip,
        take,
        reverse: s.reverse,
    }))
}

fn rewrite_assignments<R: Rewriter + ?Sized>(
    r: &mut R,
    assignments: &[ColumnAssignment],
) -> Result<(Vec<ColumnAssignment>, bool)> {
    let mut changed = false;
    let mut out = Vec::with_capacity(assignments.len());
    for a in assignments {
        let column = r.rewrite(&a.column)?;
        let value = r.rewrite(&a.value)?;
        changed |= !same(&column, &a.column) || !same(&value, &a.value);
        out.push(ColumnAssignment { column, value });
    }
    Ok((out, changed))
}

/// Rewrites the children of `expr`, returning `expr` itself when none of
/// them changed.
#[allow(clippy::too_many_lines)]
pub fn walk<R: Rewriter + ?Sized>(r: &mut R, expr: &ExprRef) -> Result<ExprRef> {
    let ty = expr.ty().clone();
    let out = match expr.kind() {
        ExprKind::Constant(_)
        | ExprKind::Parameter(_)
        | ExprKind::Table(_)
        | ExprKind::Column(_)
        | ExprKind::Variable { .. } => return Ok(expr.clone()),
        ExprKind::Lambda { params, body } => {
            let b = r.rewrite(body)?;
            if same(&b, body) {
                return Ok(expr.clone());
            }
            ast::lambda(params.clone(), b)
        }
        ExprKind::Unary { op, operand } => {
            let o = r.rewrite(operand)?;
            if same(&o, operand) {
                return Ok(expr.clone());
            }
            ast::unary(*op, o)
        }
        ExprKind::Binary { op, left, right } => {
            let l = r.rewrite(left)?;
            let rt = r.rewrite(right)?;
            if same(&l, left) && same(&rt, right) {
                return Ok(expr.clone());
            }
            ast::binary(*op, l, rt)
        }
        ExprKind::Conditional {
            test,
            if_true,
            if_false,
        } => {
            let t = r.rewrite(test)?;
            let a = r.rewrite(if_true)?;
            let b = r.rewrite(if_false)?;
            if same(&t, test) && same(&a, if_true) && same(&b, if_false) {
                return Ok(expr.clone());
            }
            ast::conditional(t, a, b)
        }
        ExprKind::Member { object, member } => {
            let o = r.rewrite(object)?;
            if same(&o, object) {
                return Ok(expr.clone());
            }
            ast::member_typed(o, member.clone(), ty)
        }
        ExprKind::Call { function, args } => {
            let a = rewrite_list(r, args)?;
            if same_list(&a, args) {
                return Ok(expr.clone());
            }
            ast::call(*function, a)
        }
        ExprKind::New { fields } => {
            let mut changed = false;
            let mut out = Vec::with_capacity(fields.len());
            for (name, e) in fields {
                let n = r.rewrite(e)?;
                changed |= !same(&n, e);
                out.push((name.clone(), n));
            }
            if !changed {
                return Ok(expr.clone());
            }
            if matches!(ty, Type::Grouping { .. }) {
                Expr::new(ExprKind::New { fields: out }, ty)
            } else {
                ast::new_record(out)
            }
        }
        ExprKind::Query(op) => {
            let old: Vec<ExprRef> = op.children().into_iter().cloned().collect();
            let new = rewrite_list(r, &old)?;
            if same_list(&new, &old) {
                return Ok(expr.clone());
            }
            ast::query(op.with_children(new)?, ty)
        }
        ExprKind::Select(s) => return walk_select(r, expr, s),
        ExprKind::Join(j) => {
            let left = r.rewrite(&j.left)?;
            let right = r.rewrite(&j.right)?;
            let condition = rewrite_opt(r, j.condition.as_ref())?;
            if same(&left, &j.left)
                && same(&right, &j.right)
                && same_opt(condition.as_ref(), j.condition.as_ref())
            {
                return Ok(expr.clone());
            }
            ast::join(j.kind, left, right, condition)
        }
        ExprKind::SetOp(s) => {
            let left = r.rewrite(&s.left)?;
            let right = r.rewrite(&s.right)?;
            if same(&left, &s.left) && same(&right, &s.right) {
                return Ok(expr.clone());
            }
            ast::set_operation(s.alias, s.kind, left, right)
        }
        ExprKind::Aggregate(a) => {
            let arg = rewrite_opt(r, a.argument.as_ref())?;
            if same_opt(arg.as_ref(), a.argument.as_ref()) {
                return Ok(expr.clone());
            }
            ast::aggregate(a.kind, arg, a.distinct, ty)
        }
        ExprKind::AggregateSubquery(a) => {
            let sub = r.rewrite(&a.subquery)?;
            if same(&sub, &a.subquery) {
                return Ok(expr.clone());
            }
            ast::aggregate_subquery(a.group_by_alias, a.aggregate_in_group.clone(), sub)
        }
        ExprKind::Scalar(s) => {
            let n = r.rewrite(s)?;
            if same(&n, s) {
                return Ok(expr.clone());
            }
            Expr::new(ExprKind::Scalar(n), ty)
        }
        ExprKind::Exists(s) => {
            let n = r.rewrite(s)?;
            if same(&n, s) {
                return Ok(expr.clone());
            }
            ast::exists(n)
        }
        ExprKind::In(i) => {
            let e = r.rewrite(&i.expr)?;
            let (source, changed) = match &i.source {
                InSource::Select(s) => {
                    let n = r.rewrite(s)?;
                    let changed = !same(&n, s);
                    (InSource::Select(n), changed)
                }
                InSource::Values(v) => {
                    let n = rewrite_list(r, v)?;
                    let changed = !same_list(&n, v);
                    (InSource::Values(n), changed)
                }
            };
            if same(&e, &i.expr) && !changed {
                return Ok(expr.clone());
            }
            Expr::new(ExprKind::In(InExpr { expr: e, source }), ty)
        }
        ExprKind::IsNull(e) => {
            let n = r.rewrite(e)?;
            if same(&n, e) {
                return Ok(expr.clone());
            }
            ast::is_null(n)
        }
        ExprKind::Between { expr: e, lower, upper } => {
            let n = r.rewrite(e)?;
            let lo = r.rewrite(lower)?;
            let hi = r.rewrite(upper)?;
            if same(&n, e) && same(&lo, lower) && same(&hi, upper) {
                return Ok(expr.clone());
            }
            ast::between(n, lo, hi)
        }
        ExprKind::RowNumber { order_by } => {
            let o = rewrite_orderings(r, order_by)?;
            if same_orderings(&o, order_by) {
                return Ok(expr.clone());
            }
            ast::row_number(o)
        }
        ExprKind::Projection(p) => {
            let s = r.rewrite(&p.select)?;
            let pr = r.rewrite(&p.projector)?;
            if same(&s, &p.select) && same(&pr, &p.projector) {
                return Ok(expr.clone());
            }
            Expr::new(
                ExprKind::Projection(ProjectionExpr {
                    select: s,
                    projector: pr,
                    aggregator: p.aggregator,
                }),
                ty,
            )
        }
        ExprKind::NamedValue { name, value } => {
            let v = r.rewrite(value)?;
            if same(&v, value) {
                return Ok(expr.clone());
            }
            ast::named_value(name.clone(), v)
        }
        ExprKind::ClientJoin(c) => {
            let p = r.rewrite(&c.projection)?;
            let ok = rewrite_list(r, &c.outer_key)?;
            let ik = rewrite_list(r, &c.inner_key)?;
            if same(&p, &c.projection) && same_list(&ok, &c.outer_key) && same_list(&ik, &c.inner_key)
            {
                return Ok(expr.clone());
            }
            Expr::new(
                ExprKind::ClientJoin(ClientJoinExpr {
                    projection: p,
                    outer_key: ok,
                    inner_key: ik,
                }),
                ty,
            )
        }
        ExprKind::OuterJoined { test, expr: e } => {
            let t = r.rewrite(test)?;
            let n = r.rewrite(e)?;
            if same(&t, test) && same(&n, e) {
                return Ok(expr.clone());
            }
            ast::outer_joined(t, n)
        }
        ExprKind::Entity { entity, expr: e } => {
            let n = r.rewrite(e)?;
            if same(&n, e) {
                return Ok(expr.clone());
            }
            ast::entity(entity.clone(), n)
        }
        ExprKind::Insert { table, assignments } => {
            let t = r.rewrite(table)?;
            let (a, changed) = rewrite_assignments(r, assignments)?;
            if same(&t, table) && !changed {
                return Ok(expr.clone());
            }
            ast::insert(t, a)
        }
        ExprKind::Update {
            table,
            where_clause,
            assignments,
        } => {
            let t = r.rewrite(table)?;
            let w = r.rewrite(where_clause)?;
            let (a, changed) = rewrite_assignments(r, assignments)?;
            if same(&t, table) && same(&w, where_clause) && !changed {
                return Ok(expr.clone());
            }
            ast::update(t, w, a)
        }
        ExprKind::Delete {
            table,
            where_clause,
        } => {
            let t = r.rewrite(table)?;
            let w = rewrite_opt(r, where_clause.as_ref())?;
            if same(&t, table) && same_opt(w.as_ref(), where_clause.as_ref()) {
                return Ok(expr.clone());
            }
            ast::delete(t, w)
        }
        ExprKind::Block(commands) => {
            let c = rewrite_list(r, commands)?;
            if same_list(&c, commands) {
                return Ok(expr.clone());
            }
            ast::block(c)
        }
        ExprKind::If {
            check,
            if_true,
            if_false,
        } => {
            let c = r.rewrite(check)?;
            let t = r.rewrite(if_true)?;
            let f = rewrite_opt(r, if_false.as_ref())?;
            if same(&c, check) && same(&t, if_true) && same_opt(f.as_ref(), if_false.as_ref()) {
                return Ok(expr.clone());
            }
            ast::if_command(c, t, f)
        }
        ExprKind::Declaration { variables, source } => {
            let s = r.rewrite(source)?;
            let mut changed = !same(&s, source);
            let mut vars = Vec::with_capacity(variables.len());
            for v in variables {
                let value = r.rewrite(&v.value)?;
                changed |= !same(&value, &v.value);
                vars.push(VariableDecl {
                    name: v.name.clone(),
                    ty: v.ty.clone(),
                    value,
                });
            }
            if !changed {
                return Ok(expr.clone());
            }
            ast::declaration(vars, s)
        }
    };
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{column, lit, BinaryOp, ExprExt, TableAlias, Type};

    struct Identity;
    impl Rewriter for Identity {}

    struct BumpConstants;
    impl Rewriter for BumpConstants {
        fn rewrite(&mut self, expr: &ExprRef) -> Result<ExprRef> {
            if let ExprKind::Constant(crate::value::Value::Scalar(crate::value::SqlValue::Int(n))) =
                expr.kind()
            {
                return Ok(lit(n + 1));
            }
            walk(self, expr)
        }
    }

    fn sample() -> ExprRef {
        let a = TableAlias::new();
        let t = crate::ast::table(a, None, "T");
        let mut s = SelectExpr::new(
            TableAlias::new(),
            vec![ColumnDecl::new("x", column(a, "x", Type::Int))],
            Some(t),
        );
        s.where_clause = Some(column(a, "y", Type::Text).eq(lit("k")));
        s.take = Some(lit(5));
        ast::select(s)
    }

    #[test]
    fn test_identity_rewrite_shares_tree() {
        let e = sample();
        let out = Identity.rewrite(&e).unwrap();
        assert!(same(&e, &out));
    }

    #[test]
    fn test_rewrite_rebuilds_only_changed_path() {
        let e = sample();
        let out = BumpConstants.rewrite(&e).unwrap();
        assert!(!same(&e, &out));
        let before = e.as_select().unwrap();
        let after = out.as_select().unwrap();
        assert!(same(
            before.from.as_ref().unwrap(),
            after.from.as_ref().unwrap()
        ));
        assert!(same(&before.columns[0].expr, &after.columns[0].expr));
        assert_eq!(after.take.as_ref().unwrap().to_string(), "6");
    }

    #[test]
    fn test_binary_rebuild_keeps_operator() {
        let e = ast::binary(BinaryOp::Add, lit(1), lit(2));
        let out = BumpConstants.rewrite(&e).unwrap();
        assert_eq!(out.to_string(), "(2 + 3)");
    }
}
