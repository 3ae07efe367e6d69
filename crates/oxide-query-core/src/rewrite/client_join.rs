//! Turns nested collections correlated by key equality into client joins:
//! the inner query runs once, uncorrelated, and its rows are matched to
//! outer rows by key while materializing.

use std::collections::HashSet;

use super::joins::conjuncts;
use crate::ast::{
    and_all, client_join, column, projection, select, unique_column_name, BinaryOp, ColumnDecl,
    ExprKind, ExprRef, SelectExpr, TableAlias,
};
use crate::error::Result;
use crate::visit::{children, referenced_aliases, walk, Rewriter};

#[derive(Default)]
struct ClientJoinRewriter {
    /// Aliases readable by the projector currently being visited.
    outer: Option<HashSet<TableAlias>>,
}

/// Every alias declared by a source anywhere in the tree.
fn all_declared(expr: &ExprRef, out: &mut HashSet<TableAlias>) {
    match expr.kind() {
        ExprKind::Table(t) => {
            out.insert(t.alias);
        }
        ExprKind::Select(s) => {
            out.insert(s.alias);
        }
        ExprKind::SetOp(s) => {
            out.insert(s.alias);
        }
        _ => {}
    }
    for c in children(expr) {
        all_declared(c, out);
    }
}

/// Splits `a = b` into `(outer, inner)` when one side reads only outer
/// aliases and the other none of them.
fn key_pair(c: &ExprRef, outer: &HashSet<TableAlias>) -> Option<(ExprRef, ExprRef)> {
    let ExprKind::Binary {
        op: BinaryOp::Eq,
        left,
        right,
    } = c.kind()
    else {
        return None;
    };
    let only_outer = |e: &ExprRef| {
        let r = referenced_aliases(e);
        !r.is_empty() && r.iter().all(|a| outer.contains(a))
    };
    let no_outer = |e: &ExprRef| {
        let r = referenced_aliases(e);
        !r.is_empty() && r.iter().all(|a| !outer.contains(a))
    };
    if only_outer(left) && no_outer(right) {
        Some((left.clone(), right.clone()))
    } else if only_outer(right) && no_outer(left) {
        Some((right.clone(), left.clone()))
    } else {
        None
    }
}

fn try_client_join(expr: &ExprRef, outer: &HashSet<TableAlias>) -> Option<ExprRef> {
    let p = expr.as_projection()?;
    if p.aggregator.is_some() {
        return None;
    }
    let s = p.select.as_select()?;
    if s.take.is_some() || s.skip.is_some() || s.distinct || s.reverse || !s.group_by.is_empty() {
        return None;
    }
    let w = s.where_clause.as_ref()?;
    let mut outer_keys = Vec::new();
    let mut inner_exprs = Vec::new();
    let mut rest = Vec::new();
    for c in conjuncts(w) {
        match key_pair(&c, outer) {
            Some((o, i)) => {
                outer_keys.push(o);
                inner_exprs.push(i);
            }
            None => rest.push(c),
        }
    }
    if outer_keys.is_empty() {
        return None;
    }
    let mut columns = s.columns.clone();
    let mut inner_keys = Vec::with_capacity(inner_exprs.len());
    for (i, e) in inner_exprs.iter().enumerate() {
        let name = unique_column_name(&columns, &format!("k{i}"));
        columns.push(ColumnDecl::new(name.clone(), e.clone()));
        inner_keys.push(column(s.alias, name, e.ty().clone()));
    }
    let independent = select(SelectExpr {
        columns,
        where_clause: and_all(rest),
        ..s.clone()
    });
    let inner = projection(independent, p.projector.clone(), None);

    // Any remaining correlation means the inner query cannot run once.
    let mut declared = HashSet::new();
    all_declared(&inner, &mut declared);
    if referenced_aliases(&inner)
        .iter()
        .any(|a| !declared.contains(a))
    {
        return None;
    }
    tracing::trace!(keys = outer_keys.len(), "Rewrote nested collection as client join");
    Some(client_join(inner, outer_keys, inner_keys))
}

impl Rewriter for ClientJoinRewriter {
    fn rewrite(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        match expr.kind() {
            ExprKind::Projection(p) => {
                let aliases = p
                    .select
                    .as_select()
                    .map(|s| HashSet::from([s.alias]))
                    .unwrap_or_default();
                let saved = self.outer.replace(aliases);
                let projector = self.rewrite(&p.projector);
                self.outer = saved;
                let projector = projector?;
                let rebuilt = if crate::ast::same(&projector, &p.projector) {
                    expr.clone()
                } else {
                    projection(p.select.clone(), projector, p.aggregator)
                };
                if let Some(outer) = &self.outer {
                    if let Some(joined) = try_client_join(&rebuilt, outer) {
                        return Ok(joined);
                    }
                }
                Ok(rebuilt)
            }
            ExprKind::Select(_) => {
                let saved = self.outer.take();
                let out = walk(self, expr);
                self.outer = saved;
                out
            }
            _ => walk(self, expr),
        }
    }
}

/// Rewrites nested collection projections whose only correlation is key
/// equality with the enclosing row into client joins.
pub fn rewrite_client_joins(expr: &ExprRef) -> Result<ExprRef> {
    ClientJoinRewriter::default().rewrite(expr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{lit, table, ExprExt, Type};
    use crate::visit::check_scopes;

    fn customers_with_orders(extra: Option<fn(TableAlias, TableAlias) -> ExprRef>) -> ExprRef {
        let c = TableAlias::new();
        let outer = TableAlias::new();
        let o = TableAlias::new();
        let inner = TableAlias::new();
        let mut inner_sel = SelectExpr::new(
            inner,
            vec![ColumnDecl::new("Total", column(o, "Total", Type::Float))],
            Some(table(o, Some("Order".into()), "Orders")),
        );
        let mut w = column(o, "CustomerId", Type::Int).eq(column(outer, "Id", Type::Int));
        if let Some(f) = extra {
            w = w.and(f(o, outer));
        }
        inner_sel.where_clause = Some(w);
        let nested = projection(select(inner_sel), column(inner, "Total", Type::Float), None);
        let outer_sel = SelectExpr::new(
            outer,
            vec![ColumnDecl::new("Id", column(c, "Id", Type::Int))],
            Some(table(c, Some("Customer".into()), "Customers")),
        );
        projection(select(outer_sel), nested, None)
    }

    #[test]
    fn test_key_correlated_collection_becomes_client_join() {
        let tree = customers_with_orders(None);
        let out = rewrite_client_joins(&tree).unwrap();
        let p = out.as_projection().unwrap();
        let ExprKind::ClientJoin(cj) = p.projector.kind() else {
            panic!("expected a client join, found {}", p.projector.kind_name());
        };
        assert_eq!(cj.outer_key.len(), 1);
        let inner = cj.projection.as_projection().unwrap().select.as_select().unwrap();
        assert!(inner.where_clause.is_none());
        assert!(inner.column("k0").is_some());
        check_scopes(&out).unwrap();
    }

    #[test]
    fn test_single_side_filters_stay_on_inner_query() {
        let tree = customers_with_orders(Some(|o, _| column(o, "Total", Type::Float).gt(lit(10.0))));
        let out = rewrite_client_joins(&tree).unwrap();
        let p = out.as_projection().unwrap();
        let ExprKind::ClientJoin(cj) = p.projector.kind() else {
            panic!("expected a client join");
        };
        let inner = cj.projection.as_projection().unwrap().select.as_select().unwrap();
        assert!(inner.where_clause.is_some());
    }

    #[test]
    fn test_other_correlation_is_left_alone() {
        let tree = customers_with_orders(Some(|o, outer| {
            column(o, "Total", Type::Float).gt(column(outer, "Id", Type::Int))
        }));
        let out = rewrite_client_joins(&tree).unwrap();
        assert!(crate::ast::same(&out, &tree));
    }
}
