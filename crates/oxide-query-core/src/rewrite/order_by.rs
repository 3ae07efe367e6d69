//! Moves orderings outward so that the outermost select carries the
//! ordering the caller asked for.
//!
//! Inner selects only keep an ORDER BY when it changes which rows they
//! produce (they have TAKE or SKIP); orderings that would otherwise be lost
//! are re-declared as columns and rebound to the enclosing select.

use std::collections::HashSet;

use crate::ast::{
    column, select, unique_column_name, ColumnDecl, ExprKind, ExprRef, OrderExpr, SelectExpr,
    TableAlias,
};
use crate::error::Result;
use crate::visit::{
    declared_aliases, has_aggregates, rewrite_opt, walk, walk_select, Rewriter,
};

#[derive(Default)]
struct OrderByRewriter {
    gathered: Option<Vec<OrderExpr>>,
    outer_most: bool,
}

impl OrderByRewriter {
    fn prepend(&mut self, orderings: &[OrderExpr]) {
        let mut list = orderings.to_vec();
        list.extend(self.gathered.take().unwrap_or_default());
        // Later duplicates of the same column add nothing to the sort.
        let mut seen = HashSet::new();
        list.retain(|o| match o.expr.as_column() {
            Some(c) => seen.insert((c.alias, c.name.clone())),
            None => true,
        });
        self.gathered = Some(list);
    }

    fn reverse(&mut self) {
        if let Some(list) = &mut self.gathered {
            for o in list.iter_mut() {
                o.kind = o.kind.reversed();
            }
        }
    }

    fn visit_select(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let was_outer_most = self.outer_most;
        self.outer_most = false;
        let walked = {
            let ExprKind::Select(s) = expr.kind() else {
                return walk(self, expr);
            };
            walk_select(self, expr, s)
        };
        self.outer_most = was_outer_most;
        let walked = walked?;
        let Some(s) = walked.as_select() else {
            return Ok(walked);
        };

        let has_order_by = !s.order_by.is_empty();
        let has_group_by = !s.group_by.is_empty();
        let can_have_order_by = was_outer_most || s.take.is_some() || s.skip.is_some();
        let can_receive = can_have_order_by
            && !has_group_by
            && !s.distinct
            && !has_aggregates(&walked);

        if has_order_by {
            self.prepend(&s.order_by);
        }
        if s.reverse {
            self.reverse();
        }

        let orderings = if can_receive {
            self.gathered.clone().unwrap_or_default()
        } else if can_have_order_by {
            s.order_by.clone()
        } else {
            Vec::new()
        };

        let can_pass_on = !was_outer_most && !has_group_by && !s.distinct;
        let mut columns = s.columns.clone();
        if let Some(gathered) = self.gathered.take() {
            if can_pass_on {
                let produced = s.from.as_ref().map(declared_aliases).unwrap_or_default();
                let rebound = rebind(&gathered, s.alias, &produced, &mut columns);
                self.prepend(&rebound);
            } else if !can_receive {
                tracing::warn!(
                    alias = %s.alias,
                    dropped = gathered.len(),
                    "Dropped orderings that cannot pass a grouping or distinct select"
                );
            }
        }

        let orderings_changed = orderings.len() != s.order_by.len()
            || orderings
                .iter()
                .zip(&s.order_by)
                .any(|(a, b)| a.kind != b.kind || !crate::ast::same(&a.expr, &b.expr));
        if !orderings_changed && columns.len() == s.columns.len() && !s.reverse {
            return Ok(walked);
        }
        Ok(select(SelectExpr {
            columns,
            order_by: orderings,
            reverse: false,
            ..s.clone()
        }))
    }
}

/// Rewrites `orderings` over the columns of the select `alias`, declaring
/// new columns for keys the select does not already output.
fn rebind(
    orderings: &[OrderExpr],
    alias: TableAlias,
    produced: &HashSet<TableAlias>,
    columns: &mut Vec<ColumnDecl>,
) -> Vec<OrderExpr> {
    let mut out = Vec::with_capacity(orderings.len());
    for o in orderings {
        let key = o.expr.as_column();
        if key.is_some_and(|c| !produced.contains(&c.alias)) {
            out.push(o.clone());
            continue;
        }
        let existing = columns.iter().find(|d| {
            crate::ast::same(&d.expr, &o.expr)
                || matches!((d.expr.as_column(), key), (Some(a), Some(b)) if a == b)
        });
        let name = match existing {
            Some(d) => d.name.clone(),
            None => {
                let base = key.map_or_else(|| format!("c{}", columns.len()), |c| c.name.clone());
                let name = unique_column_name(columns, &base);
                columns.push(ColumnDecl::new(name.clone(), o.expr.clone()));
                name
            }
        };
        out.push(OrderExpr::new(o.kind, column(alias, name, o.expr.ty().clone())));
    }
    out
}

impl Rewriter for OrderByRewriter {
    fn rewrite(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        match expr.kind() {
            ExprKind::Select(_) => self.visit_select(expr),
            ExprKind::Scalar(_) | ExprKind::Exists(_) | ExprKind::In(_) => {
                let saved = self.gathered.take();
                let out = walk(self, expr);
                self.gathered = saved;
                out
            }
            ExprKind::SetOp(_) => {
                // Each side is sorted on its own, which a set operation
                // discards.
                let saved = self.gathered.take();
                let out = walk(self, expr);
                self.gathered = saved;
                out
            }
            ExprKind::Join(j) => {
                let left = self.rewrite(&j.left)?;
                let left_orders = self.gathered.take();
                let right = self.rewrite(&j.right)?;
                if let Some(l) = left_orders {
                    self.prepend(&l);
                }
                let condition = rewrite_opt(self, j.condition.as_ref())?;
                if crate::ast::same(&left, &j.left)
                    && crate::ast::same(&right, &j.right)
                    && crate::visit::same_opt(condition.as_ref(), j.condition.as_ref())
                {
                    return Ok(expr.clone());
                }
                Ok(crate::ast::join(j.kind, left, right, condition))
            }
            ExprKind::Projection(_) => {
                let saved = (self.gathered.take(), self.outer_most);
                self.outer_most = true;
                let out = walk(self, expr);
                self.gathered = saved.0;
                self.outer_most = saved.1;
                out
            }
            _ => walk(self, expr),
        }
    }
}

/// Hoists orderings to the outermost select of every projection.
pub fn rewrite_order_by(expr: &ExprRef) -> Result<ExprRef> {
    OrderByRewriter {
        gathered: None,
        outer_most: true,
    }
    .rewrite(expr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{lit, projection, table, ExprExt, OrderKind, Type};
    use crate::visit::check_scopes;

    fn ordered_inner() -> (ExprRef, TableAlias, TableAlias) {
        let t = TableAlias::new();
        let inner = TableAlias::new();
        let mut s = SelectExpr::new(
            inner,
            vec![ColumnDecl::new("Id", column(t, "Id", Type::Int))],
            Some(table(t, Some("Customer".into()), "Customers")),
        );
        s.order_by = vec![OrderExpr::new(
            OrderKind::Ascending,
            column(t, "Name", Type::Text),
        )];
        (select(s), t, inner)
    }

    #[test]
    fn test_inner_ordering_is_hoisted() {
        let (inner, _, inner_alias) = ordered_inner();
        let outer = TableAlias::new();
        let mut s = SelectExpr::new(
            outer,
            vec![ColumnDecl::new("Id", column(inner_alias, "Id", Type::Int))],
            Some(inner),
        );
        s.where_clause = Some(column(inner_alias, "Id", Type::Int).gt(lit(1)));
        let tree = projection(select(s), column(outer, "Id", Type::Int), None);
        let out = rewrite_order_by(&tree).unwrap();
        let outer_sel = out.as_projection().unwrap().select.as_select().unwrap().clone();
        assert_eq!(outer_sel.order_by.len(), 1);
        let key = outer_sel.order_by[0].expr.as_column().unwrap();
        assert_eq!((key.alias, key.name.as_str()), (inner_alias, "Name"));
        let inner_sel = outer_sel.from.as_ref().unwrap().as_select().unwrap().clone();
        assert!(inner_sel.order_by.is_empty());
        assert_eq!(inner_sel.columns.len(), 2);
        check_scopes(&out).unwrap();
    }

    #[test]
    fn test_reverse_flips_directions() {
        let (inner, _, inner_alias) = ordered_inner();
        let outer = TableAlias::new();
        let mut s = SelectExpr::new(
            outer,
            vec![ColumnDecl::new("Id", column(inner_alias, "Id", Type::Int))],
            Some(inner),
        );
        s.reverse = true;
        let out = rewrite_order_by(&select(s)).unwrap();
        let sel = out.as_select().unwrap();
        assert!(!sel.reverse);
        assert_eq!(sel.order_by[0].kind, OrderKind::Descending);
    }

    #[test]
    fn test_distinct_select_drops_gathered_orderings() {
        let (inner, _, inner_alias) = ordered_inner();
        let mid = TableAlias::new();
        let mut m = SelectExpr::new(
            mid,
            vec![ColumnDecl::new("Id", column(inner_alias, "Id", Type::Int))],
            Some(inner),
        );
        m.distinct = true;
        let outer = TableAlias::new();
        let s = SelectExpr::new(
            outer,
            vec![ColumnDecl::new("Id", column(mid, "Id", Type::Int))],
            Some(select(m)),
        );
        let out = rewrite_order_by(&select(s)).unwrap();
        assert!(out.as_select().unwrap().order_by.is_empty());
        check_scopes(&out).unwrap();
    }

    #[test]
    fn test_take_keeps_inner_ordering() {
        let (inner, _, _) = ordered_inner();
        let inner = {
            let mut s = inner.as_select().unwrap().clone();
            s.take = Some(lit(5));
            select(s)
        };
        let inner_alias = inner.as_select().unwrap().alias;
        let outer = TableAlias::new();
        let s = SelectExpr::new(
            outer,
            vec![ColumnDecl::new("Id", column(inner_alias, "Id", Type::Int))],
            Some(inner),
        );
        let out = rewrite_order_by(&select(s)).unwrap();
        let sel = out.as_select().unwrap();
        assert_eq!(sel.order_by.len(), 1);
        let inner_sel = sel.from.as_ref().unwrap().as_select().unwrap();
        assert_eq!(inner_sel.order_by.len(), 1);
    }
}
