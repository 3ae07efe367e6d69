//! Join simplification: cross joins with a usable predicate become inner
//! joins, and applies that are not really correlated become joins.

use std::collections::HashSet;

use crate::ast::{
    and_all, join, select, BinaryOp, ExprKind, ExprRef, JoinKind, SelectExpr, TableAlias,
};
use crate::dialect::Dialect;
use crate::error::Result;
use crate::translate::{project_columns, Affinity};
use crate::visit::{declared_aliases, has_aggregates, referenced_aliases, walk, Rewriter};

/// Splits a predicate into its top-level conjuncts.
pub(crate) fn conjuncts(expr: &ExprRef) -> Vec<ExprRef> {
    match expr.kind() {
        ExprKind::Binary {
            op: BinaryOp::And,
            left,
            right,
        } => {
            let mut out = conjuncts(left);
            out.extend(conjuncts(right));
            out
        }
        _ => vec![expr.clone()],
    }
}

fn can_be_join_condition(
    expr: &ExprRef,
    left: &HashSet<TableAlias>,
    right: &HashSet<TableAlias>,
) -> bool {
    let referenced = referenced_aliases(expr);
    referenced.iter().any(|a| left.contains(a))
        && referenced.iter().any(|a| right.contains(a))
        && referenced.iter().all(|a| left.contains(a) || right.contains(a))
}

struct CrossJoinRewriter;

impl CrossJoinRewriter {
    /// Promotes conjuncts into the conditions of cross joins in `source`,
    /// innermost joins first.
    fn promote(source: &ExprRef, remaining: &mut Vec<ExprRef>) -> ExprRef {
        let ExprKind::Join(j) = source.kind() else {
            return source.clone();
        };
        let left = Self::promote(&j.left, remaining);
        let right = Self::promote(&j.right, remaining);
        let mut kind = j.kind;
        let mut condition = j.condition.clone();
        if j.kind == JoinKind::CrossJoin {
            let l = declared_aliases(&left);
            let r = declared_aliases(&right);
            let (good, rest): (Vec<ExprRef>, Vec<ExprRef>) = remaining
                .drain(..)
                .partition(|c| can_be_join_condition(c, &l, &r));
            *remaining = rest;
            if !good.is_empty() {
                kind = JoinKind::InnerJoin;
                condition = and_all(good);
            }
        }
        if kind == j.kind
            && crate::ast::same(&left, &j.left)
            && crate::ast::same(&right, &j.right)
        {
            return source.clone();
        }
        join(kind, left, right, condition)
    }
}

impl Rewriter for CrossJoinRewriter {
    fn rewrite(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let out = walk(self, expr)?;
        let Some(s) = out.as_select() else {
            return Ok(out);
        };
        let (Some(from), Some(w)) = (&s.from, &s.where_clause) else {
            return Ok(out);
        };
        if !matches!(from.kind(), ExprKind::Join(_)) {
            return Ok(out);
        }
        let mut remaining = conjuncts(w);
        let before = remaining.len();
        let new_from = Self::promote(from, &mut remaining);
        if remaining.len() == before {
            return Ok(out);
        }
        Ok(select(SelectExpr {
            from: Some(new_from),
            where_clause: and_all(remaining),
            ..s.clone()
        }))
    }
}

/// Moves WHERE conjuncts that relate both sides of a cross join into its
/// condition, turning it into an inner join. Conjuncts over one side only
/// stay in the WHERE.
pub fn rewrite_cross_joins(expr: &ExprRef) -> Result<ExprRef> {
    CrossJoinRewriter.rewrite(expr)
}

struct CrossApplyRewriter<'d> {
    dialect: &'d dyn Dialect,
}

impl CrossApplyRewriter<'_> {
    fn decorrelate(&self, kind: JoinKind, left: &ExprRef, right: &ExprRef) -> Result<Option<ExprRef>> {
        if matches!(right.kind(), ExprKind::Table(_)) {
            return Ok((kind == JoinKind::CrossApply)
                .then(|| join(JoinKind::CrossJoin, left.clone(), right.clone(), None)));
        }
        let Some(s) = right.as_select() else {
            return Ok(None);
        };
        if s.take.is_some()
            || s.skip.is_some()
            || !s.group_by.is_empty()
            || s.distinct
            || has_aggregates(right)
        {
            return Ok(None);
        }
        let without_where = select(SelectExpr {
            where_clause: None,
            ..s.clone()
        });
        let left_aliases = declared_aliases(left);
        if referenced_aliases(&without_where)
            .iter()
            .any(|a| left_aliases.contains(a))
        {
            return Ok(None);
        }
        let Some(w) = &s.where_clause else {
            let kind = if kind == JoinKind::CrossApply {
                JoinKind::CrossJoin
            } else {
                return Ok(None);
            };
            return Ok(Some(join(kind, left.clone(), without_where, None)));
        };
        let inner: Vec<TableAlias> = s
            .from
            .as_ref()
            .map(declared_aliases)
            .unwrap_or_default()
            .into_iter()
            .collect();
        let pc = project_columns(self.dialect, Affinity::Client, w, &s.columns, s.alias, &inner)?;
        let right = select(SelectExpr {
            columns: pc.columns,
            where_clause: None,
            ..s.clone()
        });
        let kind = if kind == JoinKind::CrossApply {
            JoinKind::InnerJoin
        } else {
            JoinKind::LeftOuter
        };
        Ok(Some(join(kind, left.clone(), right, Some(pc.projector))))
    }
}

impl Rewriter for CrossApplyRewriter<'_> {
    fn rewrite(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let out = walk(self, expr)?;
        if let ExprKind::Join(j) = out.kind() {
            if j.kind.is_apply() {
                if let Some(rewritten) = self.decorrelate(j.kind, &j.left, &j.right)? {
                    return Ok(rewritten);
                }
            }
        }
        Ok(out)
    }
}

/// Turns applies whose right side is only correlated through its WHERE
/// into inner or left outer joins on that WHERE.
pub fn rewrite_cross_applies(dialect: &dyn Dialect, expr: &ExprRef) -> Result<ExprRef> {
    CrossApplyRewriter { dialect }.rewrite(expr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{column, lit, table, ColumnDecl, ExprExt, Type};
    use crate::dialect::GenericDialect;
    use crate::visit::check_scopes;

    fn customers_orders() -> (ExprRef, TableAlias, TableAlias) {
        let c = TableAlias::new();
        let o = TableAlias::new();
        let j = join(
            JoinKind::CrossJoin,
            table(c, Some("Customer".into()), "Customers"),
            table(o, Some("Order".into()), "Orders"),
            None,
        );
        (j, c, o)
    }

    #[test]
    fn test_cross_join_promotion() {
        let (j, c, o) = customers_orders();
        let relate = column(c, "Id", Type::Int).eq(column(o, "CustomerId", Type::Int));
        let single = column(c, "City", Type::Text).eq(lit("Oslo"));
        let mut s = SelectExpr::new(
            TableAlias::new(),
            vec![ColumnDecl::new("Id", column(c, "Id", Type::Int))],
            Some(j),
        );
        s.where_clause = Some(relate.and(single));
        let out = rewrite_cross_joins(&select(s)).unwrap();
        let sel = out.as_select().unwrap();
        let ExprKind::Join(j) = sel.from.as_ref().unwrap().kind() else {
            panic!("expected a join");
        };
        assert_eq!(j.kind, JoinKind::InnerJoin);
        assert!(crate::compare::are_equal(
            j.condition.as_ref().unwrap(),
            &column(c, "Id", Type::Int).eq(column(o, "CustomerId", Type::Int))
        ));
        assert!(matches!(
            sel.where_clause.as_ref().unwrap().kind(),
            ExprKind::Binary { op: BinaryOp::Eq, .. }
        ));
        check_scopes(&out).unwrap();
    }

    #[test]
    fn test_single_side_predicates_stay_in_where() {
        let (j, c, _) = customers_orders();
        let mut s = SelectExpr::new(TableAlias::new(), Vec::new(), Some(j));
        s.where_clause = Some(column(c, "City", Type::Text).eq(lit("Oslo")));
        let tree = select(s);
        let out = rewrite_cross_joins(&tree).unwrap();
        assert!(crate::ast::same(&out, &tree));
    }

    #[test]
    fn test_apply_over_filtered_select_becomes_join() {
        let c = TableAlias::new();
        let o = TableAlias::new();
        let inner = TableAlias::new();
        let mut right = SelectExpr::new(
            inner,
            vec![ColumnDecl::new("Total", column(o, "Total", Type::Float))],
            Some(table(o, Some("Order".into()), "Orders")),
        );
        right.where_clause = Some(column(o, "CustomerId", Type::Int).eq(column(c, "Id", Type::Int)));
        let apply = join(
            JoinKind::OuterApply,
            table(c, Some("Customer".into()), "Customers"),
            select(right),
            None,
        );
        let s = select(SelectExpr::new(TableAlias::new(), Vec::new(), Some(apply)));
        let out = rewrite_cross_applies(&GenericDialect::new(), &s).unwrap();
        let from = out.as_select().unwrap().from.clone().unwrap();
        let ExprKind::Join(j) = from.kind() else {
            panic!("expected a join");
        };
        assert_eq!(j.kind, JoinKind::LeftOuter);
        let right = j.right.as_select().unwrap();
        assert!(right.where_clause.is_none());
        assert!(right.column("CustomerId").is_some());
        check_scopes(&out).unwrap();
    }

    #[test]
    fn test_apply_over_table_is_cross_join() {
        let (j, _, _) = customers_orders();
        let ExprKind::Join(inner) = j.kind() else {
            unreachable!()
        };
        let apply = join(JoinKind::CrossApply, inner.left.clone(), inner.right.clone(), None);
        let out = rewrite_cross_applies(&GenericDialect::new(), &apply).unwrap();
        let ExprKind::Join(j) = out.kind() else {
            panic!("expected a join");
        };
        assert_eq!(j.kind, JoinKind::CrossJoin);
    }
}
