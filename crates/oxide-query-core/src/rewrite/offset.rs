//! Lowers `skip` for dialects without a native OFFSET.
//!
//! Two shapes are available. The first adds a `ROW_NUMBER()` column and
//! filters it by range. The second takes the leading `skip + take` rows
//! and drops those whose ordering keys are among the first `skip`.

use crate::ast::{
    and, and_all, between, binary, column, exists, is_null, lit, not, or, row_number, select,
    unique_column_name, BinaryOp, ColumnDecl, ExprExt, ExprKind, ExprRef, OrderExpr, OrderKind,
    SelectExpr, TableAlias, Type,
};
use crate::compare::are_equal;
use crate::dialect::OffsetStrategy;
use crate::error::{QueryError, Result};
use crate::value::{SqlValue, Value};
use crate::visit::{refresh_aliases, walk, Rewriter};

/// Wraps `sel` in a select that passes its columns through. The wrapper
/// keeps `sel`'s alias; `sel` itself is re-aliased to `new_alias`.
pub(crate) fn add_redundant_select(sel: &SelectExpr, new_alias: TableAlias) -> SelectExpr {
    let columns = sel
        .columns
        .iter()
        .map(|d| ColumnDecl {
            name: d.name.clone(),
            expr: column(new_alias, d.name.clone(), d.ty.clone()),
            ty: d.ty.clone(),
        })
        .collect();
    let inner = SelectExpr {
        alias: new_alias,
        ..sel.clone()
    };
    SelectExpr::new(sel.alias, columns, Some(select(inner)))
}

fn int_constant(e: &ExprRef) -> Option<i64> {
    match e.as_constant()? {
        Value::Scalar(SqlValue::Int(n)) => Some(*n),
        _ => None,
    }
}

/// `a + b`, folded when both are integer constants. Folded bounds saturate:
/// a row position never reaches `i64::MAX`.
fn plus(a: &ExprRef, b: &ExprRef) -> ExprRef {
    match (int_constant(a), int_constant(b)) {
        (Some(x), Some(y)) => lit(x.saturating_add(y)),
        _ => binary(BinaryOp::Add, a.clone(), b.clone()),
    }
}

/// Moves the orderings of a distinct or grouped select onto the columns of
/// a pass-through wrapper around it.
fn wrap_with_orderings(
    base: &SelectExpr,
    orderings: &[OrderExpr],
) -> Result<(SelectExpr, Vec<OrderExpr>)> {
    let inner_alias = TableAlias::new();
    let mut rebound = Vec::with_capacity(orderings.len());
    for o in orderings {
        let Some(d) = base.columns.iter().find(|d| are_equal(&d.expr, &o.expr)) else {
            return Err(QueryError::unsupported(
                "offset over a distinct or grouped select ordered by an unselected key",
            ));
        };
        rebound.push(OrderExpr::new(
            o.kind,
            column(inner_alias, d.name.clone(), d.ty.clone()),
        ));
    }
    let inner = SelectExpr {
        order_by: Vec::new(),
        ..base.clone()
    };
    Ok((add_redundant_select(&inner, inner_alias), rebound))
}

/// `s` without its paging, with distinct or grouped selects wrapped so that
/// the returned orderings read plain columns.
fn unpaged(s: &SelectExpr) -> Result<(SelectExpr, Vec<OrderExpr>)> {
    let base = SelectExpr {
        skip: None,
        take: None,
        ..s.clone()
    };
    if base.distinct || !base.group_by.is_empty() {
        return wrap_with_orderings(&base, &s.order_by);
    }
    Ok((base, s.order_by.clone()))
}

fn to_row_number(s: &SelectExpr, outer_most: bool) -> Result<SelectExpr> {
    let Some(skip) = s.skip.clone() else {
        return Ok(s.clone());
    };
    let (mut base, orderings) = unpaged(s)?;
    let rn = unique_column_name(&base.columns, "rownum");
    base.columns
        .push(ColumnDecl::new(rn.clone(), row_number(orderings.clone())));
    base.order_by = Vec::new();

    let inner_alias = TableAlias::new();
    let mut outer = add_redundant_select(&base, inner_alias);
    outer.columns.retain(|c| c.name != rn);
    let rn_col = column(inner_alias, rn, Type::Int);
    outer.where_clause = Some(match &s.take {
        Some(take) => between(rn_col.clone(), plus(&skip, &lit(1)), plus(&skip, take)),
        None => rn_col.gt(skip),
    });
    if outer_most && !orderings.is_empty() {
        outer.order_by = vec![OrderExpr::new(OrderKind::Ascending, rn_col)];
    }
    tracing::trace!(alias = %s.alias, "Lowered skip to a row number range");
    Ok(outer)
}

/// One ordering key, declared as a column of the leading select.
struct SortKey {
    kind: OrderKind,
    name: String,
    ty: Type,
}

/// Declares every ordering as a column of `base`, reusing columns that
/// already compute it.
fn declare_sort_keys(base: &mut SelectExpr, orderings: &[OrderExpr]) -> Vec<SortKey> {
    let mut keys = Vec::with_capacity(orderings.len());
    for o in orderings {
        let name = match base.columns.iter().find(|d| are_equal(&d.expr, &o.expr)) {
            Some(d) => d.name.clone(),
            None => {
                let name = unique_column_name(&base.columns, "key");
                base.columns.push(ColumnDecl::new(name.clone(), o.expr.clone()));
                name
            }
        };
        keys.push(SortKey {
            kind: o.kind,
            name,
            ty: o.expr.ty().clone(),
        });
    }
    keys
}

/// `a = b`, also true when both are null.
fn same_key(a: ExprRef, b: ExprRef) -> ExprRef {
    or(a.eq(b.clone()), and(is_null(a), is_null(b)))
}

fn to_nested_order_by(s: &SelectExpr, outer_most: bool) -> Result<SelectExpr> {
    let Some(skip) = s.skip.clone() else {
        return Ok(s.clone());
    };
    if s.order_by.is_empty() {
        return Err(QueryError::unsupported(
            "skip without an ordering under nested order-by offsets",
        ));
    }
    let (mut base, orderings) = unpaged(s)?;
    let keys = declare_sort_keys(&mut base, &orderings);
    base.order_by = orderings;

    // The first `skip` keys, read from a copy of the source.
    let skipped = SelectExpr {
        columns: base
            .columns
            .iter()
            .filter(|d| keys.iter().any(|k| k.name == d.name))
            .cloned()
            .collect(),
        take: Some(skip.clone()),
        ..base.clone()
    };
    let skipped = refresh_aliases(&select(skipped))?;
    let Some(skipped_alias) = skipped.as_select().map(|x| x.alias) else {
        return Err(QueryError::invalid("alias refresh replaced a select"));
    };

    let leading = match &s.take {
        Some(take) => SelectExpr {
            take: Some(plus(&skip, take)),
            ..base
        },
        None => SelectExpr {
            order_by: Vec::new(),
            ..base
        },
    };
    let leading_alias = TableAlias::new();
    let mut outer = add_redundant_select(&leading, leading_alias);
    outer.columns.retain(|c| s.column(&c.name).is_some());

    let matches = keys.iter().map(|k| {
        same_key(
            column(skipped_alias, k.name.clone(), k.ty.clone()),
            column(leading_alias, k.name.clone(), k.ty.clone()),
        )
    });
    let mut seen = SelectExpr::new(
        TableAlias::new(),
        vec![ColumnDecl::new("test", lit(1))],
        Some(skipped),
    );
    seen.where_clause = and_all(matches);
    outer.where_clause = Some(not(exists(select(seen))));
    if outer_most {
        outer.order_by = keys
            .iter()
            .map(|k| OrderExpr::new(k.kind, column(leading_alias, k.name.clone(), k.ty.clone())))
            .collect();
    }
    tracing::trace!(alias = %s.alias, "Lowered skip to an exclusion of leading keys");
    Ok(outer)
}

struct OffsetRewriter {
    strategy: OffsetStrategy,
    outer_most: bool,
}

impl Rewriter for OffsetRewriter {
    fn rewrite(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        match expr.kind() {
            ExprKind::Projection(_) => {
                let saved = std::mem::replace(&mut self.outer_most, true);
                let out = walk(self, expr);
                self.outer_most = saved;
                out
            }
            ExprKind::Select(_) => {
                let was_outer_most = std::mem::replace(&mut self.outer_most, false);
                let walked = walk(self, expr);
                self.outer_most = was_outer_most;
                let walked = walked?;
                let Some(s) = walked.as_select() else {
                    return Ok(walked);
                };
                if s.skip.is_none() {
                    return Ok(walked);
                }
                let lowered = match self.strategy {
                    OffsetStrategy::Native => return Ok(walked),
                    OffsetStrategy::RowNumber => to_row_number(s, was_outer_most)?,
                    OffsetStrategy::NestedOrderBy => to_nested_order_by(s, was_outer_most)?,
                };
                Ok(select(lowered))
            }
            _ => walk(self, expr),
        }
    }
}

/// Replaces every select's `skip` according to `strategy`. Native offsets
/// are left for the formatter.
pub fn rewrite_offsets(strategy: OffsetStrategy, expr: &ExprRef) -> Result<ExprRef> {
    if strategy == OffsetStrategy::Native {
        return Ok(expr.clone());
    }
    OffsetRewriter {
        strategy,
        outer_most: true,
    }
    .rewrite(expr)
}
