//! Relocates aggregates computed against a group into the grouping select.

use std::collections::HashMap;

use crate::ast::{column, unique_column_name, ColumnDecl, Expr, ExprKind, ExprRef, SelectExpr, TableAlias};
use crate::error::Result;
use crate::visit::{walk, Rewriter};

struct AggregateRewriter {
    pending: HashMap<TableAlias, Vec<ExprRef>>,
    map: HashMap<*const Expr, ExprRef>,
}

fn gather(expr: &ExprRef, out: &mut HashMap<TableAlias, Vec<ExprRef>>) {
    if let ExprKind::AggregateSubquery(a) = expr.kind() {
        let list = out.entry(a.group_by_alias).or_default();
        if !list.iter().any(|e| crate::ast::same(e, expr)) {
            list.push(expr.clone());
        }
    }
    for c in crate::visit::children(expr) {
        gather(c, out);
    }
}

impl Rewriter for AggregateRewriter {
    fn rewrite(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        match expr.kind() {
            ExprKind::AggregateSubquery(a) => {
                if let Some(mapped) = self.map.get(&ExprRef::as_ptr(expr)) {
                    return Ok(mapped.clone());
                }
                self.rewrite(&a.subquery)
            }
            ExprKind::Select(s) => {
                let out = walk(self, expr)?;
                let Some(aggregates) = self.pending.remove(&s.alias) else {
                    return Ok(out);
                };
                let Some(sel) = out.as_select() else {
                    return Ok(out);
                };
                let mut columns = sel.columns.clone();
                for a in aggregates {
                    let ExprKind::AggregateSubquery(sub) = a.kind() else {
                        continue;
                    };
                    let name = unique_column_name(&columns, &format!("agg{}", columns.len()));
                    let in_group = self.rewrite(&sub.aggregate_in_group)?;
                    columns.push(ColumnDecl::new(name.clone(), in_group));
                    self.map.insert(
                        ExprRef::as_ptr(&a),
                        column(sub.group_by_alias, name, a.ty().clone()),
                    );
                }
                Ok(crate::ast::select(SelectExpr {
                    columns,
                    ..sel.clone()
                }))
            }
            _ => walk(self, expr),
        }
    }
}

/// Moves every `AggregateSubquery` whose grouping select is in the tree
/// into that select's columns and replaces the use-sites with column
/// references. Aggregates whose group is not found fall back to their
/// correlated subquery form.
pub fn rewrite_aggregates(expr: &ExprRef) -> Result<ExprRef> {
    let mut pending = HashMap::new();
    gather(expr, &mut pending);
    if pending.is_empty() {
        return Ok(expr.clone());
    }
    let mut r = AggregateRewriter {
        pending,
        map: HashMap::new(),
    };
    r.rewrite(expr)
}
