//! Removal of selects, columns and joins that add nothing to a query.

use std::collections::{HashMap, HashSet};

use crate::ast::{
    and, column, select, ColumnExpr, Expr, ExprKind, ExprRef, JoinKind, SelectExpr, TableAlias,
};
use crate::compare::Comparer;
use crate::error::{QueryError, Result};
use crate::visit::{has_aggregates, walk, Rewriter};

/// Every column is a plain reference to a column of the same name.
fn is_simple_projection(s: &SelectExpr) -> bool {
    s.columns
        .iter()
        .all(|d| d.expr.as_column().is_some_and(|c| c.name == d.name))
}

/// Every column re-reads the same-position column of a FROM select.
fn is_name_map_projection(s: &SelectExpr) -> bool {
    let Some(from) = s.from.as_ref().and_then(|f| f.as_select()) else {
        return false;
    };
    s.columns.len() == from.columns.len()
        && s
            .columns
            .iter()
            .zip(&from.columns)
            .all(|(d, f)| d.expr.as_column().is_some_and(|c| c.name == f.name))
}

fn is_redundant_subquery(s: &SelectExpr) -> bool {
    (is_simple_projection(s) || is_name_map_projection(s))
        && !s.distinct
        && !s.reverse
        && s.take.is_none()
        && s.skip.is_none()
        && s.where_clause.is_none()
        && s.order_by.is_empty()
        && s.group_by.is_empty()
}

/// Redundant selects of a FROM tree, not looking inside them.
fn gather_redundant(source: &ExprRef, out: &mut Vec<ExprRef>) {
    match source.kind() {
        ExprKind::Select(s) => {
            if is_redundant_subquery(s) {
                out.push(source.clone());
            }
        }
        ExprKind::Join(j) => {
            gather_redundant(&j.left, out);
            gather_redundant(&j.right, out);
        }
        _ => {}
    }
}

/// Replaces the given selects by their FROM and their columns by the
/// expressions they declared.
struct SubqueryRemover {
    remove: HashSet<*const Expr>,
    map: HashMap<TableAlias, HashMap<String, ExprRef>>,
}

impl SubqueryRemover {
    fn new(selects: &[ExprRef]) -> Self {
        let mut remove = HashSet::new();
        let mut map = HashMap::new();
        for s in selects {
            if let Some(sel) = s.as_select() {
                remove.insert(ExprRef::as_ptr(s));
                map.insert(
                    sel.alias,
                    sel.columns
                        .iter()
                        .map(|d| (d.name.clone(), d.expr.clone()))
                        .collect(),
                );
            }
        }
        Self { remove, map }
    }

    fn remove(expr: &ExprRef, selects: &[ExprRef]) -> Result<ExprRef> {
        Self::new(selects).rewrite(expr)
    }
}

impl Rewriter for SubqueryRemover {
    fn rewrite(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        match expr.kind() {
            ExprKind::Select(s) if self.remove.contains(&ExprRef::as_ptr(expr)) => match &s.from {
                Some(from) => self.rewrite(from),
                None => Err(QueryError::invalid("removed a select without a source")),
            },
            ExprKind::Column(c) => match self.map.get(&c.alias) {
                Some(names) => match names.get(&c.name) {
                    Some(e) => {
                        let e = e.clone();
                        self.rewrite(&e)
                    }
                    None => Err(QueryError::invalid(format!(
                        "reference to undefined column {}.{}",
                        c.alias, c.name
                    ))),
                },
                None => Ok(expr.clone()),
            },
            _ => walk(self, expr),
        }
    }
}

struct RedundantSubqueryRemover;

impl Rewriter for RedundantSubqueryRemover {
    fn rewrite(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let out = walk(self, expr)?;
        match out.kind() {
            ExprKind::Select(s) => {
                let mut redundant = Vec::new();
                if let Some(from) = &s.from {
                    gather_redundant(from, &mut redundant);
                }
                if redundant.is_empty() {
                    return Ok(out);
                }
                SubqueryRemover::remove(&out, &redundant)
            }
            ExprKind::Projection(p) => {
                let from_is_select = p
                    .select
                    .as_select()
                    .and_then(|s| s.from.as_ref())
                    .is_some_and(|f| f.as_select().is_some());
                if !from_is_select {
                    return Ok(out);
                }
                let mut redundant = Vec::new();
                gather_redundant(&p.select, &mut redundant);
                if redundant.is_empty() {
                    return Ok(out);
                }
                SubqueryRemover::remove(&out, &redundant)
            }
            _ => Ok(out),
        }
    }
}

fn left_most_select(source: &ExprRef) -> Option<&ExprRef> {
    match source.kind() {
        ExprKind::Select(_) => Some(source),
        ExprKind::Join(j) => left_most_select(&j.left),
        _ => None,
    }
}

fn is_column_projection(s: &SelectExpr) -> bool {
    s.columns
        .iter()
        .all(|d| matches!(d.expr.kind(), ExprKind::Column(_) | ExprKind::Constant(_)))
}

fn can_merge_with_from(expr: &ExprRef, is_top_level: bool) -> bool {
    let Some(sel) = expr.as_select() else {
        return false;
    };
    let Some(from_expr) = sel.from.as_ref().and_then(left_most_select) else {
        return false;
    };
    let Some(from) = from_expr.as_select() else {
        return false;
    };
    if !is_column_projection(from) {
        return false;
    }
    let sel_name_map = is_name_map_projection(sel);
    let sel_order = !sel.order_by.is_empty();
    let sel_group = !sel.group_by.is_empty();
    let sel_aggregates = has_aggregates(expr);
    let sel_join = sel
        .from
        .as_ref()
        .is_some_and(|f| matches!(f.kind(), ExprKind::Join(_)));
    let from_order = !from.order_by.is_empty();
    let from_group = !from.group_by.is_empty();
    let from_aggregates = has_aggregates(from_expr);

    if sel_order && from_order {
        return false;
    }
    if sel_group && from_group {
        return false;
    }
    if sel.reverse || from.reverse {
        return false;
    }
    if from_order && (sel_group || sel_aggregates || sel.distinct) {
        return false;
    }
    if from_group {
        return false;
    }
    // A filter over a limited source does not commute with the limit.
    if (from.take.is_some() || from.skip.is_some()) && sel.where_clause.is_some() {
        return false;
    }
    if from.take.is_some()
        && (sel.take.is_some()
            || sel.skip.is_some()
            || sel.distinct
            || sel_aggregates
            || sel_group
            || sel_join)
    {
        return false;
    }
    if from.skip.is_some()
        && (sel.skip.is_some() || sel.distinct || sel_aggregates || sel_group || sel_join)
    {
        return false;
    }
    if from.distinct
        && (sel.take.is_some()
            || sel.skip.is_some()
            || !sel_name_map
            || sel_group
            || sel_aggregates
            || (sel_order && !is_top_level)
            || sel_join)
    {
        return false;
    }
    if from_aggregates
        && (sel.take.is_some()
            || sel.skip.is_some()
            || sel.distinct
            || sel_aggregates
            || sel_group
            || sel_join)
    {
        return false;
    }
    true
}

/// Folds a FROM select into its parent when the parent's clauses can take
/// over the FROM's.
struct SubqueryMerger {
    is_top_level: bool,
}

impl SubqueryMerger {
    fn merge_select(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let was_top_level = self.is_top_level;
        self.is_top_level = false;
        let mut current = walk(self, expr)?;
        self.is_top_level = was_top_level;
        while can_merge_with_from(&current, was_top_level) {
            let Some(from_expr) = current
                .as_select()
                .and_then(|s| s.from.as_ref())
                .and_then(left_most_select)
                .cloned()
            else {
                break;
            };
            let Some(from) = from_expr.as_select().cloned() else {
                break;
            };
            let removed = SubqueryRemover::remove(&current, std::slice::from_ref(&from_expr))?;
            let Some(s) = removed.as_select() else {
                break;
            };
            let where_clause = match (from.where_clause, &s.where_clause) {
                (Some(f), Some(w)) => Some(and(f, w.clone())),
                (Some(f), None) => Some(f),
                (None, w) => w.clone(),
            };
            current = select(SelectExpr {
                where_clause,
                order_by: if s.order_by.is_empty() {
                    from.order_by
                } else {
                    s.order_by.clone()
                },
                group_by: if s.group_by.is_empty() {
                    from.group_by
                } else {
                    s.group_by.clone()
                },
                skip: s.skip.clone().or(from.skip),
                take: s.take.clone().or(from.take),
                distinct: s.distinct || from.distinct,
                ..s.clone()
            });
        }
        Ok(current)
    }
}

impl Rewriter for SubqueryMerger {
    fn rewrite(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        match expr.kind() {
            ExprKind::Select(_) => self.merge_select(expr),
            ExprKind::Projection(_) => {
                let saved = std::mem::replace(&mut self.is_top_level, true);
                let out = walk(self, expr);
                self.is_top_level = saved;
                out
            }
            _ => walk(self, expr),
        }
    }
}

/// Removes pass-through selects, then merges FROM selects into their
/// parents where the parent can absorb them.
pub fn remove_redundant_subqueries(expr: &ExprRef) -> Result<ExprRef> {
    let out = RedundantSubqueryRemover.rewrite(expr)?;
    SubqueryMerger { is_top_level: true }.rewrite(&out)
}

/// Drops duplicate column declarations and re-points their users.
struct RedundantColumnRemover {
    map: HashMap<ColumnExpr, ColumnExpr>,
    keep: HashSet<*const Expr>,
}

impl Rewriter for RedundantColumnRemover {
    fn rewrite(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        match expr.kind() {
            ExprKind::Column(c) => Ok(match self.map.get(c) {
                Some(m) => column(m.alias, m.name.clone(), expr.ty().clone()),
                None => expr.clone(),
            }),
            ExprKind::SetOp(s) => {
                // Both sides must keep their columns aligned by position.
                self.keep.insert(ExprRef::as_ptr(&s.left));
                self.keep.insert(ExprRef::as_ptr(&s.right));
                walk(self, expr)
            }
            ExprKind::Select(_) => {
                let protected = self.keep.contains(&ExprRef::as_ptr(expr));
                let out = walk(self, expr)?;
                if protected {
                    return Ok(out);
                }
                let Some(s) = out.as_select() else {
                    return Ok(out);
                };
                let mut kept: Vec<crate::ast::ColumnDecl> = Vec::with_capacity(s.columns.len());
                for d in &s.columns {
                    let duplicate = kept.iter().find(|k| {
                        crate::ast::same(&k.expr, &d.expr)
                            || matches!(
                                (k.expr.as_column(), d.expr.as_column()),
                                (Some(a), Some(b)) if a == b
                            )
                    });
                    match duplicate {
                        Some(k) => {
                            self.map.insert(
                                ColumnExpr {
                                    alias: s.alias,
                                    name: d.name.clone(),
                                },
                                ColumnExpr {
                                    alias: s.alias,
                                    name: k.name.clone(),
                                },
                            );
                        }
                        None => kept.push(d.clone()),
                    }
                }
                if kept.len() == s.columns.len() {
                    return Ok(out);
                }
                Ok(select(SelectExpr {
                    columns: kept,
                    ..s.clone()
                }))
            }
            _ => walk(self, expr),
        }
    }
}

/// Removes columns that repeat another column of the same select.
pub fn remove_redundant_columns(expr: &ExprRef) -> Result<ExprRef> {
    RedundantColumnRemover {
        map: HashMap::new(),
        keep: HashSet::new(),
    }
    .rewrite(expr)
}

fn source_alias(e: &ExprRef) -> Option<TableAlias> {
    match e.kind() {
        ExprKind::Table(t) => Some(t.alias),
        ExprKind::Select(s) => Some(s.alias),
        ExprKind::SetOp(s) => Some(s.alias),
        _ => None,
    }
}

/// Drops a join whose right side and condition repeat an earlier join in
/// the same FROM tree.
struct RedundantJoinRemover {
    map: HashMap<TableAlias, TableAlias>,
}

impl RedundantJoinRemover {
    fn find_similar_right(candidate: &ExprRef, kind: JoinKind, right: &ExprRef, condition: Option<&ExprRef>) -> Option<TableAlias> {
        let ExprKind::Join(j) = candidate.kind() else {
            return None;
        };
        if j.kind == kind && crate::compare::are_equal(&j.right, right) {
            if let (Some(similar), Some(alias)) = (source_alias(&j.right), source_alias(right)) {
                let conditions_match = match (j.condition.as_ref(), condition) {
                    (None, None) => true,
                    (Some(a), Some(b)) => {
                        crate::ast::same(a, b)
                            || Comparer::new().with_alias(similar, alias).compare(a, b)
                    }
                    _ => false,
                };
                if conditions_match {
                    return Some(similar);
                }
            }
        }
        Self::find_similar_right(&j.left, kind, right, condition)
            .or_else(|| Self::find_similar_right(&j.right, kind, right, condition))
    }
}

impl Rewriter for RedundantJoinRemover {
    fn rewrite(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        match expr.kind() {
            ExprKind::Column(c) => Ok(match self.map.get(&c.alias) {
                Some(to) => column(*to, c.name.clone(), expr.ty().clone()),
                None => expr.clone(),
            }),
            ExprKind::Join(_) => {
                let out = walk(self, expr)?;
                let ExprKind::Join(j) = out.kind() else {
                    return Ok(out);
                };
                let Some(alias) = source_alias(&j.right) else {
                    return Ok(out);
                };
                match Self::find_similar_right(&j.left, j.kind, &j.right, j.condition.as_ref()) {
                    Some(similar) => {
                        tracing::trace!(%alias, %similar, "Removed duplicate join");
                        self.map.insert(alias, similar);
                        Ok(j.left.clone())
                    }
                    None => Ok(out),
                }
            }
            _ => walk(self, expr),
        }
    }
}

/// Removes joins that duplicate an earlier join.
pub fn remove_redundant_joins(expr: &ExprRef) -> Result<ExprRef> {
    RedundantJoinRemover {
        map: HashMap::new(),
    }
    .rewrite(expr)
}
