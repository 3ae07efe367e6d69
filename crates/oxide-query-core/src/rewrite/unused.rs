//! Drops select columns that nothing reads.
//!
//! Users are visited before the sources they read from: a projection's
//! projector before its select, a select's clauses before its FROM, the
//! right side of a join before the left.

use std::collections::{HashMap, HashSet};

use crate::ast::{
    join, projection, same, select, AggregateKind, ClientJoinExpr, ColumnDecl, Expr, ExprKind,
    ExprRef, InSource, SelectExpr, TableAlias,
};
use crate::error::Result;
use crate::visit::{
    rewrite_list, rewrite_opt, rewrite_orderings, same_list, same_opt, same_orderings, walk,
    Rewriter,
};

#[derive(Default)]
struct UnusedColumnRemover {
    used: HashMap<TableAlias, HashSet<String>>,
    retain_all: bool,
}

impl UnusedColumnRemover {
    fn mark(&mut self, alias: TableAlias, name: &str) {
        self.used.entry(alias).or_default().insert(name.to_string());
    }

    fn is_used(&self, alias: TableAlias, name: &str) -> bool {
        self.used.get(&alias).is_some_and(|u| u.contains(name))
    }

    fn mark_single_column(&mut self, sub: &ExprRef) {
        if let Some(s) = sub.as_select() {
            if let Some(first) = s.columns.first() {
                let name = first.name.clone();
                self.mark(s.alias, &name);
            }
        }
    }

    fn visit_select(&mut self, expr: &ExprRef, s: &SelectExpr) -> Result<ExprRef> {
        let was_retained = self.retain_all;
        self.retain_all = false;
        let mut columns: Vec<ColumnDecl> = Vec::with_capacity(s.columns.len());
        let mut changed = false;
        for d in &s.columns {
            if was_retained || s.distinct || self.is_used(s.alias, &d.name) {
                let e = self.rewrite(&d.expr)?;
                if same(&e, &d.expr) {
                    columns.push(d.clone());
                } else {
                    changed = true;
                    columns.push(ColumnDecl {
                        name: d.name.clone(),
                        ty: d.ty.clone(),
                        expr: e,
                    });
                }
            } else {
                changed = true;
            }
        }
        let take = rewrite_opt(self, s.take.as_ref())?;
        let skip = rewrite_opt(self, s.skip.as_ref())?;
        let group_by = rewrite_list(self, &s.group_by)?;
        let order_by = rewrite_orderings(self, &s.order_by)?;
        let where_clause = rewrite_opt(self, s.where_clause.as_ref())?;
        let from = rewrite_opt(self, s.from.as_ref())?;
        self.used.remove(&s.alias);
        self.retain_all = was_retained;
        if !changed
            && same_opt(take.as_ref(), s.take.as_ref())
            && same_opt(skip.as_ref(), s.skip.as_ref())
            && same_list(&group_by, &s.group_by)
            && same_orderings(&order_by, &s.order_by)
            && same_opt(where_clause.as_ref(), s.where_clause.as_ref())
            && same_opt(from.as_ref(), s.from.as_ref())
        {
            return Ok(expr.clone());
        }
        Ok(select(SelectExpr {
            alias: s.alias,
            columns,
            from,
            where_clause,
            order_by,
            group_by,
            skip,
            take,
            ..s.clone()
        }))
    }

    fn retained(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let saved = std::mem::replace(&mut self.retain_all, true);
        let out = self.rewrite(expr);
        self.retain_all = saved;
        out
    }
}

impl Rewriter for UnusedColumnRemover {
    fn rewrite(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        match expr.kind() {
            ExprKind::Column(c) => {
                let name = c.name.clone();
                self.mark(c.alias, &name);
                Ok(expr.clone())
            }
            ExprKind::Select(s) => self.visit_select(expr, s),
            ExprKind::Scalar(sub) => {
                self.mark_single_column(sub);
                walk(self, expr)
            }
            ExprKind::In(i) => {
                if let InSource::Select(sub) = &i.source {
                    self.mark_single_column(sub);
                }
                walk(self, expr)
            }
            ExprKind::Aggregate(a) => {
                if a.kind == AggregateKind::Count && a.argument.is_none() {
                    self.retain_all = true;
                }
                walk(self, expr)
            }
            ExprKind::SetOp(s) => {
                let left = self.retained(&s.left)?;
                let right = self.retained(&s.right)?;
                if same(&left, &s.left) && same(&right, &s.right) {
                    return Ok(expr.clone());
                }
                Ok(crate::ast::set_operation(s.alias, s.kind, left, right))
            }
            ExprKind::Projection(p) => {
                let projector = self.rewrite(&p.projector)?;
                let sel = self.rewrite(&p.select)?;
                if same(&projector, &p.projector) && same(&sel, &p.select) {
                    return Ok(expr.clone());
                }
                Ok(projection(sel, projector, p.aggregator))
            }
            ExprKind::ClientJoin(c) => {
                let inner_key = rewrite_list(self, &c.inner_key)?;
                let outer_key = rewrite_list(self, &c.outer_key)?;
                let proj = self.rewrite(&c.projection)?;
                if same(&proj, &c.projection)
                    && same_list(&inner_key, &c.inner_key)
                    && same_list(&outer_key, &c.outer_key)
                {
                    return Ok(expr.clone());
                }
                Ok(Expr::new(
                    ExprKind::ClientJoin(ClientJoinExpr {
                        projection: proj,
                        outer_key,
                        inner_key,
                    }),
                    expr.ty().clone(),
                ))
            }
            ExprKind::Join(j) => {
                let condition = rewrite_opt(self, j.condition.as_ref())?;
                let right = self.rewrite(&j.right)?;
                let left = self.rewrite(&j.left)?;
                if same(&left, &j.left)
                    && same(&right, &j.right)
                    && same_opt(condition.as_ref(), j.condition.as_ref())
                {
                    return Ok(expr.clone());
                }
                Ok(join(j.kind, left, right, condition))
            }
            ExprKind::Declaration { variables, source } => {
                let mut values = Vec::with_capacity(variables.len());
                for v in variables {
                    values.push(self.rewrite(&v.value)?);
                }
                let src = self.rewrite(source)?;
                if same(&src, source) && values.iter().zip(variables).all(|(n, v)| same(n, &v.value))
                {
                    return Ok(expr.clone());
                }
                let variables = variables
                    .iter()
                    .zip(values)
                    .map(|(v, value)| crate::ast::VariableDecl {
                        name: v.name.clone(),
                        ty: v.ty.clone(),
                        value,
                    })
                    .collect();
                Ok(crate::ast::declaration(variables, src))
            }
            _ => walk(self, expr),
        }
    }
}

/// Removes columns no enclosing expression reads. A select at the root of
/// `expr` keeps all its columns.
pub fn remove_unused_columns(expr: &ExprRef) -> Result<ExprRef> {
    let mut r = UnusedColumnRemover {
        retain_all: expr.as_select().is_some(),
        ..UnusedColumnRemover::default()
    };
    r.rewrite(expr)
}
