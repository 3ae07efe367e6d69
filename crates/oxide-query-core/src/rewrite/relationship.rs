//! Expands navigation through associations.
//!
//! A singleton association read inside a select becomes an `OUTER APPLY` of
//! the related entity's select onto the current FROM, and the member access
//! reads from the applied side. Collection associations become correlated
//! projections.

use crate::ast::{
    column, lit, outer_joined, projection, select, unique_column_name, ColumnDecl, ExprKind,
    ExprRef, JoinKind, SelectExpr, TableAlias, Type,
};
use crate::dialect::Dialect;
use crate::error::{QueryError, Result};
use crate::mapping::QueryMapper;
use crate::translate::{bind_member, project_columns, Affinity};
use crate::visit::{
    declared_aliases, rewrite_columns, rewrite_list, rewrite_opt, rewrite_orderings, same_columns,
    same_list, same_opt, same_orderings, walk, Rewriter,
};

struct RelationshipBinder<'a> {
    mapper: &'a QueryMapper<'a>,
    dialect: &'a dyn Dialect,
    current_from: Option<ExprRef>,
}

/// Adds an existence column to a projection's select and wraps its
/// projector so that reads through it are null when no row matched.
fn add_outer_join_test(p: &ExprRef) -> Result<(ExprRef, ExprRef)> {
    let proj = p
        .as_projection()
        .ok_or_else(|| QueryError::invalid("association query is not a projection"))?;
    let s = proj
        .select
        .as_select()
        .ok_or_else(|| QueryError::invalid("association projection without select"))?;
    let mut columns = s.columns.clone();
    let test = unique_column_name(&columns, "Test");
    columns.push(ColumnDecl::new(test.clone(), lit(1)));
    let sel = select(SelectExpr {
        columns,
        ..s.clone()
    });
    let projector = outer_joined(column(s.alias, test, Type::Int), proj.projector.clone());
    Ok((sel, projector))
}

impl RelationshipBinder<'_> {
    fn visit_member(&mut self, expr: &ExprRef, object: &ExprRef, member: &str) -> Result<ExprRef> {
        let source = self.rewrite(object)?;
        if let Some(entity) = source.ty().entity_name() {
            let mapping = self.mapper.mapping();
            if mapping.entity(entity)?.find(member)?.is_association() {
                let root = match source.kind() {
                    ExprKind::OuterJoined { expr, .. } => expr.clone(),
                    _ => source.clone(),
                };
                let query = self.mapper.member_expression(&root, entity, member)?;
                let query = self.rewrite(&query)?;
                let many = mapping.is_many(entity, member)?;
                if let (false, Some(from)) = (many, self.current_from.clone()) {
                    let (right, projector) = add_outer_join_test(&query)?;
                    tracing::trace!(entity, member, "Applied singleton association");
                    self.current_from = Some(crate::ast::join(JoinKind::OuterApply, from, right, None));
                    return Ok(projector);
                }
                return Ok(query);
            }
        }
        if crate::ast::same(&source, object) {
            return Ok(expr.clone());
        }
        bind_member(self.mapper.mapping(), &source, member, expr.ty())
    }

    #[allow(clippy::type_complexity)]
    fn select_parts(
        &mut self,
        s: &SelectExpr,
    ) -> Result<(
        Option<ExprRef>,
        Vec<ColumnDecl>,
        Vec<crate::ast::OrderExpr>,
        Vec<ExprRef>,
        Option<ExprRef>,
        Option<ExprRef>,
    )> {
        Ok((
            rewrite_opt(self, s.where_clause.as_ref())?,
            rewrite_columns(self, &s.columns)?,
            rewrite_orderings(self, &s.order_by)?,
            rewrite_list(self, &s.group_by)?,
            rewrite_opt(self, s.skip.as_ref())?,
            rewrite_opt(self, s.take.as_ref())?,
        ))
    }

    fn visit_select(&mut self, expr: &ExprRef, s: &SelectExpr) -> Result<ExprRef> {
        let saved = self.current_from.take();
        let from = rewrite_opt(self, s.from.as_ref());
        let from = match from {
            Ok(f) => f,
            Err(e) => {
                self.current_from = saved;
                return Err(e);
            }
        };
        self.current_from = from.clone();
        let parts = self.select_parts(s);
        let from = std::mem::replace(&mut self.current_from, saved);
        let (where_clause, columns, order_by, group_by, skip, take) = parts?;
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

    fn visit_projection(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let Some(p) = expr.as_projection() else {
            return walk(self, expr);
        };
        let sel = self.rewrite(&p.select)?;
        let saved = self.current_from.replace(sel.clone());
        let projector = self.rewrite(&p.projector);
        let from = std::mem::replace(&mut self.current_from, saved);
        let projector = projector?;
        let Some(from) = from else {
            return Err(QueryError::invalid("projection lost its source"));
        };
        if crate::ast::same(&from, &sel) {
            if crate::ast::same(&sel, &p.select) && crate::ast::same(&projector, &p.projector) {
                return Ok(expr.clone());
            }
            return Ok(projection(sel, projector, p.aggregator));
        }
        // The projector now reads from applied sources; re-project over them.
        let alias = TableAlias::new();
        let existing: Vec<TableAlias> = declared_aliases(&from).into_iter().collect();
        let pc = project_columns(self.dialect, Affinity::Client, &projector, &[], alias, &existing)?;
        let outer = SelectExpr::new(alias, pc.columns, Some(from));
        Ok(projection(select(outer), pc.projector, p.aggregator))
    }
}

impl Rewriter for RelationshipBinder<'_> {
    fn rewrite(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        match expr.kind() {
            ExprKind::Member { object, member } => self.visit_member(expr, object, member),
            ExprKind::Select(s) => self.visit_select(expr, s),
            ExprKind::Projection(_) => self.visit_projection(expr),
            ExprKind::Join(_) => {
                // Join conditions cannot host an apply.
                let saved = self.current_from.take();
                let out = walk(self, expr);
                self.current_from = saved;
                out
            }
            _ => walk(self, expr),
        }
    }
}

/// Replaces navigation through associations with applies and correlated
/// projections.
pub fn bind_relationships(
    mapper: &QueryMapper<'_>,
    dialect: &dyn Dialect,
    expr: &ExprRef,
) -> Result<ExprRef> {
    RelationshipBinder {
        mapper,
        dialect,
        current_from: None,
    }
    .rewrite(expr)
}
