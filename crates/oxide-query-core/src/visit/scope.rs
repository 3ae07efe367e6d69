//! Alias scope validation: every column must name an alias declared by an
//! enclosing source.

use super::gather::{children, declared_aliases};
use crate::ast::{ExprKind, ExprRef, TableAlias};
use crate::error::{QueryError, Result};

/// Fails on the first column whose alias is not in scope.
pub fn check_scopes(expr: &ExprRef) -> Result<()> {
    check(expr, &mut Vec::new())
}

fn declared_by(expr: &ExprRef) -> Vec<TableAlias> {
    declared_aliases(expr).into_iter().collect()
}

fn check_source(source: &ExprRef, scope: &mut Vec<TableAlias>) -> Result<()> {
    match source.kind() {
        ExprKind::Table(_) => Ok(()),
        ExprKind::Join(j) => {
            let n = scope.len();
            check_source(&j.left, scope)?;
            scope.extend(declared_by(&j.left));
            check_source(&j.right, scope)?;
            scope.extend(declared_by(&j.right));
            if let Some(c) = &j.condition {
                check(c, scope)?;
            }
            scope.truncate(n);
            Ok(())
        }
        _ => check(source, scope),
    }
}

fn check(expr: &ExprRef, scope: &mut Vec<TableAlias>) -> Result<()> {
    match expr.kind() {
        ExprKind::Column(c) => {
            if scope.contains(&c.alias) {
                Ok(())
            } else {
                Err(QueryError::invalid(format!(
                    "column {}.{} references an alias that is not in scope",
                    c.alias, c.name
                )))
            }
        }
        ExprKind::Select(s) => {
            let n = scope.len();
            if let Some(from) = &s.from {
                check_source(from, scope)?;
                scope.extend(declared_by(from));
            }
            let mut parts: Vec<&ExprRef> = Vec::new();
            parts.extend(s.where_clause.as_ref());
            parts.extend(s.columns.iter().map(|c| &c.expr));
            parts.extend(s.order_by.iter().map(|o| &o.expr));
            parts.extend(s.group_by.iter());
            parts.extend(s.skip.as_ref());
            parts.extend(s.take.as_ref());
            for p in parts {
                check(p, scope)?;
            }
            scope.truncate(n);
            Ok(())
        }
        ExprKind::Join(_) => check_source(expr, scope),
        ExprKind::Projection(p) => {
            check(&p.select, scope)?;
            with_aliases(scope, declared_by(&p.select), |scope| {
                check(&p.projector, scope)
            })
        }
        ExprKind::AggregateSubquery(a) => check(&a.subquery, scope),
        ExprKind::ClientJoin(c) => {
            check(&c.projection, scope)?;
            for k in &c.outer_key {
                check(k, scope)?;
            }
            let inner = c
                .projection
                .as_projection()
                .map(|p| declared_by(&p.select))
                .unwrap_or_default();
            with_aliases(scope, inner, |scope| {
                c.inner_key.iter().try_for_each(|k| check(k, scope))
            })
        }
        ExprKind::Insert { table, .. }
        | ExprKind::Update { table, .. }
        | ExprKind::Delete { table, .. } => {
            let declared = declared_by(table);
            with_aliases(scope, declared, |scope| {
                children(expr)
                    .into_iter()
                    .skip(1)
                    .try_for_each(|c| check(c, scope))
            })
        }
        ExprKind::Declaration { variables, source } => {
            check(source, scope)?;
            with_aliases(scope, declared_by(source), |scope| {
                variables.iter().try_for_each(|v| check(&v.value, scope))
            })
        }
        _ => children(expr).into_iter().try_for_each(|c| check(c, scope)),
    }
}

fn with_aliases(
    scope: &mut Vec<TableAlias>,
    aliases: Vec<TableAlias>,
    f: impl FnOnce(&mut Vec<TableAlias>) -> Result<()>,
) -> Result<()> {
    let n = scope.len();
    scope.extend(aliases);
    let r = f(scope);
    scope.truncate(n);
    r
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{column, lit, projection, select, table, ColumnDecl, ExprExt, SelectExpr, Type};

    #[test]
    fn test_valid_projection_passes() {
        let t = TableAlias::new();
        let s = TableAlias::new();
        let sel = select(SelectExpr::new(
            s,
            vec![ColumnDecl::new("Id", column(t, "Id", Type::Int))],
            Some(table(t, None, "T")),
        ));
        let p = projection(sel, column(s, "Id", Type::Int), None);
        assert!(check_scopes(&p).is_ok());
    }

    #[test]
    fn test_dangling_alias_fails() {
        let t = TableAlias::new();
        let stranger = TableAlias::new();
        let mut s = SelectExpr::new(
            TableAlias::new(),
            vec![ColumnDecl::new("Id", column(t, "Id", Type::Int))],
            Some(table(t, None, "T")),
        );
        s.where_clause = Some(column(stranger, "x", Type::Int).eq(lit(1)));
        assert!(check_scopes(&select(s)).is_err());
    }
}
