//! Turns literals the server evaluates into named parameters.

use crate::ast::{
    named_value, projection, same, select, ClientJoinExpr, Expr, ExprKind, ExprRef, SelectExpr,
    Type,
};
use crate::error::Result;
use crate::value::{SqlValue, Value};
use crate::visit::{
    rewrite_columns, rewrite_list, rewrite_opt, rewrite_orderings, same_columns, same_list,
    same_opt, same_orderings, walk, Rewriter,
};

#[derive(Default)]
struct Parameterizer {
    issued: Vec<(SqlValue, Type, String)>,
}

/// Numbers and booleans stay inline; they cannot carry injected text and
/// the server plans better around them.
const fn is_lifted(v: &SqlValue) -> bool {
    matches!(
        v,
        SqlValue::Text(_) | SqlValue::Blob(_) | SqlValue::DateTime(_)
    )
}

impl Parameterizer {
    fn name_for(&mut self, v: &SqlValue, ty: &Type) -> String {
        if let Some((_, _, name)) = self.issued.iter().find(|(x, t, _)| x == v && t == ty) {
            return name.clone();
        }
        let name = format!("p{}", self.issued.len());
        self.issued.push((v.clone(), ty.clone(), name.clone()));
        name
    }

    /// Skip and take stay literal so that every dialect can write them.
    fn visit_select(&mut self, expr: &ExprRef, s: &SelectExpr) -> Result<ExprRef> {
        let from = rewrite_opt(self, s.from.as_ref())?;
        let where_clause = rewrite_opt(self, s.where_clause.as_ref())?;
        let columns = rewrite_columns(self, &s.columns)?;
        let order_by = rewrite_orderings(self, &s.order_by)?;
        let group_by = rewrite_list(self, &s.group_by)?;
        if same_opt(from.as_ref(), s.from.as_ref())
            && same_opt(where_clause.as_ref(), s.where_clause.as_ref())
            && same_columns(&columns, &s.columns)
            && same_orderings(&order_by, &s.order_by)
            && same_list(&group_by, &s.group_by)
        {
            return Ok(expr.clone());
        }
        Ok(select(SelectExpr {
            columns,
            from,
            where_clause,
            order_by,
            group_by,
            ..s.clone()
        }))
    }
}

impl Rewriter for Parameterizer {
    fn rewrite(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        match expr.kind() {
            ExprKind::Constant(Value::Scalar(v)) if is_lifted(v) => {
                let name = self.name_for(v, expr.ty());
                Ok(named_value(name, expr.clone()))
            }
            ExprKind::NamedValue { .. } => Ok(expr.clone()),
            ExprKind::Select(s) => self.visit_select(expr, s),
            // Projectors run on the client.
            ExprKind::Projection(p) => {
                let sel = self.rewrite(&p.select)?;
                if same(&sel, &p.select) {
                    return Ok(expr.clone());
                }
                Ok(projection(sel, p.projector.clone(), p.aggregator))
            }
            ExprKind::ClientJoin(c) => {
                let proj = self.rewrite(&c.projection)?;
                if same(&proj, &c.projection) {
                    return Ok(expr.clone());
                }
                Ok(Expr::new(
                    ExprKind::ClientJoin(ClientJoinExpr {
                        projection: proj,
                        ..c.clone()
                    }),
                    expr.ty().clone(),
                ))
            }
            _ => walk(self, expr),
        }
    }
}

/// Replaces text, blob and timestamp literals in server-evaluated positions
/// with named parameters `p0`, `p1`, ... Equal literals share a name.
pub fn parameterize(expr: &ExprRef) -> Result<ExprRef> {
    Parameterizer::default().rewrite(expr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{column, lit, table, ColumnDecl, ExprExt, TableAlias};
    use crate::visit::contains;

    fn names(e: &ExprRef) -> Vec<String> {
        let mut out = Vec::new();
        let _ = crate::visit::replace_nodes(e, |n| {
            if let ExprKind::NamedValue { name, .. } = n.kind() {
                out.push(name.clone());
            }
            None
        });
        out
    }

    fn customers(where_clause: ExprRef, t: TableAlias) -> SelectExpr {
        let mut s = SelectExpr::new(
            TableAlias::new(),
            vec![ColumnDecl::new("Id", column(t, "Id", Type::Int))],
            Some(table(t, Some("Customer".into()), "Customers")),
        );
        s.where_clause = Some(where_clause);
        s
    }

    #[test]
    fn test_equal_literals_share_a_parameter() {
        let t = TableAlias::new();
        let w = column(t, "City", Type::Text)
            .eq(lit("Oslo"))
            .or(column(t, "Name", Type::Text).eq(lit("Oslo")))
            .or(column(t, "Name", Type::Text).eq(lit("Bergen")));
        let out = parameterize(&select(customers(w, t))).unwrap();
        let mut n = names(&out);
        n.sort();
        n.dedup();
        assert_eq!(n, vec!["p0", "p1"]);
    }

    #[test]
    fn test_numbers_and_paging_stay_inline() {
        let t = TableAlias::new();
        let mut s = customers(column(t, "Id", Type::Int).gt(lit(3)), t);
        s.take = Some(lit(10));
        let tree = select(s);
        let out = parameterize(&tree).unwrap();
        assert!(crate::ast::same(&out, &tree));
    }

    #[test]
    fn test_projector_literals_are_not_parameters() {
        let t = TableAlias::new();
        let s = customers(column(t, "Id", Type::Int).gt(lit(3)), t);
        let alias = s.alias;
        let projector = crate::ast::new_record(vec![
            ("Id".into(), column(alias, "Id", Type::Int)),
            ("Tag".into(), lit("client")),
        ]);
        let tree = projection(select(s), projector, None);
        let out = parameterize(&tree).unwrap();
        assert!(!contains(&out, |n| matches!(n.kind(), ExprKind::NamedValue { .. })));
    }
}
