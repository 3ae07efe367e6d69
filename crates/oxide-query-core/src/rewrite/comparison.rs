//! Lowers equality over structured values to column comparisons.

use crate::ast::{and_all, binary, is_null, lit, not, BinaryOp, ExprExt, ExprKind, ExprRef, Type};
use crate::error::{QueryError, Result};
use crate::mapping::Mapping;
use crate::translate::bind_member;
use crate::visit::{walk, Rewriter};

struct ComparisonRewriter<'a> {
    mapping: &'a dyn Mapping,
}

fn entity_of(a: &ExprRef, b: &ExprRef) -> Option<String> {
    a.ty()
        .entity_name()
        .or_else(|| b.ty().entity_name())
        .map(ToString::to_string)
}

fn record_fields(e: &ExprRef) -> Option<Vec<&str>> {
    match e.kind() {
        ExprKind::New { fields } => Some(fields.iter().map(|(n, _)| n.as_str()).collect()),
        _ => None,
    }
}

impl ComparisonRewriter<'_> {
    fn equality(&self, a: &ExprRef, b: &ExprRef) -> Result<ExprRef> {
        match (a.kind(), b.kind()) {
            (ExprKind::OuterJoined { test, .. }, _) if b.is_null_constant() => {
                return Ok(is_null(test.clone()));
            }
            (_, ExprKind::OuterJoined { test, .. }) if a.is_null_constant() => {
                return Ok(is_null(test.clone()));
            }
            _ => {}
        }
        if let Some(entity) = entity_of(a, b) {
            let def = self.mapping.entity(&entity)?;
            let mut members: Vec<(String, Type)> = def
                .primary_key_members()
                .filter_map(|m| m.column_type().map(|t| (m.name.clone(), t.clone())))
                .collect();
            if members.is_empty() {
                members = def
                    .column_members()
                    .filter_map(|m| m.column_type().map(|t| (m.name.clone(), t.clone())))
                    .collect();
            }
            let mut parts = Vec::with_capacity(members.len());
            for (name, ty) in &members {
                let l = bind_member(self.mapping, a, name, ty)?;
                let r = bind_member(self.mapping, b, name, ty)?;
                parts.push(l.eq(r));
            }
            return Ok(and_all(parts).unwrap_or_else(|| lit(true)));
        }
        if let (Some(fa), Some(fb)) = (record_fields(a), record_fields(b)) {
            let mut sa = fa.clone();
            let mut sb = fb;
            sa.sort_unstable();
            sb.sort_unstable();
            if sa != sb {
                return Err(QueryError::unsupported(
                    "comparison of records with different members",
                ));
            }
            let mut parts = Vec::with_capacity(fa.len());
            for name in fa {
                let l = bind_member(self.mapping, a, name, &Type::Unknown)?;
                let r = bind_member(self.mapping, b, name, &Type::Unknown)?;
                parts.push(self.compare(BinaryOp::Eq, &l, &r)?);
            }
            return Ok(and_all(parts).unwrap_or_else(|| lit(true)));
        }
        Ok(a.eq(b.clone()))
    }

    fn is_structured(e: &ExprRef) -> bool {
        e.ty().is_structured()
            || matches!(e.kind(), ExprKind::OuterJoined { .. } | ExprKind::New { .. })
    }

    fn compare(&self, op: BinaryOp, a: &ExprRef, b: &ExprRef) -> Result<ExprRef> {
        if !(Self::is_structured(a) || Self::is_structured(b)) {
            return Ok(binary(op, a.clone(), b.clone()));
        }
        let eq = self.equality(a, b)?;
        Ok(if op == BinaryOp::NotEq { not(eq) } else { eq })
    }
}

impl Rewriter for ComparisonRewriter<'_> {
    fn rewrite(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let out = walk(self, expr)?;
        if let ExprKind::Binary {
            op: op @ (BinaryOp::Eq | BinaryOp::NotEq),
            left,
            right,
        } = out.kind()
        {
            if Self::is_structured(left) || Self::is_structured(right) {
                return self.compare(*op, left, right);
            }
        }
        Ok(out)
    }
}

/// Rewrites `=` and `<>` between entities, records and outer-joined values
/// into comparisons of their columns. Entities compare by primary key, or
/// by every column when they have none.
pub fn rewrite_comparisons(mapping: &dyn Mapping, expr: &ExprRef) -> Result<ExprRef> {
    ComparisonRewriter { mapping }.rewrite(expr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{column, entity, new_record, null, outer_joined, TableAlias};
    use crate::mapping::tests::northwind;

    fn customer(alias: TableAlias) -> ExprRef {
        entity(
            "Customer",
            new_record(vec![
                ("Id".into(), column(alias, "Id", Type::Int)),
                ("Name".into(), column(alias, "Name", Type::Text)),
                ("City".into(), column(alias, "City", Type::Text)),
            ]),
        )
    }

    #[test]
    fn test_entities_compare_by_primary_key() {
        let mapping = northwind();
        let a = TableAlias::new();
        let b = TableAlias::new();
        let e = customer(a).eq(customer(b));
        let out = rewrite_comparisons(&mapping, &e).unwrap();
        assert!(crate::compare::are_equal(
            &out,
            &column(a, "Id", Type::Int).eq(column(b, "Id", Type::Int))
        ));
    }

    #[test]
    fn test_entity_inequality_is_negated() {
        let mapping = northwind();
        let a = TableAlias::new();
        let b = TableAlias::new();
        let e = customer(a).ne(customer(b));
        let out = rewrite_comparisons(&mapping, &e).unwrap();
        assert!(matches!(out.kind(), ExprKind::Unary { .. }));
    }

    #[test]
    fn test_outer_joined_against_null_tests_existence() {
        let mapping = northwind();
        let a = TableAlias::new();
        let test = column(a, "Test", Type::Int);
        let e = outer_joined(test.clone(), customer(a)).eq(null(Type::Unknown));
        let out = rewrite_comparisons(&mapping, &e).unwrap();
        assert!(crate::compare::are_equal(&out, &is_null(test)));
    }

    #[test]
    fn test_records_with_different_members_fail() {
        let mapping = northwind();
        let a = new_record(vec![("x".into(), lit(1))]);
        let b = new_record(vec![("y".into(), lit(1))]);
        let err = rewrite_comparisons(&mapping, &a.eq(b)).unwrap_err();
        assert!(matches!(err, QueryError::Unsupported { .. }));
    }

    #[test]
    fn test_records_compare_field_wise() {
        let mapping = northwind();
        let t = TableAlias::new();
        let a = new_record(vec![
            ("x".into(), column(t, "x", Type::Int)),
            ("y".into(), column(t, "y", Type::Int)),
        ]);
        let b = new_record(vec![("y".into(), lit(2)), ("x".into(), lit(1))]);
        let out = rewrite_comparisons(&mapping, &a.eq(b)).unwrap();
        let expected = column(t, "x", Type::Int)
            .eq(lit(1))
            .and(column(t, "y", Type::Int).eq(lit(2)));
        assert!(crate::compare::are_equal(&out, &expected));
    }
}
