//! Column projection.
//!
//! The nominator marks the sub-expressions that can be computed as columns
//! of a select; the projector then replaces them with references to newly
//! declared columns of a target alias. Whatever is left is client code.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::ast::{
    self, unique_column_name, ColumnDecl, ColumnExpr, Expr, ExprKind, ExprRef, InSource,
    TableAlias,
};
use crate::compare::are_equal;
use crate::dialect::Dialect;
use crate::error::Result;
use crate::value::Value;
use crate::visit::{children, walk, Rewriter};

/// Where computed expressions are evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Affinity {
    /// Only columns, aggregates and subqueries become columns.
    #[default]
    Client,
    /// The largest sub-expressions the dialect can evaluate become columns.
    Server,
}

/// Output of [`project_columns`].
#[derive(Debug, Clone)]
pub struct ProjectedColumns {
    /// The expression rewritten over the new alias.
    pub projector: ExprRef,
    /// Declarations the new select must carry.
    pub columns: Vec<ColumnDecl>,
}

/// Nodes that are only meaningful as columns.
fn must_be_column(expr: &ExprRef) -> bool {
    match expr.kind() {
        ExprKind::Column(_)
        | ExprKind::Aggregate(_)
        | ExprKind::AggregateSubquery(_)
        | ExprKind::Scalar(_)
        | ExprKind::Exists(_)
        | ExprKind::RowNumber { .. } => true,
        ExprKind::In(i) => matches!(i.source, InSource::Select(_)),
        _ => false,
    }
}

/// Scalar composites a server can compute once their operands are columns.
fn can_be_column(dialect: &dyn Dialect, expr: &ExprRef) -> bool {
    if !expr.ty().is_scalar() {
        return false;
    }
    match expr.kind() {
        ExprKind::Constant(v) => matches!(v, Value::Scalar(_)),
        ExprKind::Binary { op, .. } => dialect.supports_operator(*op),
        ExprKind::Call { function, .. } => dialect.supports_function(*function),
        ExprKind::Unary { .. }
        | ExprKind::Conditional { .. }
        | ExprKind::IsNull(_)
        | ExprKind::Between { .. }
        | ExprKind::In(_)
        | ExprKind::NamedValue { .. } => true,
        _ => false,
    }
}

struct Nominator<'d> {
    dialect: &'d dyn Dialect,
    affinity: Affinity,
    candidates: HashSet<*const Expr>,
}

impl Nominator<'_> {
    fn nominate(&mut self, expr: &ExprRef) -> bool {
        if must_be_column(expr) {
            self.candidates.insert(ExprRef::as_ptr(expr));
            return true;
        }
        // Every child is visited so that nested candidates are recorded.
        let mut all = true;
        for c in children(expr) {
            all &= self.nominate(c);
        }
        let eligible = all
            && self.affinity == Affinity::Server
            && can_be_column(self.dialect, expr);
        if eligible {
            self.candidates.insert(ExprRef::as_ptr(expr));
        }
        eligible
    }
}

struct ColumnProjector<'a> {
    candidates: HashSet<*const Expr>,
    existing_aliases: &'a [TableAlias],
    new_alias: TableAlias,
    columns: Vec<ColumnDecl>,
    map: HashMap<ColumnExpr, ExprRef>,
}

impl ColumnProjector<'_> {
    fn next_name(&self) -> String {
        (self.columns.len()..)
            .map(|i| format!("c{i}"))
            .find(|n| self.columns.iter().all(|c| &c.name != n))
            .unwrap_or_else(|| unique_column_name(&self.columns, "c"))
    }

    fn declare(&mut self, name: String, expr: &ExprRef) -> ExprRef {
        self.columns.push(ColumnDecl::new(name.clone(), expr.clone()));
        ast::column(self.new_alias, name, expr.ty().clone())
    }
}

impl Rewriter for ColumnProjector<'_> {
    fn rewrite(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        if !self.candidates.contains(&ExprRef::as_ptr(expr)) {
            return walk(self, expr);
        }
        if let ExprKind::Column(c) = expr.kind() {
            if let Some(mapped) = self.map.get(c) {
                return Ok(mapped.clone());
            }
            if !self.existing_aliases.contains(&c.alias) {
                // Outer reference.
                return Ok(expr.clone());
            }
            let mapped = match self
                .columns
                .iter()
                .find(|d| d.expr.as_column() == Some(c))
            {
                Some(d) => ast::column(self.new_alias, d.name.clone(), expr.ty().clone()),
                None => {
                    let name = unique_column_name(&self.columns, &c.name);
                    self.declare(name, expr)
                }
            };
            self.map.insert(c.clone(), mapped.clone());
            return Ok(mapped);
        }
        if let Some(d) = self.columns.iter().find(|d| are_equal(&d.expr, expr)) {
            return Ok(ast::column(self.new_alias, d.name.clone(), expr.ty().clone()));
        }
        let name = self.next_name();
        Ok(self.declare(name, expr))
    }
}

/// Moves the column-eligible parts of `expr` into declarations of
/// `new_alias`. Columns of `existing_aliases` are re-declared under their
/// own names; other candidates are named `c0`, `c1`, .... Declarations in
/// `existing` are kept and reused.
pub fn project_columns(
    dialect: &dyn Dialect,
    affinity: Affinity,
    expr: &ExprRef,
    existing: &[ColumnDecl],
    new_alias: TableAlias,
    existing_aliases: &[TableAlias],
) -> Result<ProjectedColumns> {
    let mut nominator = Nominator {
        dialect,
        affinity,
        candidates: HashSet::new(),
    };
    nominator.nominate(expr);
    let mut projector = ColumnProjector {
        candidates: nominator.candidates,
        existing_aliases,
        new_alias,
        columns: existing.to_vec(),
        map: HashMap::new(),
    };
    let out = projector.rewrite(expr)?;
    Ok(ProjectedColumns {
        projector: out,
        columns: projector.columns,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{call, column, entity, lit, new_record, ExprExt, Function, Type};
    use crate::dialect::GenericDialect;

    #[test]
    fn test_client_affinity_keeps_composites_on_client() {
        let t = TableAlias::new();
        let s = TableAlias::new();
        let e = column(t, "Price", Type::Float).mul(column(t, "Qty", Type::Int));
        let pc = project_columns(&GenericDialect::new(), Affinity::Client, &e, &[], s, &[t]).unwrap();
        assert_eq!(pc.columns.len(), 2);
        assert_eq!(pc.columns[0].name, "Price");
        assert_eq!(pc.columns[1].name, "Qty");
        assert!(matches!(pc.projector.kind(), ExprKind::Binary { .. }));
    }

    #[test]
    fn test_server_affinity_nominates_maximal_composite() {
        let t = TableAlias::new();
        let s = TableAlias::new();
        let e = new_record(vec![(
            "Upper".into(),
            call(Function::Upper, vec![column(t, "Name", Type::Text)]),
        )]);
        let pc = project_columns(&GenericDialect::new(), Affinity::Server, &e, &[], s, &[t]).unwrap();
        assert_eq!(pc.columns.len(), 1);
        assert_eq!(pc.columns[0].name, "c0");
        let field = crate::visit::record_field(&pc.projector, "Upper").unwrap();
        assert_eq!(field.as_column().unwrap().alias, s);
    }

    #[test]
    fn test_duplicate_columns_are_declared_once() {
        let t = TableAlias::new();
        let s = TableAlias::new();
        let id = column(t, "Id", Type::Int);
        let e = entity(
            "Customer",
            new_record(vec![("Id".into(), id.clone()), ("Key".into(), id)]),
        );
        let pc = project_columns(&GenericDialect::new(), Affinity::Client, &e, &[], s, &[t]).unwrap();
        assert_eq!(pc.columns.len(), 1);
    }

    #[test]
    fn test_outer_references_are_left_alone() {
        let t = TableAlias::new();
        let outer = TableAlias::new();
        let s = TableAlias::new();
        let e = column(outer, "Id", Type::Int);
        let pc = project_columns(&GenericDialect::new(), Affinity::Client, &e, &[], s, &[t]).unwrap();
        assert!(pc.columns.is_empty());
        assert!(ast::same(&pc.projector, &e));
    }

    #[test]
    fn test_name_collisions_get_suffix() {
        let a = TableAlias::new();
        let b = TableAlias::new();
        let s = TableAlias::new();
        let e = new_record(vec![
            ("A".into(), column(a, "Id", Type::Int)),
            ("B".into(), column(b, "Id", Type::Int)),
            ("C".into(), lit(1).add(lit(2))),
        ]);
        let pc = project_columns(&GenericDialect::new(), Affinity::Server, &e, &[], s, &[a, b]).unwrap();
        let names: Vec<&str> = pc.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Id", "Id1", "c2"]);
    }
}
