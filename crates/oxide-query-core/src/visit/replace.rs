//! Substitution rewriters.

use std::collections::{HashMap, HashSet};

use super::gather::visit_all;
use super::{walk, Rewriter};
use crate::ast::{self, Expr, ExprKind, ExprRef, SelectExpr, SetOpExpr, TableAlias, TableExpr};
use crate::error::Result;

struct Replacer<F> {
    f: F,
}

impl<F: FnMut(&ExprRef) -> Option<ExprRef>> Rewriter for Replacer<F> {
    fn rewrite(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        if let Some(r) = (self.f)(expr) {
            return Ok(r);
        }
        walk(self, expr)
    }
}

/// Replaces every node for which `f` returns a replacement. Replacements
/// are not visited again.
pub fn replace_nodes(
    expr: &ExprRef,
    f: impl FnMut(&ExprRef) -> Option<ExprRef>,
) -> Result<ExprRef> {
    Replacer { f }.rewrite(expr)
}

/// Replaces references to lambda parameters by id.
pub fn substitute_params(expr: &ExprRef, map: &HashMap<u64, ExprRef>) -> Result<ExprRef> {
    if map.is_empty() {
        return Ok(expr.clone());
    }
    replace_nodes(expr, |e| match e.kind() {
        ExprKind::Parameter(p) => map.get(&p.id).cloned(),
        _ => None,
    })
}

/// Re-points columns of a set of aliases at another alias.
#[derive(Debug, Clone)]
pub struct ColumnMapper {
    from: HashSet<TableAlias>,
    to: TableAlias,
}

impl ColumnMapper {
    /// Maps columns of any alias in `from` onto `to`.
    #[must_use]
    pub const fn new(from: HashSet<TableAlias>, to: TableAlias) -> Self {
        Self { from, to }
    }

    /// Applies the mapping to a tree.
    pub fn map(from: HashSet<TableAlias>, to: TableAlias, expr: &ExprRef) -> Result<ExprRef> {
        Self::new(from, to).rewrite(expr)
    }
}

impl Rewriter for ColumnMapper {
    fn rewrite(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        if let ExprKind::Column(c) = expr.kind() {
            if self.from.contains(&c.alias) {
                return Ok(ast::column(self.to, c.name.clone(), expr.ty().clone()));
            }
            return Ok(expr.clone());
        }
        walk(self, expr)
    }
}

/// Gives every source declared inside a tree a fresh alias.
struct AliasRefresher {
    map: HashMap<TableAlias, TableAlias>,
}

impl AliasRefresher {
    fn alias(&self, alias: TableAlias) -> TableAlias {
        self.map.get(&alias).copied().unwrap_or(alias)
    }
}

impl Rewriter for AliasRefresher {
    fn rewrite(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        match expr.kind() {
            ExprKind::Column(c) => Ok(ast::column(
                self.alias(c.alias),
                c.name.clone(),
                expr.ty().clone(),
            )),
            ExprKind::Table(t) => Ok(Expr::new(
                ExprKind::Table(TableExpr {
                    alias: self.alias(t.alias),
                    ..t.clone()
                }),
                expr.ty().clone(),
            )),
            _ => {
                let walked = walk(self, expr)?;
                match walked.kind() {
                    ExprKind::Select(s) => Ok(ast::select(SelectExpr {
                        alias: self.alias(s.alias),
                        ..s.clone()
                    })),
                    ExprKind::SetOp(s) => Ok(Expr::new(
                        ExprKind::SetOp(SetOpExpr {
                            alias: self.alias(s.alias),
                            ..s.clone()
                        }),
                        walked.ty().clone(),
                    )),
                    _ => Ok(walked),
                }
            }
        }
    }
}

/// A copy of `expr` in which every table, select and set operation declared
/// inside it has a new alias. References to aliases declared outside the
/// tree are kept, so a correlated copy stays correlated.
pub fn refresh_aliases(expr: &ExprRef) -> Result<ExprRef> {
    let mut map = HashMap::new();
    visit_all(expr, &mut |e| {
        let declared = match e.kind() {
            ExprKind::Table(t) => t.alias,
            ExprKind::Select(s) => s.alias,
            ExprKind::SetOp(s) => s.alias,
            _ => return,
        };
        map.insert(declared, TableAlias::new());
    });
    AliasRefresher { map }.rewrite(expr)
}

/// Reads a field of a record construction, looking through entity nodes.
#[must_use]
pub fn record_field(expr: &ExprRef, name: &str) -> Option<ExprRef> {
    match expr.kind() {
        ExprKind::Entity { expr, .. } => record_field(expr, name),
        ExprKind::New { fields } => fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, e)| e.clone()),
        _ => None,
    }
}

struct MemberFolder;

impl Rewriter for MemberFolder {
    fn rewrite(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let expr = walk(self, expr)?;
        if let ExprKind::Member { object, member } = expr.kind() {
            if let Some(field) = record_field(object, member) {
                return Ok(field);
            }
        }
        Ok(expr)
    }
}

/// Replaces member accesses on record constructions with the field
/// initializer, bottom-up.
pub fn fold_members(expr: &ExprRef) -> Result<ExprRef> {
    MemberFolder.rewrite(expr)
}
