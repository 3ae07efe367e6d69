//! Rewrite passes over bound relational trees, and the pipeline that runs
//! them in order.
//!
//! Every pass takes an [`ExprRef`] and returns one; a pass that changes
//! nothing returns the input `Arc`, which is how the pipeline decides
//! whether follow-up cleanup is worth running.

mod aggregate;
mod client_join;
mod comparison;
mod joins;
mod offset;
mod order_by;
mod parameterize;
mod redundant;
mod relationship;
mod unused;

pub use aggregate::rewrite_aggregates;
pub use client_join::rewrite_client_joins;
pub use comparison::rewrite_comparisons;
pub use joins::{rewrite_cross_applies, rewrite_cross_joins};
pub use offset::rewrite_offsets;
pub use order_by::rewrite_order_by;
pub use parameterize::parameterize;
pub use redundant::{remove_redundant_columns, remove_redundant_joins, remove_redundant_subqueries};
pub use relationship::bind_relationships;
pub use unused::remove_unused_columns;

use crate::ast::{same, ExprRef};
use crate::dialect::Dialect;
use crate::error::Result;
use crate::mapping::QueryMapper;
use crate::translate::bind;
use crate::visit::check_scopes;

/// Ordered sequence of passes from an algebra tree to a tree the formatter
/// and materializer accept.
pub struct Pipeline<'a> {
    mapper: &'a QueryMapper<'a>,
    dialect: &'a dyn Dialect,
    parameterize: bool,
    client_joins: bool,
    validate_scopes: bool,
}

impl std::fmt::Debug for Pipeline<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("dialect", &self.dialect.name())
            .field("parameterize", &self.parameterize)
            .field("client_joins", &self.client_joins)
            .field("validate_scopes", &self.validate_scopes)
            .finish_non_exhaustive()
    }
}

impl<'a> Pipeline<'a> {
    /// A pipeline with parameterization and client joins enabled.
    #[must_use]
    pub fn new(mapper: &'a QueryMapper<'a>, dialect: &'a dyn Dialect) -> Self {
        Self {
            mapper,
            dialect,
            parameterize: true,
            client_joins: true,
            validate_scopes: false,
        }
    }

    /// Turns literal parameterization on or off.
    #[must_use]
    pub const fn with_parameterization(mut self, enabled: bool) -> Self {
        self.parameterize = enabled;
        self
    }

    /// Turns the client-join rewrite on or off.
    #[must_use]
    pub const fn with_client_joins(mut self, enabled: bool) -> Self {
        self.client_joins = enabled;
        self
    }

    /// Runs the alias scope checker after every pass.
    #[must_use]
    pub const fn with_scope_validation(mut self, enabled: bool) -> Self {
        self.validate_scopes = enabled;
        self
    }

    /// Binds and rewrites `expr`.
    pub fn run(&self, expr: &ExprRef) -> Result<ExprRef> {
        self.run_traced(expr, &mut |_, _| {})
    }

    /// Like [`Pipeline::run`], reporting the tree after every pass.
    pub fn run_traced(
        &self,
        expr: &ExprRef,
        observer: &mut dyn FnMut(&str, &ExprRef),
    ) -> Result<ExprRef> {
        let bound = self.step("bind", expr, observer, |e| bind(self.mapper, self.dialect, e))?;
        let mut e = self.step("aggregates", &bound, observer, rewrite_aggregates)?;
        e = self.step("order-by", &e, observer, rewrite_order_by)?;
        e = self.cleanup(&e, observer)?;

        let related = self.step("relationships", &e, observer, |e| {
            bind_relationships(self.mapper, self.dialect, e)
        })?;
        if !same(&related, &e) {
            e = self.step("redundant-columns", &related, observer, remove_redundant_columns)?;
            e = self.step("redundant-joins", &e, observer, remove_redundant_joins)?;
        } else {
            e = related;
        }

        e = self.step("comparisons", &e, observer, |e| {
            rewrite_comparisons(self.mapper.mapping(), e)
        })?;
        if self.client_joins {
            e = self.step("client-joins", &e, observer, rewrite_client_joins)?;
        }

        let before_joins = e.clone();
        e = self.step("cross-applies", &e, observer, |e| {
            rewrite_cross_applies(self.dialect, e)
        })?;
        e = self.step("cross-joins", &e, observer, rewrite_cross_joins)?;
        if !same(&e, &before_joins) {
            e = self.cleanup(&e, observer)?;
            e = self.step("redundant-columns", &e, observer, remove_redundant_columns)?;
        }

        e = self.step("offsets", &e, observer, |e| {
            rewrite_offsets(self.dialect.offset_strategy(), e)
        })?;
        if self.parameterize {
            e = self.step("parameters", &e, observer, parameterize)?;
        }
        Ok(e)
    }

    fn cleanup<O>(&self, e: &ExprRef, observer: &mut O) -> Result<ExprRef>
    where
        O: FnMut(&str, &ExprRef) + ?Sized,
    {
        let mut e = self.step("unused-columns", e, observer, remove_unused_columns)?;
        e = self.step("redundant-columns", &e, observer, remove_redundant_columns)?;
        e = self.step("redundant-subqueries", &e, observer, remove_redundant_subqueries)?;
        self.step("redundant-joins", &e, observer, remove_redundant_joins)
    }

    fn step<O>(
        &self,
        name: &str,
        input: &ExprRef,
        observer: &mut O,
        pass: impl FnOnce(&ExprRef) -> Result<ExprRef>,
    ) -> Result<ExprRef>
    where
        O: FnMut(&str, &ExprRef) + ?Sized,
    {
        let out = pass(input)?;
        let changed = !same(&out, input);
        tracing::debug!(pass = name, changed, "Rewrite pass finished");
        if self.validate_scopes {
            check_scopes(&out).map_err(|e| {
                tracing::error!(pass = name, error = %e, "Pass produced an out-of-scope reference");
                e
            })?;
        }
        observer(name, &out);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{lit, ExprExt, ExprKind, JoinKind, Query};
    use crate::dialect::{AccessDialect, GenericDialect, OffsetStrategy, TsqlDialect};
    use crate::mapping::tests::northwind;
    use crate::policy::QueryPolicy;
    use crate::visit::contains;

    #[test]
    fn test_pipeline_reports_every_pass() {
        let mapping = northwind();
        let policy = QueryPolicy::new();
        let mapper = QueryMapper::new(&mapping, &policy);
        let dialect = GenericDialect::new();
        let q = Query::from("Customer")
            .filter(|c| c.member("City").eq(lit("Oslo")))
            .into_expr();
        let mut passes = Vec::new();
        Pipeline::new(&mapper, &dialect)
            .with_scope_validation(true)
            .run_traced(&q, &mut |name, _| passes.push(name.to_string()))
            .unwrap();
        assert_eq!(passes.first().map(String::as_str), Some("bind"));
        assert_eq!(passes.last().map(String::as_str), Some("parameters"));
        assert!(passes.iter().any(|p| p == "relationships"));
    }

    #[test]
    fn test_apply_is_lowered_for_dialects_without_it() {
        let mapping = northwind();
        let policy = QueryPolicy::new();
        let mapper = QueryMapper::new(&mapping, &policy);
        let dialect = GenericDialect::new();
        let q = Query::from("Order")
            .filter(|o| o.member("Customer").member("City").eq(lit("Oslo")))
            .into_expr();
        let out = Pipeline::new(&mapper, &dialect)
            .with_scope_validation(true)
            .run(&q)
            .unwrap();
        assert!(!contains(&out, |n| {
            matches!(n.kind(), ExprKind::Join(j) if j.kind.is_apply())
        }));
        assert!(contains(&out, |n| {
            matches!(n.kind(), ExprKind::Join(j) if j.kind == JoinKind::LeftOuter)
        }));
    }

    #[test]
    fn test_paging_uses_row_numbers_on_tsql() {
        let mapping = northwind();
        let policy = QueryPolicy::new();
        let mapper = QueryMapper::new(&mapping, &policy);
        let dialect = TsqlDialect::new();
        let q = Query::from("Customer")
            .order_by(|c| c.member("Name"))
            .skip(10)
            .take(5)
            .into_expr();
        let out = Pipeline::new(&mapper, &dialect)
            .with_scope_validation(true)
            .run(&q)
            .unwrap();
        assert!(contains(&out, |n| matches!(n.kind(), ExprKind::RowNumber { .. })));
        assert!(!contains(&out, |n| n.as_select().is_some_and(|s| s.skip.is_some())));
    }

    #[test]
    fn test_paging_without_native_offsets() {
        let mapping = northwind();
        let policy = QueryPolicy::new();
        let mapper = QueryMapper::new(&mapping, &policy);
        let generic = GenericDialect::new().with_offset_strategy(OffsetStrategy::NestedOrderBy);
        let access = AccessDialect::new();
        let dialects: [&dyn Dialect; 2] = [&generic, &access];
        let paged = Query::from("Customer")
            .order_by(|c| c.member("Name"))
            .skip(10)
            .take(5)
            .into_expr();
        let skipped = Query::from("Customer")
            .order_by(|c| c.member("Name"))
            .skip(10)
            .into_expr();
        for dialect in dialects {
            for q in [&paged, &skipped] {
                let out = Pipeline::new(&mapper, dialect)
                    .with_scope_validation(true)
                    .run(q)
                    .unwrap();
                assert!(contains(&out, |n| matches!(n.kind(), ExprKind::Exists(_))));
                assert!(!contains(&out, |n| n.as_select().is_some_and(|s| s.skip.is_some())));
            }
        }
    }
}
