//! From algebra tree to execution plan.
//!
//! [`Translator`] binds a tree against a mapping, runs the rewrite
//! pipeline, formats SQL for the dialect and builds the readers that turn
//! rows back into values. With a [`PlanCache`] attached, literals are lifted
//! first so that queries differing only in literals reuse one plan.

mod binder;
mod projector;

use std::collections::HashMap;
use std::sync::Arc;

pub(crate) use binder::bind_member;
pub use binder::{bind, QueryBinder};
pub use projector::{project_columns, Affinity, ProjectedColumns};

use crate::ast::{ExprRef, TreePrinter};
use crate::cache::{lift_constants, PlanCache};
use crate::command::QueryCommand;
use crate::config::TranslatorConfig;
use crate::dialect::Dialect;
use crate::error::Result;
use crate::mapping::{Mapping, QueryMapper};
use crate::materialize::{plan_execution, ExecutionPlan};
use crate::policy::QueryPolicy;
use crate::rewrite::Pipeline;
use crate::value::SqlValue;

/// A plan plus the literal values it runs with.
#[derive(Debug, Clone)]
pub struct Translation {
    /// Shared plan.
    pub plan: Arc<ExecutionPlan>,
    /// Values for lifted literals; empty without a plan cache.
    pub parameters: HashMap<String, SqlValue>,
}

impl Translation {
    /// Every command of the plan with this translation's values bound.
    #[must_use]
    pub fn commands(&self) -> Vec<QueryCommand> {
        self.plan
            .commands()
            .into_iter()
            .map(|c| c.rebind(&self.parameters))
            .collect()
    }
}

/// Translates trees for one mapping and dialect.
pub struct Translator<'a> {
    mapping: &'a dyn Mapping,
    dialect: &'a dyn Dialect,
    config: &'a TranslatorConfig,
    policy: Option<&'a QueryPolicy>,
    cache: Option<&'a PlanCache>,
}

impl std::fmt::Debug for Translator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Translator")
            .field("dialect", &self.dialect.name())
            .field("config", self.config)
            .field("cached", &self.cache.is_some())
            .finish_non_exhaustive()
    }
}

impl<'a> Translator<'a> {
    /// A translator without eager loading or caching.
    #[must_use]
    pub fn new(
        mapping: &'a dyn Mapping,
        dialect: &'a dyn Dialect,
        config: &'a TranslatorConfig,
    ) -> Self {
        Self {
            mapping,
            dialect,
            config,
            policy: None,
            cache: None,
        }
    }

    /// Uses `policy` for eager loading.
    #[must_use]
    pub const fn with_policy(mut self, policy: &'a QueryPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Looks plans up in `cache`.
    #[must_use]
    pub const fn with_cache(mut self, cache: &'a PlanCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Translates a query or command tree.
    pub fn translate(&self, expr: &ExprRef) -> Result<Translation> {
        let Some(cache) = self.cache.filter(|_| self.config.enable_plan_cache) else {
            return Ok(Translation {
                plan: self.plan(expr)?,
                parameters: HashMap::new(),
            });
        };
        let lifted = lift_constants(expr)?;
        let version = cache.version()?;
        if let Some(plan) = cache.get(&lifted.key)? {
            tracing::debug!(parameters = lifted.values.len(), "Plan cache hit");
            return Ok(Translation {
                plan,
                parameters: lifted.values,
            });
        }
        let plan = self.plan(&lifted.tree)?;
        cache.insert(lifted.key, plan.clone(), version)?;
        Ok(Translation {
            plan,
            parameters: lifted.values,
        })
    }

    /// The rewritten tree after every pipeline pass, rendered.
    pub fn explain(&self, expr: &ExprRef) -> Result<Vec<(String, String)>> {
        let mut passes = Vec::new();
        self.rewrite(expr, &mut |name, tree| {
            passes.push((name.to_string(), TreePrinter::new().print(tree)));
        })?;
        Ok(passes)
    }

    /// Binds and rewrites without formatting.
    pub fn rewrite(
        &self,
        expr: &ExprRef,
        observer: &mut dyn FnMut(&str, &ExprRef),
    ) -> Result<ExprRef> {
        let default_policy = QueryPolicy::new();
        let policy = self.policy.unwrap_or(&default_policy);
        let mapper = QueryMapper::new(self.mapping, policy);
        Pipeline::new(&mapper, self.dialect)
            .with_parameterization(self.config.parameterize_constants)
            .with_client_joins(self.config.client_joins)
            .with_scope_validation(self.config.validate_scopes)
            .run_traced(expr, observer)
    }

    fn plan(&self, expr: &ExprRef) -> Result<Arc<ExecutionPlan>> {
        let rewritten = self.rewrite(expr, &mut |_, _| {})?;
        let plan = plan_execution(self.mapping, self.dialect, &rewritten)?;
        for command in plan.commands() {
            tracing::debug!(
                dialect = self.dialect.name(),
                sql = %command.text,
                parameters = command.parameters.len(),
                "Translated query"
            );
        }
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{lit, ExprExt, Query};
    use crate::dialect::{GenericDialect, TsqlDialect};
    use crate::mapping::tests::northwind;

    fn by_city(city: &str) -> ExprRef {
        Query::from("Customer")
            .filter(|c| c.member("City").eq(lit(city)))
            .into_expr()
    }

    #[test]
    fn test_translate_formats_entity_query() {
        let mapping = northwind();
        let dialect = GenericDialect::new();
        let config = TranslatorConfig::default();
        let t = Translator::new(&mapping, &dialect, &config)
            .translate(&by_city("Oslo"))
            .unwrap();
        let commands = t.commands();
        assert_eq!(commands.len(), 1);
        assert!(commands[0].text.starts_with("SELECT t0.\"Id\""));
        assert!(commands[0].text.contains("\nFROM \"Customers\" AS t0\n"));
        assert!(commands[0].text.ends_with("WHERE t0.\"City\" = @p0"));
        assert_eq!(commands[0].values(), vec![SqlValue::Text("Oslo".into())]);
    }

    #[test]
    fn test_cached_plans_rebind_literals() {
        let mapping = northwind();
        let dialect = TsqlDialect::new();
        let config = TranslatorConfig::default().plan_cache(4);
        let cache = PlanCache::new(config.plan_cache_capacity);
        let translator = Translator::new(&mapping, &dialect, &config).with_cache(&cache);
        let first = translator.translate(&by_city("Oslo")).unwrap();
        let second = translator.translate(&by_city("Bergen")).unwrap();
        assert!(Arc::ptr_eq(&first.plan, &second.plan));
        assert_eq!(cache.len().unwrap(), 1);
        assert_eq!(
            second.commands()[0].values(),
            vec![SqlValue::Text("Bergen".into())]
        );
        assert!(second.commands()[0].text.contains("@c0"));
    }

    #[test]
    fn test_explain_lists_passes() {
        let mapping = northwind();
        let dialect = GenericDialect::new();
        let config = TranslatorConfig::default();
        let passes = Translator::new(&mapping, &dialect, &config)
            .explain(&by_city("Oslo"))
            .unwrap();
        assert_eq!(passes[0].0, "bind");
        assert!(passes.iter().all(|(_, tree)| !tree.is_empty()));
    }
}
