//! Most-recently-used cache of execution plans.
//!
//! Queries that differ only in their literals share a plan: before lookup,
//! literals are lifted into named values `c0`, `c1`, ... and the tree is
//! keyed by its shape. The lifted values are bound again on every run.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use crate::ast::{named_value, Expr, ExprKind, ExprRef, QueryOp, TreePrinter};
use crate::error::{QueryError, Result};
use crate::materialize::ExecutionPlan;
use crate::value::{SqlValue, Value};
use crate::visit::{children, replace_nodes};

/// A tree with its literals lifted out.
#[derive(Debug, Clone)]
pub struct LiftedQuery {
    /// The tree, literals replaced by named values.
    pub tree: ExprRef,
    /// Cache key.
    pub key: String,
    /// Lifted values by name.
    pub values: HashMap<String, SqlValue>,
}

/// Literals whose value changes the plan: row counts, nulls, booleans and
/// non-scalar constants.
fn is_structural(v: &Value) -> bool {
    !matches!(
        v,
        Value::Scalar(
            SqlValue::Int(_)
                | SqlValue::Float(_)
                | SqlValue::Text(_)
                | SqlValue::Blob(_)
                | SqlValue::DateTime(_)
        )
    )
}

fn row_counts(expr: &ExprRef) -> HashSet<*const Expr> {
    let mut out = HashSet::new();
    let mut stack = vec![expr];
    while let Some(e) = stack.pop() {
        if let ExprKind::Query(QueryOp::Skip { count, .. } | QueryOp::Take { count, .. }) = e.kind() {
            out.insert(ExprRef::as_ptr(count));
        }
        stack.extend(children(e));
    }
    out
}

/// Lifts the literals of an algebra tree.
pub fn lift_constants(expr: &ExprRef) -> Result<LiftedQuery> {
    let counts = row_counts(expr);
    let mut values = HashMap::new();
    let mut fixed = Vec::new();
    let tree = replace_nodes(expr, |e| {
        let ExprKind::Constant(v) = e.kind() else {
            return None;
        };
        if counts.contains(&ExprRef::as_ptr(e)) || is_structural(v) {
            fixed.push(TreePrinter::new().print(e));
            return Some(e.clone());
        }
        let Value::Scalar(s) = v else {
            return Some(e.clone());
        };
        let name = format!("c{}", values.len());
        values.insert(name.clone(), s.clone());
        Some(named_value(name, e.clone()))
    })?;
    let key = format!("{}|{}", TreePrinter::shape().print(&tree), fixed.join(","));
    Ok(LiftedQuery { tree, key, values })
}

#[derive(Debug, Default)]
struct CacheState {
    /// Most recent first.
    entries: Vec<(String, Arc<ExecutionPlan>)>,
    version: u64,
}

/// Shared plan cache.
///
/// Lookups scan under the read lock; a hit is moved to the front under the
/// write lock. [`PlanCache::invalidate`] bumps a version so that plans
/// built against an older mapping are not stored.
#[derive(Debug)]
pub struct PlanCache {
    capacity: usize,
    state: RwLock<CacheState>,
}

impl PlanCache {
    /// Creates a cache holding at most `capacity` plans.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: RwLock::new(CacheState::default()),
        }
    }

    /// Current version.
    pub fn version(&self) -> Result<u64> {
        Ok(self
            .state
            .read()
            .map_err(|_| QueryError::Poisoned("plan cache"))?
            .version)
    }

    /// Number of cached plans.
    pub fn len(&self) -> Result<usize> {
        Ok(self
            .state
            .read()
            .map_err(|_| QueryError::Poisoned("plan cache"))?
            .entries
            .len())
    }

    /// Returns true when nothing is cached.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Looks up a plan, marking it most recently used.
    pub fn get(&self, key: &str) -> Result<Option<Arc<ExecutionPlan>>> {
        let found = {
            let state = self.state.read().map_err(|_| QueryError::Poisoned("plan cache"))?;
            state.entries.iter().position(|(k, _)| k == key)
        };
        let Some(_) = found else {
            return Ok(None);
        };
        let mut state = self.state.write().map_err(|_| QueryError::Poisoned("plan cache"))?;
        // Another writer may have moved or evicted the entry in between.
        let Some(i) = state.entries.iter().position(|(k, _)| k == key) else {
            return Ok(None);
        };
        let entry = state.entries.remove(i);
        let plan = entry.1.clone();
        state.entries.insert(0, entry);
        Ok(Some(plan))
    }

    /// Stores a plan built while the cache was at `version`.
    pub fn insert(&self, key: String, plan: Arc<ExecutionPlan>, version: u64) -> Result<()> {
        if self.capacity == 0 {
            return Ok(());
        }
        let mut state = self.state.write().map_err(|_| QueryError::Poisoned("plan cache"))?;
        if state.version != version {
            tracing::warn!(
                built = version,
                current = state.version,
                "Plan cache invalidated during translation, plan not stored"
            );
            return Ok(());
        }
        state.entries.retain(|(k, _)| *k != key);
        state.entries.insert(0, (key, plan));
        let capacity = self.capacity;
        state.entries.truncate(capacity);
        Ok(())
    }

    /// Drops every plan.
    pub fn invalidate(&self) -> Result<()> {
        let mut state = self.state.write().map_err(|_| QueryError::Poisoned("plan cache"))?;
        state.entries.clear();
        state.version += 1;
        tracing::debug!(version = state.version, "Plan cache invalidated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{lit, null, ExprExt, Query, Type};
    use crate::command::QueryCommand;

    fn plan(text: &str) -> Arc<ExecutionPlan> {
        Arc::new(ExecutionPlan::Command(QueryCommand::new(text, Vec::new())))
    }

    fn customers_in(city: &str, take: i64) -> ExprRef {
        Query::from("Customer")
            .filter(|c| c.member("City").eq(lit(city)))
            .take(take)
            .into_expr()
    }

    #[test]
    fn test_literals_share_a_key() {
        let a = lift_constants(&customers_in("Oslo", 5)).unwrap();
        let b = lift_constants(&customers_in("Bergen", 5)).unwrap();
        assert_eq!(a.key, b.key);
        assert_eq!(a.values.get("c0"), Some(&SqlValue::Text("Oslo".into())));
        assert_eq!(b.values.get("c0"), Some(&SqlValue::Text("Bergen".into())));
    }

    #[test]
    fn test_row_counts_and_nulls_stay_in_the_key() {
        let a = lift_constants(&customers_in("Oslo", 5)).unwrap();
        let b = lift_constants(&customers_in("Oslo", 6)).unwrap();
        assert_ne!(a.key, b.key);
        let with_null = Query::from("Customer")
            .filter(|c| c.member("City").eq(null(Type::Text)))
            .into_expr();
        let lifted = lift_constants(&with_null).unwrap();
        assert!(lifted.values.is_empty());
    }

    #[test]
    fn test_mru_eviction() {
        let cache = PlanCache::new(2);
        let v = cache.version().unwrap();
        cache.insert("a".into(), plan("A"), v).unwrap();
        cache.insert("b".into(), plan("B"), v).unwrap();
        assert!(cache.get("a").unwrap().is_some());
        cache.insert("c".into(), plan("C"), v).unwrap();
        assert!(cache.get("b").unwrap().is_none());
        assert!(cache.get("a").unwrap().is_some());
        assert_eq!(cache.len().unwrap(), 2);
    }

    #[test]
    fn test_stale_plans_are_not_stored() {
        let cache = PlanCache::new(4);
        let v = cache.version().unwrap();
        cache.invalidate().unwrap();
        cache.insert("a".into(), plan("A"), v).unwrap();
        assert!(cache.is_empty().unwrap());
    }
}
