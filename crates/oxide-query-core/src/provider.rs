//! Running translated trees against a database.
//!
//! The core performs no I/O. An [`Executor`] runs formatted commands;
//! [`QueryProvider`] translates trees, feeds rows through the readers of
//! the plan and writes session changes back.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{FutureExt, LocalBoxFuture};

use crate::ast::ExprRef;
use crate::cache::PlanCache;
use crate::command::QueryCommand;
use crate::config::TranslatorConfig;
use crate::dialect::Dialect;
use crate::entity::{entity_from_value, Entity};
use crate::error::{QueryError, Result};
use crate::mapping::{Mapping, QueryMapper};
use crate::materialize::{key_of, ExecutionPlan, NestedPlan, NestedResult, ProjectionPlan, RowContext};
use crate::policy::QueryPolicy;
use crate::session::{ItemId, Session, TrackState};
use crate::translate::{Translation, Translator};
use crate::value::{Row, SqlValue, Value};

/// Runs formatted commands.
///
/// Cancellation, timeouts and transactions are the implementor's business.
#[allow(async_fn_in_trait)]
pub trait Executor {
    /// Runs a query and returns its rows.
    async fn query(&self, command: &QueryCommand) -> Result<Vec<Row>>;

    /// Runs a write and returns the number of rows affected.
    async fn execute(&self, command: &QueryCommand) -> Result<u64>;

    /// Runs writes sharing one text in groups of `batch_size`, one count per
    /// command. The default runs them one by one.
    async fn execute_batch(&self, commands: &[QueryCommand], batch_size: usize) -> Result<Vec<u64>> {
        let mut counts = Vec::with_capacity(commands.len());
        for chunk in commands.chunks(batch_size.max(1)) {
            for command in chunk {
                counts.push(self.execute(command).await?);
            }
        }
        Ok(counts)
    }
}

/// Translation plus execution for one mapping, dialect and executor.
pub struct QueryProvider<E> {
    mapping: Arc<dyn Mapping>,
    dialect: Arc<dyn Dialect>,
    config: TranslatorConfig,
    policy: QueryPolicy,
    cache: PlanCache,
    executor: E,
}

impl<E> std::fmt::Debug for QueryProvider<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryProvider")
            .field("dialect", &self.dialect.name())
            .field("config", &self.config)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

struct BatchEntry {
    item: ItemId,
    entity: String,
    state: TrackState,
    command: QueryCommand,
}

fn rows_affected(count: u64) -> Value {
    Value::Scalar(SqlValue::Int(i64::try_from(count).unwrap_or(i64::MAX)))
}

impl<E: Executor> QueryProvider<E> {
    /// Creates a provider with the default configuration.
    pub fn new(mapping: Arc<dyn Mapping>, dialect: Arc<dyn Dialect>, executor: E) -> Self {
        let config = TranslatorConfig::default();
        Self {
            mapping,
            dialect,
            cache: PlanCache::new(config.plan_cache_capacity),
            config,
            policy: QueryPolicy::new(),
            executor,
        }
    }

    /// Replaces the configuration; the plan cache starts over.
    #[must_use]
    pub fn with_config(mut self, config: TranslatorConfig) -> Self {
        self.cache = PlanCache::new(config.plan_cache_capacity);
        self.config = config;
        self
    }

    /// Sets the eager-load policy.
    #[must_use]
    pub fn with_policy(mut self, policy: QueryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The configuration in use.
    pub const fn config(&self) -> &TranslatorConfig {
        &self.config
    }

    /// The plan cache.
    pub const fn cache(&self) -> &PlanCache {
        &self.cache
    }

    /// The executor.
    pub const fn executor(&self) -> &E {
        &self.executor
    }

    /// Starts a session over this provider's mapping.
    pub fn session(&self) -> Session<'_> {
        Session::new(self.mapping.as_ref(), self.config.tracking)
    }

    fn translator(&self) -> Translator<'_> {
        Translator::new(self.mapping.as_ref(), self.dialect.as_ref(), &self.config)
            .with_policy(&self.policy)
            .with_cache(&self.cache)
    }

    /// Translates without running.
    pub fn translate(&self, expr: &ExprRef) -> Result<Translation> {
        self.translator().translate(expr)
    }

    /// Runs a query tree and materializes its result.
    pub async fn execute(&self, expr: &ExprRef) -> Result<Value> {
        let translation = self.translate(expr)?;
        self.run(&translation.plan, &translation.parameters).await
    }

    /// Runs a query tree whose rows are instances of `T`.
    pub async fn execute_as<T: Entity>(&self, expr: &ExprRef) -> Result<Vec<T>> {
        match self.execute(expr).await? {
            Value::List(items) => items.iter().map(entity_from_value::<T>).collect(),
            Value::Scalar(SqlValue::Null) => Ok(Vec::new()),
            single => Ok(vec![entity_from_value(&single)?]),
        }
    }

    /// Runs a command tree. Plain writes return the affected row count;
    /// inserts with generated members return the values read back.
    pub async fn execute_command(&self, expr: &ExprRef) -> Result<Value> {
        let translation = self.translate(expr)?;
        if matches!(translation.plan.as_ref(), ExecutionPlan::Query(_)) {
            return Err(QueryError::invalid("expected a command, found a query"));
        }
        self.run(&translation.plan, &translation.parameters).await
    }

    /// Writes every pending change of `session`, then accepts them.
    ///
    /// Consecutive commands with the same text go through
    /// [`Executor::execute_batch`]. An update or delete that affects no row
    /// fails the submit; changes already written stay written.
    pub async fn submit_changes(&self, session: &mut Session<'_>) -> Result<usize> {
        let mapper = QueryMapper::new(session.mapping(), &self.policy);
        let changes = session.pending_changes(&mapper)?;
        let translator = self.translator();
        let mut submitted = Vec::with_capacity(changes.len());
        let mut batch: Vec<BatchEntry> = Vec::new();
        for change in changes {
            let translation = translator.translate(&change.command)?;
            if let ExecutionPlan::Command(command) = translation.plan.as_ref() {
                let command = command.rebind(&translation.parameters);
                if batch.last().is_some_and(|b| b.command.text != command.text) {
                    self.flush(&mut batch, &mut submitted).await?;
                }
                batch.push(BatchEntry {
                    item: change.item,
                    entity: change.entity,
                    state: change.state,
                    command,
                });
                continue;
            }
            self.flush(&mut batch, &mut submitted).await?;
            let result = self
                .run(&translation.plan, &translation.parameters)
                .await?;
            session.merge_read_back(change.item, &result)?;
            submitted.push(change.item);
        }
        self.flush(&mut batch, &mut submitted).await?;
        session.accept_changes(&submitted)?;
        Ok(submitted.len())
    }

    async fn flush(&self, batch: &mut Vec<BatchEntry>, submitted: &mut Vec<ItemId>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let commands: Vec<QueryCommand> = batch.iter().map(|b| b.command.clone()).collect();
        let counts = self
            .executor
            .execute_batch(&commands, self.config.batch_size)
            .await?;
        if counts.len() != batch.len() {
            return Err(QueryError::Execution(format!(
                "batch of {} commands returned {} counts",
                batch.len(),
                counts.len()
            )));
        }
        for (entry, count) in batch.drain(..).zip(counts) {
            if count == 0 && matches!(entry.state, TrackState::Update | TrackState::Delete) {
                return Err(QueryError::Execution(format!(
                    "{} row to {} was not found",
                    entry.entity,
                    if entry.state == TrackState::Update { "update" } else { "delete" }
                )));
            }
            submitted.push(entry.item);
        }
        Ok(())
    }

    fn run<'a>(
        &'a self,
        plan: &'a ExecutionPlan,
        params: &'a HashMap<String, SqlValue>,
    ) -> LocalBoxFuture<'a, Result<Value>> {
        async move {
            match plan {
                ExecutionPlan::Query(p) => {
                    let (rows, nested) = self.load(p, params).await?;
                    p.materialize(&rows, &nested, params)
                }
                ExecutionPlan::Command(c) | ExecutionPlan::Batch(c) => {
                    let count = self.executor.execute(&c.rebind(params)).await?;
                    Ok(rows_affected(count))
                }
                ExecutionPlan::Block(steps) => {
                    let mut last = Value::NULL;
                    for step in steps {
                        last = self.run(step, params).await?;
                    }
                    Ok(last)
                }
                ExecutionPlan::Conditional {
                    check,
                    if_true,
                    if_false,
                } => {
                    let (rows, nested) = self.load(check, params).await?;
                    let test = check.materialize(&rows, &nested, params)?;
                    let passed = test.as_scalar().and_then(SqlValue::as_bool).unwrap_or(false);
                    tracing::debug!(passed, "Evaluated command condition");
                    match (passed, if_false) {
                        (true, _) => self.run(if_true, params).await,
                        (false, Some(f)) => self.run(f, params).await,
                        (false, None) => Ok(Value::NULL),
                    }
                }
            }
        }
        .boxed_local()
    }

    /// Runs a projection's command and everything its readers need.
    fn load<'a>(
        &'a self,
        plan: &'a ProjectionPlan,
        params: &'a HashMap<String, SqlValue>,
    ) -> LocalBoxFuture<'a, Result<(Vec<Row>, Vec<NestedResult>)>> {
        async move {
            let rows = self.executor.query(&plan.command.rebind(params)).await?;
            let mut nested = Vec::with_capacity(plan.nested.len());
            for n in &plan.nested {
                match n {
                    NestedPlan::Correlated { plan: inner, bindings } => {
                        let mut values = Vec::with_capacity(rows.len());
                        for (index, row) in rows.iter().enumerate() {
                            let cx = RowContext {
                                row,
                                index,
                                nested: &[],
                                params,
                            };
                            let mut bound = params.clone();
                            for (name, reader) in bindings {
                                let value = match reader.read(&cx)? {
                                    Value::Scalar(s) => s,
                                    other => {
                                        return Err(QueryError::Materialize(format!(
                                            "correlation {name} is not a scalar: {other:?}"
                                        )))
                                    }
                                };
                                bound.insert(name.clone(), value);
                            }
                            let (inner_rows, inner_nested) = self.load(inner, &bound).await?;
                            values.push(inner.materialize(&inner_rows, &inner_nested, &bound)?);
                        }
                        nested.push(NestedResult::PerRow(values));
                    }
                    NestedPlan::ClientJoin {
                        plan: inner,
                        inner_key,
                    } => {
                        let (inner_rows, inner_nested) = self.load(inner, params).await?;
                        let values = inner.read_rows(&inner_rows, &inner_nested, params)?;
                        let mut groups: HashMap<String, Vec<Value>> = HashMap::new();
                        for (index, (row, value)) in inner_rows.iter().zip(values).enumerate() {
                            let cx = RowContext {
                                row,
                                index,
                                nested: &inner_nested,
                                params,
                            };
                            let key = inner_key
                                .iter()
                                .map(|r| r.read(&cx))
                                .collect::<Result<Vec<_>>>()?;
                            if let Some(k) = key_of(&key) {
                                groups.entry(k).or_default().push(value);
                            }
                        }
                        tracing::debug!(
                            rows = inner_rows.len(),
                            keys = groups.len(),
                            "Client join loaded"
                        );
                        nested.push(NestedResult::Keyed(groups));
                    }
                }
            }
            Ok((rows, nested))
        }
        .boxed_local()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use futures::executor::block_on;

    use super::*;
    use crate::ast::{lit, ExprExt, Query};
    use crate::dialect::GenericDialect;
    use crate::mapping::tests::northwind;
    use crate::value::Object;

    #[derive(Default)]
    struct MockExecutor {
        responses: Vec<(&'static str, Vec<Row>)>,
        missing: bool,
        log: Mutex<Vec<String>>,
        batches: Mutex<Vec<usize>>,
    }

    impl MockExecutor {
        fn respond(mut self, fragment: &'static str, rows: Vec<Vec<SqlValue>>) -> Self {
            self.responses
                .push((fragment, rows.into_iter().map(Row::new).collect()));
            self
        }

        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    impl Executor for MockExecutor {
        async fn query(&self, command: &QueryCommand) -> Result<Vec<Row>> {
            self.log.lock().unwrap().push(command.text.clone());
            Ok(self
                .responses
                .iter()
                .find(|(fragment, _)| command.text.contains(fragment))
                .map(|(_, rows)| rows.clone())
                .unwrap_or_default())
        }

        async fn execute(&self, command: &QueryCommand) -> Result<u64> {
            self.log.lock().unwrap().push(command.text.clone());
            Ok(u64::from(!self.missing))
        }

        async fn execute_batch(
            &self,
            commands: &[QueryCommand],
            _batch_size: usize,
        ) -> Result<Vec<u64>> {
            self.batches.lock().unwrap().push(commands.len());
            let mut counts = Vec::new();
            for c in commands {
                counts.push(self.execute(c).await?);
            }
            Ok(counts)
        }
    }

    fn provider(executor: MockExecutor) -> QueryProvider<MockExecutor> {
        QueryProvider::new(
            Arc::new(northwind()),
            Arc::new(GenericDialect::new()),
            executor,
        )
    }

    fn text(s: &str) -> SqlValue {
        SqlValue::Text(s.into())
    }

    fn customer(id: i64, name: &str) -> Object {
        Object::new("Customer")
            .with("Id", id)
            .with("Name", name)
            .with("City", "Oslo")
    }

    #[test]
    fn test_execute_materializes_entities() {
        let executor = MockExecutor::default().respond(
            "\"Customers\"",
            vec![
                vec![SqlValue::Int(1), text("Ann"), text("Oslo")],
                vec![SqlValue::Int(2), text("Bo"), text("Oslo")],
            ],
        );
        let p = provider(executor);
        let query = Query::from("Customer")
            .filter(|c| c.member("City").eq(lit("Oslo")))
            .into_expr();
        let value = block_on(p.execute(&query)).unwrap();
        let items = value.as_list().unwrap();
        assert_eq!(items.len(), 2);
        let first = items[0].as_object().unwrap();
        assert_eq!(first.entity.as_deref(), Some("Customer"));
        assert_eq!(first.get("Name"), Some(&Value::from("Ann")));
        assert_eq!(p.executor().log().len(), 1);
    }

    #[test]
    fn test_execute_command_rejects_queries() {
        let p = provider(MockExecutor::default());
        let err = block_on(p.execute_command(&Query::from("Customer").into_expr())).unwrap_err();
        assert!(matches!(err, QueryError::InvalidQuery(_)));
    }

    #[test]
    fn test_submit_batches_same_text_and_accepts() {
        // Lifted literals give both inserts one text.
        let p = provider(MockExecutor::default())
            .with_config(TranslatorConfig::default().plan_cache(8));
        let mut session = p.session();
        let a = session.insert("Customer", customer(1, "Ann")).unwrap();
        let b = session.insert("Customer", customer(2, "Bo")).unwrap();
        let c = session.attach("Customer", customer(3, "Cy")).unwrap();
        session.instance_mut(c).unwrap().set("Name", "Cyd");
        let count = block_on(p.submit_changes(&mut session)).unwrap();
        assert_eq!(count, 3);
        assert_eq!(*p.executor().batches.lock().unwrap(), vec![2, 1]);
        let log = p.executor().log();
        assert!(log[0].starts_with("INSERT INTO"));
        assert!(log[2].starts_with("UPDATE"));
        for id in [a, b, c] {
            assert_eq!(session.state(id).unwrap(), TrackState::PossibleUpdate);
        }
    }

    #[test]
    fn test_submit_merges_generated_keys() {
        let executor =
            MockExecutor::default().respond("FROM \"Orders\"", vec![vec![SqlValue::Int(42)]]);
        let p = provider(executor);
        let mut session = p.session();
        let order = Object::new("Order").with("CustomerId", 1).with("Total", 9.5);
        let id = session.insert("Order", order).unwrap();
        block_on(p.submit_changes(&mut session)).unwrap();
        assert_eq!(
            session.instance(id).unwrap().get("Id"),
            Some(&Value::from(42))
        );
    }

    #[test]
    fn test_missing_row_fails_submit() {
        let p = provider(MockExecutor {
            missing: true,
            ..MockExecutor::default()
        });
        let mut session = p.session();
        let id = session.attach("Customer", customer(1, "Ann")).unwrap();
        session.instance_mut(id).unwrap().set("Name", "Bo");
        let err = block_on(p.submit_changes(&mut session)).unwrap_err();
        assert!(matches!(err, QueryError::Execution(ref m) if m.contains("Customer")));
        assert_eq!(session.state(id).unwrap(), TrackState::Update);
    }

    #[test]
    fn test_cached_provider_reuses_plans() {
        let p = provider(MockExecutor::default())
            .with_config(TranslatorConfig::default().plan_cache(8));
        for city in ["Oslo", "Bergen", "Tromso"] {
            let query = Query::from("Customer")
                .filter(|c| c.member("City").eq(lit(city)))
                .into_expr();
            block_on(p.execute(&query)).unwrap();
        }
        assert_eq!(p.cache().len().unwrap(), 1);
    }
}
