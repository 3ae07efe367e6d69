//! Running translated commands on an `sqlx` SQLite pool.

use std::borrow::Cow;

use oxide_query_core::command::QueryCommand;
use oxide_query_core::error::Result as QueryResult;
use oxide_query_core::provider::Executor;
use oxide_query_core::value::{Row, SqlValue};
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row as _, Sqlite, TypeInfo as _, ValueRef as _};
use tracing::debug;

use crate::error::{execution, Result};

/// Runs commands on a SQLite pool.
///
/// Generated keys are read back with `last_insert_rowid()`, which only sees
/// inserts made on the same connection. Use [`SqliteExecutor::memory`] or a
/// pool limited to one connection when entities have generated keys.
#[derive(Debug, Clone)]
pub struct SqliteExecutor {
    pool: SqlitePool,
}

impl SqliteExecutor {
    /// Wraps an existing pool.
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens a single-connection pool on `url`.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteError::Database`](crate::SqliteError::Database) when
    /// the database cannot be opened.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await?;
        debug!(url, "Opened SQLite pool");
        Ok(Self { pool })
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error when SQLite cannot be initialized.
    pub async fn memory() -> Result<Self> {
        Self::connect("sqlite::memory:").await
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Rewrites `@name` placeholders to `?N`, numbered by the parameter's
/// position in the command. Quoted text and identifiers are left alone.
fn positional(command: &QueryCommand) -> Cow<'_, str> {
    if command.parameters.is_empty() {
        return Cow::Borrowed(&command.text);
    }
    let mut out = String::with_capacity(command.text.len());
    let mut quote: Option<char> = None;
    let mut chars = command.text.char_indices().peekable();
    while let Some((start, c)) = chars.next() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
                out.push(c);
            }
            None if c == '\'' || c == '"' => {
                quote = Some(c);
                out.push(c);
            }
            None if c == '@' => {
                let mut end = start + 1;
                while let Some(&(i, n)) = chars.peek() {
                    if n.is_ascii_alphanumeric() || n == '_' {
                        end = i + n.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let name = &command.text[start + 1..end];
                let placeholder = command
                    .parameters
                    .iter()
                    .position(|p| p.name == name)
                    .map_or_else(|| command.text[start..end].to_string(), |i| format!("?{}", i + 1));
                out.push_str(&placeholder);
            }
            None => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Binds a parameter value to a query.
fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &SqlValue,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        SqlValue::Null => query.bind(Option::<i64>::None),
        SqlValue::Bool(b) => query.bind(*b),
        SqlValue::Int(i) => query.bind(*i),
        SqlValue::Float(f) => query.bind(*f),
        SqlValue::Text(s) => query.bind(s.clone()),
        SqlValue::Blob(b) => query.bind(b.clone()),
        SqlValue::DateTime(dt) => query.bind(*dt),
    }
}

fn prepare<'q>(text: &'q str, command: &QueryCommand) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    command
        .parameters
        .iter()
        .fold(sqlx::query(text), |q, p| bind_value(q, &p.value))
}

/// Reads every cell of a row by its stored type.
fn read_row(row: &SqliteRow) -> std::result::Result<Row, sqlx::Error> {
    let mut cells = Vec::with_capacity(row.len());
    for i in 0..row.len() {
        let raw = row.try_get_raw(i)?;
        if raw.is_null() {
            cells.push(SqlValue::Null);
            continue;
        }
        let kind = raw.type_info().name().to_string();
        let cell = match kind.as_str() {
            "INTEGER" | "BOOLEAN" => SqlValue::Int(row.try_get_unchecked::<i64, _>(i)?),
            "REAL" | "NUMERIC" => SqlValue::Float(row.try_get_unchecked::<f64, _>(i)?),
            "BLOB" => SqlValue::Blob(row.try_get_unchecked::<Vec<u8>, _>(i)?),
            // Timestamps are stored as text; the reader parses them.
            _ => SqlValue::Text(row.try_get_unchecked::<String, _>(i)?),
        };
        cells.push(cell);
    }
    Ok(Row::new(cells))
}

impl Executor for SqliteExecutor {
    async fn query(&self, command: &QueryCommand) -> QueryResult<Vec<Row>> {
        let text = positional(command);
        let rows = prepare(&text, command)
            .fetch_all(&self.pool)
            .await
            .map_err(execution)?;
        debug!(rows = rows.len(), sql = %text, "Ran query");
        rows.iter()
            .map(read_row)
            .collect::<std::result::Result<_, _>>()
            .map_err(execution)
    }

    async fn execute(&self, command: &QueryCommand) -> QueryResult<u64> {
        let text = positional(command);
        let result = prepare(&text, command)
            .execute(&self.pool)
            .await
            .map_err(execution)?;
        debug!(affected = result.rows_affected(), sql = %text, "Ran command");
        Ok(result.rows_affected())
    }

    /// Runs each group of `batch_size` commands in one transaction.
    async fn execute_batch(
        &self,
        commands: &[QueryCommand],
        batch_size: usize,
    ) -> QueryResult<Vec<u64>> {
        let mut counts = Vec::with_capacity(commands.len());
        for chunk in commands.chunks(batch_size.max(1)) {
            let mut tx = self.pool.begin().await.map_err(execution)?;
            for command in chunk {
                let text = positional(command);
                let result = prepare(&text, command)
                    .execute(&mut *tx)
                    .await
                    .map_err(execution)?;
                counts.push(result.rows_affected());
            }
            tx.commit().await.map_err(execution)?;
            debug!(commands = chunk.len(), "Committed batch");
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use oxide_query_core::ast::Type;
    use oxide_query_core::command::QueryParameter;

    use super::*;

    fn param(name: &str, value: SqlValue) -> QueryParameter {
        QueryParameter {
            name: name.to_string(),
            ty: Type::Int,
            value,
        }
    }

    fn command(text: &str, parameters: Vec<QueryParameter>) -> QueryCommand {
        QueryCommand::new(text, parameters)
    }

    #[test]
    fn test_positional_placeholders() {
        let cmd = command(
            "SELECT @p0, '@p1', \"@p0\", @p10 WHERE x = @p0",
            vec![param("p0", SqlValue::Int(1)), param("p10", SqlValue::Int(2))],
        );
        assert_eq!(
            positional(&cmd),
            "SELECT ?1, '@p1', \"@p0\", ?2 WHERE x = ?1"
        );
    }

    #[test]
    fn test_unknown_placeholder_kept() {
        let cmd = command("SELECT @c0 + @r0", vec![param("c0", SqlValue::Int(1))]);
        assert_eq!(positional(&cmd), "SELECT ?1 + @r0");
        let bare = command("SELECT @x", Vec::new());
        assert_eq!(positional(&bare), "SELECT @x");
    }

    #[tokio::test]
    async fn test_query_reads_stored_types() {
        let executor = SqliteExecutor::memory().await.unwrap();
        let rows = executor
            .query(&command("SELECT 1, 2.5, 'x', NULL, X'0102'", Vec::new()))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.get(0).unwrap(), &SqlValue::Int(1));
        assert_eq!(row.get(1).unwrap(), &SqlValue::Float(2.5));
        assert_eq!(row.get(2).unwrap(), &SqlValue::Text("x".into()));
        assert_eq!(row.get(3).unwrap(), &SqlValue::Null);
        assert_eq!(row.get(4).unwrap(), &SqlValue::Blob(vec![1, 2]));
    }

    #[tokio::test]
    async fn test_parameters_bind_by_name() {
        let executor = SqliteExecutor::memory().await.unwrap();
        let rows = executor
            .query(&command(
                "SELECT @b - @a, @a",
                vec![param("a", SqlValue::Int(2)), param("b", SqlValue::Int(7))],
            ))
            .await
            .unwrap();
        assert_eq!(rows[0].get(0).unwrap(), &SqlValue::Int(5));
        assert_eq!(rows[0].get(1).unwrap(), &SqlValue::Int(2));
    }

    #[tokio::test]
    async fn test_batch_counts_rows() {
        let executor = SqliteExecutor::memory().await.unwrap();
        sqlx::query("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)")
            .execute(executor.pool())
            .await
            .unwrap();
        let inserts: Vec<QueryCommand> = (1..=3)
            .map(|i| {
                command(
                    "INSERT INTO t (id, name) VALUES (@p0, 'n')",
                    vec![param("p0", SqlValue::Int(i))],
                )
            })
            .collect();
        let counts = executor.execute_batch(&inserts, 2).await.unwrap();
        assert_eq!(counts, vec![1, 1, 1]);

        let missing = command(
            "UPDATE t SET name = 'm' WHERE id = @p0",
            vec![param("p0", SqlValue::Int(9))],
        );
        assert_eq!(executor.execute(&missing).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_driver_errors_are_execution_errors() {
        let executor = SqliteExecutor::memory().await.unwrap();
        let err = executor
            .query(&command("SELECT * FROM missing", Vec::new()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            oxide_query_core::QueryError::Execution(ref m) if m.contains("missing")
        ));
    }
}
