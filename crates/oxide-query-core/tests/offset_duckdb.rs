//! Skip/take strategies run against DuckDB must select the same rows.

mod common;

use common::translate;
use duckdb::types::Value as DuckValue;
use duckdb::Connection;
use oxide_query_core::ast::{ExprExt, ExprRef, Query};
use oxide_query_core::config::TranslatorConfig;
use oxide_query_core::dialect::{GenericDialect, OffsetStrategy};
use oxide_query_core::materialize::ExecutionPlan;
use oxide_query_core::value::{Row, SqlValue, Value};

fn items(count: i64) -> Connection {
    let conn = Connection::open_in_memory().expect("open DuckDB");
    conn.execute_batch(r#"CREATE TABLE "Items" ("Id" BIGINT PRIMARY KEY, "Name" VARCHAR)"#)
        .expect("create table");
    for id in 1..=count {
        conn.execute(
            r#"INSERT INTO "Items" ("Id", "Name") VALUES (?, ?)"#,
            duckdb::params![id, format!("item {id:02}")],
        )
        .expect("insert row");
    }
    conn
}

fn cell(value: DuckValue) -> SqlValue {
    match value {
        DuckValue::Null => SqlValue::Null,
        DuckValue::Boolean(b) => SqlValue::Bool(b),
        DuckValue::Int(i) => SqlValue::Int(i64::from(i)),
        DuckValue::BigInt(i) => SqlValue::Int(i),
        DuckValue::Double(f) => SqlValue::Float(f),
        DuckValue::Text(s) => SqlValue::Text(s),
        other => panic!("Unexpected DuckDB value {other:?}"),
    }
}

/// Runs the query with `strategy` and returns the ids it materializes.
fn run(conn: &Connection, strategy: OffsetStrategy, query: &ExprRef) -> Vec<i64> {
    let dialect = GenericDialect::new().with_offset_strategy(strategy);
    let config = TranslatorConfig::default().parameterize_constants(false);
    let translation = translate(&dialect, &config, query);
    let ExecutionPlan::Query(plan) = translation.plan.as_ref() else {
        panic!("Expected a query plan for {strategy:?}");
    };
    assert!(
        plan.command.parameters.is_empty(),
        "{strategy:?} left parameters in:\n{}",
        plan.command.text
    );
    let mut stmt = conn
        .prepare(&plan.command.text)
        .unwrap_or_else(|e| panic!("{strategy:?} produced invalid SQL:\n{}\n{e}", plan.command.text));
    let rows: Vec<Row> = stmt
        .query_map([], |row| {
            let mut cells = Vec::new();
            let mut i = 0;
            while let Ok(v) = row.get::<_, DuckValue>(i) {
                cells.push(cell(v));
                i += 1;
            }
            Ok(Row::new(cells))
        })
        .expect("run query")
        .collect::<Result<_, _>>()
        .expect("read rows");
    let value = plan
        .materialize(&rows, &[], &translation.parameters)
        .expect("materialize");
    let Value::List(items) = value else {
        panic!("Expected a list, got {value:?}");
    };
    items
        .iter()
        .map(|item| match item.member("Id") {
            Ok(Value::Scalar(SqlValue::Int(id))) => id,
            other => panic!("Expected an id, got {other:?}"),
        })
        .collect()
}

const STRATEGIES: [OffsetStrategy; 3] = [
    OffsetStrategy::RowNumber,
    OffsetStrategy::NestedOrderBy,
    OffsetStrategy::Native,
];

#[test]
fn test_skip_take_selects_the_same_rows() {
    let conn = items(20);
    let query = Query::from("Item")
        .order_by(|i| i.member("Id"))
        .skip(10)
        .take(5)
        .into_expr();
    for strategy in STRATEGIES {
        assert_eq!(
            run(&conn, strategy, &query),
            vec![11, 12, 13, 14, 15],
            "{strategy:?}"
        );
    }
}

#[test]
fn test_descending_page() {
    let conn = items(20);
    let query = Query::from("Item")
        .order_by_descending(|i| i.member("Id"))
        .skip(3)
        .take(4)
        .into_expr();
    for strategy in STRATEGIES {
        assert_eq!(run(&conn, strategy, &query), vec![17, 16, 15, 14], "{strategy:?}");
    }
}

#[test]
fn test_page_past_the_end_is_partial() {
    let conn = items(20);
    let query = Query::from("Item")
        .order_by(|i| i.member("Id"))
        .skip(18)
        .take(5)
        .into_expr();
    for strategy in STRATEGIES {
        assert_eq!(run(&conn, strategy, &query), vec![19, 20], "{strategy:?}");
    }
}

#[test]
fn test_skip_without_take() {
    let conn = items(20);
    let query = Query::from("Item")
        .order_by_descending(|i| i.member("Id"))
        .skip(17)
        .into_expr();
    for strategy in STRATEGIES {
        assert_eq!(run(&conn, strategy, &query), vec![3, 2, 1], "{strategy:?}");
    }
}

#[test]
fn test_skip_past_the_end_is_empty() {
    let conn = items(20);
    let query = Query::from("Item")
        .order_by(|i| i.member("Id"))
        .skip(25)
        .take(5)
        .into_expr();
    for strategy in STRATEGIES {
        assert!(run(&conn, strategy, &query).is_empty(), "{strategy:?}");
    }
}

