//! Translated queries and session changes run against in-memory SQLite.

use std::sync::Arc;

use oxide_query_core::ast::{lit, ExprExt, Query};
use oxide_query_core::entity::Entity as _;
use oxide_query_core::mapping::{MappingRegistry, StaticMappingSource};
use oxide_query_core::session::TrackState;
use oxide_query_core::value::Value;
use oxide_query_core::QueryProvider;
use oxide_query_derive::Entity;
use oxide_query_sqlite::{SqliteDialect, SqliteExecutor};

#[derive(Debug, Clone, PartialEq, Entity)]
#[entity(table = "customers")]
pub struct Customer {
    #[column(primary_key)]
    pub id: i64,
    pub name: String,
    pub city: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Entity)]
#[entity(table = "orders")]
pub struct Order {
    #[column(primary_key, generated)]
    pub id: Option<i64>,
    pub customer_id: i64,
    pub total: f64,
}

async fn provider() -> QueryProvider<SqliteExecutor> {
    let executor = SqliteExecutor::memory().await.expect("open database");
    sqlx::raw_sql(
        "CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT NOT NULL, city TEXT);
         CREATE TABLE orders (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             customer_id INTEGER NOT NULL REFERENCES customers(id),
             total REAL NOT NULL
         );
         INSERT INTO customers (id, name, city) VALUES
             (1, 'Ann', 'Oslo'), (2, 'Bo', 'Bergen'), (3, 'Cy', 'Oslo');",
    )
    .execute(executor.pool())
    .await
    .expect("create schema");
    let mapping = MappingRegistry::new(
        StaticMappingSource::new()
            .with_entity::<Customer>()
            .with_entity::<Order>(),
    );
    QueryProvider::new(
        Arc::new(mapping),
        Arc::new(SqliteDialect::new()),
        executor,
    )
}

fn names(customers: &[Customer]) -> Vec<&str> {
    customers.iter().map(|c| c.name.as_str()).collect()
}

// =============================================================================
// Queries
// =============================================================================

#[tokio::test]
async fn test_filter_binds_parameters() {
    let p = provider().await;
    let query = Query::from("Customer")
        .filter(|c| c.member("city").eq(lit("Oslo")))
        .order_by_descending(|c| c.member("name"))
        .into_expr();
    let customers: Vec<Customer> = p.execute_as(&query).await.unwrap();
    assert_eq!(names(&customers), vec!["Cy", "Ann"]);
}

#[tokio::test]
async fn test_skip_without_take() {
    let p = provider().await;
    let query = Query::from("Customer")
        .order_by(|c| c.member("id"))
        .skip(1)
        .into_expr();
    let customers: Vec<Customer> = p.execute_as(&query).await.unwrap();
    assert_eq!(names(&customers), vec!["Bo", "Cy"]);
}

#[tokio::test]
async fn test_count() {
    let p = provider().await;
    let value = p.execute(&Query::from("Customer").count()).await.unwrap();
    assert_eq!(value, Value::from(3));
}

// =============================================================================
// Changes
// =============================================================================

#[tokio::test]
async fn test_insert_reads_back_generated_key() {
    let p = provider().await;
    let mut session = p.session();
    let order = Order {
        id: None,
        customer_id: 1,
        total: 12.5,
    };
    let first = session.insert_entity(&order).unwrap();
    let second = session.insert_entity(&Order { total: 3.0, ..order }).unwrap();
    assert_eq!(p.submit_changes(&mut session).await.unwrap(), 2);

    let first = Order::from_object(session.instance(first).unwrap()).unwrap();
    let second = Order::from_object(session.instance(second).unwrap()).unwrap();
    assert_eq!(first.id, Some(1));
    assert_eq!(second.id, Some(2));

    let stored: Vec<(i64, f64)> = sqlx::query_as("SELECT id, total FROM orders ORDER BY id")
        .fetch_all(p.executor().pool())
        .await
        .unwrap();
    assert_eq!(stored, vec![(1, 12.5), (2, 3.0)]);
}

#[tokio::test]
async fn test_update_and_delete_tracked_rows() {
    let p = provider().await;
    let query = Query::from("Customer")
        .filter(|c| c.member("city").eq(lit("Oslo")))
        .order_by(|c| c.member("id"))
        .into_expr();
    let loaded = p.execute(&query).await.unwrap();

    let mut session = p.session();
    let ids = session.attach_value(&loaded).unwrap();
    assert_eq!(ids.len(), 2);
    session.instance_mut(ids[0]).unwrap().set("name", "Anne");
    let cy = session.instance(ids[1]).unwrap().clone();
    session.delete("Customer", cy).unwrap();

    assert_eq!(p.submit_changes(&mut session).await.unwrap(), 2);
    assert_eq!(session.state(ids[0]).unwrap(), TrackState::PossibleUpdate);

    let stored: Vec<(i64, String)> = sqlx::query_as("SELECT id, name FROM customers ORDER BY id")
        .fetch_all(p.executor().pool())
        .await
        .unwrap();
    assert_eq!(stored, vec![(1, "Anne".to_string()), (2, "Bo".to_string())]);
}

#[tokio::test]
async fn test_update_of_missing_row_fails() {
    let p = provider().await;
    let mut session = p.session();
    let ghost = Customer {
        id: 99,
        name: "Ghost".into(),
        city: None,
    };
    let id = session.attach("Customer", ghost.to_object()).unwrap();
    session.instance_mut(id).unwrap().set("name", "Still a ghost");
    assert!(p.submit_changes(&mut session).await.is_err());
    assert_eq!(session.state(id).unwrap(), TrackState::Update);
}
