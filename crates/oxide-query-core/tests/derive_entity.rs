//! Tests for `#[derive(Entity)]` output and typed entities flowing through
//! translation and change tracking.

use oxide_query_core::ast::{lit, ExprExt, Query};
use oxide_query_core::config::{TrackingMode, TranslatorConfig};
use oxide_query_core::dialect::GenericDialect;
use oxide_query_core::entity::Entity;
use oxide_query_core::mapping::{Mapping, MappingRegistry, StaticMappingSource};
use oxide_query_core::session::Session;
use oxide_query_core::translate::Translator;
use oxide_query_core::value::{Object, Value};
use oxide_query_core::QueryError;
use oxide_query_derive::Entity;

// =============================================================================
// Entities
// =============================================================================

#[derive(Debug, Clone, PartialEq, Entity)]
#[entity(table = "customers")]
pub struct Customer {
    #[column(primary_key)]
    pub id: i64,
    pub name: String,
    #[column(name = "city_name")]
    pub city: Option<String>,
    #[association(related = "Order", keys = "id", related_keys = "customer_id", many)]
    pub orders: Vec<Order>,
}

#[derive(Debug, Clone, PartialEq, Entity)]
#[entity(name = "Order", table = "orders")]
pub struct Order {
    #[column(primary_key, generated)]
    pub id: Option<i64>,
    pub customer_id: i64,
    pub total: f64,
    #[association(related = "Customer", keys = "customer_id", related_keys = "id")]
    pub customer: Option<Customer>,
}

fn mapping() -> MappingRegistry<StaticMappingSource> {
    MappingRegistry::new(
        StaticMappingSource::new()
            .with_entity::<Customer>()
            .with_entity::<Order>(),
    )
}

fn ann() -> Customer {
    Customer {
        id: 1,
        name: "Ann".into(),
        city: Some("Oslo".into()),
        orders: Vec::new(),
    }
}

// =============================================================================
// Metadata
// =============================================================================

#[test]
fn test_entity_def_metadata() {
    let m = mapping();
    assert!(m.validate_all().is_ok());
    assert_eq!(Customer::NAME, "Customer");
    assert_eq!(m.table_name("Customer").unwrap(), "customers");
    assert_eq!(m.column_name("Customer", "city").unwrap(), "city_name");
    assert!(m.is_primary_key("Order", "id").unwrap());
    assert!(m.is_generated("Order", "id").unwrap());
    assert!(m.is_relationship("Customer", "orders").unwrap());
    assert_eq!(m.related_entity("Order", "customer").unwrap(), "Customer");
}

#[test]
fn test_object_conversion_keeps_nested_entities() {
    let order = Order {
        id: Some(10),
        customer_id: 1,
        total: 9.5,
        customer: Some(ann()),
    };
    let object = order.to_object();
    assert_eq!(object.entity.as_deref(), Some("Order"));
    assert!(matches!(object.get("customer"), Some(Value::Object(_))));
    assert_eq!(Order::from_object(&object).unwrap(), order);
}

#[test]
fn test_missing_members_read_as_empty() {
    let object = Object::new("Customer").with("id", 2).with("name", "Bo");
    let customer = Customer::from_object(&object).unwrap();
    assert_eq!(customer.city, None);
    assert!(customer.orders.is_empty());
}

#[test]
fn test_wrong_member_type_fails() {
    let object = Object::new("Customer").with("id", "two").with("name", "Bo");
    assert!(matches!(
        Customer::from_object(&object),
        Err(QueryError::Materialize(_))
    ));
}

// =============================================================================
// Translation
// =============================================================================

#[test]
fn test_derived_mapping_translates() {
    let m = mapping();
    let dialect = GenericDialect::new();
    let config = TranslatorConfig::default();
    let query = Query::from("Customer")
        .filter(|c| c.member("city").eq(lit("Oslo")))
        .into_expr();
    let translation = Translator::new(&m, &dialect, &config)
        .translate(&query)
        .unwrap();
    let text = &translation.commands()[0].text;
    assert!(text.contains("FROM \"customers\" AS t0"), "{text}");
    assert!(text.contains("t0.\"city_name\" = @p0"), "{text}");
}

// =============================================================================
// Commit order
// =============================================================================

#[test]
fn test_customer_inserted_before_its_order() {
    let m = mapping();
    let mut session = Session::new(&m, TrackingMode::Snapshot);
    let order = Order {
        id: None,
        customer_id: 1,
        total: 20.0,
        customer: Some(ann()),
    };
    let o = session.insert_entity(&order).unwrap();
    let c = session.insert_entity(&ann()).unwrap();
    assert_eq!(session.commit_order().unwrap(), vec![c, o]);
}

#[test]
fn test_orders_deleted_before_their_customer() {
    let m = mapping();
    let mut session = Session::new(&m, TrackingMode::Snapshot);
    let order = Order {
        id: Some(10),
        customer_id: 1,
        total: 20.0,
        customer: None,
    };
    let customer = Customer {
        orders: vec![order.clone()],
        ..ann()
    };
    let c = session.delete_entity(&customer).unwrap();
    let o = session.delete_entity(&order).unwrap();
    assert_eq!(session.commit_order().unwrap(), vec![o, c]);
}

#[test]
fn test_cycle_names_an_item() {
    let m = mapping();
    let mut session = Session::new(&m, TrackingMode::Snapshot);
    let order = Order {
        id: Some(10),
        customer_id: 1,
        total: 20.0,
        customer: None,
    };
    session
        .delete_entity(&Customer {
            orders: vec![order.clone()],
            ..ann()
        })
        .unwrap();
    session
        .insert_entity(&Customer {
            name: "Ann again".into(),
            ..ann()
        })
        .unwrap();
    session
        .insert_entity(&Order {
            customer: Some(ann()),
            ..order
        })
        .unwrap();
    match session.commit_order() {
        Err(QueryError::DependencyCycle { item }) => assert!(item.starts_with("Customer["), "{item}"),
        other => panic!("Expected a dependency cycle, got {other:?}"),
    }
}
