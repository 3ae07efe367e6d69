#![allow(dead_code)]

use oxide_query_core::ast::{lit, new_record, ExprExt, ExprRef, Query, TreePrinter, Type};
use oxide_query_core::config::TranslatorConfig;
use oxide_query_core::dialect::Dialect;
use oxide_query_core::mapping::{EntityDef, MappingRegistry, MemberDef, StaticMappingSource};
use oxide_query_core::translate::{Translation, Translator};

/// Customers, their orders, and a flat `Item` table for paging tests.
pub fn shop() -> MappingRegistry<StaticMappingSource> {
    MappingRegistry::new(
        StaticMappingSource::new()
            .with(
                EntityDef::new("Customer", "Customers")
                    .member(MemberDef::column("Id", Type::Int).primary_key())
                    .member(MemberDef::column("Name", Type::Text))
                    .member(MemberDef::column("City", Type::Text))
                    .member(MemberDef::association(
                        "Orders",
                        "Order",
                        &["Id"],
                        &["CustomerId"],
                        true,
                    )),
            )
            .with(
                EntityDef::new("Order", "Orders")
                    .member(MemberDef::column("Id", Type::Int).primary_key().generated())
                    .member(MemberDef::column("CustomerId", Type::Int))
                    .member(MemberDef::column("Total", Type::Float))
                    .member(MemberDef::association(
                        "Customer",
                        "Customer",
                        &["CustomerId"],
                        &["Id"],
                        false,
                    )),
            )
            .with(
                EntityDef::new("Item", "Items")
                    .member(MemberDef::column("Id", Type::Int).primary_key())
                    .member(MemberDef::column("Name", Type::Text)),
            ),
    )
}

pub fn translate(dialect: &dyn Dialect, config: &TranslatorConfig, expr: &ExprRef) -> Translation {
    let mapping = shop();
    Translator::new(&mapping, dialect, config)
        .translate(expr)
        .unwrap_or_else(|e| {
            panic!(
                "Failed to translate:\n{}\nError: {e}",
                TreePrinter::new().print(expr)
            )
        })
}

/// Text of the first command.
pub fn sql(dialect: &dyn Dialect, expr: &ExprRef) -> String {
    let t = translate(dialect, &TranslatorConfig::default(), expr);
    match t.commands().into_iter().next() {
        Some(c) => c.text,
        None => panic!("No command for:\n{}", TreePrinter::new().print(expr)),
    }
}

/// Every pass of the pipeline with scope validation on, by name.
pub fn passes(dialect: &dyn Dialect, expr: &ExprRef) -> Vec<(String, ExprRef)> {
    let mapping = shop();
    let config = TranslatorConfig::default().validate_scopes(true);
    let mut out = Vec::new();
    Translator::new(&mapping, dialect, &config)
        .rewrite(expr, &mut |name, tree| out.push((name.to_string(), tree.clone())))
        .unwrap_or_else(|e| {
            panic!(
                "Failed to rewrite:\n{}\nError: {e}",
                TreePrinter::new().print(expr)
            )
        });
    out
}

/// Representative queries over [`shop`].
pub fn queries() -> Vec<(&'static str, ExprRef)> {
    vec![
        (
            "filter",
            Query::from("Customer")
                .filter(|c| c.member("City").eq(lit("Oslo")))
                .into_expr(),
        ),
        (
            "paging",
            Query::from("Customer")
                .order_by(|c| c.member("Name"))
                .skip(10)
                .take(5)
                .into_expr(),
        ),
        (
            "navigation",
            Query::from("Order")
                .filter(|o| o.member("Customer").member("City").eq(lit("Oslo")))
                .into_expr(),
        ),
        (
            "record",
            Query::from("Order")
                .select(|o| {
                    new_record(vec![
                        ("Id".into(), o.member("Id")),
                        ("Total".into(), o.member("Total").mul(lit(2))),
                    ])
                })
                .into_expr(),
        ),
        (
            "join",
            Query::from("Order")
                .join(
                    Query::from("Customer"),
                    |o| o.member("CustomerId"),
                    |c| c.member("Id"),
                    |o, c| {
                        new_record(vec![
                            ("Total".into(), o.member("Total")),
                            ("Name".into(), c.member("Name")),
                        ])
                    },
                )
                .into_expr(),
        ),
        (
            "exists",
            Query::from("Customer")
                .filter(|c| {
                    c.member("Orders")
                        .query()
                        .any_where(|o| o.member("Total").gt(lit(100)))
                })
                .into_expr(),
        ),
        ("count", Query::from("Customer").count()),
        (
            "first",
            Query::from("Customer")
                .order_by(|c| c.member("Name"))
                .first(),
        ),
    ]
}
