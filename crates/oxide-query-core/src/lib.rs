//! # oxide-query-core
//!
//! A relational query translation engine.
//!
//! Queries are written against entities as a tree of query operators
//! (filter, project, join, group, order, skip/take, aggregates). The engine
//! binds that tree against a [`mapping::Mapping`], lowers it into a
//! relational form of selects, joins and projections, rewrites it into the
//! shape a SQL dialect can express, and formats it into parameterized SQL.
//! Alongside the SQL it builds the readers that turn result rows back into
//! entity instances and records.
//!
//! This crate provides:
//! - An immutable expression model with a fluent builder and a tree printer
//! - A binder, a column projector and an ordered pipeline of rewrite passes
//! - Generic, T-SQL and Access dialects and a SQL formatter
//! - A materializer for rows, nested collections and client joins
//! - A most-recently-used plan cache keyed by query shape
//! - A change-tracking [`session::Session`] that orders inserts, updates
//!   and deletes by their foreign-key dependencies
//!
//! No I/O happens here: a [`provider::Executor`] runs the commands.
//!
//! ## Translating a query
//!
//! ```rust
//! use oxide_query_core::ast::{lit, ExprExt, Query, Type};
//! use oxide_query_core::config::TranslatorConfig;
//! use oxide_query_core::dialect::GenericDialect;
//! use oxide_query_core::mapping::{EntityDef, MappingRegistry, MemberDef, StaticMappingSource};
//! use oxide_query_core::translate::Translator;
//!
//! let mapping = MappingRegistry::new(StaticMappingSource::new().with(
//!     EntityDef::new("Customer", "Customers")
//!         .member(MemberDef::column("Id", Type::Int).primary_key())
//!         .member(MemberDef::column("City", Type::Text)),
//! ));
//! let query = Query::from("Customer")
//!     .filter(|c| c.member("City").eq(lit("Oslo")))
//!     .take(10)
//!     .into_expr();
//!
//! let dialect = GenericDialect::new();
//! let config = TranslatorConfig::default();
//! let translation = Translator::new(&mapping, &dialect, &config)
//!     .translate(&query)
//!     .unwrap();
//! let commands = translation.commands();
//! assert!(commands[0].text.contains("LIMIT 10"));
//! ```

pub mod ast;
pub mod cache;
pub mod command;
pub mod compare;
pub mod config;
pub mod dialect;
pub mod entity;
pub mod error;
pub mod format;
pub mod mapping;
pub mod materialize;
pub mod policy;
pub mod provider;
pub mod rewrite;
pub mod session;
pub mod translate;
pub mod value;
pub mod visit;

pub use ast::{Expr, ExprExt, ExprRef, Query};
pub use command::{QueryCommand, QueryParameter};
pub use config::{TrackingMode, TranslatorConfig};
pub use dialect::{AccessDialect, Dialect, GenericDialect, TsqlDialect};
pub use entity::{Entity, FieldValue};
pub use error::{QueryError, Result};
pub use mapping::{EntityDef, Mapping, MappingRegistry, MemberDef};
pub use provider::{Executor, QueryProvider};
pub use session::{Session, TrackState};
pub use translate::{Translation, Translator};
pub use value::{Object, Row, SqlValue, Value};
