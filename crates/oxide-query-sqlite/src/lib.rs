//! # oxide-query-sqlite
//!
//! SQLite support for `oxide-query-core`: a [`SqliteDialect`] for the
//! formatter and a [`SqliteExecutor`] that runs translated commands on an
//! `sqlx` pool.
//!
//! # How SQLite differs from other dialects
//!
//! - **[LIMIT/OFFSET]**: SQLite pages natively, but an `OFFSET` is only
//!   valid after a `LIMIT`. A skip without a take is written
//!   `LIMIT -1 OFFSET n`.
//! - **[last_insert_rowid()]**: generated keys are read back with
//!   `last_insert_rowid()`, which is scoped to the connection. Inserts and
//!   their read-back must run on the same connection, so give the executor
//!   a single-connection pool when entities have generated keys.
//! - **[Date and time]**: there is no timestamp type. Timestamps are stored
//!   as text and date parts are read with `strftime`.
//! - **No `APPLY` and no batches**: correlated sources are joined or loaded
//!   on the client; conditional commands are evaluated on the client.
//! - **[Parameters]**: named parameters are bound by position. The executor
//!   rewrites `@name` placeholders to `?N` before binding.
//!
//! [LIMIT/OFFSET]: https://www.sqlite.org/lang_select.html#limitoffset
//! [last_insert_rowid()]: https://www.sqlite.org/lang_corefunc.html#last_insert_rowid
//! [Date and time]: https://www.sqlite.org/lang_datefunc.html
//! [Parameters]: https://www.sqlite.org/lang_expr.html#varparam
//!
//! ## Example
//!
//! ```rust
//! use oxide_query_core::ast::{ExprExt, Query, Type};
//! use oxide_query_core::config::TranslatorConfig;
//! use oxide_query_core::mapping::{EntityDef, MappingRegistry, MemberDef, StaticMappingSource};
//! use oxide_query_core::translate::Translator;
//! use oxide_query_sqlite::SqliteDialect;
//!
//! let mapping = MappingRegistry::new(StaticMappingSource::new().with(
//!     EntityDef::new("Item", "items")
//!         .member(MemberDef::column("Id", Type::Int).primary_key())
//!         .member(MemberDef::column("Name", Type::Text)),
//! ));
//! let dialect = SqliteDialect::new();
//! let config = TranslatorConfig::default();
//! let query = Query::from("Item")
//!     .order_by(|i| i.member("Id"))
//!     .skip(20)
//!     .into_expr();
//! let translation = Translator::new(&mapping, &dialect, &config)
//!     .translate(&query)
//!     .unwrap();
//! assert!(translation.commands()[0].text.ends_with("LIMIT -1 OFFSET 20"));
//! ```

mod dialect;
pub mod error;
mod executor;

pub use dialect::SqliteDialect;
pub use error::{Result, SqliteError};
pub use executor::SqliteExecutor;
