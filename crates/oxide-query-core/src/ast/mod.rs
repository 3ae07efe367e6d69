//! Expression model: typed, immutable nodes covering the query algebra,
//! the relational form the binder lowers it to, and write commands.

mod build;
mod display;
mod expr;
mod query;
mod types;

pub use build::{
    aggregate, aggregate_subquery, and, and_all, between, binary, block, call, client_join,
    column, conditional, constant, declaration, delete, entity, exists, if_command, in_select,
    in_values, insert, is_null, join, lambda, list, lit, member_typed, named_value, new_record,
    not, null, or, outer_joined, param, projection, query, row_number, scalar_subquery, select,
    set_operation,
    table, unary, update, variable, ExprExt, Query,
};
pub use display::TreePrinter;
pub use expr::{
    same, AggregateExpr, AggregateKind, AggregateSubqueryExpr, Aggregator, BinaryOp,
    ClientJoinExpr, ColumnAssignment, ColumnDecl, ColumnExpr, Expr, ExprKind, ExprRef, Function,
    InExpr, InSource, JoinExpr, JoinKind, OrderExpr, OrderKind, Parameter, ProjectionExpr,
    SelectExpr, SetOpExpr, TableAlias, TableExpr, UnaryOp, VariableDecl, unique_column_name,
};
pub use query::{AggregateOp, ElementKind, QueryOp, SetOpKind};
pub use types::Type;
