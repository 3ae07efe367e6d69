//! Node constructors with result-type inference, and a fluent builder over
//! the query algebra.
//!
//! ```rust
//! use oxide_query_core::ast::{lit, ExprExt, Query};
//!
//! let query = Query::from("Customer")
//!     .filter(|c| c.member("City").eq(lit("London")))
//!     .order_by(|c| c.member("Name"))
//!     .take(10);
//! assert!(query.expr().ty().is_sequence());
//! ```

use super::expr::{
    AggregateExpr, AggregateKind, AggregateSubqueryExpr, Aggregator, BinaryOp, ClientJoinExpr,
    ColumnAssignment, ColumnExpr, Expr, ExprKind, ExprRef, Function, InExpr, InSource, JoinExpr,
    JoinKind, OrderExpr, Parameter, ProjectionExpr, SelectExpr, SetOpExpr, TableAlias, TableExpr, UnaryOp,
    VariableDecl,
};
use super::query::{AggregateOp, ElementKind, QueryOp, SetOpKind};
use super::types::Type;
use crate::value::{SqlValue, Value};

/// A literal.
pub fn lit(value: impl Into<Value>) -> ExprRef {
    let value = value.into();
    let ty = Type::of_value(&value);
    Expr::new(ExprKind::Constant(value), ty)
}

/// A typed literal.
#[must_use]
pub fn constant(value: Value, ty: Type) -> ExprRef {
    Expr::new(ExprKind::Constant(value), ty)
}

/// A typed null.
#[must_use]
pub fn null(ty: Type) -> ExprRef {
    Expr::new(ExprKind::Constant(Value::NULL), ty)
}

/// Reference to a lambda parameter.
#[must_use]
pub fn param(p: &Parameter) -> ExprRef {
    Expr::new(ExprKind::Parameter(p.clone()), p.ty.clone())
}

/// Lambda abstraction; its type is the body's type.
#[must_use]
pub fn lambda(params: Vec<Parameter>, body: ExprRef) -> ExprRef {
    let ty = body.ty().clone();
    Expr::new(ExprKind::Lambda { params, body }, ty)
}

/// Unary operation.
#[must_use]
pub fn unary(op: UnaryOp, operand: ExprRef) -> ExprRef {
    let ty = match op {
        UnaryOp::Not if !operand.ty().is_numeric() => Type::Bool,
        _ => operand.ty().clone(),
    };
    Expr::new(ExprKind::Unary { op, operand }, ty)
}

fn binary_type(op: BinaryOp, left: &Type, right: &Type) -> Type {
    if op.is_comparison() || op.is_logical() {
        return Type::Bool;
    }
    match op {
        BinaryOp::Concat => Type::Text,
        BinaryOp::Coalesce => {
            if *left == Type::Unknown {
                right.clone()
            } else {
                left.clone()
            }
        }
        _ if *left == Type::Float || *right == Type::Float => Type::Float,
        _ if *left == Type::Unknown => right.clone(),
        _ => left.clone(),
    }
}

/// Binary operation.
#[must_use]
pub fn binary(op: BinaryOp, left: ExprRef, right: ExprRef) -> ExprRef {
    let ty = binary_type(op, left.ty(), right.ty());
    Expr::new(ExprKind::Binary { op, left, right }, ty)
}

/// `left AND right`.
#[must_use]
pub fn and(left: ExprRef, right: ExprRef) -> ExprRef {
    binary(BinaryOp::And, left, right)
}

/// `left OR right`.
#[must_use]
pub fn or(left: ExprRef, right: ExprRef) -> ExprRef {
    binary(BinaryOp::Or, left, right)
}

/// `NOT operand`.
#[must_use]
pub fn not(operand: ExprRef) -> ExprRef {
    unary(UnaryOp::Not, operand)
}

/// Conjunction of all predicates; `None` when the list is empty.
#[must_use]
pub fn and_all(predicates: impl IntoIterator<Item = ExprRef>) -> Option<ExprRef> {
    predicates.into_iter().reduce(and)
}

/// Conditional value.
#[must_use]
pub fn conditional(test: ExprRef, if_true: ExprRef, if_false: ExprRef) -> ExprRef {
    let ty = if *if_true.ty() == Type::Unknown {
        if_false.ty().clone()
    } else {
        if_true.ty().clone()
    };
    Expr::new(
        ExprKind::Conditional {
            test,
            if_true,
            if_false,
        },
        ty,
    )
}

/// Member access. The type is read from record types, or taken from `ty`.
#[must_use]
pub fn member_typed(object: ExprRef, member: impl Into<String>, ty: Type) -> ExprRef {
    let member = member.into();
    let ty = match object.ty() {
        Type::Record(_) => object.ty().field(&member).cloned().unwrap_or(ty),
        Type::Grouping { key, .. } if member == "Key" => (**key).clone(),
        _ => ty,
    };
    Expr::new(ExprKind::Member { object, member }, ty)
}

/// Function call.
#[must_use]
pub fn call(function: Function, args: Vec<ExprRef>) -> ExprRef {
    let ty = function.result_type(args.first().map(|a| a.ty()));
    Expr::new(ExprKind::Call { function, args }, ty)
}

/// Anonymous record construction.
#[must_use]
pub fn new_record(fields: Vec<(String, ExprRef)>) -> ExprRef {
    let ty = Type::Record(
        fields
            .iter()
            .map(|(n, e)| (n.clone(), e.ty().clone()))
            .collect(),
    );
    Expr::new(ExprKind::New { fields }, ty)
}

/// An algebra operator node.
#[must_use]
pub fn query(op: QueryOp, ty: Type) -> ExprRef {
    Expr::new(ExprKind::Query(op), ty)
}

/// Physical table.
#[must_use]
pub fn table(alias: TableAlias, entity: Option<String>, name: impl Into<String>) -> ExprRef {
    let ty = Type::sequence(
        entity
            .clone()
            .map_or_else(|| Type::Record(Vec::new()), Type::Entity),
    );
    Expr::new(
        ExprKind::Table(TableExpr {
            alias,
            entity,
            name: name.into(),
        }),
        ty,
    )
}

/// Column of an in-scope source.
#[must_use]
pub fn column(alias: TableAlias, name: impl Into<String>, ty: Type) -> ExprRef {
    Expr::new(
        ExprKind::Column(ColumnExpr {
            alias,
            name: name.into(),
        }),
        ty,
    )
}

/// Query block.
#[must_use]
pub fn select(select: SelectExpr) -> ExprRef {
    let ty = Type::sequence(select.row_type());
    Expr::new(ExprKind::Select(select), ty)
}

/// Join of two sources.
#[must_use]
pub fn join(kind: JoinKind, left: ExprRef, right: ExprRef, condition: Option<ExprRef>) -> ExprRef {
    Expr::new(
        ExprKind::Join(JoinExpr {
            kind,
            left,
            right,
            condition,
        }),
        Type::Void,
    )
}

/// Set combination of two selects.
#[must_use]
pub fn set_operation(alias: TableAlias, kind: SetOpKind, left: ExprRef, right: ExprRef) -> ExprRef {
    let ty = left.ty().clone();
    Expr::new(
        ExprKind::SetOp(SetOpExpr {
            alias,
            kind,
            left,
            right,
        }),
        ty,
    )
}

/// Aggregate within a group.
#[must_use]
pub fn aggregate(
    kind: AggregateKind,
    argument: Option<ExprRef>,
    distinct: bool,
    ty: Type,
) -> ExprRef {
    Expr::new(
        ExprKind::Aggregate(AggregateExpr {
            kind,
            argument,
            distinct,
        }),
        ty,
    )
}

/// Aggregate placeholder pending relocation into its grouping select.
#[must_use]
pub fn aggregate_subquery(
    group_by_alias: TableAlias,
    aggregate_in_group: ExprRef,
    subquery: ExprRef,
) -> ExprRef {
    let ty = aggregate_in_group.ty().clone();
    Expr::new(
        ExprKind::AggregateSubquery(AggregateSubqueryExpr {
            group_by_alias,
            aggregate_in_group,
            subquery,
        }),
        ty,
    )
}

/// Single-value subquery over a one-column select.
#[must_use]
pub fn scalar_subquery(select: ExprRef) -> ExprRef {
    let ty = select
        .as_select()
        .and_then(|s| s.columns.first())
        .map_or(Type::Unknown, |c| c.ty.clone());
    Expr::new(ExprKind::Scalar(select), ty)
}

/// `EXISTS (select)`.
#[must_use]
pub fn exists(select: ExprRef) -> ExprRef {
    Expr::new(ExprKind::Exists(select), Type::Bool)
}

/// `expr IN (select)`.
#[must_use]
pub fn in_select(expr: ExprRef, select: ExprRef) -> ExprRef {
    Expr::new(
        ExprKind::In(InExpr {
            expr,
            source: InSource::Select(select),
        }),
        Type::Bool,
    )
}

/// `expr IN (v1, v2, ...)`.
#[must_use]
pub fn in_values(expr: ExprRef, values: Vec<ExprRef>) -> ExprRef {
    Expr::new(
        ExprKind::In(InExpr {
            expr,
            source: InSource::Values(values),
        }),
        Type::Bool,
    )
}

/// `expr IS NULL`.
#[must_use]
pub fn is_null(expr: ExprRef) -> ExprRef {
    Expr::new(ExprKind::IsNull(expr), Type::Bool)
}

/// `expr BETWEEN lower AND upper`.
#[must_use]
pub fn between(expr: ExprRef, lower: ExprRef, upper: ExprRef) -> ExprRef {
    Expr::new(ExprKind::Between { expr, lower, upper }, Type::Bool)
}

/// `ROW_NUMBER() OVER (ORDER BY ...)`.
#[must_use]
pub fn row_number(order_by: Vec<OrderExpr>) -> ExprRef {
    Expr::new(ExprKind::RowNumber { order_by }, Type::Int)
}

/// Select plus projector.
#[must_use]
pub fn projection(select: ExprRef, projector: ExprRef, aggregator: Option<Aggregator>) -> ExprRef {
    let ty = if aggregator.is_some() {
        projector.ty().clone()
    } else {
        Type::sequence(projector.ty().clone())
    };
    Expr::new(
        ExprKind::Projection(ProjectionExpr {
            select,
            projector,
            aggregator,
        }),
        ty,
    )
}

/// Query parameter.
#[must_use]
pub fn named_value(name: impl Into<String>, value: ExprRef) -> ExprRef {
    let ty = value.ty().clone();
    Expr::new(
        ExprKind::NamedValue {
            name: name.into(),
            value,
        },
        ty,
    )
}

/// Client-side keyed join.
#[must_use]
pub fn client_join(
    projection: ExprRef,
    outer_key: Vec<ExprRef>,
    inner_key: Vec<ExprRef>,
) -> ExprRef {
    let ty = projection.ty().clone();
    Expr::new(
        ExprKind::ClientJoin(ClientJoinExpr {
            projection,
            outer_key,
            inner_key,
        }),
        ty,
    )
}

/// Value from the right side of an outer join.
#[must_use]
pub fn outer_joined(test: ExprRef, expr: ExprRef) -> ExprRef {
    let ty = expr.ty().clone();
    Expr::new(ExprKind::OuterJoined { test, expr }, ty)
}

/// Entity instance built from a member record.
#[must_use]
pub fn entity(name: impl Into<String>, expr: ExprRef) -> ExprRef {
    let name = name.into();
    let ty = Type::Entity(name.clone());
    Expr::new(ExprKind::Entity { entity: name, expr }, ty)
}

/// `INSERT`.
#[must_use]
pub fn insert(table: ExprRef, assignments: Vec<ColumnAssignment>) -> ExprRef {
    Expr::new(ExprKind::Insert { table, assignments }, Type::Int)
}

/// `UPDATE`.
#[must_use]
pub fn update(table: ExprRef, where_clause: ExprRef, assignments: Vec<ColumnAssignment>) -> ExprRef {
    Expr::new(
        ExprKind::Update {
            table,
            where_clause,
            assignments,
        },
        Type::Int,
    )
}

/// `DELETE`.
#[must_use]
pub fn delete(table: ExprRef, where_clause: Option<ExprRef>) -> ExprRef {
    Expr::new(
        ExprKind::Delete {
            table,
            where_clause,
        },
        Type::Int,
    )
}

/// Command sequence; its type is the last command's.
#[must_use]
pub fn block(commands: Vec<ExprRef>) -> ExprRef {
    let ty = commands.last().map_or(Type::Void, |c| c.ty().clone());
    Expr::new(ExprKind::Block(commands), ty)
}

/// Conditional command.
#[must_use]
pub fn if_command(check: ExprRef, if_true: ExprRef, if_false: Option<ExprRef>) -> ExprRef {
    let ty = if_true.ty().clone();
    Expr::new(
        ExprKind::If {
            check,
            if_true,
            if_false,
        },
        ty,
    )
}

/// Variable declarations.
#[must_use]
pub fn declaration(variables: Vec<VariableDecl>, source: ExprRef) -> ExprRef {
    Expr::new(ExprKind::Declaration { variables, source }, Type::Void)
}

/// Variable reference.
#[must_use]
pub fn variable(name: impl Into<String>, ty: Type) -> ExprRef {
    Expr::new(ExprKind::Variable { name: name.into() }, ty)
}

/// Fluent construction of scalar expressions.
pub trait ExprExt {
    /// Member access.
    fn member(&self, name: &str) -> ExprRef;
    /// `self = other`.
    fn eq(&self, other: ExprRef) -> ExprRef;
    /// `self <> other`.
    fn ne(&self, other: ExprRef) -> ExprRef;
    /// `self < other`.
    fn lt(&self, other: ExprRef) -> ExprRef;
    /// `self <= other`.
    fn le(&self, other: ExprRef) -> ExprRef;
    /// `self > other`.
    fn gt(&self, other: ExprRef) -> ExprRef;
    /// `self >= other`.
    fn ge(&self, other: ExprRef) -> ExprRef;
    /// `self AND other`.
    fn and(&self, other: ExprRef) -> ExprRef;
    /// `self OR other`.
    fn or(&self, other: ExprRef) -> ExprRef;
    /// `self + other`.
    fn add(&self, other: ExprRef) -> ExprRef;
    /// `self * other`.
    fn mul(&self, other: ExprRef) -> ExprRef;
    /// Treats `self` as a sequence for nested query operators.
    fn query(&self) -> Query;
}

impl ExprExt for ExprRef {
    fn member(&self, name: &str) -> ExprRef {
        member_typed(self.clone(), name, Type::Unknown)
    }

    fn eq(&self, other: ExprRef) -> ExprRef {
        binary(BinaryOp::Eq, self.clone(), other)
    }

    fn ne(&self, other: ExprRef) -> ExprRef {
        binary(BinaryOp::NotEq, self.clone(), other)
    }

    fn lt(&self, other: ExprRef) -> ExprRef {
        binary(BinaryOp::Lt, self.clone(), other)
    }

    fn le(&self, other: ExprRef) -> ExprRef {
        binary(BinaryOp::LtEq, self.clone(), other)
    }

    fn gt(&self, other: ExprRef) -> ExprRef {
        binary(BinaryOp::Gt, self.clone(), other)
    }

    fn ge(&self, other: ExprRef) -> ExprRef {
        binary(BinaryOp::GtEq, self.clone(), other)
    }

    fn and(&self, other: ExprRef) -> ExprRef {
        and(self.clone(), other)
    }

    fn or(&self, other: ExprRef) -> ExprRef {
        or(self.clone(), other)
    }

    fn add(&self, other: ExprRef) -> ExprRef {
        binary(BinaryOp::Add, self.clone(), other)
    }

    fn mul(&self, other: ExprRef) -> ExprRef {
        binary(BinaryOp::Mul, self.clone(), other)
    }

    fn query(&self) -> Query {
        Query::over(self.clone())
    }
}

fn lambda1(ty: Type, name: &str, f: impl FnOnce(ExprRef) -> ExprRef) -> ExprRef {
    let p = Parameter::new(name, ty);
    let body = f(param(&p));
    lambda(vec![p], body)
}

fn lambda2(
    first: Type,
    second: Type,
    f: impl FnOnce(ExprRef, ExprRef) -> ExprRef,
) -> ExprRef {
    let a = Parameter::new("a", first);
    let b = Parameter::new("b", second);
    let body = f(param(&a), param(&b));
    lambda(vec![a, b], body)
}

/// A sequence-valued algebra expression under construction.
#[derive(Debug, Clone)]
#[must_use]
pub struct Query {
    expr: ExprRef,
}

impl Query {
    /// All instances of `entity`.
    pub fn from(entity: &str) -> Self {
        Self {
            expr: query(
                QueryOp::Source {
                    entity: entity.to_string(),
                },
                Type::sequence(Type::Entity(entity.to_string())),
            ),
        }
    }

    /// Wraps an existing sequence-valued expression.
    pub const fn over(expr: ExprRef) -> Self {
        Self { expr }
    }

    /// The algebra tree built so far.
    #[must_use]
    pub const fn expr(&self) -> &ExprRef {
        &self.expr
    }

    /// Consumes the builder.
    #[must_use]
    pub fn into_expr(self) -> ExprRef {
        self.expr
    }

    fn element_type(&self) -> Type {
        self.expr.ty().element().cloned().unwrap_or(Type::Unknown)
    }

    fn wrap(op: QueryOp, ty: Type) -> Self {
        Self {
            expr: query(op, ty),
        }
    }

    /// `Where`.
    pub fn filter(self, f: impl FnOnce(ExprRef) -> ExprRef) -> Self {
        let predicate = lambda1(self.element_type(), "x", f);
        let ty = self.expr.ty().clone();
        Self::wrap(
            QueryOp::Where {
                source: self.expr,
                predicate,
            },
            ty,
        )
    }

    /// `Select`.
    pub fn select(self, f: impl FnOnce(ExprRef) -> ExprRef) -> Self {
        let selector = lambda1(self.element_type(), "x", f);
        let ty = Type::sequence(selector.ty().clone());
        Self::wrap(
            QueryOp::Select {
                source: self.expr,
                selector,
            },
            ty,
        )
    }

    /// `SelectMany` with a result selector.
    pub fn select_many(
        self,
        collection: impl FnOnce(ExprRef) -> ExprRef,
        result: impl FnOnce(ExprRef, ExprRef) -> ExprRef,
    ) -> Self {
        let collection = lambda1(self.element_type(), "x", collection);
        let inner = collection.ty().element().cloned().unwrap_or(Type::Unknown);
        let result = lambda2(self.element_type(), inner, result);
        let ty = Type::sequence(result.ty().clone());
        Self::wrap(
            QueryOp::SelectMany {
                source: self.expr,
                collection,
                result: Some(result),
            },
            ty,
        )
    }

    /// Inner equi-join.
    pub fn join(
        self,
        inner: Self,
        outer_key: impl FnOnce(ExprRef) -> ExprRef,
        inner_key: impl FnOnce(ExprRef) -> ExprRef,
        result: impl FnOnce(ExprRef, ExprRef) -> ExprRef,
    ) -> Self {
        let outer_key = lambda1(self.element_type(), "o", outer_key);
        let inner_key = lambda1(inner.element_type(), "i", inner_key);
        let result = lambda2(self.element_type(), inner.element_type(), result);
        let ty = Type::sequence(result.ty().clone());
        Self::wrap(
            QueryOp::Join {
                outer: self.expr,
                inner: inner.expr,
                outer_key,
                inner_key,
                result,
            },
            ty,
        )
    }

    /// Group join.
    pub fn group_join(
        self,
        inner: Self,
        outer_key: impl FnOnce(ExprRef) -> ExprRef,
        inner_key: impl FnOnce(ExprRef) -> ExprRef,
        result: impl FnOnce(ExprRef, ExprRef) -> ExprRef,
    ) -> Self {
        let outer_key = lambda1(self.element_type(), "o", outer_key);
        let inner_key = lambda1(inner.element_type(), "i", inner_key);
        let result = lambda2(self.element_type(), inner.expr.ty().clone(), result);
        let ty = Type::sequence(result.ty().clone());
        Self::wrap(
            QueryOp::GroupJoin {
                outer: self.expr,
                inner: inner.expr,
                outer_key,
                inner_key,
                result,
            },
            ty,
        )
    }

    fn ordering(self, f: impl FnOnce(ExprRef) -> ExprRef, descending: bool, then: bool) -> Self {
        let key = lambda1(self.element_type(), "x", f);
        let ty = self.expr.ty().clone();
        Self::wrap(
            QueryOp::OrderBy {
                source: self.expr,
                key,
                descending,
                then,
            },
            ty,
        )
    }

    /// `OrderBy`.
    pub fn order_by(self, f: impl FnOnce(ExprRef) -> ExprRef) -> Self {
        self.ordering(f, false, false)
    }

    /// `OrderByDescending`.
    pub fn order_by_descending(self, f: impl FnOnce(ExprRef) -> ExprRef) -> Self {
        self.ordering(f, true, false)
    }

    /// `ThenBy`.
    pub fn then_by(self, f: impl FnOnce(ExprRef) -> ExprRef) -> Self {
        self.ordering(f, false, true)
    }

    /// `ThenByDescending`.
    pub fn then_by_descending(self, f: impl FnOnce(ExprRef) -> ExprRef) -> Self {
        self.ordering(f, true, true)
    }

    /// `GroupBy` yielding groupings.
    pub fn group_by(self, key: impl FnOnce(ExprRef) -> ExprRef) -> Self {
        let element = self.element_type();
        let key = lambda1(element.clone(), "x", key);
        let ty = Type::sequence(Type::Grouping {
            key: Box::new(key.ty().clone()),
            element: Box::new(element),
        });
        Self::wrap(
            QueryOp::GroupBy {
                source: self.expr,
                key,
                element: None,
                result: None,
            },
            ty,
        )
    }

    /// `GroupBy` with a result selector over `(key, elements)`.
    pub fn group_by_result(
        self,
        key: impl FnOnce(ExprRef) -> ExprRef,
        result: impl FnOnce(ExprRef, ExprRef) -> ExprRef,
    ) -> Self {
        let element = self.element_type();
        let key = lambda1(element.clone(), "x", key);
        let result = lambda2(key.ty().clone(), Type::sequence(element), result);
        let ty = Type::sequence(result.ty().clone());
        Self::wrap(
            QueryOp::GroupBy {
                source: self.expr,
                key,
                element: None,
                result: Some(result),
            },
            ty,
        )
    }

    /// `Distinct`.
    pub fn distinct(self) -> Self {
        let ty = self.expr.ty().clone();
        Self::wrap(QueryOp::Distinct { source: self.expr }, ty)
    }

    /// `Reverse`.
    pub fn reverse(self) -> Self {
        let ty = self.expr.ty().clone();
        Self::wrap(QueryOp::Reverse { source: self.expr }, ty)
    }

    /// `Skip`.
    pub fn skip(self, count: i64) -> Self {
        let ty = self.expr.ty().clone();
        Self::wrap(
            QueryOp::Skip {
                source: self.expr,
                count: lit(count),
            },
            ty,
        )
    }

    /// `Take`.
    pub fn take(self, count: i64) -> Self {
        let ty = self.expr.ty().clone();
        Self::wrap(
            QueryOp::Take {
                source: self.expr,
                count: lit(count),
            },
            ty,
        )
    }

    /// `DefaultIfEmpty`.
    pub fn default_if_empty(self) -> Self {
        let ty = self.expr.ty().clone();
        Self::wrap(QueryOp::DefaultIfEmpty { source: self.expr }, ty)
    }

    fn set_op(self, kind: SetOpKind, other: Self) -> Self {
        let ty = self.expr.ty().clone();
        Self::wrap(
            QueryOp::SetOp {
                kind,
                left: self.expr,
                right: other.expr,
            },
            ty,
        )
    }

    /// `Union`.
    pub fn union(self, other: Self) -> Self {
        self.set_op(SetOpKind::Union, other)
    }

    /// `Concat`.
    pub fn concat(self, other: Self) -> Self {
        self.set_op(SetOpKind::Concat, other)
    }

    /// `Intersect`.
    pub fn intersect(self, other: Self) -> Self {
        self.set_op(SetOpKind::Intersect, other)
    }

    /// `Except`.
    pub fn except(self, other: Self) -> Self {
        self.set_op(SetOpKind::Except, other)
    }

    fn element(self, kind: ElementKind, predicate: Option<ExprRef>) -> ExprRef {
        let ty = self.element_type();
        query(
            QueryOp::Element {
                source: self.expr,
                kind,
                predicate,
            },
            ty,
        )
    }

    /// `First`.
    #[must_use]
    pub fn first(self) -> ExprRef {
        self.element(ElementKind::First, None)
    }

    /// `FirstOrDefault`.
    #[must_use]
    pub fn first_or_default(self) -> ExprRef {
        self.element(ElementKind::FirstOrDefault, None)
    }

    /// `First` with a predicate.
    #[must_use]
    pub fn first_where(self, f: impl FnOnce(ExprRef) -> ExprRef) -> ExprRef {
        let predicate = lambda1(self.element_type(), "x", f);
        self.element(ElementKind::First, Some(predicate))
    }

    /// `Single`.
    #[must_use]
    pub fn single(self) -> ExprRef {
        self.element(ElementKind::Single, None)
    }

    /// `SingleOrDefault`.
    #[must_use]
    pub fn single_or_default(self) -> ExprRef {
        self.element(ElementKind::SingleOrDefault, None)
    }

    /// `Last`.
    #[must_use]
    pub fn last(self) -> ExprRef {
        self.element(ElementKind::Last, None)
    }

    /// `LastOrDefault`.
    #[must_use]
    pub fn last_or_default(self) -> ExprRef {
        self.element(ElementKind::LastOrDefault, None)
    }

    fn aggregate_op(self, op: AggregateOp, selector: Option<ExprRef>) -> ExprRef {
        let ty = match op {
            AggregateOp::Count => Type::Int,
            AggregateOp::Average => Type::Float,
            _ => selector
                .as_ref()
                .map_or_else(|| self.element_type(), |s| s.ty().clone()),
        };
        query(
            QueryOp::Aggregate {
                source: self.expr,
                op,
                selector,
            },
            ty,
        )
    }

    /// `Count`.
    #[must_use]
    pub fn count(self) -> ExprRef {
        self.aggregate_op(AggregateOp::Count, None)
    }

    /// `Count` with a predicate.
    #[must_use]
    pub fn count_where(self, f: impl FnOnce(ExprRef) -> ExprRef) -> ExprRef {
        self.filter(f).count()
    }

    /// `Sum`.
    #[must_use]
    pub fn sum(self, f: impl FnOnce(ExprRef) -> ExprRef) -> ExprRef {
        let s = lambda1(self.element_type(), "x", f);
        self.aggregate_op(AggregateOp::Sum, Some(s))
    }

    /// `Min`.
    #[must_use]
    pub fn min(self, f: impl FnOnce(ExprRef) -> ExprRef) -> ExprRef {
        let s = lambda1(self.element_type(), "x", f);
        self.aggregate_op(AggregateOp::Min, Some(s))
    }

    /// `Max`.
    #[must_use]
    pub fn max(self, f: impl FnOnce(ExprRef) -> ExprRef) -> ExprRef {
        let s = lambda1(self.element_type(), "x", f);
        self.aggregate_op(AggregateOp::Max, Some(s))
    }

    /// `Average`.
    #[must_use]
    pub fn average(self, f: impl FnOnce(ExprRef) -> ExprRef) -> ExprRef {
        let s = lambda1(self.element_type(), "x", f);
        self.aggregate_op(AggregateOp::Average, Some(s))
    }

    /// `Any`.
    #[must_use]
    pub fn any(self) -> ExprRef {
        query(
            QueryOp::Any {
                source: self.expr,
                predicate: None,
            },
            Type::Bool,
        )
    }

    /// `Any` with a predicate.
    #[must_use]
    pub fn any_where(self, f: impl FnOnce(ExprRef) -> ExprRef) -> ExprRef {
        let predicate = lambda1(self.element_type(), "x", f);
        query(
            QueryOp::Any {
                source: self.expr,
                predicate: Some(predicate),
            },
            Type::Bool,
        )
    }

    /// `All`.
    #[must_use]
    pub fn all(self, f: impl FnOnce(ExprRef) -> ExprRef) -> ExprRef {
        let predicate = lambda1(self.element_type(), "x", f);
        query(
            QueryOp::All {
                source: self.expr,
                predicate,
            },
            Type::Bool,
        )
    }

    /// `Contains`.
    #[must_use]
    pub fn contains(self, item: ExprRef) -> ExprRef {
        query(
            QueryOp::Contains {
                source: self.expr,
                item,
            },
            Type::Bool,
        )
    }
}

/// A list constant, usable as the source of `contains`.
#[must_use]
pub fn list(values: Vec<SqlValue>) -> ExprRef {
    let element = values
        .first()
        .map_or(Type::Unknown, Type::of_sql_value);
    constant(
        Value::List(values.into_iter().map(Value::Scalar).collect()),
        Type::sequence(element),
    )
}
