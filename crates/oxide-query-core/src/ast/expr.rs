//! Expression nodes.
//!
//! Nodes are immutable and shared through [`ExprRef`]. A rewrite that leaves
//! every child untouched returns the very same `Arc`, so `Arc::ptr_eq` is
//! the no-op test used by every pass.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::query::{QueryOp, SetOpKind};
use super::types::Type;
use crate::value::Value;

/// Shared handle to an immutable expression node.
pub type ExprRef = Arc<Expr>;

static NEXT_ALIAS: AtomicU64 = AtomicU64::new(1);
static NEXT_PARAM: AtomicU64 = AtomicU64::new(1);

/// Identity of one relational source (table or subquery) within a tree.
///
/// Aliases compare by identity, never by the shape of what they name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableAlias(u64);

impl TableAlias {
    /// Mints a fresh alias.
    #[must_use]
    pub fn new() -> Self {
        Self(NEXT_ALIAS.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw identity, for diagnostics.
    #[must_use]
    pub const fn id(self) -> u64 {
        self.0
    }
}

impl Default for TableAlias {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TableAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a{}", self.0)
    }
}

/// A lambda parameter. Bound by a [`ExprKind::Lambda`], referenced by
/// [`ExprKind::Parameter`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Parameter {
    /// Identity used for binding.
    pub id: u64,
    /// Display name.
    pub name: String,
    /// Type of the bound value.
    pub ty: Type,
}

impl Parameter {
    /// Mints a fresh parameter.
    #[must_use]
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            id: NEXT_PARAM.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            ty,
        }
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,

    // Comparison
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,

    // Logical
    And,
    Or,

    // String
    Concat,

    // Bitwise
    BitAnd,
    BitOr,
    BitXor,
    LeftShift,
    RightShift,

    /// First non-null operand.
    Coalesce,
}

impl BinaryOp {
    /// Returns the SQL representation of the operator.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Eq => "=",
            Self::NotEq => "<>",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
            Self::And => "AND",
            Self::Or => "OR",
            Self::Concat => "||",
            Self::BitAnd => "&",
            Self::BitOr => "|",
            Self::BitXor => "^",
            Self::LeftShift => "<<",
            Self::RightShift => ">>",
            Self::Coalesce => "COALESCE",
        }
    }

    /// Returns the precedence of the operator (higher = binds tighter).
    #[must_use]
    pub const fn precedence(&self) -> u8 {
        match self {
            Self::Or => 1,
            Self::And => 2,
            Self::Eq | Self::NotEq | Self::Lt | Self::LtEq | Self::Gt | Self::GtEq => 3,
            Self::BitOr | Self::BitXor => 5,
            Self::BitAnd => 6,
            Self::LeftShift | Self::RightShift => 7,
            Self::Add | Self::Sub | Self::Concat => 8,
            Self::Mul | Self::Div | Self::Mod => 9,
            Self::Coalesce => 10,
        }
    }

    /// Comparison operators produce booleans from non-boolean operands.
    #[must_use]
    pub const fn is_comparison(&self) -> bool {
        matches!(
            self,
            Self::Eq | Self::NotEq | Self::Lt | Self::LtEq | Self::Gt | Self::GtEq
        )
    }

    /// `AND` and `OR`.
    #[must_use]
    pub const fn is_logical(&self) -> bool {
        matches!(self, Self::And | Self::Or)
    }

    /// The operator with swapped operands, for comparisons.
    #[must_use]
    pub const fn flipped(&self) -> Self {
        match self {
            Self::Lt => Self::Gt,
            Self::LtEq => Self::GtEq,
            Self::Gt => Self::Lt,
            Self::GtEq => Self::LtEq,
            other => *other,
        }
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    /// Negation (-)
    Neg,
    /// Logical NOT
    Not,
    /// Bitwise NOT (~)
    BitNot,
}

impl UnaryOp {
    /// Returns the SQL representation of the operator.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Neg => "-",
            Self::Not => "NOT",
            Self::BitNot => "~",
        }
    }
}

/// Scalar functions understood by the formatter. Dialects translate them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Function {
    // String
    Length,
    Upper,
    Lower,
    Trim,
    Substring,
    Replace,
    IndexOf,
    Contains,
    StartsWith,
    EndsWith,

    // Math
    Abs,
    Round,
    Floor,
    Ceiling,
    Power,
    Sqrt,
    Sign,

    // Date parts
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
    Now,

    /// Identity value generated by the last insert on this connection.
    GeneratedIdentity,
}

impl Function {
    /// Canonical name, used for display and generic rendering.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Length => "LENGTH",
            Self::Upper => "UPPER",
            Self::Lower => "LOWER",
            Self::Trim => "TRIM",
            Self::Substring => "SUBSTRING",
            Self::Replace => "REPLACE",
            Self::IndexOf => "INDEXOF",
            Self::Contains => "CONTAINS",
            Self::StartsWith => "STARTSWITH",
            Self::EndsWith => "ENDSWITH",
            Self::Abs => "ABS",
            Self::Round => "ROUND",
            Self::Floor => "FLOOR",
            Self::Ceiling => "CEILING",
            Self::Power => "POWER",
            Self::Sqrt => "SQRT",
            Self::Sign => "SIGN",
            Self::Year => "YEAR",
            Self::Month => "MONTH",
            Self::Day => "DAY",
            Self::Hour => "HOUR",
            Self::Minute => "MINUTE",
            Self::Second => "SECOND",
            Self::Now => "NOW",
            Self::GeneratedIdentity => "IDENTITY",
        }
    }

    /// Result type given the first argument's type.
    #[must_use]
    pub fn result_type(&self, first: Option<&Type>) -> Type {
        match self {
            Self::Length
            | Self::IndexOf
            | Self::Year
            | Self::Month
            | Self::Day
            | Self::Hour
            | Self::Minute
            | Self::Second
            | Self::Sign
            | Self::GeneratedIdentity => Type::Int,
            Self::Upper | Self::Lower | Self::Trim | Self::Substring | Self::Replace => Type::Text,
            Self::Contains | Self::StartsWith | Self::EndsWith => Type::Bool,
            Self::Power | Self::Sqrt => Type::Float,
            Self::Now => Type::DateTime,
            Self::Abs | Self::Round | Self::Floor | Self::Ceiling => {
                first.cloned().unwrap_or(Type::Float)
            }
        }
    }
}

/// Join kinds of the relational model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinKind {
    /// Cartesian product.
    CrossJoin,
    /// Inner join with a condition.
    InnerJoin,
    /// Correlated cross apply (lateral join).
    CrossApply,
    /// Correlated outer apply (left lateral join).
    OuterApply,
    /// Left outer join with a condition.
    LeftOuter,
}

impl JoinKind {
    /// Returns true for the two apply kinds.
    #[must_use]
    pub const fn is_apply(&self) -> bool {
        matches!(self, Self::CrossApply | Self::OuterApply)
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderKind {
    /// Ascending.
    Ascending,
    /// Descending.
    Descending,
}

impl OrderKind {
    /// The opposite direction.
    #[must_use]
    pub const fn reversed(self) -> Self {
        match self {
            Self::Ascending => Self::Descending,
            Self::Descending => Self::Ascending,
        }
    }
}

/// One ORDER BY term.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderExpr {
    /// Direction.
    pub kind: OrderKind,
    /// Sort key.
    pub expr: ExprRef,
}

impl OrderExpr {
    /// Creates an ordering.
    #[must_use]
    pub const fn new(kind: OrderKind, expr: ExprRef) -> Self {
        Self { kind, expr }
    }
}

/// A declared output column of a select.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDecl {
    /// Column name, unique within its select.
    pub name: String,
    /// Computed expression.
    pub expr: ExprRef,
    /// Column type.
    pub ty: Type,
}

impl ColumnDecl {
    /// Declares a column with the expression's type.
    #[must_use]
    pub fn new(name: impl Into<String>, expr: ExprRef) -> Self {
        let ty = expr.ty().clone();
        Self {
            name: name.into(),
            expr,
            ty,
        }
    }
}

/// `base`, or `base` followed by the smallest integer from 1 that is not
/// already declared.
#[must_use]
pub fn unique_column_name(columns: &[ColumnDecl], base: &str) -> String {
    let taken = |n: &str| columns.iter().any(|c| c.name == n);
    if !taken(base) {
        return base.to_string();
    }
    (1..)
        .map(|i| format!("{base}{i}"))
        .find(|n| !taken(n))
        .unwrap_or_else(|| base.to_string())
}

/// Aggregate functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateKind {
    Count,
    Sum,
    Min,
    Max,
    Average,
}

impl AggregateKind {
    /// SQL function name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Count => "COUNT",
            Self::Sum => "SUM",
            Self::Min => "MIN",
            Self::Max => "MAX",
            Self::Average => "AVG",
        }
    }
}

/// Shape the caller wants a projected row sequence coerced into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Aggregator {
    /// First element; error when empty.
    First,
    /// First element or the type's default.
    FirstOrDefault,
    /// Exactly one element.
    Single,
    /// Zero or one element.
    SingleOrDefault,
    /// Single aggregate value; empty or null yields the default.
    Scalar,
}

/// A physical table reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableExpr {
    /// Alias declared by this source.
    pub alias: TableAlias,
    /// Entity mapped onto this table, if any.
    pub entity: Option<String>,
    /// Physical table name.
    pub name: String,
}

/// A reference to a column of an in-scope source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnExpr {
    /// Alias of the declaring source.
    pub alias: TableAlias,
    /// Column name in that source.
    pub name: String,
}

/// One relational query block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectExpr {
    /// Alias this select declares for its output.
    pub alias: TableAlias,
    /// Output columns.
    pub columns: Vec<ColumnDecl>,
    /// Source relation.
    pub from: Option<ExprRef>,
    /// Filter predicate.
    pub where_clause: Option<ExprRef>,
    /// Ordering.
    pub order_by: Vec<OrderExpr>,
    /// Grouping keys.
    pub group_by: Vec<ExprRef>,
    /// `SELECT DISTINCT`.
    pub distinct: bool,
    /// Rows to skip.
    pub skip: Option<ExprRef>,
    /// Rows to take.
    pub take: Option<ExprRef>,
    /// Result order is the reverse of `order_by`.
    pub reverse: bool,
}

impl SelectExpr {
    /// A bare `SELECT <columns> FROM <from>`.
    #[must_use]
    pub const fn new(alias: TableAlias, columns: Vec<ColumnDecl>, from: Option<ExprRef>) -> Self {
        Self {
            alias,
            columns,
            from,
            where_clause: None,
            order_by: Vec::new(),
            group_by: Vec::new(),
            distinct: false,
            skip: None,
            take: None,
            reverse: false,
        }
    }

    /// Looks up a declared column.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnDecl> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Row type produced by this select.
    #[must_use]
    pub fn row_type(&self) -> Type {
        Type::Record(
            self.columns
                .iter()
                .map(|c| (c.name.clone(), c.ty.clone()))
                .collect(),
        )
    }
}

/// A join of two sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinExpr {
    /// Join kind.
    pub kind: JoinKind,
    /// Left source.
    pub left: ExprRef,
    /// Right source.
    pub right: ExprRef,
    /// Join condition; `None` for cross joins and applies.
    pub condition: Option<ExprRef>,
}

/// An aggregate computed over the rows of a group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateExpr {
    /// Function.
    pub kind: AggregateKind,
    /// Argument; `None` means `COUNT(*)`.
    pub argument: Option<ExprRef>,
    /// `DISTINCT` argument.
    pub distinct: bool,
}

/// An aggregate awaiting relocation into the select that groups it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateSubqueryExpr {
    /// Alias of the grouping select.
    pub group_by_alias: TableAlias,
    /// The aggregate as it reads inside the grouping select.
    pub aggregate_in_group: ExprRef,
    /// Equivalent correlated scalar subquery.
    pub subquery: ExprRef,
}

/// Membership source of an `IN` test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InSource {
    /// A single-column select.
    Select(ExprRef),
    /// A literal list.
    Values(Vec<ExprRef>),
}

/// `expr IN (...)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InExpr {
    /// Tested value.
    pub expr: ExprRef,
    /// Candidates.
    pub source: InSource,
}

/// Two selects combined by a set operator, usable as a FROM source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetOpExpr {
    /// Alias this source declares.
    pub alias: TableAlias,
    /// Combinator.
    pub kind: SetOpKind,
    /// Left select.
    pub left: ExprRef,
    /// Right select, with the same column names as the left.
    pub right: ExprRef,
}

/// A select paired with the code that rebuilds a value from its columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionExpr {
    /// The query block.
    pub select: ExprRef,
    /// Per-row construction over the select's columns.
    pub projector: ExprRef,
    /// Coercion of the row sequence into the requested shape.
    pub aggregator: Option<Aggregator>,
}

/// A projection whose rows are matched to outer rows by key on the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientJoinExpr {
    /// Inner projection, executed once.
    pub projection: ExprRef,
    /// Key values read from the outer row.
    pub outer_key: Vec<ExprRef>,
    /// Key values read from each inner row.
    pub inner_key: Vec<ExprRef>,
}

/// One `column = value` assignment of a write command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnAssignment {
    /// Target column.
    pub column: ExprRef,
    /// New value.
    pub value: ExprRef,
}

/// A declared variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableDecl {
    /// Variable name.
    pub name: String,
    /// Variable type.
    pub ty: Type,
    /// Initial value, read from `Declaration::source`.
    pub value: ExprRef,
}

/// The closed set of node kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExprKind {
    // Generic scalar operators
    /// Literal value.
    Constant(Value),
    /// Lambda parameter reference.
    Parameter(Parameter),
    /// Lambda abstraction.
    Lambda {
        /// Bound parameters.
        params: Vec<Parameter>,
        /// Body.
        body: ExprRef,
    },
    /// Unary operation.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        operand: ExprRef,
    },
    /// Binary operation.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        left: ExprRef,
        /// Right operand.
        right: ExprRef,
    },
    /// `test ? if_true : if_false`.
    Conditional {
        /// Condition.
        test: ExprRef,
        /// Value when true.
        if_true: ExprRef,
        /// Value when false.
        if_false: ExprRef,
    },
    /// Member access on an entity, record or grouping.
    Member {
        /// Accessed value.
        object: ExprRef,
        /// Member name.
        member: String,
    },
    /// Scalar function call.
    Call {
        /// Function.
        function: Function,
        /// Arguments.
        args: Vec<ExprRef>,
    },
    /// Anonymous record construction.
    New {
        /// Field initializers in declaration order.
        fields: Vec<(String, ExprRef)>,
    },
    /// Query-algebra operator.
    Query(QueryOp),

    // Relational
    /// Physical table.
    Table(TableExpr),
    /// Column of an in-scope source.
    Column(ColumnExpr),
    /// Query block.
    Select(SelectExpr),
    /// Join.
    Join(JoinExpr),
    /// Set combination of two selects.
    SetOp(SetOpExpr),
    /// Aggregate within a group.
    Aggregate(AggregateExpr),
    /// Aggregate pending relocation.
    AggregateSubquery(AggregateSubqueryExpr),
    /// Single-value subquery.
    Scalar(ExprRef),
    /// `EXISTS (select)`.
    Exists(ExprRef),
    /// `IN` test.
    In(InExpr),
    /// `expr IS NULL`.
    IsNull(ExprRef),
    /// `expr BETWEEN lower AND upper`.
    Between {
        /// Tested value.
        expr: ExprRef,
        /// Inclusive lower bound.
        lower: ExprRef,
        /// Inclusive upper bound.
        upper: ExprRef,
    },
    /// `ROW_NUMBER() OVER (ORDER BY ...)`.
    RowNumber {
        /// Window ordering.
        order_by: Vec<OrderExpr>,
    },
    /// Select plus projector.
    Projection(ProjectionExpr),
    /// Query parameter with its bound value.
    NamedValue {
        /// Parameter name, without prefix.
        name: String,
        /// Bound value expression.
        value: ExprRef,
    },
    /// Client-side keyed join.
    ClientJoin(ClientJoinExpr),
    /// Value from the right side of an outer join; null when `test` is.
    OuterJoined {
        /// Existence test column from the joined side.
        test: ExprRef,
        /// Joined value.
        expr: ExprRef,
    },
    /// Entity instance built from `expr`.
    Entity {
        /// Entity name.
        entity: String,
        /// Record construction of the mapped members.
        expr: ExprRef,
    },

    // Commands
    /// `INSERT INTO table (...) VALUES (...)`.
    Insert {
        /// Target table.
        table: ExprRef,
        /// Column values.
        assignments: Vec<ColumnAssignment>,
    },
    /// `UPDATE table SET ... WHERE ...`.
    Update {
        /// Target table.
        table: ExprRef,
        /// Row filter.
        where_clause: ExprRef,
        /// New values.
        assignments: Vec<ColumnAssignment>,
    },
    /// `DELETE FROM table WHERE ...`.
    Delete {
        /// Target table.
        table: ExprRef,
        /// Row filter.
        where_clause: Option<ExprRef>,
    },
    /// Sequence of commands.
    Block(Vec<ExprRef>),
    /// Conditional command.
    If {
        /// Condition.
        check: ExprRef,
        /// Command when true.
        if_true: ExprRef,
        /// Command when false.
        if_false: Option<ExprRef>,
    },
    /// Variable declarations initialized from a select.
    Declaration {
        /// Declared variables.
        variables: Vec<VariableDecl>,
        /// Select the values are read from.
        source: ExprRef,
    },
    /// Reference to a declared variable.
    Variable {
        /// Variable name.
        name: String,
    },
}

/// An immutable, typed expression node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expr {
    ty: Type,
    kind: ExprKind,
}

impl Expr {
    /// Allocates a node.
    #[must_use]
    pub fn new(kind: ExprKind, ty: Type) -> ExprRef {
        Arc::new(Self { ty, kind })
    }

    /// The node kind.
    #[must_use]
    pub const fn kind(&self) -> &ExprKind {
        &self.kind
    }

    /// The result type.
    #[must_use]
    pub const fn ty(&self) -> &Type {
        &self.ty
    }

    /// Returns the select payload.
    #[must_use]
    pub const fn as_select(&self) -> Option<&SelectExpr> {
        match &self.kind {
            ExprKind::Select(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the projection payload.
    #[must_use]
    pub const fn as_projection(&self) -> Option<&ProjectionExpr> {
        match &self.kind {
            ExprKind::Projection(p) => Some(p),
            _ => None,
        }
    }

    /// Returns the column payload.
    #[must_use]
    pub const fn as_column(&self) -> Option<&ColumnExpr> {
        match &self.kind {
            ExprKind::Column(c) => Some(c),
            _ => None,
        }
    }

    /// Returns the constant payload.
    #[must_use]
    pub const fn as_constant(&self) -> Option<&Value> {
        match &self.kind {
            ExprKind::Constant(v) => Some(v),
            _ => None,
        }
    }

    /// Returns true for a null constant.
    #[must_use]
    pub const fn is_null_constant(&self) -> bool {
        matches!(&self.kind, ExprKind::Constant(v) if v.is_null())
    }

    /// Short name of the node kind, used in errors and logs.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match &self.kind {
            ExprKind::Constant(_) => "Constant",
            ExprKind::Parameter(_) => "Parameter",
            ExprKind::Lambda { .. } => "Lambda",
            ExprKind::Unary { .. } => "Unary",
            ExprKind::Binary { .. } => "Binary",
            ExprKind::Conditional { .. } => "Conditional",
            ExprKind::Member { .. } => "Member",
            ExprKind::Call { .. } => "Call",
            ExprKind::New { .. } => "New",
            ExprKind::Query(q) => q.name(),
            ExprKind::Table(_) => "Table",
            ExprKind::Column(_) => "Column",
            ExprKind::Select(_) => "Select",
            ExprKind::Join(_) => "Join",
            ExprKind::SetOp(_) => "SetOp",
            ExprKind::Aggregate(_) => "Aggregate",
            ExprKind::AggregateSubquery(_) => "AggregateSubquery",
            ExprKind::Scalar(_) => "Scalar",
            ExprKind::Exists(_) => "Exists",
            ExprKind::In(_) => "In",
            ExprKind::IsNull(_) => "IsNull",
            ExprKind::Between { .. } => "Between",
            ExprKind::RowNumber { .. } => "RowNumber",
            ExprKind::Projection(_) => "Projection",
            ExprKind::NamedValue { .. } => "NamedValue",
            ExprKind::ClientJoin(_) => "ClientJoin",
            ExprKind::OuterJoined { .. } => "OuterJoined",
            ExprKind::Entity { .. } => "Entity",
            ExprKind::Insert { .. } => "Insert",
            ExprKind::Update { .. } => "Update",
            ExprKind::Delete { .. } => "Delete",
            ExprKind::Block(_) => "Block",
            ExprKind::If { .. } => "If",
            ExprKind::Declaration { .. } => "Declaration",
            ExprKind::Variable { .. } => "Variable",
        }
    }
}

/// Identity comparison of two node handles.
#[must_use]
pub fn same(a: &ExprRef, b: &ExprRef) -> bool {
    Arc::ptr_eq(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aliases_are_unique() {
        let a = TableAlias::new();
        let b = TableAlias::new();
        assert_ne!(a, b);
        assert_eq!(a, a);
    }

    #[test]
    fn test_binary_op_precedence() {
        assert!(BinaryOp::Mul.precedence() > BinaryOp::Add.precedence());
        assert!(BinaryOp::And.precedence() > BinaryOp::Or.precedence());
        assert_eq!(BinaryOp::Lt.flipped(), BinaryOp::Gt);
        assert_eq!(BinaryOp::Eq.flipped(), BinaryOp::Eq);
    }

    #[test]
    fn test_unique_column_name_appends_counter() {
        let e = Expr::new(ExprKind::Constant(Value::from(1)), Type::Int);
        let mut cols = vec![ColumnDecl::new("Id", e.clone())];
        assert_eq!(unique_column_name(&cols, "Name"), "Name");
        assert_eq!(unique_column_name(&cols, "Id"), "Id1");
        cols.push(ColumnDecl::new("Id1", e));
        assert_eq!(unique_column_name(&cols, "Id"), "Id2");
    }

    #[test]
    fn test_column_decl_takes_expression_type() {
        let e = Expr::new(ExprKind::Constant(Value::from(1)), Type::Int);
        let decl = ColumnDecl::new("c", e);
        assert_eq!(decl.ty, Type::Int);
    }
}
