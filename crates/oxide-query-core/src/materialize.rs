//! Client half of a translated query.
//!
//! [`Materializer`] turns a rewritten tree into an [`ExecutionPlan`]: SQL
//! commands to run plus [`Reader`]s that rebuild values from result rows.
//! Nothing here performs I/O; the provider feeds rows in.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use crate::ast::{
    column, named_value, null, projection, select, Aggregator, BinaryOp, ColumnDecl, ExprKind,
    ExprRef, Function, ProjectionExpr, SelectExpr, TableAlias, Type, UnaryOp,
};
use crate::command::QueryCommand;
use crate::dialect::Dialect;
use crate::error::{QueryError, Result};
use crate::format::format_sql;
use crate::mapping::{EntityDef, Mapping};
use crate::value::{Object, Row, SqlValue, Value};
use crate::visit::{contains, replace_nodes};

/// Reads one value out of a result row.
#[derive(Debug, Clone, PartialEq)]
pub enum Reader {
    /// Cell at an ordinal.
    Column(usize),
    /// Fixed value.
    Constant(Value),
    /// Runtime parameter, falling back to the value it was planned with.
    Parameter {
        /// Parameter name.
        name: String,
        /// Planned value.
        default: Value,
    },
    /// Anonymous record.
    Record(Vec<(String, Reader)>),
    /// Entity instance.
    Entity(EntityReader),
    /// Null when `test` reads null.
    OuterJoined {
        /// Existence test.
        test: Box<Reader>,
        /// Joined value.
        value: Box<Reader>,
    },
    /// Client-evaluated unary operator.
    Unary(UnaryOp, Box<Reader>),
    /// Client-evaluated binary operator.
    Binary(BinaryOp, Box<Reader>, Box<Reader>),
    /// Client-evaluated conditional.
    Conditional(Box<Reader>, Box<Reader>, Box<Reader>),
    /// Client-evaluated function.
    Call(Function, Vec<Reader>),
    /// Client-evaluated null test.
    IsNull(Box<Reader>),
    /// Member of a record or entity value.
    Member(Box<Reader>, String),
    /// Result of a nested plan executed once per outer row.
    Correlated(usize),
    /// Inner rows of a client join matching this row's key.
    ClientJoin {
        /// Nested plan index.
        index: usize,
        /// Key read from the outer row.
        outer_key: Vec<Reader>,
        /// Coercion of the matched rows.
        aggregator: Option<Aggregator>,
    },
}

/// How an entity instance is constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityReader {
    /// Entity name.
    pub entity: String,
    /// Members bound through the chosen constructor, in parameter order.
    /// Empty for default construction.
    pub constructor: Vec<String>,
    /// Member readers.
    pub fields: Vec<(String, Reader)>,
}

/// A query plus the code that rebuilds its results.
#[derive(Debug, Clone)]
pub struct ProjectionPlan {
    /// SQL to run.
    pub command: QueryCommand,
    /// Per-row reader.
    pub reader: Reader,
    /// Coercion of the row sequence.
    pub aggregator: Option<Aggregator>,
    /// Plans referenced by [`Reader::Correlated`] and
    /// [`Reader::ClientJoin`].
    pub nested: Vec<NestedPlan>,
}

/// A collection read inside a projector.
#[derive(Debug, Clone)]
pub enum NestedPlan {
    /// Executed once per outer row with outer cells bound as parameters.
    Correlated {
        /// Inner plan.
        plan: ProjectionPlan,
        /// Parameter names and the outer readers supplying them.
        bindings: Vec<(String, Reader)>,
    },
    /// Executed once; rows grouped by key.
    ClientJoin {
        /// Inner plan, without aggregator.
        plan: ProjectionPlan,
        /// Key read from each inner row.
        inner_key: Vec<Reader>,
    },
}

/// Input for a nested plan, filled in by whoever runs the commands.
#[derive(Debug, Clone)]
pub enum NestedResult {
    /// One value per outer row, by row index.
    PerRow(Vec<Value>),
    /// Inner values grouped by key.
    Keyed(HashMap<String, Vec<Value>>),
}

/// What running a translated tree involves.
#[derive(Debug, Clone)]
pub enum ExecutionPlan {
    /// A query.
    Query(ProjectionPlan),
    /// A write; the result is the affected row count.
    Command(QueryCommand),
    /// Steps run in order; the result is the last step's.
    Block(Vec<ExecutionPlan>),
    /// A condition evaluated by a query, choosing the next step.
    Conditional {
        /// Single boolean row.
        check: ProjectionPlan,
        /// Step when true.
        if_true: Box<ExecutionPlan>,
        /// Step when false.
        if_false: Option<Box<ExecutionPlan>>,
    },
    /// A batch the server runs as a whole.
    Batch(QueryCommand),
}

impl ExecutionPlan {
    /// Every command in the plan, in execution order of first appearance.
    #[must_use]
    pub fn commands(&self) -> Vec<&QueryCommand> {
        let mut out = Vec::new();
        self.collect_commands(&mut out);
        out
    }

    fn collect_commands<'a>(&'a self, out: &mut Vec<&'a QueryCommand>) {
        match self {
            Self::Query(p) => p.collect_commands(out),
            Self::Command(c) | Self::Batch(c) => out.push(c),
            Self::Block(steps) => steps.iter().for_each(|s| s.collect_commands(out)),
            Self::Conditional {
                check,
                if_true,
                if_false,
            } => {
                check.collect_commands(out);
                if_true.collect_commands(out);
                if let Some(f) = if_false {
                    f.collect_commands(out);
                }
            }
        }
    }
}

impl ProjectionPlan {
    fn collect_commands<'a>(&'a self, out: &mut Vec<&'a QueryCommand>) {
        out.push(&self.command);
        for n in &self.nested {
            match n {
                NestedPlan::Correlated { plan, .. } | NestedPlan::ClientJoin { plan, .. } => {
                    plan.collect_commands(out);
                }
            }
        }
    }

    /// Reads every row.
    pub fn read_rows(
        &self,
        rows: &[Row],
        nested: &[NestedResult],
        params: &HashMap<String, SqlValue>,
    ) -> Result<Vec<Value>> {
        rows.iter()
            .enumerate()
            .map(|(index, row)| {
                self.reader.read(&RowContext {
                    row,
                    index,
                    nested,
                    params,
                })
            })
            .collect()
    }

    /// Reads every row and applies the aggregator.
    pub fn materialize(
        &self,
        rows: &[Row],
        nested: &[NestedResult],
        params: &HashMap<String, SqlValue>,
    ) -> Result<Value> {
        aggregate(self.aggregator, self.read_rows(rows, nested, params)?)
    }
}

/// Coerces a row sequence into the shape an aggregator asks for.
pub fn aggregate(aggregator: Option<Aggregator>, mut values: Vec<Value>) -> Result<Value> {
    let Some(aggregator) = aggregator else {
        return Ok(Value::List(values));
    };
    match aggregator {
        Aggregator::First if values.is_empty() => Err(QueryError::Materialize(
            "sequence contains no elements".into(),
        )),
        Aggregator::Single if values.len() != 1 => Err(QueryError::Materialize(format!(
            "expected exactly one element, found {}",
            values.len()
        ))),
        Aggregator::SingleOrDefault if values.len() > 1 => Err(QueryError::Materialize(format!(
            "expected at most one element, found {}",
            values.len()
        ))),
        Aggregator::First
        | Aggregator::FirstOrDefault
        | Aggregator::Single
        | Aggregator::SingleOrDefault
        | Aggregator::Scalar => {
            if values.is_empty() {
                Ok(Value::NULL)
            } else {
                Ok(values.swap_remove(0))
            }
        }
    }
}

/// Hash key of a composite value; `None` when any part is null, since
/// null keys never match.
#[must_use]
pub fn key_of(values: &[Value]) -> Option<String> {
    let mut parts = Vec::with_capacity(values.len());
    for v in values {
        match v {
            Value::Scalar(SqlValue::Null) => return None,
            Value::Scalar(s) => parts.push(s.key()),
            other => parts.push(format!("{other:?}")),
        }
    }
    Some(parts.join("\u{1f}"))
}

/// State available while reading one row.
#[derive(Debug, Clone, Copy)]
pub struct RowContext<'a> {
    /// The row.
    pub row: &'a Row,
    /// Its index in the result.
    pub index: usize,
    /// Results of the plan's nested plans.
    pub nested: &'a [NestedResult],
    /// Runtime parameter values.
    pub params: &'a HashMap<String, SqlValue>,
}

fn boxed(r: Reader) -> Box<Reader> {
    Box::new(r)
}

impl Reader {
    /// Reads the value for one row.
    pub fn read(&self, cx: &RowContext<'_>) -> Result<Value> {
        match self {
            Self::Column(i) => Ok(Value::Scalar(cx.row.get(*i)?.clone())),
            Self::Constant(v) => Ok(v.clone()),
            Self::Parameter { name, default } => Ok(cx
                .params
                .get(name)
                .map_or_else(|| default.clone(), |v| Value::Scalar(v.clone()))),
            Self::Record(fields) => {
                let mut o = Object::record();
                for (name, r) in fields {
                    o.set(name.clone(), r.read(cx)?);
                }
                Ok(Value::Object(o))
            }
            Self::Entity(e) => e.read(cx),
            Self::OuterJoined { test, value } => {
                if test.read(cx)?.is_null() {
                    Ok(Value::NULL)
                } else {
                    value.read(cx)
                }
            }
            Self::Unary(op, operand) => eval_unary(*op, &operand.read(cx)?),
            Self::Binary(op, l, r) => eval_binary(*op, &l.read(cx)?, &r.read(cx)?),
            Self::Conditional(test, a, b) => {
                let t = test.read(cx)?;
                if t.as_scalar().and_then(SqlValue::as_bool).unwrap_or(false) {
                    a.read(cx)
                } else {
                    b.read(cx)
                }
            }
            Self::Call(function, args) => {
                let args = args.iter().map(|a| a.read(cx)).collect::<Result<Vec<_>>>()?;
                eval_call(*function, &args)
            }
            Self::IsNull(operand) => Ok(Value::from(operand.read(cx)?.is_null())),
            Self::Member(object, name) => object.read(cx)?.member(name),
            Self::Correlated(index) => match cx.nested.get(*index) {
                Some(NestedResult::PerRow(values)) => {
                    values.get(cx.index).cloned().ok_or_else(|| {
                        QueryError::Materialize(format!(
                            "nested result {index} has no value for row {}",
                            cx.index
                        ))
                    })
                }
                _ => Err(QueryError::Materialize(format!(
                    "nested result {index} is missing"
                ))),
            },
            Self::ClientJoin {
                index,
                outer_key,
                aggregator,
            } => {
                let Some(NestedResult::Keyed(groups)) = cx.nested.get(*index) else {
                    return Err(QueryError::Materialize(format!(
                        "client join result {index} is missing"
                    )));
                };
                let key = outer_key.iter().map(|r| r.read(cx)).collect::<Result<Vec<_>>>()?;
                let matched = key_of(&key)
                    .and_then(|k| groups.get(&k))
                    .cloned()
                    .unwrap_or_default();
                aggregate(*aggregator, matched)
            }
        }
    }
}

impl EntityReader {
    fn read(&self, cx: &RowContext<'_>) -> Result<Value> {
        let mut values = HashMap::with_capacity(self.fields.len());
        for (name, r) in &self.fields {
            values.insert(name.as_str(), r.read(cx)?);
        }
        let mut o = Object::new(self.entity.clone());
        for member in &self.constructor {
            let v = values.remove(member.as_str()).unwrap_or(Value::NULL);
            o.set(member.clone(), v);
        }
        for (name, _) in &self.fields {
            if let Some(v) = values.remove(name.as_str()) {
                o.set(name.clone(), v);
            }
        }
        Ok(Value::Object(o))
    }
}

/// Chooses how to construct `def` from the members a projector supplies.
///
/// Entities without read-only members are default-constructed. Otherwise a
/// constructor must bind every read-only member; parameters match members
/// by name, then case-insensitively.
pub fn choose_constructor(def: &EntityDef, supplied: &[&str]) -> Result<Vec<String>> {
    let read_only: Vec<&str> = def
        .members
        .iter()
        .filter(|m| m.is_read_only())
        .map(|m| m.name.as_str())
        .collect();
    if read_only.is_empty() {
        return Ok(Vec::new());
    }
    let resolve = |param: &str| -> Option<String> {
        supplied
            .iter()
            .find(|m| **m == param)
            .or_else(|| supplied.iter().find(|m| m.eq_ignore_ascii_case(param)))
            .map(|m| (*m).to_string())
    };
    for ctor in &def.constructors {
        let bound: Option<Vec<String>> = ctor.params.iter().map(|p| resolve(p)).collect();
        let Some(bound) = bound else {
            continue;
        };
        if read_only.iter().all(|m| bound.iter().any(|b| b == m)) {
            return Ok(bound);
        }
    }
    Err(QueryError::Construction {
        entity: def.name.clone(),
        reason: format!(
            "no constructor binds the read-only members {}",
            read_only.join(", ")
        ),
    })
}

const fn client_function(function: Function) -> bool {
    matches!(
        function,
        Function::Length
            | Function::Upper
            | Function::Lower
            | Function::Trim
            | Function::Contains
            | Function::StartsWith
            | Function::EndsWith
            | Function::Abs
    )
}

fn compare(a: &SqlValue, b: &SqlValue) -> Option<Ordering> {
    match (a, b) {
        (SqlValue::Int(x), SqlValue::Int(y)) => Some(x.cmp(y)),
        #[allow(clippy::cast_precision_loss)]
        (SqlValue::Int(x), SqlValue::Float(y)) => (*x as f64).partial_cmp(y),
        #[allow(clippy::cast_precision_loss)]
        (SqlValue::Float(x), SqlValue::Int(y)) => x.partial_cmp(&(*y as f64)),
        (SqlValue::Float(x), SqlValue::Float(y)) => x.partial_cmp(y),
        (SqlValue::Text(x), SqlValue::Text(y)) => Some(x.cmp(y)),
        (SqlValue::Bool(x), SqlValue::Bool(y)) => Some(x.cmp(y)),
        (SqlValue::DateTime(x), SqlValue::DateTime(y)) => Some(x.cmp(y)),
        (SqlValue::Blob(x), SqlValue::Blob(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn scalar<'v>(v: &'v Value, op: &str) -> Result<&'v SqlValue> {
    v.as_scalar()
        .ok_or_else(|| QueryError::Materialize(format!("{op} over a non-scalar value")))
}

fn truth(v: &SqlValue, op: &str) -> Result<bool> {
    v.as_bool()
        .ok_or_else(|| QueryError::Materialize(format!("{op} over {}", v.kind_name())))
}

fn eval_unary(op: UnaryOp, v: &Value) -> Result<Value> {
    let v = scalar(v, op.as_str())?;
    Ok(Value::Scalar(match (op, v) {
        (_, SqlValue::Null) => SqlValue::Null,
        (UnaryOp::Neg, SqlValue::Int(n)) => SqlValue::Int(n.checked_neg().ok_or_else(|| {
            QueryError::Materialize(format!("negation of {n} overflows"))
        })?),
        (UnaryOp::Neg, SqlValue::Float(f)) => SqlValue::Float(-f),
        (UnaryOp::Not | UnaryOp::BitNot, SqlValue::Int(n)) => SqlValue::Int(!n),
        (UnaryOp::Not, other) => SqlValue::Bool(!truth(other, "NOT")?),
        (op, other) => {
            return Err(QueryError::Materialize(format!(
                "{} over {}",
                op.as_str(),
                other.kind_name()
            )))
        }
    }))
}

fn arithmetic(op: BinaryOp, a: &SqlValue, b: &SqlValue) -> Result<SqlValue> {
    let fail = || {
        QueryError::Materialize(format!(
            "{} over {} and {}",
            op.as_str(),
            a.kind_name(),
            b.kind_name()
        ))
    };
    Ok(match (a, b) {
        (SqlValue::Int(x), SqlValue::Int(y)) => SqlValue::Int(match op {
            BinaryOp::Add => x.wrapping_add(*y),
            BinaryOp::Sub => x.wrapping_sub(*y),
            BinaryOp::Mul => x.wrapping_mul(*y),
            BinaryOp::Div => x.checked_div(*y).ok_or_else(fail)?,
            BinaryOp::Mod => x.checked_rem(*y).ok_or_else(fail)?,
            BinaryOp::BitAnd => x & y,
            BinaryOp::BitOr => x | y,
            BinaryOp::BitXor => x ^ y,
            BinaryOp::LeftShift => x.wrapping_shl(u32::try_from(*y).map_err(|_| fail())?),
            BinaryOp::RightShift => x.wrapping_shr(u32::try_from(*y).map_err(|_| fail())?),
            _ => return Err(fail()),
        }),
        (SqlValue::Int(_) | SqlValue::Float(_), SqlValue::Int(_) | SqlValue::Float(_)) => {
            #[allow(clippy::cast_precision_loss)]
            let f = |v: &SqlValue| match v {
                SqlValue::Int(n) => *n as f64,
                SqlValue::Float(x) => *x,
                _ => 0.0,
            };
            let (x, y) = (f(a), f(b));
            SqlValue::Float(match op {
                BinaryOp::Add => x + y,
                BinaryOp::Sub => x - y,
                BinaryOp::Mul => x * y,
                BinaryOp::Div => x / y,
                BinaryOp::Mod => x % y,
                _ => return Err(fail()),
            })
        }
        (SqlValue::Text(x), SqlValue::Text(y)) if matches!(op, BinaryOp::Add | BinaryOp::Concat) => {
            SqlValue::Text(format!("{x}{y}"))
        }
        _ => return Err(fail()),
    })
}

fn eval_binary(op: BinaryOp, l: &Value, r: &Value) -> Result<Value> {
    if matches!(op, BinaryOp::Eq | BinaryOp::NotEq) {
        let equal = match (l, r) {
            (Value::Scalar(a), Value::Scalar(b)) => {
                compare(a, b).map_or_else(|| a == b, |o| o == Ordering::Equal)
            }
            _ => l == r,
        };
        return Ok(Value::from(equal == (op == BinaryOp::Eq)));
    }
    if op == BinaryOp::Coalesce {
        return Ok(if l.is_null() { r.clone() } else { l.clone() });
    }
    let a = scalar(l, op.as_str())?;
    let b = scalar(r, op.as_str())?;
    if op.is_logical() {
        let x = truth(a, op.as_str())?;
        let y = truth(b, op.as_str())?;
        return Ok(Value::from(if op == BinaryOp::And { x && y } else { x || y }));
    }
    if a.is_null() || b.is_null() {
        return Ok(if op.is_comparison() {
            Value::from(false)
        } else {
            Value::NULL
        });
    }
    if op.is_comparison() {
        let o = compare(a, b).ok_or_else(|| {
            QueryError::Materialize(format!(
                "cannot compare {} with {}",
                a.kind_name(),
                b.kind_name()
            ))
        })?;
        let result = match op {
            BinaryOp::Lt => o == Ordering::Less,
            BinaryOp::LtEq => o != Ordering::Greater,
            BinaryOp::Gt => o == Ordering::Greater,
            _ => o != Ordering::Less,
        };
        return Ok(Value::from(result));
    }
    arithmetic(op, a, b).map(Value::Scalar)
}

fn eval_call(function: Function, args: &[Value]) -> Result<Value> {
    let text = |i: usize| -> Result<Option<&str>> {
        match args.get(i).map(|v| scalar(v, function.as_str())).transpose()? {
            Some(SqlValue::Text(s)) => Ok(Some(s.as_str())),
            Some(SqlValue::Null) | None => Ok(None),
            Some(other) => Err(QueryError::Materialize(format!(
                "{} over {}",
                function.as_str(),
                other.kind_name()
            ))),
        }
    };
    let out = match function {
        Function::Length => text(0)?.map(|s| SqlValue::Int(i64::try_from(s.chars().count()).unwrap_or(i64::MAX))),
        Function::Upper => text(0)?.map(|s| SqlValue::Text(s.to_uppercase())),
        Function::Lower => text(0)?.map(|s| SqlValue::Text(s.to_lowercase())),
        Function::Trim => text(0)?.map(|s| SqlValue::Text(s.trim().to_string())),
        Function::Contains => text(0)?.zip(text(1)?).map(|(s, p)| SqlValue::Bool(s.contains(p))),
        Function::StartsWith => text(0)?.zip(text(1)?).map(|(s, p)| SqlValue::Bool(s.starts_with(p))),
        Function::EndsWith => text(0)?.zip(text(1)?).map(|(s, p)| SqlValue::Bool(s.ends_with(p))),
        Function::Abs => match args.first().map(|v| scalar(v, "ABS")).transpose()? {
            Some(SqlValue::Int(n)) => Some(SqlValue::Int(n.wrapping_abs())),
            Some(SqlValue::Float(f)) => Some(SqlValue::Float(f.abs())),
            _ => None,
        },
        other => {
            return Err(QueryError::unsupported(format!(
                "{} evaluated on the client",
                other.as_str()
            )))
        }
    };
    Ok(Value::Scalar(out.unwrap_or(SqlValue::Null)))
}

/// Builds [`ExecutionPlan`]s.
pub struct Materializer<'a> {
    mapping: &'a dyn Mapping,
    dialect: &'a dyn Dialect,
    next_binding: usize,
}

impl std::fmt::Debug for Materializer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Materializer")
            .field("dialect", &self.dialect.name())
            .finish_non_exhaustive()
    }
}

impl<'a> Materializer<'a> {
    /// A materializer for one translation.
    #[must_use]
    pub fn new(mapping: &'a dyn Mapping, dialect: &'a dyn Dialect) -> Self {
        Self {
            mapping,
            dialect,
            next_binding: 0,
        }
    }

    /// Plans a rewritten query or command tree.
    pub fn plan(&mut self, expr: &ExprRef) -> Result<ExecutionPlan> {
        match expr.kind() {
            ExprKind::Projection(p) => Ok(ExecutionPlan::Query(self.projection(p)?)),
            ExprKind::Insert { .. } | ExprKind::Update { .. } | ExprKind::Delete { .. } => {
                Ok(ExecutionPlan::Command(format_sql(self.dialect, expr)?))
            }
            ExprKind::Block(steps) => Ok(ExecutionPlan::Block(
                steps.iter().map(|s| self.plan(s)).collect::<Result<_>>()?,
            )),
            ExprKind::If {
                check,
                if_true,
                if_false,
            } => {
                let has_query = contains(if_true, |n| n.as_projection().is_some())
                    || if_false
                        .as_ref()
                        .is_some_and(|f| contains(f, |n| n.as_projection().is_some()));
                if self.dialect.supports_control_flow() && !has_query {
                    return Ok(ExecutionPlan::Batch(format_sql(self.dialect, expr)?));
                }
                Ok(ExecutionPlan::Conditional {
                    check: self.check(check)?,
                    if_true: Box::new(self.plan(if_true)?),
                    if_false: if_false
                        .as_ref()
                        .map(|f| self.plan(f).map(Box::new))
                        .transpose()?,
                })
            }
            ExprKind::Declaration { .. } => Ok(ExecutionPlan::Batch(format_sql(self.dialect, expr)?)),
            _ => Err(QueryError::unsupported(format!(
                "{} as an executable tree",
                expr.kind_name()
            ))),
        }
    }

    fn check(&mut self, predicate: &ExprRef) -> Result<ProjectionPlan> {
        let alias = TableAlias::new();
        let s = SelectExpr::new(alias, vec![ColumnDecl::new("test", predicate.clone())], None);
        let tree = projection(
            select(s),
            column(alias, "test", Type::Bool),
            Some(Aggregator::Scalar),
        );
        let Some(p) = tree.as_projection() else {
            return Err(QueryError::invalid("check is not a projection"));
        };
        self.projection(p)
    }

    fn projection(&mut self, p: &ProjectionExpr) -> Result<ProjectionPlan> {
        let Some(sel) = p.select.as_select() else {
            return Err(QueryError::invalid(format!(
                "projection over {}",
                p.select.kind_name()
            )));
        };
        let command = format_sql(self.dialect, &p.select)?;
        let mut nested = Vec::new();
        let reader = self.reader(&p.projector, sel, &mut nested)?;
        Ok(ProjectionPlan {
            command,
            reader,
            aggregator: p.aggregator,
            nested,
        })
    }

    fn ordinal(sel: &SelectExpr, e: &ExprRef) -> Result<usize> {
        let Some(c) = e.as_column() else {
            return Err(QueryError::invalid(format!("{} is not a column", e.kind_name())));
        };
        if c.alias != sel.alias {
            return Err(QueryError::invalid(format!(
                "projector reads {}.{} outside its select {}",
                c.alias, c.name, sel.alias
            )));
        }
        sel.columns
            .iter()
            .position(|d| d.name == c.name)
            .ok_or_else(|| QueryError::invalid(format!("select {} has no column {}", sel.alias, c.name)))
    }

    #[allow(clippy::too_many_lines)]
    fn reader(
        &mut self,
        e: &ExprRef,
        sel: &SelectExpr,
        nested: &mut Vec<NestedPlan>,
    ) -> Result<Reader> {
        Ok(match e.kind() {
            ExprKind::Column(_) => Reader::Column(Self::ordinal(sel, e)?),
            ExprKind::Constant(v) => Reader::Constant(v.clone()),
            ExprKind::NamedValue { name, value } => Reader::Parameter {
                name: name.clone(),
                default: value.as_constant().cloned().unwrap_or(Value::NULL),
            },
            ExprKind::New { fields } => Reader::Record(self.fields(fields, sel, nested)?),
            ExprKind::Entity { entity, expr } => {
                let ExprKind::New { fields } = expr.kind() else {
                    return Err(QueryError::invalid(format!(
                        "entity {entity} built from {}",
                        expr.kind_name()
                    )));
                };
                let fields = self.fields(fields, sel, nested)?;
                let def = self.mapping.entity(entity)?;
                let supplied: Vec<&str> = fields.iter().map(|(n, _)| n.as_str()).collect();
                let constructor = choose_constructor(&def, &supplied)?;
                Reader::Entity(EntityReader {
                    entity: entity.clone(),
                    constructor,
                    fields,
                })
            }
            ExprKind::OuterJoined { test, expr } => Reader::OuterJoined {
                test: boxed(self.reader(test, sel, nested)?),
                value: boxed(self.reader(expr, sel, nested)?),
            },
            ExprKind::Unary { op, operand } => {
                Reader::Unary(*op, boxed(self.reader(operand, sel, nested)?))
            }
            ExprKind::Binary { op, left, right } => Reader::Binary(
                *op,
                boxed(self.reader(left, sel, nested)?),
                boxed(self.reader(right, sel, nested)?),
            ),
            ExprKind::Conditional {
                test,
                if_true,
                if_false,
            } => Reader::Conditional(
                boxed(self.reader(test, sel, nested)?),
                boxed(self.reader(if_true, sel, nested)?),
                boxed(self.reader(if_false, sel, nested)?),
            ),
            ExprKind::Call { function, args } if client_function(*function) => Reader::Call(
                *function,
                args.iter()
                    .map(|a| self.reader(a, sel, nested))
                    .collect::<Result<_>>()?,
            ),
            ExprKind::IsNull(operand) => Reader::IsNull(boxed(self.reader(operand, sel, nested)?)),
            ExprKind::Member { object, member } => {
                Reader::Member(boxed(self.reader(object, sel, nested)?), member.clone())
            }
            ExprKind::Projection(_) => {
                let (inner, bindings) = self.correlate(e, sel)?;
                let Some(p) = inner.as_projection() else {
                    return Err(QueryError::invalid("correlated projection replaced"));
                };
                let plan = self.projection(p)?;
                nested.push(NestedPlan::Correlated { plan, bindings });
                Reader::Correlated(nested.len() - 1)
            }
            ExprKind::ClientJoin(c) => {
                let Some(p) = c.projection.as_projection() else {
                    return Err(QueryError::invalid("client join over a non-projection"));
                };
                let Some(inner_sel) = p.select.as_select() else {
                    return Err(QueryError::invalid("client join over a non-select"));
                };
                let plan = self.projection(p)?;
                let mut inner_nested = Vec::new();
                let inner_key = c
                    .inner_key
                    .iter()
                    .map(|k| self.reader(k, inner_sel, &mut inner_nested))
                    .collect::<Result<Vec<_>>>()?;
                if !inner_nested.is_empty() {
                    return Err(QueryError::unsupported("collection-valued client join key"));
                }
                let outer_key = c
                    .outer_key
                    .iter()
                    .map(|k| self.reader(k, sel, nested))
                    .collect::<Result<Vec<_>>>()?;
                let aggregator = plan.aggregator;
                nested.push(NestedPlan::ClientJoin { plan, inner_key });
                Reader::ClientJoin {
                    index: nested.len() - 1,
                    outer_key,
                    aggregator,
                }
            }
            _ => {
                return Err(QueryError::unsupported(format!(
                    "{} evaluated on the client",
                    e.kind_name()
                )))
            }
        })
    }

    fn fields(
        &mut self,
        fields: &[(String, ExprRef)],
        sel: &SelectExpr,
        nested: &mut Vec<NestedPlan>,
    ) -> Result<Vec<(String, Reader)>> {
        fields
            .iter()
            .map(|(n, f)| Ok((n.clone(), self.reader(f, sel, nested)?)))
            .collect()
    }

    /// Replaces references to the outer select's columns inside a nested
    /// projection with parameters, returning the parameter bindings.
    fn correlate(
        &mut self,
        inner: &ExprRef,
        outer: &SelectExpr,
    ) -> Result<(ExprRef, Vec<(String, Reader)>)> {
        let mut bindings: Vec<(String, String, Reader)> = Vec::new();
        let mut failure = None;
        let next = &mut self.next_binding;
        let rewritten = replace_nodes(inner, |n| {
            let c = n.as_column()?;
            if c.alias != outer.alias {
                return None;
            }
            if let Some((_, name, _)) = bindings.iter().find(|(col, _, _)| *col == c.name) {
                return Some(named_value(name.clone(), null(n.ty().clone())));
            }
            match outer.columns.iter().position(|d| d.name == c.name) {
                Some(ordinal) => {
                    let name = format!("r{next}");
                    *next += 1;
                    bindings.push((c.name.clone(), name.clone(), Reader::Column(ordinal)));
                    Some(named_value(name, null(n.ty().clone())))
                }
                None => {
                    failure = Some(c.name.clone());
                    None
                }
            }
        })?;
        if let Some(name) = failure {
            return Err(QueryError::invalid(format!(
                "nested projection reads missing column {name} of {}",
                outer.alias
            )));
        }
        Ok((
            rewritten,
            bindings.into_iter().map(|(_, n, r)| (n, r)).collect(),
        ))
    }
}

/// Plans `expr` and wraps it for sharing.
pub fn plan_execution(
    mapping: &dyn Mapping,
    dialect: &dyn Dialect,
    expr: &ExprRef,
) -> Result<Arc<ExecutionPlan>> {
    Materializer::new(mapping, dialect).plan(expr).map(Arc::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{client_join, entity, lit, new_record, table, ExprExt};
    use crate::dialect::GenericDialect;
    use crate::mapping::tests::northwind;
    use crate::mapping::MemberDef;

    fn people() -> (TableAlias, SelectExpr) {
        let t = TableAlias::new();
        let s = SelectExpr::new(
            TableAlias::new(),
            vec![
                ColumnDecl::new("Id", column(t, "Id", Type::Int)),
                ColumnDecl::new("Name", column(t, "Name", Type::Text)),
            ],
            Some(table(t, None, "People")),
        );
        (t, s)
    }

    fn row(values: Vec<SqlValue>) -> Row {
        Row::new(values)
    }

    fn run(plan: &ProjectionPlan, rows: &[Row]) -> Value {
        plan.materialize(rows, &[], &HashMap::new()).unwrap()
    }

    #[test]
    fn test_record_projection_reads_by_ordinal() {
        let (_, s) = people();
        let a = s.alias;
        let projector = new_record(vec![
            ("Name".into(), column(a, "Name", Type::Text)),
            ("Twice".into(), column(a, "Id", Type::Int).mul(lit(2))),
        ]);
        let tree = projection(select(s), projector, None);
        let mapping = northwind();
        let plan = Materializer::new(&mapping, &GenericDialect::new())
            .plan(&tree)
            .unwrap();
        let ExecutionPlan::Query(plan) = plan else {
            panic!("expected a query plan");
        };
        let out = run(&plan, &[row(vec![SqlValue::Int(4), SqlValue::Text("Ann".into())])]);
        let Value::List(items) = out else {
            panic!("expected a list, got {out:?}");
        };
        let o = items[0].as_object().unwrap();
        assert_eq!(o.get("Name"), Some(&Value::from("Ann")));
        assert_eq!(o.get("Twice"), Some(&Value::from(8)));
    }

    #[test]
    fn test_aggregators() {
        let one = vec![Value::from(1)];
        assert_eq!(aggregate(Some(Aggregator::First), one.clone()).unwrap(), Value::from(1));
        assert!(aggregate(Some(Aggregator::First), Vec::new()).is_err());
        assert_eq!(
            aggregate(Some(Aggregator::FirstOrDefault), Vec::new()).unwrap(),
            Value::NULL
        );
        let two = vec![Value::from(1), Value::from(2)];
        assert!(aggregate(Some(Aggregator::Single), two.clone()).is_err());
        assert!(aggregate(Some(Aggregator::SingleOrDefault), two).is_err());
        assert_eq!(aggregate(None, one).unwrap(), Value::List(vec![Value::from(1)]));
    }

    #[test]
    fn test_constructor_binds_read_only_members() {
        let def = EntityDef::new("Point", "Points")
            .member(MemberDef::column("Id", Type::Int).primary_key())
            .member(MemberDef::column("X", Type::Int).read_only())
            .member(MemberDef::column("Label", Type::Text))
            .constructor(&["id"])
            .constructor(&["id", "x"]);
        let chosen = choose_constructor(&def, &["Id", "X", "Label"]).unwrap();
        assert_eq!(chosen, vec!["Id".to_string(), "X".to_string()]);
    }

    #[test]
    fn test_missing_constructor_is_a_construction_error() {
        let def = EntityDef::new("Point", "Points")
            .member(MemberDef::column("Id", Type::Int).primary_key())
            .member(MemberDef::column("X", Type::Int).read_only())
            .constructor(&["id"]);
        let err = choose_constructor(&def, &["Id", "X"]).unwrap_err();
        assert!(matches!(err, QueryError::Construction { ref entity, .. } if entity == "Point"));
        let plain = EntityDef::new("Tag", "Tags").member(MemberDef::column("Id", Type::Int));
        assert!(choose_constructor(&plain, &["Id"]).unwrap().is_empty());
    }

    #[test]
    fn test_outer_joined_reads_null_when_test_is_null() {
        let (_, s) = people();
        let a = s.alias;
        let projector = crate::ast::outer_joined(
            column(a, "Id", Type::Int),
            column(a, "Name", Type::Text),
        );
        let tree = projection(select(s), projector, None);
        let mapping = northwind();
        let ExecutionPlan::Query(plan) = Materializer::new(&mapping, &GenericDialect::new())
            .plan(&tree)
            .unwrap()
        else {
            panic!("expected a query plan");
        };
        let out = run(
            &plan,
            &[
                row(vec![SqlValue::Null, SqlValue::Text("ghost".into())]),
                row(vec![SqlValue::Int(1), SqlValue::Text("Ann".into())]),
            ],
        );
        assert_eq!(out, Value::List(vec![Value::NULL, Value::from("Ann")]));
    }

    #[test]
    fn test_correlated_projection_binds_outer_columns() {
        let (_, outer) = people();
        let oa = outer.alias;
        let pets = TableAlias::new();
        let mut inner = SelectExpr::new(
            TableAlias::new(),
            vec![ColumnDecl::new("Name", column(pets, "Name", Type::Text))],
            Some(table(pets, None, "Pets")),
        );
        inner.where_clause = Some(column(pets, "OwnerId", Type::Int).eq(column(oa, "Id", Type::Int)));
        let ia = inner.alias;
        let nested = projection(select(inner), column(ia, "Name", Type::Text), None);
        let tree = projection(
            select(outer),
            new_record(vec![("Pets".into(), nested)]),
            None,
        );
        let mapping = northwind();
        let ExecutionPlan::Query(plan) = Materializer::new(&mapping, &GenericDialect::new())
            .plan(&tree)
            .unwrap()
        else {
            panic!("expected a query plan");
        };
        let NestedPlan::Correlated { plan: inner, bindings } = &plan.nested[0] else {
            panic!("expected a correlated plan");
        };
        assert_eq!(bindings, &vec![("r0".to_string(), Reader::Column(0))]);
        assert!(inner.command.text.contains("WHERE t0.\"OwnerId\" = @r0"));

        let results = vec![NestedResult::PerRow(vec![Value::List(vec![Value::from("Rex")])])];
        let out = plan
            .materialize(
                &[row(vec![SqlValue::Int(1), SqlValue::Text("Ann".into())])],
                &results,
                &HashMap::new(),
            )
            .unwrap();
        let Value::List(items) = out else {
            panic!("expected a list");
        };
        assert_eq!(
            items[0].as_object().unwrap().get("Pets"),
            Some(&Value::List(vec![Value::from("Rex")]))
        );
    }

    #[test]
    fn test_client_join_matches_by_key() {
        let (_, outer) = people();
        let oa = outer.alias;
        let pets = TableAlias::new();
        let inner = SelectExpr::new(
            TableAlias::new(),
            vec![
                ColumnDecl::new("Name", column(pets, "Name", Type::Text)),
                ColumnDecl::new("k0", column(pets, "OwnerId", Type::Int)),
            ],
            Some(table(pets, None, "Pets")),
        );
        let ia = inner.alias;
        let cj = client_join(
            projection(select(inner), column(ia, "Name", Type::Text), None),
            vec![column(oa, "Id", Type::Int)],
            vec![column(ia, "k0", Type::Int)],
        );
        let tree = projection(select(outer), cj, None);
        let mapping = northwind();
        let ExecutionPlan::Query(plan) = Materializer::new(&mapping, &GenericDialect::new())
            .plan(&tree)
            .unwrap()
        else {
            panic!("expected a query plan");
        };
        let mut groups = HashMap::new();
        groups.insert(
            key_of(&[Value::from(1)]).unwrap(),
            vec![Value::from("Rex"), Value::from("Tom")],
        );
        let out = plan
            .materialize(
                &[
                    row(vec![SqlValue::Int(1), SqlValue::Text("Ann".into())]),
                    row(vec![SqlValue::Int(2), SqlValue::Text("Bo".into())]),
                ],
                &[NestedResult::Keyed(groups)],
                &HashMap::new(),
            )
            .unwrap();
        assert_eq!(
            out,
            Value::List(vec![
                Value::List(vec![Value::from("Rex"), Value::from("Tom")]),
                Value::List(Vec::new()),
            ])
        );
    }

    #[test]
    fn test_entity_reader_uses_mapping() {
        let mapping = northwind();
        let (_, s) = people();
        let a = s.alias;
        let projector = entity(
            "Customer",
            new_record(vec![
                ("Id".into(), column(a, "Id", Type::Int)),
                ("Name".into(), column(a, "Name", Type::Text)),
            ]),
        );
        let tree = projection(select(s), projector, Some(Aggregator::Single));
        let ExecutionPlan::Query(plan) = Materializer::new(&mapping, &GenericDialect::new())
            .plan(&tree)
            .unwrap()
        else {
            panic!("expected a query plan");
        };
        let out = run(&plan, &[row(vec![SqlValue::Int(7), SqlValue::Text("Ann".into())])]);
        let o = out.as_object().unwrap();
        assert_eq!(o.entity.as_deref(), Some("Customer"));
        assert_eq!(o.get("Id"), Some(&Value::from(7)));
    }

    #[test]
    fn test_client_evaluation() {
        assert_eq!(
            eval_binary(BinaryOp::Add, &Value::from(2), &Value::from(3)).unwrap(),
            Value::from(5)
        );
        assert_eq!(
            eval_binary(BinaryOp::Eq, &Value::NULL, &Value::NULL).unwrap(),
            Value::from(true)
        );
        assert_eq!(
            eval_binary(BinaryOp::Lt, &Value::from(2), &Value::from(2.5)).unwrap(),
            Value::from(true)
        );
        assert_eq!(
            eval_call(Function::Upper, &[Value::from("ab")]).unwrap(),
            Value::from("AB")
        );
        assert!(eval_call(Function::Now, &[]).is_err());
    }

    #[test]
    fn test_negation_overflow_is_an_error() {
        assert_eq!(
            eval_unary(UnaryOp::Neg, &Value::from(i64::MAX)).unwrap(),
            Value::from(-i64::MAX)
        );
        assert!(matches!(
            eval_unary(UnaryOp::Neg, &Value::from(i64::MIN)),
            Err(QueryError::Materialize(_))
        ));
        assert_eq!(eval_unary(UnaryOp::Neg, &Value::NULL).unwrap(), Value::NULL);
    }

    #[test]
    fn test_conditional_without_control_flow_checks_on_client() {
        let mapping = northwind();
        let t = TableAlias::new();
        let mut check = SelectExpr::new(TableAlias::new(), Vec::new(), Some(table(t, None, "People")));
        check.where_clause = Some(column(t, "Id", Type::Int).eq(lit(1)));
        let tree = crate::ast::if_command(
            crate::ast::exists(select(check)),
            crate::ast::delete(table(TableAlias::new(), None, "People"), None),
            None,
        );
        let plan = Materializer::new(&mapping, &GenericDialect::new())
            .plan(&tree)
            .unwrap();
        let ExecutionPlan::Conditional { check, .. } = &plan else {
            panic!("expected a client-side conditional");
        };
        assert!(check.command.text.starts_with("SELECT CASE WHEN EXISTS("));
        assert_eq!(plan.commands().len(), 2);
    }
}
