//! Lowers query-algebra operators into relational projections.
//!
//! Every operator is bound against the projection of its source: lambda
//! parameters are mapped to the source's projector, the lambda body is
//! bound, and the result is re-projected into a new select whose FROM is
//! the source select.

use std::collections::{HashMap, HashSet};

use super::projector::{project_columns, Affinity, ProjectedColumns};
use crate::ast::{
    aggregate, aggregate_subquery, and_all, column, conditional, constant, exists, in_select,
    in_values, is_null, lit, member_typed, not, null, outer_joined, projection, scalar_subquery,
    select,
    set_operation, same, AggregateKind, AggregateOp, Aggregator, ColumnDecl, ElementKind, Expr,
    ExprExt, ExprKind, ExprRef, JoinKind, OrderExpr, OrderKind, Parameter, QueryOp, SelectExpr,
    SetOpKind, TableAlias, Type,
};
use crate::dialect::Dialect;
use crate::error::{QueryError, Result};
use crate::mapping::{Mapping, MemberKind, QueryMapper};
use crate::value::Value;
use crate::visit::{record_field, referenced_aliases, walk, ColumnMapper, Rewriter};

/// A bound sequence: a projection split into its parts.
#[derive(Debug, Clone)]
struct Source {
    expr: ExprRef,
    select: ExprRef,
    alias: TableAlias,
    projector: ExprRef,
}

impl Source {
    fn of(expr: &ExprRef) -> Result<Self> {
        let p = expr
            .as_projection()
            .ok_or_else(|| QueryError::invalid(format!("{} is not a projection", expr.kind_name())))?;
        let alias = p
            .select
            .as_select()
            .map(|s| s.alias)
            .ok_or_else(|| QueryError::invalid("projection without select"))?;
        Ok(Self {
            expr: expr.clone(),
            select: p.select.clone(),
            alias,
            projector: p.projector.clone(),
        })
    }
}

#[derive(Debug, Clone)]
struct GroupByInfo {
    alias: TableAlias,
    element: ExprRef,
}

/// Binds algebra trees against a mapping.
pub struct QueryBinder<'a> {
    mapper: &'a QueryMapper<'a>,
    dialect: &'a dyn Dialect,
    map: HashMap<u64, ExprRef>,
    group_by_map: Vec<(ExprRef, GroupByInfo)>,
    current_group_element: Option<ExprRef>,
    root: Option<ExprRef>,
}

impl std::fmt::Debug for QueryBinder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryBinder")
            .field("dialect", &self.dialect.name())
            .field("bound_parameters", &self.map.len())
            .finish_non_exhaustive()
    }
}

/// Binds an algebra tree, producing relational nodes only.
pub fn bind(mapper: &QueryMapper<'_>, dialect: &dyn Dialect, expr: &ExprRef) -> Result<ExprRef> {
    let mut binder = QueryBinder {
        mapper,
        dialect,
        map: HashMap::new(),
        group_by_map: Vec::new(),
        current_group_element: None,
        root: Some(expr.clone()),
    };
    binder.rewrite(expr)
}

fn lambda_parts(lambda: &ExprRef, arity: usize) -> Result<(&[Parameter], &ExprRef)> {
    match lambda.kind() {
        ExprKind::Lambda { params, body } if params.len() == arity => Ok((params, body)),
        ExprKind::Lambda { params, .. } => Err(QueryError::invalid(format!(
            "lambda takes {} parameters, expected {arity}",
            params.len()
        ))),
        _ => Err(QueryError::invalid(format!(
            "expected a lambda, found {}",
            lambda.kind_name()
        ))),
    }
}

/// A grouping value: its key and the correlated element sequence.
fn grouping(key: ExprRef, group: ExprRef) -> ExprRef {
    let element = group.ty().element().cloned().unwrap_or_default();
    let ty = Type::Grouping {
        key: Box::new(key.ty().clone()),
        element: Box::new(element),
    };
    Expr::new(
        ExprKind::New {
            fields: vec![("Key".to_string(), key), ("Group".to_string(), group)],
        },
        ty,
    )
}

/// Equality of join keys; record keys compare field by field.
fn key_equality(outer: &ExprRef, inner: &ExprRef) -> ExprRef {
    if let (ExprKind::New { fields: a }, ExprKind::New { fields: b }) = (outer.kind(), inner.kind()) {
        if a.len() == b.len() && a.iter().zip(b).all(|((n, _), (m, _))| n == m) {
            if let Some(all) = and_all(a.iter().zip(b).map(|((_, x), (_, y))| x.eq(y.clone()))) {
                return all;
            }
        }
    }
    outer.eq(inner.clone())
}

/// `(a IS NULL AND b IS NULL) OR a = b` for each pair.
fn nulls_equal(a: &[ExprRef], b: &[ExprRef]) -> Option<ExprRef> {
    and_all(a.iter().zip(b).map(|(x, y)| {
        is_null(x.clone())
            .and(is_null(y.clone()))
            .or(x.eq(y.clone()))
    }))
}

const fn aggregate_kind(op: AggregateOp) -> AggregateKind {
    match op {
        AggregateOp::Count => AggregateKind::Count,
        AggregateOp::Sum => AggregateKind::Sum,
        AggregateOp::Min => AggregateKind::Min,
        AggregateOp::Max => AggregateKind::Max,
        AggregateOp::Average => AggregateKind::Average,
    }
}

const fn element_aggregator(kind: ElementKind) -> Aggregator {
    match kind {
        ElementKind::First | ElementKind::Last => Aggregator::First,
        ElementKind::FirstOrDefault | ElementKind::LastOrDefault => Aggregator::FirstOrDefault,
        ElementKind::Single => Aggregator::Single,
        ElementKind::SingleOrDefault => Aggregator::SingleOrDefault,
    }
}

/// Member access on a bound value. Record and entity constructions yield
/// the field; outer-joined and conditional values push the access inside;
/// unresolved entity members stay as typed member nodes for the
/// relationship binder.
pub(crate) fn bind_member(
    mapping: &dyn Mapping,
    object: &ExprRef,
    member: &str,
    ty: &Type,
) -> Result<ExprRef> {
    match object.kind() {
        ExprKind::New { .. } | ExprKind::Entity { .. } => {
            if let Some(field) = record_field(object, member) {
                return Ok(field);
            }
        }
        ExprKind::OuterJoined { test, expr } => {
            let inner = bind_member(mapping, expr, member, ty)?;
            if inner.as_column().is_some() {
                return Ok(inner);
            }
            return Ok(outer_joined(test.clone(), inner));
        }
        ExprKind::Conditional {
            test,
            if_true,
            if_false,
        } => {
            return Ok(conditional(
                test.clone(),
                bind_member(mapping, if_true, member, ty)?,
                bind_member(mapping, if_false, member, ty)?,
            ));
        }
        ExprKind::Constant(Value::Object(o)) => {
            let value = o.get(member).cloned().unwrap_or(Value::NULL);
            return Ok(constant(value, ty.clone()));
        }
        ExprKind::Constant(v) if v.is_null() => return Ok(null(ty.clone())),
        _ => {}
    }
    if let Type::Entity(name) = object.ty() {
        let def = mapping.entity(name)?;
        let m = def.find(member)?;
        let member_ty = match &m.kind {
            MemberKind::Column { ty, .. } => ty.clone(),
            MemberKind::Association { related, many, .. } => {
                let related = Type::Entity(related.clone());
                if *many {
                    Type::sequence(related)
                } else {
                    related
                }
            }
            MemberKind::Nested { entity } => Type::Entity(entity.clone()),
        };
        return Ok(member_typed(object.clone(), member, member_ty));
    }
    Ok(member_typed(object.clone(), member, ty.clone()))
}

impl Rewriter for QueryBinder<'_> {
    fn rewrite(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        match expr.kind() {
            ExprKind::Query(op) => self.bind_query(expr, op),
            ExprKind::Parameter(p) => self
                .map
                .get(&p.id)
                .cloned()
                .ok_or_else(|| QueryError::invalid(format!("parameter {} is not bound", p.name))),
            ExprKind::Member { object, member } => {
                let object = self.rewrite(object)?;
                bind_member(self.mapper.mapping(), &object, member, expr.ty())
            }
            _ => walk(self, expr),
        }
    }
}

impl QueryBinder<'_> {
    fn is_root(&self, expr: &ExprRef) -> bool {
        self.root.as_ref().is_some_and(|r| same(r, expr))
    }

    fn project(
        &self,
        affinity: Affinity,
        expr: &ExprRef,
        alias: TableAlias,
        existing: &[TableAlias],
    ) -> Result<ProjectedColumns> {
        project_columns(self.dialect, affinity, expr, &[], alias, existing)
    }

    fn bind_lambda(&mut self, lambda: &ExprRef, args: &[ExprRef]) -> Result<ExprRef> {
        let (params, body) = lambda_parts(lambda, args.len())?;
        for (p, a) in params.iter().zip(args) {
            self.map.insert(p.id, a.clone());
        }
        self.rewrite(body)
    }

    fn visit_sequence(&mut self, expr: &ExprRef) -> Result<Source> {
        let bound = self.rewrite(expr)?;
        let seq = self.convert_to_sequence(&bound)?;
        Source::of(&seq)
    }

    fn convert_to_sequence(&self, bound: &ExprRef) -> Result<ExprRef> {
        match bound.kind() {
            ExprKind::Projection(_) => Ok(bound.clone()),
            ExprKind::New { .. } if matches!(bound.ty(), Type::Grouping { .. }) => {
                let group = record_field(bound, "Group")
                    .ok_or_else(|| QueryError::invalid("grouping without elements"))?;
                self.convert_to_sequence(&group)
            }
            ExprKind::Member { object, member } => match object.ty() {
                Type::Entity(entity) => {
                    let p = self.mapper.member_expression(object, entity, member)?;
                    self.convert_to_sequence(&p)
                }
                _ => Err(QueryError::unsupported(format!(
                    "member {member} used as a query source"
                ))),
            },
            ExprKind::OuterJoined { expr, .. } => self.convert_to_sequence(expr),
            _ => Err(QueryError::unsupported(format!(
                "{} used as a query source",
                bound.kind_name()
            ))),
        }
    }

    #[allow(clippy::too_many_lines)]
    fn bind_query(&mut self, expr: &ExprRef, op: &QueryOp) -> Result<ExprRef> {
        match op {
            QueryOp::Source { entity } => self.mapper.table_query(entity),
            QueryOp::Where { source, predicate } => {
                let src = self.visit_sequence(source)?;
                let w = self.bind_lambda(predicate, &[src.projector.clone()])?;
                self.rewrap(&src, |s| s.where_clause = Some(w))
            }
            QueryOp::Select { source, selector } => {
                let src = self.visit_sequence(source)?;
                let body = self.bind_lambda(selector, &[src.projector.clone()])?;
                let alias = TableAlias::new();
                let pc = self.project(Affinity::Server, &body, alias, &[src.alias])?;
                let s = SelectExpr::new(alias, pc.columns, Some(src.select));
                Ok(projection(select(s), pc.projector, None))
            }
            QueryOp::SelectMany {
                source,
                collection,
                result,
            } => self.bind_select_many(source, collection, result.as_ref()),
            QueryOp::Join {
                outer,
                inner,
                outer_key,
                inner_key,
                result,
            } => self.bind_join(outer, inner, outer_key, inner_key, result),
            QueryOp::GroupJoin {
                outer,
                inner,
                outer_key,
                inner_key,
                result,
            } => self.bind_group_join(outer, inner, outer_key, inner_key, result),
            QueryOp::OrderBy { .. } => self.bind_order_by(expr),
            QueryOp::GroupBy {
                source,
                key,
                element,
                result,
            } => self.bind_group_by(source, key, element.as_ref(), result.as_ref()),
            QueryOp::Distinct { source } => {
                let src = self.visit_sequence(source)?;
                self.rewrap(&src, |s| s.distinct = true)
            }
            QueryOp::Reverse { source } => {
                let src = self.visit_sequence(source)?;
                self.rewrap(&src, |s| s.reverse = true)
            }
            QueryOp::Skip { source, count } => {
                let src = self.visit_sequence(source)?;
                let count = self.rewrite(count)?;
                self.rewrap(&src, |s| s.skip = Some(count))
            }
            QueryOp::Take { source, count } => {
                let src = self.visit_sequence(source)?;
                let count = self.rewrite(count)?;
                self.rewrap(&src, |s| s.take = Some(count))
            }
            QueryOp::Element {
                source,
                kind,
                predicate,
            } => self.bind_element(expr, source, *kind, predicate.as_ref()),
            QueryOp::Aggregate {
                source,
                op,
                selector,
            } => self.bind_aggregate(expr, source, *op, selector.as_ref()),
            QueryOp::Any { source, predicate } => {
                let src = self.visit_sequence(source)?;
                let filtered = match predicate {
                    Some(p) => self.filter(&src, p, false)?,
                    None => src.select,
                };
                Ok(self.value_at_root(expr, exists(filtered)))
            }
            QueryOp::All { source, predicate } => {
                let src = self.visit_sequence(source)?;
                let filtered = self.filter(&src, predicate, true)?;
                Ok(self.value_at_root(expr, not(exists(filtered))))
            }
            QueryOp::Contains { source, item } => self.bind_contains(expr, source, item),
            QueryOp::SetOp { kind, left, right } => self.bind_set_op(*kind, left, right),
            QueryOp::DefaultIfEmpty { source } => {
                if self.is_root(expr) {
                    return Err(QueryError::unsupported("default_if_empty at the query root"));
                }
                let src = self.visit_sequence(source)?;
                let alias = TableAlias::new();
                let pc = self.project(Affinity::Client, &src.projector, alias, &[src.alias])?;
                let mut columns = pc.columns;
                let test = crate::ast::unique_column_name(&columns, "test");
                columns.push(ColumnDecl::new(test.clone(), lit(1)));
                let projector = outer_joined(column(alias, test, Type::Int), pc.projector);
                let s = SelectExpr::new(alias, columns, Some(src.select));
                Ok(projection(select(s), projector, None))
            }
        }
    }

    /// A new select over `src` carrying the same projector, adjusted by `f`.
    fn rewrap(&self, src: &Source, f: impl FnOnce(&mut SelectExpr)) -> Result<ExprRef> {
        let alias = TableAlias::new();
        let pc = self.project(Affinity::Client, &src.projector, alias, &[src.alias])?;
        let mut s = SelectExpr::new(alias, pc.columns, Some(src.select.clone()));
        f(&mut s);
        Ok(projection(select(s), pc.projector, None))
    }

    /// The source select filtered by a predicate, optionally negated.
    fn filter(&mut self, src: &Source, predicate: &ExprRef, negate: bool) -> Result<ExprRef> {
        let mut w = self.bind_lambda(predicate, &[src.projector.clone()])?;
        if negate {
            w = not(w);
        }
        let p = self.rewrap(src, |s| s.where_clause = Some(w))?;
        Source::of(&p).map(|s| s.select)
    }

    /// At the root a scalar value is computed by a FROM-less select.
    fn value_at_root(&self, expr: &ExprRef, value: ExprRef) -> ExprRef {
        if !self.is_root(expr) {
            return value;
        }
        let alias = TableAlias::new();
        let ty = value.ty().clone();
        let s = SelectExpr::new(alias, vec![ColumnDecl::new("value", value)], None);
        projection(select(s), column(alias, "value", ty), Some(Aggregator::Scalar))
    }

    fn bind_select_many(
        &mut self,
        source: &ExprRef,
        collection: &ExprRef,
        result: Option<&ExprRef>,
    ) -> Result<ExprRef> {
        let src = self.visit_sequence(source)?;
        let bound = self.bind_lambda(collection, &[src.projector.clone()])?;
        let coll = Source::of(&self.convert_to_sequence(&bound)?)?;
        let outer = matches!(coll.projector.kind(), ExprKind::OuterJoined { .. });
        let correlated = referenced_aliases(&coll.select).contains(&src.alias);
        let kind = match (correlated, outer) {
            (_, true) => JoinKind::OuterApply,
            (true, false) => JoinKind::CrossApply,
            (false, false) => JoinKind::CrossJoin,
        };
        let from = crate::ast::join(kind, src.select.clone(), coll.select.clone(), None);
        let body = match result {
            Some(r) => self.bind_lambda(r, &[src.projector.clone(), coll.projector.clone()])?,
            None => coll.projector.clone(),
        };
        let alias = TableAlias::new();
        let pc = self.project(Affinity::Server, &body, alias, &[src.alias, coll.alias])?;
        let s = SelectExpr::new(alias, pc.columns, Some(from));
        Ok(projection(select(s), pc.projector, None))
    }

    fn bind_join(
        &mut self,
        outer: &ExprRef,
        inner: &ExprRef,
        outer_key: &ExprRef,
        inner_key: &ExprRef,
        result: &ExprRef,
    ) -> Result<ExprRef> {
        let o = self.visit_sequence(outer)?;
        let i = self.visit_sequence(inner)?;
        let ok = self.bind_lambda(outer_key, &[o.projector.clone()])?;
        let ik = self.bind_lambda(inner_key, &[i.projector.clone()])?;
        let body = self.bind_lambda(result, &[o.projector.clone(), i.projector.clone()])?;
        let from = crate::ast::join(
            JoinKind::InnerJoin,
            o.select.clone(),
            i.select.clone(),
            Some(key_equality(&ok, &ik)),
        );
        let alias = TableAlias::new();
        let pc = self.project(Affinity::Server, &body, alias, &[o.alias, i.alias])?;
        let s = SelectExpr::new(alias, pc.columns, Some(from));
        Ok(projection(select(s), pc.projector, None))
    }

    fn bind_group_join(
        &mut self,
        outer: &ExprRef,
        inner: &ExprRef,
        outer_key: &ExprRef,
        inner_key: &ExprRef,
        result: &ExprRef,
    ) -> Result<ExprRef> {
        let o = self.visit_sequence(outer)?;
        let i = self.visit_sequence(inner)?;
        let ok = self.bind_lambda(outer_key, &[o.projector.clone()])?;
        let ik = self.bind_lambda(inner_key, &[i.projector.clone()])?;
        let elements = self.rewrap(&i, |s| s.where_clause = Some(key_equality(&ik, &ok)))?;
        let body = self.bind_lambda(result, &[o.projector.clone(), elements])?;
        let alias = TableAlias::new();
        let pc = self.project(Affinity::Server, &body, alias, &[o.alias])?;
        let s = SelectExpr::new(alias, pc.columns, Some(o.select));
        Ok(projection(select(s), pc.projector, None))
    }

    fn bind_order_by(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let mut keys: Vec<(ExprRef, bool)> = Vec::new();
        let mut current = expr.clone();
        let base = loop {
            match current.kind() {
                ExprKind::Query(QueryOp::OrderBy {
                    source,
                    key,
                    descending,
                    then,
                }) => {
                    keys.push((key.clone(), *descending));
                    if !then {
                        break source.clone();
                    }
                    current = source.clone();
                }
                _ => return Err(QueryError::invalid("then_by without a preceding order_by")),
            }
        };
        keys.reverse();
        let src = self.visit_sequence(&base)?;
        let mut order_by = Vec::with_capacity(keys.len());
        for (key, descending) in keys {
            let e = self.bind_lambda(&key, &[src.projector.clone()])?;
            if matches!(e.kind(), ExprKind::New { .. } | ExprKind::Entity { .. }) {
                return Err(QueryError::unsupported("ordering by a structured value"));
            }
            let kind = if descending {
                OrderKind::Descending
            } else {
                OrderKind::Ascending
            };
            order_by.push(OrderExpr::new(kind, e));
        }
        self.rewrap(&src, |s| s.order_by = order_by)
    }

    fn bind_group_by(
        &mut self,
        source: &ExprRef,
        key: &ExprRef,
        element: Option<&ExprRef>,
        result: Option<&ExprRef>,
    ) -> Result<ExprRef> {
        let src = self.visit_sequence(source)?;
        let key_expr = self.bind_lambda(key, &[src.projector.clone()])?;
        let elem_expr = match element {
            Some(e) => self.bind_lambda(e, &[src.projector.clone()])?,
            None => src.projector.clone(),
        };
        let key_pc = self.project(Affinity::Server, &key_expr, src.alias, &[src.alias])?;
        let group_exprs: Vec<ExprRef> = key_pc.columns.iter().map(|c| c.expr.clone()).collect();

        // The element subquery runs over a second binding of the source,
        // correlated to the group by key.
        let basis = self.visit_sequence(source)?;
        let sub_key = self.bind_lambda(key, &[basis.projector.clone()])?;
        let sub_key_pc = self.project(Affinity::Server, &sub_key, basis.alias, &[basis.alias])?;
        let sub_exprs: Vec<ExprRef> = sub_key_pc.columns.iter().map(|c| c.expr.clone()).collect();
        let sub_elem = match element {
            Some(e) => self.bind_lambda(e, &[basis.projector.clone()])?,
            None => basis.projector.clone(),
        };
        let correlation = nulls_equal(&sub_exprs, &group_exprs);
        let element_alias = TableAlias::new();
        let elem_pc = self.project(Affinity::Client, &sub_elem, element_alias, &[basis.alias])?;
        let mut es = SelectExpr::new(element_alias, elem_pc.columns, Some(basis.select));
        es.where_clause = correlation;
        let element_subquery = projection(select(es), elem_pc.projector, None);

        let alias = TableAlias::new();
        let info = GroupByInfo {
            alias,
            element: elem_expr,
        };
        self.group_by_map.push((element_subquery.clone(), info.clone()));

        let result_expr = match result {
            Some(r) => {
                let saved = self.current_group_element.replace(element_subquery.clone());
                let bound = self.bind_lambda(r, &[key_expr.clone(), element_subquery]);
                self.current_group_element = saved;
                bound?
            }
            None => grouping(key_expr, element_subquery),
        };
        let pc = self.project(Affinity::Server, &result_expr, alias, &[src.alias])?;
        if result.is_none() {
            if let Some(group) = record_field(&pc.projector, "Group") {
                self.group_by_map.push((group, info));
            }
        }
        let mut s = SelectExpr::new(alias, pc.columns, Some(src.select));
        s.group_by = group_exprs;
        Ok(projection(select(s), pc.projector, None))
    }

    fn group_info(&self, projection: &ExprRef) -> Option<GroupByInfo> {
        self.group_by_map
            .iter()
            .find(|(e, _)| same(e, projection))
            .map(|(_, info)| info.clone())
    }

    fn bind_element(
        &mut self,
        expr: &ExprRef,
        source: &ExprRef,
        kind: ElementKind,
        predicate: Option<&ExprRef>,
    ) -> Result<ExprRef> {
        let src = self.visit_sequence(source)?;
        let w = predicate
            .map(|p| self.bind_lambda(p, &[src.projector.clone()]))
            .transpose()?;
        let alias = TableAlias::new();
        let pc = self.project(Affinity::Client, &src.projector, alias, &[src.alias])?;
        let scalar = !self.is_root(expr)
            && pc.projector.ty().is_scalar()
            && pc.projector.as_column().is_some()
            && pc.columns.len() == 1;
        let mut s = SelectExpr::new(alias, pc.columns, Some(src.select));
        s.where_clause = w;
        s.reverse = kind.is_last();
        s.take = Some(lit(if kind.is_single() && !scalar { 2 } else { 1 }));
        if scalar {
            return Ok(scalar_subquery(select(s)));
        }
        Ok(projection(
            select(s),
            pc.projector,
            Some(element_aggregator(kind)),
        ))
    }

    fn aggregate_select(
        &mut self,
        src: &Source,
        kind: AggregateKind,
        selector: Option<&ExprRef>,
        ty: &Type,
    ) -> Result<ExprRef> {
        let arg = match selector {
            Some(s) => Some(self.bind_lambda(s, &[src.projector.clone()])?),
            None if kind == AggregateKind::Count => None,
            None => Some(src.projector.clone()),
        };
        let decl = ColumnDecl::new("agg", aggregate(kind, arg, false, ty.clone()));
        Ok(select(SelectExpr::new(
            TableAlias::new(),
            vec![decl],
            Some(src.select.clone()),
        )))
    }

    fn bind_aggregate(
        &mut self,
        expr: &ExprRef,
        source: &ExprRef,
        op: AggregateOp,
        selector: Option<&ExprRef>,
    ) -> Result<ExprRef> {
        let kind = aggregate_kind(op);
        let ty = expr.ty().clone();
        let src = self.visit_sequence(source)?;
        if let Some(info) = self.group_info(&src.expr) {
            let arg = match selector {
                Some(s) => Some(self.bind_lambda(s, &[info.element.clone()])?),
                None if kind == AggregateKind::Count => None,
                None => Some(info.element.clone()),
            };
            let in_group = aggregate(kind, arg, false, ty.clone());
            if self
                .current_group_element
                .as_ref()
                .is_some_and(|g| same(g, &src.expr))
            {
                return Ok(in_group);
            }
            let sub = self.aggregate_select(&src, kind, selector, &ty)?;
            return Ok(aggregate_subquery(info.alias, in_group, scalar_subquery(sub)));
        }
        let sub = self.aggregate_select(&src, kind, selector, &ty)?;
        if self.is_root(expr) {
            let alias = sub
                .as_select()
                .map(|s| s.alias)
                .ok_or_else(|| QueryError::invalid("aggregate without select"))?;
            return Ok(projection(sub, column(alias, "agg", ty), Some(Aggregator::Scalar)));
        }
        Ok(scalar_subquery(sub))
    }

    fn bind_contains(&mut self, expr: &ExprRef, source: &ExprRef, item: &ExprRef) -> Result<ExprRef> {
        let bound = self.rewrite(source)?;
        let item = self.rewrite(item)?;
        if let ExprKind::Constant(Value::List(values)) = bound.kind() {
            let element = bound.ty().element().cloned().unwrap_or_default();
            let values = values
                .iter()
                .map(|v| constant(v.clone(), element.clone()))
                .collect();
            return Ok(self.value_at_root(expr, in_values(item, values)));
        }
        let src = Source::of(&self.convert_to_sequence(&bound)?)?;
        let alias = TableAlias::new();
        let pc = self.project(Affinity::Client, &src.projector, alias, &[src.alias])?;
        if pc.columns.len() != 1 {
            return Err(QueryError::unsupported("contains over rows with several columns"));
        }
        let s = SelectExpr::new(alias, pc.columns, Some(src.select));
        Ok(self.value_at_root(expr, in_select(item, select(s))))
    }

    fn bind_set_op(&mut self, kind: SetOpKind, left: &ExprRef, right: &ExprRef) -> Result<ExprRef> {
        let l = self.visit_sequence(left)?;
        let r = self.visit_sequence(right)?;
        let la = TableAlias::new();
        let lpc = self.project(Affinity::Client, &l.projector, la, &[l.alias])?;
        let ra = TableAlias::new();
        let rpc = self.project(Affinity::Client, &r.projector, ra, &[r.alias])?;
        if lpc.columns.len() != rpc.columns.len() {
            return Err(QueryError::unsupported(format!(
                "{} of rows with {} and {} columns",
                kind.as_str(),
                lpc.columns.len(),
                rpc.columns.len()
            )));
        }
        let right_columns = rpc
            .columns
            .into_iter()
            .zip(&lpc.columns)
            .map(|(c, l)| ColumnDecl {
                name: l.name.clone(),
                ..c
            })
            .collect();
        let s = TableAlias::new();
        let combined = set_operation(
            s,
            kind,
            select(SelectExpr::new(la, lpc.columns, Some(l.select))),
            select(SelectExpr::new(ra, right_columns, Some(r.select))),
        );
        let projector = ColumnMapper::map(HashSet::from([la]), s, &lpc.projector)?;
        let alias = TableAlias::new();
        let pc = self.project(Affinity::Client, &projector, alias, &[s])?;
        let outer = SelectExpr::new(alias, pc.columns, Some(combined));
        Ok(projection(select(outer), pc.projector, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{ExprExt, Query, TreePrinter};
    use crate::dialect::GenericDialect;
    use crate::mapping::tests::northwind;
    use crate::policy::QueryPolicy;
    use crate::value::SqlValue;
    use crate::visit::check_scopes;

    fn bind_query(q: &ExprRef) -> Result<ExprRef> {
        let mapping = northwind();
        let policy = QueryPolicy::new();
        let mapper = QueryMapper::new(&mapping, &policy);
        bind(&mapper, &GenericDialect::new(), q)
    }

    #[test]
    fn test_where_binds_to_filtered_select() {
        let q = Query::from("Customer")
            .filter(|c| c.member("City").eq(lit("London")))
            .into_expr();
        let bound = bind_query(&q).unwrap();
        let p = bound.as_projection().unwrap();
        let s = p.select.as_select().unwrap();
        assert!(s.where_clause.is_some());
        assert!(matches!(p.projector.kind(), ExprKind::Entity { .. }));
        check_scopes(&bound).unwrap();
    }

    #[test]
    fn test_select_projects_server_expressions() {
        let q = Query::from("Order")
            .select(|o| o.member("Total").mul(lit(2.0)))
            .into_expr();
        let bound = bind_query(&q).unwrap();
        let s = bound.as_projection().unwrap().select.as_select().unwrap().clone();
        assert_eq!(s.columns.len(), 1);
        assert_eq!(s.columns[0].name, "c0");
        check_scopes(&bound).unwrap();
    }

    #[test]
    fn test_count_at_root_is_scalar_projection() {
        let q = Query::from("Order").count();
        let bound = bind_query(&q).unwrap();
        let p = bound.as_projection().unwrap();
        assert_eq!(p.aggregator, Some(Aggregator::Scalar));
        let printed = TreePrinter::new().print(&bound);
        assert!(printed.contains("COUNT"), "{printed}");
    }

    #[test]
    fn test_group_by_with_count_uses_group_aggregate() {
        let q = Query::from("Order")
            .group_by_result(
                |o| o.member("CustomerId"),
                |k, g| {
                    crate::ast::new_record(vec![
                        ("Customer".into(), k),
                        ("Orders".into(), g.query().count()),
                    ])
                },
            )
            .into_expr();
        let bound = bind_query(&q).unwrap();
        let s = bound.as_projection().unwrap().select.as_select().unwrap().clone();
        assert_eq!(s.group_by.len(), 1);
        assert!(s
            .columns
            .iter()
            .any(|c| matches!(c.expr.kind(), ExprKind::Aggregate(_))));
        check_scopes(&bound).unwrap();
    }

    #[test]
    fn test_collection_member_in_select_many_is_apply() {
        let q = Query::from("Customer")
            .select_many(|c| c.member("Orders"), |_, o| o)
            .into_expr();
        let bound = bind_query(&q).unwrap();
        let s = bound.as_projection().unwrap().select.as_select().unwrap().clone();
        match s.from.as_ref().unwrap().kind() {
            ExprKind::Join(j) => assert_eq!(j.kind, JoinKind::CrossApply),
            other => panic!("expected join, found {other:?}"),
        }
        check_scopes(&bound).unwrap();
    }

    #[test]
    fn test_unknown_member_is_a_mapping_error() {
        let q = Query::from("Customer")
            .filter(|c| c.member("Nickname").eq(lit("x")))
            .into_expr();
        let err = bind_query(&q).unwrap_err();
        assert!(matches!(err, QueryError::Mapping { .. }), "{err}");
    }

    #[test]
    fn test_wrong_lambda_arity_is_invalid() {
        let p = Parameter::new("x", Type::Entity("Customer".into()));
        let q = Parameter::new("y", Type::Int);
        let bad = crate::ast::lambda(vec![p, q], lit(true));
        let source = Query::from("Customer").into_expr();
        let e = crate::ast::query(
            QueryOp::Where {
                source: source.clone(),
                predicate: bad,
            },
            source.ty().clone(),
        );
        assert!(matches!(bind_query(&e), Err(QueryError::InvalidQuery(_))));
    }

    #[test]
    fn test_contains_over_constant_list() {
        let q = Query::from("Customer")
            .filter(|c| {
                crate::ast::list(vec![SqlValue::Int(1), SqlValue::Int(2)])
                    .query()
                    .contains(c.member("Id"))
            })
            .into_expr();
        let bound = bind_query(&q).unwrap();
        let w = bound
            .as_projection()
            .unwrap()
            .select
            .as_select()
            .unwrap()
            .where_clause
            .clone()
            .unwrap();
        assert!(matches!(w.kind(), ExprKind::In(_)));
    }

    #[test]
    fn test_union_declares_set_source() {
        let q = Query::from("Customer")
            .filter(|c| c.member("City").eq(lit("Oslo")))
            .union(Query::from("Customer").filter(|c| c.member("City").eq(lit("Bergen"))))
            .into_expr();
        let bound = bind_query(&q).unwrap();
        let s = bound.as_projection().unwrap().select.as_select().unwrap().clone();
        assert!(matches!(s.from.as_ref().unwrap().kind(), ExprKind::SetOp(_)));
        check_scopes(&bound).unwrap();
    }
}
