//! Builds relational expressions and write commands from entity mappings.

use std::collections::HashMap;

use super::def::{EntityDef, MemberDef, MemberKind};
use super::Mapping;
use crate::ast::{
    self, and_all, call, column, constant, entity, exists, new_record, projection, select, table,
    unique_column_name, Aggregator, ColumnAssignment, ColumnDecl, ExprExt, ExprKind, ExprRef,
    Function, SelectExpr, TableAlias, Type,
};
use crate::error::{QueryError, Result};
use crate::policy::QueryPolicy;
use crate::value::{Object, SqlValue, Value};
use crate::visit::{fold_members, record_field, substitute_params};

/// Aliases of the primary table and extension tables of one entity.
struct TableAliases {
    primary: TableAlias,
    extensions: HashMap<String, TableAlias>,
}

impl TableAliases {
    fn new(def: &EntityDef) -> Self {
        Self {
            primary: TableAlias::new(),
            extensions: def
                .extension_tables
                .iter()
                .map(|e| (e.name.clone(), TableAlias::new()))
                .collect(),
        }
    }

    fn of(&self, table: Option<&str>) -> Result<TableAlias> {
        match table {
            None => Ok(self.primary),
            Some(t) => self
                .extensions
                .get(t)
                .copied()
                .ok_or_else(|| QueryError::invalid(format!("unknown extension table {t}"))),
        }
    }
}

/// Turns mapping metadata into expressions.
pub struct QueryMapper<'a> {
    mapping: &'a dyn Mapping,
    policy: &'a QueryPolicy,
}

impl std::fmt::Debug for QueryMapper<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryMapper")
            .field("policy", self.policy)
            .finish_non_exhaustive()
    }
}

impl<'a> QueryMapper<'a> {
    /// Creates a mapper.
    pub fn new(mapping: &'a dyn Mapping, policy: &'a QueryPolicy) -> Self {
        Self { mapping, policy }
    }

    /// The mapping capability.
    #[must_use]
    pub fn mapping(&self) -> &'a dyn Mapping {
        self.mapping
    }

    /// The eager-loading policy.
    #[must_use]
    pub fn policy(&self) -> &'a QueryPolicy {
        self.policy
    }

    /// Projection of every instance of `entity`: a select over its tables
    /// and an entity projector over the select's columns.
    pub fn table_query(&self, entity: &str) -> Result<ExprRef> {
        self.table_query_in(entity, &mut Vec::new())
    }

    fn table_query_in(&self, name: &str, chain: &mut Vec<String>) -> Result<ExprRef> {
        let def = self.mapping.entity(name)?;
        let aliases = TableAliases::new(&def);
        let source = self.table_source(&def, &aliases)?;
        let select_alias = TableAlias::new();
        let mut columns: Vec<ColumnDecl> = Vec::new();
        let mut lift = |t: Option<&str>, col: &str, ty: &Type| -> Result<ExprRef> {
            let inner = column(aliases.of(t)?, col, ty.clone());
            if let Some(existing) = columns
                .iter()
                .find(|c| c.expr.as_column() == inner.as_column())
            {
                return Ok(column(select_alias, existing.name.clone(), ty.clone()));
            }
            let decl_name = unique_column_name(&columns, col);
            columns.push(ColumnDecl::new(decl_name.clone(), inner));
            Ok(column(select_alias, decl_name, ty.clone()))
        };
        let projector = self.entity_expression_with(&def, &mut lift, chain)?;
        let sel = select(SelectExpr::new(select_alias, columns, Some(source)));
        Ok(projection(sel, projector, None))
    }

    fn table_source(&self, def: &EntityDef, aliases: &TableAliases) -> Result<ExprRef> {
        let mut source = table(aliases.primary, Some(def.name.clone()), def.table.clone());
        for ext in &def.extension_tables {
            let alias = aliases.of(Some(&ext.name))?;
            let conditions = ext
                .key_columns
                .iter()
                .zip(&ext.related_key_columns)
                .map(|(key, related)| {
                    let ty = primary_column_type(def, related);
                    column(alias, key.clone(), ty.clone()).eq(column(aliases.primary, related.clone(), ty))
                });
            source = ast::join(
                ast::JoinKind::LeftOuter,
                source,
                table(alias, Some(def.name.clone()), ext.name.clone()),
                and_all(conditions),
            );
        }
        Ok(source)
    }

    /// Entity construction over columns of the given table alias. Extension
    /// table columns are not reachable through this form and fail.
    pub fn entity_expression(&self, entity_name: &str, alias: TableAlias) -> Result<ExprRef> {
        let def = self.mapping.entity(entity_name)?;
        let mut resolve = |t: Option<&str>, col: &str, ty: &Type| -> Result<ExprRef> {
            match t {
                None => Ok(column(alias, col, ty.clone())),
                Some(t) => Err(QueryError::mapping(
                    entity_name,
                    col,
                    format!("column lives in extension table {t}"),
                )),
            }
        };
        self.entity_expression_with(&def, &mut resolve, &mut Vec::new())
    }

    fn entity_expression_with(
        &self,
        def: &EntityDef,
        resolve: &mut dyn FnMut(Option<&str>, &str, &Type) -> Result<ExprRef>,
        chain: &mut Vec<String>,
    ) -> Result<ExprRef> {
        let mut fields: Vec<(String, ExprRef)> = Vec::new();
        for m in &def.members {
            match &m.kind {
                MemberKind::Column {
                    column, table, ty, ..
                } => fields.push((m.name.clone(), resolve(table.as_deref(), column, ty)?)),
                MemberKind::Nested { entity: nested } => {
                    let nested_def = self.mapping.entity(nested)?;
                    let value = self.entity_expression_with(&nested_def, resolve, chain)?;
                    fields.push((m.name.clone(), value));
                }
                MemberKind::Association { .. } => {}
            }
        }
        let included: Vec<&MemberDef> = def
            .members
            .iter()
            .filter(|m| m.is_association() && self.policy.is_included(&def.name, &m.name))
            .collect();
        if !included.is_empty() && !chain.contains(&def.name) {
            chain.push(def.name.clone());
            for m in included {
                let partial = entity(def.name.clone(), new_record(fields.clone()));
                let value = self.association_query(&partial, def, m, chain)?;
                fields.push((m.name.clone(), value));
            }
            chain.pop();
        }
        Ok(entity(def.name.clone(), new_record(fields)))
    }

    /// Expression for `root.member`, where `root` is an entity construction
    /// of `entity_name`. Associations become correlated projections;
    /// collections keep their row sequence, singletons are single-or-default.
    pub fn member_expression(
        &self,
        root: &ExprRef,
        entity_name: &str,
        member: &str,
    ) -> Result<ExprRef> {
        if let Some(field) = record_field(root, member) {
            return Ok(field);
        }
        let def = self.mapping.entity(entity_name)?;
        let m = def.find(member)?;
        if m.is_association() {
            return self.association_query(root, &def, m, &mut Vec::new());
        }
        Err(QueryError::mapping(
            entity_name,
            member,
            "member is not part of this entity expression",
        ))
    }

    fn association_query(
        &self,
        root: &ExprRef,
        def: &EntityDef,
        m: &MemberDef,
        chain: &mut Vec<String>,
    ) -> Result<ExprRef> {
        let MemberKind::Association {
            related,
            keys,
            related_keys,
            many,
        } = &m.kind
        else {
            return Err(QueryError::mapping(&def.name, &m.name, "member is not an association"));
        };
        let query = self.table_query_in(related, chain)?;
        let (sel, projector) = match query.kind() {
            ExprKind::Projection(p) => match p.select.as_select() {
                Some(s) => (s.clone(), p.projector.clone()),
                None => return Err(QueryError::invalid("table query without select")),
            },
            _ => return Err(QueryError::invalid("table query is not a projection")),
        };
        let mut predicates = Vec::with_capacity(keys.len());
        for (key, related_key) in keys.iter().zip(related_keys) {
            let outer = record_field(root, key)
                .ok_or_else(|| QueryError::mapping(&def.name, key, "key member not projected"))?;
            let projected = record_field(&projector, related_key)
                .ok_or_else(|| QueryError::mapping(related, related_key, "key member not projected"))?;
            let inner = match projected.as_column() {
                Some(c) if c.alias == sel.alias => sel
                    .column(&c.name)
                    .map_or_else(|| projected.clone(), |d| d.expr.clone()),
                _ => projected.clone(),
            };
            predicates.push(inner.eq(outer));
        }
        let mut filtered = sel;
        filtered.where_clause = and_all(predicates);
        let aggregator = if *many {
            None
        } else {
            Some(Aggregator::SingleOrDefault)
        };
        Ok(projection(select(filtered), projector, aggregator))
    }

    /// `INSERT` of an instance. Generated members are read back by a
    /// follow-up single-row projection; extension tables are written after
    /// the primary table.
    pub fn insert_command(&self, entity_name: &str, instance: &Object) -> Result<ExprRef> {
        let def = self.mapping.entity(entity_name)?;
        let alias = TableAlias::new();
        let assignments = def
            .column_members()
            .filter(|m| !m.is_generated() && column_table(m).is_none())
            .map(|m| assign(alias, m, instance))
            .collect::<Result<Vec<_>>>()?;
        let mut commands = vec![ast::insert(
            table(alias, Some(def.name.clone()), def.table.clone()),
            assignments,
        )];
        let generated: Vec<&MemberDef> = def.column_members().filter(|m| m.is_generated()).collect();
        if !generated.is_empty() {
            commands.push(self.read_back(&def, instance, &generated)?);
        }
        for ext in &def.extension_tables {
            let xa = TableAlias::new();
            let mut assignments = Vec::new();
            for (key, related) in ext.key_columns.iter().zip(&ext.related_key_columns) {
                let owner = def
                    .column_members()
                    .find(|m| column_table(m).is_none() && m.column_name() == Some(related.as_str()))
                    .ok_or_else(|| QueryError::mapping(&def.name, related, "extension key is not mapped"))?;
                let ty = owner.column_type().cloned().unwrap_or_default();
                let value = if owner.is_generated() {
                    call(Function::GeneratedIdentity, Vec::new())
                } else {
                    member_constant(owner, instance)
                };
                assignments.push(ColumnAssignment {
                    column: column(xa, key.clone(), ty),
                    value,
                });
            }
            for m in def
                .column_members()
                .filter(|m| !m.is_generated() && column_table(m) == Some(ext.name.as_str()))
            {
                assignments.push(assign(xa, m, instance)?);
            }
            commands.push(ast::insert(
                table(xa, Some(def.name.clone()), ext.name.clone()),
                assignments,
            ));
        }
        Ok(single_or_block(commands))
    }

    fn read_back(&self, def: &EntityDef, instance: &Object, members: &[&MemberDef]) -> Result<ExprRef> {
        let ta = TableAlias::new();
        let sa = TableAlias::new();
        let predicates = def
            .primary_key_members()
            .map(|m| {
                let col = column(ta, member_column(def, m)?, m.column_type().cloned().unwrap_or_default());
                Ok(if m.is_generated() {
                    col.eq(call(Function::GeneratedIdentity, Vec::new()))
                } else {
                    col.eq(member_constant(m, instance))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let mut columns: Vec<ColumnDecl> = Vec::new();
        let mut fields = Vec::new();
        for m in members {
            let ty = m.column_type().cloned().unwrap_or_default();
            let name = unique_column_name(&columns, member_column(def, m)?);
            columns.push(ColumnDecl::new(name.clone(), column(ta, member_column(def, m)?, ty.clone())));
            fields.push((m.name.clone(), column(sa, name, ty)));
        }
        let mut s = SelectExpr::new(
            sa,
            columns,
            Some(table(ta, Some(def.name.clone()), def.table.clone())),
        );
        s.where_clause = and_all(predicates);
        Ok(projection(select(s), new_record(fields), Some(Aggregator::Single)))
    }

    /// `UPDATE` of an instance's writable columns, filtered by primary key
    /// and the optional `check` lambda over the stored entity.
    pub fn update_command(
        &self,
        entity_name: &str,
        instance: &Object,
        check: Option<&ExprRef>,
    ) -> Result<ExprRef> {
        let def = self.mapping.entity(entity_name)?;
        let alias = TableAlias::new();
        let assignments = def
            .column_members()
            .filter(|m| writable(m) && column_table(m).is_none())
            .map(|m| assign(alias, m, instance))
            .collect::<Result<Vec<_>>>()?;
        let predicate = self.key_predicate(&def, alias, instance, check)?;
        let mut commands = vec![ast::update(
            table(alias, Some(def.name.clone()), def.table.clone()),
            predicate,
            assignments,
        )];
        for ext in &def.extension_tables {
            let xa = TableAlias::new();
            let assignments = def
                .column_members()
                .filter(|m| writable(m) && column_table(m) == Some(ext.name.as_str()))
                .map(|m| assign(xa, m, instance))
                .collect::<Result<Vec<_>>>()?;
            if assignments.is_empty() {
                continue;
            }
            let predicate = extension_key_predicate(&def, ext, xa, instance)?;
            commands.push(ast::update(
                table(xa, Some(def.name.clone()), ext.name.clone()),
                predicate,
                assignments,
            ));
        }
        let generated: Vec<&MemberDef> = def
            .column_members()
            .filter(|m| m.is_generated() && !m.is_primary_key())
            .collect();
        if !generated.is_empty() {
            commands.push(self.read_back(&def, instance, &generated)?);
        }
        Ok(single_or_block(commands))
    }

    /// `DELETE` of an instance; extension rows go first.
    pub fn delete_command(
        &self,
        entity_name: &str,
        instance: &Object,
        check: Option<&ExprRef>,
    ) -> Result<ExprRef> {
        let def = self.mapping.entity(entity_name)?;
        let mut commands = Vec::new();
        for ext in def.extension_tables.iter().rev() {
            let xa = TableAlias::new();
            let predicate = extension_key_predicate(&def, ext, xa, instance)?;
            commands.push(ast::delete(
                table(xa, Some(def.name.clone()), ext.name.clone()),
                Some(predicate),
            ));
        }
        let alias = TableAlias::new();
        let predicate = self.key_predicate(&def, alias, instance, check)?;
        commands.push(ast::delete(
            table(alias, Some(def.name.clone()), def.table.clone()),
            Some(predicate),
        ));
        Ok(single_or_block(commands))
    }

    /// Updates the instance when a row with its key exists, inserts it
    /// otherwise.
    pub fn insert_or_update_command(&self, entity_name: &str, instance: &Object) -> Result<ExprRef> {
        let def = self.mapping.entity(entity_name)?;
        let alias = TableAlias::new();
        let mut s = SelectExpr::new(
            TableAlias::new(),
            Vec::new(),
            Some(table(alias, Some(def.name.clone()), def.table.clone())),
        );
        s.where_clause = Some(self.key_predicate(&def, alias, instance, None)?);
        let check = exists(select(s));
        let update = self.update_command(entity_name, instance, None)?;
        let insert = self.insert_command(entity_name, instance)?;
        Ok(ast::if_command(check, update, Some(insert)))
    }

    fn key_predicate(
        &self,
        def: &EntityDef,
        alias: TableAlias,
        instance: &Object,
        check: Option<&ExprRef>,
    ) -> Result<ExprRef> {
        let mut predicates = def
            .primary_key_members()
            .filter(|m| column_table(m).is_none())
            .map(|m| {
                let ty = m.column_type().cloned().unwrap_or_default();
                Ok(column(alias, member_column(def, m)?, ty).eq(member_constant(m, instance)))
            })
            .collect::<Result<Vec<_>>>()?;
        if let Some(check) = check {
            predicates.push(self.bind_check(def, alias, check)?);
        }
        and_all(predicates).ok_or_else(|| {
            QueryError::mapping(&def.name, "<primary key>", "entity declares no primary key member")
        })
    }

    fn bind_check(&self, def: &EntityDef, alias: TableAlias, check: &ExprRef) -> Result<ExprRef> {
        let ExprKind::Lambda { params, body } = check.kind() else {
            return Err(QueryError::invalid("check predicate must be a lambda"));
        };
        let [p] = params.as_slice() else {
            return Err(QueryError::invalid("check predicate takes exactly one parameter"));
        };
        let row = self.entity_expression(&def.name, alias)?;
        let bound = substitute_params(body, &HashMap::from([(p.id, row)]))?;
        fold_members(&bound)
    }
}

fn primary_column_type(def: &EntityDef, column_name: &str) -> Type {
    def.column_members()
        .find(|m| m.column_name() == Some(column_name) && column_table(m).is_none())
        .and_then(MemberDef::column_type)
        .cloned()
        .unwrap_or_default()
}

fn column_table(m: &MemberDef) -> Option<&str> {
    match &m.kind {
        MemberKind::Column { table, .. } => table.as_deref(),
        _ => None,
    }
}

fn member_column<'d>(def: &EntityDef, m: &'d MemberDef) -> Result<&'d str> {
    m.column_name()
        .ok_or_else(|| QueryError::mapping(&def.name, &m.name, "member is not a column"))
}

const fn writable(m: &MemberDef) -> bool {
    !m.is_primary_key() && !m.is_generated() && !m.is_read_only()
}

fn member_constant(m: &MemberDef, instance: &Object) -> ExprRef {
    let ty = m.column_type().cloned().unwrap_or_default();
    let value = match instance.get(&m.name) {
        Some(Value::Scalar(v)) => v.clone(),
        _ => SqlValue::Null,
    };
    constant(Value::Scalar(value), ty)
}

fn assign(alias: TableAlias, m: &MemberDef, instance: &Object) -> Result<ColumnAssignment> {
    let name = m
        .column_name()
        .ok_or_else(|| QueryError::mapping("<instance>", &m.name, "member is not a column"))?;
    let ty = m.column_type().cloned().unwrap_or_default();
    Ok(ColumnAssignment {
        column: column(alias, name, ty),
        value: member_constant(m, instance),
    })
}

fn extension_key_predicate(
    def: &EntityDef,
    ext: &super::def::ExtensionTable,
    alias: TableAlias,
    instance: &Object,
) -> Result<ExprRef> {
    let predicates = ext
        .key_columns
        .iter()
        .zip(&ext.related_key_columns)
        .map(|(key, related)| {
            let owner = def
                .column_members()
                .find(|m| column_table(m).is_none() && m.column_name() == Some(related.as_str()))
                .ok_or_else(|| QueryError::mapping(&def.name, related, "extension key is not mapped"))?;
            let ty = owner.column_type().cloned().unwrap_or_default();
            Ok(column(alias, key.clone(), ty).eq(member_constant(owner, instance)))
        })
        .collect::<Result<Vec<_>>>()?;
    and_all(predicates)
        .ok_or_else(|| QueryError::mapping(&def.name, &ext.name, "extension table has no key columns"))
}

fn single_or_block(mut commands: Vec<ExprRef>) -> ExprRef {
    if commands.len() == 1 {
        if let Some(only) = commands.pop() {
            return only;
        }
    }
    ast::block(commands)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{lit, TreePrinter};
    use crate::mapping::tests::northwind;
    use crate::mapping::{MappingRegistry, StaticMappingSource};
    use crate::visit::check_scopes;

    fn print(e: &ExprRef) -> String {
        TreePrinter::new().print(e)
    }

    #[test]
    fn test_table_query_shape() {
        let m = northwind();
        let policy = QueryPolicy::new();
        let q = QueryMapper::new(&m, &policy).table_query("Customer").unwrap();
        assert_eq!(
            print(&q),
            "Projection(Select(t0 [Id: t1.Id, Name: t1.Name, City: t1.City] from=Table(t1 Customers)), \
             Entity<Customer>(new {Id = t0.Id, Name = t0.Name, City = t0.City}))"
        );
        check_scopes(&q).unwrap();
    }

    #[test]
    fn test_included_association_is_correlated() {
        let m = northwind();
        let policy = QueryPolicy::new().include("Customer", "Orders");
        let q = QueryMapper::new(&m, &policy).table_query("Customer").unwrap();
        let p = q.as_projection().unwrap();
        let orders = record_field(&p.projector, "Orders").unwrap();
        let inner = orders.as_projection().unwrap();
        assert!(inner.aggregator.is_none());
        let where_clause = inner.select.as_select().unwrap().where_clause.clone().unwrap();
        assert!(print(&where_clause).contains(".CustomerId = "));
        check_scopes(&q).unwrap();
    }

    #[test]
    fn test_singleton_member_expression() {
        let m = northwind();
        let policy = QueryPolicy::new();
        let mapper = QueryMapper::new(&m, &policy);
        let root = mapper.entity_expression("Order", TableAlias::new()).unwrap();
        let customer = mapper.member_expression(&root, "Order", "Customer").unwrap();
        assert_eq!(
            customer.as_projection().unwrap().aggregator,
            Some(Aggregator::SingleOrDefault)
        );
        let total = mapper.member_expression(&root, "Order", "Total").unwrap();
        assert!(total.as_column().is_some());
        assert!(mapper.member_expression(&root, "Order", "Nope").is_err());
    }

    #[test]
    fn test_insert_reads_back_generated_key() {
        let m = northwind();
        let policy = QueryPolicy::new();
        let order = Object::new("Order").with("CustomerId", 7).with("Total", 9.5);
        let cmd = QueryMapper::new(&m, &policy).insert_command("Order", &order).unwrap();
        let ExprKind::Block(parts) = cmd.kind() else {
            panic!("expected block, got {}", print(&cmd));
        };
        assert_eq!(parts.len(), 2);
        assert_eq!(
            print(&parts[0]),
            "Insert(Table(t0 Orders), t0.CustomerId = 7, t0.Total = 9.5)"
        );
        assert!(print(&parts[1]).contains("IDENTITY[]"));
    }

    #[test]
    fn test_update_with_check() {
        let m = northwind();
        let policy = QueryPolicy::new();
        let customer = Object::new("Customer").with("Id", 1).with("Name", "Ann").with("City", "Oslo");
        let check = crate::ast::Query::from("Customer")
            .filter(|c| c.member("City").eq(lit("Bergen")))
            .into_expr();
        let ExprKind::Query(crate::ast::QueryOp::Where { predicate, .. }) = check.kind() else {
            panic!("expected where");
        };
        let cmd = QueryMapper::new(&m, &policy)
            .update_command("Customer", &customer, Some(predicate))
            .unwrap();
        assert_eq!(
            print(&cmd),
            "Update(Table(t0 Customers), t0.Name = 'Ann', t0.City = 'Oslo' where=((t0.Id = 1) AND (t0.City = 'Bergen')))"
        );
    }

    #[test]
    fn test_multi_table_entity() {
        let source = StaticMappingSource::new().with(
            EntityDef::new("Person", "People")
                .extension_table("PersonDetails", &["PersonId"], &["Id"])
                .member(MemberDef::column("Id", Type::Int).primary_key().generated())
                .member(MemberDef::column("Name", Type::Text))
                .member(MemberDef::column("Bio", Type::Text).in_table("PersonDetails")),
        );
        let m = MappingRegistry::new(source);
        let policy = QueryPolicy::new();
        let mapper = QueryMapper::new(&m, &policy);
        let q = mapper.table_query("Person").unwrap();
        assert!(print(&q).contains("LeftOuter(Table(t1 People), Table(t2 PersonDetails) on=(t2.PersonId = t1.Id))"));
        check_scopes(&q).unwrap();

        let person = Object::new("Person").with("Name", "Ada").with("Bio", "math");
        let cmd = mapper.insert_command("Person", &person).unwrap();
        let ExprKind::Block(parts) = cmd.kind() else {
            panic!("expected block");
        };
        assert_eq!(parts.len(), 3);
        assert!(print(&parts[2]).starts_with("Insert(Table(t0 PersonDetails), t0.PersonId = IDENTITY[]"));

        let delete = mapper.delete_command("Person", &person.with("Id", 4), None).unwrap();
        let ExprKind::Block(parts) = delete.kind() else {
            panic!("expected block");
        };
        assert!(print(&parts[0]).contains("PersonDetails"));
    }

    #[test]
    fn test_insert_or_update_is_conditional() {
        let m = northwind();
        let policy = QueryPolicy::new();
        let customer = Object::new("Customer").with("Id", 1).with("Name", "Ann");
        let cmd = QueryMapper::new(&m, &policy)
            .insert_or_update_command("Customer", &customer)
            .unwrap();
        assert!(matches!(cmd.kind(), ExprKind::If { if_false: Some(_), .. }));
    }
}
