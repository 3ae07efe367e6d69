//! Entity to table mapping.
//!
//! [`Mapping`] is the capability the binder, the command builder and the
//! session consume. [`MappingRegistry`] implements it over any
//! [`MappingSource`], caching validated definitions behind a reader/writer
//! lock.

mod def;
mod mapper;
mod source;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

pub use def::{ConstructorDef, EntityDef, ExtensionTable, MemberDef, MemberKind};
pub use mapper::QueryMapper;
pub use source::{JsonMappingSource, MappingDocument, MappingSource, StaticMappingSource};

use crate::error::{QueryError, Result};
use crate::value::{Object, SqlValue, Value};

/// Metadata about mapped entities.
///
/// Only [`Mapping::entity`] is required; everything else is derived from the
/// definition it returns.
pub trait Mapping: Send + Sync {
    /// The validated definition of `entity`.
    fn entity(&self, entity: &str) -> Result<Arc<EntityDef>>;

    /// Primary table of an entity.
    fn table_name(&self, entity: &str) -> Result<String> {
        Ok(self.entity(entity)?.table.clone())
    }

    /// Column storing a member.
    fn column_name(&self, entity: &str, member: &str) -> Result<String> {
        let def = self.entity(entity)?;
        def.find(member)?
            .column_name()
            .map(ToString::to_string)
            .ok_or_else(|| QueryError::mapping(entity, member, "member is not a column"))
    }

    /// Is the member part of the primary key.
    fn is_primary_key(&self, entity: &str, member: &str) -> Result<bool> {
        Ok(self.entity(entity)?.find(member)?.is_primary_key())
    }

    /// Is the member generated by the database.
    fn is_generated(&self, entity: &str, member: &str) -> Result<bool> {
        Ok(self.entity(entity)?.find(member)?.is_generated())
    }

    /// Is the member read-only.
    fn is_read_only(&self, entity: &str, member: &str) -> Result<bool> {
        Ok(self.entity(entity)?.find(member)?.is_read_only())
    }

    /// Is the member stored in a column.
    fn is_column(&self, entity: &str, member: &str) -> Result<bool> {
        Ok(self.entity(entity)?.find(member)?.is_column())
    }

    /// Is the member a nested value object.
    fn is_nested_entity(&self, entity: &str, member: &str) -> Result<bool> {
        Ok(self.entity(entity)?.find(member)?.is_nested())
    }

    /// Does the member navigate to other entities.
    fn is_relationship(&self, entity: &str, member: &str) -> Result<bool> {
        self.is_association_relationship(entity, member)
    }

    /// Is the member an association matched by key members.
    fn is_association_relationship(&self, entity: &str, member: &str) -> Result<bool> {
        Ok(self.entity(entity)?.find(member)?.is_association())
    }

    /// Does this entity hold the foreign key of the association.
    fn is_relationship_source(&self, entity: &str, member: &str) -> Result<bool> {
        self.entity(entity)?.is_relationship_source(member)
    }

    /// Is the association collection-valued.
    fn is_many(&self, entity: &str, member: &str) -> Result<bool> {
        match &self.entity(entity)?.find(member)?.kind {
            MemberKind::Association { many, .. } => Ok(*many),
            _ => Ok(false),
        }
    }

    /// Entity reached through an association or nested member.
    fn related_entity(&self, entity: &str, member: &str) -> Result<String> {
        match &self.entity(entity)?.find(member)?.kind {
            MemberKind::Association { related, .. } => Ok(related.clone()),
            MemberKind::Nested { entity: nested } => Ok(nested.clone()),
            MemberKind::Column { .. } => Err(QueryError::mapping(
                entity,
                member,
                "member is not a relationship",
            )),
        }
    }

    /// Local key members of an association.
    fn association_key_members(&self, entity: &str, member: &str) -> Result<Vec<String>> {
        match &self.entity(entity)?.find(member)?.kind {
            MemberKind::Association { keys, .. } => Ok(keys.clone()),
            _ => Err(QueryError::mapping(entity, member, "member is not an association")),
        }
    }

    /// Related key members of an association.
    fn association_related_key_members(&self, entity: &str, member: &str) -> Result<Vec<String>> {
        match &self.entity(entity)?.find(member)?.kind {
            MemberKind::Association { related_keys, .. } => Ok(related_keys.clone()),
            _ => Err(QueryError::mapping(entity, member, "member is not an association")),
        }
    }

    /// Primary-key member names.
    fn primary_key_members(&self, entity: &str) -> Result<Vec<String>> {
        Ok(self
            .entity(entity)?
            .primary_key_members()
            .map(|m| m.name.clone())
            .collect())
    }

    /// Primary-key values of an instance.
    fn primary_key(&self, entity: &str, instance: &Object) -> Result<Vec<SqlValue>> {
        self.primary_key_members(entity)?
            .iter()
            .map(|m| match instance.get(m) {
                Some(Value::Scalar(v)) => Ok(v.clone()),
                None => Ok(SqlValue::Null),
                Some(_) => Err(QueryError::mapping(entity, m, "primary key is not a scalar")),
            })
            .collect()
    }

    /// Related instances this instance depends on: the targets of
    /// associations whose foreign key it holds.
    fn dependent_entities(&self, entity: &str, instance: &Object) -> Result<Vec<Object>> {
        related_instances(self, entity, instance, true)
    }

    /// Related instances that depend on this one.
    fn depending_entities(&self, entity: &str, instance: &Object) -> Result<Vec<Object>> {
        related_instances(self, entity, instance, false)
    }

    /// Snapshot of the column and nested members of an instance.
    fn clone_entity(&self, entity: &str, instance: &Object) -> Result<Object> {
        let def = self.entity(entity)?;
        let mut copy = Object::new(entity);
        for m in def.members.iter().filter(|m| !m.is_association()) {
            if let Some(v) = instance.get(&m.name) {
                copy.set(m.name.clone(), v.clone());
            }
        }
        Ok(copy)
    }

    /// Does any column or nested member differ from the snapshot.
    fn is_modified(&self, entity: &str, instance: &Object, original: &Object) -> Result<bool> {
        let def = self.entity(entity)?;
        Ok(def
            .members
            .iter()
            .filter(|m| !m.is_association())
            .any(|m| instance.get(&m.name) != original.get(&m.name)))
    }
}

fn related_instances<M: Mapping + ?Sized>(
    mapping: &M,
    entity: &str,
    instance: &Object,
    sources: bool,
) -> Result<Vec<Object>> {
    let def = mapping.entity(entity)?;
    let mut out = Vec::new();
    for m in def.members.iter().filter(|m| m.is_association()) {
        if def.is_relationship_source(&m.name)? != sources {
            continue;
        }
        match instance.get(&m.name) {
            Some(Value::Object(o)) => out.push(o.clone()),
            Some(Value::List(items)) => {
                out.extend(items.iter().filter_map(Value::as_object).cloned());
            }
            _ => {}
        }
    }
    Ok(out)
}

/// A [`Mapping`] over a [`MappingSource`] with a metadata cache.
///
/// Lookups take the read lock; a miss takes the write lock and checks again
/// before loading, so concurrent misses load each entity once.
#[derive(Debug)]
pub struct MappingRegistry<S> {
    source: S,
    cache: RwLock<HashMap<String, Arc<EntityDef>>>,
    version: AtomicU64,
}

impl<S: MappingSource> MappingRegistry<S> {
    /// Creates a registry with an empty cache.
    pub fn new(source: S) -> Self {
        Self {
            source,
            cache: RwLock::new(HashMap::new()),
            version: AtomicU64::new(0),
        }
    }

    /// The underlying source.
    pub const fn source(&self) -> &S {
        &self.source
    }

    /// Incremented whenever the cache is cleared.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Drops every cached definition.
    pub fn invalidate(&self) -> Result<()> {
        let mut cache = self
            .cache
            .write()
            .map_err(|_| QueryError::Poisoned("mapping cache"))?;
        cache.clear();
        self.version.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Loads and validates every entity the source knows.
    pub fn validate_all(&self) -> Result<()> {
        for name in self.source.entity_names() {
            let def = self.entity(&name)?;
            for m in &def.members {
                match &m.kind {
                    MemberKind::Association { related, .. } => {
                        let target = self.entity(related)?;
                        if let MemberKind::Association { related_keys, .. } = &m.kind {
                            for k in related_keys {
                                target.find(k)?;
                            }
                        }
                    }
                    MemberKind::Nested { entity } => {
                        self.entity(entity)?;
                    }
                    MemberKind::Column { .. } => {}
                }
            }
        }
        Ok(())
    }
}

impl<S: MappingSource> Mapping for MappingRegistry<S> {
    fn entity(&self, entity: &str) -> Result<Arc<EntityDef>> {
        {
            let cache = self
                .cache
                .read()
                .map_err(|_| QueryError::Poisoned("mapping cache"))?;
            if let Some(def) = cache.get(entity) {
                return Ok(Arc::clone(def));
            }
        }
        let mut cache = self
            .cache
            .write()
            .map_err(|_| QueryError::Poisoned("mapping cache"))?;
        if let Some(def) = cache.get(entity) {
            return Ok(Arc::clone(def));
        }
        let def = self
            .source
            .load(entity)?
            .ok_or_else(|| QueryError::UnknownEntity(entity.to_string()))?;
        def.validate()?;
        tracing::debug!(entity, table = %def.table, "Loaded entity mapping");
        let def = Arc::new(def);
        cache.insert(entity.to_string(), Arc::clone(&def));
        Ok(def)
    }
}

impl<M: Mapping + ?Sized> Mapping for Arc<M> {
    fn entity(&self, entity: &str) -> Result<Arc<EntityDef>> {
        (**self).entity(entity)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ast::Type;

    /// Customer/Order/OrderDetail fixture shared by tests across the crate.
    pub(crate) fn northwind() -> MappingRegistry<StaticMappingSource> {
        let source = StaticMappingSource::new()
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
                    ))
                    .member(MemberDef::association(
                        "Details",
                        "OrderDetail",
                        &["Id"],
                        &["OrderId"],
                        true,
                    )),
            )
            .with(
                EntityDef::new("OrderDetail", "OrderDetails")
                    .member(MemberDef::column("OrderId", Type::Int).primary_key())
                    .member(MemberDef::column("ProductId", Type::Int).primary_key())
                    .member(MemberDef::column("Quantity", Type::Int))
                    .member(MemberDef::association(
                        "Order",
                        "Order",
                        &["OrderId"],
                        &["Id"],
                        false,
                    )),
            );
        MappingRegistry::new(source)
    }

    #[test]
    fn test_capability_queries() {
        let m = northwind();
        assert_eq!(m.table_name("Customer").unwrap(), "Customers");
        assert_eq!(m.column_name("Order", "CustomerId").unwrap(), "CustomerId");
        assert!(m.is_primary_key("Order", "Id").unwrap());
        assert!(m.is_generated("Order", "Id").unwrap());
        assert!(m.is_relationship("Order", "Customer").unwrap());
        assert_eq!(m.related_entity("Customer", "Orders").unwrap(), "Order");
        assert_eq!(
            m.association_related_key_members("Customer", "Orders").unwrap(),
            vec!["CustomerId".to_string()]
        );
        assert!(matches!(
            m.entity("Nope"),
            Err(QueryError::UnknownEntity(name)) if name == "Nope"
        ));
        assert!(m.validate_all().is_ok());
    }

    #[test]
    fn test_dependent_and_depending_entities() {
        let m = northwind();
        let customer = Object::new("Customer").with("Id", 1);
        let order = Object::new("Order")
            .with("Id", 10)
            .with("CustomerId", 1)
            .with("Customer", customer.clone());
        let deps = m.dependent_entities("Order", &order).unwrap();
        assert_eq!(deps, vec![customer]);
        assert!(m.depending_entities("Order", &order).unwrap().is_empty());

        let with_orders =
            Object::new("Customer").with("Id", 1).with("Orders", Value::List(vec![order.into()]));
        assert_eq!(m.depending_entities("Customer", &with_orders).unwrap().len(), 1);
    }

    #[test]
    fn test_clone_and_modification() {
        let m = northwind();
        let c = Object::new("Customer").with("Id", 1).with("Name", "Ann");
        let snapshot = m.clone_entity("Customer", &c).unwrap();
        assert!(!m.is_modified("Customer", &c, &snapshot).unwrap());
        let changed = c.with("Name", "Bob");
        assert!(m.is_modified("Customer", &changed, &snapshot).unwrap());
        assert_eq!(
            m.primary_key("Customer", &changed).unwrap(),
            vec![SqlValue::Int(1)]
        );
    }

    #[test]
    fn test_invalidate_bumps_version() {
        let m = northwind();
        m.entity("Customer").unwrap();
        assert_eq!(m.version(), 0);
        m.invalidate().unwrap();
        assert_eq!(m.version(), 1);
        assert!(m.entity("Customer").is_ok());
    }
}
