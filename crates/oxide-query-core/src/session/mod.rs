//! Change tracking for one unit of work.
//!
//! A [`Session`] keeps every instance it has seen in an arena, at most one
//! per entity and primary key. Instances materialized by queries start as
//! [`TrackState::PossibleUpdate`] and become [`TrackState::Update`] once a
//! change is detected. Explicit inserts and deletes set the state directly.
//! [`Session::pending_changes`] builds the commands for everything that
//! changed, in an order that respects the dependencies between instances.

mod order;

use std::collections::HashMap;

pub use order::topological_order;

use crate::ast::ExprRef;
use crate::config::TrackingMode;
use crate::entity::Entity;
use crate::error::{QueryError, Result};
use crate::mapping::{Mapping, QueryMapper};
use crate::materialize::key_of;
use crate::value::{Object, SqlValue, Value};

/// Lifecycle of a tracked instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackState {
    /// Not tracked, or removed by a submitted delete.
    None,
    /// Materialized; unchanged as far as the session knows.
    PossibleUpdate,
    /// Changed since it was materialized.
    Update,
    /// To be inserted.
    Insert,
    /// To be deleted.
    Delete,
    /// To be updated if a row with its key exists, inserted otherwise.
    InsertOrUpdate,
}

impl TrackState {
    /// Returns true for states that produce a command on submit.
    #[must_use]
    pub const fn is_pending(self) -> bool {
        matches!(
            self,
            Self::Update | Self::Insert | Self::Delete | Self::InsertOrUpdate
        )
    }
}

/// Index of a tracked instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(usize);

#[derive(Debug, Clone)]
struct TrackedItem {
    entity: String,
    instance: Object,
    original: Option<Object>,
    state: TrackState,
    notified: bool,
}

/// One command produced by [`Session::pending_changes`].
#[derive(Debug, Clone)]
pub struct PendingChange {
    /// The instance.
    pub item: ItemId,
    /// Entity name.
    pub entity: String,
    /// State the command realizes.
    pub state: TrackState,
    /// Command tree.
    pub command: ExprRef,
}

/// Tracked instances of one unit of work.
///
/// Not meant for concurrent mutation; use one session per task.
pub struct Session<'m> {
    mapping: &'m dyn Mapping,
    mode: TrackingMode,
    items: Vec<TrackedItem>,
    identity: HashMap<(String, String), ItemId>,
}

impl std::fmt::Debug for Session<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("mode", &self.mode)
            .field("items", &self.items.len())
            .finish_non_exhaustive()
    }
}

impl<'m> Session<'m> {
    /// An empty session.
    #[must_use]
    pub fn new(mapping: &'m dyn Mapping, mode: TrackingMode) -> Self {
        Self {
            mapping,
            mode,
            items: Vec::new(),
            identity: HashMap::new(),
        }
    }

    /// The mapping the session was created with.
    #[must_use]
    pub fn mapping(&self) -> &'m dyn Mapping {
        self.mapping
    }

    /// Number of tracked instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true when nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn identity_key(&self, entity: &str, instance: &Object) -> Result<Option<(String, String)>> {
        let key = self
            .mapping
            .primary_key(entity, instance)?
            .into_iter()
            .map(Value::Scalar)
            .collect::<Vec<_>>();
        Ok(key_of(&key).map(|k| (entity.to_string(), k)))
    }

    fn find(&self, entity: &str, instance: &Object) -> Result<Option<ItemId>> {
        if let Some(key) = self.identity_key(entity, instance)? {
            return Ok(self.identity.get(&key).copied());
        }
        // Keys still to be generated: match by value.
        Ok(self
            .items
            .iter()
            .position(|i| i.entity == entity && i.instance == *instance)
            .map(ItemId))
    }

    fn track(&mut self, entity: &str, instance: Object, state: TrackState) -> Result<ItemId> {
        let key = self.identity_key(entity, &instance)?;
        if let Some(id) = key.as_ref().and_then(|k| self.identity.get(k)).copied() {
            let item = &mut self.items[id.0];
            // Re-inserting a deleted key needs both commands.
            let reinsert = item.state == TrackState::Delete
                && matches!(state, TrackState::Insert | TrackState::InsertOrUpdate);
            if !reinsert {
                if state != TrackState::PossibleUpdate {
                    item.instance = instance;
                    item.state = state;
                }
                return Ok(id);
            }
        }
        let original = match (self.mode, state) {
            (TrackingMode::Snapshot, TrackState::PossibleUpdate) => {
                Some(self.mapping.clone_entity(entity, &instance)?)
            }
            _ => None,
        };
        let id = ItemId(self.items.len());
        self.items.push(TrackedItem {
            entity: entity.to_string(),
            instance,
            original,
            state,
            notified: false,
        });
        if let Some(k) = key {
            self.identity.insert(k, id);
        }
        Ok(id)
    }

    /// Tracks an instance read by a query. An instance already tracked
    /// under the same key keeps its current value.
    pub fn attach(&mut self, entity: &str, instance: Object) -> Result<ItemId> {
        self.track(entity, instance, TrackState::PossibleUpdate)
    }

    /// Attaches every entity in a materialized value, including those
    /// nested in records, lists and loaded associations.
    pub fn attach_value(&mut self, value: &Value) -> Result<Vec<ItemId>> {
        let mut ids = Vec::new();
        let mut stack = vec![value];
        while let Some(v) = stack.pop() {
            match v {
                Value::List(items) => stack.extend(items.iter().rev()),
                Value::Object(o) => {
                    if let Some(entity) = &o.entity {
                        ids.push(self.attach(entity, o.clone())?);
                    }
                    stack.extend(o.fields.values().filter(|v| v.as_scalar().is_none()));
                }
                Value::Scalar(_) => {}
            }
        }
        Ok(ids)
    }

    /// Schedules an insert.
    pub fn insert(&mut self, entity: &str, instance: Object) -> Result<ItemId> {
        self.track(entity, instance, TrackState::Insert)
    }

    /// Schedules a delete.
    pub fn delete(&mut self, entity: &str, instance: Object) -> Result<ItemId> {
        self.track(entity, instance, TrackState::Delete)
    }

    /// Schedules an insert-or-update.
    pub fn insert_or_update(&mut self, entity: &str, instance: Object) -> Result<ItemId> {
        self.track(entity, instance, TrackState::InsertOrUpdate)
    }

    /// Schedules an insert of a typed entity.
    pub fn insert_entity<E: Entity>(&mut self, value: &E) -> Result<ItemId> {
        self.insert(E::NAME, value.to_object())
    }

    /// Schedules a delete of a typed entity.
    pub fn delete_entity<E: Entity>(&mut self, value: &E) -> Result<ItemId> {
        self.delete(E::NAME, value.to_object())
    }

    fn item(&self, id: ItemId) -> Result<&TrackedItem> {
        self.items
            .get(id.0)
            .ok_or_else(|| QueryError::invalid(format!("no tracked item {}", id.0)))
    }

    /// Current state of an item.
    pub fn state(&self, id: ItemId) -> Result<TrackState> {
        Ok(self.item(id)?.state)
    }

    /// Current value of an item.
    pub fn instance(&self, id: ItemId) -> Result<&Object> {
        Ok(&self.item(id)?.instance)
    }

    /// Mutable access to an item's value.
    pub fn instance_mut(&mut self, id: ItemId) -> Result<&mut Object> {
        self.items
            .get_mut(id.0)
            .map(|i| &mut i.instance)
            .ok_or_else(|| QueryError::invalid(format!("no tracked item {}", id.0)))
    }

    /// Records that an item changed, for [`TrackingMode::Notify`].
    pub fn notify_modified(&mut self, id: ItemId) -> Result<()> {
        let item = self
            .items
            .get_mut(id.0)
            .ok_or_else(|| QueryError::invalid(format!("no tracked item {}", id.0)))?;
        item.notified = true;
        Ok(())
    }

    /// Promotes changed instances from `PossibleUpdate` to `Update`.
    pub fn detect_changes(&mut self) -> Result<()> {
        for i in 0..self.items.len() {
            let item = &self.items[i];
            if item.state != TrackState::PossibleUpdate {
                continue;
            }
            let modified = match (self.mode, &item.original) {
                (TrackingMode::Notify, _) => item.notified,
                (TrackingMode::Snapshot, Some(original)) => {
                    self.mapping
                        .is_modified(&item.entity, &item.instance, original)?
                }
                (TrackingMode::Snapshot, None) => false,
            };
            if modified {
                self.items[i].state = TrackState::Update;
            }
        }
        Ok(())
    }

    fn describe(&self, i: usize) -> String {
        let item = &self.items[i];
        let key = self
            .mapping
            .primary_key(&item.entity, &item.instance)
            .map(|k| k.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "))
            .unwrap_or_default();
        format!("{}[{key}]", item.entity)
    }

    /// Pending items in commit order.
    ///
    /// An insert follows the instances it depends on and any delete of an
    /// instance with the same key. A delete follows the instances that
    /// depend on it.
    pub fn commit_order(&self) -> Result<Vec<ItemId>> {
        let mut before: Vec<Vec<usize>> = vec![Vec::new(); self.items.len()];
        for (i, item) in self.items.iter().enumerate() {
            match item.state {
                TrackState::Insert | TrackState::InsertOrUpdate => {
                    for dep in self.mapping.dependent_entities(&item.entity, &item.instance)? {
                        let entity = dep.entity.clone().unwrap_or_default();
                        if let Some(d) = self.find(&entity, &dep)? {
                            if d.0 != i && self.items[d.0].state.is_pending() {
                                before[i].push(d.0);
                            }
                        }
                    }
                    let key = self.mapping.primary_key(&item.entity, &item.instance)?;
                    for (j, other) in self.items.iter().enumerate() {
                        if j != i
                            && other.state == TrackState::Delete
                            && other.entity == item.entity
                            && !key.iter().any(SqlValue::is_null)
                            && self.mapping.primary_key(&other.entity, &other.instance)? == key
                        {
                            before[i].push(j);
                        }
                    }
                }
                TrackState::Delete => {
                    for dep in self.mapping.depending_entities(&item.entity, &item.instance)? {
                        let entity = dep.entity.clone().unwrap_or_default();
                        if let Some(d) = self.find(&entity, &dep)? {
                            if d.0 != i && self.items[d.0].state.is_pending() {
                                before[i].push(d.0);
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        let order = topological_order(self.items.len(), &before, |i| self.describe(i))?;
        Ok(order
            .into_iter()
            .filter(|i| self.items[*i].state.is_pending())
            .map(ItemId)
            .collect())
    }

    /// Detects changes and builds one command per pending item, in commit
    /// order.
    pub fn pending_changes(&mut self, mapper: &QueryMapper<'_>) -> Result<Vec<PendingChange>> {
        self.detect_changes()?;
        let order = self.commit_order()?;
        let mut changes = Vec::with_capacity(order.len());
        for id in order {
            let item = &self.items[id.0];
            let command = match item.state {
                TrackState::Insert => mapper.insert_command(&item.entity, &item.instance)?,
                TrackState::Update => mapper.update_command(&item.entity, &item.instance, None)?,
                TrackState::Delete => mapper.delete_command(&item.entity, &item.instance, None)?,
                TrackState::InsertOrUpdate => {
                    mapper.insert_or_update_command(&item.entity, &item.instance)?
                }
                TrackState::None | TrackState::PossibleUpdate => continue,
            };
            changes.push(PendingChange {
                item: id,
                entity: item.entity.clone(),
                state: item.state,
                command,
            });
        }
        Ok(changes)
    }

    /// Merges values read back by a submitted command (generated keys and
    /// the like) into an item.
    pub fn merge_read_back(&mut self, id: ItemId, value: &Value) -> Result<()> {
        let Some(record) = value.as_object() else {
            return Ok(());
        };
        let item = self
            .items
            .get_mut(id.0)
            .ok_or_else(|| QueryError::invalid(format!("no tracked item {}", id.0)))?;
        for (member, v) in &record.fields {
            item.instance.set(member.clone(), v.clone());
        }
        Ok(())
    }

    /// Marks submitted items as persisted. Inserted and updated items
    /// become `PossibleUpdate` with a fresh snapshot; deleted items leave
    /// the identity map.
    pub fn accept_changes(&mut self, submitted: &[ItemId]) -> Result<()> {
        let mut counts: HashMap<&'static str, usize> = HashMap::new();
        for id in submitted {
            let (entity, state) = {
                let item = self.item(*id)?;
                (item.entity.clone(), item.state)
            };
            match state {
                TrackState::Insert | TrackState::InsertOrUpdate | TrackState::Update => {
                    let key = self.identity_key(&entity, &self.items[id.0].instance)?;
                    let snapshot = match self.mode {
                        TrackingMode::Snapshot => Some(
                            self.mapping
                                .clone_entity(&entity, &self.items[id.0].instance)?,
                        ),
                        TrackingMode::Notify => None,
                    };
                    let item = &mut self.items[id.0];
                    item.state = TrackState::PossibleUpdate;
                    item.original = snapshot;
                    item.notified = false;
                    if let Some(k) = key {
                        self.identity.insert(k, *id);
                    }
                    *counts.entry(state_name(state)).or_default() += 1;
                }
                TrackState::Delete => {
                    if let Some(k) = self.identity_key(&entity, &self.items[id.0].instance)? {
                        if self.identity.get(&k) == Some(id) {
                            self.identity.remove(&k);
                        }
                    }
                    let item = &mut self.items[id.0];
                    item.state = TrackState::None;
                    item.original = None;
                    *counts.entry("delete").or_default() += 1;
                }
                TrackState::None | TrackState::PossibleUpdate => {}
            }
        }
        tracing::info!(
            inserted = counts.get("insert").copied().unwrap_or(0),
            updated = counts.get("update").copied().unwrap_or(0),
            upserted = counts.get("insert_or_update").copied().unwrap_or(0),
            deleted = counts.get("delete").copied().unwrap_or(0),
            "Session changes accepted"
        );
        Ok(())
    }
}

const fn state_name(state: TrackState) -> &'static str {
    match state {
        TrackState::Insert => "insert",
        TrackState::Update => "update",
        TrackState::InsertOrUpdate => "insert_or_update",
        TrackState::Delete => "delete",
        TrackState::None | TrackState::PossibleUpdate => "none",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Type;
    use crate::mapping::tests::northwind;
    use crate::mapping::{EntityDef, MappingRegistry, MemberDef, StaticMappingSource};
    use crate::policy::QueryPolicy;

    fn customer(id: i64) -> Object {
        Object::new("Customer")
            .with("Id", id)
            .with("Name", "Ann")
            .with("City", "Oslo")
    }

    #[test]
    fn test_materialized_instance_becomes_update_when_changed() {
        let mapping = northwind();
        let mut session = Session::new(&mapping, TrackingMode::Snapshot);
        let id = session.attach("Customer", customer(1)).unwrap();
        assert_eq!(session.state(id).unwrap(), TrackState::PossibleUpdate);
        session.detect_changes().unwrap();
        assert_eq!(session.state(id).unwrap(), TrackState::PossibleUpdate);
        session.instance_mut(id).unwrap().set("City", "Bergen");
        session.detect_changes().unwrap();
        assert_eq!(session.state(id).unwrap(), TrackState::Update);
        session.accept_changes(&[id]).unwrap();
        assert_eq!(session.state(id).unwrap(), TrackState::PossibleUpdate);
    }

    #[test]
    fn test_notify_mode_ignores_silent_changes() {
        let mapping = northwind();
        let mut session = Session::new(&mapping, TrackingMode::Notify);
        let id = session.attach("Customer", customer(1)).unwrap();
        session.instance_mut(id).unwrap().set("City", "Bergen");
        session.detect_changes().unwrap();
        assert_eq!(session.state(id).unwrap(), TrackState::PossibleUpdate);
        session.notify_modified(id).unwrap();
        session.detect_changes().unwrap();
        assert_eq!(session.state(id).unwrap(), TrackState::Update);
    }

    #[test]
    fn test_identity_map_keeps_first_instance() {
        let mapping = northwind();
        let mut session = Session::new(&mapping, TrackingMode::Snapshot);
        let a = session.attach("Customer", customer(1)).unwrap();
        let b = session
            .attach("Customer", customer(1).with("Name", "Other"))
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(session.len(), 1);
        assert_eq!(
            session.instance(a).unwrap().get("Name"),
            Some(&Value::from("Ann"))
        );
    }

    #[test]
    fn test_delete_leaves_identity_map() {
        let mapping = northwind();
        let mut session = Session::new(&mapping, TrackingMode::Snapshot);
        let id = session.delete("Customer", customer(1)).unwrap();
        session.accept_changes(&[id]).unwrap();
        assert_eq!(session.state(id).unwrap(), TrackState::None);
        let again = session.attach("Customer", customer(1)).unwrap();
        assert_ne!(again, id);
    }

    #[test]
    fn test_insert_follows_delete_of_same_key() {
        let mapping = northwind();
        let mut session = Session::new(&mapping, TrackingMode::Snapshot);
        let deleted = session.delete("Customer", customer(1)).unwrap();
        let inserted = session
            .insert("Customer", customer(1).with("Name", "New"))
            .unwrap();
        assert_ne!(deleted, inserted);
        let order = session.commit_order().unwrap();
        assert_eq!(order, vec![deleted, inserted]);
    }

    #[test]
    fn test_customer_inserted_before_its_order() {
        let mapping = northwind();
        let mut session = Session::new(&mapping, TrackingMode::Snapshot);
        let c = customer(1);
        let order = Object::new("Order")
            .with("CustomerId", 1)
            .with("Total", 9.5)
            .with("Customer", c.clone());
        let o = session.insert("Order", order).unwrap();
        let cid = session.insert("Customer", c).unwrap();
        assert_eq!(session.commit_order().unwrap(), vec![cid, o]);
    }

    #[test]
    fn test_orders_deleted_before_their_customer() {
        let mapping = northwind();
        let mut session = Session::new(&mapping, TrackingMode::Snapshot);
        let order = Object::new("Order").with("Id", 10).with("CustomerId", 1);
        let c = customer(1).with("Orders", Value::List(vec![order.clone().into()]));
        let cid = session.delete("Customer", c).unwrap();
        let o = session.delete("Order", order).unwrap();
        assert_eq!(session.commit_order().unwrap(), vec![o, cid]);
    }

    #[test]
    fn test_mutual_dependency_is_a_cycle() {
        let mapping = northwind();
        let mut session = Session::new(&mapping, TrackingMode::Snapshot);
        let order = Object::new("Order").with("Id", 10).with("CustomerId", 1);
        // The old customer waits for the order, the order waits for the new
        // customer, and the new customer waits for the old one to go.
        session
            .delete(
                "Customer",
                customer(1).with("Orders", Value::List(vec![order.clone().into()])),
            )
            .unwrap();
        session
            .insert("Customer", customer(1).with("Name", "New"))
            .unwrap();
        session
            .insert("Order", order.with("Customer", customer(1)))
            .unwrap();
        let err = session.commit_order().unwrap_err();
        assert!(matches!(err, QueryError::DependencyCycle { ref item } if item.starts_with("Customer[")));
    }

    /// Each employee owns a desk and each desk names its owner; both sides
    /// hold a foreign key.
    fn desks() -> MappingRegistry<StaticMappingSource> {
        MappingRegistry::new(
            StaticMappingSource::new()
                .with(
                    EntityDef::new("Employee", "Employees")
                        .member(MemberDef::column("Id", Type::Int).primary_key())
                        .member(MemberDef::column("DeskId", Type::Int))
                        .member(MemberDef::association(
                            "Desk",
                            "Desk",
                            &["DeskId"],
                            &["Id"],
                            false,
                        )),
                )
                .with(
                    EntityDef::new("Desk", "Desks")
                        .member(MemberDef::column("Id", Type::Int).primary_key())
                        .member(MemberDef::column("OwnerId", Type::Int))
                        .member(MemberDef::association(
                            "Owner",
                            "Employee",
                            &["OwnerId"],
                            &["Id"],
                            false,
                        )),
                ),
        )
    }

    #[test]
    fn test_two_inserts_depending_on_each_other_are_a_cycle() {
        let mapping = desks();
        let mut session = Session::new(&mapping, TrackingMode::Snapshot);
        let employee = Object::new("Employee").with("Id", 1).with("DeskId", 7);
        let desk = Object::new("Desk").with("Id", 7).with("OwnerId", 1);
        session
            .insert("Employee", employee.clone().with("Desk", desk.clone()))
            .unwrap();
        session
            .insert("Desk", desk.with("Owner", employee))
            .unwrap();
        let err = session.commit_order().unwrap_err();
        assert!(
            matches!(
                err,
                QueryError::DependencyCycle { ref item }
                    if item == "Employee[1]" || item == "Desk[7]"
            ),
            "{err}"
        );
    }

    #[test]
    fn test_one_sided_dependency_orders_inserts() {
        let mapping = desks();
        let mut session = Session::new(&mapping, TrackingMode::Snapshot);
        let employee = Object::new("Employee").with("Id", 1).with("DeskId", 7);
        let desk = Object::new("Desk").with("Id", 7).with("OwnerId", 1);
        let d = session.insert("Desk", desk.with("Owner", employee.clone())).unwrap();
        let e = session.insert("Employee", employee).unwrap();
        assert_eq!(session.commit_order().unwrap(), vec![e, d]);
    }

    #[test]
    fn test_pending_changes_build_commands() {
        let mapping = northwind();
        let policy = QueryPolicy::new();
        let mapper = QueryMapper::new(&mapping, &policy);
        let mut session = Session::new(&mapping, TrackingMode::Snapshot);
        session.insert("Customer", customer(1)).unwrap();
        let id = session.attach("Customer", customer(2)).unwrap();
        session.instance_mut(id).unwrap().set("Name", "Bo");
        let changes = session.pending_changes(&mapper).unwrap();
        let states: Vec<TrackState> = changes.iter().map(|c| c.state).collect();
        assert_eq!(states, vec![TrackState::Insert, TrackState::Update]);
    }
}
