//! Where entity definitions come from.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::def::EntityDef;
use crate::entity::Entity;
use crate::error::Result;

/// Supplies raw entity definitions to a [`super::MappingRegistry`].
pub trait MappingSource: Send + Sync {
    /// Loads one definition; `None` when the entity is unknown.
    fn load(&self, entity: &str) -> Result<Option<EntityDef>>;

    /// Every entity this source can load.
    fn entity_names(&self) -> Vec<String>;
}

/// Definitions registered in code, by hand or from `#[derive(Entity)]`.
#[derive(Debug, Clone, Default)]
pub struct StaticMappingSource {
    entities: BTreeMap<String, EntityDef>,
}

impl StaticMappingSource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a definition.
    #[must_use]
    pub fn with(mut self, def: EntityDef) -> Self {
        self.entities.insert(def.name.clone(), def);
        self
    }

    /// Registers a typed entity.
    #[must_use]
    pub fn with_entity<E: Entity>(self) -> Self {
        self.with(E::entity_def())
    }
}

impl MappingSource for StaticMappingSource {
    fn load(&self, entity: &str) -> Result<Option<EntityDef>> {
        Ok(self.entities.get(entity).cloned())
    }

    fn entity_names(&self) -> Vec<String> {
        self.entities.keys().cloned().collect()
    }
}

/// The JSON mapping document.
///
/// ```json
/// { "entities": [ { "name": "Customer", "table": "Customers", "members": [
///     { "name": "Id", "kind": "column", "column": "Id", "ty": "Int", "primary_key": true }
/// ] } ] }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MappingDocument {
    /// Entity definitions.
    pub entities: Vec<EntityDef>,
}

/// Definitions parsed from a [`MappingDocument`].
#[derive(Debug, Clone, Default)]
pub struct JsonMappingSource {
    inner: StaticMappingSource,
}

impl JsonMappingSource {
    /// Parses a mapping document.
    pub fn from_json(json: &str) -> Result<Self> {
        let doc: MappingDocument = serde_json::from_str(json)?;
        Ok(Self::from_document(doc))
    }

    /// Wraps an already parsed document.
    #[must_use]
    pub fn from_document(doc: MappingDocument) -> Self {
        let inner = doc
            .entities
            .into_iter()
            .fold(StaticMappingSource::new(), StaticMappingSource::with);
        Self { inner }
    }
}

impl MappingSource for JsonMappingSource {
    fn load(&self, entity: &str) -> Result<Option<EntityDef>> {
        self.inner.load(entity)
    }

    fn entity_names(&self) -> Vec<String> {
        self.inner.entity_names()
    }
}
