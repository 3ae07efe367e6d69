//! Entity definitions: how one logical entity maps onto tables and columns.

use serde::{Deserialize, Serialize};

use crate::ast::Type;
use crate::error::{QueryError, Result};

/// How a member is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MemberKind {
    /// A column of the entity's primary or an extension table.
    Column {
        /// Column name.
        column: String,
        /// Extension table holding the column; the primary table when `None`.
        #[serde(default)]
        table: Option<String>,
        /// Column type.
        #[serde(default)]
        ty: Type,
        /// Part of the primary key.
        #[serde(default)]
        primary_key: bool,
        /// Value produced by the database on insert.
        #[serde(default)]
        generated: bool,
        /// Never written by updates; bound through a constructor.
        #[serde(default)]
        read_only: bool,
    },
    /// Navigation to related entities, matched by key members.
    Association {
        /// Related entity.
        related: String,
        /// Members of this entity forming the key.
        keys: Vec<String>,
        /// Members of the related entity matched against `keys`.
        related_keys: Vec<String>,
        /// Collection-valued (one-to-many) navigation.
        #[serde(default)]
        many: bool,
    },
    /// A value object stored inline in the same table.
    Nested {
        /// Entity definition of the nested value.
        entity: String,
    },
}

/// One mapped member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberDef {
    /// Member name.
    pub name: String,
    /// Storage.
    #[serde(flatten)]
    pub kind: MemberKind,
}

impl MemberDef {
    /// A column member whose column has the member's name.
    #[must_use]
    pub fn column(name: impl Into<String>, ty: Type) -> Self {
        let name = name.into();
        Self {
            kind: MemberKind::Column {
                column: name.clone(),
                table: None,
                ty,
                primary_key: false,
                generated: false,
                read_only: false,
            },
            name,
        }
    }

    /// An association member.
    #[must_use]
    pub fn association(
        name: impl Into<String>,
        related: impl Into<String>,
        keys: &[&str],
        related_keys: &[&str],
        many: bool,
    ) -> Self {
        Self {
            name: name.into(),
            kind: MemberKind::Association {
                related: related.into(),
                keys: keys.iter().map(ToString::to_string).collect(),
                related_keys: related_keys.iter().map(ToString::to_string).collect(),
                many,
            },
        }
    }

    /// A nested value-object member.
    #[must_use]
    pub fn nested(name: impl Into<String>, entity: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: MemberKind::Nested {
                entity: entity.into(),
            },
        }
    }

    fn column_flags(mut self, f: impl FnOnce(&mut bool, &mut bool, &mut bool)) -> Self {
        if let MemberKind::Column {
            primary_key,
            generated,
            read_only,
            ..
        } = &mut self.kind
        {
            f(primary_key, generated, read_only);
        }
        self
    }

    /// Marks the column as part of the primary key.
    #[must_use]
    pub fn primary_key(self) -> Self {
        self.column_flags(|pk, _, _| *pk = true)
    }

    /// Marks the column as database-generated.
    #[must_use]
    pub fn generated(self) -> Self {
        self.column_flags(|_, g, _| *g = true)
    }

    /// Marks the member as read-only.
    #[must_use]
    pub fn read_only(self) -> Self {
        self.column_flags(|_, _, ro| *ro = true)
    }

    /// Renames the physical column.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        if let MemberKind::Column { column, .. } = &mut self.kind {
            *column = name.into();
        }
        self
    }

    /// Stores the column in an extension table.
    #[must_use]
    pub fn in_table(mut self, name: impl Into<String>) -> Self {
        if let MemberKind::Column { table, .. } = &mut self.kind {
            *table = Some(name.into());
        }
        self
    }

    /// Column name, for column members.
    #[must_use]
    pub fn column_name(&self) -> Option<&str> {
        match &self.kind {
            MemberKind::Column { column, .. } => Some(column),
            _ => None,
        }
    }

    /// Column type, for column members.
    #[must_use]
    pub fn column_type(&self) -> Option<&Type> {
        match &self.kind {
            MemberKind::Column { ty, .. } => Some(ty),
            _ => None,
        }
    }

    /// Is this a primary-key column.
    #[must_use]
    pub const fn is_primary_key(&self) -> bool {
        matches!(
            self.kind,
            MemberKind::Column {
                primary_key: true,
                ..
            }
        )
    }

    /// Is this column generated by the database.
    #[must_use]
    pub const fn is_generated(&self) -> bool {
        matches!(
            self.kind,
            MemberKind::Column {
                generated: true,
                ..
            }
        )
    }

    /// Is this column read-only.
    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        matches!(
            self.kind,
            MemberKind::Column {
                read_only: true,
                ..
            }
        )
    }

    /// Is this member stored in a column.
    #[must_use]
    pub const fn is_column(&self) -> bool {
        matches!(self.kind, MemberKind::Column { .. })
    }

    /// Is this member an association.
    #[must_use]
    pub const fn is_association(&self) -> bool {
        matches!(self.kind, MemberKind::Association { .. })
    }

    /// Is this member a nested value object.
    #[must_use]
    pub const fn is_nested(&self) -> bool {
        matches!(self.kind, MemberKind::Nested { .. })
    }
}

/// An extension table joined to the primary table by key columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionTable {
    /// Physical table name.
    pub name: String,
    /// Key columns in the extension table.
    pub key_columns: Vec<String>,
    /// Matching columns in the primary table.
    pub related_key_columns: Vec<String>,
}

/// A constructor, described by the member names its parameters bind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstructorDef {
    /// Parameter names in order.
    pub params: Vec<String>,
}

/// Definition of one mapped entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDef {
    /// Logical entity name.
    pub name: String,
    /// Primary table.
    pub table: String,
    /// Additional tables sharing the primary key.
    #[serde(default)]
    pub extension_tables: Vec<ExtensionTable>,
    /// Mapped members.
    pub members: Vec<MemberDef>,
    /// Available constructors; empty means default construction.
    #[serde(default)]
    pub constructors: Vec<ConstructorDef>,
}

impl EntityDef {
    /// Starts a definition.
    #[must_use]
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            extension_tables: Vec::new(),
            members: Vec::new(),
            constructors: Vec::new(),
        }
    }

    /// Adds a member.
    #[must_use]
    pub fn member(mut self, member: MemberDef) -> Self {
        self.members.push(member);
        self
    }

    /// Adds an extension table.
    #[must_use]
    pub fn extension_table(mut self, name: &str, key_columns: &[&str], related: &[&str]) -> Self {
        self.extension_tables.push(ExtensionTable {
            name: name.to_string(),
            key_columns: key_columns.iter().map(ToString::to_string).collect(),
            related_key_columns: related.iter().map(ToString::to_string).collect(),
        });
        self
    }

    /// Adds a constructor.
    #[must_use]
    pub fn constructor(mut self, params: &[&str]) -> Self {
        self.constructors.push(ConstructorDef {
            params: params.iter().map(ToString::to_string).collect(),
        });
        self
    }

    /// Looks up a member.
    pub fn find(&self, member: &str) -> Result<&MemberDef> {
        self.members
            .iter()
            .find(|m| m.name == member)
            .ok_or_else(|| QueryError::mapping(&self.name, member, "member is not mapped"))
    }

    /// Primary-key members in declaration order.
    pub fn primary_key_members(&self) -> impl Iterator<Item = &MemberDef> {
        self.members.iter().filter(|m| m.is_primary_key())
    }

    /// Column members in declaration order.
    pub fn column_members(&self) -> impl Iterator<Item = &MemberDef> {
        self.members.iter().filter(|m| m.is_column())
    }

    /// Is `member` an association whose keys are not the primary key, i.e.
    /// this entity holds the foreign key and depends on the related one.
    pub fn is_relationship_source(&self, member: &str) -> Result<bool> {
        match &self.find(member)?.kind {
            MemberKind::Association { keys, .. } => {
                let pk: Vec<&str> = self.primary_key_members().map(|m| m.name.as_str()).collect();
                Ok(!keys.iter().all(|k| pk.contains(&k.as_str())))
            }
            _ => Ok(false),
        }
    }

    /// Checks internal consistency.
    pub fn validate(&self) -> Result<()> {
        if self.primary_key_members().next().is_none() {
            return Err(QueryError::mapping(
                &self.name,
                "<primary key>",
                "entity declares no primary key member",
            ));
        }
        for m in &self.members {
            match &m.kind {
                MemberKind::Association {
                    keys, related_keys, ..
                } => {
                    if keys.len() != related_keys.len() || keys.is_empty() {
                        return Err(QueryError::KeyMismatch {
                            entity: self.name.clone(),
                            member: m.name.clone(),
                            keys: keys.len(),
                            related: related_keys.len(),
                        });
                    }
                    for k in keys {
                        if !self.find(k)?.is_column() {
                            return Err(QueryError::mapping(
                                &self.name,
                                k,
                                "association key must be a column member",
                            ));
                        }
                    }
                }
                MemberKind::Column {
                    table: Some(t), ..
                } => {
                    if !self.extension_tables.iter().any(|e| &e.name == t) {
                        return Err(QueryError::mapping(
                            &self.name,
                            &m.name,
                            format!("unknown extension table {t}"),
                        ));
                    }
                }
                _ => {}
            }
        }
        for ext in &self.extension_tables {
            if ext.key_columns.len() != ext.related_key_columns.len() {
                return Err(QueryError::KeyMismatch {
                    entity: self.name.clone(),
                    member: ext.name.clone(),
                    keys: ext.key_columns.len(),
                    related: ext.related_key_columns.len(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order() -> EntityDef {
        EntityDef::new("Order", "Orders")
            .member(MemberDef::column("Id", Type::Int).primary_key().generated())
            .member(MemberDef::column("CustomerId", Type::Int))
            .member(MemberDef::association(
                "Customer",
                "Customer",
                &["CustomerId"],
                &["Id"],
                false,
            ))
    }

    #[test]
    fn test_member_flags() {
        let def = order();
        let id = def.find("Id").unwrap();
        assert!(id.is_primary_key() && id.is_generated() && !id.is_read_only());
        assert!(def.find("Customer").unwrap().is_association());
        assert!(def.find("Missing").is_err());
    }

    #[test]
    fn test_relationship_source_detection() {
        let def = order();
        assert!(def.is_relationship_source("Customer").unwrap());
        let customer = EntityDef::new("Customer", "Customers")
            .member(MemberDef::column("Id", Type::Int).primary_key())
            .member(MemberDef::association(
                "Orders",
                "Order",
                &["Id"],
                &["CustomerId"],
                true,
            ));
        assert!(!customer.is_relationship_source("Orders").unwrap());
    }

    #[test]
    fn test_validate_rejects_key_mismatch() {
        let def = order().member(MemberDef::association(
            "Broken",
            "Customer",
            &["CustomerId"],
            &[],
            false,
        ));
        assert!(matches!(
            def.validate(),
            Err(QueryError::KeyMismatch { keys: 1, related: 0, .. })
        ));
    }

    #[test]
    fn test_json_round_trip_shape() {
        let json = serde_json::to_value(order()).unwrap();
        assert_eq!(json["members"][0]["kind"], "column");
        assert_eq!(json["members"][2]["kind"], "association");
        let back: EntityDef = serde_json::from_value(json).unwrap();
        assert_eq!(back, order());
    }
}
