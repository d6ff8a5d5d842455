//! Resource types, relationships and foreign-key metadata.
//!
//! The mapping layer never inspects the database catalog itself. Everything it needs
//! to know about tables, columns and where a foreign key lives comes from a
//! [`DataModel`]. [`InMemoryDataModel`] is a small registry that serves the common
//! case of a model declared in code.
//!
//! # Example
//!
//! ```ignore
//! use resmap::{ForeignKey, IdKind, InMemoryDataModel, ResourceType};
//!
//! let model = InMemoryDataModel::new()
//!     .with_type(
//!         ResourceType::new("people", "people", IdKind::Int)
//!             .attribute("name", "name")
//!             .to_many("todoItems", "todoItems"),
//!     )
//!     .with_type(
//!         ResourceType::new("todoItems", "todo_items", IdKind::Int)
//!             .attribute("description", "description"),
//!     )
//!     .with_foreign_key("people", "todoItems", ForeignKey::right("owner_id", false))
//!     .build()?;
//! # Ok::<(), resmap::OrmError>(())
//! ```

use crate::error::{OrmError, OrmResult};
use crate::value::IdKind;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Cardinality of a relationship, seen from its left (declaring) type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationshipKind {
    ToOne,
    ToMany,
}

/// A relationship declared on a resource type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Relationship {
    /// Public name, as used in include paths and resource relationship maps.
    pub name: String,
    pub left_type: String,
    pub right_type: String,
    pub kind: RelationshipKind,
}

impl Relationship {
    pub fn is_to_one(&self) -> bool {
        self.kind == RelationshipKind::ToOne
    }

    pub fn is_to_many(&self) -> bool {
        self.kind == RelationshipKind::ToMany
    }
}

/// Which table holds the foreign key column of a relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ForeignKeySide {
    /// The column lives on the left (declaring) type's table.
    Left,
    /// The column lives on the right (related) type's table.
    Right,
}

/// Foreign key placement for one relationship.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ForeignKey {
    pub column_name: String,
    pub is_nullable: bool,
    pub side: ForeignKeySide,
    pub is_one_to_one: bool,
}

impl ForeignKey {
    /// A foreign key column on the left type's table.
    pub fn left(column_name: impl Into<String>, is_nullable: bool) -> Self {
        Self {
            column_name: column_name.into(),
            is_nullable,
            side: ForeignKeySide::Left,
            is_one_to_one: false,
        }
    }

    /// A foreign key column on the right type's table.
    pub fn right(column_name: impl Into<String>, is_nullable: bool) -> Self {
        Self {
            column_name: column_name.into(),
            is_nullable,
            side: ForeignKeySide::Right,
            is_one_to_one: false,
        }
    }

    /// Mark the relationship as one-to-one (unique foreign key).
    pub fn one_to_one(mut self) -> Self {
        self.is_one_to_one = true;
        self
    }

    pub fn is_at_left_side(&self) -> bool {
        self.side == ForeignKeySide::Left
    }
}

/// An attribute backed by a column of the resource type's table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Attribute {
    pub name: String,
    pub column: String,
}

/// A resource type and its table mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceType {
    pub name: String,
    pub table: String,
    pub id_column: String,
    pub id_kind: IdKind,
    pub attributes: Vec<Attribute>,
    pub relationships: Vec<Relationship>,
}

impl ResourceType {
    /// Create a resource type whose primary key column is `id`.
    pub fn new(name: impl Into<String>, table: impl Into<String>, id_kind: IdKind) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            id_column: "id".to_string(),
            id_kind,
            attributes: Vec::new(),
            relationships: Vec::new(),
        }
    }

    pub fn id_column(mut self, column: impl Into<String>) -> Self {
        self.id_column = column.into();
        self
    }

    pub fn attribute(mut self, name: impl Into<String>, column: impl Into<String>) -> Self {
        self.attributes.push(Attribute {
            name: name.into(),
            column: column.into(),
        });
        self
    }

    pub fn to_one(self, name: impl Into<String>, right_type: impl Into<String>) -> Self {
        self.relationship(name, right_type, RelationshipKind::ToOne)
    }

    pub fn to_many(self, name: impl Into<String>, right_type: impl Into<String>) -> Self {
        self.relationship(name, right_type, RelationshipKind::ToMany)
    }

    fn relationship(
        mut self,
        name: impl Into<String>,
        right_type: impl Into<String>,
        kind: RelationshipKind,
    ) -> Self {
        let left_type = self.name.clone();
        self.relationships.push(Relationship {
            name: name.into(),
            left_type,
            right_type: right_type.into(),
            kind,
        });
        self
    }

    pub fn find_relationship(&self, name: &str) -> Option<&Relationship> {
        self.relationships.iter().find(|r| r.name == name)
    }

    pub fn relationship_by_name(&self, name: &str) -> OrmResult<&Relationship> {
        self.find_relationship(name).ok_or_else(|| {
            OrmError::metadata(format!(
                "relationship '{}' does not exist on resource type '{}'",
                name, self.name
            ))
        })
    }
}

/// Where the value of a mapped column is read from on a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ColumnSource {
    /// The primary key.
    Id,
    /// A named attribute.
    Attribute(String),
    /// The related id of a to-one relationship whose foreign key is on this table.
    ForeignKey(String),
}

/// A column of a resource type's table and the resource field it maps to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnMapping {
    pub column: String,
    pub source: ColumnSource,
}

/// Metadata service consulted for resource types and foreign key placement.
pub trait DataModel: Send + Sync {
    /// Look up a resource type by its public name.
    fn resource_type(&self, name: &str) -> OrmResult<Arc<ResourceType>>;

    /// Foreign key placement for a relationship.
    fn foreign_key(&self, relationship: &Relationship) -> OrmResult<ForeignKey>;

    /// Every column mapped for a resource type, in a stable order:
    /// the id column, the attribute columns, then the foreign key columns of
    /// to-one relationships whose key lives on this type's table.
    fn column_mappings(&self, resource_type: &ResourceType) -> OrmResult<Vec<ColumnMapping>> {
        let mut columns = Vec::with_capacity(
            1 + resource_type.attributes.len() + resource_type.relationships.len(),
        );
        columns.push(ColumnMapping {
            column: resource_type.id_column.clone(),
            source: ColumnSource::Id,
        });
        for attribute in &resource_type.attributes {
            columns.push(ColumnMapping {
                column: attribute.column.clone(),
                source: ColumnSource::Attribute(attribute.name.clone()),
            });
        }
        for relationship in resource_type.relationships.iter().filter(|r| r.is_to_one()) {
            let foreign_key = self.foreign_key(relationship)?;
            if foreign_key.is_at_left_side() {
                columns.push(ColumnMapping {
                    column: foreign_key.column_name,
                    source: ColumnSource::ForeignKey(relationship.name.clone()),
                });
            }
        }
        Ok(columns)
    }
}

impl<M: DataModel + ?Sized> DataModel for Arc<M> {
    fn resource_type(&self, name: &str) -> OrmResult<Arc<ResourceType>> {
        (**self).resource_type(name)
    }

    fn foreign_key(&self, relationship: &Relationship) -> OrmResult<ForeignKey> {
        (**self).foreign_key(relationship)
    }

    fn column_mappings(&self, resource_type: &ResourceType) -> OrmResult<Vec<ColumnMapping>> {
        (**self).column_mappings(resource_type)
    }
}

/// A [`DataModel`] declared in code.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDataModel {
    types: BTreeMap<String, Arc<ResourceType>>,
    foreign_keys: BTreeMap<(String, String), ForeignKey>,
}

impl InMemoryDataModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource type.
    pub fn with_type(mut self, resource_type: ResourceType) -> Self {
        self.types
            .insert(resource_type.name.clone(), Arc::new(resource_type));
        self
    }

    /// Register the foreign key of `left_type.relationship`.
    pub fn with_foreign_key(
        mut self,
        left_type: impl Into<String>,
        relationship: impl Into<String>,
        foreign_key: ForeignKey,
    ) -> Self {
        self.foreign_keys
            .insert((left_type.into(), relationship.into()), foreign_key);
        self
    }

    /// Check that every relationship targets a registered type and has a foreign key.
    pub fn build(self) -> OrmResult<Self> {
        for resource_type in self.types.values() {
            for relationship in &resource_type.relationships {
                if !self.types.contains_key(&relationship.right_type) {
                    return Err(OrmError::metadata(format!(
                        "relationship '{}.{}' targets unknown resource type '{}'",
                        resource_type.name, relationship.name, relationship.right_type
                    )));
                }
                let key = (resource_type.name.clone(), relationship.name.clone());
                let Some(foreign_key) = self.foreign_keys.get(&key) else {
                    return Err(OrmError::metadata(format!(
                        "relationship '{}.{}' has no foreign key",
                        resource_type.name, relationship.name
                    )));
                };
                if relationship.is_to_many() && foreign_key.is_at_left_side() {
                    return Err(OrmError::metadata(format!(
                        "to-many relationship '{}.{}' must keep its foreign key on the right side",
                        resource_type.name, relationship.name
                    )));
                }
            }
        }
        Ok(self)
    }
}

impl DataModel for InMemoryDataModel {
    fn resource_type(&self, name: &str) -> OrmResult<Arc<ResourceType>> {
        self.types
            .get(name)
            .cloned()
            .ok_or_else(|| OrmError::metadata(format!("unknown resource type '{name}'")))
    }

    fn foreign_key(&self, relationship: &Relationship) -> OrmResult<ForeignKey> {
        self.foreign_keys
            .get(&(relationship.left_type.clone(), relationship.name.clone()))
            .cloned()
            .ok_or_else(|| {
                OrmError::metadata(format!(
                    "no foreign key registered for relationship '{}.{}'",
                    relationship.left_type, relationship.name
                ))
            })
    }
}
