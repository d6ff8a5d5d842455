//! Change detection between two snapshots of one resource.
//!
//! A [`ChangeTracker`] records the state of a resource before and after a request is
//! applied, then reports what changed: columns of its own table, to-one links whose
//! foreign key lives on the related table, and to-many memberships. The command
//! sequencer turns those deltas into SQL.
//!
//! Snapshots are owned by the tracker and live as long as one write operation.

use crate::error::{OrmError, OrmResult};
use crate::model::{ColumnMapping, ColumnSource, DataModel, ForeignKey, Relationship, ResourceType};
use crate::resource::{RelationshipData, Resource};
use crate::value::{ResourceIdentity, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Column name → value, in column-mapping order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnSnapshot {
    values: Vec<(String, Value)>,
}

impl ColumnSnapshot {
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Relationship name → set of related identities.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationshipSnapshot {
    related: BTreeMap<String, BTreeSet<ResourceIdentity>>,
}

impl RelationshipSnapshot {
    pub fn get(&self, relationship: &str) -> Option<&BTreeSet<ResourceIdentity>> {
        self.related.get(relationship)
    }

    /// The single related identity of a to-one relationship, if any.
    fn to_one(&self, relationship: &str) -> Option<&ResourceIdentity> {
        self.related.get(relationship).and_then(|ids| ids.first())
    }

    fn to_many(&self, relationship: &str) -> BTreeSet<ResourceIdentity> {
        self.related.get(relationship).cloned().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default)]
struct Snapshot {
    columns: ColumnSnapshot,
    relationships: RelationshipSnapshot,
}

/// A change of a to-one relationship.
#[derive(Debug, Clone, PartialEq)]
pub struct ToOneChange {
    pub relationship: Relationship,
    pub foreign_key: ForeignKey,
    pub current: Option<ResourceIdentity>,
    pub new: Option<ResourceIdentity>,
}

/// A change of a to-many relationship's membership.
#[derive(Debug, Clone, PartialEq)]
pub struct ToManyChange {
    pub relationship: Relationship,
    pub foreign_key: ForeignKey,
    pub current: BTreeSet<ResourceIdentity>,
    pub new: BTreeSet<ResourceIdentity>,
}

impl ToManyChange {
    /// `current − new`
    pub fn removed(&self) -> Vec<ResourceIdentity> {
        self.current.difference(&self.new).cloned().collect()
    }

    /// `new − current`
    pub fn added(&self) -> Vec<ResourceIdentity> {
        self.new.difference(&self.current).cloned().collect()
    }
}

/// Captures two snapshots of a resource and computes column and relationship deltas.
#[derive(Debug)]
pub struct ChangeTracker {
    resource_type: Arc<ResourceType>,
    columns: Vec<ColumnMapping>,
    foreign_keys: BTreeMap<String, ForeignKey>,
    current: Snapshot,
    new: Snapshot,
}

impl ChangeTracker {
    /// Create a tracker for resources of `resource_type`, resolving its column mappings
    /// and foreign keys once.
    pub fn new(model: &(impl DataModel + ?Sized), resource_type: Arc<ResourceType>) -> OrmResult<Self> {
        let columns = model.column_mappings(&resource_type)?;
        let mut foreign_keys = BTreeMap::new();
        for relationship in &resource_type.relationships {
            foreign_keys.insert(relationship.name.clone(), model.foreign_key(relationship)?);
        }
        Ok(Self {
            resource_type,
            columns,
            foreign_keys,
            current: Snapshot::default(),
            new: Snapshot::default(),
        })
    }

    pub fn resource_type(&self) -> &Arc<ResourceType> {
        &self.resource_type
    }

    /// Record the state before the request is applied.
    pub fn capture_current(&mut self, resource: &Resource) -> OrmResult<()> {
        self.current = self.capture(resource)?;
        Ok(())
    }

    /// Record the state after the request is applied.
    pub fn capture_new(&mut self, resource: &Resource) -> OrmResult<()> {
        self.new = self.capture(resource)?;
        Ok(())
    }

    pub fn current_columns(&self) -> &ColumnSnapshot {
        &self.current.columns
    }

    pub fn new_columns(&self) -> &ColumnSnapshot {
        &self.new.columns
    }

    pub fn current_relationships(&self) -> &RelationshipSnapshot {
        &self.current.relationships
    }

    pub fn new_relationships(&self) -> &RelationshipSnapshot {
        &self.new.relationships
    }

    fn capture(&self, resource: &Resource) -> OrmResult<Snapshot> {
        if resource.type_name != self.resource_type.name {
            return Err(OrmError::ResourceTypeMismatch {
                expected: self.resource_type.name.clone(),
                actual: resource.type_name.clone(),
            });
        }

        let mut values = Vec::with_capacity(self.columns.len());
        for mapping in &self.columns {
            let value = match &mapping.source {
                ColumnSource::Id => resource.id.clone().map_or(Value::Null, Value::from),
                ColumnSource::Attribute(name) => resource.attribute(name).clone(),
                ColumnSource::ForeignKey(relationship) => {
                    match self.read_to_one(resource, relationship)? {
                        Some(related) => related.require_server_id()?.clone().into(),
                        None => Value::Null,
                    }
                }
            };
            values.push((mapping.column.clone(), value));
        }

        let mut related = BTreeMap::new();
        for relationship in &self.resource_type.relationships {
            let ids: BTreeSet<ResourceIdentity> = match resource.relationship(&relationship.name) {
                Some(data) => {
                    self.check_shape(relationship, data)?;
                    data.identities().cloned().collect()
                }
                None => BTreeSet::new(),
            };
            related.insert(relationship.name.clone(), ids);
        }

        Ok(Snapshot {
            columns: ColumnSnapshot { values },
            relationships: RelationshipSnapshot { related },
        })
    }

    fn read_to_one<'r>(
        &self,
        resource: &'r Resource,
        relationship: &str,
    ) -> OrmResult<Option<&'r ResourceIdentity>> {
        match resource.relationship(relationship) {
            None | Some(RelationshipData::ToOne(None)) => Ok(None),
            Some(RelationshipData::ToOne(Some(related))) => Ok(Some(related)),
            Some(RelationshipData::ToMany(_)) => Err(OrmError::validation(format!(
                "relationship '{}' on '{}' is to-one but was given multiple values",
                relationship, self.resource_type.name
            ))),
        }
    }

    fn check_shape(&self, relationship: &Relationship, data: &RelationshipData) -> OrmResult<()> {
        let matches = match data {
            RelationshipData::ToOne(_) => relationship.is_to_one(),
            RelationshipData::ToMany(_) => relationship.is_to_many(),
        };
        if !matches {
            return Err(OrmError::validation(format!(
                "relationship '{}' on '{}' was given a value of the wrong cardinality",
                relationship.name, self.resource_type.name
            )));
        }
        for related in data.identities() {
            if related.type_name != relationship.right_type {
                return Err(OrmError::ResourceTypeMismatch {
                    expected: relationship.right_type.clone(),
                    actual: related.type_name.clone(),
                });
            }
        }
        Ok(())
    }

    fn foreign_key(&self, relationship: &Relationship) -> &ForeignKey {
        // Every relationship of the type was resolved at construction.
        &self.foreign_keys[&relationship.name]
    }

    fn to_one_changes(&self) -> impl Iterator<Item = ToOneChange> + '_ {
        self.resource_type
            .relationships
            .iter()
            .filter(|r| r.is_to_one())
            .map(|relationship| ToOneChange {
                relationship: relationship.clone(),
                foreign_key: self.foreign_key(relationship).clone(),
                current: self.current.relationships.to_one(&relationship.name).cloned(),
                new: self.new.relationships.to_one(&relationship.name).cloned(),
            })
    }

    /// Columns of the new snapshot whose value differs from the current one, with their
    /// new values. A column missing from the current snapshot counts as changed.
    pub fn changed_columns(&self) -> Vec<(String, Value)> {
        self.new
            .columns
            .iter()
            .filter(|(column, value)| self.current.columns.get(column) != Some(*value))
            .map(|(column, value)| (column.to_string(), value.clone()))
            .collect()
    }

    /// One-to-one relationships whose new related id is set and differs from the current one.
    pub fn one_to_one_relationships_becoming_non_null(&self) -> Vec<ToOneChange> {
        self.to_one_changes()
            .filter(|c| c.foreign_key.is_one_to_one && c.new.is_some() && c.new != c.current)
            .collect()
    }

    /// Changed to-one relationships whose foreign key lives on the related table.
    ///
    /// Left-side keys are columns of this resource's own row and show up in
    /// [`ChangeTracker::changed_columns`] instead.
    pub fn changed_to_one_with_foreign_key_at_right_side(&self) -> Vec<ToOneChange> {
        self.to_one_changes()
            .filter(|c| !c.foreign_key.is_at_left_side() && c.new != c.current)
            .collect()
    }

    /// To-many relationships whose set of related identities changed.
    pub fn changed_to_many_relationships(&self) -> Vec<ToManyChange> {
        self.resource_type
            .relationships
            .iter()
            .filter(|r| r.is_to_many())
            .filter_map(|relationship| {
                let current = self.current.relationships.to_many(&relationship.name);
                let new = self.new.relationships.to_many(&relationship.name);
                (current != new).then(|| ToManyChange {
                    relationship: relationship.clone(),
                    foreign_key: self.foreign_key(relationship).clone(),
                    current,
                    new,
                })
            })
            .collect()
    }

    /// Fail if a required to-one relationship is being set to null.
    ///
    /// Must run before any command is built.
    pub fn assert_no_required_to_one_cleared_to_null(&self) -> OrmResult<()> {
        for change in self.to_one_changes() {
            if !change.foreign_key.is_nullable && change.current != change.new && change.new.is_none() {
                return Err(OrmError::RequiredRelationshipCleared {
                    relationship: change.relationship.name,
                    resource_type: self.resource_type.name.clone(),
                });
            }
        }
        Ok(())
    }
}
