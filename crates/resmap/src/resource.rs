//! In-memory resource state.

use crate::model::{ResourceType, RelationshipKind};
use crate::value::{Id, IdentityKey, ResourceIdentity, Value};
use serde::Serialize;
use std::collections::BTreeMap;

/// The value of one relationship on a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum RelationshipData {
    ToOne(Option<ResourceIdentity>),
    ToMany(Vec<ResourceIdentity>),
}

impl RelationshipData {
    /// An empty value of the given cardinality.
    pub fn empty(kind: RelationshipKind) -> Self {
        match kind {
            RelationshipKind::ToOne => Self::ToOne(None),
            RelationshipKind::ToMany => Self::ToMany(Vec::new()),
        }
    }

    /// Iterate over the related identities (zero or one for to-one).
    pub fn identities(&self) -> impl Iterator<Item = &ResourceIdentity> {
        let (one, many) = match self {
            Self::ToOne(one) => (one.as_ref(), &[][..]),
            Self::ToMany(many) => (None, many.as_slice()),
        };
        one.into_iter().chain(many.iter())
    }
}

/// A resource instance: a type, an identity, attribute values and relationship values.
///
/// Attributes and relationships that were never set are simply absent from the maps;
/// readers treat a missing attribute as `Null` and a missing relationship as empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resource {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Id>,
    #[serde(rename = "lid", skip_serializing_if = "Option::is_none")]
    pub local_id: Option<String>,
    pub attributes: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub relationships: BTreeMap<String, RelationshipData>,
}

impl Resource {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            id: None,
            local_id: None,
            attributes: BTreeMap::new(),
            relationships: BTreeMap::new(),
        }
    }

    /// An instance of `resource_type` with nothing set, used as the "before" state of a create.
    pub fn blank(resource_type: &ResourceType) -> Self {
        Self::new(resource_type.name.clone())
    }

    pub fn with_id(mut self, id: impl Into<Id>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_local_id(mut self, local_id: impl Into<String>) -> Self {
        self.local_id = Some(local_id.into());
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_to_one(mut self, name: impl Into<String>, related: Option<ResourceIdentity>) -> Self {
        self.relationships
            .insert(name.into(), RelationshipData::ToOne(related));
        self
    }

    pub fn with_to_many(
        mut self,
        name: impl Into<String>,
        related: impl IntoIterator<Item = ResourceIdentity>,
    ) -> Self {
        self.relationships.insert(
            name.into(),
            RelationshipData::ToMany(related.into_iter().collect()),
        );
        self
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(name.into(), value.into());
    }

    pub fn set_relationship(&mut self, name: impl Into<String>, data: RelationshipData) {
        self.relationships.insert(name.into(), data);
    }

    /// Attribute value, `Null` when unset.
    pub fn attribute(&self, name: &str) -> &Value {
        self.attributes.get(name).unwrap_or(&Value::Null)
    }

    pub fn relationship(&self, name: &str) -> Option<&RelationshipData> {
        self.relationships.get(name)
    }

    /// The identity of this resource: its server id if assigned, else its local id.
    pub fn identity(&self) -> Option<ResourceIdentity> {
        let key = match (&self.id, &self.local_id) {
            (Some(id), _) => IdentityKey::Server(id.clone()),
            (None, Some(lid)) => IdentityKey::Local(lid.clone()),
            (None, None) => return None,
        };
        Some(ResourceIdentity {
            type_name: self.type_name.clone(),
            key,
        })
    }
}
