//! Mapping of flattened join rows back into a de-duplicated resource graph.
//!
//! A read that includes related resources is executed as one query whose rows are
//! the concatenation of one column block per include-tree node. [`RowLayout`] fixes
//! which block belongs to which node: position 0 is the primary type, the remaining
//! positions follow a breadth-first walk of the include tree with siblings ordered by
//! relationship name.
//!
//! [`ResultGraphMapper`] consumes rows in that layout. An identity map keyed by
//! `(type, id)` guarantees a single node per resource for the whole read, so the
//! repetition caused by joining to-many relationships collapses into one node with
//! all of its children accumulated.
//!
//! # Example
//!
//! ```ignore
//! use resmap::{IncludeTree, ResultGraphMapper};
//!
//! let include = IncludeTree::parse(&model, "todoItems", "owner,tags")?;
//! let mut mapper = ResultGraphMapper::new(&model, &include)?;
//! let select = mapper.layout().select_list()?;
//! // SELECT {select} FROM todo_items t0 LEFT JOIN people t1 ON ... LEFT JOIN tags t2 ON ...
//! for row in client.query(&sql, &[]).await? {
//!     mapper.map_row(&row)?;
//! }
//! let graph = mapper.finish();
//! ```

use crate::error::{OrmError, OrmResult};
use crate::include::{IncludeNode, IncludeTree};
use crate::model::{ColumnMapping, ColumnSource, DataModel, Relationship, ResourceType};
use crate::resource::{RelationshipData, Resource};
use crate::sql::Sql;
use crate::value::{Id, IdKind, ResourceIdentity, Value};
use serde_json::{Map, json};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use tokio_postgres::Row;

/// The column block of one include-tree node within a row.
#[derive(Debug, Clone)]
pub struct PositionDescriptor {
    pub position: usize,
    pub resource_type: Arc<ResourceType>,
    /// Position of the node this one is included from; `None` for the primary.
    pub parent: Option<usize>,
    /// Relationship on the parent's type that leads here; `None` for the primary.
    pub relationship: Option<Relationship>,
    pub children: Vec<usize>,
    /// Index of this block's first column within a row.
    pub column_offset: usize,
    pub columns: Vec<ColumnMapping>,
    // relationship name -> (related type, related id kind) for left-side key columns
    foreign_key_targets: BTreeMap<String, (String, IdKind)>,
}

impl PositionDescriptor {
    fn new(
        model: &(impl DataModel + ?Sized),
        position: usize,
        resource_type: Arc<ResourceType>,
        parent: Option<usize>,
        relationship: Option<Relationship>,
    ) -> OrmResult<Self> {
        let columns = model.column_mappings(&resource_type)?;
        let mut foreign_key_targets = BTreeMap::new();
        for column in &columns {
            if let ColumnSource::ForeignKey(name) = &column.source {
                let related = resource_type.relationship_by_name(name)?;
                let right_type = model.resource_type(&related.right_type)?;
                foreign_key_targets.insert(name.clone(), (right_type.name.clone(), right_type.id_kind));
            }
        }
        Ok(Self {
            position,
            resource_type,
            parent,
            relationship,
            children: Vec::new(),
            column_offset: 0,
            columns,
            foreign_key_targets,
        })
    }

    /// Build the resource stored in this position's column block.
    fn decode(&self, row: &Row) -> OrmResult<Resource> {
        let mut resource = Resource::new(self.resource_type.name.clone());
        for (i, column) in self.columns.iter().enumerate() {
            let value = Value::from_row(row, self.column_offset + i)?;
            match &column.source {
                ColumnSource::Id => {
                    resource.id = Id::from_value(&value, self.resource_type.id_kind)?;
                }
                ColumnSource::Attribute(name) => resource.set_attribute(name.clone(), value),
                ColumnSource::ForeignKey(name) => {
                    let Some((right_type, id_kind)) = self.foreign_key_targets.get(name) else {
                        continue;
                    };
                    if let Some(id) = Id::from_value(&value, *id_kind)? {
                        resource = resource
                            .with_to_one(name.clone(), Some(ResourceIdentity::server(right_type, id)));
                    }
                }
            }
        }
        Ok(resource)
    }
}

/// Per-position column layout of the rows produced for one include tree.
#[derive(Debug, Clone)]
pub struct RowLayout {
    positions: Vec<PositionDescriptor>,
    width: usize,
}

impl RowLayout {
    /// Assign positions breadth-first, ordering siblings by relationship name.
    pub fn new(model: &(impl DataModel + ?Sized), include: &IncludeTree) -> OrmResult<Self> {
        let primary = model.resource_type(&include.primary_type)?;
        let mut positions = vec![PositionDescriptor::new(model, 0, primary, None, None)?];

        let mut queue: VecDeque<(usize, &[IncludeNode])> = VecDeque::new();
        queue.push_back((0, include.children.as_slice()));

        while let Some((parent, nodes)) = queue.pop_front() {
            let mut siblings: Vec<&IncludeNode> = nodes.iter().collect();
            siblings.sort_by(|a, b| a.relationship.name.cmp(&b.relationship.name));

            for node in siblings {
                let relationship = &node.relationship;
                let parent_type = &positions[parent].resource_type;
                if relationship.left_type != parent_type.name {
                    return Err(OrmError::metadata(format!(
                        "included relationship '{}' is declared on '{}', not on '{}'",
                        relationship.name, relationship.left_type, parent_type.name
                    )));
                }
                let position = positions.len();
                let resource_type = model.resource_type(&relationship.right_type)?;
                positions.push(PositionDescriptor::new(
                    model,
                    position,
                    resource_type,
                    Some(parent),
                    Some(relationship.clone()),
                )?);
                positions[parent].children.push(position);
                queue.push_back((position, node.children.as_slice()));
            }
        }

        let mut width = 0;
        for descriptor in &mut positions {
            descriptor.column_offset = width;
            width += descriptor.columns.len();
        }

        Ok(Self { positions, width })
    }

    /// Number of positions, i.e. the include-tree size.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Total number of columns in a row.
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn position(&self, position: usize) -> Option<&PositionDescriptor> {
        self.positions.get(position)
    }

    pub fn positions(&self) -> &[PositionDescriptor] {
        &self.positions
    }

    /// Table alias used for a position in [`RowLayout::select_list`].
    pub fn alias(position: usize) -> String {
        format!("t{position}")
    }

    /// The select list in row order, qualifying each column with its position's alias:
    /// `"t0"."id", "t0"."description", "t1"."id", ...`
    pub fn select_list(&self) -> OrmResult<Sql> {
        let mut q = Sql::empty();
        for descriptor in &self.positions {
            let alias = Self::alias(descriptor.position);
            for column in &descriptor.columns {
                if !q.is_empty() {
                    q.push(", ");
                }
                q.push_ident(&alias)?;
                q.push(".");
                q.push_ident(&column.column)?;
            }
        }
        Ok(q)
    }

    /// Decode a driver row into one resource per position.
    pub fn decode(&self, row: &Row) -> OrmResult<Vec<Resource>> {
        if row.len() != self.width {
            return Err(OrmError::invariant(format!(
                "row has {} columns but the include tree expects {}",
                row.len(),
                self.width
            )));
        }
        self.positions.iter().map(|d| d.decode(row)).collect()
    }
}

/// Index of a node in a [`ResourceGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Included related nodes of one relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Link {
    ToOne(Option<NodeId>),
    ToMany(Vec<NodeId>),
}

/// A canonical resource instance plus its included relationships.
#[derive(Debug, Clone)]
pub struct ResourceNode {
    pub resource: Resource,
    pub links: BTreeMap<String, Link>,
}

/// Consumes rows in a [`RowLayout`] and builds a [`ResourceGraph`].
#[derive(Debug)]
pub struct ResultGraphMapper {
    layout: RowLayout,
    nodes: Vec<ResourceNode>,
    identity_map: HashMap<(String, Id), NodeId>,
    primaries: Vec<NodeId>,
    rows: usize,
}

impl ResultGraphMapper {
    pub fn new(model: &(impl DataModel + ?Sized), include: &IncludeTree) -> OrmResult<Self> {
        Ok(Self::with_layout(RowLayout::new(model, include)?))
    }

    pub fn with_layout(layout: RowLayout) -> Self {
        Self {
            layout,
            nodes: Vec::new(),
            identity_map: HashMap::new(),
            primaries: Vec::new(),
            rows: 0,
        }
    }

    pub fn layout(&self) -> &RowLayout {
        &self.layout
    }

    /// Map one row given as one resource per position.
    ///
    /// Returns the node of the row's primary resource.
    pub fn map(&mut self, row: Vec<Resource>) -> OrmResult<NodeId> {
        if row.len() != self.layout.len() {
            return Err(OrmError::invariant(format!(
                "row has {} positions but the include tree has {}",
                row.len(),
                self.layout.len()
            )));
        }
        self.rows += 1;

        let mut resolved = Vec::with_capacity(row.len());
        for (position, resource) in row.into_iter().enumerate() {
            let expected = &self.layout.positions[position].resource_type.name;
            if resource.type_name != *expected {
                return Err(OrmError::invariant(format!(
                    "position {position} holds a '{}' but the include tree expects '{expected}'",
                    resource.type_name
                )));
            }
            resolved.push(self.get_cached(resource));
        }

        let Some(primary) = resolved[0] else {
            return Err(OrmError::invariant("row has no primary resource"));
        };

        // Positions are in breadth-first order, so a parent is always settled before
        // its children. A child of an absent node is never linked.
        let mut reachable = vec![false; resolved.len()];
        reachable[0] = true;
        for descriptor in &self.layout.positions[1..] {
            let (Some(parent), Some(relationship)) = (descriptor.parent, &descriptor.relationship)
            else {
                return Err(OrmError::invariant(format!(
                    "position {} has no parent",
                    descriptor.position
                )));
            };
            let Some(parent_node) = resolved[parent].filter(|_| reachable[parent]) else {
                continue;
            };
            let child = resolved[descriptor.position];
            reachable[descriptor.position] = child.is_some();
            link(&mut self.nodes[parent_node.0], relationship, child)?;
        }

        self.primaries.push(primary);
        Ok(primary)
    }

    /// Decode a driver row through the layout and map it.
    pub fn map_row(&mut self, row: &Row) -> OrmResult<NodeId> {
        let resources = self.layout.decode(row)?;
        self.map(resources)
    }

    /// The canonical node for `resource`, or `None` when it represents an absent
    /// outer-joined row (no id, or the zero value of its id kind).
    pub fn get_cached(&mut self, resource: Resource) -> Option<NodeId> {
        let id = resource.id.clone().filter(|id| !id.is_default())?;
        let key = (resource.type_name.clone(), id);
        if let Some(node) = self.identity_map.get(&key) {
            return Some(*node);
        }
        let node = NodeId(self.nodes.len());
        self.nodes.push(ResourceNode {
            resource,
            links: BTreeMap::new(),
        });
        self.identity_map.insert(key, node);
        Some(node)
    }

    /// Primary nodes, de-duplicated in first-seen order.
    pub fn get_resources(&self) -> Vec<NodeId> {
        let mut seen = HashSet::with_capacity(self.primaries.len());
        self.primaries
            .iter()
            .copied()
            .filter(|node| seen.insert(*node))
            .collect()
    }

    pub fn node(&self, node: NodeId) -> Option<&ResourceNode> {
        self.nodes.get(node.0)
    }

    /// Stop mapping and hand over the graph.
    pub fn finish(self) -> ResourceGraph {
        let roots = self.get_resources();
        tracing::debug!(
            target: "resmap.read",
            rows = self.rows,
            resources = roots.len(),
            nodes = self.nodes.len(),
            "mapped result rows"
        );
        ResourceGraph {
            nodes: self.nodes,
            roots,
        }
    }
}

fn link(parent: &mut ResourceNode, relationship: &Relationship, child: Option<NodeId>) -> OrmResult<()> {
    let entry = parent
        .links
        .entry(relationship.name.clone())
        .or_insert_with(|| {
            if relationship.is_to_one() {
                Link::ToOne(None)
            } else {
                Link::ToMany(Vec::new())
            }
        });
    match (entry, child) {
        (_, None) => {}
        (Link::ToOne(slot), Some(child)) if relationship.is_to_one() => *slot = Some(child),
        (Link::ToMany(children), Some(child)) if relationship.is_to_many() => {
            if !children.contains(&child) {
                children.push(child);
            }
        }
        _ => {
            return Err(OrmError::invariant(format!(
                "relationship '{}' changed cardinality while mapping",
                relationship.name
            )));
        }
    }
    Ok(())
}

/// The de-duplicated result of one read.
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    nodes: Vec<ResourceNode>,
    roots: Vec<NodeId>,
}

impl ResourceGraph {
    /// Primary resources in first-seen order.
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Every distinct resource seen, primary or included.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, node: NodeId) -> Option<&ResourceNode> {
        self.nodes.get(node.0)
    }

    pub fn resource(&self, node: NodeId) -> Option<&Resource> {
        self.node(node).map(|n| &n.resource)
    }

    /// Primary resources in first-seen order.
    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.roots.iter().filter_map(|root| self.resource(*root))
    }

    /// A copy of the node's resource with every included relationship filled in
    /// from the graph's links.
    pub fn resolved(&self, node: NodeId) -> Option<Resource> {
        let entry = self.node(node)?;
        let mut resource = entry.resource.clone();
        for (name, link) in &entry.links {
            let data = match link {
                Link::ToOne(child) => {
                    RelationshipData::ToOne(child.and_then(|c| self.resource(c)?.identity()))
                }
                Link::ToMany(children) => RelationshipData::ToMany(
                    children
                        .iter()
                        .filter_map(|c| self.resource(*c)?.identity())
                        .collect(),
                ),
            };
            resource.set_relationship(name.clone(), data);
        }
        Some(resource)
    }

    pub fn to_one(&self, node: NodeId, relationship: &str) -> Option<NodeId> {
        match self.node(node)?.links.get(relationship)? {
            Link::ToOne(child) => *child,
            Link::ToMany(_) => None,
        }
    }

    pub fn to_many(&self, node: NodeId, relationship: &str) -> &[NodeId] {
        match self.node(node).and_then(|n| n.links.get(relationship)) {
            Some(Link::ToMany(children)) => children,
            _ => &[],
        }
    }

    /// Render the primary resources with their included resources nested inline.
    ///
    /// A resource reached again through a cycle is rendered as `{type, id}` only.
    pub fn to_json(&self) -> serde_json::Value {
        let mut path = Vec::new();
        serde_json::Value::Array(
            self.roots
                .iter()
                .map(|root| self.render(*root, &mut path))
                .collect(),
        )
    }

    fn render(&self, node: NodeId, path: &mut Vec<NodeId>) -> serde_json::Value {
        let Some(entry) = self.node(node) else {
            return serde_json::Value::Null;
        };
        let resource = &entry.resource;
        if path.contains(&node) {
            return json!({ "type": resource.type_name, "id": resource.id });
        }

        path.push(node);
        let mut included = Map::new();
        for (name, link) in &entry.links {
            let value = match link {
                Link::ToOne(child) => child.map_or(serde_json::Value::Null, |c| self.render(c, path)),
                Link::ToMany(children) => {
                    serde_json::Value::Array(children.iter().map(|c| self.render(*c, path)).collect())
                }
            };
            included.insert(name.clone(), value);
        }
        path.pop();

        json!({
            "type": resource.type_name,
            "id": resource.id,
            "attributes": resource.attributes,
            "included": included,
        })
    }
}
