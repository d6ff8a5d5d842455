//! Include trees: which relationships a read joins, and how deep.

use crate::error::{OrmError, OrmResult};
use crate::model::{DataModel, Relationship};

/// One included relationship and the relationships included beneath it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeNode {
    pub relationship: Relationship,
    pub children: Vec<IncludeNode>,
}

impl IncludeNode {
    pub fn new(relationship: Relationship) -> Self {
        Self {
            relationship,
            children: Vec::new(),
        }
    }

    pub fn with(mut self, child: IncludeNode) -> Self {
        self.children.push(child);
        self
    }

    fn count(&self) -> usize {
        1 + self.children.iter().map(IncludeNode::count).sum::<usize>()
    }
}

/// The primary resource type of a read plus the tree of included relationships.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeTree {
    pub primary_type: String,
    pub children: Vec<IncludeNode>,
}

impl IncludeTree {
    pub fn new(primary_type: impl Into<String>) -> Self {
        Self {
            primary_type: primary_type.into(),
            children: Vec::new(),
        }
    }

    pub fn with(mut self, child: IncludeNode) -> Self {
        self.children.push(child);
        self
    }

    /// Parse comma-separated dotted relationship paths, e.g. `"owner.account,tags"`.
    ///
    /// Shared prefixes are merged into one branch. An empty string yields a tree
    /// without includes.
    pub fn parse(
        model: &(impl DataModel + ?Sized),
        primary_type: &str,
        paths: &str,
    ) -> OrmResult<Self> {
        model.resource_type(primary_type)?;
        let mut tree = Self::new(primary_type);

        for path in paths.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let mut level = &mut tree.children;
            let mut left_type = primary_type.to_string();

            for name in path.split('.') {
                if name.is_empty() {
                    return Err(OrmError::validation(format!(
                        "include path '{path}' contains an empty relationship name"
                    )));
                }
                let resource_type = model.resource_type(&left_type)?;
                let relationship = resource_type.relationship_by_name(name)?.clone();
                left_type = relationship.right_type.clone();

                let idx = match level.iter().position(|n| n.relationship.name == name) {
                    Some(idx) => idx,
                    None => {
                        level.push(IncludeNode::new(relationship));
                        level.len() - 1
                    }
                };
                level = &mut level[idx].children;
            }
        }

        Ok(tree)
    }

    /// Number of row positions this tree produces: the primary plus one per node.
    pub fn len(&self) -> usize {
        1 + self.children.iter().map(IncludeNode::count).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}
