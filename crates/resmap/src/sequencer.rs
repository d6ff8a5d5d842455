//! Ordering of mutation commands for one logical write.
//!
//! Every write is split into three phases that run inside one transaction:
//!
//! 1. **pre-steps**: release one-to-one links that the write is about to take over, so
//!    a unique foreign key is never held by two rows at once;
//! 2. **main step**: the `INSERT`, `UPDATE` or `DELETE` of the resource's own row;
//! 3. **post-steps**: update foreign keys that live on related tables, which for a
//!    create can only happen once the new primary key is known.
//!
//! The order is load-bearing for referential integrity.

use crate::command::{self, SqlCommand};
use crate::error::{OrmError, OrmResult};
use crate::model::{DataModel, ForeignKey, ForeignKeySide, Relationship, ResourceType};
use crate::tracker::{ChangeTracker, ToManyChange, ToOneChange};
use crate::value::{Id, IdKind, ResourceIdentity, Value};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Ordered commands of one write whose primary key is already known.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WritePlan {
    pub pre_steps: Vec<SqlCommand>,
    pub main: Option<SqlCommand>,
    pub post_steps: Vec<SqlCommand>,
}

impl WritePlan {
    /// No pre-steps, no main step and no post-steps: nothing to execute.
    pub fn is_empty(&self) -> bool {
        self.pre_steps.is_empty() && self.main.is_none() && self.post_steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pre_steps.len() + usize::from(self.main.is_some()) + self.post_steps.len()
    }

    /// All commands in emission order.
    pub fn commands(&self) -> impl Iterator<Item = &SqlCommand> {
        self.pre_steps
            .iter()
            .chain(self.main.iter())
            .chain(self.post_steps.iter())
    }
}

/// Ordered commands of a create. Post-steps are resolved once the insert has
/// returned the new primary key.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatePlan {
    pub pre_steps: Vec<SqlCommand>,
    pub insert: SqlCommand,
    pub deferred: DeferredSteps,
    pub id_kind: IdKind,
}

/// Post-steps whose owner id is filled in later.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeferredSteps {
    steps: Vec<PendingStep>,
}

#[derive(Debug, Clone, PartialEq)]
enum PendingStep {
    SetToOne {
        table: String,
        id_column: String,
        column: String,
        current: Option<Id>,
        new: Option<Id>,
    },
    DetachToMany {
        table: String,
        id_column: String,
        column: String,
        is_nullable: bool,
        ids: Vec<Id>,
    },
    AttachToMany {
        table: String,
        id_column: String,
        column: String,
        ids: Vec<Id>,
    },
}

impl DeferredSteps {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Build the post-step commands for the resource identified by `owner_id`.
    pub fn resolve(&self, owner_id: &Id) -> OrmResult<Vec<SqlCommand>> {
        self.steps
            .iter()
            .map(|step| match step {
                PendingStep::SetToOne {
                    table,
                    id_column,
                    column,
                    current,
                    new,
                } => match (new, current) {
                    (Some(new), _) => command::set_foreign_key_by_id(
                        table,
                        column,
                        owner_id.clone().into(),
                        id_column,
                        new,
                    ),
                    (None, Some(current)) => {
                        command::set_foreign_key_by_id(table, column, Value::Null, id_column, current)
                    }
                    (None, None) => Err(OrmError::invariant(
                        "unchanged to-one relationship scheduled for update",
                    )),
                },
                PendingStep::DetachToMany {
                    table,
                    id_column,
                    column,
                    is_nullable,
                    ids,
                } => command::detach_from_many(table, column, *is_nullable, id_column, ids),
                PendingStep::AttachToMany {
                    table,
                    id_column,
                    column,
                    ids,
                } => command::attach_to_many(table, column, owner_id, id_column, ids),
            })
            .collect()
    }
}

fn server_id(identity: Option<&ResourceIdentity>) -> OrmResult<Option<Id>> {
    identity.map(|i| i.require_server_id().cloned()).transpose()
}

fn server_ids(identities: &[ResourceIdentity]) -> OrmResult<Vec<Id>> {
    identities
        .iter()
        .map(|i| i.require_server_id().cloned())
        .collect()
}

/// Server ids of an explicit request, each id once.
fn distinct_server_ids(identities: &[ResourceIdentity]) -> OrmResult<Vec<Id>> {
    let distinct: BTreeSet<&ResourceIdentity> = identities.iter().collect();
    distinct
        .into_iter()
        .map(|i| i.require_server_id().cloned())
        .collect()
}

/// Translates change-tracker deltas into ordered [`SqlCommand`]s.
pub struct CommandSequencer<'m, M: DataModel + ?Sized> {
    model: &'m M,
}

impl<'m, M: DataModel + ?Sized> CommandSequencer<'m, M> {
    pub fn new(model: &'m M) -> Self {
        Self { model }
    }

    fn right_type(&self, relationship: &Relationship) -> OrmResult<Arc<ResourceType>> {
        self.model.resource_type(&relationship.right_type)
    }

    /// Plan a create from a tracker whose current snapshot is blank (or absent).
    pub fn plan_create(&self, tracker: &ChangeTracker) -> OrmResult<CreatePlan> {
        tracker.assert_no_required_to_one_cleared_to_null()?;
        let resource_type = tracker.resource_type();

        let pre_steps = self.one_to_one_pre_steps(tracker)?;

        let columns: Vec<(String, Value)> = tracker
            .changed_columns()
            .into_iter()
            .filter(|(column, value)| !(column == &resource_type.id_column && value.is_null()))
            .collect();
        let insert =
            command::insert_returning_id(&resource_type.table, &columns, &resource_type.id_column)?;

        let deferred = self.post_steps(tracker)?;

        tracing::debug!(
            target: "resmap.plan",
            resource_type = %resource_type.name,
            pre_steps = pre_steps.len(),
            columns = columns.len(),
            post_steps = deferred.len(),
            "planned create"
        );

        Ok(CreatePlan {
            pre_steps,
            insert,
            deferred,
            id_kind: resource_type.id_kind,
        })
    }

    /// Plan an update (or a set-relationship) of the resource identified by `id`.
    ///
    /// Fails with [`OrmError::RequiredRelationshipCleared`] before building any command.
    pub fn plan_update(&self, tracker: &ChangeTracker, id: &Id) -> OrmResult<WritePlan> {
        tracker.assert_no_required_to_one_cleared_to_null()?;
        let resource_type = tracker.resource_type();

        let pre_steps = self.one_to_one_pre_steps(tracker)?;

        let assignments: Vec<(String, Value)> = tracker
            .changed_columns()
            .into_iter()
            .filter(|(column, _)| column != &resource_type.id_column)
            .collect();
        let main = if assignments.is_empty() {
            None
        } else {
            Some(command::update_by_id(
                &resource_type.table,
                &assignments,
                &resource_type.id_column,
                id,
            )?)
        };

        let post_steps = self.post_steps(tracker)?.resolve(id)?;

        let plan = WritePlan {
            pre_steps,
            main,
            post_steps,
        };
        tracing::debug!(
            target: "resmap.plan",
            resource_type = %resource_type.name,
            %id,
            pre_steps = plan.pre_steps.len(),
            main = plan.main.is_some(),
            post_steps = plan.post_steps.len(),
            "planned update"
        );
        Ok(plan)
    }

    /// Plan the delete of the resource identified by `id`.
    pub fn plan_delete(&self, resource_type: &ResourceType, id: &Id) -> OrmResult<WritePlan> {
        Ok(WritePlan {
            main: Some(command::delete_by_id(
                &resource_type.table,
                &resource_type.id_column,
                id,
            )?),
            ..WritePlan::default()
        })
    }

    /// Plan adding `related` to a to-many relationship, from an explicit id list.
    pub fn plan_add_to_many(
        &self,
        resource_type: &ResourceType,
        relationship: &str,
        owner_id: &Id,
        related: &[ResourceIdentity],
    ) -> OrmResult<WritePlan> {
        let (relationship, right_type, foreign_key) =
            self.to_many_target(resource_type, relationship, related)?;
        if related.is_empty() {
            return Ok(WritePlan::default());
        }
        let ids = distinct_server_ids(related)?;
        tracing::debug!(
            target: "resmap.plan",
            relationship = %relationship.name,
            count = ids.len(),
            "planned add to to-many"
        );
        Ok(WritePlan {
            post_steps: vec![command::attach_to_many(
                &right_type.table,
                &foreign_key.column_name,
                owner_id,
                &right_type.id_column,
                &ids,
            )?],
            ..WritePlan::default()
        })
    }

    /// Plan removing `related` from a to-many relationship, from an explicit id list.
    pub fn plan_remove_from_many(
        &self,
        resource_type: &ResourceType,
        relationship: &str,
        related: &[ResourceIdentity],
    ) -> OrmResult<WritePlan> {
        let (relationship, right_type, foreign_key) =
            self.to_many_target(resource_type, relationship, related)?;
        if related.is_empty() {
            return Ok(WritePlan::default());
        }
        let ids = distinct_server_ids(related)?;
        tracing::debug!(
            target: "resmap.plan",
            relationship = %relationship.name,
            count = ids.len(),
            "planned remove from to-many"
        );
        Ok(WritePlan {
            post_steps: vec![command::detach_from_many(
                &right_type.table,
                &foreign_key.column_name,
                foreign_key.is_nullable,
                &right_type.id_column,
                &ids,
            )?],
            ..WritePlan::default()
        })
    }

    /// Resolve a to-many relationship, its related type and its foreign key.
    fn to_many_target<'t>(
        &self,
        resource_type: &'t ResourceType,
        relationship: &str,
        related: &[ResourceIdentity],
    ) -> OrmResult<(&'t Relationship, Arc<ResourceType>, ForeignKey)> {
        let relationship = resource_type.relationship_by_name(relationship)?;
        if !relationship.is_to_many() {
            return Err(OrmError::validation(format!(
                "relationship '{}' on '{}' is not a to-many relationship",
                relationship.name, resource_type.name
            )));
        }
        if let Some(other) = related.iter().find(|r| r.type_name != relationship.right_type) {
            return Err(OrmError::ResourceTypeMismatch {
                expected: relationship.right_type.clone(),
                actual: other.type_name.clone(),
            });
        }
        let foreign_key = self.model.foreign_key(relationship)?;
        let right_type = self.right_type(relationship)?;
        Ok((relationship, right_type, foreign_key))
    }

    /// Release one-to-one links that the new state is about to take over.
    fn one_to_one_pre_steps(&self, tracker: &ChangeTracker) -> OrmResult<Vec<SqlCommand>> {
        let mut steps = Vec::new();
        for change in tracker.one_to_one_relationships_becoming_non_null() {
            if let Some(step) = self.one_to_one_pre_step(tracker.resource_type(), &change)? {
                steps.push(step);
            }
        }
        Ok(steps)
    }

    fn one_to_one_pre_step(
        &self,
        left_type: &ResourceType,
        change: &ToOneChange,
    ) -> OrmResult<Option<SqlCommand>> {
        // A related resource created in the same request cannot be linked yet.
        if change.new.as_ref().is_some_and(ResourceIdentity::is_local) {
            return Ok(None);
        }

        let foreign_key = &change.foreign_key;
        let (table, where_column, where_value) = match foreign_key.side {
            // Another row of our table may already point at the new related id.
            ForeignKeySide::Left => (
                left_type.table.clone(),
                foreign_key.column_name.clone(),
                server_id(change.new.as_ref())?,
            ),
            // The related row we currently own still points at us.
            ForeignKeySide::Right => {
                let right_type = self.right_type(&change.relationship)?;
                (
                    right_type.table.clone(),
                    right_type.id_column.clone(),
                    server_id(change.current.as_ref())?,
                )
            }
        };
        let Some(where_value) = where_value else {
            return Ok(None);
        };

        let step = if foreign_key.is_nullable {
            command::clear_one_to_one(&table, &foreign_key.column_name, &where_column, where_value.into())?
        } else {
            command::delete_one_to_one(&table, &where_column, where_value.into())?
        };
        Ok(Some(step))
    }

    fn post_steps(&self, tracker: &ChangeTracker) -> OrmResult<DeferredSteps> {
        let mut steps = Vec::new();

        for change in tracker.changed_to_one_with_foreign_key_at_right_side() {
            let right_type = self.right_type(&change.relationship)?;
            steps.push(PendingStep::SetToOne {
                table: right_type.table.clone(),
                id_column: right_type.id_column.clone(),
                column: change.foreign_key.column_name.clone(),
                current: server_id(change.current.as_ref())?,
                new: server_id(change.new.as_ref())?,
            });
        }

        for change in tracker.changed_to_many_relationships() {
            steps.extend(self.to_many_steps(&change)?);
        }

        Ok(DeferredSteps { steps })
    }

    fn to_many_steps(&self, change: &ToManyChange) -> OrmResult<Vec<PendingStep>> {
        let right_type = self.right_type(&change.relationship)?;
        let column = change.foreign_key.column_name.clone();
        let mut steps = Vec::with_capacity(2);

        let removed = server_ids(&change.removed())?;
        if !removed.is_empty() {
            steps.push(PendingStep::DetachToMany {
                table: right_type.table.clone(),
                id_column: right_type.id_column.clone(),
                column: column.clone(),
                is_nullable: change.foreign_key.is_nullable,
                ids: removed,
            });
        }

        let added = server_ids(&change.added())?;
        if !added.is_empty() {
            steps.push(PendingStep::AttachToMany {
                table: right_type.table.clone(),
                id_column: right_type.id_column.clone(),
                column,
                ids: added,
            });
        }

        Ok(steps)
    }
}

#[cfg(test)]
mod tests;
