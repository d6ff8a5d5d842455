//! Resource writes and reads wired end to end.
//!
//! [`ResourceRepository`] glues the pieces together for one operation at a time:
//! a [`ChangeTracker`] captures the before and after states, the [`CommandSequencer`]
//! turns the deltas into ordered commands and the [`CommandExecutor`] runs them.
//!
//! Write methods take any [`StoreClient`] and expect it to be a transaction that the
//! caller commits or rolls back. The `*_in_transaction` variants open and finish one
//! around a single write.

use crate::client::{StoreClient, StreamingClient};
use crate::error::{OrmError, OrmResult};
use crate::executor::CommandExecutor;
use crate::include::IncludeTree;
use crate::mapper::{ResourceGraph, ResultGraphMapper, RowLayout};
use crate::model::DataModel;
use crate::resource::{RelationshipData, Resource};
use crate::sequencer::{CommandSequencer, WritePlan};
use crate::sql::Sql;
use crate::tracker::ChangeTracker;
use crate::value::{Id, ResourceIdentity};
use futures_util::TryStreamExt;

/// Writes and reads resources of a [`DataModel`].
#[derive(Debug, Clone)]
pub struct ResourceRepository<M: DataModel> {
    model: M,
    executor: CommandExecutor,
}

impl<M: DataModel> ResourceRepository<M> {
    pub fn new(model: M) -> Self {
        Self {
            model,
            executor: CommandExecutor::new(),
        }
    }

    pub fn with_executor(mut self, executor: CommandExecutor) -> Self {
        self.executor = executor;
        self
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn executor(&self) -> &CommandExecutor {
        &self.executor
    }

    fn tracker(&self, type_name: &str) -> OrmResult<ChangeTracker> {
        ChangeTracker::new(&self.model, self.model.resource_type(type_name)?)
    }

    /// Insert `resource` and link its relationships. Returns the new primary key.
    pub async fn create(&self, client: &impl StoreClient, resource: &Resource) -> OrmResult<Id> {
        let mut tracker = self.tracker(&resource.type_name)?;
        let blank = Resource::blank(tracker.resource_type());
        tracker.capture_current(&blank)?;
        tracker.capture_new(resource)?;

        let plan = CommandSequencer::new(&self.model).plan_create(&tracker)?;
        self.executor.run_create(client, &plan).await
    }

    /// Plan the commands that turn `current` into `new`, without running them.
    pub fn plan_update(&self, current: &Resource, new: &Resource) -> OrmResult<WritePlan> {
        let id = current.id.as_ref().ok_or_else(|| {
            OrmError::validation(format!(
                "cannot update a '{}' that has no server id",
                current.type_name
            ))
        })?;
        if new.id.as_ref().is_some_and(|new_id| new_id != id) {
            return Err(OrmError::validation(format!(
                "cannot change the id of '{}' {} while updating",
                current.type_name, id
            )));
        }

        let mut tracker = self.tracker(&current.type_name)?;
        tracker.capture_current(current)?;
        tracker.capture_new(new)?;
        CommandSequencer::new(&self.model).plan_update(&tracker, id)
    }

    /// Write the difference between `current` and `new`. Returns the number of
    /// commands executed, zero when nothing changed.
    pub async fn update(
        &self,
        client: &impl StoreClient,
        current: &Resource,
        new: &Resource,
    ) -> OrmResult<usize> {
        let plan = self.plan_update(current, new)?;
        self.executor.run_plan(client, &plan).await?;
        Ok(plan.len())
    }

    /// Replace one relationship of `current`.
    pub async fn set_relationship(
        &self,
        client: &impl StoreClient,
        current: &Resource,
        relationship: &str,
        data: RelationshipData,
    ) -> OrmResult<usize> {
        let new = self.with_relationship(current, relationship, data)?;
        self.update(client, current, &new).await
    }

    fn with_relationship(
        &self,
        current: &Resource,
        relationship: &str,
        data: RelationshipData,
    ) -> OrmResult<Resource> {
        let resource_type = self.model.resource_type(&current.type_name)?;
        resource_type.relationship_by_name(relationship)?;
        let mut new = current.clone();
        new.set_relationship(relationship, data);
        Ok(new)
    }

    pub async fn delete(&self, client: &impl StoreClient, type_name: &str, id: &Id) -> OrmResult<()> {
        let resource_type = self.model.resource_type(type_name)?;
        let plan = CommandSequencer::new(&self.model).plan_delete(&resource_type, id)?;
        self.executor.run_plan(client, &plan).await
    }

    /// Link `related` into a to-many relationship of the resource `owner_id`.
    pub async fn add_to_many(
        &self,
        client: &impl StoreClient,
        type_name: &str,
        owner_id: &Id,
        relationship: &str,
        related: &[ResourceIdentity],
    ) -> OrmResult<usize> {
        let resource_type = self.model.resource_type(type_name)?;
        let plan = CommandSequencer::new(&self.model).plan_add_to_many(
            &resource_type,
            relationship,
            owner_id,
            related,
        )?;
        self.executor.run_plan(client, &plan).await?;
        Ok(plan.len())
    }

    /// Unlink `related` from a to-many relationship. Related rows whose key is
    /// required are deleted.
    pub async fn remove_from_many(
        &self,
        client: &impl StoreClient,
        type_name: &str,
        relationship: &str,
        related: &[ResourceIdentity],
    ) -> OrmResult<usize> {
        let resource_type = self.model.resource_type(type_name)?;
        let plan = CommandSequencer::new(&self.model).plan_remove_from_many(
            &resource_type,
            relationship,
            related,
        )?;
        self.executor.run_plan(client, &plan).await?;
        Ok(plan.len())
    }

    /// The row layout a read of `include` must select, see [`RowLayout::select_list`].
    pub fn row_layout(&self, include: &IncludeTree) -> OrmResult<RowLayout> {
        RowLayout::new(&self.model, include)
    }

    /// Run a query whose rows follow the layout of `include` and map them into a graph.
    ///
    /// The cancel signal is checked between rows; a row already being received is
    /// not interrupted.
    pub async fn get_resources(
        &self,
        client: &impl StreamingClient,
        query: &Sql,
        include: &IncludeTree,
    ) -> OrmResult<ResourceGraph> {
        let mut mapper = ResultGraphMapper::new(&self.model, include)?;
        let sql = query.to_sql();
        let params = query.params_ref();
        tracing::debug!(
            target: "resmap.read",
            primary_type = %include.primary_type,
            positions = mapper.layout().len(),
            sql = %self.executor.config().truncate(&query.to_named_sql()),
        );

        let mut rows = self
            .executor
            .guarded(client, client.query_stream(&sql, &params))
            .await?;
        while let Some(row) = rows.try_next().await? {
            self.executor.check_cancelled()?;
            mapper.map_row(&row)?;
        }
        Ok(mapper.finish())
    }

    pub async fn create_in_transaction(
        &self,
        client: &mut tokio_postgres::Client,
        resource: &Resource,
    ) -> OrmResult<Id> {
        crate::transaction!(client, tx, { self.create(&tx, resource).await })
    }

    /// Like [`ResourceRepository::update`]; no transaction is opened when nothing changed.
    pub async fn update_in_transaction(
        &self,
        client: &mut tokio_postgres::Client,
        current: &Resource,
        new: &Resource,
    ) -> OrmResult<usize> {
        let plan = self.plan_update(current, new)?;
        if plan.is_empty() {
            return Ok(0);
        }
        crate::transaction!(client, tx, {
            self.executor.run_plan(&tx, &plan).await?;
            Ok::<_, OrmError>(plan.len())
        })
    }

    pub async fn set_relationship_in_transaction(
        &self,
        client: &mut tokio_postgres::Client,
        current: &Resource,
        relationship: &str,
        data: RelationshipData,
    ) -> OrmResult<usize> {
        let new = self.with_relationship(current, relationship, data)?;
        self.update_in_transaction(client, current, &new).await
    }

    pub async fn delete_in_transaction(
        &self,
        client: &mut tokio_postgres::Client,
        type_name: &str,
        id: &Id,
    ) -> OrmResult<()> {
        crate::transaction!(client, tx, { self.delete(&tx, type_name, id).await })
    }

    pub async fn add_to_many_in_transaction(
        &self,
        client: &mut tokio_postgres::Client,
        type_name: &str,
        owner_id: &Id,
        relationship: &str,
        related: &[ResourceIdentity],
    ) -> OrmResult<usize> {
        crate::transaction!(client, tx, {
            self.add_to_many(&tx, type_name, owner_id, relationship, related)
                .await
        })
    }

    pub async fn remove_from_many_in_transaction(
        &self,
        client: &mut tokio_postgres::Client,
        type_name: &str,
        relationship: &str,
        related: &[ResourceIdentity],
    ) -> OrmResult<usize> {
        crate::transaction!(client, tx, {
            self.remove_from_many(&tx, type_name, relationship, related)
                .await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{self, RecordingClient};
    use crate::value::Value;
    use crate::InMemoryDataModel;

    fn repository() -> ResourceRepository<InMemoryDataModel> {
        ResourceRepository::new(test_support::model())
    }

    fn tag(id: i64) -> ResourceIdentity {
        ResourceIdentity::server("tags", id)
    }

    fn todo_item() -> Resource {
        Resource::new("todoItems")
            .with_id(1_i64)
            .with_attribute("description", "Write docs")
            .with_to_one("owner", Some(ResourceIdentity::server("people", 7_i64)))
            .with_to_many("tags", [tag(1), tag(2), tag(3)])
    }

    #[tokio::test]
    async fn create_returns_the_inserted_id() {
        let client = RecordingClient::new().inserting(5_i64);
        let id = repository()
            .create(
                &client,
                &Resource::new("tags").with_attribute("name", Value::from("urgent")),
            )
            .await
            .unwrap();
        assert_eq!(id, Id::Int(5));
        assert_eq!(
            client.executed(),
            vec![r#"INSERT INTO "tags" ("name") VALUES ($1) RETURNING "id""#]
        );
    }

    #[tokio::test]
    async fn unchanged_update_executes_nothing() {
        let client = RecordingClient::new();
        let count = repository()
            .update(&client, &todo_item(), &todo_item())
            .await
            .unwrap();
        assert_eq!(count, 0);
        assert!(client.executed().is_empty());
    }

    #[tokio::test]
    async fn set_relationship_removes_in_one_batch() {
        let client = RecordingClient::new().affecting(2);
        let count = repository()
            .set_relationship(
                &client,
                &todo_item(),
                "tags",
                RelationshipData::ToMany(vec![tag(3)]),
            )
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(
            client.executed(),
            vec![r#"UPDATE "tags" SET "todo_item_id" = $1 WHERE "id" IN ($2, $3)"#]
        );
    }

    #[tokio::test]
    async fn clearing_a_required_relationship_issues_no_sql() {
        let client = RecordingClient::new();
        let err = repository()
            .set_relationship(&client, &todo_item(), "owner", RelationshipData::ToOne(None))
            .await
            .unwrap_err();
        assert!(err.is_required_relationship_cleared());
        assert!(client.executed().is_empty());
    }

    #[tokio::test]
    async fn set_relationship_rejects_unknown_names() {
        let client = RecordingClient::new();
        let err = repository()
            .set_relationship(&client, &todo_item(), "labels", RelationshipData::ToMany(vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, OrmError::Metadata(_)));
    }

    #[test]
    fn update_requires_matching_ids() {
        let repo = repository();
        let unsaved = Resource::new("todoItems");
        assert!(repo.plan_update(&unsaved, &unsaved).unwrap_err().is_client_error());

        let other = todo_item().with_id(2_i64);
        assert!(repo.plan_update(&todo_item(), &other).unwrap_err().is_client_error());
    }

    #[tokio::test]
    async fn delete_of_a_missing_row_is_a_store_failure() {
        let client = RecordingClient::new().affecting(0);
        let err = repository()
            .delete(&client, "todoItems", &Id::Int(99))
            .await
            .unwrap_err();
        assert!(err.is_store_failure());
    }

    #[tokio::test]
    async fn add_and_remove_use_batched_statements() {
        let repo = repository();
        let client = RecordingClient::new().affecting(2).affecting(2);
        repo.add_to_many(&client, "todoItems", &Id::Int(1), "tags", &[tag(10), tag(11)])
            .await
            .unwrap();
        repo.remove_from_many(
            &client,
            "people",
            "ownedTodoItems",
            &[
                ResourceIdentity::server("todoItems", 4_i64),
                ResourceIdentity::server("todoItems", 5_i64),
            ],
        )
        .await
        .unwrap();

        assert_eq!(
            client.executed(),
            vec![
                r#"UPDATE "tags" SET "todo_item_id" = $1 WHERE "id" IN ($2, $3)"#,
                r#"DELETE FROM "todo_items" WHERE "id" IN ($1, $2)"#,
            ]
        );
    }

    #[tokio::test]
    async fn empty_result_maps_to_an_empty_graph() {
        let repo = repository();
        let include = IncludeTree::parse(repo.model(), "todoItems", "tags").unwrap();
        let layout = repo.row_layout(&include).unwrap();

        let mut query = crate::sql("SELECT ");
        query.push_sql(layout.select_list().unwrap());
        query.push(r#" FROM "todo_items" "t0" LEFT JOIN "tags" "t1" ON "t1"."todo_item_id" = "t0"."id""#);

        let client = RecordingClient::new();
        let graph = repo.get_resources(&client, &query, &include).await.unwrap();
        assert!(graph.is_empty());
        assert_eq!(client.executed().len(), 1);
    }
}
