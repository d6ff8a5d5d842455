//! Shared fixtures for unit tests.

use crate::client::{RowStream, StoreClient, StreamingClient};
use crate::error::{OrmError, OrmResult};
use crate::model::{ForeignKey, InMemoryDataModel, ResourceType};
use crate::value::{Id, IdKind};
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio_postgres::Row;
use tokio_postgres::types::ToSql;

/// A small todo-list model exercising every foreign key placement:
///
/// | relationship                 | key column     | side  | nullable | one-to-one |
/// |------------------------------|----------------|-------|----------|------------|
/// | `todoItems.owner`            | `owner_id`     | left  | no       | no         |
/// | `todoItems.assignee`         | `assignee_id`  | left  | yes      | no         |
/// | `todoItems.tags`             | `todo_item_id` | right | yes      | no         |
/// | `people.ownedTodoItems`      | `owner_id`     | right | no       | no         |
/// | `people.assignedTodoItems`   | `assignee_id`  | right | yes      | no         |
/// | `people.account`             | `account_id`   | left  | yes      | yes        |
/// | `people.badge`               | `badge_id`     | left  | no       | yes        |
/// | `people.passport`            | `person_id`    | right | yes      | yes        |
/// | `people.profile`             | `person_id`    | right | no       | yes        |
pub(crate) fn model() -> InMemoryDataModel {
    InMemoryDataModel::new()
        .with_type(
            ResourceType::new("people", "people", IdKind::Int)
                .attribute("firstName", "first_name")
                .attribute("lastName", "last_name")
                .to_many("ownedTodoItems", "todoItems")
                .to_many("assignedTodoItems", "todoItems")
                .to_one("account", "loginAccounts")
                .to_one("badge", "badges")
                .to_one("passport", "passports")
                .to_one("profile", "profiles"),
        )
        .with_type(
            ResourceType::new("todoItems", "todo_items", IdKind::Int)
                .attribute("description", "description")
                .attribute("priority", "priority")
                .to_one("owner", "people")
                .to_one("assignee", "people")
                .to_many("tags", "tags"),
        )
        .with_type(ResourceType::new("tags", "tags", IdKind::Int).attribute("name", "name"))
        .with_type(
            ResourceType::new("loginAccounts", "login_accounts", IdKind::Int)
                .attribute("userName", "user_name"),
        )
        .with_type(ResourceType::new("badges", "badges", IdKind::Int).attribute("label", "label"))
        .with_type(
            ResourceType::new("passports", "passports", IdKind::Int)
                .attribute("number", "number"),
        )
        .with_type(ResourceType::new("profiles", "profiles", IdKind::Int).attribute("bio", "bio"))
        .with_foreign_key("todoItems", "owner", ForeignKey::left("owner_id", false))
        .with_foreign_key("todoItems", "assignee", ForeignKey::left("assignee_id", true))
        .with_foreign_key("todoItems", "tags", ForeignKey::right("todo_item_id", true))
        .with_foreign_key("people", "ownedTodoItems", ForeignKey::right("owner_id", false))
        .with_foreign_key("people", "assignedTodoItems", ForeignKey::right("assignee_id", true))
        .with_foreign_key("people", "account", ForeignKey::left("account_id", true).one_to_one())
        .with_foreign_key("people", "badge", ForeignKey::left("badge_id", false).one_to_one())
        .with_foreign_key("people", "passport", ForeignKey::right("person_id", true).one_to_one())
        .with_foreign_key("people", "profile", ForeignKey::right("person_id", false).one_to_one())
        .build()
        .expect("fixture model is consistent")
}

/// A [`StoreClient`] that records executed statements and replays scripted results.
#[derive(Default)]
pub(crate) struct RecordingClient {
    executed: Mutex<Vec<String>>,
    affected: Mutex<VecDeque<OrmResult<u64>>>,
    inserted: Mutex<VecDeque<Id>>,
}

impl RecordingClient {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queue the affected-row count of the next `execute`.
    pub(crate) fn affecting(self, rows: u64) -> Self {
        self.affected.lock().unwrap().push_back(Ok(rows));
        self
    }

    /// Queue a failure for the next `execute`.
    pub(crate) fn failing(self, message: &str) -> Self {
        self.affected
            .lock()
            .unwrap()
            .push_back(Err(OrmError::store_update(message)));
        self
    }

    /// Queue the id returned by the next insert.
    pub(crate) fn inserting(self, id: impl Into<Id>) -> Self {
        self.inserted.lock().unwrap().push_back(id.into());
        self
    }

    /// Statements executed so far, with `$N` placeholders.
    pub(crate) fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

impl StoreClient for RecordingClient {
    async fn query(&self, sql: &str, _params: &[&(dyn ToSql + Sync)]) -> OrmResult<Vec<Row>> {
        self.executed.lock().unwrap().push(sql.to_string());
        Ok(Vec::new())
    }

    async fn execute(&self, sql: &str, _params: &[&(dyn ToSql + Sync)]) -> OrmResult<u64> {
        self.executed.lock().unwrap().push(sql.to_string());
        self.affected.lock().unwrap().pop_front().unwrap_or(Ok(1))
    }

    async fn query_id(
        &self,
        sql: &str,
        _params: &[&(dyn ToSql + Sync)],
        _kind: IdKind,
    ) -> OrmResult<Id> {
        self.executed.lock().unwrap().push(sql.to_string());
        self.inserted
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| OrmError::store_update("Insert returned no rows."))
    }
}

impl StreamingClient for RecordingClient {
    async fn query_stream(
        &self,
        sql: &str,
        _params: &[&(dyn ToSql + Sync)],
    ) -> OrmResult<RowStream> {
        self.executed.lock().unwrap().push(sql.to_string());
        Ok(RowStream::new(futures_util::stream::empty()))
    }
}
