//! # resmap
//!
//! Resource-to-relational write sequencing and join-row graph mapping for Postgres.
//!
//! ## Features
//!
//! - **Change detection**: snapshot a resource before and after a request and get the
//!   changed columns and relationship memberships
//! - **Ordered writes**: pre-steps, main step and post-steps keep unique and required
//!   foreign keys valid at every statement boundary
//! - **Row-count policies**: every command declares how many rows it must touch; a
//!   mismatch fails the write so the transaction rolls back
//! - **Batched to-many updates**: one `UPDATE ... WHERE id IN (...)` per relationship
//!   instead of one statement per related row
//! - **Graph mapping**: rows of a joined read collapse into one canonical instance per
//!   `(type, id)`, with to-many children accumulated across fanned-out rows
//!
//! ## Example
//!
//! ```ignore
//! use resmap::{ForeignKey, IdKind, InMemoryDataModel, Resource, ResourceIdentity,
//!     ResourceRepository, ResourceType};
//!
//! let model = InMemoryDataModel::new()
//!     .with_type(
//!         ResourceType::new("todoItems", "todo_items", IdKind::Int)
//!             .attribute("description", "description")
//!             .to_many("tags", "tags"),
//!     )
//!     .with_type(ResourceType::new("tags", "tags", IdKind::Int).attribute("name", "name"))
//!     .with_foreign_key("todoItems", "tags", ForeignKey::right("todo_item_id", true))
//!     .build()?;
//! let repo = ResourceRepository::new(model);
//!
//! let id = repo
//!     .create_in_transaction(
//!         &mut client,
//!         &Resource::new("todoItems")
//!             .with_attribute("description", "Ship it")
//!             .with_to_many("tags", [ResourceIdentity::server("tags", 10_i64)]),
//!     )
//!     .await?;
//! ```

pub mod client;
pub mod command;
pub mod config;
pub mod error;
pub mod executor;
pub mod include;
pub mod mapper;
pub mod model;
pub mod repository;
pub mod resource;
pub mod sequencer;
pub mod sql;
pub mod tracker;
pub mod transaction;
pub mod value;

#[cfg(test)]
mod test_support;

pub use client::{RowStream, StoreClient, StreamingClient};
pub use command::{RowCountPolicy, SqlCommand, StepKind};
pub use config::ExecutorConfig;
pub use error::{OrmError, OrmResult};
pub use executor::{CancelHandle, CancelSignal, CommandExecutor, cancel_signal};
pub use include::{IncludeNode, IncludeTree};
pub use mapper::{
    Link, NodeId, PositionDescriptor, ResourceGraph, ResourceNode, ResultGraphMapper, RowLayout,
};
pub use model::{
    Attribute, ColumnMapping, ColumnSource, DataModel, ForeignKey, ForeignKeySide,
    InMemoryDataModel, Relationship, RelationshipKind, ResourceType,
};
pub use repository::ResourceRepository;
pub use resource::{RelationshipData, Resource};
pub use sequencer::{CommandSequencer, CreatePlan, DeferredSteps, WritePlan};
pub use sql::{Sql, sql};
pub use tracker::{ChangeTracker, ColumnSnapshot, RelationshipSnapshot, ToManyChange, ToOneChange};
pub use value::{Id, IdKind, IdentityKey, ResourceIdentity, Value};

#[doc(hidden)]
pub use tracing as __tracing;
