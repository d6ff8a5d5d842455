//! SQL command descriptors and the row-count policy each step is verified against.

use crate::error::{OrmError, OrmResult};
use crate::sql::{Sql, sql};
use crate::value::{Id, Value};
use std::fmt;

/// The role a command plays within one logical write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKind {
    /// Pre-step: null the one-to-one foreign key of the row that would otherwise be doubly linked.
    ClearOneToOne,
    /// Pre-step: delete that row instead, because its foreign key is required.
    DeleteOneToOne,
    /// Main step of a create.
    Insert,
    /// Main step of an update.
    Update,
    /// Main step of a delete.
    Delete,
    /// Post-step: point (or unpoint) a right-side to-one foreign key at the written resource.
    SetToOne,
    /// Post-step: point the foreign key of a batch of related rows at the written resource.
    AttachToMany,
    /// Post-step: null the foreign key of (or delete) a batch of related rows.
    DetachToMany,
}

impl StepKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClearOneToOne => "clear_one_to_one",
            Self::DeleteOneToOne => "delete_one_to_one",
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::SetToOne => "set_to_one",
            Self::AttachToMany => "attach_to_many",
            Self::DetachToMany => "detach_to_many",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How many affected rows a command must report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowCountPolicy {
    /// No check.
    Any,
    AtMostOne,
    ExactlyOne,
    AtLeastOne,
    Exactly(u64),
}

impl RowCountPolicy {
    pub fn allows(self, affected: u64) -> bool {
        match self {
            Self::Any => true,
            Self::AtMostOne => affected <= 1,
            Self::ExactlyOne => affected == 1,
            Self::AtLeastOne => affected >= 1,
            Self::Exactly(n) => affected == n,
        }
    }
}

/// A parameterized mutation statement plus the row count it must affect.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlCommand {
    sql: Sql,
    step: StepKind,
    expected: RowCountPolicy,
}

impl SqlCommand {
    fn new(sql: Sql, step: StepKind) -> Self {
        let expected = match step {
            StepKind::ClearOneToOne => RowCountPolicy::AtMostOne,
            StepKind::DeleteOneToOne => RowCountPolicy::Any,
            StepKind::Insert | StepKind::Update | StepKind::Delete => RowCountPolicy::ExactlyOne,
            StepKind::SetToOne => RowCountPolicy::AtLeastOne,
            // Batched steps carry their id count; see `with_expected`.
            StepKind::AttachToMany | StepKind::DetachToMany => RowCountPolicy::Any,
        };
        Self {
            sql,
            step,
            expected,
        }
    }

    fn with_expected(mut self, expected: RowCountPolicy) -> Self {
        self.expected = expected;
        self
    }

    pub fn step(&self) -> StepKind {
        self.step
    }

    pub fn expected_rows(&self) -> RowCountPolicy {
        self.expected
    }

    /// Statement text with named `@pN` placeholders.
    pub fn statement_text(&self) -> String {
        self.sql.to_named_sql()
    }

    /// Parameters paired with their placeholder names.
    pub fn parameters(&self) -> Vec<(String, &Value)> {
        self.sql.named_params()
    }

    pub fn sql(&self) -> &Sql {
        &self.sql
    }

    /// Check an affected-row count against this command's policy.
    pub fn verify(&self, affected: u64) -> OrmResult<()> {
        if self.expected.allows(affected) {
            return Ok(());
        }
        let reason = match self.step {
            StepKind::ClearOneToOne => "Multiple rows found.",
            // Never reached: the policy is `Any`.
            StepKind::DeleteOneToOne => "Unexpected number of rows deleted.",
            StepKind::Insert | StepKind::Update | StepKind::Delete => {
                "Row does not exist or multiple rows found."
            }
            StepKind::SetToOne => "Row does not exist.",
            StepKind::AttachToMany | StepKind::DetachToMany => {
                "Row does not exist or multiple rows found."
            }
        };
        Err(OrmError::store_update(format!(
            "{reason} ({} expected {:?}, affected {affected})",
            self.step, self.expected
        )))
    }
}

/// `INSERT INTO table (c1, c2, ...) VALUES (@p1, @p2, ...) RETURNING id_column`
///
/// With no columns, inserts a row of defaults.
pub fn insert_returning_id(
    table: &str,
    columns: &[(String, Value)],
    id_column: &str,
) -> OrmResult<SqlCommand> {
    let mut q = sql("INSERT INTO ");
    q.push_ident(table)?;
    if columns.is_empty() {
        q.push(" DEFAULT VALUES");
    } else {
        q.push(" (");
        for (i, (column, _)) in columns.iter().enumerate() {
            if i > 0 {
                q.push(", ");
            }
            q.push_ident(column)?;
        }
        q.push(") VALUES (");
        q.push_bind_list(columns.iter().map(|(_, v)| v.clone()));
        q.push(")");
    }
    q.push(" RETURNING ");
    q.push_ident(id_column)?;
    Ok(SqlCommand::new(q, StepKind::Insert))
}

fn push_set_list(q: &mut Sql, assignments: &[(String, Value)]) -> OrmResult<()> {
    if assignments.is_empty() {
        return Err(OrmError::validation("UPDATE requires at least one SET column"));
    }
    q.push(" SET ");
    for (i, (column, value)) in assignments.iter().enumerate() {
        if i > 0 {
            q.push(", ");
        }
        q.push_ident(column)?;
        q.push(" = ");
        q.push_bind(value.clone());
    }
    Ok(())
}

/// `UPDATE table SET c1 = @p1, ... WHERE id_column = @pN`
pub fn update_by_id(
    table: &str,
    assignments: &[(String, Value)],
    id_column: &str,
    id: &Id,
) -> OrmResult<SqlCommand> {
    let mut q = sql("UPDATE ");
    q.push_ident(table)?;
    push_set_list(&mut q, assignments)?;
    q.push(" WHERE ");
    q.push_ident(id_column)?;
    q.push(" = ");
    q.push_bind(id.clone());
    Ok(SqlCommand::new(q, StepKind::Update))
}

/// `UPDATE table SET column = @p1 WHERE id_column = @p2`, for a right-side to-one key.
pub fn set_foreign_key_by_id(
    table: &str,
    column: &str,
    value: Value,
    id_column: &str,
    id: &Id,
) -> OrmResult<SqlCommand> {
    let mut q = sql("UPDATE ");
    q.push_ident(table)?;
    push_set_list(&mut q, &[(column.to_string(), value)])?;
    q.push(" WHERE ");
    q.push_ident(id_column)?;
    q.push(" = ");
    q.push_bind(id.clone());
    Ok(SqlCommand::new(q, StepKind::SetToOne))
}

/// `UPDATE table SET column = @p1 WHERE where_column = @p2`, clearing a one-to-one link.
pub fn clear_one_to_one(
    table: &str,
    column: &str,
    where_column: &str,
    where_value: Value,
) -> OrmResult<SqlCommand> {
    let mut q = sql("UPDATE ");
    q.push_ident(table)?;
    push_set_list(&mut q, &[(column.to_string(), Value::Null)])?;
    q.push(" WHERE ");
    q.push_ident(where_column)?;
    q.push(" = ");
    q.push_bind(where_value);
    Ok(SqlCommand::new(q, StepKind::ClearOneToOne))
}

/// `DELETE FROM table WHERE where_column = @p1`, removing a one-to-one dependent.
pub fn delete_one_to_one(
    table: &str,
    where_column: &str,
    where_value: Value,
) -> OrmResult<SqlCommand> {
    let mut q = sql("DELETE FROM ");
    q.push_ident(table)?;
    q.push(" WHERE ");
    q.push_ident(where_column)?;
    q.push(" = ");
    q.push_bind(where_value);
    Ok(SqlCommand::new(q, StepKind::DeleteOneToOne))
}

/// `DELETE FROM table WHERE id_column = @p1`
pub fn delete_by_id(table: &str, id_column: &str, id: &Id) -> OrmResult<SqlCommand> {
    let mut q = sql("DELETE FROM ");
    q.push_ident(table)?;
    q.push(" WHERE ");
    q.push_ident(id_column)?;
    q.push(" = ");
    q.push_bind(id.clone());
    Ok(SqlCommand::new(q, StepKind::Delete))
}

fn require_ids(ids: &[Id], step: StepKind) -> OrmResult<u64> {
    if ids.is_empty() {
        return Err(OrmError::validation(format!(
            "{step} requires at least one related id"
        )));
    }
    Ok(ids.len() as u64)
}

/// `UPDATE table SET column = @p1 WHERE id_column IN (@p2, ...)`, attaching related rows.
pub fn attach_to_many(
    table: &str,
    column: &str,
    owner_id: &Id,
    id_column: &str,
    ids: &[Id],
) -> OrmResult<SqlCommand> {
    let count = require_ids(ids, StepKind::AttachToMany)?;
    let mut q = sql("UPDATE ");
    q.push_ident(table)?;
    push_set_list(&mut q, &[(column.to_string(), owner_id.clone().into())])?;
    push_where_in(&mut q, id_column, ids)?;
    Ok(SqlCommand::new(q, StepKind::AttachToMany).with_expected(RowCountPolicy::Exactly(count)))
}

/// Detach related rows: `UPDATE table SET column = NULL WHERE id_column IN (...)` when the
/// key is nullable, else `DELETE FROM table WHERE id_column IN (...)`.
pub fn detach_from_many(
    table: &str,
    column: &str,
    is_nullable: bool,
    id_column: &str,
    ids: &[Id],
) -> OrmResult<SqlCommand> {
    let count = require_ids(ids, StepKind::DetachToMany)?;
    let mut q = if is_nullable {
        let mut q = sql("UPDATE ");
        q.push_ident(table)?;
        push_set_list(&mut q, &[(column.to_string(), Value::Null)])?;
        q
    } else {
        let mut q = sql("DELETE FROM ");
        q.push_ident(table)?;
        q
    };
    push_where_in(&mut q, id_column, ids)?;
    Ok(SqlCommand::new(q, StepKind::DetachToMany).with_expected(RowCountPolicy::Exactly(count)))
}

fn push_where_in(q: &mut Sql, id_column: &str, ids: &[Id]) -> OrmResult<()> {
    q.push(" WHERE ");
    q.push_ident(id_column)?;
    q.push(" IN (");
    q.push_bind_list(ids.iter().cloned());
    q.push(")");
    Ok(())
}
