//! SQL fragment builder with bound parameters.
//!
//! `Sql` stores SQL pieces and parameters separately and numbers placeholders
//! automatically. The same fragment renders in two forms:
//! - [`Sql::to_named_sql`]: `@p1, @p2, ...`, used in command descriptors and logs;
//! - [`Sql::to_sql`]: `$1, $2, ...`, what `tokio-postgres` executes.
//!
//! # Example
//!
//! ```ignore
//! use resmap::sql;
//!
//! let mut q = sql("UPDATE ");
//! q.push_ident("tags")?
//!     .push(" SET ")
//!     .push_ident("todo_item_id")?
//!     .push(" = ")
//!     .push_bind(Value::Null);
//! assert_eq!(q.to_named_sql(), r#"UPDATE "tags" SET "todo_item_id" = @p1"#);
//! # Ok::<(), resmap::OrmError>(())
//! ```

use crate::error::{OrmError, OrmResult};
use crate::value::Value;
use std::fmt::Write;
use tokio_postgres::types::ToSql;

#[derive(Debug, Clone, PartialEq)]
enum SqlPart {
    Raw(String),
    Param,
}

/// A parameter-safe SQL fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct Sql {
    parts: Vec<SqlPart>,
    params: Vec<Value>,
}

/// Start building a SQL statement.
pub fn sql(initial_sql: impl Into<String>) -> Sql {
    Sql::new(initial_sql)
}

impl Sql {
    /// Create a new builder with an initial SQL fragment.
    pub fn new(initial_sql: impl Into<String>) -> Self {
        Self {
            parts: vec![SqlPart::Raw(initial_sql.into())],
            params: Vec::new(),
        }
    }

    /// Create an empty builder.
    pub fn empty() -> Self {
        Self {
            parts: Vec::new(),
            params: Vec::new(),
        }
    }

    /// Whether nothing has been pushed yet.
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Append raw SQL (no parameters).
    pub fn push(&mut self, sql: &str) -> &mut Self {
        if sql.is_empty() {
            return self;
        }

        match self.parts.last_mut() {
            Some(SqlPart::Raw(last)) => last.push_str(sql),
            _ => self.parts.push(SqlPart::Raw(sql.to_string())),
        }
        self
    }

    /// Append a parameter placeholder and bind its value.
    pub fn push_bind(&mut self, value: impl Into<Value>) -> &mut Self {
        self.parts.push(SqlPart::Param);
        self.params.push(value.into());
        self
    }

    /// Append a comma-separated list of placeholders and bind all values.
    ///
    /// If `values` is empty, this appends `NULL` (so `IN (NULL)` is valid SQL).
    pub fn push_bind_list<T>(&mut self, values: impl IntoIterator<Item = T>) -> &mut Self
    where
        T: Into<Value>,
    {
        let mut iter = values.into_iter();
        let Some(first) = iter.next() else {
            return self.push("NULL");
        };

        self.push_bind(first);
        for v in iter {
            self.push(", ");
            self.push_bind(v);
        }
        self
    }

    /// Append another `Sql` fragment, consuming it.
    pub fn push_sql(&mut self, mut other: Sql) -> &mut Self {
        self.parts.append(&mut other.parts);
        self.params.append(&mut other.params);
        self
    }

    /// Append a double-quoted SQL identifier (table or column).
    ///
    /// Embedded `"` is escaped as `""`. Empty identifiers and NUL characters are rejected.
    pub fn push_ident(&mut self, ident: &str) -> OrmResult<&mut Self> {
        if ident.is_empty() {
            return Err(OrmError::validation("Sql::push_ident: empty identifier"));
        }
        if ident.contains('\0') {
            return Err(OrmError::validation(format!(
                "Sql::push_ident: identifier '{}' contains a NUL character",
                ident.escape_debug()
            )));
        }

        let quoted = format!("\"{}\"", ident.replace('"', "\"\""));
        Ok(self.push(&quoted))
    }

    /// Render SQL with `$1, $2, ...` placeholders.
    pub fn to_sql(&self) -> String {
        self.render("$")
    }

    /// Render SQL with `@p1, @p2, ...` placeholders.
    pub fn to_named_sql(&self) -> String {
        self.render("@p")
    }

    fn render(&self, prefix: &str) -> String {
        let mut out = String::new();
        let mut idx: usize = 0;

        for part in &self.parts {
            match part {
                SqlPart::Raw(s) => out.push_str(s),
                SqlPart::Param => {
                    idx += 1;
                    let _ = write!(&mut out, "{prefix}{idx}");
                }
            }
        }
        out
    }

    /// Bound values, in placeholder order.
    pub fn params(&self) -> &[Value] {
        &self.params
    }

    /// Bound values paired with their placeholder names (`@p1`, `@p2`, ...).
    pub fn named_params(&self) -> Vec<(String, &Value)> {
        self.params
            .iter()
            .enumerate()
            .map(|(i, v)| (format!("@p{}", i + 1), v))
            .collect()
    }

    /// Parameter refs compatible with `tokio-postgres`.
    pub fn params_ref(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
    }
}
