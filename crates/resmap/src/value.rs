//! Scalar values, primary keys and resource identities.

use crate::error::{OrmError, OrmResult};
use bytes::BytesMut;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use std::error::Error;
use std::fmt;
use tokio_postgres::Row;
use tokio_postgres::types::{FromSqlOwned, IsNull, ToSql, Type, to_sql_checked};
use uuid::Uuid;

/// A column value as captured from a resource or decoded from a result row.
///
/// `Null` is an ordinary, comparable value: two nulls are equal. Doubles compare by
/// [`f64::total_cmp`], so a NaN equals itself.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i32),
    BigInt(i64),
    Double(f64),
    Text(String),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
    Json(serde_json::Value),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::BigInt(a), Self::BigInt(b)) => a == b,
            (Self::Double(a), Self::Double(b)) => a.total_cmp(b).is_eq(),
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Uuid(a), Self::Uuid(b)) => a == b,
            (Self::Timestamp(a), Self::Timestamp(b)) => a == b,
            (Self::Json(a), Self::Json(b)) => a == b,
            _ => false,
        }
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Decode column `idx` of a driver row based on the column's Postgres type.
    pub fn from_row(row: &Row, idx: usize) -> OrmResult<Self> {
        let column = row
            .columns()
            .get(idx)
            .ok_or_else(|| OrmError::decode(format!("#{idx}"), "column index out of range"))?;
        let name = column.name();
        let ty = column.type_();

        let value = if *ty == Type::BOOL {
            get::<bool>(row, idx, name)?.map(Self::Bool)
        } else if *ty == Type::INT2 {
            get::<i16>(row, idx, name)?.map(|v| Self::Int(i32::from(v)))
        } else if *ty == Type::INT4 {
            get::<i32>(row, idx, name)?.map(Self::Int)
        } else if *ty == Type::INT8 {
            get::<i64>(row, idx, name)?.map(Self::BigInt)
        } else if *ty == Type::FLOAT4 {
            get::<f32>(row, idx, name)?.map(|v| Self::Double(f64::from(v)))
        } else if *ty == Type::FLOAT8 {
            get::<f64>(row, idx, name)?.map(Self::Double)
        } else if *ty == Type::TEXT
            || *ty == Type::VARCHAR
            || *ty == Type::BPCHAR
            || *ty == Type::NAME
        {
            get::<String>(row, idx, name)?.map(Self::Text)
        } else if *ty == Type::UUID {
            get::<Uuid>(row, idx, name)?.map(Self::Uuid)
        } else if *ty == Type::TIMESTAMPTZ {
            get::<DateTime<Utc>>(row, idx, name)?.map(Self::Timestamp)
        } else if *ty == Type::TIMESTAMP {
            get::<NaiveDateTime>(row, idx, name)?.map(|v| Self::Timestamp(v.and_utc()))
        } else if *ty == Type::JSON || *ty == Type::JSONB {
            get::<serde_json::Value>(row, idx, name)?.map(Self::Json)
        } else {
            return Err(OrmError::decode(
                name,
                format!("unsupported column type '{ty}'"),
            ));
        };

        Ok(value.unwrap_or(Self::Null))
    }
}

fn get<T: FromSqlOwned>(row: &Row, idx: usize, name: &str) -> OrmResult<Option<T>> {
    row.try_get::<_, Option<T>>(idx)
        .map_err(|e| OrmError::decode(name, e.to_string()))
}

fn encode<T: ToSql>(
    value: &T,
    ty: &Type,
    out: &mut BytesMut,
) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
    if !T::accepts(ty) {
        return Err(format!(
            "cannot bind a {} value to a parameter of type '{}'",
            std::any::type_name::<T>(),
            ty
        )
        .into());
    }
    value.to_sql(ty, out)
}

impl ToSql for Value {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self {
            Self::Null => Ok(IsNull::Yes),
            Self::Bool(v) => encode(v, ty, out),
            Self::Int(v) => {
                if *ty == Type::INT8 {
                    encode(&i64::from(*v), ty, out)
                } else if *ty == Type::INT2 {
                    encode(&i16::try_from(*v)?, ty, out)
                } else {
                    encode(v, ty, out)
                }
            }
            Self::BigInt(v) => {
                if *ty == Type::INT4 {
                    encode(&i32::try_from(*v)?, ty, out)
                } else if *ty == Type::INT2 {
                    encode(&i16::try_from(*v)?, ty, out)
                } else {
                    encode(v, ty, out)
                }
            }
            Self::Double(v) => encode(v, ty, out),
            Self::Text(v) => encode(v, ty, out),
            Self::Uuid(v) => encode(v, ty, out),
            Self::Timestamp(v) => {
                if *ty == Type::TIMESTAMP {
                    encode(&v.naive_utc(), ty, out)
                } else {
                    encode(v, ty, out)
                }
            }
            Self::Json(v) => encode(v, ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::BigInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Self::Uuid(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

impl From<Id> for Value {
    fn from(id: Id) -> Self {
        match id {
            Id::Int(v) => Self::BigInt(v),
            Id::Text(v) => Self::Text(v),
            Id::Uuid(v) => Self::Uuid(v),
        }
    }
}

/// The scalar kind of a resource type's primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdKind {
    Int,
    Text,
    Uuid,
}

impl IdKind {
    /// The zero value of this kind, which marks an absent outer-joined row.
    pub fn default_id(self) -> Id {
        match self {
            Self::Int => Id::Int(0),
            Self::Text => Id::Text(String::new()),
            Self::Uuid => Id::Uuid(Uuid::nil()),
        }
    }
}

/// A primary key value. Composite keys are not supported.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(untagged)]
pub enum Id {
    Int(i64),
    Text(String),
    Uuid(Uuid),
}

impl Id {
    pub fn kind(&self) -> IdKind {
        match self {
            Self::Int(_) => IdKind::Int,
            Self::Text(_) => IdKind::Text,
            Self::Uuid(_) => IdKind::Uuid,
        }
    }

    /// Whether this id holds the zero/default value of its kind.
    pub fn is_default(&self) -> bool {
        *self == self.kind().default_id()
    }

    /// Convert a column value into an id of the given kind. `Null` yields `None`.
    pub fn from_value(value: &Value, kind: IdKind) -> OrmResult<Option<Self>> {
        let id = match (kind, value) {
            (_, Value::Null) => return Ok(None),
            (IdKind::Int, Value::Int(v)) => Self::Int(i64::from(*v)),
            (IdKind::Int, Value::BigInt(v)) => Self::Int(*v),
            (IdKind::Text, Value::Text(v)) => Self::Text(v.clone()),
            (IdKind::Uuid, Value::Uuid(v)) => Self::Uuid(*v),
            (kind, other) => {
                return Err(OrmError::validation(format!(
                    "value {other:?} cannot be used as an id of kind {kind:?}"
                )));
            }
        };
        Ok(Some(id))
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
            Self::Uuid(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for Id {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Id {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<&str> for Id {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Id {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Uuid> for Id {
    fn from(v: Uuid) -> Self {
        Self::Uuid(v)
    }
}

/// Either a server-assigned id or a client-side correlation id for a resource that
/// does not exist in the store yet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKey {
    Server(Id),
    Local(String),
}

/// Identity of a related resource: its type plus its key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ResourceIdentity {
    pub type_name: String,
    pub key: IdentityKey,
}

impl ResourceIdentity {
    pub fn server(type_name: impl Into<String>, id: impl Into<Id>) -> Self {
        Self {
            type_name: type_name.into(),
            key: IdentityKey::Server(id.into()),
        }
    }

    pub fn local(type_name: impl Into<String>, local_id: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            key: IdentityKey::Local(local_id.into()),
        }
    }

    pub fn server_id(&self) -> Option<&Id> {
        match &self.key {
            IdentityKey::Server(id) => Some(id),
            IdentityKey::Local(_) => None,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self.key, IdentityKey::Local(_))
    }

    /// The server id, or a validation error for a resource that only has a local id.
    pub fn require_server_id(&self) -> OrmResult<&Id> {
        match &self.key {
            IdentityKey::Server(id) => Ok(id),
            IdentityKey::Local(lid) => Err(OrmError::validation(format!(
                "related resource '{}' with local id '{}' has not been assigned a server id",
                self.type_name, lid
            ))),
        }
    }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            IdentityKey::Server(id) => write!(f, "{}:{}", self.type_name, id),
            IdentityKey::Local(lid) => write!(f, "{}:lid={}", self.type_name, lid),
        }
    }
}
