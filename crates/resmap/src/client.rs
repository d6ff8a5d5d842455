//! Client trait unifying connections and transactions.

use crate::error::{OrmError, OrmResult};
use crate::value::{Id, IdKind, Value};
use futures_util::{Stream, TryStreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio_postgres::Row;
use tokio_postgres::types::ToSql;

/// A trait that unifies database clients and transactions.
///
/// Write operations expect to be handed a transaction so that every command of one
/// logical write commits or rolls back together. Reads accept either.
pub trait StoreClient: Send + Sync {
    /// Execute a query and return all rows.
    fn query(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> impl std::future::Future<Output = OrmResult<Vec<Row>>> + Send;

    /// Execute a statement and return the number of affected rows.
    fn execute(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> impl std::future::Future<Output = OrmResult<u64>> + Send;

    /// Execute an `INSERT ... RETURNING id` and decode the returned id.
    ///
    /// Semantics:
    /// - 0 rows or a `NULL` id: returns [`OrmError::StoreUpdate`]
    /// - otherwise: the first column of the first row, as an id of `kind`
    fn query_id(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
        kind: IdKind,
    ) -> impl std::future::Future<Output = OrmResult<Id>> + Send {
        async move {
            let rows = self.query(sql, params).await?;
            let row = rows
                .first()
                .ok_or_else(|| OrmError::store_update("Insert returned no rows."))?;
            let value = Value::from_row(row, 0)?;
            Id::from_value(&value, kind)?
                .ok_or_else(|| OrmError::store_update("Insert returned a NULL id."))
        }
    }

    /// Return a cancellation token for the underlying connection, if supported.
    fn cancel_token(&self) -> Option<tokio_postgres::CancelToken> {
        None
    }
}

impl StoreClient for tokio_postgres::Client {
    async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<Vec<Row>> {
        tokio_postgres::Client::query(self, sql, params)
            .await
            .map_err(OrmError::from_db_error)
    }

    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<u64> {
        tokio_postgres::Client::execute(self, sql, params)
            .await
            .map_err(OrmError::from_db_error)
    }

    fn cancel_token(&self) -> Option<tokio_postgres::CancelToken> {
        Some(tokio_postgres::Client::cancel_token(self))
    }
}

impl StoreClient for tokio_postgres::Transaction<'_> {
    async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<Vec<Row>> {
        tokio_postgres::Transaction::query(self, sql, params)
            .await
            .map_err(OrmError::from_db_error)
    }

    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<u64> {
        tokio_postgres::Transaction::execute(self, sql, params)
            .await
            .map_err(OrmError::from_db_error)
    }

    fn cancel_token(&self) -> Option<tokio_postgres::CancelToken> {
        Some(tokio_postgres::Transaction::cancel_token(self))
    }
}

/// A stream of database rows.
///
/// Type-erased so that every [`StreamingClient`] returns the same stream type.
#[must_use]
pub struct RowStream {
    inner: Pin<Box<dyn Stream<Item = OrmResult<Row>> + Send>>,
}

impl RowStream {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = OrmResult<Row>> + Send + 'static,
    {
        Self {
            inner: Box::pin(stream),
        }
    }
}

impl Stream for RowStream {
    type Item = OrmResult<Row>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

/// Clients that can hand rows over one at a time instead of buffering the whole result.
///
/// Once a stream is returned, the rows still in flight cannot be cancelled; the
/// cancel signal is only observed between rows.
pub trait StreamingClient: StoreClient {
    fn query_stream(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> impl std::future::Future<Output = OrmResult<RowStream>> + Send;
}

impl StreamingClient for tokio_postgres::Client {
    async fn query_stream(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> OrmResult<RowStream> {
        let stream = tokio_postgres::Client::query_raw(self, sql, params.iter().copied())
            .await
            .map_err(OrmError::from_db_error)?;
        Ok(RowStream::new(stream.map_err(OrmError::from_db_error)))
    }
}

impl StreamingClient for tokio_postgres::Transaction<'_> {
    async fn query_stream(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> OrmResult<RowStream> {
        let stream = tokio_postgres::Transaction::query_raw(self, sql, params.iter().copied())
            .await
            .map_err(OrmError::from_db_error)?;
        Ok(RowStream::new(stream.map_err(OrmError::from_db_error)))
    }
}
