//! Transaction helper macro.
//!
//! Every command of one logical write must run inside one transaction. Repository
//! methods accept any [`StoreClient`](crate::StoreClient) so they compose with a
//! caller-owned transaction; [`transaction!`] covers the common case of opening one
//! around a single write.
//!
//! # Example
//!
//! ```ignore
//! use resmap::OrmResult;
//!
//! # async fn demo(client: &mut tokio_postgres::Client, repo: &resmap::ResourceRepository<resmap::InMemoryDataModel>) -> OrmResult<()> {
//! resmap::transaction!(client, tx, {
//!     repo.delete(&tx, "people", &1_i64.into()).await?;
//!     Ok::<(), resmap::OrmError>(())
//! })?;
//! # Ok(()) }
//! ```

/// Runs the given block inside a database transaction.
///
/// - Begins a transaction via `$client.transaction().await`.
/// - Commits on `Ok(_)`.
/// - Rolls back on `Err(_)`.
///
/// The block must evaluate to `resmap::OrmResult<T>`.
#[macro_export]
macro_rules! transaction {
    ($client:expr, $tx:ident, $body:block) => {{
        let $tx = ($client)
            .transaction()
            .await
            .map_err($crate::OrmError::from_db_error)?;

        let __resmap_tx_body_result = async { $body }.await;
        match __resmap_tx_body_result {
            Ok(value) => {
                $tx.commit()
                    .await
                    .map_err($crate::OrmError::from_store_error)?;
                Ok(value)
            }
            Err(error) => match $tx.rollback().await {
                Ok(()) => {
                    $crate::__tracing::debug!(target: "resmap.sql", error = %error, "transaction rolled back");
                    Err(error)
                }
                Err(rollback_err) => Err($crate::OrmError::store_update(format!(
                    "{error} (rollback failed: {rollback_err})"
                ))),
            },
        }
    }};
}
