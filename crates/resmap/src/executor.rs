//! Execution of planned commands against one connection or transaction.
//!
//! The executor runs commands strictly in emission order, checks every affected-row
//! count against the command's [`RowCountPolicy`](crate::RowCountPolicy) and stops at
//! the first failure. It never commits or rolls back itself: the caller owns the
//! transaction (see [`transaction!`](crate::transaction)), and any error returned here
//! must roll it back.
//!
//! Cancellation is cooperative. A [`CancelSignal`] is observed while a command is
//! awaiting the driver; when it fires the server-side query is cancelled best-effort.
//! A command whose result already arrived is not interrupted.

use crate::client::StoreClient;
use crate::command::SqlCommand;
use crate::config::ExecutorConfig;
use crate::error::{OrmError, OrmResult};
use crate::sequencer::{CreatePlan, WritePlan};
use crate::value::Id;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;

/// Create a linked cancellation handle and signal.
pub fn cancel_signal() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

/// Fires a [`CancelSignal`].
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Cooperative cancellation observed at driver await points.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancelled. Never resolves if the handle is dropped uncancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Runs [`SqlCommand`]s and verifies their row-count policies.
#[derive(Debug, Clone, Default)]
pub struct CommandExecutor {
    config: ExecutorConfig,
    cancel: Option<CancelSignal>,
}

impl CommandExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_cancel_signal(mut self, signal: CancelSignal) -> Self {
        self.cancel = Some(signal);
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run every command of `plan` in order.
    pub async fn run_plan(&self, client: &impl StoreClient, plan: &WritePlan) -> OrmResult<()> {
        for command in plan.commands() {
            self.run_command(client, command).await?;
        }
        Ok(())
    }

    /// Run a create: pre-steps, the insert, then the post-steps resolved against the new id.
    pub async fn run_create(&self, client: &impl StoreClient, plan: &CreatePlan) -> OrmResult<Id> {
        for command in &plan.pre_steps {
            self.run_command(client, command).await?;
        }

        let sql = plan.insert.sql().to_sql();
        let params = plan.insert.sql().params_ref();
        self.log_command(&plan.insert, None);
        let id = self
            .guarded(client, client.query_id(&sql, &params, plan.id_kind))
            .await
            .map_err(|e| self.failed(&plan.insert, e))?;
        tracing::debug!(target: "resmap.sql", step = %plan.insert.step(), %id, "inserted");

        for command in plan.deferred.resolve(&id)? {
            self.run_command(client, &command).await?;
        }
        Ok(id)
    }

    /// Run one command and verify its affected-row count.
    pub async fn run_command(&self, client: &impl StoreClient, command: &SqlCommand) -> OrmResult<u64> {
        let sql = command.sql().to_sql();
        let params = command.sql().params_ref();

        let affected = self
            .guarded(client, client.execute(&sql, &params))
            .await
            .map_err(|e| self.failed(command, e))?;
        self.log_command(command, Some(affected));

        if let Err(err) = command.verify(affected) {
            tracing::warn!(
                target: "resmap.sql",
                step = %command.step(),
                expected = ?command.expected_rows(),
                affected,
                sql = %self.config.truncate(&command.statement_text()),
                "row count mismatch"
            );
            return Err(err);
        }
        Ok(affected)
    }

    fn log_command(&self, command: &SqlCommand, affected: Option<u64>) {
        if !self.config.log_statements {
            return;
        }
        let statement = command.statement_text();
        tracing::debug!(
            target: "resmap.sql",
            step = %command.step(),
            expected = ?command.expected_rows(),
            param_count = command.sql().params().len(),
            affected = ?affected,
            sql = %self.config.truncate(&statement),
        );
    }

    fn failed(&self, command: &SqlCommand, err: OrmError) -> OrmError {
        let err = err.into_store_failure();
        tracing::error!(
            target: "resmap.sql",
            step = %command.step(),
            sql = %self.config.truncate(&command.statement_text()),
            error = %err,
            "command failed"
        );
        err
    }

    /// Fail with [`OrmError::Cancelled`] once the cancel signal has fired.
    pub(crate) fn check_cancelled(&self) -> OrmResult<()> {
        if self.cancel.as_ref().is_some_and(CancelSignal::is_cancelled) {
            return Err(OrmError::Cancelled);
        }
        Ok(())
    }

    /// Await a driver future, racing it against the timeout and the cancel signal.
    pub(crate) async fn guarded<T, F>(&self, client: &impl StoreClient, future: F) -> OrmResult<T>
    where
        F: Future<Output = OrmResult<T>>,
    {
        self.check_cancelled()?;

        let expired = async {
            match self.config.query_timeout {
                Some(timeout) => {
                    tokio::time::sleep(timeout).await;
                    timeout
                }
                None => std::future::pending::<Duration>().await,
            }
        };
        let cancelled = async {
            match &self.cancel {
                Some(signal) => signal.cancelled().await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::pin!(future);
        tokio::select! {
            result = &mut future => result,
            timeout = expired => {
                cancel_server_query(client);
                Err(OrmError::Timeout(timeout))
            }
            () = cancelled => {
                cancel_server_query(client);
                Err(OrmError::Cancelled)
            }
        }
    }
}

fn cancel_server_query(client: &impl StoreClient) {
    if let Some(cancel_token) = client.cancel_token() {
        tokio::spawn(async move {
            let _ = cancel_token.cancel_query(tokio_postgres::NoTls).await;
        });
    }
}
