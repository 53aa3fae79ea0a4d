//! Saga Executor
//!
//! Shared machinery of the create/update/delete workflows. A [`Saga`] owns
//! the operation log and the compensation chain of one operation:
//!
//! ```text
//! Idle → LockAcquired → Step1 … StepN ─┬─ committed → Succeeded
//!                                       └─ failed → Rollback(k … 0) → Failed
//! ```
//!
//! Every store call goes through [`Saga::call`] (cancellable) or
//! [`Saga::settle`] (not cancellable), which annotate and classify failures.
//! Compensation failures never replace the triggering error; they are
//! appended to its rollback errors.

pub mod compensation;
pub mod log;

pub use compensation::{
    Compensation, CompensationChain, CompensationOutcome, CompensationRecord, StepId,
};
pub use log::OperationLog;

use crate::error::{IndexError, RollbackError};
use crate::lock::OperationKind;
use crate::naming::LogicalName;
use crate::store::{IndexStore, StoreResult};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Execution state of one operation
pub struct Saga<S: IndexStore> {
    store: Arc<S>,
    operation: OperationKind,
    name: LogicalName,
    ops: OperationLog,
    chain: CompensationChain,
    cancel: CancellationToken,
}

impl<S: IndexStore> Saga<S> {
    pub fn new(
        store: Arc<S>,
        operation: OperationKind,
        name: LogicalName,
        cancel: CancellationToken,
    ) -> Self {
        Saga {
            store,
            operation,
            name,
            ops: OperationLog::new(),
            chain: CompensationChain::new(),
            cancel,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn name(&self) -> &LogicalName {
        &self.name
    }

    pub fn ops(&self) -> &OperationLog {
        &self.ops
    }

    pub fn chain(&self) -> &CompensationChain {
        &self.chain
    }

    pub fn record(&mut self, step: &str, value: impl Into<Value>) {
        self.ops.record(step, value);
    }

    /// Register the undo action of a step that is about to commit
    pub fn register(&mut self, step: StepId, undo: Compensation) {
        debug!(operation = %self.operation, name = %self.name, %step, %undo, "Compensation registered");
        self.chain.push(step, undo);
    }

    /// Forget every registered compensation; later failures roll nothing back
    pub fn commit(&mut self) {
        self.chain.clear();
    }

    /// Run a store call, abandoning it if the operation is cancelled
    pub async fn call<T, F>(&self, description: &str, call: F) -> Result<T, IndexError>
    where
        F: Future<Output = StoreResult<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(IndexError::timeout(format!(
                "Cancelled while waiting on: {}",
                description
            ))),
            result = call => result.map_err(|err| IndexError::from_store(description, err)),
        }
    }

    /// Run a store call to completion regardless of cancellation
    pub async fn settle<T, F>(&self, description: &str, call: F) -> Result<T, IndexError>
    where
        F: Future<Output = StoreResult<T>>,
    {
        call.await
            .map_err(|err| IndexError::from_store(description, err))
    }

    /// [`Saga::call`], rolling back and failing the saga on error
    pub async fn step<T, F>(&mut self, description: &str, call: F) -> Result<T, IndexError>
    where
        F: Future<Output = StoreResult<T>>,
    {
        match self.call(description, call).await {
            Ok(value) => Ok(value),
            Err(err) => Err(self.abort(err).await),
        }
    }

    /// Roll back every committed step and attach the operation log to `err`
    pub async fn abort(&mut self, mut err: IndexError) -> IndexError {
        self.rollback(&mut err).await;
        err.with_ops(self.ops.clone())
    }

    /// Run the compensation chain last-committed-first
    pub async fn rollback(&mut self, err: &mut IndexError) {
        let records = self.chain.drain_lifo();
        if records.is_empty() {
            return;
        }
        warn!(
            operation = %self.operation,
            name = %self.name,
            cause = %err,
            steps = records.len(),
            "Rolling back after error"
        );

        for CompensationRecord { step, undo } in records {
            warn!(operation = %self.operation, %step, action = %undo, "Rollback");
            match undo.apply(self.store.as_ref(), err).await {
                Ok(CompensationOutcome::Applied) => {
                    info!(%step, action = %undo, "Rollback done");
                }
                Ok(CompensationOutcome::AlreadyAbsent) => {
                    debug!(%step, action = %undo, "Nothing to roll back, already absent");
                }
                Ok(CompensationOutcome::FellBack) => {
                    info!(%step, action = %undo, "Rollback done by re-adding the source binding");
                }
                Ok(CompensationOutcome::Refused) => {
                    warn!(
                        %step,
                        action = %undo,
                        "Rollback refused, the index existed before this operation"
                    );
                }
                Err(source) => {
                    warn!(%step, action = %undo, error = %source, "Rollback failed");
                    err.push_rollback_error(RollbackError {
                        step,
                        action: undo.to_string(),
                        source,
                    });
                }
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Final operation log of a successful saga
    pub fn finish(self) -> OperationLog {
        self.ops
    }
}
