//! Orchestration facade.
//!
//! [`IndexManager`] composes the naming policy, the operation lock and the
//! saga executor into the three public operations:
//!
//! - `create(name, {template?})` → `{name, index, ops}`
//! - `update(name, {template?, reindexer?})` → `{name, source_index, index, ops}`
//! - `delete(name)` → `{name, index, ops}`
//!
//! Input is validated before the lock is taken; every exit path yields a
//! classified [`IndexError`].

mod create;
mod delete;
mod update;

use crate::clock::{Clock, ProductionClock};
use crate::config::{ManagerConfig, OperationTimeouts, TimeoutPolicy};
use crate::error::IndexError;
use crate::lock::{LeaseStore, MemoryLeaseStore, OperationKind, OperationLock};
use crate::naming::{physical_name, LogicalName};
use crate::saga::OperationLog;
use crate::store::{IndexStore, ReindexReport, StoreFuture};
use crate::template::Template;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

/// Caller-supplied data migration used by `update` instead of a plain copy
///
/// Receives the store, the current physical index and the new one.
pub trait Reindexer<S: IndexStore>: Send + Sync + 'static {
    fn reindex<'a>(
        &'a self,
        store: &'a S,
        source: &'a str,
        dest: &'a str,
    ) -> StoreFuture<'a, ReindexReport>;
}

#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub template: Option<Value>,
}

impl CreateOptions {
    pub fn with_template(template: Value) -> Self {
        CreateOptions {
            template: Some(template),
        }
    }
}

pub struct UpdateOptions<S: IndexStore> {
    pub template: Option<Value>,
    pub reindexer: Option<Arc<dyn Reindexer<S>>>,
}

impl<S: IndexStore> Default for UpdateOptions<S> {
    fn default() -> Self {
        UpdateOptions {
            template: None,
            reindexer: None,
        }
    }
}

impl<S: IndexStore> UpdateOptions<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn template(mut self, template: Value) -> Self {
        self.template = Some(template);
        self
    }

    pub fn reindexer(mut self, reindexer: impl Reindexer<S>) -> Self {
        self.reindexer = Some(Arc::new(reindexer));
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateOutcome {
    pub name: LogicalName,
    pub index: String,
    pub ops: OperationLog,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateOutcome {
    pub name: LogicalName,
    pub source_index: String,
    pub index: String,
    pub ops: OperationLog,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteOutcome {
    pub name: LogicalName,
    pub index: String,
    pub ops: OperationLog,
}

pub struct IndexManagerBuilder<S: IndexStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    config: ManagerConfig,
}

impl<S: IndexStore> IndexManagerBuilder<S> {
    pub fn clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn timeouts(mut self, timeouts: OperationTimeouts) -> Self {
        self.config.timeouts = timeouts;
        self
    }

    pub fn timeout_policy(mut self, policy: TimeoutPolicy) -> Self {
        self.config.timeout_policy = policy;
        self
    }

    /// Build with the process-local lease store
    pub fn build(self) -> IndexManager<S, MemoryLeaseStore> {
        let lease_store = MemoryLeaseStore::new(self.clock.clone());
        warn!(
            store = lease_store.name(),
            "Will use default in-memory store to keep the state, \
             you should probably override it for a production micro-service"
        );
        self.assemble(Arc::new(lease_store))
    }

    /// Build with a caller-provided lease store, shared between instances
    pub fn build_with_lease_store<L: LeaseStore>(self, lease_store: Arc<L>) -> IndexManager<S, L> {
        info!(
            store = lease_store.name(),
            "Will use provided store to keep the state"
        );
        self.assemble(lease_store)
    }

    fn assemble<L: LeaseStore>(self, lease_store: Arc<L>) -> IndexManager<S, L> {
        IndexManager {
            store: self.store,
            lock: OperationLock::new(
                lease_store,
                self.clock.clone(),
                self.config.timeouts,
                self.config.timeout_policy,
            ),
            clock: self.clock,
        }
    }
}

/// Lifecycle manager of logical indices
pub struct IndexManager<S: IndexStore, L: LeaseStore = MemoryLeaseStore> {
    store: Arc<S>,
    lock: OperationLock<L>,
    clock: Arc<dyn Clock>,
}

impl<S: IndexStore> IndexManager<S, MemoryLeaseStore> {
    pub fn builder(store: S) -> IndexManagerBuilder<S> {
        Self::builder_shared(Arc::new(store))
    }

    pub fn builder_shared(store: Arc<S>) -> IndexManagerBuilder<S> {
        IndexManagerBuilder {
            store,
            clock: Arc::new(ProductionClock::new()),
            config: ManagerConfig::default(),
        }
    }
}

impl<S: IndexStore, L: LeaseStore> IndexManager<S, L> {
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn lease_store(&self) -> &Arc<L> {
        self.lock.store()
    }

    /// Create `name` backed by a fresh physical index
    pub async fn create(
        &self,
        name: &str,
        options: CreateOptions,
    ) -> Result<CreateOutcome, IndexError> {
        let name = LogicalName::parse(name)?;
        let template = Template::parse(&name, options.template)?;
        let store = self.store.clone();
        let clock = self.clock.clone();
        let key = name.to_string();

        self.lock
            .run(OperationKind::Creation, &key, move |cancel| {
                let index = physical_name(&name, clock.now());
                create::run(store, name, index, template, cancel)
            })
            .await
    }

    /// Move `name` to a fresh physical index holding a copy of its documents
    pub async fn update(
        &self,
        name: &str,
        options: UpdateOptions<S>,
    ) -> Result<UpdateOutcome, IndexError> {
        let name = LogicalName::parse(name)?;
        let template = Template::parse(&name, options.template)?;
        let reindexer = options.reindexer;
        let store = self.store.clone();
        let clock = self.clock.clone();
        let key = name.to_string();

        self.lock
            .run(OperationKind::Update, &key, move |cancel| {
                update::run(store, clock, name, template, reindexer, cancel)
            })
            .await
    }

    /// Delete the physical index behind `name`
    pub async fn delete(&self, name: &str) -> Result<DeleteOutcome, IndexError> {
        let name = LogicalName::parse(name)?;
        let store = self.store.clone();
        let key = name.to_string();

        self.lock
            .run(OperationKind::Deletion, &key, move |cancel| {
                delete::run(store, name, cancel)
            })
            .await
    }

    /// Resolves once the index store reports itself healthy
    pub async fn ready(&self) -> Result<(), IndexError> {
        self.store
            .await_healthy()
            .await
            .map_err(|err| IndexError::from_store("Index store is not ready", err))
    }
}
