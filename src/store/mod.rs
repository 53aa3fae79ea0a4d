//! Index Store Abstraction
//!
//! The narrow interface through which the orchestration core talks to the
//! search engine. Every primitive the create/update/delete workflows need is
//! one method here; everything else about the engine stays on the other side.
//!
//! Implementations:
//! - `InMemoryIndexStore`: reference engine for tests, simulation and demos
//! - `SimulatedIndexStore`: wraps another store and injects faults
//! - `ElasticsearchStore`: HTTP adapter (feature `elasticsearch`)
//!
//! Raw engine failures are classified into [`StoreError`] at this boundary,
//! once. Code above the boundary matches on the variant, never on payloads.

pub mod config;
#[cfg(feature = "elasticsearch")]
pub mod elasticsearch;
pub mod memory;
pub mod simulated;

pub use config::StoreConfig;
#[cfg(feature = "elasticsearch")]
pub use elasticsearch::ElasticsearchStore;
pub use memory::{ClusterState, InMemoryIndexStore, StoreOp};
pub use simulated::{SimulatedIndexStore, SimulatedStoreConfig, SimulatedStoreStats};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Failure reported by an index store, tagged at the boundary
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The addressed index, alias, binding or template does not exist
    #[error("{resource} not found")]
    NotFound { resource: String },
    /// The resource to create already exists
    #[error("{resource} already exists")]
    AlreadyExists { resource: String },
    /// The store could not be reached at all
    #[error("index store unreachable: {0}")]
    Unavailable(String),
    /// The engine answered with an error that is none of the above
    #[error("index store rejected the request ({status}): {reason}")]
    Rejected { status: u16, reason: String },
}

impl StoreError {
    pub fn not_found(resource: impl Into<String>) -> Self {
        StoreError::NotFound {
            resource: resource.into(),
        }
    }

    pub fn already_exists(resource: impl Into<String>) -> Self {
        StoreError::AlreadyExists {
            resource: resource.into(),
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        StoreError::Unavailable(reason.into())
    }

    pub fn rejected(status: u16, reason: impl Into<String>) -> Self {
        StoreError::Rejected {
            status,
            reason: reason.into(),
        }
    }

    /// HTTP-equivalent status of the failure
    pub fn status(&self) -> u16 {
        match self {
            StoreError::NotFound { .. } => 404,
            StoreError::AlreadyExists { .. } => 409,
            StoreError::Unavailable(_) => 502,
            StoreError::Rejected { status, .. } => *status,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    /// True when this error says that `resource` itself already existed
    pub fn is_already_exists_for(&self, resource: &str) -> bool {
        matches!(self, StoreError::AlreadyExists { resource: r } if r == resource)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Boxed future returned by every store primitive
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = StoreResult<T>> + Send + 'a>>;

/// Which binding(s) of an alias a removal addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AliasTarget {
    /// The binding to one physical index
    Index(String),
    /// Every binding of the alias
    All,
}

impl std::fmt::Display for AliasTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AliasTarget::Index(index) => f.write_str(index),
            AliasTarget::All => f.write_str("_all"),
        }
    }
}

/// Indices an alias resolves to, each with its engine-side metadata
pub type AliasBindings = BTreeMap<String, Value>;

/// Outcome of a bulk copy between two physical indices
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReindexReport {
    /// Documents seen in the source
    pub total: u64,
    /// Documents written to the destination
    pub created: u64,
    /// Time the engine reports for the copy
    pub took_ms: u64,
    /// Per-document failures, as reported by the engine
    pub failures: Vec<Value>,
}

impl ReindexReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn to_json(&self) -> Value {
        json!({
            "total": self.total,
            "created": self.created,
            "took": self.took_ms,
            "failures": self.failures,
        })
    }
}

/// Primitive remote operations of a search engine
///
/// Write primitives return the engine's raw acknowledgement; the saga
/// executor stores it verbatim in the operation log.
pub trait IndexStore: Send + Sync + 'static {
    /// Human-readable name of the backend, for logs
    fn name(&self) -> &str;

    fn exists_alias<'a>(&'a self, alias: &'a str) -> StoreFuture<'a, bool>;

    fn exists_index<'a>(&'a self, index: &'a str) -> StoreFuture<'a, bool>;

    fn create_index<'a>(&'a self, index: &'a str) -> StoreFuture<'a, Value>;

    /// Delete an index; every alias binding to it disappears with it
    fn delete_index<'a>(&'a self, index: &'a str) -> StoreFuture<'a, Value>;

    fn put_template<'a>(&'a self, name: &'a str, body: &'a Value) -> StoreFuture<'a, Value>;

    fn delete_template<'a>(&'a self, name: &'a str) -> StoreFuture<'a, Value>;

    /// Bind `alias` to `index` only, dropping any other binding, in one request
    fn create_or_replace_alias<'a>(
        &'a self,
        alias: &'a str,
        index: &'a str,
    ) -> StoreFuture<'a, Value>;

    /// Add a binding from `alias` to `index`, keeping existing ones
    fn put_alias<'a>(&'a self, alias: &'a str, index: &'a str) -> StoreFuture<'a, Value>;

    /// Atomically move `alias` from `from` to `to` (remove + add in one request)
    fn switch_alias<'a>(
        &'a self,
        alias: &'a str,
        from: &'a str,
        to: &'a str,
    ) -> StoreFuture<'a, Value>;

    fn delete_alias_binding<'a>(
        &'a self,
        alias: &'a str,
        target: &'a AliasTarget,
    ) -> StoreFuture<'a, Value>;

    /// Indices currently behind `alias`; `NotFound` when the alias is absent
    fn resolve_alias<'a>(&'a self, alias: &'a str) -> StoreFuture<'a, AliasBindings>;

    /// Engine-native copy of every document from `source` into `dest`
    fn reindex<'a>(&'a self, source: &'a str, dest: &'a str) -> StoreFuture<'a, ReindexReport>;

    /// Resolves once previous writes are visible to subsequent reads
    fn await_consistency(&self) -> StoreFuture<'_, ()>;

    /// Resolves once the engine reports itself healthy
    fn await_healthy(&self) -> StoreFuture<'_, ()>;
}
