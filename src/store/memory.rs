//! In-memory reference engine.
//!
//! Models the subset of search-engine behaviour the orchestrator relies on:
//! indices, aliases with multiple bindings, pattern-scoped templates and a
//! document copy for reindexing. Failures mirror the engine's (404 for
//! missing resources, `AlreadyExists` for duplicate indices).
//!
//! Test hooks:
//! - `fail_next(op, err)`: the next call of `op` fails without effect
//! - `fail_nth(op, n, err)`: same for the `n`th next call
//! - `interfere_after(op, f)`: `f` mutates the cluster right after the next
//!   successful call of `op`, simulating a third-party writer
//! - `calls()`: every primitive invoked, in order

use super::{AliasBindings, AliasTarget, IndexStore, ReindexReport, StoreError, StoreFuture};
use super::StoreResult;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// Primitive operations of [`IndexStore`], used to address test hooks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    ExistsAlias,
    ExistsIndex,
    CreateIndex,
    DeleteIndex,
    PutTemplate,
    DeleteTemplate,
    CreateOrReplaceAlias,
    PutAlias,
    SwitchAlias,
    DeleteAliasBinding,
    ResolveAlias,
    Reindex,
    AwaitConsistency,
}

impl StoreOp {
    /// Whether the operation mutates cluster state
    pub fn is_write(&self) -> bool {
        !matches!(
            self,
            StoreOp::ExistsAlias
                | StoreOp::ExistsIndex
                | StoreOp::ResolveAlias
                | StoreOp::AwaitConsistency
        )
    }
}

/// A physical index held by the in-memory engine
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexData {
    /// Template applied when the index was created
    pub template: Option<String>,
    pub documents: Vec<Value>,
}

/// Complete cluster state of the in-memory engine
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterState {
    indices: BTreeMap<String, IndexData>,
    aliases: BTreeMap<String, BTreeSet<String>>,
    templates: BTreeMap<String, Value>,
}

impl ClusterState {
    pub fn has_index(&self, index: &str) -> bool {
        self.indices.contains_key(index)
    }

    pub fn has_alias(&self, alias: &str) -> bool {
        self.aliases.contains_key(alias)
    }

    pub fn index_names(&self) -> Vec<String> {
        self.indices.keys().cloned().collect()
    }

    pub fn alias_names(&self) -> Vec<String> {
        self.aliases.keys().cloned().collect()
    }

    /// Indices bound to `alias`, sorted by name
    pub fn alias_indices(&self, alias: &str) -> Vec<String> {
        self.aliases
            .get(alias)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn template(&self, name: &str) -> Option<&Value> {
        self.templates.get(name)
    }

    pub fn index(&self, index: &str) -> Option<&IndexData> {
        self.indices.get(index)
    }

    pub fn documents(&self, index: &str) -> Option<&[Value]> {
        self.indices.get(index).map(|data| data.documents.as_slice())
    }

    pub fn insert_documents(
        &mut self,
        index: &str,
        documents: impl IntoIterator<Item = Value>,
    ) -> StoreResult<()> {
        let data = self
            .indices
            .get_mut(index)
            .ok_or_else(|| missing_index(index))?;
        data.documents.extend(documents);
        Ok(())
    }

    pub fn create_index(&mut self, index: &str) -> StoreResult<()> {
        if self.indices.contains_key(index) {
            return Err(StoreError::already_exists(index));
        }
        if self.aliases.contains_key(index) {
            return Err(StoreError::rejected(
                400,
                format!("invalid_index_name_exception: an alias named [{}] exists", index),
            ));
        }
        let template = self
            .templates
            .iter()
            .find(|(_, body)| template_matches(body, index))
            .map(|(name, _)| name.clone());
        self.indices.insert(
            index.to_string(),
            IndexData {
                template,
                documents: Vec::new(),
            },
        );
        Ok(())
    }

    /// Delete an index together with every alias binding to it
    pub fn delete_index(&mut self, index: &str) -> StoreResult<()> {
        if self.indices.remove(index).is_none() {
            return Err(missing_index(index));
        }
        for bindings in self.aliases.values_mut() {
            bindings.remove(index);
        }
        self.aliases.retain(|_, bindings| !bindings.is_empty());
        Ok(())
    }

    pub fn bind_alias(&mut self, alias: &str, index: &str) -> StoreResult<()> {
        if !self.indices.contains_key(index) {
            return Err(missing_index(index));
        }
        self.check_alias_name(alias)?;
        self.aliases
            .entry(alias.to_string())
            .or_default()
            .insert(index.to_string());
        Ok(())
    }

    /// An alias may not shadow an index
    fn check_alias_name(&self, alias: &str) -> StoreResult<()> {
        if self.indices.contains_key(alias) {
            return Err(StoreError::rejected(
                400,
                format!("invalid_alias_name_exception: an index named [{}] exists", alias),
            ));
        }
        Ok(())
    }

    pub fn unbind_alias(&mut self, alias: &str, index: &str) -> StoreResult<()> {
        let bindings = self
            .aliases
            .get_mut(alias)
            .filter(|bindings| bindings.contains(index))
            .ok_or_else(|| missing_binding(alias, index))?;
        bindings.remove(index);
        if bindings.is_empty() {
            self.aliases.remove(alias);
        }
        Ok(())
    }

    pub fn remove_alias(&mut self, alias: &str) -> StoreResult<()> {
        self.aliases
            .remove(alias)
            .map(|_| ())
            .ok_or_else(|| missing_alias(alias))
    }

    pub fn put_template(&mut self, name: &str, body: Value) {
        self.templates.insert(name.to_string(), body);
    }

    pub fn delete_template(&mut self, name: &str) -> StoreResult<()> {
        self.templates
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found(format!("index template [{}]", name)))
    }
}

fn template_matches(body: &Value, index: &str) -> bool {
    body.get("index_patterns")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .any(|pattern| match pattern.strip_suffix('*') {
            Some(prefix) => index.starts_with(prefix),
            None => pattern == index,
        })
}

fn missing_index(index: &str) -> StoreError {
    StoreError::not_found(format!("index [{}]", index))
}

fn missing_alias(alias: &str) -> StoreError {
    StoreError::not_found(format!("alias [{}]", alias))
}

fn missing_binding(alias: &str, index: &str) -> StoreError {
    StoreError::not_found(format!("alias [{}] on index [{}]", alias, index))
}

fn acknowledged() -> Value {
    json!({"acknowledged": true})
}

type Interference = Box<dyn FnOnce(&mut ClusterState) + Send>;

#[derive(Default)]
struct Inner {
    state: ClusterState,
    calls: Vec<StoreOp>,
    /// `None` lets a call through
    failures: HashMap<StoreOp, VecDeque<Option<StoreError>>>,
    interference: HashMap<StoreOp, VecDeque<Interference>>,
}

/// In-memory index store for unit tests, DST and demos
///
/// Clones share the same cluster.
#[derive(Clone, Default)]
pub struct InMemoryIndexStore {
    inner: Arc<Mutex<Inner>>,
    consistency_delay: Duration,
}

impl std::fmt::Debug for InMemoryIndexStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("InMemoryIndexStore")
            .field("state", &inner.state)
            .field("calls", &inner.calls.len())
            .field("consistency_delay", &self.consistency_delay)
            .finish()
    }
}

impl InMemoryIndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `await_consistency` sleep instead of yielding
    pub fn with_consistency_delay(mut self, delay: Duration) -> Self {
        self.consistency_delay = delay;
        self
    }

    /// Copy of the current cluster state
    pub fn snapshot(&self) -> ClusterState {
        self.inner.lock().state.clone()
    }

    /// Run `f` against the cluster state directly, bypassing hooks
    pub fn with_state<T>(&self, f: impl FnOnce(&mut ClusterState) -> T) -> T {
        f(&mut self.inner.lock().state)
    }

    /// Primitives invoked so far, in order
    pub fn calls(&self) -> Vec<StoreOp> {
        self.inner.lock().calls.clone()
    }

    pub fn write_calls(&self) -> usize {
        self.inner.lock().calls.iter().filter(|op| op.is_write()).count()
    }

    pub fn clear_calls(&self) {
        self.inner.lock().calls.clear();
    }

    /// Fail the next call of `op` with `err`, leaving the cluster untouched
    pub fn fail_next(&self, op: StoreOp, err: StoreError) {
        self.fail_nth(op, 1, err);
    }

    /// Let `n - 1` calls of `op` through, then fail the next one with `err`
    ///
    /// Counted after the failures already queued for `op`.
    pub fn fail_nth(&self, op: StoreOp, n: usize, err: StoreError) {
        let mut inner = self.inner.lock();
        let queue = inner.failures.entry(op).or_default();
        queue.extend(std::iter::repeat_with(|| None).take(n.saturating_sub(1)));
        queue.push_back(Some(err));
    }

    /// Run `f` right after the next successful call of `op`
    pub fn interfere_after(&self, op: StoreOp, f: impl FnOnce(&mut ClusterState) + Send + 'static) {
        self.inner
            .lock()
            .interference
            .entry(op)
            .or_default()
            .push_back(Box::new(f));
    }

    fn execute<T>(
        &self,
        op: StoreOp,
        f: impl FnOnce(&mut ClusterState) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.calls.push(op);

        if let Some(err) = inner
            .failures
            .get_mut(&op)
            .and_then(VecDeque::pop_front)
            .flatten()
        {
            return Err(err);
        }

        let result = f(&mut inner.state)?;

        if let Some(hook) = inner.interference.get_mut(&op).and_then(VecDeque::pop_front) {
            hook(&mut inner.state);
        }
        Ok(result)
    }
}

impl IndexStore for InMemoryIndexStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn exists_alias<'a>(&'a self, alias: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move { self.execute(StoreOp::ExistsAlias, |s| Ok(s.has_alias(alias))) })
    }

    fn exists_index<'a>(&'a self, index: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move { self.execute(StoreOp::ExistsIndex, |s| Ok(s.has_index(index))) })
    }

    fn create_index<'a>(&'a self, index: &'a str) -> StoreFuture<'a, Value> {
        Box::pin(async move {
            self.execute(StoreOp::CreateIndex, |s| {
                s.create_index(index)?;
                Ok(json!({
                    "acknowledged": true,
                    "shards_acknowledged": true,
                    "index": index,
                }))
            })
        })
    }

    fn delete_index<'a>(&'a self, index: &'a str) -> StoreFuture<'a, Value> {
        Box::pin(async move {
            self.execute(StoreOp::DeleteIndex, |s| {
                s.delete_index(index)?;
                Ok(acknowledged())
            })
        })
    }

    fn put_template<'a>(&'a self, name: &'a str, body: &'a Value) -> StoreFuture<'a, Value> {
        Box::pin(async move {
            self.execute(StoreOp::PutTemplate, |s| {
                s.put_template(name, body.clone());
                Ok(acknowledged())
            })
        })
    }

    fn delete_template<'a>(&'a self, name: &'a str) -> StoreFuture<'a, Value> {
        Box::pin(async move {
            self.execute(StoreOp::DeleteTemplate, |s| {
                s.delete_template(name)?;
                Ok(acknowledged())
            })
        })
    }

    fn create_or_replace_alias<'a>(
        &'a self,
        alias: &'a str,
        index: &'a str,
    ) -> StoreFuture<'a, Value> {
        Box::pin(async move {
            self.execute(StoreOp::CreateOrReplaceAlias, |s| {
                if !s.has_index(index) {
                    return Err(missing_index(index));
                }
                let _ = s.remove_alias(alias);
                s.bind_alias(alias, index)?;
                Ok(acknowledged())
            })
        })
    }

    fn put_alias<'a>(&'a self, alias: &'a str, index: &'a str) -> StoreFuture<'a, Value> {
        Box::pin(async move {
            self.execute(StoreOp::PutAlias, |s| {
                s.bind_alias(alias, index)?;
                Ok(acknowledged())
            })
        })
    }

    fn switch_alias<'a>(
        &'a self,
        alias: &'a str,
        from: &'a str,
        to: &'a str,
    ) -> StoreFuture<'a, Value> {
        Box::pin(async move {
            self.execute(StoreOp::SwitchAlias, |s| {
                // validate both actions before applying either
                if !s.alias_indices(alias).iter().any(|i| i.as_str() == from) {
                    return Err(missing_binding(alias, from));
                }
                if !s.has_index(to) {
                    return Err(missing_index(to));
                }
                s.check_alias_name(alias)?;
                s.unbind_alias(alias, from)?;
                s.bind_alias(alias, to)?;
                Ok(acknowledged())
            })
        })
    }

    fn delete_alias_binding<'a>(
        &'a self,
        alias: &'a str,
        target: &'a AliasTarget,
    ) -> StoreFuture<'a, Value> {
        Box::pin(async move {
            self.execute(StoreOp::DeleteAliasBinding, |s| {
                match target {
                    AliasTarget::Index(index) => s.unbind_alias(alias, index)?,
                    AliasTarget::All => s.remove_alias(alias)?,
                }
                Ok(acknowledged())
            })
        })
    }

    fn resolve_alias<'a>(&'a self, alias: &'a str) -> StoreFuture<'a, AliasBindings> {
        Box::pin(async move {
            self.execute(StoreOp::ResolveAlias, |s| {
                if !s.has_alias(alias) {
                    return Err(missing_alias(alias));
                }
                Ok(s.alias_indices(alias)
                    .into_iter()
                    .map(|index| {
                        let mut aliases = Map::new();
                        aliases.insert(alias.to_string(), json!({}));
                        (index, json!({ "aliases": aliases }))
                    })
                    .collect())
            })
        })
    }

    /// Copies every document; `dest` must already exist
    fn reindex<'a>(&'a self, source: &'a str, dest: &'a str) -> StoreFuture<'a, ReindexReport> {
        Box::pin(async move {
            self.execute(StoreOp::Reindex, |s| {
                let documents = s
                    .documents(source)
                    .ok_or_else(|| missing_index(source))?
                    .to_vec();
                let copied = documents.len() as u64;
                s.insert_documents(dest, documents)?;
                Ok(ReindexReport {
                    total: copied,
                    created: copied,
                    took_ms: 0,
                    failures: Vec::new(),
                })
            })
        })
    }

    fn await_consistency(&self) -> StoreFuture<'_, ()> {
        let delay = self.consistency_delay;
        Box::pin(async move {
            self.execute(StoreOp::AwaitConsistency, |_| Ok(()))?;
            if delay.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(delay).await;
            }
            Ok(())
        })
    }

    fn await_healthy(&self) -> StoreFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}
