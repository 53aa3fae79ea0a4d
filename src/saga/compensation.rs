//! Compensating actions and the chain that holds them.
//!
//! Each committed step pushes one [`CompensationRecord`] carrying the data
//! needed to undo it. On failure the saga pops records last-committed-first.

use crate::error::IndexError;
use crate::store::{AliasTarget, IndexStore, StoreError};
use tracing::debug;

/// Step of a workflow that may need to be undone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepId {
    Template,
    CreateIndex,
    CreateAlias,
    SwitchAlias,
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            StepId::Template => "index template creation",
            StepId::CreateIndex => "index creation",
            StepId::CreateAlias => "alias creation",
            StepId::SwitchAlias => "alias switch",
        })
    }
}

/// Undo action bound to the artifacts of one step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compensation {
    DeleteIndex { index: String },
    DeleteTemplate { name: String },
    /// Remove the binding of `alias` to `index`
    DeleteAlias { alias: String, index: String },
    /// Point `alias` back from `target` to `source`
    RestoreAlias {
        alias: String,
        source: String,
        target: String,
    },
}

impl std::fmt::Display for Compensation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Compensation::DeleteIndex { index } => write!(f, "delete index \"{}\"", index),
            Compensation::DeleteTemplate { name } => {
                write!(f, "delete index template \"{}\"", name)
            }
            Compensation::DeleteAlias { alias, index } => {
                write!(f, "delete alias \"{}\" on \"{}\"", alias, index)
            }
            Compensation::RestoreAlias {
                alias,
                source,
                target,
            } => write!(f, "switch alias \"{}\" back from \"{}\" to \"{}\"", alias, target, source),
        }
    }
}

/// How a compensation ended when it did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompensationOutcome {
    Applied,
    /// The artifact was already gone, which is the desired end state
    AlreadyAbsent,
    /// The alias switch could not be reversed; `source` was re-added instead
    FellBack,
    /// The failure was caused by a pre-existing index that must be kept
    Refused,
}

impl Compensation {
    /// Undo the step against `store`; `cause` is the error that triggered it
    pub async fn apply<S: IndexStore + ?Sized>(
        &self,
        store: &S,
        cause: &IndexError,
    ) -> Result<CompensationOutcome, StoreError> {
        match self {
            Compensation::DeleteIndex { index } => {
                if cause.cause_is_already_exists(index) {
                    return Ok(CompensationOutcome::Refused);
                }
                absent_ok(store.delete_index(index).await)
            }
            Compensation::DeleteTemplate { name } => absent_ok(store.delete_template(name).await),
            Compensation::DeleteAlias { alias, index } => {
                let target = AliasTarget::Index(index.clone());
                absent_ok(store.delete_alias_binding(alias, &target).await)
            }
            Compensation::RestoreAlias {
                alias,
                source,
                target,
            } => match store.switch_alias(alias, target, source).await {
                Ok(_) => Ok(CompensationOutcome::Applied),
                Err(err) if err.is_not_found() => {
                    debug!(alias = %alias, index = %source, error = %err, "Falling back to re-adding the alias");
                    store.put_alias(alias, source).await?;
                    Ok(CompensationOutcome::FellBack)
                }
                Err(err) => Err(err),
            },
        }
    }
}

fn absent_ok<T>(result: Result<T, StoreError>) -> Result<CompensationOutcome, StoreError> {
    match result {
        Ok(_) => Ok(CompensationOutcome::Applied),
        Err(err) if err.is_not_found() => Ok(CompensationOutcome::AlreadyAbsent),
        Err(err) => Err(err),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompensationRecord {
    pub step: StepId,
    pub undo: Compensation,
}

/// Compensations of the committed steps, in commit order
#[derive(Debug, Clone, Default)]
pub struct CompensationChain {
    records: Vec<CompensationRecord>,
}

impl CompensationChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, step: StepId, undo: Compensation) {
        self.records.push(CompensationRecord { step, undo });
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn records(&self) -> &[CompensationRecord] {
        &self.records
    }

    /// Empty the chain, most recently committed first
    pub fn drain_lifo(&mut self) -> Vec<CompensationRecord> {
        let mut records = std::mem::take(&mut self.records);
        records.reverse();
        records
    }
}
