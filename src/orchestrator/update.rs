use super::{Reindexer, UpdateOutcome};
use crate::clock::Clock;
use crate::error::{ErrorKind, IndexError};
use crate::lock::OperationKind;
use crate::naming::{physical_name, LogicalName};
use crate::saga::{Compensation, Saga, StepId};
use crate::store::{AliasBindings, IndexStore, StoreError};
use crate::template::Template;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub(super) async fn run<S: IndexStore>(
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    name: LogicalName,
    template: Option<Template>,
    reindexer: Option<Arc<dyn Reindexer<S>>>,
    cancel: CancellationToken,
) -> Result<UpdateOutcome, IndexError> {
    let mut saga = Saga::new(store.clone(), OperationKind::Update, name.clone(), cancel);
    let alias = name.as_str();

    let exists = saga
        .step(
            &format!("Could not check if Alias \"{}\" already exists", alias),
            store.exists_alias(alias),
        )
        .await?;
    saga.record("exists", exists);
    if !exists {
        let err = IndexError::not_found(format!("Alias \"{}\" does not exist", alias));
        return Err(saga.abort(err).await);
    }

    let bindings = saga
        .step(
            &format!("Could not find the Index bound to \"{}\" Alias", alias),
            store.resolve_alias(alias),
        )
        .await?;
    let source_index = match single_binding(alias, &bindings) {
        Ok(index) => index,
        Err(err) => return Err(saga.abort(err).await),
    };
    saga.record("source_index", source_index.clone());

    if let Some(template) = &template {
        let body = template.to_value();
        let ack = saga
            .step(
                &format!("Could not create \"{}\" Index Template", alias),
                store.put_template(alias, &body),
            )
            .await?;
        saga.record("template", ack);
        saga.register(
            StepId::Template,
            Compensation::DeleteTemplate {
                name: alias.to_string(),
            },
        );
    }

    let index = physical_name(&name, clock.now());
    saga.register(
        StepId::CreateIndex,
        Compensation::DeleteIndex {
            index: index.clone(),
        },
    );
    let ack = saga
        .step(
            &format!("Could not create \"{}\" Index", index),
            store.create_index(&index),
        )
        .await?;
    saga.record("index", ack);
    saga.step(
        "Could not await Index creation consistency",
        store.await_consistency(),
    )
    .await?;

    // A failed reindex is rolled back right away but does not abort: the
    // post-reindex checks below turn it into the operation's failure.
    let reindex_description = format!(
        "Could not reindex \"{}\" into \"{}\"",
        source_index, index
    );
    let reindexed = match &reindexer {
        Some(custom) => {
            saga.call(
                &reindex_description,
                custom.reindex(store.as_ref(), &source_index, &index),
            )
            .await
        }
        None => {
            saga.call(&reindex_description, store.reindex(&source_index, &index))
                .await
        }
    };
    let mut reindex_error = match reindexed {
        Ok(report) if report.is_complete() => {
            saga.record("reindex", report.to_json());
            None
        }
        Ok(report) => {
            saga.record("reindex", report.to_json());
            Some(IndexError::from_store(
                &reindex_description,
                StoreError::rejected(
                    500,
                    format!("{} document(s) failed to reindex", report.failures.len()),
                ),
            ))
        }
        Err(err) if err.kind() == ErrorKind::Timeout => return Err(saga.abort(err).await),
        Err(err) => {
            saga.record("reindex", json!({ "error": err.message() }));
            Some(err)
        }
    };
    if let Some(err) = reindex_error.as_mut() {
        warn!(name = alias, source_index = %source_index, index = %index, error = %err, "Reindex failed");
        saga.rollback(err).await;
    }
    saga.step("Could not await reindex consistency", store.await_consistency())
        .await?;

    let source_check = format!("Could not check if Index \"{}\" still exists", source_index);
    let index_check = format!("Could not check if Index \"{}\" exists", index);
    let alias_check = format!("Could not find the Index bound to \"{}\" Alias", alias);
    let (source_exists, index_exists, bound) = futures::join!(
        saga.call(&source_check, store.exists_index(&source_index)),
        saga.call(&index_check, store.exists_index(&index)),
        saga.call(&alias_check, store.resolve_alias(alias)),
    );
    let bound = match bound {
        Ok(bindings) => Ok(bindings.into_keys().collect::<Vec<_>>()),
        Err(err) if err.store_error().is_some_and(StoreError::is_not_found) => Ok(Vec::new()),
        Err(err) => Err(err),
    };
    let checks = source_exists.and_then(|s| index_exists.and_then(|i| bound.map(|b| (s, i, b))));
    let (source_exists, index_exists, bound) = match checks {
        Ok(checks) => checks,
        Err(err) => {
            let mut err = err;
            if let Some(mut reindex_err) = reindex_error {
                for rollback_error in reindex_err.take_rollback_errors() {
                    err.push_rollback_error(rollback_error);
                }
            }
            return Err(saga.abort(err).await);
        }
    };
    saga.record(
        "post_reindex",
        json!([
            { "exists": source_exists },
            { "exists": index_exists },
            { "bound_to": bound },
        ]),
    );

    let still_bound = bound.len() == 1 && bound[0] == source_index;
    if reindex_error.is_some() || !source_exists || !index_exists || !still_bound {
        let mut message = format!(
            "The original index ({})/destination index ({})/alias ({}) status after reindexation \
             was not consistent and has probably been altered by a third party: \
             source exists: {}, destination exists: {}, alias bound to {:?}",
            source_index, index, alias, source_exists, index_exists, bound
        );
        let mut err = match reindex_error {
            Some(mut reindex_err) => {
                message.push_str(&format!(" ({})", reindex_err.message()));
                let mut err = IndexError::conflict(message);
                if let Some(cause) = reindex_err.store_error().cloned() {
                    err = err.with_source(cause);
                }
                for rollback_error in reindex_err.take_rollback_errors() {
                    err.push_rollback_error(rollback_error);
                }
                err
            }
            None => IndexError::conflict(message),
        };
        saga.rollback(&mut err).await;
        return Err(err.with_ops(saga.ops().clone()));
    }

    saga.register(
        StepId::SwitchAlias,
        Compensation::RestoreAlias {
            alias: alias.to_string(),
            source: source_index.clone(),
            target: index.clone(),
        },
    );
    let ack = saga
        .step(
            &format!(
                "Could not switch \"{}\" Alias from \"{}\" to \"{}\"",
                alias, source_index, index
            ),
            store.switch_alias(alias, &source_index, &index),
        )
        .await?;
    saga.record("switch", ack);
    saga.commit();
    info!(name = alias, source_index = %source_index, index = %index, "Alias switch done");

    // The switch is final from here on: cleanup failures are reported, not rolled back.
    if let Err(err) = saga
        .settle("Could not await Alias switch consistency", store.await_consistency())
        .await
    {
        warn!(name = alias, index = %index, error = %err, "Alias switch may not be visible yet");
    }
    let delete_description = format!("Source Index \"{}\" could not be deleted", source_index);
    let verify_description = format!("Could not verify \"{}\" Alias", alias);
    let (deleted, bound) = futures::join!(
        saga.settle(&delete_description, store.delete_index(&source_index)),
        saga.settle(&verify_description, store.resolve_alias(alias)),
    );
    let bound: Result<Vec<String>, IndexError> =
        bound.map(|bindings| bindings.into_keys().collect());
    saga.record(
        "post_alias_switch",
        json!([
            match &deleted {
                Ok(ack) => ack.clone(),
                Err(err) => json!({ "error": err.message() }),
            },
            match &bound {
                Ok(bound) => json!({ "bound_to": bound }),
                Err(err) => json!({ "error": err.message() }),
            },
        ]),
    );

    if let Err(err) = deleted {
        let mut dependency = IndexError::dependency(format!(
            "Source Index \"{}\" could not be deleted",
            source_index
        ));
        if let Some(cause) = err.store_error().cloned() {
            dependency = dependency.with_source(cause);
        }
        return Err(dependency.with_ops(saga.finish()));
    }
    match bound {
        Ok(bound) if bound.len() == 1 && bound[0] == index => {}
        Ok(bound) => {
            let err = IndexError::conflict(format!(
                "Alias \"{}\" is bound to {:?} instead of \"{}\" after the switch",
                alias, bound, index
            ));
            return Err(err.with_ops(saga.finish()));
        }
        Err(err) => return Err(err.with_ops(saga.finish())),
    }
    info!(name = alias, source_index = %source_index, "Source Index deletion done");

    Ok(UpdateOutcome {
        name: name.clone(),
        source_index,
        index,
        ops: saga.finish(),
    })
}

/// The one index `alias` is bound to
fn single_binding(alias: &str, bindings: &AliasBindings) -> Result<String, IndexError> {
    let mut indices = bindings.keys();
    match (indices.next(), indices.next()) {
        (Some(index), None) => Ok(index.clone()),
        (None, _) => Err(IndexError::not_found(format!(
            "Alias \"{}\" is not bound to any Index",
            alias
        ))),
        (Some(_), Some(_)) => Err(IndexError::conflict(format!(
            "Alias \"{}\" is bound to several Indices ({}), cannot pick the one to update",
            alias,
            bindings.keys().cloned().collect::<Vec<_>>().join(", ")
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_single_binding() {
        let mut bindings = AliasBindings::new();
        assert_eq!(
            single_binding("orders", &bindings).unwrap_err().kind(),
            ErrorKind::NotFound
        );

        bindings.insert("orders-1".into(), Value::Null);
        assert_eq!(single_binding("orders", &bindings).unwrap(), "orders-1");

        bindings.insert("orders-2".into(), Value::Null);
        let err = single_binding("orders", &bindings).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(err.message().contains("orders-1, orders-2"));
    }
}
