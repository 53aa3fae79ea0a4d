use super::DeleteOutcome;
use crate::error::IndexError;
use crate::lock::OperationKind;
use crate::naming::LogicalName;
use crate::saga::Saga;
use crate::store::{AliasBindings, IndexStore};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub(super) async fn run<S: IndexStore>(
    store: Arc<S>,
    name: LogicalName,
    cancel: CancellationToken,
) -> Result<DeleteOutcome, IndexError> {
    let mut saga = Saga::new(store.clone(), OperationKind::Deletion, name.clone(), cancel);
    let alias = name.as_str();

    let exists = saga
        .step(
            &format!("Could not check if Alias \"{}\" exists", alias),
            store.exists_alias(alias),
        )
        .await?;
    saga.record("exists", exists);
    if !exists {
        return Err(saga.abort(missing(alias)).await);
    }

    let bindings = match saga
        .call(
            &format!("Could not find the Index bound to \"{}\" Alias", alias),
            store.resolve_alias(alias),
        )
        .await
    {
        Ok(bindings) => bindings,
        Err(err) if err.store_error().is_some_and(|e| e.is_not_found()) => {
            return Err(saga.abort(missing(alias)).await)
        }
        Err(err) => return Err(saga.abort(err).await),
    };
    let index = match newest_binding(alias, &bindings) {
        Some(index) => index,
        None => return Err(saga.abort(missing(alias)).await),
    };
    saga.record("index", index.clone());

    let index_exists = saga
        .step(
            &format!("Could not check if Index \"{}\" exists", index),
            store.exists_index(&index),
        )
        .await?;
    if !index_exists {
        return Err(saga.abort(missing(alias)).await);
    }

    // Nothing to compensate: an index deletion cannot be undone.
    let ack = saga
        .step(
            &format!("Could not delete \"{}\" Index", index),
            store.delete_index(&index),
        )
        .await?;
    saga.record("deletion", ack);
    info!(name = alias, index = %index, "Index deletion done");

    Ok(DeleteOutcome {
        name: name.clone(),
        index,
        ops: saga.finish(),
    })
}

fn missing(alias: &str) -> IndexError {
    IndexError::not_found(format!(
        "The alias or index behind \"{}\" was missing",
        alias
    ))
}

/// Physical index names sort by creation time, the last one is the newest
fn newest_binding(alias: &str, bindings: &AliasBindings) -> Option<String> {
    if bindings.len() > 1 {
        warn!(
            name = alias,
            indices = ?bindings.keys().collect::<Vec<_>>(),
            "Alias is bound to several Indices, deleting the newest"
        );
    }
    bindings.keys().next_back().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_newest_binding() {
        let mut bindings = AliasBindings::new();
        assert_eq!(newest_binding("orders", &bindings), None);

        bindings.insert("orders-2018-03-01t12:00:00.000z".into(), Value::Null);
        bindings.insert("orders-2018-03-02t12:00:00.000z".into(), Value::Null);
        assert_eq!(
            newest_binding("orders", &bindings).as_deref(),
            Some("orders-2018-03-02t12:00:00.000z")
        );
    }
}
