use super::CreateOutcome;
use crate::error::IndexError;
use crate::lock::OperationKind;
use crate::naming::LogicalName;
use crate::saga::{Compensation, Saga, StepId};
use crate::store::IndexStore;
use crate::template::Template;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub(super) async fn run<S: IndexStore>(
    store: Arc<S>,
    name: LogicalName,
    index: String,
    template: Option<Template>,
    cancel: CancellationToken,
) -> Result<CreateOutcome, IndexError> {
    let mut saga = Saga::new(store.clone(), OperationKind::Creation, name.clone(), cancel);
    let alias = name.as_str();

    let alias_check = format!("Could not check if Alias \"{}\" already exists", alias);
    let index_check = format!("Could not check if Index \"{}\" already exists", index);
    let (alias_exists, index_exists) = futures::join!(
        saga.call(&alias_check, store.exists_alias(alias)),
        saga.call(&index_check, store.exists_index(&index)),
    );
    let (alias_exists, index_exists) = match alias_exists.and_then(|a| index_exists.map(|i| (a, i))) {
        Ok(checks) => checks,
        Err(err) => return Err(saga.abort(err).await),
    };
    saga.record(
        "pre_checks",
        json!([{ "exists": alias_exists }, { "exists": index_exists }]),
    );
    if alias_exists || index_exists {
        let err = IndexError::conflict(format!(
            "The index ({}) or alias ({}) were already existing",
            index, alias
        ));
        return Err(saga.abort(err).await);
    }

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
        info!(name = alias, "Index Template creation done");
    }

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
    info!(name = alias, index = %index, "Index creation done");

    // replaces any binding made since the pre-checks
    saga.register(
        StepId::CreateAlias,
        Compensation::DeleteAlias {
            alias: alias.to_string(),
            index: index.clone(),
        },
    );
    let ack = saga
        .step(
            &format!("Could not create \"{}\" Alias", alias),
            store.create_or_replace_alias(alias, &index),
        )
        .await?;
    saga.record("alias", ack);
    saga.step(
        "Could not await Alias creation consistency",
        store.await_consistency(),
    )
    .await?;

    let bindings = saga
        .step(
            &format!("Could not verify \"{}\" Alias", alias),
            store.resolve_alias(alias),
        )
        .await?;
    let bound: Vec<&String> = bindings.keys().collect();
    saga.record("verify", json!(bound));
    if bound.len() != 1 || bound[0] != &index {
        let err = IndexError::conflict(format!(
            "Alias \"{}\" is bound to {:?} instead of \"{}\": another operation won the race",
            alias, bound, index
        ));
        return Err(saga.abort(err).await);
    }
    info!(name = alias, index = %index, "Alias creation done");

    saga.commit();
    Ok(CreateOutcome {
        name: name.clone(),
        index,
        ops: saga.finish(),
    })
}
