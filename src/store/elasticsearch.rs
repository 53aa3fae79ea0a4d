//! Elasticsearch HTTP adapter.
//!
//! Talks to an Elasticsearch-compatible engine over its REST API with
//! `reqwest`. Responses are classified into [`StoreError`] here and nowhere
//! else:
//! - transport failures (connection refused, timeouts) → `Unavailable`
//! - 404 → `NotFound`
//! - `resource_already_exists_exception` or 409 → `AlreadyExists`
//! - any other non-2xx → `Rejected { status, reason }`

use super::{
    AliasBindings, AliasTarget, IndexStore, ReindexReport, StoreConfig, StoreError, StoreFuture,
    StoreResult,
};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

const HEALTH_TIMEOUT: &str = "30s";

/// Index store backed by an Elasticsearch cluster
#[derive(Debug, Clone)]
pub struct ElasticsearchStore {
    client: Client,
    base_url: String,
    refresh_interval: Duration,
}

impl ElasticsearchStore {
    pub fn new(config: &StoreConfig) -> StoreResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| StoreError::unavailable(format!("could not build HTTP client: {}", e)))?;
        Ok(ElasticsearchStore {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            refresh_interval: config.refresh_interval,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}/{}", self.base_url, path.trim_start_matches('/')))
    }

    /// Send a request; non-2xx statuses are classified against `resource`
    async fn send(&self, request: RequestBuilder, resource: &str) -> StoreResult<Value> {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;
        let body = parse_body(&text);
        debug!(status = status.as_u16(), resource, "engine response");

        if status.is_success() {
            Ok(body)
        } else {
            Err(classify(status.as_u16(), &body, resource))
        }
    }

    /// HEAD request answering an existence question
    async fn exists(&self, path: &str, resource: &str) -> StoreResult<bool> {
        let response = self
            .request(Method::HEAD, path)
            .send()
            .await
            .map_err(transport_error)?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(classify(status.as_u16(), &Value::Null, resource)),
        }
    }

    async fn update_aliases(&self, actions: Value, resource: &str) -> StoreResult<Value> {
        self.send(
            self.request(Method::POST, "_aliases")
                .json(&json!({ "actions": actions })),
            resource,
        )
        .await
    }
}

impl IndexStore for ElasticsearchStore {
    fn name(&self) -> &str {
        "elasticsearch"
    }

    fn exists_alias<'a>(&'a self, alias: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move { self.exists(&format!("_alias/{}", alias), alias).await })
    }

    fn exists_index<'a>(&'a self, index: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move { self.exists(index, index).await })
    }

    fn create_index<'a>(&'a self, index: &'a str) -> StoreFuture<'a, Value> {
        Box::pin(async move { self.send(self.request(Method::PUT, index), index).await })
    }

    fn delete_index<'a>(&'a self, index: &'a str) -> StoreFuture<'a, Value> {
        Box::pin(async move { self.send(self.request(Method::DELETE, index), index).await })
    }

    fn put_template<'a>(&'a self, name: &'a str, body: &'a Value) -> StoreFuture<'a, Value> {
        Box::pin(async move {
            let path = format!("_template/{}", name);
            self.send(self.request(Method::PUT, &path).json(body), name)
                .await
        })
    }

    fn delete_template<'a>(&'a self, name: &'a str) -> StoreFuture<'a, Value> {
        Box::pin(async move {
            let path = format!("_template/{}", name);
            self.send(self.request(Method::DELETE, &path), name).await
        })
    }

    fn create_or_replace_alias<'a>(
        &'a self,
        alias: &'a str,
        index: &'a str,
    ) -> StoreFuture<'a, Value> {
        Box::pin(async move {
            let actions = json!([
                { "remove": { "index": "_all", "alias": alias, "must_exist": false } },
                { "add": { "index": index, "alias": alias } },
            ]);
            self.update_aliases(actions, alias).await
        })
    }

    fn put_alias<'a>(&'a self, alias: &'a str, index: &'a str) -> StoreFuture<'a, Value> {
        Box::pin(async move {
            let path = format!("{}/_alias/{}", index, alias);
            self.send(self.request(Method::PUT, &path), alias).await
        })
    }

    fn switch_alias<'a>(
        &'a self,
        alias: &'a str,
        from: &'a str,
        to: &'a str,
    ) -> StoreFuture<'a, Value> {
        Box::pin(async move {
            let actions = json!([
                { "remove": { "index": from, "alias": alias } },
                { "add": { "index": to, "alias": alias } },
            ]);
            self.update_aliases(actions, alias).await
        })
    }

    fn delete_alias_binding<'a>(
        &'a self,
        alias: &'a str,
        target: &'a AliasTarget,
    ) -> StoreFuture<'a, Value> {
        Box::pin(async move {
            let path = format!("{}/_alias/{}", target, alias);
            self.send(self.request(Method::DELETE, &path), alias).await
        })
    }

    fn resolve_alias<'a>(&'a self, alias: &'a str) -> StoreFuture<'a, AliasBindings> {
        Box::pin(async move {
            let path = format!("_alias/{}", alias);
            let body = self.send(self.request(Method::GET, &path), alias).await?;
            match body {
                Value::Object(map) => Ok(map.into_iter().collect()),
                other => Err(StoreError::rejected(
                    500,
                    format!("unexpected alias resolution body: {}", other),
                )),
            }
        })
    }

    fn reindex<'a>(&'a self, source: &'a str, dest: &'a str) -> StoreFuture<'a, ReindexReport> {
        Box::pin(async move {
            let body = json!({
                "source": { "index": source },
                "dest": { "index": dest },
            });
            let response = self
                .send(
                    self.request(Method::POST, "_reindex?refresh=true&wait_for_completion=true")
                        .json(&body),
                    dest,
                )
                .await?;
            Ok(parse_reindex_report(&response))
        })
    }

    fn await_consistency(&self) -> StoreFuture<'_, ()> {
        let delay = self.refresh_interval;
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            Ok(())
        })
    }

    fn await_healthy(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let path = format!(
                "_cluster/health?wait_for_status=green&timeout={}",
                HEALTH_TIMEOUT
            );
            let body = self.send(self.request(Method::GET, &path), "cluster").await?;
            if body["timed_out"].as_bool().unwrap_or(false) {
                warn!(status = ?body["status"], "cluster did not reach green status");
                return Err(StoreError::unavailable(format!(
                    "cluster health is {} after {}",
                    body["status"], HEALTH_TIMEOUT
                )));
            }
            Ok(())
        })
    }
}

fn transport_error(err: reqwest::Error) -> StoreError {
    StoreError::unavailable(format!("No Living connections: {}", err))
}

fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

/// Classify a non-2xx engine response
pub(crate) fn classify(status: u16, body: &Value, resource: &str) -> StoreError {
    let error = &body["error"];
    let error_type = error["type"].as_str().unwrap_or_default();
    let reason = error["reason"]
        .as_str()
        .or_else(|| error.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| {
            if body.is_null() {
                format!("HTTP {}", status)
            } else {
                body.to_string()
            }
        });

    if error_type == "resource_already_exists_exception" || status == 409 {
        let resource = error["index"].as_str().unwrap_or(resource);
        return StoreError::already_exists(resource);
    }
    if status == 404 {
        return StoreError::not_found(format!("{} ({})", resource, reason));
    }
    let reason = if error_type.is_empty() {
        reason
    } else {
        format!("{}: {}", error_type, reason)
    };
    StoreError::rejected(status, reason)
}

pub(crate) fn parse_reindex_report(body: &Value) -> ReindexReport {
    ReindexReport {
        total: body["total"].as_u64().unwrap_or(0),
        created: body["created"].as_u64().unwrap_or(0),
        took_ms: body["took"].as_u64().unwrap_or(0),
        failures: body["failures"].as_array().cloned().unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_already_exists() {
        let body = json!({
            "error": {
                "type": "resource_already_exists_exception",
                "reason": "index [orders-1/abc] already exists",
                "index": "orders-1",
            },
            "status": 400,
        });
        let err = classify(400, &body, "orders-1");
        assert!(err.is_already_exists_for("orders-1"));

        let err = classify(409, &Value::Null, "orders-2");
        assert!(err.is_already_exists_for("orders-2"));
    }

    #[test]
    fn test_classify_not_found() {
        let body = json!({"error": "alias [orders] missing", "status": 404});
        let err = classify(404, &body, "orders");
        assert!(err.is_not_found());
        assert!(err.to_string().contains("alias [orders] missing"));
    }

    #[test]
    fn test_classify_rejected_keeps_status() {
        let body = json!({
            "error": {"type": "mapper_parsing_exception", "reason": "failed to parse mapping"},
            "status": 400,
        });
        match classify(400, &body, "orders-1") {
            StoreError::Rejected { status, reason } => {
                assert_eq!(status, 400);
                assert_eq!(reason, "mapper_parsing_exception: failed to parse mapping");
            }
            other => panic!("unexpected classification: {:?}", other),
        }
        assert_eq!(classify(500, &Value::Null, "x").status(), 500);
    }

    #[test]
    fn test_parse_body() {
        assert_eq!(parse_body(""), Value::Null);
        assert_eq!(parse_body("{\"acknowledged\":true}")["acknowledged"], true);
        assert_eq!(parse_body("oops"), Value::String("oops".into()));
    }

    #[test]
    fn test_parse_reindex_report() {
        let body = json!({
            "took": 147,
            "timed_out": false,
            "total": 120,
            "created": 120,
            "failures": [],
        });
        let report = parse_reindex_report(&body);
        assert_eq!(report.total, 120);
        assert_eq!(report.took_ms, 147);
        assert!(report.is_complete());
    }

    #[tokio::test]
    async fn test_unreachable_engine_is_unavailable() {
        let config = StoreConfig {
            url: "http://127.0.0.1:1".to_string(),
            refresh_interval: Duration::ZERO,
            request_timeout: Duration::from_millis(500),
        };
        let store = ElasticsearchStore::new(&config).unwrap();
        let err = store.exists_alias("orders").await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)), "{:?}", err);
    }
}
