use std::sync::Arc;

use config::index::IndexConfig;
use config::shared::ElasticsearchConfig;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::destination::{BulkFuture, BulkGateway, BulkItemError, BulkOutcome};
use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;
use crate::types::Document;

const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Refresh interval that disables periodic refreshes.
const DISABLED_REFRESH_INTERVAL: &str = "-1";

#[derive(Debug)]
struct Inner {
    client: Client,
    base_url: String,
    username: Option<String>,
    password: Option<SecretString>,
    refresh_interval: String,
}

/// [`BulkGateway`] speaking the Elasticsearch REST api.
#[derive(Debug, Clone)]
pub struct ElasticsearchGateway {
    inner: Arc<Inner>,
}

impl ElasticsearchGateway {
    pub fn new(config: &ElasticsearchConfig) -> EtlResult<Self> {
        let client = Client::builder().build()?;

        Ok(Self {
            inner: Arc::new(Inner {
                client,
                base_url: config.url.trim_end_matches('/').to_string(),
                username: config.username.clone(),
                password: config.password.clone(),
                refresh_interval: config.refresh_interval.clone(),
            }),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.inner.base_url, path.trim_start_matches('/'));
        let builder = self.inner.client.request(method, url);

        match &self.inner.username {
            Some(username) => builder.basic_auth(
                username,
                self.inner
                    .password
                    .as_ref()
                    .map(|password| password.expose_secret().to_string()),
            ),
            None => builder,
        }
    }

    async fn put_refresh_interval(&self, index_name: &str, interval: &str) -> EtlResult<()> {
        let response = self
            .request(Method::PUT, &format!("{index_name}/_settings"))
            .json(&json!({ "index": { "refresh_interval": interval } }))
            .send()
            .await?;
        ensure_success(response, "Failed to update the index refresh interval").await?;

        debug!(index_name, interval, "updated refresh interval");

        Ok(())
    }
}

impl BulkGateway for ElasticsearchGateway {
    async fn is_healthy(&self) -> bool {
        match self.request(Method::HEAD, "").send().await {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                warn!(error = %err, "search engine ping failed");
                false
            }
        }
    }

    async fn index_exists(&self, index_name: &str) -> EtlResult<bool> {
        let response = self.request(Method::HEAD, index_name).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(etl_error!(
                ErrorKind::DestinationQueryFailed,
                "Failed to check index existence",
                format!("index `{index_name}` returned status {status}")
            )),
        }
    }

    async fn create_index(&self, index: &IndexConfig) -> EtlResult<()> {
        let response = self.request(Method::DELETE, &index.name).send().await?;
        if response.status() != StatusCode::NOT_FOUND {
            ensure_success(response, "Failed to delete index").await?;
            info!(index_name = %index.name, "deleted existing index");
        }

        let response = self
            .request(Method::PUT, &index.name)
            .json(&json!({ "settings": index.settings }))
            .send()
            .await?;
        ensure_success(response, "Failed to create index").await?;

        let response = self
            .request(Method::PUT, &format!("{}/_mapping", index.name))
            .json(&index.mapping)
            .send()
            .await?;
        ensure_success(response, "Failed to put index mapping").await?;

        info!(index_name = %index.name, "created index");

        Ok(())
    }

    async fn relax_refresh_for_bulk_load(&self, index_name: &str) -> EtlResult<()> {
        self.put_refresh_interval(index_name, DISABLED_REFRESH_INTERVAL)
            .await
    }

    async fn restore_refresh_interval(&self, index_name: &str) -> EtlResult<()> {
        let interval = self.inner.refresh_interval.clone();
        self.put_refresh_interval(index_name, &interval).await
    }

    fn bulk_upsert(&self, index_name: &str, documents: Vec<Document>) -> EtlResult<BulkFuture> {
        let submitted = documents.len();
        let body = encode_bulk_body(&documents)?;
        let request = self
            .request(Method::POST, &format!("{index_name}/_bulk"))
            .header(reqwest::header::CONTENT_TYPE, NDJSON_CONTENT_TYPE)
            .body(body);

        Ok(Box::pin(async move {
            let response = request.send().await?;
            let response = ensure_success(response, "Bulk request failed").await?;
            let bulk: BulkResponse = response.json().await?;

            Ok(bulk.into_outcome(submitted))
        }))
    }
}

/// Encodes one `index` action per document, each followed by its source.
fn encode_bulk_body(documents: &[Document]) -> EtlResult<String> {
    let mut body = String::new();
    for document in documents {
        let action = json!({ "index": { "_id": document.id() } });
        body.push_str(&serde_json::to_string(&action)?);
        body.push('\n');
        body.push_str(&serde_json::to_string(document.fields())?);
        body.push('\n');
    }

    Ok(body)
}

async fn ensure_success(response: Response, description: &'static str) -> EtlResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let kind = if status == StatusCode::NOT_FOUND {
        ErrorKind::DestinationIndexMissing
    } else {
        ErrorKind::DestinationQueryFailed
    };

    Err(etl_error!(kind, description, format!("status {status}: {body}")))
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<BulkResponseItem>,
}

#[derive(Debug, Deserialize)]
struct BulkResponseItem {
    #[serde(alias = "create", alias = "update")]
    index: BulkItemResult,
}

#[derive(Debug, Deserialize)]
struct BulkItemResult {
    #[serde(rename = "_id", default)]
    id: String,
    error: Option<BulkItemErrorBody>,
}

#[derive(Debug, Deserialize)]
struct BulkItemErrorBody {
    #[serde(rename = "type", default)]
    error_type: String,
    #[serde(default)]
    reason: String,
}

impl BulkResponse {
    fn into_outcome(self, submitted: usize) -> BulkOutcome {
        let failed_items = self
            .items
            .into_iter()
            .filter_map(|item| {
                let id = item.index.id;
                item.index.error.map(|error| BulkItemError {
                    id,
                    error_type: error.error_type,
                    reason: error.reason,
                })
            })
            .collect();

        BulkOutcome {
            errors: self.errors,
            submitted,
            failed_items,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::types::Cell;

    #[test]
    fn bulk_body_has_action_and_source_lines() {
        let mut fields = BTreeMap::new();
        fields.insert("id".to_string(), Cell::I64(7));
        fields.insert("name".to_string(), Cell::from("lamp"));
        let body = encode_bulk_body(&[Document::new("7".to_string(), fields)]).unwrap();

        assert_eq!(
            body,
            "{\"index\":{\"_id\":\"7\"}}\n{\"id\":7,\"name\":\"lamp\"}\n"
        );
    }

    #[test]
    fn bulk_response_keeps_failed_items_only() {
        let response: BulkResponse = serde_json::from_value(json!({
            "took": 3,
            "errors": true,
            "items": [
                { "index": { "_id": "1", "status": 201 } },
                { "index": { "_id": "2", "status": 409, "error": {
                    "type": "version_conflict_engine_exception",
                    "reason": "version conflict"
                } } }
            ]
        }))
        .unwrap();

        let outcome = response.into_outcome(2);
        assert!(outcome.errors);
        assert_eq!(outcome.failed_items.len(), 1);
        assert!(outcome.failed_items[0].is_version_conflict());
        assert_eq!(outcome.failed_items[0].id, "2");
    }
}
