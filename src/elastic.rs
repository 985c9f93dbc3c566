//! Elasticsearch index writer.
//!
//! [`IndexWriter`] talks to the cluster over its REST API and owns the
//! [`Checkpoint`]: the watermark is only ever advanced here, right after a
//! bulk request has been fully accepted. Everything else reads it through
//! [`IndexWriter::watermark`].
//!
//! Requests that fail on transport or with 429/5xx are retried with the
//! configured [`RetryPolicy`]. A bulk response that reports item errors is
//! not retried; the cycle aborts and the same rows come back next time.

use std::time::Duration;

use reqwest::StatusCode;
use serde_json::{json, Value};

use movies_etl_core::checkpoint::Checkpoint;
use movies_etl_core::transform::BulkBatch;
use movies_etl_core::Watermark;

use crate::config::ElasticConfig;
use crate::error::{Result, SyncError};
use crate::retry::RetryPolicy;

/// Settings and mappings the index is created with.
pub fn index_schema() -> Value {
    json!({
        "settings": {
            "refresh_interval": "1s",
            "analysis": {
                "filter": {
                    "english_stop": { "type": "stop", "stopwords": "_english_" },
                    "english_stemmer": { "type": "stemmer", "language": "english" },
                    "english_possessive_stemmer": { "type": "stemmer", "language": "possessive_english" },
                    "russian_stop": { "type": "stop", "stopwords": "_russian_" },
                    "russian_stemmer": { "type": "stemmer", "language": "russian" }
                },
                "analyzer": {
                    "ru_en": {
                        "tokenizer": "standard",
                        "filter": [
                            "lowercase",
                            "english_stop",
                            "english_stemmer",
                            "english_possessive_stemmer",
                            "russian_stop",
                            "russian_stemmer"
                        ]
                    }
                }
            }
        },
        "mappings": {
            "dynamic": "strict",
            "properties": {
                "id": { "type": "keyword" },
                "imdb_rating": { "type": "float" },
                "genre": { "type": "keyword" },
                "title": {
                    "type": "text",
                    "analyzer": "ru_en",
                    "fields": { "raw": { "type": "keyword" } }
                },
                "description": { "type": "text", "analyzer": "ru_en" },
                "director": { "type": "text", "analyzer": "ru_en" },
                "actors_names": { "type": "text", "analyzer": "ru_en" },
                "writers_names": { "type": "text", "analyzer": "ru_en" },
                "actors": {
                    "type": "nested",
                    "dynamic": "strict",
                    "properties": {
                        "id": { "type": "keyword" },
                        "name": { "type": "text", "analyzer": "ru_en" }
                    }
                },
                "writers": {
                    "type": "nested",
                    "dynamic": "strict",
                    "properties": {
                        "id": { "type": "keyword" },
                        "name": { "type": "text", "analyzer": "ru_en" }
                    }
                }
            }
        }
    })
}

pub struct IndexWriter {
    client: reqwest::Client,
    base_url: String,
    index: String,
    retry: RetryPolicy,
    checkpoint: Checkpoint,
}

impl IndexWriter {
    pub fn new(config: &ElasticConfig, retry: RetryPolicy, checkpoint: Checkpoint) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            index: config.index.clone(),
            retry,
            checkpoint,
        })
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn checkpoint_backend(&self) -> &str {
        self.checkpoint.backend()
    }

    /// The watermark the next cycle starts from.
    pub async fn watermark(&self) -> Watermark {
        self.checkpoint.retrieve().await
    }

    /// The stored watermark, if any, without initializing the checkpoint.
    pub async fn stored_watermark(&self) -> Result<Option<Watermark>> {
        Ok(self.checkpoint.stored().await?)
    }

    fn index_url(&self) -> String {
        format!("{}/{}", self.base_url, self.index)
    }

    /// Wait until the cluster answers.
    pub async fn ping(&self) -> Result<()> {
        self.retry
            .run("elasticsearch ping", SyncError::is_transient, || self.ping_once())
            .await?;
        Ok(())
    }

    async fn ping_once(&self) -> Result<()> {
        let response = self.client.get(format!("{}/", self.base_url)).send().await?;
        check_status(response).await?;
        Ok(())
    }

    /// Create the index with [`index_schema`] unless it exists.
    ///
    /// Returns whether the index was created by this call.
    pub async fn ensure_index(&self) -> Result<bool> {
        let exists = self
            .retry
            .run("elasticsearch index exists", SyncError::is_transient, || {
                self.index_exists_once()
            })
            .await?;
        if exists {
            tracing::debug!(index = %self.index, "index exists");
            return Ok(false);
        }

        let created = self
            .retry
            .run("elasticsearch create index", SyncError::is_transient, || {
                self.create_index_once()
            })
            .await?;
        if created {
            tracing::info!(index = %self.index, "created index");
        }
        Ok(created)
    }

    async fn index_exists_once(&self) -> Result<bool> {
        let response = self.client.head(self.index_url()).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            _ => check_status(response).await.map(|_| true),
        }
    }

    async fn create_index_once(&self) -> Result<bool> {
        let response = self
            .client
            .put(self.index_url())
            .json(&index_schema())
            .send()
            .await?;

        match check_status(response).await {
            Ok(_) => Ok(true),
            // Another instance created it between our HEAD and PUT.
            Err(SyncError::ElasticStatus { status: 400, body })
                if body.contains("resource_already_exists_exception") =>
            {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Write one batch, then advance the checkpoint to `candidate`.
    ///
    /// The checkpoint is untouched when any part of the write fails.
    pub async fn write_batch(&self, batch: &BulkBatch, candidate: Option<Watermark>) -> Result<()> {
        if !batch.is_empty() {
            self.ping().await?;

            let response = self
                .retry
                .run("elasticsearch bulk", SyncError::is_transient, || {
                    self.bulk_once(&batch.payload)
                })
                .await?;

            if let Some((failed, first_error)) = bulk_failures(&response) {
                return Err(SyncError::BulkRejected {
                    failed,
                    first_error,
                });
            }
            tracing::info!(index = %self.index, documents = batch.len(), "bulk write accepted");
        }

        if let Some(candidate) = candidate {
            self.checkpoint.persist(candidate).await?;
        }
        Ok(())
    }

    async fn bulk_once(&self, payload: &str) -> Result<Value> {
        let response = self
            .client
            .post(format!("{}/_bulk", self.base_url))
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(payload.to_string())
            .send()
            .await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }

    /// Number of documents in the index.
    pub async fn document_count(&self) -> Result<u64> {
        let response = self
            .client
            .get(format!("{}/_count", self.index_url()))
            .send()
            .await?;
        let body: Value = check_status(response).await?.json().await?;
        Ok(body.get("count").and_then(Value::as_u64).unwrap_or(0))
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SyncError::ElasticStatus {
        status: status.as_u16(),
        body,
    })
}

/// Count of rejected items and the first reason, when the bulk response
/// reports errors.
fn bulk_failures(response: &Value) -> Option<(usize, String)> {
    if !response.get("errors").and_then(Value::as_bool).unwrap_or(false) {
        return None;
    }

    let errors: Vec<&Value> = response
        .get("items")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_object()?.values().next()?.get("error"))
                .collect()
        })
        .unwrap_or_default();

    let first_error = errors
        .first()
        .map(|e| match (e.get("type"), e.get("reason")) {
            (Some(Value::String(kind)), Some(Value::String(reason))) => {
                format!("{}: {}", kind, reason)
            }
            _ => e.to_string(),
        })
        .unwrap_or_else(|| "unknown bulk error".to_string());

    Some((errors.len().max(1), first_error))
}
