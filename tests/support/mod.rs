//! Shared fixtures: a fake Elasticsearch and a ready-to-run pipeline.

#![allow(dead_code)]

pub mod fake_redis;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, head, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use movies_etl::config::ElasticConfig;
use movies_etl::elastic::IndexWriter;
use movies_etl::extract::memory::MemorySource;
use movies_etl::extract::{ChangeSource, Extractor};
use movies_etl::pipeline::Pipeline;
use movies_etl::retry::RetryPolicy;
use movies_etl_core::checkpoint::memory::MemoryStorage;
use movies_etl_core::checkpoint::{Checkpoint, StateStorage};
use movies_etl_core::models::FilmworkRow;

pub const INDEX: &str = "movies";
pub const KEY: &str = "modified";

#[derive(Default)]
struct EsState {
    indices: BTreeMap<String, Value>,
    docs: BTreeMap<String, Value>,
    bulk_calls: usize,
    failing_bulks: usize,
    reject_bulks: bool,
}

type Shared = Arc<Mutex<EsState>>;

/// Just enough of the Elasticsearch REST API for the writer.
///
/// Bulk `index` actions upsert by `_id`. Failures can be injected per call.
#[derive(Clone)]
pub struct FakeElastic {
    state: Shared,
    pub url: String,
}

impl FakeElastic {
    pub async fn start() -> Self {
        let state = Shared::default();
        let app = Router::new()
            .route("/", get(root))
            .route("/_bulk", post(bulk))
            .route("/{index}", head(index_exists).put(create_index))
            .route("/{index}/_count", get(count))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            state,
            url: format!("http://{}", addr),
        }
    }

    /// Answer the next `n` bulk requests with 503.
    pub fn fail_bulks(&self, n: usize) {
        self.state.lock().unwrap().failing_bulks = n;
    }

    /// Report every item of following bulk requests as rejected.
    pub fn reject_bulks(&self, reject: bool) {
        self.state.lock().unwrap().reject_bulks = reject;
    }

    pub fn bulk_calls(&self) -> usize {
        self.state.lock().unwrap().bulk_calls
    }

    pub fn documents(&self) -> BTreeMap<String, Value> {
        self.state.lock().unwrap().docs.clone()
    }

    pub fn document(&self, id: Uuid) -> Option<Value> {
        self.state.lock().unwrap().docs.get(&id.to_string()).cloned()
    }

    pub fn document_ids(&self) -> BTreeSet<String> {
        self.state.lock().unwrap().docs.keys().cloned().collect()
    }

    pub fn index_body(&self, index: &str) -> Option<Value> {
        self.state.lock().unwrap().indices.get(index).cloned()
    }
}

async fn root() -> Json<Value> {
    Json(json!({ "name": "fake", "tagline": "You Know, for Search" }))
}

async fn index_exists(State(state): State<Shared>, Path(index): Path<String>) -> StatusCode {
    if state.lock().unwrap().indices.contains_key(&index) {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn create_index(
    State(state): State<Shared>,
    Path(index): Path<String>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let mut state = state.lock().unwrap();
    if state.indices.contains_key(&index) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": { "type": "resource_already_exists_exception", "index": index },
                "status": 400
            })),
        );
    }
    state.indices.insert(index.clone(), body);
    (
        StatusCode::OK,
        Json(json!({ "acknowledged": true, "index": index })),
    )
}

async fn count(State(state): State<Shared>, Path(_index): Path<String>) -> Json<Value> {
    Json(json!({ "count": state.lock().unwrap().docs.len() }))
}

async fn bulk(State(state): State<Shared>, body: String) -> (StatusCode, Json<Value>) {
    let mut state = state.lock().unwrap();
    state.bulk_calls += 1;

    if state.failing_bulks > 0 {
        state.failing_bulks -= 1;
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "cluster unavailable", "status": 503 })),
        );
    }

    let lines: Vec<&str> = body.lines().filter(|l| !l.trim().is_empty()).collect();
    let mut items = Vec::new();
    let mut accepted = Vec::new();
    for pair in lines.chunks(2) {
        let action: Value = serde_json::from_str(pair[0]).unwrap();
        let id = action["index"]["_id"].as_str().unwrap().to_string();
        let doc: Value = serde_json::from_str(pair[1]).unwrap();

        if state.reject_bulks {
            items.push(json!({ "index": {
                "_id": id,
                "status": 400,
                "error": { "type": "mapper_parsing_exception", "reason": "failed to parse" }
            }}));
        } else {
            items.push(json!({ "index": { "_id": id, "status": 200 } }));
            accepted.push((id, doc));
        }
    }
    state.docs.extend(accepted);

    let errors = state.reject_bulks;
    (
        StatusCode::OK,
        Json(json!({ "took": 1, "errors": errors, "items": items })),
    )
}

/// Millisecond delays, retrying forever unless `max_attempts` is set.
pub fn fast_retry(max_attempts: Option<u32>) -> RetryPolicy {
    RetryPolicy::new(
        Duration::from_millis(1),
        2.0,
        Duration::from_millis(5),
        max_attempts,
    )
}

pub fn ts(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}

pub fn film(id: u128, modified: &str) -> FilmworkRow {
    FilmworkRow {
        id: Uuid::from_u128(id),
        title: Some(format!("Film {}", id)),
        description: Some(format!("About film {}", id)),
        imdb_rating: Some(7.5),
        modified: ts(modified),
        director: Some("Jane Doe".to_string()),
        actors_names: Some(vec!["Ann".to_string()]),
        writers_names: Some(vec!["Bob".to_string()]),
        actors: None,
        writers: None,
        genres: Some(vec!["Drama".to_string()]),
    }
}

pub struct Harness {
    pub source: Arc<MemorySource>,
    pub es: FakeElastic,
    pub storage: MemoryStorage,
    pub pipeline: Pipeline,
}

impl Harness {
    pub async fn new(batch_size: usize) -> Self {
        Self::with(batch_size, fast_retry(None), MemoryStorage::new()).await
    }

    pub async fn with(batch_size: usize, retry: RetryPolicy, storage: MemoryStorage) -> Self {
        let es = FakeElastic::start().await;
        let source = Arc::new(MemorySource::new());
        let pipeline = build_pipeline(
            &es,
            Box::new(source.clone()),
            batch_size,
            retry,
            Box::new(storage.clone()),
        );
        Self {
            source,
            es,
            storage,
            pipeline,
        }
    }

    /// The raw watermark string in checkpoint storage.
    pub fn stored(&self) -> Option<String> {
        self.storage.snapshot().get(KEY).cloned()
    }
}

pub fn build_pipeline(
    es: &FakeElastic,
    source: Box<dyn ChangeSource>,
    batch_size: usize,
    retry: RetryPolicy,
    storage: Box<dyn StateStorage>,
) -> Pipeline {
    let config = ElasticConfig {
        url: es.url.clone(),
        index: INDEX.to_string(),
        timeout_secs: 5,
    };
    let writer = IndexWriter::new(&config, retry, Checkpoint::new(storage, KEY)).unwrap();
    let extractor = Extractor::new(source, batch_size);
    Pipeline::new(extractor, writer, Duration::from_millis(10))
}
