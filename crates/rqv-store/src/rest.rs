//! PostgREST-style HTTP metadata store.
//!
//! The backing service answers in three shapes depending on deployment:
//! a bare JSON body, a `{"data": ...}` envelope, or an `{"error": ...}`
//! object (sometimes with a 200 status). All three are normalised into
//! `StoreResult<T>` here and nowhere else.
//!
//! Tables:
//! - `samples` keyed by `sample_id`
//! - `requeue_items` keyed by `item_id`
//! - `retrain_trigger_state` single row with `id = 1`

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use rqv_models::{QaFlag, RequeueItem, RetrainTriggerState, SampleId, SampleRecord};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info_span, Instrument};

use crate::error::{StoreError, StoreResult};
use crate::metrics::record_request;
use crate::retry::{with_retry, RetryConfig};
use crate::store::MetadataStore;

const SAMPLES: &str = "samples";
const REQUEUE_ITEMS: &str = "requeue_items";
const TRIGGER_STATE: &str = "retrain_trigger_state";
const TRIGGER_STATE_ROW: u32 = 1;

/// REST store configuration.
#[derive(Debug, Clone)]
pub struct RestStoreConfig {
    /// Base URL, e.g. `https://db.example.com/rest/v1`
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub retry: RetryConfig,
}

impl RestStoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> StoreResult<Self> {
        let base_url = std::env::var("METADATA_STORE_URL")
            .map_err(|_| StoreError::config("METADATA_STORE_URL must be set for the REST store"))?;
        if base_url.trim().is_empty() {
            return Err(StoreError::config("METADATA_STORE_URL cannot be empty"));
        }

        let timeout_secs: u64 = std::env::var("METADATA_STORE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: std::env::var("METADATA_STORE_API_KEY")
                .ok()
                .filter(|k| !k.is_empty()),
            timeout: Duration::from_secs(timeout_secs),
            connect_timeout: Duration::from_secs(5),
            retry: RetryConfig::from_env(),
        })
    }
}

/// Error payload variants seen from the service.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorBody {
    Message { message: String },
    Text(String),
    Other(serde_json::Value),
}

impl ErrorBody {
    fn into_message(self) -> String {
        match self {
            ErrorBody::Message { message } => message,
            ErrorBody::Text(text) => text,
            ErrorBody::Other(value) => value.to_string(),
        }
    }
}

/// Decode a response body in any of the supported shapes.
fn decode_envelope<T: DeserializeOwned>(body: &str) -> StoreResult<T> {
    let mut value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| StoreError::invalid_response(format!("{}: {}", e, truncate(body))))?;

    if let Some(object) = value.as_object_mut() {
        if let Some(error) = object.remove("error").filter(|e| !e.is_null()) {
            let message = serde_json::from_value::<ErrorBody>(error)
                .map(ErrorBody::into_message)
                .unwrap_or_else(|e| e.to_string());
            return Err(StoreError::request_failed(message));
        }
        if let Some(data) = object.remove("data") {
            return Ok(serde_json::from_value(data)?);
        }
    }

    Ok(serde_json::from_value(value)?)
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(200) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

#[derive(Serialize)]
struct ConsumedPatch {
    consumed: bool,
}

#[derive(Serialize, Deserialize)]
struct TriggerStateRow {
    id: u32,
    #[serde(flatten)]
    state: RetrainTriggerState,
}

/// `MetadataStore` over a PostgREST-style HTTP API.
#[derive(Clone)]
pub struct RestMetadataStore {
    http: Client,
    config: RestStoreConfig,
}

impl RestMetadataStore {
    pub fn new(config: RestStoreConfig) -> StoreResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(concat!("rqv-store/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { http, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> StoreResult<Self> {
        Self::new(RestStoreConfig::from_env()?)
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{}", self.config.base_url, table)
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.config.api_key {
            Some(key) => builder.header("apikey", key).bearer_auth(key),
            None => builder,
        }
    }

    /// Send a request with retry, metrics and a tracing span; returns the body text.
    async fn send<F>(&self, operation: &str, table: &str, build: F) -> StoreResult<String>
    where
        F: Fn() -> RequestBuilder,
    {
        let span = info_span!("store_request", operation = %operation, table = %table);
        let start = Instant::now();

        let result = with_retry(&self.config.retry, operation, || async {
            let response = self.authorize(build()).send().await?;
            let status = response.status();
            let body = response.text().await?;
            if status.is_success() {
                Ok(body)
            } else {
                Err(StoreError::from_http_status(status.as_u16(), body))
            }
        })
        .instrument(span)
        .await;

        let status = match &result {
            Ok(_) => StatusCode::OK.as_u16(),
            Err(e) => e.http_status().unwrap_or(500),
        };
        record_request(operation, status, start.elapsed().as_millis() as f64);

        result
    }

    async fn fetch_rows<T: DeserializeOwned>(
        &self,
        operation: &str,
        table: &str,
        query: &[(&str, String)],
    ) -> StoreResult<Vec<T>> {
        let url = self.table_url(table);
        let body = self
            .send(operation, table, || self.http.get(&url).query(query))
            .await?;
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }
        decode_envelope(&body)
    }

    /// Writes return `return=minimal` bodies; only error envelopes matter.
    fn check_write_body(body: &str) -> StoreResult<()> {
        if body.trim().is_empty() {
            return Ok(());
        }
        decode_envelope::<serde_json::Value>(body).map(|_| ())
    }
}

#[async_trait]
impl MetadataStore for RestMetadataStore {
    async fn upsert_sample(&self, record: &SampleRecord) -> StoreResult<()> {
        let url = self.table_url(SAMPLES);
        let payload = serde_json::to_value(record)?;
        let body = self
            .send("upsert_sample", SAMPLES, || {
                self.http
                    .post(&url)
                    .query(&[("on_conflict", "sample_id")])
                    .header("Prefer", "resolution=merge-duplicates,return=minimal")
                    .json(&payload)
            })
            .await?;
        debug!(sample_id = %record.sample_id, "Upserted sample record");
        Self::check_write_body(&body)
    }

    async fn get_sample(&self, sample_id: &SampleId) -> StoreResult<Option<SampleRecord>> {
        let rows: Vec<SampleRecord> = self
            .fetch_rows(
                "get_sample",
                SAMPLES,
                &[
                    ("sample_id", format!("eq.{}", sample_id)),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn query_samples(
        &self,
        since: DateTime<Utc>,
        flag: Option<QaFlag>,
    ) -> StoreResult<Vec<SampleRecord>> {
        let mut query = vec![
            (
                "evaluated_at",
                format!("gte.{}", since.to_rfc3339_opts(SecondsFormat::Micros, true)),
            ),
            ("order", "evaluated_at.asc,sample_id.asc".to_string()),
        ];
        if let Some(flag) = flag {
            query.push(("metrics->>qa_flag", format!("eq.{}", flag.as_str())));
        }
        self.fetch_rows("query_samples", SAMPLES, &query).await
    }

    async fn insert_requeue_item(&self, item: &RequeueItem) -> StoreResult<bool> {
        if self.pending_requeue_item(&item.sample_id).await?.is_some() {
            return Ok(false);
        }

        let url = self.table_url(REQUEUE_ITEMS);
        let payload = serde_json::to_value(item)?;
        match self
            .send("insert_requeue_item", REQUEUE_ITEMS, || {
                self.http
                    .post(&url)
                    .header("Prefer", "return=minimal")
                    .json(&payload)
            })
            .await
        {
            Ok(body) => Self::check_write_body(&body).map(|_| true),
            // A partial unique index on (sample_id) where not consumed raced us
            Err(StoreError::AlreadyExists(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn pending_requeue_item(&self, sample_id: &SampleId) -> StoreResult<Option<RequeueItem>> {
        let rows: Vec<RequeueItem> = self
            .fetch_rows(
                "pending_requeue_item",
                REQUEUE_ITEMS,
                &[
                    ("sample_id", format!("eq.{}", sample_id)),
                    ("consumed", "is.false".to_string()),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn mark_requeue_consumed(&self, item_id: &str) -> StoreResult<()> {
        let url = self.table_url(REQUEUE_ITEMS);
        let body = self
            .send("mark_requeue_consumed", REQUEUE_ITEMS, || {
                self.http
                    .patch(&url)
                    .query(&[("item_id", format!("eq.{}", item_id))])
                    .header("Prefer", "return=minimal")
                    .json(&ConsumedPatch { consumed: true })
            })
            .await?;
        Self::check_write_body(&body)
    }

    async fn load_trigger_state(&self) -> StoreResult<Option<RetrainTriggerState>> {
        let rows: Vec<TriggerStateRow> = self
            .fetch_rows(
                "load_trigger_state",
                TRIGGER_STATE,
                &[("id", format!("eq.{}", TRIGGER_STATE_ROW))],
            )
            .await?;
        Ok(rows.into_iter().next().map(|row| row.state))
    }

    async fn save_trigger_state(&self, state: &RetrainTriggerState) -> StoreResult<()> {
        let url = self.table_url(TRIGGER_STATE);
        let payload = serde_json::to_value(TriggerStateRow {
            id: TRIGGER_STATE_ROW,
            state: state.clone(),
        })?;
        let body = self
            .send("save_trigger_state", TRIGGER_STATE, || {
                self.http
                    .post(&url)
                    .query(&[("on_conflict", "id")])
                    .header("Prefer", "resolution=merge-duplicates,return=minimal")
                    .json(&payload)
            })
            .await?;
        Self::check_write_body(&body)
    }
}
