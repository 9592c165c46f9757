//! Cloud Bigtable over the Data API v2 REST surface.
//!
//! Only two RPCs are used:
//! - `tables/*:mutateRow` with `setCell` mutations (server-assigned timestamps)
//! - `tables/*:readRows` for a single row key, latest cell per column
//!
//! Row keys, qualifiers and values travel base64-encoded, as the JSON mapping of
//! `bytes` fields requires. Authentication is a bearer token, either configured
//! statically or fetched from the GCE metadata server and cached until shortly
//! before it expires.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::BigtableConfig;
use crate::error::{DashError, DashResult};
use crate::store::{Cell, Row, RowStore};

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Tokens are refreshed this long before they expire
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug)]
enum TokenSource {
    Static(String),
    Metadata(Mutex<Option<(String, Instant)>>),
}

/// Bigtable client bound to one project and instance.
#[derive(Debug)]
pub struct BigtableStore {
    http: Client,
    endpoint: String,
    project_id: String,
    instance_id: String,
    token: TokenSource,
}

impl BigtableStore {
    /// Build a client from configuration
    pub fn new(config: &BigtableConfig, project_id: &str) -> DashResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        let token = match config.access_token.as_deref() {
            Some(token) if !token.is_empty() => TokenSource::Static(token.to_string()),
            _ => TokenSource::Metadata(Mutex::new(None)),
        };

        info!(
            project = project_id,
            instance = %config.instance_id,
            endpoint = %config.endpoint,
            "Bigtable client ready"
        );

        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            project_id: project_id.to_string(),
            instance_id: config.instance_id.clone(),
            token,
        })
    }

    fn table_url(&self, table: &str, method: &str) -> String {
        format!(
            "{}/v2/projects/{}/instances/{}/tables/{}:{}",
            self.endpoint, self.project_id, self.instance_id, table, method
        )
    }

    async fn bearer(&self) -> DashResult<String> {
        match &self.token {
            TokenSource::Static(token) => Ok(token.clone()),
            TokenSource::Metadata(cache) => {
                let mut cache = cache.lock().await;
                if let Some((token, expires)) = cache.as_ref() {
                    if Instant::now() < *expires {
                        return Ok(token.clone());
                    }
                }

                debug!("fetching access token from metadata server");
                let response = self
                    .http
                    .get(METADATA_TOKEN_URL)
                    .header("Metadata-Flavor", "Google")
                    .send()
                    .await?
                    .error_for_status()?;
                let fresh: MetadataToken = response.json().await?;
                let lifetime = Duration::from_secs(fresh.expires_in)
                    .saturating_sub(TOKEN_EXPIRY_MARGIN);
                *cache = Some((fresh.access_token.clone(), Instant::now() + lifetime));
                Ok(fresh.access_token)
            }
        }
    }

    async fn post(&self, table: &str, method: &str, body: &Value) -> DashResult<Value> {
        let token = self.bearer().await?;
        let response = self
            .http
            .post(self.table_url(table, method))
            .bearer_auth(token)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(DashError::Api {
                status: status.as_u16(),
                table: table.to_string(),
                message: text,
            });
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| DashError::Decode(e.to_string()))
    }
}

/// JSON body of a `mutateRow` request
pub fn mutate_row_body(row_key: &str, cells: &[Cell]) -> Value {
    let mutations: Vec<Value> = cells
        .iter()
        .map(|cell| {
            json!({
                "setCell": {
                    "familyName": cell.family,
                    "columnQualifier": BASE64.encode(&cell.qualifier),
                    "timestampMicros": "-1",
                    "value": BASE64.encode(&cell.value),
                }
            })
        })
        .collect();

    json!({
        "rowKey": BASE64.encode(row_key),
        "mutations": mutations,
    })
}

/// JSON body of a single-row `readRows` request
pub fn read_row_body(row_key: &str) -> Value {
    json!({
        "rows": { "rowKeys": [BASE64.encode(row_key)] },
        "rowsLimit": "1",
        "filter": { "cellsPerColumnLimitFilter": 1 },
    })
}

fn decode_text(field: &Value) -> DashResult<Option<String>> {
    match field.as_str() {
        Some(encoded) => {
            let bytes = BASE64.decode(encoded)?;
            String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| DashError::Decode(e.to_string()))
        }
        None => Ok(None),
    }
}

/// Rebuild the requested row from `readRows` response chunks
///
/// Chunks inherit row key, family and qualifier from the previous chunk, and a
/// large value may arrive split over several chunks flagged with `valueSize`.
pub fn parse_read_rows(response: &Value, row_key: &str) -> DashResult<Option<Row>> {
    let messages: Vec<&Value> = match response {
        Value::Array(items) => items.iter().collect(),
        Value::Null => Vec::new(),
        other => vec![other],
    };

    let mut row: Option<Row> = None;
    let mut pending = Row::new(row_key);
    let mut current_key: Option<String> = None;
    let mut family = String::new();
    let mut qualifier = String::new();
    let mut value: Vec<u8> = Vec::new();

    for message in messages {
        let Some(chunks) = message.get("chunks").and_then(Value::as_array) else {
            continue;
        };
        for chunk in chunks {
            if chunk.get("resetRow").and_then(Value::as_bool) == Some(true) {
                pending = Row::new(row_key);
                value.clear();
                continue;
            }
            if let Some(key) = decode_text(&chunk["rowKey"])? {
                current_key = Some(key);
            }
            if let Some(name) = chunk.get("familyName").and_then(Value::as_str) {
                family = name.to_string();
            }
            if let Some(q) = decode_text(&chunk["qualifier"])? {
                qualifier = q;
            }
            if let Some(piece) = chunk.get("value").and_then(Value::as_str) {
                value.extend(BASE64.decode(piece)?);
            }

            let split = chunk
                .get("valueSize")
                .and_then(Value::as_i64)
                .is_some_and(|size| size > 0);
            if !split && !qualifier.is_empty() {
                let text = String::from_utf8(std::mem::take(&mut value))
                    .map_err(|e| DashError::Decode(e.to_string()))?;
                pending.set(&Cell {
                    family: family.clone(),
                    qualifier: qualifier.clone(),
                    value: text,
                });
            }

            if chunk.get("commitRow").and_then(Value::as_bool) == Some(true) {
                if current_key.as_deref() == Some(row_key) {
                    row = Some(std::mem::replace(&mut pending, Row::new(row_key)));
                } else {
                    pending = Row::new(row_key);
                }
            }
        }
    }

    Ok(row)
}

#[async_trait]
impl RowStore for BigtableStore {
    async fn mutate_row(&self, table: &str, row_key: &str, cells: &[Cell]) -> DashResult<()> {
        let body = mutate_row_body(row_key, cells);
        self.post(table, "mutateRow", &body).await?;
        debug!(table, row_key, cells = cells.len(), "row mutated");
        Ok(())
    }

    async fn read_row(&self, table: &str, row_key: &str) -> DashResult<Option<Row>> {
        let response = self.post(table, "readRows", &read_row_body(row_key)).await?;
        parse_read_rows(&response, row_key)
    }
}
