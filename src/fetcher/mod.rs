//! Notification feed fetcher.
//!
//! Calls the backend's `get_notifications` RPC (a Supabase PostgREST
//! function) and turns the raw rows into [`Event`]s. Only first-blood rows
//! with a parseable timestamp survive.
//!
//! Failure of the whole request is soft: it is logged and the caller gets an
//! empty list, which the reconciler treats as "unknown" rather than "no
//! events exist".

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::config::BackendConfig;
use crate::event::{Event, UNKNOWN};

const RPC_PATH: &str = "/rest/v1/rpc/get_notifications";

/// `notif_type` values that denote a first blood (compared lowercased).
const FIRST_BLOOD_TYPES: [&str; 4] = ["first_blood", "firstblood", "first-blood", "first"];

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("backend returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected response body: {0}")]
    Decode(String),
}

/// Anything that can produce the current batch of first-blood events.
///
/// Implementations never fail: a broken backend yields an empty batch.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn fetch_events(&self) -> Vec<Event>;
}

/// HTTP client for the notifications RPC.
pub struct NotificationFeed {
    client: reqwest::Client,
    url: String,
    key: String,
    limit: u32,
}

impl NotificationFeed {
    pub fn new(config: &BackendConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: format!("{}{}", config.url.trim_end_matches('/'), RPC_PATH),
            key: config.key.clone(),
            limit: config.limit,
        })
    }

    /// One request for the most recent `limit` notification rows.
    pub async fn fetch_rows(&self) -> Result<Vec<Value>, FetchError> {
        let body = serde_json::json!({
            "p_limit": self.limit,
            "p_offset": 0,
        });

        let resp = self
            .client
            .post(&self.url)
            .header("apikey", &self.key)
            .bearer_auth(&self.key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status >= 400 {
            let body = resp.text().await.unwrap_or_default();
            return Err(FetchError::Status { status, body });
        }

        match resp.json::<Value>().await? {
            Value::Array(rows) => Ok(rows),
            other => Err(FetchError::Decode(format!(
                "expected JSON array, got {}",
                type_name(&other)
            ))),
        }
    }
}

#[async_trait]
impl EventSource for NotificationFeed {
    async fn fetch_events(&self) -> Vec<Event> {
        match self.fetch_rows().await {
            Ok(rows) => {
                let total = rows.len();
                let events = parse_rows(&rows);
                debug!(rows = total, first_bloods = events.len(), "notifications fetched");
                events
            }
            Err(e) => {
                error!(error = %e, url = %self.url, "error fetching notifications");
                Vec::new()
            }
        }
    }
}

/// Filter and normalize raw notification rows, preserving backend order.
pub fn parse_rows(rows: &[Value]) -> Vec<Event> {
    rows.iter().filter_map(parse_row).collect()
}

fn parse_row(row: &Value) -> Option<Event> {
    if !row.is_object() {
        return None;
    }

    let kind = field_str(row, "notif_type")?.to_lowercase();
    if !FIRST_BLOOD_TYPES.contains(&kind.as_str()) {
        return None;
    }

    let raw_time = field_str(row, "notif_created_at").or_else(|| field_str(row, "created_at"))?;

    let subject = field_str(row, "notif_username").unwrap_or_else(|| UNKNOWN.to_string());
    let title = field_str(row, "notif_challenge_title").unwrap_or_else(|| UNKNOWN.to_string());
    let category = field_str(row, "notif_category").unwrap_or_else(|| UNKNOWN.to_string());

    let event = Event::new(&subject, &title, &category, &raw_time);
    if event.is_none() {
        warn!(time = %raw_time, subject = %subject, "dropping row with unparseable timestamp");
    }
    event
}

/// Coerce a row field to a string. Missing, null, `false` and empty
/// strings count as absent.
fn field_str(row: &Value, key: &str) -> Option<String> {
    match row.get(key)? {
        Value::Null => None,
        Value::Bool(false) => None,
        Value::Bool(true) => Some("true".to_string()),
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
