use std::env;
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde_json::{Value, json};

use crate::config::StoreConfig;

pub const CONTENT_TABLE: &str = "content_items";
pub const UNIVERSES_TABLE: &str = "universes";
pub const CUSTOM_TYPES_TABLE: &str = "custom_content_types";
pub const DISABLED_TYPES_TABLE: &str = "disabled_content_types";
pub const VERSIONS_TABLE: &str = "universe_versions";

/// Equality-filtered, ordered, limited read against one table. The only query
/// surface the tool needs; anything richer goes through `execute_sql`.
#[derive(Debug, Clone, Default)]
pub struct SelectQuery {
    pub columns: Option<String>,
    pub filters: Vec<(String, String)>,
    pub order: Vec<OrderBy>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct OrderBy {
    pub column: String,
    pub descending: bool,
}

impl OrderBy {
    pub fn ascending(column: &str) -> Self {
        Self {
            column: column.to_string(),
            descending: false,
        }
    }
}

pub trait RecordStoreRead {
    fn select(&mut self, table: &str, query: &SelectQuery) -> Result<Vec<Value>>;
    fn request_count(&self) -> usize;
}

pub trait RecordStoreWrite: RecordStoreRead {
    /// Patch a subset of columns on one row, addressed by `id`.
    fn update_by_id(&mut self, table: &str, id: &str, patch: &Value) -> Result<()>;
    /// Run one raw SQL statement through the store's `exec_sql` RPC endpoint.
    fn execute_sql(&mut self, sql: &str) -> Result<Value>;
}

#[derive(Debug, Clone)]
pub struct SupabaseClientConfig {
    pub base_url: String,
    pub service_role_key: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_read_ms: u64,
    pub rate_limit_write_ms: u64,
    pub max_retries: usize,
    pub max_write_retries: usize,
    pub retry_delay_ms: u64,
}

impl SupabaseClientConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_config(&StoreConfig::default())
    }

    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        let base_url = match config.store_url() {
            Some(url) => url,
            None => bail!(
                "store URL is not configured; set SUPABASE_URL (or NEXT_PUBLIC_SUPABASE_URL), or [store].url in loretool.toml"
            ),
        };
        let service_role_key = match crate::config::service_role_key() {
            Some(key) => key,
            None => bail!("SUPABASE_SERVICE_ROLE_KEY is required"),
        };

        Ok(Self {
            base_url,
            service_role_key,
            user_agent: config.user_agent(),
            timeout_ms: env_value_u64("STORE_HTTP_TIMEOUT_MS", 30_000),
            rate_limit_read_ms: env_value_u64("STORE_RATE_LIMIT_READ", 100),
            rate_limit_write_ms: env_value_u64("STORE_RATE_LIMIT_WRITE", 250),
            max_retries: env_value_usize("STORE_HTTP_RETRIES", 2),
            max_write_retries: env_value_usize("STORE_HTTP_WRITE_RETRIES", 1),
            retry_delay_ms: env_value_u64("STORE_HTTP_RETRY_DELAY_MS", 500),
        })
    }
}

/// Synchronous PostgREST client. Service-role credentials, so every call
/// bypasses row-level security; reads and writes are individually rate
/// limited and retried on transport-level failures only.
pub struct SupabaseClient {
    client: Client,
    config: SupabaseClientConfig,
    last_request_at: Option<Instant>,
    request_count: usize,
}

impl SupabaseClient {
    pub fn from_env() -> Result<Self> {
        Self::new(SupabaseClientConfig::from_env()?)
    }

    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        Self::new(SupabaseClientConfig::from_config(config)?)
    }

    pub fn new(config: SupabaseClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build store HTTP client")?;

        Ok(Self {
            client,
            config,
            last_request_at: None,
            request_count: 0,
        })
    }

    fn request_get(&mut self, url: &str, params: &[(String, String)]) -> Result<Value> {
        for attempt in 0..=self.config.max_retries {
            self.apply_rate_limit(false);
            let response = self
                .client
                .get(url)
                .header("apikey", self.config.service_role_key.clone())
                .header(
                    "Authorization",
                    format!("Bearer {}", self.config.service_role_key),
                )
                .header("User-Agent", self.config.user_agent.clone())
                .query(params)
                .send();

            match response {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < self.config.max_retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt, false);
                            continue;
                        }
                        bail!(store_error_message(status, response));
                    }
                    return response
                        .json()
                        .context("failed to decode store JSON response");
                }
                Err(error) => {
                    if attempt < self.config.max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt, false);
                        continue;
                    }
                    return Err(error).context("failed to call store API");
                }
            }
        }

        bail!("store API request exhausted retry budget")
    }

    fn request_write(
        &mut self,
        method: WriteMethod,
        url: &str,
        params: &[(String, String)],
        body: &Value,
    ) -> Result<Value> {
        for attempt in 0..=self.config.max_write_retries {
            self.apply_rate_limit(true);
            let request = match method {
                WriteMethod::Patch => self.client.patch(url),
                WriteMethod::Post => self.client.post(url),
            };
            let response = request
                .header("apikey", self.config.service_role_key.clone())
                .header(
                    "Authorization",
                    format!("Bearer {}", self.config.service_role_key),
                )
                .header("User-Agent", self.config.user_agent.clone())
                .header("Prefer", "return=minimal")
                .query(params)
                .json(body)
                .send();

            match response {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < self.config.max_write_retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt, true);
                            continue;
                        }
                        bail!(store_error_message(status, response));
                    }
                    let text = response.text().unwrap_or_default();
                    if text.trim().is_empty() {
                        return Ok(Value::Null);
                    }
                    return serde_json::from_str(&text)
                        .context("failed to decode store JSON response");
                }
                Err(error) => {
                    if attempt < self.config.max_write_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt, true);
                        continue;
                    }
                    return Err(error).context("failed to call store API");
                }
            }
        }

        bail!("store API request exhausted retry budget")
    }

    fn apply_rate_limit(&mut self, is_write: bool) {
        let delay = if is_write {
            Duration::from_millis(self.config.rate_limit_write_ms)
        } else {
            Duration::from_millis(self.config.rate_limit_read_ms)
        };
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    fn wait_before_retry(&self, attempt: usize, is_write: bool) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let base = self
            .config
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        let multiplier = if is_write { 2u64 } else { 1u64 };
        sleep(Duration::from_millis(
            base.saturating_mul(multiplier).saturating_add(jitter),
        ));
    }
}

enum WriteMethod {
    Patch,
    Post,
}

impl RecordStoreRead for SupabaseClient {
    fn select(&mut self, table: &str, query: &SelectQuery) -> Result<Vec<Value>> {
        let url = rest_endpoint(&self.config.base_url, table);
        let params = build_select_params(query);
        let payload = self
            .request_get(&url, &params)
            .with_context(|| format!("select from {table} failed"))?;
        match payload {
            Value::Array(rows) => Ok(rows),
            other => bail!("store returned a non-array result for {table}: {other}"),
        }
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

impl RecordStoreWrite for SupabaseClient {
    fn update_by_id(&mut self, table: &str, id: &str, patch: &Value) -> Result<()> {
        let url = rest_endpoint(&self.config.base_url, table);
        let params = vec![("id".to_string(), format!("eq.{id}"))];
        self.request_write(WriteMethod::Patch, &url, &params, patch)
            .with_context(|| format!("update of {table} id {id} failed"))?;
        Ok(())
    }

    fn execute_sql(&mut self, sql: &str) -> Result<Value> {
        let url = rpc_endpoint(&self.config.base_url, "exec_sql");
        self.request_write(WriteMethod::Post, &url, &[], &json!({ "sql": sql }))
            .context("exec_sql RPC failed")
    }
}

/// Probe for the `slug` column before a backfill. A missing column is an
/// operator problem with a one-line fix, so the error says exactly what to run.
pub fn ensure_slug_column<S: RecordStoreRead>(store: &mut S) -> Result<()> {
    let probe = SelectQuery {
        columns: Some("slug".to_string()),
        limit: Some(1),
        ..SelectQuery::default()
    };
    match store.select(CONTENT_TABLE, &probe) {
        Ok(_) => Ok(()),
        Err(error) => {
            if is_missing_column_error(&format!("{error:#}")) {
                bail!(
                    "the {CONTENT_TABLE} table has no slug column.\n\
                     Run this SQL against the store, then re-run:\n\
                     \x20 ALTER TABLE {CONTENT_TABLE} ADD COLUMN slug TEXT;"
                );
            }
            Err(error).context("slug column probe failed")
        }
    }
}

/// REST endpoint for a table: `{base}/rest/v1/{table}`.
pub fn rest_endpoint(base_url: &str, table: &str) -> String {
    format!("{}/rest/v1/{table}", base_url.trim_end_matches('/'))
}

/// RPC endpoint for a stored function: `{base}/rest/v1/rpc/{function}`.
pub fn rpc_endpoint(base_url: &str, function: &str) -> String {
    format!("{}/rest/v1/rpc/{function}", base_url.trim_end_matches('/'))
}

/// Render a SelectQuery as PostgREST query parameters.
pub fn build_select_params(query: &SelectQuery) -> Vec<(String, String)> {
    let mut params = Vec::new();
    if let Some(columns) = &query.columns {
        params.push(("select".to_string(), columns.clone()));
    }
    for (column, value) in &query.filters {
        params.push((column.clone(), format!("eq.{value}")));
    }
    if !query.order.is_empty() {
        let rendered = query
            .order
            .iter()
            .map(|order| {
                let direction = if order.descending { "desc" } else { "asc" };
                format!("{}.{direction}", order.column)
            })
            .collect::<Vec<_>>()
            .join(",");
        params.push(("order".to_string(), rendered));
    }
    if let Some(limit) = query.limit {
        params.push(("limit".to_string(), limit.to_string()));
    }
    params
}

/// PostgREST reports an undefined column as SQLSTATE 42703.
pub fn is_missing_column_error(message: &str) -> bool {
    message.contains("42703")
        || (message.contains("column") && message.contains("does not exist"))
}

fn store_error_message(status: StatusCode, response: reqwest::blocking::Response) -> String {
    let body = response.text().unwrap_or_default();
    if let Ok(payload) = serde_json::from_str::<Value>(&body) {
        let code = payload
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error");
        let message = payload
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return format!("store API error [{code}]: {message}");
    }
    format!("store API request failed with HTTP {status}")
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

fn env_value_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_value_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::{
        OrderBy, SelectQuery, build_select_params, is_missing_column_error, rest_endpoint,
        rpc_endpoint,
    };

    #[test]
    fn rest_endpoint_joins_without_double_slash() {
        assert_eq!(
            rest_endpoint("https://example.supabase.co/", "content_items"),
            "https://example.supabase.co/rest/v1/content_items"
        );
        assert_eq!(
            rpc_endpoint("https://example.supabase.co", "exec_sql"),
            "https://example.supabase.co/rest/v1/rpc/exec_sql"
        );
    }

    #[test]
    fn select_params_cover_projection_filter_order_limit() {
        let query = SelectQuery {
            columns: Some("id,title,slug".to_string()),
            filters: vec![("universe_id".to_string(), "u-1".to_string())],
            order: vec![
                OrderBy::ascending("parent_id"),
                OrderBy::ascending("order_index"),
            ],
            limit: Some(10),
        };
        let params = build_select_params(&query);
        assert_eq!(
            params,
            vec![
                ("select".to_string(), "id,title,slug".to_string()),
                ("universe_id".to_string(), "eq.u-1".to_string()),
                (
                    "order".to_string(),
                    "parent_id.asc,order_index.asc".to_string()
                ),
                ("limit".to_string(), "10".to_string()),
            ]
        );
    }

    #[test]
    fn empty_query_renders_no_params() {
        assert!(build_select_params(&SelectQuery::default()).is_empty());
    }

    #[test]
    fn missing_column_detection() {
        assert!(is_missing_column_error(
            "store API error [42703]: column content_items.slug does not exist"
        ));
        assert!(is_missing_column_error(
            "column \"slug\" does not exist somewhere"
        ));
        assert!(!is_missing_column_error("store API error [401]: JWT expired"));
    }
}
