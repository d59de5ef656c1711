//! REST implementation of the backend seam
//!
//! Talks to a PostgREST data API and a GoTrue-style auth endpoint. Every
//! response, including transport failures, is normalized into [`OpResult`]
//! by [`finish`] before anything else looks at it.

use super::{Backend, BackendError, DataApi, Filter, OpResult, Select};
use crate::identity::Credentials;
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder};
use serde::Deserialize;
use serde_json::Value;

/// Entry point for signing in against the REST backend
#[derive(Debug, Clone)]
pub struct RestBackend {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl RestBackend {
    /// Create a backend for `base_url` using the public API key
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Normalized base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    user: Option<TokenUser>,
}

#[derive(Debug, Deserialize)]
struct TokenUser {
    id: String,
}

#[async_trait]
impl Backend for RestBackend {
    type Session = RestSession;

    async fn sign_in(&self, credentials: &Credentials) -> Result<RestSession, BackendError> {
        let url = format!("{}/auth/v1/token", self.base_url);
        tracing::debug!("Signing in {} at {}", credentials.email, url);

        let request = self
            .client
            .post(&url)
            .query(&[("grant_type", "password")])
            .header("apikey", &self.api_key)
            .json(&serde_json::json!({
                "email": credentials.email,
                "password": credentials.password,
            }));

        let payload = finish(request.send().await).await?;
        let token: TokenResponse = serde_json::from_value(payload)
            .map_err(|e| BackendError::decode(format!("Malformed token response: {}", e)))?;

        let session = RestSession {
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            access_token: token.access_token,
            user_id: token.user.map(|u| u.id),
            client: self.client.clone(),
        };
        tracing::debug!(
            "Signed in {} as user {}",
            credentials.email,
            session.user_id().unwrap_or("<unknown>")
        );
        Ok(session)
    }
}

/// Authenticated session against the REST data API
#[derive(Clone)]
pub struct RestSession {
    base_url: String,
    api_key: String,
    access_token: String,
    user_id: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for RestSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestSession")
            .field("base_url", &self.base_url)
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

impl RestSession {
    /// Auth user id reported at sign-in, if any
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/rest/v1/{}", self.base_url, path);
        tracing::debug!("{} {}", method, url);
        self.client
            .request(method, url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.access_token)
    }

    fn table_write(&self, method: Method, table: &str, filters: &[Filter]) -> RequestBuilder {
        self.request(method, table)
            .query(&filter_params(filters))
            .header("Prefer", "return=representation")
    }
}

#[async_trait]
impl DataApi for RestSession {
    async fn select(&self, query: &Select) -> OpResult {
        let request = self
            .request(Method::GET, &query.table)
            .query(&select_params(query));
        finish(request.send().await).await
    }

    async fn insert(&self, table: &str, row: &Value) -> OpResult {
        let request = self.table_write(Method::POST, table, &[]).json(row);
        finish(request.send().await).await
    }

    async fn update(&self, table: &str, filters: &[Filter], patch: &Value) -> OpResult {
        let request = self.table_write(Method::PATCH, table, filters).json(patch);
        finish(request.send().await).await
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> OpResult {
        let request = self.table_write(Method::DELETE, table, filters);
        finish(request.send().await).await
    }

    async fn rpc(&self, function: &str, args: &Value) -> OpResult {
        let request = self
            .request(Method::POST, &format!("rpc/{}", function))
            .json(args);
        finish(request.send().await).await
    }
}

fn filter_params(filters: &[Filter]) -> Vec<(String, String)> {
    filters
        .iter()
        .map(|f| (f.column.clone(), format!("eq.{}", f.value)))
        .collect()
}

/// Query-string parameters for a read
pub(crate) fn select_params(query: &Select) -> Vec<(String, String)> {
    let mut params = vec![("select".to_string(), "*".to_string())];
    params.extend(filter_params(&query.filters));
    if let Some(order) = &query.order {
        // Rows without a value must not shadow the newest one
        let direction = if order.descending {
            "desc.nullslast"
        } else {
            "asc"
        };
        params.push(("order".to_string(), format!("{}.{}", order.column, direction)));
    }
    if let Some(limit) = query.limit {
        params.push(("limit".to_string(), limit.to_string()));
    }
    params
}

/// Normalize a raw HTTP exchange into an [`OpResult`]
async fn finish(response: Result<reqwest::Response, reqwest::Error>) -> OpResult {
    let response =
        response.map_err(|e| BackendError::transport(format!("Request failed: {}", e)))?;
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| BackendError::transport(format!("Failed to read response body: {}", e)))?;

    tracing::debug!("Response status {}", status);

    if !status.is_success() {
        return Err(BackendError::api(status.as_u16(), api_message(&body)));
    }
    parse_body(&body)
}

/// Successful bodies are JSON; an empty body means "nothing returned"
pub(crate) fn parse_body(body: &str) -> OpResult {
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(body)
        .map_err(|e| BackendError::decode(format!("Invalid JSON response: {}", e)))
}

/// Pull a human-readable message out of an error body
pub(crate) fn api_message(body: &str) -> String {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
        for key in ["message", "error_description", "msg", "error"] {
            if let Some(Value::String(message)) = map.get(key) {
                return message.clone();
            }
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "no response body".to_string()
    } else {
        trimmed.to_string()
    }
}
