//! Backend HTTP client.
//!
//! [`RpcClient`] implements [`RemoteService`] over reqwest. Requests are
//! signed with the user id and auth token headers when configured. Failed
//! requests are never retried here; retrying is the caller's decision.

use crate::error::RpcError;
use crate::request::{Method, RawRequest, RemoteService};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde_json::Value;
use std::time::Duration;

const USER_ID_HEADER: &str = "x-userid";
const AUTH_TOKEN_HEADER: &str = "x-auth-token";

/// Configuration for a backend client.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// Base URL (e.g., `http://localhost:8000`).
    pub url: String,
    /// Identity header sent with every request.
    pub user_id: Option<String>,
    /// Auth token header sent with every request.
    pub auth_token: Option<String>,
    /// Request timeout.
    pub timeout: Duration,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8000".to_string(),
            user_id: None,
            auth_token: None,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Async client for the Kinit backend.
pub struct RpcClient {
    client: reqwest::Client,
    config: RpcConfig,
}

impl RpcClient {
    /// Create a new client with the given URL.
    pub fn new(url: &str) -> Result<Self, RpcError> {
        Self::with_config(RpcConfig {
            url: url.to_string(),
            ..Default::default()
        })
    }

    /// Create a new client with full configuration.
    pub fn with_config(mut config: RpcConfig) -> Result<Self, RpcError> {
        config.url = config.url.trim_end_matches('/').to_string();
        if !config.url.starts_with("http://") && !config.url.starts_with("https://") {
            return Err(RpcError::InvalidUrl(config.url));
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(4)
            .build()
            .map_err(|e| RpcError::Other(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Get the configured base URL.
    pub fn url(&self) -> &str {
        &self.config.url
    }

    fn build_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(value) = self.config.user_id.as_deref().and_then(|v| HeaderValue::from_str(v).ok()) {
            headers.insert(USER_ID_HEADER, value);
        }
        if let Some(value) = self
            .config
            .auth_token
            .as_deref()
            .and_then(|v| HeaderValue::from_str(v).ok())
        {
            headers.insert(AUTH_TOKEN_HEADER, value);
        }
        headers
    }
}

#[async_trait]
impl RemoteService for RpcClient {
    async fn execute(&self, request: &RawRequest) -> Result<Value, RpcError> {
        let url = format!("{}{}", self.config.url, request.path);
        let method = request.method.as_str();

        let builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
        };
        let mut builder = builder.headers(self.build_headers()).query(&request.query);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        log::debug!("{} {}", method, url);

        let resp = builder.send().await.map_err(|e| RpcError::Http {
            method: method.to_string(),
            url: url.clone(),
            source: e,
        })?;

        let status = resp.status().as_u16();

        if status == 401 {
            return Err(RpcError::AuthFailed { url });
        }

        if status >= 400 {
            let body = resp.text().await.unwrap_or_default();
            return Err(RpcError::HttpStatus {
                method: method.to_string(),
                url,
                status,
                body: body.chars().take(500).collect(),
            });
        }

        resp.json::<Value>().await.map_err(|e| RpcError::Http {
            method: method.to_string(),
            url,
            source: e,
        })
    }
}
