//! Request shape shared by every backend call.
//!
//! A [`WebRequest`] pairs a [`RawRequest`] (method, path, query, optional JSON
//! body) with a response type `R` and a transform `R -> Option<T>`. The
//! transport only moves JSON; decoding, status checking, and the transform run
//! in [`WebRequest::load`], so any [`RemoteService`] gets identical semantics.

use crate::error::RpcError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::marker::PhantomData;

/// Status sentinel marking a successful response.
pub const STATUS_OK: &str = "ok";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

/// Untyped request as seen by a transport.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl RawRequest {
    /// Look up a query parameter by name.
    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Executes raw requests against the backend and returns the JSON body.
///
/// Implementations report transport and HTTP-level failures only; the
/// status sentinel and body shape are checked by [`WebRequest::load`].
#[async_trait]
pub trait RemoteService: Send + Sync {
    async fn execute(&self, request: &RawRequest) -> Result<Value, RpcError>;
}

/// A typed request: response body `R`, transformed into the value `T`.
pub struct WebRequest<R, T> {
    raw: RawRequest,
    require_ok: bool,
    transform: fn(R) -> Option<T>,
    _response: PhantomData<fn() -> R>,
}

impl<R: DeserializeOwned, T> WebRequest<R, T> {
    pub fn get(path: impl Into<String>, transform: fn(R) -> Option<T>) -> Self {
        Self::new(Method::Get, path.into(), None, transform)
    }

    pub fn post(path: impl Into<String>, body: Value, transform: fn(R) -> Option<T>) -> Self {
        Self::new(Method::Post, path.into(), Some(body), transform)
    }

    fn new(method: Method, path: String, body: Option<Value>, transform: fn(R) -> Option<T>) -> Self {
        Self {
            raw: RawRequest {
                method,
                path,
                query: Vec::new(),
                body,
            },
            require_ok: false,
            transform,
            _response: PhantomData,
        }
    }

    /// Append a query parameter.
    pub fn query(mut self, name: &str, value: impl Into<String>) -> Self {
        self.raw.query.push((name.to_string(), value.into()));
        self
    }

    /// Treat the response as failed unless its `status` field is `"ok"`.
    pub fn require_ok(mut self) -> Self {
        self.require_ok = true;
        self
    }

    pub fn raw(&self) -> &RawRequest {
        &self.raw
    }

    /// Execute the request and produce the typed value.
    pub async fn load(&self, service: &dyn RemoteService) -> Result<T, RpcError> {
        let value = service.execute(&self.raw).await?;
        if self.require_ok {
            check_status(&self.raw.path, &value)?;
        }

        let response: R = serde_json::from_value(value).map_err(|e| RpcError::Json {
            context: self.raw.path.clone(),
            source: e,
        })?;

        (self.transform)(response).ok_or_else(|| RpcError::NoResult {
            context: self.raw.path.clone(),
        })
    }
}

/// Check the status sentinel of a response body.
pub fn check_status(path: &str, body: &Value) -> Result<(), RpcError> {
    let status = body.get("status").and_then(Value::as_str);
    if status == Some(STATUS_OK) {
        return Ok(());
    }

    let reason = ["reason", "error", "message"]
        .iter()
        .find_map(|field| body.get(*field).and_then(Value::as_str))
        .map(str::to_string);

    Err(RpcError::Rejected {
        path: path.to_string(),
        status: status.unwrap_or("missing").to_string(),
        reason,
    })
}
