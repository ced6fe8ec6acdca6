//! RPC error types.

use thiserror::Error;

/// Reason the backend reports when an address was already migrated.
pub const REASON_ALREADY_MIGRATED: &str = "account_already_migrated";

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("HTTP error calling {method} {url}: {source}")]
    Http {
        method: String,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} from {method} {url}: {body}")]
    HttpStatus {
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    #[error("authentication failed for {url}")]
    AuthFailed { url: String },

    #[error("not found: {url}")]
    NotFound { url: String },

    #[error("invalid response from {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{path} rejected: {}", .reason.as_deref().unwrap_or(.status.as_str()))]
    Rejected {
        path: String,
        status: String,
        reason: Option<String>,
    },

    #[error("no result in response from {context}")]
    NoResult { context: String },

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("{0}")]
    Other(String),
}

impl RpcError {
    /// Whether the remote answered but refused the request.
    pub fn is_rejection(&self) -> bool {
        matches!(self, RpcError::Rejected { .. })
    }

    /// The backend's stated reason for a rejection, if any.
    pub fn rejection_reason(&self) -> Option<&str> {
        match self {
            RpcError::Rejected { reason, .. } => reason.as_deref(),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RpcError::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_display_prefers_reason() {
        let err = RpcError::Rejected {
            path: "/user/onboard".into(),
            status: "error".into(),
            reason: Some("duplicate".into()),
        };
        assert_eq!(err.to_string(), "/user/onboard rejected: duplicate");
        assert_eq!(err.rejection_reason(), Some("duplicate"));
        assert!(err.is_rejection());
    }

    #[test]
    fn test_rejected_display_falls_back_to_status() {
        let err = RpcError::Rejected {
            path: "/user/onboard".into(),
            status: "missing".into(),
            reason: None,
        };
        assert_eq!(err.to_string(), "/user/onboard rejected: missing");
    }

    #[test]
    fn test_not_found() {
        let err = RpcError::NotFound { url: "http://x/accounts/G".into() };
        assert!(err.is_not_found());
        assert!(!err.is_rejection());
    }
}
