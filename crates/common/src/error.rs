use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Message returned to callers whose quota is exhausted.
pub const RATE_LIMIT_MESSAGE: &str = "Too many requests, please try again later";

#[derive(Debug, Error)]
pub enum TixgateError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("rate limit exceeded for key {key}, retry after {retry_after_secs}s")]
    RateLimited { key: String, retry_after_secs: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl TixgateError {
    /// HTTP status code a client-facing surface should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            TixgateError::RateLimited { .. } => 429,
            TixgateError::Config(_) => 400,
            _ => 500,
        }
    }

    /// The 429 body for a rate-limit rejection, `None` for every other error.
    pub fn rejection(&self) -> Option<RateLimitRejection> {
        match self {
            TixgateError::RateLimited {
                retry_after_secs, ..
            } => Some(RateLimitRejection::new(*retry_after_secs)),
            _ => None,
        }
    }
}

pub type TixgateResult<T> = Result<T, TixgateError>;

/// JSON body sent with an HTTP 429 response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitRejection {
    pub status_code: u16,
    pub message: String,
    pub retry_after: u64,
}

impl RateLimitRejection {
    pub fn new(retry_after: u64) -> Self {
        Self {
            status_code: 429,
            message: RATE_LIMIT_MESSAGE.to_string(),
            retry_after,
        }
    }

    /// Serialize to the JSON wire form.
    pub fn to_json(&self) -> TixgateResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_uses_camel_case_fields() {
        let body = RateLimitRejection::new(42).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(value["statusCode"], 429);
        assert_eq!(value["retryAfter"], 42);
        assert_eq!(value["message"], RATE_LIMIT_MESSAGE);
    }

    #[test]
    fn rate_limited_maps_to_429() {
        let err = TixgateError::RateLimited {
            key: "10.0.0.1:/api/events".into(),
            retry_after_secs: 7,
        };

        assert_eq!(err.status_code(), 429);
        assert_eq!(err.rejection().map(|r| r.retry_after), Some(7));
        assert!(err.to_string().contains("10.0.0.1:/api/events"));
    }

    #[test]
    fn other_errors_have_no_rejection_body() {
        let err = TixgateError::Config("bad".into());
        assert_eq!(err.status_code(), 400);
        assert!(err.rejection().is_none());
    }
}
