//! Error types for the Naver Cloud API gateway

use thiserror::Error;

/// Provider return code for "Duplicate load balancer name"
pub const DUPLICATE_LB_NAME_CODE: &str = "1200013";

#[derive(Error, Debug)]
pub enum CloudError {
    /// The provider answered with an error envelope
    #[error("API returned HTTP {status} (code {code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    /// Transport-level failure (connect, timeout, TLS)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Response body did not match the expected shape
    #[error("Failed to decode {operation} response: {reason}")]
    Decode { operation: String, reason: String },

    /// A create call succeeded but returned no resource
    #[error("{0} returned an empty result")]
    EmptyResponse(String),

    /// Request could not be built
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

pub type CloudResult<T> = std::result::Result<T, CloudError>;

impl CloudError {
    fn message_contains(&self, needle: &str) -> bool {
        match self {
            CloudError::Api { message, .. } => message.to_lowercase().contains(needle),
            _ => false,
        }
    }

    /// Name collision on create; the resource likely exists from an earlier pass
    pub fn is_duplicate_name(&self) -> bool {
        match self {
            CloudError::Api { code, .. } if code == DUPLICATE_LB_NAME_CODE => true,
            _ => self.message_contains("duplicate"),
        }
    }

    /// The referenced resource does not exist (any more)
    pub fn is_not_found(&self) -> bool {
        match self {
            CloudError::Api { status: 404, .. } => true,
            _ => self.message_contains("not found") || self.message_contains("does not exist"),
        }
    }

    /// The resource is still referenced by another one (e.g. a target group bound to a listener)
    pub fn is_in_use(&self) -> bool {
        self.message_contains("in use") || self.message_contains("being used")
    }

    /// Network failures, throttling and 5xx answers
    pub fn is_transient(&self) -> bool {
        match self {
            CloudError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            CloudError::Api { status, .. } => *status == 429 || *status >= 500,
            CloudError::EmptyResponse(_) => true,
            CloudError::Decode { .. } | CloudError::InvalidRequest(_) => false,
        }
    }
}
