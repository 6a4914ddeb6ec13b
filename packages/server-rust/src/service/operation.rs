//! The unit of work flowing through the dispatch pipeline.

use saltychat_core::ServiceError;

use super::protocol::{InboundSubject, RequestBody, RequestKind};

/// A decoded inbound request, ready to be routed to a handler.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub kind: RequestKind,
    pub rid: String,
    /// Method name, for call requests only.
    pub method: Option<String>,
    pub body: RequestBody,
}

impl Dispatch {
    /// Decodes a request from its bus subject and payload.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidRequest`] when either is malformed.
    pub fn decode(subject: &str, payload: &[u8]) -> Result<Self, DispatchError> {
        let InboundSubject { kind, rid, method } = InboundSubject::parse(subject)?;
        Ok(Self {
            kind,
            rid,
            method,
            body: RequestBody::decode(payload)?,
        })
    }

    /// Query string carried by the request, if any.
    #[must_use]
    pub fn query(&self) -> Option<&str> {
        self.body.query.as_deref()
    }
}

/// Errors returned by the dispatch pipeline.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no handler registered for resource {rid}")]
    ResourceNotFound { rid: String },
    #[error("no call handler for method {method} on {rid}")]
    MethodNotFound { rid: String, method: String },
    #[error("access denied")]
    AccessDenied,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl DispatchError {
    /// Short label used for metrics.
    #[must_use]
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::ResourceNotFound { .. } | Self::MethodNotFound { .. } => "not_found",
            Self::AccessDenied => "denied",
            Self::InvalidRequest(_) => "invalid",
            Self::Timeout { .. } => "timeout",
            Self::Service(e) => e.code.as_str(),
        }
    }
}
