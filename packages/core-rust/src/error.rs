//! Domain error taxonomy shared by stores, validation, and the resource layer.
//!
//! Errors are produced by stores and validators and only ever *translated* by
//! the transport side. The [`ErrorCode`] is the single field the resource
//! layer inspects when mapping an error onto a protocol response.

use std::error::Error as StdError;
use std::fmt;

/// Boxed underlying cause carried by a [`ServiceError`].
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Classification of a [`ServiceError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Malformed input or failed validation. Never retried.
    Invalid,
    /// The addressed entity does not exist. Never retried.
    NotFound,
    /// Store or transport failure. The cause is logged, the caller sees an opaque message.
    Internal,
    /// A deadline elapsed before the work completed.
    Timeout,
}

impl ErrorCode {
    /// Stable lowercase name, used in logs and metrics labels.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Invalid => "invalid",
            Self::NotFound => "not_found",
            Self::Internal => "internal",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by every domain operation.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ServiceError {
    /// What kind of failure this is.
    pub code: ErrorCode,
    /// Human-readable description, safe to show to callers for non-internal codes.
    pub message: String,
    /// Name of the operation that failed (e.g. `"rooms.create"`), if known.
    pub operation: Option<String>,
    #[source]
    source: Option<BoxError>,
}

impl ServiceError {
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            operation: None,
            source: None,
        }
    }

    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Invalid, message)
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Timeout, message)
    }

    /// Attaches the name of the failing operation.
    #[must_use]
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    /// Attaches the underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Returns `true` if this error has the given code.
    #[must_use]
    pub fn is(&self, code: ErrorCode) -> bool {
        self.code == code
    }

    /// Renders the message followed by the full chain of causes, for logging.
    #[must_use]
    pub fn chain(&self) -> String {
        let mut out = self.message.clone();
        let mut cause = StdError::source(self);
        while let Some(err) = cause {
            out.push_str(": ");
            out.push_str(&err.to_string());
            cause = err.source();
        }
        out
    }
}

/// Returns the code of `err` if it is a [`ServiceError`], `Internal` otherwise.
#[must_use]
pub fn error_code(err: &(dyn StdError + 'static)) -> ErrorCode {
    err.downcast_ref::<ServiceError>()
        .map_or(ErrorCode::Internal, |e| e.code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_code() {
        assert_eq!(ServiceError::invalid("x").code, ErrorCode::Invalid);
        assert_eq!(ServiceError::not_found("x").code, ErrorCode::NotFound);
        assert_eq!(ServiceError::internal("x").code, ErrorCode::Internal);
        assert_eq!(ServiceError::timeout("x").code, ErrorCode::Timeout);
    }

    #[test]
    fn display_is_message_only() {
        let err = ServiceError::not_found("room not found").with_operation("rooms.read");
        assert_eq!(err.to_string(), "room not found");
        assert_eq!(err.operation.as_deref(), Some("rooms.read"));
    }

    #[test]
    fn chain_includes_sources() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "connection reset");
        let err = ServiceError::internal("read failed").with_source(io);
        assert_eq!(err.chain(), "read failed: connection reset");
        assert!(StdError::source(&err).is_some());
    }

    #[test]
    fn error_code_of_foreign_error_is_internal() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        assert_eq!(error_code(&io), ErrorCode::Internal);

        let err = ServiceError::invalid("bad");
        assert_eq!(error_code(&err), ErrorCode::Invalid);
    }
}
