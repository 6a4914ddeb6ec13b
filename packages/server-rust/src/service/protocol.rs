//! Wire format of resource requests, responses, and events.

use bytes::Bytes;
use saltychat_core::{ErrorCode, ServiceError, QUERY_OPERATION};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error};

use super::operation::DispatchError;

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// The kind of an inbound request, taken from the first subject token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Access,
    Get,
    Call,
}

impl RequestKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Get => "get",
            Self::Call => "call",
        }
    }

    /// Every kind, in the order the service subscribes to them.
    pub const ALL: [Self; 3] = [Self::Access, Self::Get, Self::Call];
}

/// A request subject split into kind, resource id and method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundSubject {
    pub kind: RequestKind,
    pub rid: String,
    pub method: Option<String>,
}

impl InboundSubject {
    /// Parses `access.<rid>`, `get.<rid>` or `call.<rid>.<method>`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidRequest`] for any other shape.
    pub fn parse(subject: &str) -> Result<Self, DispatchError> {
        let invalid = || DispatchError::InvalidRequest(format!("malformed subject {subject:?}"));

        let (kind, rest) = subject.split_once('.').ok_or_else(invalid)?;
        let kind = match kind {
            "access" => RequestKind::Access,
            "get" => RequestKind::Get,
            "call" => RequestKind::Call,
            _ => return Err(invalid()),
        };

        if kind != RequestKind::Call {
            return Ok(Self {
                kind,
                rid: rest.to_string(),
                method: None,
            });
        }

        let (rid, method) = rest.rsplit_once('.').ok_or_else(invalid)?;
        if rid.is_empty() || method.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            kind,
            rid: rid.to_string(),
            method: Some(method.to_string()),
        })
    }
}

/// JSON body of an inbound request. Every field is optional and an empty
/// payload decodes to the default.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct RequestBody {
    pub cid: Option<String>,
    pub token: Option<Value>,
    pub params: Option<Value>,
    pub query: Option<String>,
}

impl RequestBody {
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidRequest`] when the payload is not a JSON object.
    pub fn decode(payload: &[u8]) -> Result<Self, DispatchError> {
        if payload.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(payload)
            .map_err(|e| DispatchError::InvalidRequest(format!("invalid request payload: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// A reference to another resource inside a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ref {
    pub rid: String,
}

impl Ref {
    #[must_use]
    pub fn new(rid: impl Into<String>) -> Self {
        Self { rid: rid.into() }
    }
}

/// Answer to an access request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessPolicy {
    pub get: bool,
    /// Comma-separated method names, `"*"` for all, or absent for none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call: Option<String>,
}

impl AccessPolicy {
    /// Read access and every method.
    #[must_use]
    pub fn granted() -> Self {
        Self {
            get: true,
            call: Some("*".to_string()),
        }
    }

    #[must_use]
    pub fn denied() -> Self {
        Self {
            get: false,
            call: None,
        }
    }
}

/// Protocol error: a `system.*` code plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResError {
    pub code: &'static str,
    pub message: String,
}

impl ResError {
    pub const NOT_FOUND: &'static str = "system.notFound";
    pub const INVALID_PARAMS: &'static str = "system.invalidParams";
    pub const INVALID_QUERY: &'static str = "system.invalidQuery";
    pub const INTERNAL_ERROR: &'static str = "system.internalError";
    pub const METHOD_NOT_FOUND: &'static str = "system.methodNotFound";
    pub const INVALID_REQUEST: &'static str = "system.invalidRequest";
    pub const ACCESS_DENIED: &'static str = "system.accessDenied";
    pub const TIMEOUT: &'static str = "system.timeout";

    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<&ServiceError> for ResError {
    fn from(err: &ServiceError) -> Self {
        match err.code {
            ErrorCode::Invalid if err.operation.as_deref() == Some(QUERY_OPERATION) => {
                Self::new(Self::INVALID_QUERY, err.message.clone())
            }
            ErrorCode::Invalid => Self::new(Self::INVALID_PARAMS, err.message.clone()),
            ErrorCode::NotFound => Self::new(Self::NOT_FOUND, err.message.clone()),
            ErrorCode::Timeout => Self::new(Self::TIMEOUT, err.message.clone()),
            ErrorCode::Internal => Self::new(Self::INTERNAL_ERROR, "Internal error"),
        }
    }
}

impl From<&DispatchError> for ResError {
    fn from(err: &DispatchError) -> Self {
        match err {
            DispatchError::ResourceNotFound { .. } => Self::new(Self::NOT_FOUND, "Not found"),
            DispatchError::MethodNotFound { .. } => {
                Self::new(Self::METHOD_NOT_FOUND, "Method not found")
            }
            DispatchError::AccessDenied => Self::new(Self::ACCESS_DENIED, "Access denied"),
            DispatchError::InvalidRequest(msg) => Self::new(Self::INVALID_REQUEST, msg.clone()),
            DispatchError::Timeout { .. } => Self::new(Self::TIMEOUT, "Request timeout"),
            DispatchError::Service(e) => Self::from(e),
        }
    }
}

/// Logs a failed request and returns its protocol form.
///
/// Internal errors are logged at error level with the full source chain; the
/// caller only ever sees the opaque message.
pub fn log_error(err: &DispatchError, rid: &str) -> ResError {
    let res = ResError::from(err);
    if res.code == ResError::INTERNAL_ERROR {
        let chain = match err {
            DispatchError::Service(e) => e.chain(),
            other => other.to_string(),
        };
        error!(rid, error = %chain, "request failed");
    } else {
        debug!(rid, code = res.code, error = %err, "request rejected");
    }
    res
}

/// Successful result of a dispatched request.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchResponse {
    Access(AccessPolicy),
    Model(Value),
    Collection(Vec<Ref>),
    /// Arbitrary call result.
    CallResult(Value),
    /// Call result pointing at a (usually newly created) resource.
    Resource(Ref),
}

impl DispatchResponse {
    /// Encodes the response, echoing `query` on query results.
    #[must_use]
    pub fn encode(&self, query: Option<&str>) -> Bytes {
        let body = match self {
            Self::Access(policy) => json!({ "result": policy }),
            Self::Model(model) => with_query(json!({ "model": model }), query),
            Self::Collection(refs) => with_query(json!({ "collection": refs }), query),
            Self::CallResult(value) => json!({ "result": value }),
            Self::Resource(r) => json!({ "resource": r }),
        };
        Bytes::from(body.to_string())
    }
}

fn with_query(mut result: Value, query: Option<&str>) -> Value {
    if let (Some(q), Some(obj)) = (query.filter(|q| !q.is_empty()), result.as_object_mut()) {
        obj.insert("query".to_string(), Value::String(q.to_string()));
    }
    json!({ "result": result })
}

/// Encodes an error response.
#[must_use]
pub fn encode_error(err: &ResError) -> Bytes {
    Bytes::from(json!({ "error": err }).to_string())
}

/// Payload of a query event: the subject query requests must be sent to.
#[must_use]
pub fn encode_query_event(subject: &str) -> Bytes {
    Bytes::from(json!({ "subject": subject }).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_get_and_call_subjects() {
        let get = InboundSubject::parse("get.myapp.rooms").unwrap();
        assert_eq!(get.kind, RequestKind::Get);
        assert_eq!(get.rid, "myapp.rooms");
        assert!(get.method.is_none());

        let call = InboundSubject::parse("call.myapp.rooms.new").unwrap();
        assert_eq!(call.rid, "myapp.rooms");
        assert_eq!(call.method.as_deref(), Some("new"));

        assert!(InboundSubject::parse("call.new").is_err());
        assert!(InboundSubject::parse("event.myapp.rooms").is_err());
    }

    #[test]
    fn empty_payload_decodes_to_default() {
        assert_eq!(RequestBody::decode(b"").unwrap(), RequestBody::default());
        let body = RequestBody::decode(br#"{"query":"size=2","cid":"c1"}"#).unwrap();
        assert_eq!(body.query.as_deref(), Some("size=2"));
        assert!(RequestBody::decode(b"not json").is_err());
    }

    #[test]
    fn internal_errors_are_opaque() {
        let err = ServiceError::internal("connection refused to 10.0.0.1");
        let res = ResError::from(&err);
        assert_eq!(res.code, ResError::INTERNAL_ERROR);
        assert_eq!(res.message, "Internal error");
    }

    #[test]
    fn query_parse_errors_map_to_invalid_query() {
        let err = ServiceError::invalid("Invalid 'size' query parameter")
            .with_operation(QUERY_OPERATION);
        assert_eq!(ResError::from(&err).code, ResError::INVALID_QUERY);
        assert_eq!(
            ResError::from(&ServiceError::invalid("bad")).code,
            ResError::INVALID_PARAMS
        );
    }

    #[test]
    fn encodes_collection_with_query_echo() {
        let resp = DispatchResponse::Collection(vec![Ref::new("myapp.rooms.1")]);
        let v: Value = serde_json::from_slice(&resp.encode(Some("size=1"))).unwrap();
        assert_eq!(v["result"]["collection"][0]["rid"], "myapp.rooms.1");
        assert_eq!(v["result"]["query"], "size=1");

        let v: Value = serde_json::from_slice(&resp.encode(None)).unwrap();
        assert!(v["result"].get("query").is_none());
    }

    #[test]
    fn encodes_access_and_resource() {
        let v: Value =
            serde_json::from_slice(&DispatchResponse::Access(AccessPolicy::granted()).encode(None))
                .unwrap();
        assert_eq!(v, json!({"result": {"get": true, "call": "*"}}));

        let v: Value = serde_json::from_slice(
            &DispatchResponse::Resource(Ref::new("myapp.rooms.x")).encode(None),
        )
        .unwrap();
        assert_eq!(v, json!({"resource": {"rid": "myapp.rooms.x"}}));
    }
}
