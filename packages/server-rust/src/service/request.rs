use std::fmt;

use saltychat_core::{QueryParams, ServiceError};
use serde::de::DeserializeOwned;
use serde_json::Value;
use uuid::Uuid;

use super::events::EventPublisher;
use super::pattern::PathParams;
use super::protocol::RequestBody;

/// A request handed to a resource handler.
///
/// Carries the resolved resource id, the path parameters bound by the
/// matching pattern, the decoded body, and an [`EventPublisher`] for emitting
/// events about the resource.
#[derive(Clone)]
pub struct ResourceRequest {
    rid: String,
    params: PathParams,
    method: Option<String>,
    body: RequestBody,
    events: EventPublisher,
}

impl ResourceRequest {
    #[must_use]
    pub fn new(
        rid: impl Into<String>,
        params: PathParams,
        method: Option<String>,
        body: RequestBody,
        events: EventPublisher,
    ) -> Self {
        Self {
            rid: rid.into(),
            params,
            method,
            body,
            events,
        }
    }

    #[must_use]
    pub fn rid(&self) -> &str {
        &self.rid
    }

    /// Root token of the service answering the request.
    #[must_use]
    pub fn service_name(&self) -> &str {
        self.events.service_name()
    }

    #[must_use]
    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    /// Connection id of the client, when the gateway supplied one.
    #[must_use]
    pub fn cid(&self) -> Option<&str> {
        self.body.cid.as_deref()
    }

    #[must_use]
    pub fn token(&self) -> Option<&Value> {
        self.body.token.as_ref()
    }

    #[must_use]
    pub fn path_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Parses the path parameter `key` as a UUID.
    ///
    /// # Errors
    ///
    /// Returns an `Invalid` error when the parameter is missing or malformed.
    pub fn parse_uuid_path_param(&self, key: &str) -> Result<Uuid, ServiceError> {
        let invalid = || ServiceError::invalid(format!("Invalid '{key}' path parameter"));
        let raw = self.path_param(key).ok_or_else(invalid)?;
        Uuid::parse_str(raw).map_err(|e| invalid().with_source(e))
    }

    /// Raw query string; empty when the request carried none.
    #[must_use]
    pub fn query(&self) -> &str {
        self.body.query.as_deref().unwrap_or_default()
    }

    #[must_use]
    pub fn parse_query(&self) -> QueryParams {
        QueryParams::parse(self.query())
    }

    /// Deserializes the call parameters. Absent parameters decode as `{}`.
    ///
    /// # Errors
    ///
    /// Returns an `Invalid` error when the parameters do not fit `T`.
    pub fn parse_params<T: DeserializeOwned>(&self) -> Result<T, ServiceError> {
        let params = match &self.body.params {
            None | Some(Value::Null) => Value::Object(serde_json::Map::new()),
            Some(v) => v.clone(),
        };
        serde_json::from_value(params)
            .map_err(|e| ServiceError::invalid("Invalid parameters").with_source(e))
    }

    /// Publisher for events about this or any other resource of the service.
    #[must_use]
    pub fn events(&self) -> &EventPublisher {
        &self.events
    }
}

impl fmt::Debug for ResourceRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceRequest")
            .field("rid", &self.rid)
            .field("params", &self.params)
            .field("method", &self.method)
            .field("body", &self.body)
            .finish_non_exhaustive()
    }
}
