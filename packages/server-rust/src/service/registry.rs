//! Static table of resource patterns and the handlers registered on them.
//!
//! The table is filled before the service starts serving and is read-only
//! afterwards, so lookups need no locking.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use saltychat_core::ServiceError;
use serde::Serialize;
use serde_json::Value;

use super::pattern::{PathParams, Pattern};
use super::protocol::{AccessPolicy, DispatchResponse, Ref};
use super::request::ResourceRequest;
use crate::config::ConfigError;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

type ModelFn = dyn Fn(ResourceRequest) -> BoxFuture<Result<Value, ServiceError>> + Send + Sync;
type CollectionFn = dyn Fn(ResourceRequest) -> BoxFuture<Result<Vec<Ref>, ServiceError>> + Send + Sync;
type CallFn = dyn Fn(ResourceRequest) -> BoxFuture<Result<CallResponse, ServiceError>> + Send + Sync;

/// What a call handler answers with.
#[derive(Debug, Clone, PartialEq)]
pub enum CallResponse {
    /// An arbitrary JSON result.
    Result(Value),
    /// A reference to a resource, typically one the call just created.
    Resource(String),
}

impl From<CallResponse> for DispatchResponse {
    fn from(resp: CallResponse) -> Self {
        match resp {
            CallResponse::Result(v) => Self::CallResult(v),
            CallResponse::Resource(rid) => Self::Resource(Ref::new(rid)),
        }
    }
}

/// The single get handler a pattern may carry.
#[derive(Clone)]
pub enum GetHandler {
    Model(Arc<ModelFn>),
    Collection(Arc<CollectionFn>),
}

impl GetHandler {
    /// Runs the handler and wraps its output as a get response.
    pub fn invoke(&self, req: ResourceRequest) -> BoxFuture<Result<DispatchResponse, ServiceError>> {
        match self {
            Self::Model(f) => {
                let fut = f(req);
                Box::pin(async move { fut.await.map(DispatchResponse::Model) })
            }
            Self::Collection(f) => {
                let fut = f(req);
                Box::pin(async move { fut.await.map(DispatchResponse::Collection) })
            }
        }
    }
}

/// Handlers registered on one pattern.
#[derive(Clone, Default)]
pub struct Handlers {
    pub access: Option<AccessPolicy>,
    pub get: Option<GetHandler>,
    calls: HashMap<String, Arc<CallFn>>,
}

impl Handlers {
    /// Runs the call handler for `method`, if one is registered.
    #[must_use]
    pub fn call(
        &self,
        method: &str,
        req: ResourceRequest,
    ) -> Option<BoxFuture<Result<CallResponse, ServiceError>>> {
        self.calls.get(method).map(|f| f(req))
    }

    #[must_use]
    pub fn has_method(&self, method: &str) -> bool {
        self.calls.contains_key(method)
    }
}

/// Pattern → handlers table for one service root.
pub struct ResourceRegistry {
    service_name: String,
    entries: Vec<(Pattern, Handlers)>,
}

impl ResourceRegistry {
    #[must_use]
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            entries: Vec::new(),
        }
    }

    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sets the access policy for a pattern relative to the service root.
    ///
    /// # Errors
    ///
    /// Fails on a malformed pattern or when the pattern already has a policy.
    pub fn register_access(
        &mut self,
        pattern: &str,
        policy: AccessPolicy,
    ) -> Result<&mut Self, ConfigError> {
        let (full, handlers) = self.entry(pattern)?;
        if handlers.access.is_some() {
            return Err(ConfigError::duplicate(full, "access"));
        }
        handlers.access = Some(policy);
        Ok(self)
    }

    /// Registers a model get handler. The model is serialized to JSON.
    ///
    /// # Errors
    ///
    /// Fails on a malformed pattern or when the pattern already has a get handler.
    pub fn register_model_query<F, Fut, M>(
        &mut self,
        pattern: &str,
        handler: F,
    ) -> Result<&mut Self, ConfigError>
    where
        F: Fn(ResourceRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<M, ServiceError>> + Send + 'static,
        M: Serialize,
    {
        let model: Arc<ModelFn> = Arc::new(move |req| -> BoxFuture<Result<Value, ServiceError>> {
            let fut = handler(req);
            Box::pin(async move {
                let model = fut.await?;
                serde_json::to_value(model)
                    .map_err(|e| ServiceError::internal("failed to encode model").with_source(e))
            })
        });
        self.set_get(pattern, GetHandler::Model(model))
    }

    /// Registers a collection get handler.
    ///
    /// # Errors
    ///
    /// Fails on a malformed pattern or when the pattern already has a get handler.
    pub fn register_collection_query<F, Fut>(
        &mut self,
        pattern: &str,
        handler: F,
    ) -> Result<&mut Self, ConfigError>
    where
        F: Fn(ResourceRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<Ref>, ServiceError>> + Send + 'static,
    {
        let collection: Arc<CollectionFn> =
            Arc::new(move |req| -> BoxFuture<Result<Vec<Ref>, ServiceError>> {
                Box::pin(handler(req))
            });
        self.set_get(pattern, GetHandler::Collection(collection))
    }

    /// Registers a call handler for `method` on a pattern.
    ///
    /// # Errors
    ///
    /// Fails on a malformed pattern or when `method` is already registered there.
    pub fn register_call<F, Fut>(
        &mut self,
        pattern: &str,
        method: &str,
        handler: F,
    ) -> Result<&mut Self, ConfigError>
    where
        F: Fn(ResourceRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CallResponse, ServiceError>> + Send + 'static,
    {
        if method.is_empty() || method.contains(['.', '*', '>', ' ']) {
            return Err(ConfigError::invalid(
                "call method",
                format!("{method:?} is not a valid method name"),
            ));
        }
        let (full, handlers) = self.entry(pattern)?;
        if handlers.has_method(method) {
            return Err(ConfigError::duplicate(full, "call"));
        }
        let call: Arc<CallFn> = Arc::new(move |req| -> BoxFuture<Result<CallResponse, ServiceError>> {
            Box::pin(handler(req))
        });
        handlers.calls.insert(method.to_string(), call);
        Ok(self)
    }

    /// Finds the most specific pattern matching `rid`.
    #[must_use]
    pub fn lookup(&self, rid: &str) -> Option<(&Handlers, PathParams)> {
        self.entries
            .iter()
            .filter_map(|(pattern, handlers)| {
                pattern.matches(rid).map(|params| (pattern, handlers, params))
            })
            .max_by(|a, b| a.0.specificity_cmp(b.0))
            .map(|(_, handlers, params)| (handlers, params))
    }

    fn set_get(&mut self, pattern: &str, get: GetHandler) -> Result<&mut Self, ConfigError> {
        let (full, handlers) = self.entry(pattern)?;
        if handlers.get.is_some() {
            return Err(ConfigError::duplicate(full, "get"));
        }
        handlers.get = Some(get);
        Ok(self)
    }

    /// Returns the handlers for `pattern` under the service root, creating
    /// an empty entry on first use. The root itself cannot carry handlers.
    fn entry(&mut self, pattern: &str) -> Result<(String, &mut Handlers), ConfigError> {
        if pattern.is_empty() {
            return Err(ConfigError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: "resources live below the service root".to_string(),
            });
        }
        let full = format!("{}.{pattern}", self.service_name);
        let parsed = Pattern::parse(&full)?;

        let idx = match self.entries.iter().position(|(p, _)| *p == parsed) {
            Some(idx) => idx,
            None => {
                self.entries.push((parsed, Handlers::default()));
                self.entries.len() - 1
            }
        };
        Ok((full, &mut self.entries[idx].1))
    }
}

impl fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceRegistry")
            .field("service_name", &self.service_name)
            .field(
                "patterns",
                &self.entries.iter().map(|(p, _)| p.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
