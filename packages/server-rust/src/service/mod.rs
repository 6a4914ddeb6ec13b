//! Resource dispatch over the message bus.
//!
//! This module implements the request pipeline for resource subjects:
//!
//! 1. **Decoding** (`protocol`, `operation`): subject + payload -> [`Dispatch`]
//! 2. **Middleware** (`middleware`): Tower layers (metrics, timeout)
//! 3. **Routing** (`router`): pattern lookup in the [`ResourceRegistry`]
//! 4. **Handlers** (`domain`): rooms and messages over the store
//! 5. **Events** (`events`): query and delete events for subscribers
//! 6. **Serving** (`resource`): bus readers feeding a bounded worker pool

pub mod config;
pub mod domain;
pub mod events;
pub mod middleware;
pub mod operation;
pub mod pattern;
pub mod protocol;
pub mod registry;
pub mod request;
pub mod resource;
pub mod router;

use std::sync::Arc;

use saltychat_core::{ClockSource, Store};

// Re-export key types for convenient access.
pub use config::ServiceConfig;
pub use events::{EventPublisher, QueryCallback, QueryResult};
pub use operation::{Dispatch, DispatchError};
pub use pattern::{PathParams, Pattern};
pub use protocol::{AccessPolicy, DispatchResponse, Ref, RequestBody, RequestKind, ResError};
pub use registry::{CallResponse, ResourceRegistry};
pub use request::ResourceRequest;
pub use resource::{ResourceService, ServeError};
pub use router::ResourceRouter;

use crate::config::ConfigError;
use crate::traits::Transport;

/// Builds the resource service serving rooms and messages from `store`.
///
/// # Errors
///
/// Returns a [`ConfigError`] when `config` does not validate.
pub fn chat_service(
    config: ServiceConfig,
    store: Store,
    clock: Arc<dyn ClockSource>,
    transport: Arc<dyn Transport>,
) -> Result<ResourceService, ConfigError> {
    let mut registry = ResourceRegistry::new(config.name.clone());
    domain::register(&mut registry, store, clock)?;
    ResourceService::new(config, registry, transport)
}
