//! Pipeline composition: combines all middleware layers into a single service stack.

use tower::util::BoxCloneService;
use tower::ServiceBuilder;

use super::metrics::MetricsLayer;
use super::timeout::TimeoutLayer;
use crate::service::config::ServiceConfig;
use crate::service::operation::{Dispatch, DispatchError};
use crate::service::protocol::DispatchResponse;
use crate::service::router::ResourceRouter;

/// The composed, type-erased request pipeline shared by every worker.
pub type RequestPipeline = BoxCloneService<Dispatch, DispatchResponse, DispatchError>;

/// Build the request pipeline by wrapping the `ResourceRouter` with middleware layers.
///
/// Layer order (outermost to innermost):
/// 1. `MetricsLayer` -- span, timing and outcome, including timeouts
/// 2. `TimeoutLayer` -- enforce the request timeout on the handler
#[must_use]
pub fn build_request_pipeline(router: ResourceRouter, config: &ServiceConfig) -> RequestPipeline {
    BoxCloneService::new(
        ServiceBuilder::new()
            .layer(MetricsLayer)
            .layer(TimeoutLayer::new(config.request_timeout))
            .service(router),
    )
}
