//! Tower middleware layers for the request pipeline.
//!
//! - [`timeout`]: Per-request timeout enforcement
//! - [`metrics`]: Request timing and counting via `tracing` spans and `metrics`
//! - [`pipeline`]: Composes all layers into a single service stack

pub mod metrics;
pub mod pipeline;
pub mod timeout;

pub use metrics::MetricsLayer;
pub use pipeline::{build_request_pipeline, RequestPipeline};
pub use timeout::TimeoutLayer;
