//! Metrics middleware for resource requests.
//!
//! Runs each request inside a `resource_request` span that records duration
//! and outcome, and feeds the `saltychat_requests_total` counter and the
//! `saltychat_request_duration_seconds` histogram.

use std::task::{Context, Poll};
use std::time::Instant;

use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::service::operation::{Dispatch, DispatchError};
use crate::service::protocol::DispatchResponse;
use crate::service::registry::BoxFuture;

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

/// Service wrapper that records request duration and outcome.
#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

impl<S> Service<Dispatch> for MetricsService<S>
where
    S: Service<Dispatch, Response = DispatchResponse, Error = DispatchError> + Send,
    S::Future: Send + 'static,
{
    type Response = DispatchResponse;
    type Error = DispatchError;
    type Future = BoxFuture<Result<DispatchResponse, DispatchError>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, dispatch: Dispatch) -> Self::Future {
        let kind = dispatch.kind.as_str();
        let span = info_span!(
            "resource_request",
            kind,
            rid = %dispatch.rid,
            method = dispatch.method.as_deref().unwrap_or(""),
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(dispatch);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let elapsed = start.elapsed();

                let outcome = match &result {
                    Ok(_) => "ok",
                    Err(e) => e.outcome(),
                };

                let duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::Span::current().record("outcome", outcome);

                metrics::counter!("saltychat_requests_total", "kind" => kind, "outcome" => outcome)
                    .increment(1);
                metrics::histogram!("saltychat_request_duration_seconds", "kind" => kind)
                    .record(elapsed.as_secs_f64());

                tracing::debug!(duration_ms, outcome, "request complete");

                result
            }
            .instrument(span),
        )
    }
}
