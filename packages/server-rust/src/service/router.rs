//! Request routing: dispatches a [`Dispatch`] to the handler registered for its resource.

use std::sync::Arc;
use std::task::{Context, Poll};

use tower::Service;

use super::events::EventPublisher;
use super::operation::{Dispatch, DispatchError};
use super::protocol::{AccessPolicy, DispatchResponse, RequestKind};
use super::registry::{BoxFuture, ResourceRegistry};
use super::request::ResourceRequest;

/// Routes requests to handlers by resource pattern.
///
/// Resolves the request's resource id against the [`ResourceRegistry`],
/// builds the [`ResourceRequest`] with the bound path parameters, and runs
/// the handler for the request kind. Unknown resources return
/// `DispatchError::ResourceNotFound`; unknown methods return
/// `DispatchError::MethodNotFound`.
#[derive(Clone)]
pub struct ResourceRouter {
    registry: Arc<ResourceRegistry>,
    events: EventPublisher,
}

impl ResourceRouter {
    #[must_use]
    pub fn new(registry: Arc<ResourceRegistry>, events: EventPublisher) -> Self {
        Self { registry, events }
    }
}

impl Service<Dispatch> for ResourceRouter {
    type Response = DispatchResponse;
    type Error = DispatchError;
    type Future = BoxFuture<Result<DispatchResponse, DispatchError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // The table is static; handlers run on their own futures.
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, dispatch: Dispatch) -> Self::Future {
        let Dispatch {
            kind,
            rid,
            method,
            body,
        } = dispatch;

        let Some((handlers, params)) = self.registry.lookup(&rid) else {
            return Box::pin(async move { Err(DispatchError::ResourceNotFound { rid }) });
        };

        match kind {
            RequestKind::Access => {
                let policy = handlers.access.clone().unwrap_or_else(AccessPolicy::denied);
                Box::pin(async move { Ok(DispatchResponse::Access(policy)) })
            }
            RequestKind::Get => {
                let Some(get) = handlers.get.clone() else {
                    return Box::pin(async move { Err(DispatchError::ResourceNotFound { rid }) });
                };
                let req = ResourceRequest::new(rid, params, None, body, self.events.clone());
                Box::pin(async move { get.invoke(req).await.map_err(DispatchError::from) })
            }
            RequestKind::Call => {
                let method = method.unwrap_or_default();
                let req = ResourceRequest::new(
                    rid.clone(),
                    params,
                    Some(method.clone()),
                    body,
                    self.events.clone(),
                );
                match handlers.call(&method, req) {
                    Some(fut) => Box::pin(async move {
                        fut.await.map(DispatchResponse::from).map_err(DispatchError::from)
                    }),
                    None => Box::pin(async move { Err(DispatchError::MethodNotFound { rid, method }) }),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use saltychat_core::ServiceError;
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;
    use crate::network::{LocalBus, ShutdownController};
    use crate::service::protocol::{Ref, RequestBody};
    use crate::service::registry::CallResponse;
    use crate::traits::Transport;

    fn router(registry: ResourceRegistry) -> ResourceRouter {
        let registry = Arc::new(registry);
        let events = EventPublisher::new(
            Arc::new(LocalBus::default()) as Arc<dyn Transport>,
            Arc::clone(&registry),
            Duration::from_millis(10),
            Arc::new(ShutdownController::new()),
        );
        ResourceRouter::new(registry, events)
    }

    fn dispatch(kind: RequestKind, rid: &str, method: Option<&str>) -> Dispatch {
        Dispatch {
            kind,
            rid: rid.to_string(),
            method: method.map(str::to_string),
            body: RequestBody::default(),
        }
    }

    fn registry() -> ResourceRegistry {
        let mut registry = ResourceRegistry::new("myapp");
        registry
            .register_access("rooms", AccessPolicy::granted())
            .unwrap()
            .register_collection_query("rooms", |_req| async {
                Ok(vec![Ref::new("myapp.rooms.a")])
            })
            .unwrap()
            .register_model_query("rooms.$roomID", |req: ResourceRequest| async move {
                let id = req.path_param("roomID").unwrap_or_default().to_string();
                Ok::<_, ServiceError>(json!({ "id": id }))
            })
            .unwrap()
            .register_call("rooms", "new", |req: ResourceRequest| async move {
                Ok(CallResponse::Resource(format!("{}.rooms.b", req.service_name())))
            })
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn routes_get_to_model_with_path_params() {
        let resp = router(registry())
            .oneshot(dispatch(RequestKind::Get, "myapp.rooms.r1", None))
            .await
            .unwrap();
        assert_eq!(resp, DispatchResponse::Model(json!({ "id": "r1" })));
    }

    #[tokio::test]
    async fn routes_get_to_collection_and_call_to_method() {
        let mut svc = router(registry());
        let resp = ServiceExt::ready(&mut svc)
            .await
            .unwrap()
            .call(dispatch(RequestKind::Get, "myapp.rooms", None))
            .await
            .unwrap();
        assert_eq!(resp, DispatchResponse::Collection(vec![Ref::new("myapp.rooms.a")]));

        let resp = ServiceExt::ready(&mut svc)
            .await
            .unwrap()
            .call(dispatch(RequestKind::Call, "myapp.rooms", Some("new")))
            .await
            .unwrap();
        assert_eq!(resp, DispatchResponse::Resource(Ref::new("myapp.rooms.b")));
    }

    #[tokio::test]
    async fn access_defaults_to_denied() {
        let resp = router(registry())
            .oneshot(dispatch(RequestKind::Access, "myapp.rooms.r1", None))
            .await
            .unwrap();
        assert_eq!(resp, DispatchResponse::Access(AccessPolicy::denied()));
    }

    #[tokio::test]
    async fn unknown_resource_and_method_are_errors() {
        let err = router(registry())
            .oneshot(dispatch(RequestKind::Get, "myapp.users", None))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::ResourceNotFound { rid } if rid == "myapp.users"));

        let err = router(registry())
            .oneshot(dispatch(RequestKind::Call, "myapp.rooms", Some("rename")))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::MethodNotFound { method, .. } if method == "rename"));
    }
}
