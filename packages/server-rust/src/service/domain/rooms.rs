//! `<service>.rooms` and `<service>.rooms.$roomID`.

use std::sync::Arc;

use saltychat_core::{parse_keyset_selector, rid, RoomSelector, RoomsSelector, ServiceError};
use serde_json::Value;
use uuid::Uuid;

use super::models::{RoomModel, RoomParams};
use super::{announce_delete, announce_query, with_domain, ChatDomain, ROOM_ID_PARAM};
use crate::config::ConfigError;
use crate::service::protocol::{AccessPolicy, Ref};
use crate::service::registry::{CallResponse, ResourceRegistry};
use crate::service::request::ResourceRequest;

const ROOMS: &str = "rooms";
const ROOM: &str = "rooms.$roomID";

pub(super) fn register(
    registry: &mut ResourceRegistry,
    domain: &Arc<ChatDomain>,
) -> Result<(), ConfigError> {
    registry
        .register_access(ROOMS, AccessPolicy::granted())?
        .register_collection_query(ROOMS, with_domain(domain, list_rooms))?
        .register_call(ROOMS, "new", with_domain(domain, create_room))?
        .register_access(ROOM, AccessPolicy::granted())?
        .register_model_query(ROOM, with_domain(domain, read_room))?
        .register_call(ROOM, "delete", with_domain(domain, delete_room))?;
    Ok(())
}

/// Parses `lastKey` / `size` from the request query.
fn parse_rooms_selector(req: &ResourceRequest) -> Result<RoomsSelector, ServiceError> {
    let keyset = parse_keyset_selector(&req.parse_query(), Uuid::parse_str)?;
    Ok(RoomsSelector { keyset })
}

async fn list_rooms(
    domain: Arc<ChatDomain>,
    req: ResourceRequest,
) -> Result<Vec<Ref>, ServiceError> {
    let selector = parse_rooms_selector(&req)?;
    let (rooms, _last) = domain.store.rooms.read_all(&selector).await?;
    Ok(rooms
        .iter()
        .map(|room| Ref::new(rid::room(req.service_name(), room.id)))
        .collect())
}

async fn read_room(domain: Arc<ChatDomain>, req: ResourceRequest) -> Result<RoomModel, ServiceError> {
    let room_id = req.parse_uuid_path_param(ROOM_ID_PARAM)?;
    let room = domain.store.rooms.read(&RoomSelector { room_id }).await?;
    Ok(RoomModel::from(&room))
}

async fn create_room(
    domain: Arc<ChatDomain>,
    req: ResourceRequest,
) -> Result<CallResponse, ServiceError> {
    let params: RoomParams = req.parse_params()?;
    let room = params.into_room(domain.clock.as_ref());
    domain.store.rooms.create(&room).await?;

    let service = req.service_name();
    announce_query(&req, &rid::rooms(service)).await;
    Ok(CallResponse::Resource(rid::room(service, room.id)))
}

async fn delete_room(
    domain: Arc<ChatDomain>,
    req: ResourceRequest,
) -> Result<CallResponse, ServiceError> {
    let room_id = req.parse_uuid_path_param(ROOM_ID_PARAM)?;
    domain.store.rooms.delete(&RoomSelector { room_id }).await?;

    let service = req.service_name();
    announce_delete(&req, &rid::room(service, room_id)).await;
    announce_query(&req, &rid::rooms(service)).await;
    Ok(CallResponse::Result(Value::Null))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use saltychat_core::RoomStore;
    use serde_json::json;

    use super::*;
    use crate::network::request;
    use crate::service::domain::test_support::Harness;
    use crate::service::operation::DispatchError;
    use crate::service::protocol::{DispatchResponse, RequestBody, RequestKind};
    use crate::traits::Transport;

    fn query(q: &str) -> RequestBody {
        RequestBody {
            query: Some(q.to_string()),
            ..RequestBody::default()
        }
    }

    async fn create(h: &Harness) -> String {
        match h
            .send(RequestKind::Call, "myapp.rooms", Some("new"), RequestBody::default())
            .await
            .unwrap()
        {
            DispatchResponse::Resource(r) => r.rid,
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[tokio::test]
    async fn new_room_returns_rid_and_publishes_query_event() {
        let h = Harness::new();
        let mut events = h.bus.subscribe("event.myapp.rooms.query").await.unwrap();

        let rid = create(&h).await;
        let id = rid.strip_prefix("myapp.rooms.").unwrap();
        assert!(Uuid::parse_str(id).is_ok());

        let event = events.next().await.unwrap();
        let body: Value = serde_json::from_slice(&event.payload).unwrap();
        let subject = body["subject"].as_str().unwrap();

        let reply = request(h.bus.as_ref(), subject, r#"{"query":""}"#, Duration::from_secs(1))
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&reply.payload).unwrap();
        assert_eq!(body["result"]["collection"], json!([{ "rid": rid }]));
    }

    #[tokio::test]
    async fn room_model_resolves_with_server_side_fields() {
        let h = Harness::new();
        let rid = create(&h).await;

        let resp = h.send(RequestKind::Get, &rid, None, RequestBody::default()).await.unwrap();
        let DispatchResponse::Model(model) = resp else {
            panic!("expected a model");
        };
        assert_eq!(model["isActive"], true);
        assert_eq!(model["createdAt"], "2024-05-01T12:00:00Z");
        assert_eq!(format!("myapp.rooms.{}", model["id"].as_str().unwrap()), rid);
    }

    #[tokio::test]
    async fn collection_walks_pages_by_last_key() {
        let h = Harness::new();
        for _ in 0..5 {
            create(&h).await;
        }

        let mut seen = Vec::new();
        let mut last = String::new();
        loop {
            let q = if last.is_empty() {
                "size=2".to_string()
            } else {
                format!("size=2&lastKey={last}")
            };
            let DispatchResponse::Collection(page) =
                h.send(RequestKind::Get, "myapp.rooms", None, query(&q)).await.unwrap()
            else {
                panic!("expected a collection");
            };
            if page.is_empty() {
                break;
            }
            assert!(page.len() <= 2);
            last = page
                .last()
                .unwrap()
                .rid
                .rsplit('.')
                .next()
                .unwrap()
                .to_string();
            seen.extend(page);
        }

        assert_eq!(seen.len(), 5);
        let mut sorted = seen.clone();
        sorted.sort_by(|a, b| a.rid.cmp(&b.rid));
        sorted.dedup();
        assert_eq!(sorted.len(), 5);
    }

    #[tokio::test]
    async fn malformed_query_is_invalid_query() {
        let h = Harness::new();
        let err = h
            .send(RequestKind::Get, "myapp.rooms", None, query("lastKey=nope"))
            .await
            .unwrap_err();
        let res = crate::service::protocol::ResError::from(&err);
        assert_eq!(res.code, "system.invalidQuery");
    }

    #[tokio::test]
    async fn malformed_room_id_is_invalid_params() {
        let h = Harness::new();
        let err = h
            .send(RequestKind::Get, "myapp.rooms.not-a-uuid", None, RequestBody::default())
            .await
            .unwrap_err();
        let res = crate::service::protocol::ResError::from(&err);
        assert_eq!(res.code, "system.invalidParams");
        assert_eq!(res.message, "Invalid 'roomID' path parameter");
    }

    #[tokio::test]
    async fn delete_publishes_delete_event_and_read_is_not_found() {
        let h = Harness::new();
        let rid = create(&h).await;
        let mut events = h.bus.subscribe(&format!("event.{rid}.delete")).await.unwrap();

        let resp = h
            .send(RequestKind::Call, &rid, Some("delete"), RequestBody::default())
            .await
            .unwrap();
        assert_eq!(resp, DispatchResponse::CallResult(Value::Null));
        assert!(events.next().await.is_some());

        let err = h.send(RequestKind::Get, &rid, None, RequestBody::default()).await.unwrap_err();
        assert!(
            matches!(err, DispatchError::Service(e) if e.code == saltychat_core::ErrorCode::NotFound)
        );

        let err = h
            .send(RequestKind::Call, &rid, Some("delete"), RequestBody::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Service(_)));
    }

    #[tokio::test]
    async fn store_failure_sends_no_query_event() {
        let h = Harness::new();
        h.rooms.fail_next("disk full");
        let mut events = h.bus.subscribe("event.myapp.rooms.query").await.unwrap();

        let err = h
            .send(RequestKind::Call, "myapp.rooms", Some("new"), RequestBody::default())
            .await
            .unwrap_err();
        assert!(
            matches!(err, DispatchError::Service(e) if e.code == saltychat_core::ErrorCode::Internal)
        );
        assert!(events.try_next().is_none());

        let (rooms, _) = h.store.read_all(&RoomsSelector::default()).await.unwrap();
        assert!(rooms.is_empty());
    }

    #[tokio::test]
    async fn store_failure_hits_only_the_next_call() {
        let h = Harness::new();
        h.rooms.fail_next("disk full");

        let first = h
            .send(RequestKind::Call, "myapp.rooms", Some("new"), RequestBody::default())
            .await;
        assert!(first.is_err());

        let second = h
            .send(RequestKind::Call, "myapp.rooms", Some("new"), RequestBody::default())
            .await;
        assert!(second.is_ok());

        let (rooms, _) = h.store.read_all(&RoomsSelector::default()).await.unwrap();
        assert_eq!(rooms.len(), 1);
    }
}
