//! `<service>.rooms.$roomID.messages` and `<service>.rooms.$roomID.messages.$messageID`.
//!
//! Message content is ciphertext produced by clients; it is stored and served
//! as opaque bytes.

use std::sync::Arc;

use saltychat_core::{
    parse_keyset_selector, rid, MessageSelector, MessagesSelector, ServiceError,
};
use serde_json::Value;
use uuid::Uuid;

use super::models::{MessageModel, MessageParams};
use super::{announce_delete, announce_query, with_domain, ChatDomain, MESSAGE_ID_PARAM, ROOM_ID_PARAM};
use crate::config::ConfigError;
use crate::service::protocol::{AccessPolicy, Ref};
use crate::service::registry::{CallResponse, ResourceRegistry};
use crate::service::request::ResourceRequest;

const MESSAGES: &str = "rooms.$roomID.messages";
const MESSAGE: &str = "rooms.$roomID.messages.$messageID";

pub(super) fn register(
    registry: &mut ResourceRegistry,
    domain: &Arc<ChatDomain>,
) -> Result<(), ConfigError> {
    registry
        .register_access(MESSAGES, AccessPolicy::granted())?
        .register_collection_query(MESSAGES, with_domain(domain, list_messages))?
        .register_call(MESSAGES, "new", with_domain(domain, create_message))?
        .register_access(MESSAGE, AccessPolicy::granted())?
        .register_model_query(MESSAGE, with_domain(domain, read_message))?
        .register_call(MESSAGE, "delete", with_domain(domain, delete_message))?;
    Ok(())
}

fn parse_messages_selector(req: &ResourceRequest) -> Result<MessagesSelector, ServiceError> {
    let room_id = req.parse_uuid_path_param(ROOM_ID_PARAM)?;
    let keyset = parse_keyset_selector(&req.parse_query(), Uuid::parse_str)?;
    Ok(MessagesSelector { keyset, room_id })
}

fn parse_message_selector(req: &ResourceRequest) -> Result<MessageSelector, ServiceError> {
    Ok(MessageSelector {
        room_id: req.parse_uuid_path_param(ROOM_ID_PARAM)?,
        message_id: req.parse_uuid_path_param(MESSAGE_ID_PARAM)?,
    })
}

async fn list_messages(
    domain: Arc<ChatDomain>,
    req: ResourceRequest,
) -> Result<Vec<Ref>, ServiceError> {
    let selector = parse_messages_selector(&req)?;
    let (messages, _last) = domain.store.messages.read_all(&selector).await?;
    Ok(messages
        .iter()
        .map(|m| Ref::new(rid::message(req.service_name(), m.room_id, m.id)))
        .collect())
}

async fn read_message(
    domain: Arc<ChatDomain>,
    req: ResourceRequest,
) -> Result<MessageModel, ServiceError> {
    let selector = parse_message_selector(&req)?;
    let message = domain.store.messages.read(&selector).await?;
    Ok(MessageModel::from(&message))
}

async fn create_message(
    domain: Arc<ChatDomain>,
    req: ResourceRequest,
) -> Result<CallResponse, ServiceError> {
    let room_id = req.parse_uuid_path_param(ROOM_ID_PARAM)?;
    let params: MessageParams = req.parse_params()?;
    let message = params.into_message(room_id, domain.clock.as_ref())?;
    domain.store.messages.create(&message).await?;

    let service = req.service_name();
    announce_query(&req, &rid::messages(service, room_id)).await;
    Ok(CallResponse::Resource(rid::message(service, room_id, message.id)))
}

async fn delete_message(
    domain: Arc<ChatDomain>,
    req: ResourceRequest,
) -> Result<CallResponse, ServiceError> {
    let selector = parse_message_selector(&req)?;
    domain.store.messages.delete(&selector).await?;

    let service = req.service_name();
    announce_delete(&req, &rid::message(service, selector.room_id, selector.message_id)).await;
    announce_query(&req, &rid::messages(service, selector.room_id)).await;
    Ok(CallResponse::Result(Value::Null))
}
