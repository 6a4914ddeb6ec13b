//! Resource identifiers.
//!
//! An RID is a dot-joined path `<service>.<collection>[.<key>...]`. RIDs are
//! derived from entity identity only, so the same entity always has the same
//! address whether it is subscribed to directly or referenced from a parent
//! collection.

use uuid::Uuid;

/// Separator between RID tokens.
pub const SEPARATOR: char = '.';

/// Joins path parts with the RID separator, skipping empty parts.
#[must_use]
pub fn join<S: AsRef<str>>(parts: &[S]) -> String {
    let mut out = String::new();
    for part in parts.iter().map(AsRef::as_ref).filter(|p| !p.is_empty()) {
        if !out.is_empty() {
            out.push(SEPARATOR);
        }
        out.push_str(part);
    }
    out
}

/// RID of the room collection: `<service>.rooms`.
#[must_use]
pub fn rooms(service: &str) -> String {
    join(&[service, "rooms"])
}

/// RID of a single room: `<service>.rooms.<room_id>`.
#[must_use]
pub fn room(service: &str, room_id: Uuid) -> String {
    join(&[service, "rooms", room_id.to_string().as_str()])
}

/// RID of a room's message collection: `<service>.rooms.<room_id>.messages`.
#[must_use]
pub fn messages(service: &str, room_id: Uuid) -> String {
    join(&[service, "rooms", room_id.to_string().as_str(), "messages"])
}

/// RID of a single message: `<service>.rooms.<room_id>.messages.<message_id>`.
#[must_use]
pub fn message(service: &str, room_id: Uuid, message_id: Uuid) -> String {
    join(&[
        service,
        "rooms",
        room_id.to_string().as_str(),
        "messages",
        message_id.to_string().as_str(),
    ])
}

/// Returns `true` if `rid` is a non-empty sequence of non-empty tokens
/// free of whitespace and subject wildcards.
#[must_use]
pub fn is_valid(rid: &str) -> bool {
    !rid.is_empty()
        && rid.split(SEPARATOR).all(|token| {
            !token.is_empty()
                && !token
                    .chars()
                    .any(|c| c.is_whitespace() || c == '*' || c == '>' || c == '?')
        })
}
