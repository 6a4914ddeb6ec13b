//! Bus message types, subject matching, and the request/reply helper.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::traits::Transport;

/// Token separator in bus subjects.
const SEP: char = '.';

/// A message travelling on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Subject the message was published on.
    pub subject: String,
    /// Subject a response should be published to, for requests.
    pub reply: Option<String>,
    /// Raw payload (JSON for everything this server publishes).
    pub payload: Bytes,
}

impl BusMessage {
    #[must_use]
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            reply: None,
            payload: payload.into(),
        }
    }

    #[must_use]
    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = Some(reply.into());
        self
    }
}

/// Errors surfaced by a [`Transport`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport connection is closed")]
    Closed,
    #[error("invalid subject: {0:?}")]
    InvalidSubject(String),
    #[error("request on {subject} timed out after {timeout:?}")]
    Timeout { subject: String, timeout: Duration },
    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },
    #[error("bus error: {0}")]
    Backend(String),
}

/// Receiving end of a subscription.
///
/// Dropping the subscription unsubscribes. `next()` returns `None` once the
/// transport has closed the subscription.
pub struct Subscription {
    pattern: String,
    rx: mpsc::Receiver<BusMessage>,
    on_drop: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    #[must_use]
    pub fn new(pattern: impl Into<String>, rx: mpsc::Receiver<BusMessage>) -> Self {
        Self {
            pattern: pattern.into(),
            rx,
            on_drop: None,
        }
    }

    /// Runs `hook` when the subscription is dropped, so the transport can
    /// release whatever it holds for it.
    #[must_use]
    pub fn on_drop(mut self, hook: impl FnOnce() + Send + Sync + 'static) -> Self {
        self.on_drop = Some(Box::new(hook));
        self
    }

    /// The pattern this subscription was created with.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Waits for the next message.
    pub async fn next(&mut self) -> Option<BusMessage> {
        self.rx.recv().await
    }

    /// Returns a message if one is already queued.
    pub fn try_next(&mut self) -> Option<BusMessage> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hook) = self.on_drop.take() {
            hook();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}

/// Returns `true` if `subject` is a valid literal subject (no wildcards, no empty tokens).
#[must_use]
pub fn is_valid_subject(subject: &str) -> bool {
    !subject.is_empty()
        && subject
            .split(SEP)
            .all(|t| !t.is_empty() && t != "*" && t != ">" && !t.contains(char::is_whitespace))
}

/// Returns `true` if `pattern` is a valid subscription pattern.
#[must_use]
pub fn is_valid_pattern(pattern: &str) -> bool {
    if pattern.is_empty() {
        return false;
    }
    let tokens: Vec<&str> = pattern.split(SEP).collect();
    let last = tokens.len() - 1;
    tokens.iter().enumerate().all(|(i, t)| {
        !t.is_empty() && !t.contains(char::is_whitespace) && (*t != ">" || i == last)
    })
}

/// Matches a literal subject against a subscription pattern.
#[must_use]
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split(SEP);
    let mut subject_tokens = subject.split(SEP);
    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => {}
            (Some(p), Some(s)) if p == s => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Sends a request and waits for the first reply.
///
/// # Errors
///
/// Returns [`TransportError::Timeout`] if no reply arrives within `timeout`,
/// or any error raised by the transport while subscribing or publishing.
pub async fn request(
    transport: &dyn Transport,
    subject: &str,
    payload: impl Into<Bytes>,
    timeout: Duration,
) -> Result<BusMessage, TransportError> {
    let inbox = transport.new_inbox();
    let mut sub = transport.subscribe(&inbox).await?;
    transport
        .publish(BusMessage::new(subject, payload).with_reply(inbox))
        .await?;

    match tokio::time::timeout(timeout, sub.next()).await {
        Ok(Some(reply)) => Ok(reply),
        Ok(None) => Err(TransportError::Closed),
        Err(_elapsed) => Err(TransportError::Timeout {
            subject: subject.to_string(),
            timeout,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_match() {
        assert!(subject_matches("get.myapp.rooms", "get.myapp.rooms"));
        assert!(!subject_matches("get.myapp.rooms", "get.myapp.rooms.x"));
        assert!(!subject_matches("get.myapp.rooms.x", "get.myapp.rooms"));
    }

    #[test]
    fn single_token_wildcard() {
        assert!(subject_matches("event.*.query", "event.rooms.query"));
        assert!(!subject_matches("event.*.query", "event.myapp.rooms.query"));
    }

    #[test]
    fn tail_wildcard_needs_at_least_one_token() {
        assert!(subject_matches("call.myapp.>", "call.myapp.rooms.new"));
        assert!(subject_matches("call.myapp.>", "call.myapp.rooms"));
        assert!(!subject_matches("call.myapp.>", "call.myapp"));
    }

    #[test]
    fn subject_and_pattern_validity() {
        assert!(is_valid_subject("get.myapp.rooms"));
        assert!(!is_valid_subject("get.*.rooms"));
        assert!(!is_valid_subject("get..rooms"));
        assert!(is_valid_pattern("get.myapp.>"));
        assert!(is_valid_pattern("event.*.query"));
        assert!(!is_valid_pattern("get.>.rooms"));
        assert!(!is_valid_pattern(""));
    }

    #[test]
    fn bus_message_builder() {
        let msg = BusMessage::new("a.b", "{}").with_reply("_INBOX.1");
        assert_eq!(msg.subject, "a.b");
        assert_eq!(msg.reply.as_deref(), Some("_INBOX.1"));
        assert_eq!(&msg.payload[..], b"{}");
    }
}
