//! NATS-backed transport.
//!
//! Each subscription is pumped by a task that forwards NATS messages into a
//! bounded queue; dropping the [`Subscription`] aborts the task, which drops
//! the NATS subscriber and unsubscribes on the server.

use async_nats::connection::State;
use async_nats::Client;
use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::bus::{is_valid_pattern, is_valid_subject, BusMessage, Subscription};
use super::config::BusConfig;
use super::TransportError;
use crate::traits::Transport;

/// Client connection to a NATS server.
#[derive(Debug, Clone)]
pub struct NatsTransport {
    client: Client,
    capacity: usize,
}

impl NatsTransport {
    /// Connects to the server named by `config.url`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Connect`] when the server cannot be reached.
    pub async fn connect(config: &BusConfig) -> Result<Self, TransportError> {
        let client = async_nats::ConnectOptions::new()
            .name("saltychat-server")
            .connect(config.url.as_str())
            .await
            .map_err(|e| TransportError::Connect {
                url: config.url.clone(),
                reason: e.to_string(),
            })?;
        info!(url = %config.url, "connected to nats");
        Ok(Self {
            client,
            capacity: config.subscription_capacity.max(1),
        })
    }
}

#[async_trait]
impl Transport for NatsTransport {
    async fn subscribe(&self, pattern: &str) -> Result<Subscription, TransportError> {
        if !is_valid_pattern(pattern) {
            return Err(TransportError::InvalidSubject(pattern.to_string()));
        }
        let mut subscriber = self
            .client
            .subscribe(pattern.to_string())
            .await
            .map_err(|e| TransportError::Backend(e.to_string()))?;

        let (tx, rx) = mpsc::channel(self.capacity);
        let owned_pattern = pattern.to_string();
        let pump = tokio::spawn(async move {
            while let Some(msg) = subscriber.next().await {
                let message = BusMessage {
                    subject: msg.subject.to_string(),
                    reply: msg.reply.map(|reply| reply.to_string()),
                    payload: msg.payload,
                };
                if tx.send(message).await.is_err() {
                    break;
                }
            }
            // Reaching here with the receiver alive means the connection closed
            // for good; dropping `tx` ends the subscription for its reader.
            debug!(pattern = %owned_pattern, "nats subscription ended");
        });

        let abort = pump.abort_handle();
        Ok(Subscription::new(pattern, rx).on_drop(move || abort.abort()))
    }

    async fn publish(&self, message: BusMessage) -> Result<(), TransportError> {
        if !is_valid_subject(&message.subject) {
            return Err(TransportError::InvalidSubject(message.subject));
        }
        let result = match message.reply {
            Some(reply) => {
                self.client
                    .publish_with_reply(message.subject, reply, message.payload)
                    .await
            }
            None => self.client.publish(message.subject, message.payload).await,
        };
        result.map_err(|e| TransportError::Backend(e.to_string()))
    }

    fn new_inbox(&self) -> String {
        self.client.new_inbox()
    }

    async fn ping(&self) -> Result<(), TransportError> {
        if !matches!(self.client.connection_state(), State::Connected) {
            return Err(TransportError::Closed);
        }
        self.client.flush().await.map_err(|e| {
            warn!(error = %e, "nats flush failed");
            TransportError::Backend(e.to_string())
        })
    }
}
