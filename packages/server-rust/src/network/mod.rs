//! Message-bus transport: message types, the in-process and NATS buses, and
//! shutdown control.

pub mod bus;
pub mod config;
pub mod local;
#[cfg(feature = "nats")]
pub mod nats;
pub mod shutdown;

use std::sync::Arc;

pub use bus::{
    is_valid_pattern, is_valid_subject, request, subject_matches, BusMessage, Subscription,
    TransportError,
};
pub use config::{BusConfig, MEMORY_SCHEME};
pub use local::LocalBus;
#[cfg(feature = "nats")]
pub use nats::NatsTransport;
pub use shutdown::*;

use crate::traits::Transport;

/// Opens the bus named by `config.url`: `memory://` gives a fresh [`LocalBus`],
/// `nats://` and `tls://` connect to a NATS server.
///
/// # Errors
///
/// Returns [`TransportError::Connect`] when the server cannot be reached or the
/// binary was built without NATS support.
pub async fn connect(config: &BusConfig) -> Result<Arc<dyn Transport>, TransportError> {
    if config.is_memory() {
        return Ok(Arc::new(LocalBus::new(config)));
    }
    connect_remote(config).await
}

#[cfg(feature = "nats")]
async fn connect_remote(config: &BusConfig) -> Result<Arc<dyn Transport>, TransportError> {
    Ok(Arc::new(NatsTransport::connect(config).await?))
}

#[cfg(not(feature = "nats"))]
#[allow(clippy::unused_async)]
async fn connect_remote(config: &BusConfig) -> Result<Arc<dyn Transport>, TransportError> {
    Err(TransportError::Connect {
        url: config.url.clone(),
        reason: "built without the nats feature".to_string(),
    })
}
