//! Wires the resource service and the health supervisor under one [`Server`].

use std::future::Future;
use std::sync::Arc;

use saltychat_core::{ClockSource, Store};

use crate::config::AppConfig;
use crate::health::{HealthSupervisor, TransportCheck};
use crate::lifecycle::{LifecycleError, Server};
use crate::service::{chat_service, ResourceService};
use crate::traits::{ManagedService, Transport};

/// The assembled process: every unit plus the supervisor running them.
#[derive(Debug)]
pub struct App {
    pub server: Server,
    pub resources: Arc<ResourceService>,
    /// `None` when health checks are disabled.
    pub health: Option<Arc<HealthSupervisor>>,
}

impl App {
    /// # Errors
    ///
    /// Returns [`LifecycleError::Config`] when any component configuration
    /// derived from `config` does not validate.
    pub fn new(
        config: &AppConfig,
        store: Store,
        clock: Arc<dyn ClockSource>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, LifecycleError> {
        let resources = Arc::new(chat_service(
            config.service_config(),
            store,
            Arc::clone(&clock),
            Arc::clone(&transport),
        )?);
        let mut units: Vec<Arc<dyn ManagedService>> = Vec::with_capacity(2);
        units.push(Arc::clone(&resources) as Arc<dyn ManagedService>);

        let health_config = config.health_config();
        let health = if health_config.enabled {
            let check = Arc::new(TransportCheck::new(Arc::clone(&transport)));
            let health =
                Arc::new(HealthSupervisor::new(health_config, transport, clock)?.with_check(check));
            units.push(Arc::clone(&health) as Arc<dyn ManagedService>);
            Some(health)
        } else {
            None
        };

        let server = Server::new(units, config.lifecycle_config())?;
        Ok(Self {
            server,
            resources,
            health,
        })
    }

    /// Runs until `shutdown` resolves or a unit fails. See [`Server::run`].
    ///
    /// # Errors
    ///
    /// Propagates the [`LifecycleError`] returned by the server.
    pub async fn run<F>(&self, shutdown: F) -> Result<(), LifecycleError>
    where
        F: Future<Output = ()> + Send,
    {
        self.server.run(shutdown).await
    }
}
