//! Process lifecycle: runs the managed units concurrently and drives an
//! ordered, deadline-bounded shutdown.
//!
//! State machine: `Idle -> Starting -> Running -> {ShuttingDown -> Stopped | Failed}`.
//! A unit failing while running ends in `Failed`; so does a shutdown that
//! misses its deadline. Outstanding work is never aborted: on timeout the
//! unit tasks are detached and left to finish on their own.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use futures_util::FutureExt;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::ConfigError;
use crate::network::{LifecycleState, ShutdownController};
use crate::traits::ManagedService;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleConfig {
    /// Upper bound for stopping every unit once shutdown starts.
    pub shutdown_timeout: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl LifecycleConfig {
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a zero shutdown timeout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shutdown_timeout.is_zero() {
            return Err(ConfigError::invalid("shutdown timeout", "must be non-zero"));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("{name} failed")]
    Unit {
        name: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("shutdown did not complete within {timeout:?}")]
    ShutdownTimeout { timeout: Duration },
    #[error("server already started")]
    AlreadyStarted,
    #[error(transparent)]
    Config(#[from] ConfigError),
}

type UnitOutcome = (&'static str, anyhow::Result<()>);

/// Supervises a fixed set of [`ManagedService`] units.
pub struct Server {
    units: Vec<Arc<dyn ManagedService>>,
    config: LifecycleConfig,
    controller: ShutdownController,
}

impl Server {
    /// # Errors
    ///
    /// Returns [`LifecycleError::Config`] when `config` does not validate.
    pub fn new(
        units: Vec<Arc<dyn ManagedService>>,
        config: LifecycleConfig,
    ) -> Result<Self, LifecycleError> {
        config.validate()?;
        Ok(Self {
            units,
            config,
            controller: ShutdownController::new(),
        })
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.controller.state()
    }

    /// Shared handle to the state, for observers outliving a borrow of the server.
    #[must_use]
    pub fn state_handle(&self) -> Arc<ArcSwap<LifecycleState>> {
        self.controller.state_handle()
    }

    /// Runs every unit until `shutdown` resolves or a unit fails.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::Unit`] when a unit returns an error (or panics)
    ///   before shutdown was requested.
    /// - [`LifecycleError::ShutdownTimeout`] when the units do not finish
    ///   within the shutdown timeout.
    /// - [`LifecycleError::AlreadyStarted`] when called more than once.
    pub async fn run<F>(&self, shutdown: F) -> Result<(), LifecycleError>
    where
        F: Future<Output = ()> + Send,
    {
        if !self.controller.try_start() {
            return Err(LifecycleError::AlreadyStarted);
        }

        let mut tasks = JoinSet::new();
        for unit in &self.units {
            info!(unit = unit.name(), "unit started");
            let unit = Arc::clone(unit);
            tasks.spawn(async move {
                let name = unit.name();
                let result = AssertUnwindSafe(unit.run())
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| Err(anyhow::anyhow!("{name} panicked")));
                (name, result)
            });
        }
        self.controller.set_running();

        tokio::pin!(shutdown);
        let failure = loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("shutdown requested");
                    break None;
                }
                Some(joined) = tasks.join_next() => match joined {
                    Ok((name, Ok(()))) => info!(unit = name, "unit exited"),
                    Ok((name, Err(source))) => {
                        error!(unit = name, error = %format!("{source:#}"), "unit failed");
                        break Some(LifecycleError::Unit { name, source });
                    }
                    Err(e) => warn!(error = %e, "unit task cancelled"),
                },
            }
        };

        self.controller.trigger_shutdown();
        let drained = self.stop_units(&mut tasks).await;

        if let Some(err) = failure {
            self.controller.set_failed();
            return Err(err);
        }
        if drained {
            self.controller.set_stopped();
            info!("server stopped");
            Ok(())
        } else {
            self.controller.set_failed();
            error!(timeout = ?self.config.shutdown_timeout, "shutdown timed out");
            Err(LifecycleError::ShutdownTimeout {
                timeout: self.config.shutdown_timeout,
            })
        }
    }

    /// Asks every unit to stop, last registered first, and waits for them
    /// up to the shutdown timeout. Returns `false` on timeout.
    async fn stop_units(&self, tasks: &mut JoinSet<UnitOutcome>) -> bool {
        let stop_all = async {
            for unit in self.units.iter().rev() {
                unit.shutdown().await;
            }
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((name, Ok(()))) => info!(unit = name, "unit stopped"),
                    // Errors while stopping are reported, not fatal.
                    Ok((name, Err(e))) => warn!(unit = name, error = %format!("{e:#}"), "unit stopped with error"),
                    Err(e) => warn!(error = %e, "unit task cancelled"),
                }
            }
        };

        let drained = tokio::time::timeout(self.config.shutdown_timeout, stop_all)
            .await
            .is_ok();
        if !drained {
            // Dropping the set would abort the stragglers.
            tasks.detach_all();
        }
        drained
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("units", &self.units.iter().map(|u| u.name()).collect::<Vec<_>>())
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio::sync::{oneshot, Notify};

    use super::*;

    /// Runs until shut down, then takes `drain` to finish.
    struct Unit {
        name: &'static str,
        drain: Duration,
        stop: Notify,
        stopped: AtomicBool,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Unit {
        fn new(name: &'static str, drain: Duration, log: &Arc<Mutex<Vec<&'static str>>>) -> Arc<Self> {
            Arc::new(Self {
                name,
                drain,
                stop: Notify::new(),
                stopped: AtomicBool::new(false),
                log: Arc::clone(log),
            })
        }
    }

    #[async_trait]
    impl ManagedService for Unit {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn run(&self) -> anyhow::Result<()> {
            if !self.stopped.load(Ordering::SeqCst) {
                self.stop.notified().await;
            }
            tokio::time::sleep(self.drain).await;
            Ok(())
        }

        async fn shutdown(&self) {
            self.log.lock().push(self.name);
            self.stopped.store(true, Ordering::SeqCst);
            self.stop.notify_one();
        }
    }

    struct Crashes;

    #[async_trait]
    impl ManagedService for Crashes {
        fn name(&self) -> &'static str {
            "crashes"
        }

        async fn run(&self) -> anyhow::Result<()> {
            anyhow::bail!("bus connection lost")
        }

        async fn shutdown(&self) {}
    }

    fn config(timeout_ms: u64) -> LifecycleConfig {
        LifecycleConfig {
            shutdown_timeout: Duration::from_millis(timeout_ms),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_units_in_reverse_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let resources = Unit::new("resources", Duration::from_millis(50), &log);
        let health = Unit::new("health", Duration::ZERO, &log);
        let server = Server::new(vec![resources as Arc<dyn ManagedService>, health], config(1_000)).unwrap();

        let (tx, rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = tx.send(());
        });

        server
            .run(async {
                let _ = rx.await;
            })
            .await
            .unwrap();
        assert_eq!(server.state(), LifecycleState::Stopped);
        assert_eq!(*log.lock(), vec!["health", "resources"]);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_drain_misses_the_deadline() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let slow = Unit::new("resources", Duration::from_secs(10), &log);
        let server = Server::new(vec![slow as Arc<dyn ManagedService>], config(100)).unwrap();

        let err = server.run(std::future::ready(())).await.unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::ShutdownTimeout { timeout } if timeout == Duration::from_millis(100)
        ));
        assert_eq!(server.state(), LifecycleState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn unit_failure_fails_the_server() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let health = Unit::new("health", Duration::ZERO, &log);
        let server = Server::new(vec![Arc::new(Crashes) as Arc<dyn ManagedService>, health], config(1_000)).unwrap();

        let err = server.run(std::future::pending()).await.unwrap_err();
        match err {
            LifecycleError::Unit { name, source } => {
                assert_eq!(name, "crashes");
                assert_eq!(source.to_string(), "bus connection lost");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(server.state(), LifecycleState::Failed);
        // The surviving unit was still asked to stop.
        assert_eq!(*log.lock(), vec!["health"]);
    }

    #[tokio::test]
    async fn run_twice_is_rejected() {
        let server = Server::new(Vec::new(), config(100)).unwrap();
        server.run(std::future::ready(())).await.unwrap();
        assert!(matches!(
            server.run(std::future::ready(())).await,
            Err(LifecycleError::AlreadyStarted)
        ));
    }

    #[test]
    fn zero_timeout_is_a_config_error() {
        assert!(matches!(
            Server::new(Vec::new(), config(0)),
            Err(LifecycleError::Config(_))
        ));
    }
}
