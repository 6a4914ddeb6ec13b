//! The health unit: runs each check under its own timeout on a fixed period,
//! keeps the latest report, and answers health requests from it.

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use futures_util::future::join_all;
use saltychat_core::ClockSource;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{CheckResult, HealthConfig, HealthReport};
use crate::config::ConfigError;
use crate::network::BusMessage;
use crate::traits::{HealthCheck, ManagedService, Transport};

/// Checks that the bus connection answers a ping.
pub struct TransportCheck {
    transport: Arc<dyn Transport>,
}

impl TransportCheck {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl HealthCheck for TransportCheck {
    fn name(&self) -> &'static str {
        "nats"
    }

    async fn check(&self) -> anyhow::Result<()> {
        self.transport.ping().await?;
        Ok(())
    }
}

/// Runs health checks on an interval and reports their outcome.
///
/// A failed or timed-out check only marks the round unhealthy; the loop
/// keeps running until [`HealthSupervisor::stop`] is called.
pub struct HealthSupervisor {
    config: HealthConfig,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn ClockSource>,
    checks: Vec<Arc<dyn HealthCheck>>,
    latest: ArcSwap<HealthReport>,
    stop: watch::Sender<bool>,
}

impl HealthSupervisor {
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when `config` does not validate.
    pub fn new(
        config: HealthConfig,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn ClockSource>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let latest = ArcSwap::from_pointee(HealthReport::pending(&config, clock.now()));
        let (stop, _) = watch::channel(false);
        Ok(Self {
            config,
            transport,
            clock,
            checks: Vec::new(),
            latest,
            stop,
        })
    }

    #[must_use]
    pub fn with_check(mut self, check: Arc<dyn HealthCheck>) -> Self {
        self.checks.push(check);
        self
    }

    #[must_use]
    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// The most recent report; unhealthy until the first round completes.
    #[must_use]
    pub fn latest(&self) -> Arc<HealthReport> {
        self.latest.load_full()
    }

    /// Runs one round of checks, stores the report and publishes it.
    pub async fn tick(&self) -> Arc<HealthReport> {
        let results = join_all(self.checks.iter().map(|check| self.run_check(check))).await;
        let checks: BTreeMap<String, CheckResult> = results.into_iter().collect();
        let report = Arc::new(HealthReport::collect(&self.config, self.clock.now(), checks));
        self.latest.store(Arc::clone(&report));

        let message = BusMessage::new(self.config.status_topic.clone(), report.encode());
        if let Err(e) = self.transport.publish(message).await {
            warn!(topic = %self.config.status_topic, error = %e, "failed to publish health status");
        }
        debug!(status = ?report.status, "health round complete");
        report
    }

    async fn run_check(&self, check: &Arc<dyn HealthCheck>) -> (String, CheckResult) {
        let name = check.name();
        let started = Instant::now();
        let result = match tokio::time::timeout(self.config.timeout, check.check()).await {
            Ok(Ok(())) => CheckResult::passed(started.elapsed()),
            Ok(Err(e)) => CheckResult::failed(format!("{e:#}"), started.elapsed()),
            Err(_elapsed) => CheckResult::failed(
                format!("timed out after {:?}", self.config.timeout),
                started.elapsed(),
            ),
        };
        let outcome = if result.error.is_none() { "pass" } else { "fail" };
        metrics::counter!("saltychat_health_checks_total", "check" => name, "outcome" => outcome)
            .increment(1);
        if let Some(error) = &result.error {
            warn!(check = name, error = %error, "health check failed");
        }
        (name.to_string(), result)
    }

    async fn answer(&self, request: BusMessage) {
        let Some(reply) = request.reply else {
            return;
        };
        let payload = self.latest().encode();
        if let Err(e) = self.transport.publish(BusMessage::new(reply, payload)).await {
            warn!(error = %e, "failed to answer health request");
        }
    }

    /// Ends the check loop. Idempotent; safe to call before `run`.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }
}

#[async_trait]
impl ManagedService for HealthSupervisor {
    fn name(&self) -> &'static str {
        "health"
    }

    async fn run(&self) -> anyhow::Result<()> {
        let mut stop = self.stop.subscribe();
        if *stop.borrow() {
            return Ok(());
        }
        let stopped = async move {
            let _ = stop.wait_for(|stopped| *stopped).await;
        };
        tokio::pin!(stopped);
        let mut requests = self.transport.subscribe(&self.config.subject).await?;
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval = ?self.config.interval,
            subject = %self.config.subject,
            "health supervisor started"
        );

        loop {
            tokio::select! {
                () = &mut stopped => break,
                _ = ticker.tick() => {
                    self.tick().await;
                }
                msg = requests.next() => match msg {
                    Some(msg) => self.answer(msg).await,
                    None => anyhow::bail!("health subscription on {} closed", self.config.subject),
                },
            }
        }
        info!("health supervisor stopped");
        Ok(())
    }

    async fn shutdown(&self) {
        self.stop();
    }
}

impl std::fmt::Debug for HealthSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthSupervisor")
            .field("config", &self.config)
            .field("checks", &self.checks.iter().map(|c| c.name()).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
