//! Idle Reaper
//!
//! Periodic background task that kills and evicts sessions with no
//! activity for longer than the idle threshold, attached or not.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::TerminalConfig;
use crate::registry::SessionRegistry;

/// Evicts idle sessions on a fixed period
pub struct IdleReaper {
    registry: Arc<SessionRegistry>,
    idle_timeout: Duration,
    sweep_interval: Duration,
}

impl IdleReaper {
    /// Create a reaper with explicit timings
    #[must_use]
    pub fn new(
        registry: Arc<SessionRegistry>,
        idle_timeout: Duration,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            registry,
            idle_timeout,
            sweep_interval: sweep_interval.max(Duration::from_millis(1)),
        }
    }

    /// Create a reaper using the configured timings
    #[must_use]
    pub fn from_config(registry: Arc<SessionRegistry>, config: &TerminalConfig) -> Self {
        Self::new(registry, config.idle_timeout(), config.sweep_interval())
    }

    /// Idle threshold
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Sweep period
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    /// Run one sweep now; returns the number of evicted sessions
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    /// Run one sweep as if the clock read `now`
    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut evicted = 0;
        for session in self.registry.snapshot() {
            if session.evict_if_idle(self.idle_timeout, now) {
                self.registry.remove_instance(session.id(), session.instance());
                evicted += 1;
            }
        }
        if evicted > 0 {
            info!(evicted, remaining = self.registry.len(), "Idle sweep finished");
        } else {
            debug!(sessions = self.registry.len(), "Idle sweep found nothing to evict");
        }
        evicted
    }

    /// Sweep every period until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            idle_timeout_secs = self.idle_timeout.as_secs(),
            sweep_interval_ms = self.sweep_interval.as_millis() as u64,
            "Idle reaper started"
        );

        let mut interval =
            tokio::time::interval_at(Instant::now() + self.sweep_interval, self.sweep_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Idle reaper stopped");
                    break;
                }
                _ = interval.tick() => {
                    self.sweep();
                }
            }
        }
    }

    /// Spawn [`IdleReaper::run`] on the current runtime
    pub fn spawn(self, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
