use super::HostError;
use crate::config::PlatformConfig;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};

/// Whatever the scheduler refreshes on each tick, e.g. stale
/// pre-aggregations.
#[async_trait]
pub trait RefreshTarget: Send + Sync {
    async fn refresh(&self, tick: u64) -> Result<(), HostError>;
}

pub struct RefreshScheduler {
    period: Duration,
}

impl RefreshScheduler {
    pub fn new(period: Duration) -> Self {
        RefreshScheduler { period }
    }

    pub fn from_config(config: &PlatformConfig) -> Self {
        Self::new(config.scheduled_refresh_interval())
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Runs refresh checks every period, starting immediately, until
    /// `shutdown` flips to true or its sender is dropped. A failed refresh
    /// is logged and the next tick proceeds as usual.
    ///
    /// Returns the number of ticks run.
    pub async fn run<T>(&self, target: &T, mut shutdown: watch::Receiver<bool>) -> u64
    where
        T: RefreshTarget + ?Sized,
    {
        info!("Scheduled refresh every {:?}", self.period);
        let mut interval = time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks = 0;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    ticks += 1;
                    debug!("Refresh tick {}", ticks);
                    if let Err(e) = target.refresh(ticks).await {
                        warn!("Refresh tick {} failed: {}", ticks, e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Scheduled refresh stopped after {} ticks", ticks);
        ticks
    }
}
