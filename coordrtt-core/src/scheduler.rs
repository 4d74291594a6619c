use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::builder::SnapshotBuilder;
use crate::cache::{PublishedSnapshot, SnapshotPublisher, SnapshotReader};
use crate::config::{RefreshConfig, ScheduleMode};
use crate::error::RefreshError;

const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Where the refresh task currently is within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPhase {
    /// Waiting for the next cycle.
    Idle,
    /// Collecting membership, coordinates and RTTs.
    Building,
    /// Encoding and swapping the snapshot into the cache.
    Publishing,
}

/// Periodically rebuilds the snapshot and publishes it.
///
/// Cycles never overlap. A failed cycle leaves the previous snapshot in place.
pub struct RefreshScheduler {
    builder: SnapshotBuilder,
    publisher: SnapshotPublisher,
    config: RefreshConfig,
    phase: watch::Sender<RefreshPhase>,
}

impl RefreshScheduler {
    #[must_use]
    pub fn new(builder: SnapshotBuilder, publisher: SnapshotPublisher, config: RefreshConfig) -> Self {
        let (phase, _) = watch::channel(RefreshPhase::Idle);
        Self {
            builder,
            publisher,
            config,
            phase,
        }
    }

    /// A reader attached to the cache this scheduler publishes into.
    #[must_use]
    pub fn reader(&self) -> SnapshotReader {
        self.publisher.reader()
    }

    /// Runs a single build and publish cycle.
    ///
    /// # Errors
    ///
    /// Returns [`RefreshError`] when the build or encoding fails. The cache is
    /// left untouched in that case.
    pub async fn refresh_once(&self) -> Result<(), RefreshError> {
        self.phase.send_replace(RefreshPhase::Building);
        let result = self.build_and_publish().await;
        self.phase.send_replace(RefreshPhase::Idle);
        result
    }

    async fn build_and_publish(&self) -> Result<(), RefreshError> {
        let started = Instant::now();
        let built = self.builder.build().await?;

        self.phase.send_replace(RefreshPhase::Publishing);
        let snapshot = PublishedSnapshot::encode(built)?;
        let nodes = snapshot.status().nodes.len();
        self.publisher.publish(snapshot);
        info!(
            nodes,
            elapsed_ms = started.elapsed().as_millis(),
            "published cluster snapshot"
        );
        Ok(())
    }

    async fn cycle(&self) {
        if let Err(err) = self.refresh_once().await {
            warn!("refresh failed, keeping previous snapshot: {err}");
        }
    }

    /// Spawns the refresh loop on the current runtime.
    #[must_use]
    pub fn spawn(self) -> RefreshHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let phase = self.phase.subscribe();
        info!(
            interval = ?self.config.interval,
            schedule = ?self.config.schedule,
            "starting refresh scheduler"
        );
        let task = tokio::spawn(self.run(shutdown_rx));
        RefreshHandle {
            shutdown_tx,
            phase,
            task,
        }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let period = self.config.interval.max(MIN_INTERVAL);
        let mut ticker = match self.config.schedule {
            ScheduleMode::FixedDelay => None,
            ScheduleMode::FixedRate => Some(fixed_rate_ticker(period).await),
        };

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                () = self.cycle() => {}
            }
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                () = wait_next(ticker.as_mut(), period) => {}
            }
        }
        debug!("refresh scheduler shutting down");
    }
}

async fn fixed_rate_ticker(period: Duration) -> Interval {
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately; the initial cycle runs without it.
    ticker.tick().await;
    ticker
}

async fn wait_next(ticker: Option<&mut Interval>, period: Duration) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => time::sleep(period).await,
    }
}

/// Control handle for a spawned [`RefreshScheduler`].
pub struct RefreshHandle {
    shutdown_tx: watch::Sender<bool>,
    phase: watch::Receiver<RefreshPhase>,
    task: JoinHandle<()>,
}

impl RefreshHandle {
    /// Signals the refresh loop to exit.
    pub fn request_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Watch receiver tracking the current [`RefreshPhase`].
    #[must_use]
    pub fn phase(&self) -> watch::Receiver<RefreshPhase> {
        self.phase.clone()
    }

    /// Waits for the refresh task to terminate.
    pub async fn wait(self) {
        let _ = self.task.await;
    }
}
