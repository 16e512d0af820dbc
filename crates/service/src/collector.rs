//! Background garbage collection.
//!
//! One pass per interval, retried a bounded number of times when it fails.
//! Ticks that elapse while a pass is running are skipped, so passes never
//! overlap within a process.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{interval, sleep, MissedTickBehavior};

use common::gc::{collect_garbage, GcReport};

use crate::ServiceState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectorConfig {
    /// Time between passes
    pub interval: Duration,
    /// How long a staged record may stay incomplete before it is
    ///  considered abandoned. Also delays removal of expired blobs.
    pub grace_period: Duration,
    /// Attempts per pass before giving up until the next tick
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30 * 60),
            grace_period: Duration::from_secs(30 * 60),
            max_attempts: 10,
            retry_delay: Duration::from_secs(30),
        }
    }
}

/// Run the collector until a shutdown signal is received.
pub async fn run_collector(
    state: ServiceState,
    config: CollectorConfig,
    mut shutdown_rx: watch::Receiver<()>,
) {
    let mut ticker = interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // Skip first immediate tick
    ticker.tick().await;

    tracing::info!(
        interval_secs = config.interval.as_secs(),
        grace_period_secs = config.grace_period.as_secs(),
        "garbage collector started"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                collect_with_retries(&state, &config, &mut shutdown_rx).await;
            }
            _ = shutdown_rx.changed() => {
                tracing::info!("garbage collector shutting down");
                break;
            }
        }
    }
}

/// One pass with bounded retries. `None` when every attempt failed or a
/// shutdown interrupted the retries.
pub(crate) async fn collect_with_retries(
    state: &ServiceState,
    config: &CollectorConfig,
    shutdown_rx: &mut watch::Receiver<()>,
) -> Option<GcReport> {
    let grace = match chrono::Duration::from_std(config.grace_period) {
        Ok(grace) => grace,
        Err(e) => {
            tracing::error!(error = %e, "grace period out of range, skipping garbage collection");
            return None;
        }
    };

    for attempt in 1..=config.max_attempts.max(1) {
        tracing::info!(attempt, "beginning garbage collection");
        let older_than = Utc::now()
            .checked_sub_signed(grace)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

        match collect_garbage(state.index(), state.store(), older_than).await {
            Ok(report) => {
                tracing::info!(
                    removed = report.removed,
                    skipped = report.skipped,
                    "garbage collection completed"
                );
                return Some(report);
            }
            Err(e) => {
                tracing::error!(attempt, error = %e, "garbage collection failed");
            }
        }

        if attempt < config.max_attempts {
            tokio::select! {
                _ = sleep(config.retry_delay) => {}
                _ = shutdown_rx.changed() => return None,
            }
        }
    }

    tracing::error!(
        attempts = config.max_attempts,
        "garbage collection gave up until the next interval"
    );
    None
}
