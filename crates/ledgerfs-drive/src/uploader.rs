//! Background uploader of one root
//!
//! Drains the durable queue to the remote event stream, oldest entry first.
//! The pause between iterations adapts to activity:
//! - the queue was touched within the minimum delay: reset to the minimum
//! - nothing pending: double, without bound
//! - an entry was drained: halve, not below the drain floor
//!
//! An enqueue wakes a sleeping uploader, so a long quiescent delay never
//! postpones new work. Transient failures back off exponentially; anything
//! else stops the loop and halts further mutations of the root.

use std::sync::Arc;

use ledgerfs_storage::WalEntry;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::conflict::Resolution;
use crate::error::{DriveError, DriveResult};
use crate::network::UploadOutcome;
use crate::root::RootShared;

/// What the uploader of a root is doing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploaderStatus {
    /// Not started yet
    Starting,
    /// Sleeping until the next iteration
    Idle { delay: Duration },
    /// Uploading an entry
    Draining,
    /// Backing off after transient failures
    Retrying { failures: u32, error: String },
    /// Stopped on an error that retrying cannot fix
    Failed { reason: String },
    /// Stopped on request
    Stopped,
}

impl UploaderStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, UploaderStatus::Failed { .. })
    }
}

/// Delay between uploader iterations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdaptiveDelay {
    current: Duration,
    min: Duration,
    floor: Duration,
}

impl AdaptiveDelay {
    pub fn new(min: Duration, floor: Duration) -> Self {
        Self {
            current: min,
            min,
            floor,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// The queue is busy
    pub fn on_active(&mut self) {
        self.current = self.min;
    }

    /// Nothing pending
    pub fn on_quiescent(&mut self) {
        self.current = self.current.checked_mul(2).unwrap_or(Duration::MAX);
    }

    /// An entry was drained
    pub fn on_drained(&mut self) {
        self.current = (self.current / 2).max(self.floor);
    }
}

/// Retry state after failed iterations
#[derive(Debug)]
struct Backoff {
    consecutive_failures: u32,
    base: Duration,
    max: Duration,
}

impl Backoff {
    fn new(base: Duration, max: Duration) -> Self {
        Self {
            consecutive_failures: 0,
            base,
            max,
        }
    }

    fn is_backing_off(&self) -> bool {
        self.consecutive_failures > 0
    }

    /// base * 2^failures, exponent capped at 6, then capped at `max`
    fn duration(&self) -> Duration {
        let factor = 2u32.pow(self.consecutive_failures.min(6));
        self.base
            .checked_mul(factor)
            .unwrap_or(self.max)
            .min(self.max)
    }

    fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }
}

/// Result of one iteration
#[derive(Debug, Clone, PartialEq, Eq)]
enum Tick {
    Active,
    Quiescent,
    Drained { sequence_nr: u64 },
    Dropped { sequence_nr: u64 },
}

/// Background task draining one root's queue
pub struct QueueUploader {
    root: Arc<RootShared>,
    delay: AdaptiveDelay,
    backoff: Backoff,
    cancel: CancellationToken,
}

impl QueueUploader {
    pub(crate) fn new(root: Arc<RootShared>, cancel: CancellationToken) -> Self {
        let config = root.config();
        Self {
            delay: AdaptiveDelay::new(config.min_delay, config.drain_floor),
            backoff: Backoff::new(config.min_delay, config.max_backoff),
            root,
            cancel,
        }
    }

    /// Spawn the uploader as a background task
    pub(crate) fn spawn(root: Arc<RootShared>, cancel: CancellationToken) -> JoinHandle<()> {
        let task = Self::new(root, cancel);
        tokio::spawn(async move {
            task.run().await;
        })
    }

    async fn run(mut self) {
        let root = self.root.root_id().clone();
        info!(
            root = %root,
            min_delay_ms = self.delay.current().as_millis() as u64,
            "Uploader started"
        );
        self.root.set_status(UploaderStatus::Idle {
            delay: self.delay.current(),
        });

        let mut failed = false;
        loop {
            let wait = if self.backoff.is_backing_off() {
                self.backoff.duration()
            } else {
                self.delay.current()
            };
            let queue = self.root.queue().clone();

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!(root = %root, "Uploader shutting down");
                    break;
                }
                _ = tokio::time::sleep(wait) => {}
                _ = queue.wait_enqueued(), if !self.backoff.is_backing_off() => {}
            }

            match self.iteration().await {
                Ok(tick) => {
                    self.backoff.record_success();
                    self.observe(tick);
                }
                Err(e) if e.is_transient() => {
                    self.backoff.record_failure();
                    warn!(
                        root = %root,
                        failures = self.backoff.consecutive_failures,
                        backoff_ms = self.backoff.duration().as_millis() as u64,
                        error = %e,
                        "Upload failed, backing off"
                    );
                    self.root.set_status(UploaderStatus::Retrying {
                        failures: self.backoff.consecutive_failures,
                        error: e.to_string(),
                    });
                }
                Err(e) => {
                    error!(root = %root, error = %e, "Uploader stopped on unrecoverable error");
                    self.root.set_status(UploaderStatus::Failed {
                        reason: e.to_string(),
                    });
                    failed = true;
                    break;
                }
            }
        }

        match self.root.queue().cleanup_persisted() {
            Ok(removed) => debug!(root = %root, removed, "Removed persisted rows"),
            Err(e) => warn!(root = %root, error = %e, "Cleanup of persisted rows failed"),
        }
        if !failed {
            self.root.set_status(UploaderStatus::Stopped);
        }
    }

    fn observe(&mut self, tick: Tick) {
        match tick {
            Tick::Active => self.delay.on_active(),
            Tick::Quiescent => self.delay.on_quiescent(),
            Tick::Drained { sequence_nr } | Tick::Dropped { sequence_nr } => {
                debug!(seq = sequence_nr, "Queue entry settled");
                self.delay.on_drained();
            }
        }
        self.root.set_status(UploaderStatus::Idle {
            delay: self.delay.current(),
        });
    }

    async fn iteration(&mut self) -> DriveResult<Tick> {
        let min_delay = self.root.config().min_delay;
        if self.root.queue().touched_within(min_delay) {
            return Ok(Tick::Active);
        }
        let Some(entry) = self.root.queue().oldest_pending()? else {
            return Ok(Tick::Quiescent);
        };
        self.root.set_status(UploaderStatus::Draining);
        self.upload(entry).await
    }

    /// Upload one entry, resolving conflicts until it lands or is dropped
    async fn upload(&mut self, mut entry: WalEntry) -> DriveResult<Tick> {
        let attempts = self.root.config().max_resolve_attempts.max(1);
        let mut last_current = None;

        for attempt in 1..=attempts {
            let upload = self.root.network().upload(&entry).await?;
            match upload.outcome {
                UploadOutcome::Success { .. } => {
                    self.root.confirm(&entry)?;
                    return Ok(Tick::Drained {
                        sequence_nr: entry.sequence_nr,
                    });
                }
                UploadOutcome::VersionConflict { current } => {
                    last_current = current;
                    match self.root.resolver().resolve(&self.root, &entry).await? {
                        Resolution::AlreadyPersisted => {
                            self.root.confirm(&entry)?;
                            return Ok(Tick::Drained {
                                sequence_nr: entry.sequence_nr,
                            });
                        }
                        Resolution::Retried { sequence_nr } => {
                            info!(
                                from = entry.sequence_nr,
                                to = sequence_nr,
                                attempt,
                                "Entry rebased, uploading again"
                            );
                            entry = self.root.queue().get(sequence_nr)?.ok_or_else(|| {
                                DriveError::LocalTransaction(format!(
                                    "rebased entry {} is missing",
                                    sequence_nr
                                ))
                            })?;
                        }
                        Resolution::Permanent { item, reason } => {
                            error!(
                                seq = entry.sequence_nr,
                                item = %item,
                                reason = %reason,
                                "Change dropped on conflict"
                            );
                            return Ok(Tick::Dropped {
                                sequence_nr: entry.sequence_nr,
                            });
                        }
                    }
                }
            }
        }

        Err(DriveError::VersionConflict {
            sequence_nr: entry.sequence_nr,
            current: last_current,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_resets_when_active() {
        let mut delay = AdaptiveDelay::new(Duration::from_secs(3), Duration::from_millis(100));
        delay.on_quiescent();
        delay.on_quiescent();
        assert_eq!(delay.current(), Duration::from_secs(12));
        delay.on_active();
        assert_eq!(delay.current(), Duration::from_secs(3));
    }

    #[test]
    fn test_delay_halves_to_floor() {
        let mut delay = AdaptiveDelay::new(Duration::from_secs(3), Duration::from_millis(100));
        delay.on_drained();
        assert_eq!(delay.current(), Duration::from_millis(1500));
        delay.on_drained();
        assert_eq!(delay.current(), Duration::from_millis(750));
        for _ in 0..10 {
            delay.on_drained();
        }
        assert_eq!(delay.current(), Duration::from_millis(100));
    }

    #[test]
    fn test_quiescent_growth_saturates() {
        let mut delay = AdaptiveDelay::new(Duration::from_secs(3), Duration::from_millis(100));
        for _ in 0..200 {
            delay.on_quiescent();
        }
        assert_eq!(delay.current(), Duration::MAX);
        delay.on_drained();
        assert_eq!(delay.current(), Duration::MAX / 2);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = Backoff::new(Duration::from_secs(3), Duration::from_secs(60));
        assert!(!backoff.is_backing_off());

        backoff.record_failure();
        assert_eq!(backoff.duration(), Duration::from_secs(6));
        backoff.record_failure();
        assert_eq!(backoff.duration(), Duration::from_secs(12));
        for _ in 0..10 {
            backoff.record_failure();
        }
        assert_eq!(backoff.duration(), Duration::from_secs(60));

        backoff.record_success();
        assert!(!backoff.is_backing_off());
    }

    #[test]
    fn test_status_failed() {
        assert!(UploaderStatus::Failed { reason: "x".into() }.is_failed());
        assert!(!UploaderStatus::Stopped.is_failed());
    }
}
