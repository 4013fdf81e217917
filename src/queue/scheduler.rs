//! Timer that turns "time passed" into sync events.
//!
//! The scheduler only knows how many replays in a row left orders behind; it
//! never looks at the queue itself.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use super::replay::{OrderOutcome, ReplayOutcome};
use crate::config::SyncConfig;
use crate::event::{Event, PeriodicTag, SyncTag};

/// Doubling delay, capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
  base: Duration,
  max: Duration,
}

impl Backoff {
  pub fn new(base: Duration, max: Duration) -> Self {
    Self {
      base,
      max: max.max(base),
    }
  }

  /// Delay before the next replay after `failures` consecutive unfinished replays.
  pub fn delay(&self, failures: u32) -> Duration {
    let factor = 1u32.checked_shl(failures.min(31)).unwrap_or(u32::MAX);
    self.base.saturating_mul(factor).min(self.max)
  }
}

/// Consecutive replays that left orders queued.
#[derive(Debug, Default)]
pub struct ReplayFeedback(AtomicU32);

impl ReplayFeedback {
  pub fn record(&self, outcomes: &[ReplayOutcome]) {
    let retained = outcomes.iter().any(|o| {
      matches!(
        o.outcome,
        OrderOutcome::Retained { .. } | OrderOutcome::Errored { .. }
      )
    });
    if retained {
      self.0.fetch_add(1, Ordering::Relaxed);
    } else {
      self.0.store(0, Ordering::Relaxed);
    }
  }

  pub fn failures(&self) -> u32 {
    self.0.load(Ordering::Relaxed)
  }
}

pub struct ReplayScheduler {
  backoff: Backoff,
  content_interval: Duration,
  feedback: Arc<ReplayFeedback>,
}

impl ReplayScheduler {
  pub fn new(config: &SyncConfig, feedback: Arc<ReplayFeedback>) -> Self {
    Self {
      backoff: Backoff::new(
        Duration::from_secs(config.interval_secs.max(1)),
        Duration::from_secs(config.max_backoff_secs),
      ),
      content_interval: Duration::from_secs(config.content_interval_secs.max(1)),
      feedback,
    }
  }

  #[cfg(test)]
  fn with_intervals(
    backoff: Backoff,
    content_interval: Duration,
    feedback: Arc<ReplayFeedback>,
  ) -> Self {
    Self {
      backoff,
      content_interval,
      feedback,
    }
  }

  /// Run until the receiving side of `tx` goes away.
  pub fn spawn(self, tx: mpsc::UnboundedSender<Event>) -> JoinHandle<()> {
    tokio::spawn(async move {
      let mut content = tokio::time::interval(self.content_interval);
      // The first tick of an interval fires at once; content was just fetched.
      content.tick().await;

      // Content ticks must not push the replay deadline back
      let mut next_replay = Instant::now() + self.backoff.delay(self.feedback.failures());

      loop {
        tokio::select! {
          _ = tokio::time::sleep_until(next_replay) => {
            debug!("scheduled sync");
            if tx.send(Event::Sync(SyncTag::Orders)).is_err()
              || tx.send(Event::Sync(SyncTag::Cart)).is_err()
            {
              break;
            }
            let delay = self.backoff.delay(self.feedback.failures());
            next_replay = Instant::now() + delay;
            debug!(delay_ms = delay.as_millis() as u64, "next sync scheduled");
          }
          _ = content.tick() => {
            if tx.send(Event::PeriodicSync(PeriodicTag::ContentSync)).is_err() {
              break;
            }
          }
        }
      }
    })
  }
}
