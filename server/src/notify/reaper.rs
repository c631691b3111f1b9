//! Batched, retried removal of subscriptions whose connection is gone.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::NotifyConfig;
use crate::subscriptions::{Registry, SubscriptionRegistry};

/// Exponential backoff: `min(cap, base * 2^(attempt - 1))`, attempts counted from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .map_or(self.cap, |d| d.min(self.cap))
    }
}

/// Sleeping is injected so retry timing can be observed without real timers.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Totals for one reap pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReapReport {
    pub deleted: usize,
    /// Ids still present after retries ran out
    pub abandoned: usize,
}

impl ReapReport {
    pub fn absorb(&mut self, other: &ReapReport) {
        self.deleted += other.deleted;
        self.abandoned += other.abandoned;
    }
}

#[derive(Clone)]
pub struct StaleConnectionReaper {
    registry: Arc<dyn SubscriptionRegistry>,
    sleeper: Arc<dyn Sleeper>,
    batch_size: usize,
    max_attempts: u32,
    backoff: Backoff,
}

impl StaleConnectionReaper {
    pub fn new(
        registry: Arc<dyn SubscriptionRegistry>,
        sleeper: Arc<dyn Sleeper>,
        config: &NotifyConfig,
    ) -> Self {
        Self {
            registry,
            sleeper,
            batch_size: config.delete_batch_size.max(1),
            max_attempts: config.max_delete_retries.max(1),
            backoff: Backoff::new(config.backoff_base(), config.backoff_cap()),
        }
    }

    /// Delete `connection_ids` from `registry` in fixed-size chunks.
    ///
    /// Ids left over after the last attempt are logged and dropped; they will be
    /// detected as stale again on a later send.
    pub async fn reap(
        &self,
        registry: Registry,
        connection_ids: &[String],
        log_prefix: &str,
    ) -> ReapReport {
        let mut report = ReapReport::default();
        for chunk in connection_ids.chunks(self.batch_size) {
            let chunk_report = self.delete_with_retry(registry, chunk, log_prefix).await;
            report.absorb(&chunk_report);
        }
        report
    }

    async fn delete_with_retry(
        &self,
        registry: Registry,
        connection_ids: &[String],
        log_prefix: &str,
    ) -> ReapReport {
        let mut pending = connection_ids.to_vec();
        let mut deleted = 0;

        for attempt in 1..=self.max_attempts {
            match self.registry.delete_many(registry, &pending).await {
                Ok(outcome) => {
                    deleted += outcome.deleted.len();
                    pending = outcome.unprocessed;
                }
                Err(e) => {
                    tracing::error!(
                        registry = %registry,
                        attempt,
                        "{}: Failed batch delete attempt {}: {}",
                        log_prefix,
                        attempt,
                        e
                    );
                }
            }

            if pending.is_empty() || attempt == self.max_attempts {
                break;
            }
            self.sleeper.sleep(self.backoff.delay(attempt)).await;
        }

        if !pending.is_empty() {
            tracing::error!(
                registry = %registry,
                remaining = pending.len(),
                "{}: Failed to delete {} stale connections after retries",
                log_prefix,
                pending.len()
            );
        }

        ReapReport {
            deleted,
            abandoned: pending.len(),
        }
    }
}
