//! Fan-out of change events to every subscribed connection.
//!
//! For each event the payload is serialized once, subscribers are read one
//! page at a time, and each page is pushed with at most `max_concurrency`
//! sends in flight. Connections reported gone are handed to the reaper once
//! their page completes. Failures stay scoped to one connection or one key.

use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use serde::Serialize;

use super::events::ChangeEvent;
use super::payload::NotificationPayload;
use super::reaper::{ReapReport, StaleConnectionReaper};
use super::transport::{DispatchOutcome, PushTransport};
use crate::config::NotifyConfig;
use crate::subscriptions::{list_subscribers, Registry, StoreError, SubscriptionIndex};

/// Why fan-out for one entity key stopped early.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("listing subscribers failed: {0}")]
    Index(#[from] StoreError),
    #[error("payload serialization failed: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Per-key fan-out totals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FanoutReport {
    pub pages: usize,
    pub attempted: usize,
    pub delivered: usize,
    pub stale: usize,
    pub transient_failures: usize,
    pub reaped: usize,
    pub unreaped: usize,
}

/// Outcome of one event within a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventReport {
    pub registry: Registry,
    pub entity_key: String,
    #[serde(flatten)]
    pub fanout: FanoutReport,
    /// Set when fan-out for this key was abandoned
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub events: Vec<EventReport>,
}

impl BatchReport {
    pub fn total_attempted(&self) -> usize {
        self.events.iter().map(|e| e.fanout.attempted).sum()
    }

    pub fn failed_keys(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter(|e| e.error.is_some())
            .map(|e| e.entity_key.as_str())
            .collect()
    }
}

#[derive(Clone)]
pub struct FanoutDispatcher {
    index: Arc<dyn SubscriptionIndex>,
    transport: Arc<dyn PushTransport>,
    reaper: StaleConnectionReaper,
    page_size: usize,
    max_concurrency: usize,
}

impl FanoutDispatcher {
    pub fn new(
        index: Arc<dyn SubscriptionIndex>,
        transport: Arc<dyn PushTransport>,
        reaper: StaleConnectionReaper,
        config: &NotifyConfig,
    ) -> Self {
        Self {
            index,
            transport,
            reaper,
            page_size: config.page_size.max(1),
            max_concurrency: config.max_concurrency.max(1),
        }
    }

    /// Notify subscribers for every event, one key after another.
    /// A failing key is logged and recorded; the rest of the batch still runs.
    pub async fn dispatch_batch(&self, events: &[ChangeEvent]) -> BatchReport {
        let mut report = BatchReport::default();

        for event in events {
            let registry = event.kind.registry();
            let event_report = match self.notify(event).await {
                Ok(fanout) => {
                    if fanout.attempted > 0 {
                        tracing::info!(
                            registry = %registry,
                            entity_key = %event.entity_key,
                            "Notified {} connections for {} {}",
                            fanout.attempted,
                            registry,
                            event.entity_key
                        );
                    }
                    EventReport {
                        registry,
                        entity_key: event.entity_key.clone(),
                        fanout,
                        error: None,
                    }
                }
                Err(e) => {
                    tracing::error!(
                        registry = %registry,
                        entity_key = %event.entity_key,
                        "Error notifying subscribers for {} {}: {}",
                        registry,
                        event.entity_key,
                        e
                    );
                    EventReport {
                        registry,
                        entity_key: event.entity_key.clone(),
                        fanout: FanoutReport::default(),
                        error: Some(e.to_string()),
                    }
                }
            };
            report.events.push(event_report);
        }

        report
    }

    /// Push the event's payload to all its subscribers, page by page.
    pub async fn notify(&self, event: &ChangeEvent) -> Result<FanoutReport, DispatchError> {
        let registry = event.kind.registry();
        let payload = NotificationPayload::for_event(event).to_json()?;
        let log_prefix = format!("fanout {} {}", registry, event.entity_key);

        let mut report = FanoutReport::default();
        let mut pages = list_subscribers(
            self.index.as_ref(),
            registry,
            &event.entity_key,
            self.page_size,
        );

        while let Some(page) = pages.next_page().await? {
            report.pages += 1;
            let page_report = self
                .dispatch_page(registry, &event.entity_key, &payload, page, &log_prefix)
                .await;
            report.attempted += page_report.attempted;
            report.delivered += page_report.delivered;
            report.stale += page_report.stale;
            report.transient_failures += page_report.transient_failures;
            report.reaped += page_report.reaped;
            report.unreaped += page_report.unreaped;
        }

        Ok(report)
    }

    /// Send to one page of connections, then reap the ones reported gone.
    async fn dispatch_page(
        &self,
        registry: Registry,
        entity_key: &str,
        payload: &str,
        connection_ids: Vec<String>,
        log_prefix: &str,
    ) -> FanoutReport {
        // buffer_unordered only pulls the next id when a send slot frees up
        let outcomes: Vec<(String, DispatchOutcome)> = stream::iter(connection_ids)
            .map(|connection_id| async move {
                let outcome = self.send_one(entity_key, &connection_id, payload, log_prefix).await;
                (connection_id, outcome)
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        let mut report = FanoutReport {
            pages: 1,
            attempted: outcomes.len(),
            ..FanoutReport::default()
        };
        let mut stale_ids = Vec::new();
        for (connection_id, outcome) in outcomes {
            match outcome {
                DispatchOutcome::Delivered => report.delivered += 1,
                DispatchOutcome::Stale => stale_ids.push(connection_id),
                DispatchOutcome::TransientFailure => report.transient_failures += 1,
            }
        }
        report.stale = stale_ids.len();

        if !stale_ids.is_empty() {
            let ReapReport { deleted, abandoned } =
                self.reaper.reap(registry, &stale_ids, log_prefix).await;
            report.reaped = deleted;
            report.unreaped = abandoned;
        }

        report
    }

    async fn send_one(
        &self,
        entity_key: &str,
        connection_id: &str,
        payload: &str,
        log_prefix: &str,
    ) -> DispatchOutcome {
        let result = self.transport.push(connection_id, payload).await;
        let outcome = DispatchOutcome::classify(&result);
        match (&outcome, result) {
            (DispatchOutcome::Stale, _) => {
                tracing::info!(
                    entity_key = %entity_key,
                    connection_id = %connection_id,
                    "{}: Found stale connection: {}",
                    log_prefix,
                    connection_id
                );
            }
            (DispatchOutcome::TransientFailure, Err(e)) => {
                tracing::warn!(
                    entity_key = %entity_key,
                    connection_id = %connection_id,
                    "{}: Failed to send to {}: {}",
                    log_prefix,
                    connection_id,
                    e
                );
            }
            _ => {}
        }
        outcome
    }
}
