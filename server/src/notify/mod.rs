//! Change-event fan-out: extraction, dispatch, and stale-subscription reaping.

pub mod dispatch;
pub mod events;
pub mod ingest;
pub mod payload;
pub mod reaper;
pub mod transport;

pub use dispatch::{BatchReport, FanoutDispatcher, FanoutReport};
pub use events::{ChangeEvent, ChangeEventExtractor, ChangeRecord, EventKind};
pub use payload::NotificationPayload;
pub use reaper::{Backoff, Sleeper, StaleConnectionReaper, TokioSleeper};
pub use transport::{DispatchOutcome, PushError, PushTransport};

/// Entry point for upstream change batches.
#[derive(Clone)]
pub struct Notifier {
    extractor: ChangeEventExtractor,
    dispatcher: FanoutDispatcher,
}

impl Notifier {
    pub fn new(extractor: ChangeEventExtractor, dispatcher: FanoutDispatcher) -> Self {
        Self {
            extractor,
            dispatcher,
        }
    }

    /// Reduce the batch to distinct entities and notify each one's subscribers.
    pub async fn handle_batch(&self, records: &[ChangeRecord]) -> BatchReport {
        let events = self.extractor.extract(records);
        tracing::debug!(
            records = records.len(),
            events = events.len(),
            "Processing change batch"
        );
        self.dispatcher.dispatch_batch(&events).await
    }
}
