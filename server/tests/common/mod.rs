//! In-memory fakes for the subscription stores, push transport and sleeper.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use livebox_server::config::NotifyConfig;
use livebox_server::notify::{
    FanoutDispatcher, PushError, PushTransport, Sleeper, StaleConnectionReaper,
};
use livebox_server::subscriptions::{
    DeleteOutcome, Registry, StoreError, SubscriberPage, SubscriptionIndex, SubscriptionRegistry,
};

/// Ordered log shared by fakes so tests can check interleaving.
pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn new_journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

/// Subscription registry + index kept in a HashMap.
pub struct MemorySubscriptions {
    /// (registry, connection id) -> entity key
    rows: Mutex<HashMap<(Registry, String), String>>,
    delete_ceiling: usize,
    /// Connection ids of every delete_many call, in call order
    pub delete_calls: Mutex<Vec<Vec<String>>>,
    /// (entity key, ids returned) for every fetch_page call
    pub page_fetches: Mutex<Vec<(String, usize)>>,
    /// Per delete call: how many ids at the end of the batch to leave unprocessed
    unprocessed_script: Mutex<VecDeque<usize>>,
    /// Per delete call: whether the call fails outright
    failure_script: Mutex<VecDeque<bool>>,
    failing_keys: Mutex<HashSet<String>>,
    journal: Option<Journal>,
}

impl MemorySubscriptions {
    pub fn new(delete_ceiling: usize) -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            delete_ceiling,
            delete_calls: Mutex::new(Vec::new()),
            page_fetches: Mutex::new(Vec::new()),
            unprocessed_script: Mutex::new(VecDeque::new()),
            failure_script: Mutex::new(VecDeque::new()),
            failing_keys: Mutex::new(HashSet::new()),
            journal: None,
        }
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn subscribe(&self, registry: Registry, entity_key: &str, connection_ids: &[String]) {
        let mut rows = self.rows.lock().unwrap();
        for id in connection_ids {
            rows.insert((registry, id.clone()), entity_key.to_string());
        }
    }

    pub fn contains(&self, registry: Registry, connection_id: &str) -> bool {
        self.rows
            .lock()
            .unwrap()
            .contains_key(&(registry, connection_id.to_string()))
    }

    pub fn subscriber_count(&self, registry: Registry, entity_key: &str) -> usize {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .filter(|((r, _), key)| *r == registry && key.as_str() == entity_key)
            .count()
    }

    pub fn script_unprocessed(&self, counts: &[usize]) {
        self.unprocessed_script.lock().unwrap().extend(counts);
    }

    pub fn script_failures(&self, failures: &[bool]) {
        self.failure_script.lock().unwrap().extend(failures);
    }

    pub fn fail_key(&self, entity_key: &str) {
        self.failing_keys.lock().unwrap().insert(entity_key.to_string());
    }

    pub fn delete_call_sizes(&self) -> Vec<usize> {
        self.delete_calls.lock().unwrap().iter().map(|c| c.len()).collect()
    }

    pub fn fetched_keys(&self) -> Vec<String> {
        self.page_fetches
            .lock()
            .unwrap()
            .iter()
            .map(|(k, _)| k.clone())
            .collect()
    }
}

#[async_trait]
impl SubscriptionRegistry for MemorySubscriptions {
    async fn join(
        &self,
        registry: Registry,
        connection_id: &str,
        entity_key: &str,
        _ttl_seconds: u64,
    ) -> Result<(), StoreError> {
        self.rows
            .lock()
            .unwrap()
            .insert((registry, connection_id.to_string()), entity_key.to_string());
        Ok(())
    }

    async fn leave(&self, connection_id: &str) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap();
        for registry in Registry::ALL {
            rows.remove(&(registry, connection_id.to_string()));
        }
        Ok(())
    }

    async fn unfollow(&self, registry: Registry, connection_id: &str) -> Result<(), StoreError> {
        self.rows
            .lock()
            .unwrap()
            .remove(&(registry, connection_id.to_string()));
        Ok(())
    }

    async fn delete_many(
        &self,
        registry: Registry,
        connection_ids: &[String],
    ) -> Result<DeleteOutcome, StoreError> {
        self.delete_calls.lock().unwrap().push(connection_ids.to_vec());

        if self.failure_script.lock().unwrap().pop_front().unwrap_or(false) {
            return Err(StoreError::Unavailable("scripted failure".to_string()));
        }

        let split = connection_ids.len().min(self.delete_ceiling);
        let (batch, overflow) = connection_ids.split_at(split);
        let leave_out = self
            .unprocessed_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(0)
            .min(batch.len());
        let (done, skipped) = batch.split_at(batch.len() - leave_out);

        let mut rows = self.rows.lock().unwrap();
        for id in done {
            rows.remove(&(registry, id.clone()));
        }

        let mut unprocessed = skipped.to_vec();
        unprocessed.extend_from_slice(overflow);
        Ok(DeleteOutcome {
            deleted: done.to_vec(),
            unprocessed,
        })
    }

    async fn sweep_expired(&self, _now_epoch: i64) -> Result<usize, StoreError> {
        Ok(0)
    }
}

#[async_trait]
impl SubscriptionIndex for MemorySubscriptions {
    async fn fetch_page(
        &self,
        registry: Registry,
        entity_key: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<SubscriberPage, StoreError> {
        if let Some(journal) = &self.journal {
            journal.lock().unwrap().push("fetch".to_string());
        }
        if self.failing_keys.lock().unwrap().contains(entity_key) {
            self.page_fetches
                .lock()
                .unwrap()
                .push((entity_key.to_string(), 0));
            return Err(StoreError::Unavailable("index offline".to_string()));
        }

        let mut ids: Vec<String> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|((r, id), key)| {
                *r == registry
                    && key.as_str() == entity_key
                    && cursor.map_or(true, |c| id.as_str() > c)
            })
            .map(|((_, id), _)| id.clone())
            .collect();
        ids.sort();
        ids.truncate(limit);

        self.page_fetches
            .lock()
            .unwrap()
            .push((entity_key.to_string(), ids.len()));

        let next_cursor = if ids.len() == limit {
            ids.last().cloned()
        } else {
            None
        };
        Ok(SubscriberPage {
            connection_ids: ids,
            next_cursor,
        })
    }
}

/// Push transport that records attempts and tracks concurrent sends.
pub struct FakeTransport {
    pub attempts: Mutex<Vec<String>>,
    pub payloads: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    stale: HashSet<String>,
    transient: HashSet<String>,
    delay: Duration,
    journal: Option<Journal>,
}

impl FakeTransport {
    pub fn new(delay: Duration) -> Self {
        Self {
            attempts: Mutex::new(Vec::new()),
            payloads: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            stale: HashSet::new(),
            transient: HashSet::new(),
            delay,
            journal: None,
        }
    }

    pub fn with_stale(mut self, ids: &[&str]) -> Self {
        self.stale.extend(ids.iter().map(|s| s.to_string()));
        self
    }

    pub fn with_transient(mut self, ids: &[&str]) -> Self {
        self.transient.extend(ids.iter().map(|s| s.to_string()));
        self
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }
}

#[async_trait]
impl PushTransport for FakeTransport {
    async fn push(&self, connection_id: &str, payload: &str) -> Result<(), PushError> {
        self.attempts.lock().unwrap().push(connection_id.to_string());
        self.payloads.lock().unwrap().push(payload.to_string());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(journal) = &self.journal {
            journal.lock().unwrap().push(format!("sent:{}", connection_id));
        }

        if self.stale.contains(connection_id) {
            Err(PushError::Status(410))
        } else if self.transient.contains(connection_id) {
            Err(PushError::Status(429))
        } else {
            Ok(())
        }
    }
}

/// Records requested delays and returns immediately.
#[derive(Default)]
pub struct RecordingSleeper {
    pub delays: Mutex<Vec<Duration>>,
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().unwrap().push(duration);
    }
}

impl RecordingSleeper {
    pub fn recorded(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

pub fn connection_ids(prefix: &str, count: usize) -> Vec<String> {
    (0..count).map(|i| format!("{}-{:04}", prefix, i)).collect()
}

pub fn notify_config(page_size: usize, max_concurrency: usize) -> NotifyConfig {
    NotifyConfig {
        page_size,
        max_concurrency,
        ..NotifyConfig::default()
    }
}

pub fn dispatcher(
    store: Arc<MemorySubscriptions>,
    transport: Arc<FakeTransport>,
    sleeper: Arc<RecordingSleeper>,
    config: &NotifyConfig,
) -> FanoutDispatcher {
    let reaper = StaleConnectionReaper::new(store.clone(), sleeper, config);
    FanoutDispatcher::new(store, transport, reaper, config)
}
