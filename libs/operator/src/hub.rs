//! Pub/sub fan-out of incoming reports to per-resource subscribers (§4.B).
//!
//! Grounded in the three evolutionary versions of
//! `examples/original_source/kubekarma/controlleroperator/resultspublisher.py` /
//! `interfaces/resultspublisher.py` / `core/abc/resultspublisher.py`: a `execution_id ->
//! set<subscriber>` map, idempotent `add`, destructive `remove_all` invoking each
//! subscriber's teardown hook individually so one bad teardown cannot orphan others.

use std::collections::HashMap;
use std::sync::atomic::AtomicI64;
use std::sync::Arc;

use async_trait::async_trait;
use prometheus_client::metrics::gauge::Gauge;
use testguard_proto::ReportRequest;
use tokio::sync::Mutex;
use tracing::warn;

/// Capability shared by both subscriber kinds (§4.D).
#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn update(&self, report: &ReportRequest);

    /// Called exactly once when the subscriber is removed from the hub.
    async fn on_delete(&self);
}

pub struct ResultsHub {
    subscribers: Mutex<HashMap<String, Vec<Arc<dyn Subscriber>>>>,
    /// Live subscriber count sampled by the HTTP server's `/metrics` (§6.4). Shares the
    /// underlying atomic with `Metrics::hub_subscribers`, so updates here are visible there.
    subscriber_gauge: Gauge<i64, AtomicI64>,
}

impl ResultsHub {
    pub fn new(subscriber_gauge: Gauge<i64, AtomicI64>) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            subscriber_gauge,
        }
    }

    /// Idempotent: adding the same subscriber (by pointer identity) twice is a no-op.
    pub async fn add(&self, execution_id: &str, subscriber: Arc<dyn Subscriber>) {
        let mut subscribers = self.subscribers.lock().await;
        let set = subscribers.entry(execution_id.to_string()).or_default();
        if !set.iter().any(|existing| Arc::ptr_eq(existing, &subscriber)) {
            set.push(subscriber);
        }
        let total: i64 = subscribers.values().map(Vec::len).sum::<usize>() as i64;
        drop(subscribers);
        self.subscriber_gauge.set(total);
    }

    /// Fan out a report to every live subscriber for `execution_id`. Iterates a snapshot
    /// cloned under the lock so user callbacks never run while the lock is held.
    pub async fn publish(&self, execution_id: &str, report: &ReportRequest) {
        let snapshot = {
            let subscribers = self.subscribers.lock().await;
            subscribers.get(execution_id).cloned().unwrap_or_default()
        };
        if snapshot.is_empty() {
            warn!(execution_id, "report received for unknown or torn-down execution id");
        }
        for subscriber in snapshot {
            subscriber.update(report).await;
        }
    }

    /// Detach and tear down every subscriber for `execution_id`. After this call,
    /// `publish` for the same id is a no-op.
    pub async fn remove_all(&self, execution_id: &str) {
        let removed = {
            let mut subscribers = self.subscribers.lock().await;
            let removed = subscribers.remove(execution_id).unwrap_or_default();
            let total: i64 = subscribers.values().map(Vec::len).sum::<usize>() as i64;
            self.subscriber_gauge.set(total);
            removed
        };
        for subscriber in removed {
            subscriber.on_delete().await;
        }
    }

    pub async fn subscriber_count(&self, execution_id: &str) -> usize {
        self.subscribers
            .lock()
            .await
            .get(execution_id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub async fn total_subscribers(&self) -> usize {
        self.subscribers.lock().await.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSubscriber {
        updates: AtomicUsize,
        deletes: AtomicUsize,
    }

    impl CountingSubscriber {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                updates: AtomicUsize::new(0),
                deletes: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Subscriber for CountingSubscriber {
        async fn update(&self, _report: &ReportRequest) {
            self.updates.fetch_add(1, Ordering::SeqCst);
        }
        async fn on_delete(&self) {
            self.deletes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn sample_report() -> ReportRequest {
        ReportRequest {
            execution_id: "abc".into(),
            started_at_time: "2024-01-01T00:00:00Z".into(),
            test_case_results: vec![],
        }
    }

    #[tokio::test]
    async fn publish_reaches_every_live_subscriber() {
        let hub = ResultsHub::new(Gauge::default());
        let a = CountingSubscriber::new();
        let b = CountingSubscriber::new();
        hub.add("id-1", a.clone()).await;
        hub.add("id-1", b.clone()).await;

        hub.publish("id-1", &sample_report()).await;

        assert_eq!(a.updates.load(Ordering::SeqCst), 1);
        assert_eq!(b.updates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn add_is_idempotent_for_same_subscriber() {
        let hub = ResultsHub::new(Gauge::default());
        let a = CountingSubscriber::new();
        hub.add("id-1", a.clone()).await;
        hub.add("id-1", a.clone()).await;
        assert_eq!(hub.subscriber_count("id-1").await, 1);
    }

    #[tokio::test]
    async fn remove_all_tears_down_every_subscriber_exactly_once() {
        let hub = ResultsHub::new(Gauge::default());
        let a = CountingSubscriber::new();
        let b = CountingSubscriber::new();
        hub.add("id-1", a.clone()).await;
        hub.add("id-1", b.clone()).await;

        hub.remove_all("id-1").await;

        assert_eq!(a.deletes.load(Ordering::SeqCst), 1);
        assert_eq!(b.deletes.load(Ordering::SeqCst), 1);
        assert_eq!(hub.subscriber_count("id-1").await, 0);
    }

    #[tokio::test]
    async fn publish_after_remove_all_is_a_noop() {
        let hub = ResultsHub::new(Gauge::default());
        let a = CountingSubscriber::new();
        hub.add("id-1", a.clone()).await;
        hub.remove_all("id-1").await;

        hub.publish("id-1", &sample_report()).await;

        assert_eq!(a.updates.load(Ordering::SeqCst), 0);
    }
}
