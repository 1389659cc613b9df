//! Cooperative single-thread timer wheel (§4.A).
//!
//! Entries are drained by one dedicated OS thread so that watchdog callbacks never need
//! their own locking: `/healthz` reports liveness by checking that thread, not a task.
//! Grounded in `examples/original_source/kubekarma/controlleroperator/core/scheduler.py`'s
//! `sched.scheduler` + `threading.Event` design, rebuilt on `std::sync::{Mutex, Condvar}`.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

use prometheus_client::metrics::gauge::Gauge;
use tokio::runtime::Handle as TokioHandle;
use tracing::{error, warn};

/// Opaque reference to a scheduled entry, used for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle(u64);

type Callback = Box<dyn FnOnce() + Send + 'static>;

struct Entry {
    deadline: SystemTime,
    priority: i32,
    seq: u64,
    handle: TaskHandle,
    callback: Option<Callback>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for Entry {}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; we want the earliest deadline (then highest priority,
        // then lowest seq) to sort first, so reverse the natural order here.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| self.priority.cmp(&other.priority))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}
impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct Inner {
    heap: BinaryHeap<Entry>,
    stopped: bool,
}

/// Cooperative scheduler: one condvar-guarded heap, one runner thread.
pub struct Scheduler {
    inner: Mutex<Inner>,
    condvar: Condvar,
    next_seq: AtomicU64,
    /// Cleared once `stop()` has been observed by the runner.
    alive: AtomicBool,
    /// Pending heap size sampled by the HTTP server's `/metrics` (§6.4). Shares the
    /// underlying atomic with `Metrics::scheduler_pending`.
    pending_gauge: Gauge<i64, AtomicI64>,
}

impl Scheduler {
    pub fn new(pending_gauge: Gauge<i64, AtomicI64>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
                stopped: false,
            }),
            condvar: Condvar::new(),
            next_seq: AtomicU64::new(0),
            alive: AtomicBool::new(true),
            pending_gauge,
        })
    }

    /// Spawn the dedicated runner thread. `tokio_handle` lets synchronous callbacks hand off
    /// to async Kubernetes calls without the scheduler thread itself becoming async.
    pub fn spawn(self: &Arc<Self>, tokio_handle: TokioHandle) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        std::thread::Builder::new()
            .name("testguard-scheduler".into())
            .spawn(move || scheduler.run(tokio_handle))
            .expect("failed to spawn scheduler thread")
    }

    /// Whether the runner thread is still looping. Backs the `/healthz` liveness check.
    pub fn is_alive(&self) -> bool {
        self.alive.load(AtomicOrdering::Relaxed)
    }

    pub fn schedule_at(
        self: &Arc<Self>,
        deadline: SystemTime,
        priority: i32,
        callback: impl FnOnce() + Send + 'static,
    ) -> TaskHandle {
        let seq = self.next_seq.fetch_add(1, AtomicOrdering::Relaxed);
        let handle = TaskHandle(seq);
        let entry = Entry {
            deadline,
            priority,
            seq,
            handle,
            callback: Some(Box::new(callback)),
        };
        let mut inner = self.inner.lock().unwrap();
        inner.heap.push(entry);
        let pending = inner.heap.len() as i64;
        drop(inner);
        self.pending_gauge.set(pending);
        self.condvar.notify_all();
        handle
    }

    /// Cancel a pending entry. No-op if it already fired or is unknown.
    pub fn cancel(&self, handle: TaskHandle) {
        let mut inner = self.inner.lock().unwrap();
        let items: Vec<Entry> = inner.heap.drain().collect();
        inner.heap = items
            .into_iter()
            .filter(|entry| entry.handle != handle)
            .collect();
        let pending = inner.heap.len() as i64;
        drop(inner);
        self.pending_gauge.set(pending);
    }

    pub fn empty(&self) -> bool {
        self.inner.lock().unwrap().heap.is_empty()
    }

    pub fn stop(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.stopped = true;
        drop(inner);
        self.condvar.notify_all();
    }

    fn run(&self, tokio_handle: TokioHandle) {
        loop {
            let mut inner = self.inner.lock().unwrap();
            loop {
                if inner.stopped {
                    if !inner.heap.is_empty() {
                        warn!(pending = inner.heap.len(), "scheduler stopped with pending entries");
                    }
                    self.alive.store(false, AtomicOrdering::Relaxed);
                    return;
                }
                match inner.heap.peek() {
                    None => {
                        inner = self.condvar.wait(inner).unwrap();
                    }
                    Some(next) => {
                        let now = SystemTime::now();
                        if next.deadline <= now {
                            break;
                        }
                        let wait = next.deadline.duration_since(now).unwrap_or(Duration::ZERO);
                        let (guard, _timeout) = self.condvar.wait_timeout(inner, wait).unwrap();
                        inner = guard;
                    }
                }
            }

            let mut due = Vec::new();
            let now = SystemTime::now();
            while let Some(next) = inner.heap.peek() {
                if next.deadline > now {
                    break;
                }
                due.push(inner.heap.pop().unwrap());
            }
            let pending = inner.heap.len() as i64;
            drop(inner);
            self.pending_gauge.set(pending);

            for mut entry in due {
                let callback = entry.callback.take().expect("callback invoked once");
                let _guard = tokio_handle.enter();
                if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(callback)) {
                    error!(?panic, "scheduler callback panicked");
                }
            }
        }
    }
}
