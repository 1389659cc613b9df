//! Controller wiring: `Context`/`State`/`Diagnostics`, grounded in the teacher's
//! `libs/operator/src/controller.rs` (the middle generation — `Context{client,
//! diagnostics, metrics}` plus `State::to_context`/`State::metrics`/`State::diagnostics`).
//! The reflector-based multi-controller shape of the teacher's newest generation
//! (`echo/controller.rs`) is not used: this system reacts to gRPC reports via the Hub
//! rather than watching child `CronJob` events, so the simpler Context/State pattern fits.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use kube::api::{Api, ListParams};
use kube::client::Client;
use kube::runtime::{controller::Controller, events::Reporter, watcher::Config};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{error, info, trace};

use crate::crd::TestSuite;
use crate::hub::ResultsHub;
use crate::metrics::Metrics;
use crate::registry::Registry;
use crate::scheduler::Scheduler;
use crate::suite::cronjob::WorkerConfig;
use crate::suite::reconcile::{error_policy, reconcile};

/// Context injected into every `reconcile`/`error_policy` invocation.
pub struct Context {
    pub client: Client,
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    pub metrics: Arc<Metrics>,
    pub registry: Arc<Registry>,
    pub hub: Arc<ResultsHub>,
    pub scheduler: Arc<Scheduler>,
    pub reporter: Reporter,
    pub worker_config: Arc<WorkerConfig>,
}

/// Diagnostics surfaced by the web server's `/healthz`.
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
    #[serde(skip)]
    pub reporter: Reporter,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
            reporter: "testguard-operator".into(),
        }
    }
}

/// State shared between the controller and the HTTP server (§6.4).
#[derive(Clone)]
pub struct State {
    diagnostics: Arc<RwLock<Diagnostics>>,
    metrics: Arc<Metrics>,
    registry: Arc<Registry>,
    hub: Arc<ResultsHub>,
    scheduler: Arc<Scheduler>,
    worker_config: Arc<WorkerConfig>,
}

impl State {
    /// `metrics` is expected to already be wired to the same `prometheus_client::Registry`
    /// passed to `testguard_k8s_util::new_client_with_metrics`, so kube-client and operator
    /// metrics are both exposed on the same `/metrics` endpoint.
    pub fn new(scheduler: Arc<Scheduler>, worker_config: WorkerConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            diagnostics: Arc::new(RwLock::new(Diagnostics::default())),
            hub: Arc::new(ResultsHub::new(metrics.hub_subscribers.clone())),
            metrics,
            registry: Arc::new(Registry::new()),
            scheduler,
            worker_config: Arc::new(worker_config),
        }
    }

    pub fn metrics_text(&self) -> String {
        let mut buffer = String::new();
        prometheus_client::encoding::text::encode(&mut buffer, &self.metrics.registry).unwrap();
        buffer
    }

    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    /// Liveness for `/healthz` (§6.4): the HTTP server is alive iff the scheduler thread is.
    pub fn scheduler_alive(&self) -> bool {
        self.scheduler.is_alive()
    }

    pub fn hub(&self) -> Arc<ResultsHub> {
        self.hub.clone()
    }

    fn to_context(&self, client: Client) -> Arc<Context> {
        Arc::new(Context {
            client,
            diagnostics: self.diagnostics.clone(),
            metrics: self.metrics.clone(),
            registry: self.registry.clone(),
            hub: self.hub.clone(),
            scheduler: self.scheduler.clone(),
            reporter: "testguard-operator".into(),
            worker_config: self.worker_config.clone(),
        })
    }
}

/// Initialize the controller and drive it to completion (or shutdown signal).
pub async fn run(state: State, client: Client) {
    let suites = Api::<TestSuite>::all(client.clone());
    if let Err(e) = suites.list(&ListParams::default().limit(1)).await {
        error!("CRD is not queryable; {e:?}. Is the CRD installed?");
        info!("Installation: cargo run --bin crdgen | kubectl apply -f -");
        std::process::exit(1);
    }
    trace!("Init controller");
    Controller::new(suites, Config::default().any_semantic())
        .shutdown_on_signal()
        .run(reconcile, error_policy, state.to_context(client))
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;
}
