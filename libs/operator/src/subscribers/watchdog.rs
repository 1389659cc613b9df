//! Deadline-Watchdog subscriber (§4.D.2).
//!
//! Grounded in
//! `examples/original_source/kubekarma/controlleroperator/core/testsuite/resultsdeadline.py`.
//! That source snapshot's `error_event` call on a miss is commented out; `SPEC_FULL.md`
//! §4.D.2/§8 scenario 4 require the event regardless, so it is emitted here.

use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use chrono::Utc;
use cron::Schedule;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use testguard_proto::ReportRequest;
use tracing::{error, warn};

use crate::crd::testsuite::API_GROUP;
use crate::error::{Error, Result};
use crate::scheduler::{Scheduler, TaskHandle};

/// Padding added to the cron-computed next fire time to accommodate worker startup and
/// test execution, matching the source's `time_execution_estimation` default.
pub const DEFAULT_EXECUTION_PADDING: Duration = Duration::from_secs(60);

const RUN_TOO_CLOSE_WARNING: Duration = Duration::from_secs(5 * 60);

struct State {
    last_seen: Option<SystemTime>,
    next_handle: Option<TaskHandle>,
}

pub struct DeadlineWatchdog {
    schedule: Schedule,
    padding: Duration,
    client: Client,
    reporter: Reporter,
    namespace: String,
    name: String,
    scheduler: Arc<Scheduler>,
    state: Mutex<State>,
}

impl DeadlineWatchdog {
    pub fn new(
        cron_expr: &str,
        client: Client,
        reporter: Reporter,
        namespace: String,
        name: String,
        scheduler: Arc<Scheduler>,
    ) -> Result<Arc<Self>> {
        // `cron` expects a 6-field expression (seconds first); the CRD's schedule is the
        // familiar 5-field form, so prepend a fixed "0" seconds field.
        let expr = format!("0 {cron_expr}");
        let schedule = Schedule::from_str(&expr).map_err(|e| Error::CronError(e.to_string()))?;
        let watchdog = Arc::new(Self {
            schedule,
            padding: DEFAULT_EXECUTION_PADDING,
            client,
            reporter,
            namespace,
            name,
            scheduler,
            state: Mutex::new(State {
                last_seen: None,
                next_handle: None,
            }),
        });
        watchdog.clone().arm();
        Ok(watchdog)
    }

    fn next_deadline(&self) -> SystemTime {
        let now = Utc::now();
        let next = self
            .schedule
            .after(&now)
            .next()
            .unwrap_or(now + chrono::Duration::from_std(self.padding).unwrap());
        SystemTime::from(next) + self.padding
    }

    fn arm(self: Arc<Self>) {
        let deadline = self.next_deadline();
        let watchdog = self.clone();
        let handle = self
            .scheduler
            .schedule_at(deadline, 1, move || watchdog.check_deadline());
        self.state.lock().unwrap().next_handle = Some(handle);
    }

    fn check_deadline(self: Arc<Self>) {
        let last_seen = {
            let mut state = self.state.lock().unwrap();
            let last_seen = state.last_seen.take();
            state.next_handle = None;
            last_seen
        };

        match last_seen {
            None => {
                warn!(namespace = %self.namespace, name = %self.name, "no results received before deadline");
                let client = self.client.clone();
                let reporter = self.reporter.clone();
                let reference = self.object_reference();
                tokio::spawn(async move {
                    let recorder = Recorder::new(client, reporter, reference);
                    let event = Event {
                        type_: EventType::Warning,
                        reason: "NoResultsReceived".into(),
                        note: Some("no test suite results received before the expected deadline".into()),
                        action: "DeadlineCheck".into(),
                        secondary: None,
                    };
                    if let Err(e) = recorder.publish(event).await {
                        error!(error = %e, "failed to post NoResultsReceived event");
                    }
                });
            }
            Some(seen) => {
                if let Ok(elapsed) = SystemTime::now().duration_since(seen) {
                    if elapsed > RUN_TOO_CLOSE_WARNING {
                        warn!(
                            namespace = %self.namespace, name = %self.name,
                            "results received but execution time estimation looks too short"
                        );
                    }
                }
            }
        }

        self.arm();
    }

    fn object_reference(&self) -> ObjectReference {
        ObjectReference {
            api_version: Some(format!("{API_GROUP}/v1")),
            kind: Some("TestSuite".to_string()),
            name: Some(self.name.clone()),
            namespace: Some(self.namespace.clone()),
            ..Default::default()
        }
    }
}

#[async_trait::async_trait]
impl crate::hub::Subscriber for DeadlineWatchdog {
    async fn update(&self, _report: &ReportRequest) {
        self.state.lock().unwrap().last_seen = Some(SystemTime::now());
    }

    async fn on_delete(&self) {
        let handle = self.state.lock().unwrap().next_handle.take();
        if let Some(handle) = handle {
            self.scheduler.cancel(handle);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rejects_malformed_cron_expression() {
        let scheduler = Scheduler::new(prometheus_client::metrics::gauge::Gauge::default());
        let client = Client::try_from(kube::Config::new("http://localhost".parse().unwrap())).unwrap();
        let result = DeadlineWatchdog::new(
            "not a cron expr",
            client,
            Reporter::from("testguard-operator"),
            "default".into(),
            "ts-a".into(),
            scheduler,
        );
        assert!(result.is_err());
    }

    #[test]
    fn accepts_standard_five_field_cron_expression() {
        let scheduler = Scheduler::new(prometheus_client::metrics::gauge::Gauge::default());
        let client = Client::try_from(kube::Config::new("http://localhost".parse().unwrap())).unwrap();
        let result = DeadlineWatchdog::new(
            "*/5 * * * *",
            client,
            Reporter::from("testguard-operator"),
            "default".into(),
            "ts-a".into(),
            scheduler,
        );
        assert!(result.is_ok());
    }
}
