//! Status-Updater subscriber (§4.D.1).
//!
//! Grounded in
//! `examples/original_source/kubekarma/controlleroperator/core/testsuite/resultsreportsubscriber.py`
//! (overall-status classification, error event on failure) and
//! `.../core/testsuite/statustracker.py` (the exact monotone carry-forward rule for
//! `lastSucceededTime`/`lastExecutionErrorTime`). Status-patch mechanics follow
//! `examples/eosin-platform-eosin/storage-operator/src/util/patch.rs`
//! (`Api::patch_status` + `PatchParams::apply`).

use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use testguard_proto::{ReportRequest, TestCaseStatus as WireStatus};
use tracing::{error, warn};

use crate::crd::testsuite::API_GROUP;
use crate::crd::{
    Phase, TestCaseOutcome, TestCaseStatus as CrdTestCase, TestExecutionStatus, TestSuite,
    TestSuiteStatus, NEVER,
};

pub const FIELD_MANAGER: &str = "testguard-operator";

fn wire_outcome(status: i32) -> TestCaseOutcome {
    match WireStatus::from_i32(status) {
        Some(WireStatus::Succeeded) => TestCaseOutcome::Succeeded,
        Some(WireStatus::Failed) => TestCaseOutcome::Failed,
        Some(WireStatus::Notimplemented) => TestCaseOutcome::NotImplemented,
        _ => TestCaseOutcome::Error,
    }
}

/// Pure translation of a report into a status snapshot, per the monotone rule of §3.
/// Kept free of I/O so it can be unit tested without a `Client`.
fn calculate_status(
    previous: &Option<TestSuiteStatus>,
    report: &ReportRequest,
) -> (TestSuiteStatus, Vec<String>) {
    let mut test_cases = Vec::with_capacity(report.test_case_results.len());
    let mut failed = Vec::new();
    for case in &report.test_case_results {
        let outcome = wire_outcome(case.status);
        if outcome.is_bad() {
            failed.push(case.name.clone());
        }
        test_cases.push(CrdTestCase {
            name: case.name.clone(),
            status: outcome,
            execution_time: case.execution_duration.clone(),
            error: (!case.error_message.is_empty()).then(|| case.error_message.clone()),
        });
    }

    let total = test_cases.len();
    let bad = failed.len();
    let execution_status = if bad > 0 {
        TestExecutionStatus::Failing
    } else {
        TestExecutionStatus::Succeeding
    };

    let last_succeeded_time = match execution_status {
        TestExecutionStatus::Succeeding => Some(report.started_at_time.clone()),
        _ => previous
            .as_ref()
            .and_then(|p| p.last_succeeded_time.clone())
            .or_else(|| Some(NEVER.to_string())),
    };
    let last_execution_error_time = match execution_status {
        TestExecutionStatus::Failing => Some(report.started_at_time.clone()),
        _ => previous
            .as_ref()
            .and_then(|p| p.last_execution_error_time.clone())
            .or_else(|| Some(NEVER.to_string())),
    };

    let status = TestSuiteStatus {
        phase: Phase::Active,
        test_execution_status: execution_status,
        last_execution_time: Some(report.started_at_time.clone()),
        last_succeeded_time,
        last_execution_error_time,
        test_cases,
        passing_count: Some(format!("{} / {}", total - bad, total)),
        suspended: false,
    };
    (status, failed)
}

pub struct StatusUpdater {
    client: Client,
    namespace: String,
    name: String,
    reporter: Reporter,
    /// Last snapshot this subscriber produced, used for the monotone carry-forward rule.
    /// Owned by this instance alone, per §5's "no shared mutable state across subscribers".
    previous: Mutex<Option<TestSuiteStatus>>,
}

impl StatusUpdater {
    pub fn new(client: Client, reporter: Reporter, namespace: String, name: String) -> Self {
        Self {
            client,
            namespace,
            name,
            reporter,
            previous: Mutex::new(None),
        }
    }

    fn api(&self) -> Api<TestSuite> {
        Api::namespaced(self.client.clone(), &self.namespace)
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

#[async_trait]
impl crate::hub::Subscriber for StatusUpdater {
    async fn update(&self, report: &ReportRequest) {
        let previous = self.previous.lock().unwrap().clone();
        let (status, failed) = calculate_status(&previous, report);
        *self.previous.lock().unwrap() = Some(status.clone());

        let api = self.api();
        let patch = Patch::Merge(serde_json::json!({ "status": status }));
        if let Err(e) = api
            .patch_status(&self.name, &PatchParams::apply(FIELD_MANAGER).force(), &patch)
            .await
        {
            error!(namespace = %self.namespace, name = %self.name, error = %e, "failed to patch TestSuite status");
            return;
        }

        if !failed.is_empty() {
            warn!(namespace = %self.namespace, name = %self.name, ?failed, "test suite failed");
            let recorder = Recorder::new(self.client.clone(), self.reporter.clone(), self.object_reference());
            let event = Event {
                type_: EventType::Warning,
                reason: "TestSuiteFailed".into(),
                note: Some(format!("Failed test: {failed:?}")),
                action: "StatusUpdate".into(),
                secondary: None,
            };
            if let Err(e) = recorder.publish(event).await {
                error!(error = %e, "failed to post TestSuiteFailed event");
            }
        }
    }

    async fn on_delete(&self) {
        // No scheduler resources to reclaim; nothing else to tear down.
    }
}
