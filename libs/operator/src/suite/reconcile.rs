//! Single `reconcile()` entry point implementing §4.E's Create / Delete / Resume-on-restart
//! / Suspend-field-change / Update branches.
//!
//! Grounded in the teacher's `libs/operator/src/controller.rs::reconcile` (namespace
//! extraction, `Action::requeue`/`await_change` shape, `#[instrument]` span) and the
//! branch-selection rule recorded in `DESIGN.md` under "E. Lifecycle Controller", which
//! maps kopf's five per-event handlers
//! (`examples/original_source/kubekarma/controlleroperator/kinds/testsuite.py`) onto this
//! one function.

use std::sync::Arc;

use k8s_openapi::api::batch::v1::CronJob;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::events::{Event, EventType, Recorder};
use kube::{Resource, ResourceExt};
use serde_json::json;
use tokio::time::Duration;
use tracing::{field, info, instrument, warn, Span};

use crate::crd::{Phase, TestSuite};
use crate::error::{Error, Result};
use crate::hub::Subscriber;
use crate::identity;
use crate::registry::ResourceRecord;
use crate::subscribers::{DeadlineWatchdog, StatusUpdater};
use crate::suite::cronjob;
use crate::suite::finalizer::{self, FINALIZER_NAME};
use crate::suite::validate::validate_spec;
use crate::telemetry;

use super::controller::Context;

const CRONJOB_ANNOTATION: &str = "testguard.io/cronjob";
const WORKER_TASK_ID_ANNOTATION: &str = "testguard.io/worker-task-id";

const REQUEUE_INTERVAL: Duration = Duration::from_secs(30);

#[instrument(skip(ctx, suite), fields(trace_id))]
pub async fn reconcile(suite: Arc<TestSuite>, ctx: Arc<Context>) -> Result<Action, Error> {
    let trace_id = telemetry::get_trace_id();
    Span::current().record("trace_id", field::display(&trace_id));
    let _timer = ctx.metrics.reconcile.count_and_measure(&trace_id);

    let namespace = suite.namespace().ok_or_else(|| {
        Error::UserInputError("TestSuite must be namespaced".to_string())
    })?;
    let name = suite.name_any();

    if suite.meta().deletion_timestamp.is_some() {
        return delete(&suite, &namespace, &name, &ctx).await;
    }

    let has_finalizer = suite
        .meta()
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|existing| existing == FINALIZER_NAME));
    let restart_annotation = suite
        .annotations()
        .get(WORKER_TASK_ID_ANNOTATION)
        .cloned();
    let existing = ctx.registry.get(&namespace, &name);

    match existing {
        None if restart_annotation.is_some() => {
            resume_on_restart(&suite, &namespace, &name, restart_annotation.unwrap(), &ctx).await
        }
        None => create(&suite, &namespace, &name, has_finalizer, &ctx).await,
        Some(record) => update(&suite, &namespace, &name, record, &ctx).await,
    }
}

pub fn error_policy(suite: Arc<TestSuite>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!(error = ?error, "reconcile failed");
    ctx.metrics.reconcile.set_failure(&suite, error);
    Action::requeue(Duration::from_secs(5 * 60))
}

async fn create(
    suite: &TestSuite,
    namespace: &str,
    name: &str,
    has_finalizer: bool,
    ctx: &Context,
) -> Result<Action> {
    if let Err(e) = validate_spec(&suite.spec) {
        warn!(namespace, name, error = %e, "TestSuite failed validation");
        patch_status_phase(ctx, namespace, name, Phase::Failed).await?;
        post_event(ctx, namespace, name, EventType::Warning, "InvalidSpec", &e.to_string()).await;
        return Ok(Action::await_change());
    }

    let execution_id = identity::execution_id(namespace, name);
    let job_name = identity::job_name(namespace, name);

    // A registry hit here means this namespace/name pair reached `create()` while already
    // tracked, bypassing the resume-on-restart branch that is the only place a duplicate is
    // expected (§7f): a programming-invariant violation, not a recoverable error.
    ctx.registry
        .insert(ResourceRecord {
            namespace: namespace.to_string(),
            name: name.to_string(),
            plural: TestSuite::plural(&()).to_string(),
            job_name: job_name.clone(),
            execution_id: execution_id.clone(),
            spec_snapshot: suite.spec.clone(),
        })
        .unwrap_or_else(|e| unreachable!("{e}"));

    let job = cronjob::build(suite, &job_name, &execution_id, &ctx.worker_config)?;
    let jobs: Api<CronJob> = Api::namespaced(ctx.client.clone(), namespace);
    jobs.create(&Default::default(), &job).await?;

    wire_subscribers(ctx, namespace, name, &execution_id, &suite.spec.schedule).await?;

    if !has_finalizer {
        finalizer::add(ctx.client.clone(), name, namespace).await?;
    }

    let suites: Api<TestSuite> = Api::namespaced(ctx.client.clone(), namespace);
    let annotation_patch = json!({
        "metadata": {
            "annotations": {
                CRONJOB_ANNOTATION: job_name,
                WORKER_TASK_ID_ANNOTATION: execution_id,
            }
        }
    });
    suites
        .patch(name, &PatchParams::default(), &Patch::Merge(annotation_patch))
        .await?;

    patch_status_phase(ctx, namespace, name, Phase::Active).await?;
    post_event(
        ctx,
        namespace,
        name,
        EventType::Normal,
        "CronJobCreated",
        "created worker CronJob for this test suite",
    )
    .await;

    info!(namespace, name, "TestSuite created");
    Ok(Action::requeue(REQUEUE_INTERVAL))
}

async fn delete(suite: &TestSuite, namespace: &str, name: &str, ctx: &Context) -> Result<Action> {
    if let Some(record) = ctx.registry.get(namespace, name) {
        ctx.hub.remove_all(&record.execution_id).await;
        ctx.registry.remove(namespace, name);
    }

    let has_finalizer = suite
        .meta()
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|existing| existing == FINALIZER_NAME));
    if has_finalizer {
        finalizer::delete(ctx.client.clone(), name, namespace).await?;
    }

    info!(namespace, name, "TestSuite deleted");
    Ok(Action::await_change())
}

async fn resume_on_restart(
    suite: &TestSuite,
    namespace: &str,
    name: &str,
    execution_id: String,
    ctx: &Context,
) -> Result<Action> {
    let job_name = suite
        .annotations()
        .get(CRONJOB_ANNOTATION)
        .cloned()
        .unwrap_or_else(|| identity::job_name(namespace, name));

    ctx.registry.insert(ResourceRecord {
        namespace: namespace.to_string(),
        name: name.to_string(),
        plural: TestSuite::plural(&()).to_string(),
        job_name,
        execution_id: execution_id.clone(),
        spec_snapshot: suite.spec.clone(),
    })?;

    wire_subscribers(ctx, namespace, name, &execution_id, &suite.spec.schedule).await?;

    info!(namespace, name, "TestSuite resumed after controller restart");
    Ok(Action::requeue(REQUEUE_INTERVAL))
}

async fn update(
    suite: &TestSuite,
    namespace: &str,
    name: &str,
    record: ResourceRecord,
    ctx: &Context,
) -> Result<Action> {
    let was_suspended = record.spec_snapshot.is_suspended();
    let now_suspended = suite.spec.is_suspended();

    if was_suspended != now_suspended {
        patch_cronjob_suspend(ctx, namespace, &record.job_name, now_suspended).await?;
        if now_suspended {
            ctx.hub.remove_all(&record.execution_id).await;
            patch_status_phase(ctx, namespace, name, Phase::Suspended).await?;
            post_event(
                ctx,
                namespace,
                name,
                EventType::Normal,
                "TestSuiteSuspended",
                "test suite suspended",
            )
            .await;
        } else {
            wire_subscribers(ctx, namespace, name, &record.execution_id, &suite.spec.schedule).await?;
            patch_status_phase(ctx, namespace, name, Phase::Active).await?;
            post_event(
                ctx,
                namespace,
                name,
                EventType::Normal,
                "TestSuiteResumed",
                "test suite resumed",
            )
            .await;
        }
        ctx.registry.replace(ResourceRecord {
            spec_snapshot: suite.spec.clone(),
            ..record
        });
        return Ok(Action::requeue(REQUEUE_INTERVAL));
    }

    if record.spec_snapshot.schedule != suite.spec.schedule && !now_suspended {
        ctx.hub.remove_all(&record.execution_id).await;
        wire_subscribers(ctx, namespace, name, &record.execution_id, &suite.spec.schedule).await?;
        ctx.registry.replace(ResourceRecord {
            spec_snapshot: suite.spec.clone(),
            ..record
        });
        info!(namespace, name, "TestSuite schedule changed, watchdog re-armed");
    }

    Ok(Action::requeue(REQUEUE_INTERVAL))
}

async fn wire_subscribers(
    ctx: &Context,
    namespace: &str,
    name: &str,
    execution_id: &str,
    schedule: &str,
) -> Result<()> {
    let status_updater: Arc<dyn Subscriber> = Arc::new(StatusUpdater::new(
        ctx.client.clone(),
        ctx.reporter.clone(),
        namespace.to_string(),
        name.to_string(),
    ));
    ctx.hub.add(execution_id, status_updater).await;

    let watchdog: Arc<dyn Subscriber> = DeadlineWatchdog::new(
        schedule,
        ctx.client.clone(),
        ctx.reporter.clone(),
        namespace.to_string(),
        name.to_string(),
        ctx.scheduler.clone(),
    )?;
    ctx.hub.add(execution_id, watchdog).await;
    Ok(())
}

async fn patch_status_phase(ctx: &Context, namespace: &str, name: &str, phase: Phase) -> Result<()> {
    let suites: Api<TestSuite> = Api::namespaced(ctx.client.clone(), namespace);
    let patch = Patch::Merge(json!({ "status": { "phase": phase } }));
    suites
        .patch_status(name, &PatchParams::apply("testguard-operator").force(), &patch)
        .await?;
    Ok(())
}

async fn patch_cronjob_suspend(
    ctx: &Context,
    namespace: &str,
    job_name: &str,
    suspend: bool,
) -> Result<()> {
    let jobs: Api<CronJob> = Api::namespaced(ctx.client.clone(), namespace);
    let patch = Patch::Merge(cronjob::suspend_patch(suspend));
    jobs.patch(job_name, &PatchParams::default(), &patch).await?;
    Ok(())
}

async fn post_event(
    ctx: &Context,
    namespace: &str,
    name: &str,
    type_: EventType,
    reason: &str,
    note: &str,
) {
    let reference = k8s_openapi::api::core::v1::ObjectReference {
        api_version: Some(format!("{}/v1", crate::crd::testsuite::API_GROUP)),
        kind: Some("TestSuite".to_string()),
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    };
    let recorder = Recorder::new(ctx.client.clone(), ctx.reporter.clone(), reference);
    let event = Event {
        type_,
        reason: reason.to_string(),
        note: Some(note.to_string()),
        action: "Reconcile".to_string(),
        secondary: None,
    };
    if let Err(e) = recorder.publish(event).await {
        tracing::error!(error = %e, reason, "failed to post event");
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn suspend_patch_shape_matches_cronjob_spec_field() {
        let patch = cronjob::suspend_patch(true);
        assert_eq!(patch["spec"]["suspend"], json!(true));
    }

    mod mocked_client {
        use super::*;
        use crate::crd::TestSuiteSpec;
        use crate::hub::ResultsHub;
        use crate::metrics::Metrics;
        use crate::registry::Registry;
        use crate::scheduler::Scheduler;
        use crate::suite::controller::Diagnostics;

        use assert_json_diff::assert_json_include;
        use chrono::Utc;
        use http::{Request, Response};
        use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
        use kube::client::Body;
        use kube::runtime::events::Reporter;
        use kube::{Client, Resource};

        fn test_context(client: Client) -> Context {
            let metrics = Arc::new(Metrics::default());
            Context {
                client,
                diagnostics: Arc::new(tokio::sync::RwLock::new(Diagnostics::default())),
                hub: Arc::new(ResultsHub::new(metrics.hub_subscribers.clone())),
                scheduler: Scheduler::new(metrics.scheduler_pending.clone()),
                metrics,
                registry: Arc::new(Registry::new()),
                reporter: Reporter::from("testguard-operator"),
                worker_config: Arc::new(cronjob::WorkerConfig {
                    worker_image: "ghcr.io/example/testguard-worker:latest".into(),
                    controller_server_host: "testguard-operator.default.svc:8080".into(),
                }),
            }
        }

        fn deleting_suite() -> TestSuite {
            let mut suite = TestSuite::new("ts-a", TestSuiteSpec::default());
            suite.meta_mut().namespace = Some("default".into());
            suite.finalizers_mut().push(FINALIZER_NAME.to_string());
            suite.meta_mut().deletion_timestamp = Some(Time(Utc::now()));
            suite
        }

        #[tokio::test]
        async fn delete_tears_down_hub_and_removes_finalizer() {
            let (mock_service, mut handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
            let client = Client::new(mock_service, "default");
            let ctx = test_context(client);

            ctx.registry
                .insert(ResourceRecord {
                    namespace: "default".into(),
                    name: "ts-a".into(),
                    plural: TestSuite::plural(&()).to_string(),
                    job_name: "ts-a-abcdef".into(),
                    execution_id: "deadbeef".into(),
                    spec_snapshot: TestSuiteSpec::default(),
                })
                .unwrap();

            let suite = deleting_suite();

            let server = tokio::spawn(async move {
                let (request, send) = handle.next_request().await.expect("service not called");
                assert_eq!(request.method(), http::Method::PATCH);
                assert_eq!(
                    request.uri().to_string(),
                    "/apis/testguard.io/v1/namespaces/default/testsuites/ts-a?"
                );
                let expected_patch = serde_json::json!([
                    { "op": "test", "path": "/metadata/finalizers/0", "value": FINALIZER_NAME },
                    { "op": "remove", "path": "/metadata/finalizers/0" }
                ]);
                let req_body = request.into_body().collect_bytes().await.unwrap();
                let runtime_patch: serde_json::Value = serde_json::from_slice(&req_body).unwrap();
                assert_json_include!(actual: runtime_patch, expected: expected_patch);

                let mut responded = deleting_suite();
                responded.finalizers_mut().clear();
                let response = serde_json::to_vec(&responded).unwrap();
                send.send_response(Response::builder().body(Body::from(response)).unwrap());
            });

            delete(&suite, "default", "ts-a", &ctx).await.unwrap();
            tokio::time::timeout(std::time::Duration::from_secs(1), server)
                .await
                .expect("timeout waiting on mock apiserver")
                .expect("mock server task panicked");

            assert_eq!(ctx.hub.total_subscribers().await, 0);
            assert!(ctx.registry.get("default", "ts-a").is_none());
        }

        #[tokio::test]
        async fn delete_without_registry_entry_still_removes_finalizer() {
            let (mock_service, mut handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
            let client = Client::new(mock_service, "default");
            let ctx = test_context(client);
            let suite = deleting_suite();

            let server = tokio::spawn(async move {
                let (request, send) = handle.next_request().await.expect("service not called");
                assert_eq!(request.method(), http::Method::PATCH);
                let mut responded = deleting_suite();
                responded.finalizers_mut().clear();
                let response = serde_json::to_vec(&responded).unwrap();
                send.send_response(Response::builder().body(Body::from(response)).unwrap());
            });

            delete(&suite, "default", "ts-a", &ctx).await.unwrap();
            tokio::time::timeout(std::time::Duration::from_secs(1), server)
                .await
                .expect("timeout waiting on mock apiserver")
                .expect("mock server task panicked");
        }
    }
}
