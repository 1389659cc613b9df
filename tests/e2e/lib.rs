#[cfg(all(test, feature = "e2e-tests"))]
mod test {
    use std::time::Duration;

    use k8s_openapi::api::batch::v1::CronJob;
    use kube::api::{Api, Patch, PatchParams, PostParams};
    use kube::client::Client;
    use kube::runtime::wait::{await_condition, conditions, Condition};
    use kube::ResourceExt;
    use testguard_operator::crd::{
        DnsResolutionAssertion, IpBlockAssertion, NetworkValidation, Phase, TestSuite,
        TestSuiteSpec,
    };
    use tokio::time::timeout;

    fn is_phase(phase: Phase) -> impl Condition<TestSuite> {
        move |obj: Option<&TestSuite>| {
            obj.and_then(|suite| suite.status.as_ref())
                .is_some_and(|status| status.phase == phase)
        }
    }

    fn is_cronjob_suspended(suspended: bool) -> impl Condition<CronJob> {
        move |obj: Option<&CronJob>| {
            obj.and_then(|job| job.spec.as_ref())
                .and_then(|spec| spec.suspend)
                .unwrap_or(false)
                == suspended
        }
    }

    async fn wait_for<R, C>(api: Api<R>, name: &str, condition: C)
    where
        R: kube::Resource
            + Clone
            + std::fmt::Debug
            + for<'de> k8s_openapi::serde::Deserialize<'de>
            + 'static
            + Send,
        C: Condition<R>,
    {
        timeout(
            Duration::from_secs(30),
            await_condition(api, name, condition),
        )
        .await
        .unwrap()
        .unwrap();
    }

    fn dns_suite(name: &str) -> TestSuite {
        TestSuite::new(
            name,
            TestSuiteSpec {
                name: name.to_string(),
                schedule: "*/5 * * * *".to_string(),
                suspend: None,
                network_validations: vec![NetworkValidation {
                    name: "resolve-example".to_string(),
                    allowed_to_fail: None,
                    test_dns_resolution: Some(DnsResolutionAssertion {
                        host: "example.com".to_string(),
                    }),
                    test_ip_block: None,
                    test_exact_destination: None,
                }],
            },
        )
    }

    async fn setup(name: &str) -> (Api<TestSuite>, Api<CronJob>) {
        let suite = dns_suite(name);

        let client = Client::try_default().await.unwrap();
        let suite_api = Api::<TestSuite>::namespaced(client.clone(), "default");

        suite_api
            .create(&PostParams::default(), &suite)
            .await
            .unwrap();

        let cronjob_api = Api::<CronJob>::namespaced(client.clone(), "default");
        wait_for(suite_api.clone(), name, is_phase(Phase::Active)).await;
        wait_for(cronjob_api.clone(), name, is_cronjob_suspended(false)).await;
        (suite_api, cronjob_api)
    }

    #[tokio::test]
    async fn testsuite_create() {
        let name = "test-create";
        setup(name).await;
    }

    #[tokio::test]
    async fn testsuite_delete() {
        let name = "test-delete";
        let (suite_api, cronjob_api) = setup(name).await;

        let cronjob = cronjob_api.get(name).await.unwrap();
        let suite = suite_api.get(name).await.unwrap();
        suite_api.delete(name, &Default::default()).await.unwrap();

        wait_for(
            suite_api.clone(),
            name,
            conditions::is_deleted(&suite.uid().unwrap()),
        )
        .await;

        wait_for(
            cronjob_api.clone(),
            name,
            conditions::is_deleted(&cronjob.uid().unwrap()),
        )
        .await;
    }

    #[tokio::test]
    async fn testsuite_suspend_resume() {
        let name = "test-suspend-resume";
        let (suite_api, cronjob_api) = setup(name).await;

        let mut suite = suite_api.get(name).await.unwrap();
        suite.spec.suspend = Some(true);
        suite.metadata.managed_fields = None;
        suite_api
            .patch(
                name,
                &PatchParams::apply("e2e-tests").force(),
                &Patch::Apply(&suite),
            )
            .await
            .unwrap();

        wait_for(suite_api.clone(), name, is_phase(Phase::Suspended)).await;
        wait_for(cronjob_api.clone(), name, is_cronjob_suspended(true)).await;

        let mut suite = suite_api.get(name).await.unwrap();
        suite.spec.suspend = Some(false);
        suite.metadata.managed_fields = None;
        suite_api
            .patch(
                name,
                &PatchParams::apply("e2e-tests").force(),
                &Patch::Apply(&suite),
            )
            .await
            .unwrap();

        wait_for(suite_api.clone(), name, is_phase(Phase::Active)).await;
        wait_for(cronjob_api.clone(), name, is_cronjob_suspended(false)).await;
    }

    #[tokio::test]
    async fn testsuite_change_schedule() {
        let name = "test-change-schedule";
        let (suite_api, cronjob_api) = setup(name).await;

        let mut suite = suite_api.get(name).await.unwrap();
        suite.spec.schedule = "*/10 * * * *".to_string();
        suite.metadata.managed_fields = None;
        suite_api
            .patch(
                name,
                &PatchParams::apply("e2e-tests").force(),
                &Patch::Apply(&suite),
            )
            .await
            .unwrap();

        timeout(Duration::from_secs(30), async {
            loop {
                let cronjob = cronjob_api.get(name).await.unwrap();
                if cronjob.spec.unwrap().schedule == "*/10 * * * *" {
                    break;
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn testsuite_invalid_spec_is_marked_failed() {
        let name = "test-invalid-spec";
        let mut suite = dns_suite(name);
        suite.spec.network_validations[0].test_ip_block =
            Some(IpBlockAssertion {
                cidr: "10.0.0.0/8".to_string(),
                expect_blocked: true,
            });

        let suite_api =
            Api::<TestSuite>::namespaced(Client::try_default().await.unwrap(), "default");
        suite_api
            .create(&PostParams::default(), &suite)
            .await
            .unwrap();

        wait_for(suite_api, name, is_phase(Phase::Failed)).await;
    }
}
