use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// API group under which every annotation, finalizer and the CRD itself are namespaced.
pub const API_GROUP: &str = "testguard.io";

/// Recurring network test suite, reconciled into a `CronJob` plus a set of result
/// subscribers that track the suite's live execution status.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "testguard.io",
    version = "v1",
    kind = "TestSuite",
    namespaced,
    status = "TestSuiteStatus",
    derive = "PartialEq",
    derive = "Default",
    shortname = "ts",
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Status", "type":"string", "jsonPath":".status.testExecutionStatus"}"#,
    printcolumn = r#"{"name":"Suspend", "type":"boolean", "jsonPath":".spec.suspend"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TestSuiteSpec {
    /// Human readable name for the suite, unique within the namespace. Distinct from
    /// `metadata.name` for historical reasons (mirrors the source system's own field).
    pub name: String,

    /// 5-field cron expression controlling how often the worker `CronJob` runs.
    pub schedule: String,

    /// When true, the worker `CronJob` is suspended and no subscribers are kept alive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspend: Option<bool>,

    /// Ordered list of network assertions the worker must evaluate each run.
    pub network_validations: Vec<NetworkValidation>,
}

impl TestSuiteSpec {
    pub fn is_suspended(&self) -> bool {
        self.suspend.unwrap_or(false)
    }
}

/// A single named assertion. Exactly one of the `test_*` fields must be set; this is
/// enforced by [`crate::suite::validate::validate_spec`], not by the schema, matching the
/// source system's own runtime-checked "exactly one key" validation.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NetworkValidation {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_to_fail: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_dns_resolution: Option<DnsResolutionAssertion>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_ip_block: Option<IpBlockAssertion>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_exact_destination: Option<ExactDestinationAssertion>,
}

impl NetworkValidation {
    /// Number of assertion keys actually set. Validation requires this to equal 1.
    pub fn assertion_count(&self) -> usize {
        [
            self.test_dns_resolution.is_some(),
            self.test_ip_block.is_some(),
            self.test_exact_destination.is_some(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DnsResolutionAssertion {
    pub host: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IpBlockAssertion {
    pub cidr: String,
    #[serde(default)]
    pub expect_blocked: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExactDestinationAssertion {
    pub host: String,
    pub port: u16,
}

/// Controller-visible lifecycle phase of a `TestSuite` (§3).
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum Phase {
    #[default]
    Pending,
    Active,
    Suspended,
    Failed,
}

/// Health summary derived from the latest report (§3).
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum TestExecutionStatus {
    #[default]
    Pending,
    Succeeding,
    Failing,
}

/// Per-case outcome as reported by a worker.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum TestCaseOutcome {
    Succeeded,
    Failed,
    NotImplemented,
    Error,
}

impl TestCaseOutcome {
    pub fn is_bad(self) -> bool {
        matches!(self, TestCaseOutcome::Failed | TestCaseOutcome::Error)
    }
}

/// One entry of `.status.testCases` (§3 Test Case Record).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TestCaseStatus {
    pub name: String,
    pub status: TestCaseOutcome,
    pub execution_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Sentinel written for timestamps that have never been observed (§3).
pub const NEVER: &str = "-";

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TestSuiteStatus {
    #[serde(default)]
    pub phase: Phase,
    #[serde(default)]
    pub test_execution_status: TestExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_execution_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_succeeded_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_execution_error_time: Option<String>,
    #[serde(default)]
    pub test_cases: Vec<TestCaseStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passing_count: Option<String>,
    #[serde(default)]
    pub suspended: bool,
}
