pub mod testsuite;

pub use testsuite::{
    DnsResolutionAssertion, ExactDestinationAssertion, IpBlockAssertion, NetworkValidation, Phase,
    TestCaseOutcome, TestCaseStatus, TestExecutionStatus, TestSuite, TestSuiteSpec,
    TestSuiteStatus,
};
