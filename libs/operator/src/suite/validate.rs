//! Spec validation, grounded in
//! `examples/original_source/kubekarma/controlleroperator/kinds/networktestsuite.py`'s
//! runtime "exactly one assertion key, unique names" checks — enforced here in Rust since
//! `kube::CustomResource`'s schema derive cannot express a `oneOf` across sibling fields.

use std::collections::HashSet;

use crate::crd::TestSuiteSpec;
use crate::error::Error;

pub fn validate_spec(spec: &TestSuiteSpec) -> Result<(), Error> {
    if spec.schedule.trim().is_empty() {
        return Err(Error::InvalidSpec("schedule must not be empty".into()));
    }

    let mut seen = HashSet::with_capacity(spec.network_validations.len());
    for validation in &spec.network_validations {
        if validation.name.trim().is_empty() {
            return Err(Error::InvalidSpec(
                "every networkValidations entry needs a name".into(),
            ));
        }
        if !seen.insert(validation.name.as_str()) {
            return Err(Error::InvalidSpec(format!(
                "duplicate networkValidations name {:?}",
                validation.name
            )));
        }
        match validation.assertion_count() {
            1 => {}
            0 => {
                return Err(Error::InvalidSpec(format!(
                    "networkValidations[{:?}] sets no assertion (need exactly one of \
                     testDnsResolution/testIpBlock/testExactDestination)",
                    validation.name
                )))
            }
            n => {
                return Err(Error::InvalidSpec(format!(
                    "networkValidations[{:?}] sets {n} assertions, expected exactly one",
                    validation.name
                )))
            }
        }
    }

    Ok(())
}
