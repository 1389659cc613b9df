//! In-memory index of live resources keyed by `(namespace, name)` (§4.C).
//!
//! Grounded in `examples/original_source/kubekarma/controlleroperator/core/crdinstancemanager.py`'s
//! `CRD` identity dataclass; lock discipline follows the single-lock-per-operation policy
//! used throughout the teacher's `controller.rs` (`Arc<RwLock<Diagnostics>>`).

use std::collections::HashMap;
use std::sync::Mutex;

use crate::crd::TestSuiteSpec;
use crate::error::{Error, Result};

#[derive(Clone, Debug)]
pub struct ResourceRecord {
    pub namespace: String,
    pub name: String,
    pub plural: String,
    pub job_name: String,
    pub execution_id: String,
    pub spec_snapshot: TestSuiteSpec,
}

#[derive(Default)]
pub struct Registry {
    records: Mutex<HashMap<(String, String), ResourceRecord>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects duplicate inserts for the same `(namespace, name)`. The caller is
    /// responsible for treating this as benign only along the resume-on-restart path
    /// (§4.E); anywhere else it is a programming-invariant violation (§7f).
    pub fn insert(&self, record: ResourceRecord) -> Result<()> {
        let key = (record.namespace.clone(), record.name.clone());
        let mut records = self.records.lock().unwrap();
        if records.contains_key(&key) {
            return Err(Error::RegistryConflict {
                namespace: record.namespace,
                name: record.name,
            });
        }
        records.insert(key, record);
        Ok(())
    }

    pub fn get(&self, namespace: &str, name: &str) -> Option<ResourceRecord> {
        self.records
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn remove(&self, namespace: &str, name: &str) -> Option<ResourceRecord> {
        self.records
            .lock()
            .unwrap()
            .remove(&(namespace.to_string(), name.to_string()))
    }

    /// Overwrites an existing record's snapshot in place, e.g. after a `suspend` or
    /// `schedule` field change (§4.E Suspend-field change / Update). Unlike [`insert`],
    /// this is not a conflict to call when a record already exists — that is the point.
    pub fn replace(&self, record: ResourceRecord) {
        let key = (record.namespace.clone(), record.name.clone());
        self.records.lock().unwrap().insert(key, record);
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn record(namespace: &str, name: &str) -> ResourceRecord {
        ResourceRecord {
            namespace: namespace.into(),
            name: name.into(),
            plural: "testsuites".into(),
            job_name: format!("{name}-abcdef"),
            execution_id: "deadbeef".into(),
            spec_snapshot: TestSuiteSpec::default(),
        }
    }

    #[test]
    fn insert_then_get_round_trips() {
        let registry = Registry::new();
        registry.insert(record("default", "a")).unwrap();
        assert!(registry.get("default", "a").is_some());
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let registry = Registry::new();
        registry.insert(record("default", "a")).unwrap();
        let err = registry.insert(record("default", "a")).unwrap_err();
        assert!(matches!(err, Error::RegistryConflict { .. }));
    }

    #[test]
    fn same_name_different_namespace_is_distinct() {
        let registry = Registry::new();
        registry.insert(record("ns-a", "a")).unwrap();
        registry.insert(record("ns-b", "a")).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn replace_overwrites_existing_snapshot() {
        let registry = Registry::new();
        registry.insert(record("default", "a")).unwrap();
        let mut updated = record("default", "a");
        updated.spec_snapshot.schedule = "*/10 * * * *".into();
        registry.replace(updated);
        assert_eq!(
            registry.get("default", "a").unwrap().spec_snapshot.schedule,
            "*/10 * * * *"
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn remove_makes_room_for_reinsert() {
        let registry = Registry::new();
        registry.insert(record("default", "a")).unwrap();
        registry.remove("default", "a");
        registry.insert(record("default", "a")).unwrap();
        assert_eq!(registry.len(), 1);
    }
}
