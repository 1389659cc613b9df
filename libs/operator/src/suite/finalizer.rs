//! Finalizer management for `TestSuite`, generalized from the teacher's
//! `libs/operator/src/finalizer.rs`-shaped helpers referenced by `echo/reconcile.rs`
//! (`finalizer::add`/`finalizer::delete`, a JSON patch test/add or test/remove pair
//! against `/metadata/finalizers`).

use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use serde_json::{json, Value};

use crate::crd::TestSuite;

pub const FINALIZER_NAME: &str = "testguard.io/finalizer";

pub async fn add(client: Client, name: &str, namespace: &str) -> Result<TestSuite, kube::Error> {
    let api: Api<TestSuite> = Api::namespaced(client, namespace);
    let patch: Value = json!({
        "op": "test", "path": "/metadata/finalizers", "value": null
    });
    let add: Value = json!({
        "op": "add", "path": "/metadata/finalizers", "value": vec![FINALIZER_NAME]
    });
    let patch = Patch::Json::<()>(json_patch::Patch(vec![
        serde_json::from_value(patch).unwrap(),
        serde_json::from_value(add).unwrap(),
    ]));
    api.patch(name, &PatchParams::default(), &patch).await
}

pub async fn delete(client: Client, name: &str, namespace: &str) -> Result<TestSuite, kube::Error> {
    let api: Api<TestSuite> = Api::namespaced(client, namespace);
    let patch: Value = json!({
        "op": "test", "path": "/metadata/finalizers/0", "value": FINALIZER_NAME
    });
    let remove: Value = json!({
        "op": "remove", "path": "/metadata/finalizers/0"
    });
    let patch = Patch::Json::<()>(json_patch::Patch(vec![
        serde_json::from_value(patch).unwrap(),
        serde_json::from_value(remove).unwrap(),
    ]));
    api.patch(name, &PatchParams::default(), &patch).await
}
