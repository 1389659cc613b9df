//! Deterministic identifier derivation (§3, §8 "Identifier determinism").
//!
//! Mirrors the source system's `sha1(f"{namespace}/{name}")[:8]` scheme so that identifiers
//! recomputed on restart from `(namespace, name)` always match what `Create` produced.

use sha1::{Digest, Sha1};

fn hex_digest(namespace: &str, name: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(format!("{namespace}/{name}").as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Stable 8-hex identifier tagging every worker spawned for this resource.
pub fn execution_id(namespace: &str, name: &str) -> String {
    hex_digest(namespace, name)[..8].to_string()
}

/// `CronJob` name: `<name>-<6 hex>`, the first 6 hex digits of the same digest.
pub fn job_name(namespace: &str, name: &str) -> String {
    format!("{name}-{}", &hex_digest(namespace, name)[..6])
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn execution_id_is_deterministic() {
        let a = execution_id("default", "ts-a");
        let b = execution_id("default", "ts-a");
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
    }

    #[test]
    fn execution_id_differs_by_namespace() {
        assert_ne!(
            execution_id("default", "ts-a"),
            execution_id("other", "ts-a")
        );
    }

    #[test]
    fn job_name_embeds_name_and_six_hex() {
        let job = job_name("default", "ts-a");
        assert!(job.starts_with("ts-a-"));
        assert_eq!(job.len(), "ts-a-".len() + 6);
    }

    #[test]
    fn job_name_prefix_matches_execution_id_prefix() {
        let id = execution_id("default", "ts-a");
        let job = job_name("default", "ts-a");
        assert!(job.ends_with(&id[..6]));
    }
}
