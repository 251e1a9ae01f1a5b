//! Work unit naming
//!
//! Every cluster object created for a work unit embeds the work unit id, so
//! concurrent runs on different source keys never touch each other's resources.
//! The id is a readable stem derived from the source key plus an xxh3 digest of
//! the raw key, which keeps distinct keys distinct even when their stems match
//! (`a/b` and `a.b` both sanitize to `a-b`).

use serde::{Deserialize, Serialize};
use std::fmt;
use xxhash_rust::xxh3::xxh3_64;

/// Maximum length of a cluster object name (DNS-1123 label)
pub const MAX_NAME_LEN: usize = 63;

pub const DEPLOYMENT_PREFIX: &str = "scoring-";
pub const SERVICE_PREFIX: &str = "svc-";
pub const INGRESS_PREFIX: &str = "ingress-";
pub const LOAD_BALANCER_PREFIX: &str = "lb-";

/// Suffix appended to an input basename to form the output key
pub const SCOREOUT_SUFFIX: &str = ".scoreout";

/// Suffix appended to the output key to form the diagnostic key
pub const ERROR_SUFFIX: &str = ".error";

const DIGEST_LEN: usize = 16;
const LONGEST_PREFIX: usize = INGRESS_PREFIX.len();
const MAX_STEM_LEN: usize = MAX_NAME_LEN - LONGEST_PREFIX - DIGEST_LEN - 1;

/// Name-safe identifier of a work unit
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkUnitId(String);

impl WorkUnitId {
    /// Derives the id from a source object key
    ///
    /// Non-alphanumeric characters (path separators and dots included) become
    /// `-`, letters are lowercased and the stem is truncated so every derived
    /// resource name stays within [`MAX_NAME_LEN`].
    pub fn from_source_key(key: &str) -> Self {
        let sanitized: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_lowercase()
                } else {
                    '-'
                }
            })
            .collect();

        let mut stem = sanitized.trim_matches('-').to_string();
        stem.truncate(MAX_STEM_LEN);
        let stem = stem.trim_end_matches('-');
        let stem = if stem.is_empty() { "unit" } else { stem };

        Self(format!("{}-{:016x}", stem, xxh3_64(key.as_bytes())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkUnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cluster object names derived from a work unit id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceNames {
    pub deployment: String,
    pub service: String,
    pub ingress: String,
    pub load_balancer: String,
}

impl ResourceNames {
    pub fn for_work_unit(id: &WorkUnitId) -> Self {
        Self {
            deployment: format!("{}{}", DEPLOYMENT_PREFIX, id),
            service: format!("{}{}", SERVICE_PREFIX, id),
            ingress: format!("{}{}", INGRESS_PREFIX, id),
            load_balancer: format!("{}{}", LOAD_BALANCER_PREFIX, id),
        }
    }
}

/// Last path segment of an object key
pub fn basename(key: &str) -> &str {
    key.trim_end_matches('/').rsplit('/').next().unwrap_or(key)
}

/// Joins a destination prefix and an object name with exactly one `/`
pub fn join_key(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix.trim_end_matches('/'), name)
    }
}

/// Destination key for the scored output of `source_key`
pub fn output_key(destination_prefix: &str, source_key: &str) -> String {
    join_key(
        destination_prefix,
        &format!("{}{}", basename(source_key), SCOREOUT_SUFFIX),
    )
}

/// Destination key for the diagnostic written when scoring `source_key` fails
pub fn error_key(destination_prefix: &str, source_key: &str) -> String {
    format!("{}{}", output_key(destination_prefix, source_key), ERROR_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_replaces_separators_and_dots() {
        let id = WorkUnitId::from_source_key("inbox/2024/scores.csv");
        assert!(id.as_str().starts_with("inbox-2024-scores-csv-"));
        assert!(!id.as_str().contains('/'));
        assert!(!id.as_str().contains('.'));
    }

    #[test]
    fn test_id_is_deterministic() {
        assert_eq!(
            WorkUnitId::from_source_key("a/b.csv"),
            WorkUnitId::from_source_key("a/b.csv")
        );
    }

    #[test]
    fn test_ids_distinct_when_stems_collide() {
        let keys = ["a/b", "a.b", "a-b", "A/b", "a//b", "a/b/"];
        for (i, left) in keys.iter().enumerate() {
            for right in &keys[i + 1..] {
                assert_ne!(
                    WorkUnitId::from_source_key(left),
                    WorkUnitId::from_source_key(right),
                    "{} and {} collided",
                    left,
                    right
                );
            }
        }
    }

    #[test]
    fn test_resource_names_are_legal() {
        let long_key = format!("{}/data.file.csv", "deeply/nested/folder".repeat(10));
        for key in ["x.csv", "folder/sub/file.v2.csv", "...", long_key.as_str()] {
            let names = ResourceNames::for_work_unit(&WorkUnitId::from_source_key(key));
            for name in [
                &names.deployment,
                &names.service,
                &names.ingress,
                &names.load_balancer,
            ] {
                assert!(name.len() <= MAX_NAME_LEN, "{} too long", name);
                assert!(!name.contains('/') && !name.contains('.'));
                assert!(!name.ends_with('-'));
                assert!(
                    name.chars()
                        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
                );
            }
        }
    }

    #[test]
    fn test_empty_stem_falls_back() {
        let id = WorkUnitId::from_source_key("./");
        assert!(id.as_str().starts_with("unit-"));
    }

    #[test]
    fn test_resource_name_prefixes() {
        let id = WorkUnitId::from_source_key("in/file.csv");
        let names = ResourceNames::for_work_unit(&id);
        assert_eq!(names.deployment, format!("scoring-{}", id));
        assert_eq!(names.service, format!("svc-{}", id));
        assert_eq!(names.ingress, format!("ingress-{}", id));
        assert_eq!(names.load_balancer, format!("lb-{}", id));
    }

    #[test]
    fn test_output_and_error_keys() {
        assert_eq!(
            output_key("outbox/", "inbox/2024/data.csv"),
            "outbox/data.csv.scoreout"
        );
        assert_eq!(output_key("", "data.csv"), "data.csv.scoreout");
        assert_eq!(
            error_key("outbox", "inbox/data.csv"),
            "outbox/data.csv.scoreout.error"
        );
    }
}
