//! Work unit domain types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

use crate::naming::{self, WorkUnitId};

pub const TAG_MODEL_IMAGE: &str = "modelimagename";
pub const TAG_CLUSTER: &str = "k8scluster";
pub const TAG_INGRESS_URL: &str = "k8singressurl";
pub const TAG_NAMESPACE: &str = "k8snamespace";

/// The four tags a triggering object must carry, all or nothing
pub const REQUIRED_TAGS: [&str; 4] = [TAG_MODEL_IMAGE, TAG_CLUSTER, TAG_INGRESS_URL, TAG_NAMESPACE];

/// How a provisioned deployment is reached from outside the cluster
///
/// Resolved once when a work unit is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteStrategy {
    /// Path on a pre-existing ingress controller
    Ingress { base_url: String },
    /// Dedicated load balancer whose hostname is assigned by the cloud provider
    LoadBalancer { hostname_timeout: Duration },
}

impl RouteStrategy {
    pub fn from_ingress_url(ingress_url: Option<&str>, hostname_timeout: Duration) -> Self {
        match ingress_url.map(str::trim).filter(|url| !url.is_empty()) {
            Some(url) => Self::Ingress {
                base_url: url.trim_end_matches('/').to_string(),
            },
            None => Self::LoadBalancer { hostname_timeout },
        }
    }
}

/// Model, cluster and route a work unit is scored with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoringTarget {
    pub model_image: String,
    pub cluster: String,
    pub namespace: String,
    pub route: RouteStrategy,
}

/// Configured defaults used when a triggering object carries no tags
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fallbacks {
    pub model_image: String,
    pub cluster: String,
    pub namespace: String,
    /// Absent means a load balancer is created per deployment
    pub ingress_url: Option<String>,
}

/// Tag set that cannot be turned into a scoring target
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TagError {
    #[error(
        "expected 0 or 4 tags, found {0}; provide all of modelimagename, k8scluster, k8singressurl and k8snamespace, or none to use configured defaults"
    )]
    PartialTagSet(usize),

    #[error("tag '{0}' is missing, misspelled or empty")]
    MissingTag(&'static str),

    #[error("configured default for '{0}' is empty")]
    EmptyFallback(&'static str),
}

/// Resolves the scoring target from the tags of a triggering object
///
/// No tags means configured fallbacks. Exactly four tags must name all of
/// [`REQUIRED_TAGS`] with non-empty values. Any other count is rejected so
/// that explicit and fallback values are never mixed.
pub fn resolve_target(
    tags: &HashMap<String, String>,
    fallbacks: &Fallbacks,
    hostname_timeout: Duration,
) -> Result<ScoringTarget, TagError> {
    if tags.is_empty() {
        for (name, value) in [
            (TAG_MODEL_IMAGE, &fallbacks.model_image),
            (TAG_CLUSTER, &fallbacks.cluster),
            (TAG_NAMESPACE, &fallbacks.namespace),
        ] {
            if value.trim().is_empty() {
                return Err(TagError::EmptyFallback(name));
            }
        }

        return Ok(ScoringTarget {
            model_image: fallbacks.model_image.clone(),
            cluster: fallbacks.cluster.clone(),
            namespace: fallbacks.namespace.clone(),
            route: RouteStrategy::from_ingress_url(
                fallbacks.ingress_url.as_deref(),
                hostname_timeout,
            ),
        });
    }

    if tags.len() != REQUIRED_TAGS.len() {
        return Err(TagError::PartialTagSet(tags.len()));
    }

    let tag = |name: &'static str| -> Result<String, TagError> {
        tags.get(name)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .ok_or(TagError::MissingTag(name))
    };

    Ok(ScoringTarget {
        model_image: tag(TAG_MODEL_IMAGE)?,
        cluster: tag(TAG_CLUSTER)?,
        namespace: tag(TAG_NAMESPACE)?,
        route: RouteStrategy::from_ingress_url(
            Some(tag(TAG_INGRESS_URL)?.as_str()),
            hostname_timeout,
        ),
    })
}

/// One input object to be scored, with its resolved configuration
///
/// Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkUnit {
    pub id: WorkUnitId,
    pub source_key: String,
    pub destination_prefix: String,
    pub target: ScoringTarget,
}

impl WorkUnit {
    pub fn new(
        source_key: impl Into<String>,
        destination_prefix: impl Into<String>,
        target: ScoringTarget,
    ) -> Self {
        let source_key = source_key.into();
        Self {
            id: WorkUnitId::from_source_key(&source_key),
            source_key,
            destination_prefix: destination_prefix.into(),
            target,
        }
    }

    pub fn basename(&self) -> &str {
        naming::basename(&self.source_key)
    }

    pub fn output_key(&self) -> String {
        naming::output_key(&self.destination_prefix, &self.source_key)
    }

    pub fn error_key(&self) -> String {
        naming::error_key(&self.destination_prefix, &self.source_key)
    }
}
