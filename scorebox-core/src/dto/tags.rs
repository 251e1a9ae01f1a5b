//! Provenance tags written on scored outputs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const TAG_SOURCE: &str = "source";
pub const TAG_MODEL: &str = "model";
pub const TAG_STARTED_AT: &str = "started_at";
pub const TAG_FINISHED_AT: &str = "finished_at";
pub const TAG_CLUSTER_NAMESPACE: &str = "cluster_namespace";

/// Where a scored output came from and what produced it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provenance {
    pub source: String,
    pub model: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cluster: String,
    pub namespace: String,
}

impl Provenance {
    pub fn to_tags(&self) -> HashMap<String, String> {
        HashMap::from([
            (TAG_SOURCE.to_string(), self.source.clone()),
            (TAG_MODEL.to_string(), self.model.clone()),
            (TAG_STARTED_AT.to_string(), self.started_at.to_rfc3339()),
            (TAG_FINISHED_AT.to_string(), self.finished_at.to_rfc3339()),
            (
                TAG_CLUSTER_NAMESPACE.to_string(),
                format!("{}:{}", self.cluster, self.namespace),
            ),
        ])
    }
}
