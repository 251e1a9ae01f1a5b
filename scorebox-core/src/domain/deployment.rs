//! Deployment domain model
//!
//! Represents the cluster resources provisioned for one work unit (or one
//! shared batch) and the policy deciding how many replicas they run.

use serde::{Deserialize, Serialize};

use super::work_unit::RouteStrategy;
use crate::naming::ResourceNames;

/// Reference to the compute and networking objects of a deployment
///
/// Owned by a single orchestrator run; never shared across work units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentHandle {
    /// Cluster the objects live in
    pub cluster: String,

    /// Namespace the objects live in
    pub namespace: String,

    /// Deployment, service and route names
    pub names: ResourceNames,

    /// Replica count requested at creation
    pub replicas: u32,

    /// Route type that was created
    pub route: RouteStrategy,

    /// Externally reachable base URL of the scoring service
    pub url: String,
}

impl DeploymentHandle {
    /// Name of the route object, whichever kind was created
    pub fn route_name(&self) -> &str {
        match self.route {
            RouteStrategy::Ingress { .. } => &self.names.ingress,
            RouteStrategy::LoadBalancer { .. } => &self.names.load_balancer,
        }
    }
}

/// Replica counts reported by the cluster for a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaStatus {
    pub desired: u32,
    pub available: u32,
}

impl ReplicaStatus {
    pub fn is_complete(&self) -> bool {
        self.desired > 0 && self.available == self.desired
    }
}

/// Horizontal scaling policy for a new deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalingPolicy {
    /// One replica for a single on-demand file
    PerFile,

    /// One replica per file waiting under the source prefix
    TotalFileBased,
}

impl ScalingPolicy {
    /// Replica count for a backlog of `file_count` files
    pub fn replicas(self, file_count: usize) -> u32 {
        match self {
            ScalingPolicy::PerFile => 1,
            ScalingPolicy::TotalFileBased => u32::try_from(file_count).unwrap_or(u32::MAX).max(1),
        }
    }
}

impl std::fmt::Display for ScalingPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScalingPolicy::PerFile => write!(f, "per-file"),
            ScalingPolicy::TotalFileBased => write!(f, "simple-total-file-based"),
        }
    }
}
