//! Job errors
//!
//! Every way a scoring run can fail, each tied to the stage it stops at.

use scorebox_client::ClientError;
use scorebox_core::domain::job::FailureStage;
use std::time::Duration;
use thiserror::Error;

use crate::repository::cluster::ClusterError;
use crate::repository::store::StoreError;
use crate::scheduler::batch::BatchError;
use crate::service::provisioner::ProvisionError;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("invalid scoring configuration: {0}")]
    ConfigValidation(String),

    #[error("{0}")]
    ResourceNotFound(String),

    #[error("provisioning failed: {0}")]
    Provisioning(#[from] ProvisionError),

    #[error("route {url} did not answer within {timeout:?}")]
    ReadinessTimeout {
        url: String,
        timeout: Duration,
        outbound_ip: Option<String>,
    },

    #[error("scoring failed: {0}")]
    Scoring(String),

    #[error("scoring did not finish within {limit:?} (waited {elapsed:?})")]
    ScoringTimeout { elapsed: Duration, limit: Duration },

    #[error("batch failed: {0}")]
    Batch(#[from] BatchError),

    #[error("upload of {key} failed: {source}")]
    Upload {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("tagging {key} failed: {source}")]
    Tagging {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("cleanup failed: {0}")]
    Cleanup(#[source] ClusterError),
}

impl JobError {
    /// Stage the run stopped at
    pub fn stage(&self) -> FailureStage {
        match self {
            JobError::ConfigValidation(_) => FailureStage::TagValidation,
            JobError::ResourceNotFound(_) => FailureStage::ModelClusterValidation,
            JobError::Provisioning(_) => FailureStage::Provisioning,
            JobError::ReadinessTimeout { .. } => FailureStage::RouteReadiness,
            JobError::Scoring(_) | JobError::ScoringTimeout { .. } => FailureStage::Scoring,
            JobError::Batch(BatchError::Upload { .. }) => FailureStage::Upload,
            JobError::Batch(_) => FailureStage::Scoring,
            JobError::Upload { .. } => FailureStage::Upload,
            JobError::Tagging { .. } => FailureStage::Tagging,
            JobError::Cleanup(_) => FailureStage::Cleanup,
        }
    }

    /// What an operator should do about the failure
    pub fn guidance(&self) -> String {
        match self {
            JobError::ConfigValidation(_) => "Tag the input with all of modelimagename, \
                k8scluster, k8singressurl and k8snamespace, or with none of them to use the \
                configured defaults, then upload it again."
                .to_string(),
            JobError::ResourceNotFound(_) => "Either the model image or the cluster is \
                invalid. Delete the input and upload it again with corrected tags; changing \
                the tags of an existing object does not start a new run."
                .to_string(),
            JobError::Provisioning(_) => "The deployment could not be brought up. Objects \
                created so far were left in place for debugging; delete them once inspected."
                .to_string(),
            JobError::ReadinessTimeout { outbound_ip, .. } => {
                let caller = outbound_ip
                    .as_deref()
                    .map(|ip| format!("{}/32", ip))
                    .unwrap_or_else(|| "this runner's public address (lookup failed)".to_string());
                format!(
                    "The deployment is running but its route did not answer. Objects were \
                    left in place for debugging. If the route restricts callers, allow {}.",
                    caller
                )
            }
            JobError::Scoring(_) | JobError::ScoringTimeout { .. } | JobError::Batch(_) => {
                "The scoring service did not return a result. The deployment was left in \
                place; check its logs, then delete it."
                    .to_string()
            }
            JobError::Upload { .. } => "The scored output could not be written to the \
                destination. The deployment was left in place."
                .to_string(),
            JobError::Tagging { .. } => "The scored output was written but could not be \
                tagged with its provenance. The deployment was left in place."
                .to_string(),
            JobError::Cleanup(_) => "Scoring succeeded and the output was written, but \
                cluster objects could not be removed. Delete them with `scorebox-runner \
                teardown`."
                .to_string(),
        }
    }
}

impl From<ClientError> for JobError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::ScoringTimeout { elapsed, limit } => {
                JobError::ScoringTimeout { elapsed, limit }
            }
            other => JobError::Scoring(other.to_string()),
        }
    }
}
