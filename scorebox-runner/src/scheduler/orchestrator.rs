//! Job orchestrator
//!
//! Drives one input file through validation, provisioning, readiness,
//! scoring, tagging and cleanup. Stages run strictly in order; the first
//! failure stops the run, writes a diagnostic next to where the output
//! would have gone and leaves cluster objects in place for debugging.
//!
//! Also drives the batch pipeline, which scores every file under a prefix
//! against one shared deployment.

use chrono::{DateTime, Utc};
use scorebox_client::{ReadinessProber, ScoringClient, ScoringTransport};
use scorebox_core::domain::deployment::{DeploymentHandle, ScalingPolicy};
use scorebox_core::domain::job::{JobReport, JobState};
use scorebox_core::domain::session::SessionSnapshot;
use scorebox_core::domain::work_unit::{self, RouteStrategy, WorkUnit};
use scorebox_core::dto::tags::Provenance;
use scorebox_core::naming::{self, WorkUnitId};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::repository::{ClusterApi, ImageRegistry, ObjectStore};
use crate::scheduler::batch::{BatchController, BatchSettings};
use crate::scheduler::error::JobError;
use crate::service::provisioner::{ProvisionError, Provisioner, ProvisionerSettings};

/// External systems an orchestrator works with
pub struct Collaborators {
    pub store: Arc<dyn ObjectStore>,
    pub cluster: Arc<dyn ClusterApi>,
    pub registry: Arc<dyn ImageRegistry>,
    pub transport: Arc<dyn ScoringTransport>,
}

/// Result of a successful batch
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub deployment: String,
    pub replicas: u32,
    pub outputs: Vec<String>,
    pub snapshot: Vec<SessionSnapshot>,
}

/// Progress of one per-file run
struct JobRun {
    source_key: String,
    destination_prefix: String,
    started_at: DateTime<Utc>,
    transitions: Vec<JobState>,
    unit: Option<WorkUnit>,
    handle: Option<DeploymentHandle>,
    scoring_succeeded: bool,
}

impl JobRun {
    fn new(source_key: &str, destination_prefix: &str) -> Self {
        Self {
            source_key: source_key.to_string(),
            destination_prefix: destination_prefix.to_string(),
            started_at: Utc::now(),
            transitions: Vec::new(),
            unit: None,
            handle: None,
            scoring_succeeded: false,
        }
    }

    fn enter(&mut self, state: JobState) {
        info!("{}: entering {}", self.source_key, state);
        self.transitions.push(state);
    }
}

pub struct Orchestrator {
    config: Config,
    store: Arc<dyn ObjectStore>,
    cluster: Arc<dyn ClusterApi>,
    provisioner: Provisioner,
    prober: ReadinessProber,
    client: ScoringClient,
}

impl Orchestrator {
    pub fn new(config: Config, collaborators: Collaborators) -> Self {
        let provisioner = Provisioner::new(
            collaborators.cluster.clone(),
            collaborators.registry,
            ProvisionerSettings::from(&config),
        );
        let prober = ReadinessProber::new(collaborators.transport.clone());
        let client = ScoringClient::new(collaborators.transport)
            .with_poll_interval(config.scoring_poll_interval);

        Self {
            config,
            store: collaborators.store,
            cluster: collaborators.cluster,
            provisioner,
            prober,
            client,
        }
    }

    pub fn provisioner(&self) -> &Provisioner {
        &self.provisioner
    }

    /// Scores one input file end to end
    ///
    /// Always returns a report ending in `Done` or `Failed`; failures are
    /// also written to `<destination>/<basename>.scoreout.error`.
    pub async fn run_file(&self, source_key: &str, destination_prefix: &str) -> JobReport {
        let mut run = JobRun::new(source_key, destination_prefix);
        run.enter(JobState::Received);

        let artifact_key = match self.drive(&mut run).await {
            Ok(()) => {
                run.enter(JobState::Done);
                naming::output_key(destination_prefix, source_key)
            }
            Err(e) => {
                let stage = e.stage();
                if run.scoring_succeeded {
                    warn!(
                        "{}: output written but run failed at {}: {}",
                        source_key, stage, e
                    );
                } else {
                    error!("{}: failed at {}: {}", source_key, stage, e);
                }

                let key = naming::error_key(destination_prefix, source_key);
                let text = diagnostic(&run.source_key, run.handle.as_ref(), &e);
                self.write_diagnostic(&key, text).await;

                run.enter(JobState::Failed {
                    stage,
                    reason: e.to_string(),
                });
                key
            }
        };

        let work_unit_id = match &run.unit {
            Some(unit) => unit.id.to_string(),
            None => WorkUnitId::from_source_key(source_key).to_string(),
        };

        JobReport {
            source_key: run.source_key,
            work_unit_id,
            started_at: run.started_at,
            finished_at: Utc::now(),
            transitions: run.transitions,
            scoring_succeeded: run.scoring_succeeded,
            artifact_key,
        }
    }

    async fn drive(&self, run: &mut JobRun) -> Result<(), JobError> {
        let unit = self
            .validate_tags(&run.source_key, &run.destination_prefix)
            .await?;
        run.unit = Some(unit.clone());
        run.enter(JobState::TagsValidated);

        self.validate_model_cluster(&unit).await?;
        run.enter(JobState::ModelClusterValidated);

        let replicas = ScalingPolicy::PerFile.replicas(1);
        let handle = match self.provisioner.provision(&unit, replicas).await {
            Ok(handle) => handle,
            Err(e) => {
                run.handle = Some(self.provisioner.handle_for(&unit, replicas));
                return Err(e.into());
            }
        };
        run.handle = Some(handle.clone());
        run.enter(JobState::Provisioned);

        self.await_route(&handle).await?;
        run.enter(JobState::RouteReady);

        let output_key = self.score(&unit, &handle).await?;
        run.scoring_succeeded = true;
        run.enter(JobState::Scored);

        self.tag_output(&unit, &output_key, run.started_at).await?;
        run.enter(JobState::Tagged);

        self.provisioner
            .teardown(&handle)
            .await
            .map_err(JobError::Cleanup)?;
        run.enter(JobState::CleanedUp);

        Ok(())
    }

    /// Resolves the scoring target from the tags of the source object
    async fn validate_tags(
        &self,
        source_key: &str,
        destination_prefix: &str,
    ) -> Result<WorkUnit, JobError> {
        let tags = self.store.tags(source_key).await.map_err(|e| {
            JobError::ConfigValidation(format!("reading tags of {} failed: {}", source_key, e))
        })?;

        let target = work_unit::resolve_target(
            &tags,
            &self.config.fallbacks(),
            self.config.load_balancer_timeout,
        )
        .map_err(|e| JobError::ConfigValidation(e.to_string()))?;

        let unit = WorkUnit::new(source_key, destination_prefix, target);
        info!(
            "{}: work unit {} scores with {} on {}/{}",
            source_key, unit.id, unit.target.model_image, unit.target.cluster, unit.target.namespace
        );
        Ok(unit)
    }

    /// Checks the model image exists and the cluster is active
    async fn validate_model_cluster(&self, unit: &WorkUnit) -> Result<(), JobError> {
        let target = &unit.target;

        match self.provisioner.resolve_image(&target.model_image).await {
            Ok(_) => {}
            Err(ProvisionError::ImageNotFound(image)) => {
                return Err(JobError::ResourceNotFound(format!(
                    "model image '{}' not found in the registry",
                    image
                )));
            }
            Err(e) => return Err(JobError::ResourceNotFound(e.to_string())),
        }

        match self.cluster.cluster_active(&target.cluster).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(JobError::ResourceNotFound(format!(
                "cluster '{}' is not active",
                target.cluster
            ))),
            Err(e) => Err(JobError::ResourceNotFound(format!(
                "cluster '{}' could not be checked: {}",
                target.cluster, e
            ))),
        }
    }

    /// Waits for the route of `handle` to answer
    async fn await_route(&self, handle: &DeploymentHandle) -> Result<(), JobError> {
        let timeout = self.config.route_ready_timeout;
        if self
            .prober
            .wait_until_ready(&handle.url, timeout, self.config.probe_interval)
            .await
        {
            return Ok(());
        }

        Err(self.readiness_timeout(handle, timeout).await)
    }

    async fn readiness_timeout(
        &self,
        handle: &DeploymentHandle,
        timeout: std::time::Duration,
    ) -> JobError {
        let outbound_ip = self.client.outbound_ip(&self.config.ip_echo_url).await;
        JobError::ReadinessTimeout {
            url: handle.url.clone(),
            timeout,
            outbound_ip,
        }
    }

    /// Scores the source object and uploads the result; returns its key
    async fn score(&self, unit: &WorkUnit, handle: &DeploymentHandle) -> Result<String, JobError> {
        let content = self.store.get(&unit.source_key).await.map_err(|e| {
            JobError::Scoring(format!("reading {} failed: {}", unit.source_key, e))
        })?;

        let output = self
            .client
            .score(
                &handle.url,
                unit.basename(),
                content,
                self.config.scoring_timeout,
            )
            .await?;

        let key = unit.output_key();
        self.store
            .put(&key, output)
            .await
            .map_err(|source| JobError::Upload {
                key: key.clone(),
                source,
            })?;

        info!("{}: scored output written to {}", unit.source_key, key);
        Ok(key)
    }

    async fn tag_output(
        &self,
        unit: &WorkUnit,
        output_key: &str,
        started_at: DateTime<Utc>,
    ) -> Result<(), JobError> {
        let provenance = Provenance {
            source: unit.source_key.clone(),
            model: unit.target.model_image.clone(),
            started_at,
            finished_at: Utc::now(),
            cluster: unit.target.cluster.clone(),
            namespace: unit.target.namespace.clone(),
        };

        self.store
            .put_tags(output_key, provenance.to_tags())
            .await
            .map_err(|source| JobError::Tagging {
                key: output_key.to_string(),
                source,
            })
    }

    async fn write_diagnostic(&self, key: &str, text: String) {
        match self.store.put(key, text.into_bytes()).await {
            Ok(()) => info!("Diagnostic written to {}", key),
            Err(e) => error!("Failed to write diagnostic {}: {}", key, e),
        }
    }

    /// Scores every file under `source_prefix` with one shared deployment
    ///
    /// The deployment runs one replica per file and uses the configured
    /// fallback target, with `model` overriding the fallback image. On
    /// failure a diagnostic is written for the prefix and objects are left
    /// in place, as in per-file runs.
    pub async fn run_batch(
        &self,
        source_prefix: &str,
        destination_prefix: &str,
        model: Option<&str>,
    ) -> Result<BatchSummary, JobError> {
        let mut handle = None;
        let result = self
            .drive_batch(source_prefix, destination_prefix, model, &mut handle)
            .await;

        if let Err(e) = &result {
            error!("Batch {} failed at {}: {}", source_prefix, e.stage(), e);
            let key = naming::error_key(destination_prefix, source_prefix);
            let text = diagnostic(source_prefix, handle.as_ref(), e);
            self.write_diagnostic(&key, text).await;
        }
        result
    }

    async fn drive_batch(
        &self,
        source_prefix: &str,
        destination_prefix: &str,
        model: Option<&str>,
        handle_slot: &mut Option<DeploymentHandle>,
    ) -> Result<BatchSummary, JobError> {
        let files: Vec<String> = self
            .store
            .list(source_prefix)
            .await
            .map_err(|e| {
                JobError::ConfigValidation(format!("listing {} failed: {}", source_prefix, e))
            })?
            .into_iter()
            .filter(|key| {
                !key.ends_with(naming::SCOREOUT_SUFFIX) && !key.ends_with(naming::ERROR_SUFFIX)
            })
            .collect();

        if files.is_empty() {
            return Err(JobError::ConfigValidation(format!(
                "no input files under {}",
                source_prefix
            )));
        }
        check_distinct_outputs(&files, destination_prefix)?;

        let mut fallbacks = self.config.fallbacks();
        if let Some(model) = model {
            fallbacks.model_image = model.to_string();
        }
        let target = work_unit::resolve_target(
            &HashMap::new(),
            &fallbacks,
            self.config.load_balancer_timeout,
        )
        .map_err(|e| JobError::ConfigValidation(e.to_string()))?;
        let unit = WorkUnit::new(source_prefix, destination_prefix, target);

        self.validate_model_cluster(&unit).await?;

        let policy = ScalingPolicy::TotalFileBased;
        let replicas = policy.replicas(files.len());
        info!(
            "Batch {}: {} file(s), {} replica(s) ({})",
            source_prefix,
            files.len(),
            replicas,
            policy
        );

        *handle_slot = Some(self.provisioner.handle_for(&unit, replicas));
        let handle = self.provisioner.provision(&unit, replicas).await?;
        *handle_slot = Some(handle.clone());

        self.await_batch_route(&handle).await?;

        let mut controller = BatchController::new(
            self.client.clone(),
            self.store.clone(),
            BatchSettings::from(&self.config),
        );
        let outputs = controller
            .run(&handle.url, &files, destination_prefix)
            .await?;

        self.provisioner
            .teardown(&handle)
            .await
            .map_err(JobError::Cleanup)?;

        info!("Batch {}: {} output(s) written", source_prefix, outputs.len());
        Ok(BatchSummary {
            deployment: handle.names.deployment.clone(),
            replicas,
            outputs,
            snapshot: controller.snapshot(),
        })
    }

    /// Waits for a shared route, opening a silent load balancer to the
    /// configured CIDR before a second, longer wait
    async fn await_batch_route(&self, handle: &DeploymentHandle) -> Result<(), JobError> {
        if self
            .prober
            .wait_until_ready(
                &handle.url,
                self.config.route_ready_timeout,
                self.config.probe_interval,
            )
            .await
        {
            return Ok(());
        }

        let (RouteStrategy::LoadBalancer { .. }, Some(cidr)) =
            (&handle.route, self.config.allow_cidr.as_deref())
        else {
            return Err(self
                .readiness_timeout(handle, self.config.route_ready_timeout)
                .await);
        };

        self.provisioner.allow_cidr(handle, cidr).await?;
        let timeout = self.config.load_balancer_timeout;
        if self
            .prober
            .wait_until_ready(&handle.url, timeout, self.config.probe_interval)
            .await
        {
            return Ok(());
        }

        Err(self.readiness_timeout(handle, timeout).await)
    }
}

/// Rejects batches where two inputs would write the same output object
fn check_distinct_outputs(files: &[String], destination_prefix: &str) -> Result<(), JobError> {
    let mut seen: HashMap<String, &str> = HashMap::new();
    let mut clashes = Vec::new();

    for key in files {
        let output = naming::output_key(destination_prefix, key);
        if let Some(first) = seen.get(&output) {
            clashes.push(format!("{} and {} -> {}", first, key, output));
        } else {
            seen.insert(output, key);
        }
    }

    if clashes.is_empty() {
        Ok(())
    } else {
        Err(JobError::ConfigValidation(format!(
            "inputs share an output key: {}",
            clashes.join("; ")
        )))
    }
}

/// Human-readable explanation written next to a failed output
fn diagnostic(subject: &str, handle: Option<&DeploymentHandle>, error: &JobError) -> String {
    let stage = error.stage();
    let mut text = format!(
        "Scoring of {} failed at stage {} (code {}).\n\n{}\n\n{}\n",
        subject,
        stage,
        stage.code(),
        error,
        error.guidance()
    );

    if let Some(handle) = handle.filter(|_| stage.leaves_resources()) {
        let route_kind = match handle.route {
            RouteStrategy::Ingress { .. } => "ingress",
            RouteStrategy::LoadBalancer { .. } => "load balancer service",
        };
        text.push_str(&format!(
            "\nObjects in {}/{}:\n  deployment {}\n  service {}\n  {} {}\n",
            handle.cluster,
            handle.namespace,
            handle.names.deployment,
            handle.names.service,
            route_kind,
            handle.route_name()
        ));
    }

    text
}
