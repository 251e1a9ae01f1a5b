//! Workload provisioner
//!
//! Turns a work unit into a reachable scoring service: a deployment of the
//! model image, a service in front of it and a route from outside the
//! cluster (ingress path or dedicated load balancer). Also removes those
//! objects again.

use scorebox_core::domain::deployment::DeploymentHandle;
use scorebox_core::domain::work_unit::{RouteStrategy, WorkUnit};
use scorebox_core::naming::ResourceNames;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::repository::cluster::{
    ClusterError, DeploymentSpec, IngressSpec, ResourceKind, ResourceRef, ServiceSpec,
};
use crate::repository::registry::RegistryError;
use crate::repository::{ClusterApi, ImageRegistry};

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("image '{0}' not found in the registry")]
    ImageNotFound(String),

    #[error("image lookup failed: {0}")]
    Registry(#[from] RegistryError),

    #[error("cluster request failed: {0}")]
    Cluster(#[from] ClusterError),

    #[error(
        "deployment {name} not available after {timeout:?} ({available}/{desired} replicas ready)"
    )]
    DeploymentTimeout {
        name: String,
        timeout: Duration,
        available: u32,
        desired: u32,
    },

    #[error("load balancer {service} got no hostname within {timeout:?}")]
    RouteNotReady { service: String, timeout: Duration },
}

/// Timing and port settings of the provisioner
#[derive(Debug, Clone)]
pub struct ProvisionerSettings {
    pub container_port: u16,
    pub pod_creation_timeout: Duration,
    pub deployment_poll_interval: Duration,
    pub load_balancer_poll_interval: Duration,
}

impl From<&Config> for ProvisionerSettings {
    fn from(config: &Config) -> Self {
        Self {
            container_port: config.container_port,
            pod_creation_timeout: config.pod_creation_timeout,
            deployment_poll_interval: config.deployment_poll_interval,
            load_balancer_poll_interval: config.load_balancer_poll_interval,
        }
    }
}

/// Provisions and tears down per-work-unit deployments
pub struct Provisioner {
    cluster: Arc<dyn ClusterApi>,
    registry: Arc<dyn ImageRegistry>,
    settings: ProvisionerSettings,
}

impl Provisioner {
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        registry: Arc<dyn ImageRegistry>,
        settings: ProvisionerSettings,
    ) -> Self {
        Self {
            cluster,
            registry,
            settings,
        }
    }

    /// Resolves the model image of a work unit to a registry reference
    pub async fn resolve_image(&self, image: &str) -> Result<String, ProvisionError> {
        self.registry
            .resolve(image)
            .await?
            .ok_or_else(|| ProvisionError::ImageNotFound(image.to_string()))
    }

    /// Handle describing the objects of `unit`, whether or not they exist
    ///
    /// The URL is only known once a route was created; handles built here
    /// for teardown carry an empty one.
    pub fn handle_for(&self, unit: &WorkUnit, replicas: u32) -> DeploymentHandle {
        DeploymentHandle {
            cluster: unit.target.cluster.clone(),
            namespace: unit.target.namespace.clone(),
            names: ResourceNames::for_work_unit(&unit.id),
            replicas,
            route: unit.target.route.clone(),
            url: String::new(),
        }
    }

    /// Creates the deployment, service and route for `unit`
    ///
    /// Nothing is deleted on failure; objects created so far stay in place
    /// for inspection.
    pub async fn provision(
        &self,
        unit: &WorkUnit,
        replicas: u32,
    ) -> Result<DeploymentHandle, ProvisionError> {
        let image = self.resolve_image(&unit.target.model_image).await?;
        let mut handle = self.handle_for(unit, replicas);
        let port = self.settings.container_port;

        info!(
            "Provisioning {} ({} replica(s) of {}) in {}/{}",
            handle.names.deployment, replicas, image, handle.cluster, handle.namespace
        );

        self.cluster
            .create_deployment(
                &handle.cluster,
                &handle.namespace,
                &DeploymentSpec {
                    name: handle.names.deployment.clone(),
                    image,
                    replicas,
                    port,
                },
            )
            .await?;

        self.wait_for_deployment(&handle).await?;

        self.cluster
            .create_service(
                &handle.cluster,
                &handle.namespace,
                &ServiceSpec {
                    name: handle.names.service.clone(),
                    app: handle.names.deployment.clone(),
                    port,
                    load_balancer: false,
                },
            )
            .await?;

        handle.url = match &unit.target.route {
            RouteStrategy::Ingress { base_url } => {
                self.cluster
                    .create_ingress(
                        &handle.cluster,
                        &handle.namespace,
                        &IngressSpec {
                            name: handle.names.ingress.clone(),
                            service: handle.names.service.clone(),
                            port,
                            path_prefix: unit.id.to_string(),
                        },
                    )
                    .await?;
                format!("{}/{}", base_url.trim_end_matches('/'), unit.id)
            }
            RouteStrategy::LoadBalancer { hostname_timeout } => {
                self.cluster
                    .create_service(
                        &handle.cluster,
                        &handle.namespace,
                        &ServiceSpec {
                            name: handle.names.load_balancer.clone(),
                            app: handle.names.deployment.clone(),
                            port,
                            load_balancer: true,
                        },
                    )
                    .await?;
                let hostname = self.wait_for_hostname(&handle, *hostname_timeout).await?;
                format!("http://{}:{}", hostname, port)
            }
        };

        info!("Deployment {} reachable at {}", handle.names.deployment, handle.url);
        Ok(handle)
    }

    /// Polls replica status until every desired replica is available
    async fn wait_for_deployment(&self, handle: &DeploymentHandle) -> Result<(), ProvisionError> {
        let timeout = self.settings.pod_creation_timeout;
        let start = Instant::now();
        let mut last = None;

        loop {
            match self
                .cluster
                .replica_status(&handle.cluster, &handle.namespace, &handle.names.deployment)
                .await
            {
                Ok(status) if status.is_complete() => {
                    info!(
                        "Deployment {} available ({} replica(s)) after {:?}",
                        handle.names.deployment,
                        status.available,
                        start.elapsed()
                    );
                    return Ok(());
                }
                Ok(status) => {
                    debug!(
                        "Deployment {}: {}/{} replicas available",
                        handle.names.deployment, status.available, status.desired
                    );
                    last = Some(status);
                }
                Err(e) => warn!(
                    "Reading status of {} failed: {}",
                    handle.names.deployment, e
                ),
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(ProvisionError::DeploymentTimeout {
                    name: handle.names.deployment.clone(),
                    timeout,
                    available: last.map(|s| s.available).unwrap_or(0),
                    desired: last.map(|s| s.desired).unwrap_or(handle.replicas),
                });
            }
            time::sleep(self.settings.deployment_poll_interval.min(timeout - elapsed)).await;
        }
    }

    /// Polls the load balancer service until the provider assigns a hostname
    async fn wait_for_hostname(
        &self,
        handle: &DeploymentHandle,
        timeout: Duration,
    ) -> Result<String, ProvisionError> {
        let service = &handle.names.load_balancer;
        let start = Instant::now();

        loop {
            match self
                .cluster
                .load_balancer_hostname(&handle.cluster, &handle.namespace, service)
                .await
            {
                Ok(Some(hostname)) => {
                    info!("Load balancer {} assigned {}", service, hostname);
                    return Ok(hostname);
                }
                Ok(None) => debug!("Load balancer {} has no hostname yet", service),
                Err(e) => warn!("Reading load balancer {} failed: {}", service, e),
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(ProvisionError::RouteNotReady {
                    service: service.clone(),
                    timeout,
                });
            }
            time::sleep(self.settings.load_balancer_poll_interval.min(timeout - elapsed)).await;
        }
    }

    /// Deletes deployment, service and route, in that order
    ///
    /// Objects that no longer exist are skipped, so teardown can be repeated.
    /// Any other error stops the teardown; earlier deletions stand.
    pub async fn teardown(&self, handle: &DeploymentHandle) -> Result<(), ClusterError> {
        let route_kind = match handle.route {
            RouteStrategy::Ingress { .. } => ResourceKind::Ingress,
            RouteStrategy::LoadBalancer { .. } => ResourceKind::Service,
        };

        for (kind, name) in [
            (ResourceKind::Deployment, handle.names.deployment.as_str()),
            (ResourceKind::Service, handle.names.service.as_str()),
            (route_kind, handle.route_name()),
        ] {
            let resource = ResourceRef {
                cluster: handle.cluster.clone(),
                namespace: handle.namespace.clone(),
                kind,
                name: name.to_string(),
            };

            match self.cluster.delete(&resource).await {
                Ok(()) => info!("Deleted {}", resource),
                Err(e) if e.is_not_found() => debug!("{} already gone", resource),
                Err(e) => {
                    warn!("Failed to delete {}: {}", resource, e);
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    /// Admits `cidr` on the load balancer of `handle`
    ///
    /// A no-op for ingress routes, whose access rules are owned by the
    /// ingress controller.
    pub async fn allow_cidr(
        &self,
        handle: &DeploymentHandle,
        cidr: &str,
    ) -> Result<(), ProvisionError> {
        if !matches!(handle.route, RouteStrategy::LoadBalancer { .. }) {
            debug!(
                "Route of {} is an ingress, not restricting source ranges",
                handle.names.deployment
            );
            return Ok(());
        }

        let resource = ResourceRef {
            cluster: handle.cluster.clone(),
            namespace: handle.namespace.clone(),
            kind: ResourceKind::Service,
            name: handle.names.load_balancer.clone(),
        };
        info!("Allowing {} on {}", cidr, resource);
        self.cluster.allow_cidr(&resource, cidr).await?;
        Ok(())
    }
}
