//! Cluster repository
//!
//! Creates, inspects and deletes the workload objects a scoring run needs:
//! - Checking that a cluster is reachable and active
//! - Creating deployments, services and ingress routes
//! - Reading replica status and load balancer hostnames
//! - Deleting objects and restricting load balancer source ranges
//!
//! The kubectl implementation renders manifests as JSON and pipes them into
//! `kubectl apply -f -`.

use async_trait::async_trait;
use scorebox_core::domain::deployment::ReplicaStatus;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("`{command}` failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("unexpected cluster response: {0}")]
    Parse(String),

    #[error("failed to run kubectl: {0}")]
    Io(#[from] std::io::Error),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, ClusterError>;

/// Kind of a cluster object created for a work unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Deployment,
    Service,
    Ingress,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Deployment => "deployment",
            ResourceKind::Service => "service",
            ResourceKind::Ingress => "ingress",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fully qualified reference to one cluster object
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    pub cluster: String,
    pub namespace: String,
    pub kind: ResourceKind,
    pub name: String,
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}/{} on {}",
            self.kind, self.namespace, self.name, self.cluster
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentSpec {
    pub name: String,
    pub image: String,
    pub replicas: u32,
    pub port: u16,
}

/// Service selecting the pods labelled `app=<app>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    pub name: String,
    pub app: String,
    pub port: u16,
    /// `LoadBalancer` type instead of `ClusterIP`
    pub load_balancer: bool,
}

/// Ingress rule routing `/<path_prefix>/...` to a service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressSpec {
    pub name: String,
    pub service: String,
    pub port: u16,
    pub path_prefix: String,
}

/// Repository trait for cluster operations
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Whether the cluster exists and its API server answers
    async fn cluster_active(&self, cluster: &str) -> Result<bool>;

    async fn create_deployment(
        &self,
        cluster: &str,
        namespace: &str,
        spec: &DeploymentSpec,
    ) -> Result<()>;

    async fn replica_status(
        &self,
        cluster: &str,
        namespace: &str,
        deployment: &str,
    ) -> Result<ReplicaStatus>;

    async fn create_service(&self, cluster: &str, namespace: &str, spec: &ServiceSpec)
    -> Result<()>;

    async fn create_ingress(&self, cluster: &str, namespace: &str, spec: &IngressSpec)
    -> Result<()>;

    /// Hostname (or address) assigned to a load balancer service, if any yet
    async fn load_balancer_hostname(
        &self,
        cluster: &str,
        namespace: &str,
        service: &str,
    ) -> Result<Option<String>>;

    /// Deletes an object; `ClusterError::NotFound` when it does not exist
    async fn delete(&self, resource: &ResourceRef) -> Result<()>;

    /// Restricts a load balancer service to callers from `cidr`
    async fn allow_cidr(&self, resource: &ResourceRef, cidr: &str) -> Result<()>;
}

/// Deployment manifest running `spec.image` behind the label `app=<name>`
pub fn deployment_manifest(namespace: &str, spec: &DeploymentSpec) -> Value {
    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {
            "name": spec.name,
            "namespace": namespace,
            "labels": { "app": spec.name },
        },
        "spec": {
            "replicas": spec.replicas,
            "selector": { "matchLabels": { "app": spec.name } },
            "template": {
                "metadata": { "labels": { "app": spec.name } },
                "spec": {
                    "containers": [{
                        "name": spec.name,
                        "image": spec.image,
                        "ports": [{ "containerPort": spec.port }],
                    }],
                },
            },
        },
    })
}

pub fn service_manifest(namespace: &str, spec: &ServiceSpec) -> Value {
    let service_type = if spec.load_balancer {
        "LoadBalancer"
    } else {
        "ClusterIP"
    };
    json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": {
            "name": spec.name,
            "namespace": namespace,
            "labels": { "app": spec.app },
        },
        "spec": {
            "type": service_type,
            "selector": { "app": spec.app },
            "ports": [{
                "protocol": "TCP",
                "port": spec.port,
                "targetPort": spec.port,
            }],
        },
    })
}

/// Ingress forwarding `/<prefix>(/|$)(.*)` to the service, rewritten to `/$2`
pub fn ingress_manifest(namespace: &str, spec: &IngressSpec) -> Value {
    let path = format!("/{}(/|$)(.*)", spec.path_prefix);
    json!({
        "apiVersion": "networking.k8s.io/v1",
        "kind": "Ingress",
        "metadata": {
            "name": spec.name,
            "namespace": namespace,
            "annotations": {
                "nginx.ingress.kubernetes.io/rewrite-target": "/$2",
                "nginx.ingress.kubernetes.io/use-regex": "true",
            },
        },
        "spec": {
            "ingressClassName": "nginx",
            "rules": [{
                "http": {
                    "paths": [{
                        "path": path,
                        "pathType": "ImplementationSpecific",
                        "backend": {
                            "service": {
                                "name": spec.service,
                                "port": { "number": spec.port },
                            },
                        },
                    }],
                },
            }],
        },
    })
}

/// Parses `"<desired> <available>"`; a missing available count means zero
fn parse_replica_status(output: &str) -> Result<ReplicaStatus> {
    let mut fields = output.split_whitespace();
    let desired = fields
        .next()
        .ok_or_else(|| ClusterError::Parse(format!("empty replica status {:?}", output)))?
        .parse::<u32>()
        .map_err(|e| ClusterError::Parse(format!("desired replicas {:?}: {}", output, e)))?;
    let available = match fields.next() {
        Some(value) => value
            .parse::<u32>()
            .map_err(|e| ClusterError::Parse(format!("available replicas {:?}: {}", output, e)))?,
        None => 0,
    };
    Ok(ReplicaStatus { desired, available })
}

fn is_not_found(stderr: &str) -> bool {
    stderr.contains("(NotFound)") || stderr.contains("not found")
}

/// kubectl implementation of ClusterApi
///
/// Cluster names are kubectl context names.
pub struct KubectlCluster {
    binary: String,
    kubeconfig: Option<PathBuf>,
}

impl KubectlCluster {
    /// Creates a kubectl-backed cluster repository
    ///
    /// # Arguments
    /// * `kubeconfig` - Kubeconfig file; kubectl's default lookup when `None`
    pub fn new(kubeconfig: Option<PathBuf>) -> Self {
        Self {
            binary: "kubectl".to_string(),
            kubeconfig,
        }
    }

    fn command(&self, cluster: &str, namespace: Option<&str>) -> Command {
        let mut command = Command::new(&self.binary);
        if let Some(kubeconfig) = &self.kubeconfig {
            command.arg("--kubeconfig").arg(kubeconfig);
        }
        command.arg("--context").arg(cluster);
        if let Some(namespace) = namespace {
            command.arg("--namespace").arg(namespace);
        }
        command
    }

    /// Runs a kubectl command, optionally feeding `stdin`, and returns stdout
    async fn run(&self, mut command: Command, stdin: Option<Vec<u8>>, what: &str) -> Result<String> {
        let description = format!("{:?}", command.as_std());
        debug!("Running {}", description);

        command
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn()?;
        if let (Some(bytes), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(&bytes).await?;
        }

        let output = child.wait_with_output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if output.status.success() {
            return Ok(stdout);
        }
        if is_not_found(&stderr) {
            return Err(ClusterError::NotFound(what.to_string()));
        }
        Err(ClusterError::Command {
            command: description,
            stderr,
        })
    }

    async fn apply(&self, cluster: &str, namespace: &str, manifest: Value, what: &str) -> Result<()> {
        let mut command = self.command(cluster, Some(namespace));
        command.args(["apply", "-f", "-"]);
        let body = serde_json::to_vec(&manifest).map_err(|e| ClusterError::Parse(e.to_string()))?;
        self.run(command, Some(body), what).await?;
        Ok(())
    }
}

#[async_trait]
impl ClusterApi for KubectlCluster {
    async fn cluster_active(&self, cluster: &str) -> Result<bool> {
        let mut command = self.command(cluster, None);
        command.args(["get", "--raw", "/readyz"]);

        match self.run(command, None, cluster).await {
            Ok(body) => Ok(body.trim() == "ok"),
            Err(ClusterError::Io(e)) => Err(ClusterError::Io(e)),
            Err(e) => {
                warn!("Cluster {} is not active: {}", cluster, e);
                Ok(false)
            }
        }
    }

    async fn create_deployment(
        &self,
        cluster: &str,
        namespace: &str,
        spec: &DeploymentSpec,
    ) -> Result<()> {
        self.apply(
            cluster,
            namespace,
            deployment_manifest(namespace, spec),
            &format!("deployment {}", spec.name),
        )
        .await
    }

    async fn replica_status(
        &self,
        cluster: &str,
        namespace: &str,
        deployment: &str,
    ) -> Result<ReplicaStatus> {
        let mut command = self.command(cluster, Some(namespace));
        command.args([
            "get",
            "deployment",
            deployment,
            "-o",
            "jsonpath={.spec.replicas} {.status.availableReplicas}",
        ]);
        let output = self
            .run(command, None, &format!("deployment {}", deployment))
            .await?;
        parse_replica_status(&output)
    }

    async fn create_service(
        &self,
        cluster: &str,
        namespace: &str,
        spec: &ServiceSpec,
    ) -> Result<()> {
        self.apply(
            cluster,
            namespace,
            service_manifest(namespace, spec),
            &format!("service {}", spec.name),
        )
        .await
    }

    async fn create_ingress(
        &self,
        cluster: &str,
        namespace: &str,
        spec: &IngressSpec,
    ) -> Result<()> {
        self.apply(
            cluster,
            namespace,
            ingress_manifest(namespace, spec),
            &format!("ingress {}", spec.name),
        )
        .await
    }

    async fn load_balancer_hostname(
        &self,
        cluster: &str,
        namespace: &str,
        service: &str,
    ) -> Result<Option<String>> {
        let mut command = self.command(cluster, Some(namespace));
        command.args([
            "get",
            "service",
            service,
            "-o",
            "jsonpath={.status.loadBalancer.ingress[0].hostname}{.status.loadBalancer.ingress[0].ip}",
        ]);
        let output = self
            .run(command, None, &format!("service {}", service))
            .await?;
        let hostname = output.trim();
        Ok((!hostname.is_empty()).then(|| hostname.to_string()))
    }

    async fn delete(&self, resource: &ResourceRef) -> Result<()> {
        let mut command = self.command(&resource.cluster, Some(&resource.namespace));
        command.args([
            "delete",
            resource.kind.as_str(),
            resource.name.as_str(),
            "--grace-period=0",
            "--cascade=foreground",
            "--wait=false",
        ]);
        self.run(command, None, &resource.to_string()).await?;
        Ok(())
    }

    async fn allow_cidr(&self, resource: &ResourceRef, cidr: &str) -> Result<()> {
        if resource.kind != ResourceKind::Service {
            return Err(ClusterError::Parse(format!(
                "source ranges only apply to services, not {}",
                resource
            )));
        }

        let patch = json!({ "spec": { "loadBalancerSourceRanges": [cidr] } }).to_string();
        let mut command = self.command(&resource.cluster, Some(&resource.namespace));
        command.args([
            "patch",
            "service",
            resource.name.as_str(),
            "--type",
            "merge",
            "-p",
            patch.as_str(),
        ]);
        self.run(command, None, &resource.to_string()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deployment_manifest() {
        let manifest = deployment_manifest(
            "models",
            &DeploymentSpec {
                name: "scoring-a".to_string(),
                image: "registry/churn:latest".to_string(),
                replicas: 3,
                port: 8080,
            },
        );

        assert_eq!(manifest["metadata"]["namespace"], "models");
        assert_eq!(manifest["spec"]["replicas"], 3);
        assert_eq!(manifest["spec"]["selector"]["matchLabels"]["app"], "scoring-a");
        let container = &manifest["spec"]["template"]["spec"]["containers"][0];
        assert_eq!(container["image"], "registry/churn:latest");
        assert_eq!(container["ports"][0]["containerPort"], 8080);
    }

    #[test]
    fn test_service_manifest_types() {
        let mut spec = ServiceSpec {
            name: "svc-a".to_string(),
            app: "scoring-a".to_string(),
            port: 8080,
            load_balancer: false,
        };
        let manifest = service_manifest("models", &spec);
        assert_eq!(manifest["spec"]["type"], "ClusterIP");
        assert_eq!(manifest["spec"]["selector"]["app"], "scoring-a");
        assert_eq!(manifest["spec"]["ports"][0]["targetPort"], 8080);

        spec.load_balancer = true;
        assert_eq!(service_manifest("models", &spec)["spec"]["type"], "LoadBalancer");
    }

    #[test]
    fn test_ingress_manifest_rewrites_prefix() {
        let manifest = ingress_manifest(
            "models",
            &IngressSpec {
                name: "ingress-a".to_string(),
                service: "svc-a".to_string(),
                port: 8080,
                path_prefix: "a-0123".to_string(),
            },
        );

        let path = &manifest["spec"]["rules"][0]["http"]["paths"][0];
        assert_eq!(path["path"], "/a-0123(/|$)(.*)");
        assert_eq!(path["backend"]["service"]["name"], "svc-a");
        assert_eq!(
            manifest["metadata"]["annotations"]["nginx.ingress.kubernetes.io/rewrite-target"],
            "/$2"
        );
    }

    #[test]
    fn test_parse_replica_status() {
        assert_eq!(
            parse_replica_status("2 2").unwrap(),
            ReplicaStatus { desired: 2, available: 2 }
        );
        assert_eq!(
            parse_replica_status("3 ").unwrap(),
            ReplicaStatus { desired: 3, available: 0 }
        );
        assert!(parse_replica_status("").is_err());
        assert!(parse_replica_status("two").is_err());
    }

    #[test]
    fn test_not_found_detection() {
        assert!(is_not_found(
            "Error from server (NotFound): deployments.apps \"scoring-a\" not found"
        ));
        assert!(!is_not_found("error: You must be logged in to the server (Unauthorized)"));
    }
}
