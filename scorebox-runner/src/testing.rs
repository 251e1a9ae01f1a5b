//! In-memory collaborators shared by the runner tests

use async_trait::async_trait;
use scorebox_client::{ClientError, HttpReply, ScoringTransport};
use scorebox_core::domain::deployment::ReplicaStatus;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::Config;
use crate::repository::cluster::{
    self, ClusterError, DeploymentSpec, IngressSpec, ResourceKind, ResourceRef, ServiceSpec,
};
use crate::repository::registry;
use crate::repository::store::{self, StoreError};
use crate::repository::{ClusterApi, ImageRegistry, ObjectStore};
use crate::scheduler::{Collaborators, Orchestrator};

pub const OUTBOUND_IP: &str = "198.51.100.7";

#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    tags: Mutex<HashMap<String, HashMap<String, String>>>,
    failing_puts: Mutex<HashSet<String>>,
    failing_tags: AtomicBool,
}

impl MemoryStore {
    pub fn insert(&self, key: &str, content: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), content.to_vec());
    }

    pub fn insert_tags(&self, key: &str, tags: &[(&str, &str)]) {
        self.tags.lock().unwrap().insert(
            key.to_string(),
            tags.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn object_text(&self, key: &str) -> Option<String> {
        self.object(key)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn tags_of(&self, key: &str) -> HashMap<String, String> {
        self.tags.lock().unwrap().get(key).cloned().unwrap_or_default()
    }

    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.objects
            .lock()
            .unwrap()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn fail_put(&self, key: &str) {
        self.failing_puts.lock().unwrap().insert(key.to_string());
    }

    pub fn fail_tags(&self) {
        self.failing_tags.store(true, Ordering::SeqCst);
    }

    fn injected(key: &str) -> StoreError {
        StoreError::Io {
            key: key.to_string(),
            source: std::io::Error::other("injected failure"),
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, key: &str) -> store::Result<Vec<u8>> {
        self.object(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, content: Vec<u8>) -> store::Result<()> {
        if self.failing_puts.lock().unwrap().contains(key) {
            return Err(Self::injected(key));
        }
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), content);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> store::Result<Vec<String>> {
        Ok(self.keys_with_prefix(prefix))
    }

    async fn tags(&self, key: &str) -> store::Result<HashMap<String, String>> {
        if self.object(key).is_none() {
            return Err(StoreError::NotFound(key.to_string()));
        }
        Ok(self.tags_of(key))
    }

    async fn put_tags(&self, key: &str, tags: HashMap<String, String>) -> store::Result<()> {
        if self.failing_tags.load(Ordering::SeqCst) {
            return Err(Self::injected(key));
        }
        if self.object(key).is_none() {
            return Err(StoreError::NotFound(key.to_string()));
        }
        self.tags.lock().unwrap().insert(key.to_string(), tags);
        Ok(())
    }
}

/// Cluster keeping its objects in memory and logging every call
pub struct FakeCluster {
    inactive: Mutex<HashSet<String>>,
    objects: Mutex<HashSet<(ResourceKind, String)>>,
    deployments: Mutex<HashMap<String, DeploymentSpec>>,
    calls: Mutex<Vec<String>>,
    allowed: Mutex<Vec<(ResourceRef, String)>>,
    stalled: AtomicBool,
    hostname: Mutex<Option<String>>,
    failing_delete: Mutex<Option<ResourceKind>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self {
            inactive: Mutex::new(HashSet::new()),
            objects: Mutex::new(HashSet::new()),
            deployments: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            allowed: Mutex::new(Vec::new()),
            stalled: AtomicBool::new(false),
            hostname: Mutex::new(Some("lb-123.elb.test".to_string())),
            failing_delete: Mutex::new(None),
        }
    }

    pub fn deactivate(&self, cluster: &str) {
        self.inactive.lock().unwrap().insert(cluster.to_string());
    }

    /// Deployments never get any replica available
    pub fn stall_replicas(&self) {
        self.stalled.store(true, Ordering::SeqCst);
    }

    pub fn withhold_hostname(&self) {
        *self.hostname.lock().unwrap() = None;
    }

    pub fn fail_delete(&self, kind: ResourceKind) {
        *self.failing_delete.lock().unwrap() = Some(kind);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls that changed cluster state
    pub fn mutations(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| !call.starts_with("status") && !call.starts_with("active"))
            .collect()
    }

    pub fn exists(&self, kind: ResourceKind, name: &str) -> bool {
        self.objects
            .lock()
            .unwrap()
            .contains(&(kind, name.to_string()))
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn deployment(&self, name: &str) -> Option<DeploymentSpec> {
        self.deployments.lock().unwrap().get(name).cloned()
    }

    pub fn allowed(&self) -> Vec<(ResourceRef, String)> {
        self.allowed.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn create(&self, kind: ResourceKind, name: &str) {
        self.record(format!("create {} {}", kind, name));
        self.objects
            .lock()
            .unwrap()
            .insert((kind, name.to_string()));
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn cluster_active(&self, cluster: &str) -> cluster::Result<bool> {
        self.record(format!("active {}", cluster));
        Ok(!self.inactive.lock().unwrap().contains(cluster))
    }

    async fn create_deployment(
        &self,
        _cluster: &str,
        _namespace: &str,
        spec: &DeploymentSpec,
    ) -> cluster::Result<()> {
        self.create(ResourceKind::Deployment, &spec.name);
        self.deployments
            .lock()
            .unwrap()
            .insert(spec.name.clone(), spec.clone());
        Ok(())
    }

    async fn replica_status(
        &self,
        _cluster: &str,
        _namespace: &str,
        deployment: &str,
    ) -> cluster::Result<ReplicaStatus> {
        self.record(format!("status {}", deployment));
        let desired = self
            .deployment(deployment)
            .map(|spec| spec.replicas)
            .ok_or_else(|| ClusterError::NotFound(deployment.to_string()))?;
        let available = if self.stalled.load(Ordering::SeqCst) {
            0
        } else {
            desired
        };
        Ok(ReplicaStatus { desired, available })
    }

    async fn create_service(
        &self,
        _cluster: &str,
        _namespace: &str,
        spec: &ServiceSpec,
    ) -> cluster::Result<()> {
        self.create(ResourceKind::Service, &spec.name);
        Ok(())
    }

    async fn create_ingress(
        &self,
        _cluster: &str,
        _namespace: &str,
        spec: &IngressSpec,
    ) -> cluster::Result<()> {
        self.create(ResourceKind::Ingress, &spec.name);
        Ok(())
    }

    async fn load_balancer_hostname(
        &self,
        _cluster: &str,
        _namespace: &str,
        service: &str,
    ) -> cluster::Result<Option<String>> {
        self.record(format!("status {}", service));
        Ok(self.hostname.lock().unwrap().clone())
    }

    async fn delete(&self, resource: &ResourceRef) -> cluster::Result<()> {
        self.record(format!("delete {} {}", resource.kind, resource.name));
        if *self.failing_delete.lock().unwrap() == Some(resource.kind) {
            return Err(ClusterError::Command {
                command: format!("delete {}", resource),
                stderr: "connection refused".to_string(),
            });
        }
        if self
            .objects
            .lock()
            .unwrap()
            .remove(&(resource.kind, resource.name.clone()))
        {
            Ok(())
        } else {
            Err(ClusterError::NotFound(resource.to_string()))
        }
    }

    async fn allow_cidr(&self, resource: &ResourceRef, cidr: &str) -> cluster::Result<()> {
        self.record(format!("allow {} {}", resource.name, cidr));
        self.allowed
            .lock()
            .unwrap()
            .push((resource.clone(), cidr.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeRegistry {
    images: HashSet<String>,
}

impl FakeRegistry {
    pub fn with(images: &[&str]) -> Self {
        Self {
            images: images.iter().map(|image| image.to_string()).collect(),
        }
    }
}

#[async_trait]
impl ImageRegistry for FakeRegistry {
    async fn resolve(&self, image: &str) -> registry::Result<Option<String>> {
        Ok(self
            .images
            .contains(image)
            .then(|| format!("registry.test/{}:latest", image)))
    }
}

/// Scoring service speaking the submit/poll protocol from memory
///
/// Results are `scored:` followed by the submitted bytes unless overridden.
/// Files are ready on their first poll unless configured otherwise.
#[derive(Default)]
pub struct FakeScoringService {
    unhealthy: AtomicBool,
    rejecting: AtomicBool,
    /// File name -> pending polls before ready; `None` never becomes ready
    pending: Mutex<HashMap<String, Option<usize>>>,
    outputs: Mutex<HashMap<String, Vec<u8>>>,
    tokens: Mutex<HashMap<String, (String, Vec<u8>)>>,
    polls: Mutex<HashMap<String, usize>>,
    submissions: Mutex<Vec<String>>,
    probes: Mutex<Vec<String>>,
}

impl FakeScoringService {
    pub fn set_healthy(&self, healthy: bool) {
        self.unhealthy.store(!healthy, Ordering::SeqCst);
    }

    pub fn reject_submissions(&self) {
        self.rejecting.store(true, Ordering::SeqCst);
    }

    pub fn pending_for(&self, file_name: &str, polls: Option<usize>) {
        self.pending
            .lock()
            .unwrap()
            .insert(file_name.to_string(), polls);
    }

    pub fn output_for(&self, file_name: &str, output: &[u8]) {
        self.outputs
            .lock()
            .unwrap()
            .insert(file_name.to_string(), output.to_vec());
    }

    pub fn submitted_files(&self) -> Vec<String> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn polls_for(&self, file_name: &str) -> usize {
        self.polls
            .lock()
            .unwrap()
            .get(file_name)
            .copied()
            .unwrap_or(0)
    }

    pub fn probe_urls(&self) -> Vec<String> {
        self.probes.lock().unwrap().clone()
    }

    fn reply(status: u16, body: &[u8]) -> scorebox_client::Result<HttpReply> {
        Ok(HttpReply {
            status,
            body: body.to_vec(),
        })
    }

    fn query(&self, token: &str) -> scorebox_client::Result<HttpReply> {
        let Some((file_name, content)) = self.tokens.lock().unwrap().get(token).cloned() else {
            return Self::reply(404, b"unknown token");
        };

        let polls = {
            let mut polls = self.polls.lock().unwrap();
            let count = polls.entry(file_name.clone()).or_insert(0);
            *count += 1;
            *count
        };

        let ready = match self.pending.lock().unwrap().get(&file_name) {
            Some(None) => false,
            Some(Some(pending)) => polls > *pending,
            None => true,
        };
        if !ready {
            return Self::reply(202, b"");
        }

        let output = self
            .outputs
            .lock()
            .unwrap()
            .get(&file_name)
            .cloned()
            .unwrap_or_else(|| [b"scored:".as_slice(), content.as_slice()].concat());
        Self::reply(200, &output)
    }
}

#[async_trait]
impl ScoringTransport for FakeScoringService {
    async fn get(&self, url: &str) -> scorebox_client::Result<HttpReply> {
        if url.contains("ident.me") {
            return Self::reply(200, OUTBOUND_IP.as_bytes());
        }
        if let Some((_, token)) = url.rsplit_once("/query/") {
            return self.query(token);
        }

        self.probes.lock().unwrap().push(url.to_string());
        if self.unhealthy.load(Ordering::SeqCst) {
            Err(ClientError::ParseError("connection refused".to_string()))
        } else {
            Self::reply(200, b"pong")
        }
    }

    async fn post_file(
        &self,
        url: &str,
        file_name: &str,
        content: Vec<u8>,
    ) -> scorebox_client::Result<HttpReply> {
        if !url.ends_with("/executions") || self.rejecting.load(Ordering::SeqCst) {
            return Self::reply(500, b"internal error");
        }

        let mut submissions = self.submissions.lock().unwrap();
        submissions.push(file_name.to_string());
        let token = format!("tok-{}", submissions.len());
        self.tokens
            .lock()
            .unwrap()
            .insert(token.clone(), (file_name.to_string(), content));

        Self::reply(200, format!(r#"{{"id": "{}"}}"#, token).as_bytes())
    }
}

/// Orchestrator wired to in-memory collaborators
pub struct Harness {
    pub config: Config,
    pub store: Arc<MemoryStore>,
    pub cluster: Arc<FakeCluster>,
    pub registry: Arc<FakeRegistry>,
    pub service: Arc<FakeScoringService>,
}

impl Harness {
    pub fn new() -> Self {
        let mut config = Config::default();
        config.fallback_model = "churn-model".to_string();
        config.fallback_cluster = "prod".to_string();
        config.fallback_namespace = "models".to_string();
        config.fallback_ingress_url = Some("http://ingress.test".to_string());
        config.destination_prefix = "out".to_string();

        Self {
            config,
            store: Arc::new(MemoryStore::default()),
            cluster: Arc::new(FakeCluster::new()),
            registry: Arc::new(FakeRegistry::with(&["churn-model", "fraud-model"])),
            service: Arc::new(FakeScoringService::default()),
        }
    }

    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(
            self.config.clone(),
            Collaborators {
                store: self.store.clone(),
                cluster: self.cluster.clone(),
                registry: self.registry.clone(),
                transport: self.service.clone(),
            },
        )
    }
}
