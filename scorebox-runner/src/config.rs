//! Runner configuration
//!
//! Defines all configurable parameters for the runner including fallback
//! scoring targets, storage locations, and every timeout and polling interval
//! used while provisioning and scoring.

use scorebox_core::domain::work_unit::Fallbacks;
use std::path::PathBuf;
use std::time::Duration;

/// Runner configuration
///
/// Constructed once at process start and passed by reference into every
/// component; nothing reads the environment after that.
#[derive(Debug, Clone)]
pub struct Config {
    /// Cloud region; substituted for `{region}` in the registry host
    pub region: String,

    /// Model image used when an input object carries no tags
    pub fallback_model: String,

    /// Cluster (kubectl context) used when an input object carries no tags
    pub fallback_cluster: String,

    /// Namespace used when an input object carries no tags
    pub fallback_namespace: String,

    /// Ingress base URL used when an input object carries no tags.
    /// Without one, a load balancer is created per deployment.
    pub fallback_ingress_url: Option<String>,

    /// Root directory of the object store
    pub store_root: PathBuf,

    /// Destination prefix for scored outputs and diagnostics
    pub destination_prefix: String,

    /// Registry host model images are resolved against (e.g., "registry.example.com")
    pub registry_host: Option<String>,

    /// Kubeconfig passed to kubectl; its default lookup applies when unset
    pub kubeconfig: Option<PathBuf>,

    /// CIDR admitted on load balancers that do not answer the first probes
    pub allow_cidr: Option<String>,

    /// Endpoint echoing the caller's public IP, quoted in diagnostics
    pub ip_echo_url: String,

    /// Port the model container listens on
    pub container_port: u16,

    /// How long a new deployment may take to make all replicas available
    pub pod_creation_timeout: Duration,

    /// How often deployment status is polled
    pub deployment_poll_interval: Duration,

    /// How long a route may take to answer `pong`
    pub route_ready_timeout: Duration,

    /// How often a route is probed
    pub probe_interval: Duration,

    /// How long a load balancer may take to get a hostname (and, in batch
    /// mode, to answer once its allow-list was updated)
    pub load_balancer_timeout: Duration,

    /// How often the load balancer hostname is polled
    pub load_balancer_poll_interval: Duration,

    /// Per-file scoring deadline
    pub scoring_timeout: Duration,

    /// How often a pending scoring token is polled
    pub scoring_poll_interval: Duration,

    /// Shared deadline for all files of a batch
    pub batch_timeout: Duration,

    /// Pause between two sweeps over pending batch entries
    pub batch_sweep_interval: Duration,

    /// Timeout of a single HTTP request to a scoring service
    pub request_timeout: Duration,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(store_root: PathBuf, destination_prefix: String) -> Self {
        Self {
            region: "us-east-1".to_string(),
            fallback_model: String::new(),
            fallback_cluster: String::new(),
            fallback_namespace: "default".to_string(),
            fallback_ingress_url: None,
            store_root,
            destination_prefix,
            registry_host: None,
            kubeconfig: None,
            allow_cidr: None,
            ip_echo_url: "https://ident.me".to_string(),
            container_port: 8080,
            pod_creation_timeout: Duration::from_secs(120),
            deployment_poll_interval: Duration::from_secs(5),
            route_ready_timeout: Duration::from_secs(120),
            probe_interval: Duration::from_secs(10),
            load_balancer_timeout: Duration::from_secs(300), // 5 minutes
            load_balancer_poll_interval: Duration::from_secs(10),
            scoring_timeout: Duration::from_secs(40),
            scoring_poll_interval: Duration::from_secs(1),
            batch_timeout: Duration::from_secs(720),
            batch_sweep_interval: Duration::from_secs(2),
            request_timeout: Duration::from_secs(10),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - SCOREBOX_STORE_ROOT (required)
    /// - SCOREBOX_DESTINATION (optional, default: "scored")
    /// - SCOREBOX_REGION (optional, default: us-east-1)
    /// - SCOREBOX_FALLBACK_MODEL, SCOREBOX_FALLBACK_CLUSTER (optional)
    /// - SCOREBOX_FALLBACK_NAMESPACE (optional, default: default)
    /// - SCOREBOX_FALLBACK_INGRESS_URL (optional)
    /// - SCOREBOX_REGISTRY, SCOREBOX_KUBECONFIG, SCOREBOX_ALLOW_CIDR (optional)
    /// - SCOREBOX_IP_ECHO_URL (optional, default: https://ident.me)
    /// - SCOREBOX_POD_CREATION_TIMEOUT (optional, seconds, default: 120)
    /// - SCOREBOX_ROUTE_READY_TIMEOUT (optional, seconds, default: 120)
    /// - SCOREBOX_PROBE_INTERVAL (optional, seconds, default: 10)
    /// - SCOREBOX_LOAD_BALANCER_TIMEOUT (optional, seconds, default: 300)
    /// - SCOREBOX_SCORING_TIMEOUT (optional, seconds, default: 40)
    /// - SCOREBOX_BATCH_TIMEOUT (optional, seconds, default: 720)
    ///
    /// `store_root` takes precedence over SCOREBOX_STORE_ROOT, which is then
    /// no longer required.
    pub fn from_env(store_root: Option<PathBuf>) -> anyhow::Result<Self> {
        Self::from_vars(store_root, |name| std::env::var(name).ok())
    }

    fn from_vars(
        store_root: Option<PathBuf>,
        var: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        let env_string = |name: &str| {
            var(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let env_secs = |name: &str, default: Duration| {
            var(name)
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        };

        let store_root = store_root
            .or_else(|| env_string("SCOREBOX_STORE_ROOT").map(PathBuf::from))
            .ok_or_else(|| anyhow::anyhow!("SCOREBOX_STORE_ROOT environment variable not set"))?;

        let destination_prefix =
            env_string("SCOREBOX_DESTINATION").unwrap_or_else(|| "scored".to_string());

        let mut config = Self::new(store_root, destination_prefix);

        if let Some(region) = env_string("SCOREBOX_REGION") {
            config.region = region;
        }
        if let Some(model) = env_string("SCOREBOX_FALLBACK_MODEL") {
            config.fallback_model = model;
        }
        if let Some(cluster) = env_string("SCOREBOX_FALLBACK_CLUSTER") {
            config.fallback_cluster = cluster;
        }
        if let Some(namespace) = env_string("SCOREBOX_FALLBACK_NAMESPACE") {
            config.fallback_namespace = namespace;
        }
        if let Some(url) = env_string("SCOREBOX_IP_ECHO_URL") {
            config.ip_echo_url = url;
        }
        config.fallback_ingress_url = env_string("SCOREBOX_FALLBACK_INGRESS_URL");
        config.registry_host = env_string("SCOREBOX_REGISTRY");
        config.kubeconfig = env_string("SCOREBOX_KUBECONFIG").map(PathBuf::from);
        config.allow_cidr = env_string("SCOREBOX_ALLOW_CIDR");

        config.pod_creation_timeout =
            env_secs("SCOREBOX_POD_CREATION_TIMEOUT", config.pod_creation_timeout);
        config.route_ready_timeout =
            env_secs("SCOREBOX_ROUTE_READY_TIMEOUT", config.route_ready_timeout);
        config.probe_interval = env_secs("SCOREBOX_PROBE_INTERVAL", config.probe_interval);
        config.load_balancer_timeout =
            env_secs("SCOREBOX_LOAD_BALANCER_TIMEOUT", config.load_balancer_timeout);
        config.scoring_timeout = env_secs("SCOREBOX_SCORING_TIMEOUT", config.scoring_timeout);
        config.batch_timeout = env_secs("SCOREBOX_BATCH_TIMEOUT", config.batch_timeout);

        Ok(config)
    }

    /// Fallback scoring target for untagged inputs
    pub fn fallbacks(&self) -> Fallbacks {
        Fallbacks {
            model_image: self.fallback_model.clone(),
            cluster: self.fallback_cluster.clone(),
            namespace: self.fallback_namespace.clone(),
            ingress_url: self.fallback_ingress_url.clone(),
        }
    }

    /// Registry host with `{region}` expanded
    pub fn registry(&self) -> Option<String> {
        self.registry_host
            .as_ref()
            .map(|host| host.replace("{region}", &self.region))
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.store_root.as_os_str().is_empty() {
            anyhow::bail!("store_root cannot be empty");
        }

        if let Some(url) = &self.fallback_ingress_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("fallback_ingress_url must start with http:// or https://");
            }
        }

        if let Some(cidr) = &self.allow_cidr {
            if !cidr.contains('/') {
                anyhow::bail!("allow_cidr must be in CIDR notation (e.g., 10.0.0.0/16)");
            }
        }

        for (name, value) in [
            ("pod_creation_timeout", self.pod_creation_timeout),
            ("deployment_poll_interval", self.deployment_poll_interval),
            ("route_ready_timeout", self.route_ready_timeout),
            ("probe_interval", self.probe_interval),
            ("load_balancer_timeout", self.load_balancer_timeout),
            ("load_balancer_poll_interval", self.load_balancer_poll_interval),
            ("scoring_timeout", self.scoring_timeout),
            ("scoring_poll_interval", self.scoring_poll_interval),
            ("batch_timeout", self.batch_timeout),
            ("batch_sweep_interval", self.batch_sweep_interval),
            ("request_timeout", self.request_timeout),
        ] {
            if value.is_zero() {
                anyhow::bail!("{} must be greater than 0", name);
            }
        }

        if self.container_port == 0 {
            anyhow::bail!("container_port must be greater than 0");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(PathBuf::from("./store"), "scored".to_string())
    }
}
