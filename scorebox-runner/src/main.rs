//! Scorebox Runner
//!
//! Scores input files with containerised models deployed on demand.
//!
//! Architecture:
//! - Configuration: Load settings from environment or defaults
//! - Repositories: Object store, cluster and image registry access
//! - Services: Provisioning and teardown of scoring deployments
//! - Scheduler: Per-file state machine, batch pipeline and batch controller
//!
//! A `score` run provisions a deployment for one file, scores it, tags the
//! output with its provenance and removes the deployment again. The process
//! exits with 0 on success or the code of the stage that failed.

mod config;
mod repository;
mod scheduler;
mod service;

#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scorebox_client::HttpTransport;
use scorebox_core::domain::job::JobReport;
use scorebox_core::domain::work_unit::{RouteStrategy, ScoringTarget, WorkUnit};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::repository::{FsObjectStore, KubectlCluster, PodmanRegistry};
use crate::scheduler::{Collaborators, Orchestrator};

#[derive(Parser)]
#[command(name = "scorebox-runner")]
#[command(about = "On-demand model scoring runner", long_about = None)]
struct Cli {
    /// Object store root directory
    #[arg(long, env = "SCOREBOX_STORE_ROOT")]
    store_root: Option<PathBuf>,

    /// Print the run report as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score one input file with its own deployment
    Score {
        /// Object key of the input file
        source_key: String,

        /// Destination prefix for the output (defaults to SCOREBOX_DESTINATION)
        #[arg(long)]
        dest: Option<String>,
    },
    /// Score every file under a prefix with one shared deployment
    Batch {
        /// Object key prefix of the input files
        source_prefix: String,

        /// Destination prefix for the outputs (defaults to SCOREBOX_DESTINATION)
        #[arg(long)]
        dest: Option<String>,

        /// Model image (defaults to SCOREBOX_FALLBACK_MODEL)
        #[arg(long)]
        model: Option<String>,
    },
    /// Delete the objects left in place by a failed run
    Teardown {
        /// Object key (or batch prefix) the run was started for
        source_key: String,

        /// Cluster (defaults to SCOREBOX_FALLBACK_CLUSTER)
        #[arg(long)]
        cluster: Option<String>,

        /// Namespace (defaults to SCOREBOX_FALLBACK_NAMESPACE)
        #[arg(long)]
        namespace: Option<String>,

        /// The run used a load balancer instead of an ingress route
        #[arg(long)]
        load_balancer: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scorebox_runner=info,scorebox_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    info!("Starting Scorebox Runner");

    // Load configuration
    let config = load_config(cli.store_root)?;
    config.validate()?;
    info!(
        "Loaded configuration: store_root={}, region={}, registry={:?}",
        config.store_root.display(),
        config.region,
        config.registry()
    );

    let orchestrator = build_orchestrator(&config).await?;

    match cli.command {
        Commands::Score { source_key, dest } => {
            let dest = dest.unwrap_or_else(|| config.destination_prefix.clone());
            let report = orchestrator.run_file(&source_key, &dest).await;
            print_report(&report, cli.json)?;
            Ok(ExitCode::from(report.exit_code()))
        }
        Commands::Batch {
            source_prefix,
            dest,
            model,
        } => {
            let dest = dest.unwrap_or_else(|| config.destination_prefix.clone());
            match orchestrator
                .run_batch(&source_prefix, &dest, model.as_deref())
                .await
            {
                Ok(summary) => {
                    if cli.json {
                        println!("{}", serde_json::to_string_pretty(&summary)?);
                    } else {
                        println!(
                            "Scored {} file(s) with {} ({} replica(s))",
                            summary.outputs.len(),
                            summary.deployment,
                            summary.replicas
                        );
                        for key in &summary.outputs {
                            println!("  {}", key);
                        }
                    }
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => {
                    error!("Batch failed: {}", e);
                    Ok(ExitCode::from(e.stage().code()))
                }
            }
        }
        Commands::Teardown {
            source_key,
            cluster,
            namespace,
            load_balancer,
        } => {
            let route = if load_balancer {
                RouteStrategy::LoadBalancer {
                    hostname_timeout: config.load_balancer_timeout,
                }
            } else {
                RouteStrategy::Ingress {
                    base_url: config.fallback_ingress_url.clone().unwrap_or_default(),
                }
            };
            let unit = WorkUnit::new(
                source_key,
                config.destination_prefix.clone(),
                ScoringTarget {
                    model_image: config.fallback_model.clone(),
                    cluster: cluster.unwrap_or_else(|| config.fallback_cluster.clone()),
                    namespace: namespace.unwrap_or_else(|| config.fallback_namespace.clone()),
                    route,
                },
            );

            let handle = orchestrator.provisioner().handle_for(&unit, 1);
            orchestrator
                .provisioner()
                .teardown(&handle)
                .await
                .with_context(|| format!("Failed to tear down {}", handle.names.deployment))?;
            println!(
                "Removed objects of {} from {}/{}",
                unit.id, handle.cluster, handle.namespace
            );
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Loads configuration from environment variables with fallback to defaults
fn load_config(store_root: Option<PathBuf>) -> Result<Config> {
    match Config::from_env(store_root) {
        Ok(config) => Ok(config),
        Err(e) => {
            info!("Failed to load config from environment ({}), using defaults", e);
            Ok(Config::default())
        }
    }
}

/// Wires the orchestrator to the object store, kubectl and podman
async fn build_orchestrator(config: &Config) -> Result<Orchestrator> {
    let registry = PodmanRegistry::new(config.registry());
    if let Err(e) = registry.check_available().await {
        warn!("Image lookups will fail: {}", e);
    }

    let transport = HttpTransport::new(config.request_timeout)
        .context("Failed to create HTTP client")?;

    Ok(Orchestrator::new(
        config.clone(),
        Collaborators {
            store: Arc::new(FsObjectStore::new(config.store_root.clone())),
            cluster: Arc::new(KubectlCluster::new(config.kubeconfig.clone())),
            registry: Arc::new(registry),
            transport: Arc::new(transport),
        },
    ))
}

fn print_report(report: &JobReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    let path: Vec<String> = report.transitions.iter().map(|s| s.to_string()).collect();
    println!("{}: {}", report.source_key, path.join(" -> "));
    println!("  artifact: {}", report.artifact_key);
    if !report.is_done() && report.scoring_succeeded {
        println!("  note: output was written before the failure");
    }
    Ok(())
}
