//! Image registry repository
//!
//! Resolves model image names against a container registry:
//! - Checking podman availability
//! - Qualifying bare image names with the configured registry host
//! - Looking up image manifests without pulling the image

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to run podman: {0}")]
    Io(#[from] std::io::Error),

    #[error("podman is not working correctly: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// Repository trait for image lookups
#[async_trait]
pub trait ImageRegistry: Send + Sync {
    /// Fully qualified reference of `image` if the registry has it
    async fn resolve(&self, image: &str) -> Result<Option<String>>;
}

/// podman implementation of ImageRegistry
pub struct PodmanRegistry {
    host: Option<String>,
}

impl PodmanRegistry {
    /// Creates a registry resolver
    ///
    /// # Arguments
    /// * `host` - Registry host bare image names are qualified with
    ///   (e.g., "registry.example.com"); `None` leaves names untouched
    pub fn new(host: Option<String>) -> Self {
        Self { host }
    }

    /// Checks that podman is installed and answers
    pub async fn check_available(&self) -> Result<()> {
        let output = Command::new("podman").arg("--version").output().await?;

        if !output.status.success() {
            return Err(RegistryError::Unavailable(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let version = String::from_utf8_lossy(&output.stdout);
        info!("Podman is available: {}", version.trim());
        Ok(())
    }

    /// Image reference with registry host and `:latest` tag filled in
    pub fn qualify(&self, image: &str) -> String {
        let image = image.trim();
        let (first, _) = image.split_once('/').unwrap_or(("", image));
        let has_registry = first.contains('.') || first.contains(':') || first == "localhost";

        let qualified = match (&self.host, has_registry) {
            (Some(host), false) => format!("{}/{}", host.trim_end_matches('/'), image),
            _ => image.to_string(),
        };

        let last_segment = qualified.rsplit('/').next().unwrap_or(&qualified);
        if last_segment.contains(':') || last_segment.contains('@') {
            qualified
        } else {
            format!("{}:latest", qualified)
        }
    }
}

#[async_trait]
impl ImageRegistry for PodmanRegistry {
    async fn resolve(&self, image: &str) -> Result<Option<String>> {
        let reference = self.qualify(image);

        let output = Command::new("podman")
            .args(["manifest", "inspect", reference.as_str()])
            .output()
            .await?;

        if output.status.success() {
            debug!("Resolved image {} to {}", image, reference);
            return Ok(Some(reference));
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!(
            "Image {} not resolvable: exit_code={}, stderr='{}'",
            reference,
            output.status.code().unwrap_or(-1),
            stderr.trim()
        );
        Ok(None)
    }
}
