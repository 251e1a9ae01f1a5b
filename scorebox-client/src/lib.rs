//! Scorebox HTTP Client
//!
//! Drives the remote scoring protocol against one deployed scoring service:
//!
//! - `GET {base}/` answers `pong` once the service is healthy
//! - `POST {base}/executions` accepts a file and returns `{"id": "<token>"}`
//! - `GET {base}/query/{token}` returns 200 with the scored bytes once ready
//!
//! All HTTP traffic goes through [`ScoringTransport`], so the protocol logic
//! can be exercised without a network.
//!
//! # Example
//!
//! ```no_run
//! use scorebox_client::{HttpTransport, ReadinessProber, ScoringClient};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let transport = Arc::new(HttpTransport::new(Duration::from_secs(10))?);
//!     let base = "http://ingress.example.com/in-a-csv-0123456789abcdef";
//!
//!     let prober = ReadinessProber::new(transport.clone());
//!     if prober
//!         .wait_until_ready(base, Duration::from_secs(120), Duration::from_secs(10))
//!         .await
//!     {
//!         let client = ScoringClient::new(transport);
//!         let output = client
//!             .score(base, "a.csv", b"x,y\n1,2\n".to_vec(), Duration::from_secs(40))
//!             .await?;
//!         println!("scored {} bytes", output.len());
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
mod probe;
mod scoring;
mod transport;

// Re-export commonly used types
pub use error::{ClientError, Result};
pub use probe::{PONG, ReadinessProber};
pub use scoring::ScoringClient;
pub use transport::{HttpReply, HttpTransport, ScoringTransport};

/// Joins a service base URL and a path with exactly one `/`
pub(crate) fn endpoint(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
