//! Scoring protocol
//!
//! Submit a file, then poll for the result with the token the service
//! handed back. The two-phase protocol keeps a slow model from blocking the
//! caller: many files can be submitted before any result is collected.

use scorebox_core::domain::session::PollOutcome;
use scorebox_core::dto::scoring::SubmissionResponse;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use crate::endpoint;
use crate::error::{ClientError, Result};
use crate::transport::ScoringTransport;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Client for one or more deployed scoring services
#[derive(Clone)]
pub struct ScoringClient {
    transport: Arc<dyn ScoringTransport>,
    poll_interval: Duration,
}

impl ScoringClient {
    pub fn new(transport: Arc<dyn ScoringTransport>) -> Self {
        Self {
            transport,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Sets the pause between two polls of the same token
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Submits a file for scoring and returns the scoring token
    ///
    /// # Arguments
    /// * `base` - Base URL of the scoring service
    /// * `file_name` - Name the file is uploaded under
    /// * `content` - File bytes
    pub async fn submit(&self, base: &str, file_name: &str, content: Vec<u8>) -> Result<String> {
        let url = endpoint(base, "executions");
        debug!("Submitting {} ({} bytes) to {}", file_name, content.len(), url);

        let reply = self
            .transport
            .post_file(&url, file_name, content)
            .await
            .map_err(|e| ClientError::submission(&url, e.to_string()))?;

        if !(200..300).contains(&reply.status) {
            return Err(ClientError::submission(
                &url,
                format!("status {}: {}", reply.status, reply.text()),
            ));
        }

        let response: SubmissionResponse = serde_json::from_slice(&reply.body).map_err(|e| {
            ClientError::submission(&url, format!("response is not JSON ({}): {}", e, reply.text()))
        })?;

        let token = response
            .token()
            .ok_or_else(|| ClientError::submission(&url, "response has no 'id' field"))?;

        info!("Submitted {} to {}, token {}", file_name, base, token);
        Ok(token)
    }

    /// Asks once whether the result for `token` is ready
    ///
    /// Anything but a 200 means the result is still pending. A failed request
    /// is also treated as pending; the caller's deadline bounds the wait.
    pub async fn poll(&self, base: &str, token: &str) -> PollOutcome {
        let url = endpoint(base, &format!("query/{}", token));

        match self.transport.get(&url).await {
            Ok(reply) if reply.status == 200 => {
                debug!("Result for token {} ready ({} bytes)", token, reply.body.len());
                PollOutcome::Ready(reply.body)
            }
            Ok(reply) => {
                debug!("Token {} still pending (status {})", token, reply.status);
                PollOutcome::Pending
            }
            Err(e) => {
                warn!("Polling {} failed, treating as pending: {}", url, e);
                PollOutcome::Pending
            }
        }
    }

    /// Polls `token` until its result is ready or `limit` has elapsed
    ///
    /// The deadline is checked between polls, so an in-flight poll is never
    /// cut short.
    pub async fn wait_for_result(&self, base: &str, token: &str, limit: Duration) -> Result<Vec<u8>> {
        let start = Instant::now();

        loop {
            if let PollOutcome::Ready(bytes) = self.poll(base, token).await {
                return Ok(bytes);
            }

            let elapsed = start.elapsed();
            if elapsed >= limit {
                warn!(
                    "Scoring token {} not ready after {:?} (limit {:?})",
                    token, elapsed, limit
                );
                return Err(ClientError::ScoringTimeout { elapsed, limit });
            }

            time::sleep(self.poll_interval.min(limit - elapsed)).await;
        }
    }

    /// Submits a file and waits for its scored output
    pub async fn score(
        &self,
        base: &str,
        file_name: &str,
        content: Vec<u8>,
        limit: Duration,
    ) -> Result<Vec<u8>> {
        let token = self.submit(base, file_name, content).await?;
        self.wait_for_result(base, &token, limit).await
    }

    /// Public address this process is seen from, as reported by `echo_url`
    ///
    /// Used in diagnostics when a route must be opened to the caller.
    pub async fn outbound_ip(&self, echo_url: &str) -> Option<String> {
        match self.transport.get(echo_url).await {
            Ok(reply) if reply.status == 200 => {
                let ip = reply.text().trim().to_string();
                (!ip.is_empty()).then_some(ip)
            }
            Ok(reply) => {
                warn!("{} answered status {}", echo_url, reply.status);
                None
            }
            Err(e) => {
                warn!("Failed to look up outbound IP: {}", e);
                None
            }
        }
    }
}
