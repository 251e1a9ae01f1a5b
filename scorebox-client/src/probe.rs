//! Readiness prober
//!
//! Polls a scoring service health endpoint until it answers with the
//! expected sentinel, bounded by a total timeout.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant};
use tracing::{debug, info};

use crate::transport::ScoringTransport;

/// Body a healthy scoring service returns from `GET {base}/`
pub const PONG: &str = "pong";

/// Waits for a scoring endpoint to report healthy
#[derive(Clone)]
pub struct ReadinessProber {
    transport: Arc<dyn ScoringTransport>,
    sentinel: String,
}

impl ReadinessProber {
    pub fn new(transport: Arc<dyn ScoringTransport>) -> Self {
        Self {
            transport,
            sentinel: PONG.to_string(),
        }
    }

    /// Issues a single probe
    ///
    /// Errors and unexpected bodies both count as "not ready".
    pub async fn probe_once(&self, url: &str) -> bool {
        match self.transport.get(url).await {
            Ok(reply) => {
                let body = reply.text();
                debug!("Probe {} answered {}: {:?}", url, reply.status, body);
                body == self.sentinel
            }
            Err(e) => {
                debug!("Probe {} failed: {}", url, e);
                false
            }
        }
    }

    /// Probes `url` every `poll_interval` until it answers the sentinel
    ///
    /// Returns `false` once `total_timeout` has elapsed; no probe is issued
    /// after the deadline.
    pub async fn wait_until_ready(
        &self,
        url: &str,
        total_timeout: Duration,
        poll_interval: Duration,
    ) -> bool {
        let deadline = Instant::now() + total_timeout;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            if self.probe_once(url).await {
                info!("{} ready after {} probe(s)", url, attempts);
                return true;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            time::sleep(poll_interval.min(remaining)).await;
            if Instant::now() >= deadline {
                break;
            }
        }

        info!(
            "{} not ready after {} probe(s) within {:?}",
            url, attempts, total_timeout
        );
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedTransport;

    const TIMEOUT: Duration = Duration::from_secs(120);
    const INTERVAL: Duration = Duration::from_secs(10);

    #[tokio::test(start_paused = true)]
    async fn test_ready_on_third_probe() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push_get(ScriptedTransport::reply(503, b"starting"));
        transport.push_get(ScriptedTransport::reply(404, b"default backend - 404"));
        transport.push_get(ScriptedTransport::reply(200, b"pong"));
        let prober = ReadinessProber::new(transport.clone());

        let start = Instant::now();
        assert!(
            prober
                .wait_until_ready("http://svc/", TIMEOUT, INTERVAL)
                .await
        );

        assert_eq!(transport.get_count(), 3);
        assert_eq!(start.elapsed(), INTERVAL * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_ready_stops_at_deadline() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push_get(ScriptedTransport::reply(200, b"pang"));
        let prober = ReadinessProber::new(transport.clone());

        let start = Instant::now();
        assert!(
            !prober
                .wait_until_ready("http://svc/", TIMEOUT, INTERVAL)
                .await
        );

        assert!(start.elapsed() >= TIMEOUT);
        // Probes at 0s, 10s, ..., 110s and none at or after the deadline
        assert_eq!(transport.get_count(), 12);

        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.get_count(), 12);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_errors_are_not_ready() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push_get(Err(crate::ClientError::ParseError(
            "connection refused".to_string(),
        )));
        let prober = ReadinessProber::new(transport.clone());

        assert!(!prober.probe_once("http://svc/").await);
        assert!(
            !prober
                .wait_until_ready("http://svc/", Duration::from_secs(25), INTERVAL)
                .await
        );
        // 1 single probe plus probes at 0s, 10s, 20s
        assert_eq!(transport.get_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_body_must_match_exactly() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push_get(ScriptedTransport::reply(200, b"pong\n"));
        let prober = ReadinessProber::new(transport);
        assert!(!prober.probe_once("http://svc/").await);
    }
}
