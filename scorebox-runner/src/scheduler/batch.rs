//! Batch controller
//!
//! Scores many files against one shared deployment. All files are submitted
//! first, then pending sessions are swept until every one completed or the
//! batch deadline passed. Outputs are only persisted once the whole batch
//! finished; a batch never partially succeeds.

use scorebox_client::{ClientError, ScoringClient};
use scorebox_core::domain::session::{ScoringSession, SessionSnapshot, SessionStatus};
use scorebox_core::naming;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::repository::ObjectStore;
use crate::repository::store::StoreError;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("reading {key} failed: {source}")]
    Download {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("submitting {key} failed: {source}")]
    Submission {
        key: String,
        #[source]
        source: ClientError,
    },

    #[error("not finished within {limit:?} (waited {elapsed:?}): {}", pending_summary(.snapshot))]
    Timeout {
        elapsed: Duration,
        limit: Duration,
        snapshot: Vec<SessionSnapshot>,
    },

    #[error("upload of {key} failed: {source}")]
    Upload {
        key: String,
        #[source]
        source: StoreError,
    },
}

fn pending_summary(snapshot: &[SessionSnapshot]) -> String {
    let pending: Vec<&str> = snapshot
        .iter()
        .filter(|row| row.status != SessionStatus::Completed)
        .map(|row| row.file_key.as_str())
        .collect();
    format!(
        "{} of {} file(s) pending: {}",
        pending.len(),
        snapshot.len(),
        pending.join(", ")
    )
}

#[derive(Debug, Clone)]
pub struct BatchSettings {
    /// Shared deadline for all files
    pub timeout: Duration,
    /// Pause between two sweeps
    pub sweep_interval: Duration,
}

impl From<&Config> for BatchSettings {
    fn from(config: &Config) -> Self {
        Self {
            timeout: config.batch_timeout,
            sweep_interval: config.batch_sweep_interval,
        }
    }
}

/// Fans files out to a scoring service and collects their results
pub struct BatchController {
    client: ScoringClient,
    store: Arc<dyn ObjectStore>,
    settings: BatchSettings,
    sessions: Vec<ScoringSession>,
}

impl BatchController {
    pub fn new(client: ScoringClient, store: Arc<dyn ObjectStore>, settings: BatchSettings) -> Self {
        Self {
            client,
            store,
            settings,
            sessions: Vec::new(),
        }
    }

    /// Current `(session, file, status)` rows, in submission order
    pub fn snapshot(&self) -> Vec<SessionSnapshot> {
        self.sessions.iter().map(ScoringSession::snapshot).collect()
    }

    /// Submits every file in order, one session each
    ///
    /// The first failed read or submission fails the batch.
    pub async fn submit_all(&mut self, base: &str, files: &[String]) -> Result<(), BatchError> {
        for key in files {
            let content = self
                .store
                .get(key)
                .await
                .map_err(|source| BatchError::Download {
                    key: key.clone(),
                    source,
                })?;

            let token = self
                .client
                .submit(base, naming::basename(key), content)
                .await
                .map_err(|source| BatchError::Submission {
                    key: key.clone(),
                    source,
                })?;

            let session = ScoringSession::submitted(key.as_str(), token);
            debug!("Session {} opened for {}", session.session_id, key);
            self.sessions.push(session);
        }

        info!("Submitted {} file(s) to {}", self.sessions.len(), base);
        Ok(())
    }

    /// Sweeps pending sessions until all completed or the deadline passed
    ///
    /// The deadline is checked between sweeps.
    pub async fn collect(&mut self, base: &str) -> Result<(), BatchError> {
        let start = Instant::now();
        let limit = self.settings.timeout;
        let mut sweeps = 0u32;

        loop {
            sweeps += 1;
            let mut pending = 0usize;

            for session in self
                .sessions
                .iter_mut()
                .filter(|s| s.status != SessionStatus::Completed)
            {
                let outcome = self.client.poll(base, &session.token).await;
                session.record_poll(outcome);
                if session.status == SessionStatus::Completed {
                    info!("{} scored", session.file_key);
                } else {
                    pending += 1;
                }
            }

            if pending == 0 {
                info!(
                    "All {} file(s) scored after {} sweep(s)",
                    self.sessions.len(),
                    sweeps
                );
                return Ok(());
            }

            let elapsed = start.elapsed();
            if elapsed >= limit {
                warn!(
                    "{} of {} file(s) still pending after {:?}",
                    pending,
                    self.sessions.len(),
                    elapsed
                );
                return Err(BatchError::Timeout {
                    elapsed,
                    limit,
                    snapshot: self.snapshot(),
                });
            }

            debug!("Sweep {}: {} file(s) pending", sweeps, pending);
            time::sleep(self.settings.sweep_interval.min(limit - elapsed)).await;
        }
    }

    /// Writes every completed output under `destination_prefix`
    ///
    /// Stops at the first failed upload; later outputs are not written.
    pub async fn persist(&self, destination_prefix: &str) -> Result<Vec<String>, BatchError> {
        let mut keys = Vec::with_capacity(self.sessions.len());

        for session in &self.sessions {
            let Some(output) = &session.output else {
                continue;
            };
            let key = naming::output_key(destination_prefix, &session.file_key);
            self.store
                .put(&key, output.clone())
                .await
                .map_err(|source| BatchError::Upload {
                    key: key.clone(),
                    source,
                })?;
            debug!("Wrote {}", key);
            keys.push(key);
        }

        Ok(keys)
    }

    /// Submits, collects and persists a whole batch
    pub async fn run(
        &mut self,
        base: &str,
        files: &[String],
        destination_prefix: &str,
    ) -> Result<Vec<String>, BatchError> {
        self.submit_all(base, files).await?;
        self.collect(base).await?;
        self.persist(destination_prefix).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeScoringService, MemoryStore};

    const BASE: &str = "http://ingress.test/batch";

    fn files() -> Vec<String> {
        vec![
            "in/1.csv".to_string(),
            "in/2.csv".to_string(),
            "in/3.csv".to_string(),
        ]
    }

    fn controller(store: &Arc<MemoryStore>, service: &Arc<FakeScoringService>) -> BatchController {
        BatchController::new(
            ScoringClient::new(service.clone()),
            store.clone(),
            BatchSettings {
                timeout: Duration::from_secs(30),
                sweep_interval: Duration::from_secs(2),
            },
        )
    }

    fn store_with_inputs() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::default());
        for key in files() {
            store.insert(&key, key.as_bytes());
        }
        store
    }

    #[tokio::test(start_paused = true)]
    async fn test_submissions_in_order_with_distinct_sessions() {
        let store = store_with_inputs();
        let service = Arc::new(FakeScoringService::default());
        let mut batch = controller(&store, &service);

        batch.submit_all(BASE, &files()).await.unwrap();

        assert_eq!(service.submitted_files(), vec!["1.csv", "2.csv", "3.csv"]);
        let snapshot = batch.snapshot();
        assert!(snapshot.iter().all(|row| row.status == SessionStatus::Submitted));
        assert_ne!(snapshot[0].session_id, snapshot[1].session_id);
        assert_ne!(snapshot[1].session_id, snapshot[2].session_id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_completes_and_persists_all() {
        let store = store_with_inputs();
        let service = Arc::new(FakeScoringService::default());
        service.pending_for("2.csv", Some(3));
        let mut batch = controller(&store, &service);

        let keys = batch.run(BASE, &files(), "out").await.unwrap();

        assert_eq!(
            keys,
            vec!["out/1.csv.scoreout", "out/2.csv.scoreout", "out/3.csv.scoreout"]
        );
        assert_eq!(
            store.object("out/2.csv.scoreout").unwrap(),
            b"scored:in/2.csv".to_vec()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_stuck_file_fails_whole_batch() {
        let store = store_with_inputs();
        let service = Arc::new(FakeScoringService::default());
        service.pending_for("2.csv", None);
        let mut batch = controller(&store, &service);

        let start = Instant::now();
        let err = batch.run(BASE, &files(), "out").await.unwrap_err();

        match err {
            BatchError::Timeout {
                elapsed,
                limit,
                snapshot,
            } => {
                assert_eq!(limit, Duration::from_secs(30));
                assert!(elapsed >= limit);
                let statuses: Vec<SessionStatus> = snapshot.iter().map(|r| r.status).collect();
                assert_eq!(
                    statuses,
                    vec![
                        SessionStatus::Completed,
                        SessionStatus::InProgress,
                        SessionStatus::Completed
                    ]
                );
            }
            other => panic!("unexpected error: {}", other),
        }

        assert!(start.elapsed() >= Duration::from_secs(30));
        // No partial success
        assert!(store.keys_with_prefix("out/").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_files_are_not_polled_again() {
        let store = store_with_inputs();
        let service = Arc::new(FakeScoringService::default());
        service.pending_for("3.csv", Some(2));
        let mut batch = controller(&store, &service);

        batch.submit_all(BASE, &files()).await.unwrap();
        batch.collect(BASE).await.unwrap();

        // Ready on first sweep for 1 and 2; 3 needs three sweeps
        assert_eq!(service.polls_for("1.csv"), 1);
        assert_eq!(service.polls_for("2.csv"), 1);
        assert_eq!(service.polls_for("3.csv"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_upload_failure_aborts_remaining() {
        let store = store_with_inputs();
        store.fail_put("out/2.csv.scoreout");
        let service = Arc::new(FakeScoringService::default());
        let mut batch = controller(&store, &service);

        let err = batch.run(BASE, &files(), "out").await.unwrap_err();

        assert!(matches!(err, BatchError::Upload { ref key, .. } if key == "out/2.csv.scoreout"));
        assert!(store.object("out/1.csv.scoreout").is_some());
        assert!(store.object("out/3.csv.scoreout").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_submission_failure_fails_batch() {
        let store = store_with_inputs();
        let service = Arc::new(FakeScoringService::default());
        service.reject_submissions();
        let mut batch = controller(&store, &service);

        let err = batch.run(BASE, &files(), "out").await.unwrap_err();
        assert!(matches!(err, BatchError::Submission { ref key, .. } if key == "in/1.csv"));
        assert!(batch.snapshot().is_empty());
    }
}
