//! In-memory registry of running jobs and their cancellation tokens.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Default)]
pub struct JobTracker {
    jobs: Arc<RwLock<HashMap<String, CancellationToken>>>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job and return the token its run should watch.
    pub async fn register(&self, job_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        let mut jobs = self.jobs.write().await;
        jobs.insert(job_id.to_string(), token.clone());
        token
    }

    /// Cancel a running job by its ID. False when it is not running.
    pub async fn cancel(&self, job_id: &str) -> bool {
        let jobs = self.jobs.read().await;
        match jobs.get(job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove a job from tracking once its run has finished.
    pub async fn complete(&self, job_id: &str) {
        let mut jobs = self.jobs.write().await;
        jobs.remove(job_id);
    }

    pub async fn is_running(&self, job_id: &str) -> bool {
        self.jobs.read().await.contains_key(job_id)
    }

    pub async fn running_count(&self) -> usize {
        self.jobs.read().await.len()
    }

    /// Wait until the job is no longer tracked.
    pub async fn wait_finished(&self, job_id: &str) {
        while self.is_running(job_id).await {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Cancel every running job; used on shutdown.
    pub async fn cancel_all(&self) -> usize {
        let jobs = self.jobs.read().await;
        for token in jobs.values() {
            token.cancel();
        }
        jobs.len()
    }
}
