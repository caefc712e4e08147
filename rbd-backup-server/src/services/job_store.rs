//! Durable job records.
//!
//! Key layout inside the `job` namespace:
//! - `job-<uuid>`: the JSON job record, written once
//! - `job-<uuid>-progress`: integer percentage
//! - `job-<uuid>-status`: JSON status record
//! - `job-list`: append-only index of job ids

use crate::models::job::{Job, JobStatus};
use crate::store::{SharedStore, StoreError};
use std::collections::HashSet;

const NAMESPACE: &str = "job";

#[derive(Clone)]
pub struct JobStore {
    store: SharedStore,
    namespace: &'static str,
}

impl JobStore {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            namespace: NAMESPACE,
        }
    }

    fn record_key(&self, id: &str) -> String {
        format!("{}-{}", self.namespace, id)
    }

    fn progress_key(&self, id: &str) -> String {
        format!("{}-{}-progress", self.namespace, id)
    }

    fn status_key(&self, id: &str) -> String {
        format!("{}-{}-status", self.namespace, id)
    }

    fn list_key(&self) -> String {
        format!("{}-list", self.namespace)
    }

    /// Writes the record, then appends its id to the index. The append is
    /// best effort: the record is the source of truth.
    pub async fn put(&self, job: &Job) -> Result<(), StoreError> {
        let value = serde_json::to_string(job)?;
        self.store.set(&self.record_key(&job.uuid), &value).await?;

        if let Err(e) = self.store.push(&self.list_key(), &job.uuid).await {
            tracing::warn!(job_id = %job.uuid, error = %e, "Failed to append job to index");
        }
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Job, StoreError> {
        let key = self.record_key(id);
        let raw = self
            .store
            .get(&key)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt {
            key,
            reason: e.to_string(),
        })
    }

    pub async fn exists(&self, id: &str) -> Result<bool, StoreError> {
        self.store.exists(&self.record_key(id)).await
    }

    /// The last `limit` distinct indexed jobs (all of them when `None`),
    /// most recent last. The index is deduplicated before the limit applies.
    /// Ids whose record is missing or unreadable are skipped.
    pub async fn list(&self, limit: Option<usize>) -> Result<Vec<Job>, StoreError> {
        let indexed = self.store.range(&self.list_key(), 0, -1).await?;

        let mut seen = HashSet::new();
        let ids: Vec<String> = indexed
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect();
        let skip = limit.map_or(0, |n| ids.len().saturating_sub(n));

        let mut jobs = Vec::with_capacity(ids.len() - skip);
        for id in &ids[skip..] {
            match self.get(id).await {
                Ok(job) => jobs.push(job),
                Err(e) => tracing::debug!(job_id = %id, error = %e, "Skipping unreadable job"),
            }
        }
        Ok(jobs)
    }

    pub async fn set_progress(&self, id: &str, percent: u8) -> Result<(), StoreError> {
        self.store
            .set(&self.progress_key(id), &percent.to_string())
            .await
    }

    /// `None` when no progress was recorded yet.
    pub async fn get_progress(&self, id: &str) -> Result<Option<u8>, StoreError> {
        let key = self.progress_key(id);
        let Some(raw) = self.store.get(&key).await? else {
            return Ok(None);
        };
        match raw.trim().parse::<u8>() {
            Ok(p) if p <= 100 => Ok(Some(p)),
            _ => Err(StoreError::Corrupt {
                key,
                reason: format!("not a percentage: {raw:?}"),
            }),
        }
    }

    pub async fn set_status(&self, id: &str, status: &JobStatus) -> Result<(), StoreError> {
        let value = serde_json::to_string(status)?;
        self.store.set(&self.status_key(id), &value).await
    }

    pub async fn get_status(&self, id: &str) -> Result<Option<JobStatus>, StoreError> {
        let key = self.status_key(id);
        let Some(raw) = self.store.get(&key).await? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                key,
                reason: e.to_string(),
            })
    }

    /// Removes the record, its progress and status values, and its index
    /// entry. Returns false when no record existed.
    pub async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let removed = self
            .store
            .delete(&[
                self.record_key(id),
                self.progress_key(id),
                self.status_key(id),
            ])
            .await?;
        let unlisted = self.store.remove(&self.list_key(), id).await?;
        Ok(removed > 0 || unlisted > 0)
    }
}
