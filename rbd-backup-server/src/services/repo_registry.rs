//! Registered backup repositories: directories where backup files live.

use crate::models::repository::{space_info, CreateRepositoryRequest, Repository};
use crate::store::{SharedStore, StoreError};
use std::path::Path;
use uuid::Uuid;

const NAMESPACE: &str = "repo";

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("repository not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidPath(String),

    #[error("cannot read space of {path}: {source}")]
    Space {
        path: String,
        #[source]
        source: nix::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct RepoRegistry {
    store: SharedStore,
}

impl RepoRegistry {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    fn record_key(id: &str) -> String {
        format!("{NAMESPACE}-{id}")
    }

    fn list_key() -> String {
        format!("{NAMESPACE}-list")
    }

    pub async fn add(&self, req: CreateRepositoryRequest) -> Result<Repository, RepoError> {
        if req.name.trim().is_empty() {
            return Err(RepoError::InvalidPath("name is required".into()));
        }
        match tokio::fs::metadata(&req.path).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(RepoError::InvalidPath(format!(
                    "path {} is not a directory",
                    req.path
                )))
            }
            Err(e) => {
                return Err(RepoError::InvalidPath(format!(
                    "path {} is not accessible: {e}",
                    req.path
                )))
            }
        }

        let repo = Repository {
            uuid: Uuid::new_v4().to_string(),
            name: req.name,
            path: req.path,
            free: None,
            total: None,
        };
        let value = serde_json::to_string(&repo).map_err(StoreError::from)?;
        self.store.set(&Self::record_key(&repo.uuid), &value).await?;
        if let Err(e) = self.store.push(&Self::list_key(), &repo.uuid).await {
            tracing::warn!(repo_id = %repo.uuid, error = %e, "Failed to append repository to index");
        }
        tracing::info!(repo_id = %repo.uuid, path = %repo.path, "Repository added");
        Ok(repo)
    }

    /// The stored record, without space information.
    pub async fn get(&self, id: &str) -> Result<Repository, RepoError> {
        let key = Self::record_key(id);
        let raw = self
            .store
            .get(&key)
            .await?
            .ok_or_else(|| RepoError::NotFound(id.to_string()))?;
        let repo = serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt {
            key,
            reason: e.to_string(),
        })?;
        Ok(repo)
    }

    /// The record with current free/total space of its filesystem.
    pub async fn resolve(&self, id: &str) -> Result<Repository, RepoError> {
        let repo = self.get(id).await?;
        with_space(repo).await
    }

    /// Every readable repository whose filesystem can be stat'ed.
    pub async fn list(&self) -> Result<Vec<Repository>, RepoError> {
        let ids = self.store.range(&Self::list_key(), 0, -1).await?;
        let mut repos = Vec::with_capacity(ids.len());
        for id in ids {
            match self.resolve(&id).await {
                Ok(repo) => repos.push(repo),
                Err(e) => tracing::warn!(repo_id = %id, error = %e, "Skipping repository"),
            }
        }
        Ok(repos)
    }

    pub async fn delete(&self, id: &str) -> Result<bool, RepoError> {
        let removed = self.store.delete(&[Self::record_key(id)]).await?;
        let unlisted = self.store.remove(&Self::list_key(), id).await?;
        Ok(removed > 0 || unlisted > 0)
    }
}

async fn with_space(mut repo: Repository) -> Result<Repository, RepoError> {
    let path = repo.path.clone();
    let (free, total) = tokio::task::spawn_blocking(move || space_info(Path::new(&path)))
        .await
        .map_err(StoreError::from)?
        .map_err(|source| RepoError::Space {
            path: repo.path.clone(),
            source,
        })?;
    repo.free = Some(free);
    repo.total = Some(total);
    Ok(repo)
}
