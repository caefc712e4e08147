//! Pool, image and snapshot queries against the Ceph cluster.

use crate::models::cluster::{ordered, Image, Pool, Snapshot};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::process::Command;

#[derive(thiserror::Error, Debug)]
pub enum ClusterError {
    #[error("failed to run {program}: {source}")]
    Command {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("unexpected output from {program}: {source}")]
    Parse {
        program: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0}")]
    Invalid(String),
}

#[async_trait]
pub trait StorageCluster: Send + Sync {
    async fn list_pools(&self) -> Result<Vec<Pool>, ClusterError>;

    async fn list_images(&self, pool: &str) -> Result<Vec<Image>, ClusterError>;

    /// Snapshots of a volume, oldest first.
    async fn list_snapshots(&self, pool: &str, volume: &str) -> Result<Vec<Snapshot>, ClusterError>;

    /// Creates a snapshot named by the current timestamp.
    async fn create_snapshot(&self, pool: &str, volume: &str) -> Result<Snapshot, ClusterError>;

    async fn remove_snapshot(&self, pool: &str, volume: &str, snapshot: u64) -> Result<(), ClusterError>;
}

// ── CLI output shapes ──

#[derive(Deserialize)]
struct RadosDf {
    #[serde(default)]
    pools: Vec<RadosPool>,
}

#[derive(Deserialize)]
struct RadosPool {
    name: String,
    #[serde(default)]
    size_bytes: u64,
}

#[derive(Deserialize)]
struct RbdListEntry {
    image: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    snapshot: Option<String>,
}

#[derive(Deserialize)]
struct RbdSnapEntry {
    name: String,
}

pub fn parse_pools(json: &str) -> Result<Vec<Pool>, serde_json::Error> {
    let df: RadosDf = serde_json::from_str(json)?;
    Ok(df
        .pools
        .into_iter()
        .map(|p| Pool {
            name: p.name,
            usage: p.size_bytes,
        })
        .collect())
}

/// Images only; `rbd ls -l` also lists every snapshot as its own row.
pub fn parse_images(json: &str) -> Result<Vec<Image>, serde_json::Error> {
    let entries: Vec<RbdListEntry> = serde_json::from_str(json)?;
    Ok(entries
        .into_iter()
        .filter(|e| e.snapshot.is_none())
        .map(|e| Image {
            name: e.image,
            size: e.size,
        })
        .collect())
}

/// Snapshots whose name is a timestamp, oldest first. Others were not
/// created by this service and are skipped.
pub fn parse_snapshots(json: &str) -> Result<Vec<Snapshot>, serde_json::Error> {
    let entries: Vec<RbdSnapEntry> = serde_json::from_str(json)?;
    let snapshots = entries
        .into_iter()
        .filter_map(|e| e.name.parse().ok())
        .map(|timestamp| Snapshot { timestamp })
        .collect();
    Ok(ordered(snapshots))
}

/// A pool, volume or snapshot name that is safe to splice into an rbd
/// spec or argv: non-empty, no separators, not option-like.
pub fn is_safe_name(value: &str) -> bool {
    !value.is_empty() && !value.contains(['/', '@']) && !value.starts_with('-')
}

fn check_name(what: &str, value: &str) -> Result<(), ClusterError> {
    if !is_safe_name(value) {
        return Err(ClusterError::Invalid(format!("invalid {what} name: {value:?}")));
    }
    Ok(())
}

/// [`StorageCluster`] over the `rados` and `rbd` command line tools.
pub struct RbdCli {
    rbd: PathBuf,
    rados: PathBuf,
}

impl RbdCli {
    pub fn new(rbd: impl Into<PathBuf>, rados: impl Into<PathBuf>) -> Self {
        Self {
            rbd: rbd.into(),
            rados: rados.into(),
        }
    }

    async fn output(&self, program: &Path, args: &[&str]) -> Result<String, ClusterError> {
        let name = program.display().to_string();
        tracing::debug!(program = %name, args = ?args, "Running cluster command");
        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|source| ClusterError::Command {
                program: name.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(ClusterError::Failed {
                program: name,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn parse_error(program: &Path) -> impl FnOnce(serde_json::Error) -> ClusterError {
    let program = program.display().to_string();
    move |source| ClusterError::Parse { program, source }
}

#[async_trait]
impl StorageCluster for RbdCli {
    async fn list_pools(&self) -> Result<Vec<Pool>, ClusterError> {
        let out = self.output(&self.rados, &["df", "--format", "json"]).await?;
        parse_pools(&out).map_err(parse_error(&self.rados))
    }

    async fn list_images(&self, pool: &str) -> Result<Vec<Image>, ClusterError> {
        check_name("pool", pool)?;
        let out = self
            .output(&self.rbd, &["ls", "--long", "--format", "json", "--pool", pool])
            .await?;
        parse_images(&out).map_err(parse_error(&self.rbd))
    }

    async fn list_snapshots(&self, pool: &str, volume: &str) -> Result<Vec<Snapshot>, ClusterError> {
        check_name("pool", pool)?;
        check_name("volume", volume)?;
        let target = format!("{pool}/{volume}");
        let out = self
            .output(&self.rbd, &["snap", "ls", "--format", "json", &target])
            .await?;
        parse_snapshots(&out).map_err(parse_error(&self.rbd))
    }

    async fn create_snapshot(&self, pool: &str, volume: &str) -> Result<Snapshot, ClusterError> {
        check_name("pool", pool)?;
        check_name("volume", volume)?;
        let snapshot = Snapshot {
            timestamp: crate::models::job::now_secs(),
        };
        let target = format!("{pool}/{volume}@{}", snapshot.name());
        self.output(&self.rbd, &["snap", "create", &target]).await?;
        tracing::info!(pool, volume, snapshot = snapshot.timestamp, "Snapshot created");
        Ok(snapshot)
    }

    async fn remove_snapshot(&self, pool: &str, volume: &str, snapshot: u64) -> Result<(), ClusterError> {
        check_name("pool", pool)?;
        check_name("volume", volume)?;
        let target = format!("{pool}/{volume}@{snapshot}");
        self.output(&self.rbd, &["snap", "rm", &target]).await?;
        tracing::info!(pool, volume, snapshot, "Snapshot removed");
        Ok(())
    }
}
