use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Task ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    Backup,
    Restore,
    IncrementalBackup,
    IncrementalRestore,
}

impl TaskKind {
    pub fn is_incremental(self) -> bool {
        matches!(self, TaskKind::IncrementalBackup | TaskKind::IncrementalRestore)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Backup => "backup",
            TaskKind::Restore => "restore",
            TaskKind::IncrementalBackup => "incremental-backup",
            TaskKind::IncrementalRestore => "incremental-restore",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub kind: TaskKind,
    pub pool: String,
    pub volume: String,
    /// Explicit backup file location. Mutually exclusive with `repo_id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(
        default,
        alias = "repo_uuid",
        alias = "destination_repository_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub repo_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_snapshot: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_snapshot: Option<u64>,
}

impl Task {
    /// Snapshot bounds for incremental kinds, `None` for full kinds or when
    /// either bound is missing.
    pub fn snapshot_range(&self) -> Option<SnapshotRange> {
        if !self.kind.is_incremental() {
            return None;
        }
        match (self.start_snapshot, self.end_snapshot) {
            (Some(start), Some(end)) => Some(SnapshotRange { start, end }),
            _ => None,
        }
    }
}

/// Start/end snapshot ids (creation timestamps) of an incremental operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRange {
    pub start: u64,
    pub end: u64,
}

// ── Job ──

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub uuid: String,
    pub created_time: u64,
    pub task: Task,
}

impl Job {
    pub fn new(task: Task) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            created_time: now_secs(),
            task,
        }
    }
}

// ── Status ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Created,
    Running,
    Complete,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Complete | JobState::Failed | JobState::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_time: u64,
}

impl JobStatus {
    pub fn new(state: JobState) -> Self {
        Self {
            state,
            error: None,
            updated_time: now_secs(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            state: JobState::Failed,
            error: Some(error.into()),
            updated_time: now_secs(),
        }
    }
}

/// What `GET /api/jobs/{id}` returns.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job: Job,
    pub progress: u8,
    pub status: Option<JobStatus>,
}

pub fn now_secs() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn incremental(start: Option<u64>, end: Option<u64>) -> Task {
        Task {
            kind: TaskKind::IncrementalBackup,
            pool: "rbd".into(),
            volume: "vol1".into(),
            path: None,
            repo_id: Some("repoA".into()),
            start_snapshot: start,
            end_snapshot: end,
        }
    }

    #[test]
    fn test_task_deserialization_accepts_repo_aliases() {
        let json = r#"{"kind":"backup","pool":"rbd","volume":"vol1","repo_uuid":"repoA"}"#;
        let task: Task = serde_json::from_str(json).unwrap();
        assert_eq!(task.kind, TaskKind::Backup);
        assert_eq!(task.repo_id.as_deref(), Some("repoA"));
        assert_eq!(task.path, None);

        let json = r#"{"kind":"incremental-restore","pool":"rbd","volume":"v","destination_repository_id":"r","start_snapshot":1,"end_snapshot":2}"#;
        let task: Task = serde_json::from_str(json).unwrap();
        assert_eq!(task.kind, TaskKind::IncrementalRestore);
        assert_eq!(task.snapshot_range(), Some(SnapshotRange { start: 1, end: 2 }));
    }

    #[test]
    fn test_job_serializes_wire_shape() {
        let job = Job {
            uuid: "abc".into(),
            created_time: 42,
            task: incremental(None, None),
        };
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["uuid"], "abc");
        assert_eq!(value["created_time"], 42);
        assert_eq!(value["task"]["kind"], "incremental-backup");
        assert!(value["task"].get("start_snapshot").is_none());
    }

    #[test]
    fn test_snapshot_range_requires_both_bounds() {
        assert_eq!(incremental(Some(1), None).snapshot_range(), None);
        assert_eq!(incremental(None, Some(2)).snapshot_range(), None);
        assert!(incremental(Some(1), Some(2)).snapshot_range().is_some());

        let mut full = incremental(Some(1), Some(2));
        full.kind = TaskKind::Backup;
        assert_eq!(full.snapshot_range(), None);
    }

    #[test]
    fn test_new_jobs_get_distinct_ids() {
        let a = Job::new(incremental(None, None));
        let b = Job::new(incremental(None, None));
        assert_ne!(a.uuid, b.uuid);
        assert!(a.created_time > 0);
    }

    #[test]
    fn test_status_terminal_states() {
        assert!(!JobState::Created.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(JobState::Complete.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
        assert_eq!(serde_json::to_string(&JobState::Complete).unwrap(), "\"complete\"");
    }
}
