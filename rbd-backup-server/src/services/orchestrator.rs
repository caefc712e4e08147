//! Job submission and supervision.
//!
//! `submit` validates a task, resolves where its backup file lives, records
//! the job and hands the run to a background task. The run streams progress
//! from the runner through a channel into the job store and finishes by
//! writing an explicit terminal status.

use crate::models::job::{Job, JobReport, JobState, JobStatus, Task};
use crate::services::cluster::is_safe_name;
use crate::services::job_store::JobStore;
use crate::services::job_tracker::JobTracker;
use crate::services::repo_registry::{RepoError, RepoRegistry};
use crate::services::runner::{Operation, OperationRunner, RunnerError};
use crate::store::StoreError;
use crate::ws::events::JobEvents;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(thiserror::Error, Debug)]
pub enum JobError {
    #[error("{0}")]
    Invalid(String),

    #[error("job not found: {0}")]
    NotFound(String),

    #[error("job is not running: {0}")]
    NotRunning(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<RepoError> for JobError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::Store(e) => JobError::Store(e),
            RepoError::NotFound(id) => JobError::Invalid(format!("unknown repository: {id}")),
            other => JobError::Invalid(other.to_string()),
        }
    }
}

/// Checks a task before anything is recorded for it.
pub fn validate(task: &Task) -> Result<(), JobError> {
    if task.pool.trim().is_empty() {
        return Err(JobError::Invalid("pool is required".into()));
    }
    if task.volume.trim().is_empty() {
        return Err(JobError::Invalid("volume is required".into()));
    }
    for (what, name) in [("pool", &task.pool), ("volume", &task.volume)] {
        if !is_safe_name(name) {
            return Err(JobError::Invalid(format!("invalid {what} name: {name:?}")));
        }
    }

    let path = task.path.as_deref().filter(|p| !p.trim().is_empty());
    let repo = task.repo_id.as_deref().filter(|r| !r.trim().is_empty());
    if path.is_some() == repo.is_some() {
        return Err(JobError::Invalid(
            "exactly one of path or repo_id is required".into(),
        ));
    }

    if task.kind.is_incremental() {
        match (task.start_snapshot, task.end_snapshot) {
            (Some(start), Some(end)) if start < end => {}
            (Some(_), Some(_)) => {
                return Err(JobError::Invalid(
                    "start_snapshot must be older than end_snapshot".into(),
                ))
            }
            _ => {
                return Err(JobError::Invalid(format!(
                    "{} requires start_snapshot and end_snapshot",
                    task.kind
                )))
            }
        }
    }
    Ok(())
}

/// Name of the backup file for `task` inside a repository.
pub fn file_name(task: &Task) -> String {
    match task.snapshot_range() {
        Some(range) => format!("{}@{}-{}.diff", task.volume, range.start, range.end),
        None => task.volume.clone(),
    }
}

#[derive(Clone)]
pub struct JobOrchestrator {
    jobs: JobStore,
    repos: RepoRegistry,
    runner: Arc<OperationRunner>,
    tracker: JobTracker,
    events: JobEvents,
}

impl JobOrchestrator {
    pub fn new(
        jobs: JobStore,
        repos: RepoRegistry,
        runner: OperationRunner,
        events: JobEvents,
    ) -> Self {
        Self {
            jobs,
            repos,
            runner: Arc::new(runner),
            tracker: JobTracker::new(),
            events,
        }
    }

    /// Records the job and starts it in the background. Returns as soon as
    /// the job is stored; the run's outcome lands in its status.
    pub async fn submit(&self, task: Task) -> Result<Job, JobError> {
        validate(&task)?;
        let path = self.resolve_path(&task).await?;

        let job = Job::new(task);
        self.jobs.put(&job).await?;
        self.jobs
            .set_status(&job.uuid, &JobStatus::new(JobState::Created))
            .await?;
        info!(job_id = %job.uuid, kind = %job.task.kind, path = %path.display(), "Job created");
        self.events
            .publish("job:created", json!({ "jobId": job.uuid, "job": job }));

        let cancel = self.tracker.register(&job.uuid).await;
        let this = self.clone();
        let spawned = job.clone();
        tokio::spawn(async move {
            this.execute(spawned, path, cancel).await;
        });

        Ok(job)
    }

    async fn resolve_path(&self, task: &Task) -> Result<PathBuf, JobError> {
        if let Some(path) = task.path.as_deref().filter(|p| !p.trim().is_empty()) {
            return Ok(PathBuf::from(path));
        }
        let repo_id = task.repo_id.as_deref().unwrap_or_default();
        let repo = self.repos.resolve(repo_id).await?;
        Ok(Path::new(&repo.path).join(file_name(task)))
    }

    async fn execute(self, job: Job, path: PathBuf, cancel: CancellationToken) {
        let id = job.uuid.clone();
        self.record_status(&id, JobStatus::new(JobState::Running))
            .await;

        let (tx, mut rx) = mpsc::unbounded_channel::<u8>();
        let drain = {
            let jobs = self.jobs.clone();
            let events = self.events.clone();
            let id = id.clone();
            tokio::spawn(async move {
                let mut recorded = 0u8;
                while let Some(percent) = rx.recv().await {
                    if percent < recorded {
                        continue;
                    }
                    recorded = percent;
                    if let Err(e) = jobs.set_progress(&id, percent).await {
                        warn!(job_id = %id, percent, error = %e, "Failed to record progress");
                    }
                    events.publish("job:progress", json!({ "jobId": id, "percent": percent }));
                }
            })
        };

        let op = Operation {
            kind: job.task.kind,
            pool: job.task.pool.clone(),
            volume: job.task.volume.clone(),
            path,
            range: job.task.snapshot_range(),
        };
        let result = self.runner.run(&op, tx, &cancel).await;

        // The sender went down with the runner; wait for the last writes
        if let Err(e) = drain.await {
            warn!(job_id = %id, error = %e, "Progress drain task failed");
        }

        let status = match result {
            Ok(()) => {
                info!(job_id = %id, "Job complete");
                JobStatus::new(JobState::Complete)
            }
            Err(RunnerError::Cancelled) => {
                info!(job_id = %id, "Job cancelled");
                JobStatus::new(JobState::Cancelled)
            }
            Err(e) => {
                error!(job_id = %id, error = %e, "Job failed");
                JobStatus::failed(e.to_string())
            }
        };
        self.record_status(&id, status).await;
        self.events.retire(&id);
        self.tracker.complete(&id).await;
    }

    async fn record_status(&self, id: &str, status: JobStatus) {
        if let Err(e) = self.jobs.set_status(id, &status).await {
            warn!(job_id = %id, state = ?status.state, error = %e, "Failed to record status");
        }
        self.events
            .publish("job:status", json!({ "jobId": id, "status": status }));
    }

    async fn find(&self, id: &str) -> Result<Job, JobError> {
        match self.jobs.get(id).await {
            Ok(job) => Ok(job),
            Err(StoreError::NotFound(_)) => Err(JobError::NotFound(id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Latest recorded percentage, 0 when none was recorded.
    async fn latest_progress(&self, id: &str) -> u8 {
        match self.jobs.get_progress(id).await {
            Ok(progress) => progress.unwrap_or(0),
            Err(e) => {
                warn!(job_id = %id, error = %e, "Unreadable progress");
                0
            }
        }
    }

    pub async fn get_status(&self, id: &str) -> Result<JobReport, JobError> {
        let job = self.find(id).await?;
        let progress = self.latest_progress(id).await;
        let status = self.jobs.get_status(id).await?;
        Ok(JobReport {
            job,
            progress,
            status,
        })
    }

    pub async fn progress(&self, id: &str) -> Result<u8, JobError> {
        if !self.jobs.exists(id).await? {
            return Err(JobError::NotFound(id.to_string()));
        }
        Ok(self.latest_progress(id).await)
    }

    pub async fn list(&self, limit: Option<usize>) -> Result<Vec<Job>, JobError> {
        Ok(self.jobs.list(limit).await?)
    }

    pub async fn cancel(&self, id: &str) -> Result<(), JobError> {
        if !self.jobs.exists(id).await? {
            return Err(JobError::NotFound(id.to_string()));
        }
        if !self.tracker.cancel(id).await {
            return Err(JobError::NotRunning(id.to_string()));
        }
        info!(job_id = %id, "Cancellation requested");
        Ok(())
    }

    /// Removes a job and everything recorded for it, stopping it first when
    /// it is still running.
    pub async fn delete(&self, id: &str) -> Result<(), JobError> {
        if self.tracker.cancel(id).await {
            self.tracker.wait_finished(id).await;
        }
        if !self.jobs.delete(id).await? {
            return Err(JobError::NotFound(id.to_string()));
        }
        self.events.forget(id);
        info!(job_id = %id, "Job deleted");
        Ok(())
    }

    pub async fn running_count(&self) -> usize {
        self.tracker.running_count().await
    }

    /// Cancels every running job and waits for them to stop.
    pub async fn shutdown(&self) {
        let cancelled = self.tracker.cancel_all().await;
        if cancelled > 0 {
            info!(count = cancelled, "Cancelling running jobs");
        }
        while self.tracker.running_count().await > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::job::TaskKind;
    use crate::models::repository::CreateRepositoryRequest;
    use crate::services::runner::RunnerConfig;
    use crate::store::faulty_kv::FaultyKv;
    use crate::store::sqlite_kv::SqliteKv;
    use crate::store::SharedStore;
    use std::time::Duration;
    use tempfile::TempDir;

    pub(crate) fn orchestrator(dir: &TempDir, runner: RunnerConfig) -> JobOrchestrator {
        let path = dir.path().join("jobs.db");
        let kv: SharedStore = Arc::new(SqliteKv::open(path.to_str().unwrap()).unwrap());
        orchestrator_over(kv, runner, JobEvents::new())
    }

    fn orchestrator_over(kv: SharedStore, runner: RunnerConfig, events: JobEvents) -> JobOrchestrator {
        JobOrchestrator::new(
            JobStore::new(kv.clone()),
            RepoRegistry::new(kv),
            OperationRunner::new(runner),
            events,
        )
    }

    pub(crate) fn shell(script: &str) -> RunnerConfig {
        RunnerConfig {
            program: PathBuf::from("/bin/sh"),
            base_args: vec!["-c".into(), script.into(), "rbd".into()],
            sample_interval: Duration::from_millis(20),
            cancel_grace: Duration::from_secs(2),
        }
    }

    fn task(kind: TaskKind) -> Task {
        Task {
            kind,
            pool: "rbd".into(),
            volume: "vol1".into(),
            path: Some("/mnt/backups/vol1".into()),
            repo_id: None,
            start_snapshot: None,
            end_snapshot: None,
        }
    }

    async fn add_repo(orch: &JobOrchestrator, path: &Path) -> String {
        orch.repos
            .add(CreateRepositoryRequest {
                name: "repoA".into(),
                path: path.to_string_lossy().into(),
            })
            .await
            .unwrap()
            .uuid
    }

    async fn wait_terminal(orch: &JobOrchestrator, id: &str) -> JobReport {
        for _ in 0..400 {
            let report = orch.get_status(id).await.unwrap();
            let finished = report.status.as_ref().is_some_and(|s| s.state.is_terminal());
            if finished && !orch.tracker.is_running(id).await {
                return report;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("job {id} did not finish");
    }

    #[test]
    fn test_validate() {
        assert!(validate(&task(TaskKind::Backup)).is_ok());

        let mut t = task(TaskKind::Backup);
        t.pool = " ".into();
        assert!(matches!(validate(&t), Err(JobError::Invalid(_))));

        let mut t = task(TaskKind::Restore);
        t.volume = "a/b".into();
        assert!(validate(&t).is_err());

        let mut t = task(TaskKind::Backup);
        t.pool = "--image-feature".into();
        assert!(matches!(validate(&t), Err(JobError::Invalid(_))));

        let mut t = task(TaskKind::Backup);
        t.volume = "--export-format=2".into();
        assert!(matches!(validate(&t), Err(JobError::Invalid(_))));

        let mut t = task(TaskKind::Restore);
        t.pool = "a/b".into();
        assert!(validate(&t).is_err());

        let mut t = task(TaskKind::Restore);
        t.pool = "rbd@1".into();
        assert!(validate(&t).is_err());

        let mut t = task(TaskKind::Backup);
        t.repo_id = Some("repoA".into());
        assert!(validate(&t).is_err());

        let mut t = task(TaskKind::Backup);
        t.path = None;
        assert!(validate(&t).is_err());

        let mut t = task(TaskKind::IncrementalRestore);
        t.start_snapshot = Some(200);
        t.end_snapshot = Some(100);
        assert!(validate(&t).is_err());
        t.start_snapshot = Some(100);
        t.end_snapshot = Some(200);
        assert!(validate(&t).is_ok());
    }

    #[test]
    fn test_file_name() {
        let mut t = task(TaskKind::IncrementalBackup);
        assert_eq!(file_name(&t), "vol1");
        t.start_snapshot = Some(100);
        t.end_snapshot = Some(200);
        assert_eq!(file_name(&t), "vol1@100-200.diff");
    }

    #[tokio::test]
    async fn test_backup_through_repository_end_to_end() {
        let dir = TempDir::new().unwrap();
        let backups = dir.path().join("backups");
        std::fs::create_dir(&backups).unwrap();
        let log = dir.path().join("args");
        let script = format!(
            "echo \"$@\" > {}; printf 'Exporting image: 40%% complete...' >&2; sleep 0.3",
            log.display()
        );
        let orch = orchestrator(&dir, shell(&script));
        let repo_id = add_repo(&orch, &backups).await;

        let mut t = task(TaskKind::Backup);
        t.path = None;
        t.repo_id = Some(repo_id);
        let job = orch.submit(t.clone()).await.unwrap();
        assert_eq!(job.task, t);

        let report = wait_terminal(&orch, &job.uuid).await;
        let status = report.status.unwrap();
        assert_eq!(status.state, JobState::Complete);
        assert_eq!(report.progress, 100);
        assert_eq!(report.job.task, t);

        let args = std::fs::read_to_string(&log).unwrap();
        assert_eq!(
            args.trim(),
            format!("export --pool rbd vol1 {}", backups.join("vol1").display())
        );
        assert_eq!(orch.running_count().await, 0);
    }

    #[tokio::test]
    async fn test_incremental_backup_file_in_repository() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("args");
        let script = format!("echo \"$@\" > {}", log.display());
        let orch = orchestrator(&dir, shell(&script));
        let repo_id = add_repo(&orch, dir.path()).await;

        let mut t = task(TaskKind::IncrementalBackup);
        t.path = None;
        t.repo_id = Some(repo_id);
        t.start_snapshot = Some(100);
        t.end_snapshot = Some(200);
        let job = orch.submit(t).await.unwrap();
        wait_terminal(&orch, &job.uuid).await;

        let args = std::fs::read_to_string(&log).unwrap();
        assert_eq!(
            args.trim(),
            format!(
                "export-diff --pool rbd --from-snap 100 vol1@200 {}",
                dir.path().join("vol1@100-200.diff").display()
            )
        );
    }

    #[tokio::test]
    async fn test_incremental_with_only_start_is_rejected_before_running() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("ran");
        let orch = orchestrator(&dir, shell(&format!("touch {}", marker.display())));

        let mut t = task(TaskKind::IncrementalBackup);
        t.start_snapshot = Some(100);
        let err = orch.submit(t).await.unwrap_err();
        assert!(matches!(err, JobError::Invalid(_)));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!marker.exists());
        assert!(orch.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_option_like_names_never_reach_rbd() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("ran");
        let orch = orchestrator(&dir, shell(&format!("touch {}", marker.display())));

        let mut t = task(TaskKind::Backup);
        t.pool = "--image-feature".into();
        t.volume = "--export-format=2".into();
        assert!(matches!(orch.submit(t).await, Err(JobError::Invalid(_))));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!marker.exists());
        assert!(orch.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_repository_is_invalid() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir, shell("true"));
        let mut t = task(TaskKind::Restore);
        t.path = None;
        t.repo_id = Some("missing".into());
        assert!(matches!(orch.submit(t).await, Err(JobError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_failed_exit_marks_job_failed() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(
            &dir,
            shell("printf 'rbd: import failed: Invalid argument' >&2; sleep 0.2; exit 22"),
        );

        let job = orch.submit(task(TaskKind::Restore)).await.unwrap();
        let report = wait_terminal(&orch, &job.uuid).await;
        let status = report.status.unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert!(status.error.unwrap().contains("import failed"));
        assert_eq!(report.progress, 100);
    }

    #[tokio::test]
    async fn test_start_failure_records_no_progress() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(
            &dir,
            RunnerConfig {
                program: PathBuf::from("/nonexistent/rbd"),
                ..RunnerConfig::default()
            },
        );

        let job = orch.submit(task(TaskKind::Backup)).await.unwrap();
        let report = wait_terminal(&orch, &job.uuid).await;
        assert_eq!(report.status.unwrap().state, JobState::Failed);
        assert_eq!(report.progress, 0);
        assert_eq!(orch.jobs.get_progress(&job.uuid).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir, shell("true"));
        assert!(matches!(
            orch.get_status("nope").await,
            Err(JobError::NotFound(_))
        ));
        assert!(matches!(orch.progress("nope").await, Err(JobError::NotFound(_))));
        assert!(matches!(orch.cancel("nope").await, Err(JobError::NotFound(_))));
        assert!(matches!(orch.delete("nope").await, Err(JobError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_submit_returns_unique_ids() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir, shell("true"));
        let mut ids = std::collections::HashSet::new();
        for _ in 0..5 {
            let job = orch.submit(task(TaskKind::Backup)).await.unwrap();
            assert!(ids.insert(job.uuid));
        }
        for id in &ids {
            wait_terminal(&orch, id).await;
        }
        assert_eq!(orch.list(None).await.unwrap().len(), 5);
        assert_eq!(orch.list(Some(2)).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_running_job() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir, shell("printf '7%%' >&2; exec sleep 30"));

        let job = orch.submit(task(TaskKind::Backup)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        orch.cancel(&job.uuid).await.unwrap();

        let report = wait_terminal(&orch, &job.uuid).await;
        assert_eq!(report.status.unwrap().state, JobState::Cancelled);
        assert_ne!(report.progress, 100);
        assert!(matches!(
            orch.cancel(&job.uuid).await,
            Err(JobError::NotRunning(_))
        ));
    }

    fn faulty_store(dir: &TempDir) -> Arc<FaultyKv> {
        let inner = SqliteKv::open(dir.path().join("jobs.db").to_str().unwrap()).unwrap();
        Arc::new(FaultyKv::new(inner))
    }

    #[tokio::test]
    async fn test_progress_write_failure_does_not_stop_job() {
        let dir = TempDir::new().unwrap();
        let kv = faulty_store(&dir);
        kv.fail_set_on("-progress");
        let orch = orchestrator_over(
            kv.clone(),
            shell("printf 'Exporting image: 30%% complete...' >&2; sleep 0.2"),
            JobEvents::new(),
        );

        let job = orch.submit(task(TaskKind::Backup)).await.unwrap();
        let report = wait_terminal(&orch, &job.uuid).await;
        assert_eq!(report.status.unwrap().state, JobState::Complete);
        assert_eq!(report.progress, 0);
        assert_eq!(orch.jobs.get_progress(&job.uuid).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_store_failure_on_submit_is_reported() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("ran");
        let kv = faulty_store(&dir);
        kv.fail_all(true);
        let orch = orchestrator_over(
            kv.clone(),
            shell(&format!("touch {}", marker.display())),
            JobEvents::new(),
        );

        let err = orch.submit(task(TaskKind::Backup)).await.unwrap_err();
        assert!(matches!(err, JobError::Store(StoreError::Backend(_))));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!marker.exists());
        assert_eq!(orch.running_count().await, 0);
    }

    #[tokio::test]
    async fn test_finished_job_history_is_released() {
        let dir = TempDir::new().unwrap();
        let kv: SharedStore =
            Arc::new(SqliteKv::open(dir.path().join("jobs.db").to_str().unwrap()).unwrap());
        let events = JobEvents::with_retention(Duration::from_millis(300));
        let orch = orchestrator_over(kv, shell("printf '60%%' >&2"), events.clone());

        let job = orch.submit(task(TaskKind::Backup)).await.unwrap();
        wait_terminal(&orch, &job.uuid).await;
        assert!(!events.queued(&job.uuid, 0).is_empty());

        tokio::time::sleep(Duration::from_millis(900)).await;
        assert!(events.queued(&job.uuid, 0).is_empty());
        assert_eq!(events.tracked_jobs(), 0);
        assert!(orch.get_status(&job.uuid).await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_running_job() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir, shell("exec sleep 30"));

        let job = orch.submit(task(TaskKind::Backup)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        orch.delete(&job.uuid).await.unwrap();

        assert!(matches!(
            orch.get_status(&job.uuid).await,
            Err(JobError::NotFound(_))
        ));
        assert_eq!(orch.running_count().await, 0);
    }
}
