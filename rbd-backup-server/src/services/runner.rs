//! Supervised execution of `rbd` export/import operations.

use crate::models::job::{SnapshotRange, TaskKind};
use crate::services::progress::{ProgressSampler, ProgressSink, StopReason, SAMPLE_INTERVAL};
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(thiserror::Error, Debug)]
pub enum RunnerError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to capture stderr of {program}")]
    Pipe { program: String },

    #[error("{kind} requires start and end snapshots")]
    MissingSnapshots { kind: TaskKind },

    #[error("failed waiting for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}{detail}")]
    Exit {
        program: String,
        status: ExitStatus,
        /// `": <last stderr output>"`, or empty.
        detail: String,
    },

    #[error("operation cancelled")]
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Executable invoked for every operation, normally `/usr/bin/rbd`.
    pub program: PathBuf,
    /// Arguments placed before the operation's own arguments.
    pub base_args: Vec<String>,
    pub sample_interval: Duration,
    /// How long a cancelled process gets between SIGTERM and SIGKILL.
    pub cancel_grace: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("/usr/bin/rbd"),
            base_args: Vec::new(),
            sample_interval: SAMPLE_INTERVAL,
            cancel_grace: Duration::from_secs(10),
        }
    }
}

/// One external operation, fully resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub kind: TaskKind,
    pub pool: String,
    pub volume: String,
    pub path: PathBuf,
    pub range: Option<SnapshotRange>,
}

impl Operation {
    /// Arguments for `rbd`, excluding the program and any configured prefix.
    pub fn args(&self) -> Result<Vec<OsString>, RunnerError> {
        let pool = self.pool.as_str();
        let volume = self.volume.as_str();
        let path = self.path.as_os_str().to_os_string();

        let args: Vec<OsString> = match self.kind {
            TaskKind::Backup => vec![
                "export".into(),
                "--pool".into(),
                pool.into(),
                volume.into(),
                path,
            ],
            TaskKind::Restore => vec![
                "import".into(),
                "--dest-pool".into(),
                pool.into(),
                path,
                volume.into(),
            ],
            TaskKind::IncrementalBackup => {
                let range = self.range.ok_or(RunnerError::MissingSnapshots { kind: self.kind })?;
                vec![
                    "export-diff".into(),
                    "--pool".into(),
                    pool.into(),
                    "--from-snap".into(),
                    range.start.to_string().into(),
                    format!("{volume}@{}", range.end).into(),
                    path,
                ]
            }
            TaskKind::IncrementalRestore => {
                self.range.ok_or(RunnerError::MissingSnapshots { kind: self.kind })?;
                vec![
                    "import-diff".into(),
                    "--pool".into(),
                    pool.into(),
                    path,
                    volume.into(),
                ]
            }
        };
        Ok(args)
    }
}

pub struct OperationRunner {
    config: RunnerConfig,
}

impl OperationRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    pub async fn backup<S: ProgressSink + 'static>(
        &self,
        pool: &str,
        volume: &str,
        path: PathBuf,
        sink: S,
        cancel: &CancellationToken,
    ) -> Result<(), RunnerError> {
        let op = Operation {
            kind: TaskKind::Backup,
            pool: pool.into(),
            volume: volume.into(),
            path,
            range: None,
        };
        self.run(&op, sink, cancel).await
    }

    pub async fn restore<S: ProgressSink + 'static>(
        &self,
        pool: &str,
        volume: &str,
        path: PathBuf,
        sink: S,
        cancel: &CancellationToken,
    ) -> Result<(), RunnerError> {
        let op = Operation {
            kind: TaskKind::Restore,
            pool: pool.into(),
            volume: volume.into(),
            path,
            range: None,
        };
        self.run(&op, sink, cancel).await
    }

    pub async fn incremental_backup<S: ProgressSink + 'static>(
        &self,
        pool: &str,
        volume: &str,
        path: PathBuf,
        range: SnapshotRange,
        sink: S,
        cancel: &CancellationToken,
    ) -> Result<(), RunnerError> {
        let op = Operation {
            kind: TaskKind::IncrementalBackup,
            pool: pool.into(),
            volume: volume.into(),
            path,
            range: Some(range),
        };
        self.run(&op, sink, cancel).await
    }

    pub async fn incremental_restore<S: ProgressSink + 'static>(
        &self,
        pool: &str,
        volume: &str,
        path: PathBuf,
        range: SnapshotRange,
        sink: S,
        cancel: &CancellationToken,
    ) -> Result<(), RunnerError> {
        let op = Operation {
            kind: TaskKind::IncrementalRestore,
            pool: pool.into(),
            volume: volume.into(),
            path,
            range: Some(range),
        };
        self.run(&op, sink, cancel).await
    }

    /// Starts the process, samples its stderr into `sink` while it runs, and
    /// returns once both the process and the sampler are done. An exit, even
    /// a failed one, ends with a 100 event; a cancellation does not.
    pub async fn run<S: ProgressSink + 'static>(
        &self,
        op: &Operation,
        sink: S,
        cancel: &CancellationToken,
    ) -> Result<(), RunnerError> {
        let args = op.args()?;
        let program = self.config.program.display().to_string();

        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.base_args)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!(
            kind = %op.kind,
            pool = %op.pool,
            volume = %op.volume,
            path = %op.path.display(),
            "Starting {} {}",
            program,
            args.iter().map(|a| a.to_string_lossy()).collect::<Vec<_>>().join(" ")
        );

        let mut child = cmd.spawn().map_err(|source| RunnerError::Spawn {
            program: program.clone(),
            source,
        })?;
        let stderr = child.stderr.take().ok_or_else(|| RunnerError::Pipe {
            program: program.clone(),
        })?;

        let (stop_tx, stop_rx) = oneshot::channel();
        let sampler = ProgressSampler::new(stderr).with_interval(self.config.sample_interval);
        let sampler_task = tokio::spawn(sampler.run(sink, stop_rx));

        let waited = tokio::select! {
            status = child.wait() => Some(status),
            _ = cancel.cancelled() => None,
        };

        let outcome = match waited {
            Some(Ok(status)) => {
                let _ = stop_tx.send(StopReason::Exited);
                Ok(status)
            }
            Some(Err(source)) => {
                let _ = stop_tx.send(StopReason::Exited);
                Err(RunnerError::Wait {
                    program: program.clone(),
                    source,
                })
            }
            None => {
                self.terminate(&mut child).await;
                let _ = stop_tx.send(StopReason::Cancelled);
                Err(RunnerError::Cancelled)
            }
        };

        let report = match sampler_task.await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "Progress sampler task failed");
                Default::default()
            }
        };

        let status = outcome?;
        if status.success() {
            info!(kind = %op.kind, volume = %op.volume, "Operation finished");
            Ok(())
        } else {
            let detail = if report.tail.is_empty() {
                String::new()
            } else {
                format!(": {}", report.tail)
            };
            Err(RunnerError::Exit {
                program,
                status,
                detail,
            })
        }
    }

    /// SIGTERM, then SIGKILL once the grace period runs out.
    async fn terminate(&self, child: &mut Child) {
        if let Some(pid) = child.id() {
            let pid = nix::unistd::Pid::from_raw(pid as i32);
            if let Err(e) = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM) {
                warn!(pid = %pid, error = %e, "Failed to send SIGTERM");
            }
        }
        match tokio::time::timeout(self.config.cancel_grace, child.wait()).await {
            Ok(_) => {}
            Err(_) => {
                warn!("Process ignored SIGTERM, killing");
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill process");
                }
            }
        }
    }
}
