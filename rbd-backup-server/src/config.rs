use crate::services::runner::RunnerConfig;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub data_dir: PathBuf,
    /// `redis://host:port/db`, or a SQLite database path.
    pub store_url: String,
    pub rbd_bin: PathBuf,
    pub rados_bin: PathBuf,
    pub log_level: String,
    pub sample_interval: Duration,
    pub cancel_grace: Duration,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let data_dir = PathBuf::from(std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".into()));

        Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
            store_url: std::env::var("STORE_URL")
                .unwrap_or_else(|_| data_dir.join("rbd-backup.db").to_string_lossy().into_owned()),
            data_dir,
            rbd_bin: PathBuf::from(std::env::var("RBD_BIN").unwrap_or_else(|_| "/usr/bin/rbd".into())),
            rados_bin: PathBuf::from(
                std::env::var("RADOS_BIN").unwrap_or_else(|_| "/usr/bin/rados".into()),
            ),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            sample_interval: Duration::from_millis(
                std::env::var("SAMPLE_INTERVAL_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .filter(|&ms| ms > 0)
                    .unwrap_or(100),
            ),
            cancel_grace: Duration::from_secs(
                std::env::var("CANCEL_GRACE_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(10),
            ),
        }
    }

    pub fn uses_sqlite(&self) -> bool {
        !(self.store_url.starts_with("redis://") || self.store_url.starts_with("rediss://"))
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            program: self.rbd_bin.clone(),
            base_args: Vec::new(),
            sample_interval: self.sample_interval,
            cancel_grace: self.cancel_grace,
        }
    }
}
