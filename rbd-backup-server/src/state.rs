use crate::config::AppConfig;
use crate::services::cluster::StorageCluster;
use crate::services::job_store::JobStore;
use crate::services::orchestrator::JobOrchestrator;
use crate::services::repo_registry::RepoRegistry;
use crate::services::runner::OperationRunner;
use crate::store::SharedStore;
use crate::ws::events::JobEvents;
use std::sync::Arc;

pub struct AppState {
    pub config: AppConfig,
    pub jobs: JobOrchestrator,
    pub repos: RepoRegistry,
    pub cluster: Arc<dyn StorageCluster>,
    pub events: JobEvents,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        store: SharedStore,
        runner: OperationRunner,
        cluster: Arc<dyn StorageCluster>,
    ) -> Self {
        let events = JobEvents::new();
        let repos = RepoRegistry::new(store.clone());
        let jobs = JobOrchestrator::new(JobStore::new(store), repos.clone(), runner, events.clone());
        Self {
            config,
            jobs,
            repos,
            cluster,
            events,
        }
    }
}
