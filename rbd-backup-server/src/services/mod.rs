pub mod cluster;
pub mod job_store;
pub mod job_tracker;
pub mod orchestrator;
pub mod progress;
pub mod repo_registry;
pub mod runner;
