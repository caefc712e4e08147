//! Ceph RBD volume backup server.
//!
//! Runs `rbd export`/`import` and their snapshot-diff variants as supervised
//! background jobs, sampling progress from the tool's stderr into a
//! key-value job store.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;
pub mod utils;
pub mod ws;
