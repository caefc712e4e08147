pub mod cluster;
pub mod job;
pub mod repository;
