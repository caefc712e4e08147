use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    pub name: String,
    /// Bytes stored in the pool.
    pub usage: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub name: String,
    /// Provisioned size in bytes.
    pub size: u64,
}

/// A volume snapshot, named in the cluster by its creation timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: u64,
}

impl Snapshot {
    pub fn name(&self) -> String {
        self.timestamp.to_string()
    }
}

/// Orders a listing by creation time; the cluster gives no ordering guarantee.
pub fn ordered(mut snapshots: Vec<Snapshot>) -> Vec<Snapshot> {
    snapshots.sort();
    snapshots.dedup();
    snapshots
}
