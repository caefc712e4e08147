use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub uuid: String,
    pub name: String,
    pub path: String,
    #[serde(rename = "free_space", default, skip_serializing_if = "Option::is_none")]
    pub free: Option<u64>,
    #[serde(rename = "total_space", default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateRepositoryRequest {
    pub name: String,
    pub path: String,
}

/// Free and total bytes of the filesystem holding `path`.
pub fn space_info(path: &Path) -> nix::Result<(u64, u64)> {
    let stat = nix::sys::statvfs::statvfs(path)?;
    let block = stat.fragment_size() as u64;
    let free = stat.blocks_free() as u64 * block;
    let total = stat.blocks() as u64 * block;
    Ok((free, total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_space_info_of_temp_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let (free, total) = space_info(dir.path()).unwrap();
        assert!(total > 0);
        assert!(free <= total);
    }

    #[test]
    fn test_space_fields_omitted_until_resolved() {
        let repo = Repository {
            uuid: "r".into(),
            name: "main".into(),
            path: "/mnt/backups".into(),
            free: None,
            total: None,
        };
        let value = serde_json::to_value(&repo).unwrap();
        assert!(value.get("free_space").is_none());
        assert_eq!(value["path"], "/mnt/backups");
    }
}
