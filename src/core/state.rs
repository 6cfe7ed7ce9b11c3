//! Per-stack lock files: load, atomic save, path derivation.

use super::types::StateLock;
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

pub fn lock_file_path(state_dir: &Path, stack: &str) -> PathBuf {
    state_dir.join(stack).join("state.lock.yaml")
}

/// Load a stack's lock. `None` when the stack was never recorded.
pub fn load_lock(state_dir: &Path, stack: &str) -> Result<Option<StateLock>> {
    let path = lock_file_path(state_dir, stack);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path).map_err(|e| Error::io("read", &path, e))?;
    let lock: StateLock = serde_yaml_ng::from_str(&content)?;
    Ok(Some(lock))
}

/// Save a lock atomically (write to temp, then rename).
pub fn save_lock(state_dir: &Path, lock: &StateLock) -> Result<()> {
    let path = lock_file_path(state_dir, &lock.stack);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::io("create", parent, e))?;
    }

    let yaml = serde_yaml_ng::to_string(lock)?;
    let tmp_path = path.with_extension("yaml.tmp");
    std::fs::write(&tmp_path, yaml).map_err(|e| Error::io("write", &tmp_path, e))?;
    std::fs::rename(&tmp_path, &path).map_err(|e| Error::io("rename", &tmp_path, e))?;
    Ok(())
}

/// Remove a stack's lock. Missing locks are not an error.
pub fn remove_lock(state_dir: &Path, stack: &str) -> Result<()> {
    let path = lock_file_path(state_dir, stack);
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io("remove", &path, e)),
    }
}

pub fn new_lock(stack: &str) -> StateLock {
    StateLock {
        schema: "1.0".to_string(),
        stack: stack.to_string(),
        generated_at: crate::tripwire::eventlog::now_iso8601(),
        generator: format!("wwapi {}", env!("CARGO_PKG_VERSION")),
        blake3_version: "1.8".to_string(),
        template_path: None,
        template_hash: None,
        resources: indexmap::IndexMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ResourceLock, ResourceStatus, ResourceType};
    use std::collections::HashMap;

    fn make_lock() -> StateLock {
        let mut lock = new_lock("WwapiStack");
        lock.resources.insert(
            "Bucket".to_string(),
            ResourceLock {
                resource_type: ResourceType::Bucket,
                status: ResourceStatus::Converged,
                applied_at: Some("2026-02-16T14:00:00Z".to_string()),
                hash: "blake3:abc123".to_string(),
                details: HashMap::new(),
            },
        );
        lock
    }

    #[test]
    fn test_state_lock_file_path() {
        let p = lock_file_path(Path::new("/state"), "WwapiStack");
        assert_eq!(p, PathBuf::from("/state/WwapiStack/state.lock.yaml"));
    }

    #[test]
    fn test_state_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        save_lock(dir.path(), &make_lock()).unwrap();
        let loaded = load_lock(dir.path(), "WwapiStack").unwrap().unwrap();
        assert_eq!(loaded.stack, "WwapiStack");
        assert_eq!(loaded.resources["Bucket"].hash, "blake3:abc123");
        assert!(loaded.generator.starts_with("wwapi "));
    }

    #[test]
    fn test_state_load_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_lock(dir.path(), "Nope").unwrap().is_none());
    }

    #[test]
    fn test_state_save_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        save_lock(dir.path(), &make_lock()).unwrap();
        let entries: Vec<_> = std::fs::read_dir(dir.path().join("WwapiStack"))
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(entries, vec!["state.lock.yaml"]);
    }

    #[test]
    fn test_state_corrupt_lock_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_file_path(dir.path(), "S");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "resources: [unclosed").unwrap();
        assert!(load_lock(dir.path(), "S").is_err());
    }

    #[test]
    fn test_state_remove_lock() {
        let dir = tempfile::tempdir().unwrap();
        save_lock(dir.path(), &make_lock()).unwrap();
        remove_lock(dir.path(), "WwapiStack").unwrap();
        assert!(load_lock(dir.path(), "WwapiStack").unwrap().is_none());
        remove_lock(dir.path(), "WwapiStack").unwrap();
    }
}
