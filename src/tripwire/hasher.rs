//! BLAKE3 hashing for assets, templates, and desired resource state.

use crate::error::{Error, Result};
use std::io::Read;
use std::path::{Path, PathBuf};

const STREAM_BUF_SIZE: usize = 65536;

/// Hash a file's contents. Returns `"blake3:{hex}"`.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path).map_err(|e| Error::io("open", path, e))?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = [0u8; STREAM_BUF_SIZE];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| Error::io("read", path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("blake3:{}", hasher.finalize().to_hex()))
}

/// Hash a string. Returns `"blake3:{hex}"`.
pub fn hash_string(s: &str) -> String {
    format!("blake3:{}", blake3::hash(s.as_bytes()).to_hex())
}

/// Regular files under `dir`, sorted, as `(relative path, full path)`.
/// Relative paths use `/` separators. Symlinks are skipped.
pub fn walk_files(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    fn walk(base: &Path, current: &Path, entries: &mut Vec<(String, PathBuf)>) -> Result<()> {
        let read_dir = std::fs::read_dir(current).map_err(|e| Error::io("read dir", current, e))?;
        let mut children: Vec<std::fs::DirEntry> = read_dir.filter_map(|e| e.ok()).collect();
        children.sort_by_key(|e| e.file_name());

        for entry in children {
            let path = entry.path();
            let ft = entry.file_type().map_err(|e| Error::io("stat", &path, e))?;
            if ft.is_symlink() {
                continue;
            }
            if ft.is_file() {
                let rel = path
                    .strip_prefix(base)
                    .map_err(|e| Error::Other(format!("path prefix error: {}", e)))?
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                entries.push((rel, path));
            } else if ft.is_dir() {
                walk(base, &path, entries)?;
            }
        }
        Ok(())
    }

    let mut entries = Vec::new();
    walk(dir, dir, &mut entries)?;
    Ok(entries)
}

/// Hash a directory (sorted walk, relative paths included in hash).
pub fn hash_directory(path: &Path) -> Result<String> {
    if !path.is_dir() {
        return Err(Error::Asset {
            path: path.to_path_buf(),
            reason: "not a directory".to_string(),
        });
    }
    let mut hasher = blake3::Hasher::new();
    for (rel, full) in walk_files(path)? {
        let hash = hash_file(&full)?;
        hasher.update(rel.as_bytes());
        hasher.update(b"\0");
        hasher.update(hash.as_bytes());
        hasher.update(b"\n");
    }
    Ok(format!("blake3:{}", hasher.finalize().to_hex()))
}
