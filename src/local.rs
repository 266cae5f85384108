//! Local filesystem helpers for assembling upload sources

use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{TransferError, TransferResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalFile {
    pub path: PathBuf,
    /// Path relative to the listed directory, `/`-separated
    pub relative_path: String,
    pub size: u64,
}

/// Size of a regular file; directories and other special files are rejected.
pub async fn file_size(path: &Path) -> TransferResult<u64> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| TransferError::io(path, e))?;
    if !metadata.is_file() {
        return Err(TransferError::io(
            path,
            io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"),
        ));
    }
    Ok(metadata.len())
}

/// Files under `dir`, sorted by relative path. Subdirectories are descended
/// only when `recursive` is set.
pub async fn list_files(dir: &Path, recursive: bool) -> TransferResult<Vec<LocalFile>> {
    let root = dir.to_path_buf();
    let mut files = Vec::new();
    let mut stack = vec![root.clone()];

    while let Some(current) = stack.pop() {
        let mut entries = tokio::fs::read_dir(&current)
            .await
            .map_err(|e| TransferError::io(&current, e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| TransferError::io(&current, e))?
        {
            let path = entry.path();
            let metadata = tokio::fs::metadata(&path)
                .await
                .map_err(|e| TransferError::io(&path, e))?;

            if metadata.is_file() {
                let relative = path
                    .strip_prefix(&root)
                    .unwrap_or(&path)
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                files.push(LocalFile {
                    path,
                    relative_path: relative,
                    size: metadata.len(),
                });
            } else if metadata.is_dir() && recursive {
                stack.push(path);
            }
        }
    }

    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(files)
}

/// Human-readable size, e.g. `512B`, `1.50KB`, `2.00GB`.
pub fn readable_size(size: u64) -> String {
    const UNIT: u64 = 1024;
    const SUFFIXES: [&str; 6] = ["KB", "MB", "GB", "TB", "PB", "EB"];
    if size < UNIT {
        return format!("{}B", size);
    }
    let mut div = UNIT;
    let mut exp = 0;
    let mut n = size / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    format!("{:.2}{}", size as f64 / div as f64, SUFFIXES[exp])
}
