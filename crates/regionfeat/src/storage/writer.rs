use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{JobError, RegionFeatError, StorageError};

/// Separator between the target name and the random suffix of temporary
/// file names.
pub const TEMP_MARKER: &str = ".tmp-";

/// Publishes files so that a reader only ever sees complete content: data is
/// written to a sibling temporary file, synced, then renamed into place.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputWriter;

impl OutputWriter {
    pub fn new() -> Self {
        Self
    }

    /// Serializes `value` as JSON and publishes it at `path`.
    pub fn publish<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(value)?;
        self.publish_bytes(path, &bytes)
    }

    pub fn publish_bytes(&self, path: &Path, content: &[u8]) -> Result<(), StorageError> {
        if let Some(parent) = path.parent() {
            ensure_directory(parent)?;
        }

        let temp_path = temp_path_for(path);
        let write_result = write_synced(&temp_path, content);
        if let Err(e) = write_result {
            let _ = std::fs::remove_file(&temp_path);
            return Err(e);
        }

        std::fs::rename(&temp_path, path).map_err(|e| {
            let _ = std::fs::remove_file(&temp_path);
            StorageError::MoveFile {
                from: temp_path.clone(),
                to: path.to_path_buf(),
                source: e,
            }
        })
    }

    /// Writes the line-oriented manifest. Creation is exclusive: an existing
    /// manifest means the job already ran against this output directory.
    pub fn write_manifest<S: AsRef<str>>(
        &self,
        path: &Path,
        lines: &[S],
    ) -> Result<(), RegionFeatError> {
        if let Some(parent) = path.parent() {
            ensure_directory(parent)?;
        }

        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(JobError::ManifestExists(path.to_path_buf()).into());
            }
            Err(e) => {
                return Err(StorageError::WriteFile {
                    path: path.to_path_buf(),
                    source: e,
                }
                .into());
            }
        };

        let mut content = String::new();
        for line in lines {
            content.push_str(line.as_ref());
            content.push('\n');
        }

        file.write_all(content.as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|e| StorageError::WriteFile {
                path: path.to_path_buf(),
                source: e,
            })?;

        Ok(())
    }
}

/// Length of the hex suffix of temporary file names.
const TEMP_SUFFIX_LEN: usize = 32;

/// True if `path` names a published output (exists and is not a temp file).
pub fn is_published(path: &Path) -> bool {
    let is_temp = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(is_temp_name)
        .unwrap_or(false);
    !is_temp && path.is_file()
}

/// Matches exactly the names produced for in-flight writes:
/// `.<name>.tmp-<32 hex digits>`.
fn is_temp_name(name: &str) -> bool {
    let Some(rest) = name.strip_prefix('.') else {
        return false;
    };
    match rest.rsplit_once(TEMP_MARKER) {
        Some((target, suffix)) => {
            !target.is_empty()
                && suffix.len() == TEMP_SUFFIX_LEN
                && suffix.chars().all(|c| c.is_ascii_hexdigit())
        }
        None => false,
    }
}

pub fn ensure_directory(path: &Path) -> Result<(), StorageError> {
    if path.as_os_str().is_empty() || path.exists() {
        return Ok(());
    }
    std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
        path: path.to_path_buf(),
        source: e,
    })
}

fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string());
    let temp_name = format!(".{}{}{}", name, TEMP_MARKER, uuid::Uuid::new_v4().simple());
    path.with_file_name(temp_name)
}

fn write_synced(path: &Path, content: &[u8]) -> Result<(), StorageError> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| StorageError::WriteFile {
            path: path.to_path_buf(),
            source: e,
        })?;

    file.write_all(content)
        .and_then(|_| file.sync_all())
        .map_err(|e| StorageError::WriteFile {
            path: path.to_path_buf(),
            source: e,
        })
}
