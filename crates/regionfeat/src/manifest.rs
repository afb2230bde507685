//! Image manifest: the validated, ordered list of images a job will process,
//! with the output path each one is expected to produce.
//!
//! The manifest file sits next to the output directory (`<output_dir>.txt`)
//! and lists one output path per line, relative to the output directory's
//! parent. The metadata snapshot (`<output_dir>_info.json`) carries the
//! vocabularies, mode and effective configuration for the downstream text
//! conversion stage.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::config::JobConfig;
use crate::error::{JobError, RegionFeatError};
use crate::extract::ExtractMode;
use crate::storage::{ensure_directory, is_published, OutputWriter};

/// Extension of per-image output records.
pub const RECORD_EXTENSION: &str = "json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Identifier as listed, e.g. `1000092795.jpg`.
    pub id: String,
    pub source_path: PathBuf,
    pub output_path: PathBuf,
}

impl ImageRecord {
    /// Output record path relative to the output directory.
    pub fn relative_output(id: &str) -> PathBuf {
        Path::new(id).with_extension(RECORD_EXTENSION)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMetadata {
    pub classes: Vec<String>,
    pub attributes: Vec<String>,
    pub mode: ExtractMode,
    pub image_count: usize,
    pub created_at: DateTime<Utc>,
    pub version: String,
    pub config: JobConfig,
}

#[derive(Debug, Clone)]
pub struct Manifest {
    pub records: Vec<ImageRecord>,
    pub metadata: JobMetadata,
    /// Location of the line-oriented manifest file.
    pub manifest_path: PathBuf,
    /// Location of the metadata snapshot.
    pub metadata_path: PathBuf,
    pub output_dir: PathBuf,
    base_name: String,
}

impl Manifest {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Manifest file lines: `<output dir name>/<id stem>.json`.
    pub fn lines(&self) -> Vec<String> {
        self.records
            .iter()
            .map(|r| {
                let relative = ImageRecord::relative_output(&r.id);
                format!("{}/{}", self.base_name, to_slash(&relative))
            })
            .collect()
    }

    /// Writes the manifest file, then the metadata snapshot. Fails with
    /// `ManifestExists` without touching anything if the manifest is present.
    pub fn persist(&self, writer: &OutputWriter) -> Result<(), RegionFeatError> {
        writer.write_manifest(&self.manifest_path, &self.lines())?;
        writer.publish(&self.metadata_path, &self.metadata)?;
        ensure_directory(&self.output_dir)?;
        info!(
            "Wrote manifest {} ({} entries)",
            self.manifest_path.display(),
            self.records.len()
        );
        Ok(())
    }

    /// Number of records whose output has not been published.
    pub fn missing_outputs(&self) -> usize {
        self.records
            .iter()
            .filter(|r| !is_published(&r.output_path))
            .count()
    }
}

/// Validates the image list of a job and builds its manifest.
pub struct ManifestBuilder<'a> {
    config: &'a JobConfig,
}

impl<'a> ManifestBuilder<'a> {
    pub fn new(config: &'a JobConfig) -> Self {
        Self { config }
    }

    pub fn build(&self) -> Result<Manifest, RegionFeatError> {
        let (manifest_path, metadata_path, base_name) = manifest_paths(&self.config.output_dir)?;

        let ids = read_image_list(&self.config.file_list)?;
        if ids.is_empty() {
            return Err(JobError::EmptyImageList(self.config.file_list.clone()).into());
        }
        info!("Number of images: {}", ids.len());

        let records = build_records(&ids, &self.config.image_dir, &self.config.output_dir)?;

        if manifest_path.exists() {
            return Err(JobError::ManifestExists(manifest_path).into());
        }

        let classes = match &self.config.objects_vocab {
            Some(path) => load_vocab(path)?,
            None => Vec::new(),
        };
        let attributes = match &self.config.attributes_vocab {
            Some(path) => load_vocab(path)?,
            None => Vec::new(),
        };

        let metadata = JobMetadata {
            classes,
            attributes,
            mode: self.config.extract_mode,
            image_count: records.len(),
            created_at: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            config: self.config.clone(),
        };

        Ok(Manifest {
            records,
            metadata,
            manifest_path,
            metadata_path,
            output_dir: self.config.output_dir.clone(),
            base_name,
        })
    }
}

/// Returns `(manifest file, metadata file, output dir name)`.
pub fn manifest_paths(output_dir: &Path) -> Result<(PathBuf, PathBuf, String), JobError> {
    let name = output_dir
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| JobError::InvalidOutputDir(output_dir.to_path_buf()))?
        .to_string();

    let manifest = output_dir.with_file_name(format!("{}.txt", name));
    let metadata = output_dir.with_file_name(format!("{}_info.json", name));
    Ok((manifest, metadata, name))
}

/// Reads identifiers, one per line. Blank lines are ignored.
pub fn read_image_list(path: &Path) -> Result<Vec<String>, JobError> {
    let content = std::fs::read_to_string(path).map_err(|e| JobError::ReadList {
        path: path.to_path_buf(),
        source: e,
    })?;

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

/// Reads a vocabulary file. Each entry is the text before the first comma,
/// lowercased.
pub fn load_vocab(path: &Path) -> Result<Vec<String>, JobError> {
    let content = std::fs::read_to_string(path).map_err(|e| JobError::ReadVocab {
        path: path.to_path_buf(),
        source: e,
    })?;

    Ok(content
        .lines()
        .map(|line| {
            line.split(',')
                .next()
                .unwrap_or_default()
                .trim()
                .to_lowercase()
        })
        .collect())
}

fn build_records(
    ids: &[String],
    image_dir: &Path,
    output_dir: &Path,
) -> Result<Vec<ImageRecord>, JobError> {
    let mut seen_outputs = HashSet::with_capacity(ids.len());
    let mut records = Vec::with_capacity(ids.len());
    let mut missing: Vec<PathBuf> = Vec::new();

    for listed in ids {
        let id = normalize_identifier(listed)
            .ok_or_else(|| JobError::InvalidIdentifier(listed.clone()))?;

        let relative_output = ImageRecord::relative_output(&id);
        if !seen_outputs.insert(relative_output.clone()) {
            return Err(JobError::DuplicateImage(listed.clone()));
        }

        let source_path = image_dir.join(&id);
        if !source_path.is_file() {
            missing.push(source_path);
            continue;
        }

        records.push(ImageRecord {
            id,
            source_path,
            output_path: output_dir.join(relative_output),
        });
    }

    if let Some(first) = missing.first() {
        for path in missing.iter().take(10) {
            warn!("{} does not exist", path.display());
        }
        return Err(JobError::MissingImage {
            first: first.clone(),
            missing: missing.len(),
        });
    }

    Ok(records)
}

/// Relative path inside the image directory with `.` segments removed.
/// Anything that could leave the directory yields `None`.
fn normalize_identifier(id: &str) -> Option<String> {
    let mut parts = Vec::new();
    for component in Path::new(id).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            Component::CurDir => {}
            _ => return None,
        }
    }

    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Completion state of a job that already wrote its manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestStatus {
    pub listed: usize,
    pub present: usize,
}

impl ManifestStatus {
    pub fn missing(&self) -> usize {
        self.listed - self.present
    }
}

/// Reads an existing manifest file and checks which listed outputs exist.
pub fn manifest_status(output_dir: &Path) -> Result<ManifestStatus, JobError> {
    let (manifest_path, _, _) = manifest_paths(output_dir)?;
    let lines = read_image_list(&manifest_path)?;
    let base = output_dir.parent().unwrap_or_else(|| Path::new(""));

    let present = lines
        .iter()
        .filter(|line| is_published(&base.join(line)))
        .count();

    Ok(ManifestStatus {
        listed: lines.len(),
        present,
    })
}
