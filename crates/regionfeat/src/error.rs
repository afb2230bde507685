use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegionFeatError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Failed to parse config YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Invalid option override: {0}")]
    InvalidOverride(String),
}

/// Conditions that abort the whole job before any worker starts.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("Image list '{0}' is empty")]
    EmptyImageList(PathBuf),

    #[error("Failed to read image list '{path}': {source}")]
    ReadList {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read vocabulary '{path}': {source}")]
    ReadVocab {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{missing} listed image(s) do not exist, first: {first}")]
    MissingImage { first: PathBuf, missing: usize },

    #[error("Image '{0}' is listed more than once")]
    DuplicateImage(String),

    #[error("Invalid image identifier '{0}': must be a relative path inside the image directory")]
    InvalidIdentifier(String),

    #[error("Output directory '{0}' has no usable name for the manifest file")]
    InvalidOutputDir(PathBuf),

    #[error("Manifest already exists: {0} (remove it to re-run the job)")]
    ManifestExists(PathBuf),

    #[error("No accelerator slots declared")]
    NoDevices,

    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),
}

/// Per-image failures. These are absorbed by the worker: the image is
/// skipped and progress still advances.
#[derive(Error, Debug)]
pub enum ImageError {
    #[error("Failed to decode image '{path}': {reason}")]
    Decode { path: PathBuf, reason: String },

    #[error("Box file not found: {0}")]
    MissingBoxes(PathBuf),

    #[error("Invalid box file '{path}': {reason}")]
    InvalidBoxes { path: PathBuf, reason: String },

    #[error("Inference failed: {0}")]
    Inference(#[from] ModelError),

    #[error("Model output has inconsistent shape: {0}")]
    Shape(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to move file from '{from}' to '{to}': {source}")]
    MoveFile {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("File already exists: {0}")]
    FileExists(PathBuf),
}

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to load model on device '{device}': {reason}")]
    Load { device: String, reason: String },

    #[error("Failed to spawn model process '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Model process exited with {status}: {stderr}")]
    ExitStatus { status: String, stderr: String },

    #[error("Invalid model response: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, RegionFeatError>;
