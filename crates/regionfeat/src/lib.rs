pub mod blob;
pub mod config;
pub mod error;
pub mod extract;
pub mod job;
pub mod logging;
pub mod manifest;
pub mod model;
pub mod partition;
pub mod progress;
pub mod storage;

pub use blob::ImageBlob;
pub use config::{load_config, DeviceSlot, JobConfig};
pub use error::{
    ConfigError, ImageError, JobError, ModelError, RegionFeatError, Result, StorageError,
};
pub use extract::{ExtractMode, ExtractionResult, ExtractionWorker, WorkerReport};
pub use job::{ExtractionJob, JobReport};
pub use manifest::{manifest_status, ImageRecord, Manifest, ManifestBuilder, ManifestStatus};
pub use model::{CommandProvider, DetectionModel, InferenceInput, ModelOutput, ModelProvider};
pub use partition::{partition, Shard};
pub use progress::{ProgressCounter, ProgressReporter, ProgressSnapshot};
pub use storage::OutputWriter;
