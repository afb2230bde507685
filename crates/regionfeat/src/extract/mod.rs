pub mod boxes;
pub mod mode;
pub mod result;
pub mod worker;

pub use boxes::{box_file_path, BoxFile};
pub use mode::ExtractMode;
pub use result::{
    select_regions, BoxesOnly, ExtractionResult, RegionFeatures, RegionFeaturesWithConfidence,
};
pub use worker::{ExtractionWorker, ImageOutcome, WorkerReport};
