pub mod writer;

pub use writer::{ensure_directory, is_published, OutputWriter, TEMP_MARKER};
