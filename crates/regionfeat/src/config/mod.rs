pub mod loader;
pub mod schema;

pub use loader::{
    apply_min_max_boxes, apply_overrides, load_config, load_config_from_str,
    load_config_from_yaml, parse_devices, validate_config,
};
pub use schema::{DeviceSlot, ExtractorConfig, InputConfig, JobConfig, ModelConfig};
