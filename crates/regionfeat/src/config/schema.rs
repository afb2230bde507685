use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::extract::ExtractMode;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub image_dir: PathBuf,
    pub file_list: PathBuf,
    pub output_dir: PathBuf,
    #[serde(default = "default_bbox_dir")]
    pub bbox_dir: PathBuf,
    #[serde(default)]
    pub extract_mode: ExtractMode,
    /// Accelerator slots, one worker each.
    #[serde(default = "default_devices")]
    pub devices: Vec<String>,
    #[serde(default)]
    pub objects_vocab: Option<PathBuf>,
    #[serde(default)]
    pub attributes_vocab: Option<PathBuf>,
    #[serde(default)]
    pub attribute_on: bool,
    #[serde(default)]
    pub extractor: ExtractorConfig,
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub model: ModelConfig,
    /// Free-form `KEY VALUE` overrides handed to the model backend.
    #[serde(default)]
    pub options: BTreeMap<String, serde_json::Value>,
}

fn default_bbox_dir() -> PathBuf {
    PathBuf::from("bbox")
}

fn default_devices() -> Vec<String> {
    vec!["0".to_string()]
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl JobConfig {
    /// Builds a config with defaults for everything but the three required paths.
    pub fn new<I, F, O>(image_dir: I, file_list: F, output_dir: O) -> Self
    where
        I: Into<PathBuf>,
        F: Into<PathBuf>,
        O: Into<PathBuf>,
    {
        Self {
            image_dir: image_dir.into(),
            file_list: file_list.into(),
            output_dir: output_dir.into(),
            bbox_dir: default_bbox_dir(),
            extract_mode: ExtractMode::default(),
            devices: default_devices(),
            objects_vocab: None,
            attributes_vocab: None,
            attribute_on: false,
            extractor: ExtractorConfig::default(),
            input: InputConfig::default(),
            poll_interval_ms: default_poll_interval_ms(),
            model: ModelConfig::default(),
            options: BTreeMap::new(),
        }
    }

    pub fn device_slots(&self) -> Vec<DeviceSlot> {
        self.devices
            .iter()
            .enumerate()
            .map(|(index, id)| DeviceSlot {
                index,
                id: id.clone(),
            })
            .collect()
    }
}

/// One declared accelerator slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSlot {
    pub index: usize,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractorConfig {
    #[serde(default = "default_min_boxes")]
    pub min_boxes: usize,
    #[serde(default = "default_max_boxes")]
    pub max_boxes: usize,
    #[serde(default = "default_conf_thresh")]
    pub conf_thresh: f32,
}

fn default_min_boxes() -> usize {
    10
}

fn default_max_boxes() -> usize {
    100
}

fn default_conf_thresh() -> f32 {
    0.2
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            min_boxes: default_min_boxes(),
            max_boxes: default_max_boxes(),
            conf_thresh: default_conf_thresh(),
        }
    }
}

/// Image preparation parameters for the model input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputConfig {
    #[serde(default = "default_test_scale")]
    pub test_scale: u32,
    #[serde(default = "default_max_size")]
    pub max_size: u32,
    /// Per-channel mean in BGR order.
    #[serde(default = "default_pixel_mean")]
    pub pixel_mean: [f32; 3],
}

fn default_test_scale() -> u32 {
    600
}

fn default_max_size() -> u32 {
    1000
}

fn default_pixel_mean() -> [f32; 3] {
    [102.9801, 115.9465, 122.7717]
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            test_scale: default_test_scale(),
            max_size: default_max_size(),
            pixel_mean: default_pixel_mean(),
        }
    }
}

/// External command backend used by the CLI.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub program: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
}
