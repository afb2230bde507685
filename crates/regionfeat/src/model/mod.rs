//! The seam between the job and the detection backend.
//!
//! A backend implements [`ModelProvider`], which loads one [`DetectionModel`]
//! per accelerator slot. Each worker owns its model exclusively and calls it
//! synchronously once per image. Everything a model returns is plain host
//! memory ([`ModelOutput`]); backends that compute on a device copy results
//! back before returning.

pub mod command;

use serde::{Deserialize, Serialize};

use crate::blob::ImageBlob;
use crate::config::DeviceSlot;
use crate::error::ModelError;
use crate::extract::ExtractMode;
use crate::manifest::ImageRecord;

pub use command::{CommandModel, CommandProvider};

/// `[x1, y1, x2, y2]`.
pub type BBox = [f32; 4];

/// One inference request.
pub struct InferenceInput<'a> {
    pub record: &'a ImageRecord,
    /// Sizing for the request. In-process backends read the input tensor
    /// through [`ImageBlob::data`].
    pub blob: &'a ImageBlob,
    pub mode: ExtractMode,
    /// Externally supplied boxes in input coordinates. Only set for
    /// [`ExtractMode::BboxFeats`].
    pub proposals: Option<&'a [BBox]>,
    pub attribute_on: bool,
}

/// Raw model result for one image, in input (resized) coordinates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelOutput {
    pub boxes: Vec<BBox>,
    /// Per-region class scores; column 0 is background.
    pub scores: Vec<Vec<f32>>,
    #[serde(default)]
    pub features: Option<Vec<Vec<f32>>>,
    /// Per-region attribute scores; column 0 is "no attribute".
    #[serde(default)]
    pub attr_scores: Option<Vec<Vec<f32>>>,
    /// Raw objectness confidence per region.
    #[serde(default)]
    pub objectness: Option<Vec<f32>>,
}

pub trait DetectionModel: Send {
    fn infer(&mut self, input: &InferenceInput<'_>) -> Result<ModelOutput, ModelError>;
}

pub trait ModelProvider: Send + Sync {
    /// Loads a model bound to `device`. Called once per non-empty shard, on
    /// the worker's own thread.
    fn load(&self, device: &DeviceSlot) -> Result<Box<dyn DetectionModel>, ModelError>;
}
