use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ImageError;
use crate::manifest::ImageRecord;
use crate::model::BBox;

/// Previously computed boxes for one image, in source image coordinates.
/// Records written in `bboxes` mode are read directly: their extra fields
/// are ignored and their `boxes` stand in for `bbox`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxFile {
    #[serde(alias = "boxes")]
    pub bbox: Vec<BBox>,
    /// Factor into the model's input coordinates. When absent, the scale
    /// computed while preparing the image is used.
    #[serde(default)]
    pub image_scale: Option<f32>,
}

impl BoxFile {
    pub fn load(path: &Path) -> Result<Self, ImageError> {
        let content = match std::fs::read(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ImageError::MissingBoxes(path.to_path_buf()));
            }
            Err(e) => {
                return Err(ImageError::InvalidBoxes {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                });
            }
        };

        let file: BoxFile =
            serde_json::from_slice(&content).map_err(|e| ImageError::InvalidBoxes {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        if file.bbox.is_empty() {
            return Err(ImageError::InvalidBoxes {
                path: path.to_path_buf(),
                reason: "no boxes".to_string(),
            });
        }

        Ok(file)
    }

    /// Boxes in model input coordinates.
    pub fn scaled(&self, blob_scale: f32) -> Vec<BBox> {
        let scale = self.image_scale.unwrap_or(blob_scale);
        self.bbox
            .iter()
            .map(|b| [b[0] * scale, b[1] * scale, b[2] * scale, b[3] * scale])
            .collect()
    }
}

/// Side-car box file for an image: `<bbox_dir>/<id stem>.json`.
pub fn box_file_path(bbox_dir: &Path, id: &str) -> PathBuf {
    bbox_dir.join(ImageRecord::relative_output(id))
}
