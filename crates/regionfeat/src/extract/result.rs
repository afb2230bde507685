use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::blob::ImageBlob;
use crate::config::ExtractorConfig;
use crate::error::ImageError;
use crate::extract::ExtractMode;
use crate::model::{BBox, ModelOutput};

/// Region boxes with pooled features, in source image coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionFeatures {
    pub image_h: u32,
    pub image_w: u32,
    pub num_bbox: usize,
    pub boxes: Vec<BBox>,
    pub features: Vec<Vec<f32>>,
    /// Best non-background class per region (index into the class vocabulary).
    pub objects_id: Vec<usize>,
    pub objects_conf: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attrs_id: Option<Vec<usize>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attrs_conf: Option<Vec<f32>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionFeaturesWithConfidence {
    #[serde(flatten)]
    pub regions: RegionFeatures,
    /// Raw objectness confidence per kept region.
    pub confidences: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxesOnly {
    pub image_h: u32,
    pub image_w: u32,
    pub num_bbox: usize,
    pub boxes: Vec<BBox>,
    pub scores: Vec<f32>,
}

/// The per-image output record. One variant per [`ExtractMode`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ExtractionResult {
    RoiFeats(RegionFeatures),
    Bboxes(BoxesOnly),
    BboxFeats(RegionFeatures),
    RoiFeatsAndConfs(RegionFeaturesWithConfidence),
}

impl ExtractionResult {
    pub fn mode(&self) -> ExtractMode {
        match self {
            ExtractionResult::RoiFeats(_) => ExtractMode::RoiFeats,
            ExtractionResult::Bboxes(_) => ExtractMode::Bboxes,
            ExtractionResult::BboxFeats(_) => ExtractMode::BboxFeats,
            ExtractionResult::RoiFeatsAndConfs(_) => ExtractMode::RoiFeatsAndConfs,
        }
    }

    pub fn num_bbox(&self) -> usize {
        match self {
            ExtractionResult::RoiFeats(r) | ExtractionResult::BboxFeats(r) => r.num_bbox,
            ExtractionResult::Bboxes(b) => b.num_bbox,
            ExtractionResult::RoiFeatsAndConfs(r) => r.regions.num_bbox,
        }
    }

    /// Converts raw model output into the record for `mode`.
    ///
    /// `given_boxes` are the side-car boxes in source coordinates and are
    /// required for [`ExtractMode::BboxFeats`], where they are passed through
    /// unchanged and no region selection happens.
    pub fn from_model_output(
        mode: ExtractMode,
        output: ModelOutput,
        blob: &ImageBlob,
        given_boxes: Option<&[BBox]>,
        extractor: &ExtractorConfig,
    ) -> Result<Self, ImageError> {
        let regions = output.boxes.len();
        check_len("scores", output.scores.len(), regions)?;
        let confidence: Vec<f32> = output.scores.iter().map(|row| max_class(row).1).collect();

        match mode {
            ExtractMode::Bboxes => {
                let keep = select_regions(&confidence, extractor);
                let boxes = keep
                    .iter()
                    .map(|&i| unscale(output.boxes[i], blob.scale))
                    .collect();
                let scores = keep.iter().map(|&i| confidence[i]).collect();
                Ok(ExtractionResult::Bboxes(BoxesOnly {
                    image_h: blob.image_h,
                    image_w: blob.image_w,
                    num_bbox: keep.len(),
                    boxes,
                    scores,
                }))
            }
            ExtractMode::RoiFeats => {
                let keep = select_regions(&confidence, extractor);
                let regions = region_features(&output, &keep, blob, None)?;
                Ok(ExtractionResult::RoiFeats(regions))
            }
            ExtractMode::RoiFeatsAndConfs => {
                let objectness = output
                    .objectness
                    .as_ref()
                    .ok_or_else(|| ImageError::Shape("objectness missing".to_string()))?;
                check_len("objectness", objectness.len(), regions)?;

                let keep = select_regions(&confidence, extractor);
                let confidences = keep.iter().map(|&i| objectness[i]).collect();
                let regions = region_features(&output, &keep, blob, None)?;
                Ok(ExtractionResult::RoiFeatsAndConfs(
                    RegionFeaturesWithConfidence {
                        regions,
                        confidences,
                    },
                ))
            }
            ExtractMode::BboxFeats => {
                let given = given_boxes
                    .ok_or_else(|| ImageError::Shape("given boxes missing".to_string()))?;
                check_len("boxes", regions, given.len())?;

                let keep: Vec<usize> = (0..regions).collect();
                let regions = region_features(&output, &keep, blob, Some(given))?;
                Ok(ExtractionResult::BboxFeats(regions))
            }
        }
    }
}

fn region_features(
    output: &ModelOutput,
    keep: &[usize],
    blob: &ImageBlob,
    given_boxes: Option<&[BBox]>,
) -> Result<RegionFeatures, ImageError> {
    let regions = output.boxes.len();
    let features = output
        .features
        .as_ref()
        .ok_or_else(|| ImageError::Shape("features missing".to_string()))?;
    check_len("features", features.len(), regions)?;

    let boxes = match given_boxes {
        Some(given) => keep.iter().map(|&i| given[i]).collect(),
        None => keep
            .iter()
            .map(|&i| unscale(output.boxes[i], blob.scale))
            .collect(),
    };

    let (objects_id, objects_conf): (Vec<usize>, Vec<f32>) =
        keep.iter().map(|&i| max_class(&output.scores[i])).unzip();

    let (attrs_id, attrs_conf) = match &output.attr_scores {
        Some(attr_scores) => {
            check_len("attr_scores", attr_scores.len(), regions)?;
            let (ids, confs): (Vec<usize>, Vec<f32>) =
                keep.iter().map(|&i| max_class(&attr_scores[i])).unzip();
            (Some(ids), Some(confs))
        }
        None => (None, None),
    };

    Ok(RegionFeatures {
        image_h: blob.image_h,
        image_w: blob.image_w,
        num_bbox: keep.len(),
        boxes,
        features: keep.iter().map(|&i| features[i].clone()).collect(),
        objects_id,
        objects_conf,
        attrs_id,
        attrs_conf,
    })
}

/// Picks the regions to keep: those at or above `conf_thresh` in their
/// original order, unless that is fewer than `min_boxes` or more than
/// `max_boxes`, in which case the top regions by confidence are taken.
pub fn select_regions(confidence: &[f32], extractor: &ExtractorConfig) -> Vec<usize> {
    let keep: Vec<usize> = (0..confidence.len())
        .filter(|&i| confidence[i] >= extractor.conf_thresh)
        .collect();

    let bound = if keep.len() < extractor.min_boxes {
        extractor.min_boxes
    } else if keep.len() > extractor.max_boxes {
        extractor.max_boxes
    } else {
        return keep;
    };

    let mut ranked: Vec<usize> = (0..confidence.len()).collect();
    ranked.sort_by(|&a, &b| descending(confidence[a], confidence[b]));
    ranked.truncate(bound);
    ranked
}

/// `(argmax, max)` over non-background columns. Single-column rows are
/// treated as a plain score.
fn max_class(row: &[f32]) -> (usize, f32) {
    let classes = if row.len() > 1 { &row[1..] } else { row };
    classes
        .iter()
        .copied()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, v)| {
            if v > best.1 {
                (i, v)
            } else {
                best
            }
        })
}

fn descending(a: f32, b: f32) -> Ordering {
    b.partial_cmp(&a).unwrap_or_else(|| a.is_nan().cmp(&b.is_nan()))
}

fn unscale(b: BBox, scale: f32) -> BBox {
    [b[0] / scale, b[1] / scale, b[2] / scale, b[3] / scale]
}

fn check_len(what: &str, actual: usize, expected: usize) -> Result<(), ImageError> {
    if actual != expected {
        return Err(ImageError::Shape(format!(
            "{} has {} rows, expected {}",
            what, actual, expected
        )));
    }
    Ok(())
}
