use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The output shape a job produces. Selected once per job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractMode {
    /// Region boxes, class scores and pooled features from one forward pass.
    #[default]
    RoiFeats,
    /// Proposal-stage boxes and scores only.
    Bboxes,
    /// Features pooled over externally supplied boxes.
    BboxFeats,
    /// Same as `RoiFeats`, keeping the raw objectness confidence per region.
    RoiFeatsAndConfs,
}

impl ExtractMode {
    pub const ALL: [ExtractMode; 4] = [
        ExtractMode::RoiFeats,
        ExtractMode::Bboxes,
        ExtractMode::BboxFeats,
        ExtractMode::RoiFeatsAndConfs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractMode::RoiFeats => "roi_feats",
            ExtractMode::Bboxes => "bboxes",
            ExtractMode::BboxFeats => "bbox_feats",
            ExtractMode::RoiFeatsAndConfs => "roi_feats_and_confs",
        }
    }

    pub fn produces_features(&self) -> bool {
        !matches!(self, ExtractMode::Bboxes)
    }

    pub fn uses_given_boxes(&self) -> bool {
        matches!(self, ExtractMode::BboxFeats)
    }
}

impl fmt::Display for ExtractMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExtractMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ExtractMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| {
                let names: Vec<&str> = ExtractMode::ALL.iter().map(|m| m.as_str()).collect();
                format!("unknown extract mode '{}', expected one of: {}", s, names.join(", "))
            })
    }
}
