// src/responses.rs
//
// Serialized response payloads for the two request shapes. Field names
// match the consumer-facing JSON contract.

use crate::types::FusionResult;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize)]
pub struct BoxLocation {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl From<[f32; 4]> for BoxLocation {
    fn from(bbox: [f32; 4]) -> Self {
        Self {
            x1: bbox[0],
            y1: bbox[1],
            x2: bbox[2],
            y2: bbox[3],
        }
    }
}

/// One "damage on part" finding in a fused image response
#[derive(Debug, Clone, Serialize)]
pub struct FusedImageDetection {
    pub display_text: String,
    pub damage: String,
    pub part: String,
    /// Percent, one decimal
    pub confidence: f32,
    pub location: BoxLocation,
}

impl From<&FusionResult> for FusedImageDetection {
    fn from(result: &FusionResult) -> Self {
        Self {
            display_text: result.display_text.clone(),
            damage: result.damage.clone(),
            part: result.part.clone(),
            confidence: result.confidence,
            location: result.bbox.into(),
        }
    }
}

/// One detection in a single-model image response
#[derive(Debug, Clone, Serialize)]
pub struct SingleImageDetection {
    pub label: String,
    /// Percent, one decimal
    pub confidence: f32,
    #[serde(rename = "box")]
    pub bbox: [f32; 4],
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ImageDetections {
    Fused(Vec<FusedImageDetection>),
    Single(Vec<SingleImageDetection>),
}

impl ImageDetections {
    pub fn len(&self) -> usize {
        match self {
            Self::Fused(v) => v.len(),
            Self::Single(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Serialize)]
pub struct ImageAnalysisResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis_type: Option<String>,
    pub detections: ImageDetections,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_damages: Option<usize>,
    /// Base64-encoded annotated JPEG
    pub annotated_image: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct VideoDetection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub part: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub damage: Option<String>,
    /// Percent
    pub confidence: f32,
    pub display_text: String,
}

#[derive(Debug, Serialize)]
pub struct VideoAnalysisResponse {
    pub annotated_video_url: String,
    /// Omitted for parts-only analysis
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detections: Option<Vec<VideoDetection>>,
    pub average_confidence: BTreeMap<String, f32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
