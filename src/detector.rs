// src/detector.rs
//
// Capability interface between the fusion pipeline and a segmentation
// detector. The pipeline never touches model internals — it consumes raw,
// index-aligned detector output through this trait.

use crate::types::Frame;
use anyhow::Result;
use std::collections::HashSet;

/// Raw output of one inference call. All vectors are index-aligned:
/// boxes[i], class_ids[i], scores[i] and masks[i] describe the same
/// instance, in the order the detector emitted them.
#[derive(Debug, Clone, Default)]
pub struct RawDetections {
    pub boxes: Vec<[f32; 4]>,
    pub class_ids: Vec<u32>,
    pub scores: Vec<f32>,
    pub masks: Option<Vec<RawMask>>,
}

impl RawDetections {
    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }
}

/// Continuous-valued instance mask in the detector's native resolution
#[derive(Debug, Clone)]
pub struct RawMask {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f32>,
}

/// Immutable class id → display label mapping for one detector
#[derive(Debug, Clone)]
pub struct LabelMap {
    names: Vec<String>,
}

impl LabelMap {
    pub fn from_names(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn name(&self, class_id: u32) -> &str {
        self.names
            .get(class_id as usize)
            .map(String::as_str)
            .unwrap_or("unknown")
    }

    /// Resolve display names to class ids. Names absent from the map are
    /// ignored rather than reported.
    pub fn resolve_ids(&self, names: &[String]) -> HashSet<u32> {
        self.names
            .iter()
            .enumerate()
            .filter(|(_, name)| names.iter().any(|n| n == *name))
            .map(|(id, _)| id as u32)
            .collect()
    }
}

/// A segmentation detector. Must be deterministic for identical weights
/// and input.
pub trait Detector {
    fn infer(&mut self, frame: &Frame) -> Result<RawDetections>;

    fn labels(&self) -> &LabelMap;
}
