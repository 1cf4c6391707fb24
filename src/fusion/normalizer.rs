// src/fusion/normalizer.rs
//
// Converts raw detector output into the pipeline's uniform Detection
// representation. No filtering, no reordering — output index i still
// resolves masks[i] from the same inference call.

use crate::detector::{LabelMap, RawDetections};
use crate::types::Detection;

pub fn normalize(raw: &RawDetections, labels: &LabelMap) -> Vec<Detection> {
    if raw.is_empty() {
        return Vec::new();
    }
    raw.boxes
        .iter()
        .zip(&raw.class_ids)
        .zip(&raw.scores)
        .map(|((bbox, &class_id), &confidence)| Detection {
            bbox: *bbox,
            class_id,
            label: labels.name(class_id).to_string(),
            confidence,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> LabelMap {
        LabelMap::from_names(vec!["Scratch".to_string(), "Dent".to_string()])
    }

    #[test]
    fn test_empty_output_is_valid() {
        let raw = RawDetections::default();
        assert!(normalize(&raw, &labels()).is_empty());
    }

    #[test]
    fn test_emission_order_preserved() {
        let raw = RawDetections {
            boxes: vec![[0.0, 0.0, 10.0, 10.0], [5.0, 5.0, 20.0, 20.0]],
            class_ids: vec![1, 0],
            scores: vec![0.3, 0.9],
            masks: None,
        };
        let dets = normalize(&raw, &labels());
        assert_eq!(dets.len(), 2);
        assert_eq!(dets[0].label, "Dent");
        assert_eq!(dets[1].label, "Scratch");
        assert_eq!(dets[1].confidence, 0.9);
    }

    #[test]
    fn test_unknown_class_id_gets_fallback_label() {
        let raw = RawDetections {
            boxes: vec![[0.0, 0.0, 1.0, 1.0]],
            class_ids: vec![42],
            scores: vec![0.5],
            masks: None,
        };
        let dets = normalize(&raw, &labels());
        assert_eq!(dets[0].label, "unknown");
    }

    #[test]
    fn test_degenerate_box_is_tolerated() {
        let raw = RawDetections {
            boxes: vec![[50.0, 50.0, 50.0, 40.0]],
            class_ids: vec![0],
            scores: vec![0.7],
            masks: None,
        };
        let dets = normalize(&raw, &labels());
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].bbox, [50.0, 50.0, 50.0, 40.0]);
    }
}
