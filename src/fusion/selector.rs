// src/fusion/selector.rs
//
// Per-class Top-N selection. Most part classes appear once per vehicle
// side, so one detection per class is kept; classes in the extended-keep
// set (mirrors, fenders, headlights) commonly show up twice in one frame
// and keep two.

use crate::types::Detection;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

const EXTENDED_KEEP_N: usize = 2;

/// Retain the highest-scoring detections of each class: 1 per class, or 2
/// for classes in `extended_keep`. Returned pairs carry the detection's
/// original index so instance masks stay resolvable. Ties in confidence are
/// stable — the earlier-emitted detection wins.
pub fn select_top_per_class(
    detections: &[Detection],
    extended_keep: &HashSet<u32>,
) -> Vec<(usize, Detection)> {
    // Classes come out in first-seen order so output stays deterministic
    let mut class_order: Vec<u32> = Vec::new();
    let mut by_class: HashMap<u32, Vec<usize>> = HashMap::new();
    for (idx, det) in detections.iter().enumerate() {
        let group = by_class.entry(det.class_id).or_default();
        if group.is_empty() {
            class_order.push(det.class_id);
        }
        group.push(idx);
    }

    let mut selected = Vec::new();
    for class_id in class_order {
        let mut indices = by_class.remove(&class_id).unwrap_or_default();
        indices.sort_by(|&a, &b| {
            detections[b]
                .confidence
                .partial_cmp(&detections[a].confidence)
                .unwrap_or(Ordering::Equal)
        });

        let top_n = if extended_keep.contains(&class_id) {
            EXTENDED_KEEP_N
        } else {
            1
        };
        for &idx in indices.iter().take(top_n) {
            selected.push((idx, detections[idx].clone()));
        }
    }

    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(class_id: u32, confidence: f32) -> Detection {
        Detection {
            bbox: [0.0, 0.0, 100.0, 100.0],
            class_id,
            label: format!("class{}", class_id),
            confidence,
        }
    }

    #[test]
    fn test_regular_class_keeps_single_best() {
        let dets = vec![det(0, 0.4), det(0, 0.8), det(0, 0.6)];
        let selected = select_top_per_class(&dets, &HashSet::new());
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].0, 1);
        assert_eq!(selected[0].1.confidence, 0.8);
    }

    #[test]
    fn test_extended_class_keeps_two_best() {
        // Two headlights at 0.9 and 0.85 plus a weak third: exactly the two
        // strongest survive
        let dets = vec![det(3, 0.85), det(3, 0.3), det(3, 0.9)];
        let extended: HashSet<u32> = [3].into_iter().collect();
        let selected = select_top_per_class(&dets, &extended);
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].1.confidence, 0.9, "descending score order");
        assert_eq!(selected[1].1.confidence, 0.85);
    }

    #[test]
    fn test_extended_class_with_single_detection() {
        let dets = vec![det(3, 0.7)];
        let extended: HashSet<u32> = [3].into_iter().collect();
        assert_eq!(select_top_per_class(&dets, &extended).len(), 1);
    }

    #[test]
    fn test_empty_input() {
        assert!(select_top_per_class(&[], &HashSet::new()).is_empty());
    }

    #[test]
    fn test_tie_goes_to_earlier_emission() {
        let dets = vec![det(1, 0.5), det(1, 0.5)];
        let selected = select_top_per_class(&dets, &HashSet::new());
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].0, 0, "earlier-emitted detection should win the tie");
    }

    #[test]
    fn test_classes_selected_independently() {
        let dets = vec![det(0, 0.9), det(1, 0.2), det(0, 0.5), det(2, 0.6)];
        let selected = select_top_per_class(&dets, &HashSet::new());
        assert_eq!(selected.len(), 3);
    }

    #[test]
    fn test_original_indices_survive_selection() {
        let dets = vec![det(0, 0.2), det(1, 0.9), det(0, 0.8)];
        let selected = select_top_per_class(&dets, &HashSet::new());
        let class0 = selected.iter().find(|(_, d)| d.class_id == 0).unwrap();
        assert_eq!(class0.0, 2, "index must point at the original position");
    }
}
