// src/fusion/matcher.rs
//
// Associates a damage detection with the part detection it most overlaps.
// Image analysis assigns the best match unconditionally (min_match_iou 0);
// video analysis requires the overlap to clear a threshold and drops the
// damage otherwise.

use crate::types::Detection;

/// Reported when a damage box cannot be matched to any part
pub const UNKNOWN_PART: &str = "unknown part";

const IOU_EPSILON: f32 = 1e-6;

/// Intersection over union of two [x1, y1, x2, y2] boxes. Degenerate boxes
/// contribute zero area; the result is always within [0, 1].
pub fn iou(box1: &[f32; 4], box2: &[f32; 4]) -> f32 {
    let x1 = box1[0].max(box2[0]);
    let y1 = box1[1].max(box2[1]);
    let x2 = box1[2].min(box2[2]);
    let y2 = box1[3].min(box2[3]);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area1 = (box1[2] - box1[0]).max(0.0) * (box1[3] - box1[1]).max(0.0);
    let area2 = (box2[2] - box2[0]).max(0.0) * (box2[3] - box2[1]).max(0.0);

    let score = intersection / (area1 + area2 - intersection + IOU_EPSILON);
    score.clamp(0.0, 1.0)
}

/// The part a damage detection was matched to
#[derive(Debug, Clone)]
pub struct PartMatch {
    pub part_index: usize,
    pub part_label: String,
    pub part_class_id: u32,
    pub iou: f32,
}

/// Scan all retained part detections and return the one with maximum IOU
/// against the damage box.
///
/// With `min_match_iou == 0.0` the best candidate is accepted even at zero
/// overlap; None then only means there were no part detections at all and
/// the caller reports [UNKNOWN_PART]. With a positive threshold, None also
/// covers best overlaps at or below it, and the caller drops the damage.
pub fn best_part_match(
    damage: &Detection,
    parts: &[(usize, Detection)],
    min_match_iou: f32,
) -> Option<PartMatch> {
    let mut best: Option<PartMatch> = None;
    let mut best_iou = 0.0f32;

    for (part_index, part) in parts {
        let score = iou(&damage.bbox, &part.bbox);
        if best.is_none() || score > best_iou {
            best_iou = score;
            best = Some(PartMatch {
                part_index: *part_index,
                part_label: part.label.clone(),
                part_class_id: part.class_id,
                iou: score,
            });
        }
    }

    match best {
        Some(m) if min_match_iou <= 0.0 || m.iou > min_match_iou => Some(m),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(label: &str, class_id: u32, confidence: f32, bbox: [f32; 4]) -> Detection {
        Detection {
            bbox,
            class_id,
            label: label.to_string(),
            confidence,
        }
    }

    #[test]
    fn test_iou_identity() {
        let b = [10.0, 20.0, 110.0, 90.0];
        assert!((iou(&b, &b) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_iou_symmetry() {
        let a = [0.0, 0.0, 100.0, 100.0];
        let b = [50.0, 50.0, 150.0, 150.0];
        assert_eq!(iou(&a, &b), iou(&b, &a));
        assert!((iou(&a, &b) - 2500.0 / 17500.0).abs() < 1e-3);
    }

    #[test]
    fn test_iou_disjoint() {
        let a = [0.0, 0.0, 50.0, 50.0];
        let b = [100.0, 100.0, 200.0, 200.0];
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn test_iou_degenerate_boxes_do_not_panic() {
        let zero = [50.0, 50.0, 50.0, 50.0];
        let inverted = [100.0, 100.0, 20.0, 30.0];
        let normal = [0.0, 0.0, 100.0, 100.0];
        assert_eq!(iou(&zero, &zero), 0.0);
        assert_eq!(iou(&inverted, &normal), 0.0);
    }

    #[test]
    fn test_iou_always_in_unit_range() {
        let boxes = [
            [0.0, 0.0, 1.0, 1.0],
            [0.0, 0.0, 1000.0, 1000.0],
            [-50.0, -50.0, 50.0, 50.0],
            [10.0, 10.0, 10.0, 90.0],
        ];
        for a in &boxes {
            for b in &boxes {
                let score = iou(a, b);
                assert!((0.0..=1.0).contains(&score), "iou {} out of range", score);
            }
        }
    }

    #[test]
    fn test_overlap_beats_higher_score() {
        // Damage overlaps the 0.9 door, not the 0.95 one far away — the
        // match is spatial, confidence plays no role
        let damage = det("Scratch", 0, 0.8, [10.0, 10.0, 50.0, 50.0]);
        let parts = vec![
            (0, det("Door", 2, 0.9, [0.0, 0.0, 60.0, 60.0])),
            (1, det("Door", 2, 0.95, [100.0, 100.0, 150.0, 150.0])),
        ];
        let m = best_part_match(&damage, &parts, 0.0).unwrap();
        assert_eq!(m.part_index, 0);
        assert!(m.iou > 0.0);
    }

    #[test]
    fn test_unconditional_assignment_at_zero_overlap() {
        let damage = det("Dent", 1, 0.7, [0.0, 0.0, 10.0, 10.0]);
        let parts = vec![(0, det("Bumper", 0, 0.9, [500.0, 500.0, 600.0, 600.0]))];
        let m = best_part_match(&damage, &parts, 0.0);
        assert!(m.is_some(), "image mode assigns even zero-overlap parts");
        assert_eq!(m.unwrap().iou, 0.0);
    }

    #[test]
    fn test_no_parts_yields_none() {
        let damage = det("Dent", 1, 0.7, [0.0, 0.0, 10.0, 10.0]);
        assert!(best_part_match(&damage, &[], 0.0).is_none());
    }

    #[test]
    fn test_video_threshold_drops_weak_overlap() {
        let damage = det("Crack", 2, 0.9, [0.0, 0.0, 100.0, 100.0]);
        // IOU just under 0.1
        let parts = vec![(0, det("Windshield", 5, 0.9, [95.0, 0.0, 300.0, 100.0]))];
        assert!(best_part_match(&damage, &parts, 0.1).is_none());
    }

    #[test]
    fn test_video_threshold_accepts_strong_overlap() {
        let damage = det("Crack", 2, 0.9, [0.0, 0.0, 100.0, 100.0]);
        let parts = vec![(3, det("Windshield", 5, 0.9, [20.0, 0.0, 120.0, 100.0]))];
        let m = best_part_match(&damage, &parts, 0.1).unwrap();
        assert_eq!(m.part_index, 3);
        assert_eq!(m.part_label, "Windshield");
    }
}
