// src/fusion/aggregator.rs
//
// Accumulates per-label confidence observations across the frames of one
// video session and reduces them to per-label means. One instance per
// session — created when the video opens, consumed by finalize() after the
// last frame.

use std::collections::BTreeMap;
use tracing::debug;

pub const DEFAULT_AGGREGATE_THRESHOLD: f32 = 0.40;

#[derive(Debug)]
pub struct ConfidenceAggregator {
    per_label: BTreeMap<String, Vec<f32>>,
    threshold: f32,
}

impl ConfidenceAggregator {
    pub fn new(threshold: f32) -> Self {
        Self {
            per_label: BTreeMap::new(),
            threshold,
        }
    }

    /// Record one observation. The label is always registered; the
    /// confidence only enters the statistics when it clears the threshold.
    pub fn observe(&mut self, label: &str, confidence: f32) {
        let entry = self.per_label.entry(label.to_string()).or_default();
        if confidence >= self.threshold {
            entry.push(confidence);
        }
    }

    /// Whether `confidence` would enter the statistics
    pub fn qualifies(&self, confidence: f32) -> bool {
        confidence >= self.threshold
    }

    pub fn observation_count(&self) -> usize {
        self.per_label.values().map(Vec::len).sum()
    }

    /// Reduce to per-label mean confidence. Labels that never had a
    /// qualifying observation report 0.0, not NaN.
    pub fn finalize(self) -> BTreeMap<String, f32> {
        debug!(
            "Finalizing aggregation: {} labels, {} observations",
            self.per_label.len(),
            self.per_label.values().map(Vec::len).sum::<usize>()
        );
        self.per_label
            .into_iter()
            .map(|(label, values)| {
                let mean = if values.is_empty() {
                    0.0
                } else {
                    values.iter().sum::<f32>() / values.len() as f32
                };
                (label, mean)
            })
            .collect()
    }
}

impl Default for ConfidenceAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_AGGREGATE_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_of_observations() {
        let mut agg = ConfidenceAggregator::default();
        agg.observe("Scratch on Door", 0.5);
        agg.observe("Scratch on Door", 0.7);
        agg.observe("Scratch on Door", 0.9);
        let means = agg.finalize();
        assert!((means["Scratch on Door"] - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_label_without_qualifying_observations_reports_zero() {
        let mut agg = ConfidenceAggregator::default();
        agg.observe("Dent on Fender", 0.1);
        agg.observe("Dent on Fender", 0.39);
        let means = agg.finalize();
        assert_eq!(means["Dent on Fender"], 0.0);
    }

    #[test]
    fn test_below_threshold_excluded_from_mean() {
        let mut agg = ConfidenceAggregator::default();
        agg.observe("Crack", 0.2);
        agg.observe("Crack", 0.6);
        agg.observe("Crack", 0.8);
        let means = agg.finalize();
        assert!((means["Crack"] - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_threshold_boundary_is_inclusive() {
        let mut agg = ConfidenceAggregator::new(0.40);
        agg.observe("Dent", 0.40);
        let means = agg.finalize();
        assert!((means["Dent"] - 0.40).abs() < 1e-6);
    }

    #[test]
    fn test_three_frame_video_scenario() {
        // One "Dent on Fender" per frame across 3 frames
        let mut agg = ConfidenceAggregator::default();
        for confidence in [0.5, 0.6, 0.7] {
            agg.observe("Dent on Fender", confidence);
        }
        let means = agg.finalize();
        assert!((means["Dent on Fender"] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_labels_accumulate_independently() {
        let mut agg = ConfidenceAggregator::default();
        agg.observe("Scratch on Door", 0.8);
        agg.observe("Dent on Bumper", 0.6);
        let means = agg.finalize();
        assert_eq!(means.len(), 2);
        assert!((means["Scratch on Door"] - 0.8).abs() < 1e-6);
        assert!((means["Dent on Bumper"] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_empty_session_finalizes_empty() {
        let agg = ConfidenceAggregator::default();
        assert!(agg.finalize().is_empty());
    }

    #[test]
    fn test_zero_threshold_accepts_everything() {
        let mut agg = ConfidenceAggregator::new(0.0);
        agg.observe("Mirror", 0.05);
        assert_eq!(agg.observation_count(), 1);
    }
}
