// src/orchestrator.rs
//
// Drives the full analysis pipeline for one image or one video: inference
// on the injected detectors, per-class selection, mask resampling, damage
// to part matching, annotation, and (for video) per-label aggregation.
//
// One request at a time: Idle → Running(mode) → Done. An unrecognized
// analysis-type token fails before Running and produces a structured
// error payload, never partial output.

use crate::annotator::{annotate, encode_jpeg_base64, Overlay};
use crate::detector::Detector;
use crate::fusion::{
    best_part_match, normalize, resample_masks, select_top_per_class, ConfidenceAggregator,
};
use crate::fusion::matcher::UNKNOWN_PART;
use crate::responses::{
    ImageAnalysisResponse, ImageDetections, SingleImageDetection, VideoAnalysisResponse,
    VideoDetection,
};
use crate::types::{Detection, Frame, FusionConfig, FusionResult};
use crate::video_processor::VideoProcessor;
use anyhow::Result;
use opencv::core::Mat;
use opencv::prelude::*;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

/// Image analysis assigns the best-overlapping part unconditionally
pub const DEFAULT_IMAGE_MIN_MATCH_IOU: f32 = 0.0;
/// Video analysis drops damage whose best overlap does not clear this
pub const DEFAULT_VIDEO_MIN_MATCH_IOU: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisMode {
    PartsOnly,
    DamageOnly,
    Fused,
}

impl AnalysisMode {
    /// Parse a request token. Both the image request family
    /// ("full.scan", "damage.detection", "car.parts.detection") and the
    /// video family ("full", "damage", "parts") are accepted, trimmed and
    /// case-insensitive.
    pub fn from_token(token: &str) -> Result<Self, PipelineError> {
        let normalized = token.trim().to_lowercase().replace([' ', '_'], ".");
        match normalized.as_str() {
            "full" | "full.scan" => Ok(Self::Fused),
            "damage" | "damage.detection" | "detect.damage" => Ok(Self::DamageOnly),
            "parts" | "parts.detection" | "car.parts.detection" | "scan.parts" => {
                Ok(Self::PartsOnly)
            }
            _ => Err(PipelineError::InvalidMode(token.trim().to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PartsOnly => "parts_detection",
            Self::DamageOnly => "damage_detection",
            Self::Fused => "full_scan",
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid analysis type: {0}")]
    InvalidMode(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn to_response(&self) -> crate::responses::ErrorResponse {
        crate::responses::ErrorResponse {
            error: self.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running(AnalysisMode),
    Done,
}

pub struct Orchestrator {
    parts: Box<dyn Detector>,
    damage: Box<dyn Detector>,
    fusion: FusionConfig,
    extended_keep: HashSet<u32>,
    state: PipelineState,
}

impl Orchestrator {
    pub fn new(parts: Box<dyn Detector>, damage: Box<dyn Detector>, fusion: FusionConfig) -> Self {
        let extended_keep = parts.labels().resolve_ids(&fusion.extended_keep);
        debug!(
            "Extended-keep classes resolved: {:?} → {:?}",
            fusion.extended_keep, extended_keep
        );
        Self {
            parts,
            damage,
            fusion,
            extended_keep,
            state: PipelineState::Idle,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    fn image_min_match_iou(&self) -> f32 {
        self.fusion.min_match_iou.unwrap_or(DEFAULT_IMAGE_MIN_MATCH_IOU)
    }

    fn video_min_match_iou(&self) -> f32 {
        self.fusion.min_match_iou.unwrap_or(DEFAULT_VIDEO_MIN_MATCH_IOU)
    }

    // ------------------------------------------------------------------
    // Image analysis
    // ------------------------------------------------------------------

    pub fn analyze_image(
        &mut self,
        frame: &Frame,
        analysis_type: &str,
    ) -> Result<ImageAnalysisResponse, PipelineError> {
        self.state = PipelineState::Idle;
        let mode = AnalysisMode::from_token(analysis_type)?;
        self.state = PipelineState::Running(mode);

        let response = match mode {
            AnalysisMode::Fused => self.fused_image(frame)?,
            _ => self.single_image(frame, mode)?,
        };

        self.state = PipelineState::Done;
        Ok(response)
    }

    fn fused_image(&mut self, frame: &Frame) -> Result<ImageAnalysisResponse> {
        let raw_parts = self.parts.infer(frame)?;
        let raw_damage = self.damage.infer(frame)?;

        let parts = normalize(&raw_parts, self.parts.labels());
        let damage = normalize(&raw_damage, self.damage.labels());

        let selected_parts = select_top_per_class(&parts, &self.extended_keep);
        let damage_masks = raw_damage
            .masks
            .as_deref()
            .map(|m| resample_masks(m, frame.width, frame.height))
            .unwrap_or_default();

        let min_match_iou = self.image_min_match_iou();
        let mut results: Vec<FusionResult> = Vec::new();
        let mut overlays = Vec::new();

        for (idx, det) in damage.iter().enumerate() {
            let matched = best_part_match(det, &selected_parts, min_match_iou);
            let (part_label, part_class_id) = matched
                .map(|m| (m.part_label, m.part_class_id))
                .unwrap_or_else(|| (UNKNOWN_PART.to_string(), 0));

            let confidence = percent(det.confidence);
            let display_text = format!("{} on {} ({:.1}%)", det.label, part_label, confidence);

            if det.confidence >= self.fusion.render_threshold {
                overlays.push(Overlay {
                    bbox: det.bbox,
                    text: display_text.clone(),
                    class_id: part_class_id,
                    mask: damage_masks.get(idx).and_then(Option::as_ref),
                });
            }

            results.push(FusionResult {
                damage: det.label.clone(),
                part: part_label,
                confidence,
                bbox: det.bbox,
                display_text,
            });
        }

        debug!(
            "Fused image: {} damage findings against {} retained parts",
            results.len(),
            selected_parts.len()
        );

        let annotated = annotate(frame, &overlays, self.fusion.mask_alpha)?;
        Ok(ImageAnalysisResponse {
            analysis_type: Some(AnalysisMode::Fused.as_str().to_string()),
            total_damages: Some(results.len()),
            detections: ImageDetections::Fused(results.iter().map(Into::into).collect()),
            annotated_image: encode_jpeg_base64(&annotated)?,
        })
    }

    fn single_image(
        &mut self,
        frame: &Frame,
        mode: AnalysisMode,
    ) -> Result<ImageAnalysisResponse> {
        let detector = match mode {
            AnalysisMode::DamageOnly => &mut self.damage,
            _ => &mut self.parts,
        };
        let raw = detector.infer(frame)?;
        let detections = normalize(&raw, detector.labels());

        // Parts are capped per class; damage keeps everything the model saw
        let retained: Vec<(usize, Detection)> = match mode {
            AnalysisMode::PartsOnly => select_top_per_class(&detections, &self.extended_keep),
            _ => detections.into_iter().enumerate().collect(),
        };

        let masks = raw
            .masks
            .as_deref()
            .map(|m| resample_masks(m, frame.width, frame.height))
            .unwrap_or_default();

        let mut entries = Vec::new();
        let mut overlays = Vec::new();
        for (idx, det) in &retained {
            let confidence = percent(det.confidence);
            entries.push(SingleImageDetection {
                label: det.label.clone(),
                confidence,
                bbox: det.bbox,
            });
            if det.confidence >= self.fusion.render_threshold {
                overlays.push(Overlay {
                    bbox: det.bbox,
                    text: format!("{} {:.1}%", det.label, confidence),
                    class_id: det.class_id,
                    mask: masks.get(*idx).and_then(Option::as_ref),
                });
            }
        }

        let annotated = annotate(frame, &overlays, self.fusion.mask_alpha)?;
        Ok(ImageAnalysisResponse {
            analysis_type: None,
            total_damages: None,
            detections: ImageDetections::Single(entries),
            annotated_image: encode_jpeg_base64(&annotated)?,
        })
    }

    // ------------------------------------------------------------------
    // Video analysis
    // ------------------------------------------------------------------

    pub fn analyze_video(
        &mut self,
        input_path: &Path,
        analysis_type: &str,
        processor: &VideoProcessor,
    ) -> Result<VideoAnalysisResponse, PipelineError> {
        self.state = PipelineState::Idle;
        let mode = AnalysisMode::from_token(analysis_type)?;
        self.state = PipelineState::Running(mode);

        let response = self.run_video_session(input_path, mode, processor)?;

        self.state = PipelineState::Done;
        Ok(response)
    }

    fn run_video_session(
        &mut self,
        input_path: &Path,
        mode: AnalysisMode,
        processor: &VideoProcessor,
    ) -> Result<VideoAnalysisResponse> {
        let mut reader = processor.open_video(input_path)?;
        let (mut writer, output_name) =
            processor.create_writer(input_path, reader.width, reader.height, reader.fps)?;

        // Aggregation state lives exactly as long as this session
        let mut aggregator = ConfidenceAggregator::new(self.fusion.aggregate_threshold);
        let mut recorded: Vec<VideoDetection> = Vec::new();

        while let Some(frame) = reader.read_frame()? {
            let annotated = match mode {
                AnalysisMode::Fused => {
                    self.fused_video_frame(&frame, &mut aggregator, &mut recorded)?
                }
                AnalysisMode::DamageOnly => {
                    self.damage_video_frame(&frame, &mut aggregator, &mut recorded)?
                }
                AnalysisMode::PartsOnly => {
                    self.parts_video_frame(&frame, &mut aggregator, &mut recorded)?
                }
            };
            writer.write(&annotated)?;

            if reader.current_frame % 100 == 0 {
                debug!("Video progress: {:.1}%", reader.progress());
            }
        }

        writer.release()?;
        info!(
            "Video session complete: {} frames, {} recorded detections, {} qualifying observations",
            reader.current_frame,
            recorded.len(),
            aggregator.observation_count()
        );
        processor.cleanup_input(input_path);

        Ok(VideoAnalysisResponse {
            annotated_video_url: processor.public_url(&output_name),
            detections: match mode {
                AnalysisMode::PartsOnly => None,
                _ => Some(recorded),
            },
            average_confidence: aggregator.finalize(),
        })
    }

    fn fused_video_frame(
        &mut self,
        frame: &Frame,
        aggregator: &mut ConfidenceAggregator,
        recorded: &mut Vec<VideoDetection>,
    ) -> Result<Mat> {
        let raw_parts = self.parts.infer(frame)?;
        let raw_damage = self.damage.infer(frame)?;

        let parts = normalize(&raw_parts, self.parts.labels());
        let damage = normalize(&raw_damage, self.damage.labels());

        let selected_parts = select_top_per_class(&parts, &self.extended_keep);
        let damage_masks = raw_damage
            .masks
            .as_deref()
            .map(|m| resample_masks(m, frame.width, frame.height))
            .unwrap_or_default();

        let min_match_iou = self.video_min_match_iou();
        let mut overlays = Vec::new();

        for (idx, det) in damage.iter().enumerate() {
            // Unlike single images, unmatched damage is dropped here
            let Some(matched) = best_part_match(det, &selected_parts, min_match_iou) else {
                continue;
            };

            let label_text = format!("{} on {}", det.label, matched.part_label);
            aggregator.observe(&label_text, det.confidence);
            if aggregator.qualifies(det.confidence) {
                recorded.push(VideoDetection {
                    part: Some(matched.part_label.clone()),
                    damage: Some(det.label.clone()),
                    confidence: det.confidence * 100.0,
                    display_text: format!("{} ({:.0}%)", label_text, det.confidence * 100.0),
                });
            }

            if det.confidence >= self.fusion.render_threshold {
                overlays.push(Overlay {
                    bbox: det.bbox,
                    text: label_text,
                    class_id: matched.part_class_id,
                    mask: damage_masks.get(idx).and_then(Option::as_ref),
                });
            }
        }

        annotate(frame, &overlays, self.fusion.mask_alpha)
    }

    fn damage_video_frame(
        &mut self,
        frame: &Frame,
        aggregator: &mut ConfidenceAggregator,
        recorded: &mut Vec<VideoDetection>,
    ) -> Result<Mat> {
        let raw = self.damage.infer(frame)?;
        let detections = normalize(&raw, self.damage.labels());
        let masks = raw
            .masks
            .as_deref()
            .map(|m| resample_masks(m, frame.width, frame.height))
            .unwrap_or_default();

        let mut overlays = Vec::new();
        for (idx, det) in detections.iter().enumerate() {
            aggregator.observe(&det.label, det.confidence);
            if aggregator.qualifies(det.confidence) {
                recorded.push(VideoDetection {
                    part: None,
                    damage: Some(det.label.clone()),
                    confidence: det.confidence * 100.0,
                    display_text: format!("{} ({:.0}%)", det.label, det.confidence * 100.0),
                });
            }
            if det.confidence >= self.fusion.render_threshold {
                overlays.push(Overlay {
                    bbox: det.bbox,
                    text: det.label.clone(),
                    class_id: det.class_id,
                    mask: masks.get(idx).and_then(Option::as_ref),
                });
            }
        }

        annotate(frame, &overlays, self.fusion.mask_alpha)
    }

    fn parts_video_frame(
        &mut self,
        frame: &Frame,
        aggregator: &mut ConfidenceAggregator,
        recorded: &mut Vec<VideoDetection>,
    ) -> Result<Mat> {
        let raw = self.parts.infer(frame)?;
        let detections = normalize(&raw, self.parts.labels());
        let retained = select_top_per_class(&detections, &self.extended_keep);
        let masks = raw
            .masks
            .as_deref()
            .map(|m| resample_masks(m, frame.width, frame.height))
            .unwrap_or_default();

        let mut overlays = Vec::new();
        for (idx, det) in &retained {
            aggregator.observe(&det.label, det.confidence);
            recorded.push(VideoDetection {
                part: Some(det.label.clone()),
                damage: None,
                confidence: det.confidence * 100.0,
                display_text: format!("{} ({:.0}%)", det.label, det.confidence * 100.0),
            });
            if det.confidence >= self.fusion.render_threshold {
                overlays.push(Overlay {
                    bbox: det.bbox,
                    text: det.label.clone(),
                    class_id: det.class_id,
                    mask: masks.get(*idx).and_then(Option::as_ref),
                });
            }
        }

        annotate(frame, &overlays, self.fusion.mask_alpha)
    }
}

/// Confidence as a percentage rounded to one decimal
fn percent(confidence: f32) -> f32 {
    (confidence * 1000.0).round() / 10.0
}
