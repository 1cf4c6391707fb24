use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub models: ModelsConfig,
    pub inference: InferenceConfig,
    pub fusion: FusionConfig,
    pub analysis: AnalysisConfig,
    pub video: VideoConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    pub parts: ModelConfig,
    pub damage: ModelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub path: String,
    /// Display labels indexed by class id, in model output order
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    pub input_size: usize,
    pub confidence_threshold: f32,
    pub nms_iou_threshold: f32,
    pub num_threads: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionConfig {
    /// Part labels allowed to keep 2 detections per frame instead of 1
    pub extended_keep: Vec<String>,
    /// Uniform damage/part IOU acceptance threshold. When unset, image
    /// analysis assigns the best match unconditionally and video analysis
    /// requires IOU > 0.1.
    #[serde(default)]
    pub min_match_iou: Option<f32>,
    /// Minimum confidence for a detection to enter the per-label statistics
    pub aggregate_threshold: f32,
    /// Minimum confidence for a detection to be drawn on the frame
    pub render_threshold: f32,
    /// Mask overlay blend weight
    pub mask_alpha: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub image_mode: String,
    pub video_mode: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoConfig {
    pub input_dir: String,
    pub output_dir: String,
    /// Prefix used to build annotated_video_url in responses
    pub public_base_url: String,
    /// Delete the input file after processing (staged uploads). Failures
    /// are logged and never fail the request.
    pub remove_input: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

/// One decoded frame in RGB, row-major HWC layout
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
    pub timestamp_ms: f64,
}

/// A single normalized detection from either model
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: [f32; 4], // [x1, y1, x2, y2] in original image coordinates
    pub class_id: u32,
    pub label: String,
    pub confidence: f32,
}

/// Per-instance segmentation mask at full frame resolution, values 0 or 1
#[derive(Debug, Clone)]
pub struct BinaryMask {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl BinaryMask {
    pub fn matches(&self, width: usize, height: usize) -> bool {
        self.width == width && self.height == height && self.data.len() == width * height
    }
}

/// One "damage on part" finding from the fused pipeline
#[derive(Debug, Clone)]
pub struct FusionResult {
    pub damage: String,
    pub part: String,
    pub confidence: f32,
    pub bbox: [f32; 4],
    pub display_text: String,
}
