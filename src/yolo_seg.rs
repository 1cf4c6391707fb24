// src/yolo_seg.rs
//
// YOLO segmentation detector behind the Detector trait. Output layout:
//   output0: [1, 4 + num_classes + num_coeffs, anchors] — boxes, class
//            scores and per-instance mask coefficients
//   output1: [1, num_coeffs, proto_h, proto_w] — shared mask prototypes
// Masks are assembled as sigmoid(coeffs · protos), cropped to the
// letterbox content region and to the instance box, and handed to the
// pipeline in proto resolution for resampling.

use crate::detector::{Detector, LabelMap, RawDetections, RawMask};
use crate::types::{Frame, InferenceConfig, ModelConfig};
use anyhow::{Context, Result};
use ort::{
    execution_providers::CUDAExecutionProvider,
    session::{builder::GraphOptimizationLevel, Session},
};
use tracing::{debug, info};

const PAD_VALUE: u8 = 114;

pub struct YoloSegDetector {
    session: Session,
    labels: LabelMap,
    input_size: usize,
    confidence_threshold: f32,
    nms_iou_threshold: f32,
}

/// Letterbox placement of the source image inside the square model input
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
    scaled_w: usize,
    scaled_h: usize,
}

fn letterbox_geometry(src_w: usize, src_h: usize, target: usize) -> Letterbox {
    let scale = (target as f32 / src_w as f32).min(target as f32 / src_h as f32);
    let scaled_w = (src_w as f32 * scale) as usize;
    let scaled_h = (src_h as f32 * scale) as usize;
    Letterbox {
        scale,
        pad_x: (target - scaled_w) as f32 / 2.0,
        pad_y: (target - scaled_h) as f32 / 2.0,
        scaled_w,
        scaled_h,
    }
}

/// One decoded candidate before NMS
#[derive(Debug, Clone)]
struct Candidate {
    bbox: [f32; 4],
    class_id: u32,
    score: f32,
    coeffs: Vec<f32>,
}

/// Shared prototype maps from the second model output
struct ProtoMaps {
    width: usize,
    height: usize,
    channels: usize,
    data: Vec<f32>,
}

impl YoloSegDetector {
    pub fn new(model: &ModelConfig, inference: &InferenceConfig) -> Result<Self> {
        info!("Loading segmentation model: {}", model.path);

        let session = Session::builder()?
            .with_execution_providers([CUDAExecutionProvider::default().build()])?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(inference.num_threads)?
            .commit_from_file(&model.path)
            .context("Failed to load model")?;

        info!("✓ Segmentation model ready ({} classes)", model.labels.len());

        Ok(Self {
            session,
            labels: LabelMap::from_names(model.labels.clone()),
            input_size: inference.input_size,
            confidence_threshold: inference.confidence_threshold,
            nms_iou_threshold: inference.nms_iou_threshold,
        })
    }

    fn preprocess(&self, frame: &Frame, geometry: Letterbox) -> Vec<f32> {
        let target = self.input_size;
        let resized = resize_bilinear(
            &frame.data,
            frame.width,
            frame.height,
            geometry.scaled_w,
            geometry.scaled_h,
        );

        let mut canvas = vec![PAD_VALUE; target * target * 3];
        for y in 0..geometry.scaled_h {
            for x in 0..geometry.scaled_w {
                let src_idx = (y * geometry.scaled_w + x) * 3;
                let dst_x = x + geometry.pad_x as usize;
                let dst_y = y + geometry.pad_y as usize;
                let dst_idx = (dst_y * target + dst_x) * 3;
                canvas[dst_idx..dst_idx + 3].copy_from_slice(&resized[src_idx..src_idx + 3]);
            }
        }

        // Normalize [0, 255] -> [0, 1] and convert HWC -> CHW
        let mut input = vec![0.0f32; 3 * target * target];
        for c in 0..3 {
            for h in 0..target {
                for w in 0..target {
                    let hwc_idx = (h * target + w) * 3 + c;
                    let chw_idx = c * target * target + h * target + w;
                    input[chw_idx] = canvas[hwc_idx] as f32 / 255.0;
                }
            }
        }
        input
    }

    fn run_session(&mut self, input: Vec<f32>) -> Result<(Vec<usize>, Vec<f32>, Option<ProtoMaps>)> {
        let shape = [1, 3, self.input_size, self.input_size];
        let input_value =
            ort::value::Value::from_array((shape.as_slice(), input.into_boxed_slice()))?;

        let outputs = self.session.run(ort::inputs!["images" => input_value])?;

        let (det_shape, det_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .context("Failed to extract detection tensor")?;
        let det_dims: Vec<usize> = det_shape.iter().map(|&d| d as usize).collect();
        let det_data = det_data.to_vec();

        let protos = if outputs.len() > 1 {
            let (proto_shape, proto_data) = outputs[1]
                .try_extract_tensor::<f32>()
                .context("Failed to extract prototype tensor")?;
            let dims: Vec<usize> = proto_shape.iter().map(|&d| d as usize).collect();
            Some(ProtoMaps {
                channels: dims[1],
                height: dims[2],
                width: dims[3],
                data: proto_data.to_vec(),
            })
        } else {
            None
        };

        Ok((det_dims, det_data, protos))
    }

    fn decode_candidates(
        &self,
        dims: &[usize],
        data: &[f32],
        geometry: Letterbox,
        num_coeffs: usize,
    ) -> Vec<Candidate> {
        let channels = dims[1];
        let anchors = dims[2];
        let num_classes = channels - 4 - num_coeffs;
        let at = |c: usize, i: usize| data[c * anchors + i];

        let mut candidates = Vec::new();
        for i in 0..anchors {
            let mut max_conf = 0.0f32;
            let mut best_class = 0usize;
            for c in 0..num_classes {
                let conf = at(4 + c, i);
                if conf > max_conf {
                    max_conf = conf;
                    best_class = c;
                }
            }
            if max_conf < self.confidence_threshold {
                continue;
            }

            let cx = at(0, i);
            let cy = at(1, i);
            let w = at(2, i);
            let h = at(3, i);

            // Center format -> corner format, then reverse the letterbox
            let x1 = (cx - w / 2.0 - geometry.pad_x) / geometry.scale;
            let y1 = (cy - h / 2.0 - geometry.pad_y) / geometry.scale;
            let x2 = (cx + w / 2.0 - geometry.pad_x) / geometry.scale;
            let y2 = (cy + h / 2.0 - geometry.pad_y) / geometry.scale;

            let coeffs = (0..num_coeffs)
                .map(|k| at(4 + num_classes + k, i))
                .collect();

            candidates.push(Candidate {
                bbox: [x1, y1, x2, y2],
                class_id: best_class as u32,
                score: max_conf,
                coeffs,
            });
        }
        candidates
    }

    fn decode_mask(
        &self,
        candidate: &Candidate,
        protos: &ProtoMaps,
        geometry: Letterbox,
    ) -> RawMask {
        let proto_scale = protos.width as f32 / self.input_size as f32;
        let x0 = (geometry.pad_x * proto_scale) as usize;
        let y0 = (geometry.pad_y * proto_scale) as usize;
        let content_w = ((geometry.scaled_w as f32 * proto_scale) as usize).max(1);
        let content_h = ((geometry.scaled_h as f32 * proto_scale) as usize).max(1);

        // Image coordinates -> content-region coordinates
        let to_content = geometry.scale * proto_scale;
        let bx1 = candidate.bbox[0] * to_content;
        let by1 = candidate.bbox[1] * to_content;
        let bx2 = candidate.bbox[2] * to_content;
        let by2 = candidate.bbox[3] * to_content;

        let plane = protos.width * protos.height;
        let mut data = vec![0.0f32; content_w * content_h];

        for my in 0..content_h {
            let fy = my as f32;
            for mx in 0..content_w {
                let fx = mx as f32;
                if fx < bx1 || fx > bx2 || fy < by1 || fy > by2 {
                    continue;
                }
                let px = (mx + x0).min(protos.width - 1);
                let py = (my + y0).min(protos.height - 1);
                let mut value = 0.0f32;
                for (k, &coeff) in candidate.coeffs.iter().enumerate().take(protos.channels) {
                    value += coeff * protos.data[k * plane + py * protos.width + px];
                }
                data[my * content_w + mx] = sigmoid(value);
            }
        }

        RawMask {
            width: content_w,
            height: content_h,
            data,
        }
    }
}

impl Detector for YoloSegDetector {
    fn infer(&mut self, frame: &Frame) -> Result<RawDetections> {
        let geometry = letterbox_geometry(frame.width, frame.height, self.input_size);
        let input = self.preprocess(frame, geometry);
        let (dims, data, protos) = self.run_session(input)?;

        let num_coeffs = protos.as_ref().map(|p| p.channels).unwrap_or(0);
        let candidates = self.decode_candidates(&dims, &data, geometry, num_coeffs);
        let kept = nms(candidates, self.nms_iou_threshold);

        debug!("Detected {} instances after NMS", kept.len());

        let masks = protos.map(|protos| {
            kept.iter()
                .map(|candidate| self.decode_mask(candidate, &protos, geometry))
                .collect()
        });

        Ok(RawDetections {
            boxes: kept.iter().map(|c| c.bbox).collect(),
            class_ids: kept.iter().map(|c| c.class_id).collect(),
            scores: kept.iter().map(|c| c.score).collect(),
            masks,
        })
    }

    fn labels(&self) -> &LabelMap {
        &self.labels
    }
}

fn sigmoid(v: f32) -> f32 {
    1.0 / (1.0 + (-v).exp())
}

/// Bilinear image resize, RGB interleaved
fn resize_bilinear(src: &[u8], src_w: usize, src_h: usize, dst_w: usize, dst_h: usize) -> Vec<u8> {
    let mut dst = vec![0u8; dst_h * dst_w * 3];
    let x_ratio = src_w as f32 / dst_w as f32;
    let y_ratio = src_h as f32 / dst_h as f32;

    for dy in 0..dst_h {
        for dx in 0..dst_w {
            let sx = dx as f32 * x_ratio;
            let sy = dy as f32 * y_ratio;
            let sx0 = sx.floor() as usize;
            let sy0 = sy.floor() as usize;
            let sx1 = (sx0 + 1).min(src_w - 1);
            let sy1 = (sy0 + 1).min(src_h - 1);
            let fx = sx - sx0 as f32;
            let fy = sy - sy0 as f32;

            for c in 0..3 {
                let p00 = src[(sy0 * src_w + sx0) * 3 + c] as f32;
                let p10 = src[(sy0 * src_w + sx1) * 3 + c] as f32;
                let p01 = src[(sy1 * src_w + sx0) * 3 + c] as f32;
                let p11 = src[(sy1 * src_w + sx1) * 3 + c] as f32;

                let val = p00 * (1.0 - fx) * (1.0 - fy)
                    + p10 * fx * (1.0 - fy)
                    + p01 * (1.0 - fx) * fy
                    + p11 * fx * fy;

                dst[(dy * dst_w + dx) * 3 + c] = val.round() as u8;
            }
        }
    }
    dst
}

/// Per-class non-maximum suppression
fn nms(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    if candidates.is_empty() {
        return candidates;
    }

    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    let mut keep: Vec<Candidate> = Vec::new();
    while !candidates.is_empty() {
        let current = candidates.remove(0);
        candidates.retain(|other| {
            other.class_id != current.class_id
                || crate::fusion::iou(&current.bbox, &other.bbox) < iou_threshold
        });
        keep.push(current);
    }
    keep
}
