// src/annotator.rs
//
// Draws detection boxes, labels and translucent mask overlays onto a copy
// of the frame. The input frame is never mutated; the annotated copy comes
// back as a BGR Mat ready for imencode / VideoWriter.

use crate::types::{BinaryMask, Frame};
use anyhow::Result;
use base64::Engine;
use opencv::{
    core::{self, Mat, Vector},
    imgcodecs, imgproc,
    prelude::*,
};
use tracing::debug;

/// Fixed RGB palette. Same class id always maps to the same color within
/// and across runs.
const PALETTE: [(u8, u8, u8); 20] = [
    (255, 56, 56),
    (255, 157, 151),
    (255, 112, 31),
    (255, 178, 29),
    (207, 210, 49),
    (72, 249, 10),
    (146, 204, 23),
    (61, 219, 134),
    (26, 147, 52),
    (0, 212, 187),
    (44, 153, 168),
    (0, 194, 255),
    (52, 69, 147),
    (100, 115, 255),
    (0, 24, 236),
    (132, 56, 255),
    (82, 0, 133),
    (203, 56, 255),
    (255, 149, 200),
    (255, 55, 199),
];

pub fn class_color(class_id: u32) -> (u8, u8, u8) {
    PALETTE[class_id as usize % PALETTE.len()]
}

/// One drawable finding: a box, its label text, the class that picks the
/// color, and an optional full-frame instance mask.
pub struct Overlay<'a> {
    pub bbox: [f32; 4],
    pub text: String,
    pub class_id: u32,
    pub mask: Option<&'a BinaryMask>,
}

/// Composite all overlays onto a writable copy of `frame` and return it as
/// a BGR Mat. Masks whose dimensions disagree with the frame are skipped;
/// the detection's box and label are still drawn.
pub fn annotate(frame: &Frame, overlays: &[Overlay], mask_alpha: f32) -> Result<Mat> {
    let mut rgb = frame.data.clone();

    for overlay in overlays {
        if let Some(mask) = overlay.mask {
            if mask.matches(frame.width, frame.height) {
                blend_mask(&mut rgb, mask, class_color(overlay.class_id), mask_alpha);
            } else {
                debug!(
                    "Skipping mask with shape {}x{} on {}x{} frame",
                    mask.width, mask.height, frame.width, frame.height
                );
            }
        }
    }

    let mat = Mat::from_slice(&rgb)?;
    let mat = mat.reshape(3, frame.height as i32)?;
    let mut output = Mat::default();
    imgproc::cvt_color(&mat, &mut output, imgproc::COLOR_RGB2BGR, 0)?;

    for overlay in overlays {
        let (r, g, b) = class_color(overlay.class_id);
        let color = core::Scalar::new(b as f64, g as f64, r as f64, 0.0);

        let x1 = overlay.bbox[0] as i32;
        let y1 = overlay.bbox[1] as i32;
        let x2 = overlay.bbox[2] as i32;
        let y2 = overlay.bbox[3] as i32;

        imgproc::rectangle(
            &mut output,
            core::Rect::new(x1, y1, (x2 - x1).max(0), (y2 - y1).max(0)),
            color,
            2,
            imgproc::LINE_8,
            0,
        )?;
        imgproc::put_text(
            &mut output,
            &overlay.text,
            core::Point::new(x1, y1 - 10),
            imgproc::FONT_HERSHEY_SIMPLEX,
            0.6,
            color,
            2,
            imgproc::LINE_8,
            false,
        )?;
    }

    Ok(output)
}

/// Alpha-blend the class color over masked pixels: out = px + alpha * color,
/// saturating. Equivalent to addWeighted(image, 1, colored_mask, alpha, 0).
fn blend_mask(rgb: &mut [u8], mask: &BinaryMask, color: (u8, u8, u8), alpha: f32) {
    let channels = [color.0, color.1, color.2];
    for (pixel_idx, &m) in mask.data.iter().enumerate() {
        if m == 0 {
            continue;
        }
        let base = pixel_idx * 3;
        for c in 0..3 {
            let blended = rgb[base + c] as f32 + alpha * channels[c] as f32;
            rgb[base + c] = blended.min(255.0) as u8;
        }
    }
}

/// JPEG-encode an annotated BGR Mat and wrap it in base64 for the response
pub fn encode_jpeg_base64(mat: &Mat) -> Result<String> {
    let mut buf = Vector::<u8>::new();
    imgcodecs::imencode(".jpg", mat, &mut buf, &Vector::new())?;
    Ok(base64::engine::general_purpose::STANDARD.encode(buf.as_slice()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_color_is_deterministic() {
        assert_eq!(class_color(3), class_color(3));
        assert_eq!(class_color(7), class_color(7 + PALETTE.len() as u32));
    }

    #[test]
    fn test_palette_neighbors_differ() {
        assert_ne!(class_color(0), class_color(1));
    }

    #[test]
    fn test_blend_only_touches_masked_pixels() {
        let mut rgb = vec![100u8; 4 * 4 * 3];
        let mask = BinaryMask {
            width: 4,
            height: 4,
            data: {
                let mut m = vec![0u8; 16];
                m[5] = 1;
                m
            },
        };
        blend_mask(&mut rgb, &mask, (255, 0, 255), 0.4);
        assert_eq!(rgb[5 * 3], 100 + 102); // 0.4 * 255
        assert_eq!(rgb[5 * 3 + 1], 100);
        assert_eq!(rgb[0], 100, "unmasked pixel must stay untouched");
    }

    #[test]
    fn test_blend_saturates() {
        let mut rgb = vec![250u8; 3];
        let mask = BinaryMask {
            width: 1,
            height: 1,
            data: vec![1],
        };
        blend_mask(&mut rgb, &mask, (255, 255, 255), 0.4);
        assert_eq!(rgb, vec![255, 255, 255]);
    }

    fn synthetic_frame(width: u32, height: u32) -> Frame {
        let img = image::RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 60])
        });
        Frame {
            data: img.into_raw(),
            width: width as usize,
            height: height as usize,
            timestamp_ms: 0.0,
        }
    }

    #[test]
    fn test_annotate_returns_frame_sized_mat() {
        let frame = synthetic_frame(64, 48);
        let overlays = vec![Overlay {
            bbox: [5.0, 5.0, 40.0, 30.0],
            text: "Scratch on Door".to_string(),
            class_id: 2,
            mask: None,
        }];
        let annotated = annotate(&frame, &overlays, 0.4).unwrap();
        assert_eq!(annotated.rows(), 48);
        assert_eq!(annotated.cols(), 64);
    }

    #[test]
    fn test_mismatched_mask_is_skipped_not_fatal() {
        let frame = synthetic_frame(64, 48);
        let wrong = BinaryMask {
            width: 10,
            height: 10,
            data: vec![1; 100],
        };
        let overlays = vec![Overlay {
            bbox: [5.0, 5.0, 40.0, 30.0],
            text: "Dent".to_string(),
            class_id: 1,
            mask: Some(&wrong),
        }];
        assert!(annotate(&frame, &overlays, 0.4).is_ok());
    }

    #[test]
    fn test_input_frame_is_not_mutated() {
        let frame = synthetic_frame(32, 32);
        let before = frame.data.clone();
        let mask = BinaryMask {
            width: 32,
            height: 32,
            data: vec![1; 32 * 32],
        };
        let overlays = vec![Overlay {
            bbox: [0.0, 0.0, 31.0, 31.0],
            text: "Crack".to_string(),
            class_id: 0,
            mask: Some(&mask),
        }];
        annotate(&frame, &overlays, 0.4).unwrap();
        assert_eq!(frame.data, before);
    }
}
