// src/fusion/masks.rs
//
// Resamples detector-native instance masks to the original frame geometry.
// Bilinear resize of the continuous map, then binarize at 0.5 — same
// contract as the original's cv2.resize(INTER_LINEAR) + threshold.

use crate::detector::RawMask;
use crate::types::BinaryMask;

const BINARIZE_THRESHOLD: f32 = 0.5;

/// Resize each raw mask to (frame_width, frame_height) and binarize.
/// Output is index-aligned with the input: slot i holds the mask for
/// detection i, or None when the raw map was empty. Downstream consumers
/// never see a mask whose dimensions disagree with the frame.
pub fn resample_masks(
    raw: &[RawMask],
    frame_width: usize,
    frame_height: usize,
) -> Vec<Option<BinaryMask>> {
    raw.iter()
        .map(|mask| resample_one(mask, frame_width, frame_height))
        .collect()
}

fn resample_one(mask: &RawMask, dst_w: usize, dst_h: usize) -> Option<BinaryMask> {
    if mask.data.is_empty() || mask.width == 0 || mask.height == 0 || dst_w == 0 || dst_h == 0 {
        return None;
    }
    if mask.data.len() != mask.width * mask.height {
        return None;
    }

    let resized = resize_bilinear_f32(&mask.data, mask.width, mask.height, dst_w, dst_h);
    let data = resized
        .iter()
        .map(|&v| u8::from(v > BINARIZE_THRESHOLD))
        .collect();

    Some(BinaryMask {
        width: dst_w,
        height: dst_h,
        data,
    })
}

/// Single-channel bilinear resize
fn resize_bilinear_f32(src: &[f32], src_w: usize, src_h: usize, dst_w: usize, dst_h: usize) -> Vec<f32> {
    let mut dst = vec![0.0f32; dst_h * dst_w];

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

            let p00 = src[sy0 * src_w + sx0];
            let p10 = src[sy0 * src_w + sx1];
            let p01 = src[sy1 * src_w + sx0];
            let p11 = src[sy1 * src_w + sx1];

            dst[dy * dst_w + dx] = p00 * (1.0 - fx) * (1.0 - fy)
                + p10 * fx * (1.0 - fy)
                + p01 * (1.0 - fx) * fy
                + p11 * fx * fy;
        }
    }

    dst
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(width: usize, height: usize, fill: f32) -> RawMask {
        RawMask {
            width,
            height,
            data: vec![fill; width * height],
        }
    }

    #[test]
    fn test_output_matches_frame_dimensions() {
        let masks = resample_masks(&[raw(160, 160, 0.9)], 1280, 720);
        let mask = masks[0].as_ref().unwrap();
        assert!(mask.matches(1280, 720));
    }

    #[test]
    fn test_output_is_strictly_binary() {
        let mut src = raw(8, 8, 0.0);
        for (i, v) in src.data.iter_mut().enumerate() {
            *v = i as f32 / 63.0;
        }
        let masks = resample_masks(&[src], 32, 32);
        assert!(masks[0]
            .as_ref()
            .unwrap()
            .data
            .iter()
            .all(|&v| v == 0 || v == 1));
    }

    #[test]
    fn test_above_threshold_map_becomes_all_ones() {
        let masks = resample_masks(&[raw(16, 16, 0.6)], 64, 48);
        assert!(masks[0].as_ref().unwrap().data.iter().all(|&v| v == 1));
    }

    #[test]
    fn test_below_threshold_map_becomes_all_zeros() {
        let masks = resample_masks(&[raw(16, 16, 0.4)], 64, 48);
        assert!(masks[0].as_ref().unwrap().data.iter().all(|&v| v == 0));
    }

    #[test]
    fn test_empty_mask_is_skipped_not_fatal() {
        let empty = RawMask {
            width: 0,
            height: 0,
            data: Vec::new(),
        };
        let masks = resample_masks(&[empty, raw(4, 4, 1.0)], 10, 10);
        assert!(masks[0].is_none());
        assert!(masks[1].is_some(), "skip must not shift later indices");
    }

    #[test]
    fn test_inconsistent_raw_dimensions_are_skipped() {
        let bad = RawMask {
            width: 8,
            height: 8,
            data: vec![1.0; 10],
        };
        let masks = resample_masks(&[bad], 10, 10);
        assert!(masks[0].is_none());
    }
}
