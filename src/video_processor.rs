// src/video_processor.rs

use crate::types::{Frame, VideoConfig};
use anyhow::{Context, Result};
use opencv::{
    core::{self, Mat},
    imgcodecs, imgproc,
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTraitConst, VideoWriter},
};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

const VIDEO_EXTENSIONS: [&str; 4] = ["mp4", "avi", "mov", "mkv"];
const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

pub fn media_kind(path: &Path) -> Option<MediaKind> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaKind::Video)
    } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaKind::Image)
    } else {
        None
    }
}

pub struct VideoProcessor {
    config: VideoConfig,
}

impl VideoProcessor {
    pub fn new(config: VideoConfig) -> Self {
        Self { config }
    }

    pub fn find_media_files(&self) -> Result<Vec<(PathBuf, MediaKind)>> {
        let mut media = Vec::new();

        for entry in WalkDir::new(&self.config.input_dir)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if let Some(kind) = media_kind(path) {
                media.push((path.to_path_buf(), kind));
            }
        }

        info!("Found {} media files", media.len());
        Ok(media)
    }

    /// Decode a still image into an RGB frame
    pub fn read_image(&self, path: &Path) -> Result<Frame> {
        let bgr = imgcodecs::imread(
            path.to_str().context("Non-UTF8 image path")?,
            imgcodecs::IMREAD_COLOR,
        )?;
        if bgr.empty() {
            anyhow::bail!("Failed to decode image: {}", path.display());
        }

        let mut rgb = Mat::default();
        imgproc::cvt_color(&bgr, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;

        Ok(Frame {
            data: rgb.data_bytes()?.to_vec(),
            width: bgr.cols() as usize,
            height: bgr.rows() as usize,
            timestamp_ms: 0.0,
        })
    }

    pub fn open_video(&self, path: &Path) -> Result<VideoReader> {
        info!("Opening video: {}", path.display());

        let cap = VideoCapture::from_file(
            path.to_str().context("Non-UTF8 video path")?,
            videoio::CAP_ANY,
        )?;

        if !cap.is_opened()? {
            anyhow::bail!("Failed to open video file");
        }

        let fps = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FPS)?;
        let total_frames = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_COUNT)? as i32;
        let width = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_WIDTH)? as i32;
        let height = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_HEIGHT)? as i32;

        info!(
            "Video properties: {}x{} @ {:.1} FPS, {} frames",
            width, height, fps, total_frames
        );

        Ok(VideoReader {
            cap,
            fps,
            total_frames,
            current_frame: 0,
            width,
            height,
        })
    }

    /// Create the annotated-output writer next to the configured output dir.
    /// Returns the writer and the output file name.
    pub fn create_writer(
        &self,
        input_path: &Path,
        width: i32,
        height: i32,
        fps: f64,
    ) -> Result<(VideoWriter, String)> {
        std::fs::create_dir_all(&self.config.output_dir)?;

        let input_name = input_path
            .file_stem()
            .and_then(|s| s.to_str())
            .context("Input path has no file stem")?;
        let output_name = format!("{}_annotated.mp4", input_name);
        let output_path = PathBuf::from(&self.config.output_dir).join(&output_name);

        info!("Output video: {}", output_path.display());

        let fourcc = VideoWriter::fourcc('m', 'p', '4', 'v')?;
        let writer = VideoWriter::new(
            output_path.to_str().context("Non-UTF8 output path")?,
            fourcc,
            fps,
            core::Size::new(width, height),
            true,
        )?;

        Ok((writer, output_name))
    }

    /// Best-effort removal of a staged input file. Never fails the request.
    pub fn cleanup_input(&self, path: &Path) {
        if !self.config.remove_input {
            return;
        }
        if let Err(e) = std::fs::remove_file(path) {
            warn!("Failed to remove input file {}: {}", path.display(), e);
        }
    }

    pub fn public_url(&self, output_name: &str) -> String {
        format!(
            "{}/{}",
            self.config.public_base_url.trim_end_matches('/'),
            output_name
        )
    }
}

pub struct VideoReader {
    pub cap: VideoCapture,
    pub fps: f64,
    pub total_frames: i32,
    pub current_frame: i32,
    pub width: i32,
    pub height: i32,
}

impl VideoReader {
    pub fn read_frame(&mut self) -> Result<Option<Frame>> {
        use opencv::videoio::VideoCaptureTrait;

        let mut mat = Mat::default();

        if !VideoCaptureTrait::read(&mut self.cap, &mut mat)? || mat.empty() {
            return Ok(None);
        }

        self.current_frame += 1;
        let timestamp_ms = (self.current_frame as f64 / self.fps.max(1.0)) * 1000.0;

        let mut rgb_mat = Mat::default();
        imgproc::cvt_color(&mat, &mut rgb_mat, imgproc::COLOR_BGR2RGB, 0)?;

        Ok(Some(Frame {
            data: rgb_mat.data_bytes()?.to_vec(),
            width: self.width as usize,
            height: self.height as usize,
            timestamp_ms,
        }))
    }

    pub fn progress(&self) -> f32 {
        if self.total_frames == 0 {
            return 0.0;
        }
        (self.current_frame as f32 / self.total_frames as f32) * 100.0
    }
}
