// src/main.rs

mod annotator;
mod config;
mod detector;
mod fusion;
mod orchestrator;
mod responses;
mod types;
mod video_processor;
mod yolo_seg;

use anyhow::Result;
use orchestrator::{Orchestrator, PipelineError};
use std::path::{Path, PathBuf};
use tracing::{error, info};
use video_processor::{MediaKind, VideoProcessor};
use yolo_seg::YoloSegDetector;

fn main() -> Result<()> {
    let config = types::Config::load("config.yaml")?;

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "car_damage_scan={},ort=warn",
            config.logging.level
        ))
        .init();

    info!("🚗 Car Damage Scan starting");
    info!("✓ Configuration loaded");
    info!(
        "Analysis types: image={}, video={}",
        config.analysis.image_mode, config.analysis.video_mode
    );

    let parts = YoloSegDetector::new(&config.models.parts, &config.inference)?;
    let damage = YoloSegDetector::new(&config.models.damage, &config.inference)?;
    let mut orchestrator =
        Orchestrator::new(Box::new(parts), Box::new(damage), config.fusion.clone());
    info!("✓ Detectors ready");

    let processor = VideoProcessor::new(config.video.clone());
    let media = processor.find_media_files()?;

    if media.is_empty() {
        error!("No media files found in {}", config.video.input_dir);
        return Ok(());
    }

    std::fs::create_dir_all(&config.video.output_dir)?;

    let mut failures = 0usize;
    for (idx, (path, kind)) in media.iter().enumerate() {
        info!(
            "Processing {}/{}: {}",
            idx + 1,
            media.len(),
            path.display()
        );

        match analyze_one(&mut orchestrator, &processor, &config, path, *kind) {
            Ok(report) => {
                let report_path = report_path(&config.video.output_dir, path);
                std::fs::write(&report_path, report)?;
                info!("✓ Report written: {}", report_path.display());
            }
            Err(e) => {
                error!("Failed to process {}: {:#}", path.display(), e);
                failures += 1;
            }
        }
    }

    info!(
        "✓ Done: {} processed, {} failed",
        media.len() - failures,
        failures
    );
    Ok(())
}

/// Run one request and serialize its response. An unrecognized analysis
/// type still yields a report — the structured error payload — while
/// internal failures propagate to the caller's per-file error handling.
fn analyze_one(
    orchestrator: &mut Orchestrator,
    processor: &VideoProcessor,
    config: &types::Config,
    path: &Path,
    kind: MediaKind,
) -> Result<String> {
    match kind {
        MediaKind::Image => {
            let frame = processor.read_image(path)?;
            match orchestrator.analyze_image(&frame, &config.analysis.image_mode) {
                Ok(response) => Ok(serde_json::to_string_pretty(&response)?),
                Err(e @ PipelineError::InvalidMode(_)) => {
                    error!("{}", e);
                    Ok(serde_json::to_string_pretty(&e.to_response())?)
                }
                Err(PipelineError::Internal(e)) => Err(e),
            }
        }
        MediaKind::Video => {
            match orchestrator.analyze_video(path, &config.analysis.video_mode, processor) {
                Ok(response) => Ok(serde_json::to_string_pretty(&response)?),
                Err(e @ PipelineError::InvalidMode(_)) => {
                    error!("{}", e);
                    Ok(serde_json::to_string_pretty(&e.to_response())?)
                }
                Err(PipelineError::Internal(e)) => Err(e),
            }
        }
    }
}

fn report_path(output_dir: &str, input_path: &Path) -> PathBuf {
    let stem = input_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("report");
    PathBuf::from(output_dir).join(format!("{}_report.json", stem))
}
