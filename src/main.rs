use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use mono_slam::io::{write_trajectory, ImageSequence, TrajectoryRecord};
use mono_slam::map::SparseMap;
use mono_slam::sensors::Calibration;
use mono_slam::tracking::{SlamEvent, TrackingState};
use mono_slam::{init_logger, SlamConfig, SlamPipeline};

/// Replay a directory of images through the monocular SLAM pipeline.
#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    /// Directory of png/jpg frames, processed in file-name order
    images: PathBuf,

    /// Frame rate used to timestamp the frames
    #[arg(long, default_value_t = 30.0)]
    fps: f64,

    /// Sleep between frames to replay at `fps`
    #[arg(long)]
    realtime: bool,

    /// Calibration YAML (camera_matrix, distortion_coeffs, timestamp)
    #[arg(long)]
    calibration: Option<PathBuf>,

    /// Pipeline configuration YAML
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output trajectory CSV
    #[arg(long, default_value = "trajectory.csv")]
    trajectory: PathBuf,

    /// Resume on a map saved by an earlier run
    #[arg(long)]
    load_map: Option<PathBuf>,

    /// Save the sparse map as JSON when done
    #[arg(long)]
    save_map: Option<PathBuf>,

    /// Print the final performance report
    #[arg(long)]
    report: bool,

    /// Stop after this many frames
    #[arg(long)]
    max_frames: Option<usize>,
}

fn main() -> Result<()> {
    init_logger();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => SlamConfig::from_yaml_file(path)?,
        None => SlamConfig::default(),
    };
    let sequence = ImageSequence::open(&args.images)?;
    let num_frames = args.max_frames.map_or(sequence.len(), |n| n.min(sequence.len()));
    info!("Replaying {} of {} frames from {}", num_frames, sequence.len(), args.images.display());

    // Intrinsics default to the first frame's size when no calibration exists.
    let first = sequence.frame(0, args.fps)?;
    let calibration_path = args.calibration.clone().or_else(|| config.camera.calibration_path.clone());
    let calibration = match &calibration_path {
        Some(path) => Calibration::load_or_default(path, first.width, first.height),
        None => {
            warn!("No calibration given, using default intrinsics");
            Calibration::default_for(first.width, first.height)
        }
    };
    let camera = calibration.camera();
    info!(fx = camera.fx, fy = camera.fy, cx = camera.cx, cy = camera.cy, "Camera");

    let mut pipeline = match &args.load_map {
        Some(path) => {
            let map = SparseMap::load(path, camera, config.map.clone())?;
            SlamPipeline::with_map(config, map)
        }
        None => SlamPipeline::new(config, camera),
    };
    let mut records = Vec::with_capacity(num_frames);
    let mut keyframes = 0;
    let mut loops = 0;
    let mut lost_frames = 0;
    let period = Duration::from_secs_f64(1.0 / args.fps.max(1e-3));

    for idx in 0..num_frames {
        let started = Instant::now();
        let frame = if idx == 0 { first.clone() } else { sequence.frame(idx, args.fps)? };

        let output = match pipeline.process_frame(frame) {
            Ok(output) => output,
            Err(e) => {
                warn!(frame = idx, "Skipping frame: {}", e);
                continue;
            }
        };

        keyframes += usize::from(output.is_keyframe());
        lost_frames += usize::from(output.state == TrackingState::Lost);
        for event in &output.events {
            if let SlamEvent::LoopClosure(closure) = event {
                loops += 1;
                info!(
                    "Loop closed: {} -> {} (similarity {:.2})",
                    closure.current_keyframe_id, closure.loop_keyframe_id, closure.similarity
                );
            }
        }
        records.push(TrajectoryRecord::new(output.timestamp_ns, &output.pose));

        if args.realtime {
            if let Some(rest) = period.checked_sub(started.elapsed()) {
                std::thread::sleep(rest);
            }
        }
    }

    write_trajectory(&args.trajectory, &records)?;
    info!(
        "Wrote {} poses to {} ({} keyframes, {} map points, {} loops, {} frames lost)",
        records.len(),
        args.trajectory.display(),
        keyframes,
        pipeline.map().num_map_points(),
        loops,
        lost_frames
    );

    if let Some(path) = &args.save_map {
        pipeline
            .save_map(path)
            .with_context(|| format!("Failed to save map to {}", path.display()))?;
        info!("Saved map to {}", path.display());
    }

    if args.report {
        println!("{}", serde_json::to_string_pretty(&pipeline.performance_report())?);
    }

    pipeline.shutdown();
    Ok(())
}
