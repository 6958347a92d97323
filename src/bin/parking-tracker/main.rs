use std::io::{self, BufWriter};
use std::num::NonZeroUsize;
use std::path::Path;

use anyhow::{Context, anyhow};
use clap::Parser;
use env_logger::Env;
use log::{debug, info, warn};

use parking_occupancy::{
    calibration::CalibrationSession,
    monitor_config::{ZoneSpace, load_config_from_file},
    session::{SessionError, TrackingSession},
    store::{JsonStore, Repository},
    systems::{position_remapping::PositionRemapping, zones::SessionZones},
    video_interface::{
        FrameSource, JsonLinesSink, MsgpackSink, OutputSink, PassthroughDetector, RecordingFormat,
        ReplaySource, RunSummary, SourceError, StopSignal, run_session,
    },
};

use crate::cli::{Cli, OutputFormat};

mod cli;

/// Ends the stream once `max_frames` frames have been handed out
struct FrameLimit<S: FrameSource> {
    inner: S,
    max_frames: Option<usize>,
    served: usize,
}

impl<S: FrameSource> FrameSource for FrameLimit<S> {
    type Frame = S::Frame;

    fn open(&mut self) -> Result<(), SourceError> {
        self.inner.open()
    }

    fn read_frame(&mut self) -> Result<Option<Self::Frame>, SourceError> {
        if self.max_frames.is_some_and(|max| self.served >= max) {
            return Ok(None);
        }
        let frame = self.inner.read_frame()?;
        if frame.is_some() {
            self.served += 1;
        }
        Ok(frame)
    }

    fn seek(&mut self, index: usize) -> Result<(), SourceError> {
        self.inner.seek(index)?;
        self.served = index;
        Ok(())
    }

    fn frame_count(&self) -> Option<usize> {
        self.inner.frame_count()
    }

    fn release(&mut self) {
        self.inner.release()
    }
}

/// The camera's stored path, if it points at a detections recording rather
/// than the raw video
fn recording_for_camera(video_path: Option<&str>) -> Option<String> {
    let path = video_path?;
    match RecordingFormat::recognize(Path::new(path)) {
        Some(_) => Some(path.to_owned()),
        None => {
            warn!("Camera video path {} is not a detections recording; ignoring it", path);
            None
        }
    }
}

fn run<O: OutputSink>(
    session: &mut TrackingSession,
    source: &mut FrameLimit<ReplaySource>,
    sink: &mut O,
    min_frame_dimension: u32,
) -> Result<RunSummary, SessionError> {
    run_session(
        session,
        source,
        &mut PassthroughDetector,
        sink,
        &StopSignal::new(),
        min_frame_dimension,
    )
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(Env::default().default_filter_or(&cli.log_level)).init();

    debug!("Started; args: {:?}", cli);

    let config = load_config_from_file(&cli.config_path)?;
    let store = JsonStore::open(&cli.store_path)
        .with_context(|| format!("failed to open store at {}", cli.store_path))?;

    let camera = store
        .camera(cli.camera_id)
        .ok_or(SessionError::UnknownCamera(cli.camera_id))?;

    let mut calibration = CalibrationSession::new(store, camera.id, config.ransac_settings());
    let remapping = match calibration.recompute_homography() {
        Ok(estimate) => PositionRemapping::new(Some(estimate.homography))?,
        Err(e) => {
            if config.zone_space == ZoneSpace::Map {
                warn!(
                    "No usable homography for camera {} ({}); map-space zones will be skipped",
                    camera.id, e
                );
            }
            PositionRemapping::default()
        }
    };
    let store = calibration.into_store();

    let zones = SessionZones::load(&store, &camera, config.zone_space, &remapping);
    let mut session = TrackingSession::new(&config, zones);

    let detections_path = cli
        .detections_path
        .clone()
        .or_else(|| recording_for_camera(camera.video_path.as_deref()))
        .ok_or_else(|| {
            anyhow!(
                "no --detections given and camera {} has no recorded detections path",
                camera.id
            )
        })?;
    info!("Processing recording {} for camera {}", detections_path, camera.id);

    let mut source = FrameLimit {
        inner: ReplaySource::new(&detections_path),
        max_frames: cli.max_frames.map(NonZeroUsize::get),
        served: 0,
    };

    let min_dim = config.min_frame_dimension;
    let summary = match (&cli.output_path, cli.output_format) {
        (Some(path), OutputFormat::Json) => {
            run(&mut session, &mut source, &mut JsonLinesSink::create(Path::new(path))?, min_dim)?
        }
        (Some(path), OutputFormat::Msgpack) => {
            run(&mut session, &mut source, &mut MsgpackSink::create(Path::new(path))?, min_dim)?
        }
        (None, OutputFormat::Json) => run(
            &mut session,
            &mut source,
            &mut JsonLinesSink::new(BufWriter::new(io::stdout().lock())),
            min_dim,
        )?,
        (None, OutputFormat::Msgpack) => run(
            &mut session,
            &mut source,
            &mut MsgpackSink::new(BufWriter::new(io::stdout().lock())),
            min_dim,
        )?,
    };

    info!(
        "Run summary: {} frames read, {} processed, {} skipped; {} tickets issued, {} violations{}",
        summary.frames_read,
        summary.frames_processed,
        summary.frames_skipped,
        summary.tickets_issued,
        summary.violations,
        if cli
            .max_frames
            .is_some_and(|max| summary.frames_read >= max.get())
        {
            " (frame limit reached)"
        } else {
            ""
        }
    );
    if cli.output_path.is_some() {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }

    Ok(())
}
