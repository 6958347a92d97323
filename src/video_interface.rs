//! Collaborator seams for the frame loop (video source, detector, output
//! sink) and the single-threaded loop that drives a `TrackingSession`.
//!
//! The loop is pull-based: one frame is read, run through the detector and
//! then through the session before the next frame is read. Stopping is only
//! observed between frames. A detector call that never returns blocks the
//! loop; there is no per-frame timeout.

use std::{
    fs::{self, File},
    io::{self, BufRead, BufWriter, Write},
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    session::{FrameResult, SessionError, TrackingSession},
    tracking::Detection,
};

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("failed to open {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to decode recording: {0}")]
    Decode(String),

    #[error("cannot seek to frame {index}; source has {count} frames")]
    SeekOutOfRange { index: usize, count: usize },

    #[error("source is not open")]
    NotOpen,
}

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("inference failed: {0}")]
    Inference(String),
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Msgpack(#[from] rmp_serde::encode::Error),
}

pub trait VideoFrame {
    /// (width, height) in pixels
    fn dimensions(&self) -> (u32, u32);
}

pub trait FrameSource {
    type Frame;

    fn open(&mut self) -> Result<(), SourceError>;
    /// Ok(None) at end of stream
    fn read_frame(&mut self) -> Result<Option<Self::Frame>, SourceError>;
    fn seek(&mut self, index: usize) -> Result<(), SourceError>;
    fn frame_count(&self) -> Option<usize>;
    fn release(&mut self);
}

/// Object detector plus tracker, yielding boxes with track ids that stay
/// stable across frames for the same object
pub trait Detector<F: ?Sized> {
    /// Whether `reset` actually clears any tracking state
    fn supports_reset(&self) -> bool {
        false
    }

    fn reset(&mut self) {}

    fn infer(&mut self, frame: &F) -> Result<Vec<Detection>, DetectorError>;
}

pub trait OutputSink {
    fn write(&mut self, frame_index: usize, result: &FrameResult) -> Result<(), SinkError>;

    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Cross-thread request to end a session at the next frame boundary
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        StopSignal::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// -------- RECORDED DETECTIONS

/// One frame of detector output captured from an external detector
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecordedFrame {
    pub frame_index: usize,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub detections: Vec<Detection>,
}

impl VideoFrame for RecordedFrame {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingFormat {
    /// One JSON object per line
    JsonLines,
    /// A single MessagePack array of frames
    Msgpack,
}

impl RecordingFormat {
    /// None for anything that does not look like a detections recording
    /// (a video file, for instance)
    pub fn recognize(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("msgpack") | Some("mp") => Some(RecordingFormat::Msgpack),
            Some("jsonl") | Some("ndjson") | Some("json") => Some(RecordingFormat::JsonLines),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Self {
        Self::recognize(path).unwrap_or(RecordingFormat::JsonLines)
    }
}

pub fn parse_json_lines(text: &str) -> Result<Vec<RecordedFrame>, SourceError> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line)
                .map_err(|e| SourceError::Decode(format!("line {}: {}", n + 1, e)))
        })
        .collect()
}

/// Replays frames from a recording file
pub struct ReplaySource {
    path: PathBuf,
    format: RecordingFormat,
    frames: Option<Vec<RecordedFrame>>,
    cursor: usize,
}

impl ReplaySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let format = RecordingFormat::from_path(&path);
        ReplaySource {
            path,
            format,
            frames: None,
            cursor: 0,
        }
    }

    /// Already-loaded frames; `open` is then a no-op
    pub fn from_frames(frames: Vec<RecordedFrame>) -> Self {
        ReplaySource {
            path: PathBuf::new(),
            format: RecordingFormat::JsonLines,
            frames: Some(frames),
            cursor: 0,
        }
    }
}

impl FrameSource for ReplaySource {
    type Frame = RecordedFrame;

    fn open(&mut self) -> Result<(), SourceError> {
        if self.frames.is_some() {
            return Ok(());
        }
        let frames = match self.format {
            RecordingFormat::JsonLines => {
                let text = fs::read_to_string(&self.path).map_err(|e| SourceError::Open {
                    path: self.path.clone(),
                    source: e,
                })?;
                parse_json_lines(&text)?
            }
            RecordingFormat::Msgpack => {
                let bytes = fs::read(&self.path).map_err(|e| SourceError::Open {
                    path: self.path.clone(),
                    source: e,
                })?;
                rmp_serde::from_slice::<Vec<RecordedFrame>>(&bytes)
                    .map_err(|e| SourceError::Decode(e.to_string()))?
            }
        };
        info!("Opened recording {:?} with {} frames", self.path, frames.len());
        self.frames = Some(frames);
        self.cursor = 0;
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<RecordedFrame>, SourceError> {
        let frames = self.frames.as_ref().ok_or(SourceError::NotOpen)?;
        let frame = frames.get(self.cursor).cloned();
        if frame.is_some() {
            self.cursor += 1;
        }
        Ok(frame)
    }

    fn seek(&mut self, index: usize) -> Result<(), SourceError> {
        let count = self.frames.as_ref().ok_or(SourceError::NotOpen)?.len();
        if index > count {
            return Err(SourceError::SeekOutOfRange { index, count });
        }
        self.cursor = index;
        Ok(())
    }

    fn frame_count(&self) -> Option<usize> {
        self.frames.as_ref().map(|f| f.len())
    }

    fn release(&mut self) {
        self.frames = None;
        self.cursor = 0;
    }
}

/// Hands back the detections stored with each recorded frame
#[derive(Debug, Default)]
pub struct PassthroughDetector;

impl Detector<RecordedFrame> for PassthroughDetector {
    fn infer(&mut self, frame: &RecordedFrame) -> Result<Vec<Detection>, DetectorError> {
        Ok(frame.detections.clone())
    }
}

// -------- OUTPUT

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FrameRecord<'a> {
    frame_index: usize,
    #[serde(flatten)]
    result: &'a FrameResult,
}

/// Frame results as newline-delimited JSON
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        JsonLinesSink { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl JsonLinesSink<BufWriter<File>> {
    pub fn create(path: &Path) -> Result<Self, SinkError> {
        Ok(JsonLinesSink::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write> OutputSink for JsonLinesSink<W> {
    fn write(&mut self, frame_index: usize, result: &FrameResult) -> Result<(), SinkError> {
        serde_json::to_writer(&mut self.writer, &FrameRecord {
            frame_index,
            result,
        })?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(self.writer.flush()?)
    }
}

/// Frame results as a stream of MessagePack maps
pub struct MsgpackSink<W: Write> {
    writer: W,
}

impl<W: Write> MsgpackSink<W> {
    pub fn new(writer: W) -> Self {
        MsgpackSink { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl MsgpackSink<BufWriter<File>> {
    pub fn create(path: &Path) -> Result<Self, SinkError> {
        Ok(MsgpackSink::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write> OutputSink for MsgpackSink<W> {
    fn write(&mut self, frame_index: usize, result: &FrameResult) -> Result<(), SinkError> {
        rmp_serde::encode::write_named(&mut self.writer, &FrameRecord {
            frame_index,
            result,
        })?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(self.writer.flush()?)
    }
}

/// Read frame results back from a JSON lines stream, as raw JSON values
pub fn read_json_lines<R: BufRead>(reader: R) -> Result<Vec<serde_json::Value>, SinkError> {
    reader
        .lines()
        .filter(|line| line.as_ref().map_or(true, |l| !l.trim().is_empty()))
        .map(|line| -> Result<serde_json::Value, SinkError> { Ok(serde_json::from_str(&line?)?) })
        .collect()
}

// -------- THE LOOP

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub frames_read: usize,
    pub frames_processed: usize,
    pub frames_skipped: usize,
    pub tickets_issued: usize,
    pub violations: usize,
    pub stopped_early: bool,
}

/// Probe the source, start the session and feed it frames until the source
/// ends or `stop` is signalled. The source is released and the session
/// stopped on every exit path once the source has been opened.
pub fn run_session<S, D, O>(
    session: &mut TrackingSession,
    source: &mut S,
    detector: &mut D,
    sink: &mut O,
    stop: &StopSignal,
    min_frame_dimension: u32,
) -> Result<RunSummary, SessionError>
where
    S: FrameSource,
    S::Frame: VideoFrame,
    D: Detector<S::Frame>,
    O: OutputSink,
{
    source
        .open()
        .map_err(|e| SessionError::SourceUnavailable(e.to_string()))?;

    if let Err(e) = probe(source) {
        source.release();
        session.stop();
        return Err(e);
    }

    if let Err(e) = session.start(detector) {
        source.release();
        return Err(e);
    }

    let mut summary = RunSummary::default();
    let mut frame_index = 0;

    loop {
        if stop.is_stopped() {
            info!("Stop requested after {} frames", summary.frames_read);
            summary.stopped_early = true;
            break;
        }

        let frame = match source.read_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                info!("End of video reached at frame {}", frame_index);
                break;
            }
            Err(e) => {
                warn!(
                    "Invalid frame at frame {}, treating as end of video: {}",
                    frame_index, e
                );
                break;
            }
        };
        let index = frame_index;
        frame_index += 1;
        summary.frames_read += 1;

        let (width, height) = frame.dimensions();
        if width < min_frame_dimension || height < min_frame_dimension {
            warn!("Invalid frame size at frame {}: {}x{}", index, width, height);
            summary.frames_skipped += 1;
            continue;
        }

        let detections = match detector.infer(&frame) {
            Ok(detections) => detections,
            Err(e) => {
                warn!("Error during tracking (frame {}): {}", index, e);
                summary.frames_skipped += 1;
                continue;
            }
        };

        let result = match session.process_frame(&detections) {
            Ok(result) => result,
            Err(e) => {
                error!("Session rejected frame {}: {}", index, e);
                break;
            }
        };
        summary.frames_processed += 1;

        if let Err(e) = sink.write(index, &result) {
            error!("Failed to write result for frame {}: {}", index, e);
        }
    }

    summary.tickets_issued = session.tickets_issued();
    summary.violations = session.violations_seen();

    source.release();
    session.stop();
    if let Err(e) = sink.flush() {
        error!("Failed to flush output: {}", e);
    }

    info!(
        "Video processing completed: {} frames read, {} processed, {} skipped",
        summary.frames_read, summary.frames_processed, summary.frames_skipped
    );
    Ok(summary)
}

/// Read the first frame to check the source works, then rewind
fn probe<S>(source: &mut S) -> Result<(), SessionError>
where
    S: FrameSource,
    S::Frame: VideoFrame,
{
    match source.read_frame() {
        Ok(Some(first)) => {
            let (width, height) = first.dimensions();
            info!(
                "Video resolution: {}x{} ({} frames)",
                width,
                height,
                source
                    .frame_count()
                    .map_or(String::from("unknown"), |n| n.to_string())
            );
        }
        Ok(None) => return Err(SessionError::EmptySource),
        Err(e) => return Err(SessionError::SourceUnavailable(e.to_string())),
    }
    source
        .seek(0)
        .map_err(|e| SessionError::SourceUnavailable(e.to_string()))?;
    debug!("Rewound source to frame 0");
    Ok(())
}
