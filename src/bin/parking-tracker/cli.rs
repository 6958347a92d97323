use std::num::NonZeroUsize;

use clap::{Parser, ValueEnum};

// Some defaults; some of which can be overriden via CLI args
const CONFIG_FILE_PATH: &str = "./monitor.json";
const STORE_FILE_PATH: &str = "./parking.json";

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Msgpack,
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Which camera's zones and calibration to use
    #[arg(long = "cameraId")]
    pub camera_id: i64,

    /// Recorded detector output to replay (.jsonl, or .msgpack for MessagePack);
    /// defaults to the camera's video path when that is such a recording
    #[arg(long = "detections")]
    pub detections_path: Option<String>,

    /// Where to load monitor settings
    #[arg(long="monitorConfigPath",default_value_t=String::from(CONFIG_FILE_PATH))]
    pub config_path: String,

    /// Where cameras, slots, check-in zones and calibration points are kept
    #[arg(long="storePath",default_value_t=String::from(STORE_FILE_PATH))]
    pub store_path: String,

    /// Write frame results here; stdout if omitted
    #[arg(long = "output")]
    pub output_path: Option<String>,

    #[arg(long = "output.format", value_enum, default_value_t=OutputFormat::Json)]
    pub output_format: OutputFormat,

    /// Stop after this many frames have been read (at least 1)
    #[arg(long = "maxFrames")]
    pub max_frames: Option<NonZeroUsize>,

    #[arg(long = "loglevel",default_value_t=String::from("info"))]
    pub log_level: String,
}
